use chrono::NaiveDate;

use stratum_model::{Column, ColumnType, Model, Value};

/// `unittest.person`: id, name, age, created_at.
pub fn person() -> Model {
    Model::builder("Person", "person")
        .column(
            Column::new("id", ColumnType::Integer)
                .required()
                .default(0),
        )
        .column(Column::new("name", ColumnType::String { max_length: Some(64) }))
        .column(Column::new("age", ColumnType::Integer))
        .column(
            Column::new("created_at", ColumnType::Timestamp)
                .required()
                .default_with(|| Value::Timestamp(epoch())),
        )
        .build()
        .unwrap_or_else(|e| panic!("person fixture: {}", e))
}

/// `unittest.pet`: owner_id, name, species.
pub fn pet() -> Model {
    Model::builder("Pet", "pet")
        .column(Column::new("owner_id", ColumnType::Integer))
        .column(Column::new("name", ColumnType::String { max_length: None }))
        .column(Column::new(
            "species",
            ColumnType::Enum(vec!["cat".into(), "dog".into()]),
        ))
        .build()
        .unwrap_or_else(|e| panic!("pet fixture: {}", e))
}

/// `unittest.parcel`: a GeoJSON geography model.
pub fn parcel() -> Model {
    Model::builder("Parcel", "parcel")
        .column(Column::new("name", ColumnType::String { max_length: None }))
        .column(Column::new("size", ColumnType::Integer))
        .column(Column::new("geometry", ColumnType::GeographyGeoJson))
        .build()
        .unwrap_or_else(|e| panic!("parcel fixture: {}", e))
}

/// `unittest.landmark`: a WKT geography model.
pub fn landmark() -> Model {
    Model::builder("Landmark", "landmark")
        .column(Column::new("name", ColumnType::String { max_length: None }))
        .column(Column::new("location", ColumnType::GeographyWkt))
        .build()
        .unwrap_or_else(|e| panic!("landmark fixture: {}", e))
}

/// The default `created_at`.
pub fn epoch() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}
