//! Ingestion scenarios against the memory warehouse.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use serde_json::json;

use stratum_client::{IngestStrategy, TableDefinition, TableRef, WarehouseClient};
use stratum_common::{ErrorCode, OrmError, WarehouseConfig};
use stratum_model::{parse, FieldSchema, Frame, Instance, ParseOptions, TableSchema, Value};
use stratum_test::fixtures::{epoch, person, pet};
use stratum_test::{memory_database, memory_database_with};

fn people() -> Vec<Instance> {
    let model = person();
    let defaults = ParseOptions::new().default_value("age", 30);
    ["Ann", "Bob", "Cid", "Dee"]
        .iter()
        .enumerate()
        .map(|(i, name)| {
            parse(
                &model,
                vec![("id", Value::from(i as i64 + 1)), ("name", Value::from(*name))],
                &defaults,
            )
            .unwrap()
        })
        .collect()
}

#[test]
fn test_streaming_insert_with_shared_defaults() {
    let (db, warehouse) = memory_database().unwrap();
    let model = person();
    let session = db.session().unwrap();
    session.table_create(&model).unwrap();

    session
        .ingest()
        .insert(IngestStrategy::Streaming, &model, &people())
        .unwrap();

    assert_eq!(session.query(&model).count().unwrap(), 4);
    assert_eq!(warehouse.stats().insert_calls.load(Ordering::SeqCst), 1);

    let rows = session.query(&model).all().unwrap();
    for row in &rows {
        let instance = row.as_instance().unwrap();
        assert_eq!(instance.get("age"), Some(&Value::Int(30)));
        assert_eq!(instance.get("created_at"), Some(&Value::Timestamp(epoch())));
    }
}

#[test]
fn test_streaming_batches() {
    let config = WarehouseConfig::for_testing().streaming_batch_size(3);
    let (db, warehouse) = memory_database_with(config).unwrap();
    let model = person();
    let session = db.session().unwrap();
    session.table_create(&model).unwrap();

    let mut rows = people();
    rows.extend(people());
    session
        .ingest()
        .insert(IngestStrategy::Streaming, &model, &rows)
        .unwrap();
    assert_eq!(warehouse.stats().insert_calls.load(Ordering::SeqCst), 3);
    assert_eq!(warehouse.row_count("unittest.person"), 8);

    let err = session.ingest().stream(&model, &rows, Some(0)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Validation);
}

#[test]
fn test_streaming_row_errors_are_reported() {
    let (db, warehouse) = memory_database().unwrap();
    let model = person();
    let mut fields: Vec<FieldSchema> = model.table_schema().fields;
    fields.push(FieldSchema::new("email", "STRING", "REQUIRED"));
    warehouse
        .create_table(&TableDefinition {
            table: TableRef::new("unittest", "person"),
            schema: TableSchema::new(fields),
            ddl: String::new(),
        })
        .unwrap();

    let session = db.session().unwrap();
    let err = session
        .ingest()
        .insert(IngestStrategy::Streaming, &model, &people()[..2])
        .unwrap_err();
    let errors = err.ingest_errors().unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0]["index"], 0);
    assert_eq!(errors[0]["errors"][0]["reason"], "invalid");
    assert_eq!(warehouse.row_count("unittest.person"), 0);
}

#[test]
fn test_load_job_insert() {
    let (db, warehouse) = memory_database().unwrap();
    let model = person();
    let session = db.session().unwrap();
    session.table_create(&model).unwrap();

    session
        .ingest()
        .dispatch("load_job", &model, &people())
        .unwrap();
    assert_eq!(warehouse.stats().load_jobs.load(Ordering::SeqCst), 1);
    assert_eq!(session.query(&model).count().unwrap(), 4);
}

#[test]
fn test_load_job_into_dropped_table_fails() {
    let (db, warehouse) = memory_database().unwrap();
    let model = person();
    let session = db.session().unwrap();
    session.table_create(&model).unwrap();
    warehouse.drop_table_during_next_load();

    let err = session
        .ingest()
        .insert(IngestStrategy::LoadJob, &model, &people())
        .unwrap_err();
    match &err {
        OrmError::Ingest {
            errors,
            error_result,
            ..
        } => {
            assert!(!errors.is_empty());
            assert_eq!(error_result.as_ref().unwrap()["reason"], "notFound");
        }
        other => panic!("expected ingest error, got {:?}", other),
    }
    assert!(!session.table_exists(&model).unwrap());
}

#[test]
fn test_load_job_rejects_bad_rows() {
    let (db, warehouse) = memory_database().unwrap();
    let table = TableRef::new("unittest", "person");
    warehouse
        .create_table(&TableDefinition {
            table: table.clone(),
            schema: TableSchema::new(vec![FieldSchema::new("id", "INTEGER", "REQUIRED")]),
            ddl: String::new(),
        })
        .unwrap();

    let session = db.session().unwrap();
    let err = session
        .ingest()
        .insert(IngestStrategy::LoadJob, &person(), &people())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Ingest);
    assert_eq!(err.ingest_errors().unwrap().len(), 4);
    assert_eq!(warehouse.row_count("unittest.person"), 0);

    // The warehouse itself accepts the same payload when unknown values are ignored.
    let mut job = warehouse
        .submit_load_job(
            Bytes::from(json!({"id": 1, "name": "x"}).to_string()),
            &table,
            &stratum_client::LoadJobConfig {
                ignore_unknown_values: true,
                ..stratum_client::LoadJobConfig::append_only()
            },
        )
        .unwrap();
    stratum_client::wait_for_job(job.as_mut(), std::time::Duration::from_millis(1)).unwrap();
    assert!(job.error_result().is_none());
    assert_eq!(warehouse.row_count("unittest.person"), 1);
}

#[test]
fn test_empty_ingest_makes_no_remote_call() {
    let (db, warehouse) = memory_database().unwrap();
    let model = person();
    let session = db.session().unwrap();

    session
        .ingest()
        .insert(IngestStrategy::Streaming, &model, &[])
        .unwrap();
    session
        .ingest()
        .insert(IngestStrategy::LoadJob, &model, &[])
        .unwrap();
    assert_eq!(warehouse.stats().insert_calls.load(Ordering::SeqCst), 0);
    assert_eq!(warehouse.stats().load_jobs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_ingest_rejects_foreign_instances_and_unknown_strategy() {
    let (db, _warehouse) = memory_database().unwrap();
    let session = db.session().unwrap();
    let stray = vec![Instance::new(&pet())];

    let err = session
        .ingest()
        .insert(IngestStrategy::Streaming, &person(), &stray)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Validation);

    let err = session.ingest().dispatch("bulk", &person(), &[]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Validation);
}

#[test]
fn test_invalid_enum_fails_before_any_call() {
    let (db, warehouse) = memory_database().unwrap();
    let model = pet();
    let session = db.session().unwrap();
    session.table_create(&model).unwrap();

    let rows = vec![Instance::new(&model).with("species", "parrot").unwrap()];
    let err = session
        .ingest()
        .insert(IngestStrategy::Streaming, &model, &rows)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Serialization);
    assert_eq!(warehouse.stats().insert_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_create_from_frame() {
    let (db, _warehouse) = memory_database().unwrap();
    let model = person();
    let session = db.session().unwrap();
    session.table_create(&model).unwrap();

    let frame = Frame::from_rows(
        ["id", "full_name"],
        vec![
            vec![Value::Int(1), Value::from("Ann")],
            vec![Value::Int(2), Value::from("Bob")],
        ],
    )
    .unwrap();
    let relabel = HashMap::from([("full_name".to_string(), "name".to_string())]);

    let created = session
        .ingest()
        .create_from_frame(&model, &frame, &relabel, IngestStrategy::LoadJob)
        .unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(created[1].get("name"), Some(&Value::from("Bob")));
    assert_eq!(session.query(&model).count().unwrap(), 2);
}

#[test]
fn test_closed_session_rejects_ingest() {
    let (db, _warehouse) = memory_database().unwrap();
    let session = db.session().unwrap();
    session.close().unwrap();
    let err = session
        .ingest()
        .insert(IngestStrategy::Streaming, &person(), &people())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Scope);
}
