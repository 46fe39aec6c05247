//! Integration tests for cassandra-service
//!
//! Runs whole command flows through the service against the in-memory store.

use async_trait::async_trait;
use cassandra_service::query::{Paginate, Statement};
use cassandra_service::schema::{FieldToggle, KeyPart};
use cassandra_service::{
    Driver, DriverError, Error, FieldDef, FieldType, FindResult, HookStage, Hooks, MaterializedView, MemoryStore,
    Params, ResultSet, Schema, Service, ServiceConfig,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// Records the table of every statement before handing it to a MemoryStore
struct CountingDriver {
    inner: MemoryStore,
    tables: Mutex<Vec<String>>,
}

impl CountingDriver {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            tables: Mutex::new(Vec::new()),
        }
    }

    fn executed(&self) -> Vec<String> {
        self.tables.lock().unwrap().clone()
    }
}

#[async_trait]
impl Driver for CountingDriver {
    async fn execute(&self, statement: &Statement) -> Result<ResultSet, DriverError> {
        self.tables.lock().unwrap().push(statement.table.clone());
        self.inner.execute(statement).await
    }
}

fn people() -> Schema {
    Schema::new("test", "people", &["id"])
        .field("id", FieldDef::new(FieldType::Int))
        .field("name", FieldDef::new(FieldType::Text))
        .field("age", FieldDef::new(FieldType::Int))
        .filter("old", |predicate| predicate.where_eq("age", json!(32)))
}

fn setup(schema: Schema, config: ServiceConfig) -> Service {
    let store = MemoryStore::new().with_schema(&schema);
    Service::builder()
        .model(schema)
        .config(config)
        .driver(Arc::new(store))
        .build()
        .expect("Failed to build service")
}

async fn seed(service: &Service) {
    for person in [
        json!({"id": 1, "name": "Dave", "age": 25}),
        json!({"id": 2, "name": "John", "age": 32}),
        json!({"id": 3, "name": "Dada", "age": 29}),
    ] {
        service.create(person, &Params::default()).await.expect("seed failed");
    }
}

fn rows(result: FindResult) -> Vec<Value> {
    result.into_data().into_iter().map(Value::Object).collect()
}

// =============================================================================
// find / get
// =============================================================================

#[tokio::test]
async fn test_named_filter() {
    let service = setup(people(), ServiceConfig::default());
    seed(&service).await;

    let found = service.find(&Params::query(json!({"$filters": "old"}))).await.unwrap();
    assert_eq!(rows(found), vec![json!({"id": 2, "name": "John", "age": 32})]);
}

#[tokio::test]
async fn test_find_operators() {
    let service = setup(people(), ServiceConfig::default());
    seed(&service).await;

    let found = service
        .find(&Params::query(json!({
            "age": {"$gte": 26},
            "$sort": {"age": -1},
            "$allowFiltering": true
        })))
        .await
        .unwrap();
    let names: Vec<Value> = rows(found).into_iter().map(|r| r["name"].clone()).collect();
    assert_eq!(names, vec![json!("John"), json!("Dada")]);

    let found = service
        .find(&Params::query(json!({"name": {"$like": "Da%"}, "$limit": 1})))
        .await
        .unwrap();
    assert_eq!(found.data().len(), 1);
}

#[tokio::test]
async fn test_rejected_operators() {
    let service = setup(people(), ServiceConfig::default());

    let err = service
        .find(&Params::query(json!({"$or": [{"age": 1}, {"age": 2}]})))
        .await
        .unwrap_err();
    assert_eq!(err, Error::BadRequest("`$or` is not supported".into()));

    let err = service
        .find(&Params::query(json!({"$and": [{"age": {"$nin": [1, 2]}}]})))
        .await
        .unwrap_err();
    assert_eq!(err, Error::BadRequest("`$nin` is not supported".into()));
}

#[tokio::test]
async fn test_get_missing() {
    let service = setup(people(), ServiceConfig::default());

    let err = service.get(&json!(999), &Params::default()).await.unwrap_err();
    assert_eq!(err, Error::NotFound("No record found for id '999'".into()));
    assert_eq!(err.status(), 404);
}

#[tokio::test]
async fn test_pagination() {
    let config = ServiceConfig::default().with_paginate(Paginate::new(2, 10));
    let service = setup(people(), config);
    seed(&service).await;

    match service.find(&Params::default()).await.unwrap() {
        FindResult::Page(page) => {
            assert_eq!(page.total, Some(3));
            assert_eq!(page.limit, Some(2));
            assert_eq!(page.data.len(), 2);
        }
        other => panic!("expected a page, got {:?}", other),
    }

    let unpaged = Params::default().with_paginate(Paginate::default());
    assert!(matches!(service.find(&unpaged).await.unwrap(), FindResult::Rows(r) if r.len() == 3));
}

#[tokio::test]
async fn test_limit_zero_skips_row_fetch() {
    let schema = people();
    let driver = Arc::new(CountingDriver::new(MemoryStore::new().with_schema(&schema)));
    let service = Service::builder().model(schema).driver(driver.clone()).build().unwrap();

    let found = service.find(&Params::query(json!({"$limit": 0}))).await.unwrap();
    assert!(found.data().is_empty());
    assert!(driver.executed().is_empty());

    // With pagination only the count query runs
    let paged = Params::query(json!({"$limit": 0})).with_paginate(Paginate::new(5, 10));
    match service.find(&paged).await.unwrap() {
        FindResult::Page(page) => {
            assert_eq!(page.total, Some(0));
            assert!(page.data.is_empty());
        }
        other => panic!("expected a page, got {:?}", other),
    }
    assert_eq!(driver.executed().len(), 1);
}

#[tokio::test]
async fn test_materialized_view_routing() {
    let schema = people();
    let view = MaterializedView::new("people_by_name", &["name"]);
    let store = MemoryStore::new().with_schema(&schema).with_view(&schema, &view);
    let driver = Arc::new(CountingDriver::new(store));
    let service = Service::builder()
        .model(schema)
        .config(ServiceConfig::default().with_view(view))
        .driver(driver.clone())
        .build()
        .unwrap();
    seed(&service).await;

    let before = driver.executed().len();
    let found = service.find(&Params::query(json!({"name": "Dada"}))).await.unwrap();
    assert_eq!(found.data()[0]["id"], json!(3));
    assert_eq!(driver.executed()[before], "people_by_name");

    service
        .find(&Params::query(json!({"name": "Dada", "age": 29, "$allowFiltering": true})))
        .await
        .unwrap();
    assert_eq!(driver.executed().last().map(String::as_str), Some("people"));
}

// =============================================================================
// create
// =============================================================================

#[tokio::test]
async fn test_create_if_not_exists_keeps_row() {
    let service = setup(people(), ServiceConfig::default());
    seed(&service).await;

    let kept = service
        .create(
            json!({"id": 1, "name": "Mallory", "age": 99}),
            &Params::query(json!({"$ifNotExists": true})),
        )
        .await
        .unwrap();
    assert_eq!(kept["name"], json!("Dave"));

    let row = service.get(&json!(1), &Params::default()).await.unwrap();
    assert_eq!(row["name"], json!("Dave"));
    assert_eq!(row["age"], json!(25));
}

#[tokio::test]
async fn test_create_no_select_returns_data() {
    let schema = people();
    let driver = Arc::new(CountingDriver::new(MemoryStore::new().with_schema(&schema)));
    let service = Service::builder().model(schema).driver(driver.clone()).build().unwrap();

    let data = json!({"id": 7, "name": "Eve", "age": 40});
    let created = service
        .create(data.clone(), &Params::query(json!({"$noSelect": true})))
        .await
        .unwrap();
    assert_eq!(created, data);
    assert_eq!(driver.executed().len(), 1);
}

#[tokio::test]
async fn test_create_stamps_timestamps_and_version() {
    let schema = people()
        .field("createdAt", FieldDef::new(FieldType::Timestamp))
        .field("updatedAt", FieldDef::new(FieldType::Timestamp))
        .field("__v", FieldDef::new(FieldType::Timeuuid))
        .with_timestamps(FieldToggle::Enabled(true), FieldToggle::Enabled(true))
        .with_versions(None);
    let service = setup(schema, ServiceConfig::default());

    let created = service
        .create(json!({"id": 1, "name": "Dave"}), &Params::default())
        .await
        .unwrap();
    let stamp = created["createdAt"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    assert!(stamp.ends_with('Z'));
    assert_eq!(created["createdAt"], created["updatedAt"]);

    let version = uuid::Uuid::parse_str(created["__v"].as_str().unwrap()).unwrap();
    assert_eq!(version.get_version_num(), 1);
}

#[tokio::test]
async fn test_create_validation() {
    let schema = people().field("email", FieldDef::new(FieldType::Text).required());
    let service = setup(schema, ServiceConfig::default());

    let err = service
        .create(json!({"id": 1, "email": null}), &Params::default())
        .await
        .unwrap_err();
    assert_eq!(err, Error::BadRequest("`email` field is required".into()));

    let err = service
        .create(json!({"id": 1, "email": "a@b", "age": "old"}), &Params::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::BadRequest("Invalid Value: \"old\" for Field: age (Type: int)".into())
    );
}

#[tokio::test]
async fn test_bulk_create() {
    let service = setup(people(), ServiceConfig::default());

    let created = service
        .create(
            json!([{"id": 1, "name": "Dave"}, {"id": 2, "name": "John"}]),
            &Params::default(),
        )
        .await
        .unwrap();
    assert_eq!(created.as_array().map(Vec::len), Some(2));

    let batched = service
        .create(
            json!([{"id": 3, "name": "Dada"}, {"id": 4, "name": "Eve"}]),
            &Params::query(json!({"$batch": true})),
        )
        .await
        .unwrap();
    assert_eq!(batched[1]["name"], json!("Eve"));
    assert_eq!(service.find(&Params::default()).await.unwrap().data().len(), 4);
}

#[tokio::test]
async fn test_batch_requires_capable_driver() {
    let schema = people();
    let driver = Arc::new(CountingDriver::new(MemoryStore::new().with_schema(&schema)));
    let service = Service::builder().model(schema).driver(driver.clone()).build().unwrap();

    let err = service
        .create(json!([{"id": 1, "name": "Dave"}]), &Params::query(json!({"$batch": true})))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::NotImplemented("Batch create requires a batch-capable driver".into())
    );
    assert!(driver.executed().is_empty());
}

// =============================================================================
// update / patch / remove
// =============================================================================

#[tokio::test]
async fn test_update_replaces_record() {
    let schema = people().field("created", FieldDef::new(FieldType::Boolean));
    let service = setup(schema, ServiceConfig::default());
    service
        .create(json!({"id": 1, "name": "Dave", "age": 25, "created": true}), &Params::default())
        .await
        .unwrap();

    let updated = service
        .update(&json!(1), json!({"name": "John", "age": 30}), &Params::default())
        .await
        .unwrap();
    assert_eq!(updated["id"], json!(1));
    assert_eq!(updated["name"], json!("John"));
    assert_eq!(updated["age"], json!(30));
    assert_eq!(updated["created"], Value::Null);

    let row = service.get(&json!(1), &Params::default()).await.unwrap();
    assert_eq!(row["created"], Value::Null);
}

#[tokio::test]
async fn test_update_missing_record() {
    let service = setup(people(), ServiceConfig::default());
    let err = service
        .update(&json!(5), json!({"name": "Nobody"}), &Params::default())
        .await
        .unwrap_err();
    assert_eq!(err.message(), "No record found for id '5'");
}

#[tokio::test]
async fn test_patch_single() {
    let schema = people().field("tags", FieldDef::new(FieldType::Set));
    let service = setup(schema, ServiceConfig::default());
    service
        .create(json!({"id": 1, "name": "Dave", "tags": ["b"]}), &Params::default())
        .await
        .unwrap();

    let patched = service
        .patch(Some(&json!("1")), json!({"age": 26, "tags": {"$add": ["a"]}}), &Params::default())
        .await
        .unwrap();
    assert_eq!(patched["name"], json!("Dave"));
    assert_eq!(patched["age"], json!(26));
    assert_eq!(patched["tags"], json!(["a", "b"]));
}

#[tokio::test]
async fn test_patch_by_query() {
    let service = setup(people(), ServiceConfig::default());
    seed(&service).await;

    let patched = service
        .patch(None, json!({"age": 50}), &Params::query(json!({"id": {"$in": [2, 3]}})))
        .await
        .unwrap();
    let patched = patched.as_array().unwrap();
    assert_eq!(patched.len(), 2);
    assert!(patched.iter().all(|row| row["age"] == json!(50)));

    let untouched = service.get(&json!(1), &Params::default()).await.unwrap();
    assert_eq!(untouched["age"], json!(25));
}

#[tokio::test]
async fn test_patch_by_query_without_matches() {
    let service = setup(people(), ServiceConfig::default());
    seed(&service).await;

    let err = service
        .patch(None, json!({"age": 50}), &Params::query(json!({"id": {"$in": [8, 9]}})))
        .await
        .unwrap_err();
    assert_eq!(err, Error::NotFound("No record found for id 'null'".into()));
}

#[tokio::test]
async fn test_patch_promotes_conditions() {
    let service = setup(people(), ServiceConfig::default());
    seed(&service).await;

    // name is checked as a condition, not used as a filter
    let rejected = service
        .patch(Some(&json!(1)), json!({"age": 60}), &Params::query(json!({"name": "Nobody"})))
        .await
        .unwrap();
    assert_eq!(rejected["age"], json!(25));

    let applied = service
        .patch(Some(&json!(1)), json!({"age": 60}), &Params::query(json!({"name": "Dave"})))
        .await
        .unwrap();
    assert_eq!(applied["age"], json!(60));
}

#[tokio::test]
async fn test_update_with_collection_deltas() {
    let schema = people()
        .field("attrs", FieldDef::new(FieldType::Map))
        .field("tags", FieldDef::new(FieldType::Set))
        .field("createdAt", FieldDef::new(FieldType::Timestamp))
        .with_timestamps(FieldToggle::Enabled(true), FieldToggle::Enabled(false));
    let service = setup(schema, ServiceConfig::default());
    let created = service
        .create(
            json!({"id": 1, "name": "Dave", "attrs": {"a": "b", "c": "d"}, "tags": ["x"]}),
            &Params::default(),
        )
        .await
        .unwrap();

    let updated = service
        .update(
            &json!(1),
            json!({"name": "Dave", "attrs": {"$remove": ["a", "z"]}, "tags": {"$add": ["y"]}}),
            &Params::default(),
        )
        .await
        .unwrap();
    assert_eq!(updated["attrs"], json!({"c": "d"}));
    assert_eq!(updated["tags"], json!(["x", "y"]));
    assert_eq!(updated["createdAt"], created["createdAt"]);

    let stored = service.get(&json!(1), &Params::default()).await.unwrap();
    assert_eq!(updated, stored);
}

#[tokio::test]
async fn test_find_by_token() {
    use cassandra_service::query::filter::token;

    let service = setup(people(), ServiceConfig::default());
    seed(&service).await;

    let found = service
        .find(&Params::query(json!({"$token": {"$keys": ["id"], "$condition": {"$eq": [2]}}})))
        .await
        .unwrap();
    assert_eq!(rows(found).iter().map(|r| r["id"].clone()).collect::<Vec<_>>(), vec![json!(2)]);

    let pivot = token(&[json!(2)]);
    let mut expected: Vec<i64> = [1i64, 3].into_iter().filter(|id| token(&[json!(id)]) > pivot).collect();
    expected.sort();

    let found = service
        .find(&Params::query(json!({"$token": {"$keys": ["id"], "$condition": {"$gt": [2]}}})))
        .await
        .unwrap();
    let mut ids: Vec<i64> = found.data().iter().filter_map(|r| r["id"].as_i64()).collect();
    ids.sort();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_find_limit_per_partition() {
    let service = setup(people_rooms(), ServiceConfig::default());
    for (people_id, room_id, time) in [(1, 1, 1), (1, 1, 2), (1, 1, 3), (2, 2, 1), (2, 2, 2)] {
        service
            .create(
                json!({"people_id": people_id, "room_id": room_id, "time": time}),
                &Params::default(),
            )
            .await
            .unwrap();
    }

    let found = service
        .find(&Params::query(json!({"$limitPerPartition": 1})))
        .await
        .unwrap();
    let partitions: Vec<(Value, Value)> = found
        .data()
        .iter()
        .map(|r| (r["people_id"].clone(), r["room_id"].clone()))
        .collect();
    assert_eq!(partitions, vec![(json!(1), json!(1)), (json!(2), json!(2))]);

    let found = service
        .find(&Params::query(json!({"$limitPerPartition": 2})))
        .await
        .unwrap();
    assert_eq!(found.data().len(), 4);
}

#[tokio::test]
async fn test_patch_by_query_keeps_conditions() {
    let service = setup(people(), ServiceConfig::default());
    seed(&service).await;

    let patched = service
        .patch(
            None,
            json!({"age": 99}),
            &Params::query(json!({"id": 2, "$if": {"name": "nobody"}})),
        )
        .await
        .unwrap();
    assert_eq!(patched[0]["age"], json!(32));
    let row = service.get(&json!(2), &Params::default()).await.unwrap();
    assert_eq!(row["age"], json!(32));

    let patched = service
        .patch(None, json!({"age": 99}), &Params::query(json!({"id": 2, "$if": {"name": "John"}})))
        .await
        .unwrap();
    assert_eq!(patched[0]["age"], json!(99));
}

#[tokio::test]
async fn test_remove_by_query_keeps_conditions() {
    let service = setup(people(), ServiceConfig::default());
    seed(&service).await;

    service
        .remove(None, &Params::query(json!({"id": 3, "$if": {"age": 1}})))
        .await
        .unwrap();
    assert!(service.get(&json!(3), &Params::default()).await.is_ok());

    service
        .remove(None, &Params::query(json!({"id": 3, "$if": {"age": 29}})))
        .await
        .unwrap();
    assert!(service.get(&json!(3), &Params::default()).await.is_err());
}

#[tokio::test]
async fn test_max_page_size_alone_does_not_paginate() {
    let config = ServiceConfig::default().with_paginate(Paginate {
        default: None,
        max: Some(5),
    });
    let service = setup(people(), config);
    seed(&service).await;

    let found = service.find(&Params::default()).await.unwrap();
    assert!(matches!(&found, FindResult::Rows(r) if r.len() == 3));
}

#[tokio::test]
async fn test_remove() {
    let service = setup(people(), ServiceConfig::default());
    seed(&service).await;

    let removed = service.remove(Some(&json!(1)), &Params::default()).await.unwrap();
    assert_eq!(removed["name"], json!("Dave"));

    let err = service.get(&json!(1), &Params::default()).await.unwrap_err();
    assert_eq!(err.message(), "No record found for id '1'");

    let removed = service
        .remove(None, &Params::query(json!({"age": {"$gt": 26}, "$allowFiltering": true})))
        .await
        .unwrap();
    assert_eq!(removed.as_array().map(Vec::len), Some(2));
    assert!(service.find(&Params::default()).await.unwrap().data().is_empty());

    let quiet = service
        .remove(Some(&json!(2)), &Params::query(json!({"$noSelect": true})))
        .await
        .unwrap();
    assert_eq!(quiet, json!({}));
}

// =============================================================================
// composite keys
// =============================================================================

fn people_rooms() -> Schema {
    Schema::new("test", "people_rooms", &[])
        .with_key(vec![
            KeyPart::Partition(vec!["people_id".into(), "room_id".into()]),
            KeyPart::Column("time".into()),
        ])
        .field("people_id", FieldDef::new(FieldType::Int))
        .field("room_id", FieldDef::new(FieldType::Int))
        .field("time", FieldDef::new(FieldType::Int))
        .field("admin", FieldDef::new(FieldType::Boolean))
}

#[tokio::test]
async fn test_composite_ids() {
    let service = setup(people_rooms(), ServiceConfig::default());
    service
        .create(json!({"people_id": 1, "room_id": 2, "time": 3, "admin": true}), &Params::default())
        .await
        .unwrap();

    for id in [
        json!("1,2,3"),
        json!([1, 2, 3]),
        json!("[1,2,3]"),
        json!(r#"{"people_id":1,"room_id":2,"time":3}"#),
        json!({"people_id": 1, "room_id": 2, "time": 3}),
    ] {
        let row = service.get(&id, &Params::default()).await.unwrap();
        assert_eq!(row["admin"], json!(true), "id {}", id);
    }

    let err = service.get(&json!("1,2"), &Params::default()).await.unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)));

    let err = service.get(&json!("1,2,4"), &Params::default()).await.unwrap_err();
    assert_eq!(err.message(), "No record found for id '1,2,4'");
}

#[tokio::test]
async fn test_composite_separator() {
    let config = ServiceConfig::default().with_separator("|");
    let service = setup(people_rooms(), config);
    service
        .create(json!({"people_id": 1, "room_id": 2, "time": 3}), &Params::default())
        .await
        .unwrap();

    let patched = service
        .patch(Some(&json!("1|2|3")), json!({"admin": false}), &Params::default())
        .await
        .unwrap();
    assert_eq!(patched["admin"], json!(false));
}

// =============================================================================
// hooks and wiring
// =============================================================================

#[tokio::test]
async fn test_hook_aborts() {
    for (stage, expected) in [
        (HookStage::BeforeSave, "Error in before_save lifecycle function"),
        (HookStage::AfterSave, "Error in after_save lifecycle function"),
    ] {
        let schema = people().with_hooks(Hooks::default().on(stage, |_| false));
        let service = setup(schema, ServiceConfig::default());
        let err = service
            .create(json!({"id": 1, "name": "Dave"}), &Params::default())
            .await
            .unwrap_err();
        assert_eq!(err, Error::BadRequest(expected.into()));
    }

    let schema = people()
        .with_hooks(Hooks::default().on(HookStage::BeforeDelete, |ctx| ctx.options.get("force").is_some()));
    let service = setup(schema, ServiceConfig::default());
    seed(&service).await;

    let err = service.remove(Some(&json!(1)), &Params::default()).await.unwrap_err();
    assert_eq!(err.message(), "Error in before_delete lifecycle function");
    assert!(service
        .remove(Some(&json!(1)), &Params::query(json!({"$force": true})))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_store_errors_are_classified() {
    let service = setup(people(), ServiceConfig::default());

    let err = service
        .find(&Params::query(json!({"nickname": "x"})))
        .await
        .unwrap_err();
    assert_eq!(err, Error::BadRequest("Undefined column name nickname".into()));
}
