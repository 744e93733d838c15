//! Integration tests for pipeline-style writes.
//!
//! Each write must issue exactly one driver call whose filter is the merged
//! match stages and whose pipeline is every other stage plus the update.

mod common;

use common::*;
use serde_json::json;

use quarry::pipeline::{FieldDeltas, PipelineError, SortDirection};

#[tokio::test]
async fn test_update_partitions_match_and_other_stages() {
    let driver = RecordingDriver::new();
    driver.set_modified(3);
    let mut q = builder(&driver, "users");
    q.where_eq("status", "pending")
        .sort("created_at", SortDirection::Ascending)
        .where_op("age", ">", 18)
        .unwrap()
        .limit(100)
        .unwrap();

    let result = q
        .update(object(json!({ "status": "active" })))
        .await
        .unwrap();
    assert_eq!(result.modified_count, 3);

    assert_eq!(
        driver.calls(),
        vec![Call::Update {
            collection: "users".into(),
            filter: object(json!({ "status": "pending", "age": { "$gt": 18 } })),
            update: vec![
                json!({ "$sort": { "created_at": 1 } }),
                json!({ "$limit": 100 }),
                json!({ "$set": { "status": "active" } }),
            ],
        }]
    );
}

#[tokio::test]
async fn test_conflicting_match_keys_are_anded() {
    let driver = RecordingDriver::new();
    let mut q = builder(&driver, "users");
    q.where_op("age", ">", 18)
        .unwrap()
        .where_op("age", "<", 65)
        .unwrap();

    q.increment("logins").await.unwrap();

    match &driver.calls()[0] {
        Call::Update { filter, update, .. } => {
            assert_eq!(
                filter,
                &object(json!({ "$and": [
                    { "age": { "$gt": 18 } },
                    { "age": { "$lt": 65 } }
                ] }))
            );
            assert_eq!(
                update,
                &vec![json!({ "$set": {
                    "logins": { "$add": [{ "$ifNull": ["$logins", 0] }, 1] }
                } })]
            );
        }
        other => panic!("unexpected call {:?}", other),
    }
}

#[tokio::test]
async fn test_arithmetic_target_shapes() {
    let driver = RecordingDriver::new();
    let q = builder(&driver, "stats");

    q.decrement(vec!["stock", "reserved"]).await.unwrap();
    q.multiply("price", 1.1).await.unwrap();
    q.divide(
        FieldDeltas::from(object(json!({ "a": 2, "b": 4 }))),
        1.0,
    )
    .await
    .unwrap();

    let updates: Vec<_> = driver
        .calls()
        .into_iter()
        .map(|call| match call {
            Call::Update { update, .. } => update.last().cloned().unwrap(),
            other => panic!("unexpected call {:?}", other),
        })
        .collect();

    assert_eq!(
        updates[0],
        json!({ "$set": {
            "stock": { "$subtract": [{ "$ifNull": ["$stock", 0] }, 1] },
            "reserved": { "$subtract": [{ "$ifNull": ["$reserved", 0] }, 1] }
        } })
    );
    assert_eq!(
        updates[1],
        json!({ "$set": { "price": { "$multiply": [{ "$ifNull": ["$price", 0] }, 1.1] } } })
    );
    assert_eq!(
        updates[2],
        json!({ "$set": {
            "a": { "$divide": [{ "$ifNull": ["$a", 0] }, 2] },
            "b": { "$divide": [{ "$ifNull": ["$b", 0] }, 4] }
        } })
    );
}

#[tokio::test]
async fn test_divide_by_zero_never_reaches_driver() {
    let driver = RecordingDriver::new();
    let mut q = builder(&driver, "accounts");
    q.where_eq("id", 1);

    let err = q.divide("balance", 0.0).await.unwrap_err();
    assert_eq!(
        err,
        PipelineError::DivisionByZero {
            column: "balance".into()
        }
    );

    let err = q
        .divide(FieldDeltas::from(object(json!({ "a": 2, "b": 0 }))), 1.0)
        .await
        .unwrap_err();
    assert_eq!(err, PipelineError::DivisionByZero { column: "b".into() });

    assert_eq!(driver.call_count(), 0);
}

#[tokio::test]
async fn test_unset() {
    let driver = RecordingDriver::new();
    let q = builder(&driver, "users");

    q.unset(&["token", "reset_at"]).await.unwrap();
    match &driver.calls()[0] {
        Call::Update { update, filter, .. } => {
            assert!(filter.is_empty());
            assert_eq!(update, &vec![json!({ "$unset": ["token", "reset_at"] })]);
        }
        other => panic!("unexpected call {:?}", other),
    }

    assert!(matches!(
        q.unset(&[]).await,
        Err(PipelineError::InvalidArgument(_))
    ));
    assert_eq!(driver.call_count(), 1);
}

#[tokio::test]
async fn test_write_failures_returned_unchanged() {
    let driver = RecordingDriver::new();
    driver.fail_writes("write conflict");
    let q = builder(&driver, "users");

    let err = q.increment("visits").await.unwrap_err();
    assert_eq!(err, PipelineError::Driver("write conflict".into()));
    let err = q.delete().await.unwrap_err();
    assert_eq!(err, PipelineError::Driver("write conflict".into()));
    assert_eq!(driver.call_count(), 2);
}

#[tokio::test]
async fn test_delete_uses_only_match_stages() {
    let driver = RecordingDriver::new();
    driver.set_modified(7);
    let mut q = builder(&driver, "sessions");
    q.where_op("expires_at", "<", 1_700_000_000)
        .unwrap()
        .sort("expires_at", SortDirection::Ascending);

    assert_eq!(q.delete().await.unwrap(), 7);
    assert_eq!(
        driver.calls(),
        vec![Call::Delete {
            collection: "sessions".into(),
            filter: object(json!({ "expires_at": { "$lt": 1_700_000_000 } })),
        }]
    );
}

#[tokio::test]
async fn test_empty_update_rejected() {
    let driver = RecordingDriver::new();
    let q = builder(&driver, "users");
    assert!(q.update(serde_json::Map::new()).await.is_err());
    assert_eq!(driver.call_count(), 0);
}
