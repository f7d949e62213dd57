//! End-to-end replication scenarios between a local and a cloud replica.

use catalog_sync_engine::{DrainOutcome, PeerTransport, SyncError};
use catalog_sync_protocol::{ChangeOp, ConflictReason, Origin, Product, PullQuery, SharedSecret};
use catalog_sync_testkit::prelude::*;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn first_push_into_empty_store() {
    let cloud = Replica::new(Origin::Cloud);
    let link = cloud.link();

    let response = link
        .push(&push_request([product_entity(
            "p1",
            "Test Product",
            99.99,
            1,
            Origin::Local,
            t0(),
        )]))
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.applied_count, 1);
    assert!(response.conflicts.is_empty());
    assert_eq!(cloud.get("p1").unwrap().rev, 1);
}

#[tokio::test]
async fn delete_replicates_as_tombstone() {
    let cloud = Replica::new(Origin::Cloud);
    let link = cloud.link();
    link.push(&push_request([product_entity(
        "p1",
        "Test Product",
        99.99,
        1,
        Origin::Local,
        t0(),
    )]))
    .await
    .unwrap();

    let tombstone = product_tombstone("p1", "Test Product", 2, Origin::Local, at(60));
    let response = link.push(&push_request([tombstone])).await.unwrap();
    assert_eq!(response.applied_count, 1);
    assert!(cloud.get("p1").unwrap().is_tombstone());
    assert!(cloud.product("p1").is_none());

    let pulled = link.pull(&PullQuery::new(1)).await.unwrap();
    assert_eq!(pulled.changes.len(), 1);
    assert_eq!(pulled.changes[0].op, ChangeOp::Delete);
    assert_eq!(pulled.changes[0].data.deleted_at, Some(at(60)));
}

#[tokio::test]
async fn stale_update_is_reported_as_conflict() {
    let cloud = Replica::new(Origin::Cloud);
    let link = cloud.link();
    let older = product_entity("p1", "Older Update", 10.0, 1, Origin::Local, at(-5));
    let newer = product_entity("p1", "Newer Update", 10.0, 2, Origin::Local, at(0));

    link.push(&push_request([older.clone()])).await.unwrap();
    link.push(&push_request([newer])).await.unwrap();
    let before = cloud.snapshot();

    let response = link.push(&push_request([older])).await.unwrap();
    assert_eq!(response.applied_count, 0);
    assert_eq!(response.conflicts.len(), 1);
    assert_eq!(response.conflicts[0].reason, ConflictReason::StaleWrite);
    assert_eq!(cloud.snapshot(), before);
    assert_eq!(cloud.product("p1").unwrap().name, "Newer Update");
}

#[tokio::test]
async fn outage_delivers_queued_changes_in_order() {
    let pair = ReplicaPair::new();
    pair.to_cloud.set_reachable(false);

    for (id, name) in [("p1", "Lamp"), ("p2", "Desk"), ("p3", "Chair")] {
        pair.local_agent.record(id, &Product::new(name, 10.0)).unwrap();
        pair.advance(Duration::from_millis(10));
    }
    for _ in 0..3 {
        assert!(pair.local_agent.drain_once().await.unwrap_err().is_retryable());
    }
    assert_eq!(pair.local_agent.outbox().len(), 3);
    assert!(pair.cloud.snapshot().is_empty());

    pair.to_cloud.set_reachable(true);
    let applied = drain_all(&pair.local_agent).await.unwrap();

    assert_eq!(applied, 3);
    assert!(pair.local_agent.outbox().is_empty());
    let revs: Vec<u64> = ["p1", "p2", "p3"]
        .iter()
        .map(|id| pair.cloud.get(id).unwrap().rev)
        .collect();
    assert_eq!(revs, vec![1, 2, 3]);
}

#[tokio::test]
async fn losing_writer_adopts_the_retained_value() {
    let pair = ReplicaPair::new();
    pair.local_agent
        .record("p1", &Product::new("Local Edit", 10.0))
        .unwrap();
    pair.advance(Duration::from_secs(5));
    pair.cloud_agent
        .record("p1", &Product::new("Cloud Edit", 12.0))
        .unwrap();

    let outcome = pair.local_agent.drain_once().await.unwrap();
    let DrainOutcome::Delivered { response, .. } = outcome else {
        panic!("expected a delivered batch");
    };
    assert_eq!(response.conflicts.len(), 1);
    assert_eq!(pair.local.product("p1").unwrap().name, "Cloud Edit");
    assert_eq!(pair.local_agent.stats().conflicts, 1);

    pair.sync().await.unwrap();
    assert!(pair.converged());
}

#[tokio::test]
async fn simultaneous_edits_resolve_to_cloud_on_both_sides() {
    let pair = ReplicaPair::new();
    pair.local_agent
        .record("p1", &Product::new("Local Edit", 10.0))
        .unwrap();
    pair.cloud_agent
        .record("p1", &Product::new("Cloud Edit", 12.0))
        .unwrap();
    assert_eq!(
        pair.local.get("p1").unwrap().updated_at,
        pair.cloud.get("p1").unwrap().updated_at
    );

    pair.sync().await.unwrap();

    assert!(pair.converged());
    assert_eq!(pair.local.product("p1").unwrap().name, "Cloud Edit");
    assert_eq!(pair.cloud.product("p1").unwrap().name, "Cloud Edit");
}

#[tokio::test]
async fn delete_wins_over_older_edit() {
    let pair = ReplicaPair::new();
    pair.cloud_agent
        .record("p1", &Product::new("Lamp", 25.0))
        .unwrap();
    pair.sync().await.unwrap();

    pair.advance(Duration::from_secs(1));
    pair.cloud_agent
        .record("p1", &Product::new("Lamp v2", 27.0))
        .unwrap();
    pair.advance(Duration::from_secs(1));
    pair.local_agent.record_delete("p1").unwrap();

    pair.sync().await.unwrap();
    assert!(pair.converged());
    assert!(pair.cloud.get("p1").unwrap().is_tombstone());
}

#[tokio::test]
async fn pull_pages_advance_the_watermark() {
    let pair = ReplicaPair::new();
    for i in 0..25 {
        pair.cloud_agent
            .record(&format!("p{i:02}"), &Product::new("Item", f64::from(i)))
            .unwrap();
    }

    let summary = pair.local_agent.pull_once().await.unwrap();
    assert_eq!(summary.received, 25);
    assert_eq!(summary.applied, 25);
    assert_eq!(pair.local_agent.peer_watermark(), 25);
    assert_eq!(pair.local.snapshot().len(), 25);

    let again = pair.local_agent.pull_once().await.unwrap();
    assert_eq!(again.received, 0);
}

#[tokio::test]
async fn wrong_secret_is_refused_without_side_effects() {
    let cloud = Replica::new(Origin::Cloud);
    let intruder = LoopbackTransport::new(Arc::clone(&cloud.server), SharedSecret::from("guess"));

    let err = intruder
        .push(&push_request([product_entity(
            "p1",
            "Lamp",
            25.0,
            1,
            Origin::Local,
            t0(),
        )]))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::AuthenticationFailed(_)));
    assert!(!err.is_retryable());
    assert!(cloud.snapshot().is_empty());
}

#[tokio::test]
async fn corrupt_change_is_rejected_and_others_apply() {
    let cloud = Replica::new(Origin::Cloud);
    let mut corrupt = product_entity("p1", "Lamp", 25.0, 1, Origin::Local, t0());
    corrupt
        .fields
        .insert("price".into(), serde_json::json!(0.01));
    let fine = product_entity("p2", "Desk", 90.0, 2, Origin::Local, t0());

    let response = cloud
        .link()
        .push(&push_request([corrupt, fine]))
        .await
        .unwrap();

    assert_eq!(response.applied_count, 1);
    assert_eq!(response.rejected.len(), 1);
    assert_eq!(response.rejected[0].id, "p1");
    assert!(cloud.get("p1").is_none());
    assert!(cloud.get("p2").is_some());
}
