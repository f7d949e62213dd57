//! Replication properties over generated change streams.

use catalog_sync_engine::EntityStore;
use catalog_sync_protocol::{Entity, Origin, PullQuery, SyncRequest};
use catalog_sync_testkit::prelude::*;
use proptest::prelude::*;
use std::time::Duration;

/// Replica data without per-replica revisions.
fn values(replica: &Replica) -> Vec<(String, String, Option<String>, String)> {
    replica
        .snapshot()
        .into_iter()
        .map(|e: Entity| {
            (
                e.id,
                e.checksum,
                e.deleted_at.map(|d| d.to_rfc3339()),
                format!("{}@{}", e.updated_by, e.updated_at.to_rfc3339()),
            )
        })
        .collect()
}

fn push_all(replica: &Replica, entities: &[Entity]) {
    for entity in entities {
        replica
            .server
            .handler()
            .handle_push(push_request([entity.clone()]))
            .unwrap();
    }
}

/// Copies everything from `source` into `target` through paged pulls.
fn pull_into(source: &Replica, target: &Replica, page: u32) -> u64 {
    let mut since = 0;
    loop {
        let response = source
            .server
            .handler()
            .handle_pull(PullQuery::new(since).with_limit(page))
            .unwrap();
        for change in response.changes.iter().cloned() {
            target.engine.apply_change(change).unwrap();
        }
        since = response.next_since_rev(since);
        if !response.has_more {
            return since;
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn delivery_order_does_not_matter(
        (entities, shuffled) in entity_sequence_strategy(4, 16)
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    ) {
        let a = Replica::new(Origin::Cloud);
        let b = Replica::new(Origin::Cloud);
        push_all(&a, &entities);
        push_all(&b, &shuffled);

        prop_assert_eq!(values(&a), values(&b));
    }

    #[test]
    fn redelivery_is_idempotent(entities in entity_sequence_strategy(4, 16)) {
        let replica = Replica::new(Origin::Cloud);
        push_all(&replica, &entities);
        let once = replica.snapshot();
        let rev = replica.store.current_revision().unwrap();

        let response = replica
            .server
            .handler()
            .handle_push(SyncRequest::new("again", 0, product_changes(entities.clone())))
            .unwrap();

        prop_assert_eq!(replica.snapshot(), once);
        prop_assert_eq!(replica.store.current_revision().unwrap(), rev);
        prop_assert_eq!(
            response.applied_count as usize + response.conflicts.len(),
            entities.len()
        );
    }

    #[test]
    fn pull_reproduces_the_source(
        entities in entity_sequence_strategy(6, 24),
        page in 1u32..5,
    ) {
        let source = Replica::new(Origin::Cloud);
        let target = Replica::new(Origin::Local);
        push_all(&source, &entities);

        let watermark = pull_into(&source, &target, page);

        prop_assert_eq!(values(&source), values(&target));
        prop_assert_eq!(watermark, source.store.current_revision().unwrap());
    }

    #[test]
    fn stored_values_never_regress(entities in entity_sequence_strategy(2, 16)) {
        let replica = Replica::new(Origin::Cloud);
        for entity in &entities {
            let before = replica.get(&entity.id);
            push_all(&replica, std::slice::from_ref(entity));
            let after = replica.get(&entity.id).unwrap();
            if let Some(before) = before {
                prop_assert!(after.updated_at >= before.updated_at);
                prop_assert!(after.rev >= before.rev);
            }
        }
    }

    #[test]
    fn replicas_converge_after_concurrent_edits(
        edits in prop::collection::vec(
            (any::<bool>(), entity_id_strategy(3), product_strategy(), any::<bool>(), 0u64..3),
            1..12,
        )
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let pair = ReplicaPair::new();
            for (on_cloud, id, product, delete, pause) in &edits {
                let agent = if *on_cloud { &pair.cloud_agent } else { &pair.local_agent };
                if *delete {
                    agent.record_delete(id).unwrap();
                } else {
                    agent.record(id, product).unwrap();
                }
                pair.advance(Duration::from_millis(*pause));
            }

            pair.sync().await.unwrap();
            prop_assert!(pair.converged());
            prop_assert!(pair.local_agent.outbox().is_empty());
            prop_assert!(pair.cloud_agent.outbox().is_empty());
            Ok(())
        })?;
    }
}
