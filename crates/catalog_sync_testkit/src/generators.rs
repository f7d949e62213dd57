//! Property-based test generators using proptest.
//!
//! Entities are drawn from a small ID pool and a narrow time range so that
//! generated sequences collide on IDs and timestamps often enough to
//! exercise every branch of conflict resolution.

use crate::fixtures::{at, entity_of};
use catalog_sync_protocol::{Change, Entity, Origin, Product};
use proptest::prelude::*;

/// Strategy for entity IDs from a pool of `pool` names.
pub fn entity_id_strategy(pool: usize) -> impl Strategy<Value = String> {
    (0..pool.max(1)).prop_map(|i| format!("p{i}"))
}

/// Strategy for replica origins.
pub fn origin_strategy() -> impl Strategy<Value = Origin> {
    prop_oneof![Just(Origin::Local), Just(Origin::Cloud)]
}

/// Strategy for products with a handful of names and prices.
pub fn product_strategy() -> impl Strategy<Value = Product> {
    (
        prop::sample::select(vec!["Lamp", "Desk", "Chair", "Shelf"]),
        0u32..5,
        any::<bool>(),
        prop::option::of(prop::sample::select(vec!["oak", "steel"])),
    )
        .prop_map(|(name, price, enabled, description)| {
            let mut product = Product::new(name, f64::from(price) * 10.0 + 0.5);
            product.enabled = enabled;
            product.description = description.map(str::to_string);
            product
        })
}

/// Strategy for entity values, tombstones included.
pub fn entity_strategy(pool: usize) -> impl Strategy<Value = Entity> {
    (
        entity_id_strategy(pool),
        product_strategy(),
        1u64..20,
        origin_strategy(),
        0i64..8,
        prop::bool::weighted(0.2),
    )
        .prop_map(|(id, product, rev, origin, t, deleted)| {
            let entity = entity_of(&id, &product, rev, origin, at(t));
            if deleted {
                entity.into_tombstone(at(t))
            } else {
                entity
            }
        })
}

/// Strategy for product changes.
pub fn change_strategy(pool: usize) -> impl Strategy<Value = Change> {
    entity_strategy(pool).prop_map(|e| Change::new("product", e))
}

/// Strategy for a sequence of entity values.
pub fn entity_sequence_strategy(pool: usize, max_len: usize) -> impl Strategy<Value = Vec<Entity>> {
    prop::collection::vec(entity_strategy(pool), 1..max_len.max(2))
}
