//! Property-based test generators using proptest.
//!
//! Operations are drawn from a small pool of entities so that generated
//! sequences hit the same entity often enough to exercise coalescing.

use curriculum_model::{Fields, Id, Operation, TempId};
use proptest::prelude::*;
use serde_json::Value;

/// Number of temporary section ids in the pool.
pub const TEMP_POOL: u128 = 3;

/// Persisted section ids in the pool.
pub const PERSISTED_POOL: [&str; 3] = ["s1", "s2", "s3"];

/// Strategy for payload field names.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["title", "description", "is_published", "summary"])
        .prop_map(str::to_string)
}

/// Strategy for small partial payloads.
pub fn fields_strategy() -> impl Strategy<Value = Fields> {
    prop::collection::btree_map(field_name_strategy(), any::<i64>(), 0..4).prop_map(|map| {
        map.into_iter()
            .map(|(name, value)| (name, Value::from(value)))
            .collect()
    })
}

/// Strategy for temporary ids from the pool.
pub fn temp_id_strategy() -> impl Strategy<Value = TempId> {
    (1..=TEMP_POOL).prop_map(TempId::from_u128)
}

/// Strategy for section ids, temporary or persisted.
pub fn section_id_strategy() -> impl Strategy<Value = Id> {
    prop_oneof![
        temp_id_strategy().prop_map(Id::Temporary),
        prop::sample::select(PERSISTED_POOL.to_vec()).prop_map(|id| Id::persisted(id)),
    ]
}

/// Strategy for section operations.
pub fn section_operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        2 => (temp_id_strategy(), 0u32..5, fields_strategy()).prop_map(
            |(temp_id, order, payload)| Operation::SectionCreate {
                temp_id,
                order,
                payload,
            }
        ),
        4 => (section_id_strategy(), fields_strategy())
            .prop_map(|(id, payload)| Operation::SectionUpdate { id, payload }),
        1 => section_id_strategy().prop_map(|id| Operation::SectionDelete { id }),
        1 => (section_id_strategy(), 0u32..5)
            .prop_map(|(id, order)| Operation::SectionReorder { id, order }),
    ]
}

/// Strategy for flat course metadata updates.
pub fn course_operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        fields_strategy().prop_map(|payload| Operation::BasicUpdate { payload }),
        fields_strategy().prop_map(|payload| Operation::AdvancedUpdate { payload }),
    ]
}

/// Strategy for any pooled operation.
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        5 => section_operation_strategy(),
        1 => course_operation_strategy(),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec(operation_strategy(), min_ops..max_ops)
}

/// Strategy for a run of updates against one persisted section.
pub fn update_run_strategy(max_updates: usize) -> impl Strategy<Value = Vec<Fields>> {
    prop::collection::vec(fields_strategy(), 1..max_updates.max(2))
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
