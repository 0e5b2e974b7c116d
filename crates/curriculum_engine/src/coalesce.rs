//! Operation coalescing.
//!
//! Queued operations are grouped by entity and each group is folded into
//! the minimal equivalent set with a single rule table keyed by
//! `(kind, earlier action, later action)`.
//!
//! ## Key Invariants
//!
//! - CREATE absorbs later UPDATEs (merged payload) and REORDERs (order hint)
//! - CREATE then DELETE cancels the whole group; nothing is ever sent
//! - UPDATEs merge by shallow right-biased field overwrite
//! - DELETE dominates any queued UPDATE or REORDER
//! - A group reduces to at most one primary operation plus one reorder

use curriculum_model::{merge_fields, Action, EntityKey, EntityKind, Operation};
use std::collections::HashMap;
use tracing::debug;

/// How a later operation combines with an earlier one for the same entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// The later operation is dropped.
    Keep,
    /// The later operation replaces the earlier one.
    Replace,
    /// The later payload is merged into the earlier operation.
    MergePayload,
    /// The later order is copied into the earlier operation.
    TakeOrder,
    /// Both operations vanish, together with anything else in the group.
    Cancel,
    /// The later operation replaces everything queued for the entity.
    Supersede,
    /// Both operations are kept.
    Append,
}

/// The coalescing table.
pub fn coalesce_rule(kind: EntityKind, earlier: Action, later: Action) -> Rule {
    use Action::*;

    if kind == EntityKind::Course {
        return match (earlier, later) {
            (Update, Update) => Rule::MergePayload,
            _ => Rule::Keep,
        };
    }

    match (earlier, later) {
        (Create, Create) => Rule::MergePayload,
        (Create, Update) => Rule::MergePayload,
        (Create, Delete) => Rule::Cancel,
        (Create, Reorder) => Rule::TakeOrder,

        (Update, Create) => Rule::Keep,
        (Update, Update) => Rule::MergePayload,
        (Update, Delete) => Rule::Supersede,
        (Update, Reorder) => Rule::Append,

        (Delete, _) => Rule::Keep,

        (Reorder, Create) => Rule::Keep,
        (Reorder, Update) => Rule::Append,
        (Reorder, Delete) => Rule::Supersede,
        (Reorder, Reorder) => Rule::Replace,
    }
}

/// Net operations for one entity.
#[derive(Debug, Default)]
struct NetGroup {
    primary: Option<Operation>,
    reorder: Option<Operation>,
    cancelled: bool,
}

impl NetGroup {
    /// The action a later operation is compared against.
    fn earlier(&self, later: Action) -> Option<Action> {
        match (&self.primary, &self.reorder) {
            (Some(primary), Some(_)) if primary.action() == Action::Update => {
                if later == Action::Reorder {
                    Some(Action::Reorder)
                } else {
                    Some(Action::Update)
                }
            }
            (Some(primary), _) => Some(primary.action()),
            (None, Some(_)) => Some(Action::Reorder),
            (None, None) => None,
        }
    }

    fn absorb(&mut self, op: Operation) {
        if self.cancelled {
            debug!(op = %op, "dropping operation for locally cancelled entity");
            return;
        }

        let Some(earlier) = self.earlier(op.action()) else {
            self.place(op);
            return;
        };

        match coalesce_rule(op.kind(), earlier, op.action()) {
            Rule::Keep => {
                debug!(op = %op, earlier = %earlier, "operation absorbed");
            }
            Rule::Replace | Rule::Append => self.place(op),
            Rule::MergePayload => {
                let mut later = op;
                match self.primary.as_mut() {
                    Some(primary) => {
                        if let (Some(into), Some(from)) =
                            (primary.payload_mut(), later.payload_mut())
                        {
                            merge_fields(into, std::mem::take(from));
                        }
                    }
                    None => self.place(later),
                }
            }
            Rule::TakeOrder => {
                if let (Some(primary), Some(order)) = (self.primary.as_mut(), op.order()) {
                    primary.set_order(order);
                }
            }
            Rule::Cancel => {
                self.primary = None;
                self.reorder = None;
                self.cancelled = true;
            }
            Rule::Supersede => {
                self.reorder = None;
                self.primary = Some(op);
            }
        }
    }

    fn place(&mut self, op: Operation) {
        if op.action() == Action::Reorder {
            self.reorder = Some(op);
        } else {
            self.primary = Some(op);
        }
    }

    fn into_ops(self) -> impl Iterator<Item = Operation> {
        self.primary.into_iter().chain(self.reorder)
    }
}

/// Coalesces a sequence of operations into the net set to execute.
///
/// Groups keep the order in which their entity was first touched, so
/// section creates stay in enqueue order.
pub fn normalize<I>(ops: I) -> Vec<Operation>
where
    I: IntoIterator<Item = Operation>,
{
    let mut order: Vec<EntityKey> = Vec::new();
    let mut groups: HashMap<EntityKey, NetGroup> = HashMap::new();

    for op in ops {
        let key = op.key();
        let group = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            NetGroup::default()
        });
        group.absorb(op);
    }

    let mut net = Vec::new();
    for key in order {
        let Some(group) = groups.remove(&key) else {
            continue;
        };
        if group.cancelled {
            debug!(entity = %key, "created and deleted locally; nothing to send");
            continue;
        }
        net.extend(group.into_ops());
    }
    net
}

#[cfg(test)]
mod tests {
    use super::*;
    use curriculum_model::{Fields, Id, TempId};
    use serde_json::{json, Value};

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    fn section_create(temp: TempId, payload: Value) -> Operation {
        Operation::SectionCreate {
            temp_id: temp,
            order: 0,
            payload: fields(payload),
        }
    }

    fn section_update(id: Id, payload: Value) -> Operation {
        Operation::SectionUpdate {
            id,
            payload: fields(payload),
        }
    }

    #[test]
    fn table_is_exhaustive_for_entities() {
        let actions = [Action::Create, Action::Update, Action::Delete, Action::Reorder];
        for kind in [EntityKind::Section, EntityKind::Lesson, EntityKind::Quiz] {
            for earlier in actions {
                for later in actions {
                    // Every pair has a rule; the call must not panic.
                    let _ = coalesce_rule(kind, earlier, later);
                }
            }
        }
        assert_eq!(
            coalesce_rule(EntityKind::Lesson, Action::Create, Action::Delete),
            Rule::Cancel
        );
        assert_eq!(
            coalesce_rule(EntityKind::Quiz, Action::Update, Action::Delete),
            Rule::Supersede
        );
    }

    #[test]
    fn create_absorbs_updates() {
        let temp = TempId::new();
        let id = Id::Temporary(temp);
        let net = normalize(vec![
            section_create(temp, json!({"title": "Draft"})),
            section_update(id.clone(), json!({"title": "One"})),
            section_update(id.clone(), json!({"description": "About"})),
            section_update(id, json!({"title": "Final"})),
        ]);

        assert_eq!(net.len(), 1);
        assert_eq!(net[0].action(), Action::Create);
        assert_eq!(
            Value::Object(net[0].payload().cloned().unwrap()),
            json!({"title": "Final", "description": "About"})
        );
    }

    #[test]
    fn create_then_delete_cancels() {
        let temp = TempId::new();
        let id = Id::Temporary(temp);
        let net = normalize(vec![
            section_create(temp, json!({})),
            section_update(id.clone(), json!({"title": "x"})),
            Operation::SectionDelete { id: id.clone() },
            section_update(id, json!({"title": "late"})),
        ]);
        assert!(net.is_empty());
    }

    #[test]
    fn updates_merge_right_biased() {
        let id = Id::persisted("s1");
        let net = normalize(vec![
            section_update(id.clone(), json!({"a": 1})),
            section_update(id, json!({"a": 2, "b": 3})),
        ]);
        assert_eq!(net.len(), 1);
        assert_eq!(
            Value::Object(net[0].payload().cloned().unwrap()),
            json!({"a": 2, "b": 3})
        );
    }

    #[test]
    fn delete_dominates_update_and_reorder() {
        let id = Id::persisted("s1");
        let net = normalize(vec![
            section_update(id.clone(), json!({"title": "x"})),
            Operation::SectionReorder {
                id: id.clone(),
                order: 4,
            },
            Operation::SectionDelete { id: id.clone() },
            section_update(id.clone(), json!({"title": "ignored"})),
        ]);
        assert_eq!(net, vec![Operation::SectionDelete { id }]);
    }

    #[test]
    fn update_and_reorder_are_both_kept() {
        let id = Id::persisted("s1");
        let net = normalize(vec![
            Operation::SectionReorder {
                id: id.clone(),
                order: 1,
            },
            section_update(id.clone(), json!({"title": "x"})),
            Operation::SectionReorder {
                id: id.clone(),
                order: 3,
            },
        ]);
        assert_eq!(net.len(), 2);
        assert_eq!(net[0].action(), Action::Update);
        assert_eq!(net[1].order(), Some(3));
    }

    #[test]
    fn create_takes_reorder_hint() {
        let temp = TempId::new();
        let net = normalize(vec![
            section_create(temp, json!({})),
            Operation::SectionReorder {
                id: Id::Temporary(temp),
                order: 5,
            },
        ]);
        assert_eq!(net.len(), 1);
        assert_eq!(net[0].order(), Some(5));
    }

    #[test]
    fn groups_keep_first_touch_order() {
        let a = TempId::from_u128(1);
        let b = TempId::from_u128(2);
        let net = normalize(vec![
            section_create(a, json!({})),
            section_create(b, json!({})),
            section_update(Id::Temporary(a), json!({"title": "A"})),
        ]);
        assert_eq!(net[0].temp_id(), Some(a));
        assert_eq!(net[1].temp_id(), Some(b));
    }

    #[test]
    fn course_updates_merge_per_scope() {
        let net = normalize(vec![
            Operation::BasicUpdate {
                payload: fields(json!({"title": "Course"})),
            },
            Operation::AdvancedUpdate {
                payload: fields(json!({"level": "beginner"})),
            },
            Operation::BasicUpdate {
                payload: fields(json!({"price": 10})),
            },
        ]);
        assert_eq!(net.len(), 2);
        assert_eq!(
            Value::Object(net[0].payload().cloned().unwrap()),
            json!({"title": "Course", "price": 10})
        );
    }
}
