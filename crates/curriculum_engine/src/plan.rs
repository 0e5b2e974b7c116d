//! Dependency-ordered execution phases.

use curriculum_model::{Action, EntityKind, Operation};
use std::fmt;

/// Which ordered group a phase belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PhaseKind {
    /// Remote deletes.
    Delete,
    /// Remote creates.
    Create,
    /// Remote updates.
    Update,
    /// Reorders.
    Reorder,
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PhaseKind::Delete => "delete",
            PhaseKind::Create => "create",
            PhaseKind::Update => "update",
            PhaseKind::Reorder => "reorder",
        })
    }
}

/// How the operations of a phase are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// One at a time, each awaited before the next.
    Sequential,
    /// All at once, bounded by the configured concurrency limit.
    Concurrent,
}

/// A group of operations executed together.
#[derive(Debug, Clone, PartialEq)]
pub struct Phase {
    /// Phase kind.
    pub kind: PhaseKind,
    /// Dispatch mode.
    pub dispatch: Dispatch,
    /// Operations in enqueue order.
    pub ops: Vec<Operation>,
}

/// Splits normalized operations into ordered phases.
///
/// Deletes run first, then section creates one at a time, then lesson and
/// quiz creates concurrently (their sections are resolved by then), then
/// updates, then reorders. Empty phases are omitted.
pub fn plan_phases(ops: Vec<Operation>) -> Vec<Phase> {
    let mut deletes = Vec::new();
    let mut section_creates = Vec::new();
    let mut child_creates = Vec::new();
    let mut updates = Vec::new();
    let mut reorders = Vec::new();

    for op in ops {
        match (op.action(), op.kind()) {
            (Action::Delete, _) => deletes.push(op),
            (Action::Create, EntityKind::Section) => section_creates.push(op),
            (Action::Create, _) => child_creates.push(op),
            (Action::Update, _) => updates.push(op),
            (Action::Reorder, _) => reorders.push(op),
        }
    }

    [
        (PhaseKind::Delete, Dispatch::Concurrent, deletes),
        (PhaseKind::Create, Dispatch::Sequential, section_creates),
        (PhaseKind::Create, Dispatch::Concurrent, child_creates),
        (PhaseKind::Update, Dispatch::Concurrent, updates),
        (PhaseKind::Reorder, Dispatch::Concurrent, reorders),
    ]
    .into_iter()
    .filter(|(_, _, ops)| !ops.is_empty())
    .map(|(kind, dispatch, ops)| Phase {
        kind,
        dispatch,
        ops,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use curriculum_model::{Fields, Id, TempId};

    #[test]
    fn phases_are_ordered_and_sparse() {
        let section = TempId::from_u128(1);
        let ops = vec![
            Operation::SectionReorder {
                id: Id::persisted("s2"),
                order: 0,
            },
            Operation::LessonCreate {
                section_id: Id::Temporary(section),
                temp_id: TempId::from_u128(2),
                order: 0,
                payload: Fields::new(),
            },
            Operation::SectionCreate {
                temp_id: section,
                order: 1,
                payload: Fields::new(),
            },
            Operation::QuizDelete {
                section_id: Id::persisted("s2"),
                id: Id::persisted("q1"),
            },
        ];

        let phases = plan_phases(ops);
        let shape: Vec<(PhaseKind, Dispatch)> =
            phases.iter().map(|p| (p.kind, p.dispatch)).collect();
        assert_eq!(
            shape,
            vec![
                (PhaseKind::Delete, Dispatch::Concurrent),
                (PhaseKind::Create, Dispatch::Sequential),
                (PhaseKind::Create, Dispatch::Concurrent),
                (PhaseKind::Reorder, Dispatch::Concurrent),
            ]
        );
    }

    #[test]
    fn section_creates_keep_enqueue_order() {
        let ops: Vec<Operation> = (1..=3)
            .map(|n| Operation::SectionCreate {
                temp_id: TempId::from_u128(n),
                order: n as u32,
                payload: Fields::new(),
            })
            .collect();
        let phases = plan_phases(ops.clone());
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].ops, ops);
    }

    #[test]
    fn course_updates_land_in_update_phase() {
        let phases = plan_phases(vec![Operation::BasicUpdate {
            payload: Fields::new(),
        }]);
        assert_eq!(phases[0].kind, PhaseKind::Update);
    }

    #[test]
    fn empty_plan() {
        assert!(plan_phases(Vec::new()).is_empty());
    }
}
