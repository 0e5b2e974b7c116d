//! Structural mutation operations.

use crate::id::{EntityKey, EntityKind, Id, TempId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Partial field payload: a flat JSON object of changed fields.
pub type Fields = Map<String, Value>;

/// Merges `later` into `earlier` with right-biased shallow overwrite.
pub fn merge_fields(earlier: &mut Fields, later: Fields) {
    for (name, value) in later {
        earlier.insert(name, value);
    }
}

/// The action an operation performs on its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Entity is created remotely.
    Create,
    /// Entity fields are updated.
    Update,
    /// Entity is deleted.
    Delete,
    /// Entity moves to a new position.
    Reorder,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Reorder => "reorder",
        })
    }
}

/// A single structural change to the curriculum.
///
/// One variant per (entity kind, action) pair. Create variants carry the
/// entity's temporary id; every other variant carries an [`Id`] that may
/// still be temporary. Lesson and quiz variants carry the id of the owning
/// section as the document knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// Create a section.
    SectionCreate {
        /// Temporary id of the new section.
        temp_id: TempId,
        /// Position hint.
        order: u32,
        /// Fields set so far.
        payload: Fields,
    },
    /// Update section fields.
    SectionUpdate {
        /// Section id.
        id: Id,
        /// Changed fields.
        payload: Fields,
    },
    /// Delete a section.
    SectionDelete {
        /// Section id.
        id: Id,
    },
    /// Move a section.
    SectionReorder {
        /// Section id.
        id: Id,
        /// New position.
        order: u32,
    },
    /// Create a lesson.
    LessonCreate {
        /// Owning section.
        section_id: Id,
        /// Temporary id of the new lesson.
        temp_id: TempId,
        /// Position hint.
        order: u32,
        /// Fields set so far.
        payload: Fields,
    },
    /// Update lesson fields.
    LessonUpdate {
        /// Owning section.
        section_id: Id,
        /// Lesson id.
        id: Id,
        /// Changed fields.
        payload: Fields,
    },
    /// Delete a lesson.
    LessonDelete {
        /// Owning section.
        section_id: Id,
        /// Lesson id.
        id: Id,
    },
    /// Move a lesson within its section.
    LessonReorder {
        /// Owning section.
        section_id: Id,
        /// Lesson id.
        id: Id,
        /// New position.
        order: u32,
    },
    /// Create the quiz of a section.
    QuizCreate {
        /// Owning section.
        section_id: Id,
        /// Temporary id of the new quiz.
        temp_id: TempId,
        /// Fields set so far.
        payload: Fields,
    },
    /// Update quiz fields.
    QuizUpdate {
        /// Owning section.
        section_id: Id,
        /// Quiz id.
        id: Id,
        /// Changed fields.
        payload: Fields,
    },
    /// Delete a quiz.
    QuizDelete {
        /// Owning section.
        section_id: Id,
        /// Quiz id.
        id: Id,
    },
    /// Update basic course metadata (title, price, ...).
    BasicUpdate {
        /// Changed fields.
        payload: Fields,
    },
    /// Update advanced course metadata (requirements, audience, ...).
    AdvancedUpdate {
        /// Changed fields.
        payload: Fields,
    },
}

impl Operation {
    /// Returns the kind of entity this operation addresses.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Operation::SectionCreate { .. }
            | Operation::SectionUpdate { .. }
            | Operation::SectionDelete { .. }
            | Operation::SectionReorder { .. } => EntityKind::Section,
            Operation::LessonCreate { .. }
            | Operation::LessonUpdate { .. }
            | Operation::LessonDelete { .. }
            | Operation::LessonReorder { .. } => EntityKind::Lesson,
            Operation::QuizCreate { .. }
            | Operation::QuizUpdate { .. }
            | Operation::QuizDelete { .. } => EntityKind::Quiz,
            Operation::BasicUpdate { .. } | Operation::AdvancedUpdate { .. } => EntityKind::Course,
        }
    }

    /// Returns the action this operation performs.
    #[must_use]
    pub fn action(&self) -> Action {
        match self {
            Operation::SectionCreate { .. }
            | Operation::LessonCreate { .. }
            | Operation::QuizCreate { .. } => Action::Create,
            Operation::SectionUpdate { .. }
            | Operation::LessonUpdate { .. }
            | Operation::QuizUpdate { .. }
            | Operation::BasicUpdate { .. }
            | Operation::AdvancedUpdate { .. } => Action::Update,
            Operation::SectionDelete { .. }
            | Operation::LessonDelete { .. }
            | Operation::QuizDelete { .. } => Action::Delete,
            Operation::SectionReorder { .. } | Operation::LessonReorder { .. } => Action::Reorder,
        }
    }

    /// Returns the id of the addressed entity.
    ///
    /// Course metadata operations address a fixed pseudo-entity per scope.
    #[must_use]
    pub fn id(&self) -> Id {
        match self {
            Operation::SectionCreate { temp_id, .. }
            | Operation::LessonCreate { temp_id, .. }
            | Operation::QuizCreate { temp_id, .. } => Id::Temporary(*temp_id),
            Operation::SectionUpdate { id, .. }
            | Operation::SectionDelete { id }
            | Operation::SectionReorder { id, .. }
            | Operation::LessonUpdate { id, .. }
            | Operation::LessonDelete { id, .. }
            | Operation::LessonReorder { id, .. }
            | Operation::QuizUpdate { id, .. }
            | Operation::QuizDelete { id, .. } => id.clone(),
            Operation::BasicUpdate { .. } => Id::persisted("basic"),
            Operation::AdvancedUpdate { .. } => Id::persisted("advanced"),
        }
    }

    /// Returns the grouping key used for coalescing.
    #[must_use]
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind(), self.id())
    }

    /// Returns the owning section for lesson and quiz operations.
    #[must_use]
    pub fn section_id(&self) -> Option<&Id> {
        match self {
            Operation::LessonCreate { section_id, .. }
            | Operation::LessonUpdate { section_id, .. }
            | Operation::LessonDelete { section_id, .. }
            | Operation::LessonReorder { section_id, .. }
            | Operation::QuizCreate { section_id, .. }
            | Operation::QuizUpdate { section_id, .. }
            | Operation::QuizDelete { section_id, .. } => Some(section_id),
            _ => None,
        }
    }

    /// Returns the temporary id of a create operation.
    #[must_use]
    pub fn temp_id(&self) -> Option<TempId> {
        match self {
            Operation::SectionCreate { temp_id, .. }
            | Operation::LessonCreate { temp_id, .. }
            | Operation::QuizCreate { temp_id, .. } => Some(*temp_id),
            _ => None,
        }
    }

    /// Returns the partial payload, if this variant carries one.
    #[must_use]
    pub fn payload(&self) -> Option<&Fields> {
        match self {
            Operation::SectionCreate { payload, .. }
            | Operation::SectionUpdate { payload, .. }
            | Operation::LessonCreate { payload, .. }
            | Operation::LessonUpdate { payload, .. }
            | Operation::QuizCreate { payload, .. }
            | Operation::QuizUpdate { payload, .. }
            | Operation::BasicUpdate { payload }
            | Operation::AdvancedUpdate { payload } => Some(payload),
            _ => None,
        }
    }

    /// Returns the partial payload for mutation.
    pub fn payload_mut(&mut self) -> Option<&mut Fields> {
        match self {
            Operation::SectionCreate { payload, .. }
            | Operation::SectionUpdate { payload, .. }
            | Operation::LessonCreate { payload, .. }
            | Operation::LessonUpdate { payload, .. }
            | Operation::QuizCreate { payload, .. }
            | Operation::QuizUpdate { payload, .. }
            | Operation::BasicUpdate { payload }
            | Operation::AdvancedUpdate { payload } => Some(payload),
            _ => None,
        }
    }

    /// Returns the order carried by create and reorder operations.
    #[must_use]
    pub fn order(&self) -> Option<u32> {
        match self {
            Operation::SectionCreate { order, .. }
            | Operation::SectionReorder { order, .. }
            | Operation::LessonCreate { order, .. }
            | Operation::LessonReorder { order, .. } => Some(*order),
            _ => None,
        }
    }

    /// Sets the order of a create or reorder operation. Returns false if
    /// the variant carries no order.
    pub fn set_order(&mut self, new_order: u32) -> bool {
        match self {
            Operation::SectionCreate { order, .. }
            | Operation::SectionReorder { order, .. }
            | Operation::LessonCreate { order, .. }
            | Operation::LessonReorder { order, .. } => {
                *order = new_order;
                true
            }
            _ => false,
        }
    }

    /// Returns true if this is a create for the given temporary id.
    #[must_use]
    pub fn creates(&self, temp: TempId) -> bool {
        self.temp_id() == Some(temp)
    }

    /// Returns true if this operation belongs to the given section, either
    /// as the section itself or as one of its children.
    #[must_use]
    pub fn touches_section(&self, section: &Id) -> bool {
        match self.kind() {
            EntityKind::Section => &self.id() == section,
            EntityKind::Lesson | EntityKind::Quiz => self.section_id() == Some(section),
            EntityKind::Course => false,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action(), self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    #[test]
    fn kind_and_action() {
        let op = Operation::LessonReorder {
            section_id: Id::persisted("s1"),
            id: Id::persisted("l1"),
            order: 3,
        };
        assert_eq!(op.kind(), EntityKind::Lesson);
        assert_eq!(op.action(), Action::Reorder);
        assert_eq!(op.order(), Some(3));
        assert_eq!(op.to_string(), "reorder lesson:l1");
    }

    #[test]
    fn create_is_keyed_by_temp_id() {
        let temp = TempId::from_u128(7);
        let op = Operation::SectionCreate {
            temp_id: temp,
            order: 0,
            payload: Fields::new(),
        };
        assert_eq!(op.id(), Id::Temporary(temp));
        assert!(op.creates(temp));
        assert!(op.section_id().is_none());
    }

    #[test]
    fn merge_fields_is_right_biased() {
        let mut merged = fields(json!({"a": 1}));
        merge_fields(&mut merged, fields(json!({"a": 2, "b": 3})));
        assert_eq!(Value::Object(merged), json!({"a": 2, "b": 3}));
    }

    #[test]
    fn touches_section() {
        let section = Id::persisted("s1");
        let lesson = Operation::LessonDelete {
            section_id: section.clone(),
            id: Id::persisted("l1"),
        };
        let own = Operation::SectionDelete { id: section.clone() };
        let other = Operation::SectionDelete {
            id: Id::persisted("s2"),
        };
        assert!(lesson.touches_section(&section));
        assert!(own.touches_section(&section));
        assert!(!other.touches_section(&section));
    }

    #[test]
    fn serde_tag() {
        let op = Operation::SectionDelete {
            id: Id::persisted("s9"),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "SECTION_DELETE");
    }
}
