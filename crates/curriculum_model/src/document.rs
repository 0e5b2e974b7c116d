//! Interfaces to the externally owned editable document.

use crate::entity::{Lesson, Quiz, Section};
use crate::error::{CurriculumError, CurriculumResult};
use crate::id::Id;
use crate::operation::Fields;
use serde_json::Value;
use std::collections::BTreeSet;

/// Read-only view of the live document.
///
/// Every call reflects the document at the moment it is made; callers must
/// not cache results across awaits.
pub trait DocumentSnapshot {
    /// Returns the section with the given id.
    fn section(&self, id: &Id) -> Option<Section>;

    /// Returns a lesson of a section.
    fn lesson(&self, section_id: &Id, id: &Id) -> Option<Lesson>;

    /// Returns the quiz of a section.
    fn quiz(&self, section_id: &Id) -> Option<Quiz>;
}

/// Mutable access to the document for optimistic local edits.
pub trait CurriculumTree: DocumentSnapshot {
    /// Sections in display order.
    fn sections(&self) -> &[Section];

    /// Sections for mutation.
    fn sections_mut(&mut self) -> &mut Vec<Section>;

    /// Returns true if the document has edits not yet committed.
    fn is_dirty(&self) -> bool;

    /// Sets the dirty flag.
    fn set_dirty(&mut self, dirty: bool);

    /// Finds a section for mutation.
    fn section_mut(&mut self, id: &Id) -> CurriculumResult<&mut Section> {
        self.sections_mut()
            .iter_mut()
            .find(|section| &section.id == id)
            .ok_or_else(|| CurriculumError::SectionNotFound(id.clone()))
    }

    /// Finds a lesson for mutation.
    fn lesson_mut(&mut self, section_id: &Id, id: &Id) -> CurriculumResult<&mut Lesson> {
        self.section_mut(section_id)?
            .lesson_mut(id)
            .ok_or_else(|| CurriculumError::LessonNotFound {
                section_id: section_id.clone(),
                lesson_id: id.clone(),
            })
    }

    /// Finds the quiz of a section for mutation.
    fn quiz_mut(&mut self, section_id: &Id) -> CurriculumResult<&mut Quiz> {
        self.section_mut(section_id)?
            .quiz
            .as_mut()
            .ok_or_else(|| CurriculumError::QuizNotFound(section_id.clone()))
    }
}

/// Flat course metadata form with dirty-field tracking.
pub trait CourseForm {
    /// Fields changed since the last successful save.
    fn dirty_fields(&self) -> Fields;

    /// Clears dirty tracking after a successful save.
    fn reset_dirty(&mut self);
}

/// In-memory curriculum document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Curriculum {
    sections: Vec<Section>,
    dirty: bool,
}

impl Curriculum {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clean document from persisted sections.
    pub fn from_sections(sections: Vec<Section>) -> Self {
        Self {
            sections,
            dirty: false,
        }
    }
}

impl DocumentSnapshot for Curriculum {
    fn section(&self, id: &Id) -> Option<Section> {
        self.sections.iter().find(|s| &s.id == id).cloned()
    }

    fn lesson(&self, section_id: &Id, id: &Id) -> Option<Lesson> {
        self.sections
            .iter()
            .find(|s| &s.id == section_id)
            .and_then(|s| s.lesson(id))
            .cloned()
    }

    fn quiz(&self, section_id: &Id) -> Option<Quiz> {
        self.sections
            .iter()
            .find(|s| &s.id == section_id)
            .and_then(|s| s.quiz.clone())
    }
}

impl CurriculumTree for Curriculum {
    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn sections_mut(&mut self) -> &mut Vec<Section> {
        &mut self.sections
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }
}

/// In-memory course metadata form.
#[derive(Debug, Clone, Default)]
pub struct MetadataForm {
    values: Fields,
    dirty: BTreeSet<String>,
}

impl MetadataForm {
    /// Creates a clean form from saved values.
    pub fn new(values: Fields) -> Self {
        Self {
            values,
            dirty: BTreeSet::new(),
        }
    }

    /// Sets a field and marks it dirty.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        self.values.insert(name.clone(), value.into());
        self.dirty.insert(name);
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Returns true if any field is dirty.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }
}

impl CourseForm for MetadataForm {
    fn dirty_fields(&self) -> Fields {
        self.dirty
            .iter()
            .filter_map(|name| {
                self.values
                    .get(name)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect()
    }

    fn reset_dirty(&mut self) {
        self.dirty.clear();
    }
}
