//! Test fixtures and controller helpers.
//!
//! Provides persisted curricula and a controller wired to the in-memory
//! persistence service.

use curriculum_engine::{CurriculumController, EngineConfig, MemoryPersistence};
use curriculum_model::{
    Curriculum, CurriculumTree, DocumentSnapshot, Fields, Id, Lesson, Question, QuestionKind,
    Quiz, Section,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

/// Course id used by every fixture.
pub const COURSE_ID: &str = "course-1";

/// Controller over an in-memory document and service.
pub type MemoryController = CurriculumController<Curriculum, MemoryPersistence>;

/// Builds a payload from a JSON object literal. Non-objects yield an empty
/// payload.
pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

/// A persisted, empty section.
pub fn persisted_section(id: &str, title: &str, order: u32) -> Section {
    let mut section = Section::new(Id::persisted(id), title, order);
    section.is_published = true;
    section
}

/// A persisted lesson.
pub fn persisted_lesson(id: &str, title: &str, order: u32) -> Lesson {
    let mut lesson = Lesson::new(Id::persisted(id), title, order);
    lesson.duration_minutes = 10;
    lesson
}

/// A persisted quiz with two questions, `q-a` and `q-b`.
pub fn persisted_quiz(id: &str, title: &str) -> Quiz {
    let mut quiz = Quiz::new(Id::persisted(id), title);

    let mut first = Question::new("q-a", "Which keyword declares an immutable binding?");
    first.options = vec!["let".into(), "mut".into(), "var".into()];
    first.correct_answers = vec![0];

    let mut second = Question::new("q-b", "Ownership can be borrowed mutably many times.");
    second.kind = QuestionKind::TrueFalse;
    second.options = vec!["true".into(), "false".into()];
    second.correct_answers = vec![1];

    quiz.questions = vec![first, second];
    quiz
}

/// A small persisted curriculum:
///
/// - `s1` "Getting Started" with lessons `l1`, `l2` and quiz `q1`
/// - `s2` "Going Further" with lesson `l3`
pub fn sample_sections() -> Vec<Section> {
    let mut first = persisted_section("s1", "Getting Started", 0);
    first.lessons = vec![
        persisted_lesson("l1", "Installing the toolchain", 0),
        persisted_lesson("l2", "Hello, world", 1),
    ];
    first.quiz = Some(persisted_quiz("q1", "Checkpoint"));

    let mut second = persisted_section("s2", "Going Further", 1);
    second.lessons = vec![persisted_lesson("l3", "Ownership", 0)];

    vec![first, second]
}

/// A controller with its document, for tests.
pub struct TestHarness {
    /// The controller under test.
    pub controller: MemoryController,
    /// The document the controller edits.
    pub tree: Arc<RwLock<Curriculum>>,
}

impl TestHarness {
    /// A harness over an empty document.
    pub fn empty() -> Self {
        Self::with_sections(Vec::new())
    }

    /// A harness over [`sample_sections`].
    pub fn sample() -> Self {
        Self::with_sections(sample_sections())
    }

    /// A harness over the given sections with the default configuration.
    pub fn with_sections(sections: Vec<Section>) -> Self {
        Self::with_config(sections, EngineConfig::new(COURSE_ID))
    }

    /// A harness over the given sections and configuration.
    pub fn with_config(sections: Vec<Section>, config: EngineConfig) -> Self {
        let tree = Arc::new(RwLock::new(Curriculum::from_sections(sections)));
        let controller =
            CurriculumController::new(config, Arc::clone(&tree), MemoryPersistence::new());
        Self { controller, tree }
    }

    /// The in-memory service behind the controller.
    pub fn service(&self) -> &MemoryPersistence {
        self.controller.service()
    }

    /// A copy of the current document.
    pub fn document(&self) -> Curriculum {
        self.tree.read().clone()
    }

    /// Returns a section from the current document.
    pub fn section(&self, id: &Id) -> Option<Section> {
        self.tree.read().section(id)
    }

    /// Returns true if the document's dirty flag is set.
    pub fn is_dirty(&self) -> bool {
        self.tree.read().is_dirty()
    }
}

impl std::ops::Deref for TestHarness {
    type Target = MemoryController;

    fn deref(&self) -> &Self::Target {
        &self.controller
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sample_is_clean() {
        let harness = TestHarness::sample();
        assert!(!harness.is_dirty());
        assert_eq!(harness.document().sections().len(), 2);
        assert_eq!(harness.pending_operations_count(), 0);
        assert!(harness
            .section(&Id::persisted("s1"))
            .and_then(|s| s.quiz)
            .is_some());
    }

    #[test]
    fn fields_from_object() {
        let payload = fields(json!({"title": "x"}));
        assert_eq!(payload.len(), 1);
        assert!(fields(json!(3)).is_empty());
    }
}
