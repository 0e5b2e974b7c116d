//! Remote payloads built from the current document state.
//!
//! Create and update calls always carry the complete entity as it exists in
//! the document at execution time, so fields the operation model never
//! tracked are not clobbered remotely.

use crate::entity::{Content, Lesson, Question, Quiz, Section};
use serde::{Deserialize, Serialize};

/// Section fields sent on create and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionPayload {
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Published flag.
    pub is_published: bool,
    /// Position among sections.
    pub order: u32,
}

impl From<&Section> for SectionPayload {
    fn from(section: &Section) -> Self {
        Self {
            title: section.title.clone(),
            description: section.description.clone(),
            is_published: section.is_published,
            order: section.order,
        }
    }
}

/// Lesson fields sent on create and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonPayload {
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Attached content.
    pub content: Option<Content>,
    /// Estimated duration in minutes.
    pub duration_minutes: u32,
    /// Published flag.
    pub is_published: bool,
    /// Position within the section.
    pub order: u32,
}

impl From<&Lesson> for LessonPayload {
    fn from(lesson: &Lesson) -> Self {
        Self {
            title: lesson.title.clone(),
            description: lesson.description.clone(),
            content: lesson.content.clone(),
            duration_minutes: lesson.duration_minutes,
            is_published: lesson.is_published,
            order: lesson.order,
        }
    }
}

/// Quiz fields sent on create and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizPayload {
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Questions in order.
    pub questions: Vec<Question>,
    /// Passing score percentage.
    pub passing_score: u8,
    /// Maximum attempts.
    pub max_attempts: Option<u32>,
    /// Time limit in minutes.
    pub time_limit_minutes: Option<u32>,
    /// Shuffle questions.
    pub randomize_questions: bool,
    /// Show results after submission.
    pub show_results: bool,
    /// Required to complete the section.
    pub is_required: bool,
}

impl From<&Quiz> for QuizPayload {
    fn from(quiz: &Quiz) -> Self {
        Self {
            title: quiz.title.clone(),
            description: quiz.description.clone(),
            questions: quiz.questions.clone(),
            passing_score: quiz.passing_score,
            max_attempts: quiz.max_attempts,
            time_limit_minutes: quiz.time_limit_minutes,
            randomize_questions: quiz.randomize_questions,
            show_results: quiz.show_results,
            is_required: quiz.is_required,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ContentKind, Lesson};
    use crate::id::Id;

    #[test]
    fn section_payload_excludes_children() {
        let mut section = Section::new(Id::temporary(), "Basics", 2);
        section.lessons.push(Lesson::new(Id::temporary(), "One", 0));
        let payload = SectionPayload::from(&section);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["title"], "Basics");
        assert_eq!(json["order"], 2);
        assert!(json.get("lessons").is_none());
        assert!(json.get("id").is_none());
    }

    #[test]
    fn lesson_payload_carries_content() {
        let mut lesson = Lesson::new(Id::temporary(), "Video", 0);
        lesson.content = Some(Content::new("c1", ContentKind::Video));
        let payload = LessonPayload::from(&lesson);
        assert_eq!(payload.content.map(|c| c.kind), Some(ContentKind::Video));
    }
}
