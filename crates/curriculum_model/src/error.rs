//! Error types for document lookups.

use crate::id::Id;
use thiserror::Error;

/// Result type for document operations.
pub type CurriculumResult<T> = Result<T, CurriculumError>;

/// Errors raised when an edit addresses something the document lacks.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CurriculumError {
    /// Section does not exist.
    #[error("section not found: {0}")]
    SectionNotFound(Id),

    /// Lesson does not exist in the section.
    #[error("lesson {lesson_id} not found in section {section_id}")]
    LessonNotFound {
        /// Section searched.
        section_id: Id,
        /// Lesson looked up.
        lesson_id: Id,
    },

    /// Section has no quiz.
    #[error("section {0} has no quiz")]
    QuizNotFound(Id),

    /// Section already has a quiz.
    #[error("section {0} already has a quiz")]
    QuizExists(Id),

    /// Question does not exist in the quiz.
    #[error("question {question_id} not found in quiz of section {section_id}")]
    QuestionNotFound {
        /// Section owning the quiz.
        section_id: Id,
        /// Question looked up.
        question_id: String,
    },

    /// Lesson has no content to update.
    #[error("lesson {0} has no content")]
    ContentNotFound(Id),

    /// A reorder did not name exactly the existing children.
    #[error("invalid ordering: {message}")]
    InvalidOrder {
        /// What was wrong.
        message: String,
    },

    /// A value could not be encoded into an operation payload.
    #[error("failed to encode {what}: {message}")]
    Encoding {
        /// What was being encoded.
        what: &'static str,
        /// Encoder message.
        message: String,
    },
}

impl CurriculumError {
    /// Creates an invalid ordering error.
    pub fn invalid_order(message: impl Into<String>) -> Self {
        Self::InvalidOrder {
            message: message.into(),
        }
    }

    /// Creates an encoding error for `what`.
    pub fn encoding(what: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Encoding {
            what,
            message: err.to_string(),
        }
    }
}
