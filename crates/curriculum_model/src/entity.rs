//! Curriculum entities as held by the editable document.
//!
//! The engine never owns these values. It reads them through a
//! [`DocumentSnapshot`](crate::DocumentSnapshot) when building remote
//! payloads, and edits them through a [`CurriculumTree`](crate::CurriculumTree)
//! when applying optimistic changes.

use crate::id::Id;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A section of the curriculum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Section id.
    pub id: Id,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Lessons in display order.
    pub lessons: Vec<Lesson>,
    /// Optional section quiz.
    pub quiz: Option<Quiz>,
    /// Whether the section is visible to learners.
    pub is_published: bool,
    /// Position among sibling sections.
    pub order: u32,
}

impl Section {
    /// Creates an empty section.
    pub fn new(id: Id, title: impl Into<String>, order: u32) -> Self {
        Self {
            id,
            title: title.into(),
            description: String::new(),
            lessons: Vec::new(),
            quiz: None,
            is_published: false,
            order,
        }
    }

    /// Finds a lesson by id.
    #[must_use]
    pub fn lesson(&self, id: &Id) -> Option<&Lesson> {
        self.lessons.iter().find(|lesson| &lesson.id == id)
    }

    /// Finds a lesson by id for mutation.
    pub fn lesson_mut(&mut self, id: &Id) -> Option<&mut Lesson> {
        self.lessons.iter_mut().find(|lesson| &lesson.id == id)
    }
}

/// A lesson inside a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    /// Lesson id.
    pub id: Id,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Attached content.
    pub content: Option<Content>,
    /// Estimated duration in minutes.
    pub duration_minutes: u32,
    /// Whether the lesson is visible to learners.
    pub is_published: bool,
    /// Position among sibling lessons.
    pub order: u32,
}

impl Lesson {
    /// Creates an empty lesson.
    pub fn new(id: Id, title: impl Into<String>, order: u32) -> Self {
        Self {
            id,
            title: title.into(),
            description: String::new(),
            content: None,
            duration_minutes: 0,
            is_published: false,
            order,
        }
    }
}

/// Quiz attached to a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    /// Quiz id.
    pub id: Id,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Questions in display order.
    pub questions: Vec<Question>,
    /// Minimum percentage needed to pass.
    pub passing_score: u8,
    /// Maximum number of attempts, unlimited when absent.
    pub max_attempts: Option<u32>,
    /// Time limit in minutes, none when absent.
    pub time_limit_minutes: Option<u32>,
    /// Shuffle question order per attempt.
    pub randomize_questions: bool,
    /// Show results after submission.
    pub show_results: bool,
    /// Must be passed to complete the section.
    pub is_required: bool,
}

impl Quiz {
    /// Creates an empty quiz with default scoring rules.
    pub fn new(id: Id, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            description: String::new(),
            questions: Vec::new(),
            passing_score: 70,
            max_attempts: None,
            time_limit_minutes: None,
            randomize_questions: false,
            show_results: true,
            is_required: false,
        }
    }
}

/// Kind of quiz question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Exactly one correct option.
    SingleChoice,
    /// One or more correct options.
    MultipleChoice,
    /// True or false.
    TrueFalse,
    /// Free text answer.
    ShortAnswer,
}

/// A quiz question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Question id, local to its quiz.
    pub id: String,
    /// Question text.
    pub prompt: String,
    /// Question kind.
    pub kind: QuestionKind,
    /// Answer options.
    pub options: Vec<String>,
    /// Indices into `options` that are correct.
    pub correct_answers: Vec<usize>,
    /// Points awarded for a correct answer.
    pub points: u32,
    /// Shown after answering.
    pub explanation: Option<String>,
}

impl Question {
    /// Creates a single-choice question with no options.
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            kind: QuestionKind::SingleChoice,
            options: Vec::new(),
            correct_answers: Vec::new(),
            points: 1,
            explanation: None,
        }
    }
}

/// Kind of lesson content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Video file or stream.
    Video,
    /// Downloadable document.
    Document,
    /// Rich text body.
    Text,
    /// External link.
    Link,
    /// Audio file.
    Audio,
}

/// Reference to an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Storage key of the upload.
    pub key: String,
    /// Original file name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// Content attached to a lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Content id.
    pub id: String,
    /// Kind tag.
    pub kind: ContentKind,
    /// Uploaded file, if any.
    pub file: Option<FileRef>,
    /// External URL, if any.
    pub url: Option<String>,
    /// Text body, if any.
    pub body: Option<String>,
    /// Free preview for non-enrolled learners.
    pub is_preview: bool,
    /// Must be consumed to complete the lesson.
    pub is_required: bool,
}

impl Content {
    /// Creates content of the given kind with no payload.
    pub fn new(id: impl Into<String>, kind: ContentKind) -> Self {
        Self {
            id: id.into(),
            kind,
            file: None,
            url: None,
            body: None,
            is_preview: false,
            is_required: true,
        }
    }

    /// Shallow-merges a patch into this content.
    pub fn merge(&mut self, patch: ContentPatch) {
        if let Some(kind) = patch.kind {
            self.kind = kind;
        }
        if let Some(file) = patch.file {
            self.file = file;
        }
        if let Some(url) = patch.url {
            self.url = url;
        }
        if let Some(body) = patch.body {
            self.body = body;
        }
        if let Some(is_preview) = patch.is_preview {
            self.is_preview = is_preview;
        }
        if let Some(is_required) = patch.is_required {
            self.is_required = is_required;
        }
    }
}

/// Partial update of lesson content. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentPatch {
    /// New kind.
    pub kind: Option<ContentKind>,
    /// New file reference; `Some(None)` clears it.
    pub file: Option<Option<FileRef>>,
    /// New URL; `Some(None)` clears it.
    pub url: Option<Option<String>>,
    /// New body; `Some(None)` clears it.
    pub body: Option<Option<String>>,
    /// New preview flag.
    pub is_preview: Option<bool>,
    /// New required flag.
    pub is_required: Option<bool>,
}

/// Editable section field.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionField {
    /// Title.
    Title(String),
    /// Description.
    Description(String),
    /// Published flag.
    Published(bool),
}

impl SectionField {
    /// Payload field name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SectionField::Title(_) => "title",
            SectionField::Description(_) => "description",
            SectionField::Published(_) => "is_published",
        }
    }

    /// Payload field value.
    #[must_use]
    pub fn value(&self) -> Value {
        match self {
            SectionField::Title(v) | SectionField::Description(v) => Value::from(v.as_str()),
            SectionField::Published(v) => Value::from(*v),
        }
    }

    /// Writes this field into a section.
    pub fn apply(&self, section: &mut Section) {
        match self {
            SectionField::Title(v) => section.title = v.clone(),
            SectionField::Description(v) => section.description = v.clone(),
            SectionField::Published(v) => section.is_published = *v,
        }
    }
}

/// Editable lesson field.
#[derive(Debug, Clone, PartialEq)]
pub enum LessonField {
    /// Title.
    Title(String),
    /// Description.
    Description(String),
    /// Estimated duration in minutes.
    Duration(u32),
    /// Published flag.
    Published(bool),
}

impl LessonField {
    /// Payload field name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            LessonField::Title(_) => "title",
            LessonField::Description(_) => "description",
            LessonField::Duration(_) => "duration_minutes",
            LessonField::Published(_) => "is_published",
        }
    }

    /// Payload field value.
    #[must_use]
    pub fn value(&self) -> Value {
        match self {
            LessonField::Title(v) | LessonField::Description(v) => Value::from(v.as_str()),
            LessonField::Duration(v) => Value::from(*v),
            LessonField::Published(v) => Value::from(*v),
        }
    }

    /// Writes this field into a lesson.
    pub fn apply(&self, lesson: &mut Lesson) {
        match self {
            LessonField::Title(v) => lesson.title = v.clone(),
            LessonField::Description(v) => lesson.description = v.clone(),
            LessonField::Duration(v) => lesson.duration_minutes = *v,
            LessonField::Published(v) => lesson.is_published = *v,
        }
    }
}

/// Editable quiz field.
#[derive(Debug, Clone, PartialEq)]
pub enum QuizField {
    /// Title.
    Title(String),
    /// Description.
    Description(String),
    /// Passing score percentage.
    PassingScore(u8),
    /// Maximum attempts.
    MaxAttempts(Option<u32>),
    /// Time limit in minutes.
    TimeLimit(Option<u32>),
    /// Shuffle questions.
    Randomize(bool),
    /// Show results after submission.
    ShowResults(bool),
    /// Required to complete the section.
    Required(bool),
}

impl QuizField {
    /// Payload field name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            QuizField::Title(_) => "title",
            QuizField::Description(_) => "description",
            QuizField::PassingScore(_) => "passing_score",
            QuizField::MaxAttempts(_) => "max_attempts",
            QuizField::TimeLimit(_) => "time_limit_minutes",
            QuizField::Randomize(_) => "randomize_questions",
            QuizField::ShowResults(_) => "show_results",
            QuizField::Required(_) => "is_required",
        }
    }

    /// Payload field value.
    #[must_use]
    pub fn value(&self) -> Value {
        match self {
            QuizField::Title(v) | QuizField::Description(v) => Value::from(v.as_str()),
            QuizField::PassingScore(v) => Value::from(*v),
            QuizField::MaxAttempts(v) | QuizField::TimeLimit(v) => {
                v.map(Value::from).unwrap_or(Value::Null)
            }
            QuizField::Randomize(v) | QuizField::ShowResults(v) | QuizField::Required(v) => {
                Value::from(*v)
            }
        }
    }

    /// Writes this field into a quiz.
    pub fn apply(&self, quiz: &mut Quiz) {
        match self {
            QuizField::Title(v) => quiz.title = v.clone(),
            QuizField::Description(v) => quiz.description = v.clone(),
            QuizField::PassingScore(v) => quiz.passing_score = *v,
            QuizField::MaxAttempts(v) => quiz.max_attempts = *v,
            QuizField::TimeLimit(v) => quiz.time_limit_minutes = *v,
            QuizField::Randomize(v) => quiz.randomize_questions = *v,
            QuizField::ShowResults(v) => quiz.show_results = *v,
            QuizField::Required(v) => quiz.is_required = *v,
        }
    }
}

/// Editable question field.
#[derive(Debug, Clone, PartialEq)]
pub enum QuestionField {
    /// Question text.
    Prompt(String),
    /// Question kind.
    Kind(QuestionKind),
    /// Answer options.
    Options(Vec<String>),
    /// Correct option indices.
    CorrectAnswers(Vec<usize>),
    /// Points.
    Points(u32),
    /// Explanation.
    Explanation(Option<String>),
}

impl QuestionField {
    /// Writes this field into a question.
    pub fn apply(&self, question: &mut Question) {
        match self {
            QuestionField::Prompt(v) => question.prompt = v.clone(),
            QuestionField::Kind(v) => question.kind = *v,
            QuestionField::Options(v) => question.options = v.clone(),
            QuestionField::CorrectAnswers(v) => question.correct_answers = v.clone(),
            QuestionField::Points(v) => question.points = *v,
            QuestionField::Explanation(v) => question.explanation = v.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_merge_is_shallow() {
        let mut content = Content::new("c1", ContentKind::Video);
        content.url = Some("https://cdn.example.com/a.mp4".into());

        content.merge(ContentPatch {
            is_preview: Some(true),
            ..ContentPatch::default()
        });
        assert!(content.is_preview);
        assert_eq!(content.url.as_deref(), Some("https://cdn.example.com/a.mp4"));

        content.merge(ContentPatch {
            url: Some(None),
            kind: Some(ContentKind::Text),
            ..ContentPatch::default()
        });
        assert_eq!(content.kind, ContentKind::Text);
        assert!(content.url.is_none());
    }

    #[test]
    fn quiz_field_null_values() {
        let field = QuizField::TimeLimit(None);
        assert_eq!(field.name(), "time_limit_minutes");
        assert_eq!(field.value(), Value::Null);

        let mut quiz = Quiz::new(Id::temporary(), "Checkpoint");
        QuizField::MaxAttempts(Some(3)).apply(&mut quiz);
        assert_eq!(quiz.max_attempts, Some(3));
    }

    #[test]
    fn section_field_apply() {
        let mut section = Section::new(Id::temporary(), "Intro", 0);
        let field = SectionField::Title("Getting started".into());
        field.apply(&mut section);
        assert_eq!(section.title, "Getting started");
        assert_eq!(field.value(), Value::from("Getting started"));
    }
}
