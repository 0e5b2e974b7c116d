//! # Curriculum Model
//!
//! Entities, identities and mutation operations for the curriculum editor.
//!
//! This crate provides:
//! - `Id`, a sum of temporary (client) and persisted (server) identifiers
//! - Section, lesson, quiz and content entities with typed field edits
//! - The closed `Operation` model, one variant per (entity, action)
//! - `IdentityMap` for temp → server resolution
//! - Remote payloads built from live document state
//! - Document interfaces and an in-memory document
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod entity;
mod error;
mod id;
mod identity;
mod operation;
mod payload;

pub use document::{CourseForm, Curriculum, CurriculumTree, DocumentSnapshot, MetadataForm};
pub use entity::{
    Content, ContentKind, ContentPatch, FileRef, Lesson, LessonField, Question, QuestionField,
    QuestionKind, Quiz, QuizField, Section, SectionField,
};
pub use error::{CurriculumError, CurriculumResult};
pub use id::{EntityKey, EntityKind, Id, ServerId, TempId};
pub use identity::IdentityMap;
pub use operation::{merge_fields, Action, Fields, Operation};
pub use payload::{LessonPayload, QuizPayload, SectionPayload};
