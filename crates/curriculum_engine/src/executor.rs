//! Phased execution of normalized operations.
//!
//! The executor turns each operation into one remote call. Payloads are
//! built from the live document at the moment the call is issued and every
//! call is wrapped in the commit's [`CancelToken`].
//!
//! ## Key Invariants
//!
//! - Phases run in order: deletes, section creates, child creates, updates,
//!   reorders
//! - A create's server id is recorded before any later phase resolves it
//! - A failure is captured in its own result and never stops siblings
//! - No lock is held across a remote call

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{OperationError, ServiceResult};
use crate::plan::{plan_phases, Dispatch};
use crate::queue::OperationResult;
use crate::service::{PersistenceService, ServiceResponse};
use curriculum_model::{
    DocumentSnapshot, EntityKind, Id, IdentityMap, LessonPayload, Operation, QuizPayload,
    SectionPayload, ServerId, TempId,
};
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use tracing::{debug, info, warn};

/// Executes operations against a persistence service.
pub struct Executor<'a, D, S> {
    service: &'a S,
    document: &'a RwLock<D>,
    identity: &'a Mutex<IdentityMap>,
    config: &'a EngineConfig,
}

impl<'a, D, S> Executor<'a, D, S>
where
    D: DocumentSnapshot,
    S: PersistenceService,
{
    /// Creates an executor over borrowed commit state.
    pub fn new(
        service: &'a S,
        document: &'a RwLock<D>,
        identity: &'a Mutex<IdentityMap>,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            service,
            document,
            identity,
            config,
        }
    }

    /// Executes normalized operations phase by phase.
    ///
    /// Returns one result per operation. Operations still pending when the
    /// token is cancelled resolve to [`OperationError::Cancelled`].
    pub async fn execute_all(
        &self,
        ops: Vec<Operation>,
        token: &CancelToken,
    ) -> Vec<OperationResult> {
        let mut results = Vec::with_capacity(ops.len());

        for phase in plan_phases(ops) {
            debug!(
                phase = %phase.kind,
                dispatch = ?phase.dispatch,
                ops = phase.ops.len(),
                "executing phase"
            );
            match phase.dispatch {
                Dispatch::Sequential => {
                    for op in phase.ops {
                        results.push(self.execute(op, token).await);
                    }
                }
                Dispatch::Concurrent => {
                    let phase_results: Vec<OperationResult> = stream::iter(phase.ops)
                        .map(|op| self.execute(op, token))
                        .buffered(self.config.max_in_flight.max(1))
                        .collect()
                        .await;
                    results.extend(phase_results);
                }
            }
        }

        results
    }

    /// Executes a single operation and captures its outcome.
    pub async fn execute(&self, op: Operation, token: &CancelToken) -> OperationResult {
        match self.dispatch(&op, token).await {
            Ok(server_id) => {
                debug!(op = %op, "operation applied");
                OperationResult::succeeded(op, server_id)
            }
            Err(err) => {
                warn!(op = %op, error = %err, "operation failed");
                OperationResult::failed(op, err)
            }
        }
    }

    async fn dispatch(
        &self,
        op: &Operation,
        token: &CancelToken,
    ) -> Result<Option<ServerId>, OperationError> {
        let course = self.config.course_id.as_str();

        match op {
            Operation::SectionCreate { temp_id, .. } => {
                let local = Id::Temporary(*temp_id);
                let payload = self.section_payload(&local)?;
                let existing = self.identity.lock().get(EntityKind::Section, *temp_id).cloned();
                if let Some(server) = existing {
                    info!("section {} already created as {}, sending update", temp_id, server);
                    self.call(token, self.service.update_section(course, &server, &payload))
                        .await?;
                    return Ok(Some(server));
                }

                let response = self
                    .call(token, self.service.create_section(course, &payload))
                    .await?;
                let server = created_id(response, EntityKind::Section)?;
                self.identity.lock().insert_section(*temp_id, server.clone());
                Ok(Some(server))
            }
            Operation::SectionUpdate { id, .. } => {
                let server = self.resolve_required(EntityKind::Section, id)?;
                let payload = self.section_payload(id)?;
                self.call(token, self.service.update_section(course, &server, &payload))
                    .await?;
                Ok(None)
            }
            Operation::SectionDelete { id } => {
                let Some(server) = self.resolve_for_delete(EntityKind::Section, id) else {
                    return Ok(None);
                };
                self.call(token, self.service.delete_section(course, &server))
                    .await?;
                self.identity.lock().forget_section(&server);
                Ok(None)
            }
            Operation::LessonCreate {
                section_id,
                temp_id,
                ..
            } => {
                let section = self.resolve_required(EntityKind::Section, section_id)?;
                let payload = self.lesson_payload(section_id, &Id::Temporary(*temp_id))?;
                let existing = self.identity.lock().get(EntityKind::Lesson, *temp_id).cloned();
                if let Some(server) = existing {
                    info!("lesson {} already created as {}, sending update", temp_id, server);
                    self.call(
                        token,
                        self.service.update_lesson(course, &section, &server, &payload),
                    )
                    .await?;
                    return Ok(Some(server));
                }

                let response = self
                    .call(token, self.service.create_lesson(course, &section, &payload))
                    .await?;
                let server = created_id(response, EntityKind::Lesson)?;
                self.record_child(EntityKind::Lesson, &section, *temp_id, &server);
                Ok(Some(server))
            }
            Operation::LessonUpdate { section_id, id, .. } => {
                let section = self.resolve_required(EntityKind::Section, section_id)?;
                let lesson = self.resolve_required(EntityKind::Lesson, id)?;
                let payload = self.lesson_payload(section_id, id)?;
                self.call(
                    token,
                    self.service.update_lesson(course, &section, &lesson, &payload),
                )
                .await?;
                Ok(None)
            }
            Operation::LessonDelete { section_id, id } => {
                let (Some(section), Some(lesson)) = (
                    self.resolve_for_delete(EntityKind::Section, section_id),
                    self.resolve_for_delete(EntityKind::Lesson, id),
                ) else {
                    return Ok(None);
                };
                self.call(token, self.service.delete_lesson(course, &section, &lesson))
                    .await?;
                Ok(None)
            }
            Operation::QuizCreate {
                section_id,
                temp_id,
                ..
            } => {
                let section = self.resolve_required(EntityKind::Section, section_id)?;
                let payload = self.quiz_payload(section_id, &Id::Temporary(*temp_id))?;
                let existing = self.identity.lock().get(EntityKind::Quiz, *temp_id).cloned();
                if let Some(server) = existing {
                    info!("quiz {} already created as {}, sending update", temp_id, server);
                    self.call(
                        token,
                        self.service.update_quiz(course, &section, &server, &payload),
                    )
                    .await?;
                    return Ok(Some(server));
                }

                let response = self
                    .call(token, self.service.create_quiz(course, &section, &payload))
                    .await?;
                let server = created_id(response, EntityKind::Quiz)?;
                self.record_child(EntityKind::Quiz, &section, *temp_id, &server);
                Ok(Some(server))
            }
            Operation::QuizUpdate { section_id, id, .. } => {
                let section = self.resolve_required(EntityKind::Section, section_id)?;
                let quiz = self.resolve_required(EntityKind::Quiz, id)?;
                let payload = self.quiz_payload(section_id, id)?;
                self.call(
                    token,
                    self.service.update_quiz(course, &section, &quiz, &payload),
                )
                .await?;
                Ok(None)
            }
            Operation::QuizDelete { section_id, id } => {
                let (Some(section), Some(quiz)) = (
                    self.resolve_for_delete(EntityKind::Section, section_id),
                    self.resolve_for_delete(EntityKind::Quiz, id),
                ) else {
                    return Ok(None);
                };
                self.call(token, self.service.delete_quiz(course, &section, &quiz))
                    .await?;
                Ok(None)
            }
            Operation::SectionReorder { .. } | Operation::LessonReorder { .. } => {
                // No remote ordering endpoint exists yet; ordering travels
                // with create and update payloads.
                debug!(op = %op, "reorder accepted locally");
                Ok(None)
            }
            Operation::BasicUpdate { payload } | Operation::AdvancedUpdate { payload } => {
                self.call(token, self.service.update_course(course, payload))
                    .await?;
                Ok(None)
            }
        }
    }

    /// Awaits a service call under the token and turns a rejection into an
    /// error.
    async fn call<F>(&self, token: &CancelToken, call: F) -> Result<ServiceResponse, OperationError>
    where
        F: Future<Output = ServiceResult<ServiceResponse>>,
    {
        let response = token.guard(call).await??;
        if response.success {
            Ok(response)
        } else {
            Err(OperationError::rejected(
                response
                    .message
                    .unwrap_or_else(|| "request failed".to_string()),
            ))
        }
    }

    /// Resolves an id that must have a server id.
    fn resolve_required(&self, kind: EntityKind, id: &Id) -> Result<ServerId, OperationError> {
        let resolved = self.identity.lock().resolve(kind, id);
        match (resolved, id) {
            (Some(server), _) => Ok(server),
            (None, Id::Temporary(temp_id)) => Err(OperationError::Orphaned {
                kind,
                temp_id: *temp_id,
            }),
            (None, Id::Persisted(server)) => Ok(server.clone()),
        }
    }

    /// Resolves the target of a delete. An unresolved temporary id was never
    /// created remotely, so there is nothing to delete.
    fn resolve_for_delete(&self, kind: EntityKind, id: &Id) -> Option<ServerId> {
        let resolved = self.identity.lock().resolve(kind, id);
        if resolved.is_none() {
            debug!("{} {} was never created remotely, skipping delete", kind, id);
        }
        resolved
    }

    fn record_child(&self, kind: EntityKind, section: &ServerId, temp: TempId, server: &ServerId) {
        self.identity
            .lock()
            .insert_child(kind, section, temp, server.clone());
    }

    fn section_payload(&self, id: &Id) -> Result<SectionPayload, OperationError> {
        let document = self.document.read();
        document
            .section(id)
            .map(|section| SectionPayload::from(&section))
            .ok_or_else(|| OperationError::NotInDocument {
                kind: EntityKind::Section,
                id: id.clone(),
            })
    }

    fn lesson_payload(&self, section_id: &Id, id: &Id) -> Result<LessonPayload, OperationError> {
        let document = self.document.read();
        document
            .lesson(section_id, id)
            .map(|lesson| LessonPayload::from(&lesson))
            .ok_or_else(|| OperationError::NotInDocument {
                kind: EntityKind::Lesson,
                id: id.clone(),
            })
    }

    fn quiz_payload(&self, section_id: &Id, id: &Id) -> Result<QuizPayload, OperationError> {
        let document = self.document.read();
        document
            .quiz(section_id)
            .filter(|quiz| &quiz.id == id)
            .map(|quiz| QuizPayload::from(&quiz))
            .ok_or_else(|| OperationError::NotInDocument {
                kind: EntityKind::Quiz,
                id: id.clone(),
            })
    }
}

fn created_id(response: ServiceResponse, kind: EntityKind) -> Result<ServerId, OperationError> {
    response
        .data
        .map(|created| created.id)
        .ok_or(OperationError::MissingServerId { kind })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Endpoint, Failure, MemoryPersistence, ServiceCall};
    use curriculum_model::{Curriculum, CurriculumTree, Fields, Lesson, Quiz, Section};

    struct Harness {
        service: MemoryPersistence,
        document: RwLock<Curriculum>,
        identity: Mutex<IdentityMap>,
        config: EngineConfig,
    }

    impl Harness {
        fn new(sections: Vec<Section>) -> Self {
            Self {
                service: MemoryPersistence::new(),
                document: RwLock::new(Curriculum::from_sections(sections)),
                identity: Mutex::new(IdentityMap::new()),
                config: EngineConfig::new("course-1"),
            }
        }

        async fn run(&self, ops: Vec<Operation>) -> Vec<OperationResult> {
            Executor::new(&self.service, &self.document, &self.identity, &self.config)
                .execute_all(ops, &CancelToken::new())
                .await
        }
    }

    #[tokio::test]
    async fn child_create_uses_resolved_section_id() {
        let section_temp = TempId::new();
        let lesson_temp = TempId::new();
        let mut section = Section::new(Id::Temporary(section_temp), "Intro", 0);
        section
            .lessons
            .push(Lesson::new(Id::Temporary(lesson_temp), "Welcome", 0));
        let harness = Harness::new(vec![section]);

        // Child create first in enqueue order; phases still put the section first.
        let results = harness
            .run(vec![
                Operation::LessonCreate {
                    section_id: Id::Temporary(section_temp),
                    temp_id: lesson_temp,
                    order: 0,
                    payload: Fields::new(),
                },
                Operation::SectionCreate {
                    temp_id: section_temp,
                    order: 0,
                    payload: Fields::new(),
                },
            ])
            .await;

        assert!(results.iter().all(OperationResult::is_success));
        let lesson_calls = harness.service.calls_to(Endpoint::CreateLesson);
        assert_eq!(lesson_calls.len(), 1);
        assert_eq!(
            lesson_calls[0].section_id(),
            Some(&ServerId::new("section-1"))
        );
        assert_eq!(harness.identity.lock().len(), 2);
    }

    #[tokio::test]
    async fn failed_section_create_orphans_children() {
        let section_temp = TempId::new();
        let lesson_temp = TempId::new();
        let mut section = Section::new(Id::Temporary(section_temp), "Intro", 0);
        section
            .lessons
            .push(Lesson::new(Id::Temporary(lesson_temp), "Welcome", 0));
        let harness = Harness::new(vec![section]);
        harness
            .service
            .fail(Endpoint::CreateSection, Failure::Reject("quota".into()));

        let results = harness
            .run(vec![
                Operation::SectionCreate {
                    temp_id: section_temp,
                    order: 0,
                    payload: Fields::new(),
                },
                Operation::LessonCreate {
                    section_id: Id::Temporary(section_temp),
                    temp_id: lesson_temp,
                    order: 0,
                    payload: Fields::new(),
                },
            ])
            .await;

        assert_eq!(results[0].error(), Some(&OperationError::rejected("quota")));
        assert_eq!(
            results[1].error(),
            Some(&OperationError::Orphaned {
                kind: EntityKind::Section,
                temp_id: section_temp,
            })
        );
        assert!(harness.service.calls_to(Endpoint::CreateLesson).is_empty());
    }

    #[tokio::test]
    async fn payload_reflects_document_at_execution_time() {
        let id = Id::persisted("s1");
        let harness = Harness::new(vec![Section::new(id.clone(), "Old", 0)]);
        harness
            .document
            .write()
            .section_mut(&id)
            .map(|section| section.title = "New".into())
            .unwrap();

        harness
            .run(vec![Operation::SectionUpdate {
                id,
                payload: Fields::new(),
            }])
            .await;

        match &harness.service.calls()[0] {
            ServiceCall::UpdateSection { payload, .. } => assert_eq!(payload.title, "New"),
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_of_never_created_entity_is_a_no_op() {
        let harness = Harness::new(Vec::new());
        let results = harness
            .run(vec![Operation::SectionDelete {
                id: Id::temporary(),
            }])
            .await;
        assert!(results[0].is_success());
        assert_eq!(harness.service.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_entity_is_reported() {
        let harness = Harness::new(vec![Section::new(Id::persisted("s1"), "A", 0)]);
        let results = harness
            .run(vec![Operation::QuizUpdate {
                section_id: Id::persisted("s1"),
                id: Id::persisted("q1"),
                payload: Fields::new(),
            }])
            .await;
        assert!(matches!(
            results[0].error(),
            Some(OperationError::NotInDocument {
                kind: EntityKind::Quiz,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn already_created_entity_is_updated_instead() {
        let section_temp = TempId::new();
        let quiz_temp = TempId::new();
        let mut section = Section::new(Id::Temporary(section_temp), "Intro", 0);
        section.quiz = Some(Quiz::new(Id::Temporary(quiz_temp), "Check"));
        let harness = Harness::new(vec![section]);
        {
            let mut identity = harness.identity.lock();
            identity.insert_section(section_temp, ServerId::new("s1"));
            identity.insert_child(
                EntityKind::Quiz,
                &ServerId::new("s1"),
                quiz_temp,
                ServerId::new("q1"),
            );
        }

        let results = harness
            .run(vec![Operation::QuizCreate {
                section_id: Id::Temporary(section_temp),
                temp_id: quiz_temp,
                payload: Fields::new(),
            }])
            .await;

        assert_eq!(results[0].server_id(), Some(&ServerId::new("q1")));
        assert!(harness.service.calls_to(Endpoint::CreateQuiz).is_empty());
        assert_eq!(harness.service.calls_to(Endpoint::UpdateQuiz).len(), 1);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_every_call() {
        let harness = Harness::new(vec![Section::new(Id::persisted("s1"), "A", 0)]);
        let token = CancelToken::cancelled_token();
        let results = Executor::new(
            &harness.service,
            &harness.document,
            &harness.identity,
            &harness.config,
        )
        .execute_all(
            vec![
                Operation::SectionDelete {
                    id: Id::persisted("s2"),
                },
                Operation::SectionUpdate {
                    id: Id::persisted("s1"),
                    payload: Fields::new(),
                },
            ],
            &token,
        )
        .await;

        assert!(results
            .iter()
            .all(|r| r.error() == Some(&OperationError::Cancelled)));
        assert_eq!(harness.service.call_count(), 0);
    }

    #[tokio::test]
    async fn section_delete_forgets_children() {
        let harness = Harness::new(Vec::new());
        let section_temp = TempId::new();
        harness
            .identity
            .lock()
            .insert_section(section_temp, ServerId::new("s1"));

        harness
            .run(vec![Operation::SectionDelete {
                id: Id::Temporary(section_temp),
            }])
            .await;

        assert!(harness.identity.lock().is_empty());
        assert_eq!(harness.service.calls_to(Endpoint::DeleteSection).len(), 1);
    }
}
