//! Controller facade over the document, queue and executor.
//!
//! Every edit method mutates the caller's document first and then records
//! the matching [`Operation`]. Edits to an entity whose create is still
//! pending patch that create instead of queueing a separate update, and
//! deleting such an entity drops the create so nothing is ever sent.

use crate::cancel::CancelToken;
use crate::config::{EngineConfig, PartialFailurePolicy};
use crate::error::{EngineResult, OperationError};
use crate::executor::Executor;
use crate::outcome::{AbortReason, CommitOutcome};
use crate::queue::{OperationQueue, OperationResult};
use crate::service::PersistenceService;
use curriculum_model::{
    merge_fields, Content, ContentPatch, CourseForm, CurriculumError, CurriculumResult,
    CurriculumTree, EntityKey, EntityKind, Fields, Id, IdentityMap, Lesson, LessonField,
    Operation, QuestionField, Quiz, QuizField, Section, SectionField, ServerId, TempId,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Hook consulted with the normalized operations before a commit starts.
/// Returning `false` vetoes the commit.
pub type PreCommitHook = Arc<dyn Fn(&[Operation]) -> bool + Send + Sync>;

/// Counters about commits run by a controller.
#[derive(Debug, Clone, Default)]
pub struct CommitStats {
    /// Commits that ran the executor.
    pub commits: u64,
    /// Calls to `retry_failed` that ran the executor.
    pub retries: u64,
    /// Operations applied successfully.
    pub operations_applied: u64,
    /// Operations that failed.
    pub operations_failed: u64,
    /// Commits aborted by cancellation or veto.
    pub aborts: u64,
    /// Time of the last commit that ran the executor.
    pub last_commit_time: Option<Instant>,
}

/// The facade the editing UI talks to.
///
/// Local edits are synchronous and never fail remotely; remote failures are
/// reported only through [`commit`](Self::commit) and
/// [`retry_failed`](Self::retry_failed).
pub struct CurriculumController<T: CurriculumTree, S: PersistenceService> {
    config: EngineConfig,
    tree: Arc<RwLock<T>>,
    service: Arc<S>,
    queue: Mutex<OperationQueue>,
    identity: Mutex<IdentityMap>,
    /// In-flight token while committing; a pre-armed token otherwise.
    token: Mutex<Option<CancelToken>>,
    committing: AtomicBool,
    pre_commit: Mutex<Option<PreCommitHook>>,
    stats: RwLock<CommitStats>,
}

/// Marks a commit in progress; releases it on drop, even if the commit
/// future is dropped mid-flight. Dropping also thaws the queue.
struct CommitGuard<'a> {
    committing: &'a AtomicBool,
    slot: &'a Mutex<Option<CancelToken>>,
    queue: &'a Mutex<OperationQueue>,
    armed: Option<CancelToken>,
}

impl<'a> CommitGuard<'a> {
    fn acquire(
        committing: &'a AtomicBool,
        slot: &'a Mutex<Option<CancelToken>>,
        queue: &'a Mutex<OperationQueue>,
    ) -> Option<Self> {
        committing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self {
            committing,
            slot,
            queue,
            armed: None,
        })
    }

    /// Takes the pre-armed token, if any, or creates a fresh one, and
    /// publishes it for `abort_commit`.
    fn arm(&mut self) -> CancelToken {
        let mut slot = self.slot.lock();
        let token = slot.take().unwrap_or_default();
        *slot = Some(token.clone());
        self.armed = Some(token.clone());
        token
    }
}

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        if let Some(armed) = &self.armed {
            let mut slot = self.slot.lock();
            if slot.as_ref().is_some_and(|token| token.same_as(armed)) {
                *slot = None;
            }
        }
        self.queue.lock().thaw();
        self.committing.store(false, Ordering::Release);
    }
}

impl<T, S> CurriculumController<T, S>
where
    T: CurriculumTree,
    S: PersistenceService,
{
    /// Creates a controller over a shared document.
    pub fn new(config: EngineConfig, tree: Arc<RwLock<T>>, service: S) -> Self {
        Self {
            config,
            tree,
            service: Arc::new(service),
            queue: Mutex::new(OperationQueue::new()),
            identity: Mutex::new(IdentityMap::new()),
            token: Mutex::new(None),
            committing: AtomicBool::new(false),
            pre_commit: Mutex::new(None),
            stats: RwLock::new(CommitStats::default()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the shared document.
    pub fn tree(&self) -> Arc<RwLock<T>> {
        Arc::clone(&self.tree)
    }

    /// Returns the persistence service.
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Returns commit statistics.
    pub fn stats(&self) -> CommitStats {
        self.stats.read().clone()
    }

    /// Installs a hook that can veto commits.
    pub fn set_pre_commit_hook<F>(&self, hook: F)
    where
        F: Fn(&[Operation]) -> bool + Send + Sync + 'static,
    {
        *self.pre_commit.lock() = Some(Arc::new(hook));
    }

    /// Removes the pre-commit hook.
    pub fn clear_pre_commit_hook(&self) {
        *self.pre_commit.lock() = None;
    }

    // =========================================================================
    // Sections
    // =========================================================================

    /// Appends a new section and returns its temporary id.
    pub fn create_section(&self, title: impl Into<String>) -> Id {
        let temp = TempId::new();
        let id = Id::Temporary(temp);
        let title = title.into();

        let order = {
            let mut tree = self.tree.write();
            let order = tree.sections().len() as u32;
            tree.sections_mut()
                .push(Section::new(id.clone(), title.clone(), order));
            tree.set_dirty(true);
            order
        };

        self.queue.lock().push(Operation::SectionCreate {
            temp_id: temp,
            order,
            payload: fields([("title", Value::from(title)), ("order", Value::from(order))]),
        });
        id
    }

    /// Edits one field of a section.
    pub fn update_section_field(&self, section_id: &Id, field: SectionField) -> CurriculumResult<()> {
        self.edit_tree(|tree| {
            field.apply(tree.section_mut(section_id)?);
            Ok(())
        })?;

        self.enqueue_update(Operation::SectionUpdate {
            id: section_id.clone(),
            payload: fields([(field.name(), field.value())]),
        });
        Ok(())
    }

    /// Removes a section with its lessons and quiz.
    pub fn delete_section(&self, section_id: &Id) -> CurriculumResult<()> {
        self.edit_tree(|tree| {
            let sections = tree.sections_mut();
            let index = sections
                .iter()
                .position(|section| &section.id == section_id)
                .ok_or_else(|| CurriculumError::SectionNotFound(section_id.clone()))?;
            sections.remove(index);
            Ok(())
        })?;

        let mut queue = self.queue.lock();
        let key = EntityKey::new(EntityKind::Section, section_id.clone());
        let never_sent = queue.has_pending_create(&key);
        queue.retain(|op| !op.touches_section(section_id));
        let dismissed = queue.dismiss_failures(|op| op.touches_section(section_id));
        if dismissed > 0 {
            debug!(section = %section_id, dismissed, "dismissed failures of deleted section");
        }
        if never_sent {
            debug!(section = %section_id, "dropped unsent section and its children");
        } else {
            queue.push(Operation::SectionDelete {
                id: section_id.clone(),
            });
        }
        Ok(())
    }

    /// Reorders sections. `ordered` must name every section exactly once.
    pub fn reorder_sections(&self, ordered: &[Id]) -> CurriculumResult<()> {
        let moved = self.edit_tree(|tree| {
            reorder(tree.sections_mut(), ordered, |s| &s.id, |s, order| {
                s.order = order
            })
        })?;

        for (id, order) in moved {
            self.enqueue_reorder(Operation::SectionReorder { id, order });
        }
        Ok(())
    }

    // =========================================================================
    // Lessons
    // =========================================================================

    /// Appends a lesson to a section and returns its temporary id.
    pub fn create_lesson(&self, section_id: &Id, title: impl Into<String>) -> CurriculumResult<Id> {
        let temp = TempId::new();
        let id = Id::Temporary(temp);
        let title = title.into();

        let order = self.edit_tree(|tree| {
            let section = tree.section_mut(section_id)?;
            let order = section.lessons.len() as u32;
            section
                .lessons
                .push(Lesson::new(id.clone(), title.clone(), order));
            Ok(order)
        })?;

        self.queue.lock().push(Operation::LessonCreate {
            section_id: section_id.clone(),
            temp_id: temp,
            order,
            payload: fields([("title", Value::from(title)), ("order", Value::from(order))]),
        });
        Ok(id)
    }

    /// Edits one field of a lesson.
    pub fn update_lesson_field(
        &self,
        section_id: &Id,
        lesson_id: &Id,
        field: LessonField,
    ) -> CurriculumResult<()> {
        self.edit_tree(|tree| {
            field.apply(tree.lesson_mut(section_id, lesson_id)?);
            Ok(())
        })?;

        self.enqueue_update(Operation::LessonUpdate {
            section_id: section_id.clone(),
            id: lesson_id.clone(),
            payload: fields([(field.name(), field.value())]),
        });
        Ok(())
    }

    /// Attaches content to a lesson, replacing any existing content.
    pub fn add_lesson_content(
        &self,
        section_id: &Id,
        lesson_id: &Id,
        content: Content,
    ) -> CurriculumResult<()> {
        let value = serde_json::to_value(&content)
            .map_err(|err| CurriculumError::encoding("lesson content", err))?;
        self.edit_tree(|tree| {
            tree.lesson_mut(section_id, lesson_id)?.content = Some(content);
            Ok(())
        })?;

        self.enqueue_content(section_id, lesson_id, value);
        Ok(())
    }

    /// Shallow-merges a patch into a lesson's content.
    pub fn update_lesson_content(
        &self,
        section_id: &Id,
        lesson_id: &Id,
        patch: ContentPatch,
    ) -> CurriculumResult<()> {
        let value = self.edit_tree(|tree| {
            let content = tree
                .lesson_mut(section_id, lesson_id)?
                .content
                .as_mut()
                .ok_or_else(|| CurriculumError::ContentNotFound(lesson_id.clone()))?;
            let mut merged = content.clone();
            merged.merge(patch);
            let value = serde_json::to_value(&merged)
                .map_err(|err| CurriculumError::encoding("lesson content", err))?;
            *content = merged;
            Ok(value)
        })?;

        self.enqueue_content(section_id, lesson_id, value);
        Ok(())
    }

    /// Detaches a lesson's content.
    pub fn remove_lesson_content(&self, section_id: &Id, lesson_id: &Id) -> CurriculumResult<()> {
        self.edit_tree(|tree| {
            tree.lesson_mut(section_id, lesson_id)?
                .content
                .take()
                .map(|_| ())
                .ok_or_else(|| CurriculumError::ContentNotFound(lesson_id.clone()))
        })?;

        self.enqueue_content(section_id, lesson_id, Value::Null);
        Ok(())
    }

    /// Removes a lesson.
    pub fn delete_lesson(&self, section_id: &Id, lesson_id: &Id) -> CurriculumResult<()> {
        self.edit_tree(|tree| {
            let section = tree.section_mut(section_id)?;
            let index = section
                .lessons
                .iter()
                .position(|lesson| &lesson.id == lesson_id)
                .ok_or_else(|| CurriculumError::LessonNotFound {
                    section_id: section_id.clone(),
                    lesson_id: lesson_id.clone(),
                })?;
            section.lessons.remove(index);
            Ok(())
        })?;

        self.enqueue_delete(Operation::LessonDelete {
            section_id: section_id.clone(),
            id: lesson_id.clone(),
        });
        Ok(())
    }

    /// Reorders the lessons of a section. `ordered` must name every lesson
    /// exactly once.
    pub fn reorder_lessons(&self, section_id: &Id, ordered: &[Id]) -> CurriculumResult<()> {
        let moved = self.edit_tree(|tree| {
            let section = tree.section_mut(section_id)?;
            reorder(&mut section.lessons, ordered, |l| &l.id, |l, order| {
                l.order = order
            })
        })?;

        for (id, order) in moved {
            self.enqueue_reorder(Operation::LessonReorder {
                section_id: section_id.clone(),
                id,
                order,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Quizzes
    // =========================================================================

    /// Attaches a new quiz to a section and returns its temporary id.
    pub fn create_quiz(&self, section_id: &Id, title: impl Into<String>) -> CurriculumResult<Id> {
        let temp = TempId::new();
        let id = Id::Temporary(temp);
        let title = title.into();

        self.edit_tree(|tree| {
            let section = tree.section_mut(section_id)?;
            if section.quiz.is_some() {
                return Err(CurriculumError::QuizExists(section_id.clone()));
            }
            section.quiz = Some(Quiz::new(id.clone(), title.clone()));
            Ok(())
        })?;

        self.queue.lock().push(Operation::QuizCreate {
            section_id: section_id.clone(),
            temp_id: temp,
            payload: fields([("title", Value::from(title))]),
        });
        Ok(id)
    }

    /// Edits one field of a section's quiz.
    pub fn update_quiz_field(&self, section_id: &Id, field: QuizField) -> CurriculumResult<()> {
        let quiz_id = self.edit_tree(|tree| {
            let quiz = tree.quiz_mut(section_id)?;
            field.apply(quiz);
            Ok(quiz.id.clone())
        })?;

        self.enqueue_update(Operation::QuizUpdate {
            section_id: section_id.clone(),
            id: quiz_id,
            payload: fields([(field.name(), field.value())]),
        });
        Ok(())
    }

    /// Edits one field of a quiz question. The queued update carries the
    /// whole question list.
    pub fn update_quiz_question_field(
        &self,
        section_id: &Id,
        question_id: &str,
        field: QuestionField,
    ) -> CurriculumResult<()> {
        let (quiz_id, questions) = self.edit_tree(|tree| {
            let quiz = tree.quiz_mut(section_id)?;
            let mut edited = quiz.questions.clone();
            let question = edited
                .iter_mut()
                .find(|question| question.id == question_id)
                .ok_or_else(|| CurriculumError::QuestionNotFound {
                    section_id: section_id.clone(),
                    question_id: question_id.to_string(),
                })?;
            field.apply(question);
            let value = serde_json::to_value(&edited)
                .map_err(|err| CurriculumError::encoding("quiz questions", err))?;
            quiz.questions = edited;
            Ok((quiz.id.clone(), value))
        })?;

        self.enqueue_update(Operation::QuizUpdate {
            section_id: section_id.clone(),
            id: quiz_id,
            payload: fields([("questions", questions)]),
        });
        Ok(())
    }

    /// Removes a section's quiz.
    pub fn delete_quiz(&self, section_id: &Id) -> CurriculumResult<()> {
        let quiz = self.edit_tree(|tree| {
            tree.section_mut(section_id)?
                .quiz
                .take()
                .ok_or_else(|| CurriculumError::QuizNotFound(section_id.clone()))
        })?;

        self.enqueue_delete(Operation::QuizDelete {
            section_id: section_id.clone(),
            id: quiz.id,
        });
        Ok(())
    }

    // =========================================================================
    // Course metadata
    // =========================================================================

    /// Saves the dirty flat course fields immediately, bypassing the queue.
    ///
    /// Returns `Ok(false)` when nothing was dirty. Dirty tracking is reset
    /// only on success.
    pub async fn save_basic_advanced<F>(&self, form: &mut F) -> EngineResult<bool>
    where
        F: CourseForm,
    {
        let dirty = form.dirty_fields();
        if dirty.is_empty() {
            debug!("no dirty course fields to save");
            return Ok(false);
        }

        info!(fields = dirty.len(), "saving course metadata");
        let response = self
            .service
            .update_course(&self.config.course_id, &dirty)
            .await?;
        if !response.success {
            let message = response
                .message
                .unwrap_or_else(|| "course update failed".to_string());
            warn!(error = %message, "course metadata rejected");
            return Err(OperationError::rejected(message));
        }

        form.reset_dirty();
        Ok(true)
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Sends the net pending changes to the service.
    pub async fn commit(&self) -> CommitOutcome {
        let Some(mut guard) = CommitGuard::acquire(&self.committing, &self.token, &self.queue)
        else {
            warn!("commit requested while another commit is running");
            return CommitOutcome::Aborted(AbortReason::Busy);
        };

        let (ops, watermark) = {
            let mut queue = self.queue.lock();
            (queue.normalize(), queue.freeze())
        };

        if ops.is_empty() {
            self.queue.lock().acknowledge(watermark, &HashSet::new());
            self.settle_dirty();
            debug!("nothing to commit");
            return CommitOutcome::Committed { applied: 0 };
        }

        let hook = self.pre_commit.lock().clone();
        if let Some(hook) = hook {
            if !hook(ops.as_slice()) {
                info!(ops = ops.len(), "commit vetoed by pre-commit hook");
                self.stats.write().aborts += 1;
                return CommitOutcome::Aborted(AbortReason::Vetoed);
            }
        }

        let token = guard.arm();
        if token.is_cancelled() {
            info!("commit cancelled before start");
            self.stats.write().aborts += 1;
            return CommitOutcome::Aborted(AbortReason::Cancelled);
        }

        info!(ops = ops.len(), "commit started");
        let results = self.executor().execute_all(ops, &token).await;
        let (applied, failed) = self.record(&results);
        {
            let mut stats = self.stats.write();
            stats.commits += 1;
            stats.operations_applied += applied as u64;
            stats.operations_failed += failed.len() as u64;
            stats.last_commit_time = Some(Instant::now());
        }

        if was_cancelled(&results) {
            self.prune(watermark, &results);
            info!(applied, "commit aborted");
            self.stats.write().aborts += 1;
            return CommitOutcome::Aborted(AbortReason::Cancelled);
        }

        if !failed.is_empty() {
            self.prune(watermark, &results);
            warn!(applied, failed = failed.len(), "commit partially failed");
            return CommitOutcome::PartialFailure { failed };
        }

        self.queue.lock().acknowledge(watermark, &HashSet::new());
        self.settle_dirty();
        info!(applied, "commit finished");
        CommitOutcome::Committed { applied }
    }

    /// Re-executes the operations standing as failed.
    ///
    /// Retryable errors are retried with backoff per
    /// [`RetryConfig`](crate::RetryConfig). The pending queue is only pruned
    /// of operations that now succeeded, and only under
    /// [`PartialFailurePolicy::PruneSucceeded`].
    pub async fn retry_failed(&self) -> CommitOutcome {
        let Some(mut guard) = CommitGuard::acquire(&self.committing, &self.token, &self.queue)
        else {
            warn!("retry requested while another commit is running");
            return CommitOutcome::Aborted(AbortReason::Busy);
        };

        let (failed_ops, watermark) = {
            let mut queue = self.queue.lock();
            (queue.failed_ops(), queue.freeze())
        };
        if failed_ops.is_empty() {
            debug!("nothing to retry");
            return CommitOutcome::Committed { applied: 0 };
        }

        let token = guard.arm();
        if token.is_cancelled() {
            info!("retry cancelled before start");
            self.stats.write().aborts += 1;
            return CommitOutcome::Aborted(AbortReason::Cancelled);
        }

        let retry = &self.config.retry;
        let mut pending = OperationQueue::from_operations(failed_ops).normalize();
        let mut settled: Vec<OperationResult> = Vec::new();
        let mut attempt = 0;
        info!(ops = pending.len(), "retrying failed operations");

        loop {
            let results = self
                .executor()
                .execute_all(std::mem::take(&mut pending), &token)
                .await;
            attempt += 1;

            let can_retry = retry.allows_round_after(attempt) && !token.is_cancelled();
            for result in results {
                let again = can_retry && result.error().is_some_and(OperationError::is_retryable);
                if again {
                    pending.push(result.operation);
                } else {
                    settled.push(result);
                }
            }
            if pending.is_empty() {
                break;
            }

            let delay = retry.backoff_after(attempt);
            debug!(attempt, ops = pending.len(), ?delay, "backing off before retry");
            if token.guard(tokio::time::sleep(delay)).await.is_err() {
                settled.extend(
                    pending
                        .drain(..)
                        .map(|op| OperationResult::failed(op, OperationError::Cancelled)),
                );
                break;
            }
        }

        let (applied, failed) = self.record(&settled);
        {
            let mut stats = self.stats.write();
            stats.retries += 1;
            stats.operations_applied += applied as u64;
            stats.operations_failed += failed.len() as u64;
        }

        if self.config.partial_failure == PartialFailurePolicy::PruneSucceeded {
            let succeeded: HashSet<EntityKey> = settled
                .iter()
                .filter(|result| result.is_success())
                .map(|result| result.operation.key())
                .collect();
            let pruned = self.queue.lock().acknowledge_keys(watermark, &succeeded);
            debug!(pruned, "pruned retried operations from queue");
            self.settle_dirty();
        }

        if was_cancelled(&settled) {
            info!(applied, "retry aborted");
            self.stats.write().aborts += 1;
            return CommitOutcome::Aborted(AbortReason::Cancelled);
        }
        if !failed.is_empty() {
            warn!(applied, failed = failed.len(), "retry partially failed");
            return CommitOutcome::PartialFailure { failed };
        }
        info!(applied, "retry finished");
        CommitOutcome::Committed { applied }
    }

    /// Cancels the running commit. With no commit running, the next
    /// non-empty commit is cancelled before it starts.
    pub fn abort_commit(&self) {
        let mut slot = self.token.lock();
        match slot.as_ref() {
            Some(token) => {
                info!("aborting commit");
                token.cancel();
            }
            None => {
                debug!("no commit in flight, pre-arming abort");
                *slot = Some(CancelToken::cancelled_token());
            }
        }
    }

    /// Returns true while a commit or retry is running.
    pub fn is_committing(&self) -> bool {
        self.committing.load(Ordering::Acquire)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Returns true if there are edits not yet committed.
    pub fn has_unsaved_changes(&self) -> bool {
        !self.queue.lock().is_empty() || self.tree.read().is_dirty()
    }

    /// Returns the number of queued operations, before coalescing.
    pub fn pending_operations_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns the queued operations, before coalescing.
    pub fn pending_operations(&self) -> Vec<Operation> {
        self.queue.lock().get_all()
    }

    /// Returns the operations the next commit would send.
    pub fn normalized_operations(&self) -> Vec<Operation> {
        self.queue.lock().normalize()
    }

    /// Drops every queued operation. The document is left as is.
    pub fn clear_pending_operations(&self) {
        self.queue.lock().clear();
    }

    /// Returns every execution result recorded so far.
    pub fn results(&self) -> Vec<OperationResult> {
        self.queue.lock().results().to_vec()
    }

    /// Returns true if some operation is still standing as failed.
    pub fn has_failures(&self) -> bool {
        self.queue.lock().has_failures()
    }

    /// Returns the operations still standing as failed.
    pub fn failed_operations(&self) -> Vec<Operation> {
        self.queue.lock().failed_ops()
    }

    /// Returns a copy of the identity map.
    pub fn identity_map(&self) -> IdentityMap {
        self.identity.lock().clone()
    }

    /// Resolves an id to its server id, if it has one.
    pub fn resolve(&self, kind: EntityKind, id: &Id) -> Option<ServerId> {
        self.identity.lock().resolve(kind, id)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn executor(&self) -> Executor<'_, T, S> {
        Executor::new(&self.service, &self.tree, &self.identity, &self.config)
    }

    /// Applies an edit to the document and marks it dirty on success.
    fn edit_tree<R>(&self, edit: impl FnOnce(&mut T) -> CurriculumResult<R>) -> CurriculumResult<R> {
        let mut tree = self.tree.write();
        let output = edit(&mut *tree)?;
        tree.set_dirty(true);
        Ok(output)
    }

    /// Folds an update into the pending create of a temporary entity, or
    /// queues it.
    fn enqueue_update(&self, op: Operation) {
        let mut queue = self.queue.lock();
        if let Some(temp) = op.id().as_temp() {
            let kind = op.kind();
            let update = op.payload().cloned().unwrap_or_default();
            let patched = queue.update_create_op(
                |pending| pending.kind() == kind && pending.creates(temp),
                |pending| {
                    if let Some(payload) = pending.payload_mut() {
                        merge_fields(payload, update);
                    }
                },
            );
            if patched {
                return;
            }
        }
        queue.push(op);
    }

    /// Drops the pending create of a temporary entity with everything queued
    /// for it, or queues the delete.
    fn enqueue_delete(&self, op: Operation) {
        let mut queue = self.queue.lock();
        let deleted = op.key();
        let dismissed = queue.dismiss_failures(|failed| failed.key() == deleted);
        if dismissed > 0 {
            debug!(entity = %deleted, dismissed, "dismissed failures of deleted entity");
        }
        if let Some(temp) = op.id().as_temp() {
            let kind = op.kind();
            let key = op.key();
            if queue.remove_create_op(|pending| pending.kind() == kind && pending.creates(temp)) {
                queue.retain(|pending| pending.key() != key);
                debug!(entity = %key, "dropped unsent entity");
                return;
            }
        }
        queue.push(op);
    }

    /// Moves the order hint of a pending create, or queues the reorder.
    fn enqueue_reorder(&self, op: Operation) {
        let mut queue = self.queue.lock();
        if let (Some(temp), Some(order)) = (op.id().as_temp(), op.order()) {
            let kind = op.kind();
            let patched = queue.update_create_op(
                |pending| pending.kind() == kind && pending.creates(temp),
                |pending| {
                    pending.set_order(order);
                },
            );
            if patched {
                return;
            }
        }
        queue.push(op);
    }

    fn enqueue_content(&self, section_id: &Id, lesson_id: &Id, content: Value) {
        self.enqueue_update(Operation::LessonUpdate {
            section_id: section_id.clone(),
            id: lesson_id.clone(),
            payload: fields([("content", content)]),
        });
    }

    /// Appends results to the log, except cancellations. Returns the number
    /// applied and the failures.
    fn record(&self, results: &[OperationResult]) -> (usize, Vec<OperationResult>) {
        let mut applied = 0;
        let mut failed = Vec::new();
        let mut queue = self.queue.lock();
        for result in results {
            match result.error() {
                None => applied += 1,
                Some(OperationError::Cancelled) => continue,
                Some(_) => failed.push(result.clone()),
            }
            queue.add_result(result.clone());
        }
        (applied, failed)
    }

    /// Removes settled operations from the queue after an incomplete commit,
    /// according to the partial failure policy.
    fn prune(&self, watermark: u64, results: &[OperationResult]) {
        if self.config.partial_failure != PartialFailurePolicy::PruneSucceeded {
            return;
        }
        let unsettled: HashSet<EntityKey> = results
            .iter()
            .filter(|result| !result.is_success())
            .map(|result| result.operation.key())
            .collect();
        let pruned = self.queue.lock().acknowledge(watermark, &unsettled);
        debug!(pruned, kept = unsettled.len(), "pruned settled operations");
    }

    fn settle_dirty(&self) {
        let empty = self.queue.lock().is_empty();
        if empty {
            self.tree.write().set_dirty(false);
        }
    }
}

/// True when the executor left at least one operation unsent because the
/// token fired. An abort that lands after every call settled is not one.
fn was_cancelled(results: &[OperationResult]) -> bool {
    results
        .iter()
        .any(|result| result.error() == Some(&OperationError::Cancelled))
}

/// Builds a payload from field pairs.
fn fields<const N: usize>(pairs: [(&str, Value); N]) -> Fields {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Rearranges `items` to follow `ordered`, renumbering their order field.
/// Returns the ids whose position changed. `items` is untouched on error.
fn reorder<E>(
    items: &mut Vec<E>,
    ordered: &[Id],
    id_of: impl Fn(&E) -> &Id,
    set_order: impl Fn(&mut E, u32),
) -> CurriculumResult<Vec<(Id, u32)>> {
    let distinct: HashSet<&Id> = ordered.iter().collect();
    if ordered.len() != items.len() || distinct.len() != ordered.len() {
        return Err(CurriculumError::invalid_order(format!(
            "expected {} distinct ids, got {}",
            items.len(),
            ordered.len()
        )));
    }

    let mut indices = Vec::with_capacity(ordered.len());
    for id in ordered {
        let index = items
            .iter()
            .position(|item| id_of(item) == id)
            .ok_or_else(|| CurriculumError::invalid_order(format!("unknown id {id}")))?;
        indices.push(index);
    }

    let mut slots: Vec<Option<E>> = std::mem::take(items).into_iter().map(Some).collect();
    let mut moved = Vec::new();
    for (position, index) in indices.into_iter().enumerate() {
        if let Some(mut item) = slots[index].take() {
            let order = position as u32;
            if index != position {
                moved.push((id_of(&item).clone(), order));
            }
            set_order(&mut item, order);
            items.push(item);
        }
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Endpoint, Failure, MemoryPersistence};
    use curriculum_model::{Action, Curriculum, DocumentSnapshot, Question};

    type Controller = CurriculumController<Curriculum, MemoryPersistence>;

    fn controller(sections: Vec<Section>) -> Controller {
        let tree = Arc::new(RwLock::new(Curriculum::from_sections(sections)));
        CurriculumController::new(EngineConfig::new("course-1"), tree, MemoryPersistence::new())
    }

    #[test]
    fn edits_to_unsent_section_patch_its_create() {
        let ctl = controller(Vec::new());
        let id = ctl.create_section("Draft");
        ctl.update_section_field(&id, SectionField::Title("One".into()))
            .unwrap();
        ctl.update_section_field(&id, SectionField::Title("Final".into()))
            .unwrap();

        let pending = ctl.pending_operations();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload().unwrap()["title"], "Final");
        assert_eq!(ctl.tree().read().sections()[0].title, "Final");
        assert!(ctl.has_unsaved_changes());
    }

    #[test]
    fn deleting_unsent_section_drops_its_children() {
        let ctl = controller(Vec::new());
        let section = ctl.create_section("Draft");
        let lesson = ctl.create_lesson(&section, "Intro").unwrap();
        ctl.update_lesson_field(&section, &lesson, LessonField::Duration(5))
            .unwrap();
        ctl.create_quiz(&section, "Check").unwrap();

        ctl.delete_section(&section).unwrap();
        assert_eq!(ctl.pending_operations_count(), 0);
        assert!(ctl.tree().read().sections().is_empty());
    }

    #[test]
    fn deleting_persisted_lesson_queues_delete() {
        let mut section = Section::new(Id::persisted("s1"), "Basics", 0);
        section
            .lessons
            .push(Lesson::new(Id::persisted("l1"), "One", 0));
        let ctl = controller(vec![section]);

        ctl.update_lesson_field(
            &Id::persisted("s1"),
            &Id::persisted("l1"),
            LessonField::Title("x".into()),
        )
        .unwrap();
        ctl.delete_lesson(&Id::persisted("s1"), &Id::persisted("l1"))
            .unwrap();

        let net = ctl.normalized_operations();
        assert_eq!(net.len(), 1);
        assert_eq!(net[0].action(), Action::Delete);
    }

    #[test]
    fn lookups_fail_without_queueing() {
        let ctl = controller(Vec::new());
        let missing = Id::persisted("nope");
        assert_eq!(
            ctl.update_section_field(&missing, SectionField::Published(true)),
            Err(CurriculumError::SectionNotFound(missing.clone()))
        );
        assert!(ctl.create_lesson(&missing, "x").is_err());
        assert!(ctl.delete_quiz(&missing).is_err());
        assert_eq!(ctl.pending_operations_count(), 0);
        assert!(!ctl.has_unsaved_changes());
    }

    #[test]
    fn reorder_sections_validates_and_renumbers() {
        let ctl = controller(vec![
            Section::new(Id::persisted("a"), "A", 0),
            Section::new(Id::persisted("b"), "B", 1),
        ]);
        let a = Id::persisted("a");
        let b = Id::persisted("b");

        assert!(matches!(
            ctl.reorder_sections(&[a.clone()]),
            Err(CurriculumError::InvalidOrder { .. })
        ));
        assert!(matches!(
            ctl.reorder_sections(&[a.clone(), a.clone()]),
            Err(CurriculumError::InvalidOrder { .. })
        ));

        ctl.reorder_sections(&[b.clone(), a.clone()]).unwrap();
        let tree = ctl.tree();
        let tree = tree.read();
        assert_eq!(tree.sections()[0].id, b);
        assert_eq!(tree.sections()[0].order, 0);
        assert_eq!(tree.sections()[1].order, 1);
        assert_eq!(ctl.pending_operations_count(), 2);
    }

    #[test]
    fn reorder_of_unsent_lesson_moves_its_create() {
        let ctl = controller(vec![Section::new(Id::persisted("s1"), "S", 0)]);
        let section = Id::persisted("s1");
        let first = ctl.create_lesson(&section, "First").unwrap();
        let second = ctl.create_lesson(&section, "Second").unwrap();

        ctl.reorder_lessons(&section, &[second.clone(), first.clone()])
            .unwrap();

        let pending = ctl.pending_operations();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].order(), Some(1));
        assert_eq!(pending[1].order(), Some(0));
    }

    #[test]
    fn lesson_content_edits() {
        let mut section = Section::new(Id::persisted("s1"), "Basics", 0);
        section
            .lessons
            .push(Lesson::new(Id::persisted("l1"), "One", 0));
        let ctl = controller(vec![section]);
        let (s, l) = (Id::persisted("s1"), Id::persisted("l1"));

        assert_eq!(
            ctl.update_lesson_content(&s, &l, ContentPatch::default()),
            Err(CurriculumError::ContentNotFound(l.clone()))
        );

        ctl.add_lesson_content(
            &s,
            &l,
            Content::new("c1", curriculum_model::ContentKind::Video),
        )
        .unwrap();
        ctl.update_lesson_content(
            &s,
            &l,
            ContentPatch {
                url: Some(Some("https://cdn.example/v.mp4".into())),
                ..ContentPatch::default()
            },
        )
        .unwrap();

        let content = ctl.tree().read().lesson(&s, &l).and_then(|l| l.content);
        let content = content.unwrap();
        assert_eq!(content.url.as_deref(), Some("https://cdn.example/v.mp4"));
        assert!(content.is_required);

        let expected = serde_json::to_value(&content).unwrap();
        let net = ctl.normalized_operations();
        assert_eq!(net.len(), 1);
        assert_eq!(net[0].payload().unwrap()["content"], expected);
        assert!(!expected.is_null());

        ctl.remove_lesson_content(&s, &l).unwrap();
        let net = ctl.normalized_operations();
        assert_eq!(net.len(), 1);
        assert_eq!(net[0].payload().unwrap()["content"], Value::Null);
    }

    #[test]
    fn question_edit_sends_whole_question_list() {
        let mut section = Section::new(Id::persisted("s1"), "Basics", 0);
        let mut quiz = Quiz::new(Id::persisted("q1"), "Check");
        quiz.questions.push(Question::new("a", "First?"));
        quiz.questions.push(Question::new("b", "Second?"));
        section.quiz = Some(quiz);
        let ctl = controller(vec![section]);
        let s = Id::persisted("s1");

        ctl.update_quiz_question_field(&s, "b", QuestionField::Points(5))
            .unwrap();
        assert!(matches!(
            ctl.update_quiz_question_field(&s, "zz", QuestionField::Points(1)),
            Err(CurriculumError::QuestionNotFound { .. })
        ));

        let pending = ctl.pending_operations();
        assert_eq!(pending.len(), 1);
        let questions = &pending[0].payload().unwrap()["questions"];
        assert_eq!(questions.as_array().map(Vec::len), Some(2));
        assert_eq!(questions[1]["points"], 5);
    }

    #[test]
    fn second_quiz_is_rejected() {
        let ctl = controller(vec![Section::new(Id::persisted("s1"), "S", 0)]);
        let s = Id::persisted("s1");
        ctl.create_quiz(&s, "One").unwrap();
        assert_eq!(
            ctl.create_quiz(&s, "Two"),
            Err(CurriculumError::QuizExists(s.clone()))
        );
        ctl.update_quiz_field(&s, QuizField::PassingScore(80))
            .unwrap();
        assert_eq!(ctl.pending_operations_count(), 1);
    }

    #[tokio::test]
    async fn empty_commit_clears_dirty_flag() {
        let ctl = controller(Vec::new());
        let id = ctl.create_section("Temp");
        ctl.delete_section(&id).unwrap();
        assert!(ctl.has_unsaved_changes());

        let outcome = ctl.commit().await;
        assert_eq!(outcome, CommitOutcome::Committed { applied: 0 });
        assert!(!ctl.has_unsaved_changes());
        assert_eq!(ctl.service().call_count(), 0);
    }

    #[tokio::test]
    async fn veto_sends_nothing() {
        let ctl = controller(Vec::new());
        ctl.create_section("A");
        ctl.set_pre_commit_hook(|ops| ops.len() > 5);

        assert_eq!(
            ctl.commit().await,
            CommitOutcome::Aborted(AbortReason::Vetoed)
        );
        assert_eq!(ctl.service().call_count(), 0);
        assert_eq!(ctl.pending_operations_count(), 1);

        ctl.clear_pre_commit_hook();
        assert!(ctl.commit().await.is_success());
    }

    #[tokio::test]
    async fn pre_armed_abort_cancels_next_non_empty_commit() {
        let ctl = controller(Vec::new());
        ctl.abort_commit();

        // An empty commit does not consume the pre-armed abort.
        assert!(ctl.commit().await.is_success());

        ctl.create_section("A");
        assert_eq!(
            ctl.commit().await,
            CommitOutcome::Aborted(AbortReason::Cancelled)
        );
        assert_eq!(ctl.service().call_count(), 0);
        assert!(!ctl.has_failures());

        assert!(ctl.commit().await.is_success());
        assert_eq!(ctl.pending_operations_count(), 0);
    }

    #[tokio::test]
    async fn abort_after_every_call_settled_still_commits() {
        let ctl = Arc::new(controller(vec![Section::new(Id::persisted("s1"), "S", 0)]));
        let handle = Arc::downgrade(&ctl);
        ctl.service().on_answer(move |_| {
            if let Some(ctl) = handle.upgrade() {
                ctl.abort_commit();
            }
        });

        ctl.update_section_field(&Id::persisted("s1"), SectionField::Published(true))
            .unwrap();
        let outcome = ctl.commit().await;

        assert_eq!(outcome, CommitOutcome::Committed { applied: 1 });
        assert_eq!(ctl.pending_operations_count(), 0);
        assert!(!ctl.has_unsaved_changes());
        assert!(!ctl.tree().read().is_dirty());
        assert_eq!(ctl.stats().aborts, 0);
    }

    #[tokio::test]
    async fn save_basic_advanced_sends_dirty_fields_once() {
        let ctl = controller(Vec::new());
        let mut form = curriculum_model::MetadataForm::new(Fields::new());

        assert_eq!(ctl.save_basic_advanced(&mut form).await, Ok(false));

        form.set("title", "Rust 101");
        form.set("price", 49);
        ctl.service()
            .fail_times(Endpoint::UpdateCourse, 1, Failure::Reject("busy".into()));
        assert_eq!(
            ctl.save_basic_advanced(&mut form).await,
            Err(OperationError::rejected("busy"))
        );
        assert!(form.is_dirty());

        assert_eq!(ctl.save_basic_advanced(&mut form).await, Ok(true));
        assert!(!form.is_dirty());
        assert_eq!(ctl.service().calls_to(Endpoint::UpdateCourse).len(), 2);
        assert_eq!(ctl.pending_operations_count(), 0);
    }

    #[test]
    fn failed_reorder_leaves_sections_in_place() {
        let ctl = controller(vec![
            Section::new(Id::persisted("a"), "A", 0),
            Section::new(Id::persisted("b"), "B", 1),
        ]);
        let result = ctl.reorder_sections(&[Id::persisted("a"), Id::persisted("zz")]);
        assert!(matches!(result, Err(CurriculumError::InvalidOrder { .. })));
        assert_eq!(ctl.tree().read().sections().len(), 2);
        assert_eq!(ctl.pending_operations_count(), 0);
    }

    #[test]
    fn reorder_helper_reports_moved_only() {
        let items = vec![Id::persisted("a"), Id::persisted("b"), Id::persisted("c")];
        let ordered = vec![Id::persisted("a"), Id::persisted("c"), Id::persisted("b")];
        let mut items = items;
        let moved = reorder(&mut items, &ordered, |id| id, |_, _| {}).unwrap();
        assert_eq!(items, ordered);
        assert_eq!(
            moved,
            vec![(Id::persisted("c"), 1), (Id::persisted("b"), 2)]
        );
    }
}
