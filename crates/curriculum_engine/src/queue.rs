//! Pending operation queue and execution results log.

use crate::coalesce;
use crate::error::OperationError;
use curriculum_model::{Action, EntityKey, Operation, ServerId};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// An operation waiting in the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedOperation {
    /// Sequence number, monotonically increasing per queue.
    pub seq: u64,
    /// The operation.
    pub operation: Operation,
}

/// Outcome of executing one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    /// The operation as it was executed.
    pub operation: Operation,
    /// Server id on a successful create, `None` for other successes.
    pub outcome: Result<Option<ServerId>, OperationError>,
}

impl OperationResult {
    /// Creates a successful result.
    pub fn succeeded(operation: Operation, server_id: Option<ServerId>) -> Self {
        Self {
            operation,
            outcome: Ok(server_id),
        }
    }

    /// Creates a failed result.
    pub fn failed(operation: Operation, error: OperationError) -> Self {
        Self {
            operation,
            outcome: Err(error),
        }
    }

    /// Returns true if the operation succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Returns the failure, if any.
    pub fn error(&self) -> Option<&OperationError> {
        self.outcome.as_ref().err()
    }

    /// Returns the server id assigned by a successful create.
    pub fn server_id(&self) -> Option<&ServerId> {
        self.outcome.as_ref().ok().and_then(Option::as_ref)
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Ok(_) => write!(f, "{}: ok", self.operation),
            Err(err) => write!(f, "{}: {}", self.operation, err),
        }
    }
}

/// Append-only buffer of pending operations plus an independent log of
/// execution results.
///
/// # Invariants
///
/// - Operations are kept in enqueue order
/// - The results log never decides what gets sent next
/// - Results accumulate across commits and retries
/// - Failures of an entity deleted locally no longer stand
/// - Entries handed to a running commit are frozen: edits never patch or
///   drop them, so a change made mid-commit is queued on its own
#[derive(Debug, Default)]
pub struct OperationQueue {
    entries: Vec<QueuedOperation>,
    next_seq: u64,
    /// Entries below this sequence number are in flight.
    frozen: u64,
    results: Vec<OperationResult>,
    /// Results of an entity below this index no longer stand as failures.
    dismissed: HashMap<EntityKey, usize>,
}

impl OperationQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a queue holding the given operations.
    pub fn from_operations(ops: impl IntoIterator<Item = Operation>) -> Self {
        let mut queue = Self::new();
        queue.push_multiple(ops);
        queue
    }

    /// Appends an operation. Returns its sequence number.
    pub fn push(&mut self, operation: Operation) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(QueuedOperation { seq, operation });
        seq
    }

    /// Appends several operations in order.
    pub fn push_multiple(&mut self, ops: impl IntoIterator<Item = Operation>) {
        for op in ops {
            self.push(op);
        }
    }

    /// Patches the first pending create matching `predicate`. Frozen
    /// entries are skipped.
    ///
    /// Returns false if no pending create matched.
    pub fn update_create_op<P, U>(&mut self, predicate: P, updater: U) -> bool
    where
        P: Fn(&Operation) -> bool,
        U: FnOnce(&mut Operation),
    {
        let frozen = self.frozen;
        match self
            .entries
            .iter_mut()
            .filter(|e| e.seq >= frozen)
            .find(|e| e.operation.action() == Action::Create && predicate(&e.operation))
        {
            Some(entry) => {
                updater(&mut entry.operation);
                true
            }
            None => false,
        }
    }

    /// Drops every pending create matching `predicate`. Frozen entries are
    /// kept.
    ///
    /// Returns false if none matched.
    pub fn remove_create_op<P>(&mut self, predicate: P) -> bool
    where
        P: Fn(&Operation) -> bool,
    {
        let frozen = self.frozen;
        let before = self.entries.len();
        self.entries.retain(|e| {
            e.seq < frozen
                || !(e.operation.action() == Action::Create && predicate(&e.operation))
        });
        self.entries.len() != before
    }

    /// Keeps only the operations matching `predicate`. Frozen entries are
    /// always kept.
    pub fn retain<P>(&mut self, predicate: P)
    where
        P: Fn(&Operation) -> bool,
    {
        let frozen = self.frozen;
        self.entries.retain(|e| e.seq < frozen || predicate(&e.operation));
    }

    /// Returns true if an unfrozen pending create exists for the entity.
    pub fn has_pending_create(&self, key: &EntityKey) -> bool {
        self.entries.iter().any(|e| {
            e.seq >= self.frozen
                && e.operation.action() == Action::Create
                && &e.operation.key() == key
        })
    }

    /// Returns the net operations to execute.
    pub fn normalize(&self) -> Vec<Operation> {
        coalesce::normalize(self.get_all())
    }

    /// Returns a copy of the pending operations.
    pub fn get_all(&self) -> Vec<Operation> {
        self.entries.iter().map(|e| e.operation.clone()).collect()
    }

    /// Returns the pending entries with their sequence numbers.
    pub fn entries(&self) -> &[QueuedOperation] {
        &self.entries
    }

    /// Sequence number the next push will receive.
    ///
    /// Entries below the watermark were queued before it was read.
    pub fn watermark(&self) -> u64 {
        self.next_seq
    }

    /// Freezes every current entry for a commit and returns the watermark.
    pub fn freeze(&mut self) -> u64 {
        self.frozen = self.next_seq;
        self.frozen
    }

    /// Releases frozen entries once the commit is over.
    pub fn thaw(&mut self) {
        self.frozen = 0;
    }

    /// Returns true while entries are frozen.
    pub fn is_frozen(&self) -> bool {
        self.frozen > 0
    }

    /// Removes entries queued before `watermark` unless their entity is in
    /// `keep`. Returns the number removed.
    pub fn acknowledge(&mut self, watermark: u64, keep: &HashSet<EntityKey>) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.seq >= watermark || keep.contains(&e.operation.key()));
        before - self.entries.len()
    }

    /// Removes entries queued before `watermark` whose entity is in
    /// `settled`. Returns the number removed.
    pub fn acknowledge_keys(&mut self, watermark: u64, settled: &HashSet<EntityKey>) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.seq >= watermark || !settled.contains(&e.operation.key()));
        before - self.entries.len()
    }

    /// Records an execution result.
    pub fn add_result(&mut self, result: OperationResult) {
        self.results.push(result);
    }

    /// Returns every recorded result in order.
    pub fn results(&self) -> &[OperationResult] {
        &self.results
    }

    /// Settles the standing failures of every operation matching
    /// `predicate`. Used when the entity they target is gone from the
    /// document, so no later attempt can ever succeed. Returns the number
    /// of failures dismissed.
    pub fn dismiss_failures<P>(&mut self, predicate: P) -> usize
    where
        P: Fn(&Operation) -> bool,
    {
        let cutoff = self.results.len();
        let keys: HashSet<EntityKey> = self
            .failed_results()
            .into_iter()
            .filter(|result| predicate(&result.operation))
            .map(|result| result.operation.key())
            .collect();
        let dismissed = keys.len();
        for key in keys {
            self.dismissed.insert(key, cutoff);
        }
        dismissed
    }

    /// Returns results still standing as failures: the latest result for
    /// the same entity and action is a failure that was not dismissed.
    pub fn failed_results(&self) -> Vec<OperationResult> {
        let mut latest: HashMap<(EntityKey, Action), usize> = HashMap::new();
        for (index, result) in self.results.iter().enumerate() {
            latest.insert(
                (result.operation.key(), result.operation.action()),
                index,
            );
        }

        let mut standing: Vec<usize> = latest
            .into_iter()
            .filter(|((key, _), index)| {
                self.dismissed
                    .get(key)
                    .map_or(true, |&cutoff| *index >= cutoff)
            })
            .map(|(_, index)| index)
            .filter(|&index| !self.results[index].is_success())
            .collect();
        standing.sort_unstable();
        standing
            .into_iter()
            .map(|index| self.results[index].clone())
            .collect()
    }

    /// Returns the operations still standing as failures.
    pub fn failed_ops(&self) -> Vec<Operation> {
        self.failed_results()
            .into_iter()
            .map(|result| result.operation)
            .collect()
    }

    /// Returns true if any operation is still standing as failed.
    pub fn has_failures(&self) -> bool {
        !self.failed_results().is_empty()
    }

    /// Drops all pending operations. Results are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drops the results log.
    pub fn clear_results(&mut self) {
        self.results.clear();
        self.dismissed.clear();
    }

    /// Returns the number of pending operations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curriculum_model::{Fields, Id, TempId};
    use serde_json::{json, Value};

    fn title(value: &str) -> Fields {
        match json!({ "title": value }) {
            Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    fn quiz_delete(id: &str) -> Operation {
        Operation::QuizDelete {
            section_id: Id::persisted("s1"),
            id: Id::persisted(id),
        }
    }

    #[test]
    fn push_assigns_sequence_numbers() {
        let mut queue = OperationQueue::new();
        assert_eq!(queue.push(quiz_delete("q1")), 0);
        assert_eq!(queue.push(quiz_delete("q2")), 1);
        assert_eq!(queue.watermark(), 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn update_create_op_patches_in_place() {
        let temp = TempId::new();
        let mut queue = OperationQueue::from_operations(vec![Operation::SectionCreate {
            temp_id: temp,
            order: 0,
            payload: title("Draft"),
        }]);

        let patched = queue.update_create_op(
            |op| op.creates(temp),
            |op| {
                if let Some(payload) = op.payload_mut() {
                    payload.insert("title".into(), json!("Final"));
                }
            },
        );
        assert!(patched);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get_all()[0].payload().unwrap()["title"], "Final");

        assert!(!queue.update_create_op(|op| op.creates(TempId::new()), |_| {}));
    }

    #[test]
    fn remove_create_op_only_removes_creates() {
        let temp = TempId::new();
        let mut queue = OperationQueue::from_operations(vec![
            Operation::SectionCreate {
                temp_id: temp,
                order: 0,
                payload: Fields::new(),
            },
            Operation::SectionUpdate {
                id: Id::Temporary(temp),
                payload: title("x"),
            },
        ]);
        assert!(queue.remove_create_op(|op| op.creates(temp)));
        assert_eq!(queue.len(), 1);
        assert!(!queue.remove_create_op(|op| op.creates(temp)));
    }

    #[test]
    fn get_all_is_a_copy() {
        let mut queue = OperationQueue::from_operations(vec![quiz_delete("q1")]);
        let mut copy = queue.get_all();
        copy.clear();
        assert_eq!(queue.len(), 1);
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn acknowledge_spares_late_and_kept_entries() {
        let mut queue = OperationQueue::new();
        queue.push(quiz_delete("q1"));
        queue.push(quiz_delete("q2"));
        let watermark = queue.watermark();
        queue.push(quiz_delete("q3"));

        let keep: HashSet<EntityKey> = [quiz_delete("q2").key()].into_iter().collect();
        let removed = queue.acknowledge(watermark, &keep);

        assert_eq!(removed, 1);
        let remaining: Vec<Id> = queue.get_all().iter().map(Operation::id).collect();
        assert_eq!(remaining, vec![Id::persisted("q2"), Id::persisted("q3")]);
    }

    #[test]
    fn frozen_entries_are_not_patched_or_dropped() {
        let temp = TempId::new();
        let mut queue = OperationQueue::from_operations(vec![Operation::SectionCreate {
            temp_id: temp,
            order: 0,
            payload: title("Draft"),
        }]);
        let key = queue.get_all()[0].key();

        let watermark = queue.freeze();
        assert!(queue.is_frozen());
        assert!(!queue.has_pending_create(&key));
        assert!(!queue.update_create_op(|op| op.creates(temp), |_| {}));
        assert!(!queue.remove_create_op(|op| op.creates(temp)));
        queue.retain(|_| false);
        assert_eq!(queue.len(), 1);

        queue.push(Operation::SectionUpdate {
            id: Id::Temporary(temp),
            payload: title("Late"),
        });
        queue.acknowledge(watermark, &HashSet::new());
        queue.thaw();

        let remaining = queue.get_all();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].action(), Action::Update);
    }

    #[test]
    fn acknowledge_keys_removes_only_settled_entities() {
        let mut queue = OperationQueue::from_operations(vec![quiz_delete("q1"), quiz_delete("q2")]);
        let watermark = queue.watermark();
        queue.push(quiz_delete("q1"));

        let settled: HashSet<EntityKey> = [quiz_delete("q1").key()].into_iter().collect();
        assert_eq!(queue.acknowledge_keys(watermark, &settled), 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn failures_clear_once_a_later_attempt_succeeds() {
        let mut queue = OperationQueue::new();
        let op = quiz_delete("q1");

        queue.add_result(OperationResult::failed(
            op.clone(),
            OperationError::rejected("server down"),
        ));
        assert!(queue.has_failures());
        assert_eq!(queue.failed_ops(), vec![op.clone()]);

        queue.add_result(OperationResult::succeeded(op, None));
        assert!(!queue.has_failures());
        assert_eq!(queue.results().len(), 2);
    }

    #[test]
    fn dismissed_failures_stop_standing_until_the_next_failure() {
        let mut queue = OperationQueue::new();
        let q1 = quiz_delete("q1");
        let q2 = quiz_delete("q2");
        queue.add_result(OperationResult::failed(
            q1.clone(),
            OperationError::rejected("server down"),
        ));
        queue.add_result(OperationResult::failed(
            q2.clone(),
            OperationError::rejected("server down"),
        ));

        assert_eq!(queue.dismiss_failures(|op| op.key() == q1.key()), 1);
        assert_eq!(queue.failed_ops(), vec![q2.clone()]);
        assert_eq!(queue.results().len(), 2);

        queue.add_result(OperationResult::failed(
            q1.clone(),
            OperationError::rejected("still down"),
        ));
        assert_eq!(queue.failed_ops(), vec![q2, q1]);
    }

    #[test]
    fn result_accessors() {
        let op = Operation::SectionCreate {
            temp_id: TempId::new(),
            order: 0,
            payload: Fields::new(),
        };
        let ok = OperationResult::succeeded(op.clone(), Some(ServerId::new("s9")));
        assert_eq!(ok.server_id(), Some(&ServerId::new("s9")));
        assert!(ok.error().is_none());

        let failed = OperationResult::failed(op, OperationError::Cancelled);
        assert!(!failed.is_success());
        assert!(failed.to_string().ends_with("operation cancelled"));
    }
}
