//! # Curriculum Engine
//!
//! Client-side mutation engine for curriculum documents.
//!
//! This crate provides:
//! - An operation queue with table-driven coalescing
//! - A pure phase planner (delete → create → update → reorder)
//! - A phased executor with bounded concurrency and identity resolution
//! - Cancellation tokens threaded into every remote call
//! - The persistence service abstraction and an in-memory implementation
//! - The controller facade used by the editing UI
//!
//! ## Architecture
//!
//! Edits are applied to the caller's document immediately and recorded as
//! operations. A commit then sends only the net changes:
//! 1. Normalize the queue (coalesce per entity)
//! 2. Plan phases so parents are created before their children
//! 3. Execute each phase, building payloads from the live document
//! 4. Record results and settle the queue
//!
//! ## Key Invariants
//!
//! - Nothing is sent for an entity created and deleted before a commit
//! - A child create always carries its section's server id
//! - One failed operation never aborts its siblings
//! - Edits queued while a commit is running are never dropped by it

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod coalesce;
mod config;
mod controller;
mod error;
mod executor;
mod outcome;
mod plan;
mod queue;
mod service;

pub use cancel::CancelToken;
pub use coalesce::{coalesce_rule, normalize, Rule};
pub use config::{EngineConfig, PartialFailurePolicy, RetryConfig};
pub use controller::{CommitStats, CurriculumController, PreCommitHook};
pub use error::{EngineResult, OperationError, ServiceError, ServiceResult};
pub use executor::Executor;
pub use outcome::{AbortReason, CommitOutcome};
pub use plan::{plan_phases, Dispatch, Phase, PhaseKind};
pub use queue::{OperationQueue, OperationResult, QueuedOperation};
pub use service::{
    CreatedRef, Endpoint, Failure, MemoryPersistence, PersistenceService, ServiceCall,
    ServiceResponse,
};
