//! The generation orchestration engine
//!
//! Composes the fingerprint cache, per-provider rate limiters, provider
//! adapters, retry policy, and job state store into one dispatcher with a
//! bounded worker pool. Callers submit requests (single or batch) and get
//! handles they can query, await, or cancel.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod dispatcher;
mod error;
mod job;
mod retry;
mod store;

pub use dispatcher::{BatchHandle, Dispatcher, DispatcherSettings, JobHandle, SubmitOptions};
pub use error::EngineError;
pub use job::{BatchId, BatchSnapshot, BatchStatus, GenerationJob, JobId, JobStatus};
pub use retry::{RetryDecision, RetryPolicy};
pub use store::{JobStateStore, MemoryJobStore, StoreError};
