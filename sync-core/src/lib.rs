//! # sync-core
//!
//! Pure outbox logic (no I/O, instant tests).
//!
//! This crate implements the queue model and the decision functions of the
//! sync pipeline without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (remote calls, durable storage, timers) is performed by
//! `sync-client`, which consults these functions at each step.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod classify;
pub mod conflict;
pub mod lanes;
pub mod queue;

pub use backoff::RetryPolicy;
pub use classify::{classify, Classification};
pub use conflict::{resolve, Resolution};
pub use lanes::{lane_state, plan_lanes, Lane, LaneState};
pub use queue::{
    check_transition, complete_attempt, fail_attempt, interrupt_attempt, replace_payload,
    reset_retries, start_attempt, OperationQueue, QueueError,
};
