//! CLI command implementations.

pub mod clear_errors;
pub mod dismiss;
pub mod enqueue;
pub mod retry;
pub mod status;
pub mod sync;
