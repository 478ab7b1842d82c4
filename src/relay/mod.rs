//! The relay engine.
//!
//! This module contains the ordered request pipeline between the chat platform and the backend:
//! - A FIFO, single-consumer queue that never blocks producers.
//! - The tiered retry policy with credential rotation.
//! - The worker that serializes backend calls and delivers replies.

pub mod queue;
pub mod retry;
pub mod worker;

pub use queue::{EnqueueError, RelayQueue, RelayQueueEntry, RelayReceiver};
pub use retry::{RetryBudget, RetryPolicy};
pub use worker::{RelayWorker, WorkerState};
