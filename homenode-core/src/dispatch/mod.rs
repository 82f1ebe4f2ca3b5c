//! Outbound message queues and dispatch
//!
//! Each channel has a small de-duplicating queue of `(kind, param)`
//! items. On every tick the dispatcher takes the head item of a channel
//! whose transport is free, builds the message through the builder chain
//! and commits it.

pub mod dispatcher;
pub mod queue;

pub use dispatcher::{dispatch, Dispatched};
pub use queue::{MessageQueue, QueueItem, QUEUE_DEPTH};
