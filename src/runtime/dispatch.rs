//! Batch dispatch machinery: the tracked worker pool and its task type.

mod pool;
mod queue;
mod task;

pub(crate) use pool::CompletionPool;
pub(crate) use task::{BatchTask, BeforeWriteHook, FailureMode};
