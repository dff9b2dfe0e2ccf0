//! Submission units and their completion reporting.

use std::fmt::{self, Debug};
use std::sync::Weak;
use std::time::{Duration, Instant};

use crate::pool::PoolShared;

/// Identifier assigned to a submission, unique within its pool.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// What a task asks the engine to run.
pub enum Payload {
    /// Script source text, evaluated as-is.
    Source(String),
    /// A pre-compiled blob the engine knows how to load.
    Bytecode(Vec<u8>),
}

/// Callback invoked exactly once when a task's execution context has been
/// destroyed and all of its resources released.
///
/// The callback runs on the worker thread that executed the task. It may
/// submit further work to the pool.
pub type CompletionFn = Box<dyn FnOnce(TaskReport) + Send + 'static>;

/// Delivered to the completion callback when a task is done.
#[derive(Clone, Copy, Debug)]
pub struct TaskReport {
    /// The id returned from the submission call.
    pub task_id: TaskId,
    /// Wall-clock duration of the synchronous script body. Timers and
    /// microtasks that ran after the body returned are not included.
    pub execution: Duration,
    /// Whether the script body ran to completion.
    pub outcome: TaskOutcome,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TaskOutcome {
    /// The script body evaluated without raising.
    Completed,
    /// Evaluation was refused (context capacity) or the script raised.
    Failed,
}

pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) payload: Payload,
    pub(crate) completion: Option<CompletionFn>,
    /// The pool this task reports completion to. Rewritten when a task is
    /// stolen so foreign submissions still report to the pool whose worker
    /// ran them.
    pub(crate) pool: Weak<PoolShared>,
    pub(crate) submitted_at: Instant,
}

impl Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.payload {
            Payload::Source(source) => format!("source[{}b]", source.len()),
            Payload::Bytecode(bytes) => format!("bytecode[{}b]", bytes.len()),
        };
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("payload", &kind)
            .finish()
    }
}

/// Errors returned synchronously from the submission API.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SubmitError {
    /// The input was rejected before queuing (empty bytecode, unknown
    /// worker for a routed submission).
    Refused,
    /// The bounded global queue stayed full for the entire bounded wait.
    QueueFull,
    /// The pool is shutting down and accepts no new work.
    ShutDown,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refused => f.write_str("submission refused"),
            Self::QueueFull => f.write_str("global queue is full"),
            Self::ShutDown => f.write_str("pool is shut down"),
        }
    }
}

impl std::error::Error for SubmitError {}
