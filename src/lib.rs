//! # mayfly
//!
//! An embedded, multi-threaded execution pool for short-lived scripted
//! jobs. Submit script source or a pre-compiled bytecode blob together
//! with a completion callback; the pool dispatches it to one of several
//! long-lived worker threads, each of which owns an isolated scripting
//! runtime and a timer loop. When the job's synchronous body and all of
//! its pending asynchronous work (timers and microtasks) have drained,
//! the per-job execution context is destroyed and the completion callback
//! fires.
//!
//! The crate is generic over the scripting engine: implement
//! [`ScriptEngine`] for your engine of choice and hand the pool a
//! per-thread factory. Scripted `setTimeout` / `setInterval` /
//! `clearTimeout` / `clearInterval` calls re-enter the core through
//! [`TimerHost`], which owns timer ids, the per-runtime timer registry,
//! and context lifetime accounting.
//!
//! Key pieces:
//!
//! - [`Pool`]: worker threads, a bounded global queue, per-worker local
//!   queues, optional work-stealing, and optional dynamic sizing.
//! - [`WorkerRuntime`]: one per worker, multiplexing many short-lived
//!   execution contexts over a single engine instance bound to one timer
//!   loop, and owning the context-reclamation rules.
//! - [`ScriptEngine`] / [`NewEngine`]: the seam to the engine itself;
//!   evaluation, callback invocation, microtask stepping, and GC are
//!   engine concerns.
//!
//! Jobs never cross threads once picked up: each begins and ends in the
//! worker that ran it, and completion callbacks run on that worker.

pub mod engine;
mod eventloop;
pub mod pool;
mod queue;
mod registry;
pub mod runtime;
pub mod task;

#[cfg(test)]
pub mod test_utils;

pub use engine::{ContextId, HostError, NewEngine, ScriptEngine, TimerHost};
pub use pool::{Builder, Pool, PoolStats, ResizeError, ThreadStats};
pub use runtime::{EvalError, RuntimeStats, WorkerRuntime};
pub use task::{CompletionFn, SubmitError, TaskId, TaskOutcome, TaskReport};
