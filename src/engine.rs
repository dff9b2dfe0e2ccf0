//! The seam between the pool and the scripting engine it hosts.
//!
//! The pool never evaluates script itself; it owns the concurrency and
//! lifecycle machinery and reaches the engine through [`ScriptEngine`].
//! Each worker thread builds its own engine instance through a shared
//! [`NewEngine`] factory, so engine state never crosses threads.

use std::fmt::{self, Debug, Display};

use alot::LotId;

/// Identifies one execution context within a worker runtime.
///
/// The runtime hands this to the engine at context creation and the engine
/// echoes it back on every host call, so a scripted timer always attaches
/// to the context that armed it. Script cannot observe or forge the id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ContextId(pub(crate) LotId);

/// A scripting engine instance, owned by exactly one worker thread.
///
/// One engine hosts many short-lived contexts. All methods are called on
/// the owning thread only.
pub trait ScriptEngine: Sized + 'static {
    /// An owned reference to a script callback value. Cloning duplicates
    /// the engine-side reference; [`ScriptEngine::release`] drops one.
    type Callback: Clone;
    /// Raised by evaluation, invocation, or a microtask.
    type Error: Debug + Display;

    /// Creates engine-side state for a fresh context.
    fn create_context(&mut self, context: ContextId) -> Result<(), Self::Error>;

    /// Destroys a context's engine-side state. Every callback reference
    /// belonging to the context has already been released.
    fn destroy_context(&mut self, context: ContextId);

    /// Evaluates source text inside `context`. Scripted timer calls
    /// re-enter the core through `host`.
    fn eval_source(
        &mut self,
        context: ContextId,
        host: &mut dyn TimerHost<Self::Callback>,
        source: &str,
    ) -> Result<(), Self::Error>;

    /// Loads and runs a pre-compiled blob inside `context`.
    fn eval_bytecode(
        &mut self,
        context: ContextId,
        host: &mut dyn TimerHost<Self::Callback>,
        bytecode: &[u8],
    ) -> Result<(), Self::Error>;

    /// Invokes a stored callback value, e.g. when a timer fires.
    fn invoke(
        &mut self,
        context: ContextId,
        host: &mut dyn TimerHost<Self::Callback>,
        callback: &Self::Callback,
    ) -> Result<(), Self::Error>;

    /// Releases one engine-side reference to a callback value. Always
    /// called on the thread that owns the engine.
    fn release(&mut self, callback: Self::Callback);

    /// Runs a single pending engine-level job (a promise resolution or
    /// similar). Returns `Ok(false)` when none are pending.
    fn run_pending_job(
        &mut self,
        host: &mut dyn TimerHost<Self::Callback>,
    ) -> Result<bool, Self::Error>;

    /// Gives the engine a chance to collect garbage.
    fn collect_garbage(&mut self);
}

/// The core's surface the engine calls back into while script runs.
///
/// Bound to the worker runtime that issued the evaluation. The argument
/// checks the scripting side of `setTimeout`/`setInterval` must perform
/// (callable check, integer coercion) live in the engine; id assignment,
/// registration, and delay clamping live here.
pub trait TimerHost<C> {
    /// Arms a timer owned by `context` and returns its script-visible id.
    /// Negative delays are clamped to zero.
    fn set_timer(
        &mut self,
        context: ContextId,
        callback: C,
        delay_ms: i64,
        periodic: bool,
    ) -> Result<i32, HostError>;

    /// Cancels a timer by script-visible id. Unknown, fired, and
    /// already-cleared ids are ignored.
    fn clear_timer(&mut self, context: ContextId, timer: i32);
}

/// Raised when the engine hands the host a context it does not know.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HostError {
    UnknownContext,
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownContext => f.write_str("unknown execution context"),
        }
    }
}

impl std::error::Error for HostError {}

/// Per-thread engine factory, shared across the pool.
pub trait NewEngine<E>: Send + Sync + 'static {
    fn new_engine(&self) -> E;
}

impl<F, E> NewEngine<E> for F
where
    F: Fn() -> E + Send + Sync + 'static,
    E: ScriptEngine,
{
    fn new_engine(&self) -> E {
        self()
    }
}
