//! The per-thread execution substrate.
//!
//! A [`WorkerRuntime`] multiplexes many short-lived execution contexts
//! over a single scripting engine bound to one timer loop. A context is
//! created per task, lives while its synchronous body, microtasks, and
//! timers have work left, and is reclaimed exactly when it is flagged
//! `pending_free` with no timers outstanding. The task's completion
//! callback fires after reclamation, so it may safely submit more work.
//!
//! Everything here runs on the worker thread that owns the runtime; the
//! only cross-thread surface is the timer registry's mutex.

use std::fmt::{self, Debug, Display};
use std::thread;
use std::time::{Duration, Instant};

use alot::Lots;
use tracing::{error, warn};

use crate::engine::{ContextId, HostError, ScriptEngine, TimerHost};
use crate::eventloop::{EventLoop, HandleId};
use crate::registry::TimerRegistry;
use crate::task::{CompletionFn, TaskId, TaskOutcome, TaskReport};

/// Iteration cap on a single microtask drain, to defeat scripts that
/// queue themselves forever.
pub(crate) const MICROTASK_DRAIN_LIMIT: usize = 1000;

pub struct WorkerRuntime<E: ScriptEngine> {
    engine: E,
    timers: EventLoop<TimerRecord<E::Callback>>,
    registry: TimerRegistry,
    contexts: Lots<ContextRecord>,
    /// Live contexts in creation order.
    live: Vec<ContextId>,
    max_contexts: usize,
    next_timer_id: i32,
}

struct ContextRecord {
    task_id: TaskId,
    completion: Option<CompletionFn>,
    active_timers: usize,
    pending_free: bool,
    failed: bool,
    execution: Duration,
}

struct TimerRecord<C> {
    script_id: i32,
    owner: ContextId,
    callback: Option<C>,
    periodic: bool,
    delay: Duration,
}

/// Why an evaluation was not run to completion.
#[derive(Debug)]
pub enum EvalError<E> {
    /// The runtime is at its live-context cap.
    Capacity,
    /// The engine reported a compile or runtime error.
    Script(E),
}

impl<E: Display> fmt::Display for EvalError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capacity => f.write_str("context capacity reached"),
            Self::Script(error) => write!(f, "script error: {error}"),
        }
    }
}

impl<E: Debug + Display> std::error::Error for EvalError<E> {}

/// Point-in-time counters for one runtime.
#[derive(Clone, Copy, Debug)]
pub struct RuntimeStats {
    pub active_contexts: usize,
    pub max_contexts: usize,
    pub active_timers: usize,
}

impl<E: ScriptEngine> WorkerRuntime<E> {
    pub fn new(engine: E, max_contexts: usize) -> Self {
        Self {
            engine,
            timers: EventLoop::new(),
            registry: TimerRegistry::new(),
            contexts: Lots::new(),
            live: Vec::new(),
            max_contexts,
            next_timer_id: 1,
        }
    }

    /// Evaluates source text in a fresh context. The completion callback
    /// fires exactly once, after the context is reclaimed: immediately
    /// for a synchronous script, later if timers were armed.
    pub fn eval_source(
        &mut self,
        source: &str,
        task_id: TaskId,
        completion: Option<CompletionFn>,
    ) -> Result<(), EvalError<E::Error>> {
        self.eval_with(task_id, completion, |engine, context, host| {
            engine.eval_source(context, host, source)
        })
    }

    /// Evaluates a pre-compiled blob in a fresh context.
    pub fn eval_bytecode(
        &mut self,
        bytecode: &[u8],
        task_id: TaskId,
        completion: Option<CompletionFn>,
    ) -> Result<(), EvalError<E::Error>> {
        self.eval_with(task_id, completion, |engine, context, host| {
            engine.eval_bytecode(context, host, bytecode)
        })
    }

    fn eval_with(
        &mut self,
        task_id: TaskId,
        completion: Option<CompletionFn>,
        eval: impl FnOnce(&mut E, ContextId, &mut dyn TimerHost<E::Callback>) -> Result<(), E::Error>,
    ) -> Result<(), EvalError<E::Error>> {
        let context = self.new_context(task_id, completion)?;

        let started = Instant::now();
        let result = {
            let Self {
                engine,
                timers,
                registry,
                contexts,
                next_timer_id,
                ..
            } = self;
            let mut host = HostScope {
                timers,
                registry,
                contexts,
                next_timer_id,
            };
            eval(engine, context, &mut host)
        };
        if let Some(record) = self.contexts.get_mut(context.0) {
            record.execution = started.elapsed();
        }

        match result {
            Ok(()) => {
                self.drain_microtasks(context);
                let quiet = self
                    .contexts
                    .get(context.0)
                    .is_some_and(|record| record.active_timers == 0);
                if quiet {
                    self.engine.collect_garbage();
                    self.request_context_free(context);
                }
                Ok(())
            }
            Err(error) => {
                error!(task = %task_id, error = %error, "evaluation failed");
                if let Some(record) = self.contexts.get_mut(context.0) {
                    record.failed = true;
                    record.pending_free = true;
                }
                self.drain_microtasks(context);
                Err(EvalError::Script(error))
            }
        }
    }

    fn new_context(
        &mut self,
        task_id: TaskId,
        completion: Option<CompletionFn>,
    ) -> Result<ContextId, EvalError<E::Error>> {
        if self.live.len() >= self.max_contexts {
            warn!(max = self.max_contexts, "context capacity reached");
            if let Some(completion) = completion {
                completion(TaskReport {
                    task_id,
                    execution: Duration::ZERO,
                    outcome: TaskOutcome::Failed,
                });
            }
            return Err(EvalError::Capacity);
        }

        let context = ContextId(self.contexts.push(ContextRecord {
            task_id,
            completion,
            active_timers: 0,
            pending_free: false,
            failed: false,
            execution: Duration::ZERO,
        }));
        self.live.push(context);

        if let Err(error) = self.engine.create_context(context) {
            error!(task = %task_id, error = %error, "engine refused a new context");
            self.live.retain(|live| *live != context);
            if let Some(completion) = self
                .contexts
                .remove(context.0)
                .and_then(|record| record.completion)
            {
                completion(TaskReport {
                    task_id,
                    execution: Duration::ZERO,
                    outcome: TaskOutcome::Failed,
                });
            }
            return Err(EvalError::Script(error));
        }

        Ok(context)
    }

    /// Non-blocking single step of the timer loop: fires due timers,
    /// delivers pending closes, and returns the count of handles that
    /// still have work.
    pub fn run_loop_once(&mut self) -> usize {
        let due = self.timers.take_due(Instant::now());
        for handle in due {
            self.fire_timer(handle);
        }
        self.process_closed();
        self.timers.active_handles()
    }

    /// Runs the timer loop until no handles remain.
    pub fn run_loop(&mut self) {
        loop {
            if self.run_loop_once() == 0 {
                break;
            }
            let sleep = self
                .timers
                .next_due()
                .map(|due| due.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::from_millis(1));
            if !sleep.is_zero() {
                thread::sleep(sleep);
            }
        }
    }

    /// Flags a context for teardown; reclaims it immediately when no
    /// timers are outstanding, otherwise when the last timer resolves.
    pub fn request_context_free(&mut self, context: ContextId) {
        let Some(record) = self.contexts.get_mut(context.0) else {
            return;
        };
        record.pending_free = true;
        if record.active_timers == 0 {
            self.free_context(context);
        }
    }

    /// Cancels the context's timers, destroys the engine context, unlinks
    /// the record, then fires the completion callback.
    pub fn free_context(&mut self, context: ContextId) {
        self.cancel_context_timers(context);
        let Some(record) = self.contexts.remove(context.0) else {
            return;
        };
        self.live.retain(|live| *live != context);
        self.engine.destroy_context(context);

        // The callback runs after release so it can safely enqueue more
        // work against this runtime's pool.
        if let Some(completion) = record.completion {
            let outcome = if record.failed {
                TaskOutcome::Failed
            } else {
                TaskOutcome::Completed
            };
            completion(TaskReport {
                task_id: record.task_id,
                execution: record.execution,
                outcome,
            });
        }
    }

    /// Stops and tears down every timer owned by `context`, releasing the
    /// stored callbacks on this thread. Runs outside engine re-entry, so
    /// the close queue is bypassed.
    pub fn cancel_context_timers(&mut self, context: ContextId) {
        for (_, handle) in self.registry.take_owned(context) {
            self.timers.stop(handle);
            if let Some(mut record) = self.timers.remove(handle) {
                if let Some(callback) = record.callback.take() {
                    self.engine.release(callback);
                }
            }
        }
        if let Some(record) = self.contexts.get_mut(context.0) {
            record.active_timers = 0;
        }
    }

    pub fn live_contexts(&self) -> usize {
        self.live.len()
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            active_contexts: self.live.len(),
            max_contexts: self.max_contexts,
            active_timers: self.registry.len(),
        }
    }

    fn fire_timer(&mut self, handle: HandleId) {
        let (owner, periodic, delay, script_id, callback) = {
            let Some(record) = self.timers.payload(handle) else {
                return;
            };
            let Some(callback) = record.callback.clone() else {
                return;
            };
            (
                record.owner,
                record.periodic,
                record.delay,
                record.script_id,
                callback,
            )
        };

        {
            let Self {
                engine,
                timers,
                registry,
                contexts,
                next_timer_id,
                ..
            } = self;
            let mut host = HostScope {
                timers,
                registry,
                contexts,
                next_timer_id,
            };
            if let Err(error) = engine.invoke(owner, &mut host, &callback) {
                error!(timer = script_id, error = %error, "timer callback raised");
            }
            engine.release(callback);
        }

        if periodic {
            // The callback may have cleared its own interval.
            if self.timers.is_open(handle) && !self.timers.is_closing(handle) {
                self.timers.start(handle, delay);
            }
            return;
        }

        self.timers.stop(handle);
        self.timers.close(handle);
        self.drain_microtasks(owner);
    }

    fn process_closed(&mut self) {
        for mut record in self.timers.drain_closed() {
            self.registry.remove(record.script_id);
            if let Some(callback) = record.callback.take() {
                self.engine.release(callback);
            }
            let owner = record.owner;
            if let Some(context) = self.contexts.get_mut(owner.0) {
                context.active_timers = context.active_timers.saturating_sub(1);
                if context.active_timers == 0 {
                    context.pending_free = true;
                    self.drain_microtasks(owner);
                }
            }
        }
    }

    /// Runs pending engine jobs up to the drain cap, then reclaims the
    /// triggering context if it became eligible.
    fn drain_microtasks(&mut self, context: ContextId) {
        let mut ran = 0;
        loop {
            if ran >= MICROTASK_DRAIN_LIMIT {
                warn!(
                    limit = MICROTASK_DRAIN_LIMIT,
                    "microtask drain hit its iteration cap with jobs still pending"
                );
                break;
            }
            let Self {
                engine,
                timers,
                registry,
                contexts,
                next_timer_id,
                ..
            } = self;
            let mut host = HostScope {
                timers,
                registry,
                contexts,
                next_timer_id,
            };
            match engine.run_pending_job(&mut host) {
                Ok(true) => ran += 1,
                Ok(false) => break,
                Err(error) => {
                    error!(error = %error, "microtask raised");
                    ran += 1;
                }
            }
        }

        let eligible = self
            .contexts
            .get(context.0)
            .is_some_and(|record| record.pending_free && record.active_timers == 0);
        if eligible {
            self.free_context(context);
        }
    }
}

impl<E: ScriptEngine> Drop for WorkerRuntime<E> {
    fn drop(&mut self) {
        // Close every open handle and deliver the closes, which releases
        // callbacks, unwinds timer counts, and completes contexts whose
        // last timer was pending.
        for handle in self.timers.open_handles() {
            self.timers.stop(handle);
            self.timers.close(handle);
        }
        self.process_closed();

        // Anything the close walk missed (pathological state).
        let leftover = self.timers.open_count();
        if leftover > 0 {
            warn!(handles = leftover, "timer loop closed with residual handles");
            for (_, handle) in self.registry.drain_all() {
                if let Some(mut record) = self.timers.remove(handle) {
                    if let Some(callback) = record.callback.take() {
                        self.engine.release(callback);
                    }
                }
            }
        }

        for context in std::mem::take(&mut self.live) {
            self.free_context(context);
        }
        self.engine.collect_garbage();
    }
}

struct HostScope<'a, C> {
    timers: &'a mut EventLoop<TimerRecord<C>>,
    registry: &'a TimerRegistry,
    contexts: &'a mut Lots<ContextRecord>,
    next_timer_id: &'a mut i32,
}

impl<C: Clone> TimerHost<C> for HostScope<'_, C> {
    fn set_timer(
        &mut self,
        context: ContextId,
        callback: C,
        delay_ms: i64,
        periodic: bool,
    ) -> Result<i32, HostError> {
        let Some(record) = self.contexts.get_mut(context.0) else {
            return Err(HostError::UnknownContext);
        };
        let delay = Duration::from_millis(delay_ms.max(0) as u64);
        let script_id = next_script_id(self.registry, self.next_timer_id);
        let handle = self.timers.open(TimerRecord {
            script_id,
            owner: context,
            callback: Some(callback),
            periodic,
            delay,
        });
        self.registry.insert(script_id, handle, context);
        self.timers.start(handle, delay);
        record.active_timers += 1;
        Ok(script_id)
    }

    fn clear_timer(&mut self, _context: ContextId, timer: i32) {
        // The registry entry and the callback reference are torn down when
        // the close is delivered, on the owning thread.
        if let Some((handle, _)) = self.registry.find(timer) {
            self.timers.stop(handle);
            self.timers.close(handle);
        }
    }
}

/// Assigns the next script-visible timer id, wrapping from `i32::MAX`
/// back to 1 and skipping ids still live in the registry.
fn next_script_id(registry: &TimerRegistry, counter: &mut i32) -> i32 {
    loop {
        if *counter >= i32::MAX {
            *counter = 1;
        }
        let id = *counter;
        *counter += 1;
        if !registry.contains(id) {
            return id;
        }
    }
}
