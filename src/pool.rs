//! The multi-worker execution substrate.
//!
//! A [`Pool`] owns a set of long-lived worker threads. Each worker hosts
//! its own [`WorkerRuntime`] and pulls tasks from the pool-wide global
//! queue, then its local queue, then (when enabled) a random peer's
//! local queue. Completion flows back through the per-context teardown
//! path, which is also what wakes [`Pool::wait_for_idle`].

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_utils::sync::{Parker, Unparker};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::engine::{NewEngine, ScriptEngine};
use crate::queue::TaskQueue;
use crate::runtime::WorkerRuntime;
use crate::task::{CompletionFn, Payload, SubmitError, Task, TaskId, TaskReport};

/// How long an idle worker parks between timer-loop steps.
const IDLE_PARK: Duration = Duration::from_millis(10);
/// Pause between sizing decisions, to damp oscillation.
const ADJUSTER_DAMPING: Duration = Duration::from_secs(1);

/// Configures and starts a [`Pool`].
pub struct Builder<E: ScriptEngine> {
    new_engine: Arc<dyn NewEngine<E>>,
    threads: usize,
    max_contexts: usize,
    global_queue_limit: Option<usize>,
    local_queue_limit: Option<usize>,
    work_stealing: bool,
    dynamic_sizing: bool,
    idle_threshold: usize,
    thread_name: Option<String>,
}

impl<E: ScriptEngine> Builder<E> {
    fn new(new_engine: impl NewEngine<E>) -> Self {
        Self {
            new_engine: Arc::new(new_engine),
            threads: thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            max_contexts: 16,
            global_queue_limit: None,
            local_queue_limit: None,
            work_stealing: true,
            dynamic_sizing: false,
            idle_threshold: 2,
            thread_name: None,
        }
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// How many execution contexts one worker runtime may host at a time.
    pub fn max_contexts(mut self, max_contexts: usize) -> Self {
        self.max_contexts = max_contexts;
        self
    }

    pub fn global_queue_limit(mut self, limit: usize) -> Self {
        self.global_queue_limit = Some(limit);
        self
    }

    pub fn local_queue_limit(mut self, limit: usize) -> Self {
        self.local_queue_limit = Some(limit);
        self
    }

    pub fn work_stealing(mut self, enabled: bool) -> Self {
        self.work_stealing = enabled;
        self
    }

    /// Enables the sizing adjuster thread.
    pub fn dynamic_sizing(mut self, enabled: bool) -> Self {
        self.dynamic_sizing = enabled;
        self
    }

    /// Idle workers tolerated before the adjuster shrinks the pool.
    pub fn idle_threshold(mut self, threshold: usize) -> Self {
        self.idle_threshold = threshold;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    pub fn finish(self) -> Pool<E> {
        let threads = self.threads.max(1);
        let shared = Arc::new(PoolShared {
            shutdown: AtomicBool::new(false),
            global: TaskQueue::new(self.global_queue_limit),
            next_task_id: AtomicU64::new(0),
            total_tasks: AtomicU64::new(0),
            completed_tasks: AtomicU64::new(0),
            completed_execution_micros: AtomicU64::new(0),
            idle_workers: AtomicUsize::new(0),
            active_workers: AtomicUsize::new(0),
            workers: Mutex::new(Vec::with_capacity(threads)),
            wait_lock: Mutex::new(()),
            wait_cond: Condvar::new(),
            idle_lock: Mutex::new(()),
            idle_cond: Condvar::new(),
            adjuster_running: AtomicBool::new(false),
            config: PoolConfig {
                max_contexts: self.max_contexts,
                local_queue_limit: self.local_queue_limit,
                work_stealing: self.work_stealing,
                idle_threshold: self.idle_threshold,
                thread_name: self
                    .thread_name
                    .unwrap_or_else(|| String::from("mayfly-worker")),
            },
        });

        {
            let mut workers = shared.workers.lock();
            for id in 0..threads {
                workers.push(spawn_worker(&shared, &self.new_engine, id));
            }
        }
        shared.active_workers.store(threads, Ordering::Release);

        let adjuster = if self.dynamic_sizing {
            shared.adjuster_running.store(true, Ordering::Release);
            let thread_shared = shared.clone();
            let thread_engines = self.new_engine.clone();
            Some(
                thread::Builder::new()
                    .name(String::from("mayfly-adjuster"))
                    .spawn(move || adjuster_main(thread_shared, thread_engines))
                    .expect("error spawning adjuster thread"),
            )
        } else {
            None
        };

        Pool {
            shared,
            new_engine: self.new_engine,
            adjuster: Mutex::new(adjuster),
        }
    }
}

/// The multi-worker execution pool.
pub struct Pool<E: ScriptEngine> {
    shared: Arc<PoolShared>,
    new_engine: Arc<dyn NewEngine<E>>,
    adjuster: Mutex<Option<JoinHandle<()>>>,
}

impl<E: ScriptEngine> Pool<E> {
    pub fn builder(new_engine: impl NewEngine<E>) -> Builder<E> {
        Builder::new(new_engine)
    }

    /// Queues script source for execution. The completion callback fires
    /// exactly once, on the worker that ran the task, after the task's
    /// execution context has been reclaimed.
    pub fn submit_source(
        &self,
        source: impl Into<String>,
        completion: Option<CompletionFn>,
    ) -> Result<TaskId, SubmitError> {
        self.submit(Payload::Source(source.into()), completion, None)
    }

    /// Queues a pre-compiled blob for execution. Zero-length input is
    /// refused.
    pub fn submit_bytecode(
        &self,
        bytecode: impl Into<Vec<u8>>,
        completion: Option<CompletionFn>,
    ) -> Result<TaskId, SubmitError> {
        self.submit(Payload::Bytecode(bytecode.into()), completion, None)
    }

    /// Queues script source on a specific worker's local queue, bypassing
    /// the global queue. Peers may still steal it.
    pub fn submit_source_to(
        &self,
        worker: usize,
        source: impl Into<String>,
        completion: Option<CompletionFn>,
    ) -> Result<TaskId, SubmitError> {
        self.submit(Payload::Source(source.into()), completion, Some(worker))
    }

    fn submit(
        &self,
        payload: Payload,
        completion: Option<CompletionFn>,
        route: Option<usize>,
    ) -> Result<TaskId, SubmitError> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(SubmitError::ShutDown);
        }
        if let Payload::Bytecode(bytes) = &payload {
            if bytes.is_empty() {
                return Err(SubmitError::Refused);
            }
        }

        let id = TaskId(self.shared.next_task_id.fetch_add(1, Ordering::Relaxed) + 1);
        let task = Task {
            id,
            payload,
            completion,
            pool: Arc::downgrade(&self.shared),
            submitted_at: Instant::now(),
        };

        let enqueued = match route {
            None => self.shared.global.enqueue(task),
            Some(worker) => {
                let data = {
                    let workers = self.shared.workers.lock();
                    match workers.get(worker) {
                        Some(slot) if slot.active => slot.data.clone(),
                        _ => return Err(SubmitError::Refused),
                    }
                };
                data.local.enqueue(task)
            }
        };

        match enqueued {
            Ok(()) => {
                self.shared.total_tasks.fetch_add(1, Ordering::Relaxed);
                self.shared.unpark_all();
                Ok(id)
            }
            Err(_task) => Err(SubmitError::QueueFull),
        }
    }

    /// Blocks until the global queue is empty and every worker is idle,
    /// which implies every submitted task's completion callback has
    /// fired. Returns `false` if the timeout elapsed first.
    pub fn wait_for_idle(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let shared = &self.shared;
        let mut guard = shared.wait_lock.lock();
        loop {
            if shared.is_quiescent() {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    if shared.wait_cond.wait_until(&mut guard, deadline).timed_out() {
                        return shared.is_quiescent();
                    }
                }
                None => shared.wait_cond.wait(&mut guard),
            }
        }
    }

    /// Grows or shrinks the pool to `target` workers. Shrinking marks the
    /// highest-id workers to exit after their current task; their slots
    /// are retained and reused by later growth.
    pub fn resize(&self, target: usize) -> Result<(), ResizeError> {
        resize(&self.shared, &self.new_engine, target)
    }

    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        let completed = shared.completed_tasks.load(Ordering::Relaxed);
        let execution_micros = shared.completed_execution_micros.load(Ordering::Relaxed);
        let (busy_ms, idle_ms) = {
            let workers = shared.workers.lock();
            workers.iter().fold((0u64, 0u64), |(busy, idle), slot| {
                (
                    busy + slot.data.busy_time_ms.load(Ordering::Relaxed),
                    idle + slot.data.idle_time_ms.load(Ordering::Relaxed),
                )
            })
        };
        let tracked = busy_ms + idle_ms;
        PoolStats {
            active_threads: shared.active_workers.load(Ordering::Relaxed),
            idle_threads: shared.idle_workers.load(Ordering::Relaxed),
            queued_tasks: shared.global.len(),
            total_tasks: shared.total_tasks.load(Ordering::Relaxed),
            completed_tasks: completed,
            thread_utilization: if tracked == 0 {
                0.0
            } else {
                busy_ms as f64 / tracked as f64 * 100.0
            },
            avg_execution_time: if completed == 0 {
                Duration::ZERO
            } else {
                Duration::from_micros(execution_micros / completed)
            },
        }
    }

    pub fn thread_stats(&self, worker: usize) -> Option<ThreadStats> {
        let workers = self.shared.workers.lock();
        let slot = workers.get(worker)?;
        Some(ThreadStats {
            worker: slot.data.id,
            tasks_processed: slot.data.tasks_processed.load(Ordering::Relaxed),
            busy_time: Duration::from_millis(slot.data.busy_time_ms.load(Ordering::Relaxed)),
            idle_time: Duration::from_millis(slot.data.idle_time_ms.load(Ordering::Relaxed)),
            idle: slot.data.idle.load(Ordering::Relaxed),
        })
    }

    /// Stops pulling new work and joins every thread. In-flight contexts
    /// are drained by each runtime's teardown; queued tasks that never ran
    /// are dropped without their callbacks firing.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("pool shutting down");

        self.shared.adjuster_running.store(false, Ordering::Release);
        {
            let _guard = self.shared.idle_lock.lock();
            self.shared.idle_cond.notify_all();
        }
        if let Some(adjuster) = self.adjuster.lock().take() {
            let _ = adjuster.join();
        }

        self.shared.unpark_all();
        let joins: Vec<JoinHandle<()>> = {
            let mut workers = self.shared.workers.lock();
            workers.iter_mut().filter_map(|slot| slot.join.take()).collect()
        };
        for join in joins {
            let _ = join.join();
        }
        self.shared.notify_waiters();
    }
}

impl<E: ScriptEngine> Drop for Pool<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Point-in-time pool counters.
#[derive(Clone, Copy, Debug)]
pub struct PoolStats {
    pub active_threads: usize,
    pub idle_threads: usize,
    pub queued_tasks: usize,
    pub total_tasks: u64,
    pub completed_tasks: u64,
    /// Busy share of tracked worker time, in percent.
    pub thread_utilization: f64,
    /// Mean synchronous-body duration of completed tasks.
    pub avg_execution_time: Duration,
}

/// Point-in-time counters for one worker.
#[derive(Clone, Copy, Debug)]
pub struct ThreadStats {
    pub worker: usize,
    pub tasks_processed: u64,
    pub busy_time: Duration,
    pub idle_time: Duration,
    pub idle: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResizeError {
    /// A pool cannot shrink to zero workers.
    Invalid,
    ShutDown,
}

impl std::fmt::Display for ResizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid => f.write_str("a pool needs at least one worker"),
            Self::ShutDown => f.write_str("pool is shut down"),
        }
    }
}

impl std::error::Error for ResizeError {}

pub(crate) struct PoolShared {
    shutdown: AtomicBool,
    pub(crate) global: TaskQueue,
    next_task_id: AtomicU64,
    total_tasks: AtomicU64,
    completed_tasks: AtomicU64,
    completed_execution_micros: AtomicU64,
    idle_workers: AtomicUsize,
    active_workers: AtomicUsize,
    workers: Mutex<Vec<WorkerSlot>>,
    wait_lock: Mutex<()>,
    wait_cond: Condvar,
    idle_lock: Mutex<()>,
    idle_cond: Condvar,
    adjuster_running: AtomicBool,
    config: PoolConfig,
}

#[derive(Clone)]
struct PoolConfig {
    max_contexts: usize,
    local_queue_limit: Option<usize>,
    work_stealing: bool,
    idle_threshold: usize,
    thread_name: String,
}

struct WorkerSlot {
    data: Arc<ThreadData>,
    join: Option<JoinHandle<()>>,
    /// False once the slot's worker has been told to retire. The slot is
    /// kept so later growth can reuse its index.
    active: bool,
}

struct ThreadData {
    id: usize,
    idle: AtomicBool,
    retire: AtomicBool,
    tasks_processed: AtomicU64,
    idle_time_ms: AtomicU64,
    busy_time_ms: AtomicU64,
    local: TaskQueue,
    unparker: Unparker,
}

impl ThreadData {
    fn new(id: usize, local_limit: Option<usize>, unparker: Unparker) -> Self {
        Self {
            id,
            idle: AtomicBool::new(false),
            retire: AtomicBool::new(false),
            tasks_processed: AtomicU64::new(0),
            idle_time_ms: AtomicU64::new(0),
            busy_time_ms: AtomicU64::new(0),
            local: TaskQueue::new(local_limit),
            unparker,
        }
    }
}

impl PoolShared {
    pub(crate) fn note_completed(&self, report: &TaskReport) {
        self.completed_tasks.fetch_add(1, Ordering::Relaxed);
        self.completed_execution_micros
            .fetch_add(report.execution.as_micros() as u64, Ordering::Relaxed);
        self.notify_waiters();
    }

    fn is_quiescent(&self) -> bool {
        if self.global.len() != 0 {
            return false;
        }
        if self.idle_workers.load(Ordering::Acquire) < self.active_workers.load(Ordering::Acquire)
        {
            return false;
        }
        // Local queues count too, including queues on slots that are mid
        // retirement: their backlog is still work the pool owes a
        // completion callback for.
        let workers = self.workers.lock();
        workers.iter().all(|slot| slot.data.local.len() == 0)
    }

    fn notify_waiters(&self) {
        let _guard = self.wait_lock.lock();
        self.wait_cond.notify_all();
    }

    fn signal_idle(&self) {
        let _guard = self.idle_lock.lock();
        self.idle_cond.notify_one();
    }

    fn unpark_all(&self) {
        let workers = self.workers.lock();
        for slot in workers.iter() {
            slot.data.unparker.unpark();
        }
    }
}

fn spawn_worker<E: ScriptEngine>(
    shared: &Arc<PoolShared>,
    new_engine: &Arc<dyn NewEngine<E>>,
    id: usize,
) -> WorkerSlot {
    let parker = Parker::new();
    let data = Arc::new(ThreadData::new(
        id,
        shared.config.local_queue_limit,
        parker.unparker().clone(),
    ));
    let join = thread::Builder::new()
        .name(format!("{}-{id}", shared.config.thread_name))
        .spawn({
            let shared = shared.clone();
            let data = data.clone();
            let new_engine = new_engine.clone();
            move || worker_main(shared, data, new_engine, parker)
        })
        .expect("error spawning worker thread");
    WorkerSlot {
        data,
        join: Some(join),
        active: true,
    }
}

fn worker_main<E: ScriptEngine>(
    shared: Arc<PoolShared>,
    data: Arc<ThreadData>,
    new_engine: Arc<dyn NewEngine<E>>,
    parker: Parker,
) {
    debug!(worker = data.id, "worker starting");
    let mut runtime = WorkerRuntime::new(new_engine.new_engine(), shared.config.max_contexts);

    data.idle.store(true, Ordering::Release);
    shared.idle_workers.fetch_add(1, Ordering::AcqRel);
    shared.notify_waiters();
    let mut interval = Instant::now();

    loop {
        if shared.shutdown.load(Ordering::Acquire) || data.retire.load(Ordering::Acquire) {
            break;
        }

        let was_idle = data.idle.load(Ordering::Relaxed);
        let mut task = shared.global.dequeue();
        if task.is_none() {
            task = data.local.try_dequeue();
        }
        if task.is_none() && shared.config.work_stealing {
            task = steal(&shared, data.id);
        }

        match task {
            Some(task) => {
                if was_idle {
                    data.idle.store(false, Ordering::Release);
                    shared.idle_workers.fetch_sub(1, Ordering::AcqRel);
                    data.idle_time_ms
                        .fetch_add(interval.elapsed().as_millis() as u64, Ordering::Relaxed);
                    interval = Instant::now();
                }
                execute_task(&mut runtime, task);
                data.tasks_processed.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                // A worker only counts as idle once its runtime has no
                // live contexts: a context waiting on timers is still
                // unfinished work.
                if !was_idle && runtime.live_contexts() == 0 {
                    data.idle.store(true, Ordering::Release);
                    shared.idle_workers.fetch_add(1, Ordering::AcqRel);
                    data.busy_time_ms
                        .fetch_add(interval.elapsed().as_millis() as u64, Ordering::Relaxed);
                    interval = Instant::now();
                    shared.signal_idle();
                    shared.notify_waiters();
                }
                let pending = runtime.run_loop_once();
                if pending == 0 {
                    parker.park_timeout(IDLE_PARK);
                }
            }
        }
    }

    let tracked = interval.elapsed().as_millis() as u64;
    if data.idle.load(Ordering::Relaxed) {
        data.idle_time_ms.fetch_add(tracked, Ordering::Relaxed);
        shared.idle_workers.fetch_sub(1, Ordering::AcqRel);
    } else {
        data.busy_time_ms.fetch_add(tracked, Ordering::Relaxed);
    }

    // A retiring worker hands its unfinished local queue back to the
    // global queue so no task is stranded in the orphaned slot. At
    // shutdown queued tasks are dropped instead.
    if data.retire.load(Ordering::Acquire) && !shared.shutdown.load(Ordering::Acquire) {
        let mut requeued = 0usize;
        'drain: while let Some(mut task) = data.local.try_dequeue() {
            loop {
                match shared.global.enqueue(task) {
                    Ok(()) => break,
                    Err(returned) => {
                        if shared.shutdown.load(Ordering::Acquire) {
                            break 'drain;
                        }
                        task = returned;
                    }
                }
            }
            requeued += 1;
        }
        if requeued > 0 {
            debug!(worker = data.id, requeued, "requeued local tasks before retiring");
            shared.unpark_all();
        }
    }

    // Dropping the runtime cancels remaining timers and completes any
    // in-flight contexts.
    drop(runtime);
    debug!(worker = data.id, "worker exiting");
}

fn execute_task<E: ScriptEngine>(runtime: &mut WorkerRuntime<E>, task: Task) {
    let Task {
        id,
        payload,
        completion,
        pool,
        submitted_at,
    } = task;
    trace!(
        task = %id,
        queued_ms = submitted_at.elapsed().as_millis() as u64,
        "executing task"
    );

    let wrapped: CompletionFn = Box::new(move |report: TaskReport| {
        if let Some(pool) = pool.upgrade() {
            pool.note_completed(&report);
        }
        if let Some(completion) = completion {
            completion(report);
        }
    });

    let result = match payload {
        Payload::Source(source) => runtime.eval_source(&source, id, Some(wrapped)),
        Payload::Bytecode(bytes) => runtime.eval_bytecode(&bytes, id, Some(wrapped)),
    };
    if let Err(error) = result {
        debug!(task = %id, error = %error, "task evaluation failed");
    }

    // Give freshly-armed zero-delay timers a chance to fire promptly.
    runtime.run_loop_once();
}

/// Attempts to take one task from a random peer. Victims are never
/// blocked: their queue lock is only tried, idle victims are skipped, and
/// a victim always keeps at least one queued task.
fn steal(shared: &Arc<PoolShared>, thief: usize) -> Option<Task> {
    let workers = shared.workers.lock();
    if workers.len() < 2 {
        return None;
    }
    let start = fastrand::usize(..workers.len());
    for offset in 0..workers.len() {
        let slot = &workers[(start + offset) % workers.len()];
        if !slot.active || slot.data.id == thief || slot.data.idle.load(Ordering::Relaxed) {
            continue;
        }
        if let Some(mut task) = slot.data.local.try_steal() {
            trace!(thief, victim = slot.data.id, task = %task.id, "stole task");
            // The thief's pool is the one this task now reports to.
            task.pool = Arc::downgrade(shared);
            return Some(task);
        }
    }
    None
}

fn resize<E: ScriptEngine>(
    shared: &Arc<PoolShared>,
    new_engine: &Arc<dyn NewEngine<E>>,
    target: usize,
) -> Result<(), ResizeError> {
    if target == 0 {
        return Err(ResizeError::Invalid);
    }
    if shared.shutdown.load(Ordering::Acquire) {
        return Err(ResizeError::ShutDown);
    }

    // All sizing decisions are serialised on the workers lock; the slots
    // themselves are stable Arcs, so running workers never observe a
    // reallocated array.
    let mut workers = shared.workers.lock();
    let active = workers.iter().filter(|slot| slot.active).count();

    if target < active {
        let mut excess = active - target;
        for slot in workers.iter_mut().rev() {
            if excess == 0 {
                break;
            }
            if slot.active {
                debug!(worker = slot.data.id, "retiring worker");
                slot.active = false;
                slot.data.retire.store(true, Ordering::Release);
                slot.data.unparker.unpark();
                shared.active_workers.fetch_sub(1, Ordering::AcqRel);
                excess -= 1;
            }
        }
    } else {
        let mut needed = target - active;
        for index in 0..workers.len() {
            if needed == 0 {
                break;
            }
            if !workers[index].active {
                // Reuse a slot only once its previous occupant has fully
                // exited; until then the old worker may still be draining
                // its local queue back into the global queue.
                let exited = workers[index]
                    .join
                    .as_ref()
                    .map_or(true, JoinHandle::is_finished);
                if !exited {
                    continue;
                }
                debug!(worker = index, "reviving retired worker slot");
                if let Some(join) = workers[index].join.take() {
                    let _ = join.join();
                }
                workers[index] = spawn_worker(shared, new_engine, index);
                shared.active_workers.fetch_add(1, Ordering::AcqRel);
                needed -= 1;
            }
        }
        for _ in 0..needed {
            let id = workers.len();
            debug!(worker = id, "growing pool");
            workers.push(spawn_worker(shared, new_engine, id));
            shared.active_workers.fetch_add(1, Ordering::AcqRel);
        }
    }

    Ok(())
}

/// Waits for idle signals and nudges the pool size: shrink by one when
/// too many workers sit idle, grow by one when none are idle and work is
/// queued. Sleeps between decisions to damp oscillation.
fn adjuster_main<E: ScriptEngine>(shared: Arc<PoolShared>, new_engine: Arc<dyn NewEngine<E>>) {
    debug!("sizing adjuster started");
    loop {
        {
            let mut guard = shared.idle_lock.lock();
            if !shared.adjuster_running.load(Ordering::Acquire) {
                break;
            }
            shared.idle_cond.wait(&mut guard);
        }
        if !shared.adjuster_running.load(Ordering::Acquire) {
            break;
        }

        let idle = shared.idle_workers.load(Ordering::Acquire);
        let queued = shared.global.len();
        let active = shared.active_workers.load(Ordering::Acquire);

        let acted = if idle > shared.config.idle_threshold && active > 1 {
            debug!(idle, active, "adjuster shrinking pool");
            resize(&shared, &new_engine, active - 1).is_ok()
        } else if idle == 0 && queued > 0 {
            debug!(queued, active, "adjuster growing pool");
            resize(&shared, &new_engine, active + 1).is_ok()
        } else {
            false
        };
        if !acted {
            continue;
        }
        thread::sleep(ADJUSTER_DAMPING);
    }
    debug!("sizing adjuster stopped");
}
