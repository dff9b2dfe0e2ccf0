//! A deterministic scripting engine for exercising the pool.
//!
//! Scripts are a small command language, just enough to express timer
//! and microtask behaviour:
//!
//! ```text
//! set total 3; inc total
//! ticker = every 20 { inc n; when n 3 { clear ticker } }
//! after 50 { set hit 1 }
//! defer { set later 1 }
//! throw boom; sleep 200; spin
//! ```
//!
//! Variables are context-local, but every `set`/`inc` also publishes the
//! value to a [`ScriptedWorld`] shared across engines, so tests can assert
//! on script effects from the submitting thread. Callback values carry a
//! shared reference count, making release discipline checkable.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::engine::{ContextId, ScriptEngine, TimerHost};

/// State shared by every engine a test builds: script observations and
/// the live callback-reference count.
#[derive(Clone, Default)]
pub struct ScriptedWorld {
    observations: Arc<Mutex<HashMap<String, i64>>>,
    callback_refs: Arc<AtomicUsize>,
}

impl ScriptedWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_engine(&self) -> ScriptedEngine {
        ScriptedEngine::new(self.clone())
    }

    /// A `NewEngine` factory for pool builders.
    pub fn engine_factory(&self) -> impl Fn() -> ScriptedEngine + Clone + Send + Sync + 'static {
        let world = self.clone();
        move || ScriptedEngine::new(world.clone())
    }

    /// The last value a script assigned to `name`, if any.
    pub fn observed(&self, name: &str) -> Option<i64> {
        self.observations.lock().get(name).copied()
    }

    /// Outstanding engine-side callback references across all engines.
    pub fn live_callback_refs(&self) -> usize {
        self.callback_refs.load(Ordering::SeqCst)
    }
}

pub struct ScriptedEngine {
    world: ScriptedWorld,
    contexts: HashMap<ContextId, HashMap<String, i64>>,
    jobs: VecDeque<Job>,
}

struct Job {
    context: ContextId,
    kind: JobKind,
}

enum JobKind {
    Run(Arc<Block>),
    Spin,
}

type Block = Vec<Stmt>;

enum Stmt {
    Set(String, i64),
    Inc(String),
    Arm {
        var: Option<String>,
        delay: i64,
        periodic: bool,
        body: Arc<Block>,
    },
    When(String, i64, Arc<Block>),
    Clear(String),
    Throw(String),
    Sleep(u64),
    Defer(Arc<Block>),
    Spin,
}

/// A scripted callback value; clones track the engine-side refcount.
#[derive(Clone)]
pub struct ScriptedCallback {
    block: Arc<Block>,
    _ticket: RefTicket,
}

struct RefTicket(Arc<AtomicUsize>);

impl RefTicket {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Clone for RefTicket {
    fn clone(&self) -> Self {
        self.0.fetch_add(1, Ordering::SeqCst);
        Self(self.0.clone())
    }
}

impl Drop for RefTicket {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedError {
    message: String,
}

impl ScriptedError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ScriptedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ScriptedError {}

impl ScriptedEngine {
    pub fn new(world: ScriptedWorld) -> Self {
        Self {
            world,
            contexts: HashMap::new(),
            jobs: VecDeque::new(),
        }
    }

    fn run_block(
        &mut self,
        context: ContextId,
        host: &mut dyn TimerHost<ScriptedCallback>,
        block: &Block,
    ) -> Result<(), ScriptedError> {
        for stmt in block {
            match stmt {
                Stmt::Set(name, value) => self.assign(context, name, *value),
                Stmt::Inc(name) => {
                    let value = self.var(context, name) + 1;
                    self.assign(context, name, value);
                }
                Stmt::Arm {
                    var,
                    delay,
                    periodic,
                    body,
                } => {
                    let callback = ScriptedCallback {
                        block: body.clone(),
                        _ticket: RefTicket::new(&self.world.callback_refs),
                    };
                    let id = host
                        .set_timer(context, callback, *delay, *periodic)
                        .map_err(|error| ScriptedError::new(error.to_string()))?;
                    if let Some(var) = var {
                        self.assign(context, var, i64::from(id));
                    }
                }
                Stmt::When(name, value, body) => {
                    if self.var(context, name) == *value {
                        self.run_block(context, host, body)?;
                    }
                }
                Stmt::Clear(name) => {
                    let id = self.var(context, name);
                    host.clear_timer(context, id as i32);
                }
                Stmt::Throw(word) => return Err(ScriptedError::new(word.clone())),
                Stmt::Sleep(ms) => thread::sleep(Duration::from_millis(*ms)),
                Stmt::Defer(body) => self.jobs.push_back(Job {
                    context,
                    kind: JobKind::Run(body.clone()),
                }),
                Stmt::Spin => self.jobs.push_back(Job {
                    context,
                    kind: JobKind::Spin,
                }),
            }
        }
        Ok(())
    }

    fn assign(&mut self, context: ContextId, name: &str, value: i64) {
        if let Some(vars) = self.contexts.get_mut(&context) {
            vars.insert(name.to_owned(), value);
        }
        self.world.observations.lock().insert(name.to_owned(), value);
    }

    fn var(&self, context: ContextId, name: &str) -> i64 {
        self.contexts
            .get(&context)
            .and_then(|vars| vars.get(name))
            .copied()
            .unwrap_or(0)
    }
}

impl ScriptEngine for ScriptedEngine {
    type Callback = ScriptedCallback;
    type Error = ScriptedError;

    fn create_context(&mut self, context: ContextId) -> Result<(), Self::Error> {
        self.contexts.insert(context, HashMap::new());
        Ok(())
    }

    fn destroy_context(&mut self, context: ContextId) {
        self.contexts.remove(&context);
        self.jobs.retain(|job| job.context != context);
    }

    fn eval_source(
        &mut self,
        context: ContextId,
        host: &mut dyn TimerHost<Self::Callback>,
        source: &str,
    ) -> Result<(), Self::Error> {
        let block = parse(source)?;
        self.run_block(context, host, &block)
    }

    fn eval_bytecode(
        &mut self,
        context: ContextId,
        host: &mut dyn TimerHost<Self::Callback>,
        bytecode: &[u8],
    ) -> Result<(), Self::Error> {
        let source = std::str::from_utf8(bytecode)
            .map_err(|_| ScriptedError::new("bytecode is not valid utf-8"))?;
        self.eval_source(context, host, source)
    }

    fn invoke(
        &mut self,
        context: ContextId,
        host: &mut dyn TimerHost<Self::Callback>,
        callback: &Self::Callback,
    ) -> Result<(), Self::Error> {
        let block = callback.block.clone();
        self.run_block(context, host, &block)
    }

    fn release(&mut self, callback: Self::Callback) {
        drop(callback);
    }

    fn run_pending_job(
        &mut self,
        host: &mut dyn TimerHost<Self::Callback>,
    ) -> Result<bool, Self::Error> {
        let Some(job) = self.jobs.pop_front() else {
            return Ok(false);
        };
        if !self.contexts.contains_key(&job.context) {
            return Ok(true);
        }
        match job.kind {
            JobKind::Run(block) => self.run_block(job.context, host, &block)?,
            JobKind::Spin => self.jobs.push_back(Job {
                context: job.context,
                kind: JobKind::Spin,
            }),
        }
        Ok(true)
    }

    fn collect_garbage(&mut self) {}
}

fn parse(source: &str) -> Result<Block, ScriptedError> {
    let padded = source
        .replace(';', " ; ")
        .replace('{', " { ")
        .replace('}', " } ");
    let tokens: Vec<&str> = padded.split_whitespace().collect();
    let mut pos = 0;
    let block = parse_block(&tokens, &mut pos, false)?;
    Ok(block)
}

fn parse_block(tokens: &[&str], pos: &mut usize, nested: bool) -> Result<Block, ScriptedError> {
    let mut block = Vec::new();
    while *pos < tokens.len() {
        match tokens[*pos] {
            ";" => *pos += 1,
            "}" => {
                if nested {
                    *pos += 1;
                    return Ok(block);
                }
                return Err(ScriptedError::new("unexpected `}`"));
            }
            _ => block.push(parse_stmt(tokens, pos)?),
        }
    }
    if nested {
        return Err(ScriptedError::new("unterminated block"));
    }
    Ok(block)
}

fn parse_stmt(tokens: &[&str], pos: &mut usize) -> Result<Stmt, ScriptedError> {
    let word = next(tokens, pos)?;
    match word {
        "set" => Ok(Stmt::Set(next(tokens, pos)?.to_owned(), int(tokens, pos)?)),
        "inc" => Ok(Stmt::Inc(next(tokens, pos)?.to_owned())),
        "after" => parse_arm(tokens, pos, None, false),
        "every" => parse_arm(tokens, pos, None, true),
        "when" => {
            let name = next(tokens, pos)?.to_owned();
            let value = int(tokens, pos)?;
            let body = parse_body(tokens, pos)?;
            Ok(Stmt::When(name, value, body))
        }
        "clear" => Ok(Stmt::Clear(next(tokens, pos)?.to_owned())),
        "throw" => Ok(Stmt::Throw(next(tokens, pos)?.to_owned())),
        "sleep" => {
            let ms = int(tokens, pos)?;
            if ms < 0 {
                return Err(ScriptedError::new("sleep takes a non-negative duration"));
            }
            Ok(Stmt::Sleep(ms as u64))
        }
        "defer" => Ok(Stmt::Defer(parse_body(tokens, pos)?)),
        "spin" => Ok(Stmt::Spin),
        name => {
            // Assignment form: `id = after 50 { ... }`.
            let eq = next(tokens, pos)?;
            if eq != "=" {
                return Err(ScriptedError::new(format!("unknown statement `{name}`")));
            }
            let var = Some(name.to_owned());
            match next(tokens, pos)? {
                "after" => parse_arm(tokens, pos, var, false),
                "every" => parse_arm(tokens, pos, var, true),
                other => Err(ScriptedError::new(format!(
                    "can only assign timers, found `{other}`"
                ))),
            }
        }
    }
}

fn parse_arm(
    tokens: &[&str],
    pos: &mut usize,
    var: Option<String>,
    periodic: bool,
) -> Result<Stmt, ScriptedError> {
    let delay = int(tokens, pos)?;
    let body = parse_body(tokens, pos)?;
    Ok(Stmt::Arm {
        var,
        delay,
        periodic,
        body,
    })
}

fn parse_body(tokens: &[&str], pos: &mut usize) -> Result<Arc<Block>, ScriptedError> {
    let brace = next(tokens, pos)?;
    if brace != "{" {
        return Err(ScriptedError::new("expected `{`"));
    }
    Ok(Arc::new(parse_block(tokens, pos, true)?))
}

fn next<'a>(tokens: &[&'a str], pos: &mut usize) -> Result<&'a str, ScriptedError> {
    let token = tokens
        .get(*pos)
        .copied()
        .ok_or_else(|| ScriptedError::new("unexpected end of script"))?;
    *pos += 1;
    Ok(token)
}

fn int(tokens: &[&str], pos: &mut usize) -> Result<i64, ScriptedError> {
    let token = next(tokens, pos)?;
    token
        .parse()
        .map_err(|_| ScriptedError::new(format!("`{token}` is not an integer")))
}
