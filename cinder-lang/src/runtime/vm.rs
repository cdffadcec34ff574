//! The tree-walking virtual machine.
//!
//! Values held by the evaluator between two allocations are always reachable
//! from a root: the global scope, the active scopes, the temporary stack that
//! holds callees and evaluated arguments, the registry and the queue of pending
//! finalizers. The collector can therefore run whenever an allocation asks for
//! it. Finalizers are only run once no script code is executing.

use std::{cell::RefCell, rc::Rc};

use slotmap::SlotMap;

use super::{
    ErrorKind, RuntimeError,
    alloc::{AllocatorContext, AllocatorKind},
};
use crate::{
    ast::{Expr, ExprKind, Lambda, Literal},
    compiler,
    utils::{error::ReportableError, metadata::Location, metadata::Span},
};

pub mod builtin;
pub mod env;
pub mod heap;
pub mod value;

pub use env::{Env, EnvRef};
use heap::{BOX_BYTES, BoxObject, CLOSURE_BYTES, Closure, Heap, HeapObject, RegistryEntry};
pub use value::{BoxIdx, ClosureIdx, NativeIdx, RegistryKey, ThreadId, Value};

/// Bytes accounted for the machine itself, charged at construction.
const BASE_BYTES: usize = 1024;

pub type NativeFn = Rc<dyn Fn(&mut Machine, &[Value]) -> Result<Value, RuntimeError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GcMode {
    /// Full sweeps whenever the allocation debt reaches the threshold.
    Incremental,
    /// Young-only sweeps, with a full sweep every `major_every` collections.
    #[default]
    Generational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcPolicy {
    pub mode: GcMode,
    /// Allocation debt in bytes that triggers a collection step.
    pub threshold: usize,
    pub major_every: u32,
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self {
            mode: GcMode::default(),
            threshold: 64 * 1024,
            major_every: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    pub gc: GcPolicy,
    pub allocator: AllocatorKind,
    pub max_call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            gc: GcPolicy::default(),
            allocator: AllocatorKind::default(),
            max_call_depth: 128,
        }
    }
}

/// A stack frame as seen from outside the machine.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    pub name: String,
    /// Chunk name, or `[native]` for native functions.
    pub source: String,
    /// 1-based line currently executing in this frame, 0 for natives.
    pub line: usize,
}

/// Instrumentation called on every frame push and pop.
pub trait CallHook {
    fn on_enter(&mut self, frame: &FrameInfo);
    fn on_leave(&mut self, frame: &FrameInfo);
}

struct NativeEntry {
    name: Rc<str>,
    func: NativeFn,
}

struct ChunkInfo {
    name: Rc<str>,
    line_starts: Vec<usize>,
}

impl ChunkInfo {
    fn new(name: &str, src: &str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(src.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            name: Rc::from(name),
            line_starts,
        }
    }
    fn line(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&s| s <= offset)
    }
}

#[derive(Debug, Clone)]
struct Frame {
    name: Rc<str>,
    chunk: Option<usize>,
    /// Byte offset of the expression most recently called from this frame.
    offset: usize,
}

#[derive(Debug, Default)]
struct ThreadState {
    frames: Vec<Frame>,
}

pub struct Machine {
    config: VmConfig,
    heap: Heap,
    natives: SlotMap<NativeIdx, NativeEntry>,
    globals: EnvRef,
    chunks: Vec<ChunkInfo>,
    threads: SlotMap<ThreadId, ThreadState>,
    main_thread: ThreadId,
    current_thread: ThreadId,
    scopes: Vec<EnvRef>,
    temps: Vec<Value>,
    depth: usize,
    pending_finalizers: Vec<(Value, Value)>,
    running_finalizers: bool,
    allocator: Rc<RefCell<dyn AllocatorContext>>,
    hook: Option<Box<dyn CallHook>>,
    print: Option<Box<dyn FnMut(&str)>>,
    closed: bool,
}

fn literal(l: &Literal) -> Value {
    match l {
        Literal::Nil => Value::Nil,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Number(n) => Value::Number(*n),
        Literal::Str(s) => Value::Str(s.clone()),
    }
}

impl Machine {
    pub fn new(
        config: VmConfig,
        allocator: Rc<RefCell<dyn AllocatorContext>>,
    ) -> Result<Self, RuntimeError> {
        allocator
            .borrow_mut()
            .allocate(BASE_BYTES)
            .map_err(|e| RuntimeError::new(ErrorKind::OutOfMemory(e.to_string())))?;
        let mut threads = SlotMap::with_key();
        let main_thread = threads.insert(ThreadState::default());
        let mut machine = Self {
            config,
            heap: Heap::default(),
            natives: SlotMap::with_key(),
            globals: Env::root(),
            chunks: vec![],
            threads,
            main_thread,
            current_thread: main_thread,
            scopes: vec![],
            temps: vec![],
            depth: 0,
            pending_finalizers: vec![],
            running_finalizers: false,
            allocator,
            hook: None,
            print: None,
            closed: false,
        };
        builtin::install(&mut machine);
        log::debug!("machine created with {:?}", config.gc);
        Ok(machine)
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), RuntimeError> {
        if self.closed {
            Err(RuntimeError::new(ErrorKind::Closed))
        } else {
            Ok(())
        }
    }

    /// Compile `src` into a callable chunk. Nothing is executed.
    pub fn load(
        &mut self,
        src: &str,
        chunk_name: &str,
    ) -> Result<Value, Vec<Box<dyn ReportableError>>> {
        self.ensure_open()
            .map_err(|e| vec![Box::new(e) as Box<dyn ReportableError>])?;
        let lambda = compiler::compile(src, chunk_name)?;
        let chunk = self.chunks.len();
        self.chunks.push(ChunkInfo::new(chunk_name, src));
        let globals = self.globals.clone();
        self.alloc_closure(lambda, globals, chunk, true)
            .map_err(|e| vec![Box::new(e) as Box<dyn ReportableError>])
    }

    pub fn call(&mut self, f: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
        let thread = self.current_thread;
        self.call_on(thread, f, args)
    }

    /// Call `f` with `thread` as the current execution thread.
    pub fn call_on(
        &mut self,
        thread: ThreadId,
        f: &Value,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        self.ensure_open()?;
        if !self.threads.contains_key(thread) {
            return Err(RuntimeError::native(format!("unknown thread {thread:?}")));
        }
        let prev = std::mem::replace(&mut self.current_thread, thread);
        let base = self.temps.len();
        self.temps.push(f.clone());
        self.temps.extend_from_slice(args);
        let res = self.apply(f, args);
        self.temps.truncate(base);
        self.current_thread = prev;
        if self.depth == 0 {
            self.run_pending_finalizers();
        }
        res
    }

    pub fn spawn_thread(&mut self) -> ThreadId {
        self.threads.insert(ThreadState::default())
    }

    /// Forget a thread. The main thread and threads with live frames are kept.
    pub fn release_thread(&mut self, thread: ThreadId) -> bool {
        let busy = self
            .threads
            .get(thread)
            .is_none_or(|t| !t.frames.is_empty());
        if thread == self.main_thread || busy {
            return false;
        }
        self.threads.remove(thread).is_some()
    }

    pub fn main_thread(&self) -> ThreadId {
        self.main_thread
    }

    pub fn current_thread(&self) -> ThreadId {
        self.current_thread
    }

    /// Number of script and native calls currently executing on all threads.
    pub fn call_depth(&self) -> usize {
        self.depth
    }

    pub fn create_native(&mut self, name: &str, func: NativeFn) -> Value {
        Value::Native(self.natives.insert(NativeEntry {
            name: Rc::from(name),
            func,
        }))
    }

    /// Create a native function and bind it to the global `name`.
    pub fn register_native(&mut self, name: &str, func: NativeFn) -> Value {
        let v = self.create_native(name, func);
        self.set_global(name, v.clone());
        v
    }

    pub fn native_name(&self, idx: NativeIdx) -> Option<&str> {
        self.natives.get(idx).map(|n| &*n.name)
    }

    pub fn set_global(&mut self, name: &str, v: Value) {
        self.globals.borrow_mut().define(Rc::from(name), v);
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().vars.get(name).cloned()
    }

    pub fn registry_ref(&mut self, value: Value) -> RegistryKey {
        let key = self.heap.registry.insert(RegistryEntry { value, refcount: 1 });
        log::trace!("registry_ref: {key:?}");
        key
    }

    pub fn registry_get(&self, key: RegistryKey) -> Option<Value> {
        self.heap.registry.get(key).map(|e| e.value.clone())
    }

    pub fn registry_refcount(&self, key: RegistryKey) -> Option<u64> {
        self.heap.registry.get(key).map(|e| e.refcount)
    }

    pub fn registry_retain(&mut self, key: RegistryKey) -> bool {
        heap::registry_retain(&mut self.heap.registry, key)
    }

    pub fn registry_release(&mut self, key: RegistryKey) -> bool {
        heap::registry_release(&mut self.heap.registry, key)
    }

    pub fn registry_len(&self) -> usize {
        self.heap.registry.len()
    }

    pub fn new_box(&mut self, value: Value) -> Result<Value, RuntimeError> {
        self.charge(BOX_BYTES)?;
        let obj = HeapObject::new(
            BoxObject {
                value,
                finalizer: None,
            },
            BOX_BYTES,
        );
        Ok(Value::Box(self.heap.boxes.insert(obj)))
    }

    pub fn box_get(&self, idx: BoxIdx) -> Option<Value> {
        self.heap.boxes.get(idx).map(|o| o.data.value.clone())
    }

    pub fn box_set(&mut self, idx: BoxIdx, value: Value) -> bool {
        match self.heap.boxes.get_mut(idx) {
            Some(obj) => {
                obj.data.value = value;
                true
            }
            None => false,
        }
    }

    pub fn set_finalizer(&mut self, idx: BoxIdx, finalizer: Value) -> bool {
        match self.heap.boxes.get_mut(idx) {
            Some(obj) => {
                obj.data.finalizer = Some(finalizer);
                true
            }
            None => false,
        }
    }

    /// Live `(closures, boxes)`.
    pub fn object_count(&self) -> (usize, usize) {
        (self.heap.closures.len(), self.heap.boxes.len())
    }

    /// Bytes currently accounted to this machine's allocator context.
    pub fn memory_usage(&self) -> usize {
        self.allocator.borrow().in_use()
    }

    pub fn set_hook(&mut self, hook: Option<Box<dyn CallHook>>) -> Option<Box<dyn CallHook>> {
        std::mem::replace(&mut self.hook, hook)
    }

    pub fn has_hook(&self) -> bool {
        self.hook.is_some()
    }

    pub fn set_print_handler(&mut self, handler: Box<dyn FnMut(&str)>) {
        self.print = Some(handler);
    }

    pub fn print(&mut self, line: &str) {
        match self.print.as_mut() {
            Some(handler) => handler(line),
            None => println!("{line}"),
        }
    }

    /// Frames of `thread`, innermost first.
    pub fn stack_frames(&self, thread: ThreadId) -> Vec<FrameInfo> {
        self.threads
            .get(thread)
            .map(|t| t.frames.iter().rev().map(|f| self.frame_info(f)).collect())
            .unwrap_or_default()
    }

    fn frame_info(&self, frame: &Frame) -> FrameInfo {
        match frame.chunk.and_then(|c| self.chunks.get(c)) {
            Some(chunk) => FrameInfo {
                name: frame.name.to_string(),
                source: chunk.name.to_string(),
                line: chunk.line(frame.offset),
            },
            None => FrameInfo {
                name: frame.name.to_string(),
                source: "[native]".to_string(),
                line: 0,
            },
        }
    }

    /// Run one collection step as chosen by the configured policy and return
    /// the freed bytes. `extra` values are treated as roots.
    pub fn step_gc(&mut self, extra: &[Value]) -> usize {
        let young_only = match self.config.gc.mode {
            GcMode::Incremental => false,
            GcMode::Generational => {
                self.heap.minor_count += 1;
                if self.heap.minor_count >= self.config.gc.major_every {
                    self.heap.minor_count = 0;
                    false
                } else {
                    true
                }
            }
        };
        self.collect_with(extra, young_only)
    }

    /// Full collection.
    pub fn collect(&mut self, extra: &[Value]) -> usize {
        self.collect_with(extra, false)
    }

    fn collect_with(&mut self, extra: &[Value], young_only: bool) -> usize {
        if self.closed {
            return 0;
        }
        let mut roots = extra.to_vec();
        roots.extend(self.temps.iter().cloned());
        roots.extend(
            self.pending_finalizers
                .iter()
                .flat_map(|(f, v)| [f.clone(), v.clone()]),
        );
        let mut envs = self.scopes.clone();
        envs.push(self.globals.clone());
        self.heap.mark(roots, envs);
        let swept = self.heap.sweep(young_only);
        self.allocator.borrow_mut().deallocate(swept.freed_bytes);
        log::debug!(
            "{} collection freed {} objects ({} bytes)",
            if young_only { "minor" } else { "full" },
            swept.freed_objects,
            swept.freed_bytes
        );
        self.pending_finalizers.extend(swept.finalizers);
        if self.depth == 0 {
            self.run_pending_finalizers();
        }
        swept.freed_bytes
    }

    fn run_pending_finalizers(&mut self) {
        if self.running_finalizers || self.pending_finalizers.is_empty() {
            return;
        }
        self.running_finalizers = true;
        while !self.pending_finalizers.is_empty() {
            let (f, v) = self.pending_finalizers.remove(0);
            let thread = self.main_thread;
            if let Err(e) = self.call_on(thread, &f, &[v]) {
                log::warn!("error in finalizer: {e}");
                if e.is_fatal() {
                    break;
                }
            }
        }
        self.running_finalizers = false;
    }

    /// Run every outstanding finalizer and free all objects. Idempotent.
    ///
    /// Every accounted byte is reported back to the allocator context before
    /// this returns, so the context may be released afterwards.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let finalizers = self
            .heap
            .boxes
            .values_mut()
            .filter_map(|obj| {
                obj.data
                    .finalizer
                    .take()
                    .map(|f| (f, obj.data.value.clone()))
            })
            .collect::<Vec<_>>();
        self.pending_finalizers.extend(finalizers);
        self.run_pending_finalizers();
        self.closed = true;
        self.pending_finalizers.clear();
        let freed = self.heap.clear() + BASE_BYTES;
        self.globals.borrow_mut().vars.clear();
        self.scopes.clear();
        self.temps.clear();
        self.hook = None;
        self.allocator.borrow_mut().deallocate(freed);
        log::debug!("machine closed, released {freed} bytes");
    }

    fn charge(&mut self, bytes: usize) -> Result<(), RuntimeError> {
        self.heap.debt += bytes;
        if self.heap.debt >= self.config.gc.threshold {
            self.step_gc(&[]);
        }
        let first = self.allocator.borrow_mut().allocate(bytes);
        if first.is_ok() {
            return Ok(());
        }
        self.collect(&[]);
        let second = self.allocator.borrow_mut().allocate(bytes);
        second.map_err(|e| RuntimeError::new(ErrorKind::OutOfMemory(e.to_string())))
    }

    fn alloc_closure(
        &mut self,
        lambda: Rc<Lambda>,
        env: EnvRef,
        chunk: usize,
        is_chunk: bool,
    ) -> Result<Value, RuntimeError> {
        self.charge(CLOSURE_BYTES)?;
        let obj = HeapObject::new(
            Closure {
                lambda,
                env,
                chunk,
                is_chunk,
            },
            CLOSURE_BYTES,
        );
        Ok(Value::Closure(self.heap.closures.insert(obj)))
    }

    fn frames_mut(&mut self) -> Option<&mut Vec<Frame>> {
        self.threads.get_mut(self.current_thread).map(|t| &mut t.frames)
    }

    fn top_frame(&self) -> Option<&Frame> {
        self.threads
            .get(self.current_thread)
            .and_then(|t| t.frames.last())
    }

    fn enter_frame(&mut self, frame: Frame) -> Result<(), RuntimeError> {
        if self.depth >= self.config.max_call_depth {
            return Err(RuntimeError::new(ErrorKind::StackOverflow(self.depth)));
        }
        if self.hook.is_some() {
            let info = self.frame_info(&frame);
            if let Some(hook) = self.hook.as_mut() {
                hook.on_enter(&info);
            }
        }
        let frames = self
            .frames_mut()
            .ok_or_else(|| RuntimeError::new(ErrorKind::Corrupted("no current thread".into())))?;
        frames.push(frame);
        self.depth += 1;
        Ok(())
    }

    fn leave_frame(&mut self, res: Result<Value, RuntimeError>) -> Result<Value, RuntimeError> {
        let res = res.map_err(|mut e| {
            if e.traceback.is_empty() {
                e.traceback = self.stack_frames(self.current_thread);
            }
            e
        });
        let frame = self.frames_mut().and_then(|f| f.pop());
        self.depth = self.depth.saturating_sub(1);
        if let Some(frame) = frame
            && self.hook.is_some()
        {
            let info = self.frame_info(&frame);
            if let Some(hook) = self.hook.as_mut() {
                hook.on_leave(&info);
            }
        }
        res
    }

    fn apply(&mut self, f: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
        match f {
            Value::Closure(idx) => self.call_closure(*idx, args),
            Value::Native(idx) => self.call_native(*idx, args),
            other => Err(RuntimeError::new(ErrorKind::NotCallable(other.type_name()))),
        }
    }

    fn call_native(&mut self, idx: NativeIdx, args: &[Value]) -> Result<Value, RuntimeError> {
        let Some(entry) = self.natives.get(idx) else {
            return Err(RuntimeError::new(ErrorKind::Corrupted(format!(
                "dangling native {idx:?}"
            ))));
        };
        let (name, func) = (entry.name.clone(), entry.func.clone());
        self.enter_frame(Frame {
            name,
            chunk: None,
            offset: 0,
        })?;
        let res = func(self, args);
        self.leave_frame(res)
    }

    fn call_closure(&mut self, idx: ClosureIdx, args: &[Value]) -> Result<Value, RuntimeError> {
        let Some(obj) = self.heap.closures.get(idx) else {
            return Err(RuntimeError::new(ErrorKind::Corrupted(format!(
                "dangling closure {idx:?}"
            ))));
        };
        let Closure {
            lambda,
            env,
            chunk,
            is_chunk,
        } = obj.data.clone();
        let nparams = lambda.params.len();
        if args.len() < nparams || (lambda.rest.is_none() && args.len() > nparams) {
            let expected = if lambda.rest.is_some() {
                format!("at least {nparams}")
            } else {
                nparams.to_string()
            };
            return Err(RuntimeError::new(ErrorKind::Arity {
                name: lambda.display_name().to_string(),
                expected,
                got: args.len(),
            }));
        }
        let scope = if is_chunk {
            env
        } else {
            let scope = Env::child(&env);
            {
                let mut s = scope.borrow_mut();
                for (p, a) in lambda.params.iter().zip(args) {
                    s.define(p.clone(), a.clone());
                }
                if let Some(rest) = &lambda.rest {
                    s.define(rest.clone(), Value::list(args[nparams..].iter().cloned()));
                }
            }
            scope
        };
        self.enter_frame(Frame {
            name: Rc::from(lambda.display_name()),
            chunk: Some(chunk),
            offset: lambda.span.start,
        })?;
        self.scopes.push(scope.clone());
        let res = self.eval_body(&lambda.body, &scope);
        self.scopes.pop();
        self.leave_frame(res)
    }

    fn location(&self, span: &Span) -> Location {
        let path = self
            .top_frame()
            .and_then(|f| f.chunk)
            .and_then(|c| self.chunks.get(c))
            .map(|c| c.name.to_string())
            .unwrap_or_default();
        Location::new(span.clone(), path.into())
    }

    fn locate(&self, mut e: RuntimeError, span: &Span) -> RuntimeError {
        if e.location == Location::internal() {
            e.location = self.location(span);
        }
        e
    }

    fn set_call_site(&mut self, span: &Span) {
        if let Some(frame) = self.frames_mut().and_then(|f| f.last_mut()) {
            frame.offset = span.start;
        }
    }

    fn current_chunk(&self) -> usize {
        self.top_frame().and_then(|f| f.chunk).unwrap_or_default()
    }

    fn eval_body(&mut self, body: &[Expr], env: &EnvRef) -> Result<Value, RuntimeError> {
        let mut last = Value::Nil;
        for e in body {
            last = self.eval(e, env)?;
        }
        Ok(last)
    }

    fn eval(&mut self, expr: &Expr, env: &EnvRef) -> Result<Value, RuntimeError> {
        match &expr.kind {
            ExprKind::Literal(l) => Ok(literal(l)),
            ExprKind::Var(name) => Env::lookup(env, name).ok_or_else(|| {
                let e = RuntimeError::new(ErrorKind::UndefinedVariable(name.to_string()));
                self.locate(e, &expr.span)
            }),
            ExprKind::Define(name, value) => {
                let v = self.eval(value, env)?;
                env.borrow_mut().define(name.clone(), v);
                Ok(Value::Nil)
            }
            ExprKind::Set(name, value) => {
                let v = self.eval(value, env)?;
                if Env::assign(env, name, v) {
                    Ok(Value::Nil)
                } else {
                    let e = RuntimeError::new(ErrorKind::UndefinedVariable(name.to_string()));
                    Err(self.locate(e, &expr.span))
                }
            }
            ExprKind::If(cond, then, otherwise) => {
                if self.eval(cond, env)?.is_truthy() {
                    self.eval(then, env)
                } else if let Some(otherwise) = otherwise {
                    self.eval(otherwise, env)
                } else {
                    Ok(Value::Nil)
                }
            }
            ExprKind::Lambda(l) => {
                let chunk = self.current_chunk();
                self.alloc_closure(l.clone(), env.clone(), chunk, false)
                    .map_err(|e| self.locate(e, &expr.span))
            }
            ExprKind::Do(body) => self.eval_body(body, env),
            ExprKind::Let(binds, body) => {
                let scope = Env::child(env);
                self.scopes.push(scope.clone());
                let res = self.eval_let(binds, body, &scope);
                self.scopes.pop();
                res
            }
            ExprKind::While(cond, body) => {
                while self.eval(cond, env)?.is_truthy() {
                    self.eval_body(body, env)?;
                }
                Ok(Value::Nil)
            }
            ExprKind::And(items) => {
                let mut last = Value::Bool(true);
                for e in items {
                    last = self.eval(e, env)?;
                    if !last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            ExprKind::Or(items) => {
                let mut last = Value::Nil;
                for e in items {
                    last = self.eval(e, env)?;
                    if last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            ExprKind::Call(callee, args) => {
                let base = self.temps.len();
                let res = self.eval_call(callee, args, env, &expr.span, base);
                self.temps.truncate(base);
                res
            }
        }
    }

    fn eval_let(
        &mut self,
        binds: &[(Rc<str>, Expr)],
        body: &[Expr],
        scope: &EnvRef,
    ) -> Result<Value, RuntimeError> {
        for (name, e) in binds {
            let v = self.eval(e, scope)?;
            scope.borrow_mut().define(name.clone(), v);
        }
        self.eval_body(body, scope)
    }

    fn eval_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        env: &EnvRef,
        span: &Span,
        base: usize,
    ) -> Result<Value, RuntimeError> {
        self.set_call_site(span);
        let f = self.eval(callee, env)?;
        self.temps.push(f.clone());
        for a in args {
            let v = self.eval(a, env)?;
            self.temps.push(v);
        }
        self.set_call_site(span);
        let argv = self.temps[base + 1..].to_vec();
        self.apply(&f, &argv).map_err(|e| self.locate(e, span))
    }
}
