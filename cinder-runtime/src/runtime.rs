//! The runtime facade.
//!
//! [`ScriptRuntime`] owns one machine through a [`VmStateHolder`] and ties it
//! to the host. Every operation that enters the machine goes through
//! `with_vm`, which makes the runtime current for the duration of the call and
//! tears the runtime down when the machine reports a fatal error.
//!
//! The `*_in` methods do the same work against a machine that is already
//! borrowed. Natives use them, since they run while the state is held.

use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    path::PathBuf,
    rc::Rc,
    sync::atomic::{AtomicI32, Ordering},
};

use cinder_lang::{
    runtime::{
        RuntimeError,
        vm::{FrameInfo, Machine, RegistryKey, ThreadId, Value, builtin::native},
    },
    utils::error::dump_with_lines,
};
use itertools::Itertools;

use crate::{
    bookmark::{self, BookmarkScheduler, SCRIPT_TOKEN_BASE, ServicePass, Token},
    bridge::{RefTable, ScriptRef},
    current::{self, RuntimeScope},
    error::{Error, Result},
    host::*,
    loader::{self, LoadedScriptRegistry, SystemFiles},
    natives::{self, NativeResolver},
    payload::Payload,
    profiler::{self, ProfilerState, ProfilingMode},
    routines::Routines,
    scriptlib,
    state::VmStateHolder,
};

static NEXT_INSTANCE_ID: AtomicI32 = AtomicI32::new(1);

const PRELUDE: &str = "system:/prelude.cin";

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub lang: cinder_lang::Config,
    /// Directory searched for `system:/` scripts before the embedded ones.
    pub system_dir: Option<PathBuf>,
    /// Directory holding `natives_<build>.json` files.
    pub natives_dir: Option<PathBuf>,
    /// Natives build registered by `create`.
    pub natives_build: Option<String>,
}

/// Function waiting on a bookmark token.
struct Callback {
    key: RegistryKey,
    /// Thread spawned for this callback, released after it ran.
    thread: Option<ThreadId>,
}

pub(crate) struct RuntimeInner {
    id: i32,
    config: RuntimeConfig,
    system: SystemFiles,
    state: RefCell<Option<VmStateHolder>>,
    host: RefCell<Option<Rc<dyn ScriptHost>>>,
    routines: Routines,
    refs: RefCell<RefTable>,
    accepting_refs: Cell<bool>,
    /// Cleared when teardown starts so finalizers cannot queue more work.
    accepting_bookmarks: Cell<bool>,
    bookmarks: RefCell<BookmarkScheduler>,
    callbacks: RefCell<HashMap<Token, Callback>>,
    next_token: Cell<Token>,
    events: RefCell<HashMap<String, Vec<RegistryKey>>>,
    profiler: RefCell<ProfilerState>,
    natives: RefCell<NativeResolver>,
    scripts: RefCell<LoadedScriptRegistry>,
    /// Most recent first.
    running: RefCell<VecDeque<ThreadId>>,
    debug_listener: RefCell<Option<Rc<dyn DebugEventListener>>>,
    parent: RefCell<Option<Rc<dyn Any>>>,
}

/// Pops the running thread it pushed.
struct RunningThread<'a>(&'a RefCell<VecDeque<ThreadId>>);

impl Drop for RunningThread<'_> {
    fn drop(&mut self) {
        self.0.borrow_mut().pop_front();
    }
}

#[derive(Clone)]
pub struct ScriptRuntime {
    inner: Rc<RuntimeInner>,
}

impl ScriptRuntime {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let state = VmStateHolder::new(config.lang.vm)?;
        let id = NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!("runtime #{id} constructed");
        let inner = RuntimeInner {
            id,
            system: SystemFiles::new(config.system_dir.clone()),
            config,
            state: RefCell::new(Some(state)),
            host: RefCell::new(None),
            routines: Routines::default(),
            refs: RefCell::new(RefTable::default()),
            accepting_refs: Cell::new(true),
            accepting_bookmarks: Cell::new(true),
            bookmarks: RefCell::new(BookmarkScheduler::default()),
            callbacks: RefCell::new(HashMap::new()),
            next_token: Cell::new(SCRIPT_TOKEN_BASE),
            events: RefCell::new(HashMap::new()),
            profiler: RefCell::new(ProfilerState::default()),
            natives: RefCell::new(NativeResolver::default()),
            scripts: RefCell::new(LoadedScriptRegistry::default()),
            running: RefCell::new(VecDeque::new()),
            debug_listener: RefCell::new(None),
            parent: RefCell::new(None),
        };
        Ok(Self {
            inner: Rc::new(inner),
        })
    }

    /// The runtime whose operation is executing on this thread, if any.
    pub fn current() -> Option<ScriptRuntime> {
        current::current().map(|inner| ScriptRuntime { inner })
    }

    pub fn is_current(&self) -> bool {
        current::current().is_some_and(|c| Rc::ptr_eq(&c, &self.inner))
    }

    pub fn same_as(&self, other: &ScriptRuntime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn routines(&self) -> &Routines {
        &self.inner.routines
    }

    pub fn host(&self) -> Result<Rc<dyn ScriptHost>> {
        self.inner.host.borrow().clone().ok_or(Error::NotActive)
    }

    /// Whether the machine is still alive.
    pub fn is_active(&self) -> bool {
        self.inner
            .state
            .try_borrow()
            .map_or(true, |s| s.as_ref().is_some_and(|h| !h.is_closed()))
    }

    pub fn profiling_mode(&self) -> ProfilingMode {
        self.inner.profiler.borrow().mode()
    }

    pub fn is_profiling(&self) -> bool {
        self.inner.profiler.borrow().is_profiling()
    }

    pub fn running_thread(&self) -> Option<ThreadId> {
        self.inner.running.borrow().front().copied()
    }

    pub fn loaded_scripts(&self) -> Vec<String> {
        self.inner.scripts.borrow().loads().to_vec()
    }

    pub fn load_ids(&self, name: &str) -> Vec<u32> {
        self.inner.scripts.borrow().ids_for(name).to_vec()
    }

    pub fn pending_bookmarks(&self) -> usize {
        self.inner.bookmarks.borrow().len()
    }

    pub fn is_bookmark_pending(&self, token: Token) -> bool {
        self.inner.bookmarks.borrow().is_pending(token)
    }

    pub fn ref_count(&self) -> usize {
        self.inner.refs.borrow().len()
    }

    /// Run `f` against the machine with this runtime current.
    pub fn with_vm<T>(&self, f: impl FnOnce(&Self, &mut Machine) -> Result<T>) -> Result<T> {
        let _scope = RuntimeScope::enter(&self.inner);
        let res = {
            let mut state = self.inner.state.try_borrow_mut().map_err(|_| Error::Busy)?;
            let m = state
                .as_mut()
                .and_then(VmStateHolder::machine)
                .ok_or(Error::NotActive)?;
            f(self, m)
        };
        match &res {
            Err(e) if e.is_fatal() => {
                log::error!("runtime #{}: {e}", self.inner.id);
                if let Err(te) = self.teardown() {
                    log::warn!("runtime #{} could not tear down: {te}", self.inner.id);
                }
            }
            _ => self.schedule_pending_bookmarks(),
        }
        res
    }

    fn push_running(&self, thread: ThreadId) -> RunningThread<'_> {
        self.inner.running.borrow_mut().push_front(thread);
        RunningThread(&self.inner.running)
    }

    fn run_on(
        &self,
        m: &mut Machine,
        thread: ThreadId,
        f: &Value,
        args: &[Value],
    ) -> std::result::Result<Value, RuntimeError> {
        let _running = self.push_running(thread);
        m.call_on(thread, f, args)
    }

    pub fn trace(&self, message: &str) {
        match self.inner.host.borrow().as_ref() {
            Some(host) => host.trace(message),
            None => log::info!("{message}"),
        }
    }

    /// Report a script error and turn it into an [`Error`].
    fn script_error(&self, e: RuntimeError) -> Error {
        if e.is_fatal() {
            return Error::Fatal(e.to_string());
        }
        let script = e
            .traceback
            .iter()
            .find(|f| f.source != "[native]")
            .map(|f| f.source.clone())
            .unwrap_or_else(|| "[native]".to_string());
        let origin = match self.inner.scripts.borrow().ids_for(&script).last() {
            Some(id) => format!("{script} (load #{id})"),
            None => script.clone(),
        };
        let traceback = e
            .traceback
            .iter()
            .map(|f| format!("  at {} ({}:{})", f.name, f.source, f.line))
            .join("\n");
        self.trace(&format!("error in {origin}: {e}\n{traceback}"));
        let listener = self.inner.debug_listener.borrow().clone();
        if let Some(listener) = listener {
            listener.on_script_error(&script, &e.to_string());
        }
        Error::Script { script, source: e }
    }

    /// Stop bookmarks, reject references, then close the machine and its allocator.
    fn teardown(&self) -> Result<()> {
        let mut state = self.inner.state.try_borrow_mut().map_err(|_| Error::Busy)?;
        let Some(mut holder) = state.take() else {
            return Ok(());
        };
        drop(state);
        log::debug!("runtime #{} tearing down", self.inner.id);

        self.inner.accepting_bookmarks.set(false);
        self.inner.bookmarks.borrow_mut().clear();
        self.inner.callbacks.borrow_mut().clear();
        if let Some(bh) = self.host().ok().and_then(|h| h.bookmark_host()) {
            bh.remove_bookmarks(self.inner.id);
        }

        self.inner.accepting_refs.set(false);
        self.inner.refs.borrow_mut().clear();
        self.inner.events.borrow_mut().clear();

        let was_profiling = self.inner.profiler.borrow().mode() != ProfilingMode::None;
        self.inner.profiler.borrow_mut().reset();
        if was_profiling && let Some(sink) = self.host().ok().and_then(|h| h.profiler()) {
            sink.mode_changed(ProfilingMode::None);
        }

        {
            let _scope = RuntimeScope::enter(&self.inner);
            holder.close();
        }
        drop(holder);
        self.inner.natives.borrow_mut().clear();
        Ok(())
    }

    // ---- loading ----

    fn read_script(&self, name: &str) -> Result<String> {
        if loader::is_system(name) {
            self.inner.system.read(name)
        } else {
            loader::read_host_file(&*self.host()?, name)
        }
    }

    /// Compile `name` and run it as an entry point on the main thread.
    pub fn run_file(&self, name: &str) -> Result<()> {
        let src = self.read_script(name)?;
        self.with_vm(|rt, m| {
            let chunk = m.load(&src, name).map_err(|errs| {
                let message = dump_with_lines(&src, &errs);
                rt.trace(&format!("failed to load {name}:\n{message}"));
                Error::Load {
                    name: name.to_string(),
                    message,
                }
            })?;
            let id = rt.inner.scripts.borrow_mut().record(name);
            log::debug!("loaded {name} as #{id}");
            let listener = rt.inner.debug_listener.borrow().clone();
            if let Some(listener) = listener {
                listener.on_script_loaded(name, id);
            }
            let main = m.main_thread();
            rt.run_on(m, main, &chunk, &[])
                .map_err(|e| rt.script_error(e))?;
            Ok(())
        })
    }

    /// Register the names of `natives_<build>.json` and bind a global wrapper for each.
    pub fn load_natives_build(&self, build: &str) -> Result<()> {
        let dir = self.inner.config.natives_dir.clone().ok_or_else(|| Error::Io {
            name: format!("natives_{build}.json"),
            source: cinder_lang::utils::fileloader::Error::FileNotFound {
                message: "no natives directory configured".to_string(),
                path: PathBuf::new(),
            },
        })?;
        let decls = loader::read_natives_build(&dir, build)?;
        self.inner.natives.borrow_mut().register_build(&decls);
        self.with_vm(|_, m| {
            for decl in &decls {
                let hash = decl.hash;
                m.register_native(
                    &natives::script_name(&decl.name),
                    native(move |m: &mut Machine, args: &[Value]| {
                        let rt = scriptlib::current_runtime()?;
                        Ok(rt.invoke_native_in(m, hash, args)?)
                    }),
                );
            }
            Ok(())
        })
    }

    // ---- natives ----

    /// Whether `hash` was already reported missing since the machine was created.
    pub fn is_native_known_missing(&self, hash: u64) -> bool {
        self.inner.natives.borrow().is_known_missing(hash)
    }

    pub(crate) fn native_hash(&self, name: &str) -> Option<u64> {
        self.inner.natives.borrow().hash_for(name)
    }

    pub(crate) fn invoke_native_in(&self, m: &mut Machine, hash: u64, args: &[Value]) -> Result<Value> {
        let table = self.host()?.native_table();
        let handler = self
            .inner
            .natives
            .borrow_mut()
            .resolve(table.as_deref(), hash)?;
        let args = args
            .iter()
            .map(|v| self.value_to_payload(m, v))
            .collect::<Result<Vec<_>>>()?;
        let mut ctx = NativeContext {
            args,
            machine: &mut *m,
            runtime: self,
        };
        let out = handler(&mut ctx).map_err(|msg| Error::Script {
            script: "[native]".to_string(),
            source: RuntimeError::native(format!("native {hash:#018x}: {msg}")),
        })?;
        self.payload_to_value(m, out)
    }

    // ---- payload conversion ----

    /// Functions become script references. Boxes do not cross.
    pub fn value_to_payload(&self, m: &mut Machine, v: &Value) -> Result<Payload> {
        Ok(match v {
            Value::Nil => Payload::Nil,
            Value::Bool(b) => Payload::Bool(*b),
            Value::Number(n) => Payload::Number(*n),
            Value::Str(s) => Payload::String(s.to_string()),
            Value::List(items) => Payload::List(
                items
                    .iter()
                    .map(|i| self.value_to_payload(m, i))
                    .collect::<Result<_>>()?,
            ),
            Value::Closure(_) | Value::Native(_) => Payload::Ref(self.make_ref_in(m, v.clone())?),
            Value::Box(_) => return Err(Error::Payload("a box cannot cross the boundary".into())),
        })
    }

    pub fn payload_to_value(&self, m: &mut Machine, p: Payload) -> Result<Value> {
        Ok(match p {
            Payload::Nil => Value::Nil,
            Payload::Bool(b) => Value::Bool(b),
            Payload::Number(n) => Value::Number(n),
            Payload::String(s) => Value::from(s),
            Payload::List(items) => Value::list(
                items
                    .into_iter()
                    .map(|i| self.payload_to_value(m, i))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Payload::Ref(id) => self.inner.refs.borrow().get(m, id)?,
            Payload::Object(bytes) => match self.inner.routines.result_as_object() {
                Some(r) => r(m, &bytes).map_err(|e| self.script_error(e))?,
                None => Value::Nil,
            },
        })
    }

    fn unpack_values(&self, m: &mut Machine, payload: &[u8]) -> Result<Vec<Value>> {
        Payload::unpack(payload)?
            .into_iter()
            .map(|p| self.payload_to_value(m, p))
            .collect()
    }

    // ---- references ----

    fn check_refs(&self, id: ScriptRef) -> Result<()> {
        if self.inner.accepting_refs.get() {
            Ok(())
        } else {
            Err(Error::RefInvalid(id))
        }
    }

    pub(crate) fn make_ref_in(&self, m: &mut Machine, v: Value) -> Result<ScriptRef> {
        self.check_refs(0)?;
        Ok(self.inner.refs.borrow_mut().create(m, v))
    }

    pub fn call_ref_in(&self, m: &mut Machine, id: ScriptRef, payload: &[u8]) -> Result<Vec<u8>> {
        self.check_refs(id)?;
        let main = m.main_thread();
        if let Some(r) = self.inner.routines.call_ref() {
            let _running = self.push_running(main);
            return r(m, id, payload).map_err(|e| self.script_error(e));
        }
        let f = self.inner.refs.borrow().get(m, id)?;
        let args = self.unpack_values(m, payload)?;
        let out = self
            .run_on(m, main, &f, &args)
            .map_err(|e| self.script_error(e))?;
        let out = self.value_to_payload(m, &out)?;
        Payload::pack(&[out])
    }

    pub fn duplicate_ref_in(&self, m: &mut Machine, id: ScriptRef) -> Result<ScriptRef> {
        self.check_refs(id)?;
        if let Some(r) = self.inner.routines.duplicate_ref() {
            let _running = self.push_running(m.main_thread());
            return r(m, id).map_err(|e| self.script_error(e));
        }
        self.inner.refs.borrow_mut().duplicate(m, id)
    }

    pub fn remove_ref_in(&self, m: &mut Machine, id: ScriptRef) -> Result<()> {
        self.check_refs(id)?;
        if let Some(r) = self.inner.routines.delete_ref() {
            let _running = self.push_running(m.main_thread());
            return r(m, id).map_err(|e| self.script_error(e));
        }
        self.inner.refs.borrow_mut().delete(m, id)
    }

    /// Reference count shared by the aliases of a built-in reference.
    pub fn ref_refcount(&self, id: ScriptRef) -> Option<u64> {
        let state = self.inner.state.try_borrow().ok()?;
        let m = state.as_ref()?.machine_ref()?;
        self.inner.refs.borrow().refcount(m, id)
    }

    // ---- bookmarks ----

    pub(crate) fn next_token(&self) -> Token {
        let token = self.inner.next_token.get();
        self.inner.next_token.set(token + 1);
        token
    }

    /// Queue a host token. When it comes due it goes to the tick routine.
    ///
    /// Tokens from [`SCRIPT_TOKEN_BASE`] up belong to script timeouts and
    /// are refused.
    pub fn schedule_bookmark_soon(&self, token: Token, timeout_ms: u64) -> Result<()> {
        if bookmark::is_script_token(token) {
            return Err(Error::TokenReserved(token));
        }
        self.queue_bookmark(token, timeout_ms)
    }

    fn queue_bookmark(&self, token: Token, timeout_ms: u64) -> Result<()> {
        if !self.inner.accepting_bookmarks.get() {
            return Err(Error::NotActive);
        }
        self.inner
            .bookmarks
            .borrow_mut()
            .schedule_soon(token, timeout_ms);
        Ok(())
    }

    /// Queue `f` to run after `timeout_ms`, on `thread` if given.
    pub(crate) fn set_timeout_in(
        &self,
        m: &mut Machine,
        timeout_ms: u64,
        f: Option<Value>,
        thread: Option<ThreadId>,
    ) -> Result<Token> {
        if !self.inner.accepting_bookmarks.get() {
            return Err(Error::NotActive);
        }
        let token = self.next_token();
        if let Some(f) = f {
            let key = m.registry_ref(f);
            self.inner
                .callbacks
                .borrow_mut()
                .insert(token, Callback { key, thread });
        }
        self.queue_bookmark(token, timeout_ms)?;
        Ok(token)
    }

    pub(crate) fn clear_timeout_in(&self, m: &mut Machine, token: Token) -> bool {
        let pending = self.inner.bookmarks.borrow_mut().take(token);
        let callback = self.inner.callbacks.borrow_mut().remove(&token);
        if let Some(cb) = callback {
            m.registry_release(cb.key);
            if let Some(t) = cb.thread {
                m.release_thread(t);
            }
        }
        pending
    }

    /// Forward bookmarks scheduled since the last call to the host's bookmark sink.
    pub fn schedule_pending_bookmarks(&self) {
        let pending = self.inner.bookmarks.borrow_mut().drain_announcements();
        if pending.is_empty() {
            return;
        }
        let Some(bh) = self.host().ok().and_then(|h| h.bookmark_host()) else {
            return;
        };
        for (token, deadline) in pending {
            bh.schedule_bookmark(self.inner.id, token, deadline);
        }
    }

    /// Run the work attached to `token`. `Ok(false)` when there is none.
    fn execute_token(&self, m: &mut Machine, token: Token) -> Result<bool> {
        let callback = self.inner.callbacks.borrow_mut().remove(&token);
        if let Some(cb) = callback {
            let f = m.registry_get(cb.key);
            m.registry_release(cb.key);
            let thread = cb.thread.unwrap_or(m.main_thread());
            let res = match f {
                Some(f) => self.run_on(m, thread, &f, &[]),
                None => Ok(Value::Nil),
            };
            if let Some(t) = cb.thread {
                m.release_thread(t);
            }
            res.map_err(|e| self.script_error(e))?;
            return Ok(true);
        }
        let Some(tick) = self.inner.routines.tick() else {
            log::debug!("bookmark {token} has nothing to run");
            return Ok(false);
        };
        let profiling = self.is_profiling();
        let _running = self.push_running(m.main_thread());
        tick(m, token, profiling).map_err(|e| self.script_error(e))?;
        Ok(true)
    }

    pub(crate) fn run_bookmark_in(&self, m: &mut Machine, token: Token) -> Result<bool> {
        if !self.inner.bookmarks.borrow_mut().take(token) {
            return Ok(false);
        }
        self.execute_token(m, token)
    }

    /// Run one pending bookmark now, regardless of its deadline.
    ///
    /// Returns whether it ran successfully; unknown and already serviced
    /// tokens are not found.
    pub fn run_bookmark(&self, token: Token) -> bool {
        match self.with_vm(|rt, m| rt.run_bookmark_in(m, token)) {
            Ok(ran) => ran,
            Err(e) => {
                log::debug!("bookmark {token} failed: {e}");
                false
            }
        }
    }

    fn service_pending_in(&self, m: &mut Machine, now: u64) -> Result<()> {
        self.inner.bookmarks.borrow_mut().advance(now);
        let mut pass = ServicePass::default();
        loop {
            let next = self.inner.bookmarks.borrow_mut().pop_due(now);
            let Some((token, when)) = next else {
                break;
            };
            if !pass.admit(token, when) {
                continue;
            }
            match self.execute_token(m, token) {
                Err(e) if e.is_fatal() => return Err(e),
                // already traced
                Err(_) | Ok(_) => {}
            }
        }
        log::trace!("serviced {} bookmarks at {now}", pass.serviced());
        pass.finish(&mut self.inner.bookmarks.borrow_mut());
        Ok(())
    }

    /// Run every bookmark due at `now_ms`, in deadline order.
    pub fn service_pending(&self, now_ms: u64) -> Result<()> {
        self.with_vm(|rt, m| rt.service_pending_in(m, now_ms))
    }

    // ---- events ----

    pub(crate) fn add_event_handler_in(&self, m: &mut Machine, name: &str, f: Value) -> Result<()> {
        if !self.inner.accepting_bookmarks.get() {
            return Err(Error::NotActive);
        }
        let key = m.registry_ref(f);
        self.inner
            .events
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .push(key);
        Ok(())
    }

    fn trigger_event_in(&self, m: &mut Machine, name: &str, payload: &[u8], source: &str) -> Result<()> {
        let main = m.main_thread();
        if let Some(r) = self.inner.routines.event() {
            let _running = self.push_running(main);
            return r(m, name, payload, source).map_err(|e| self.script_error(e));
        }
        let handlers = self
            .inner
            .events
            .borrow()
            .get(name)
            .map(|keys| keys.iter().filter_map(|k| m.registry_get(*k)).collect_vec())
            .unwrap_or_default();
        if handlers.is_empty() {
            return Ok(());
        }
        let args = self.unpack_values(m, payload)?;
        m.set_global("event-source", Value::from(source));
        let mut first_error = None;
        for h in handlers {
            if let Err(e) = self.run_on(m, main, &h, &args) {
                let e = self.script_error(e);
                if e.is_fatal() {
                    first_error = Some(e);
                    break;
                }
                first_error.get_or_insert(e);
            }
        }
        m.set_global("event-source", Value::Nil);
        first_error.map_or(Ok(()), Err)
    }

    // ---- introspection ----

    pub fn walk_stack_in(&self, m: &mut Machine, start: usize, end: usize) -> Result<Vec<FrameInfo>> {
        if let Some(r) = self.inner.routines.stack_trace() {
            return r(m, start, end).map_err(|e| self.script_error(e));
        }
        let thread = self.running_thread().unwrap_or(m.main_thread());
        Ok(m
            .stack_frames(thread)
            .into_iter()
            .skip(start)
            .take(end.saturating_sub(start))
            .collect())
    }

    fn start_profiling(&self) -> bool {
        let _scope = RuntimeScope::enter(&self.inner);
        let Some(sink) = self.host().ok().and_then(|h| h.profiler()) else {
            self.emit_warning("profiler", "the host has no profiler sink");
            return false;
        };
        if let Err(e) = self.inner.profiler.borrow_mut().advance(ProfilingMode::Setup) {
            self.emit_warning("profiler", &e.to_string());
            return false;
        }
        sink.mode_changed(ProfilingMode::Setup);
        let active = self.inner.profiler.borrow().active_flag();
        let resource = self.host().map(|h| h.resource_name()).unwrap_or_default();
        let timeline = format!("{resource} (cinder #{})", self.inner.id);
        match self.with_vm(|_, m| profiler::install(m, sink.clone(), active, &timeline)) {
            Ok(inst) => {
                let mut p = self.inner.profiler.borrow_mut();
                p.set_instrumentation(Some(inst));
                let res = p.advance(ProfilingMode::Profiling);
                drop(p);
                sink.mode_changed(ProfilingMode::Profiling);
                res.is_ok()
            }
            Err(e) => {
                self.inner.profiler.borrow_mut().rollback();
                sink.mode_changed(ProfilingMode::None);
                self.emit_warning("profiler", &format!("could not start profiling: {e}"));
                false
            }
        }
    }

    fn stop_profiling(&self) -> bool {
        let _scope = RuntimeScope::enter(&self.inner);
        let sink = self.host().ok().and_then(|h| h.profiler());
        if let Err(e) = self.inner.profiler.borrow_mut().advance(ProfilingMode::Shutdown) {
            self.emit_warning("profiler", &e.to_string());
            return false;
        }
        if let Some(sink) = &sink {
            sink.mode_changed(ProfilingMode::Shutdown);
        }
        let inst = self.inner.profiler.borrow().instrumentation();
        if let Some(inst) = inst
            && let Err(e) = self.with_vm(|_, m| {
                profiler::uninstall(m, sink.as_ref(), inst);
                Ok(())
            })
        {
            log::warn!("profiler shutdown without a machine: {e}");
        }
        let mut p = self.inner.profiler.borrow_mut();
        p.set_instrumentation(None);
        let res = p.advance(ProfilingMode::None);
        drop(p);
        if let Some(sink) = &sink {
            sink.mode_changed(ProfilingMode::None);
        }
        res.is_ok()
    }
}

impl Runtime for ScriptRuntime {
    fn create(&self, host: Rc<dyn ScriptHost>) -> Result<()> {
        if self.inner.host.borrow().is_some() {
            return Err(Error::AlreadyCreated);
        }
        *self.inner.host.borrow_mut() = Some(host.clone());
        self.with_vm(|_, m| {
            m.set_print_handler(Box::new(move |line: &str| host.trace(line)));
            scriptlib::install(m);
            Ok(())
        })?;
        if let Some(build) = self.inner.config.natives_build.clone() {
            self.load_natives_build(&build)?;
        }
        self.run_file(PRELUDE)?;
        log::debug!("runtime #{} created", self.inner.id);
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        self.teardown()?;
        *self.inner.debug_listener.borrow_mut() = None;
        log::debug!("runtime #{} destroyed", self.inner.id);
        Ok(())
    }

    fn instance_id(&self) -> i32 {
        self.inner.id
    }

    fn parent_object(&self) -> Option<Rc<dyn Any>> {
        self.inner.parent.borrow().clone()
    }

    fn set_parent_object(&self, parent: Option<Rc<dyn Any>>) {
        *self.inner.parent.borrow_mut() = parent;
    }
}

impl FileHandlingRuntime for ScriptRuntime {
    fn handles_file(&self, name: &str) -> bool {
        name.ends_with(".cin")
    }

    fn load_file(&self, name: &str) -> Result<()> {
        self.run_file(name)
    }
}

impl TickRuntimeWithBookmarks for ScriptRuntime {
    fn tick(&self, now_ms: u64) -> Result<()> {
        self.service_pending(now_ms)
    }

    fn tick_bookmarks(&self, tokens: &[u64]) -> Result<()> {
        self.with_vm(|rt, m| {
            for &token in tokens {
                match rt.run_bookmark_in(m, token) {
                    Err(e) if e.is_fatal() => return Err(e),
                    Ok(false) => log::debug!("bookmark {token} is not pending"),
                    _ => {}
                }
            }
            Ok(())
        })
    }
}

impl EventRuntime for ScriptRuntime {
    fn trigger_event(&self, name: &str, payload: &[u8], source: &str) -> Result<()> {
        self.with_vm(|rt, m| rt.trigger_event_in(m, name, payload, source))
    }
}

impl RefRuntime for ScriptRuntime {
    fn call_ref(&self, id: ScriptRef, payload: &[u8]) -> Result<Vec<u8>> {
        self.check_refs(id)?;
        self.with_vm(|rt, m| rt.call_ref_in(m, id, payload))
    }

    fn duplicate_ref(&self, id: ScriptRef) -> Result<ScriptRef> {
        self.check_refs(id)?;
        self.with_vm(|rt, m| rt.duplicate_ref_in(m, id))
    }

    fn remove_ref(&self, id: ScriptRef) -> Result<()> {
        self.check_refs(id)?;
        self.with_vm(|rt, m| rt.remove_ref_in(m, id))
    }
}

impl MemInfoRuntime for ScriptRuntime {
    fn request_memory_usage(&self) -> Result<()> {
        self.with_vm(|_, m| {
            m.collect(&[]);
            Ok(())
        })
    }

    fn memory_usage(&self) -> Result<usize> {
        self.with_vm(|_, m| Ok(m.memory_usage()))
    }
}

impl StackWalkingRuntime for ScriptRuntime {
    fn walk_stack(&self, start: usize, end: usize, visitor: &mut dyn StackWalkVisitor) -> Result<()> {
        let frames = self.with_vm(|rt, m| rt.walk_stack_in(m, start, end))?;
        for frame in &frames {
            visitor.submit_frame(frame);
        }
        Ok(())
    }
}

impl DebugRuntime for ScriptRuntime {
    fn set_debug_event_listener(&self, listener: Option<Rc<dyn DebugEventListener>>) {
        *self.inner.debug_listener.borrow_mut() = listener;
    }
}

impl Profiler for ScriptRuntime {
    fn profiler_tick(&self, begin: bool) -> bool {
        let mode = self.profiling_mode();
        match (begin, mode) {
            (true, ProfilingMode::Profiling) | (false, ProfilingMode::None) => true,
            (true, ProfilingMode::None) => self.start_profiling(),
            (false, ProfilingMode::Profiling) => self.stop_profiling(),
            _ => {
                log::warn!("profiler is busy in {mode:?}");
                false
            }
        }
    }
}

impl WarningRuntime for ScriptRuntime {
    fn emit_warning(&self, channel: &str, message: &str) {
        log::warn!("[{channel}] {message}");
        self.trace(&format!("warning [{channel}]: {message}"));
    }
}
