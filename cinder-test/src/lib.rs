use std::{
    cell::RefCell,
    collections::HashMap,
    io::{Cursor, Read},
    path::PathBuf,
    rc::Rc,
};

use cinder_lang::{runtime::vm::Value, utils::fileloader};
use cinder_runtime::{
    RuntimeConfig, ScriptRuntime,
    cinder_lang::runtime::vm::FrameInfo,
    host::*,
    profiler::{ProfilerSink, ProfilingMode},
};

/// Native table backed by a map, shared with the host that hands it out.
#[derive(Default)]
pub struct NativeMap(RefCell<HashMap<u64, NativeHandler>>);

impl NativeTable for NativeMap {
    fn get_native(&self, hash: u64) -> Option<NativeHandler> {
        self.0.borrow().get(&hash).cloned()
    }
}

#[derive(Default)]
pub struct RecordingProfiler {
    pub refuse: bool,
    pub modes: RefCell<Vec<ProfilingMode>>,
    /// Whether a runtime was current at each mode change.
    pub current_at_change: RefCell<Vec<bool>>,
    pub scopes: RefCell<Vec<String>>,
    pub timelines: RefCell<Vec<String>>,
}

impl ProfilerSink for RecordingProfiler {
    fn register_timeline(&self, name: &str) -> Option<u32> {
        if self.refuse {
            return None;
        }
        let mut timelines = self.timelines.borrow_mut();
        timelines.push(name.to_string());
        Some(timelines.len() as u32)
    }
    fn enter_scope(&self, _timeline: u32, frame: &FrameInfo) {
        self.scopes.borrow_mut().push(frame.name.clone());
    }
    fn exit_scope(&self, _timeline: u32) {}
    fn mode_changed(&self, mode: ProfilingMode) {
        self.modes.borrow_mut().push(mode);
        self.current_at_change
            .borrow_mut()
            .push(ScriptRuntime::current().is_some());
    }
}

#[derive(Default)]
pub struct RecordingBookmarks {
    pub scheduled: RefCell<Vec<(i32, u64, u64)>>,
    pub removed: RefCell<Vec<i32>>,
}

impl BookmarkHost for RecordingBookmarks {
    fn schedule_bookmark(&self, runtime_id: i32, token: u64, deadline_ms: u64) {
        self.scheduled
            .borrow_mut()
            .push((runtime_id, token, deadline_ms));
    }
    fn remove_bookmarks(&self, runtime_id: i32) {
        self.removed.borrow_mut().push(runtime_id);
    }
}

#[derive(Default)]
pub struct RecordingListener {
    pub loaded: RefCell<Vec<(String, u32)>>,
    pub errors: RefCell<Vec<(String, String)>>,
}

impl DebugEventListener for RecordingListener {
    fn on_script_loaded(&self, name: &str, load_id: u32) {
        self.loaded.borrow_mut().push((name.to_string(), load_id));
    }
    fn on_script_error(&self, script: &str, message: &str) {
        self.errors
            .borrow_mut()
            .push((script.to_string(), message.to_string()));
    }
}

/// An in-memory host that records everything the runtime tells it.
pub struct TestHost {
    pub resource: String,
    files: RefCell<HashMap<String, Vec<u8>>>,
    traces: RefCell<Vec<String>>,
    pub natives: Rc<NativeMap>,
    pub profiler: Option<Rc<RecordingProfiler>>,
    pub bookmarks: Rc<RecordingBookmarks>,
}

impl Default for TestHost {
    fn default() -> Self {
        Self {
            resource: "test-resource".to_string(),
            files: RefCell::default(),
            traces: RefCell::default(),
            natives: Rc::default(),
            profiler: None,
            bookmarks: Rc::default(),
        }
    }
}

impl TestHost {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn with_profiler(profiler: RecordingProfiler) -> Rc<Self> {
        Rc::new(Self {
            profiler: Some(Rc::new(profiler)),
            ..Default::default()
        })
    }

    pub fn add_file(&self, name: &str, src: impl Into<Vec<u8>>) {
        self.files.borrow_mut().insert(name.to_string(), src.into());
    }

    pub fn add_native(&self, hash: u64, handler: NativeHandler) {
        self.natives.0.borrow_mut().insert(hash, handler);
    }

    pub fn traces(&self) -> Vec<String> {
        self.traces.borrow().clone()
    }

    pub fn take_traces(&self) -> Vec<String> {
        std::mem::take(&mut *self.traces.borrow_mut())
    }
}

impl ScriptHost for TestHost {
    fn open_host_file(&self, name: &str) -> std::io::Result<Box<dyn Read>> {
        match self.files.borrow().get(name) {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{name} is not part of this resource"),
            )),
        }
    }

    fn resource_name(&self) -> String {
        self.resource.clone()
    }

    fn trace(&self, message: &str) {
        log::debug!("trace: {message}");
        self.traces.borrow_mut().push(message.to_string());
    }

    fn native_table(&self) -> Option<Rc<dyn NativeTable>> {
        Some(self.natives.clone())
    }

    fn profiler(&self) -> Option<Rc<dyn ProfilerSink>> {
        self.profiler
            .clone()
            .map(|p| p as Rc<dyn ProfilerSink>)
    }

    fn bookmark_host(&self) -> Option<Rc<dyn BookmarkHost>> {
        Some(self.bookmarks.clone())
    }
}

/// A created runtime with the default configuration.
pub fn create_runtime(host: &Rc<TestHost>) -> ScriptRuntime {
    create_runtime_with(host, RuntimeConfig::default())
}

pub fn create_runtime_with(host: &Rc<TestHost>, config: RuntimeConfig) -> ScriptRuntime {
    let rt = ScriptRuntime::new(config).expect("failed to construct the runtime");
    rt.create(host.clone()).expect("failed to create the runtime");
    rt
}

/// Add `src` to the host as `name` and load it.
pub fn run_source(
    rt: &ScriptRuntime,
    host: &TestHost,
    name: &str,
    src: &str,
) -> cinder_runtime::Result<()> {
    host.add_file(name, src);
    rt.load_file(name)
}

pub fn global(rt: &ScriptRuntime, name: &str) -> Value {
    rt.with_vm(|_, m| Ok(m.get_global(name).unwrap_or_default()))
        .expect("machine is not available")
}

/// Evaluate one expression in a fresh chunk and return its value.
pub fn eval(rt: &ScriptRuntime, src: &str) -> cinder_runtime::Result<Value> {
    rt.with_vm(|_, m| {
        let chunk = m.load(src, "eval").map_err(|errs| cinder_runtime::Error::Load {
            name: "eval".to_string(),
            message: cinder_lang::utils::error::dump_with_lines(src, &errs),
        })?;
        m.call(&chunk, &[]).map_err(|source| cinder_runtime::Error::Script {
            script: "eval".to_string(),
            source,
        })
    })
}

pub fn load_src(path: &'static str) -> (PathBuf, String) {
    // set by build.rs
    let crate_root = env!("TEST_ROOT");
    let file = [crate_root, "tests/cin", path]
        .iter()
        .collect::<PathBuf>();
    let src = fileloader::load(&file.to_string_lossy()).expect("failed to load file");
    (file, src)
}

/// Load a script from `tests/cin` into the host under its file name.
pub fn run_file(rt: &ScriptRuntime, host: &TestHost, path: &'static str) -> cinder_runtime::Result<()> {
    let (_, src) = load_src(path);
    run_source(rt, host, path, &src)
}
