//! Profiler state machine and call instrumentation.
//!
//! Modes advance strictly `None -> Setup -> Profiling -> Shutdown -> None`. The
//! only other legal move is the rollback of a failed setup to `None`. Setup
//! installs a call hook on the machine and keeps a small table alive in the
//! registry for the duration of the session; both go away on shutdown.

use std::{cell::Cell, rc::Rc};

use cinder_lang::runtime::vm::{CallHook, FrameInfo, Machine, RegistryKey, Value};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfilingMode {
    #[default]
    None,
    Setup,
    Profiling,
    Shutdown,
}

impl ProfilingMode {
    fn successor(self) -> Self {
        match self {
            ProfilingMode::None => ProfilingMode::Setup,
            ProfilingMode::Setup => ProfilingMode::Profiling,
            ProfilingMode::Profiling => ProfilingMode::Shutdown,
            ProfilingMode::Shutdown => ProfilingMode::None,
        }
    }
}

/// Receiver of profiling scopes, implemented by the host.
pub trait ProfilerSink {
    /// `None` refuses the session.
    fn register_timeline(&self, name: &str) -> Option<u32>;
    fn unregister_timeline(&self, _timeline: u32) {}
    fn enter_scope(&self, timeline: u32, frame: &FrameInfo);
    fn exit_scope(&self, timeline: u32);
    fn mode_changed(&self, _mode: ProfilingMode) {}
}

/// Forwards frame pushes and pops to the sink while the session is active.
struct ProfilerHook {
    sink: Rc<dyn ProfilerSink>,
    timeline: u32,
    active: Rc<Cell<bool>>,
}

impl CallHook for ProfilerHook {
    fn on_enter(&mut self, frame: &FrameInfo) {
        if self.active.get() {
            self.sink.enter_scope(self.timeline, frame);
        }
    }
    fn on_leave(&mut self, _frame: &FrameInfo) {
        if self.active.get() {
            self.sink.exit_scope(self.timeline);
        }
    }
}

/// What a successful setup left behind in the machine.
#[derive(Debug, Clone, Copy)]
pub struct Instrumentation {
    pub timeline: u32,
    pub table: RegistryKey,
}

#[derive(Default)]
pub struct ProfilerState {
    mode: ProfilingMode,
    active: Rc<Cell<bool>>,
    instrumentation: Option<Instrumentation>,
}

impl ProfilerState {
    pub fn mode(&self) -> ProfilingMode {
        self.mode
    }

    pub fn is_profiling(&self) -> bool {
        self.mode == ProfilingMode::Profiling
    }

    pub fn instrumentation(&self) -> Option<Instrumentation> {
        self.instrumentation
    }

    /// Move to the next mode. Anything but the direct successor is refused.
    pub fn advance(&mut self, to: ProfilingMode) -> Result<()> {
        if self.mode.successor() != to {
            return Err(Error::Profiler(format!(
                "cannot move from {:?} to {to:?}",
                self.mode
            )));
        }
        self.mode = to;
        self.active.set(to == ProfilingMode::Profiling);
        log::debug!("profiler mode -> {to:?}");
        Ok(())
    }

    /// Abandon a setup in progress.
    pub fn rollback(&mut self) {
        if self.mode == ProfilingMode::Setup {
            log::debug!("profiler setup rolled back");
            self.mode = ProfilingMode::None;
            self.active.set(false);
            self.instrumentation = None;
        }
    }

    pub fn set_instrumentation(&mut self, inst: Option<Instrumentation>) {
        self.instrumentation = inst;
    }

    pub fn active_flag(&self) -> Rc<Cell<bool>> {
        self.active.clone()
    }

    /// Forget everything after the machine was torn down.
    pub fn reset(&mut self) {
        self.mode = ProfilingMode::None;
        self.active.set(false);
        self.instrumentation = None;
    }
}

/// Register a timeline, pin the session table and hook the machine.
///
/// May allocate and step the collector, so finalizers can run from here.
pub fn install(
    m: &mut Machine,
    sink: Rc<dyn ProfilerSink>,
    active: Rc<Cell<bool>>,
    timeline_name: &str,
) -> Result<Instrumentation> {
    let timeline = sink
        .register_timeline(timeline_name)
        .ok_or_else(|| Error::Profiler(format!("timeline {timeline_name} was refused")))?;
    let session = Value::list([Value::from(timeline_name), Value::Number(timeline as f64)]);
    let table = match m.new_box(session) {
        Ok(b) => m.registry_ref(b),
        Err(e) => {
            sink.unregister_timeline(timeline);
            return Err(Error::Profiler(e.to_string()));
        }
    };
    m.set_hook(Some(Box::new(ProfilerHook {
        sink,
        timeline,
        active,
    })));
    m.step_gc(&[]);
    Ok(Instrumentation { timeline, table })
}

pub fn uninstall(m: &mut Machine, sink: Option<&Rc<dyn ProfilerSink>>, inst: Instrumentation) {
    m.set_hook(None);
    m.registry_release(inst.table);
    if let Some(sink) = sink {
        sink.unregister_timeline(inst.timeline);
    }
    m.step_gc(&[]);
}

#[cfg(test)]
mod test {
    use super::*;
    use cinder_lang::runtime::alloc::AllocatorKind;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        scopes: RefCell<Vec<String>>,
        refuse: bool,
    }

    impl ProfilerSink for Recorder {
        fn register_timeline(&self, _name: &str) -> Option<u32> {
            (!self.refuse).then_some(7)
        }
        fn enter_scope(&self, timeline: u32, frame: &FrameInfo) {
            self.scopes
                .borrow_mut()
                .push(format!("{timeline}:{}", frame.name));
        }
        fn exit_scope(&self, _timeline: u32) {
            self.scopes.borrow_mut().push("exit".to_string());
        }
    }

    #[test]
    fn modes_never_skip() {
        let mut state = ProfilerState::default();
        assert!(state.advance(ProfilingMode::Profiling).is_err());
        state.advance(ProfilingMode::Setup).unwrap();
        assert!(state.advance(ProfilingMode::Shutdown).is_err());
        state.advance(ProfilingMode::Profiling).unwrap();
        assert!(state.active_flag().get());
        state.advance(ProfilingMode::Shutdown).unwrap();
        assert!(!state.active_flag().get());
        state.advance(ProfilingMode::None).unwrap();
        assert_eq!(state.mode(), ProfilingMode::None);
    }

    #[test]
    fn hook_reports_only_while_active() {
        let mut m = Machine::new(Default::default(), AllocatorKind::System.create()).unwrap();
        let rec = Rc::new(Recorder::default());
        let mut state = ProfilerState::default();
        state.advance(ProfilingMode::Setup).unwrap();
        let inst = install(&mut m, rec.clone(), state.active_flag(), "t").unwrap();
        let f = m.load("(defn f () 1) (f)", "p.cin").unwrap();
        m.call(&f, &[]).unwrap();
        // still in setup: nothing recorded
        assert!(rec.scopes.borrow().is_empty());

        state.advance(ProfilingMode::Profiling).unwrap();
        m.call(&f, &[]).unwrap();
        assert_eq!(
            *rec.scopes.borrow(),
            vec!["7:main chunk", "7:f", "exit", "exit"]
        );
        assert_eq!(m.registry_len(), 1);

        state.advance(ProfilingMode::Shutdown).unwrap();
        let sink: Rc<dyn ProfilerSink> = rec.clone();
        uninstall(&mut m, Some(&sink), inst);
        assert!(!m.has_hook());
        assert_eq!(m.registry_len(), 0);
    }

    #[test]
    fn refused_timeline_installs_nothing() {
        let mut m = Machine::new(Default::default(), AllocatorKind::System.create()).unwrap();
        let rec = Rc::new(Recorder {
            refuse: true,
            ..Default::default()
        });
        let res = install(&mut m, rec, Rc::new(Cell::new(false)), "t");
        assert!(matches!(res, Err(Error::Profiler(_))));
        assert!(!m.has_hook());
        assert_eq!(m.registry_len(), 0);
    }
}
