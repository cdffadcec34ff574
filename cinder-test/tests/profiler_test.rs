use cinder_runtime::{host::*, profiler::ProfilingMode};
use cinder_test::*;

#[test]
fn begin_and_end_walk_every_mode() {
    let host = TestHost::with_profiler(RecordingProfiler::default());
    let rt = create_runtime(&host);
    let profiler = host.profiler.clone().unwrap();

    assert!(rt.profiler_tick(true));
    assert_eq!(rt.profiling_mode(), ProfilingMode::Profiling);
    assert!(rt.is_profiling());
    // already profiling
    assert!(rt.profiler_tick(true));
    assert_eq!(eval(&rt, "(is-profiling)").unwrap().to_string(), "true");

    assert!(rt.profiler_tick(false));
    assert_eq!(rt.profiling_mode(), ProfilingMode::None);
    assert!(rt.profiler_tick(false));
    assert_eq!(
        *profiler.modes.borrow(),
        [
            ProfilingMode::Setup,
            ProfilingMode::Profiling,
            ProfilingMode::Shutdown,
            ProfilingMode::None
        ]
    );
    assert_eq!(profiler.timelines.borrow().len(), 1);
    assert!(profiler.timelines.borrow()[0].starts_with("test-resource"));
}

#[test]
fn the_runtime_is_current_across_transitions() {
    let host = TestHost::with_profiler(RecordingProfiler::default());
    let rt = create_runtime(&host);
    let profiler = host.profiler.clone().unwrap();
    assert!(rt.profiler_tick(true));
    assert!(rt.profiler_tick(false));
    assert_eq!(*profiler.current_at_change.borrow(), [true; 4]);
}

#[test]
fn calls_are_recorded_while_profiling() {
    let host = TestHost::with_profiler(RecordingProfiler::default());
    let rt = create_runtime(&host);
    let profiler = host.profiler.clone().unwrap();
    run_source(&rt, &host, "work.cin", "(defn work () 1)").unwrap();

    eval(&rt, "(work)").unwrap();
    assert!(profiler.scopes.borrow().is_empty());

    assert!(rt.profiler_tick(true));
    eval(&rt, "(work)").unwrap();
    assert!(profiler.scopes.borrow().iter().any(|s| s == "work"));

    assert!(rt.profiler_tick(false));
    let recorded = profiler.scopes.borrow().len();
    eval(&rt, "(work)").unwrap();
    assert_eq!(profiler.scopes.borrow().len(), recorded);
}

#[test]
fn refused_setup_rolls_back() {
    let host = TestHost::with_profiler(RecordingProfiler {
        refuse: true,
        ..Default::default()
    });
    let rt = create_runtime(&host);
    let profiler = host.profiler.clone().unwrap();

    assert!(!rt.profiler_tick(true));
    assert_eq!(rt.profiling_mode(), ProfilingMode::None);
    assert_eq!(*profiler.modes.borrow(), [ProfilingMode::Setup, ProfilingMode::None]);
    assert_eq!(*profiler.current_at_change.borrow(), [true, true]);
    assert!(host.traces().iter().any(|t| t.starts_with("warning [profiler]")));

    // the runtime keeps working
    assert_eq!(eval(&rt, "(+ 1 2)").unwrap().as_number(), Some(3.0));
}

#[test]
fn no_sink_no_profiling() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    assert!(!rt.profiler_tick(true));
    assert_eq!(rt.profiling_mode(), ProfilingMode::None);
}

#[test]
fn finalizers_during_setup_see_the_runtime() {
    let host = TestHost::with_profiler(RecordingProfiler::default());
    let rt = create_runtime(&host);
    let src = r#"
(define seen-id nil)
(defn garbage ()
  (on-collect (box 1) (fn (v) (set! seen-id (get-instance-id))))
  nil)
(garbage)
"#;
    run_source(&rt, &host, "garbage.cin", src).unwrap();
    assert_eq!(global(&rt, "seen-id").to_string(), "nil");

    assert!(rt.profiler_tick(true));
    assert_eq!(global(&rt, "seen-id").as_number(), Some(rt.instance_id() as f64));
}

#[test]
fn destroy_ends_profiling() {
    let host = TestHost::with_profiler(RecordingProfiler::default());
    let rt = create_runtime(&host);
    let profiler = host.profiler.clone().unwrap();
    assert!(rt.profiler_tick(true));
    rt.destroy().unwrap();
    assert_eq!(profiler.modes.borrow().last(), Some(&ProfilingMode::None));
    assert_eq!(rt.profiling_mode(), ProfilingMode::None);
}
