use std::{cell::RefCell, rc::Rc};

use cinder_runtime::{
    cinder_lang::runtime::{
        RuntimeError,
        vm::{FrameInfo, Machine},
    },
    host::*,
    payload::Payload,
    routines::CallRefRoutine,
};
use cinder_test::*;

#[derive(Default)]
struct Frames(Vec<FrameInfo>);

impl StackWalkVisitor for Frames {
    fn submit_frame(&mut self, frame: &FrameInfo) {
        self.0.push(frame.clone());
    }
}

#[test]
fn host_routines_are_set_once() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    let first: CallRefRoutine = Rc::new(|_: &mut Machine, id: i32, _: &[u8]| -> Result<Vec<u8>, RuntimeError> {
        Ok(format!("first {id}").into_bytes())
    });
    let second: CallRefRoutine =
        Rc::new(|_: &mut Machine, _: i32, _: &[u8]| -> Result<Vec<u8>, RuntimeError> { Ok(vec![]) });
    assert!(rt.routines().set_call_ref(first));
    assert!(!rt.routines().set_call_ref(second));
    assert_eq!(rt.call_ref(7, b"[]").unwrap(), b"first 7");
}

#[test]
fn script_routines_are_set_once() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    let src = r#"
(define first (set-duplicate-ref-routine (fn (id) (+ id 1000))))
(define second (set-duplicate-ref-routine (fn (id) 0)))
"#;
    run_source(&rt, &host, "dup.cin", src).unwrap();
    assert_eq!(global(&rt, "first").to_string(), "true");
    assert_eq!(global(&rt, "second").to_string(), "false");
    assert_eq!(rt.duplicate_ref(5).unwrap(), 1005);
}

#[test]
fn call_and_delete_routines() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    let src = r#"
(define deleted (list))
(set-call-ref-routine (fn (id payload) (str "ref " id ":" payload)))
(set-delete-ref-routine (fn (id) (set! deleted (concat deleted (list id)))))
"#;
    run_source(&rt, &host, "ref-routines.cin", src).unwrap();
    assert_eq!(rt.call_ref(3, b"[1]").unwrap(), b"ref 3:[1]");
    rt.remove_ref(4).unwrap();
    rt.remove_ref(9).unwrap();
    assert_eq!(global(&rt, "deleted").to_string(), "(4 9)");
}

#[test]
fn tick_routine_gets_raw_tokens() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    let src = r#"
(define seen (list))
(set-tick-routine (fn (token profiling) (set! seen (concat seen (list token profiling)))))
(define raw (set-timeout 10))
(set-timeout 10 (fn () (set! seen (concat seen (list "callback")))))
"#;
    run_source(&rt, &host, "tick.cin", src).unwrap();
    let raw = global(&rt, "raw");
    rt.tick(10).unwrap();
    assert_eq!(global(&rt, "seen").to_string(), format!("({raw} false callback)"));
}

#[test]
fn raw_tokens_without_a_tick_routine() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    run_source(&rt, &host, "raw.cin", "(define raw (set-timeout 10))").unwrap();
    let raw = global(&rt, "raw").as_number().unwrap() as u64;
    assert!(!rt.run_bookmark(raw));
    assert!(!rt.is_bookmark_pending(raw));
}

#[test]
fn event_routine_replaces_handlers() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    let src = r#"
(define ev nil)
(define handled false)
(add-event-handler "ping" (fn () (set! handled true)))
(set-event-routine (fn (name payload source) (set! ev (list name payload source))))
"#;
    run_source(&rt, &host, "event-routine.cin", src).unwrap();
    rt.trigger_event("ping", b"[1,2]", "net:3").unwrap();
    assert_eq!(global(&rt, "ev").to_string(), "(ping [1,2] net:3)");
    assert_eq!(global(&rt, "handled").to_string(), "false");
}

#[test]
fn default_stack_walk() {
    let host = TestHost::new();
    let seen = Rc::new(RefCell::new(vec![]));
    let sink = seen.clone();
    host.add_native(
        42,
        native_handler(move |ctx: &mut NativeContext| {
            let frames = ctx
                .runtime
                .walk_stack_in(ctx.machine, 0, 10)
                .map_err(|e| e.to_string())?;
            sink.borrow_mut().extend(frames);
            Ok(Payload::Nil)
        }),
    );
    let rt = create_runtime(&host);
    let src = "(defn inner ()\n  (invoke-native 42))\n(defn outer () (inner))\n(outer)\n";
    run_source(&rt, &host, "walk.cin", src).unwrap();

    let frames = seen.borrow();
    let names = frames.iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, ["invoke-native", "inner", "outer", "main chunk"]);
    assert_eq!(frames[1].source, "walk.cin");
    assert_eq!(frames[1].line, 2);
    assert_eq!(frames[3].line, 4);

    // nothing is running between operations
    let mut idle = Frames::default();
    rt.walk_stack(0, 10, &mut idle).unwrap();
    assert!(idle.0.is_empty());
}

#[test]
fn stack_trace_routine() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    let src = r#"
(set-stack-trace-routine
  (fn (start end) (list (list "custom" "x.cin" (+ start end)))))
"#;
    run_source(&rt, &host, "trace-routine.cin", src).unwrap();
    let mut frames = Frames::default();
    rt.walk_stack(1, 6, &mut frames).unwrap();
    assert_eq!(
        frames.0,
        vec![FrameInfo {
            name: "custom".to_string(),
            source: "x.cin".to_string(),
            line: 7,
        }]
    );
}

#[test]
fn objects_need_a_routine() {
    let host = TestHost::new();
    host.add_native(
        5,
        native_handler(|_: &mut NativeContext| Ok(Payload::Object(b"hello".to_vec()))),
    );
    let rt = create_runtime(&host);
    assert_eq!(eval(&rt, "(invoke-native 5)").unwrap().to_string(), "nil");
    eval(&rt, r#"(set-result-as-object-routine (fn (s) (str "obj:" s)))"#).unwrap();
    assert_eq!(eval(&rt, "(invoke-native 5)").unwrap().to_string(), "obj:hello");
}
