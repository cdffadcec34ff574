use cinder_runtime::{Error, host::*, payload::Payload};
use cinder_test::*;

#[test]
fn handlers_receive_the_payload() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    run_file(&rt, &host, "events.cin").unwrap();
    let payload = Payload::pack(&["bob".into(), 2.0.into()]).unwrap();
    rt.trigger_event("greet", &payload, "net:1").unwrap();
    assert_eq!(global(&rt, "got").to_string(), "(bob 2 net:1)");
    // the source is only visible while handlers run
    assert_eq!(global(&rt, "event-source").to_string(), "nil");
}

#[test]
fn unknown_events_are_ignored() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    run_file(&rt, &host, "events.cin").unwrap();
    rt.trigger_event("nobody-listens", b"[1]", "").unwrap();
    assert_eq!(global(&rt, "got").to_string(), "nil");
}

#[test]
fn a_failing_handler_does_not_stop_the_others() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    run_file(&rt, &host, "events.cin").unwrap();
    host.take_traces();
    let err = rt.trigger_event("fail", b"[]", "").unwrap_err();
    assert!(matches!(&err, Error::Script { script, .. } if script == "events.cin"));
    assert_eq!(global(&rt, "after-fail").to_string(), "true");
    assert_eq!(global(&rt, "event-source").to_string(), "nil");
    let traces = host.traces();
    assert!(
        traces[0].starts_with("error in events.cin (load #1): handler failed"),
        "{traces:?}"
    );
}

#[test]
fn malformed_payloads_are_rejected() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    run_file(&rt, &host, "events.cin").unwrap();
    assert!(matches!(
        rt.trigger_event("greet", b"{oops", "net:1"),
        Err(Error::Payload(_))
    ));
    assert_eq!(global(&rt, "got").to_string(), "nil");
}

#[test]
fn functions_in_payloads_are_callable() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    let src = r#"
(define answer nil)
(add-event-handler "ask" (fn (reply) (set! answer (reply 20))))
(define doubler (make-ref (fn (x) (* x 2))))
"#;
    run_source(&rt, &host, "ask.cin", src).unwrap();
    let doubler = global(&rt, "doubler").as_number().unwrap() as i32;
    let payload = Payload::pack(&[Payload::Ref(doubler)]).unwrap();
    rt.trigger_event("ask", &payload, "").unwrap();
    assert_eq!(global(&rt, "answer").as_number(), Some(40.0));
}
