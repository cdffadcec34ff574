use cinder_runtime::{Error, ScriptRuntime, host::*, payload::Payload};
use cinder_test::*;

fn ref_id(rt: &ScriptRuntime, name: &str) -> i32 {
    global(rt, name).as_number().unwrap() as i32
}

fn call(rt: &ScriptRuntime, id: i32, args: &[Payload]) -> Result<Vec<Payload>, Error> {
    let out = rt.call_ref(id, &Payload::pack(args).unwrap())?;
    Ok(Payload::unpack(&out).unwrap())
}

#[test]
fn call_a_reference() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    run_file(&rt, &host, "refs.cin").unwrap();
    let add = ref_id(&rt, "add-ref");
    assert_eq!(call(&rt, add, &[1.0.into(), 2.0.into()]).unwrap(), vec![Payload::Number(3.0)]);
    // an empty buffer is an empty argument list
    assert!(matches!(rt.call_ref(add, b""), Err(Error::Script { .. })));
    assert!(matches!(rt.call_ref(add, b"not json"), Err(Error::Payload(_))));
}

#[test]
fn returned_functions_become_references() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    run_file(&rt, &host, "refs.cin").unwrap();
    let out = call(&rt, ref_id(&rt, "adder-ref"), &[5.0.into()]).unwrap();
    let Payload::Ref(adder) = out[0] else {
        panic!("expected a reference, got {out:?}");
    };
    assert_eq!(call(&rt, adder, &[1.0.into()]).unwrap(), vec![Payload::Number(6.0)]);
}

#[test]
fn duplicates_outlive_their_source() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    run_file(&rt, &host, "refs.cin").unwrap();
    let add = ref_id(&rt, "add-ref");
    let dup = rt.duplicate_ref(add).unwrap();
    assert_ne!(dup, add);
    assert_eq!(rt.ref_refcount(add), Some(2));

    rt.remove_ref(add).unwrap();
    assert!(matches!(call(&rt, add, &[]), Err(Error::RefInvalid(id)) if id == add));
    assert_eq!(rt.ref_refcount(dup), Some(1));
    assert_eq!(call(&rt, dup, &[2.0.into(), 2.0.into()]).unwrap(), vec![Payload::Number(4.0)]);

    rt.remove_ref(dup).unwrap();
    assert!(matches!(call(&rt, dup, &[]), Err(Error::RefInvalid(_))));
    assert!(matches!(rt.remove_ref(dup), Err(Error::RefInvalid(_))));
    assert!(matches!(rt.duplicate_ref(dup), Err(Error::RefInvalid(_))));
}

#[test]
fn references_from_scripts() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    run_file(&rt, &host, "refs.cin").unwrap();
    let v = eval(&rt, "(call-ref add-ref 2 3)").unwrap();
    assert_eq!(v.as_number(), Some(5.0));
    // a returned reference arrives as the function itself
    let v = eval(&rt, "((call-ref adder-ref 10) 1)").unwrap();
    assert_eq!(v.as_number(), Some(11.0));

    let v = eval(
        &rt,
        "(define d (duplicate-ref add-ref)) (delete-ref add-ref) (call-ref d 1 1)",
    )
    .unwrap();
    assert_eq!(v.as_number(), Some(2.0));
    let v = eval(&rt, "(pcall call-ref add-ref 1 1)").unwrap();
    assert!(v.to_string().starts_with("(false"));
}

#[test]
fn boxes_do_not_cross() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    run_source(&rt, &host, "box.cin", "(define r (make-ref (fn () (box 1))))").unwrap();
    assert!(matches!(call(&rt, ref_id(&rt, "r"), &[]), Err(Error::Payload(_))));
}

#[test]
fn references_are_invalid_after_destroy() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    run_file(&rt, &host, "refs.cin").unwrap();
    let add = ref_id(&rt, "add-ref");
    assert_eq!(rt.ref_count(), 2);
    rt.destroy().unwrap();
    assert!(matches!(call(&rt, add, &[]), Err(Error::RefInvalid(_))));
    assert!(matches!(rt.duplicate_ref(add), Err(Error::RefInvalid(_))));
    assert!(matches!(rt.remove_ref(add), Err(Error::RefInvalid(_))));
    assert_eq!(rt.ref_count(), 0);
}
