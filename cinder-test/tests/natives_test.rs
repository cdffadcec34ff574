use cinder_runtime::{RuntimeConfig, host::*, payload::Payload};
use cinder_test::*;

fn sum(ctx: &mut NativeContext) -> Result<Payload, String> {
    let total = ctx
        .args
        .iter()
        .map(|a| a.as_number().ok_or("expected numbers"))
        .sum::<Result<f64, _>>()?;
    Ok(Payload::Number(total))
}

#[test]
fn invoke_by_hash() {
    let host = TestHost::new();
    host.add_native(0x1234, native_handler(sum));
    let rt = create_runtime(&host);
    assert_eq!(eval(&rt, "(invoke-native 4660 1 2)").unwrap().as_number(), Some(3.0));
    let err = eval(&rt, "(invoke-native 4660 \"x\")").unwrap_err();
    assert!(err.to_string().contains("expected numbers"), "{err}");
}

#[test]
fn missing_natives_are_remembered() {
    let host = TestHost::new();
    let rt = create_runtime(&host);
    assert!(!rt.is_native_known_missing(99));
    let v = eval(&rt, "(pcall invoke-native 99)").unwrap();
    assert!(v.to_string().contains("is not registered"), "{v}");
    assert!(rt.is_native_known_missing(99));

    // registering it later still works
    host.add_native(99, native_handler(sum));
    assert_eq!(eval(&rt, "(invoke-native 99 5)").unwrap().as_number(), Some(5.0));
}

#[test]
fn natives_build_binds_wrappers() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("natives_test.json"),
        r#"[{"name":"ADD_TWO","hash":4660}]"#,
    )
    .unwrap();
    let host = TestHost::new();
    host.add_native(4660, native_handler(sum));
    let rt = create_runtime_with(
        &host,
        RuntimeConfig {
            natives_dir: Some(dir.path().to_path_buf()),
            natives_build: Some("test".to_string()),
            ..Default::default()
        },
    );
    assert_eq!(eval(&rt, "(add-two 2 3)").unwrap().as_number(), Some(5.0));
    assert_eq!(
        eval(&rt, "(invoke-native \"ADD_TWO\" 1 1)").unwrap().as_number(),
        Some(2.0)
    );
    assert_eq!(
        eval(&rt, "(call-native \"add-two\" 4 4)").unwrap().as_number(),
        Some(8.0)
    );
}

#[test]
fn missing_natives_build_fails_create() {
    let dir = tempfile::tempdir().unwrap();
    let host = TestHost::new();
    let rt = cinder_runtime::ScriptRuntime::new(RuntimeConfig {
        natives_dir: Some(dir.path().to_path_buf()),
        natives_build: Some("nope".to_string()),
        ..Default::default()
    })
    .unwrap();
    assert!(matches!(
        rt.create(host.clone()),
        Err(cinder_runtime::Error::Io { .. })
    ));
}

#[test]
fn natives_can_call_back_into_scripts() {
    let host = TestHost::new();
    host.add_native(
        77,
        native_handler(|ctx: &mut NativeContext| {
            let Some(&Payload::Ref(f)) = ctx.args.first() else {
                return Err("expected a function".to_string());
            };
            let out = ctx
                .call_ref(f, &[Payload::Number(10.0)])
                .map_err(|e| e.to_string())?;
            out.into_iter().next().ok_or_else(|| "no result".to_string())
        }),
    );
    let rt = create_runtime(&host);
    let v = eval(&rt, "(invoke-native 77 (fn (x) (* x 2)))").unwrap();
    assert_eq!(v.as_number(), Some(20.0));
}
