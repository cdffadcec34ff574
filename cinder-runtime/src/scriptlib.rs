//! Natives installed into every runtime's machine by `create`.
//!
//! None of them capture the runtime: each looks up the current one, which
//! `with_vm` guarantees is the runtime driving the machine.

use std::rc::Rc;

use cinder_lang::runtime::{
    RuntimeError,
    vm::{
        FrameInfo, Machine, NativeFn, RegistryKey, Value,
        builtin::{expect_arity, expect_at_least, expect_callable, expect_list, expect_number, expect_str, native},
    },
};
use itertools::Itertools;

use crate::{ScriptRuntime, error::Error, host::WarningRuntime, payload::Payload};

pub(crate) fn current_runtime() -> Result<ScriptRuntime, RuntimeError> {
    ScriptRuntime::current().ok_or_else(|| RuntimeError::native("no script runtime is current"))
}

fn expect_ref(name: &str, v: &Value) -> Result<i32, RuntimeError> {
    Ok(expect_number(name, v)? as i32)
}

fn millis(name: &str, v: &Value) -> Result<u64, RuntimeError> {
    Ok(expect_number(name, v)?.max(0.0) as u64)
}

fn payload_string(bytes: &[u8]) -> Value {
    Value::from(String::from_utf8_lossy(bytes).into_owned())
}

/// Function pinned in the registry by a `set-*-routine` call.
fn pinned(m: &Machine, key: RegistryKey) -> Result<Value, RuntimeError> {
    m.registry_get(key)
        .ok_or_else(|| RuntimeError::native("routine function is gone"))
}

fn install_scheduling(m: &mut Machine) {
    m.register_native(
        "set-timeout",
        native(|m: &mut Machine, args: &[Value]| {
            expect_at_least("set-timeout", args, 1)?;
            let ms = millis("set-timeout", &args[0])?;
            let f = match args.get(1) {
                Some(f) => {
                    expect_callable("set-timeout", f)?;
                    Some(f.clone())
                }
                None => None,
            };
            let rt = current_runtime()?;
            Ok(Value::Number(rt.set_timeout_in(m, ms, f, None)? as f64))
        }),
    );
    m.register_native(
        "clear-timeout",
        native(|m: &mut Machine, args: &[Value]| {
            expect_arity("clear-timeout", args, 1)?;
            let Value::Number(token) = args[0] else {
                return Ok(Value::Bool(false));
            };
            let rt = current_runtime()?;
            Ok(Value::Bool(rt.clear_timeout_in(m, token as u64)))
        }),
    );
    m.register_native(
        "create-thread",
        native(|m: &mut Machine, args: &[Value]| {
            expect_arity("create-thread", args, 1)?;
            expect_callable("create-thread", &args[0])?;
            let rt = current_runtime()?;
            let thread = m.spawn_thread();
            match rt.set_timeout_in(m, 0, Some(args[0].clone()), Some(thread)) {
                Ok(token) => Ok(Value::Number(token as f64)),
                Err(e) => {
                    m.release_thread(thread);
                    Err(e.into())
                }
            }
        }),
    );
}

fn install_events_and_refs(m: &mut Machine) {
    m.register_native(
        "add-event-handler",
        native(|m: &mut Machine, args: &[Value]| {
            expect_arity("add-event-handler", args, 2)?;
            let name = expect_str("add-event-handler", &args[0])?.to_string();
            expect_callable("add-event-handler", &args[1])?;
            current_runtime()?.add_event_handler_in(m, &name, args[1].clone())?;
            Ok(Value::Nil)
        }),
    );
    m.register_native(
        "make-ref",
        native(|m: &mut Machine, args: &[Value]| {
            expect_arity("make-ref", args, 1)?;
            expect_callable("make-ref", &args[0])?;
            let id = current_runtime()?.make_ref_in(m, args[0].clone())?;
            Ok(Value::Number(id as f64))
        }),
    );
    m.register_native(
        "call-ref",
        native(|m: &mut Machine, args: &[Value]| {
            expect_at_least("call-ref", args, 1)?;
            let id = expect_ref("call-ref", &args[0])?;
            let rt = current_runtime()?;
            let packed = args[1..]
                .iter()
                .map(|v| rt.value_to_payload(m, v))
                .collect::<Result<Vec<_>, Error>>()
                .and_then(|ps| Payload::pack(&ps))?;
            let out = rt.call_ref_in(m, id, &packed)?;
            let first = Payload::unpack(&out)?.into_iter().next();
            match first {
                Some(p) => Ok(rt.payload_to_value(m, p)?),
                None => Ok(Value::Nil),
            }
        }),
    );
    m.register_native(
        "duplicate-ref",
        native(|m: &mut Machine, args: &[Value]| {
            expect_arity("duplicate-ref", args, 1)?;
            let id = expect_ref("duplicate-ref", &args[0])?;
            let dup = current_runtime()?.duplicate_ref_in(m, id)?;
            Ok(Value::Number(dup as f64))
        }),
    );
    m.register_native(
        "delete-ref",
        native(|m: &mut Machine, args: &[Value]| {
            expect_arity("delete-ref", args, 1)?;
            let id = expect_ref("delete-ref", &args[0])?;
            current_runtime()?.remove_ref_in(m, id)?;
            Ok(Value::Nil)
        }),
    );
}

fn install_host_access(m: &mut Machine) {
    m.register_native(
        "invoke-native",
        native(|m: &mut Machine, args: &[Value]| {
            expect_at_least("invoke-native", args, 1)?;
            let rt = current_runtime()?;
            let hash = match &args[0] {
                Value::Str(name) => rt
                    .native_hash(name)
                    .ok_or_else(|| RuntimeError::native(format!("unknown native {name}")))?,
                v => expect_number("invoke-native", v)? as u64,
            };
            Ok(rt.invoke_native_in(m, hash, &args[1..])?)
        }),
    );
    m.register_native(
        "get-resource-name",
        native(|_m: &mut Machine, args: &[Value]| {
            expect_arity("get-resource-name", args, 0)?;
            let host = current_runtime()?.host()?;
            Ok(Value::from(host.resource_name()))
        }),
    );
    m.register_native(
        "trace",
        native(|_m: &mut Machine, args: &[Value]| {
            current_runtime()?.trace(&args.iter().join(" "));
            Ok(Value::Nil)
        }),
    );
    m.register_native(
        "warn",
        native(|_m: &mut Machine, args: &[Value]| {
            expect_at_least("warn", args, 1)?;
            let channel = expect_str("warn", &args[0])?;
            current_runtime()?.emit_warning(channel, &args[1..].iter().join(" "));
            Ok(Value::Nil)
        }),
    );
    m.register_native(
        "get-instance-id",
        native(|_m: &mut Machine, _args: &[Value]| {
            use crate::host::Runtime;
            Ok(Value::Number(current_runtime()?.instance_id() as f64))
        }),
    );
    m.register_native(
        "is-profiling",
        native(|_m: &mut Machine, _args: &[Value]| {
            Ok(Value::Bool(current_runtime()?.is_profiling()))
        }),
    );
}

fn frame_from(v: &Value) -> Result<FrameInfo, RuntimeError> {
    let parts = expect_list("stack-trace routine", v)?;
    let text = |i: usize| parts.get(i).map(|p| p.to_string()).unwrap_or_default();
    Ok(FrameInfo {
        name: text(0),
        source: text(1),
        line: parts.get(2).and_then(Value::as_number).unwrap_or_default() as usize,
    })
}

/// A second registration is refused and releases its pin.
fn routine_setter(name: &'static str, set: fn(&ScriptRuntime, RegistryKey) -> bool) -> NativeFn {
    native(move |m: &mut Machine, args: &[Value]| {
        expect_arity(name, args, 1)?;
        expect_callable(name, &args[0])?;
        let rt = current_runtime()?;
        let key = m.registry_ref(args[0].clone());
        let installed = set(&rt, key);
        if !installed {
            m.registry_release(key);
        }
        Ok(Value::Bool(installed))
    })
}

fn install_routine_setters(m: &mut Machine) {
    m.register_native(
        "set-tick-routine",
        routine_setter("set-tick-routine", |rt, key| {
            rt.routines().set_tick(Rc::new(
                move |m: &mut Machine, token: u64, profiling: bool| -> Result<(), RuntimeError> {
                    let f = pinned(m, key)?;
                    m.call(&f, &[Value::Number(token as f64), Value::Bool(profiling)])?;
                    Ok(())
                },
            ))
        }),
    );
    m.register_native(
        "set-event-routine",
        routine_setter("set-event-routine", |rt, key| {
            rt.routines().set_event(Rc::new(
                move |m: &mut Machine,
                      name: &str,
                      payload: &[u8],
                      source: &str|
                      -> Result<(), RuntimeError> {
                    let f = pinned(m, key)?;
                    let args = [Value::from(name), payload_string(payload), Value::from(source)];
                    m.call(&f, &args)?;
                    Ok(())
                },
            ))
        }),
    );
    m.register_native(
        "set-call-ref-routine",
        routine_setter("set-call-ref-routine", |rt, key| {
            rt.routines().set_call_ref(Rc::new(
                move |m: &mut Machine, id: i32, payload: &[u8]| -> Result<Vec<u8>, RuntimeError> {
                    let f = pinned(m, key)?;
                    let out = m.call(&f, &[Value::Number(id as f64), payload_string(payload)])?;
                    Ok(out.as_str().unwrap_or_default().as_bytes().to_vec())
                },
            ))
        }),
    );
    m.register_native(
        "set-duplicate-ref-routine",
        routine_setter("set-duplicate-ref-routine", |rt, key| {
            rt.routines().set_duplicate_ref(Rc::new(
                move |m: &mut Machine, id: i32| -> Result<i32, RuntimeError> {
                    let f = pinned(m, key)?;
                    let out = m.call(&f, &[Value::Number(id as f64)])?;
                    Ok(expect_number("duplicate-ref routine", &out)? as i32)
                },
            ))
        }),
    );
    m.register_native(
        "set-delete-ref-routine",
        routine_setter("set-delete-ref-routine", |rt, key| {
            rt.routines().set_delete_ref(Rc::new(
                move |m: &mut Machine, id: i32| -> Result<(), RuntimeError> {
                    let f = pinned(m, key)?;
                    m.call(&f, &[Value::Number(id as f64)])?;
                    Ok(())
                },
            ))
        }),
    );
    m.register_native(
        "set-stack-trace-routine",
        routine_setter("set-stack-trace-routine", |rt, key| {
            rt.routines().set_stack_trace(Rc::new(
                move |m: &mut Machine,
                      start: usize,
                      end: usize|
                      -> Result<Vec<FrameInfo>, RuntimeError> {
                    let f = pinned(m, key)?;
                    let out = m.call(&f, &[Value::Number(start as f64), Value::Number(end as f64)])?;
                    expect_list("stack-trace routine", &out)?
                        .iter()
                        .map(frame_from)
                        .collect()
                },
            ))
        }),
    );
    m.register_native(
        "set-result-as-object-routine",
        routine_setter("set-result-as-object-routine", |rt, key| {
            rt.routines().set_result_as_object(Rc::new(
                move |m: &mut Machine, bytes: &[u8]| -> Result<Value, RuntimeError> {
                    let f = pinned(m, key)?;
                    m.call(&f, &[payload_string(bytes)])
                },
            ))
        }),
    );
}

pub(crate) fn install(m: &mut Machine) {
    install_scheduling(m);
    install_events_and_refs(m);
    install_host_access(m);
    install_routine_setters(m);
}
