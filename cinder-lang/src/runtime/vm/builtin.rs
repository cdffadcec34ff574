//! Builtin functions bound in the global scope of every machine.

use std::rc::Rc;

use itertools::Itertools;

use super::{Machine, NativeFn, Value};
use crate::runtime::{ErrorKind, RuntimeError};

pub fn expect_arity(name: &str, args: &[Value], n: usize) -> Result<(), RuntimeError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(RuntimeError::new(ErrorKind::Arity {
            name: name.to_string(),
            expected: n.to_string(),
            got: args.len(),
        }))
    }
}

pub fn expect_at_least(name: &str, args: &[Value], n: usize) -> Result<(), RuntimeError> {
    if args.len() >= n {
        Ok(())
    } else {
        Err(RuntimeError::new(ErrorKind::Arity {
            name: name.to_string(),
            expected: format!("at least {n}"),
            got: args.len(),
        }))
    }
}

fn type_error(name: &str, expected: &'static str, got: &Value) -> RuntimeError {
    RuntimeError::new(ErrorKind::Type {
        name: name.to_string(),
        expected,
        got: got.type_name(),
    })
}

pub fn expect_number(name: &str, v: &Value) -> Result<f64, RuntimeError> {
    v.as_number().ok_or_else(|| type_error(name, "number", v))
}

pub fn expect_str<'a>(name: &str, v: &'a Value) -> Result<&'a str, RuntimeError> {
    v.as_str().ok_or_else(|| type_error(name, "string", v))
}

pub fn expect_list<'a>(name: &str, v: &'a Value) -> Result<&'a [Value], RuntimeError> {
    match v {
        Value::List(items) => Ok(items),
        Value::Nil => Ok(&[]),
        _ => Err(type_error(name, "list", v)),
    }
}

pub fn expect_callable(name: &str, v: &Value) -> Result<(), RuntimeError> {
    if v.is_callable() {
        Ok(())
    } else {
        Err(type_error(name, "function", v))
    }
}

/// Wrap a closure as a [`NativeFn`].
pub fn native(
    f: impl Fn(&mut Machine, &[Value]) -> Result<Value, RuntimeError> + 'static,
) -> NativeFn {
    Rc::new(f)
}

fn arith(name: &'static str, op: fn(f64, f64) -> f64, unit: Option<f64>) -> NativeFn {
    native(move |_m: &mut Machine, args: &[Value]| {
        let nums = args
            .iter()
            .map(|a| expect_number(name, a))
            .collect::<Result<Vec<_>, _>>()?;
        match (nums.as_slice(), unit) {
            ([], Some(u)) => Ok(Value::Number(u)),
            ([], None) => expect_at_least(name, args, 1).map(|_| Value::Nil),
            ([x], _) if name == "-" => Ok(Value::Number(-x)),
            ([x], _) if name == "/" => Ok(Value::Number(1.0 / x)),
            ([first, rest @ ..], _) => Ok(Value::Number(rest.iter().fold(*first, |a, b| op(a, *b)))),
        }
    })
}

fn compare(name: &'static str, op: fn(f64, f64) -> bool) -> NativeFn {
    native(move |_m: &mut Machine, args: &[Value]| {
        expect_at_least(name, args, 2)?;
        let nums = args
            .iter()
            .map(|a| expect_number(name, a))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Bool(nums.iter().tuple_windows().all(|(a, b)| op(*a, *b))))
    })
}

fn display_all(args: &[Value], sep: &str) -> String {
    args.iter().join(sep)
}

pub(super) fn install(m: &mut Machine) {
    m.register_native("+", arith("+", |a, b| a + b, Some(0.0)));
    m.register_native("*", arith("*", |a, b| a * b, Some(1.0)));
    m.register_native("-", arith("-", |a, b| a - b, None));
    m.register_native("/", arith("/", |a, b| a / b, None));
    m.register_native("%", arith("%", |a, b| a.rem_euclid(b), None));
    m.register_native("<", compare("<", |a, b| a < b));
    m.register_native(">", compare(">", |a, b| a > b));
    m.register_native("<=", compare("<=", |a, b| a <= b));
    m.register_native(">=", compare(">=", |a, b| a >= b));
    m.register_native(
        "=",
        native(|_m: &mut Machine, args: &[Value]| {
            expect_at_least("=", args, 2)?;
            Ok(Value::Bool(args.iter().tuple_windows().all(|(a, b)| a == b)))
        }),
    );
    m.register_native(
        "not",
        native(|_m: &mut Machine, args: &[Value]| {
            expect_arity("not", args, 1)?;
            Ok(Value::Bool(!args[0].is_truthy()))
        }),
    );
    m.register_native(
        "list",
        native(|_m: &mut Machine, args: &[Value]| Ok(Value::list(args.iter().cloned()))),
    );
    m.register_native(
        "len",
        native(|_m: &mut Machine, args: &[Value]| {
            expect_arity("len", args, 1)?;
            let n = match &args[0] {
                Value::Str(s) => s.chars().count(),
                v => expect_list("len", v)?.len(),
            };
            Ok(Value::Number(n as f64))
        }),
    );
    m.register_native(
        "nth",
        native(|_m: &mut Machine, args: &[Value]| {
            expect_arity("nth", args, 2)?;
            let items = expect_list("nth", &args[0])?;
            let i = expect_number("nth", &args[1])?;
            Ok(if i >= 0.0 {
                items.get(i as usize).cloned().unwrap_or_default()
            } else {
                Value::Nil
            })
        }),
    );
    m.register_native(
        "concat",
        native(|_m: &mut Machine, args: &[Value]| {
            let mut out = vec![];
            for a in args {
                out.extend_from_slice(expect_list("concat", a)?);
            }
            Ok(Value::list(out))
        }),
    );
    m.register_native(
        "str",
        native(|_m: &mut Machine, args: &[Value]| Ok(Value::from(display_all(args, "")))),
    );
    m.register_native(
        "print",
        native(|m: &mut Machine, args: &[Value]| {
            let line = display_all(args, " ");
            m.print(&line);
            Ok(Value::Nil)
        }),
    );
    m.register_native(
        "type-of",
        native(|_m: &mut Machine, args: &[Value]| {
            expect_arity("type-of", args, 1)?;
            Ok(Value::from(args[0].type_name()))
        }),
    );
    m.register_native(
        "error",
        native(|_m: &mut Machine, args: &[Value]| {
            Err(RuntimeError::user(display_all(args, " ")))
        }),
    );
    m.register_native(
        "pcall",
        native(|m: &mut Machine, args: &[Value]| {
            expect_at_least("pcall", args, 1)?;
            match m.call(&args[0], &args[1..]) {
                Ok(v) => Ok(Value::list([Value::Bool(true), v])),
                Err(e) if e.is_fatal() => Err(e),
                Err(e) => Ok(Value::list([Value::Bool(false), Value::from(e.kind.to_string())])),
            }
        }),
    );
    m.register_native(
        "apply",
        native(|m: &mut Machine, args: &[Value]| {
            expect_arity("apply", args, 2)?;
            let items = expect_list("apply", &args[1])?.to_vec();
            m.call(&args[0], &items)
        }),
    );
    m.register_native(
        "box",
        native(|m: &mut Machine, args: &[Value]| {
            expect_arity("box", args, 1)?;
            m.new_box(args[0].clone())
        }),
    );
    m.register_native(
        "unbox",
        native(|m: &mut Machine, args: &[Value]| {
            expect_arity("unbox", args, 1)?;
            match &args[0] {
                Value::Box(idx) => Ok(m.box_get(*idx).unwrap_or_default()),
                v => Err(type_error("unbox", "box", v)),
            }
        }),
    );
    m.register_native(
        "set-box!",
        native(|m: &mut Machine, args: &[Value]| {
            expect_arity("set-box!", args, 2)?;
            match &args[0] {
                Value::Box(idx) => {
                    m.box_set(*idx, args[1].clone());
                    Ok(Value::Nil)
                }
                v => Err(type_error("set-box!", "box", v)),
            }
        }),
    );
    m.register_native(
        "on-collect",
        native(|m: &mut Machine, args: &[Value]| {
            expect_arity("on-collect", args, 2)?;
            expect_callable("on-collect", &args[1])?;
            match &args[0] {
                Value::Box(idx) => {
                    m.set_finalizer(*idx, args[1].clone());
                    Ok(args[0].clone())
                }
                v => Err(type_error("on-collect", "box", v)),
            }
        }),
    );
}
