//! Lexical scopes of the evaluator.
//!
//! A scope is shared by every closure created inside it, so scopes are
//! reference counted. Closures are referred to by index, never by `Rc`, which
//! keeps scope chains acyclic: a cycle through a closure is broken when the
//! collector removes the closure from the heap.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use super::value::Value;

pub type EnvRef = Rc<RefCell<Env>>;

#[derive(Debug, Default)]
pub struct Env {
    pub vars: HashMap<Rc<str>, Value>,
    pub parent: Option<EnvRef>,
}

/// Result of name lookup on an [`Env`] chain.
#[derive(Clone, Debug, PartialEq)]
pub enum LookupRes {
    /// Binding exists in the innermost scope.
    Local(Value),
    /// Binding is found `usize` scopes above the innermost one.
    Outer(usize, Value),
    /// Binding is located in the root scope.
    Global(Value),
    None,
}

impl Env {
    pub fn root() -> EnvRef {
        Rc::new(RefCell::new(Env::default()))
    }

    pub fn child(parent: &EnvRef) -> EnvRef {
        Rc::new(RefCell::new(Env {
            vars: HashMap::new(),
            parent: Some(parent.clone()),
        }))
    }

    pub fn define(&mut self, name: Rc<str>, v: Value) {
        self.vars.insert(name, v);
    }

    pub fn lookup_res(env: &EnvRef, name: &str) -> LookupRes {
        let mut level = 0;
        let mut cur = env.clone();
        loop {
            let next = {
                let scope = cur.borrow();
                if let Some(v) = scope.vars.get(name) {
                    return match (level, &scope.parent) {
                        (_, None) => LookupRes::Global(v.clone()),
                        (0, Some(_)) => LookupRes::Local(v.clone()),
                        (l, Some(_)) => LookupRes::Outer(l, v.clone()),
                    };
                }
                scope.parent.clone()
            };
            match next {
                Some(p) => {
                    cur = p;
                    level += 1;
                }
                None => return LookupRes::None,
            }
        }
    }

    pub fn lookup(env: &EnvRef, name: &str) -> Option<Value> {
        match Self::lookup_res(env, name) {
            LookupRes::Local(v) | LookupRes::Outer(_, v) | LookupRes::Global(v) => Some(v),
            LookupRes::None => None,
        }
    }

    /// Overwrite the nearest existing binding. Returns `false` if `name` is unbound.
    pub fn assign(env: &EnvRef, name: &str, v: Value) -> bool {
        let mut cur = env.clone();
        loop {
            let next = {
                let mut scope = cur.borrow_mut();
                if let Some(slot) = scope.vars.get_mut(name) {
                    *slot = v;
                    return true;
                }
                scope.parent.clone()
            };
            match next {
                Some(p) => cur = p,
                None => return false,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup_levels() {
        let root = Env::root();
        root.borrow_mut().define("g".into(), Value::Number(1.0));
        let mid = Env::child(&root);
        mid.borrow_mut().define("m".into(), Value::Number(2.0));
        let inner = Env::child(&mid);
        inner.borrow_mut().define("i".into(), Value::Number(3.0));

        assert_eq!(Env::lookup_res(&inner, "i"), LookupRes::Local(Value::Number(3.0)));
        assert_eq!(Env::lookup_res(&inner, "m"), LookupRes::Outer(1, Value::Number(2.0)));
        assert_eq!(Env::lookup_res(&inner, "g"), LookupRes::Global(Value::Number(1.0)));
        assert_eq!(Env::lookup_res(&inner, "x"), LookupRes::None);
    }

    #[test]
    fn assign_updates_nearest_binding() {
        let root = Env::root();
        root.borrow_mut().define("x".into(), Value::Number(1.0));
        let inner = Env::child(&root);
        assert!(Env::assign(&inner, "x", Value::Number(5.0)));
        assert_eq!(Env::lookup(&root, "x"), Some(Value::Number(5.0)));
        assert!(!Env::assign(&inner, "nope", Value::Nil));
    }
}
