//! Collectable object storage and the refcounted registry.
//!
//! Closures and boxes live in slot maps and are reclaimed by a mark-sweep
//! collector. Every object is born young; a minor sweep only frees young
//! objects and promotes the survivors, a full sweep considers everything.
//! Marking is always complete, so a minor sweep never frees a reachable object.
//!
//! Registry entries are the opposite: they are explicitly reference counted by
//! the host and act as collector roots for as long as they exist.

use std::{collections::HashSet, rc::Rc};

use slotmap::SlotMap;

use super::{
    env::EnvRef,
    value::{BoxIdx, ClosureIdx, RegistryKey, Value},
};
use crate::ast::Lambda;

pub const CLOSURE_BYTES: usize = 64;
pub const BOX_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct HeapObject<T> {
    pub data: T,
    /// Accounted size in bytes.
    pub size: usize,
    pub marked: bool,
    pub young: bool,
}

impl<T> HeapObject<T> {
    pub fn new(data: T, size: usize) -> Self {
        Self {
            data,
            size,
            marked: false,
            young: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub lambda: Rc<Lambda>,
    pub env: EnvRef,
    /// Index of the chunk the lambda was compiled from.
    pub chunk: usize,
    /// Chunk entry points run directly in the scope they close over.
    pub is_chunk: bool,
}

#[derive(Debug, Clone)]
pub struct BoxObject {
    pub value: Value,
    /// Called with the boxed value once the box became unreachable.
    pub finalizer: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub value: Value,
    pub refcount: u64,
}

pub type ClosureStorage = SlotMap<ClosureIdx, HeapObject<Closure>>;
pub type BoxStorage = SlotMap<BoxIdx, HeapObject<BoxObject>>;
pub type Registry = SlotMap<RegistryKey, RegistryEntry>;

/// Increment the reference count of a registry entry. Returns `false` for a stale key.
pub fn registry_retain(registry: &mut Registry, key: RegistryKey) -> bool {
    if let Some(entry) = registry.get_mut(key) {
        entry.refcount += 1;
        log::trace!("registry_retain: {:?} refcount -> {}", key, entry.refcount);
        true
    } else {
        log::warn!("registry_retain: invalid RegistryKey {key:?}");
        false
    }
}

/// Decrement the reference count of a registry entry and drop it at zero.
/// Returns `false` for a stale key.
pub fn registry_release(registry: &mut Registry, key: RegistryKey) -> bool {
    let Some(entry) = registry.get_mut(key) else {
        log::warn!("registry_release: invalid RegistryKey {key:?}");
        return false;
    };
    entry.refcount -= 1;
    log::trace!("registry_release: {:?} refcount -> {}", key, entry.refcount);
    if entry.refcount == 0 {
        log::trace!("registry_release: freeing {key:?}");
        registry.remove(key);
    }
    true
}

/// Outcome of one sweep.
#[derive(Debug, Default)]
pub struct Swept {
    pub freed_bytes: usize,
    pub freed_objects: usize,
    /// `(finalizer, boxed value)` pairs of boxes that died in this sweep.
    pub finalizers: Vec<(Value, Value)>,
}

#[derive(Debug, Default)]
pub struct Heap {
    pub closures: ClosureStorage,
    pub boxes: BoxStorage,
    pub registry: Registry,
    /// Bytes allocated since the last sweep.
    pub debt: usize,
    pub minor_count: u32,
}

impl Heap {
    /// Mark everything reachable from `roots`, `envs` and the registry.
    pub fn mark(&mut self, roots: Vec<Value>, envs: Vec<EnvRef>) {
        let mut gray = roots;
        gray.extend(self.registry.values().map(|e| e.value.clone()));
        let mut env_stack = envs;
        let mut seen_envs = HashSet::new();
        loop {
            if let Some(v) = gray.pop() {
                match v {
                    Value::List(items) => gray.extend(items.iter().cloned()),
                    Value::Closure(idx) => {
                        if let Some(obj) = self.closures.get_mut(idx)
                            && !obj.marked
                        {
                            obj.marked = true;
                            env_stack.push(obj.data.env.clone());
                        }
                    }
                    Value::Box(idx) => {
                        if let Some(obj) = self.boxes.get_mut(idx)
                            && !obj.marked
                        {
                            obj.marked = true;
                            gray.push(obj.data.value.clone());
                            if let Some(f) = &obj.data.finalizer {
                                gray.push(f.clone());
                            }
                        }
                    }
                    _ => {}
                }
                continue;
            }
            let Some(env) = env_stack.pop() else {
                break;
            };
            if seen_envs.insert(Rc::as_ptr(&env)) {
                let scope = env.borrow();
                gray.extend(scope.vars.values().cloned());
                if let Some(p) = &scope.parent {
                    env_stack.push(p.clone());
                }
            }
        }
    }

    fn doomed<T>(obj: &HeapObject<T>, young_only: bool) -> bool {
        !obj.marked && (obj.young || !young_only)
    }

    /// Free every unmarked object (only young ones if `young_only`) and reset marks.
    pub fn sweep(&mut self, young_only: bool) -> Swept {
        // Finalizers and their arguments must outlive this sweep.
        let resurrect = self
            .boxes
            .values()
            .filter(|obj| Self::doomed(obj, young_only))
            .filter_map(|obj| {
                obj.data
                    .finalizer
                    .clone()
                    .map(|f| Value::list([f, obj.data.value.clone()]))
            })
            .collect::<Vec<_>>();
        if !resurrect.is_empty() {
            self.mark(resurrect, vec![]);
        }

        let mut swept = Swept::default();
        self.closures.retain(|idx, obj| {
            if Self::doomed(obj, young_only) {
                log::trace!("sweep: freeing closure {idx:?}");
                swept.freed_bytes += obj.size;
                swept.freed_objects += 1;
                false
            } else {
                obj.marked = false;
                obj.young = false;
                true
            }
        });
        self.boxes.retain(|idx, obj| {
            if Self::doomed(obj, young_only) {
                log::trace!("sweep: freeing box {idx:?}");
                swept.freed_bytes += obj.size;
                swept.freed_objects += 1;
                if let Some(f) = obj.data.finalizer.take() {
                    swept.finalizers.push((f, obj.data.value.clone()));
                }
                false
            } else {
                obj.marked = false;
                obj.young = false;
                true
            }
        });
        self.debt = 0;
        swept
    }

    /// Drop every object regardless of reachability. Returns the accounted bytes.
    pub fn clear(&mut self) -> usize {
        let bytes = self.closures.values().map(|o| o.size).sum::<usize>()
            + self.boxes.values().map(|o| o.size).sum::<usize>();
        self.closures.clear();
        self.boxes.clear();
        self.registry.clear();
        self.debt = 0;
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::vm::env::Env;

    fn dummy_closure(env: &EnvRef) -> HeapObject<Closure> {
        let lambda = Rc::new(Lambda {
            name: None,
            params: vec![],
            rest: None,
            body: vec![],
            span: 0..0,
        });
        HeapObject::new(
            Closure {
                lambda,
                env: env.clone(),
                chunk: 0,
                is_chunk: false,
            },
            CLOSURE_BYTES,
        )
    }

    #[test]
    fn test_registry_retain_and_release() {
        let mut registry = Registry::default();
        let key = registry.insert(RegistryEntry {
            value: Value::Nil,
            refcount: 1,
        });
        assert!(registry_retain(&mut registry, key));
        assert_eq!(registry.get(key).unwrap().refcount, 2);
        assert!(registry_release(&mut registry, key));
        assert_eq!(registry.get(key).unwrap().refcount, 1);
        assert!(registry_release(&mut registry, key));
        assert!(registry.get(key).is_none());
        assert!(!registry_release(&mut registry, key));
    }

    #[test]
    fn unreachable_objects_are_swept() {
        let mut heap = Heap::default();
        let env = Env::root();
        let kept = heap.closures.insert(dummy_closure(&env));
        let _lost = heap.closures.insert(dummy_closure(&env));
        env.borrow_mut().define("k".into(), Value::Closure(kept));
        heap.mark(vec![], vec![env.clone()]);
        let swept = heap.sweep(false);
        assert_eq!(swept.freed_objects, 1);
        assert_eq!(swept.freed_bytes, CLOSURE_BYTES);
        assert!(heap.closures.contains_key(kept));
    }

    #[test]
    fn minor_sweep_spares_old_objects() {
        let mut heap = Heap::default();
        let env = Env::root();
        let old = heap.boxes.insert(HeapObject::new(
            BoxObject {
                value: Value::Nil,
                finalizer: None,
            },
            BOX_BYTES,
        ));
        heap.mark(vec![Value::Box(old)], vec![]);
        heap.sweep(true);
        assert!(!heap.boxes[old].young);

        let young = heap.boxes.insert(HeapObject::new(
            BoxObject {
                value: Value::Nil,
                finalizer: None,
            },
            BOX_BYTES,
        ));
        heap.mark(vec![], vec![env]);
        let swept = heap.sweep(true);
        assert_eq!(swept.freed_objects, 1);
        assert!(heap.boxes.contains_key(old));
        assert!(!heap.boxes.contains_key(young));

        heap.mark(vec![], vec![]);
        heap.sweep(false);
        assert!(heap.boxes.is_empty());
    }

    #[test]
    fn dying_box_yields_its_finalizer() {
        let mut heap = Heap::default();
        let env = Env::root();
        let fin = heap.closures.insert(dummy_closure(&env));
        heap.boxes.insert(HeapObject::new(
            BoxObject {
                value: Value::Number(7.0),
                finalizer: Some(Value::Closure(fin)),
            },
            BOX_BYTES,
        ));
        heap.mark(vec![], vec![]);
        let swept = heap.sweep(false);
        assert_eq!(swept.finalizers, vec![(Value::Closure(fin), Value::Number(7.0))]);
        // the finalizer closure itself survives so it can still be called
        assert!(heap.closures.contains_key(fin));
    }
}
