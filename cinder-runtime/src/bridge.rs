//! Built-in script reference table.
//!
//! A script reference is an opaque `i32` handed to the host. Each id is an
//! alias of one registry entry in the machine; duplicating an id retains the
//! entry and creates a new alias, deleting an alias releases it. The entry, and
//! the value it keeps alive, goes away with its last alias.

use std::collections::HashMap;

use cinder_lang::runtime::vm::{Machine, RegistryKey, Value};

use crate::error::{Error, Result};

pub type ScriptRef = i32;

#[derive(Debug)]
pub struct RefTable {
    next: ScriptRef,
    entries: HashMap<ScriptRef, RegistryKey>,
}

impl Default for RefTable {
    fn default() -> Self {
        Self {
            next: 1,
            entries: HashMap::new(),
        }
    }
}

impl RefTable {
    /// Ids are positive and wrap around, skipping ids that are still live.
    fn alias(&mut self, key: RegistryKey) -> ScriptRef {
        let step = |id: ScriptRef| id.checked_add(1).unwrap_or(1);
        let mut id = self.next;
        while self.entries.contains_key(&id) {
            id = step(id);
        }
        self.next = step(id);
        self.entries.insert(id, key);
        id
    }

    pub fn create(&mut self, m: &mut Machine, value: Value) -> ScriptRef {
        let key = m.registry_ref(value);
        self.alias(key)
    }

    pub fn get(&self, m: &Machine, id: ScriptRef) -> Result<Value> {
        self.entries
            .get(&id)
            .and_then(|key| m.registry_get(*key))
            .ok_or(Error::RefInvalid(id))
    }

    pub fn duplicate(&mut self, m: &mut Machine, id: ScriptRef) -> Result<ScriptRef> {
        let key = *self.entries.get(&id).ok_or(Error::RefInvalid(id))?;
        if !m.registry_retain(key) {
            return Err(Error::RefInvalid(id));
        }
        Ok(self.alias(key))
    }

    pub fn delete(&mut self, m: &mut Machine, id: ScriptRef) -> Result<()> {
        let key = self.entries.remove(&id).ok_or(Error::RefInvalid(id))?;
        m.registry_release(key);
        Ok(())
    }

    /// Reference count shared by every alias of `id`.
    pub fn refcount(&self, m: &Machine, id: ScriptRef) -> Option<u64> {
        self.entries.get(&id).and_then(|key| m.registry_refcount(*key))
    }

    pub fn contains(&self, id: ScriptRef) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every alias without touching the machine, which is going away.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use cinder_lang::runtime::alloc::AllocatorKind;

    fn machine() -> Machine {
        Machine::new(Default::default(), AllocatorKind::System.create()).unwrap()
    }

    #[test]
    fn aliases_share_one_entry() {
        let mut m = machine();
        let mut refs = RefTable::default();
        let a = refs.create(&mut m, Value::from(42.0));
        let b = refs.duplicate(&mut m, a).unwrap();
        assert_ne!(a, b);
        assert_eq!(refs.refcount(&m, a), Some(2));
        assert_eq!(m.registry_len(), 1);

        refs.delete(&mut m, a).unwrap();
        assert!(matches!(refs.get(&m, a), Err(Error::RefInvalid(_))));
        assert_eq!(refs.get(&m, b).unwrap(), Value::from(42.0));
        assert_eq!(refs.refcount(&m, b), Some(1));

        refs.delete(&mut m, b).unwrap();
        assert_eq!(m.registry_len(), 0);
        assert!(refs.is_empty());
    }

    #[test]
    fn unknown_ids_are_invalid() {
        let mut m = machine();
        let mut refs = RefTable::default();
        assert!(matches!(refs.duplicate(&mut m, 9), Err(Error::RefInvalid(9))));
        assert!(matches!(refs.delete(&mut m, 9), Err(Error::RefInvalid(9))));
        let a = refs.create(&mut m, Value::Nil);
        refs.delete(&mut m, a).unwrap();
        assert!(matches!(refs.delete(&mut m, a), Err(Error::RefInvalid(_))));
    }

    #[test]
    fn wrapped_ids_skip_live_aliases() {
        let mut m = machine();
        let mut refs = RefTable::default();
        let first = refs.create(&mut m, Value::from("kept"));
        assert_eq!(first, 1);
        refs.next = ScriptRef::MAX;
        assert_eq!(refs.create(&mut m, Value::Nil), ScriptRef::MAX);
        let wrapped = refs.create(&mut m, Value::from(2.0));
        assert_eq!(wrapped, 2);
        assert_eq!(refs.get(&m, first).unwrap(), Value::from("kept"));
        assert_eq!(refs.refcount(&m, first), Some(1));
        assert_eq!(m.registry_len(), 3);
    }
}
