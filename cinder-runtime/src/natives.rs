//! Resolution of host natives by hash.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::{
    error::{Error, Result},
    host::{NativeHandler, NativeTable},
};

/// One entry of a `natives_<build>.json` file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NativeDecl {
    pub name: String,
    pub hash: u64,
}

/// `GET_GAME_TIMER` is bound as `get-game-timer`.
pub fn script_name(native: &str) -> String {
    native.to_ascii_lowercase().replace('_', "-")
}

#[derive(Debug, Default)]
pub struct NativeResolver {
    names: HashMap<String, u64>,
    /// Hashes already reported missing. Only teardown empties it.
    unresolved: HashSet<u64>,
}

impl NativeResolver {
    pub fn resolve(&mut self, table: Option<&dyn NativeTable>, hash: u64) -> Result<NativeHandler> {
        if let Some(handler) = table.and_then(|t| t.get_native(hash)) {
            return Ok(handler);
        }
        if self.unresolved.insert(hash) {
            log::warn!("native {hash:#018x} could not be resolved");
        }
        Err(Error::NativeMissing(hash))
    }

    pub fn is_known_missing(&self, hash: u64) -> bool {
        self.unresolved.contains(&hash)
    }

    pub fn register_build(&mut self, decls: &[NativeDecl]) {
        for decl in decls {
            self.names.insert(decl.name.clone(), decl.hash);
        }
        log::debug!("registered {} native names", decls.len());
    }

    /// Accepts either the declared name or its script spelling.
    pub fn hash_for(&self, name: &str) -> Option<u64> {
        self.names.get(name).copied().or_else(|| {
            self.names
                .iter()
                .find(|(n, _)| script_name(n) == name)
                .map(|(_, h)| *h)
        })
    }

    pub fn clear(&mut self) {
        self.names.clear();
        self.unresolved.clear();
    }
}
