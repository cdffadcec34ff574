//! Script sources and the record of what was loaded.
//!
//! Identifiers starting with `system:/` come from the system backend: a
//! directory on disk, falling back to the scripts compiled into this crate.
//! Everything else is opened through the host.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use cinder_lang::utils::fileloader;

use crate::{
    error::{Error, Result},
    host::ScriptHost,
    natives::NativeDecl,
};

pub const SYSTEM_PREFIX: &str = "system:/";

const EMBEDDED: &[(&str, &str)] = &[("prelude.cin", include_str!("../system/prelude.cin"))];

pub fn is_system(name: &str) -> bool {
    name.starts_with(SYSTEM_PREFIX)
}

/// The system backend.
#[derive(Debug, Clone, Default)]
pub struct SystemFiles {
    dir: Option<PathBuf>,
}

impl SystemFiles {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn read(&self, name: &str) -> Result<String> {
        let rel = name.strip_prefix(SYSTEM_PREFIX).unwrap_or(name);
        let io = |source| Error::Io {
            name: name.to_string(),
            source,
        };
        if let Some(dir) = &self.dir {
            let path = fileloader::resolve_under(dir, rel).map_err(io)?;
            if path.is_file() {
                return fileloader::load(&path.to_string_lossy()).map_err(io);
            }
        }
        EMBEDDED
            .iter()
            .find(|(n, _)| *n == rel)
            .map(|(_, src)| src.to_string())
            .ok_or_else(|| {
                io(fileloader::Error::FileNotFound {
                    message: "no such system script".to_string(),
                    path: PathBuf::from(rel),
                })
            })
    }
}

pub fn read_host_file(host: &dyn ScriptHost, name: &str) -> Result<String> {
    let io = |source| Error::Io {
        name: name.to_string(),
        source,
    };
    let stream = host
        .open_host_file(name)
        .map_err(|e| io(fileloader::Error::from(e)))?;
    fileloader::load_stream(stream).map_err(io)
}

/// Read `natives_<build>.json` from `dir`.
pub fn read_natives_build(dir: &Path, build: &str) -> Result<Vec<NativeDecl>> {
    let name = format!("natives_{build}.json");
    let path = fileloader::resolve_under(dir, &name).map_err(|source| Error::Io {
        name: name.clone(),
        source,
    })?;
    let text = fileloader::load(&path.to_string_lossy()).map_err(|source| Error::Io {
        name: name.clone(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

/// Identifier to load ids, plus the ordered log of every load.
#[derive(Debug, Default)]
pub struct LoadedScriptRegistry {
    ids: HashMap<String, Vec<u32>>,
    log: Vec<String>,
}

impl LoadedScriptRegistry {
    /// Record a successful compile and return its load id.
    pub fn record(&mut self, name: &str) -> u32 {
        let id = self.log.len() as u32;
        self.log.push(name.to_string());
        self.ids.entry(name.to_string()).or_default().push(id);
        id
    }

    pub fn ids_for(&self, name: &str) -> &[u32] {
        self.ids.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.log.get(id as usize).map(String::as_str)
    }

    pub fn loads(&self) -> &[String] {
        &self.log
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registry_keeps_every_load() {
        let mut reg = LoadedScriptRegistry::default();
        assert_eq!(reg.record("a.cin"), 0);
        assert_eq!(reg.record("b.cin"), 1);
        assert_eq!(reg.record("a.cin"), 2);
        assert_eq!(reg.ids_for("a.cin"), &[0, 2]);
        assert_eq!(reg.name_of(1), Some("b.cin"));
        assert_eq!(reg.loads(), &["a.cin", "b.cin", "a.cin"]);
        assert!(reg.ids_for("c.cin").is_empty());
    }

    #[test]
    fn system_files_prefer_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("prelude.cin"), "(define from-disk true)").unwrap();
        let on_disk = SystemFiles::new(Some(dir.path().to_path_buf()));
        assert_eq!(on_disk.read("system:/prelude.cin").unwrap(), "(define from-disk true)");

        let embedded = SystemFiles::default();
        assert!(embedded.read("system:/prelude.cin").unwrap().contains("defn"));
        assert!(matches!(
            embedded.read("system:/missing.cin"),
            Err(Error::Io { .. })
        ));
        assert!(matches!(
            on_disk.read("system:/../escape.cin"),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn natives_build_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("natives_2802.json"),
            r#"[{"name":"GET_GAME_TIMER","hash":11300229656120296547}]"#,
        )
        .unwrap();
        let decls = read_natives_build(dir.path(), "2802").unwrap();
        assert_eq!(decls[0].name, "GET_GAME_TIMER");
        assert_eq!(decls[0].hash, 0x9cd27b0045628463);
        assert!(matches!(
            read_natives_build(dir.path(), "1"),
            Err(Error::Io { .. })
        ));
    }
}
