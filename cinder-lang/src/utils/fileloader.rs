use std::{env, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),
    #[error("File {path} not found: {message}", path = path.display())]
    FileNotFound { message: String, path: PathBuf },
    #[error("Failed to convert into UTF: {0}")]
    UtfConversionError(#[from] std::string::FromUtf8Error),
    #[error("Path {} escapes its root directory", path.to_string_lossy())]
    OutsideRoot { path: PathBuf },
}

pub fn get_canonical_path(current_file_or_dir: &str, relpath: &str) -> Result<PathBuf, Error> {
    let parent_dir = get_parent_dir(current_file_or_dir)?;
    let relpath2 = std::path::PathBuf::from(relpath);
    let abspath = [parent_dir, relpath2]
        .into_iter()
        .collect::<std::path::PathBuf>();
    abspath.canonicalize().map_err(|e| Error::FileNotFound {
        message: e.to_string(),
        path: abspath,
    })
}

fn get_parent_dir(current_file: &str) -> Result<PathBuf, Error> {
    let current_filepath = std::path::Path::new(current_file);
    if current_filepath.is_dir() {
        Ok(current_filepath.into())
    } else {
        let cwd = env::current_dir()?;
        Ok(current_filepath.parent().map_or_else(|| cwd, PathBuf::from))
    }
}

/// Resolve `relpath` under `root`, refusing absolute paths and `..` components.
pub fn resolve_under(root: &std::path::Path, relpath: &str) -> Result<PathBuf, Error> {
    let rel = std::path::Path::new(relpath);
    let escapes = rel.is_absolute()
        || rel
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
    if escapes {
        return Err(Error::OutsideRoot { path: rel.into() });
    }
    Ok(root.join(rel))
}

pub fn load(canonical_path: &str) -> Result<String, Error> {
    let content = std::fs::read(canonical_path).map_err(|e| Error::FileNotFound {
        message: e.to_string(),
        path: PathBuf::from(canonical_path),
    })?;

    let content_r = String::from_utf8(content).map_err(Error::from)?;
    Ok(content_r)
}

/// Read a whole stream into a string. Used for host-provided file streams.
pub fn load_stream(mut stream: impl std::io::Read) -> Result<String, Error> {
    let mut content = Vec::new();
    stream.read_to_end(&mut content)?;
    Ok(String::from_utf8(content)?)
}
