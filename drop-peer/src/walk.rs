//! Directory walk: a lazy, ordered sequence of tree entries with their file contents.
//! Depth-first, siblings sorted by name, so every directory precedes its descendants.

use std::io;
use std::path::{Component, Path, PathBuf};

use drop_core::ObjectKind;
use log::warn;
use walkdir::WalkDir;

/// One node below the shared root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// `/`-separated path relative to the root.
    pub relative_path: String,
    pub kind: ObjectKind,
    /// Raw file bytes for files, `None` for directories.
    pub contents: Option<Vec<u8>>,
}

/// Failure at one path of the walk.
#[derive(Debug, thiserror::Error)]
#[error("{}: {source}", path.display())]
pub struct WalkError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl WalkError {
    fn at(path: &Path, source: io::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Iterate the entries under `root` (the root itself excluded). Files are read as they are
/// reached; symbolic links and special files are skipped.
pub fn entries(root: &Path) -> impl Iterator<Item = Result<WalkEntry, WalkError>> {
    let root = root.to_path_buf();
    WalkDir::new(&root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(move |item| {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    let path = e.path().unwrap_or(&root).to_path_buf();
                    return Some(Err(WalkError {
                        path,
                        source: io::Error::from(e),
                    }));
                }
            };
            let file_type = item.file_type();
            let kind = if file_type.is_dir() {
                ObjectKind::Dir
            } else if file_type.is_file() {
                ObjectKind::File
            } else {
                warn!("skipping {}: not a regular file or directory", item.path().display());
                return None;
            };
            Some(to_entry(&root, item.path(), kind).map_err(|e| WalkError::at(item.path(), e)))
        })
}

fn to_entry(root: &Path, path: &Path, kind: ObjectKind) -> io::Result<WalkEntry> {
    let relative = path
        .strip_prefix(root)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let relative_path = wire_path(relative)?;
    let contents = match kind {
        ObjectKind::File => Some(std::fs::read(path)?),
        ObjectKind::Dir => None,
    };
    Ok(WalkEntry {
        relative_path,
        kind,
        contents,
    })
}

/// Join normal components with `/`. Names that are not UTF-8 cannot travel in a metadata line.
fn wire_path(relative: &Path) -> io::Result<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => match name.to_str() {
                Some(s) => parts.push(s),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("non UTF-8 file name under {}", relative.display()),
                    ))
                }
            },
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unexpected path component in {}", relative.display()),
                ))
            }
        }
    }
    Ok(parts.join("/"))
}

/// Base name of the shared object, used as the root name on the wire.
pub fn root_name(path: &Path) -> io::Result<String> {
    let canonical: PathBuf = std::fs::canonicalize(path)?;
    canonical
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no usable file name", path.display()),
            )
        })
}
