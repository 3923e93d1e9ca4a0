//! codedrop protocol types: rendezvous commands/responses and the transfer metadata envelope.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default rendezvous server TCP port.
pub const DEFAULT_RENDEZVOUS_PORT: u16 = 8080;
/// Default sharer listen port.
pub const DEFAULT_SHARE_PORT: u16 = 8081;

const NOT_FOUND_LINE: &str = "Peer did not exist";
const REGISTERED_PREFIX: &str = "OK Registered code ";
const FOUND_SUFFIX: &str = " found";
const ERROR_PREFIX: &str = "ERROR ";

/// Request line sent to the rendezvous server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Register `code` for the caller. `port` replaces the source port of the
    /// registering connection when present.
    Add { code: String, port: Option<u16> },
    /// Look up the address registered for `code`.
    Look { code: String },
}

/// Why a command line was refused. The display text is the reason sent back in `ERROR <reason>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid command format")]
    Malformed,
    #[error("Unknown command")]
    Unknown,
    #[error("Invalid port")]
    InvalidPort,
}

impl Command {
    /// Parse one request line (without or with trailing newline).
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let text = line.trim();
        let parts: Vec<&str> = text.splitn(3, ' ').collect();
        if parts.len() < 2 {
            return Err(CommandError::Malformed);
        }
        let code = parts[1].to_string();
        match parts[0] {
            "ADD" => {
                let port = match parts.get(2) {
                    Some(p) => Some(p.trim().parse::<u16>().map_err(|_| CommandError::InvalidPort)?),
                    None => None,
                };
                Ok(Command::Add { code, port })
            }
            "LOOK" => Ok(Command::Look { code }),
            _ => Err(CommandError::Unknown),
        }
    }

    /// Wire form, newline-terminated.
    pub fn to_line(&self) -> String {
        match self {
            Command::Add {
                code,
                port: Some(port),
            } => format!("ADD {} {}\n", code, port),
            Command::Add { code, port: None } => format!("ADD {}\n", code),
            Command::Look { code } => format!("LOOK {}\n", code),
        }
    }
}

/// Reply line from the rendezvous server. Serialized to the legacy literal text only at the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Registered(String),
    Found(SocketAddr),
    NotFound,
    Error(String),
}

/// Reply line that matches none of the known shapes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized rendezvous reply: {0:?}")]
pub struct ResponseParseError(pub String);

impl Response {
    /// Wire form, newline-terminated.
    pub fn to_line(&self) -> String {
        match self {
            Response::Registered(code) => format!("{}{}\n", REGISTERED_PREFIX, code),
            Response::Found(addr) => format!("{}{}\n", addr, FOUND_SUFFIX),
            Response::NotFound => format!("{}\n", NOT_FOUND_LINE),
            Response::Error(reason) => format!("{}{}\n", ERROR_PREFIX, reason),
        }
    }

    /// Parse a reply line. The formats are asymmetric, so each shape is matched structurally.
    pub fn parse(line: &str) -> Result<Self, ResponseParseError> {
        let text = line.trim();
        if text == NOT_FOUND_LINE {
            return Ok(Response::NotFound);
        }
        if let Some(code) = text.strip_prefix(REGISTERED_PREFIX) {
            if !code.is_empty() {
                return Ok(Response::Registered(code.to_string()));
            }
        }
        if let Some(reason) = text.strip_prefix(ERROR_PREFIX) {
            return Ok(Response::Error(reason.to_string()));
        }
        if let Some(addr) = text.strip_suffix(FOUND_SUFFIX) {
            if let Ok(addr) = addr.parse::<SocketAddr>() {
                return Ok(Response::Found(addr));
            }
        }
        Err(ResponseParseError(text.to_string()))
    }
}

impl From<CommandError> for Response {
    fn from(e: CommandError) -> Self {
        Response::Error(e.to_string())
    }
}

/// Kind of a transferred object or directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    File,
    Dir,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::File => f.write_str("file"),
            ObjectKind::Dir => f.write_str("dir"),
        }
    }
}

/// Metadata envelope preceding every transferred object or sub-entry.
///
/// `size` and `checksum` describe the compressed payload that follows a file entry;
/// the checksum is always over the compressed bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    /// Relative path (`/`-separated) of a directory-walk entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Base name of a root object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl ObjectMetadata {
    /// Root announcement: kind and name only, no payload.
    pub fn root(kind: ObjectKind, filename: impl Into<String>) -> Self {
        Self {
            kind,
            path: None,
            filename: Some(filename.into()),
            size: None,
            checksum: None,
        }
    }

    /// Full metadata of a single shared file.
    pub fn file(filename: impl Into<String>, size: u64, checksum: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::File,
            path: None,
            filename: Some(filename.into()),
            size: Some(size),
            checksum: Some(checksum.into()),
        }
    }

    /// Directory node inside a shared tree.
    pub fn dir_entry(path: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::Dir,
            path: Some(path.into()),
            filename: None,
            size: None,
            checksum: None,
        }
    }

    /// File node inside a shared tree.
    pub fn file_entry(path: impl Into<String>, size: u64, checksum: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::File,
            path: Some(path.into()),
            filename: None,
            size: Some(size),
            checksum: Some(checksum.into()),
        }
    }

    /// Payload size and checksum of a file entry. Missing fields mean the entry carries no payload.
    pub fn payload(&self) -> Option<(u64, &str)> {
        match (self.kind, self.size, self.checksum.as_deref()) {
            (ObjectKind::File, Some(size), Some(checksum)) => Some((size, checksum)),
            _ => None,
        }
    }
}

/// Rejected path in a metadata line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("empty path")]
    Empty,
    #[error("unsafe path {0:?}")]
    Unsafe(String),
}

/// Validate a root object name: exactly one normal path component.
pub fn sanitize_filename(name: &str) -> Result<PathBuf, PathError> {
    let path = sanitize_relative_path(name)?;
    if path.components().count() != 1 {
        return Err(PathError::Unsafe(name.to_string()));
    }
    Ok(path)
}

/// Validate a `/`-separated relative entry path and convert it to a platform path.
/// Only normal components are accepted; `..`, `.`, empty segments, roots and backslashes are refused.
pub fn sanitize_relative_path(path: &str) -> Result<PathBuf, PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if path.contains('\\') || path.contains('\0') {
        return Err(PathError::Unsafe(path.to_string()));
    }
    let mut out = PathBuf::new();
    for segment in path.split('/') {
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(c)), None) if c == segment => out.push(c),
            _ => return Err(PathError::Unsafe(path.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_add_with_and_without_port() {
        assert_eq!(
            Command::parse("ADD abc123\n").unwrap(),
            Command::Add {
                code: "abc123".into(),
                port: None
            }
        );
        assert_eq!(
            Command::parse("  ADD abc123 8081  ").unwrap(),
            Command::Add {
                code: "abc123".into(),
                port: Some(8081)
            }
        );
        assert_eq!(
            Command::parse("ADD abc123 notaport"),
            Err(CommandError::InvalidPort)
        );
    }

    #[test]
    fn parse_rejects_short_and_unknown() {
        assert_eq!(Command::parse("ADD"), Err(CommandError::Malformed));
        assert_eq!(Command::parse(""), Err(CommandError::Malformed));
        assert_eq!(Command::parse("INVALID abc123"), Err(CommandError::Unknown));
        assert_eq!(
            Response::from(CommandError::Unknown).to_line(),
            "ERROR Unknown command\n"
        );
    }

    #[test]
    fn response_lines_match_legacy_text() {
        let addr: SocketAddr = "192.168.1.100:8080".parse().unwrap();
        assert_eq!(
            Response::Registered("abc123".into()).to_line(),
            "OK Registered code abc123\n"
        );
        assert_eq!(Response::Found(addr).to_line(), "192.168.1.100:8080 found\n");
        assert_eq!(Response::NotFound.to_line(), "Peer did not exist\n");
        assert_eq!(Response::parse("192.168.1.100:8080 found\n").unwrap(), Response::Found(addr));
        assert_eq!(Response::parse("Peer did not exist").unwrap(), Response::NotFound);
        assert_eq!(
            Response::parse("ERROR Invalid command format").unwrap(),
            Response::Error("Invalid command format".into())
        );
    }

    #[test]
    fn response_parse_rejects_garbage() {
        assert!(Response::parse("nonsense found").is_err());
        assert!(Response::parse("").is_err());
        assert!(Response::parse("OK Registered code ").is_err());
    }

    #[test]
    fn payload_only_for_complete_file_entries() {
        assert_eq!(
            ObjectMetadata::file("a.txt", 10, "ff").payload(),
            Some((10, "ff"))
        );
        assert_eq!(ObjectMetadata::root(ObjectKind::File, "a.txt").payload(), None);
        assert_eq!(ObjectMetadata::dir_entry("sub").payload(), None);
    }

    #[test]
    fn relative_paths_are_confined() {
        assert_eq!(
            sanitize_relative_path("sub/b.txt").unwrap(),
            Path::new("sub").join("b.txt")
        );
        for bad in ["", "../x", "/etc/passwd", "a//b", "a/./b", "a/..", "a\\b", "sub/"] {
            assert!(sanitize_relative_path(bad).is_err(), "accepted {:?}", bad);
        }
        assert!(sanitize_filename("hello.txt").is_ok());
        assert!(sanitize_filename("sub/hello.txt").is_err());
    }
}
