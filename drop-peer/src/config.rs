//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::session::TransferOptions;

/// Peer configuration. File: ~/.config/codedrop/peer.toml or /etc/codedrop/peer.toml.
/// Env overrides: CODEDROP_SERVER_ADDR, CODEDROP_LISTEN_PORT, CODEDROP_TIMEOUT_SECS,
/// CODEDROP_PAYLOAD_TIMEOUT_SECS, CODEDROP_DOWNLOAD_DIR.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Rendezvous server, host:port (default 127.0.0.1:8080).
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Port the sharer listens on (default 8081).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Bound on dials, metadata lines and acks, in seconds (default 5).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bound on a single payload transfer, in seconds (default 300).
    #[serde(default = "default_payload_timeout_secs")]
    pub payload_timeout_secs: u64,
    /// Where received objects are written (default ./download).
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_server_addr() -> String {
    format!("127.0.0.1:{}", drop_core::protocol::DEFAULT_RENDEZVOUS_PORT)
}
fn default_listen_port() -> u16 {
    drop_core::protocol::DEFAULT_SHARE_PORT
}
fn default_timeout_secs() -> u64 {
    5
}
fn default_payload_timeout_secs() -> u64 {
    300
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("./download")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            listen_port: default_listen_port(),
            timeout_secs: default_timeout_secs(),
            payload_timeout_secs: default_payload_timeout_secs(),
            download_dir: default_download_dir(),
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            timeout: self.timeout(),
            payload_timeout: Duration::from_secs(self.payload_timeout_secs.max(1)),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("CODEDROP_SERVER_ADDR").filter(|s| s.contains(':')) {
        c.server_addr = s;
    }
    if let Some(p) = var("CODEDROP_LISTEN_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.listen_port = p;
    }
    if let Some(t) = var("CODEDROP_TIMEOUT_SECS").and_then(|s| s.parse::<u64>().ok()) {
        c.timeout_secs = t;
    }
    if let Some(t) = var("CODEDROP_PAYLOAD_TIMEOUT_SECS").and_then(|s| s.parse::<u64>().ok()) {
        c.payload_timeout_secs = t;
    }
    if let Some(d) = var("CODEDROP_DOWNLOAD_DIR").filter(|s| !s.is_empty()) {
        c.download_dir = PathBuf::from(d);
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/codedrop/peer.toml"));
    }
    out.push(PathBuf::from("/etc/codedrop/peer.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => log::warn!("ignoring invalid config {}: {}", p.display(), e),
                },
                Err(e) => log::warn!("cannot read config {}: {}", p.display(), e),
            }
            break;
        }
    }
    None
}
