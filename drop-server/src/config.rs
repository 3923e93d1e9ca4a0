//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Rendezvous server configuration. File: ~/.config/codedrop/server.toml or /etc/codedrop/server.toml.
/// Env overrides: CODEDROP_SERVER_PORT, CODEDROP_PEER_TTL_SECS, CODEDROP_SWEEP_INTERVAL_SECS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// TCP listen port (default 8080).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds a registration stays valid without a re-ADD (default 420).
    #[serde(default = "default_peer_ttl_secs")]
    pub peer_ttl_secs: u64,
    /// Seconds between expiry sweeps (default 60).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_port() -> u16 {
    drop_core::protocol::DEFAULT_RENDEZVOUS_PORT
}
fn default_peer_ttl_secs() -> u64 {
    drop_core::DEFAULT_PEER_TTL.as_secs()
}
fn default_sweep_interval_secs() -> u64 {
    drop_core::DEFAULT_SWEEP_INTERVAL.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            peer_ttl_secs: default_peer_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Config {
    pub fn peer_ttl(&self) -> Duration {
        Duration::from_secs(self.peer_ttl_secs)
    }

    /// Sweep interval, never zero.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("CODEDROP_SERVER_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.port = p;
    }
    if let Some(s) = var("CODEDROP_PEER_TTL_SECS").and_then(|s| s.parse::<u64>().ok()) {
        c.peer_ttl_secs = s;
    }
    if let Some(s) = var("CODEDROP_SWEEP_INTERVAL_SECS").and_then(|s| s.parse::<u64>().ok()) {
        c.sweep_interval_secs = s;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/codedrop/server.toml"));
    }
    out.push(PathBuf::from("/etc/codedrop/server.toml"));
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
