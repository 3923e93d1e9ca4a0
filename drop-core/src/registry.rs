//! Peer registry: code -> address with last-seen time, TTL expiry driven by the host.
//! Time is passed in so the host owns the clock and tests can move it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::debug;

use crate::protocol::Response;

/// Registrations older than this are dropped by the next sweep.
pub const DEFAULT_PEER_TTL: Duration = Duration::from_secs(7 * 60);
/// Interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One registration. Unique per code; the last ADD wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub code: String,
    pub address: SocketAddr,
    pub last_seen: Instant,
}

/// Code -> peer mapping. Not synchronized; the host wraps it in a lock.
#[derive(Debug)]
pub struct Registry {
    peers: HashMap<String, PeerRecord>,
    ttl: Duration,
}

impl Registry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            ttl,
        }
    }

    /// Insert or replace the record for `code`. `last_seen` never moves backwards.
    pub fn register(&mut self, code: &str, address: SocketAddr, now: Instant) -> &PeerRecord {
        let last_seen = match self.peers.get(code) {
            Some(prev) if prev.last_seen > now => prev.last_seen,
            _ => now,
        };
        self.peers.insert(
            code.to_string(),
            PeerRecord {
                code: code.to_string(),
                address,
                last_seen,
            },
        );
        &self.peers[code]
    }

    pub fn lookup(&self, code: &str) -> Option<&PeerRecord> {
        self.peers.get(code)
    }

    /// Drop every record whose age at `now` exceeds the TTL. Returns the evicted codes.
    pub fn sweep(&mut self, now: Instant) -> Vec<String> {
        let ttl = self.ttl;
        let expired: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, r)| now.saturating_duration_since(r.last_seen) > ttl)
            .map(|(code, _)| code.clone())
            .collect();
        for code in &expired {
            if let Some(record) = self.peers.remove(code) {
                debug!(
                    "evicting {} ({}), idle {:?}",
                    code,
                    record.address,
                    now.saturating_duration_since(record.last_seen)
                );
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_PEER_TTL)
    }
}

/// Address recorded for an ADD: the observed source IP, with the advertised port if one was given.
pub fn registration_address(observed: SocketAddr, advertised_port: Option<u16>) -> SocketAddr {
    match advertised_port {
        Some(port) => SocketAddr::new(observed.ip(), port),
        None => observed,
    }
}

/// Answer a LOOK from a registry view. ADD needs exclusive access and goes through [`apply_add`].
pub fn answer_look(registry: &Registry, code: &str) -> Response {
    match registry.lookup(code) {
        Some(record) => Response::Found(record.address),
        None => Response::NotFound,
    }
}

/// Apply an ADD on behalf of a client connected from `observed`.
pub fn apply_add(
    registry: &mut Registry,
    code: &str,
    port: Option<u16>,
    observed: SocketAddr,
    now: Instant,
) -> Response {
    let address = registration_address(observed, port);
    registry.register(code, address, now);
    Response::Registered(code.to_string())
}
