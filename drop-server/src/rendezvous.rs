//! Rendezvous service: TCP accept loop, per-connection ADD/LOOK handling, periodic expiry sweep.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use drop_core::registry::{answer_look, apply_add};
use drop_core::{Command, Registry, Response};
use log::{debug, error, info, warn};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Registry shared by every connection task and the sweeper.
pub type SharedRegistry = Arc<RwLock<Registry>>;

/// Longest accepted command line, newline included.
const MAX_COMMAND_LEN: usize = 1024;
/// Pause after a failed accept.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept clients forever; each connection gets its own task.
pub async fn run_rendezvous(listener: TcpListener, registry: SharedRegistry) -> std::io::Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, from)) => {
                let registry = registry.clone();
                tokio::spawn(async move {
                    info!("client connected from {}", from);
                    if let Err(e) = handle_client(stream, from, registry).await {
                        warn!("client {}: {}", from, e);
                    }
                    debug!("client {} disconnected", from);
                });
            }
            Err(e) => {
                error!("accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Read newline-delimited commands until the client disconnects, answering each with one line.
async fn handle_client<S>(stream: S, from: SocketAddr, registry: SharedRegistry) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = (&mut reader)
            .take(MAX_COMMAND_LEN as u64)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            return Ok(());
        }
        let reply = if n == MAX_COMMAND_LEN && buf.last() != Some(&b'\n') {
            discard_line(&mut reader).await?;
            warn!("command line from {} exceeds {} bytes", from, MAX_COMMAND_LEN);
            Response::Error("Command too long".into())
        } else {
            let line = String::from_utf8_lossy(&buf);
            handle_command(&line, from, &registry).await
        };
        writer.write_all(reply.to_line().as_bytes()).await?;
        writer.flush().await?;
    }
}

/// Skip the remainder of an overlong line.
async fn discard_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<()> {
    let mut sink = Vec::new();
    loop {
        sink.clear();
        let n = (&mut *reader)
            .take(MAX_COMMAND_LEN as u64)
            .read_until(b'\n', &mut sink)
            .await?;
        if n == 0 || sink.last() == Some(&b'\n') {
            return Ok(());
        }
    }
}

/// Apply one command line from `from`. LOOK takes the shared lock, ADD the exclusive one.
pub async fn handle_command(line: &str, from: SocketAddr, registry: &SharedRegistry) -> Response {
    match Command::parse(line) {
        Ok(Command::Add { code, port }) => {
            let mut reg = registry.write().await;
            let reply = apply_add(&mut reg, &code, port, from, Instant::now());
            if let Some(record) = reg.lookup(&code) {
                info!("registered code {} for {}", code, record.address);
            }
            reply
        }
        Ok(Command::Look { code }) => {
            let reg = registry.read().await;
            let reply = answer_look(&reg, &code);
            match &reply {
                Response::Found(addr) => info!("lookup for code {}: found {}", code, addr),
                _ => info!("lookup for code {}: not registered", code),
            }
            reply
        }
        Err(e) => {
            warn!("bad command from {}: {:?} ({})", from, line.trim(), e);
            Response::from(e)
        }
    }
}

/// Evict expired registrations every `interval`, holding the write lock for each whole sweep.
pub async fn sweep_loop(registry: SharedRegistry, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        sweep_once(&registry, Instant::now()).await;
    }
}

pub async fn sweep_once(registry: &SharedRegistry, now: Instant) -> Vec<String> {
    let mut reg = registry.write().await;
    let evicted = reg.sweep(now);
    for code in &evicted {
        info!("removing stale peer: {}", code);
    }
    evicted
}
