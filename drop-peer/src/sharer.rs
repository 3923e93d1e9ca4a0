//! Sharer: listen for receivers and serve one file or directory tree to each of them.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use drop_core::{Compressed, ObjectKind, ObjectMetadata};
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::client;
use crate::error::{Result, TransferError};
use crate::session::{Session, TransferOptions};
use crate::walk::{self, WalkEntry, WalkError};

/// Walk entries buffered ahead of the emitter.
const WALK_BUFFER: usize = 4;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Live connections: session id -> peer address.
pub type ConnectionSet = Arc<Mutex<HashMap<Uuid, SocketAddr>>>;

/// The file or directory being shared, resolved once at listen time.
#[derive(Debug, Clone)]
pub struct SharedObject {
    pub path: PathBuf,
    pub name: String,
    pub kind: ObjectKind,
}

impl SharedObject {
    pub fn open(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path).map_err(|e| TransferError::filesystem(path, e))?;
        let kind = if meta.is_dir() {
            ObjectKind::Dir
        } else if meta.is_file() {
            ObjectKind::File
        } else {
            return Err(TransferError::filesystem(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file or directory"),
            ));
        };
        let name = walk::root_name(path).map_err(|e| TransferError::filesystem(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            name,
            kind,
        })
    }
}

pub struct Sharer {
    local_addr: SocketAddr,
    object: Arc<SharedObject>,
    opts: TransferOptions,
    codes: Mutex<Vec<String>>,
    connections: ConnectionSet,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<TcpListener>,
    drain_rx: mpsc::Receiver<()>,
}

impl Sharer {
    /// Bind `bind` and start serving `path` to every receiver that connects.
    pub async fn listen(bind: SocketAddr, path: &Path, opts: TransferOptions) -> Result<Self> {
        let object = Arc::new(SharedObject::open(path)?);
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|e| TransferError::connection(bind, e))?;
        let local_addr = listener.local_addr()?;
        let connections: ConnectionSet = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // Every handler holds a clone of `drain_tx`; recv() yields None once all are gone.
        let (drain_tx, drain_rx) = mpsc::channel::<()>(1);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            object.clone(),
            opts,
            connections.clone(),
            drain_tx,
            shutdown_rx,
        ));
        info!(
            "sharing {} {} on {}",
            object.kind,
            object.path.display(),
            local_addr
        );
        Ok(Self {
            local_addr,
            object,
            opts,
            codes: Mutex::new(Vec::new()),
            connections,
            shutdown_tx,
            accept_task,
            drain_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn object(&self) -> &SharedObject {
        &self.object
    }

    /// Publish a fresh code for this sharer on the rendezvous server.
    pub async fn register(&self, server: &str) -> Result<String> {
        let code = client::register(server, self.local_addr.port(), self.opts.timeout).await?;
        self.codes.lock().await.push(code.clone());
        Ok(code)
    }

    pub async fn registered_codes(&self) -> Vec<String> {
        self.codes.lock().await.clone()
    }

    pub async fn active_connections(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Stop accepting, wait for in-flight transfers, then release the listening socket.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        let listener = match self.accept_task.await {
            Ok(listener) => Some(listener),
            Err(e) => {
                error!("accept loop on {} failed: {}", self.local_addr, e);
                None
            }
        };
        let pending = self.connections.lock().await.len();
        if pending > 0 {
            info!("waiting for {} transfer(s) to finish", pending);
        }
        let _ = self.drain_rx.recv().await;
        drop(listener);
        info!("sharer on {} stopped", self.local_addr);
    }
}

async fn accept_loop(
    listener: TcpListener,
    object: Arc<SharedObject>,
    opts: TransferOptions,
    connections: ConnectionSet,
    drain_tx: mpsc::Sender<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> TcpListener {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let session = Session::new(stream, peer, opts);
                    let object = object.clone();
                    let connections = connections.clone();
                    let drain = drain_tx.clone();
                    tokio::spawn(async move {
                        let id = session.id();
                        connections.lock().await.insert(id, peer);
                        info!("[{}] receiver connected from {}", id, peer);
                        match serve(session, &object).await {
                            Ok(entries) => info!(
                                "[{}] sent {} to {} ({} entries)",
                                id,
                                object.name,
                                peer,
                                entries
                            ),
                            Err(e) => warn!("[{}] transfer to {} aborted: {}", id, peer, e),
                        }
                        connections.lock().await.remove(&id);
                        drop(drain);
                    });
                }
                Err(e) => {
                    error!("accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    listener
}

/// Serve `object` over one session. Returns the number of entries sent after the root.
pub async fn serve<S>(session: Session<S>, object: &SharedObject) -> Result<usize>
where
    S: AsyncRead + AsyncWrite,
{
    match object.kind {
        ObjectKind::File => serve_file(session, object).await,
        ObjectKind::Dir => serve_dir(session, object).await,
    }
}

async fn serve_file<S>(mut session: Session<S>, object: &SharedObject) -> Result<usize>
where
    S: AsyncRead + AsyncWrite,
{
    session
        .send_metadata(&ObjectMetadata::root(ObjectKind::File, &object.name))
        .await?;
    session.expect_ack().await?;

    let data = tokio::fs::read(&object.path)
        .await
        .map_err(|e| TransferError::filesystem(&object.path, e))?;
    let raw_len = data.len();
    let packed = compress_off_thread(data).await?;
    debug!(
        "[{}] {}: {} bytes, {} compressed, checksum {}",
        session.id(),
        object.name,
        raw_len,
        packed.len(),
        packed.checksum
    );

    session
        .send_metadata(&ObjectMetadata::file(&object.name, packed.len(), &packed.checksum))
        .await?;
    session.expect_ack().await?;
    session.send_payload(&packed.bytes).await?;
    session.finish().await?;
    Ok(1)
}

async fn serve_dir<S>(mut session: Session<S>, object: &SharedObject) -> Result<usize>
where
    S: AsyncRead + AsyncWrite,
{
    session
        .send_metadata(&ObjectMetadata::root(ObjectKind::Dir, &object.name))
        .await?;
    session.expect_ack().await?;

    let mut entries = spawn_walk(object.path.clone());
    let mut sent = 0;
    while let Some(entry) = entries.recv().await {
        let entry = entry.map_err(|e| TransferError::filesystem(e.path, e.source))?;
        emit_entry(&mut session, entry).await?;
        sent += 1;
    }
    session.finish().await?;
    Ok(sent)
}

/// Turn one walk entry into metadata, ack and (for files) payload.
async fn emit_entry<S>(session: &mut Session<S>, entry: WalkEntry) -> Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    match (entry.kind, entry.contents) {
        (ObjectKind::Dir, _) => {
            session
                .send_metadata(&ObjectMetadata::dir_entry(&entry.relative_path))
                .await?;
            session.expect_ack().await?;
            debug!("[{}] dir {}", session.id(), entry.relative_path);
        }
        (ObjectKind::File, contents) => {
            let packed = compress_off_thread(contents.unwrap_or_default()).await?;
            session
                .send_metadata(&ObjectMetadata::file_entry(
                    &entry.relative_path,
                    packed.len(),
                    &packed.checksum,
                ))
                .await?;
            session.expect_ack().await?;
            session.send_payload(&packed.bytes).await?;
            debug!(
                "[{}] file {} ({} bytes compressed)",
                session.id(),
                entry.relative_path,
                packed.len()
            );
        }
    }
    Ok(())
}

/// Run the blocking walk on its own thread, feeding entries through a bounded channel.
/// Dropping the receiver stops the walk.
fn spawn_walk(root: PathBuf) -> mpsc::Receiver<std::result::Result<WalkEntry, WalkError>> {
    let (tx, rx) = mpsc::channel(WALK_BUFFER);
    tokio::task::spawn_blocking(move || {
        for entry in walk::entries(&root) {
            let failed = entry.is_err();
            if tx.blocking_send(entry).is_err() || failed {
                break;
            }
        }
    });
    rx
}

async fn compress_off_thread(data: Vec<u8>) -> Result<Compressed> {
    let packed = tokio::task::spawn_blocking(move || drop_core::compress(&data))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
    Ok(packed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use drop_core::{decode_metadata, decompress, verify_checksum};
    use std::fs;
    use tempdir::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tokio::net::TcpStream;

    fn opts() -> TransferOptions {
        TransferOptions {
            timeout: Duration::from_secs(2),
            payload_timeout: Duration::from_secs(2),
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn hello_file(tmp: &TempDir) -> SharedObject {
        let path = tmp.path().join("hello.txt");
        fs::write(&path, b"hello docs").unwrap();
        SharedObject::open(&path).unwrap()
    }

    async fn read_meta(conn: &mut BufReader<DuplexStream>) -> ObjectMetadata {
        let mut line = Vec::new();
        conn.read_until(b'\n', &mut line).await.unwrap();
        decode_metadata(&line).unwrap()
    }

    #[tokio::test]
    async fn rejected_root_ack_sends_nothing_more() {
        let tmp = TempDir::new("sharer").unwrap();
        let object = hello_file(&tmp);
        let (a, b) = tokio::io::duplex(64 * 1024);
        let task =
            tokio::spawn(async move { serve(Session::new(a, peer(), opts()), &object).await });

        let mut conn = BufReader::new(b);
        let root = read_meta(&mut conn).await;
        assert_eq!(root, ObjectMetadata::root(ObjectKind::File, "hello.txt"));
        conn.get_mut().write_all(b"NO\n").await.unwrap();

        let mut rest = Vec::new();
        conn.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty(), "sharer kept writing: {:?}", rest);
        assert!(matches!(
            task.await.unwrap(),
            Err(TransferError::AckRejected { .. })
        ));
    }

    #[tokio::test]
    async fn rejected_metadata_ack_withholds_payload() {
        let tmp = TempDir::new("sharer").unwrap();
        let object = hello_file(&tmp);
        let (a, b) = tokio::io::duplex(64 * 1024);
        let task =
            tokio::spawn(async move { serve(Session::new(a, peer(), opts()), &object).await });

        let mut conn = BufReader::new(b);
        read_meta(&mut conn).await;
        conn.get_mut().write_all(b"OK\n").await.unwrap();
        let full = read_meta(&mut conn).await;
        assert!(full.payload().is_some());
        conn.get_mut().write_all(b"ok\n").await.unwrap();

        let mut rest = Vec::new();
        conn.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn directory_entries_follow_walk_order() {
        let tmp = TempDir::new("sharer").unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.txt"), b"alpha").unwrap();
        fs::write(root.join("sub/b.txt"), b"bravo").unwrap();
        let object = SharedObject::open(&root).unwrap();

        let (a, b) = tokio::io::duplex(64 * 1024);
        let task =
            tokio::spawn(async move { serve(Session::new(a, peer(), opts()), &object).await });

        let mut conn = BufReader::new(b);
        let mut seen = Vec::new();
        loop {
            let mut line = Vec::new();
            if conn.read_until(b'\n', &mut line).await.unwrap() == 0 {
                break;
            }
            let meta = decode_metadata(&line).unwrap();
            conn.get_mut().write_all(b"OK\n").await.unwrap();
            if let Some((size, checksum)) = meta.payload() {
                let mut payload = vec![0u8; size as usize];
                conn.read_exact(&mut payload).await.unwrap();
                verify_checksum(&payload, checksum).unwrap();
                let raw = decompress(&payload).unwrap();
                seen.push((meta.path.clone().unwrap(), Some(raw)));
            } else {
                seen.push((meta.path.clone().or(meta.filename.clone()).unwrap(), None));
            }
        }
        assert_eq!(task.await.unwrap().unwrap(), 3);
        assert_eq!(
            seen,
            vec![
                ("root".to_string(), None),
                ("a.txt".to_string(), Some(b"alpha".to_vec())),
                ("sub".to_string(), None),
                ("sub/b.txt".to_string(), Some(b"bravo".to_vec())),
            ]
        );
    }

    #[tokio::test]
    async fn rejected_entry_ack_stops_the_walk() {
        let tmp = TempDir::new("sharer").unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.txt"), b"alpha").unwrap();
        fs::write(root.join("sub/b.txt"), b"bravo").unwrap();
        let object = SharedObject::open(&root).unwrap();

        let (a, b) = tokio::io::duplex(64 * 1024);
        let task =
            tokio::spawn(async move { serve(Session::new(a, peer(), opts()), &object).await });

        let mut conn = BufReader::new(b);
        read_meta(&mut conn).await;
        conn.get_mut().write_all(b"OK\n").await.unwrap();
        let first = read_meta(&mut conn).await;
        assert_eq!(first.path.as_deref(), Some("a.txt"));
        conn.get_mut().write_all(b"NO\n").await.unwrap();

        let mut rest = Vec::new();
        conn.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty(), "sharer kept writing: {:?}", rest);
        match task.await.unwrap() {
            Err(TransferError::AckRejected { ack, .. }) => assert_eq!(ack, "NO\n"),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn walk_failure_names_the_entry() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        let tmp = TempDir::new("sharer").unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let bad = root.join(OsStr::from_bytes(b"bad\xff.txt"));
        fs::write(&bad, b"x").unwrap();
        let object = SharedObject::open(&root).unwrap();

        let (a, b) = tokio::io::duplex(64 * 1024);
        let task =
            tokio::spawn(async move { serve(Session::new(a, peer(), opts()), &object).await });
        let mut conn = BufReader::new(b);
        read_meta(&mut conn).await;
        conn.get_mut().write_all(b"OK\n").await.unwrap();

        match task.await.unwrap() {
            Err(TransferError::Filesystem { path, .. }) => assert_eq!(path, bad),
            other => panic!("expected filesystem error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn shutdown_drains_in_flight_transfer() {
        let tmp = TempDir::new("sharer").unwrap();
        let path = tmp.path().join("hello.txt");
        fs::write(&path, b"hello docs").unwrap();
        let sharer = Sharer::listen("127.0.0.1:0".parse().unwrap(), &path, opts())
            .await
            .unwrap();
        let addr = sharer.local_addr();

        let mut conn = BufReader::new(TcpStream::connect(addr).await.unwrap());
        let mut line = String::new();
        conn.read_line(&mut line).await.unwrap();
        assert_eq!(sharer.active_connections().await, 1);

        let stopping = tokio::spawn(sharer.shutdown());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!stopping.is_finished(), "shutdown returned with a transfer in flight");

        conn.get_mut().write_all(b"OK\n").await.unwrap();
        line.clear();
        conn.read_line(&mut line).await.unwrap();
        conn.get_mut().write_all(b"OK\n").await.unwrap();
        let mut payload = Vec::new();
        conn.read_to_end(&mut payload).await.unwrap();
        assert_eq!(decompress(&payload).unwrap(), b"hello docs");

        tokio::time::timeout(Duration::from_secs(2), stopping)
            .await
            .unwrap()
            .unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[test]
    fn open_rejects_missing_path() {
        let tmp = TempDir::new("sharer").unwrap();
        assert!(matches!(
            SharedObject::open(&tmp.path().join("missing")),
            Err(TransferError::Filesystem { .. })
        ));
    }
}
