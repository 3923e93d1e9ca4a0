//! Receiver: pull one object from a sharer and write it under a destination directory.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use drop_core::{
    sanitize_filename, sanitize_relative_path, verify_checksum, ObjectKind, ObjectMetadata,
};
use log::{debug, info, warn};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::client;
use crate::error::{Result, TransferError};
use crate::session::{Session, TransferOptions};

/// Outcome of a completed pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub kind: ObjectKind,
    /// Where the object now lives.
    pub path: PathBuf,
    pub files: usize,
    pub dirs: usize,
    /// Decompressed bytes written.
    pub bytes: u64,
}

/// Connect to the sharer at `addr` and receive its object into `dest`.
pub async fn pull(addr: SocketAddr, dest: &Path, opts: TransferOptions) -> Result<Received> {
    let stream = client::dial(addr, opts.timeout).await?;
    let session = Session::new(stream, addr, opts);
    info!("[{}] connected to sharer {}", session.id(), addr);
    receive_object(session, dest).await
}

/// Read the root announcement, ack it and receive a file or a directory tree.
/// An unnamed directory is received straight into `dest`.
pub async fn receive_object<S>(mut session: Session<S>, dest: &Path) -> Result<Received>
where
    S: AsyncRead + AsyncWrite,
{
    let root = session.read_metadata().await?.ok_or_else(|| {
        TransferError::Protocol("sharer closed before announcing an object".into())
    })?;
    // The root name is optional; a file is named again by its full metadata.
    let name = match root.filename.as_deref() {
        Some(name) => Some(sanitize_filename(name)?),
        None => None,
    };
    session.send_ack().await?;
    debug!("[{}] root {} {:?}", session.id(), root.kind, name);

    match (root.kind, name) {
        (ObjectKind::File, _) => receive_file(session, dest).await,
        (ObjectKind::Dir, Some(name)) => receive_folder(session, &dest.join(name)).await,
        (ObjectKind::Dir, None) => receive_folder(session, dest).await,
    }
}

async fn receive_file<S>(mut session: Session<S>, dest: &Path) -> Result<Received>
where
    S: AsyncRead + AsyncWrite,
{
    let meta = session.await_metadata().await?.ok_or_else(|| {
        TransferError::Protocol("sharer closed before sending file metadata".into())
    })?;
    let (size, checksum) = file_payload(&meta)?;
    let filename = meta
        .filename
        .as_deref()
        .ok_or_else(|| TransferError::Protocol("file metadata without filename".into()))?;
    let target = dest.join(sanitize_filename(filename)?);

    tokio::fs::create_dir_all(dest)
        .await
        .map_err(|e| TransferError::filesystem(dest, e))?;
    let file = create(&target).await?;
    session.send_ack().await?;
    let bytes = receive_payload(&mut session, file, &target, size, &checksum).await?;

    info!(
        "[{}] received file {} ({} bytes)",
        session.id(),
        target.display(),
        bytes
    );
    Ok(Received {
        kind: ObjectKind::File,
        path: target,
        files: 1,
        dirs: 0,
        bytes,
    })
}

async fn receive_folder<S>(mut session: Session<S>, root: &Path) -> Result<Received>
where
    S: AsyncRead + AsyncWrite,
{
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|e| TransferError::filesystem(root, e))?;
    let mut received = Received {
        kind: ObjectKind::Dir,
        path: root.to_path_buf(),
        files: 0,
        dirs: 0,
        bytes: 0,
    };

    // End of stream after a complete entry is the normal terminator.
    while let Some(meta) = session.await_metadata().await? {
        let relative = meta
            .path
            .as_deref()
            .ok_or_else(|| TransferError::Protocol(format!("{} entry without path", meta.kind)))?;
        let target = root.join(sanitize_relative_path(relative)?);

        match meta.kind {
            ObjectKind::Dir => {
                tokio::fs::create_dir_all(&target)
                    .await
                    .map_err(|e| TransferError::filesystem(&target, e))?;
                session.send_ack().await?;
                received.dirs += 1;
                debug!("[{}] dir {}", session.id(), relative);
            }
            ObjectKind::File => {
                let (size, checksum) = file_payload(&meta)?;
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| TransferError::filesystem(parent, e))?;
                }
                let file = create(&target).await?;
                session.send_ack().await?;
                let bytes = receive_payload(&mut session, file, &target, size, &checksum).await?;
                received.files += 1;
                received.bytes += bytes;
                debug!("[{}] file {} ({} bytes)", session.id(), relative, bytes);
            }
        }
    }

    info!(
        "[{}] received folder {} ({} files, {} dirs, {} bytes)",
        session.id(),
        root.display(),
        received.files,
        received.dirs,
        received.bytes
    );
    Ok(received)
}

fn file_payload(meta: &ObjectMetadata) -> Result<(u64, String)> {
    meta.payload()
        .map(|(size, checksum)| (size, checksum.to_string()))
        .ok_or_else(|| TransferError::Protocol("file metadata without size and checksum".into()))
}

async fn create(target: &Path) -> Result<File> {
    File::create(target)
        .await
        .map_err(|e| TransferError::filesystem(target, e))
}

/// Read, verify, decompress and write one payload. A failed checksum leaves `file` empty.
async fn receive_payload<S>(
    session: &mut Session<S>,
    mut file: File,
    target: &Path,
    size: u64,
    checksum: &str,
) -> Result<u64>
where
    S: AsyncRead + AsyncWrite,
{
    let payload = session.read_payload(size).await?;
    if let Err(source) = verify_checksum(&payload, checksum) {
        warn!(
            "[{}] {} failed verification, left empty",
            session.id(),
            target.display()
        );
        return Err(TransferError::Integrity {
            path: target.to_path_buf(),
            source,
        });
    }
    let raw = tokio::task::spawn_blocking(move || drop_core::decompress(&payload))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
        .map_err(|e| {
            TransferError::Protocol(format!("cannot decompress {}: {}", target.display(), e))
        })?;
    file.write_all(&raw)
        .await
        .map_err(|e| TransferError::filesystem(target, e))?;
    file.flush()
        .await
        .map_err(|e| TransferError::filesystem(target, e))?;
    Ok(raw.len() as u64)
}
