//! Transfer session: one connection's buffered reader, writer and timeouts, plus the
//! metadata / ack / payload primitives both endpoints are built from.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use drop_core::wire::MAX_LINE_LEN;
use drop_core::{decode_metadata, encode_metadata, is_ack, ObjectMetadata, ACK};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};
use uuid::Uuid;

use crate::error::{Result, TransferError};

/// Default bound on metadata lines, acks, dials and rendezvous replies.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default bound on a single payload read or write, and on waiting while the peer prepares one.
pub const DEFAULT_PAYLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeouts applied to every transfer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    pub timeout: Duration,
    pub payload_timeout: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            payload_timeout: DEFAULT_PAYLOAD_TIMEOUT,
        }
    }
}

pub struct Session<S> {
    id: Uuid,
    peer: SocketAddr,
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    opts: TransferOptions,
}

impl<S: AsyncRead + AsyncWrite> Session<S> {
    pub fn new(stream: S, peer: SocketAddr, opts: TransferOptions) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            id: Uuid::new_v4(),
            peer,
            reader: BufReader::new(reader),
            writer,
            opts,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn send_metadata(&mut self, meta: &ObjectMetadata) -> Result<()> {
        let line = encode_metadata(meta)?;
        let writer = &mut self.writer;
        within(self.opts.timeout, "metadata write", async {
            writer.write_all(&line).await?;
            writer.flush().await
        })
        .await
    }

    /// Wait for the peer's ack. Anything but exactly `OK\n` is a rejection.
    pub async fn expect_ack(&mut self) -> Result<()> {
        let mut ack = [0u8; 3];
        let n = within(self.opts.timeout, "ack", read_up_to(&mut self.reader, &mut ack)).await?;
        if n == ack.len() && is_ack(&ack) {
            Ok(())
        } else {
            Err(TransferError::AckRejected {
                peer: self.peer,
                ack: String::from_utf8_lossy(&ack[..n]).into_owned(),
            })
        }
    }

    pub async fn send_ack(&mut self) -> Result<()> {
        let writer = &mut self.writer;
        within(self.opts.timeout, "ack write", async {
            writer.write_all(ACK).await?;
            writer.flush().await
        })
        .await
    }

    /// Read the next metadata line within the control timeout. `None` on a clean end of stream.
    pub async fn read_metadata(&mut self) -> Result<Option<ObjectMetadata>> {
        self.read_metadata_within(self.opts.timeout).await
    }

    /// Like [`read_metadata`](Self::read_metadata) but allows the peer time to prepare a payload first.
    pub async fn await_metadata(&mut self) -> Result<Option<ObjectMetadata>> {
        self.read_metadata_within(self.opts.payload_timeout).await
    }

    async fn read_metadata_within(&mut self, after: Duration) -> Result<Option<ObjectMetadata>> {
        let mut line = Vec::new();
        let limited = (&mut self.reader).take(MAX_LINE_LEN as u64);
        let n = within(after, "metadata", read_line_into(limited, &mut line)).await?;
        if n == 0 {
            return Ok(None);
        }
        if line.last() != Some(&b'\n') {
            let what = if n == MAX_LINE_LEN {
                "metadata line too long"
            } else {
                "metadata line truncated by end of stream"
            };
            return Err(TransferError::Protocol(what.into()));
        }
        Ok(Some(decode_metadata(&line)?))
    }

    pub async fn send_payload(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = &mut self.writer;
        within(self.opts.payload_timeout, "payload write", async {
            writer.write_all(bytes).await?;
            writer.flush().await
        })
        .await
    }

    /// Read exactly `size` payload bytes.
    pub async fn read_payload(&mut self, size: u64) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(size.min(1 << 20) as usize);
        let limited = (&mut self.reader).take(size);
        let n = within(
            self.opts.payload_timeout,
            "payload",
            read_all_into(limited, &mut buf),
        )
        .await?;
        if (n as u64) < size {
            return Err(TransferError::Protocol(format!(
                "payload truncated: got {} of {} bytes",
                n, size
            )));
        }
        Ok(buf)
    }

    /// Flush and close the write side; the peer sees end of stream.
    pub async fn finish(mut self) -> Result<()> {
        within(self.opts.timeout, "shutdown", self.writer.shutdown()).await
    }
}

async fn read_line_into<R: tokio::io::AsyncBufRead + Unpin>(
    mut reader: R,
    line: &mut Vec<u8>,
) -> std::io::Result<usize> {
    reader.read_until(b'\n', line).await
}

async fn read_all_into<R: AsyncRead + Unpin>(
    mut reader: R,
    buf: &mut Vec<u8>,
) -> std::io::Result<usize> {
    reader.read_to_end(buf).await
}

/// Fill `buf` until it is full or the stream ends; returns the byte count.
async fn read_up_to<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Bound an I/O future by `after`.
pub async fn within<T, F>(after: Duration, waiting_for: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(r) => Ok(r?),
        Err(_) => Err(TransferError::Timeout { after, waiting_for }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn quick() -> TransferOptions {
        TransferOptions {
            timeout: Duration::from_millis(200),
            payload_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn ack_accepted_and_rejected() {
        let (a, b) = tokio::io::duplex(64);
        let mut sharer = Session::new(a, peer(), quick());
        let mut receiver = Session::new(b, peer(), quick());
        receiver.send_ack().await.unwrap();
        sharer.expect_ack().await.unwrap();

        let (a, mut raw) = tokio::io::duplex(64);
        let mut sharer = Session::new(a, peer(), quick());
        raw.write_all(b"NO\n").await.unwrap();
        match sharer.expect_ack().await {
            Err(TransferError::AckRejected { ack, .. }) => assert_eq!(ack, "NO\n"),
            other => panic!("expected rejection, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn missing_ack_times_out() {
        let (a, _b) = tokio::io::duplex(64);
        let mut sharer = Session::new(a, peer(), quick());
        assert!(matches!(
            sharer.expect_ack().await,
            Err(TransferError::Timeout { waiting_for: "ack", .. })
        ));
    }

    #[tokio::test]
    async fn short_ack_before_close_is_rejection() {
        let (a, mut raw) = tokio::io::duplex(64);
        let mut sharer = Session::new(a, peer(), quick());
        raw.write_all(b"OK").await.unwrap();
        drop(raw);
        assert!(matches!(
            sharer.expect_ack().await,
            Err(TransferError::AckRejected { .. })
        ));
    }

    #[tokio::test]
    async fn metadata_then_clean_end_of_stream() {
        let (a, b) = tokio::io::duplex(1024);
        let mut sender = Session::new(a, peer(), quick());
        let mut receiver = Session::new(b, peer(), quick());
        let meta = ObjectMetadata::dir_entry("sub");
        sender.send_metadata(&meta).await.unwrap();
        sender.finish().await.unwrap();
        assert_eq!(receiver.read_metadata().await.unwrap(), Some(meta));
        assert_eq!(receiver.read_metadata().await.unwrap(), None);
    }

    #[tokio::test]
    async fn partial_metadata_line_is_protocol_error() {
        let (a, mut raw) = tokio::io::duplex(1024);
        let mut receiver = Session::new(a, peer(), quick());
        raw.write_all(b"{\"type\":\"dir\"").await.unwrap();
        drop(raw);
        assert!(matches!(
            receiver.read_metadata().await,
            Err(TransferError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn payload_exact_and_truncated() {
        let (a, mut raw) = tokio::io::duplex(1024);
        let mut receiver = Session::new(a, peer(), quick());
        raw.write_all(b"0123456789rest").await.unwrap();
        assert_eq!(receiver.read_payload(10).await.unwrap(), b"0123456789");
        drop(raw);
        assert!(matches!(
            receiver.read_payload(10).await,
            Err(TransferError::Protocol(_))
        ));
    }
}
