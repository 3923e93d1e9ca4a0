//! Rendezvous client: ADD a fresh code for a sharer, LOOK a code up for a receiver.

use std::fmt::Display;
use std::net::SocketAddr;
use std::time::Duration;

use drop_core::{generate_code, Command, Response};
use log::{debug, info};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::{Result, TransferError};
use crate::session::within;

const MAX_REPLY_LEN: u64 = 1024;

/// Connect to `addr`, bounded by `timeout`.
pub async fn dial<A>(addr: A, timeout: Duration) -> Result<TcpStream>
where
    A: ToSocketAddrs + Display + Copy,
{
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(TransferError::connection(addr, e)),
        Err(_) => Err(TransferError::Timeout {
            after: timeout,
            waiting_for: "connect",
        }),
    }
}

/// Register a freshly generated code for a sharer listening on `listen_port`. Returns the code.
pub async fn register(server: &str, listen_port: u16, timeout: Duration) -> Result<String> {
    let code = generate_code();
    let command = Command::Add {
        code: code.clone(),
        port: Some(listen_port),
    };
    match exchange(server, &command, timeout).await? {
        Response::Registered(confirmed) if confirmed == code => {
            info!("server {} registered code {}", server, code);
            Ok(code)
        }
        Response::Registered(other) => Err(TransferError::Protocol(format!(
            "server confirmed code {} instead of {}",
            other, code
        ))),
        Response::Error(reason) => Err(TransferError::Rendezvous(reason)),
        other => Err(TransferError::Protocol(format!(
            "unexpected reply to ADD: {:?}",
            other
        ))),
    }
}

/// Look up the sharer address for `code`. `Ok(None)` means the server has no such code.
pub async fn resolve(server: &str, code: &str, timeout: Duration) -> Result<Option<SocketAddr>> {
    let command = Command::Look {
        code: code.to_string(),
    };
    match exchange(server, &command, timeout).await? {
        Response::Found(addr) => {
            info!("code {} resolved to {}", code, addr);
            Ok(Some(addr))
        }
        Response::NotFound => Ok(None),
        Response::Error(reason) => Err(TransferError::Rendezvous(reason)),
        other => Err(TransferError::Protocol(format!(
            "unexpected reply to LOOK: {:?}",
            other
        ))),
    }
}

/// One request line out, one reply line back.
async fn exchange(server: &str, command: &Command, timeout: Duration) -> Result<Response> {
    let stream = dial(server, timeout).await?;
    let mut conn = BufReader::new(stream);
    let line = command.to_line();
    debug!("-> {} {}", server, line.trim_end());
    within(timeout, "rendezvous request", conn.get_mut().write_all(line.as_bytes())).await?;

    let mut reply = Vec::new();
    let limited = (&mut conn).take(MAX_REPLY_LEN);
    let n = within(timeout, "rendezvous reply", read_reply(limited, &mut reply)).await?;
    if n == 0 || reply.last() != Some(&b'\n') {
        return Err(TransferError::Protocol(format!(
            "server {} closed the connection without a complete reply",
            server
        )));
    }
    let text = String::from_utf8_lossy(&reply);
    debug!("<- {} {}", server, text.trim_end());
    Ok(Response::parse(&text)?)
}

async fn read_reply<R: tokio::io::AsyncBufRead + Unpin>(
    mut reader: R,
    buf: &mut Vec<u8>,
) -> std::io::Result<usize> {
    reader.read_until(b'\n', buf).await
}
