//! Per-Connection Handler
//!
//! A connection walks Fresh → HaveUser → Authenticating → Authenticated,
//! driven by space-separated tokens parsed out of raw 1024-byte reads.
//! The protocol core is the synchronous [`Connection::process`] so the
//! whole command surface is testable without sockets; [`serve`] is the
//! async shell that feeds it from a stream.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::codec::{BUFFER_SIZE, ResponseBuffer};
use crate::commands::{self, Flow};
use crate::sasl::SaslSession;
use crate::server::ServerContext;

/// Longest stored username, in bytes.
pub const USERNAME_MAX: usize = 63;
/// Most tokens dispatched out of a single read.
pub const ARGS_MAX: usize = 32;

/// Per-client protocol state.
pub struct Connection {
    username: String,
    session: Option<SaslSession>,
}

impl Connection {
    pub fn new() -> Self {
        Self {
            username: String::new(),
            session: None,
        }
    }

    /// Empty until USER has been received.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Store the username, truncated to [`USERNAME_MAX`] bytes.
    pub fn set_username(&mut self, raw: &[u8]) {
        let raw = &raw[..raw.len().min(USERNAME_MAX)];
        self.username = String::from_utf8_lossy(raw).into_owned();
    }

    /// Open a fresh SASL session, discarding any earlier mechanism state.
    pub fn begin_session(&mut self, ctx: &ServerContext) {
        self.session = Some(SaslSession::new(Arc::clone(&ctx.store)));
    }

    pub fn session_mut(&mut self) -> Option<&mut SaslSession> {
        self.session.as_mut()
    }

    /// Dispatch every command in one read buffer. Returns the accumulated
    /// response and whether the connection should close. Dispatch stops as
    /// soon as a handler asks to close, so a pipelined QUIT answers once.
    pub fn process(&mut self, ctx: &ServerContext, input: &[u8]) -> (Vec<u8>, bool) {
        let tokens = tokenize(input);
        let mut resp = ResponseBuffer::new(BUFFER_SIZE);
        let mut close = false;

        let mut i = 0;
        while i < tokens.len() {
            match commands::lookup(tokens[i]) {
                Some(handler) => match handler(&mut resp, &tokens[i..], self, ctx) {
                    Flow::Consumed(n) => i += 1 + n,
                    Flow::Close => {
                        close = true;
                        break;
                    }
                },
                None => {
                    warn!(command = %String::from_utf8_lossy(tokens[i]), "unknown command");
                    resp.append(format_args!("-ERR Unknown command\r\n"));
                    i += 1;
                }
            }
        }

        if resp.overflowed() {
            warn!("response truncated at {BUFFER_SIZE} bytes");
        }
        (resp.into_bytes(), close)
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a read buffer into command tokens. Spaces and line terminators
/// separate tokens; runs of separators collapse, so one buffer may carry
/// several commands.
fn tokenize(input: &[u8]) -> Vec<&[u8]> {
    input
        .split(|&b| b == b' ' || b == b'\r' || b == b'\n')
        .filter(|token| !token.is_empty())
        .take(ARGS_MAX)
        .collect()
}

/// Async shell: read, process, write, until EOF or close. Transport
/// errors close the connection silently.
pub async fn serve<S>(mut stream: S, ctx: Arc<ServerContext>, conn_id: u64)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = Connection::new();
    let mut buf = [0u8; BUFFER_SIZE];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(conn_id, error = %e, "read failed");
                break;
            }
        };

        let rx = String::from_utf8_lossy(&buf[..n]);
        debug!(conn_id, rx = %rx.trim_end(), "recv");

        let (response, close) = conn.process(&ctx, &buf[..n]);
        if !response.is_empty() {
            if let Err(e) = stream.write_all(&response).await {
                debug!(conn_id, error = %e, "write failed");
                break;
            }
            let tx = String::from_utf8_lossy(&response);
            debug!(conn_id, tx = %tx.trim_end(), "send");
        }

        if close {
            break;
        }
    }

    debug!(conn_id, "connection closed");
}
