//! Client Commands
//!
//! Each handler appends its response and reports how many tokens beyond
//! the command name it consumed, so several commands can ride in one
//! buffer (`USER x AUTH y …`). A handler may instead ask for the
//! connection to be closed.

use tracing::info;

use crate::codec::{self, ResponseBuffer};
use crate::connection::Connection;
use crate::sasl::{SUPPORTED_MECHS, SaslCode, Step, StepResult};
use crate::server::ServerContext;

/// What the dispatcher should do after a handler ran.
pub enum Flow {
    /// Extra tokens consumed beyond the command name.
    Consumed(usize),
    /// Flush the response and close the connection.
    Close,
}

pub type Handler = fn(&mut ResponseBuffer, &[&[u8]], &mut Connection, &ServerContext) -> Flow;

/// The command table. Names match case-insensitively.
pub const COMMANDS: &[(&str, Handler)] = &[
    ("LIST", cmd_list),
    ("RSAPUBLIC", cmd_rsapublic),
    ("RSAVALIDATE", cmd_rsavalidate),
    ("NEWUSER", cmd_newuser),
    ("DELETEUSER", cmd_deleteuser),
    ("CHANGEPASS", cmd_changepass),
    ("USER", cmd_user),
    ("AUTH", cmd_auth),
    ("AUTH2", cmd_auth2),
    ("QUIT", cmd_quit),
];

pub fn lookup(name: &[u8]) -> Option<Handler> {
    COMMANDS
        .iter()
        .find(|(cmd, _)| cmd.as_bytes().eq_ignore_ascii_case(name))
        .map(|(_, handler)| *handler)
}

// ─── Informational ──────────────────────────────────────────────────────────

/// List the authentication mechanisms this server supports.
fn cmd_list(
    resp: &mut ResponseBuffer,
    _args: &[&[u8]],
    _conn: &mut Connection,
    _ctx: &ServerContext,
) -> Flow {
    resp.append(format_args!("+OK {SUPPORTED_MECHS}\r\n"));
    Flow::Consumed(0)
}

/// Return the server's RSA public key thumbprint.
fn cmd_rsapublic(
    resp: &mut ResponseBuffer,
    _args: &[&[u8]],
    _conn: &mut Connection,
    ctx: &ServerContext,
) -> Flow {
    resp.append(format_args!("+OK {}\r\n", ctx.identity.thumbprint()));
    Flow::Consumed(0)
}

/// Prove we hold the private key: decrypt a value the client encrypted
/// against our public key and echo the cleartext back.
fn cmd_rsavalidate(
    resp: &mut ResponseBuffer,
    args: &[&[u8]],
    _conn: &mut Connection,
    ctx: &ServerContext,
) -> Flow {
    if args.len() < 2 {
        resp.append(format_args!("-ERR Must specify value\r\n"));
        return Flow::Consumed(0);
    }

    let ciphertext = match codec::base64_to_binary(args[1]) {
        Ok(data) => data,
        Err(_) => {
            resp.append(format_args!("-ERR SASL Error\r\n"));
            return Flow::Consumed(1);
        }
    };

    let cleartext = match ctx.identity.decrypt(&ciphertext) {
        Ok(data) => data,
        Err(_) => {
            resp.append(format_args!("-ERR RSA Error\r\n"));
            return Flow::Consumed(1);
        }
    };

    resp.append(format_args!(
        "+OK {}\r\n",
        codec::binary_to_base64(&cleartext)
    ));
    Flow::Consumed(1)
}

// ─── Mutation stubs ─────────────────────────────────────────────────────────

// Account mutation is handled by the directory, not this server. The
// commands stay on the wire surface as stubs.

fn cmd_newuser(
    resp: &mut ResponseBuffer,
    args: &[&[u8]],
    _conn: &mut Connection,
    _ctx: &ServerContext,
) -> Flow {
    if args.len() < 3 {
        resp.append(format_args!("-ERR Must specify value\r\n"));
        return Flow::Consumed(args.len() - 1);
    }
    resp.append(format_args!("-ERR Unsupported\r\n"));
    Flow::Consumed(2)
}

fn cmd_deleteuser(
    resp: &mut ResponseBuffer,
    args: &[&[u8]],
    _conn: &mut Connection,
    _ctx: &ServerContext,
) -> Flow {
    resp.append(format_args!("+OK\r\n"));
    Flow::Consumed(1.min(args.len() - 1))
}

fn cmd_changepass(
    resp: &mut ResponseBuffer,
    args: &[&[u8]],
    _conn: &mut Connection,
    _ctx: &ServerContext,
) -> Flow {
    resp.append(format_args!("+OK\r\n"));
    Flow::Consumed(2.min(args.len() - 1))
}

// ─── Authentication ─────────────────────────────────────────────────────────

/// Store the username and open a fresh SASL session. When the client
/// pipelines `USER x AUTH …` in one line, the AUTH is handled here and its
/// continuation responses use `+AUTHOK` framing.
fn cmd_user(
    resp: &mut ResponseBuffer,
    args: &[&[u8]],
    conn: &mut Connection,
    ctx: &ServerContext,
) -> Flow {
    if args.len() < 2 {
        resp.append(format_args!("-ERR Must specify user\r\n"));
        return Flow::Consumed(0);
    }

    conn.set_username(args[1]);
    conn.begin_session(ctx);

    if args.len() >= 3 && args[2].eq_ignore_ascii_case(b"AUTH") {
        match auth_begin(resp, &args[2..], conn, ctx, true) {
            Flow::Close => Flow::Close,
            Flow::Consumed(n) => Flow::Consumed(2 + n),
        }
    } else {
        resp.append(format_args!("+OK {SUPPORTED_MECHS}\r\n"));
        Flow::Consumed(1)
    }
}

/// Begin authentication with the named mechanism.
fn cmd_auth(
    resp: &mut ResponseBuffer,
    args: &[&[u8]],
    conn: &mut Connection,
    ctx: &ServerContext,
) -> Flow {
    auth_begin(resp, args, conn, ctx, false)
}

fn auth_begin(
    resp: &mut ResponseBuffer,
    args: &[&[u8]],
    conn: &mut Connection,
    ctx: &ServerContext,
    pipelined: bool,
) -> Flow {
    if args.len() < 2 {
        resp.append(format_args!("-ERR Invalid mechanism\r\n"));
        return Flow::Consumed(0);
    }
    let mut consumed = 1;

    if conn.username().is_empty() {
        resp.append(format_args!("-ERR Must specify user first\r\n"));
        return Flow::Consumed(consumed);
    }

    let mut data = Vec::new();
    if args.len() >= 3 {
        // `replay` introduces a second argument form used by WEBDAV-DIGEST.
        if args.len() >= 4 && args[2] == b"replay" {
            data = codec::hex_to_binary(args[3]);
            consumed += 2;
        } else {
            data = codec::hex_to_binary(args[2]);
            consumed += 1;
        }
    }

    let mechanism = String::from_utf8_lossy(args[1]).into_owned();
    let result = match conn.session_mut() {
        Some(session) => session.start(&ctx.registry, &mechanism, &data),
        None => Err(SaslCode::BadProt),
    };
    respond_auth(resp, result, pipelined, conn.username(), &mechanism);

    Flow::Consumed(consumed)
}

/// Continue a multi-round authentication.
fn cmd_auth2(
    resp: &mut ResponseBuffer,
    args: &[&[u8]],
    conn: &mut Connection,
    _ctx: &ServerContext,
) -> Flow {
    if args.len() < 2 {
        resp.append(format_args!("-ERR Invalid argument list\r\n"));
        return Flow::Consumed(0);
    }

    if conn.username().is_empty() {
        resp.append(format_args!("-ERR Must specify user first\r\n"));
        return Flow::Consumed(1);
    }

    let data = codec::hex_to_binary(args[1]);
    let result = match conn.session_mut() {
        Some(session) => session.step(&data),
        None => Err(SaslCode::BadProt),
    };

    match result {
        Ok(Step::Done(_)) => {
            info!(user = %conn.username(), "authenticated user");
            resp.append(format_args!("+OK\r\n"));
        }
        Ok(Step::Continue(data)) => {
            if data.is_empty() {
                resp.append(format_args!("+OK\r\n"));
            } else {
                resp.append(format_args!("+OK {}\r\n", codec::binary_to_hex(&data)));
            }
        }
        Err(code) => {
            resp.append(format_args!("-ERR SASL {}\r\n", code.wire_code()));
        }
    }

    Flow::Consumed(1)
}

fn respond_auth(
    resp: &mut ResponseBuffer,
    result: StepResult,
    pipelined: bool,
    username: &str,
    mechanism: &str,
) {
    let tag = if pipelined { "+AUTHOK" } else { "+OK" };
    match result {
        Ok(Step::Done(data)) => {
            if data.is_empty() {
                resp.append(format_args!("{tag}\r\n"));
            } else {
                resp.append(format_args!("{tag} {}\r\n", codec::binary_to_hex(&data)));
            }
            info!(user = %username, mechanism = %mechanism, "authenticated user");
        }
        Ok(Step::Continue(data)) => {
            if data.is_empty() {
                resp.append(format_args!("{tag}\r\n"));
            } else {
                resp.append(format_args!("{tag} {}\r\n", codec::binary_to_hex(&data)));
            }
        }
        Err(code) => {
            resp.append(format_args!("-ERR SASL {}\r\n", code.wire_code()));
        }
    }
}

/// Client is done; sign off and close.
fn cmd_quit(
    resp: &mut ResponseBuffer,
    _args: &[&[u8]],
    _conn: &mut Connection,
    _ctx: &ServerContext,
) -> Flow {
    resp.append(format_args!("+OK password server signing off.\r\n"));
    Flow::Close
}
