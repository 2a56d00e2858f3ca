//! Listeners — accept clients, enforce the connection cap, greet, spawn
//! per-connection tasks. The UDP socket is an availability-ping sink:
//! datagrams are read and dropped.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::codec::BUFFER_SIZE;
use crate::config::Config;
use crate::connection;
use crate::keys::ServerIdentity;
use crate::sasl::MechanismRegistry;
use crate::store::{CredentialStore, FileStore};

const GREETING: &[u8] = b"+OK passwdd 1.0 at 127.0.0.1 ready.\r\n";
const TOO_MANY_USERS: &[u8] = b"-ERR Too many users.\r\n";

static CONN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Everything a connection needs, read-only after startup.
pub struct ServerContext {
    pub identity: ServerIdentity,
    pub registry: MechanismRegistry,
    pub store: Arc<dyn CredentialStore>,
}

impl ServerContext {
    pub fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let hostname = config.resolve_hostname();
        let identity = ServerIdentity::load(Path::new(&config.private_key), &hostname)?;
        let store = FileStore::open(Path::new(&config.database))?;
        info!(
            hostname = %hostname,
            users = store.len(),
            "loaded server identity and credential database"
        );

        Ok(Self {
            identity,
            registry: MechanismRegistry::standard(config.mschap_rfc_unicode),
            store: Arc::new(store),
        })
    }
}

/// Bound listeners, ready to run. Binding is part of startup so bind
/// failures surface as init errors.
pub struct Server {
    context: Arc<ServerContext>,
    primary: TcpListener,
    alternate: TcpListener,
    udp: UdpSocket,
    max_clients: usize,
}

impl Server {
    pub async fn bind(
        config: &Config,
        context: ServerContext,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let primary_addr = format!("{}:{}", config.listen_host, config.port);
        let alternate_addr = format!("{}:{}", config.listen_host, config.alt_port);

        let primary = TcpListener::bind(&primary_addr).await?;
        let alternate = TcpListener::bind(&alternate_addr).await?;
        let udp = UdpSocket::bind(&alternate_addr).await?;

        info!(
            primary = %primary_addr,
            alternate = %alternate_addr,
            max_clients = config.max_clients,
            "passwdd listening"
        );

        Ok(Self {
            context: Arc::new(context),
            primary,
            alternate,
            udp,
            max_clients: config.max_clients,
        })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let limit = Arc::new(Semaphore::new(self.max_clients));

        // Availability pings arrive over UDP; read and drop them.
        let udp = self.udp;
        tokio::spawn(async move {
            let mut buf = [0u8; BUFFER_SIZE];
            loop {
                match udp.recv_from(&mut buf).await {
                    Ok((_, peer)) => debug!(peer = %peer, "ignoring UDP message"),
                    Err(e) => {
                        warn!(error = %e, "UDP receive failed");
                        break;
                    }
                }
            }
        });

        loop {
            let (socket, peer) = tokio::select! {
                r = self.primary.accept() => r?,
                r = self.alternate.accept() => r?,
            };

            let permit = match Arc::clone(&limit).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(peer = %peer, "connection table full");
                    tokio::spawn(async move {
                        let mut socket = socket;
                        let _ = socket.write_all(TOO_MANY_USERS).await;
                        let _ = socket.shutdown().await;
                    });
                    continue;
                }
            };

            let context = Arc::clone(&self.context);
            let conn_id = CONN_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(conn_id, peer = %peer, "new connection");

            tokio::spawn(async move {
                let _permit = permit;
                let mut socket = socket;
                if let Err(e) = socket.write_all(GREETING).await {
                    debug!(conn_id, error = %e, "greeting failed");
                    return;
                }
                connection::serve(socket, context, conn_id).await;
            });
        }
    }
}
