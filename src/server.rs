//! TFTP server
//!
//! One listener task owns the well-known port and does nothing but decode
//! and dispatch: every accepted request gets its own session task with its
//! own ephemeral socket, so a stalled peer never blocks new requests and
//! there is no shared session table to race on. Requests are validated
//! against the server mode policy and the path sandbox before any session
//! exists; rejections are answered with a single ERROR packet.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::packet::{ErrorCode, Packet, TransferMode};
use crate::sandbox::{self, SandboxError};
use crate::transfer::{ephemeral_socket, Direction, Transfer, TransferConfig, TransferError};

/// Which request types the server accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    /// Serve read requests only.
    GetOnly,
    /// Serve write requests only.
    PutOnly,
    /// Serve both.
    GetAndPut,
}

impl ServerMode {
    pub fn allows_read(self) -> bool {
        matches!(self, Self::GetOnly | Self::GetAndPut)
    }

    pub fn allows_write(self) -> bool {
        matches!(self, Self::PutOnly | Self::GetAndPut)
    }
}

impl FromStr for ServerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get-only" => Ok(Self::GetOnly),
            "put-only" => Ok(Self::PutOnly),
            "get-and-put" => Ok(Self::GetAndPut),
            _ => Err(format!("unknown server mode: {} (expected get-only, put-only or get-and-put)", s)),
        }
    }
}

/// TFTP server configuration, immutable for the server's lifetime.
#[derive(Debug, Clone)]
pub struct TftpServerConfig {
    pub bind_address: String,
    /// Root directory read requests are resolved against.
    pub read_root: PathBuf,
    /// Root directory write requests are resolved against. May equal
    /// `read_root`.
    pub write_root: PathBuf,
    pub mode: ServerMode,
    /// Retry policy inherited by every session.
    pub transfer: TransferConfig,
}

impl Default for TftpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:6969".to_string(),
            read_root: PathBuf::from("./tftp_root"),
            write_root: PathBuf::from("./tftp_root"),
            mode: ServerMode::GetAndPut,
            transfer: TransferConfig::default(),
        }
    }
}

/// Handle to a running server; dropping it also stops the listener.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting requests and abort every live session. In-flight
    /// transfers are abandoned, not drained; safe to call while sessions
    /// are active.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Bind the well-known port and run the listener in a background task.
pub async fn spawn_tftp_server(config: TftpServerConfig) -> std::io::Result<ServerHandle> {
    let socket = UdpSocket::bind(&config.bind_address).await?;
    let local_addr = socket.local_addr()?;

    info!(
        "TFTP server listening on {} ({:?}, read root {}, write root {})",
        local_addr,
        config.mode,
        config.read_root.display(),
        config.write_root.display()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(serve(socket, Arc::new(config), shutdown_rx));

    Ok(ServerHandle {
        local_addr,
        shutdown: shutdown_tx,
        task,
    })
}

/// Listener loop: decode, validate cheaply, hand off to a session task.
async fn serve(socket: UdpSocket, config: Arc<TftpServerConfig>, mut shutdown: watch::Receiver<bool>) {
    let mut sessions: JoinSet<()> = JoinSet::new();
    let mut buf = [0u8; 2048];

    loop {
        // Reap sessions that have already finished.
        while sessions.try_join_next().is_some() {}

        tokio::select! {
            _ = shutdown.changed() => {
                info!("shutting down, aborting {} live session(s)", sessions.len());
                sessions.abort_all();
                while sessions.join_next().await.is_some() {}
                return;
            }
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, client)) => dispatch(&buf[..len], client, &config, &mut sessions),
                    Err(e) => warn!("listener receive error: {}", e),
                }
            }
        }
    }
}

/// Route one inbound datagram. Only RRQ and WRQ can open a conversation;
/// anything else on the well-known port belongs to no session and is
/// discarded.
fn dispatch(
    datagram: &[u8],
    client: SocketAddr,
    config: &Arc<TftpServerConfig>,
    sessions: &mut JoinSet<()>,
) {
    let packet = match Packet::decode(datagram) {
        Ok(packet) => packet,
        Err(e) => {
            debug!("discarding malformed datagram from {}: {}", client, e);
            return;
        }
    };

    match packet {
        Packet::ReadRequest { filename, mode } => {
            info!("RRQ for '{}' ({}) from {}", filename, mode, client);
            let config = Arc::clone(config);
            sessions.spawn(async move {
                if let Err(e) = handle_read_request(client, &filename, mode, &config).await {
                    warn!("read transfer of '{}' to {} failed: {}", filename, client, e);
                }
            });
        }
        Packet::WriteRequest { filename, mode } => {
            info!("WRQ for '{}' ({}) from {}", filename, mode, client);
            let config = Arc::clone(config);
            sessions.spawn(async move {
                if let Err(e) = handle_write_request(client, &filename, mode, &config).await {
                    warn!("write transfer of '{}' from {} failed: {}", filename, client, e);
                }
            });
        }
        other => {
            warn!("protocol violation: {} packet on listener port from {}", other.kind(), client);
        }
    }
}

/// Serve one accepted read request on its own ephemeral socket.
async fn handle_read_request(
    client: SocketAddr,
    filename: &str,
    _mode: TransferMode,
    config: &TftpServerConfig,
) -> Result<(), TransferError> {
    let socket = ephemeral_socket(client).await?;

    if !config.mode.allows_read() {
        send_reject(&socket, client, ErrorCode::AccessViolation, "read requests not allowed").await;
        return Ok(());
    }

    let path = match sandbox::resolve(&config.read_root, filename) {
        Ok(path) => path,
        Err(SandboxError::Escape) => {
            send_reject(&socket, client, ErrorCode::AccessViolation, "access violation").await;
            return Ok(());
        }
        Err(SandboxError::Io(_)) => {
            send_reject(&socket, client, ErrorCode::FileNotFound, "file not found").await;
            return Ok(());
        }
    };

    match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => {}
        _ => {
            send_reject(&socket, client, ErrorCode::FileNotFound, "file not found").await;
            return Ok(());
        }
    }

    let mut transfer = Transfer::server(socket, client, Direction::Send, config.transfer);
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) => {
            transfer.send_error(ErrorCode::AccessViolation, "cannot read file").await;
            return Err(e.into());
        }
    };
    transfer.send_data(&data).await?;

    info!("sent '{}' to {} ({} bytes)", filename, client, data.len());
    Ok(())
}

/// Serve one accepted write request on its own ephemeral socket.
///
/// The target is opened with truncation before the first block arrives, so
/// two sessions writing the same path interleave as last-writer-wins.
async fn handle_write_request(
    client: SocketAddr,
    filename: &str,
    _mode: TransferMode,
    config: &TftpServerConfig,
) -> Result<(), TransferError> {
    let socket = ephemeral_socket(client).await?;

    if !config.mode.allows_write() {
        send_reject(&socket, client, ErrorCode::AccessViolation, "write requests not allowed").await;
        return Ok(());
    }

    let path = match sandbox::resolve(&config.write_root, filename) {
        Ok(path) => path,
        Err(_) => {
            send_reject(&socket, client, ErrorCode::AccessViolation, "access violation").await;
            return Ok(());
        }
    };

    let mut file = match tokio::fs::File::create(&path).await {
        Ok(file) => file,
        Err(e) => {
            send_reject(&socket, client, ErrorCode::AccessViolation, "cannot create file").await;
            return Err(e.into());
        }
    };

    let mut transfer = Transfer::server(socket, client, Direction::Receive, config.transfer);
    transfer.accept_write().await?;
    transfer.receive_data(&mut file).await?;

    info!("received '{}' from {}", filename, client);
    Ok(())
}

/// Refuse a request with a single ERROR packet; no session is created.
async fn send_reject(socket: &UdpSocket, client: SocketAddr, code: ErrorCode, message: &str) {
    warn!("rejecting request from {}: {}", client, message);
    let packet = Packet::Error {
        code,
        message: message.to_string(),
    }
    .encode();
    if let Err(e) = socket.send_to(&packet, client).await {
        debug!("failed to send rejection to {}: {}", client, e);
    }
}
