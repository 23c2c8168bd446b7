//! TFTP (Trivial File Transfer Protocol) client and server
//!
//! An RFC 1350 implementation built around a lock-step transfer engine:
//!
//! - **Packet codec**: the five packet types (RRQ/WRQ/DATA/ACK/ERROR) with
//!   strict big-endian wire layout
//! - **Transfer sessions**: per-transfer state machine with transfer-ID
//!   binding, timeout-driven retransmission and a bounded retry budget
//! - **Client**: whole-file upload and download against a remote server
//! - **Server**: concurrent sessions on ephemeral ports, read/write mode
//!   policy, path traversal protection via a canonicalizing sandbox
//!
//! # Basic usage
//!
//! ```rust,no_run
//! use tftp::{spawn_tftp_server, TftpClient, TftpServerConfig, TransferMode};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = spawn_tftp_server(TftpServerConfig {
//!         bind_address: "0.0.0.0:69".to_string(),
//!         ..Default::default()
//!     })
//!     .await?;
//!
//!     let client = TftpClient::with_defaults();
//!     client
//!         .receive_file("boot.img", TransferMode::Octet, "./boot.img", server.local_addr())
//!         .await?;
//!
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod packet;
pub mod sandbox;
pub mod server;
pub mod transfer;

pub use client::TftpClient;
pub use packet::{DecodeError, ErrorCode, Packet, TransferMode, BLOCK_SIZE};
pub use sandbox::SandboxError;
pub use server::{spawn_tftp_server, ServerHandle, ServerMode, TftpServerConfig};
pub use transfer::{Direction, SessionState, Transfer, TransferConfig, TransferError};
