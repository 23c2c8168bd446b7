//! Lock-step transfer session
//!
//! One [`Transfer`] drives a single file exchange between two UDP
//! endpoints: block sequencing, transfer-ID binding, timeout-driven
//! retransmission and completion/error detection. At most one
//! unacknowledged DATA (or request) packet is ever outstanding.
//!
//! The session lifecycle is an explicit state machine ([`SessionState`]
//! with a total transition function) so every transition can be tested by
//! exhaustive match rather than inferred from control flow.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::packet::{DecodeError, ErrorCode, Packet, TransferMode, BLOCK_SIZE};

const RECV_BUFFER_SIZE: usize = 2048;

/// Retry policy shared by every session a client or server creates.
#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    /// Retransmissions allowed per block after the initial send.
    pub max_retries: u32,
    /// How long to wait for the peer before each retransmission.
    pub timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(2),
        }
    }
}

/// Which way file data flows in this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The local side reads a file and pushes DATA blocks.
    Send,
    /// The local side receives DATA blocks and writes them out.
    Receive,
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initiating,
    AwaitingFirstReply,
    Transferring,
    Completing,
    Completed,
    Failed,
}

/// Events that drive [`SessionState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A client sent its initial RRQ/WRQ.
    RequestIssued,
    /// The peer endpoint became fixed: either the first reply arrived
    /// (client) or the session was created from a received request (server).
    PeerBound,
    /// A full-size block was acknowledged (send) or stored (receive).
    BlockAdvanced,
    /// A short block went out; its acknowledgement is still pending.
    FinalBlockSent,
    /// A short block was stored and acknowledged; the transfer is done.
    FinalBlockStored,
    /// The acknowledgement for the short block arrived.
    FinalAckReceived,
    /// The session failed; terminal from every state.
    Failed,
}

impl SessionState {
    /// Total transition function. Any pairing not listed is a protocol or
    /// programming defect and lands in `Failed`, never a panic.
    pub fn on(self, event: SessionEvent) -> SessionState {
        use SessionEvent::*;
        use SessionState::*;

        match (self, event) {
            (Initiating, RequestIssued) => AwaitingFirstReply,
            (Initiating, PeerBound) => Transferring,
            (AwaitingFirstReply, PeerBound) => Transferring,
            (Transferring, BlockAdvanced) => Transferring,
            (Transferring, FinalBlockSent) => Completing,
            (Transferring, FinalBlockStored) => Completed,
            (Completing, FinalAckReceived) => Completed,
            _ => SessionState::Failed,
        }
    }
}

/// Why a session terminated without completing.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("timed out waiting for block {block}")]
    Timeout { block: u16 },
    #[error("peer reported error: {code}: {message}")]
    Peer { code: ErrorCode, message: String },
    #[error("out-of-order data block: expected {expected}, got {got}")]
    UnexpectedBlock { expected: u16, got: u16 },
    #[error("unexpected {0} packet")]
    UnexpectedPacket(&'static str),
    #[error("malformed packet from peer: {0}")]
    Decode(#[from] DecodeError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// The remote endpoint of a session.
///
/// A client session starts out knowing only the server's well-known
/// address; the server replies from a session-specific ephemeral port, so
/// the peer is fixed ("TID binding") by the first reply from the server's
/// IP. Packets from any other endpoint are answered with
/// `Error(UnknownTransferId)` and otherwise ignored.
#[derive(Debug, Clone, Copy)]
enum Peer {
    Expecting { server: SocketAddr },
    Bound(SocketAddr),
}

/// A single in-flight transfer bound to its own UDP socket.
pub struct Transfer {
    socket: UdpSocket,
    config: TransferConfig,
    direction: Direction,
    state: SessionState,
    peer: Peer,
    last_sent: Vec<u8>,
}

impl Transfer {
    /// Create a client-side session. The peer TID is fixed by the first
    /// reply arriving from `server`'s IP.
    pub fn client(
        socket: UdpSocket,
        server: SocketAddr,
        direction: Direction,
        config: TransferConfig,
    ) -> Self {
        Self {
            socket,
            config,
            direction,
            state: SessionState::Initiating,
            peer: Peer::Expecting { server },
            last_sent: Vec::new(),
        }
    }

    /// Create a server-side session for an accepted request. The peer is
    /// already known, so the session starts out transferring.
    pub fn server(
        socket: UdpSocket,
        peer: SocketAddr,
        direction: Direction,
        config: TransferConfig,
    ) -> Self {
        let mut transfer = Self {
            socket,
            config,
            direction,
            state: SessionState::Initiating,
            peer: Peer::Bound(peer),
            last_sent: Vec::new(),
        };
        transfer.transition(SessionEvent::PeerBound);
        transfer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The bound peer endpoint, once the first reply has fixed it.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self.peer {
            Peer::Bound(addr) => Some(addr),
            Peer::Expecting { .. } => None,
        }
    }

    /// Send an RRQ and leave the session waiting for the first DATA block;
    /// the transfer itself runs in [`receive_data`](Self::receive_data).
    pub async fn open_read(&mut self, filename: &str, mode: TransferMode) -> Result<(), TransferError> {
        let result = self
            .issue_request(Packet::ReadRequest {
                filename: filename.to_string(),
                mode,
            })
            .await;
        self.seal(result)
    }

    /// Send a WRQ and wait for the server's ACK of block 0.
    pub async fn open_write(&mut self, filename: &str, mode: TransferMode) -> Result<(), TransferError> {
        let result = async {
            self.issue_request(Packet::WriteRequest {
                filename: filename.to_string(),
                mode,
            })
            .await?;
            self.await_ack(0).await
        }
        .await;
        self.seal(result)
    }

    /// Server side of a write request: acknowledge block 0 so the peer
    /// starts sending DATA.
    pub async fn accept_write(&mut self) -> Result<(), TransferError> {
        let result = self.send_packet(Packet::Ack { block: 0 }).await;
        self.seal(result)
    }

    /// Push `data` to the peer in lock-step 512-byte blocks. Files whose
    /// length is an exact multiple of the block size are terminated by a
    /// zero-length final block.
    pub async fn send_data(&mut self, data: &[u8]) -> Result<(), TransferError> {
        let result = self.run_send(data).await;
        self.seal(result)
    }

    /// Receive DATA blocks from the peer into `sink` until a short block
    /// ends the transfer.
    pub async fn receive_data<W>(&mut self, sink: &mut W) -> Result<(), TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        let result = self.run_receive(sink).await;
        self.seal(result)
    }

    /// Best-effort ERROR notification to the bound peer; used on local
    /// failures where the transfer is doomed anyway.
    pub async fn send_error(&self, code: ErrorCode, message: &str) {
        if let Some(peer) = self.peer_addr() {
            let packet = Packet::Error {
                code,
                message: message.to_string(),
            }
            .encode();
            if let Err(e) = self.socket.send_to(&packet, peer).await {
                debug!("failed to send {} to {}: {}", code, peer, e);
            }
        }
    }

    async fn run_send(&mut self, data: &[u8]) -> Result<(), TransferError> {
        let mut block: u16 = 1;
        let mut offset = 0usize;

        loop {
            let end = usize::min(offset + BLOCK_SIZE, data.len());
            let payload = data[offset..end].to_vec();
            let last = payload.len() < BLOCK_SIZE;

            self.send_packet(Packet::Data { block, payload }).await?;
            if last {
                self.transition(SessionEvent::FinalBlockSent);
            }
            self.await_ack(block).await?;

            if last {
                self.transition(SessionEvent::FinalAckReceived);
                return Ok(());
            }
            self.transition(SessionEvent::BlockAdvanced);
            block = block.wrapping_add(1);
            offset = end;
        }
    }

    async fn run_receive<W>(&mut self, sink: &mut W) -> Result<(), TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut expected: u16 = 1;

        loop {
            let payload = self.await_data(expected).await?;
            let last = payload.len() < BLOCK_SIZE;

            let stored = async {
                sink.write_all(&payload).await?;
                if last {
                    sink.flush().await?;
                }
                io::Result::Ok(())
            }
            .await;
            if let Err(e) = stored {
                self.send_error(ErrorCode::DiskFull, "local write failed").await;
                return Err(TransferError::Io(e));
            }

            self.send_packet(Packet::Ack { block: expected }).await?;

            if last {
                self.transition(SessionEvent::FinalBlockStored);
                return Ok(());
            }
            self.transition(SessionEvent::BlockAdvanced);
            expected = expected.wrapping_add(1);
        }
    }

    /// Wait for the ACK matching `block`, retransmitting the last sent
    /// packet on each timeout until the retry budget is spent.
    async fn await_ack(&mut self, block: u16) -> Result<(), TransferError> {
        let mut retries_left = self.config.max_retries;

        loop {
            let deadline = Instant::now() + self.config.timeout;
            loop {
                match self.await_reply(deadline).await? {
                    None => break,
                    Some(Packet::Ack { block: acked }) if acked == block => return Ok(()),
                    Some(Packet::Ack { block: acked }) => {
                        // Duplicate ACK for an earlier block; the timer keeps
                        // running.
                        debug!("ignoring stale ack {} while waiting for {}", acked, block);
                    }
                    Some(Packet::Error { code, message }) => {
                        return Err(TransferError::Peer { code, message });
                    }
                    Some(other) => {
                        self.send_error(ErrorCode::IllegalOperation, "expected ACK").await;
                        return Err(TransferError::UnexpectedPacket(other.kind()));
                    }
                }
            }

            if retries_left == 0 {
                return Err(TransferError::Timeout { block });
            }
            retries_left -= 1;
            debug!("timeout waiting for ack {}, retransmitting ({} retries left)", block, retries_left);
            self.transmit_last().await?;
        }
    }

    /// Wait for the DATA block numbered `expected`, re-acknowledging a
    /// duplicate of the previous block and retransmitting the last sent
    /// packet on timeout.
    async fn await_data(&mut self, expected: u16) -> Result<Vec<u8>, TransferError> {
        let mut retries_left = self.config.max_retries;

        loop {
            let deadline = Instant::now() + self.config.timeout;
            loop {
                match self.await_reply(deadline).await? {
                    None => break,
                    Some(Packet::Data { block, payload }) if block == expected => {
                        return Ok(payload);
                    }
                    Some(Packet::Data { block, .. }) if block == expected.wrapping_sub(1) => {
                        // The peer missed our ACK; repeat it without
                        // re-writing the block.
                        debug!("duplicate data block {}, re-acknowledging", block);
                        self.transmit_last().await?;
                    }
                    Some(Packet::Data { block, .. }) => {
                        self.send_error(ErrorCode::IllegalOperation, "data block out of order")
                            .await;
                        return Err(TransferError::UnexpectedBlock { expected, got: block });
                    }
                    Some(Packet::Error { code, message }) => {
                        return Err(TransferError::Peer { code, message });
                    }
                    Some(other) => {
                        self.send_error(ErrorCode::IllegalOperation, "expected DATA").await;
                        return Err(TransferError::UnexpectedPacket(other.kind()));
                    }
                }
            }

            if retries_left == 0 {
                return Err(TransferError::Timeout { block: expected });
            }
            retries_left -= 1;
            debug!("timeout waiting for data {}, retransmitting ({} retries left)", expected, retries_left);
            self.transmit_last().await?;
        }
    }

    /// Receive one packet from the session peer, or `None` once `deadline`
    /// passes. Packets from foreign endpoints are answered with
    /// `Error(UnknownTransferId)` and do not consume the deadline.
    async fn await_reply(&mut self, deadline: Instant) -> Result<Option<Packet>, TransferError> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        loop {
            let received = match timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                Ok(result) => result?,
                Err(_) => return Ok(None),
            };
            let (len, src) = received;

            if !self.admit(src) {
                debug!("packet from foreign transfer id {}, rejecting", src);
                let reply = Packet::Error {
                    code: ErrorCode::UnknownTransferId,
                    message: "unknown transfer id".to_string(),
                }
                .encode();
                let _ = self.socket.send_to(&reply, src).await;
                continue;
            }

            return Ok(Some(Packet::decode(&buf[..len])?));
        }
    }

    /// Check whether `src` belongs to this session, binding the peer TID on
    /// the first reply from the server's IP.
    fn admit(&mut self, src: SocketAddr) -> bool {
        match self.peer {
            Peer::Bound(addr) => src == addr,
            Peer::Expecting { server } if src.ip() == server.ip() => {
                debug!("transfer id bound to {}", src);
                self.peer = Peer::Bound(src);
                self.transition(SessionEvent::PeerBound);
                true
            }
            Peer::Expecting { .. } => false,
        }
    }

    async fn issue_request(&mut self, request: Packet) -> Result<(), TransferError> {
        self.send_packet(request).await?;
        self.transition(SessionEvent::RequestIssued);
        Ok(())
    }

    /// Encode and transmit `packet`, retaining the bytes for
    /// retransmission.
    async fn send_packet(&mut self, packet: Packet) -> Result<(), TransferError> {
        self.last_sent = packet.encode();
        self.transmit_last().await
    }

    async fn transmit_last(&self) -> Result<(), TransferError> {
        let target = match self.peer {
            Peer::Bound(addr) => addr,
            Peer::Expecting { server } => server,
        };
        self.socket.send_to(&self.last_sent, target).await?;
        Ok(())
    }

    fn transition(&mut self, event: SessionEvent) {
        let next = self.state.on(event);
        debug!("{:?} session: {:?} --{:?}--> {:?}", self.direction, self.state, event, next);
        self.state = next;
    }

    fn seal<T>(&mut self, result: Result<T, TransferError>) -> Result<T, TransferError> {
        if result.is_err() {
            self.transition(SessionEvent::Failed);
        }
        result
    }
}

/// Bind a fresh ephemeral UDP socket in the address family of `peer`.
pub(crate) async fn ephemeral_socket(peer: SocketAddr) -> io::Result<UdpSocket> {
    let bind_addr = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr).await?;
    debug!("transfer socket bound to {}", socket.local_addr()?);
    Ok(socket)
}
