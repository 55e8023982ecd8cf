//! Per-client connection: outbound queue handle and the socket tasks.
//!
//! Each connection runs two tasks. The writer drains a bounded queue of
//! encoded frames onto the socket; the reader decodes frames and feeds them
//! to the session state machine. Everything else in the server talks to the
//! client only through a cloned [`ConnectionHandle`], which never blocks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Notify, mpsc};
use tokio::sync::mpsc::error::TrySendError;

use crate::codec::FrameDecoder;
use crate::protocol::clientbound::Clientbound;
use crate::protocol::handler::{Flow, Session};
use crate::protocol::serverbound::MAX_SERVERBOUND_FRAME_LEN;
use crate::protocol::{ProtocolError, ProtocolState};
use crate::server::Server;

const READ_BUF_LEN: usize = 4096;
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    #[error("outbound queue full")]
    Backlogged,
}

/// Cheap, cloneable sender side of one client connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    peer: SocketAddr,
    tx: mpsc::Sender<Vec<u8>>,
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl ConnectionHandle {
    /// A handle and the receiving end its frames arrive on.
    pub fn channel(peer: SocketAddr, capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            peer,
            tx,
            closed: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        };
        (handle, rx)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queue an encoded frame. A client that lets its queue fill up is
    /// disconnected rather than waited on.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Outbound queue for {} is full, disconnecting", self.peer);
                self.close();
                Err(ConnectionError::Backlogged)
            }
            Err(TrySendError::Closed(_)) => {
                self.closed.store(true, Ordering::Release);
                Err(ConnectionError::Closed)
            }
        }
    }

    pub fn send_packet(&self, packet: &Clientbound<'_>) -> Result<(), ProtocolError> {
        let frame = packet.encode()?;
        Ok(self.send(frame)?)
    }

    /// Mark closed and wake the reader task. Frames already queued are
    /// still written.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shutdown.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send a disconnect packet fitting `state` (if it has one), then close.
    pub fn disconnect(&self, state: ProtocolState, reason: &str) {
        let packet = match state {
            ProtocolState::Login => Some(Clientbound::LoginDisconnect { reason }),
            ProtocolState::Play => Some(Clientbound::Disconnect { reason }),
            ProtocolState::Handshake | ProtocolState::Status => None,
        };
        if let Some(packet) = packet {
            if let Err(e) = self.send_packet(&packet) {
                tracing::debug!("Could not send disconnect to {}: {}", self.peer, e);
            }
        }
        self.close();
    }

    fn shutdown_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }
}

// ── Socket tasks ────────────────────────────────────────────────────────

/// Drive one accepted connection until the client leaves or is closed.
/// The slot `entity_id` is released before returning.
pub async fn serve(
    server: Arc<Server>,
    stream: TcpStream,
    entity_id: i32,
    handle: ConnectionHandle,
    rx: mpsc::Receiver<Vec<u8>>,
) {
    let peer = handle.peer();
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("set_nodelay failed for {}: {}", peer, e);
    }
    let (mut reader, writer) = stream.into_split();
    let mut writer_task = tokio::spawn(write_loop(writer, rx));

    let shutdown = handle.shutdown_signal();
    let mut session = Session::new(entity_id, handle);
    if let Err(e) = read_loop(&server, &mut reader, &mut session, &shutdown).await {
        tracing::warn!("Protocol error from {}: {}", peer, e);
        server.metrics.protocol_error();
        session.fail(&e);
    }

    if let Some(player) = server.players.leave(entity_id) {
        if player.ready {
            server.metrics.player_left();
            tracing::info!("{} left (entity {})", player.username, entity_id);
        }
    }
    // Dropping the last senders lets the writer finish the queue and exit.
    drop(session);

    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task).await {
        Ok(Ok(Err(e))) => tracing::debug!("Write to {} failed: {}", peer, e),
        Ok(_) => {}
        Err(_) => {
            tracing::warn!("Writer for {} did not drain in time", peer);
            writer_task.abort();
        }
    }
    tracing::debug!("Connection from {} closed", peer);
}

async fn read_loop(
    server: &Server,
    reader: &mut OwnedReadHalf,
    session: &mut Session,
    shutdown: &Notify,
) -> Result<(), ProtocolError> {
    let mut decoder = FrameDecoder::with_limit(MAX_SERVERBOUND_FRAME_LEN);
    let mut buf = vec![0u8; READ_BUF_LEN];
    loop {
        let n = tokio::select! {
            r = reader.read(&mut buf) => match r {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!("Read from {} failed: {}", session.peer(), e);
                    return Ok(());
                }
            },
            _ = shutdown.notified() => return Ok(()),
        };
        decoder.extend(&buf[..n]);
        while let Some(frame) = decoder.next_frame()? {
            if session.handle_frame(server, &frame)? == Flow::Close {
                return Ok(());
            }
        }
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Vec<u8>>) -> std::io::Result<()> {
    while let Some(frame) = rx.recv().await {
        writer.write_all(&frame).await?;
    }
    writer.shutdown().await
}

/// Tell a client there is no room for it and hang up.
pub async fn reject(mut stream: TcpStream, reason: &str) {
    let peer = stream.peer_addr().ok();
    let result = async {
        let frame = Clientbound::LoginDisconnect { reason }
            .encode()
            .map_err(std::io::Error::other)?;
        stream.write_all(&frame).await?;
        stream.shutdown().await
    }
    .await;
    if let Err(e) = result {
        tracing::debug!("Rejecting {:?} failed: {}", peer, e);
    }
}
