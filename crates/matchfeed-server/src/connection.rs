use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use axum::extract::ws::Utf8Bytes;
use matchfeed_core::{ConnectionId, MatchId, ServerMessage};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Lifecycle of one socket. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Outbound frame queued for the socket writer.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Pre-serialized JSON; cloning shares the buffer.
    Text(Utf8Bytes),
    Ping,
}

/// Why a frame was not queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendError {
    NotOpen,
    QueueFull,
    /// The writer side is gone; the socket must be reaped.
    Disconnected,
    /// The payload could not be serialized; nothing was queued.
    Encode,
}

/// One live WebSocket session. Liveness and the subscribed-match set are
/// owned here and die with the connection.
pub struct Connection {
    id: ConnectionId,
    state: AtomicU8,
    alive: AtomicBool,
    subscriptions: Mutex<HashSet<MatchId>>,
    tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
}

impl Connection {
    pub(crate) fn new(tx: mpsc::Sender<Frame>, cancel: CancellationToken) -> Self {
        Self {
            id: ConnectionId::new(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            alive: AtomicBool::new(true),
            subscriptions: Mutex::new(HashSet::new()),
            tx,
            cancel,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// CONNECTING → OPEN. False if the socket was closed before it opened.
    pub(crate) fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// CONNECTING/OPEN → CLOSING and stop the socket tasks.
    pub(crate) fn begin_close(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s < ConnectionState::Closing as u8).then_some(ConnectionState::Closing as u8)
            });
        self.cancel.cancel();
    }

    /// Enter CLOSED. Returns true for exactly one caller per connection.
    pub(crate) fn finish_close(&self) -> bool {
        self.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel)
            != ConnectionState::Closed as u8
    }

    /// Resolves once the connection is closing for any reason.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Clear the liveness flag, returning its previous value.
    pub(crate) fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Snapshot of subscribed matches.
    pub fn subscriptions(&self) -> Vec<MatchId> {
        self.subscriptions.lock().iter().cloned().collect()
    }

    pub fn is_subscribed(&self, match_id: &MatchId) -> bool {
        self.subscriptions.lock().contains(match_id)
    }

    /// Only the registry mutates the set, and only while holding its own lock.
    pub(crate) fn subscriptions_mut(&self) -> MutexGuard<'_, HashSet<MatchId>> {
        self.subscriptions.lock()
    }

    /// Queue a pre-serialized payload. Never blocks.
    pub fn send_text(&self, text: Utf8Bytes) -> Result<(), SendError> {
        self.enqueue(Frame::Text(text))
    }

    pub fn send(&self, message: &ServerMessage) -> Result<(), SendError> {
        self.send_json(message, message.kind())
    }

    /// Serialize `value` and queue it. `kind` labels the failure log.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T, kind: &str) -> Result<(), SendError> {
        match serde_json::to_string(value) {
            Ok(json) => self.send_text(json.into()),
            Err(e) => {
                tracing::error!(connection_id = %self.id, kind, error = %e, "failed to encode frame");
                Err(SendError::Encode)
            }
        }
    }

    pub(crate) fn ping(&self) -> Result<(), SendError> {
        self.enqueue(Frame::Ping)
    }

    fn enqueue(&self, frame: Frame) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::NotOpen);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %self.id, "send queue full, dropping frame");
                Err(SendError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Disconnected),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("alive", &self.is_alive())
            .finish()
    }
}
