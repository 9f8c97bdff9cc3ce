//! Transport layer between the session manager and the optimization backend.
//!
//! A transport owns message-oriented, bidirectional connections (one per
//! active tab). Opening and sending return immediately; everything the
//! connection reports afterwards arrives as a [`TransportEvent`] that the
//! caller feeds into [`SessionManager::dispatch`](crate::session::SessionManager::dispatch).
//!
//! Implementations:
//!
//! - `native::NativeTransport`: blocking `tungstenite` sockets polled from a
//!   single-threaded loop (not on `wasm32`).
//! - `crate::wasm::BrowserTransport`: `web_sys::WebSocket` (only on `wasm32`).

use std::fmt;
use std::time::Duration;

use crate::schema::MethodTab;

#[cfg(not(target_arch = "wasm32"))]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

/// Handle of one connection. Never reused within a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Something a connection reported.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection is open and can carry messages.
    Opened {
        tab: MethodTab,
        connection: ConnectionId,
    },
    /// A text frame arrived.
    Message {
        tab: MethodTab,
        connection: ConnectionId,
        text: String,
    },
    /// The connection failed to open or failed while open.
    Error {
        tab: MethodTab,
        connection: ConnectionId,
        detail: String,
    },
    /// The connection closed.
    Closed {
        tab: MethodTab,
        connection: ConnectionId,
    },
}

impl TransportEvent {
    /// Tab the event belongs to.
    pub fn tab(&self) -> MethodTab {
        match self {
            TransportEvent::Opened { tab, .. }
            | TransportEvent::Message { tab, .. }
            | TransportEvent::Error { tab, .. }
            | TransportEvent::Closed { tab, .. } => *tab,
        }
    }

    /// Connection the event belongs to.
    pub fn connection(&self) -> ConnectionId {
        match self {
            TransportEvent::Opened { connection, .. }
            | TransportEvent::Message { connection, .. }
            | TransportEvent::Error { connection, .. }
            | TransportEvent::Closed { connection, .. } => *connection,
        }
    }
}

/// Transport failures reported synchronously.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to open connection: {0}")]
    Open(String),
    #[error("Connection {0} is not open")]
    NotOpen(ConnectionId),
    #[error("Failed to send message: {0}")]
    Send(String),
}

/// Connection factory and sink used by the session manager.
pub trait Transport {
    /// Begin opening a connection for `tab` after `delay`. The outcome is
    /// reported later as [`TransportEvent::Opened`] or [`TransportEvent::Error`].
    fn open(&mut self, tab: MethodTab, delay: Duration) -> Result<ConnectionId, TransportError>;

    /// Send one text frame on an open connection.
    fn send(&mut self, connection: ConnectionId, frame: &str) -> Result<(), TransportError>;

    /// Close a connection. Closing an unknown or closed connection is a no-op.
    fn close(&mut self, connection: ConnectionId);
}
