//! Recording transport for tests.

use std::time::Duration;

use super::{ConnectionId, Transport, TransportError, TransportEvent};
use crate::schema::MethodTab;

/// Records every call and never does I/O.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    next_id: u64,
    /// `(tab, connection, delay)` per `open` call.
    pub opened: Vec<(MethodTab, ConnectionId, Duration)>,
    /// `(connection, frame)` per `send` call.
    pub sent: Vec<(ConnectionId, String)>,
    pub closed: Vec<ConnectionId>,
    /// When set, `open` fails synchronously.
    pub fail_open: bool,
}

impl RecordingTransport {
    /// Frames sent so far, parsed as JSON.
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent
            .iter()
            .map(|(_, frame)| serde_json::from_str(frame).unwrap())
            .collect()
    }

    /// Most recently opened connection for `tab`.
    pub fn last_connection(&self, tab: MethodTab) -> ConnectionId {
        self.opened
            .iter()
            .rev()
            .find(|(t, _, _)| *t == tab)
            .map(|(_, c, _)| *c)
            .unwrap()
    }

    /// Opened event for the most recent connection of `tab`.
    pub fn opened_event(&self, tab: MethodTab) -> TransportEvent {
        TransportEvent::Opened {
            tab,
            connection: self.last_connection(tab),
        }
    }
}

impl Transport for RecordingTransport {
    fn open(&mut self, tab: MethodTab, delay: Duration) -> Result<ConnectionId, TransportError> {
        if self.fail_open {
            return Err(TransportError::Open("refused".to_string()));
        }
        self.next_id += 1;
        let connection = ConnectionId(self.next_id);
        self.opened.push((tab, connection, delay));
        Ok(connection)
    }

    fn send(&mut self, connection: ConnectionId, frame: &str) -> Result<(), TransportError> {
        if self.closed.contains(&connection) {
            return Err(TransportError::NotOpen(connection));
        }
        self.sent.push((connection, frame.to_string()));
        Ok(())
    }

    fn close(&mut self, connection: ConnectionId) {
        self.closed.push(connection);
    }
}
