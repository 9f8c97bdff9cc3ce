//! Native WebSocket transport built on blocking `tungstenite` sockets.
//!
//! Connections are opened lazily from [`NativeTransport::poll`] once their
//! delay has elapsed, then switched to non-blocking mode. A single thread
//! calls `poll` in a loop and hands the returned events to the session
//! manager.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Error as WsError, Message, WebSocket};

use super::{ConnectionId, Transport, TransportError, TransportEvent};
use crate::schema::MethodTab;

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Sleep between polls when nothing happened.
const IDLE_SLEEP: Duration = Duration::from_millis(5);
const SEND_RETRIES: u8 = 5;

enum State {
    /// Waiting for its open delay to elapse.
    Pending { due: Instant },
    Open(Box<Socket>),
}

struct Connection {
    tab: MethodTab,
    state: State,
}

/// One WebSocket per open connection, all to the same backend URL.
pub struct NativeTransport {
    url: String,
    next_id: u64,
    connections: HashMap<ConnectionId, Connection>,
    events: VecDeque<TransportEvent>,
}

impl NativeTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            next_id: 0,
            connections: HashMap::new(),
            events: VecDeque::new(),
        }
    }

    /// Whether any connection is pending or open.
    pub fn has_connections(&self) -> bool {
        !self.connections.is_empty()
    }

    /// Open due connections, read every open socket and return what happened.
    ///
    /// Sleeps for at most `timeout` when there is nothing to report.
    pub fn poll(&mut self, timeout: Duration) -> Vec<TransportEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            self.open_due();
            self.read_all();

            let now = Instant::now();
            if !self.events.is_empty() || now >= deadline {
                return self.events.drain(..).collect();
            }
            thread::sleep(IDLE_SLEEP.min(deadline - now));
        }
    }

    fn open_due(&mut self) {
        let now = Instant::now();
        let due: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, c)| matches!(c.state, State::Pending { due } if due <= now))
            .map(|(id, _)| *id)
            .collect();

        for id in due {
            let Some(connection) = self.connections.get_mut(&id) else {
                continue;
            };
            let tab = connection.tab;
            match connect(&self.url) {
                Ok(socket) => {
                    debug!("{id} for {tab} connected to {}", self.url);
                    connection.state = State::Open(Box::new(socket));
                    self.events.push_back(TransportEvent::Opened { tab, connection: id });
                }
                Err(detail) => {
                    warn!("{id} for {tab} failed to connect: {detail}");
                    self.connections.remove(&id);
                    self.events.push_back(TransportEvent::Error {
                        tab,
                        connection: id,
                        detail,
                    });
                }
            }
        }
    }

    fn read_all(&mut self) {
        let mut finished = Vec::new();

        for (&id, connection) in &mut self.connections {
            let tab = connection.tab;
            let State::Open(socket) = &mut connection.state else {
                continue;
            };

            // Drain frames left queued by a blocked send.
            match socket.flush() {
                Ok(()) => {}
                Err(WsError::Io(e)) if would_block(&e) => {}
                Err(e) => {
                    finished.push(id);
                    self.events.push_back(TransportEvent::Error {
                        tab,
                        connection: id,
                        detail: e.to_string(),
                    });
                    continue;
                }
            }

            loop {
                match socket.read() {
                    Ok(Message::Text(text)) => {
                        trace!("<- {id}: {}", text.as_str());
                        self.events.push_back(TransportEvent::Message {
                            tab,
                            connection: id,
                            text: text.as_str().to_string(),
                        });
                    }
                    Ok(Message::Close(_)) => {
                        finished.push(id);
                        self.events.push_back(TransportEvent::Closed { tab, connection: id });
                        break;
                    }
                    // Pings are answered by tungstenite. Binary frames are unused.
                    Ok(_) => {}
                    Err(WsError::Io(e)) if would_block(&e) => break,
                    Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                        finished.push(id);
                        self.events.push_back(TransportEvent::Closed { tab, connection: id });
                        break;
                    }
                    Err(e) => {
                        finished.push(id);
                        self.events.push_back(TransportEvent::Error {
                            tab,
                            connection: id,
                            detail: e.to_string(),
                        });
                        break;
                    }
                }
            }
        }

        for id in finished {
            self.connections.remove(&id);
        }
    }
}

impl Transport for NativeTransport {
    fn open(&mut self, tab: MethodTab, delay: Duration) -> Result<ConnectionId, TransportError> {
        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        self.connections.insert(
            id,
            Connection {
                tab,
                state: State::Pending {
                    due: Instant::now() + delay,
                },
            },
        );
        debug!("{id} for {tab} scheduled in {delay:?}");
        Ok(id)
    }

    fn send(&mut self, connection: ConnectionId, frame: &str) -> Result<(), TransportError> {
        let Some(Connection {
            state: State::Open(socket),
            ..
        }) = self.connections.get_mut(&connection)
        else {
            return Err(TransportError::NotOpen(connection));
        };

        trace!("-> {connection}: {frame}");
        match socket.send(Message::text(frame.to_string())) {
            Ok(()) => return Ok(()),
            Err(WsError::Io(e)) if would_block(&e) => {}
            Err(e) => return Err(TransportError::Send(e.to_string())),
        }

        // The frame is already queued; only the flush is retried.
        for _ in 0..SEND_RETRIES {
            thread::sleep(Duration::from_millis(2));
            match socket.flush() {
                Ok(()) => return Ok(()),
                Err(WsError::Io(e)) if would_block(&e) => {}
                Err(e) => return Err(TransportError::Send(e.to_string())),
            }
        }
        debug!("{connection}: frame queued, flushing on next poll");
        Ok(())
    }

    fn close(&mut self, connection: ConnectionId) {
        let Some(closed) = self.connections.remove(&connection) else {
            return;
        };
        if let State::Open(mut socket) = closed.state {
            // Best effort: the peer may already be gone.
            let _ = socket.close(None);
            let _ = socket.flush();
        }
        debug!("{connection} for {} closed", closed.tab);
    }
}

fn would_block(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}

fn connect(url: &str) -> Result<Socket, String> {
    let (mut socket, _response) = tungstenite::connect(url).map_err(|e| e.to_string())?;
    match socket.get_mut() {
        MaybeTlsStream::Plain(stream) => stream.set_nonblocking(true).map_err(|e| e.to_string())?,
        _ => return Err("only plain ws:// connections are supported".to_string()),
    }
    Ok(socket)
}
