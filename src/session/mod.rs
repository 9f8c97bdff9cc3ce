//! Per-tab optimization sessions and their backend protocol.
//!
//! Each method tab owns one [`Session`]. Starting a run assigns it a fresh
//! correlation id (a v4 UUID); every backend message carries the
//! `(method_id, request_id)` pair and is applied only if it matches the
//! tab's active run. Stopping, completing or failing a run clears the id,
//! so anything still in flight for the old run is dropped on arrival.
//!
//! [`SessionManager`] is sans-IO: it talks to a [`Transport`](crate::transport::Transport)
//! and is driven by feeding transport events into
//! [`SessionManager::dispatch`]. Results come back as [`Notification`]s.

mod manager;
mod protocol;
mod registry;

pub use manager::{InputError, Notification, SessionManager, StartError};
pub use protocol::{ClientMessage, IterationReport, ProtocolError, ServerAction, ServerMessage};
pub use registry::{IterationSnapshot, RunOutcome, Session, SessionRegistry, SessionStatus};
