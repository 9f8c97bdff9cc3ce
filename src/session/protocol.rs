//! JSON wire messages exchanged with the optimization backend.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{MethodParams, MethodTab};

/// Client to backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Start {
        request_id: Uuid,
        method_id: MethodTab,
        /// Canonical objective text.
        function: String,
        /// `[min_x, min_y]`.
        lower_bounds: [f64; 2],
        /// `[max_x, max_y]`.
        upper_bounds: [f64; 2],
        iterations_count: u32,
        population_size: u32,
        params: MethodParams,
    },
    Stop {
        request_id: Uuid,
        method_id: MethodTab,
    },
}

impl ClientMessage {
    /// Serialize to a text frame.
    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Progress of one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationReport {
    pub iteration: u32,
    #[serde(default)]
    pub population: Vec<[f64; 2]>,
    /// All-time best point.
    pub best_solution: [f64; 2],
    /// All-time best fitness.
    pub best_fitness: f64,
    /// Best point of this iteration, for methods that report it separately.
    #[serde(default, alias = "current_solution")]
    pub current_best_solution: Option<[f64; 2]>,
    #[serde(default, alias = "current_fitness")]
    pub current_best_fitness: Option<f64>,
}

/// Action-specific part of a backend message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServerAction {
    StartAck,
    Iteration(IterationReport),
    StopAck,
    Complete,
    Error {
        #[serde(default)]
        message: String,
    },
}

impl ServerAction {
    /// Wire name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            ServerAction::StartAck => "start_ack",
            ServerAction::Iteration(_) => "iteration",
            ServerAction::StopAck => "stop_ack",
            ServerAction::Complete => "complete",
            ServerAction::Error { .. } => "error",
        }
    }
}

/// Backend to client. Every message carries its correlation pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub request_id: Uuid,
    pub method_id: MethodTab,
    #[serde(flatten)]
    pub action: ServerAction,
}

impl ServerMessage {
    /// Parse one text frame.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// Wire format errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),
}
