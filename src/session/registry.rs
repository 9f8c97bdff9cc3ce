//! Per-tab session records.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use super::protocol::{ClientMessage, IterationReport};
use crate::expr::ObjectiveFunction;
use crate::schema::{MethodParams, MethodTab, RunSettings, SearchBounds};
use crate::transport::ConnectionId;

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    /// Start issued, waiting for the transport to open and the backend to ack.
    Connecting,
    /// Backend acknowledged the start and is streaming iterations.
    Running,
}

impl SessionStatus {
    /// Connecting and running sessions count against the global cap.
    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Connecting | SessionStatus::Running)
    }
}

/// How the last run of a session ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Stopped by the user.
    Stopped,
    /// Backend finished the iteration budget.
    Completed,
    /// Backend reported an error.
    BackendError { message: String },
    /// The connection failed or closed unexpectedly.
    ConnectionError { detail: String },
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Stopped => f.write_str("Optimization stopped"),
            RunOutcome::Completed => f.write_str("Optimization complete"),
            RunOutcome::BackendError { message } => write!(f, "Backend error: {message}"),
            RunOutcome::ConnectionError { detail } => write!(f, "Connection error: {detail}"),
        }
    }
}

/// Latest population and best point of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IterationSnapshot {
    pub iteration: u32,
    pub total_iterations: u32,
    pub population: Vec<[f64; 2]>,
    pub best_solution: Option<[f64; 2]>,
    pub best_fitness: Option<f64>,
    pub current_best_solution: Option<[f64; 2]>,
    pub current_best_fitness: Option<f64>,
}

/// State of one tab.
#[derive(Debug, Clone)]
pub struct Session {
    pub tab: MethodTab,
    /// Correlation id of the active run, if any.
    pub correlation_id: Option<Uuid>,
    pub status: SessionStatus,
    pub outcome: Option<RunOutcome>,
    /// Current objective. `None` means the tab has no valid function.
    pub objective: Option<ObjectiveFunction>,
    pub bounds: SearchBounds,
    pub settings: RunSettings,
    pub params: MethodParams,
    /// All-time best fitness per received iteration.
    pub history: Vec<f64>,
    /// All-time best point per received iteration.
    pub trajectory: Vec<[f64; 2]>,
    pub snapshot: IterationSnapshot,
    /// Connection of the active run.
    pub transport: Option<ConnectionId>,
    /// Whether the current connection has signalled open.
    pub transport_open: bool,
    /// Open retries used by the current run.
    pub open_retries: u32,
    /// Start message waiting for the connection to open.
    pub pending_start: Option<ClientMessage>,
}

impl Session {
    fn new(
        tab: MethodTab,
        objective: Option<ObjectiveFunction>,
        bounds: SearchBounds,
        settings: RunSettings,
    ) -> Self {
        Self {
            tab,
            correlation_id: None,
            status: SessionStatus::Idle,
            outcome: None,
            objective,
            bounds,
            settings,
            params: tab.default_params(),
            history: Vec::new(),
            trajectory: Vec::new(),
            snapshot: IterationSnapshot::default(),
            transport: None,
            transport_open: false,
            open_retries: 0,
            pending_start: None,
        }
    }

    /// Whether this session holds a run and a connection.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Drop accumulated progress.
    pub fn reset_progress(&mut self) {
        self.history.clear();
        self.trajectory.clear();
        self.snapshot = IterationSnapshot {
            total_iterations: self.settings.iterations_count,
            ..Default::default()
        };
    }

    /// Apply one iteration report. The all-time best feeds the history.
    pub fn record_iteration(&mut self, report: IterationReport) {
        self.history.push(report.best_fitness);
        self.trajectory.push(report.best_solution);
        self.snapshot = IterationSnapshot {
            iteration: report.iteration,
            total_iterations: self.settings.iterations_count,
            population: report.population,
            best_solution: Some(report.best_solution),
            best_fitness: Some(report.best_fitness),
            current_best_solution: report.current_best_solution,
            current_best_fitness: report.current_best_fitness,
        };
    }

    /// Forget the run: clear the correlation id and connection and return to idle.
    /// Returns the connection that has to be closed, if any.
    pub fn finish(&mut self, outcome: RunOutcome) -> Option<ConnectionId> {
        self.correlation_id = None;
        self.status = SessionStatus::Idle;
        self.outcome = Some(outcome);
        self.transport_open = false;
        self.open_retries = 0;
        self.pending_start = None;
        self.transport.take()
    }

    /// Human-readable status line.
    pub fn status_text(&self) -> String {
        match self.status {
            SessionStatus::Connecting => "Connecting to optimization server...".to_string(),
            SessionStatus::Running if self.snapshot.iteration == 0 => {
                "Optimization running".to_string()
            }
            SessionStatus::Running => format!(
                "Optimization running: iteration {}/{}",
                self.snapshot.iteration, self.snapshot.total_iterations
            ),
            SessionStatus::Idle => match &self.outcome {
                Some(outcome) => outcome.to_string(),
                None => "Ready".to_string(),
            },
        }
    }
}

/// Session of every tab plus the tab currently shown.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    /// Indexed by [`MethodTab::index`].
    sessions: Vec<Session>,
    shown: MethodTab,
}

impl SessionRegistry {
    /// Create idle sessions for every tab.
    pub fn new(
        objective: Option<ObjectiveFunction>,
        bounds: SearchBounds,
        settings: RunSettings,
    ) -> Self {
        let sessions = MethodTab::ALL
            .into_iter()
            .map(|tab| Session::new(tab, objective.clone(), bounds, settings))
            .collect();
        Self {
            sessions,
            shown: MethodTab::ALL[0],
        }
    }

    pub fn get(&self, tab: MethodTab) -> &Session {
        &self.sessions[tab.index()]
    }

    pub fn get_mut(&mut self, tab: MethodTab) -> &mut Session {
        &mut self.sessions[tab.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    /// Number of connecting or running sessions.
    pub fn active_count(&self) -> usize {
        self.iter().filter(|s| s.is_active()).count()
    }

    pub fn set_shown(&mut self, tab: MethodTab) {
        self.shown = tab;
    }

    pub fn is_shown(&self, tab: MethodTab) -> bool {
        self.shown == tab
    }
}
