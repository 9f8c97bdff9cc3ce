//! Session manager: one correlated optimization run per tab.
//!
//! All transitions happen inside `&mut self` calls, so every event for a tab
//! runs to completion before the next one is looked at. Nothing here blocks:
//! [`SessionManager::start`] and [`SessionManager::stop`] only trigger
//! transport I/O, and results come back through [`SessionManager::dispatch`].
//!
//! Stale traffic is dropped at two levels:
//!
//! - transport events for a connection other than the tab's current one;
//! - backend messages whose `(method_id, request_id)` does not match the
//!   tab's active correlation id.

use std::time::Duration;

use log::{debug, info, trace, warn};
use serde::Serialize;
use uuid::Uuid;

use super::protocol::{ClientMessage, ServerAction, ServerMessage};
use super::registry::{IterationSnapshot, RunOutcome, SessionRegistry, SessionStatus};
use crate::expr::{ObjectiveFunction, SandboxError, validate};
use crate::schema::{
    BoundsError, ClientConfig, ConfigError, MethodParams, MethodTab, ParamError, RunSettings,
    SearchBounds, builtin_function, validate_params,
};
use crate::transport::{ConnectionId, Transport, TransportError, TransportEvent};

/// Output for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// New status line for a tab.
    Status { tab: MethodTab, text: String },
    /// Latest iteration of the shown tab.
    Snapshot {
        tab: MethodTab,
        snapshot: IterationSnapshot,
    },
    /// A run of the shown tab ended; redraw the convergence view.
    ConvergenceRefresh { tab: MethodTab, history: Vec<f64> },
    /// Objective, bounds or shown tab changed; redraw everything for `tab`.
    Refresh { tab: MethodTab },
}

/// Reasons a start request is refused. None of them reach the backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StartError {
    #[error("No valid objective function for '{0}'")]
    NoObjective(MethodTab),
    #[error("Optimization for '{0}' is already running")]
    AlreadyActive(MethodTab),
    #[error("Too many optimizations running (limit {0})")]
    CapReached(usize),
    #[error("Invalid bounds: {0}")]
    Bounds(#[from] BoundsError),
    #[error("Invalid parameters: {0}")]
    Params(#[from] ParamError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Rejected tab configuration changes. The tab is left untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InputError {
    #[error("Invalid function: {0}")]
    Function(#[from] SandboxError),
    #[error("Invalid bounds: {0}")]
    Bounds(#[from] BoundsError),
    #[error("Invalid parameters: {0}")]
    Params(#[from] ParamError),
    #[error("Unknown built-in function '{0}'")]
    UnknownBuiltin(String),
}

/// Drives the sessions of every tab over a [`Transport`].
pub struct SessionManager<T: Transport> {
    config: ClientConfig,
    registry: SessionRegistry,
    transport: T,
}

impl<T: Transport> SessionManager<T> {
    /// Create a manager with every tab idle and set to the configured defaults.
    pub fn new(config: ClientConfig, transport: T) -> Result<Self, ConfigError> {
        config.validate()?;
        let objective = validate(&config.default_function)?;
        let registry =
            SessionRegistry::new(Some(objective), config.default_bounds, config.run_settings);
        Ok(Self {
            config,
            registry,
            transport,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Start a run for `tab`.
    ///
    /// Fails without side effects if the tab has no valid objective, already
    /// has an active run, or the global cap is reached. The start message is
    /// sent once the transport reports the connection open.
    pub fn start(&mut self, tab: MethodTab) -> Result<Vec<Notification>, StartError> {
        let limit = self.config.max_active_sessions;
        let active = self.registry.active_count();
        let session = self.registry.get(tab);

        let objective = session
            .objective
            .as_ref()
            .ok_or(StartError::NoObjective(tab))?;
        if session.is_active() {
            return Err(StartError::AlreadyActive(tab));
        }
        if active >= limit {
            warn!("Refusing to start {tab}: {active} of {limit} sessions active");
            return Err(StartError::CapReached(limit));
        }
        session.bounds.validate()?;
        let params = validate_params(tab, &session.params, &session.settings)?;

        let request_id = Uuid::new_v4();
        let request = ClientMessage::Start {
            request_id,
            method_id: tab,
            function: objective.canonical_text().to_string(),
            lower_bounds: session.bounds.lower_bounds(),
            upper_bounds: session.bounds.upper_bounds(),
            iterations_count: session.settings.iterations_count,
            population_size: session.settings.population_size,
            params,
        };

        let session = self.registry.get_mut(tab);
        session.reset_progress();
        session.correlation_id = Some(request_id);
        session.status = SessionStatus::Connecting;
        session.outcome = None;
        session.open_retries = 0;
        session.transport_open = false;
        session.pending_start = Some(request);

        match self.transport.open(tab, Duration::ZERO) {
            Ok(connection) => {
                info!("Starting {tab} run {request_id} on {connection}");
                self.registry.get_mut(tab).transport = Some(connection);
                Ok(vec![self.status(tab)])
            }
            Err(e) => {
                warn!("Could not open transport for {tab}: {e}");
                self.finish_run(
                    tab,
                    RunOutcome::ConnectionError {
                        detail: e.to_string(),
                    },
                );
                Err(StartError::Transport(e))
            }
        }
    }

    /// Stop the active run of `tab`, if any.
    ///
    /// Sends a stop message when the connection is open, closes the
    /// connection and returns the tab to idle without waiting for the
    /// backend. Late messages of the stopped run are discarded on arrival.
    pub fn stop(&mut self, tab: MethodTab) -> Vec<Notification> {
        let session = self.registry.get(tab);
        let Some(request_id) = session.correlation_id else {
            return Vec::new();
        };

        if let (Some(connection), true) = (session.transport, session.transport_open) {
            let message = ClientMessage::Stop {
                request_id,
                method_id: tab,
            };
            if let Err(e) = self.send(connection, &message) {
                warn!("Stop message for {tab} run {request_id} not delivered: {e}");
            }
        }

        info!("Stopped {tab} run {request_id}");
        self.finish_run(tab, RunOutcome::Stopped)
    }

    /// Replace the objective of `tab`. An active run is stopped first.
    pub fn set_objective(
        &mut self,
        tab: MethodTab,
        objective: ObjectiveFunction,
    ) -> Vec<Notification> {
        let mut notifications = self.stop(tab);
        let session = self.registry.get_mut(tab);
        debug!("Objective for {tab}: {}", objective.canonical_text());
        session.objective = Some(objective);
        session.reset_progress();
        notifications.extend(self.refresh_if_shown(tab));
        notifications
    }

    /// Validate `text` and use it as the objective of `tab`.
    pub fn set_objective_text(
        &mut self,
        tab: MethodTab,
        text: &str,
    ) -> Result<Vec<Notification>, InputError> {
        let objective = validate(text)?;
        Ok(self.set_objective(tab, objective))
    }

    /// Replace the search bounds of `tab`. An active run is stopped first.
    pub fn set_bounds(
        &mut self,
        tab: MethodTab,
        bounds: SearchBounds,
    ) -> Result<Vec<Notification>, InputError> {
        bounds.validate()?;
        let mut notifications = self.stop(tab);
        let session = self.registry.get_mut(tab);
        session.bounds = bounds;
        session.reset_progress();
        notifications.extend(self.refresh_if_shown(tab));
        Ok(notifications)
    }

    /// Use a built-in test function and its bounds for `tab`.
    pub fn apply_builtin(
        &mut self,
        tab: MethodTab,
        key: &str,
    ) -> Result<Vec<Notification>, InputError> {
        let builtin =
            builtin_function(key).ok_or_else(|| InputError::UnknownBuiltin(key.to_string()))?;
        let objective = validate(builtin.formula)?;
        builtin.bounds.validate()?;

        let mut notifications = self.stop(tab);
        let session = self.registry.get_mut(tab);
        session.objective = Some(objective);
        session.bounds = builtin.bounds;
        session.reset_progress();
        notifications.extend(self.refresh_if_shown(tab));
        Ok(notifications)
    }

    /// Replace the method parameters used by the next start of `tab`.
    pub fn set_params(
        &mut self,
        tab: MethodTab,
        params: MethodParams,
    ) -> Result<(), InputError> {
        let session = self.registry.get_mut(tab);
        session.params = validate_params(tab, &params, &session.settings)?;
        Ok(())
    }

    /// Replace iteration budget and population size used by the next start of `tab`.
    pub fn set_run_settings(
        &mut self,
        tab: MethodTab,
        settings: RunSettings,
    ) -> Result<(), InputError> {
        let session = self.registry.get_mut(tab);
        validate_params(tab, &session.params, &settings)?;
        session.settings = settings;
        Ok(())
    }

    /// Replace settings and parameters of `tab` together, checking them
    /// against each other rather than against the values they replace.
    pub fn configure_run(
        &mut self,
        tab: MethodTab,
        settings: RunSettings,
        params: MethodParams,
    ) -> Result<(), InputError> {
        let params = validate_params(tab, &params, &settings)?;
        let session = self.registry.get_mut(tab);
        session.settings = settings;
        session.params = params;
        Ok(())
    }

    /// Switch the shown tab.
    pub fn show_tab(&mut self, tab: MethodTab) -> Vec<Notification> {
        self.registry.set_shown(tab);
        vec![Notification::Refresh { tab }, self.status(tab)]
    }

    /// Apply one transport event.
    pub fn dispatch(&mut self, event: TransportEvent) -> Vec<Notification> {
        let tab = event.tab();
        let connection = event.connection();
        if self.registry.get(tab).transport != Some(connection) {
            debug!("Discarding event for stale connection {connection} of {tab}");
            return Vec::new();
        }

        match event {
            TransportEvent::Opened { .. } => self.on_opened(tab, connection),
            TransportEvent::Message { text, .. } => self.on_message(tab, &text),
            TransportEvent::Error { detail, .. } => {
                self.on_transport_error(tab, connection, detail)
            }
            TransportEvent::Closed { .. } => {
                warn!("Connection {connection} of {tab} closed unexpectedly");
                self.finish_run(
                    tab,
                    RunOutcome::ConnectionError {
                        detail: "connection closed".to_string(),
                    },
                )
            }
        }
    }

    fn on_opened(&mut self, tab: MethodTab, connection: ConnectionId) -> Vec<Notification> {
        let session = self.registry.get_mut(tab);
        session.transport_open = true;
        let Some(request) = session.pending_start.take() else {
            return Vec::new();
        };

        match self.send(connection, &request) {
            Ok(()) => Vec::new(),
            Err(e) => {
                warn!("Start message for {tab} not delivered: {e}");
                self.finish_run(
                    tab,
                    RunOutcome::ConnectionError {
                        detail: e.to_string(),
                    },
                )
            }
        }
    }

    fn on_message(&mut self, tab: MethodTab, text: &str) -> Vec<Notification> {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring unreadable message for {tab}: {e}");
                return Vec::new();
            }
        };

        let session = self.registry.get_mut(tab);
        if message.method_id != tab || session.correlation_id != Some(message.request_id) {
            debug!(
                "Discarding stale {} for {}/{}",
                message.action.name(),
                message.method_id,
                message.request_id
            );
            return Vec::new();
        }

        match message.action {
            ServerAction::StartAck => {
                if session.status != SessionStatus::Connecting {
                    return Vec::new();
                }
                session.status = SessionStatus::Running;
                info!("Backend accepted {tab} run {}", message.request_id);
                vec![self.status(tab)]
            }
            ServerAction::Iteration(report) => {
                if session.status == SessionStatus::Connecting {
                    debug!("Iteration before start_ack for {tab}; treating as acknowledged");
                    session.status = SessionStatus::Running;
                }
                trace!("{tab} iteration {}: {}", report.iteration, report.best_fitness);
                session.record_iteration(report);

                let mut notifications = vec![self.status(tab)];
                if self.registry.is_shown(tab) {
                    notifications.push(Notification::Snapshot {
                        tab,
                        snapshot: self.registry.get(tab).snapshot.clone(),
                    });
                }
                notifications
            }
            ServerAction::StopAck => self.finish_run(tab, RunOutcome::Stopped),
            ServerAction::Complete => self.finish_run(tab, RunOutcome::Completed),
            ServerAction::Error { message } => {
                warn!("Backend error for {tab}: {message}");
                self.finish_run(tab, RunOutcome::BackendError { message })
            }
        }
    }

    fn on_transport_error(
        &mut self,
        tab: MethodTab,
        connection: ConnectionId,
        detail: String,
    ) -> Vec<Notification> {
        let session = self.registry.get(tab);
        let attempt = session.open_retries + 1;
        let retry = session.is_active() && !session.transport_open;
        if retry && self.config.open_retry.allows(attempt) {
            let delay = self.config.open_retry.delay(attempt);
            warn!("Opening transport for {tab} failed ({detail}); retry {attempt} in {delay:?}");
            self.transport.close(connection);
            match self.transport.open(tab, delay) {
                Ok(next) => {
                    let session = self.registry.get_mut(tab);
                    session.transport = Some(next);
                    session.open_retries = attempt;
                    return vec![Notification::Status {
                        tab,
                        text: format!("Connection failed, retrying ({attempt})..."),
                    }];
                }
                Err(e) => {
                    return self.finish_run(
                        tab,
                        RunOutcome::ConnectionError {
                            detail: e.to_string(),
                        },
                    );
                }
            }
        }

        warn!("Transport error for {tab}: {detail}");
        self.finish_run(tab, RunOutcome::ConnectionError { detail })
    }

    /// Move `tab` to idle with `outcome`, closing its connection.
    fn finish_run(&mut self, tab: MethodTab, outcome: RunOutcome) -> Vec<Notification> {
        let session = self.registry.get_mut(tab);
        if let Some(connection) = session.finish(outcome) {
            self.transport.close(connection);
        }
        info!("{tab}: {}", self.registry.get(tab).status_text());

        let mut notifications = vec![self.status(tab)];
        if self.registry.is_shown(tab) {
            notifications.push(Notification::ConvergenceRefresh {
                tab,
                history: self.registry.get(tab).history.clone(),
            });
        }
        notifications
    }

    fn send(
        &mut self,
        connection: ConnectionId,
        message: &ClientMessage,
    ) -> Result<(), TransportError> {
        let frame = message
            .to_frame()
            .map_err(|e| TransportError::Send(e.to_string()))?;
        trace!("-> {connection}: {frame}");
        self.transport.send(connection, &frame)
    }

    fn status(&self, tab: MethodTab) -> Notification {
        Notification::Status {
            tab,
            text: self.registry.get(tab).status_text(),
        }
    }

    fn refresh_if_shown(&self, tab: MethodTab) -> Option<Notification> {
        self.registry
            .is_shown(tab)
            .then_some(Notification::Refresh { tab })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::RetryPolicy;
    use crate::transport::mock::RecordingTransport;

    fn manager() -> SessionManager<RecordingTransport> {
        SessionManager::new(ClientConfig::default(), RecordingTransport::default()).unwrap()
    }

    fn manager_with(config: ClientConfig) -> SessionManager<RecordingTransport> {
        SessionManager::new(config, RecordingTransport::default()).unwrap()
    }

    /// Start `tab` and deliver the transport-open event.
    fn start_open(m: &mut SessionManager<RecordingTransport>, tab: MethodTab) -> Uuid {
        m.start(tab).unwrap();
        let opened = m.transport().opened_event(tab);
        m.dispatch(opened);
        m.registry().get(tab).correlation_id.unwrap()
    }

    fn message(
        m: &SessionManager<RecordingTransport>,
        tab: MethodTab,
        body: serde_json::Value,
    ) -> TransportEvent {
        TransportEvent::Message {
            tab,
            connection: m.transport().last_connection(tab),
            text: body.to_string(),
        }
    }

    fn ack(m: &SessionManager<RecordingTransport>, tab: MethodTab, id: Uuid) -> TransportEvent {
        message(
            m,
            tab,
            json!({ "action": "start_ack", "request_id": id, "method_id": tab }),
        )
    }

    fn iteration(
        m: &SessionManager<RecordingTransport>,
        tab: MethodTab,
        id: Uuid,
        n: u32,
        fitness: f64,
    ) -> TransportEvent {
        message(
            m,
            tab,
            json!({
                "action": "iteration",
                "request_id": id,
                "method_id": tab,
                "iteration": n,
                "population": [[1.0, 2.0], [3.0, 4.0]],
                "best_solution": [fitness, fitness],
                "best_fitness": fitness,
            }),
        )
    }

    #[test]
    fn test_start_sends_after_open() {
        let mut m = manager();
        let notes = m.start(MethodTab::Bbo).unwrap();

        assert_eq!(m.registry().get(MethodTab::Bbo).status, SessionStatus::Connecting);
        assert!(m.transport().sent.is_empty());
        assert!(matches!(&notes[0], Notification::Status { tab: MethodTab::Bbo, .. }));

        let opened = m.transport().opened_event(MethodTab::Bbo);
        m.dispatch(opened);
        let sent = m.transport().sent_json();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["action"], "start");
        assert_eq!(sent[0]["method_id"], "bbo");
        assert_eq!(sent[0]["function"], "cos(x^2+y^2)");
        assert_eq!(sent[0]["iterations_count"], 10);
        assert_eq!(sent[0]["population_size"], 50);
        assert_eq!(
            sent[0]["request_id"],
            m.registry().get(MethodTab::Bbo).correlation_id.unwrap().to_string()
        );
    }

    #[test]
    fn test_start_ack_moves_to_running() {
        let mut m = manager();
        let id = start_open(&mut m, MethodTab::Cultural);
        let notes = m.dispatch(ack(&m, MethodTab::Cultural, id));

        assert_eq!(m.registry().get(MethodTab::Cultural).status, SessionStatus::Running);
        assert_eq!(
            notes,
            vec![Notification::Status {
                tab: MethodTab::Cultural,
                text: "Optimization running".to_string()
            }]
        );
    }

    #[test]
    fn test_reversed_bounds_are_sent_ascending() {
        let mut m = manager();
        m.set_bounds(MethodTab::Bbo, SearchBounds::new(5.0, -5.0, -2.0, 2.0))
            .unwrap();
        start_open(&mut m, MethodTab::Bbo);

        let sent = m.transport().sent_json();
        assert_eq!(sent[0]["lower_bounds"], json!([-5.0, -2.0]));
        assert_eq!(sent[0]["upper_bounds"], json!([5.0, 2.0]));
    }

    #[test]
    fn test_canonical_function_is_sent() {
        let mut m = manager();
        m.set_objective_text(MethodTab::Harmony, "log(8, 2) * x").unwrap();
        start_open(&mut m, MethodTab::Harmony);
        assert_eq!(m.transport().sent_json()[0]["function"], "log(2,8)*x");
    }

    #[test]
    fn test_second_start_same_tab_rejected() {
        let mut m = manager();
        let id = start_open(&mut m, MethodTab::Bbo);
        m.dispatch(ack(&m, MethodTab::Bbo, id));

        assert_eq!(m.start(MethodTab::Bbo), Err(StartError::AlreadyActive(MethodTab::Bbo)));
        assert_eq!(m.transport().sent.len(), 1);
        assert_eq!(m.transport().opened.len(), 1);
        assert_eq!(m.registry().get(MethodTab::Bbo).correlation_id, Some(id));
    }

    #[test]
    fn test_iterations_append_in_order() {
        let mut m = manager();
        let tab = MethodTab::Bbo;
        let id = start_open(&mut m, tab);
        m.dispatch(ack(&m, tab, id));

        m.dispatch(iteration(&m, tab, id, 1, 5.0));
        let notes = m.dispatch(iteration(&m, tab, id, 2, 3.0));

        let session = m.registry().get(tab);
        assert_eq!(session.history, vec![5.0, 3.0]);
        assert_eq!(session.trajectory, vec![[5.0, 5.0], [3.0, 3.0]]);
        assert_eq!(session.snapshot.iteration, 2);
        assert_eq!(session.snapshot.total_iterations, 10);
        assert_eq!(session.status_text(), "Optimization running: iteration 2/10");
        assert!(notes.iter().any(|n| matches!(n, Notification::Snapshot { .. })));
    }

    #[test]
    fn test_snapshot_only_for_shown_tab() {
        let mut m = manager();
        let tab = MethodTab::De;
        let id = start_open(&mut m, tab);

        let notes = m.dispatch(iteration(&m, tab, id, 1, 1.0));
        assert!(!notes.iter().any(|n| matches!(n, Notification::Snapshot { .. })));
        assert!(notes.iter().any(|n| matches!(n, Notification::Status { .. })));
        // Iteration before ack counts as acknowledgement.
        assert_eq!(m.registry().get(tab).status, SessionStatus::Running);

        let notes = m.show_tab(tab);
        assert_eq!(notes[0], Notification::Refresh { tab });
        let notes = m.dispatch(iteration(&m, tab, id, 2, 0.5));
        assert!(notes.iter().any(|n| matches!(n, Notification::Snapshot { .. })));
    }

    #[test]
    fn test_mismatched_correlation_id_is_discarded() {
        let mut m = manager();
        let tab = MethodTab::Bbo;
        let id = start_open(&mut m, tab);
        m.dispatch(ack(&m, tab, id));
        m.dispatch(iteration(&m, tab, id, 1, 4.0));

        let notes = m.dispatch(iteration(&m, tab, Uuid::new_v4(), 2, 1.0));
        assert!(notes.is_empty());
        assert_eq!(m.registry().get(tab).history, vec![4.0]);
        assert_eq!(m.registry().get(tab).trajectory.len(), 1);
    }

    #[test]
    fn test_message_for_other_method_is_discarded() {
        let mut m = manager();
        let id = start_open(&mut m, MethodTab::Bbo);
        let event = message(
            &m,
            MethodTab::Bbo,
            json!({ "action": "complete", "request_id": id, "method_id": "cultural" }),
        );
        assert!(m.dispatch(event).is_empty());
        assert!(m.registry().get(MethodTab::Bbo).is_active());
    }

    #[test]
    fn test_stop_then_late_iteration() {
        let mut m = manager();
        let tab = MethodTab::Bbo;
        let id = start_open(&mut m, tab);
        m.dispatch(ack(&m, tab, id));
        m.dispatch(iteration(&m, tab, id, 1, 2.0));
        let connection = m.transport().last_connection(tab);

        let notes = m.stop(tab);
        assert_eq!(
            notes,
            vec![
                Notification::Status {
                    tab,
                    text: "Optimization stopped".to_string()
                },
                Notification::ConvergenceRefresh {
                    tab,
                    history: vec![2.0]
                },
            ]
        );

        let sent = m.transport().sent_json();
        assert_eq!(sent.last().unwrap()["action"], "stop");
        assert_eq!(sent.last().unwrap()["request_id"], id.to_string());
        assert!(m.transport().closed.contains(&connection));

        let late = TransportEvent::Message {
            tab,
            connection,
            text: json!({
                "action": "iteration", "request_id": id, "method_id": "bbo",
                "iteration": 2, "best_solution": [0.0, 0.0], "best_fitness": 0.0
            })
            .to_string(),
        };
        assert!(m.dispatch(late).is_empty());

        let session = m.registry().get(tab);
        assert_eq!(session.status, SessionStatus::Idle);
        assert_eq!(session.correlation_id, None);
        assert_eq!(session.history, vec![2.0]);
    }

    #[test]
    fn test_stop_before_open_sends_nothing() {
        let mut m = manager();
        m.start(MethodTab::Ga).unwrap();
        m.stop(MethodTab::Ga);

        assert!(m.transport().sent.is_empty());
        assert_eq!(m.transport().closed.len(), 1);

        // The old connection opening afterwards must not resurrect the run.
        let opened = m.transport().opened_event(MethodTab::Ga);
        assert!(m.dispatch(opened).is_empty());
        assert!(m.transport().sent.is_empty());
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut m = manager();
        assert!(m.stop(MethodTab::Bbo).is_empty());
        assert!(m.transport().closed.is_empty());
    }

    #[test]
    fn test_restart_ignores_previous_run() {
        let mut m = manager();
        let tab = MethodTab::Harmony;
        let first = start_open(&mut m, tab);
        m.stop(tab);
        let second = start_open(&mut m, tab);
        assert_ne!(first, second);

        m.dispatch(ack(&m, tab, second));
        assert!(m.dispatch(iteration(&m, tab, first, 1, 9.0)).is_empty());
        m.dispatch(iteration(&m, tab, second, 1, 1.0));
        assert_eq!(m.registry().get(tab).history, vec![1.0]);
    }

    #[test]
    fn test_global_cap() {
        let mut m = manager();
        let tabs = MethodTab::ALL;
        for tab in &tabs[..5] {
            m.start(*tab).unwrap();
        }
        assert_eq!(m.registry().active_count(), 5);

        assert_eq!(m.start(tabs[5]), Err(StartError::CapReached(5)));
        assert_eq!(m.transport().opened.len(), 5);
        assert_eq!(m.registry().get(tabs[5]).status, SessionStatus::Idle);
        for tab in &tabs[..5] {
            assert_eq!(m.registry().get(*tab).status, SessionStatus::Connecting);
        }

        // Freeing a slot allows the start.
        m.stop(tabs[0]);
        assert!(m.start(tabs[5]).is_ok());
    }

    #[test]
    fn test_custom_cap() {
        let mut m = manager_with(ClientConfig {
            max_active_sessions: 1,
            ..Default::default()
        });
        m.start(MethodTab::Bbo).unwrap();
        assert_eq!(m.start(MethodTab::Cultural), Err(StartError::CapReached(1)));
    }

    #[test]
    fn test_terminal_messages() {
        let cases = [
            (json!({ "action": "complete" }), "Optimization complete"),
            (json!({ "action": "stop_ack" }), "Optimization stopped"),
            (
                json!({ "action": "error", "message": "division failed" }),
                "Backend error: division failed",
            ),
        ];

        for (body, expected) in cases {
            let mut m = manager();
            let tab = MethodTab::Bbo;
            let id = start_open(&mut m, tab);
            m.dispatch(ack(&m, tab, id));
            let connection = m.transport().last_connection(tab);

            let mut body = body;
            body["request_id"] = json!(id);
            body["method_id"] = json!("bbo");
            let notes = m.dispatch(message(&m, tab, body));

            assert_eq!(
                notes[0],
                Notification::Status {
                    tab,
                    text: expected.to_string()
                }
            );
            assert!(matches!(notes[1], Notification::ConvergenceRefresh { .. }));
            let session = m.registry().get(tab);
            assert_eq!(session.status, SessionStatus::Idle);
            assert_eq!(session.correlation_id, None);
            assert!(m.transport().closed.contains(&connection));
        }
    }

    #[test]
    fn test_transport_error_is_terminal() {
        let mut m = manager();
        let tab = MethodTab::Pso;
        let id = start_open(&mut m, tab);
        m.dispatch(ack(&m, tab, id));

        let notes = m.dispatch(TransportEvent::Error {
            tab,
            connection: m.transport().last_connection(tab),
            detail: "reset by peer".to_string(),
        });
        assert_eq!(
            notes[0],
            Notification::Status {
                tab,
                text: "Connection error: reset by peer".to_string()
            }
        );
        assert_eq!(m.registry().get(tab).status, SessionStatus::Idle);
        // No automatic reconnect once the connection had opened.
        assert_eq!(m.transport().opened.len(), 1);
    }

    #[test]
    fn test_unexpected_close_is_connection_error() {
        let mut m = manager();
        let tab = MethodTab::Bbo;
        start_open(&mut m, tab);
        m.dispatch(TransportEvent::Closed {
            tab,
            connection: m.transport().last_connection(tab),
        });
        assert!(matches!(
            m.registry().get(tab).outcome,
            Some(RunOutcome::ConnectionError { .. })
        ));
    }

    #[test]
    fn test_errors_do_not_touch_other_tabs() {
        let mut m = manager();
        let a = start_open(&mut m, MethodTab::Bbo);
        m.dispatch(ack(&m, MethodTab::Bbo, a));
        start_open(&mut m, MethodTab::Cultural);

        m.dispatch(TransportEvent::Error {
            tab: MethodTab::Cultural,
            connection: m.transport().last_connection(MethodTab::Cultural),
            detail: "gone".to_string(),
        });
        assert_eq!(m.registry().get(MethodTab::Bbo).status, SessionStatus::Running);
        assert_eq!(m.registry().get(MethodTab::Bbo).correlation_id, Some(a));
    }

    #[test]
    fn test_open_retry_policy() {
        let mut m = manager_with(ClientConfig {
            open_retry: RetryPolicy::reconnect_table(),
            ..Default::default()
        });
        let tab = MethodTab::Bbo;
        m.start(tab).unwrap();

        for attempt in 1..=3u32 {
            let connection = m.transport().last_connection(tab);
            let notes = m.dispatch(TransportEvent::Error {
                tab,
                connection,
                detail: "refused".to_string(),
            });
            assert!(matches!(
                &notes[0],
                Notification::Status { text, .. } if text.contains("retrying")
            ));
            assert_eq!(m.registry().get(tab).status, SessionStatus::Connecting);
            let (_, _, delay) = m.transport().opened.last().unwrap();
            assert_eq!(*delay, RetryPolicy::reconnect_table().delay(attempt));
        }

        let connection = m.transport().last_connection(tab);
        m.dispatch(TransportEvent::Error {
            tab,
            connection,
            detail: "refused".to_string(),
        });
        assert_eq!(m.registry().get(tab).status, SessionStatus::Idle);
        assert_eq!(m.transport().opened.len(), 4);
    }

    #[test]
    fn test_retried_connection_sends_start() {
        let mut m = manager_with(ClientConfig {
            open_retry: RetryPolicy::reconnect_table(),
            ..Default::default()
        });
        let tab = MethodTab::Bbo;
        m.start(tab).unwrap();
        let first = m.transport().last_connection(tab);
        m.dispatch(TransportEvent::Error {
            tab,
            connection: first,
            detail: "refused".to_string(),
        });

        // The abandoned connection is stale now.
        assert!(m.dispatch(TransportEvent::Opened { tab, connection: first }).is_empty());
        assert!(m.transport().sent.is_empty());

        let opened = m.transport().opened_event(tab);
        m.dispatch(opened);
        assert_eq!(m.transport().sent.len(), 1);
    }

    #[test]
    fn test_synchronous_open_failure() {
        let mut m = manager();
        m.transport_mut().fail_open = true;
        assert!(matches!(m.start(MethodTab::Bbo), Err(StartError::Transport(_))));

        let session = m.registry().get(MethodTab::Bbo);
        assert_eq!(session.status, SessionStatus::Idle);
        assert_eq!(session.correlation_id, None);
    }

    #[test]
    fn test_start_requires_objective() {
        let mut m = manager();
        m.registry.get_mut(MethodTab::Bbo).objective = None;
        assert_eq!(m.start(MethodTab::Bbo), Err(StartError::NoObjective(MethodTab::Bbo)));
        assert!(m.transport().opened.is_empty());
    }

    #[test]
    fn test_invalid_objective_leaves_tab_unchanged() {
        let mut m = manager();
        assert!(matches!(
            m.set_objective_text(MethodTab::Bbo, "open(x)"),
            Err(InputError::Function(_))
        ));
        let objective = m.registry().get(MethodTab::Bbo).objective.as_ref().unwrap();
        assert_eq!(objective.source_text(), "cos(x^2+y^2)");
    }

    #[test]
    fn test_changing_objective_stops_active_run() {
        let mut m = manager();
        let tab = MethodTab::Bbo;
        let id = start_open(&mut m, tab);
        m.dispatch(ack(&m, tab, id));
        m.dispatch(iteration(&m, tab, id, 1, 3.0));

        let notes = m.set_objective_text(tab, "x^2 + y^2").unwrap();
        assert!(notes.contains(&Notification::Refresh { tab }));
        assert_eq!(m.transport().sent_json().last().unwrap()["action"], "stop");

        let session = m.registry().get(tab);
        assert_eq!(session.status, SessionStatus::Idle);
        assert!(session.history.is_empty());
        assert!(session.trajectory.is_empty());

        // Late traffic from the superseded run is ignored.
        let connection = m.transport().last_connection(tab);
        let late = TransportEvent::Message {
            tab,
            connection,
            text: json!({ "action": "complete", "request_id": id, "method_id": "bbo" }).to_string(),
        };
        assert!(m.dispatch(late).is_empty());
    }

    #[test]
    fn test_changing_bounds_stops_active_run() {
        let mut m = manager();
        let tab = MethodTab::Cultural;
        start_open(&mut m, tab);
        m.set_bounds(tab, SearchBounds::symmetric(2.0)).unwrap();
        assert!(!m.registry().get(tab).is_active());

        assert!(matches!(
            m.set_bounds(tab, SearchBounds::new(1.0, 1.0, 0.0, 1.0)),
            Err(InputError::Bounds(_))
        ));
        assert_eq!(m.registry().get(tab).bounds, SearchBounds::symmetric(2.0));
    }

    #[test]
    fn test_apply_builtin() {
        let mut m = manager();
        m.apply_builtin(MethodTab::Bbo, "schwefel").unwrap();
        let session = m.registry().get(MethodTab::Bbo);
        assert_eq!(session.bounds, SearchBounds::symmetric(100.0));
        assert!(matches!(
            m.apply_builtin(MethodTab::Bbo, "unknown"),
            Err(InputError::UnknownBuiltin(_))
        ));
    }

    #[test]
    fn test_configure_run_checks_settings_with_new_params() {
        let mut m = manager();
        let tab = MethodTab::Bbo;
        let tiny = RunSettings {
            iterations_count: 5,
            population_size: 2,
        };
        let no_elite: MethodParams = [("elite_count".to_string(), 0.0)].into_iter().collect();
        m.configure_run(tab, tiny, no_elite).unwrap();
        assert_eq!(m.registry().get(tab).settings, tiny);
        assert_eq!(m.registry().get(tab).params["elite_count"], 0.0);

        // Valid together even though 55 elites exceed the previous population.
        let large = RunSettings {
            iterations_count: 5,
            population_size: 60,
        };
        let many: MethodParams = [("elite_count".to_string(), 55.0)].into_iter().collect();
        m.configure_run(tab, large, many).unwrap();

        let too_many: MethodParams = [("elite_count".to_string(), 2.0)].into_iter().collect();
        assert!(matches!(
            m.configure_run(tab, tiny, too_many),
            Err(InputError::Params(_))
        ));
        assert_eq!(m.registry().get(tab).settings, large);

        start_open(&mut m, tab);
        let sent = m.transport().sent_json();
        assert_eq!(sent[0]["population_size"], 60);
        assert_eq!(sent[0]["params"]["elite_count"], 55.0);
    }

    #[test]
    fn test_params_are_validated_and_sent() {
        let mut m = manager();
        let tab = MethodTab::Bbo;
        let params: MethodParams =
            [("mutation_probability".to_string(), 0.2)].into_iter().collect();
        m.set_params(tab, params).unwrap();
        m.set_run_settings(
            tab,
            RunSettings {
                iterations_count: 25,
                population_size: 12,
            },
        )
        .unwrap();

        let bad: MethodParams = [("elite_count".to_string(), 12.0)].into_iter().collect();
        assert!(matches!(m.set_params(tab, bad), Err(InputError::Params(_))));
        assert!(m
            .set_run_settings(
                tab,
                RunSettings {
                    iterations_count: 25,
                    population_size: 2,
                },
            )
            .is_err());

        start_open(&mut m, tab);
        let sent = m.transport().sent_json();
        assert_eq!(sent[0]["params"]["mutation_probability"], 0.2);
        assert_eq!(sent[0]["params"]["elite_count"], 2.0);
        assert_eq!(sent[0]["iterations_count"], 25);
        assert_eq!(sent[0]["population_size"], 12);
    }

    #[test]
    fn test_unreadable_message_is_ignored() {
        let mut m = manager();
        let tab = MethodTab::Bbo;
        start_open(&mut m, tab);
        let event = TransportEvent::Message {
            tab,
            connection: m.transport().last_connection(tab),
            text: "{ not json".to_string(),
        };
        assert!(m.dispatch(event).is_empty());
        assert!(m.registry().get(tab).is_active());
    }
}
