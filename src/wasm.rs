//! WebAssembly bindings for the optimization client.
//!
//! Provides a browser [`Transport`] on top of `web_sys::WebSocket` and a thin
//! wrapper around [`SessionManager`] for the page. Socket callbacks queue
//! transport events; the queue is drained into the manager whenever no call
//! into the client is in progress, and every resulting [`Notification`] is
//! passed to the registered JavaScript listener.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{CloseEvent, Event, MessageEvent, WebSocket};

use crate::expr::{SurfaceSamples, Vars, evaluate, sample_surface, validate};
use crate::schema::{
    BUILTIN_FUNCTIONS, ClientConfig, MethodParams, MethodTab, RunSettings, SearchBounds,
};
use crate::session::{IterationSnapshot, Notification, SessionManager};
use crate::transport::{ConnectionId, Transport, TransportError, TransportEvent};

/// Initialize WASM module with panic hook and logging.
#[wasm_bindgen(start)]
pub fn init() {
    // Set panic hook for better error messages in browser
    console_error_panic_hook::set_once();

    // Initialize WASM logger
    wasm_logger::init(wasm_logger::Config::default());
}

fn js_error(e: impl Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn parse_tab(tab: &str) -> Result<MethodTab, JsValue> {
    tab.parse::<MethodTab>().map_err(js_error)
}

// =============================================================================
// Browser transport
// =============================================================================

struct BrowserSocket {
    tab: MethodTab,
    /// `None` while the open delay is running.
    live: Option<LiveSocket>,
}

/// A connecting or open socket together with the callbacks it invokes.
struct LiveSocket {
    socket: WebSocket,
    _on_open: Closure<dyn FnMut(Event)>,
    _on_message: Closure<dyn FnMut(MessageEvent)>,
    _on_error: Closure<dyn FnMut(Event)>,
    _on_close: Closure<dyn FnMut(CloseEvent)>,
}

impl LiveSocket {
    /// Detach the callbacks and close the socket. The closures are freed
    /// when `self` drops.
    fn shutdown(self) {
        self.socket.set_onopen(None);
        self.socket.set_onmessage(None);
        self.socket.set_onerror(None);
        self.socket.set_onclose(None);
        let _ = self.socket.close();
    }
}

/// State shared between the transport and its socket callbacks.
struct BrowserShared {
    url: String,
    sockets: RefCell<HashMap<ConnectionId, BrowserSocket>>,
    queue: RefCell<VecDeque<TransportEvent>>,
    /// Called after an event is queued.
    wake: RefCell<Option<Rc<dyn Fn()>>>,
}

impl BrowserShared {
    fn push(&self, event: TransportEvent) {
        self.queue.borrow_mut().push_back(event);
        let wake = self.wake.borrow().clone();
        if let Some(wake) = wake {
            wake();
        }
    }

    fn pop(&self) -> Option<TransportEvent> {
        self.queue.borrow_mut().pop_front()
    }
}

/// [`Transport`] over browser WebSockets.
pub struct BrowserTransport {
    shared: Rc<BrowserShared>,
    next_id: u64,
}

impl BrowserTransport {
    fn new(url: String) -> Self {
        Self {
            shared: Rc::new(BrowserShared {
                url,
                sockets: RefCell::new(HashMap::new()),
                queue: RefCell::new(VecDeque::new()),
                wake: RefCell::new(None),
            }),
            next_id: 0,
        }
    }
}

/// Create the socket for `id` and wire its callbacks into the event queue.
fn connect(
    shared: &Rc<BrowserShared>,
    id: ConnectionId,
    tab: MethodTab,
) -> Result<(), TransportError> {
    let socket = WebSocket::new(&shared.url)
        .map_err(|e| TransportError::Open(format!("{e:?}")))?;
    let weak = Rc::downgrade(shared);

    let on_open = Closure::<dyn FnMut(Event)>::new({
        let weak = weak.clone();
        move |_: Event| {
            if let Some(shared) = weak.upgrade() {
                shared.push(TransportEvent::Opened { tab, connection: id });
            }
        }
    });
    let on_message = Closure::<dyn FnMut(MessageEvent)>::new({
        let weak = weak.clone();
        move |e: MessageEvent| {
            let Some(text) = e.data().as_string() else {
                warn!("{id}: ignoring non-text frame");
                return;
            };
            if let Some(shared) = weak.upgrade() {
                shared.push(TransportEvent::Message {
                    tab,
                    connection: id,
                    text,
                });
            }
        }
    });
    let on_error = Closure::<dyn FnMut(Event)>::new({
        let weak = weak.clone();
        move |_: Event| {
            if let Some(shared) = weak.upgrade() {
                shared.push(TransportEvent::Error {
                    tab,
                    connection: id,
                    detail: "WebSocket error".to_string(),
                });
            }
        }
    });
    let on_close = Closure::<dyn FnMut(CloseEvent)>::new(move |_: CloseEvent| {
        if let Some(shared) = weak.upgrade() {
            shared.push(TransportEvent::Closed { tab, connection: id });
        }
    });

    socket.set_onopen(Some(on_open.as_ref().unchecked_ref()));
    socket.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
    socket.set_onerror(Some(on_error.as_ref().unchecked_ref()));
    socket.set_onclose(Some(on_close.as_ref().unchecked_ref()));

    let live = LiveSocket {
        socket,
        _on_open: on_open,
        _on_message: on_message,
        _on_error: on_error,
        _on_close: on_close,
    };
    let mut sockets = shared.sockets.borrow_mut();
    let Some(entry) = sockets.get_mut(&id) else {
        drop(sockets);
        live.shutdown();
        return Err(TransportError::Open(format!("{id} was closed while connecting")));
    };
    entry.live = Some(live);
    debug!("{id} for {tab} connecting to {}", shared.url);
    Ok(())
}

impl Transport for BrowserTransport {
    fn open(&mut self, tab: MethodTab, delay: Duration) -> Result<ConnectionId, TransportError> {
        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        self.shared
            .sockets
            .borrow_mut()
            .insert(id, BrowserSocket { tab, live: None });

        if delay.is_zero() {
            if let Err(e) = connect(&self.shared, id, tab) {
                self.shared.sockets.borrow_mut().remove(&id);
                return Err(e);
            }
            return Ok(id);
        }

        let Some(window) = web_sys::window() else {
            self.shared.sockets.borrow_mut().remove(&id);
            return Err(TransportError::Open("no window".to_string()));
        };
        let weak = Rc::downgrade(&self.shared);
        let callback = Closure::once_into_js(move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            // Closed while waiting.
            if !shared.sockets.borrow().contains_key(&id) {
                return;
            }
            if let Err(e) = connect(&shared, id, tab) {
                shared.sockets.borrow_mut().remove(&id);
                shared.push(TransportEvent::Error {
                    tab,
                    connection: id,
                    detail: e.to_string(),
                });
            }
        });
        let timeout = delay.as_millis().min(i32::MAX as u128) as i32;
        let scheduled = window.set_timeout_with_callback_and_timeout_and_arguments_0(
            callback.unchecked_ref(),
            timeout,
        );
        if let Err(e) = scheduled {
            self.shared.sockets.borrow_mut().remove(&id);
            return Err(TransportError::Open(format!("{e:?}")));
        }
        Ok(id)
    }

    fn send(&mut self, connection: ConnectionId, frame: &str) -> Result<(), TransportError> {
        let sockets = self.shared.sockets.borrow();
        let socket = sockets
            .get(&connection)
            .and_then(|entry| entry.live.as_ref())
            .map(|live| &live.socket)
            .filter(|socket| socket.ready_state() == WebSocket::OPEN)
            .ok_or(TransportError::NotOpen(connection))?;
        socket
            .send_with_str(frame)
            .map_err(|e| TransportError::Send(format!("{e:?}")))
    }

    fn close(&mut self, connection: ConnectionId) {
        let Some(entry) = self.shared.sockets.borrow_mut().remove(&connection) else {
            return;
        };
        if let Some(live) = entry.live {
            live.shutdown();
        }
        debug!("{connection} for {} closed", entry.tab);
    }
}

// =============================================================================
// Client
// =============================================================================

struct ClientInner {
    manager: SessionManager<BrowserTransport>,
    listener: Option<js_sys::Function>,
}

/// Browser-facing optimization client: one session per method tab.
#[wasm_bindgen]
pub struct WasmOptimizerClient {
    inner: Rc<RefCell<ClientInner>>,
    shared: Rc<BrowserShared>,
}

/// Serializable view of one tab.
#[derive(Serialize)]
struct SessionView<'a> {
    tab: MethodTab,
    active: bool,
    status: String,
    function: Option<&'a str>,
    bounds: SearchBounds,
    settings: RunSettings,
    params: &'a MethodParams,
    history: &'a [f64],
    trajectory: &'a [[f64; 2]],
    snapshot: &'a IterationSnapshot,
}

#[wasm_bindgen]
impl WasmOptimizerClient {
    /// Create a client from an optional JSON `ClientConfig`.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<WasmOptimizerClient, JsValue> {
        let config: ClientConfig = match config_json {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| JsValue::from_str(&format!("Invalid config JSON: {e}")))?,
            None => ClientConfig::default(),
        };

        let transport = BrowserTransport::new(config.backend_url.clone());
        let shared = Rc::clone(&transport.shared);
        let manager = SessionManager::new(config, transport).map_err(js_error)?;
        let inner = Rc::new(RefCell::new(ClientInner {
            manager,
            listener: None,
        }));

        let wake: Rc<dyn Fn()> = {
            let inner = Rc::downgrade(&inner);
            let shared = Rc::downgrade(&shared);
            Rc::new(move || {
                if let (Some(inner), Some(shared)) = (inner.upgrade(), shared.upgrade()) {
                    pump(&inner, &shared);
                }
            })
        };
        *shared.wake.borrow_mut() = Some(wake);

        Ok(WasmOptimizerClient { inner, shared })
    }

    /// Register the function called with every notification.
    #[wasm_bindgen(js_name = onNotification)]
    pub fn on_notification(&self, callback: js_sys::Function) {
        self.inner.borrow_mut().listener = Some(callback);
    }

    /// Validate `text` and use it as the objective of `tab`.
    #[wasm_bindgen(js_name = setFunction)]
    pub fn set_function(&self, tab: &str, text: &str) -> Result<(), JsValue> {
        let tab = parse_tab(tab)?;
        let notifications = self
            .inner
            .borrow_mut()
            .manager
            .set_objective_text(tab, text)
            .map_err(js_error)?;
        self.emit(notifications);
        Ok(())
    }

    /// Use a built-in test function and its bounds for `tab`.
    #[wasm_bindgen(js_name = applyBuiltin)]
    pub fn apply_builtin(&self, tab: &str, key: &str) -> Result<(), JsValue> {
        let tab = parse_tab(tab)?;
        let notifications = self
            .inner
            .borrow_mut()
            .manager
            .apply_builtin(tab, key)
            .map_err(js_error)?;
        self.emit(notifications);
        Ok(())
    }

    /// Set the search bounds of `tab`. Reversed pairs are accepted.
    #[wasm_bindgen(js_name = setBounds)]
    pub fn set_bounds(
        &self,
        tab: &str,
        lower_x: f64,
        upper_x: f64,
        lower_y: f64,
        upper_y: f64,
    ) -> Result<(), JsValue> {
        let tab = parse_tab(tab)?;
        let bounds = SearchBounds::new(lower_x, upper_x, lower_y, upper_y);
        let notifications = self
            .inner
            .borrow_mut()
            .manager
            .set_bounds(tab, bounds)
            .map_err(js_error)?;
        self.emit(notifications);
        Ok(())
    }

    /// Set method parameters of `tab` from a `{ name: number }` object.
    #[wasm_bindgen(js_name = setParams)]
    pub fn set_params(&self, tab: &str, params: JsValue) -> Result<(), JsValue> {
        let tab = parse_tab(tab)?;
        let params: MethodParams = serde_wasm_bindgen::from_value(params)
            .map_err(|e| JsValue::from_str(&format!("Invalid parameters: {e}")))?;
        self.inner
            .borrow_mut()
            .manager
            .set_params(tab, params)
            .map_err(js_error)
    }

    /// Set iteration budget and population size of `tab`.
    #[wasm_bindgen(js_name = setRunSettings)]
    pub fn set_run_settings(
        &self,
        tab: &str,
        iterations_count: u32,
        population_size: u32,
    ) -> Result<(), JsValue> {
        let tab = parse_tab(tab)?;
        let settings = RunSettings {
            iterations_count,
            population_size,
        };
        self.inner
            .borrow_mut()
            .manager
            .set_run_settings(tab, settings)
            .map_err(js_error)
    }

    /// Start a run for `tab`.
    #[wasm_bindgen]
    pub fn start(&self, tab: &str) -> Result<(), JsValue> {
        let tab = parse_tab(tab)?;
        let result = self.inner.borrow_mut().manager.start(tab);
        match result {
            Ok(notifications) => {
                self.emit(notifications);
                Ok(())
            }
            Err(e) => {
                self.emit(vec![Notification::Status {
                    tab,
                    text: e.to_string(),
                }]);
                Err(js_error(e))
            }
        }
    }

    /// Stop the run of `tab`, if any.
    #[wasm_bindgen]
    pub fn stop(&self, tab: &str) -> Result<(), JsValue> {
        let tab = parse_tab(tab)?;
        let notifications = self.inner.borrow_mut().manager.stop(tab);
        self.emit(notifications);
        Ok(())
    }

    /// Switch the shown tab.
    #[wasm_bindgen(js_name = showTab)]
    pub fn show_tab(&self, tab: &str) -> Result<(), JsValue> {
        let tab = parse_tab(tab)?;
        let notifications = self.inner.borrow_mut().manager.show_tab(tab);
        self.emit(notifications);
        Ok(())
    }

    /// Status line of `tab`.
    #[wasm_bindgen]
    pub fn status(&self, tab: &str) -> Result<String, JsValue> {
        let tab = parse_tab(tab)?;
        Ok(self.inner.borrow().manager.registry().get(tab).status_text())
    }

    /// Number of connecting or running sessions.
    #[wasm_bindgen(js_name = activeCount)]
    pub fn active_count(&self) -> usize {
        self.inner.borrow().manager.registry().active_count()
    }

    /// Current state of `tab` as a plain object.
    #[wasm_bindgen(js_name = getSession)]
    pub fn get_session(&self, tab: &str) -> Result<JsValue, JsValue> {
        let tab = parse_tab(tab)?;
        let inner = self.inner.borrow();
        let session = inner.manager.registry().get(tab);
        let view = SessionView {
            tab,
            active: session.is_active(),
            status: session.status_text(),
            function: session.objective.as_ref().map(|f| f.canonical_text()),
            bounds: session.bounds,
            settings: session.settings,
            params: &session.params,
            history: &session.history,
            trajectory: &session.trajectory,
            snapshot: &session.snapshot,
        };
        serde_wasm_bindgen::to_value(&view)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {e}")))
    }

    /// Sample the objective of `tab` over its bounds for plotting.
    #[wasm_bindgen(js_name = sampleSurface)]
    pub fn sample_surface(&self, tab: &str, resolution: usize) -> Result<JsValue, JsValue> {
        let tab = parse_tab(tab)?;
        let inner = self.inner.borrow();
        let session = inner.manager.registry().get(tab);
        let objective = session
            .objective
            .as_ref()
            .ok_or_else(|| JsValue::from_str("No valid objective function"))?;
        let samples: SurfaceSamples = sample_surface(objective, &session.bounds, resolution);
        serde_wasm_bindgen::to_value(&samples)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {e}")))
    }
}

impl WasmOptimizerClient {
    /// Deliver `notifications`, then drain events queued in the meantime.
    fn emit(&self, notifications: Vec<Notification>) {
        let listener = self.inner.borrow().listener.clone();
        deliver(listener.as_ref(), &notifications);
        pump(&self.inner, &self.shared);
    }
}

fn deliver(listener: Option<&js_sys::Function>, notifications: &[Notification]) {
    let Some(listener) = listener else {
        return;
    };
    for notification in notifications {
        let value = match serde_wasm_bindgen::to_value(notification) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to serialize notification: {e}");
                continue;
            }
        };
        if let Err(e) = listener.call1(&JsValue::NULL, &value) {
            warn!("Notification listener failed: {e:?}");
        }
    }
}

/// Feed queued transport events into the manager.
///
/// Returns early while the client is borrowed; the call holding the borrow
/// drains the queue when it finishes.
fn pump(inner: &RefCell<ClientInner>, shared: &BrowserShared) {
    loop {
        let Ok(mut client) = inner.try_borrow_mut() else {
            return;
        };
        let Some(event) = shared.pop() else {
            return;
        };
        let notifications = client.manager.dispatch(event);
        let listener = client.listener.clone();
        drop(client);
        deliver(listener.as_ref(), &notifications);
    }
}

// =============================================================================
// Expression helpers
// =============================================================================

/// Validate `text` and return its canonical form.
#[wasm_bindgen(js_name = validateFunction)]
pub fn validate_function(text: &str) -> Result<String, JsValue> {
    validate(text)
        .map(|f| f.canonical_text().to_string())
        .map_err(js_error)
}

/// Evaluate `text` at `(x, y)`. Returns `undefined` outside the function's domain.
#[wasm_bindgen(js_name = evaluateFunction)]
pub fn evaluate_function(text: &str, x: f64, y: f64) -> Result<Option<f64>, JsValue> {
    let function = validate(text).map_err(js_error)?;
    Ok(evaluate(&function, Vars { x, y }).ok())
}

/// Built-in test functions with their formulas and default bounds.
#[wasm_bindgen(js_name = builtinFunctions)]
pub fn builtin_functions() -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(BUILTIN_FUNCTIONS)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {e}")))
}

/// Default parameters of a method.
#[wasm_bindgen(js_name = defaultParams)]
pub fn default_params(tab: &str) -> Result<JsValue, JsValue> {
    let tab = parse_tab(tab)?;
    serde_wasm_bindgen::to_value(&tab.default_params())
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {e}")))
}
