//! Optimization client - safe objective expressions and correlated remote
//! optimization sessions.
//!
//! A user types a two-variable objective such as `x^2 + y^2`, picks search
//! bounds and one of several optimization methods (one tab per method), and
//! starts a run on a remote backend that streams iteration results back.
//!
//! # Architecture
//!
//! - `expr`: Expression sandbox. Parses, whitelists, canonicalizes and
//!   evaluates objective functions.
//! - `schema`: Configuration and input types (bounds, methods, parameters,
//!   built-in functions).
//! - `session`: Per-tab session registry and the manager that correlates
//!   backend messages with the run that requested them.
//! - `transport`: Connection seam between the manager and the backend, with a
//!   native WebSocket implementation.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use optim_client::{
//!     schema::{ClientConfig, MethodTab},
//!     session::SessionManager,
//!     transport::native::NativeTransport,
//! };
//!
//! let config = ClientConfig::default();
//! let transport = NativeTransport::new(config.backend_url.clone());
//! let mut manager = SessionManager::new(config, transport).unwrap();
//!
//! manager.set_objective_text(MethodTab::Bbo, "x^2 + y^2").unwrap();
//! manager.start(MethodTab::Bbo).unwrap();
//!
//! while manager.registry().get(MethodTab::Bbo).is_active() {
//!     for event in manager.transport_mut().poll(Duration::from_millis(50)) {
//!         for notification in manager.dispatch(event) {
//!             println!("{notification:?}");
//!         }
//!     }
//! }
//! ```

pub mod expr;
pub mod schema;
pub mod session;
pub mod transport;

// WebAssembly bindings (only for wasm32 target)
#[cfg(target_arch = "wasm32")]
pub mod wasm;

// Re-export commonly used types
pub use expr::{ObjectiveFunction, SandboxError, validate};
pub use schema::{ClientConfig, MethodTab, SearchBounds};
pub use session::{Notification, SessionManager};
