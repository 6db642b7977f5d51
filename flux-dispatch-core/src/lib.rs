//! Core types for flux-dispatch
//!
//! This crate provides a unidirectional data-flow coordination layer: named
//! actions dispatch payloads through a single serializing dispatcher to a set
//! of stores, which react to specific action types, mutate their state and
//! notify subscribers of a change.
//!
//! # Core Concepts
//!
//! - **Dispatcher**: Shared broadcaster; at most one dispatch in flight
//! - **Payload**: Immutable envelope of source, action type and data
//! - **Action**: Named source of payloads with re-entrant dispatch protection
//! - **Store**: Dispatch-registered state with per-action-type handlers
//! - **ChangeChannel**: Change notifications, independent of the dispatch cycle
//!
//! # Basic Example
//!
//! ```
//! use flux_dispatch_core::prelude::*;
//! use serde_json::json;
//!
//! #[derive(Default)]
//! struct Items {
//!     ids: Vec<i64>,
//! }
//!
//! impl StoreSpec for Items {
//!     type InitArgs = ();
//!
//!     fn register_handlers(&self, listeners: &mut Listeners<Self>, _wait_for: &WaitFor) {
//!         listeners.on("LOAD", |items: &mut Items, payload: &Payload, _: &WaitFor| {
//!             items.ids.push(payload.data()["id"].as_i64().unwrap_or_default());
//!             true
//!         });
//!     }
//! }
//!
//! let dispatcher: Dispatcher = Dispatcher::new();
//! let store = Store::new(Items::default(), &dispatcher);
//! store.init(());
//!
//! let loader = Action::new("Loader", &dispatcher);
//! loader.dispatch("LOAD", json!({ "id": 1 })).unwrap();
//! store.with_state(|items| assert_eq!(items.ids, vec![1]));
//! ```
//!
//! # Re-entrant Dispatch
//!
//! A handler that wants to emit a follow-up action cannot dispatch while the
//! current dispatch is in flight. [`Action::dispatch`] detects this and
//! schedules the payload on a retry task instead (see [`retry`]), returning
//! [`Dispatched::Deferred`]. The retry task sleeps for the action's
//! [`ActionOptions::timeout`] between attempts and gives up with
//! [`ActionError::RetriesExhausted`] once it passes
//! [`ActionOptions::max_retries`].

pub mod action;
pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod logger;
pub mod middleware;
pub mod options;
pub mod payload;
pub mod retry;
pub mod store;
pub mod testing;

// Core exports
pub use action::{Action, ActionType, Dispatched};
pub use channel::{ChangeChannel, ListenerId, Subscription};
pub use dispatcher::{DispatchToken, Dispatcher, WaitFor};
pub use error::{ActionError, DispatcherError, OptionsError, PayloadError};
pub use options::{ActionOptions, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT};
pub use payload::Payload;
pub use retry::RetryHandle;
pub use store::{Handler, InitEffects, Listeners, Store, StoreSpec};

// Middleware exports
pub use logger::{
    glob_match, DispatchLog, DispatchLogConfig, DispatchLogEntry, DispatchLoggerConfig,
    DispatchLoggerMiddleware,
};
pub use middleware::{ComposedMiddleware, Middleware, NoopMiddleware};

// Testing exports
pub use testing::{ChangeCounter, PayloadRecorder};

#[cfg(feature = "testing-time")]
pub use testing::{advance_time, pause_time, resume_time};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::action::{Action, ActionType, Dispatched};
    pub use crate::channel::{ListenerId, Subscription};
    pub use crate::dispatcher::{DispatchToken, Dispatcher, WaitFor};
    pub use crate::error::{ActionError, DispatcherError};
    pub use crate::middleware::{ComposedMiddleware, Middleware};
    pub use crate::options::ActionOptions;
    pub use crate::payload::Payload;
    pub use crate::store::{InitEffects, Listeners, Store, StoreSpec};
}
