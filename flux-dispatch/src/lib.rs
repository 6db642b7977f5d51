//! flux-dispatch: unidirectional data flow for Rust
//!
//! Actions dispatch payloads through one serializing dispatcher to stores,
//! which update their state and notify change listeners. A dispatch started
//! from inside a store handler is deferred to a bounded retry task instead of
//! breaking the one-dispatch-at-a-time rule.
//!
//! # Example
//! ```ignore
//! use flux_dispatch::prelude::*;
//!
//! #[derive(ActionType, Clone, Copy, Debug)]
//! #[action_type(rename_all = "SCREAMING_SNAKE_CASE")]
//! enum LoaderAction {
//!     Load,
//!     LoadFailed,
//! }
//!
//! let dispatcher: Dispatcher = Dispatcher::new();
//! let loader = Action::new("Loader", &dispatcher);
//! loader.dispatch(LoaderAction::Load, serde_json::json!({ "id": 1 }))?;
//! ```

// Re-export everything from core
pub use flux_dispatch_core::*;

// Re-export derive macros
pub use flux_dispatch_macros::ActionType;

/// Prelude for convenient imports
pub mod prelude {
    pub use flux_dispatch_core::prelude::*;

    // Derive macros
    pub use flux_dispatch_macros::ActionType;
}
