//! Error types for payloads, options, actions and the dispatcher

use thiserror::Error;

use crate::dispatcher::DispatchToken;

/// Payload construction failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload source must be a non-empty string")]
    EmptySource,

    #[error("payload action type must be a non-empty string")]
    EmptyActionType,
}

/// Invalid [`ActionOptions`](crate::ActionOptions) input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("option `{field}` must be a non-negative number")]
    InvalidField { field: &'static str },

    #[error("options must be an object")]
    NotAnObject,

    #[error("options are not valid JSON: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for OptionsError {
    fn from(err: serde_json::Error) -> Self {
        OptionsError::Parse(err.to_string())
    }
}

/// Violations of the dispatcher's protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatcherError {
    #[error("cannot dispatch in the middle of a dispatch")]
    AlreadyDispatching,

    #[error("wait_for must be invoked while dispatching")]
    NotDispatching,

    #[error("{token} does not map to a registered callback")]
    UnknownToken { token: DispatchToken },

    #[error("circular dependency detected while waiting for {token}")]
    CircularDependency { token: DispatchToken },

    #[error("dispatcher has been dropped")]
    Detached,
}

/// Failures reported by [`Action::dispatch`](crate::Action::dispatch) and
/// deferred retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("cannot dispatch `{action_type}` from an action without a display name")]
    MissingDisplayName { action_type: String },

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("cannot dispatch `{action_type}` from `{action}`: retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        action_type: String,
        action: String,
        attempts: u32,
    },

    #[error("cannot defer `{action_type}` from `{action}`: no tokio runtime is running")]
    NoRuntime { action_type: String, action: String },

    #[error("retry task for `{action_type}` from `{action}` was aborted")]
    RetryAborted { action_type: String, action: String },

    #[error(transparent)]
    Dispatcher(#[from] DispatcherError),
}
