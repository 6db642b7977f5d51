//! Immutable dispatch envelope

use serde::Serialize;

use crate::error::PayloadError;

/// The envelope broadcast to every registered store for one dispatch.
///
/// Carries the name of the [`Action`](crate::Action) that produced it, the
/// action type stores route on, and the action's data. Fields are private so
/// a payload cannot change once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payload<D = serde_json::Value> {
    source: String,
    action_type: String,
    data: D,
}

impl<D> Payload<D> {
    /// Build a payload, rejecting an empty source or action type.
    pub fn new(
        source: impl Into<String>,
        action_type: impl Into<String>,
        data: D,
    ) -> Result<Self, PayloadError> {
        let source = source.into();
        let action_type = action_type.into();

        if source.is_empty() {
            return Err(PayloadError::EmptySource);
        }
        if action_type.is_empty() {
            return Err(PayloadError::EmptyActionType);
        }

        Ok(Self {
            source,
            action_type,
            data,
        })
    }

    /// Display name of the action that produced this payload
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Action type used for handler routing
    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    /// Consume the payload, returning its data
    pub fn into_data(self) -> D {
        self.data
    }
}
