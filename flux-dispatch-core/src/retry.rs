//! Deferred dispatch attempts for actions that collide with an in-flight dispatch
//!
//! When an [`Action`](crate::Action) finds the dispatcher busy it does not
//! block or fail. It hands the payload to a retry task on the current tokio
//! runtime which sleeps for the configured timeout, tries again, and repeats
//! until the dispatch goes through or the loop guard passes `max_retries`.
//!
//! The task is fire-and-forget: dropping the returned [`RetryHandle`] does
//! not cancel it. Awaiting [`RetryHandle::outcome`] surfaces exhaustion as an
//! [`ActionError::RetriesExhausted`] value instead of an unobservable panic.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::dispatcher::Dispatcher;
use crate::error::{ActionError, DispatcherError};
use crate::options::ActionOptions;
use crate::payload::Payload;

/// Handle to a scheduled retry task.
#[derive(Debug)]
pub struct RetryHandle {
    action: String,
    action_type: String,
    handle: JoinHandle<Result<u32, ActionError>>,
}

impl RetryHandle {
    /// Display name of the action being retried
    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    /// Whether the retry task has completed, successfully or not
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the retry task.
    ///
    /// Resolves to the loop guard value of the attempt that went through
    /// (the first deferred attempt is 1).
    pub async fn outcome(self) -> Result<u32, ActionError> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(ActionError::RetryAborted {
                action_type: self.action_type,
                action: self.action,
            }),
        }
    }
}

/// Spawn a retry task for `payload` on the current tokio runtime.
pub(crate) fn schedule<D>(
    dispatcher: Dispatcher<D>,
    payload: Arc<Payload<D>>,
    options: ActionOptions,
) -> Result<RetryHandle, ActionError>
where
    D: Send + Sync + 'static,
{
    let action = payload.source().to_string();
    let action_type = payload.action_type().to_string();

    let runtime =
        tokio::runtime::Handle::try_current().map_err(|_| ActionError::NoRuntime {
            action_type: action_type.clone(),
            action: action.clone(),
        })?;

    tracing::warn!(
        action = %action,
        action_type = %action_type,
        timeout_ms = options.timeout().as_millis() as u64,
        "dispatcher busy, deferring dispatch"
    );

    let handle = runtime.spawn(retry_loop(dispatcher, payload, options));
    Ok(RetryHandle {
        action,
        action_type,
        handle,
    })
}

async fn retry_loop<D>(
    dispatcher: Dispatcher<D>,
    payload: Arc<Payload<D>>,
    options: ActionOptions,
) -> Result<u32, ActionError> {
    // The synchronous attempt was loop guard 0
    let mut loop_guard: u32 = 1;

    loop {
        tokio::time::sleep(options.timeout()).await;

        match dispatcher.dispatch(Arc::clone(&payload)) {
            Ok(()) => {
                tracing::debug!(
                    action = %payload.source(),
                    action_type = %payload.action_type(),
                    attempt = loop_guard,
                    "deferred dispatch delivered"
                );
                return Ok(loop_guard);
            }
            Err(DispatcherError::AlreadyDispatching) if loop_guard > options.max_retries() => {
                tracing::error!(
                    action = %payload.source(),
                    action_type = %payload.action_type(),
                    attempts = loop_guard,
                    "cannot dispatch, retries exhausted"
                );
                return Err(ActionError::RetriesExhausted {
                    action_type: payload.action_type().to_string(),
                    action: payload.source().to_string(),
                    attempts: loop_guard,
                });
            }
            Err(DispatcherError::AlreadyDispatching) => {
                tracing::trace!(
                    action_type = %payload.action_type(),
                    attempt = loop_guard,
                    "dispatcher still busy"
                );
                loop_guard += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}
