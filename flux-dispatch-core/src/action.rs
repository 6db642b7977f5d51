//! Named actions that package data into payloads and dispatch them

use std::fmt;
use std::sync::Arc;

use crate::dispatcher::Dispatcher;
use crate::error::{ActionError, DispatcherError};
use crate::options::ActionOptions;
use crate::payload::Payload;
use crate::retry::{self, RetryHandle};

/// A statically known action type.
///
/// Use `#[derive(ActionType)]` from `flux-dispatch-macros` to implement this
/// trait (together with `AsRef<str>` and `Display`) for a unit-only enum, so
/// its variants can be passed anywhere an action type string is accepted.
pub trait ActionType {
    /// The action type string stores route on
    fn as_str(&self) -> &'static str;
}

/// How a call to [`Action::dispatch`] was carried out.
#[derive(Debug)]
pub enum Dispatched {
    /// The payload was broadcast before `dispatch` returned.
    Immediate,
    /// Another dispatch was in flight; the payload was handed to a retry task.
    Deferred(RetryHandle),
}

impl Dispatched {
    pub fn is_immediate(&self) -> bool {
        matches!(self, Dispatched::Immediate)
    }

    /// The retry handle, if the dispatch was deferred
    pub fn into_retry(self) -> Option<RetryHandle> {
        match self {
            Dispatched::Immediate => None,
            Dispatched::Deferred(handle) => Some(handle),
        }
    }
}

/// A named, dispatch-capable source of payloads.
///
/// The display name becomes the [`Payload::source`] of every payload the
/// action builds. Dispatching while the shared dispatcher is busy (typically
/// from inside a store handler) defers the payload to a bounded retry task
/// instead of failing.
///
/// # Example
/// ```
/// use flux_dispatch_core::{Action, ActionOptions, Dispatcher};
/// use serde_json::json;
/// use std::time::Duration;
///
/// let dispatcher: Dispatcher = Dispatcher::new();
/// let loader = Action::with_options(
///     "Loader",
///     &dispatcher,
///     ActionOptions::new()
///         .with_max_retries(1)
///         .with_timeout(Duration::from_millis(10)),
/// );
///
/// let dispatched = loader.dispatch("LOAD", json!({ "id": 1 })).unwrap();
/// assert!(dispatched.is_immediate());
/// ```
pub struct Action<D = serde_json::Value> {
    display_name: String,
    options: ActionOptions,
    dispatcher: Dispatcher<D>,
}

impl<D> Clone for Action<D> {
    fn clone(&self) -> Self {
        Self {
            display_name: self.display_name.clone(),
            options: self.options,
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<D> fmt::Debug for Action<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("display_name", &self.display_name)
            .field("options", &self.options)
            .finish()
    }
}

impl<D> Action<D>
where
    D: Send + Sync + 'static,
{
    /// Create an action with default [`ActionOptions`]
    pub fn new(name: impl Into<String>, dispatcher: &Dispatcher<D>) -> Self {
        Self::with_options(name, dispatcher, ActionOptions::default())
    }

    pub fn with_options(
        name: impl Into<String>,
        dispatcher: &Dispatcher<D>,
        options: ActionOptions,
    ) -> Self {
        Self {
            display_name: name.into(),
            options,
            dispatcher: dispatcher.clone(),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn options(&self) -> &ActionOptions {
        &self.options
    }

    /// Dispatch `data` under `action_type`.
    ///
    /// If no dispatch is in flight the payload is broadcast synchronously and
    /// [`Dispatched::Immediate`] is returned. Otherwise a retry task is
    /// scheduled on the current tokio runtime and [`Dispatched::Deferred`] is
    /// returned right away.
    ///
    /// # Errors
    ///
    /// - [`ActionError::MissingDisplayName`] if the action has an empty name
    /// - [`ActionError::Payload`] if `action_type` is empty
    /// - [`ActionError::NoRuntime`] if a retry is needed outside a tokio runtime
    pub fn dispatch(
        &self,
        action_type: impl AsRef<str>,
        data: D,
    ) -> Result<Dispatched, ActionError> {
        let action_type = action_type.as_ref();
        if self.display_name.is_empty() {
            return Err(ActionError::MissingDisplayName {
                action_type: action_type.to_string(),
            });
        }

        let payload = Arc::new(Payload::new(
            self.display_name.as_str(),
            action_type,
            data,
        )?);

        match self.dispatcher.dispatch(Arc::clone(&payload)) {
            Ok(()) => Ok(Dispatched::Immediate),
            Err(DispatcherError::AlreadyDispatching) => {
                retry::schedule(self.dispatcher.clone(), payload, self.options)
                    .map(Dispatched::Deferred)
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    fn recording_dispatcher() -> (Dispatcher<i32>, Arc<Mutex<Vec<(String, String, i32)>>>) {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        dispatcher.register(move |payload: &Payload<i32>| {
            s.lock().push((
                payload.source().to_string(),
                payload.action_type().to_string(),
                *payload.data(),
            ));
        });
        (dispatcher, seen)
    }

    /// Holds the dispatcher busy on another thread until the returned sender is dropped.
    fn hold_busy(dispatcher: &Dispatcher<i32>) -> (mpsc::Sender<()>, std::thread::JoinHandle<()>) {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));
        let (entered_tx, entered_rx) = mpsc::channel::<()>();
        let entered_tx = Arc::new(Mutex::new(entered_tx));

        let token = dispatcher.register(move |payload: &Payload<i32>| {
            if payload.action_type() == "HOLD" {
                let _ = entered_tx.lock().send(());
                let _ = release_rx.lock().recv();
            }
        });

        let d = dispatcher.clone();
        let thread = std::thread::spawn(move || {
            d.dispatch(Payload::new("Holder", "HOLD", 0).unwrap()).unwrap();
            d.unregister(token).unwrap();
        });
        entered_rx.recv().unwrap();
        (release_tx, thread)
    }

    #[test]
    fn test_immediate_dispatch() {
        let (dispatcher, seen) = recording_dispatcher();
        let action = Action::new("Loader", &dispatcher);

        let dispatched = action.dispatch("LOAD", 7).unwrap();
        assert!(dispatched.is_immediate());
        assert!(dispatched.into_retry().is_none());
        assert_eq!(
            *seen.lock(),
            vec![("Loader".to_string(), "LOAD".to_string(), 7)]
        );
    }

    #[test]
    fn test_missing_display_name() {
        let (dispatcher, seen) = recording_dispatcher();
        let action = Action::new("", &dispatcher);

        let err = action.dispatch("LOAD", 1).unwrap_err();
        assert_eq!(
            err,
            ActionError::MissingDisplayName {
                action_type: "LOAD".into()
            }
        );
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_empty_action_type() {
        let (dispatcher, _) = recording_dispatcher();
        let action = Action::new("Loader", &dispatcher);
        assert!(matches!(
            action.dispatch("", 1),
            Err(ActionError::Payload(crate::PayloadError::EmptyActionType))
        ));
    }

    #[test]
    fn test_busy_without_runtime() {
        let (dispatcher, _) = recording_dispatcher();
        let action = Action::new("Loader", &dispatcher);
        let (release, thread) = hold_busy(&dispatcher);

        let err = action.dispatch("LOAD", 1).unwrap_err();
        assert_eq!(
            err,
            ActionError::NoRuntime {
                action_type: "LOAD".into(),
                action: "Loader".into()
            }
        );

        drop(release);
        thread.join().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentrant_dispatch_is_deferred() {
        let (dispatcher, seen) = recording_dispatcher();
        let follow_up = Action::with_options(
            "FollowUp",
            &dispatcher,
            ActionOptions::new().with_timeout(Duration::from_millis(15)),
        );
        let retries = Arc::new(Mutex::new(Vec::new()));

        let r = retries.clone();
        let inner = follow_up.clone();
        dispatcher.register(move |payload: &Payload<i32>| {
            if payload.action_type() == "LOAD" {
                r.lock().push(inner.dispatch("LOADED", 2).unwrap());
            }
        });

        let trigger = Action::new("Loader", &dispatcher);
        assert!(trigger.dispatch("LOAD", 1).unwrap().is_immediate());

        // Only the triggering payload went out synchronously
        assert_eq!(seen.lock().len(), 1);

        let handle = retries
            .lock()
            .pop()
            .and_then(Dispatched::into_retry)
            .expect("follow-up deferred");
        assert_eq!(handle.action(), "FollowUp");
        assert_eq!(handle.action_type(), "LOADED");
        assert_eq!(handle.outcome().await, Ok(1));

        assert_eq!(
            *seen.lock(),
            vec![
                ("Loader".to_string(), "LOAD".to_string(), 1),
                ("FollowUp".to_string(), "LOADED".to_string(), 2),
            ]
        );
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let (dispatcher, seen) = recording_dispatcher();
        let action = Action::with_options(
            "Loader",
            &dispatcher,
            ActionOptions::new()
                .with_max_retries(1)
                .with_timeout(Duration::from_millis(1)),
        );
        let (release, thread) = hold_busy(&dispatcher);

        let handle = action
            .dispatch("LOAD", 1)
            .unwrap()
            .into_retry()
            .expect("deferred while busy");
        let err = handle.outcome().await.unwrap_err();
        assert_eq!(
            err,
            ActionError::RetriesExhausted {
                action_type: "LOAD".into(),
                action: "Loader".into(),
                attempts: 2,
            }
        );

        drop(release);
        thread.join().unwrap();
        // Only the holder's payload was ever delivered
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].1, "HOLD");
    }
}
