//! Serializing broadcast dispatcher shared by every action and store
//!
//! A [`Dispatcher`] is constructed once and handed (cloned) to each
//! [`Action`](crate::Action) and [`Store`](crate::Store) that participates in
//! the same data flow. At most one dispatch is in flight at a time; during a
//! dispatch every registered callback runs synchronously, in registration
//! order, unless it was already forced to run through [`WaitFor`].
//!
//! No dispatcher lock is held while a callback runs, so callbacks may query
//! [`Dispatcher::is_dispatching`], call [`WaitFor::wait_for`], register or
//! unregister callbacks, or attempt a nested dispatch (which is rejected).

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::DispatcherError;
use crate::middleware::{Middleware, NoopMiddleware};
use crate::payload::Payload;

/// Identity of a registered callback, returned by [`Dispatcher::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DispatchToken(u64);

impl DispatchToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DispatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID_{}", self.0)
    }
}

type Callback<D> = Arc<dyn Fn(&Payload<D>) + Send + Sync>;

struct DispatchState<D> {
    callbacks: BTreeMap<DispatchToken, Callback<D>>,
    is_dispatching: bool,
    pending: HashSet<DispatchToken>,
    handled: HashSet<DispatchToken>,
    pending_payload: Option<Arc<Payload<D>>>,
    last_id: u64,
}

impl<D> DispatchState<D> {
    fn new() -> Self {
        Self {
            callbacks: BTreeMap::new(),
            is_dispatching: false,
            pending: HashSet::new(),
            handled: HashSet::new(),
            pending_payload: None,
            last_id: 0,
        }
    }

    /// Claim a callback for the in-flight payload, marking it pending
    fn claim(&mut self, token: DispatchToken) -> Option<(Callback<D>, Arc<Payload<D>>)> {
        let callback = self.callbacks.get(&token).cloned()?;
        let payload = self.pending_payload.clone()?;
        self.pending.insert(token);
        Some((callback, payload))
    }
}

struct DispatcherInner<D> {
    state: Mutex<DispatchState<D>>,
    middleware: Mutex<Box<dyn Middleware<D> + Send>>,
}

impl<D> DispatcherInner<D> {
    fn invoke(&self, token: DispatchToken, callback: Callback<D>, payload: &Payload<D>) {
        callback(payload);
        self.state.lock().handled.insert(token);
    }

    fn wait_for(&self, tokens: &[DispatchToken]) -> Result<(), DispatcherError> {
        for &token in tokens {
            let (callback, payload) = {
                let mut state = self.state.lock();
                if !state.is_dispatching {
                    return Err(DispatcherError::NotDispatching);
                }
                if state.pending.contains(&token) {
                    if !state.handled.contains(&token) {
                        return Err(DispatcherError::CircularDependency { token });
                    }
                    continue;
                }
                state
                    .claim(token)
                    .ok_or(DispatcherError::UnknownToken { token })?
            };
            tracing::trace!(%token, "waiting for callback");
            self.invoke(token, callback, &payload);
        }
        Ok(())
    }
}

/// Resets the in-flight flag when a dispatch ends, including on unwind.
struct DispatchGuard<'a, D> {
    inner: &'a DispatcherInner<D>,
}

impl<D> Drop for DispatchGuard<'_, D> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.is_dispatching = false;
        state.pending_payload = None;
    }
}

/// Shared, cheaply clonable broadcast dispatcher.
///
/// # Example
/// ```
/// use flux_dispatch_core::{Dispatcher, Payload};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let dispatcher: Dispatcher<i32> = Dispatcher::new();
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = seen.clone();
/// dispatcher.register(move |payload: &Payload<i32>| {
///     counter.fetch_add(*payload.data() as usize, Ordering::SeqCst);
/// });
///
/// dispatcher.dispatch(Payload::new("Counter", "ADD", 2).unwrap()).unwrap();
/// assert_eq!(seen.load(Ordering::SeqCst), 2);
/// ```
pub struct Dispatcher<D = serde_json::Value> {
    inner: Arc<DispatcherInner<D>>,
}

impl<D> Clone for Dispatcher<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D> fmt::Debug for Dispatcher<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Dispatcher")
            .field("callbacks", &state.callbacks.len())
            .field("is_dispatching", &state.is_dispatching)
            .finish()
    }
}

impl<D: 'static> Default for Dispatcher<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: 'static> Dispatcher<D> {
    /// Create a dispatcher with no middleware
    pub fn new() -> Self {
        Self::with_middleware(NoopMiddleware)
    }

    /// Create a dispatcher that runs `middleware` around every dispatch
    pub fn with_middleware<M>(middleware: M) -> Self
    where
        M: Middleware<D> + Send + 'static,
    {
        Self {
            inner: Arc::new(DispatcherInner {
                state: Mutex::new(DispatchState::new()),
                middleware: Mutex::new(Box::new(middleware)),
            }),
        }
    }
}

impl<D> Dispatcher<D> {
    /// Register a callback to be invoked with every dispatched payload
    pub fn register<F>(&self, callback: F) -> DispatchToken
    where
        F: Fn(&Payload<D>) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        state.last_id += 1;
        let token = DispatchToken(state.last_id);
        state.callbacks.insert(token, Arc::new(callback));
        tracing::debug!(%token, "callback registered");
        token
    }

    /// Remove a callback. Unknown tokens are an error.
    pub fn unregister(&self, token: DispatchToken) -> Result<(), DispatcherError> {
        let removed = self.inner.state.lock().callbacks.remove(&token);
        match removed {
            Some(_) => {
                tracing::debug!(%token, "callback unregistered");
                Ok(())
            }
            None => Err(DispatcherError::UnknownToken { token }),
        }
    }

    /// Broadcast a payload to every registered callback.
    ///
    /// Fails with [`DispatcherError::AlreadyDispatching`] if another dispatch
    /// is in flight; the check and the claim of the in-flight flag are atomic.
    pub fn dispatch(&self, payload: impl Into<Arc<Payload<D>>>) -> Result<(), DispatcherError> {
        let payload = payload.into();
        let tokens: Vec<DispatchToken> = {
            let mut state = self.inner.state.lock();
            if state.is_dispatching {
                return Err(DispatcherError::AlreadyDispatching);
            }
            state.is_dispatching = true;
            state.pending.clear();
            state.handled.clear();
            state.pending_payload = Some(Arc::clone(&payload));
            state.callbacks.keys().copied().collect()
        };
        let _guard = DispatchGuard {
            inner: &*self.inner,
        };

        tracing::debug!(
            source = %payload.source(),
            action_type = %payload.action_type(),
            callbacks = tokens.len(),
            "dispatching"
        );
        self.inner.middleware.lock().before(&payload);

        for token in tokens {
            let claimed = {
                let mut state = self.inner.state.lock();
                if state.pending.contains(&token) {
                    continue;
                }
                state.claim(token)
            };
            // Unregistered mid-dispatch
            if let Some((callback, payload)) = claimed {
                self.inner.invoke(token, callback, &payload);
            }
        }

        let handled = self.inner.state.lock().handled.len();
        self.inner.middleware.lock().after(&payload, handled);
        Ok(())
    }

    /// Whether a dispatch is currently in flight
    pub fn is_dispatching(&self) -> bool {
        self.inner.state.lock().is_dispatching
    }

    /// Run the callbacks for `tokens` now, within the current dispatch.
    ///
    /// Callbacks that already ran for this payload are skipped.
    pub fn wait_for(&self, tokens: &[DispatchToken]) -> Result<(), DispatcherError> {
        self.inner.wait_for(tokens)
    }

    /// The `wait_for` capability as a detached handle.
    ///
    /// The handle does not keep the dispatcher alive.
    pub fn waiter(&self) -> WaitFor<D> {
        WaitFor {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Number of registered callbacks
    pub fn callback_count(&self) -> usize {
        self.inner.state.lock().callbacks.len()
    }

    /// Whether `token` is currently registered
    pub fn is_registered(&self, token: DispatchToken) -> bool {
        self.inner.state.lock().callbacks.contains_key(&token)
    }
}

/// Bound `wait_for` capability handed to store handlers.
pub struct WaitFor<D = serde_json::Value> {
    inner: Weak<DispatcherInner<D>>,
}

impl<D> Clone for WaitFor<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<D> fmt::Debug for WaitFor<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitFor")
            .field("attached", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl<D> WaitFor<D> {
    /// See [`Dispatcher::wait_for`]
    pub fn wait_for(&self, tokens: &[DispatchToken]) -> Result<(), DispatcherError> {
        let inner = self.inner.upgrade().ok_or(DispatcherError::Detached)?;
        inner.wait_for(tokens)
    }
}
