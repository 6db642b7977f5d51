//! Test utilities for flux-dispatch applications
//!
//! - [`PayloadRecorder`]: middleware that keeps every dispatched payload
//! - [`ChangeCounter`]: counts store change notifications
//! - Assertion macros for verifying dispatched action types
//!
//! # Example
//!
//! ```
//! use flux_dispatch_core::testing::{ChangeCounter, PayloadRecorder};
//! use flux_dispatch_core::{assert_dispatched, Action, Dispatcher};
//!
//! let recorder = PayloadRecorder::new();
//! let dispatcher: Dispatcher<u8> = Dispatcher::with_middleware(recorder.clone());
//!
//! Action::new("Loader", &dispatcher).dispatch("LOAD", 1).unwrap();
//!
//! let payloads = recorder.drain();
//! assert_dispatched!(payloads, "LOAD");
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::middleware::Middleware;
use crate::payload::Payload;

/// Middleware that records a copy of every dispatched payload.
///
/// Clones share the same recording, so keep one clone in the test and hand
/// the other to [`Dispatcher::with_middleware`](crate::Dispatcher::with_middleware).
pub struct PayloadRecorder<D = serde_json::Value> {
    payloads: Arc<Mutex<Vec<Payload<D>>>>,
}

impl<D> Clone for PayloadRecorder<D> {
    fn clone(&self) -> Self {
        Self {
            payloads: Arc::clone(&self.payloads),
        }
    }
}

impl<D> Default for PayloadRecorder<D> {
    fn default() -> Self {
        Self {
            payloads: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<D: Clone> PayloadRecorder<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of the recorded payloads, oldest first
    pub fn payloads(&self) -> Vec<Payload<D>> {
        self.payloads.lock().clone()
    }

    /// Take the recorded payloads, leaving the recording empty
    pub fn drain(&self) -> Vec<Payload<D>> {
        std::mem::take(&mut *self.payloads.lock())
    }

    /// Recorded action types, oldest first
    pub fn action_types(&self) -> Vec<String> {
        self.payloads
            .lock()
            .iter()
            .map(|p| p.action_type().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.payloads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<D: Clone> Middleware<D> for PayloadRecorder<D> {
    fn before(&mut self, payload: &Payload<D>) {
        self.payloads.lock().push(payload.clone());
    }

    fn after(&mut self, _payload: &Payload<D>, _handled: usize) {}
}

/// Counts change notifications.
///
/// ```
/// use flux_dispatch_core::testing::ChangeCounter;
/// use flux_dispatch_core::ChangeChannel;
///
/// let counter = ChangeCounter::new();
/// let channel = ChangeChannel::new();
/// let _sub = channel.subscribe(counter.listener());
///
/// channel.emit();
/// channel.emit();
/// assert_eq!(counter.count(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ChangeCounter {
    count: Arc<AtomicUsize>,
}

impl ChangeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A listener that increments this counter
    pub fn listener(&self) -> impl Fn() + Send + Sync + 'static {
        let count = Arc::clone(&self.count);
        move || {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }
}

// ============================================================================
// Time control (requires `testing-time`)
// ============================================================================

/// Pause tokio's clock so deferred retries only fire when time is advanced.
///
/// Must be called from a current-thread runtime.
#[cfg(feature = "testing-time")]
pub fn pause_time() {
    tokio::time::pause();
}

/// Resume tokio's clock after [`pause_time`].
#[cfg(feature = "testing-time")]
pub fn resume_time() {
    tokio::time::resume();
}

/// Advance the paused clock, firing any retry timers that fall due.
#[cfg(feature = "testing-time")]
pub async fn advance_time(duration: std::time::Duration) {
    tokio::time::advance(duration).await;
}

// ============================================================================
// Assertion macros
// ============================================================================

/// Assert that a payload with the given action type was dispatched.
///
/// ```ignore
/// let payloads = recorder.drain();
/// assert_dispatched!(payloads, "LOAD");
/// ```
#[macro_export]
macro_rules! assert_dispatched {
    ($payloads:expr, $action_type:expr) => {
        assert!(
            $payloads
                .iter()
                .any(|p| p.action_type() == ::core::convert::AsRef::<str>::as_ref(&$action_type)),
            "Expected `{}` to be dispatched, but got: {:?}",
            ::core::convert::AsRef::<str>::as_ref(&$action_type),
            $payloads.iter().map(|p| p.action_type()).collect::<Vec<_>>()
        );
    };
}

/// Assert that NO payload with the given action type was dispatched.
#[macro_export]
macro_rules! assert_not_dispatched {
    ($payloads:expr, $action_type:expr) => {
        assert!(
            !$payloads
                .iter()
                .any(|p| p.action_type() == ::core::convert::AsRef::<str>::as_ref(&$action_type)),
            "Expected `{}` NOT to be dispatched, but it was",
            ::core::convert::AsRef::<str>::as_ref(&$action_type)
        );
    };
}

/// Count payloads with the given action type.
#[macro_export]
macro_rules! count_dispatched {
    ($payloads:expr, $action_type:expr) => {
        $payloads
            .iter()
            .filter(|p| p.action_type() == ::core::convert::AsRef::<str>::as_ref(&$action_type))
            .count()
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Action, Dispatcher};

    #[test]
    fn test_recorder_drain() {
        let recorder = PayloadRecorder::new();
        let dispatcher: Dispatcher<u8> = Dispatcher::with_middleware(recorder.clone());
        let action = Action::new("Loader", &dispatcher);

        action.dispatch("LOAD", 1).unwrap();
        action.dispatch("SAVE", 2).unwrap();
        action.dispatch("LOAD", 3).unwrap();

        assert_eq!(recorder.action_types(), vec!["LOAD", "SAVE", "LOAD"]);
        let payloads = recorder.drain();
        assert_eq!(payloads.len(), 3);
        assert_eq!(*payloads[2].data(), 3);
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_assert_macros() {
        let recorder = PayloadRecorder::new();
        let dispatcher: Dispatcher<()> = Dispatcher::with_middleware(recorder.clone());
        let action = Action::new("Loader", &dispatcher);
        action.dispatch("LOAD", ()).unwrap();
        action.dispatch("LOAD", ()).unwrap();

        let payloads = recorder.payloads();
        assert_dispatched!(payloads, "LOAD");
        assert_not_dispatched!(payloads, "SAVE");
        assert_eq!(count_dispatched!(payloads, "LOAD"), 2);
        assert_eq!(count_dispatched!(payloads, String::from("SAVE")), 0);
    }

    #[test]
    fn test_change_counter_reset() {
        let counter = ChangeCounter::new();
        let listener = counter.listener();
        listener();
        listener();
        assert_eq!(counter.count(), 2);
        counter.reset();
        assert_eq!(counter.count(), 0);
    }
}
