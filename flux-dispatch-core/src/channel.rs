//! Change-notification channel owned by each store

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Identifies one change subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct ListenerSet {
    entries: Vec<(ListenerId, Listener)>,
    next_id: u64,
}

/// Publish/subscribe channel for "state changed" notifications.
///
/// Listeners run synchronously in subscription order. The listener list is
/// snapshotted before each emit, so a listener may subscribe or unsubscribe
/// (itself or others) while being notified; such changes apply from the
/// next emit.
#[derive(Clone, Default)]
pub struct ChangeChannel {
    listeners: Arc<Mutex<ListenerSet>>,
}

impl fmt::Debug for ChangeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeChannel")
            .field("listeners", &self.len())
            .finish()
    }
}

impl ChangeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a listener
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock();
        listeners.next_id += 1;
        let id = ListenerId(listeners.next_id);
        listeners.entries.push((id, Arc::new(listener)));
        Subscription {
            id,
            channel: self.clone(),
        }
    }

    /// Unsubscribe a listener. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry, _)| *entry != id);
        listeners.entries.len() != before
    }

    /// Notify every current listener, in subscription order
    pub fn emit(&self) {
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            listener();
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`ChangeChannel::subscribe`].
///
/// Dropping the handle does NOT unsubscribe; call
/// [`Subscription::unsubscribe`] to remove exactly this listener.
#[must_use = "keep the subscription to be able to unsubscribe later"]
pub struct Subscription {
    id: ListenerId,
    channel: ChangeChannel,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove this listener from its channel
    pub fn unsubscribe(self) -> bool {
        self.channel.unsubscribe(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn test_emit_in_subscription_order() {
        let channel = ChangeChannel::new();
        let calls = recorder();

        let c = calls.clone();
        let _a = channel.subscribe(move || c.lock().push("a"));
        let c = calls.clone();
        let _b = channel.subscribe(move || c.lock().push("b"));

        channel.emit();
        channel.emit();
        assert_eq!(*calls.lock(), vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_listener() {
        let channel = ChangeChannel::new();
        let calls = recorder();

        let c = calls.clone();
        let a = channel.subscribe(move || c.lock().push("a"));
        let c = calls.clone();
        let _b = channel.subscribe(move || c.lock().push("b"));

        assert!(a.unsubscribe());
        channel.emit();
        assert_eq!(*calls.lock(), vec!["b"]);
        assert_eq!(channel.len(), 1);
    }

    #[test]
    fn test_unsubscribe_twice() {
        let channel = ChangeChannel::new();
        let sub = channel.subscribe(|| {});
        let id = sub.id();
        assert!(sub.unsubscribe());
        assert!(!channel.unsubscribe(id));
        assert!(channel.is_empty());
    }

    #[test]
    fn test_listener_can_unsubscribe_during_emit() {
        let channel = ChangeChannel::new();
        let calls = recorder();
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let c = calls.clone();
        let inner = channel.clone();
        let own = slot.clone();
        let sub = channel.subscribe(move || {
            c.lock().push("once");
            if let Some(id) = own.lock().take() {
                inner.unsubscribe(id);
            }
        });
        *slot.lock() = Some(sub.id());

        channel.emit();
        channel.emit();
        assert_eq!(*calls.lock(), vec!["once"]);
    }
}
