//! Stores: dispatch-registered state that routes payloads to handlers
//!
//! A [`Store`] wraps a user type implementing [`StoreSpec`]. The store
//! registers a router with the [`Dispatcher`] as soon as it is constructed,
//! but its handler map stays empty until the first [`Store::init`] call
//! collects handlers from [`StoreSpec::register_handlers`]. That collection
//! happens once per store lifetime.
//!
//! ```text
//! Uninitialized --init--> Listening+Inited --destruct--> Listening+NotInited
//!                                 ^                               |
//!                                 +------------init---------------+
//! ```
//!
//! [`Store::destruct`] unregisters the router and clears the inited flag. It
//! keeps the handler map, the listening flag and every change listener, and a
//! later `init` does not register the router again.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::channel::{ChangeChannel, ListenerId, Subscription};
use crate::dispatcher::{DispatchToken, Dispatcher, WaitFor};
use crate::error::DispatcherError;
use crate::payload::Payload;

/// Handler invoked for one action type.
///
/// Receives the store's state, the payload and the `wait_for` capability.
/// Returns `true` if the state changed, which emits a change notification
/// right after the handler returns.
pub type Handler<S, D> = Arc<dyn Fn(&mut S, &Payload<D>, &WaitFor<D>) -> bool + Send + Sync>;

/// Capabilities a concrete store provides to the generic store lifecycle.
///
/// Both hooks are optional.
///
/// # Example
/// ```
/// use flux_dispatch_core::{InitEffects, Listeners, Payload, StoreSpec, WaitFor};
///
/// #[derive(Default)]
/// struct Counter {
///     count: i64,
/// }
///
/// impl Counter {
///     fn add(&mut self, payload: &Payload, _wait_for: &WaitFor) -> bool {
///         self.count += payload.data().as_i64().unwrap_or(0);
///         true
///     }
/// }
///
/// impl StoreSpec for Counter {
///     type InitArgs = i64;
///
///     fn register_handlers(&self, listeners: &mut Listeners<Self>, _wait_for: &WaitFor) {
///         listeners.on("ADD", Self::add);
///     }
///
///     fn on_init(&mut self, start: i64) -> InitEffects {
///         self.count = start;
///         InitEffects::none()
///     }
/// }
/// ```
pub trait StoreSpec<D = serde_json::Value>: Sized + Send + 'static {
    /// Arguments forwarded from [`Store::init`] to [`StoreSpec::on_init`]
    type InitArgs;

    /// Map action types to handlers. Called on the first `init` only.
    ///
    /// `wait_for` may be cloned into handlers that need other stores'
    /// handlers to run first.
    fn register_handlers(&self, listeners: &mut Listeners<Self, D>, wait_for: &WaitFor<D>) {
        let _ = (listeners, wait_for);
    }

    /// Called on every `init`, after handlers are registered.
    ///
    /// The store's state is locked while this runs. Dispatching from here
    /// would route back into the locked state, so follow-up dispatches go
    /// into the returned [`InitEffects`] instead.
    fn on_init(&mut self, args: Self::InitArgs) -> InitEffects {
        let _ = args;
        InitEffects::none()
    }
}

/// Follow-up work returned from [`StoreSpec::on_init`].
///
/// Effects run in order at the end of [`Store::init`], after the store's
/// state is released and the store is marked inited.
#[must_use]
#[derive(Default)]
pub struct InitEffects {
    effects: Vec<Box<dyn FnOnce()>>,
}

impl fmt::Debug for InitEffects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitEffects")
            .field("effects", &self.effects.len())
            .finish()
    }
}

impl InitEffects {
    pub fn none() -> Self {
        Self::default()
    }

    /// A single effect
    pub fn run(effect: impl FnOnce() + 'static) -> Self {
        Self::none().and_then(effect)
    }

    /// Append an effect to run after the ones already queued
    pub fn and_then(mut self, effect: impl FnOnce() + 'static) -> Self {
        self.effects.push(Box::new(effect));
        self
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    fn run_all(self) {
        for effect in self.effects {
            effect();
        }
    }
}

/// Registration surface handed to [`StoreSpec::register_handlers`].
pub struct Listeners<S, D = serde_json::Value> {
    handlers: HashMap<String, Handler<S, D>>,
}

impl<S, D> fmt::Debug for Listeners<S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("action_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<S, D> Listeners<S, D> {
    fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Bind `handler` to `action_type`. A later registration for the same
    /// action type replaces the earlier one.
    pub fn on<F>(&mut self, action_type: impl AsRef<str>, handler: F) -> &mut Self
    where
        F: Fn(&mut S, &Payload<D>, &WaitFor<D>) -> bool + Send + Sync + 'static,
    {
        let action_type = action_type.as_ref().to_string();
        if self
            .handlers
            .insert(action_type.clone(), Arc::new(handler))
            .is_some()
        {
            tracing::debug!(action_type = %action_type, "handler replaced");
        }
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

struct StoreInner<S, D> {
    state: Mutex<S>,
    handlers: Mutex<HashMap<String, Handler<S, D>>>,
    is_inited: AtomicBool,
    is_listened: AtomicBool,
    changes: ChangeChannel,
    dispatcher: Dispatcher<D>,
    waiter: WaitFor<D>,
    token: DispatchToken,
}

impl<S, D> StoreInner<S, D> {
    fn route(&self, payload: &Payload<D>) {
        let handler = self.handlers.lock().get(payload.action_type()).cloned();
        let Some(handler) = handler else {
            tracing::trace!(
                token = %self.token,
                action_type = %payload.action_type(),
                "no handler, ignoring"
            );
            return;
        };

        let changed = {
            let mut state = self.state.lock();
            handler(&mut *state, payload, &self.waiter)
        };
        tracing::trace!(
            token = %self.token,
            action_type = %payload.action_type(),
            changed,
            "payload handled"
        );
        if changed {
            self.changes.emit();
        }
    }
}

impl<S, D> Drop for StoreInner<S, D> {
    fn drop(&mut self) {
        // Already gone if the store was destructed
        let _ = self.dispatcher.unregister(self.token);
    }
}

/// Shared handle to a dispatch-registered store.
///
/// Cloning the handle shares the same store. When the last handle is
/// dropped the router is unregistered from the dispatcher.
pub struct Store<S, D = serde_json::Value> {
    inner: Arc<StoreInner<S, D>>,
}

impl<S, D> Clone for Store<S, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, D> fmt::Debug for Store<S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("token", &self.inner.token)
            .field("is_inited", &self.inner.is_inited.load(Ordering::SeqCst))
            .field("is_listened", &self.inner.is_listened.load(Ordering::SeqCst))
            .field("handlers", &self.inner.handlers.lock().len())
            .field("change_listeners", &self.inner.changes.len())
            .finish()
    }
}

impl<S, D> Store<S, D>
where
    S: StoreSpec<D>,
    D: Send + Sync + 'static,
{
    /// Wrap `state` in a store and register its router with `dispatcher`.
    ///
    /// Handlers are not collected until [`Store::init`].
    pub fn new(state: S, dispatcher: &Dispatcher<D>) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<StoreInner<S, D>>| {
            let router = weak.clone();
            let token = dispatcher.register(move |payload: &Payload<D>| {
                if let Some(inner) = router.upgrade() {
                    inner.route(payload);
                }
            });

            StoreInner {
                state: Mutex::new(state),
                handlers: Mutex::new(HashMap::new()),
                is_inited: AtomicBool::new(false),
                is_listened: AtomicBool::new(false),
                changes: ChangeChannel::new(),
                dispatcher: dispatcher.clone(),
                waiter: dispatcher.waiter(),
                token,
            }
        });
        tracing::debug!(token = %inner.token, "store registered");
        Self { inner }
    }

    /// Token identifying this store's router, for other stores' `wait_for`
    pub fn dispatch_token(&self) -> DispatchToken {
        self.inner.token
    }

    /// Subscribe to change notifications.
    ///
    /// The returned [`Subscription`] removes exactly this listener when
    /// [`Subscription::unsubscribe`] is called.
    pub fn add_change_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.changes.subscribe(listener)
    }

    pub fn remove_change_listener(&self, id: ListenerId) -> bool {
        self.inner.changes.unsubscribe(id)
    }

    /// Notify every change listener, synchronously and in subscription order
    pub fn emit_change(&self) {
        self.inner.changes.emit();
    }

    pub fn change_listener_count(&self) -> usize {
        self.inner.changes.len()
    }

    pub fn is_inited(&self) -> bool {
        self.inner.is_inited.load(Ordering::SeqCst)
    }

    /// Whether handlers have been collected
    pub fn is_listening(&self) -> bool {
        self.inner.is_listened.load(Ordering::SeqCst)
    }

    /// Initialize the store.
    ///
    /// The first call collects handlers through
    /// [`StoreSpec::register_handlers`]; every call runs
    /// [`StoreSpec::on_init`] with `args`, marks the store inited and then
    /// runs the returned [`InitEffects`].
    ///
    /// No store lock is held while effects run, so they may dispatch
    /// actions this store handles.
    pub fn init(&self, args: S::InitArgs) {
        if !self.inner.is_listened.swap(true, Ordering::SeqCst) {
            let mut listeners = Listeners::new();
            self.inner
                .state
                .lock()
                .register_handlers(&mut listeners, &self.inner.waiter);
            tracing::debug!(
                token = %self.inner.token,
                handlers = listeners.len(),
                "store listening"
            );
            self.inner.handlers.lock().extend(listeners.handlers);
        }

        let effects = self.inner.state.lock().on_init(args);
        self.inner.is_inited.store(true, Ordering::SeqCst);
        tracing::debug!(
            token = %self.inner.token,
            effects = effects.len(),
            "store inited"
        );
        effects.run_all();
    }

    /// Unregister the router from the dispatcher and clear the inited flag.
    ///
    /// Fails with [`DispatcherError::UnknownToken`] if the store was already
    /// destructed.
    pub fn destruct(&self) -> Result<(), DispatcherError> {
        self.inner.dispatcher.unregister(self.inner.token)?;
        self.inner.is_inited.store(false, Ordering::SeqCst);
        tracing::debug!(token = %self.inner.token, "store destructed");
        Ok(())
    }

    /// Read the store's state
    pub fn with_state<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let state = self.inner.state.lock();
        f(&*state)
    }

    /// Action types with a registered handler, sorted
    pub fn action_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.inner.handlers.lock().keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Action;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Loader {
        loaded: Vec<Value>,
        init_args: Vec<&'static str>,
        register_calls: Arc<AtomicUsize>,
    }

    impl Loader {
        fn on_load(&mut self, payload: &Payload, _wait_for: &WaitFor) -> bool {
            self.loaded.push(payload.data().clone());
            true
        }
    }

    impl StoreSpec for Loader {
        type InitArgs = &'static str;

        fn register_handlers(&self, listeners: &mut Listeners<Self>, _wait_for: &WaitFor) {
            self.register_calls.fetch_add(1, Ordering::SeqCst);
            listeners
                .on("LOAD", Self::on_load)
                .on("PEEK", |_: &mut Loader, _: &Payload, _: &WaitFor| false);
        }

        fn on_init(&mut self, args: &'static str) -> InitEffects {
            self.init_args.push(args);
            InitEffects::none()
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_handlers_collected_once() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let store = Store::new(Loader::default(), &dispatcher);
        let calls = store.with_state(|s| s.register_calls.clone());

        assert!(!store.is_inited());
        assert!(!store.is_listening());
        assert!(store.action_types().is_empty());

        store.init("first");
        store.init("second");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.is_inited());
        assert_eq!(store.action_types(), vec!["LOAD", "PEEK"]);
        store.with_state(|s| assert_eq!(s.init_args, vec!["first", "second"]));
    }

    #[test]
    fn test_no_handlers_before_init() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let store = Store::new(Loader::default(), &dispatcher);
        let action = Action::new("Loader", &dispatcher);

        action.dispatch("LOAD", json!(1)).unwrap();
        store.with_state(|s| assert!(s.loaded.is_empty()));
    }

    #[test]
    fn test_dispatch_routes_and_emits_change() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let store = Store::new(Loader::default(), &dispatcher);
        store.init("");
        let (changes, listener) = counter();
        let _sub = store.add_change_listener(listener);

        let action = Action::new("Loader", &dispatcher);
        action.dispatch("LOAD", json!({ "id": 1 })).unwrap();

        store.with_state(|s| assert_eq!(s.loaded, vec![json!({ "id": 1 })]));
        assert_eq!(changes.load(Ordering::SeqCst), 1);

        // Handled but unchanged: no notification
        action.dispatch("PEEK", Value::Null).unwrap();
        assert_eq!(changes.load(Ordering::SeqCst), 1);

        // Unknown action types are ignored
        action.dispatch("UNKNOWN", Value::Null).unwrap();
        assert_eq!(changes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let store = Store::new(Loader::default(), &dispatcher);
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        let first = store.add_change_listener(move || o.lock().push("first"));
        let o = order.clone();
        let second = store.add_change_listener(move || o.lock().push("second"));

        store.emit_change();
        assert!(first.unsubscribe());
        store.emit_change();
        assert!(store.remove_change_listener(second.id()));
        store.emit_change();

        assert_eq!(*order.lock(), vec!["first", "second", "second"]);
        assert_eq!(store.change_listener_count(), 0);
    }

    #[test]
    fn test_destruct_lifecycle() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let store = Store::new(Loader::default(), &dispatcher);
        let calls = store.with_state(|s| s.register_calls.clone());
        let (changes, listener) = counter();
        let _sub = store.add_change_listener(listener);
        store.init("");

        store.destruct().unwrap();
        assert!(!store.is_inited());
        assert!(store.is_listening());
        assert!(!dispatcher.is_registered(store.dispatch_token()));

        let action = Action::new("Loader", &dispatcher);
        action.dispatch("LOAD", json!(1)).unwrap();
        store.with_state(|s| assert!(s.loaded.is_empty()));

        // Re-init does not re-collect handlers nor re-register the router
        store.init("again");
        assert!(store.is_inited());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        action.dispatch("LOAD", json!(2)).unwrap();
        store.with_state(|s| assert!(s.loaded.is_empty()));

        // Change listeners survive destruct
        assert_eq!(store.change_listener_count(), 1);
        store.emit_change();
        assert_eq!(changes.load(Ordering::SeqCst), 1);

        assert_eq!(
            store.destruct(),
            Err(DispatcherError::UnknownToken {
                token: store.dispatch_token()
            })
        );
    }

    #[test]
    fn test_drop_unregisters_router() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let store = Store::new(Loader::default(), &dispatcher);
        let token = store.dispatch_token();
        let clone = store.clone();

        drop(store);
        assert!(dispatcher.is_registered(token));
        drop(clone);
        assert!(!dispatcher.is_registered(token));
    }

    /// Reads the loader's state after forcing the loader's handler to run first.
    #[derive(Default)]
    struct Totals {
        loader: Option<Store<Loader>>,
        seen_loaded: Arc<Mutex<Vec<usize>>>,
    }

    impl Totals {
        fn on_load(&mut self, _payload: &Payload, wait_for: &WaitFor) -> bool {
            let Some(loader) = &self.loader else {
                return false;
            };
            wait_for.wait_for(&[loader.dispatch_token()]).unwrap();
            let loaded = loader.with_state(|s| s.loaded.len());
            self.seen_loaded.lock().push(loaded);
            false
        }
    }

    impl StoreSpec for Totals {
        type InitArgs = Store<Loader>;

        fn register_handlers(&self, listeners: &mut Listeners<Self>, _wait_for: &WaitFor) {
            listeners.on("LOAD", Self::on_load);
        }

        fn on_init(&mut self, loader: Store<Loader>) -> InitEffects {
            self.loader = Some(loader);
            InitEffects::none()
        }
    }

    #[test]
    fn test_wait_for_orders_stores() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let totals = Store::new(Totals::default(), &dispatcher);
        let loader = Store::new(Loader::default(), &dispatcher);
        assert!(totals.dispatch_token() < loader.dispatch_token());

        loader.init("");
        totals.init(loader.clone());
        let seen = totals.with_state(|t| t.seen_loaded.clone());

        Action::new("Loader", &dispatcher)
            .dispatch("LOAD", json!(1))
            .unwrap();

        // Totals is registered first but observed the loader's update
        assert_eq!(*seen.lock(), vec![1]);
        loader.with_state(|s| assert_eq!(s.loaded.len(), 1));
    }

    #[test]
    fn test_same_action_type_in_several_stores() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let a = Store::new(Loader::default(), &dispatcher);
        let b = Store::new(Loader::default(), &dispatcher);
        a.init("");
        b.init("");

        Action::new("Loader", &dispatcher)
            .dispatch("LOAD", json!("x"))
            .unwrap();
        a.with_state(|s| assert_eq!(s.loaded.len(), 1));
        b.with_state(|s| assert_eq!(s.loaded.len(), 1));
    }

    struct Boot {
        boot: Action,
        booted: usize,
        inited_during_boot: Vec<bool>,
        store: Arc<Mutex<Option<Store<Boot>>>>,
    }

    impl Boot {
        fn on_boot(&mut self, _payload: &Payload, _wait_for: &WaitFor) -> bool {
            self.booted += 1;
            if let Some(store) = self.store.lock().as_ref() {
                self.inited_during_boot.push(store.is_inited());
            }
            true
        }
    }

    impl StoreSpec for Boot {
        type InitArgs = ();

        fn register_handlers(&self, listeners: &mut Listeners<Self>, _wait_for: &WaitFor) {
            listeners.on("BOOT", Self::on_boot);
        }

        fn on_init(&mut self, _args: ()) -> InitEffects {
            let boot = self.boot.clone();
            InitEffects::run(move || {
                let dispatched = boot.dispatch("BOOT", Value::Null).unwrap();
                assert!(dispatched.is_immediate());
            })
        }
    }

    #[test]
    fn test_init_effects_dispatch_to_own_handlers() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let slot = Arc::new(Mutex::new(None));
        let store = Store::new(
            Boot {
                boot: Action::new("Boot", &dispatcher),
                booted: 0,
                inited_during_boot: Vec::new(),
                store: slot.clone(),
            },
            &dispatcher,
        );
        *slot.lock() = Some(store.clone());
        let (changes, on_change) = counter();
        let _subscription = store.add_change_listener(on_change);

        store.init(());
        store.with_state(|s| {
            assert_eq!(s.booted, 1);
            assert_eq!(s.inited_during_boot, vec![true]);
        });
        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert!(!dispatcher.is_dispatching());

        // Effects run on every init
        store.init(());
        store.with_state(|s| assert_eq!(s.booted, 2));

        slot.lock().take();
    }

    #[test]
    fn test_init_effects_run_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (first, second) = (order.clone(), order.clone());
        let effects = InitEffects::run(move || first.lock().push(1))
            .and_then(move || second.lock().push(2));
        assert_eq!(effects.len(), 2);

        effects.run_all();
        assert_eq!(*order.lock(), vec![1, 2]);
        assert!(InitEffects::none().is_empty());
    }
}
