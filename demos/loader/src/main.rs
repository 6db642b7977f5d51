//! Loader - flux-dispatch demo
//!
//! Demonstrates the full data flow:
//! - Actions: `Loader` dispatches LOAD for each requested id
//! - Stores: `Catalog` records items, `Summary` waits for `Catalog` first
//! - Re-entrant dispatch: `Catalog` emits LOADED from inside its LOAD
//!   handler, which is deferred and retried once the dispatcher is idle
//! - Change listeners: print whenever a store reports a change
//!
//! Run with `RUST_LOG=flux_dispatch_core=debug` to see the dispatch log.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use flux_dispatch::prelude::*;
use flux_dispatch::{DispatchLogConfig, DispatchLoggerConfig, DispatchLoggerMiddleware, RetryHandle};
use parking_lot::Mutex;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "loader")]
#[command(about = "Dispatch LOAD actions through two stores")]
struct Args {
    /// Item ids to load
    #[arg(default_values_t = vec![1, 2, 3])]
    ids: Vec<u64>,

    /// Deferred attempts allowed before a follow-up dispatch fails
    #[arg(long, default_value_t = flux_dispatch::DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Delay between deferred attempts, in milliseconds
    #[arg(long, default_value_t = 15)]
    timeout_ms: u64,

    /// Only log action types matching these comma-separated patterns
    #[arg(long)]
    include: Option<String>,
}

// ============================================================================
// Actions - What can happen
// ============================================================================

#[derive(ActionType, Clone, Copy, Debug)]
#[action_type(rename_all = "SCREAMING_SNAKE_CASE")]
enum LoaderAction {
    Load,
    Loaded,
}

// ============================================================================
// Stores - Where state lives
// ============================================================================

/// Records requested items and confirms each one with a follow-up action.
struct Catalog {
    items: Vec<u64>,
    confirmed: usize,
    confirm: Action,
    pending: Arc<Mutex<Vec<RetryHandle>>>,
}

impl Catalog {
    fn on_load(&mut self, payload: &Payload, _wait_for: &WaitFor) -> bool {
        let Some(id) = payload.data()["id"].as_u64() else {
            tracing::warn!(data = %payload.data(), "LOAD without id");
            return false;
        };
        self.items.push(id);

        match self.confirm.dispatch(LoaderAction::Loaded, json!({ "id": id })) {
            Ok(Dispatched::Deferred(handle)) => self.pending.lock().push(handle),
            Ok(Dispatched::Immediate) => {}
            Err(err) => tracing::error!(%err, "confirmation failed"),
        }
        true
    }

    fn on_loaded(&mut self, _payload: &Payload, _wait_for: &WaitFor) -> bool {
        self.confirmed += 1;
        true
    }
}

impl StoreSpec for Catalog {
    type InitArgs = ();

    fn register_handlers(&self, listeners: &mut Listeners<Self>, _wait_for: &WaitFor) {
        listeners
            .on(LoaderAction::Load, Self::on_load)
            .on(LoaderAction::Loaded, Self::on_loaded);
    }
}

/// Tracks how many items the catalog held after each LOAD.
#[derive(Default)]
struct Summary {
    catalog: Option<Store<Catalog>>,
    sizes: Vec<usize>,
}

impl Summary {
    fn on_load(&mut self, _payload: &Payload, wait_for: &WaitFor) -> bool {
        let Some(catalog) = &self.catalog else {
            return false;
        };
        if let Err(err) = wait_for.wait_for(&[catalog.dispatch_token()]) {
            tracing::error!(%err, "cannot wait for catalog");
            return false;
        }
        self.sizes.push(catalog.with_state(|c| c.items.len()));
        true
    }
}

impl StoreSpec for Summary {
    type InitArgs = Store<Catalog>;

    fn register_handlers(&self, listeners: &mut Listeners<Self>, _wait_for: &WaitFor) {
        listeners.on(LoaderAction::Load, Self::on_load);
    }

    fn on_init(&mut self, catalog: Store<Catalog>) -> InitEffects {
        self.catalog = Some(catalog);
        InitEffects::none()
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let options = ActionOptions::new()
        .with_max_retries(args.max_retries)
        .with_timeout(Duration::from_millis(args.timeout_ms));

    let middleware = DispatchLoggerMiddleware::with_log(DispatchLogConfig::new(
        64,
        DispatchLoggerConfig::new(args.include.as_deref(), None),
    ));
    let log = middleware.log();
    let dispatcher: Dispatcher = Dispatcher::with_middleware(middleware);

    let pending = Arc::new(Mutex::new(Vec::new()));
    // Registered first so that wait_for has ordering work to do
    let summary = Store::new(Summary::default(), &dispatcher);
    let catalog = Store::new(
        Catalog {
            items: Vec::new(),
            confirmed: 0,
            confirm: Action::with_options("Catalog", &dispatcher, options),
            pending: pending.clone(),
        },
        &dispatcher,
    );

    let _catalog_sub = catalog.add_change_listener({
        let catalog = catalog.clone();
        move || {
            // Runs inside the dispatch, after the handler released the state
            let (items, confirmed) = catalog.with_state(|c| (c.items.len(), c.confirmed));
            println!("catalog changed: {items} items, {confirmed} confirmed");
        }
    });

    catalog.init(());
    summary.init(catalog.clone());

    let loader = Action::with_options("Loader", &dispatcher, options);
    for id in &args.ids {
        loader.dispatch(LoaderAction::Load, json!({ "id": id }))?;
    }

    let handles: Vec<RetryHandle> = std::mem::take(&mut *pending.lock());
    for handle in handles {
        let action_type = handle.action_type().to_string();
        match handle.outcome().await {
            Ok(attempt) => println!("{action_type} delivered on deferred attempt {attempt}"),
            Err(err) => eprintln!("{err}"),
        }
    }

    summary.with_state(|s| println!("catalog sizes seen by summary: {:?}", s.sizes));
    catalog.with_state(|c| println!("catalog items: {:?}, confirmed: {}", c.items, c.confirmed));

    if let Some(log) = log {
        let log = log.lock();
        println!("last {} dispatches:", log.len().min(10));
        for entry in log.recent(10) {
            println!(
                "  #{:<3} {:<8} from {:<8} handled by {}",
                entry.sequence,
                entry.action_type,
                entry.source,
                entry.handled.map_or_else(|| "-".to_string(), |n| n.to_string())
            );
        }
    }

    Ok(())
}
