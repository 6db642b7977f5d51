//! Dispatch logging with pattern-based filtering and in-memory storage
//!
//! Filters action types with glob patterns and writes matching dispatches to
//! `tracing`, optionally keeping the most recent ones in a ring buffer.
//!
//! # Example
//!
//! ```
//! use flux_dispatch_core::logger::{DispatchLogConfig, DispatchLoggerConfig, DispatchLoggerMiddleware};
//! use flux_dispatch_core::{Dispatcher, Payload};
//!
//! let middleware = DispatchLoggerMiddleware::with_log(DispatchLogConfig::new(
//!     10,
//!     DispatchLoggerConfig::new(None, Some("TICK")),
//! ));
//! let log = middleware.log().unwrap();
//! let dispatcher: Dispatcher<()> = Dispatcher::with_middleware(middleware);
//!
//! dispatcher.dispatch(Payload::new("Clock", "TICK", ()).unwrap()).unwrap();
//! dispatcher.dispatch(Payload::new("Loader", "LOAD", ()).unwrap()).unwrap();
//!
//! let log = log.lock();
//! assert_eq!(log.len(), 1);
//! assert_eq!(log.recent(1).next().unwrap().action_type, "LOAD");
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::middleware::Middleware;
use crate::payload::Payload;

/// Include/exclude glob patterns over action types.
///
/// Patterns support:
/// - `*` matches any sequence of characters
/// - `?` matches any single character
/// - Literal text matches exactly
///
/// # Examples
///
/// - `USER_*` matches USER_LOAD, USER_SAVE, etc.
/// - `*_FAILED` matches LOAD_FAILED, SAVE_FAILED, etc.
/// - `TICK` matches only TICK
#[derive(Debug, Clone, Default)]
pub struct DispatchLoggerConfig {
    /// If non-empty, only log action types matching these patterns
    pub include_patterns: Vec<String>,
    /// Exclude action types matching these patterns (applied after include)
    pub exclude_patterns: Vec<String>,
}

impl DispatchLoggerConfig {
    /// Create a new config from comma-separated pattern strings
    ///
    /// # Example
    /// ```
    /// use flux_dispatch_core::logger::DispatchLoggerConfig;
    ///
    /// let config = DispatchLoggerConfig::new(Some("USER_*,LOAD"), Some("USER_PING"));
    /// assert!(config.should_log("USER_SAVE"));
    /// assert!(config.should_log("LOAD"));
    /// assert!(!config.should_log("USER_PING"));
    /// assert!(!config.should_log("TICK"));
    /// ```
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Self {
        Self {
            include_patterns: include.map(split_patterns).unwrap_or_default(),
            exclude_patterns: exclude.map(split_patterns).unwrap_or_default(),
        }
    }

    /// Create a config with specific pattern vectors
    pub fn with_patterns(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self {
            include_patterns: include,
            exclude_patterns: exclude,
        }
    }

    /// Check if an action type should be logged based on include/exclude patterns
    pub fn should_log(&self, action_type: &str) -> bool {
        if !self.include_patterns.is_empty()
            && !self
                .include_patterns
                .iter()
                .any(|p| glob_match(p, action_type))
        {
            return false;
        }

        !self
            .exclude_patterns
            .iter()
            .any(|p| glob_match(p, action_type))
    }
}

fn split_patterns(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

// ============================================================================
// In-Memory Dispatch Log
// ============================================================================

/// An entry in the dispatch log
#[derive(Debug, Clone)]
pub struct DispatchLogEntry {
    /// Display name of the dispatching action
    pub source: String,
    pub action_type: String,
    /// Timestamp when the dispatch started
    pub timestamp: Instant,
    /// Sequence number for ordering
    pub sequence: u64,
    /// Number of callbacks that handled the payload (set after the dispatch)
    pub handled: Option<usize>,
}

impl DispatchLogEntry {
    pub fn new(source: impl Into<String>, action_type: impl Into<String>, sequence: u64) -> Self {
        Self {
            source: source.into(),
            action_type: action_type.into(),
            timestamp: Instant::now(),
            sequence,
            handled: None,
        }
    }

    /// Time since this dispatch was logged
    pub fn elapsed(&self) -> std::time::Duration {
        self.timestamp.elapsed()
    }
}

/// Configuration for the dispatch log ring buffer
#[derive(Debug, Clone)]
pub struct DispatchLogConfig {
    /// Maximum number of entries to keep
    pub capacity: usize,
    pub filter: DispatchLoggerConfig,
}

impl Default for DispatchLogConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            filter: DispatchLoggerConfig::default(),
        }
    }
}

impl DispatchLogConfig {
    /// Create with custom capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Create with custom capacity and filter
    pub fn new(capacity: usize, filter: DispatchLoggerConfig) -> Self {
        Self { capacity, filter }
    }
}

/// In-memory ring buffer of recent dispatches
///
/// Older entries are discarded once capacity is reached.
#[derive(Debug, Clone)]
pub struct DispatchLog {
    entries: VecDeque<DispatchLogEntry>,
    config: DispatchLogConfig,
    next_sequence: u64,
}

impl Default for DispatchLog {
    fn default() -> Self {
        Self::new(DispatchLogConfig::default())
    }
}

impl DispatchLog {
    pub fn new(config: DispatchLogConfig) -> Self {
        Self {
            entries: VecDeque::with_capacity(config.capacity),
            config,
            next_sequence: 0,
        }
    }

    /// Record a payload (if it passes the filter)
    ///
    /// Returns the entry if it was logged, None if filtered out.
    pub fn log<D>(&mut self, payload: &Payload<D>) -> Option<&DispatchLogEntry> {
        if self.config.capacity == 0 || !self.config.filter.should_log(payload.action_type()) {
            return None;
        }

        let entry = DispatchLogEntry::new(
            payload.source(),
            payload.action_type(),
            self.next_sequence,
        );
        self.next_sequence += 1;

        if self.entries.len() >= self.config.capacity {
            self.entries.pop_front();
        }

        self.entries.push_back(entry);
        self.entries.back()
    }

    /// Update the last entry with the handled count (called after the dispatch)
    pub fn update_last_handled(&mut self, handled: usize) {
        if let Some(entry) = self.entries.back_mut() {
            entry.handled = Some(handled);
        }
    }

    /// Get all entries (oldest first)
    pub fn entries(&self) -> impl Iterator<Item = &DispatchLogEntry> {
        self.entries.iter()
    }

    /// Get the most recent N entries (newest first)
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &DispatchLogEntry> {
        self.entries.iter().rev().take(count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn config(&self) -> &DispatchLogConfig {
        &self.config
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Middleware that logs dispatches with configurable pattern filtering.
///
/// Supports two modes:
/// - **Tracing only** (default): logs via `tracing::debug!()`
/// - **With storage**: also records into a shared [`DispatchLog`]
#[derive(Debug, Clone)]
pub struct DispatchLoggerMiddleware {
    config: DispatchLoggerConfig,
    log: Option<Arc<Mutex<DispatchLog>>>,
    /// Tracks whether the current payload was recorded (for handled updates)
    last_logged: bool,
    /// When false, all methods become no-ops
    active: bool,
}

impl DispatchLoggerMiddleware {
    /// Tracing only, no in-memory storage
    pub fn new(config: DispatchLoggerConfig) -> Self {
        Self {
            config,
            log: None,
            last_logged: false,
            active: true,
        }
    }

    /// Create middleware with in-memory storage
    pub fn with_log(config: DispatchLogConfig) -> Self {
        Self {
            config: config.filter.clone(),
            log: Some(Arc::new(Mutex::new(DispatchLog::new(config)))),
            last_logged: false,
            active: true,
        }
    }

    /// Create with no filtering (logs every dispatch), tracing only
    pub fn log_all() -> Self {
        Self::new(DispatchLoggerConfig::default())
    }

    /// Set whether the middleware is active.
    ///
    /// ```ignore
    /// let middleware = DispatchLoggerMiddleware::log_all().active(args.debug);
    /// ```
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Shared handle to the dispatch log (if storage is enabled)
    pub fn log(&self) -> Option<Arc<Mutex<DispatchLog>>> {
        self.log.clone()
    }

    pub fn config(&self) -> &DispatchLoggerConfig {
        &self.config
    }
}

impl<D> Middleware<D> for DispatchLoggerMiddleware {
    fn before(&mut self, payload: &Payload<D>) {
        if !self.active {
            return;
        }

        if self.config.should_log(payload.action_type()) {
            tracing::debug!(
                source = %payload.source(),
                action_type = %payload.action_type(),
                "dispatch"
            );
        }

        self.last_logged = false;
        if let Some(log) = &self.log {
            self.last_logged = log.lock().log(payload).is_some();
        }
    }

    fn after(&mut self, _payload: &Payload<D>, handled: usize) {
        if !self.active || !self.last_logged {
            return;
        }
        if let Some(log) = &self.log {
            log.lock().update_last_handled(handled);
        }
    }
}

/// Simple glob pattern matching supporting `*` and `?`.
///
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let mut pi = 0;
    let mut ti = 0;
    let mut star: Option<(usize, usize)> = None;

    while ti < text.len() {
        match pattern.get(pi) {
            Some('*') => {
                star = Some((pi, ti));
                pi += 1;
            }
            Some(&c) if c == '?' || c == text[ti] => {
                pi += 1;
                ti += 1;
            }
            _ => match star {
                // Backtrack: let the last star absorb one more character
                Some((star_pi, star_ti)) => {
                    pi = star_pi + 1;
                    ti = star_ti + 1;
                    star = Some((star_pi, star_ti + 1));
                }
                None => return false,
            },
        }
    }

    pattern[pi..].iter().all(|&c| c == '*')
}
