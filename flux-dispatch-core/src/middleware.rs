//! Hooks that observe every dispatch

use crate::payload::Payload;

/// Middleware trait for observing dispatches
///
/// Implement this trait to add logging, recording, or other cross-cutting
/// concerns to a [`Dispatcher`](crate::Dispatcher). Middleware only observes;
/// it cannot alter or cancel a payload.
pub trait Middleware<D> {
    /// Called once the dispatch has claimed the in-flight flag, before any callback runs
    fn before(&mut self, payload: &Payload<D>);

    /// Called after every callback ran, with the number of callbacks that handled the payload
    fn after(&mut self, payload: &Payload<D>, handled: usize);
}

/// A no-op middleware that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMiddleware;

impl<D> Middleware<D> for NoopMiddleware {
    fn before(&mut self, _payload: &Payload<D>) {}
    fn after(&mut self, _payload: &Payload<D>, _handled: usize) {}
}

/// Compose multiple middleware into a single middleware
pub struct ComposedMiddleware<D> {
    middlewares: Vec<Box<dyn Middleware<D> + Send>>,
}

impl<D> std::fmt::Debug for ComposedMiddleware<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedMiddleware")
            .field("middlewares_count", &self.middlewares.len())
            .finish()
    }
}

impl<D> Default for ComposedMiddleware<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> ComposedMiddleware<D> {
    /// Create a new composed middleware
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    /// Add a middleware to the composition
    pub fn add<M: Middleware<D> + Send + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Box::new(middleware));
    }

    /// Builder form of [`ComposedMiddleware::add`]
    pub fn with<M: Middleware<D> + Send + 'static>(mut self, middleware: M) -> Self {
        self.add(middleware);
        self
    }
}

impl<D> Middleware<D> for ComposedMiddleware<D> {
    fn before(&mut self, payload: &Payload<D>) {
        for middleware in &mut self.middlewares {
            middleware.before(payload);
        }
    }

    fn after(&mut self, payload: &Payload<D>, handled: usize) {
        // Call in reverse order for proper nesting
        for middleware in self.middlewares.iter_mut().rev() {
            middleware.after(payload, handled);
        }
    }
}
