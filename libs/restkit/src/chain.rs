//! Chained services.
//!
//! A [`ServiceChain`] holds the handlers registered for one pipeline stage.
//! Invocation starts at the most recently registered handler; each handler gets a
//! [`Next`] cursor over the handlers registered before it and may either answer
//! directly or delegate. When the cursor is exhausted the stage's driver (an
//! inherent method on `Next<'_, dyn Stage>`) supplies the default answer.
//!
//! The order is fixed when the API configuration is built and never changes
//! afterwards.

use std::fmt;
use std::sync::Arc;

pub struct ServiceChain<H: ?Sized> {
    /// Invocation order: last registered first.
    handlers: Vec<Arc<H>>,
}

impl<H: ?Sized> ServiceChain<H> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Builds a chain from handlers given in registration order.
    pub fn from_registrations(registrations: impl IntoIterator<Item = Arc<H>>) -> Self {
        let mut handlers: Vec<_> = registrations.into_iter().collect();
        handlers.reverse();
        Self { handlers }
    }

    /// Registers `handler` so it runs before every handler already in the chain.
    pub fn register(&mut self, handler: Arc<H>) {
        self.handlers.insert(0, handler);
    }

    /// Cursor positioned at the first handler to invoke.
    #[must_use]
    pub fn head(&self) -> Next<'_, H> {
        Next {
            rest: &self.handlers,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<H: ?Sized> Default for ServiceChain<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ?Sized> Clone for ServiceChain<H> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<H: ?Sized> fmt::Debug for ServiceChain<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceChain")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// The remaining part of a chain, handed to each handler.
pub struct Next<'a, H: ?Sized> {
    rest: &'a [Arc<H>],
}

impl<H: ?Sized> Clone for Next<'_, H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H: ?Sized> Copy for Next<'_, H> {}

impl<'a, H: ?Sized> Next<'a, H> {
    /// A cursor with nothing left, so drivers fall back to their defaults.
    #[must_use]
    pub fn end() -> Self {
        Next { rest: &[] }
    }

    /// Splits off the handler to invoke now and the cursor it should delegate to.
    #[must_use]
    pub fn split_first(self) -> Option<(&'a H, Next<'a, H>)> {
        let (first, rest) = self.rest.split_first()?;
        Some((first.as_ref(), Next { rest }))
    }

    #[must_use]
    pub fn is_end(self) -> bool {
        self.rest.is_empty()
    }

    #[must_use]
    pub fn remaining(self) -> usize {
        self.rest.len()
    }
}

impl<H: ?Sized> fmt::Debug for Next<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.rest.len())
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self, name: &str, next: Next<'_, dyn Greeter>) -> String;
    }

    impl Next<'_, dyn Greeter> {
        fn greet(self, name: &str) -> String {
            match self.split_first() {
                Some((handler, rest)) => handler.greet(name, rest),
                None => format!("hello {name}"),
            }
        }
    }

    struct Wrap(&'static str);

    impl Greeter for Wrap {
        fn greet(&self, name: &str, next: Next<'_, dyn Greeter>) -> String {
            format!("{}({})", self.0, next.greet(name))
        }
    }

    struct ShortCircuit;

    impl Greeter for ShortCircuit {
        fn greet(&self, _name: &str, _next: Next<'_, dyn Greeter>) -> String {
            "nope".to_owned()
        }
    }

    #[test]
    fn last_registered_runs_first() {
        let mut chain: ServiceChain<dyn Greeter> = ServiceChain::new();
        chain.register(Arc::new(Wrap("a")));
        chain.register(Arc::new(Wrap("b")));
        assert_eq!(chain.head().greet("x"), "b(a(hello x))");

        let same = ServiceChain::<dyn Greeter>::from_registrations([
            Arc::new(Wrap("a")) as Arc<dyn Greeter>,
            Arc::new(Wrap("b")),
        ]);
        assert_eq!(same.head().greet("x"), "b(a(hello x))");
    }

    #[test]
    fn handler_may_short_circuit() {
        let mut chain: ServiceChain<dyn Greeter> = ServiceChain::new();
        chain.register(Arc::new(Wrap("inner")));
        chain.register(Arc::new(ShortCircuit));
        chain.register(Arc::new(Wrap("outer")));
        assert_eq!(chain.head().greet("x"), "outer(nope)");
    }

    #[test]
    fn empty_chain_uses_driver_default() {
        let chain: ServiceChain<dyn Greeter> = ServiceChain::default();
        assert!(chain.head().is_end());
        assert_eq!(chain.head().greet("x"), "hello x");
        assert_eq!(Next::<dyn Greeter>::end().greet("y"), "hello y");
    }
}
