//! Request-scoped ambient state shared between pipeline stages.
//!
//! - Key = property name; value = any `Send + Sync` type stored as `Box<dyn Any>`
//!   and downcast on read.
//! - One bag per [`crate::api::Api`] instance; the bag is emptied when the API is disposed.
//! - Setting an existing name overwrites the previous value.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

/// Well-known property names.
pub mod keys {
    /// Total count computed for the last query when one was requested (`u64`).
    pub const TOTAL_COUNT: &str = "restkit.query.total_count";
    /// Execution options forwarded to the data provider (`ExecutionOptions`).
    pub const EXECUTION_OPTIONS: &str = "restkit.query.execution_options";
}

type Boxed = Box<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct PropertyBag {
    map: RwLock<HashMap<String, Boxed>>,
}

impl PropertyBag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T>(&self, name: impl Into<String>, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.write().insert(name.into(), Box::new(value));
    }

    /// Returns a copy of the value stored under `name` if it has type `T`.
    #[must_use]
    pub fn get<T>(&self, name: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.map
            .read()
            .get(name)
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.map.read().contains_key(name)
    }

    /// Removes a value; returns it if it was present with type `T`.
    pub fn remove<T>(&self, name: &str) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        let boxed = self.map.write().remove(name)?;
        boxed.downcast::<T>().ok().map(|b| *b)
    }

    /// Drops every stored value.
    pub fn clear(&self) {
        self.map.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl fmt::Debug for PropertyBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self.map.read();
        let mut names: Vec<_> = map.keys().collect();
        names.sort();
        f.debug_struct("PropertyBag").field("names", &names).finish()
    }
}
