//! Lazy, closeable sequence plumbing.
//!
//! Planning composes iterators that carry a close hook: manifest readers are opened lazily (and
//! possibly on worker threads), registered in a shared [`CloseList`], and released when the
//! consumer closes (or drops) the [`CloseableIterator`] the planner returned. Downstream pull
//! drives upstream pull; nothing is buffered beyond the parallel queue.

use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::{Error, FloeResult};

pub mod pack;
pub mod parallel;

/// A resource that must be released exactly once. `close` is idempotent.
pub trait Closeable: Send {
    fn close(&mut self) -> FloeResult<()>;
}

struct CloseListInner {
    closed: bool,
    items: Vec<Box<dyn Closeable>>,
}

/// A thread-safe registry of resources to close.
///
/// Workers `add` concurrently while planning is in flight; the consumer side calls `close_all`
/// once. Anything added after the list was closed is closed immediately, so late-opened readers
/// are never leaked. Clones share the same registry.
#[derive(Clone)]
pub struct CloseList {
    inner: Arc<Mutex<CloseListInner>>,
}

impl Default for CloseList {
    fn default() -> Self {
        Self::new()
    }
}

impl CloseList {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CloseListInner {
                closed: false,
                items: vec![],
            })),
        }
    }

    pub fn add(&self, mut closeable: Box<dyn Closeable>) -> FloeResult<()> {
        {
            let mut inner = self.inner.lock().map_err(poisoned)?;
            if !inner.closed {
                inner.items.push(closeable);
                return Ok(());
            }
        }
        // the list was already closed; release the straggler immediately
        closeable.close()
    }

    /// Closes every registered resource in registration order. Individual failures are logged and
    /// swallowed; the first is returned after all resources have been attempted. Subsequent calls
    /// are no-ops.
    pub fn close_all(&self) -> FloeResult<()> {
        let items = {
            let mut inner = self.inner.lock().map_err(poisoned)?;
            inner.closed = true;
            std::mem::take(&mut inner.items)
        };
        let mut first_error = None;
        for mut item in items {
            if let Err(e) = item.close() {
                warn!("Failed to close resource: {e}");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::internal("close list lock poisoned")
}

/// A lazy sequence of fallible items that owns a [`CloseList`].
///
/// Closing does not interrupt the iterator chain it wraps, which is simply no longer pulled,
/// but it releases every registered resource. Dropping without closing closes too, with
/// failures logged rather than surfaced.
pub struct CloseableIterator<T: 'static> {
    iter: Box<dyn Iterator<Item = FloeResult<T>> + Send>,
    close_list: CloseList,
    closed: bool,
}

impl<T: 'static> CloseableIterator<T> {
    pub fn new(
        iter: impl Iterator<Item = FloeResult<T>> + Send + 'static,
        close_list: CloseList,
    ) -> Self {
        Self {
            iter: Box::new(iter),
            close_list,
            closed: false,
        }
    }

    /// An exhausted sequence with nothing to close.
    pub fn empty() -> Self {
        Self::new(std::iter::empty(), CloseList::new())
    }

    /// The registry this iterator will close; shared with in-flight producers.
    pub fn close_list(&self) -> &CloseList {
        &self.close_list
    }

    /// Releases all registered resources. Idempotent; the first close failure is returned after
    /// every resource has been attempted.
    pub fn close(&mut self) -> FloeResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.close_list.close_all()
    }
}

impl<T> Iterator for CloseableIterator<T> {
    type Item = FloeResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        self.iter.next()
    }
}

impl<T: 'static> Drop for CloseableIterator<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close iterator during drop: {e}");
        }
    }
}
