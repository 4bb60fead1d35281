//! Native resource lifecycle
//!
//! Host objects never hold a native pointer. They hold a [`Token`] into a
//! [`Registry`], a table of generational slots. A slot owns one `Arc` of the
//! resource plus a one-shot release callback.
//!
//! - `acquire` lends out a strong reference for the duration of a call, so a
//!   release racing an in-flight transform only drops the table's share.
//! - `release` empties the slot, bumps its generation and runs the callback
//!   exactly once, outside the table lock. Stale tokens miss from then on.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::error::{Result, XsltError};
use crate::xslt::Stylesheet;
use crate::dom::Document;

/// Parsed input documents
pub static DOCUMENTS: Registry<Document> = Registry::new("document");

/// Compiled stylesheets
pub static STYLESHEETS: Registry<Stylesheet> = Registry::new("stylesheet");

type ReleaseFn<T> = Box<dyn FnOnce(Arc<T>) + Send>;

/// Typed handle into a [`Registry`]
pub struct Token<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Token<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Token<T> {}

impl<T> PartialEq for Token<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Token<T> {}

impl<T> fmt::Debug for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({}v{})", self.index, self.generation)
    }
}

struct Entry<T> {
    resource: Arc<T>,
    release: ReleaseFn<T>,
}

struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

struct Table<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

/// Snapshot of registry counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub live: usize,
    pub registered: usize,
    pub released: usize,
}

pub struct Registry<T> {
    label: &'static str,
    table: Mutex<Table<T>>,
    live: AtomicUsize,
    registered: AtomicUsize,
    released: AtomicUsize,
}

impl<T> Registry<T> {
    pub const fn new(label: &'static str) -> Self {
        Registry {
            label,
            table: Mutex::new(Table {
                slots: Vec::new(),
                free: Vec::new(),
            }),
            live: AtomicUsize::new(0),
            registered: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table<T>> {
        // A panic while holding the lock leaves the table consistent: every
        // mutation below is a single assignment.
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take ownership of `resource`; `release` is invoked with that same `Arc`
    /// exactly once, when the returned token is released.
    pub fn register<F>(&self, resource: Arc<T>, release: F) -> Result<Token<T>>
    where
        F: FnOnce(Arc<T>) + Send + 'static,
    {
        let mut table = self.lock();
        let entry = Entry {
            resource,
            release: Box::new(release),
        };

        let index = match table.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(table.slots.len()).map_err(|_| {
                    XsltError::AllocationFailure(format!("{} table is full", self.label))
                })?;
                table.slots.try_reserve(1)?;
                table.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                index
            }
        };

        let slot = &mut table.slots[index as usize];
        slot.entry = Some(entry);
        let token = Token {
            index,
            generation: slot.generation,
            _marker: PhantomData,
        };
        drop(table);

        self.live.fetch_add(1, Ordering::Relaxed);
        self.registered.fetch_add(1, Ordering::Relaxed);
        debug!("registered {} {:?}", self.label, token);
        Ok(token)
    }

    /// Borrow a strong reference for the duration of a call
    pub fn acquire(&self, token: Token<T>) -> Result<Arc<T>> {
        let table = self.lock();
        match table.slots.get(token.index as usize) {
            Some(Slot {
                generation,
                entry: Some(entry),
            }) if *generation == token.generation => Ok(Arc::clone(&entry.resource)),
            _ => Err(XsltError::invalid_argument(format!(
                "{} handle has been released",
                self.label
            ))),
        }
    }

    /// Release the resource behind `token`. Returns false if it was already gone.
    pub fn release(&self, token: Token<T>) -> bool {
        let entry = {
            let mut table = self.lock();
            let Some(slot) = table.slots.get_mut(token.index as usize) else {
                return false;
            };
            if slot.generation != token.generation {
                return false;
            }
            let Some(entry) = slot.entry.take() else {
                return false;
            };
            slot.generation = slot.generation.wrapping_add(1);
            table.free.push(token.index);
            entry
        };

        self.live.fetch_sub(1, Ordering::Relaxed);
        self.released.fetch_add(1, Ordering::Relaxed);
        debug!("released {} {:?}", self.label, token);

        // Outside the lock: the callback may drop the last reference
        (entry.release)(entry.resource);
        true
    }

    /// True while `token` refers to a registered resource
    #[cfg(test)]
    pub fn contains(&self, token: Token<T>) -> bool {
        let table = self.lock();
        matches!(
            table.slots.get(token.index as usize),
            Some(Slot { generation, entry: Some(_) }) if *generation == token.generation
        )
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            live: self.live.load(Ordering::Relaxed),
            registered: self.registered.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }
}

/// Release callback used by the host handles: drop the table's reference
pub fn drop_resource<T>(resource: Arc<T>) {
    drop(resource);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_release_runs_once() {
        let registry: Registry<String> = Registry::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let token = registry
            .register(Arc::new("doc".to_string()), move |res| {
                assert_eq!(res.as_str(), "doc");
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(registry.release(token));
        assert!(!registry.release(token));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.stats().live, 0);
    }

    #[test]
    fn test_stale_token_is_rejected() {
        let registry: Registry<u32> = Registry::new("test");
        let first = registry.register(Arc::new(1), drop_resource).unwrap();
        registry.release(first);

        // Reuses the slot with a new generation
        let second = registry.register(Arc::new(2), drop_resource).unwrap();
        assert_ne!(first, second);
        assert!(registry.acquire(first).is_err());
        assert_eq!(*registry.acquire(second).unwrap(), 2);
        assert!(!registry.release(first));
        assert!(registry.contains(second));
    }

    #[test]
    fn test_lease_outlives_release() {
        let registry: Registry<Vec<u8>> = Registry::new("test");
        let token = registry.register(Arc::new(vec![1, 2, 3]), drop_resource).unwrap();
        let lease = registry.acquire(token).unwrap();
        registry.release(token);
        assert!(!registry.contains(token));
        assert_eq!(lease.len(), 3);
        assert_eq!(Arc::strong_count(&lease), 1);
    }

    #[test]
    fn test_stats_track_churn() {
        let registry: Registry<usize> = Registry::new("test");
        let tokens: Vec<_> = (0..100)
            .map(|i| registry.register(Arc::new(i), drop_resource).unwrap())
            .collect();
        assert_eq!(registry.stats().live, 100);
        for token in &tokens {
            registry.release(*token);
        }
        let stats = registry.stats();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.registered, 100);
        assert_eq!(stats.released, 100);
    }
}
