//! Identity pool.
//!
//! Rules and actions must agree on what an issue looks like, so every raw
//! payload is funnelled through a [`Pool`] that keeps one live [`Handle`] per
//! identity key. Ingesting a payload for a key already in the pool updates
//! the existing object in place, and everyone holding the handle sees the
//! change.
//!
//! Pools live for one run (see [`crate::session::Session`]). Locks are taken
//! briefly and never held across an `.await`.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::entity::{Comment, Issue, Label, Milestone, RepoRef, User};

/// Shared, mutable reference to a canonical entity.
pub struct Handle<T>(Arc<RwLock<T>>);

impl<T> Handle<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether both handles point at the same instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Handle<T>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone> Handle<T> {
    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> T {
        self.read().clone()
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Ok(value) => f.debug_tuple("Handle").field(&*value).finish(),
            Err(_) => f.write_str("Handle(<locked>)"),
        }
    }
}

/// An entity with a stable identity that can be refreshed from raw payloads.
pub trait Canonical: Sized + Send + Sync + 'static {
    type Raw;

    fn pool_key(repo: &RepoRef, raw: &Self::Raw) -> String;

    fn create(repo: &RepoRef, raw: &Self::Raw, pools: &Pools) -> Self;

    /// Refresh in place from a newer payload.
    fn update(&mut self, raw: &Self::Raw, pools: &Pools);
}

/// Key to handle map for one entity type.
pub struct Pool<T> {
    entries: Mutex<HashMap<String, Handle<T>>>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool").field("len", &self.len()).finish()
    }
}

impl<T> Pool<T> {
    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Handle<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Handle<T>> {
        self.entries().get(key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Canonical> Pool<T> {
    /// Intern `raw`, updating the live instance if one exists.
    pub fn ingest(&self, repo: &RepoRef, raw: &T::Raw, pools: &Pools) -> Handle<T> {
        let key = T::pool_key(repo, raw);
        if let Some(existing) = self.get(&key) {
            existing.write().update(raw, pools);
            return existing;
        }

        // Construction may intern into sibling pools, so build outside the lock.
        let created = T::create(repo, raw, pools);
        match self.entries().entry(key) {
            Entry::Occupied(slot) => {
                let existing = slot.get().clone();
                existing.write().update(raw, pools);
                existing
            }
            Entry::Vacant(slot) => slot.insert(Handle::new(created)).clone(),
        }
    }
}

/// The pools for every entity kind.
#[derive(Debug, Default)]
pub struct Pools {
    pub users: Pool<User>,
    pub labels: Pool<Label>,
    pub milestones: Pool<Milestone>,
    pub comments: Pool<Comment>,
    pub issues: Pool<Issue>,
}

impl Pools {
    pub fn new() -> Self {
        Self::default()
    }
}
