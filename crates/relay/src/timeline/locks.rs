use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

/// What a lock serializes: one user's transitions, or every write to one
/// video's sessions and groups.
///
/// Order: a user lock before a video lock, and never two video locks at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    User(Uuid),
    Video(Uuid),
}

type LockTable = Arc<Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>>;

/// Async mutexes created on demand per key and dropped once unused.
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    entries: LockTable,
}

/// Held lock on one key. Releasing it prunes the entry when nobody else holds
/// or awaits it.
#[derive(Debug)]
pub struct KeyedGuard {
    key: LockKey,
    entries: LockTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub async fn lock(&self, key: LockKey) -> KeyedGuard {
        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.entry(key).or_default().clone()
        };
        let guard = cell.lock_owned().await;
        KeyedGuard { key, entries: self.entries.clone(), guard: Some(guard) }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl KeyedGuard {
    pub fn key(&self) -> LockKey {
        self.key
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.get(&self.key).is_some_and(|cell| Arc::strong_count(cell) == 1) {
            entries.remove(&self.key);
        }
    }
}
