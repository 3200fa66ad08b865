//! This module provides the [LockMap] type, which hands out one lock per key (e.g. per review name) so that
//! operations on distinct resources never contend with each other.

use {
    std::{collections::HashMap, hash::Hash, sync::Arc},
    tokio::sync::{OwnedRwLockWriteGuard, RwLock},
};

#[derive(Debug)]
pub struct LockMap<K, V>(RwLock<HashMap<K, Arc<RwLock<V>>>>);

impl<K, V> Default for LockMap<K, V> {
    /// Return an empty [LockMap].
    fn default() -> Self {
        Self(Default::default())
    }
}

impl<K, V> LockMap<K, V> {
    /// Retrieve the lock for the specified resource, creating it if necessary.
    pub async fn get(&self, key: K) -> Arc<RwLock<V>>
    where
        K: Eq + Hash,
        V: Default,
    {
        if let Some(lock) = self.0.read().await.get(&key) {
            return lock.clone();
        }

        let mut write = self.0.write().await;

        if let Some(lock) = write.get(&key) {
            return lock.clone();
        }

        let lock = Arc::<RwLock<V>>::default();
        write.insert(key, lock.clone());
        lock
    }

    /// Take exclusive ownership of the specified resource without waiting.
    ///
    /// Returns `None` if someone else currently holds the lock.
    pub async fn try_write(&self, key: K) -> Option<OwnedRwLockWriteGuard<V>>
    where
        K: Eq + Hash,
        V: Default,
    {
        self.get(key).await.try_write_owned().ok()
    }

    /// Remove any unused locks from the map.
    ///
    /// A lock is considered unused if there are no strong or weak references to it outside of the map itself.
    pub async fn clean(&self) {
        self.0
            .write()
            .await
            .retain(|_, lock| Arc::get_mut(lock).is_none());
    }

    pub async fn len(&self) -> usize {
        self.0.read().await.len()
    }
}
