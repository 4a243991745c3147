use std::collections::HashMap;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use crossbeam::queue::SegQueue;
use parking_lot::RwLock;

/// Idle resources of one exact shape.
pub(crate) type Bucket<T> = SegQueue<T>;

/// Size-keyed buckets of idle resources.
///
/// Bucket lookup takes a short map lock; push/pop on a bucket is lock-free.
pub(crate) struct PoolMap<K, T> {
    buckets: RwLock<HashMap<K, Arc<Bucket<T>>>>,
}

impl<K: Copy + Eq + Hash, T> Default for PoolMap<K, T> {
    fn default() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Copy + Eq + Hash, T> PoolMap<K, T> {
    pub(crate) fn bucket(&self, key: K) -> Arc<Bucket<T>> {
        if let Some(b) = self.buckets.read().get(&key) {
            return Arc::clone(b);
        }
        Arc::clone(self.buckets.write().entry(key).or_default())
    }

    /// Drop every idle resource, keeping the buckets. Returns how many were dropped.
    pub(crate) fn drain(&self) -> usize {
        let buckets: Vec<_> = self.buckets.read().values().cloned().collect();
        let mut n = 0;
        for b in buckets {
            while b.pop().is_some() {
                n += 1;
            }
        }
        n
    }

    /// Forget every bucket. Leases still out find their bucket gone on release.
    pub(crate) fn clear(&self) -> usize {
        let n = self.drain();
        self.buckets.write().clear();
        n
    }

    pub(crate) fn occupancy(&self) -> Vec<(K, usize)> {
        self.buckets
            .read()
            .iter()
            .map(|(k, b)| (*k, b.len()))
            .collect()
    }

    pub(crate) fn idle(&self) -> usize {
        self.buckets.read().values().map(|b| b.len()).sum()
    }
}

/// Exclusive use of a pooled resource. Dropping the lease puts the resource back into the bucket
/// it came from, or frees it once that bucket is gone.
pub(crate) struct Lease<T> {
    item: Arc<T>,
    home: Weak<Bucket<Arc<T>>>,
}

impl<T> Lease<T> {
    pub(crate) fn new(item: Arc<T>, home: &Arc<Bucket<Arc<T>>>) -> Self {
        Self {
            item,
            home: Arc::downgrade(home),
        }
    }
}

impl<T> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T> Drop for Lease<T> {
    fn drop(&mut self) {
        match self.home.upgrade() {
            Some(bucket) => bucket.push(Arc::clone(&self.item)),
            None => tracing::info!("pooled resource released after device teardown"),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/device/pool.rs"]
mod tests;
