//! Run-wide shared resource pool.
//!
//! A bounded ring buffer shared by every VU, used to amortize expensive
//! setup across iterations: one iteration pays for a login and caches the
//! session token, later iterations sample a cached one and take the fast
//! path. Appends evict the oldest entry once the pool is full; reads take a
//! uniformly random element. Readers and writers serialize only for the
//! duration of a pointer-sized critical section, so neither side can starve
//! the other.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;

/// Bounded ring buffer with random sampling. Cheap to clone; clones share
/// the same storage.
#[derive(Debug)]
pub struct SharedPool<T> {
    inner: Arc<RwLock<VecDeque<T>>>,
    capacity: usize,
}

impl<T> Clone for SharedPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            capacity: self.capacity,
        }
    }
}

impl<T: Clone> SharedPool<T> {
    /// Creates an empty pool holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Appends an entry, evicting the oldest when the pool is full. O(1).
    pub fn push(&self, item: T) {
        let mut items = self.inner.write();
        if items.len() == self.capacity {
            items.pop_front();
        }
        items.push_back(item);
    }

    /// Returns a clone of a uniformly random entry, or `None` when empty.
    /// Never blocks behind a writer for more than one append.
    #[must_use]
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Option<T> {
        let items = self.inner.read();
        if items.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..items.len());
        items.get(index).cloned()
    }

    /// Current number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when the pool holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Maximum number of entries the pool retains.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_eviction_law() {
        // After N + k pushes the pool holds N entries and the oldest k are
        // gone.
        let pool = SharedPool::new(5);
        for i in 0..8 {
            pool.push(i);
        }
        assert_eq!(pool.len(), 5);

        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..500 {
            seen.insert(pool.sample(&mut rng).unwrap());
        }
        assert_eq!(seen.into_iter().collect::<Vec<_>>(), vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_sample_empty_is_none() {
        let pool: SharedPool<String> = SharedPool::new(4);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(pool.sample(&mut rng).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_capacity_floor_of_one() {
        let pool = SharedPool::new(0);
        pool.push("a");
        pool.push("b");
        assert_eq!(pool.len(), 1);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(pool.sample(&mut rng), Some("b"));
    }

    #[test]
    fn test_clones_share_storage() {
        let pool = SharedPool::new(3);
        let handle = pool.clone();
        pool.push(1);
        handle.push(2);
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_push_and_sample() {
        let pool = SharedPool::new(64);
        let mut tasks = Vec::new();

        for worker in 0..4u64 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(worker);
                for i in 0..1000u64 {
                    pool.push(worker * 10_000 + i);
                    // A concurrent reader sees either the pre- or post-append
                    // state, never a torn entry.
                    if let Some(v) = pool.sample(&mut rng) {
                        assert!(v < 50_000);
                    }
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(pool.len(), 64);
    }
}
