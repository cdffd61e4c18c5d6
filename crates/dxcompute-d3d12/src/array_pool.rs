use std::sync::atomic::{AtomicU64, Ordering};

use crate::sync::{lock, Mutex};

/// Arrays kept per size class; extra returns are dropped.
const MAX_ARRAYS_PER_BUCKET: usize = 32;
/// Capacities up to `2^(BUCKETS - 1)` elements are pooled.
const BUCKETS: usize = 24;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArrayPoolStats {
    pub rented: u64,
    pub returned: u64,
    /// Arrays currently held by the pool.
    pub pooled: usize,
}

/// Shared pool of `Vec<T>` buffers bucketed by power-of-two capacity.
pub struct ArrayPool<T> {
    buckets: Mutex<Vec<Vec<Vec<T>>>>,
    rented: AtomicU64,
    returned: AtomicU64,
}

impl<T: Copy + Default> Default for ArrayPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default> ArrayPool<T> {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new((0..BUCKETS).map(|_| Vec::new()).collect()),
            rented: AtomicU64::new(0),
            returned: AtomicU64::new(0),
        }
    }

    /// Returns a zero-filled (`T::default()`) array of exactly `len` elements.
    pub fn rent(&self, len: usize) -> Vec<T> {
        self.rented.fetch_add(1, Ordering::Relaxed);
        if len == 0 {
            return Vec::new();
        }

        let capacity = len.next_power_of_two();
        let bucket = capacity.trailing_zeros() as usize;
        let pooled = if bucket < BUCKETS {
            lock(&self.buckets)[bucket].pop()
        } else {
            None
        };

        let mut array = pooled.unwrap_or_else(|| Vec::with_capacity(capacity));
        array.clear();
        array.resize(len, T::default());
        array
    }

    pub fn give_back(&self, array: Vec<T>) {
        self.returned.fetch_add(1, Ordering::Relaxed);
        let capacity = array.capacity();
        if capacity == 0 {
            return;
        }

        // Floor: every array in bucket `b` can hold `2^b` elements.
        let bucket = (usize::BITS - 1 - capacity.leading_zeros()) as usize;
        if bucket >= BUCKETS {
            return;
        }
        let mut buckets = lock(&self.buckets);
        if buckets[bucket].len() < MAX_ARRAYS_PER_BUCKET {
            buckets[bucket].push(array);
        }
    }

    pub fn stats(&self) -> ArrayPoolStats {
        ArrayPoolStats {
            rented: self.rented.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            pooled: lock(&self.buckets).iter().map(Vec::len).sum(),
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn rented_arrays_are_zeroed_and_exact() {
        let pool = ArrayPool::<u32>::new();
        let mut a = pool.rent(5);
        assert_eq!(a, vec![0; 5]);
        assert!(a.capacity() >= 8);
        a.iter_mut().for_each(|v| *v = 7);
        pool.give_back(a);

        // Reused storage comes back zeroed.
        let b = pool.rent(3);
        assert_eq!(b, vec![0; 3]);
        pool.give_back(b);
    }

    #[test]
    fn arrays_are_reused() {
        let pool = ArrayPool::<u64>::new();
        let a = pool.rent(16);
        let ptr = a.as_ptr();
        pool.give_back(a);
        let b = pool.rent(9);
        assert_eq!(b.as_ptr(), ptr);
        pool.give_back(b);
    }

    #[test]
    fn stats_track_parity() {
        let pool = ArrayPool::<u32>::new();
        let arrays: Vec<_> = (0..4).map(|i| pool.rent(i)).collect();
        assert_eq!(pool.stats().rented, 4);
        assert_eq!(pool.stats().returned, 0);
        arrays.into_iter().for_each(|a| pool.give_back(a));
        let stats = pool.stats();
        assert_eq!(stats.rented, stats.returned);
        // The empty array has no storage to keep.
        assert_eq!(stats.pooled, 3);
    }

    #[test]
    fn buckets_are_bounded() {
        let pool = ArrayPool::<u32>::new();
        let arrays: Vec<_> = (0..MAX_ARRAYS_PER_BUCKET + 8).map(|_| pool.rent(4)).collect();
        arrays.into_iter().for_each(|a| pool.give_back(a));
        assert_eq!(pool.stats().pooled, MAX_ARRAYS_PER_BUCKET);
    }
}
