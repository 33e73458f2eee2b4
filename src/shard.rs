use crate::RwLock;
use std::borrow::Borrow;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

/// The entries routed to one shard.
///
/// Collisions are resolved by a linear scan. Entries keep their insertion
/// order, and removals preserve the relative order of the survivors.
#[derive(Debug)]
pub struct Bucket<K, V> {
    entries: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (K, V)> {
        self.entries.iter()
    }

    /// Returns the value of the first entry whose key equals `key`.
    pub fn find<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        self.entries
            .iter()
            .find(|(k, _)| k.borrow() == key)
            .map(|(_, v)| v)
    }

    /// Appends a new entry, even if the key is already present.
    pub fn push(&mut self, key: K, value: V) {
        self.entries.push((key, value));
    }

    /// Replaces the value of the first entry with an equal key, or appends a
    /// new entry if there is none.
    ///
    /// Returns the replaced value.
    pub fn upsert(&mut self, key: K, value: V) -> Option<V>
    where
        K: Eq,
    {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => Some(std::mem::replace(v, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Removes every entry whose key equals `key`, returning how many were removed.
    pub fn remove_all<Q>(&mut self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k.borrow() != key);
        before - self.entries.len()
    }

    /// Drops every entry, returning how many were released.
    pub fn clear(&mut self) -> usize {
        let released = self.entries.len();
        self.entries.clear();
        released
    }
}

/// One bucket and the reader/writer lock that guards it.
///
/// The bucket is only reachable through a guard, so no entry is ever touched
/// without the lock held in the matching mode.
pub struct Shard<K, V> {
    lock: RwLock,
    bucket: UnsafeCell<Bucket<K, V>>,
}

// Safety: the bucket is only accessed through guards that hold `lock`.
unsafe impl<K: Send, V: Send> Send for Shard<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for Shard<K, V> {}

impl<K, V> Shard<K, V> {
    /// Creates an empty shard whose bucket can hold `capacity` entries
    /// before reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lock: RwLock::new(),
            bucket: UnsafeCell::new(Bucket::with_capacity(capacity)),
        }
    }

    /// Acquires the shard in shared mode, blocking while a writer holds it.
    pub fn read(&self) -> ShardReadGuard<'_, K, V> {
        self.lock.read();
        ShardReadGuard { shard: self }
    }

    pub fn try_read(&self) -> Option<ShardReadGuard<'_, K, V>> {
        self.lock
            .try_read()
            .then(|| ShardReadGuard { shard: self })
    }

    /// Acquires the shard in exclusive mode, blocking while anyone holds it.
    pub fn write(&self) -> ShardWriteGuard<'_, K, V> {
        self.lock.write();
        ShardWriteGuard { shard: self }
    }

    pub fn try_write(&self) -> Option<ShardWriteGuard<'_, K, V>> {
        self.lock
            .try_write()
            .then(|| ShardWriteGuard { shard: self })
    }

    /// Borrows the bucket without locking; `&mut self` proves exclusivity.
    pub fn get_mut(&mut self) -> &mut Bucket<K, V> {
        self.bucket.get_mut()
    }

    pub fn contentions(&self) -> usize {
        self.lock.contentions()
    }
}

/// Shared access to a bucket. The read lock is released on drop.
pub struct ShardReadGuard<'a, K, V> {
    shard: &'a Shard<K, V>,
}

impl<K, V> Deref for ShardReadGuard<'_, K, V> {
    type Target = Bucket<K, V>;

    fn deref(&self) -> &Self::Target {
        // Safety: the read lock is held for the lifetime of the guard.
        unsafe { &*self.shard.bucket.get() }
    }
}

impl<K, V> Drop for ShardReadGuard<'_, K, V> {
    fn drop(&mut self) {
        self.shard.lock.read_unlock();
    }
}

/// Exclusive access to a bucket. The write lock is released on drop.
pub struct ShardWriteGuard<'a, K, V> {
    shard: &'a Shard<K, V>,
}

impl<K, V> Deref for ShardWriteGuard<'_, K, V> {
    type Target = Bucket<K, V>;

    fn deref(&self) -> &Self::Target {
        // Safety: the write lock is held for the lifetime of the guard.
        unsafe { &*self.shard.bucket.get() }
    }
}

impl<K, V> DerefMut for ShardWriteGuard<'_, K, V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Safety: the write lock is held for the lifetime of the guard.
        unsafe { &mut *self.shard.bucket.get() }
    }
}

impl<K, V> Drop for ShardWriteGuard<'_, K, V> {
    fn drop(&mut self) {
        self.shard.lock.write_unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    #[test]
    fn test_bucket_append_and_scan() {
        let shard = Shard::<String, u32>::with_capacity(4);
        {
            let mut bucket = shard.write();
            assert!(bucket.is_empty());
            bucket.push("hello".to_string(), 1);
            bucket.push("world".to_string(), 2);
            bucket.push("hello".to_string(), 3);
            assert_eq!(bucket.len(), 3);
        }
        let bucket = shard.read();
        assert_eq!(bucket.find("hello"), Some(&1));
        assert_eq!(bucket.find("world"), Some(&2));
        assert_eq!(bucket.find("missing"), None);
    }

    #[test]
    fn test_bucket_upsert() {
        let shard = Shard::<u32, u32>::with_capacity(0);
        let mut bucket = shard.write();
        assert_eq!(bucket.upsert(1, 10), None);
        assert_eq!(bucket.upsert(2, 20), None);
        assert_eq!(bucket.upsert(1, 11), Some(10));
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.find(&1), Some(&11));
    }

    #[test]
    fn test_bucket_remove_all_keeps_order() {
        let shard = Shard::<u32, u32>::with_capacity(0);
        let mut bucket = shard.write();
        for (k, v) in [(1, 1), (2, 2), (1, 3), (3, 4), (1, 5)] {
            bucket.push(k, v);
        }
        assert_eq!(bucket.remove_all(&1), 3);
        assert_eq!(bucket.remove_all(&1), 0);
        assert_eq!(
            bucket.iter().cloned().collect::<Vec<_>>(),
            vec![(2, 2), (3, 4)]
        );
        assert_eq!(bucket.clear(), 2);
        assert!(bucket.is_empty());
    }

    #[test]
    fn test_guards_exclude_each_other() {
        let shard = Shard::<u32, u32>::with_capacity(0);
        {
            let _r1 = shard.read();
            let _r2 = shard.try_read().unwrap();
            assert!(shard.try_write().is_none());
        }
        {
            let _w = shard.write();
            assert!(shard.try_read().is_none());
            assert!(shard.try_write().is_none());
        }
        assert!(shard.try_write().is_some());
    }

    #[test]
    fn test_guard_released_on_panic() {
        let shard = Arc::new(Shard::<u32, u32>::with_capacity(0));
        let result = {
            let shard = shard.clone();
            std::thread::spawn(move || {
                let mut bucket = shard.write();
                bucket.push(1, 1);
                panic!("writer panicked");
            })
            .join()
        };
        assert!(result.is_err());
        // No poisoning: the bucket is usable and keeps the completed push.
        assert_eq!(shard.read().find(&1), Some(&1));
    }

    #[test]
    fn test_shard_concurrent_writers() {
        let shard = Arc::new(Shard::<u32, usize>::with_capacity(1));
        let current = Arc::new(AtomicU32::default());
        const N: usize = 1 << 12;
        const M: usize = 8;

        shard.write().push(1, 0);

        let threads = (0..M)
            .map(|_| {
                let shard = shard.clone();
                let current = current.clone();
                std::thread::spawn(move || {
                    for _ in 0..N {
                        let mut bucket = shard.write();
                        let now = current.fetch_add(1, Ordering::AcqRel);
                        assert_eq!(now, 0);
                        let v = *bucket.find(&1).unwrap();
                        bucket.upsert(1, v + 1);
                        let now = current.fetch_sub(1, Ordering::AcqRel);
                        assert_eq!(now, 1);
                    }
                })
            })
            .collect::<Vec<_>>();
        threads.into_iter().for_each(|t| t.join().unwrap());

        assert_eq!(shard.read().find(&1), Some(&(N * M)));
    }

    #[test]
    fn test_get_mut_without_lock() {
        let mut shard = Shard::<u32, u32>::with_capacity(0);
        shard.get_mut().push(7, 8);
        assert_eq!(shard.get_mut().clear(), 1);
        assert_eq!(shard.contentions(), 0);
    }
}
