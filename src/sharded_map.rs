use crate::{ConfigError, InvariantError, Shard, ShardedMapBuilder, TryInsertError, WouldBlock};
use foldhash::fast::FixedState;
use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};

/// Number of shards used by [`ShardedMap::new`].
pub const DEFAULT_SHARD_AMOUNT: usize = 64;

/// What `insert` does when the key is already present in its bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InsertPolicy {
    /// Append a second entry. `get` keeps returning the earliest entry and
    /// `remove` drops every entry for the key.
    #[default]
    Append,
    /// Replace the value of the existing entry, so each key has at most one entry.
    Upsert,
}

/// A thread-safe hashmap split into a fixed number of shards, each guarded by
/// its own reader/writer lock.
///
/// A key is routed to shard `hash(key) % shard_amount`. Operations on
/// different shards never contend; operations on the same shard are
/// serialized by its lock, with any number of concurrent readers.
pub struct ShardedMap<K, V, S = FixedState> {
    shards: Box<[Shard<K, V>]>,
    hasher: S,
    policy: InsertPolicy,
}

impl<K, V> Default for ShardedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ShardedMap<K, V> {
    /// Creates a new `ShardedMap` with [`DEFAULT_SHARD_AMOUNT`] shards and the
    /// default hasher.
    pub fn new() -> Self {
        Self::from_parts(
            DEFAULT_SHARD_AMOUNT,
            0,
            FixedState::default(),
            InsertPolicy::default(),
        )
    }

    /// Creates a new `ShardedMap` with the specified number of shards.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroShards`] if `shard_amount` is zero.
    ///
    /// # Examples
    /// ```
    /// use shardmap::{ConfigError, ShardedMap};
    ///
    /// let map = ShardedMap::<String, u32>::with_shard_amount(2).unwrap();
    /// assert_eq!(map.shard_amount(), 2);
    ///
    /// let err = ShardedMap::<String, u32>::with_shard_amount(0).unwrap_err();
    /// assert_eq!(err, ConfigError::ZeroShards);
    /// ```
    pub fn with_shard_amount(shard_amount: usize) -> Result<Self, ConfigError> {
        Self::builder().shard_amount(shard_amount).build()
    }

    /// Returns a builder for configuring a new map.
    pub fn builder() -> ShardedMapBuilder {
        ShardedMapBuilder::new()
    }
}

impl<K, V, S> ShardedMap<K, V, S> {
    /// Assembles a map from already validated parameters.
    ///
    /// `shard_amount` must be non-zero.
    pub(crate) fn from_parts(
        shard_amount: usize,
        capacity: usize,
        hasher: S,
        policy: InsertPolicy,
    ) -> Self {
        debug_assert!(shard_amount > 0);
        let shard_capacity = capacity / shard_amount;
        let shards = (0..shard_amount)
            .map(|_| Shard::with_capacity(shard_capacity))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        log::debug!(
            "created sharded map: {} shards, {} entries reserved per shard, {:?} policy",
            shard_amount,
            shard_capacity,
            policy
        );
        Self {
            shards,
            hasher,
            policy,
        }
    }

    pub fn shard_amount(&self) -> usize {
        self.shards.len()
    }

    pub fn insert_policy(&self) -> InsertPolicy {
        self.policy
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    /// Counts the entries of every shard.
    ///
    /// Each shard is read-locked in turn, so under concurrent writes the sum
    /// is not an atomic snapshot. Duplicate keys stored under
    /// [`InsertPolicy::Append`] are counted once per entry.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    /// Returns the number of entries held by each shard, in shard order.
    pub fn shard_lens(&self) -> Vec<usize> {
        self.shards.iter().map(|s| s.read().len()).collect()
    }

    /// Returns, per shard, how many lock acquisitions had to wait or retry.
    pub fn contention_stats(&self) -> Vec<usize> {
        self.shards.iter().map(Shard::contentions).collect()
    }

    /// Releases every entry while the map stays usable.
    ///
    /// Shards are write-locked one at a time in index order. Returns how many
    /// entries were released.
    pub fn clear(&self) -> usize {
        let released = self.shards.iter().map(|s| s.write().clear()).sum();
        log::trace!("cleared sharded map: {} entries released", released);
        released
    }

    /// Calls `f` on every entry, visiting shards in index order.
    ///
    /// Each shard is read-locked only while its own entries are visited, so
    /// the traversal sees one consistent snapshot per shard, not a snapshot of
    /// the whole map. Writers to the visited shard wait until `f` has returned
    /// for all of its entries.
    ///
    /// **Locking behaviour:** Deadlock if `f` writes to the shard being
    /// visited. Writes to other shards and reads of any shard from `f` are
    /// fine: readers never wait on a queued writer.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        for shard in self.shards.iter() {
            let bucket = shard.read();
            bucket.iter().for_each(|(k, v)| f(k, v));
        }
    }

    /// Returns a lazy iterator over clones of the entries.
    ///
    /// A shard is read-locked and copied out only when the iterator reaches
    /// it, and the lock is released before the copy is yielded. Changes made
    /// to a shard after it was copied are not observed; changes made to a
    /// shard before the iterator reaches it are.
    ///
    /// # Examples
    /// ```
    /// use shardmap::ShardedMap;
    ///
    /// let map = ShardedMap::new();
    /// map.insert(1, "one");
    /// map.insert(2, "two");
    ///
    /// let mut entries = map.iter().collect::<Vec<_>>();
    /// entries.sort();
    /// assert_eq!(entries, vec![(1, "one"), (2, "two")]);
    /// ```
    pub fn iter(&self) -> Iter<'_, K, V, S>
    where
        K: Clone,
        V: Clone,
    {
        Iter {
            map: self,
            next_shard: 0,
            current: Vec::new().into_iter(),
        }
    }

    /// Collects [`iter`](Self::iter) into a vector.
    pub fn snapshot(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.iter().collect()
    }
}

impl<K: Eq + Hash, V, S: BuildHasher> ShardedMap<K, V, S> {
    /// Creates a new `ShardedMap` with the specified number of shards and hasher.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroShards`] if `shard_amount` is zero.
    pub fn with_shard_amount_and_hasher(
        shard_amount: usize,
        hasher: S,
    ) -> Result<Self, ConfigError> {
        ShardedMapBuilder::new()
            .shard_amount(shard_amount)
            .hasher(hasher)
            .build()
    }

    /// Returns the index of the shard that `key` is routed to.
    ///
    /// Routing is pure and stable for the lifetime of the map.
    #[inline(always)]
    pub fn route<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        self.hasher.hash_one(key) as usize % self.shards.len()
    }

    #[inline(always)]
    fn shard<Q>(&self, key: &Q) -> (usize, &Shard<K, V>)
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        let idx = self.route(key);
        (idx, &self.shards[idx])
    }

    /// Inserts a key-value pair, write-locking the key's shard.
    ///
    /// Under [`InsertPolicy::Append`] (the default) an existing key is not
    /// overwritten: a second entry is appended and `get` keeps returning the
    /// first one. Call [`remove`](Self::remove) first to replace a value, or
    /// build the map with [`InsertPolicy::Upsert`].
    ///
    /// # Examples
    /// ```
    /// use shardmap::ShardedMap;
    ///
    /// let map = ShardedMap::<String, u32>::new();
    /// map.insert("key".to_string(), 1);
    /// map.insert("key".to_string(), 2);
    /// assert_eq!(map.get("key"), Some(1));
    /// assert_eq!(map.len(), 2);
    /// ```
    pub fn insert(&self, key: K, value: V) {
        let (_, shard) = self.shard(&key);
        let mut bucket = shard.write();
        self.insert_into(&mut bucket, key, value);
    }

    /// Like [`insert`](Self::insert), but fails instead of waiting when the
    /// shard is locked. On failure `key` and `value` are returned inside the
    /// error, see [`TryInsertError::into_inner`].
    pub fn try_insert(&self, key: K, value: V) -> Result<(), TryInsertError<K, V>> {
        let (idx, shard) = self.shard(&key);
        match shard.try_write() {
            Some(mut bucket) => {
                self.insert_into(&mut bucket, key, value);
                Ok(())
            }
            None => Err(TryInsertError {
                shard: idx,
                key,
                value,
            }),
        }
    }

    fn insert_into(&self, bucket: &mut crate::Bucket<K, V>, key: K, value: V) {
        match self.policy {
            InsertPolicy::Append => bucket.push(key, value),
            InsertPolicy::Upsert => {
                bucket.upsert(key, value);
            }
        }
    }

    /// Gets a copy of the value associated with the given key.
    ///
    /// The shard is read-locked, so lookups run concurrently with each other
    /// and wait only for a writer on the same shard.
    ///
    /// # Returns
    /// * `Some(V)` with the first matching entry's value if the key exists
    /// * `None` if the key doesn't exist
    ///
    /// # Examples
    /// ```
    /// use shardmap::ShardedMap;
    ///
    /// let map = ShardedMap::<String, u32>::new();
    /// map.insert("key".to_string(), 42);
    /// assert_eq!(map.get("key"), Some(42));
    /// assert_eq!(map.get("missing"), None);
    /// ```
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        V: Clone,
        Q: Eq + Hash + ?Sized,
    {
        let (_, shard) = self.shard(key);
        let bucket = shard.read();
        bucket.find(key).cloned()
    }

    /// Like [`get`](Self::get), but fails instead of waiting when a writer
    /// holds the shard.
    pub fn try_get<Q>(&self, key: &Q) -> Result<Option<V>, WouldBlock>
    where
        K: Borrow<Q>,
        V: Clone,
        Q: Eq + Hash + ?Sized,
    {
        let (idx, shard) = self.shard(key);
        let bucket = shard.try_read().ok_or(WouldBlock { shard: idx })?;
        Ok(bucket.find(key).cloned())
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let (_, shard) = self.shard(key);
        let bucket = shard.read();
        bucket.find(key).is_some()
    }

    /// Removes every entry for the key, write-locking its shard.
    ///
    /// Returns how many entries were removed; an absent key is a no-op that
    /// returns 0.
    ///
    /// # Examples
    /// ```
    /// use shardmap::ShardedMap;
    ///
    /// let map = ShardedMap::<String, u32>::new();
    /// map.insert("key".to_string(), 1);
    /// map.insert("key".to_string(), 2);
    /// assert_eq!(map.remove("key"), 2);
    /// assert_eq!(map.get("key"), None);
    /// assert_eq!(map.remove("key"), 0);
    /// ```
    pub fn remove<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let (_, shard) = self.shard(key);
        let mut bucket = shard.write();
        bucket.remove_all(key)
    }

    /// Like [`remove`](Self::remove), but fails instead of waiting when the
    /// shard is locked.
    pub fn try_remove<Q>(&self, key: &Q) -> Result<usize, WouldBlock>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let (idx, shard) = self.shard(key);
        let mut bucket = shard.try_write().ok_or(WouldBlock { shard: idx })?;
        Ok(bucket.remove_all(key))
    }

    /// Verifies that every entry lives in the shard its key routes to, and
    /// under [`InsertPolicy::Upsert`] that no bucket holds a key twice.
    ///
    /// Shards are read-locked one at a time.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        for (idx, shard) in self.shards.iter().enumerate() {
            let bucket = shard.read();
            for (pos, (key, _)) in bucket.iter().enumerate() {
                let routed = self.route(key);
                if routed != idx {
                    return Err(InvariantError::new(format!(
                        "entry {pos} of shard {idx} routes to shard {routed}"
                    )));
                }
                if self.policy == InsertPolicy::Upsert
                    && bucket.iter().skip(pos + 1).any(|(other, _)| other == key)
                {
                    return Err(InvariantError::new(format!(
                        "entry {pos} of shard {idx} is duplicated"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl<K, V, S> fmt::Debug for ShardedMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedMap")
            .field("shard_amount", &self.shards.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<K, V, S> Drop for ShardedMap<K, V, S> {
    fn drop(&mut self) {
        let released: usize = self.shards.iter_mut().map(|s| s.get_mut().clear()).sum();
        log::debug!(
            "tore down sharded map: {} shards, {} entries released",
            self.shards.len(),
            released
        );
    }
}

/// Lazy iterator returned by [`ShardedMap::iter`].
pub struct Iter<'a, K, V, S> {
    map: &'a ShardedMap<K, V, S>,
    next_shard: usize,
    current: std::vec::IntoIter<(K, V)>,
}

impl<K: Clone, V: Clone, S> Iterator for Iter<'_, K, V, S> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.current.next() {
                return Some(entry);
            }
            let shard = self.map.shards.get(self.next_shard)?;
            self.next_shard += 1;
            self.current = shard.read().iter().cloned().collect::<Vec<_>>().into_iter();
        }
    }
}
