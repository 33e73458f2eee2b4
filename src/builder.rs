//! Configuration for [`ShardedMap`].
//!
//! ```
//! use shardmap::{InsertPolicy, ShardedMapBuilder};
//!
//! let map = ShardedMapBuilder::new()
//!     .shard_amount(16)
//!     .capacity(1024)
//!     .insert_policy(InsertPolicy::Upsert)
//!     .build::<u64, String>()
//!     .unwrap();
//!
//! map.insert(7, "seven".to_string());
//! map.insert(7, "SEVEN".to_string());
//! assert_eq!(map.get(&7).as_deref(), Some("SEVEN"));
//! assert_eq!(map.len(), 1);
//! ```

use crate::{ConfigError, InsertPolicy, ShardedMap, DEFAULT_SHARD_AMOUNT};
use foldhash::fast::FixedState;

/// Builder for a [`ShardedMap`].
///
/// The shard amount, hasher and insert policy are fixed once the map is built.
#[derive(Debug, Clone)]
pub struct ShardedMapBuilder<S = FixedState> {
    shard_amount: usize,
    capacity: usize,
    policy: InsertPolicy,
    hasher: S,
}

impl Default for ShardedMapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardedMapBuilder {
    /// Starts from [`DEFAULT_SHARD_AMOUNT`] shards, no reserved capacity,
    /// [`InsertPolicy::Append`] and the fixed-seed `foldhash` hasher.
    pub fn new() -> Self {
        Self {
            shard_amount: DEFAULT_SHARD_AMOUNT,
            capacity: 0,
            policy: InsertPolicy::default(),
            hasher: FixedState::default(),
        }
    }
}

impl<S> ShardedMapBuilder<S> {
    /// Sets the number of shards. Zero is rejected by [`build`](Self::build).
    pub fn shard_amount(mut self, shard_amount: usize) -> Self {
        self.shard_amount = shard_amount;
        self
    }

    /// Sets the total number of entries to reserve room for, split evenly
    /// across the shards.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn insert_policy(mut self, policy: InsertPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the hasher used to route keys to shards.
    pub fn hasher<T>(self, hasher: T) -> ShardedMapBuilder<T> {
        ShardedMapBuilder {
            shard_amount: self.shard_amount,
            capacity: self.capacity,
            policy: self.policy,
            hasher,
        }
    }

    /// Builds the map.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroShards`] if the shard amount is zero.
    pub fn build<K, V>(self) -> Result<ShardedMap<K, V, S>, ConfigError> {
        if self.shard_amount == 0 {
            return Err(ConfigError::ZeroShards);
        }
        Ok(ShardedMap::from_parts(
            self.shard_amount,
            self.capacity,
            self.hasher,
            self.policy,
        ))
    }
}
