//! Error types for the sharded map.
//!
//! - [`ConfigError`]: returned when construction parameters are invalid.
//! - [`WouldBlock`]: returned by the `try_*` operations when the shard lock
//!   is held in a conflicting mode.
//! - [`TryInsertError`]: the same, from `try_insert`, carrying back the
//!   entry that was not inserted.
//! - [`InvariantError`]: returned by
//!   [`ShardedMap::check_invariants`](crate::ShardedMap::check_invariants).
//!
//! Absent keys are not errors: `get` returns `None` and `remove` is a no-op.

use std::fmt;

/// Error returned when a map is configured with invalid parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The shard amount was zero, which leaves routing undefined.
    ZeroShards,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroShards => f.write_str("shard amount must be greater than zero"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Error returned by non-blocking operations when the shard is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WouldBlock {
    /// Index of the shard whose lock could not be acquired.
    pub shard: usize,
}

impl fmt::Display for WouldBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard {} is locked", self.shard)
    }
}

impl std::error::Error for WouldBlock {}

/// Error returned by [`ShardedMap::try_insert`](crate::ShardedMap::try_insert)
/// when the shard is busy. The rejected key and value are handed back.
#[derive(Clone, PartialEq, Eq)]
pub struct TryInsertError<K, V> {
    /// Index of the shard whose lock could not be acquired.
    pub shard: usize,
    pub key: K,
    pub value: V,
}

impl<K, V> TryInsertError<K, V> {
    /// Returns the entry that was not inserted.
    #[inline]
    pub fn into_inner(self) -> (K, V) {
        (self.key, self.value)
    }

    /// Drops the entry and keeps only the shard index.
    #[inline]
    pub fn would_block(&self) -> WouldBlock {
        WouldBlock { shard: self.shard }
    }
}

impl<K, V> fmt::Debug for TryInsertError<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TryInsertError")
            .field("shard", &self.shard)
            .finish_non_exhaustive()
    }
}

impl<K, V> fmt::Display for TryInsertError<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard {} is locked", self.shard)
    }
}

impl<K, V> std::error::Error for TryInsertError<K, V> {}

impl<K, V> From<TryInsertError<K, V>> for WouldBlock {
    fn from(err: TryInsertError<K, V>) -> Self {
        err.would_block()
    }
}

/// Error returned when an internal invariant of the map does not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantError(String);

impl InvariantError {
    /// Creates a new `InvariantError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for InvariantError {}
