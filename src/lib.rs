//! A thread-safe hashmap with a fixed number of shards and one reader/writer
//! lock per shard.
//!
//! # Overview
//! `shardmap` splits its entries into buckets chosen by `hash(key) % shard_amount`.
//! Every bucket is guarded by its own futex-based reader/writer lock, so
//! operations on different shards never block each other.
//!
//! # Features
//! - Shared locking for lookups, exclusive locking for inserts and removals
//! - Fixed shard amount, chosen once at construction
//! - Configurable hasher and insert policy (append duplicates or upsert)
//! - Non-blocking `try_*` variants of every keyed operation
//! - Per-shard snapshot enumeration and contention counters
//! - No poisoning, the lock is released normally on panic
//!
//! # Examples
//! ```
//! use shardmap::ShardedMap;
//!
//! let map = ShardedMap::<String, u32>::with_shard_amount(2).unwrap();
//!
//! // Basic operations
//! map.insert("key1".into(), 42);
//! assert_eq!(map.get("key1"), Some(42));
//!
//! // Values are copied out, never borrowed from a bucket
//! for (key, value) in map.iter() {
//!     println!("{key}: {value}");
//! }
//!
//! // Remove a value
//! assert_eq!(map.remove("key1"), 1);
//! assert_eq!(map.get("key1"), None);
//! ```
mod builder;
mod error;
mod futex;
mod shard;
#[doc = include_str!("../README.md")]
mod sharded_map;

pub use builder::*;
pub use error::*;
use futex::*;
use shard::*;
pub use sharded_map::*;
