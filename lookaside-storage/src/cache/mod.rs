//! Look-aside cache backends.
//!
//! - [`LookasideCache`]: the backend trait, one pipelined primitive plus
//!   single-command helpers
//! - [`MemoryCache`]: in-process backend with Redis semantics
//! - `RedisCache`: Redis backend (feature `redis`)

mod memory;
#[cfg(feature = "redis")]
mod redis;
mod traits;

pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;
pub use traits::{CacheCommand, CacheReply, LookasideCache, Pipeline};
