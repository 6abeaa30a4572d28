//! Caching subsystem.
//!
//! Two independent caches:
//!
//! - [`response::ResponseCache`] — in-memory LRU + TTL cache keyed on
//!   `(identity, normalized query)`, used to short-circuit redundant
//!   calls to the generative backends. Misses are `None`, stale entries
//!   expire on read, and eviction is strict LRU.
//!
//! - [`voice::VoiceModelCache`] — disk-backed, content-addressed cache
//!   for cloned voice models, keyed on the SHA-256 digest of the
//!   reference input. Survives restarts via an `index.json`; dangling
//!   index entries self-heal on read.

pub mod response;
pub mod voice;

pub use response::{CacheConfig, CacheStats, ResponseCache};
pub use voice::{VoiceCacheConfig, VoiceCacheStats, VoiceModelCache};
