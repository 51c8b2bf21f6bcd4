//! Hash collection aliases.
//!
//! With the `gxhash` feature the maps use gxhash for hashing; without it they
//! fall back to the std hasher so the crate builds on CPUs lacking AES-NI.
//! Construct them with `Default::default()` in either configuration.

#[cfg(feature = "gxhash")]
pub use gxhash::GxBuildHasher;

/// Hasher used by the engine's maps
#[cfg(not(feature = "gxhash"))]
pub type GxBuildHasher = std::hash::RandomState;

/// HashMap keyed with the engine hasher
pub type HashMap<K, V> = std::collections::HashMap<K, V, GxBuildHasher>;

/// HashSet keyed with the engine hasher
pub type HashSet<T> = std::collections::HashSet<T, GxBuildHasher>;

/// Concurrent map keyed with the engine hasher
pub type ConcurrentMap<K, V> = dashmap::DashMap<K, V, GxBuildHasher>;
