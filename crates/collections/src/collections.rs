//! Hash collections used by the session core.
//!
//! Tab ids and session ids are short strings/UUIDs, so the Fx hasher is a
//! better fit than SipHash. `IndexMap` keeps tabs in the order they were
//! opened while still allowing lookup by id.

pub use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};

/// Insertion-ordered map with FxHash. Removal must use `shift_remove` to
/// preserve the order of the remaining entries.
pub type IndexMap<K, V> = indexmap::IndexMap<K, V, FxBuildHasher>;
