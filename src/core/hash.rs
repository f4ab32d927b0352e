/// Type alias for hash maps used across the library.
pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

/// Type alias for hash sets used across the library.
pub type HashSet<V> = std::collections::HashSet<V, ahash::RandomState>;

/// Type alias for insertion-ordered maps, used for dictionaries that are
/// written to the wire and must encode with a deterministic field order.
pub type IndexMap<K, V> = indexmap::IndexMap<K, V, ahash::RandomState>;
