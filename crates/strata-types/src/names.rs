//! Debug name registry.
//!
//! Archived objects carry only hashes. To keep saved data inspectable, the
//! strings that produced those hashes are recorded here as they are seen
//! (while loading a structured archive, while reading a name table, or by
//! explicit registration) and a save pass writes the subset it actually
//! used back out as a name table record.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::hash::NameHash;

/// A table mapping name hashes back to the strings that produced them.
#[derive(Debug, Default)]
pub struct NameRegistry {
    names: RwLock<HashMap<NameHash, String>>,
}

impl NameRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash `name`, record it, and return the hash.
    ///
    /// Re-registering a string is a no-op. A different string with the same
    /// hash keeps the first registration.
    pub fn register(&self, name: &str) -> NameHash {
        let hash = NameHash::new(name);
        self.names
            .write()
            .entry(hash)
            .or_insert_with(|| name.to_owned());
        hash
    }

    /// Look up the string registered for `hash`.
    pub fn lookup(&self, hash: NameHash) -> Option<String> {
        self.names.read().get(&hash).cloned()
    }

    /// Returns `true` if `hash` has a registered string.
    pub fn contains(&self, hash: NameHash) -> bool {
        self.names.read().contains_key(&hash)
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }
}

/// The process-wide registry.
pub fn global() -> &'static NameRegistry {
    static GLOBAL: OnceLock<NameRegistry> = OnceLock::new();
    GLOBAL.get_or_init(NameRegistry::new)
}

/// Register `name` in the process-wide registry and return its hash.
pub fn register(name: &str) -> NameHash {
    global().register(name)
}

/// Look up `hash` in the process-wide registry.
pub fn lookup(hash: NameHash) -> Option<String> {
    global().lookup(hash)
}

/// Human-readable form of `hash`: the registered name if known, hex otherwise.
pub fn describe(hash: NameHash) -> String {
    lookup(hash).unwrap_or_else(|| hash.to_hex())
}
