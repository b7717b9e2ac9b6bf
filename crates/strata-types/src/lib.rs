//! Foundation types for Strata.
//!
//! Every persistable object is identified by a 64-bit FNV-1a hash of its
//! name. Hashes are the only cross-object reference mechanism in archived
//! form, so the hash function here is the single source of truth for
//! identity across the whole workspace.
//!
//! # Key Types
//!
//! - [`NameHash`]: identity of an object, hashed from its name
//! - [`TypeHash`]: identity of a serializable type, hashed from its type name
//! - [`names`]: process-wide table mapping hashes back to their source strings

pub mod error;
pub mod hash;
pub mod names;

pub use error::TypeError;
pub use hash::{fnv1a_64, NameHash, TypeHash, FNV_OFFSET_BASIS, FNV_PRIME};
