use std::time::Duration;

use strata_archive::ArchiveError;
use strata_buffer::BufferError;
use strata_types::{NameHash, TypeHash};

/// Errors from the object database and the serializable object protocol.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the archive failed.
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// I/O outside of an archive (opening files, spawning work).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// A record names a type that was never registered.
    #[error("unknown type {type_hash} for object {name_hash}")]
    UnknownType {
        type_hash: TypeHash,
        name_hash: NameHash,
    },

    /// Two different type names hash to the same type hash.
    #[error("type hash {type_hash} already registered to {existing}, cannot register {new}")]
    DuplicateType {
        type_hash: TypeHash,
        existing: &'static str,
        new: &'static str,
    },

    /// A required object is absent from the database.
    #[error("object not found: {0}")]
    NotFound(NameHash),

    /// The object exists but is not of the requested type.
    #[error("object {hash} has type {found}, expected {expected}")]
    TypeMismatch {
        hash: NameHash,
        expected: &'static str,
        found: TypeHash,
    },

    /// An importer did not finish within the configured wait.
    #[error("importer {hash} did not finish within {after:?}")]
    Timeout { hash: NameHash, after: Duration },

    /// Cloned objects never take part in persistence identity.
    #[error("object {0} is a clone and cannot be persisted")]
    ClonedObject(NameHash),

    /// The object already belongs to a load record.
    #[error("object {hash} is already linked into load record {record}")]
    AlreadyLinked { hash: NameHash, record: u64 },

    /// Objects need a name hash to be stored.
    #[error("object of type {type_hash} has no name hash")]
    UnnamedObject { type_hash: TypeHash },

    /// A loaded object failed its own consistency checks.
    #[error("invalid object {hash}: {reason}")]
    InvalidObject { hash: NameHash, reason: String },

    /// A work item panicked before producing its value.
    #[error("work item failed: {0}")]
    WorkFailed(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
