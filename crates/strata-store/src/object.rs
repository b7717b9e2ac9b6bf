use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use strata_archive::{ArchiveReader, ArchiveWriter, ObjectStamp, ReaderExt};
use strata_types::{names, NameHash, TypeHash};

use crate::database::ObjectDatabase;
use crate::error::{StoreError, StoreResult};
use crate::record::LoadRecord;
use crate::task::Importer;

const UNLINKED: u64 = 0;
const CLONED: u64 = u64::MAX;

/// Where an object stands with respect to load records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// Not part of any load record.
    Unlinked,
    /// Held by the load record with this id.
    Linked(u64),
    /// A copy; never inserted into a record or the object table.
    Cloned,
}

impl LinkState {
    fn decode(raw: u64) -> Self {
        match raw {
            UNLINKED => Self::Unlinked,
            CLONED => Self::Cloned,
            id => Self::Linked(id),
        }
    }
}

/// Identity and bookkeeping embedded in every persistable object.
///
/// Cloning a header yields a header in the [`LinkState::Cloned`] state, so
/// `#[derive(Clone)]` on an object type produces copies that can be used
/// freely but never enter the database.
pub struct ObjectHeader {
    name: Option<String>,
    name_hash: AtomicU64,
    link: AtomicU64,
}

impl ObjectHeader {
    /// A header for `name`, which is also registered for debug lookups.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        let hash = names::register(&name);
        Self {
            name: Some(name),
            name_hash: AtomicU64::new(hash.raw()),
            link: AtomicU64::new(UNLINKED),
        }
    }

    /// A header that only carries a hash.
    pub fn with_hash(hash: NameHash) -> Self {
        Self {
            name: None,
            name_hash: AtomicU64::new(hash.raw()),
            link: AtomicU64::new(UNLINKED),
        }
    }

    /// The header for an object being constructed by a load.
    pub fn loaded(ctx: &LoadContext<'_>) -> Self {
        Self::with_hash(ctx.name_hash())
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The explicit name, the registered name, or the hex hash.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => names::describe(self.name_hash()),
        }
    }

    pub fn name_hash(&self) -> NameHash {
        NameHash::from_raw(self.name_hash.load(Ordering::Acquire))
    }

    pub(crate) fn assign_name_hash(&self, hash: NameHash) {
        self.name_hash.store(hash.raw(), Ordering::Release);
    }

    pub fn link_state(&self) -> LinkState {
        LinkState::decode(self.link.load(Ordering::Acquire))
    }

    pub fn is_cloned(&self) -> bool {
        self.link_state() == LinkState::Cloned
    }

    /// Claim the header for `record`. Fails with the current state if the
    /// object is cloned or already linked.
    pub(crate) fn try_link(&self, record: u64) -> Result<(), LinkState> {
        self.link
            .compare_exchange(UNLINKED, record, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(LinkState::decode)
    }

    pub(crate) fn unlink(&self, record: u64) {
        let _ = self
            .link
            .compare_exchange(record, UNLINKED, Ordering::AcqRel, Ordering::Acquire);
    }
}

impl Clone for ObjectHeader {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            name_hash: AtomicU64::new(self.name_hash.load(Ordering::Acquire)),
            link: AtomicU64::new(CLONED),
        }
    }
}

impl fmt::Debug for ObjectHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHeader")
            .field("name", &self.display_name())
            .field("name_hash", &self.name_hash())
            .field("link", &self.link_state())
            .finish()
    }
}

/// Upcasts for downcasting trait objects back to concrete types.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A persistable object as seen by the database.
///
/// `save` writes exactly one record and must emit the same fields, in the
/// same order, that the type's [`Serializable::load`] reads. Objects this
/// one refers to are reported by `dependencies` so the database can write
/// them first; `save` itself only writes their hashes.
pub trait Object: AsAny {
    fn header(&self) -> &ObjectHeader;

    fn type_hash(&self) -> TypeHash;

    fn save(&self, writer: &mut dyn ArchiveWriter) -> StoreResult<()>;

    fn dependencies(&self) -> Vec<Arc<dyn Object>> {
        Vec::new()
    }

    /// Objects that pull in external assets expose their pending work here.
    fn as_importer(&self) -> Option<&dyn Importer> {
        None
    }

    fn stamp(&self) -> ObjectStamp {
        ObjectStamp::new(self.type_hash(), self.header().name_hash())
    }
}

impl fmt::Debug for dyn Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("type_hash", &self.type_hash())
            .field("name", &self.header().display_name())
            .finish()
    }
}

/// Open `object`'s record on `writer`.
///
/// Returns `Ok(false)` when the writer suppresses the record, in which case
/// `save` should return without writing fields.
pub fn begin_record(object: &dyn Object, writer: &mut dyn ArchiveWriter) -> StoreResult<bool> {
    if object.header().is_cloned() {
        return Err(StoreError::ClonedObject(object.header().name_hash()));
    }
    Ok(writer.start_object(object.stamp())?)
}

/// A type that can be reconstructed from an archive.
pub trait Serializable: Object + Sized {
    /// Fully qualified type name; its hash tags every record of this type.
    const TYPE_NAME: &'static str;
    const TYPE_HASH: TypeHash = TypeHash::new(Self::TYPE_NAME);
    /// Whether a load record takes a strong reference when it is inserted.
    const REFERENCE_COUNTED: bool = true;
    /// Importers are waited on before a save and never written back out.
    const IMPORTER: bool = false;

    /// Read the fields of the current record.
    fn load(reader: &mut dyn ArchiveReader, ctx: &LoadContext<'_>) -> StoreResult<Self>;
}

/// What a type's [`Serializable::load`] can see besides its own fields.
pub struct LoadContext<'a> {
    database: &'a ObjectDatabase,
    record: &'a Arc<LoadRecord>,
    stamp: ObjectStamp,
    base_directory: &'a Path,
}

impl<'a> LoadContext<'a> {
    pub(crate) fn new(
        database: &'a ObjectDatabase,
        record: &'a Arc<LoadRecord>,
        stamp: ObjectStamp,
        base_directory: &'a Path,
    ) -> Self {
        Self {
            database,
            record,
            stamp,
            base_directory,
        }
    }

    pub fn database(&self) -> &ObjectDatabase {
        self.database
    }

    /// The record this load is filling.
    pub fn record(&self) -> &Arc<LoadRecord> {
        self.record
    }

    pub fn name_hash(&self) -> NameHash {
        self.stamp.name_hash
    }

    pub fn type_hash(&self) -> TypeHash {
        self.stamp.type_hash
    }

    pub fn base_directory(&self) -> &Path {
        self.base_directory
    }

    /// Resolve a path from a field value against the archive's directory.
    pub fn resolve_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.base_directory.join(relative)
    }

    /// Look up an object loaded earlier in this pass or already present.
    pub fn find_object(&self, hash: NameHash) -> StoreResult<Arc<dyn Object>> {
        self.database.find_object(hash)
    }

    pub fn find_object_ref<T: Object>(&self, hash: NameHash) -> StoreResult<Arc<T>> {
        self.database.find_object_ref(hash)
    }
}

/// Downcast a shared object to its concrete type.
pub fn downcast_object<T: Object>(object: Arc<dyn Object>) -> StoreResult<Arc<T>> {
    let hash = object.header().name_hash();
    let found = object.type_hash();
    object
        .into_any()
        .downcast::<T>()
        .map_err(|_| StoreError::TypeMismatch {
            hash,
            expected: std::any::type_name::<T>(),
            found,
        })
}

/// A typed reference to another object, stored in archives by hash.
pub struct ObjectRef<T> {
    hash: NameHash,
    object: Arc<T>,
}

impl<T: Object> ObjectRef<T> {
    pub fn new(object: Arc<T>) -> Self {
        Self {
            hash: object.header().name_hash(),
            object,
        }
    }

    /// Resolve `hash` against the database.
    pub fn resolve(database: &ObjectDatabase, hash: NameHash) -> StoreResult<Self> {
        Ok(Self {
            hash,
            object: database.find_object_ref(hash)?,
        })
    }

    /// Read a hash field and resolve it. The referenced object must
    /// already be loaded.
    pub fn read(
        reader: &mut dyn ArchiveReader,
        field: &str,
        ctx: &LoadContext<'_>,
    ) -> StoreResult<Self> {
        let hash = reader.require_name_hash(field)?;
        Self::resolve(ctx.database(), hash)
    }

    pub fn write(&self, writer: &mut dyn ArchiveWriter, field: &str) -> StoreResult<()> {
        Ok(writer.write_name_hash(field, self.hash)?)
    }

    pub fn hash(&self) -> NameHash {
        self.hash
    }

    pub fn get(&self) -> &Arc<T> {
        &self.object
    }

    pub fn as_dependency(&self) -> Arc<dyn Object> {
        Arc::clone(&self.object) as Arc<dyn Object>
    }
}

impl<T> Clone for ObjectRef<T> {
    fn clone(&self) -> Self {
        Self {
            hash: self.hash,
            object: Arc::clone(&self.object),
        }
    }
}

impl<T> Deref for ObjectRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.object
    }
}

impl<T> fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({})", names::describe(self.hash))
    }
}
