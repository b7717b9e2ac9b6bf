use std::collections::HashMap;
use std::sync::Arc;

use strata_archive::ArchiveReader;
use strata_types::{names, TypeHash};
use tracing::debug;

use crate::builtin::{BufferObject, NameTable, ObjectMap};
use crate::error::{StoreError, StoreResult};
use crate::object::{LoadContext, Object, Serializable};

/// Builds an object from the current record of a reader.
pub type Factory = fn(&mut dyn ArchiveReader, &LoadContext<'_>) -> StoreResult<Arc<dyn Object>>;

/// Everything the database knows about one serializable type.
#[derive(Clone, Copy)]
pub struct TypeRegistration {
    pub type_name: &'static str,
    pub factory: Factory,
    pub reference_counted: bool,
    pub importer: bool,
}

fn construct<T: Serializable>(
    reader: &mut dyn ArchiveReader,
    ctx: &LoadContext<'_>,
) -> StoreResult<Arc<dyn Object>> {
    Ok(Arc::new(T::load(reader, ctx)?))
}

impl TypeRegistration {
    pub fn of<T: Serializable>() -> Self {
        Self {
            type_name: T::TYPE_NAME,
            factory: construct::<T>,
            reference_counted: T::REFERENCE_COUNTED,
            importer: T::IMPORTER,
        }
    }
}

impl std::fmt::Debug for TypeRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistration")
            .field("type_name", &self.type_name)
            .field("reference_counted", &self.reference_counted)
            .field("importer", &self.importer)
            .finish()
    }
}

/// Table of serializable types, keyed by type hash.
///
/// Built once at startup and then shared with databases as
/// `Arc<TypeRegistry>`; there is no removal.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<TypeHash, TypeRegistration>,
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (type_hash, registration) in [
            (NameTable::TYPE_HASH, TypeRegistration::of::<NameTable>()),
            (BufferObject::TYPE_HASH, TypeRegistration::of::<BufferObject>()),
            (ObjectMap::TYPE_HASH, TypeRegistration::of::<ObjectMap>()),
        ] {
            registry.insert(type_hash, registration);
        }
        registry
    }

    /// Register `T`. Registering the same type twice is a no-op.
    pub fn register<T: Serializable>(&mut self) -> StoreResult<&mut Self> {
        self.register_serializable_type(T::TYPE_HASH, TypeRegistration::of::<T>())?;
        Ok(self)
    }

    /// Register a type under an explicit hash.
    pub fn register_serializable_type(
        &mut self,
        type_hash: TypeHash,
        registration: TypeRegistration,
    ) -> StoreResult<()> {
        if let Some(existing) = self.types.get(&type_hash) {
            if existing.type_name == registration.type_name {
                return Ok(());
            }
            return Err(StoreError::DuplicateType {
                type_hash,
                existing: existing.type_name,
                new: registration.type_name,
            });
        }
        self.insert(type_hash, registration);
        Ok(())
    }

    fn insert(&mut self, type_hash: TypeHash, registration: TypeRegistration) {
        names::register(registration.type_name);
        debug!(%type_hash, type_name = registration.type_name, "type registered");
        self.types.insert(type_hash, registration);
    }

    pub fn get(&self, type_hash: TypeHash) -> Option<&TypeRegistration> {
        self.types.get(&type_hash)
    }

    pub fn contains(&self, type_hash: TypeHash) -> bool {
        self.types.contains_key(&type_hash)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeHash, &TypeRegistration)> {
        self.types.iter().map(|(hash, registration)| (*hash, registration))
    }
}
