//! Object types shared by the unit tests.

use std::sync::Arc;

use strata_archive::{ArchiveReader, ArchiveWriter, ReaderExt, WriterExt};
use strata_types::{NameHash, TypeHash};

use crate::database::ObjectDatabase;
use crate::error::StoreResult;
use crate::object::{begin_record, LoadContext, Object, ObjectHeader, ObjectRef, Serializable};
use crate::registry::TypeRegistry;
use crate::task::{Importer, WorkItem};

pub(crate) fn test_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::with_builtins();
    registry.register::<Mesh>().unwrap();
    registry.register::<Model>().unwrap();
    registry.register::<SlowImporter>().unwrap();
    registry
}

pub(crate) fn test_database() -> ObjectDatabase {
    ObjectDatabase::new(Arc::new(test_registry()))
}

/// A leaf object.
#[derive(Debug, Clone)]
pub(crate) struct Mesh {
    pub header: ObjectHeader,
    pub vertices: u32,
    pub label: String,
}

impl Mesh {
    pub fn new(name: &str, vertices: u32) -> Self {
        Self {
            header: ObjectHeader::named(name),
            vertices,
            label: format!("{vertices} vertices"),
        }
    }

    pub fn with_hash(hash: NameHash, vertices: u32) -> Self {
        Self {
            header: ObjectHeader::with_hash(hash),
            vertices,
            label: String::new(),
        }
    }
}

impl Object for Mesh {
    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn type_hash(&self) -> TypeHash {
        Self::TYPE_HASH
    }

    fn save(&self, writer: &mut dyn ArchiveWriter) -> StoreResult<()> {
        if !begin_record(self, writer)? {
            return Ok(());
        }
        writer.write("vertices", self.vertices)?;
        writer.write_string("label", &self.label)?;
        Ok(())
    }
}

impl Serializable for Mesh {
    const TYPE_NAME: &'static str = "strata::test::Mesh";

    fn load(reader: &mut dyn ArchiveReader, ctx: &LoadContext<'_>) -> StoreResult<Self> {
        Ok(Self {
            header: ObjectHeader::loaded(ctx),
            vertices: reader.require("vertices")?,
            label: reader.require_string("label")?,
        })
    }
}

/// An object that refers to a [`Mesh`].
#[derive(Debug, Clone)]
pub(crate) struct Model {
    pub header: ObjectHeader,
    pub mesh: ObjectRef<Mesh>,
    pub scale: f32,
}

impl Model {
    pub fn new(name: &str, mesh: Arc<Mesh>, scale: f32) -> Self {
        Self {
            header: ObjectHeader::named(name),
            mesh: ObjectRef::new(mesh),
            scale,
        }
    }
}

impl Object for Model {
    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn type_hash(&self) -> TypeHash {
        Self::TYPE_HASH
    }

    fn save(&self, writer: &mut dyn ArchiveWriter) -> StoreResult<()> {
        if !begin_record(self, writer)? {
            return Ok(());
        }
        self.mesh.write(writer, "mesh")?;
        writer.write("scale", self.scale)?;
        Ok(())
    }

    fn dependencies(&self) -> Vec<Arc<dyn Object>> {
        vec![self.mesh.as_dependency()]
    }
}

impl Serializable for Model {
    const TYPE_NAME: &'static str = "strata::test::Model";

    fn load(reader: &mut dyn ArchiveReader, ctx: &LoadContext<'_>) -> StoreResult<Self> {
        Ok(Self {
            header: ObjectHeader::loaded(ctx),
            mesh: ObjectRef::read(reader, "mesh", ctx)?,
            scale: reader.require("scale")?,
        })
    }
}

/// An importer whose work finishes whenever the test says so.
pub(crate) struct SlowImporter {
    pub header: ObjectHeader,
    pub work: WorkItem<()>,
}

impl SlowImporter {
    pub fn new(name: &str, work: WorkItem<()>) -> Self {
        Self {
            header: ObjectHeader::named(name),
            work,
        }
    }
}

impl Object for SlowImporter {
    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn type_hash(&self) -> TypeHash {
        Self::TYPE_HASH
    }

    fn save(&self, writer: &mut dyn ArchiveWriter) -> StoreResult<()> {
        begin_record(self, writer)?;
        Ok(())
    }

    fn as_importer(&self) -> Option<&dyn Importer> {
        Some(&self.work)
    }
}

impl Serializable for SlowImporter {
    const TYPE_NAME: &'static str = "strata::test::SlowImporter";
    const IMPORTER: bool = true;

    fn load(_reader: &mut dyn ArchiveReader, ctx: &LoadContext<'_>) -> StoreResult<Self> {
        Ok(Self {
            header: ObjectHeader::loaded(ctx),
            work: WorkItem::completed(()),
        })
    }
}
