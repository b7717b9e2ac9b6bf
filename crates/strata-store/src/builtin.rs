//! Serializable types every database understands.

use std::sync::Arc;

use strata_archive::{ArchiveReader, ArchiveWriter, ReaderExt, ScalarKind, WriterExt};
use strata_buffer::ReferencedBuffer;
use strata_types::{names, NameHash, TypeHash};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::object::{begin_record, LoadContext, Object, ObjectHeader, Serializable};

/// Name of the table record appended to saves.
pub const NAME_TABLE_NAME: &str = "strata::name_table";

// ---------------------------------------------------------------------------
// NameTable
// ---------------------------------------------------------------------------

/// Debug names for the hashes in an archive.
///
/// Loading one registers its names with the process-wide name registry;
/// the loader then discards it instead of storing it.
#[derive(Debug, Clone)]
pub struct NameTable {
    header: ObjectHeader,
    names: Vec<String>,
}

impl NameTable {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            header: ObjectHeader::with_hash(NameHash::new(NAME_TABLE_NAME)),
            names,
        }
    }

    /// The registered names of `hashes`; unknown hashes are skipped.
    pub fn from_hashes(hashes: &[NameHash]) -> Self {
        Self::new(hashes.iter().filter_map(|hash| names::lookup(*hash)).collect())
    }

    /// Read the current record's names and register them.
    pub fn read_from(reader: &mut dyn ArchiveReader) -> StoreResult<Self> {
        let count: u32 = reader.require("count")?;
        // The count is untrusted; a short table fails on its first missing name.
        let mut entries = Vec::new();
        for i in 0..count {
            let name = reader.require_string(&format!("name{i}"))?;
            names::register(&name);
            entries.push(name);
        }
        debug!(count, "name table registered");
        Ok(Self::new(entries))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Object for NameTable {
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
        writer.write("count", self.names.len() as u32)?;
        for (i, name) in self.names.iter().enumerate() {
            writer.write_string(&format!("name{i}"), name)?;
        }
        Ok(())
    }
}

impl Serializable for NameTable {
    const TYPE_NAME: &'static str = "strata::NameTable";

    fn load(reader: &mut dyn ArchiveReader, _ctx: &LoadContext<'_>) -> StoreResult<Self> {
        Self::read_from(reader)
    }
}

// ---------------------------------------------------------------------------
// BufferObject
// ---------------------------------------------------------------------------

/// A named, persistable byte buffer.
#[derive(Debug, Clone)]
pub struct BufferObject {
    header: ObjectHeader,
    buffer: Arc<ReferencedBuffer>,
}

impl BufferObject {
    pub fn new(header: ObjectHeader, buffer: Arc<ReferencedBuffer>) -> Self {
        Self { header, buffer }
    }

    pub fn buffer(&self) -> &Arc<ReferencedBuffer> {
        &self.buffer
    }
}

impl Object for BufferObject {
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
        let bytes = self.buffer.to_vec()?;
        writer.write("size", bytes.len() as u64)?;
        writer.write_raw("data", ScalarKind::U8, &bytes)?;
        Ok(())
    }
}

impl Serializable for BufferObject {
    const TYPE_NAME: &'static str = "strata::BufferObject";

    fn load(reader: &mut dyn ArchiveReader, ctx: &LoadContext<'_>) -> StoreResult<Self> {
        let size: u64 = reader.require("size")?;
        let data = reader
            .read_raw_vec("data", ScalarKind::U8, size)
            .map_err(|e| StoreError::InvalidObject {
                hash: ctx.name_hash(),
                reason: format!("buffer of {size} bytes: {e}"),
            })?
            .ok_or_else(|| StoreError::InvalidObject {
                hash: ctx.name_hash(),
                reason: "missing field `data`".into(),
            })?;
        Ok(Self {
            header: ObjectHeader::loaded(ctx),
            buffer: Arc::new(ReferencedBuffer::from_vec(data)),
        })
    }
}

// ---------------------------------------------------------------------------
// ObjectMap
// ---------------------------------------------------------------------------

/// A persistable map from keys to other objects.
///
/// Values are written by hash and resolved on load, so every value must be
/// saved (and therefore loaded) before the map.
#[derive(Debug, Clone)]
pub struct ObjectMap {
    header: ObjectHeader,
    entries: Vec<(NameHash, Arc<dyn Object>)>,
}

impl ObjectMap {
    pub fn new(header: ObjectHeader) -> Self {
        Self {
            header,
            entries: Vec::new(),
        }
    }

    /// Insert or replace the value for `key`.
    pub fn insert(&mut self, key: NameHash, value: Arc<dyn Object>) -> Option<Arc<dyn Object>> {
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: NameHash) -> Option<&Arc<dyn Object>> {
        self.entries
            .iter()
            .find(|(existing, _)| *existing == key)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NameHash, &Arc<dyn Object>)> {
        self.entries.iter().map(|(key, value)| (*key, value))
    }
}

impl Object for ObjectMap {
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
        writer.write("count", self.entries.len() as u32)?;
        for (i, (key, value)) in self.entries.iter().enumerate() {
            writer.write_name_hash(&format!("key{i}"), *key)?;
            writer.write_name_hash(&format!("value{i}"), value.header().name_hash())?;
        }
        Ok(())
    }

    fn dependencies(&self) -> Vec<Arc<dyn Object>> {
        self.entries.iter().map(|(_, value)| Arc::clone(value)).collect()
    }
}

impl Serializable for ObjectMap {
    const TYPE_NAME: &'static str = "strata::ObjectMap";

    fn load(reader: &mut dyn ArchiveReader, ctx: &LoadContext<'_>) -> StoreResult<Self> {
        let count: u32 = reader.require("count")?;
        let mut map = Self::new(ObjectHeader::loaded(ctx));
        for i in 0..count {
            let key = reader.require_name_hash(&format!("key{i}"))?;
            let value = reader.require_name_hash(&format!("value{i}"))?;
            map.insert(key, ctx.find_object(value)?);
        }
        Ok(map)
    }
}
