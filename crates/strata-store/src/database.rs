use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use strata_archive::{
    open_reader, ArchiveFormat, ArchiveReader, ArchiveWriter, BinaryArchiveReader,
    BinaryArchiveWriter, ByteStream, JsonArchiveReader, JsonArchiveWriter, JsonWriterOptions,
    RecordFilter,
};
use strata_types::NameHash;
use tracing::{debug, info, warn};

use crate::builtin::NameTable;
use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use crate::object::{downcast_object, LoadContext, Object, Serializable};
use crate::record::LoadRecord;
use crate::registry::TypeRegistry;

#[derive(Clone)]
struct TableEntry {
    object: Weak<dyn Object>,
    record: u64,
    sequence: u64,
}

struct Shared {
    registry: Arc<TypeRegistry>,
    config: DatabaseConfig,
    table: Mutex<HashMap<NameHash, TableEntry>>,
    records: Mutex<Vec<Weak<LoadRecord>>>,
    next_record: AtomicU64,
    next_sequence: AtomicU64,
}

/// What one save wrote.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Object records written, not counting the name table.
    pub objects: usize,
    /// Names in the appended name table.
    pub names: usize,
}

/// The hash-keyed object table with load and save orchestration.
///
/// Handles are cheap to clone and share one table. Every mutation and
/// lookup takes the table's single lock.
///
/// Inserting an object under a hash that is already live replaces the
/// earlier entry (an upsert, logged as a warning); it does not reject the
/// insert.
#[derive(Clone)]
pub struct ObjectDatabase {
    shared: Arc<Shared>,
}

impl ObjectDatabase {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self::with_config(registry, DatabaseConfig::default())
    }

    pub fn with_config(registry: Arc<TypeRegistry>, config: DatabaseConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                config,
                table: Mutex::new(HashMap::new()),
                records: Mutex::new(Vec::new()),
                next_record: AtomicU64::new(1),
                next_sequence: AtomicU64::new(0),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.shared.registry
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.shared.config
    }

    /// Start an empty load record for objects inserted by the caller.
    pub fn new_record(&self) -> Arc<LoadRecord> {
        let id = self.shared.next_record.fetch_add(1, Ordering::Relaxed);
        let record = Arc::new(LoadRecord::new(id, self.clone()));
        let mut records = self.shared.records.lock();
        records.retain(|weak| weak.strong_count() > 0);
        records.push(Arc::downgrade(&record));
        record
    }

    // -----------------------------------------------------------------------
    // Table hooks used by LoadRecord
    // -----------------------------------------------------------------------

    pub(crate) fn import_object(&self, object: &Arc<dyn Object>, record: u64) {
        let hash = object.header().name_hash();
        let sequence = self.shared.next_sequence.fetch_add(1, Ordering::Relaxed);
        let entry = TableEntry {
            object: Arc::downgrade(object),
            record,
            sequence,
        };
        let previous = self.shared.table.lock().insert(hash, entry);
        if let Some(previous) = previous {
            if previous.object.strong_count() > 0 {
                warn!(
                    %hash,
                    previous_record = previous.record,
                    record,
                    "name hash already live; replacing table entry"
                );
            }
        }
    }

    /// Drop the table entry for `hash` if `record` still owns it.
    pub(crate) fn remove_object(&self, hash: NameHash, record: u64) -> bool {
        let mut table = self.shared.table.lock();
        match table.get(&hash) {
            Some(entry) if entry.record == record => {
                table.remove(&hash);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn remove_objects(&self, hashes: &[NameHash], record: u64) {
        if hashes.is_empty() {
            return;
        }
        let mut table = self.shared.table.lock();
        for hash in hashes {
            if table.get(hash).is_some_and(|entry| entry.record == record) {
                table.remove(hash);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// The object for `hash`, or `None` if it is not loaded.
    pub fn locate_object(&self, hash: NameHash) -> Option<Arc<dyn Object>> {
        let mut table = self.shared.table.lock();
        let object = table.get(&hash)?.object.upgrade();
        if object.is_none() {
            // An untracked object was dropped by its owner.
            table.remove(&hash);
        }
        object
    }

    /// The object for `hash` as a `T`, or `None` if it is absent or of
    /// another type.
    pub fn locate_object_ref<T: Object>(&self, hash: NameHash) -> Option<Arc<T>> {
        let object = self.locate_object(hash)?;
        match downcast_object(object) {
            Ok(object) => Some(object),
            Err(e) => {
                debug!(%hash, error = %e, "located object has another type");
                None
            }
        }
    }

    /// The object for `hash`; absence is an error.
    pub fn find_object(&self, hash: NameHash) -> StoreResult<Arc<dyn Object>> {
        self.locate_object(hash).ok_or(StoreError::NotFound(hash))
    }

    /// The object for `hash` as a `T`; absence or a type mismatch is an
    /// error.
    pub fn find_object_ref<T: Object>(&self, hash: NameHash) -> StoreResult<Arc<T>> {
        downcast_object(self.find_object(hash)?)
    }

    pub fn contains(&self, hash: NameHash) -> bool {
        self.locate_object(hash).is_some()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.shared
            .table
            .lock()
            .values()
            .filter(|entry| entry.object.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live hashes in insertion order.
    pub fn hashes(&self) -> Vec<NameHash> {
        self.table_objects()
            .into_iter()
            .map(|object| object.header().name_hash())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn table_entries(&self) -> usize {
        self.shared.table.lock().len()
    }

    fn table_objects(&self) -> Vec<Arc<dyn Object>> {
        let mut live: Vec<(u64, Arc<dyn Object>)> = Vec::new();
        self.shared.table.lock().retain(|_, entry| match entry.object.upgrade() {
            Some(object) => {
                live.push((entry.sequence, object));
                true
            }
            None => false,
        });
        live.sort_by_key(|(sequence, _)| *sequence);
        live.into_iter().map(|(_, object)| object).collect()
    }

    // -----------------------------------------------------------------------
    // Clear
    // -----------------------------------------------------------------------

    /// Remove the objects of `record`, or of every record when `None`.
    /// Returns how many objects were removed.
    ///
    /// Objects elsewhere may still refer to removed hashes; such lookups
    /// fail afterwards.
    pub fn clear_objects(&self, record: Option<&LoadRecord>) -> usize {
        let removed = match record {
            Some(record) => record.clear(),
            None => {
                let records: Vec<Arc<LoadRecord>> = {
                    let mut records = self.shared.records.lock();
                    records.retain(|weak| weak.strong_count() > 0);
                    records.iter().filter_map(Weak::upgrade).collect()
                };
                let removed: usize = records.iter().map(|record| record.clear()).sum();
                self.shared.table.lock().clear();
                removed
            }
        };
        info!(removed, "objects cleared");
        removed
    }

    // -----------------------------------------------------------------------
    // Load
    // -----------------------------------------------------------------------

    /// Construct every record of `reader` into a new load record.
    ///
    /// Records are built in stream order; an object may only refer to
    /// objects that precede it. Any failure aborts the pass: whatever it
    /// inserted is removed and the table entries it replaced are restored.
    pub fn load_objects(&self, reader: &mut dyn ArchiveReader) -> StoreResult<Arc<LoadRecord>> {
        let record = self.new_record();
        let mut displaced = Vec::new();
        match self.load_into(reader, &record, &mut displaced) {
            Ok(names) => {
                info!(
                    objects = record.len(),
                    names,
                    record = record.id(),
                    "load complete"
                );
                Ok(record)
            }
            Err(e) => {
                let id = record.id();
                let removed = record.clear();
                drop(record);
                let restored = self.restore_entries(displaced, id);
                warn!(record = id, removed, restored, error = %e, "load aborted");
                Err(e)
            }
        }
    }

    fn load_into(
        &self,
        reader: &mut dyn ArchiveReader,
        record: &Arc<LoadRecord>,
        displaced: &mut Vec<(NameHash, TableEntry)>,
    ) -> StoreResult<usize> {
        let base_directory: PathBuf = reader.base_directory().to_path_buf();
        let mut names = 0usize;

        while let Some(stamp) = reader.next_object()? {
            let ctx = LoadContext::new(self, record, stamp, &base_directory);

            if stamp.type_hash == NameTable::TYPE_HASH {
                names += NameTable::load(reader, &ctx)?.len();
                continue;
            }

            let registration = self.shared.registry.get(stamp.type_hash).ok_or(
                StoreError::UnknownType {
                    type_hash: stamp.type_hash,
                    name_hash: stamp.name_hash,
                },
            )?;
            let object = (registration.factory)(reader, &ctx)?;
            object.header().assign_name_hash(stamp.name_hash);
            if let Some(entry) = self.live_entry(stamp.name_hash) {
                displaced.push((stamp.name_hash, entry));
            }
            // Loaded objects are owned by their record.
            record.insert_object(object, Some(true))?;
            debug!(
                hash = %stamp.name_hash,
                type_name = registration.type_name,
                "object loaded"
            );
        }
        Ok(names)
    }

    fn live_entry(&self, hash: NameHash) -> Option<TableEntry> {
        self.shared
            .table
            .lock()
            .get(&hash)
            .filter(|entry| entry.object.strong_count() > 0)
            .cloned()
    }

    /// Put back entries an aborted load replaced, newest first, unless
    /// their object is gone or the hash was claimed again meanwhile.
    fn restore_entries(&self, displaced: Vec<(NameHash, TableEntry)>, aborted: u64) -> usize {
        let mut table = self.shared.table.lock();
        let mut restored = 0;
        for (hash, entry) in displaced.into_iter().rev() {
            if entry.record == aborted || entry.object.strong_count() == 0 {
                continue;
            }
            let occupied = table
                .get(&hash)
                .is_some_and(|current| current.object.strong_count() > 0);
            if !occupied {
                table.insert(hash, entry);
                restored += 1;
            }
        }
        restored
    }

    pub fn load_binary<R: Read>(
        &self,
        stream: R,
        base_directory: impl Into<PathBuf>,
    ) -> StoreResult<Arc<LoadRecord>> {
        let mut reader = BinaryArchiveReader::new(stream, base_directory)?;
        self.load_objects(&mut reader)
    }

    pub fn load_json<R: Read>(
        &self,
        stream: R,
        base_directory: impl Into<PathBuf>,
    ) -> StoreResult<Arc<LoadRecord>> {
        let mut reader = JsonArchiveReader::new(stream, base_directory)?;
        self.load_objects(&mut reader)
    }

    /// Load a file of either format, resolving relative paths against the
    /// file's directory.
    pub fn load_file(&self, path: impl AsRef<Path>) -> StoreResult<Arc<LoadRecord>> {
        let path = path.as_ref();
        let base_directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let file = File::open(path)?;
        let mut reader = open_reader(BufReader::new(file), base_directory)?;
        self.load_objects(&mut *reader)
    }

    // -----------------------------------------------------------------------
    // Save
    // -----------------------------------------------------------------------

    fn is_importer(&self, object: &dyn Object) -> bool {
        object.as_importer().is_some()
            || self
                .shared
                .registry
                .get(object.type_hash())
                .is_some_and(|registration| registration.importer)
    }

    fn finish_importers(&self, objects: &[Arc<dyn Object>]) -> StoreResult<()> {
        let timeout = self.shared.config.importer_timeout;
        for object in objects {
            if let Some(importer) = object.as_importer() {
                let hash = object.header().name_hash();
                debug!(%hash, "waiting for importer");
                importer
                    .wait_for_done(timeout)
                    .map_err(|e| StoreError::Timeout { hash, after: e.0 })?;
            }
        }
        Ok(())
    }

    fn write_with_dependencies(
        &self,
        writer: &mut dyn ArchiveWriter,
        object: &Arc<dyn Object>,
        visited: &mut HashSet<NameHash>,
    ) -> StoreResult<()> {
        let hash = object.header().name_hash();
        if writer.has_saved(hash) || !visited.insert(hash) {
            return Ok(());
        }
        if self.is_importer(&**object) {
            return Ok(());
        }
        for dependency in object.dependencies() {
            self.write_with_dependencies(writer, &dependency, visited)?;
        }
        object.save(writer)
    }

    /// Write the objects of `record`, or the whole table, to `writer`.
    ///
    /// Importers are waited on first and are never written. Each object's
    /// dependencies are written before it, each hash at most once, and a
    /// name table of the written hashes follows when enabled.
    pub fn save_objects(
        &self,
        writer: &mut dyn ArchiveWriter,
        record: Option<&Arc<LoadRecord>>,
    ) -> StoreResult<SaveReport> {
        // Importers may add objects while they finish, so collect again
        // until nothing is pending.
        let objects = loop {
            let objects = match record {
                Some(record) => record.objects(),
                None => self.table_objects(),
            };
            let pending: Vec<Arc<dyn Object>> = objects
                .iter()
                .filter(|object| object.as_importer().is_some_and(|importer| !importer.is_done()))
                .cloned()
                .collect();
            if pending.is_empty() {
                break objects;
            }
            self.finish_importers(&pending)?;
        };

        writer.set_record_filter(record.map(|record| Arc::clone(record) as Arc<dyn RecordFilter>));
        let mut visited = HashSet::new();
        let written = objects
            .iter()
            .try_for_each(|object| self.write_with_dependencies(writer, object, &mut visited));
        writer.set_record_filter(None);
        written?;

        let saved = writer.saved_objects().to_vec();
        let mut report = SaveReport {
            objects: saved.len(),
            names: 0,
        };
        if self.shared.config.write_name_table {
            let table = NameTable::from_hashes(&saved);
            if !table.is_empty() {
                report.names = table.len();
                table.save(writer)?;
            }
        }

        info!(
            objects = report.objects,
            names = report.names,
            filtered = record.is_some(),
            "save complete"
        );
        Ok(report)
    }

    /// Save to a binary archive and return the finished stream.
    pub fn save_binary<W: ByteStream>(
        &self,
        stream: W,
        record: Option<&Arc<LoadRecord>>,
    ) -> StoreResult<W> {
        let mut writer = BinaryArchiveWriter::new(stream)?;
        self.save_objects(&mut writer, record)?;
        Ok(writer.into_inner()?)
    }

    /// Save to a structured archive and return the finished stream.
    pub fn save_json<W: Write>(
        &self,
        stream: W,
        options: JsonWriterOptions,
        record: Option<&Arc<LoadRecord>>,
    ) -> StoreResult<W> {
        let mut writer = JsonArchiveWriter::new(stream, options);
        self.save_objects(&mut writer, record)?;
        Ok(writer.into_inner()?)
    }

    /// Save to `path`, choosing the format from its extension.
    pub fn save_file(
        &self,
        path: impl AsRef<Path>,
        record: Option<&Arc<LoadRecord>>,
    ) -> StoreResult<SaveReport> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let format = ArchiveFormat::from_path(path);
        let report = match format {
            ArchiveFormat::Binary => {
                let mut writer = BinaryArchiveWriter::new(file)?;
                let report = self.save_objects(&mut writer, record)?;
                writer.finish()?;
                report
            }
            ArchiveFormat::Json => {
                let mut writer =
                    JsonArchiveWriter::new(BufWriter::new(file), JsonWriterOptions::readable());
                let report = self.save_objects(&mut writer, record)?;
                writer.finish()?;
                report
            }
        };
        debug!(path = %path.display(), %format, "archive written");
        Ok(report)
    }
}

impl fmt::Debug for ObjectDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectDatabase")
            .field("objects", &self.len())
            .field("types", &self.shared.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_database, Mesh, Model};
    use std::io::Cursor;
    use strata_archive::{ObjectStamp, WriterExt};
    use strata_types::TypeHash;

    fn insert(record: &LoadRecord, name: &str, vertices: u32) -> Arc<Mesh> {
        let mesh = Arc::new(Mesh::new(name, vertices));
        record.insert_object(mesh.clone(), None).unwrap();
        mesh
    }

    #[test]
    fn find_and_locate() {
        let db = test_database();
        let record = db.new_record();
        insert(&record, "db::present", 3);

        assert!(db.locate_object(NameHash::new("db::absent")).is_none());
        assert!(matches!(
            db.find_object(NameHash::new("db::absent")),
            Err(StoreError::NotFound(_))
        ));
        let mesh = db.find_object_ref::<Mesh>(NameHash::new("db::present")).unwrap();
        assert_eq!(mesh.vertices, 3);
        assert!(db.locate_object_ref::<Mesh>(NameHash::new("db::present")).is_some());
    }

    #[test]
    fn typed_lookup_reports_mismatch() {
        let db = test_database();
        let record = db.new_record();
        insert(&record, "db::a_mesh", 1);
        let err = db.find_object_ref::<Model>(NameHash::new("db::a_mesh")).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { found, .. } if found == Mesh::TYPE_HASH));
        assert!(db.locate_object_ref::<Model>(NameHash::new("db::a_mesh")).is_none());
    }

    #[test]
    fn colliding_insert_replaces_entry() {
        let db = test_database();
        let first = db.new_record();
        let second = db.new_record();
        insert(&first, "db::contested", 1);
        insert(&second, "db::contested", 2);
        let live = db.find_object_ref::<Mesh>(NameHash::new("db::contested")).unwrap();
        assert_eq!(live.vertices, 2);

        // The first record no longer owns the entry, so clearing it leaves
        // the replacement in place.
        db.clear_objects(Some(&first));
        assert_eq!(
            db.find_object_ref::<Mesh>(NameHash::new("db::contested")).unwrap().vertices,
            2
        );
    }

    #[test]
    fn clear_everything() {
        let db = test_database();
        let a = db.new_record();
        let b = db.new_record();
        insert(&a, "db::clear_a", 1);
        insert(&b, "db::clear_b", 1);
        assert_eq!(db.clear_objects(None), 2);
        assert!(db.is_empty());
        assert!(a.is_empty() && b.is_empty());
    }

    #[test]
    fn hashes_follow_insertion_order() {
        let db = test_database();
        let record = db.new_record();
        for name in ["db::z", "db::y", "db::x"] {
            insert(&record, name, 0);
        }
        assert_eq!(
            db.hashes(),
            vec![NameHash::new("db::z"), NameHash::new("db::y"), NameHash::new("db::x")]
        );
        assert_eq!(db.len(), 3);
    }

    #[test]
    fn unknown_type_aborts_load() {
        let db = test_database();
        let mut writer = BinaryArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
        writer
            .start_object(ObjectStamp::new(
                TypeHash::new("db::Unregistered"),
                NameHash::new("db::orphan"),
            ))
            .unwrap();
        writer.write("x", 1u8).unwrap();
        let bytes = writer.into_inner().unwrap().into_inner();

        let err = db.load_binary(Cursor::new(bytes), ".").unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnknownType { name_hash, .. } if name_hash == NameHash::new("db::orphan")
        ));
        assert!(db.is_empty());
    }

    #[test]
    fn failed_load_leaves_nothing_behind() {
        let db = test_database();
        let source = db.new_record();
        insert(&source, "db::partial_ok", 1);
        let bytes = db.save_binary(Cursor::new(Vec::new()), Some(&source)).unwrap().into_inner();
        drop(source);

        // Truncate inside the name table so the pass fails after the mesh
        // was constructed.
        let truncated = bytes[..bytes.len() - 3].to_vec();
        assert!(db.load_binary(Cursor::new(truncated), ".").is_err());
        assert!(db.is_empty());
    }

    #[test]
    fn failed_load_restores_replaced_entries() {
        let db = test_database();
        let keep = db.new_record();
        insert(&keep, "db::survivor", 1);
        let hash = NameHash::new("db::survivor");
        let before = db.hashes();

        // A mesh claiming the same hash, then a record nobody can construct.
        let mut writer = BinaryArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
        Mesh::with_hash(hash, 2).save(&mut writer).unwrap();
        writer
            .start_object(ObjectStamp::new(
                TypeHash::new("db::Unregistered"),
                NameHash::new("db::after"),
            ))
            .unwrap();
        writer.write("x", 1u8).unwrap();
        let bytes = writer.into_inner().unwrap().into_inner();

        assert!(db.load_binary(Cursor::new(bytes), ".").is_err());
        assert_eq!(db.hashes(), before);
        assert_eq!(db.find_object_ref::<Mesh>(hash).unwrap().vertices, 1);
        assert!(keep.has_object(hash));

        // The restored entry still belongs to its record.
        assert_eq!(keep.clear(), 1);
        assert!(db.locate_object(hash).is_none());
    }

    #[test]
    fn dropped_untracked_object_is_pruned() {
        let db = test_database();
        let record = db.new_record();
        let mesh = Arc::new(Mesh::new("db::borrowed", 4));
        record.insert_object(mesh.clone(), Some(false)).unwrap();
        let other = Arc::new(Mesh::new("db::borrowed_too", 4));
        record.insert_object(other.clone(), Some(false)).unwrap();
        assert_eq!(db.table_entries(), 2);

        drop(mesh);
        assert!(db.locate_object(NameHash::new("db::borrowed")).is_none());
        assert_eq!(db.table_entries(), 1);

        drop(other);
        assert!(db.hashes().is_empty());
        assert_eq!(db.table_entries(), 0);
    }

    #[test]
    fn save_without_name_table() {
        let registry = Arc::clone(test_database().registry());
        let db = ObjectDatabase::with_config(
            registry,
            DatabaseConfig {
                write_name_table: false,
                ..DatabaseConfig::default()
            },
        );
        let record = db.new_record();
        insert(&record, "db::no_table", 1);
        let mut writer = BinaryArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
        let report = db.save_objects(&mut writer, None).unwrap();
        assert_eq!(report, SaveReport { objects: 1, names: 0 });
        let bytes = writer.into_inner().unwrap().into_inner();
        let header = strata_archive::BinaryHeader::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(header.object_count, 1);
    }

    #[test]
    fn file_roundtrip_in_both_formats() {
        let dir = tempfile::tempdir().unwrap();
        for file_name in ["scene.strata", "scene.json"] {
            let db = test_database();
            let record = db.new_record();
            insert(&record, "db::on_disk", 12);
            let path = dir.path().join(file_name);
            let report = db.save_file(&path, Some(&record)).unwrap();
            assert_eq!(report.objects, 1);

            let fresh = test_database();
            let loaded = fresh.load_file(&path).unwrap();
            assert_eq!(loaded.hashes(), vec![NameHash::new("db::on_disk")]);
            let mesh = fresh.find_object_ref::<Mesh>(NameHash::new("db::on_disk")).unwrap();
            assert_eq!(mesh.vertices, 12);
        }
    }
}
