//! Hash-keyed object database for Strata.
//!
//! Objects are identified by the hash of their name and persisted through
//! the archive formats of `strata-archive`. Loading is a single forward
//! pass over an archive; each pass produces a [`LoadRecord`] that owns the
//! objects it constructed and unregisters them when dropped. Saving writes
//! every object's dependencies before the object itself, each hash at most
//! once, so any archive this crate writes can be loaded back in one pass.
//!
//! # Key Types
//!
//! - [`ObjectDatabase`]: the object table with load and save orchestration
//! - [`LoadRecord`]: the objects of one load, in insertion order
//! - [`Object`] / [`Serializable`]: the persistable object protocol
//! - [`TypeRegistry`]: type hash to factory mapping, filled before loading
//! - [`ObjectRef`]: a typed reference to another object, written by hash
//! - [`WorkItem`] / [`Importer`]: asynchronous work that saving waits for

pub mod builtin;
pub mod config;
pub mod database;
pub mod error;
pub mod object;
pub mod record;
pub mod registry;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use builtin::{BufferObject, NameTable, ObjectMap, NAME_TABLE_NAME};
pub use config::DatabaseConfig;
pub use database::{ObjectDatabase, SaveReport};
pub use error::{StoreError, StoreResult};
pub use object::{
    begin_record, downcast_object, AsAny, LinkState, LoadContext, Object, ObjectHeader, ObjectRef,
    Serializable,
};
pub use record::LoadRecord;
pub use registry::{Factory, TypeRegistration, TypeRegistry};
pub use task::{Importer, Timeout, WorkItem};

// Re-export the identity and archive types every user of the database needs.
pub use strata_archive::{ArchiveReader, ArchiveWriter, JsonWriterOptions, ReaderExt, WriterExt};
pub use strata_buffer::ReferencedBuffer;
pub use strata_types::{NameHash, TypeHash};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_database, test_registry, Mesh, Model, SlowImporter};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;
    use strata_archive::{BinaryArchiveReader, BinaryArchiveWriter, ObjectStamp};
    use strata_types::names;

    fn scene(db: &ObjectDatabase, prefix: &str) -> (Arc<LoadRecord>, Arc<Mesh>, Arc<Model>) {
        let record = db.new_record();
        let mesh = Arc::new(Mesh::new(&format!("{prefix}::mesh"), 24));
        let model = Arc::new(Model::new(&format!("{prefix}::model"), mesh.clone(), 2.5));
        // The model goes in first; saving still has to emit the mesh before it.
        record.insert_object(model.clone(), None).unwrap();
        record.insert_object(mesh.clone(), None).unwrap();
        (record, mesh, model)
    }

    fn stamps(bytes: Vec<u8>) -> Vec<ObjectStamp> {
        let mut reader = BinaryArchiveReader::new(Cursor::new(bytes), ".").unwrap();
        let mut out = Vec::new();
        while let Some(stamp) = reader.next_object().unwrap() {
            skip_fields(&mut reader, stamp.type_hash);
            out.push(stamp);
        }
        out
    }

    // Binary fields are positional, so walking the stream means reading
    // each record's fields in order.
    fn skip_fields(reader: &mut dyn ArchiveReader, type_hash: TypeHash) {
        if type_hash == Mesh::TYPE_HASH {
            reader.require::<u32>("vertices").unwrap();
            reader.require_string("label").unwrap();
        } else if type_hash == Model::TYPE_HASH {
            reader.require_name_hash("mesh").unwrap();
            reader.require::<f32>("scale").unwrap();
        } else if type_hash == NameTable::TYPE_HASH {
            NameTable::read_from(reader).unwrap();
        }
    }

    // -----------------------------------------------------------------------
    // Round trips
    // -----------------------------------------------------------------------

    #[test]
    fn binary_roundtrip_restores_graph() {
        let db = test_database();
        let (record, _, _) = scene(&db, "scenario::bin");
        let bytes = db.save_binary(Cursor::new(Vec::new()), Some(&record)).unwrap().into_inner();

        let fresh = test_database();
        let loaded = fresh.load_binary(Cursor::new(bytes), ".").unwrap();
        assert_eq!(loaded.len(), 2);
        let model = fresh.find_object_ref::<Model>(NameHash::new("scenario::bin::model")).unwrap();
        let mesh = fresh.find_object_ref::<Mesh>(NameHash::new("scenario::bin::mesh")).unwrap();
        assert_eq!(model.scale, 2.5);
        assert_eq!(mesh.vertices, 24);
        assert_eq!(mesh.label, "24 vertices");
        assert!(Arc::ptr_eq(model.mesh.get(), &mesh));
    }

    #[test]
    fn json_roundtrip_restores_graph() {
        let db = test_database();
        let (record, _, _) = scene(&db, "scenario::json");
        let bytes = db
            .save_json(Vec::new(), JsonWriterOptions::readable(), Some(&record))
            .unwrap();

        let fresh = test_database();
        let loaded = fresh.load_json(Cursor::new(bytes), ".").unwrap();
        assert_eq!(
            loaded.hashes(),
            vec![NameHash::new("scenario::json::mesh"), NameHash::new("scenario::json::model")]
        );
        let model = fresh.find_object_ref::<Model>(NameHash::new("scenario::json::model")).unwrap();
        assert_eq!(model.mesh.hash(), NameHash::new("scenario::json::mesh"));
        assert_eq!(model.mesh.vertices, 24);
    }

    // -----------------------------------------------------------------------
    // Ordering and deduplication
    // -----------------------------------------------------------------------

    #[test]
    fn dependency_is_written_before_dependent() {
        let db = test_database();
        let (record, _, _) = scene(&db, "scenario::order");
        let bytes = db.save_binary(Cursor::new(Vec::new()), Some(&record)).unwrap().into_inner();
        let order: Vec<NameHash> = stamps(bytes).into_iter().map(|s| s.name_hash).collect();
        assert_eq!(
            order,
            vec![
                NameHash::new("scenario::order::mesh"),
                NameHash::new("scenario::order::model"),
                NameHash::new(NAME_TABLE_NAME),
            ]
        );
    }

    #[test]
    fn dependent_before_dependency_fails_to_load() {
        let mesh = Mesh::new("scenario::late::mesh", 3);
        let model = Model::new("scenario::late::model", Arc::new(mesh.clone()), 1.0);
        let mut writer = BinaryArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
        model.save(&mut writer).unwrap();
        mesh.save(&mut writer).unwrap();
        let bytes = writer.into_inner().unwrap().into_inner();

        let db = test_database();
        let err = db.load_binary(Cursor::new(bytes), ".").unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotFound(hash) if hash == NameHash::new("scenario::late::mesh")
        ));
        assert!(db.is_empty());
    }

    #[test]
    fn shared_dependency_is_written_once() {
        let db = test_database();
        let record = db.new_record();
        let mesh = Arc::new(Mesh::new("scenario::shared::mesh", 8));
        for name in ["scenario::shared::left", "scenario::shared::right"] {
            record
                .insert_object(Arc::new(Model::new(name, mesh.clone(), 1.0)), None)
                .unwrap();
        }
        record.insert_object(mesh, None).unwrap();

        let mut writer = BinaryArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
        let report = db.save_objects(&mut writer, None).unwrap();
        assert_eq!(report.objects, 3);
        let bytes = writer.into_inner().unwrap().into_inner();
        let meshes = stamps(bytes)
            .into_iter()
            .filter(|s| s.type_hash == Mesh::TYPE_HASH)
            .count();
        assert_eq!(meshes, 1);
    }

    #[test]
    fn record_filter_limits_the_save() {
        let db = test_database();
        let (first, _, _) = scene(&db, "scenario::filter_a");
        let (_second, _, _) = scene(&db, "scenario::filter_b");
        let mut writer = BinaryArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
        let report = db.save_objects(&mut writer, Some(&first)).unwrap();
        assert_eq!(report.objects, 2);
        let table = NameHash::new(NAME_TABLE_NAME);
        let saved: Vec<NameHash> = writer
            .saved_objects()
            .iter()
            .copied()
            .filter(|hash| *hash != table)
            .collect();
        assert_eq!(saved.len(), 2);
        assert!(saved.iter().all(|hash| first.has_object(*hash)));
    }

    // -----------------------------------------------------------------------
    // Lifetime
    // -----------------------------------------------------------------------

    #[test]
    fn load_records_are_isolated() {
        let source = test_database();
        let (a, _, _) = scene(&source, "scenario::iso_a");
        let (b, _, _) = scene(&source, "scenario::iso_b");
        let bytes_a = source.save_binary(Cursor::new(Vec::new()), Some(&a)).unwrap().into_inner();
        let bytes_b = source.save_binary(Cursor::new(Vec::new()), Some(&b)).unwrap().into_inner();

        let db = test_database();
        let first = db.load_binary(Cursor::new(bytes_a), ".").unwrap();
        let second = db.load_binary(Cursor::new(bytes_b), ".").unwrap();
        assert_eq!(db.len(), 4);

        assert_eq!(db.clear_objects(Some(&first)), 2);
        assert!(!db.contains(NameHash::new("scenario::iso_a::model")));
        assert!(db.contains(NameHash::new("scenario::iso_b::model")));
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn loaded_object_outlives_its_record_only_through_caller() {
        let source = test_database();
        let (record, _, _) = scene(&source, "scenario::outlive");
        let bytes = source
            .save_binary(Cursor::new(Vec::new()), Some(&record))
            .unwrap()
            .into_inner();

        let db = test_database();
        let loaded = db.load_binary(Cursor::new(bytes), ".").unwrap();
        let hash = NameHash::new("scenario::outlive::model");
        let model = db.find_object(hash).unwrap();
        // One count held by the record, one by us.
        assert_eq!(Arc::strong_count(&model), 2);

        drop(loaded);
        assert_eq!(Arc::strong_count(&model), 1);
        assert!(db.locate_object(hash).is_none());
        assert_eq!(model.header().link_state(), LinkState::Unlinked);
    }

    #[test]
    fn empty_database_locates_nothing() {
        let db = test_database();
        assert!(db.locate_object(NameHash::new("scenario::nothing")).is_none());
        assert!(db.is_empty());
        assert!(db.hashes().is_empty());
    }

    // -----------------------------------------------------------------------
    // Buffers
    // -----------------------------------------------------------------------

    #[test]
    fn buffer_object_survives_json_as_base64() {
        let db = test_database();
        let record = db.new_record();
        let bytes: Vec<u8> = (0u8..12).collect();
        let hash = NameHash::new("scenario::pixels");
        let object = BufferObject::new(
            ObjectHeader::named("scenario::pixels"),
            Arc::new(ReferencedBuffer::from_vec(bytes.clone())),
        );
        record.insert_object(Arc::new(object), None).unwrap();

        let json = db
            .save_json(Vec::new(), JsonWriterOptions::default(), Some(&record))
            .unwrap();
        let document: serde_json::Value = serde_json::from_slice(&json).unwrap();
        let entry = &document[hash.to_hex()];
        assert_eq!(entry["size"], 12);
        assert_eq!(entry["data"], "AAECAwQFBgcICQoL");

        let fresh = test_database();
        let _loaded = fresh.load_json(Cursor::new(json), ".").unwrap();
        let loaded = fresh.find_object_ref::<BufferObject>(hash).unwrap();
        assert_eq!(loaded.buffer().to_vec().unwrap(), bytes);
    }

    // -----------------------------------------------------------------------
    // Importers
    // -----------------------------------------------------------------------

    #[test]
    fn save_waits_for_importers_and_skips_them() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let work = WorkItem::submit(move || {
            std::thread::sleep(Duration::from_millis(30));
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        let db = test_database();
        let record = db.new_record();
        record
            .insert_object(Arc::new(SlowImporter::new("scenario::importer", work)), None)
            .unwrap();
        record
            .insert_object(Arc::new(Mesh::new("scenario::imported_mesh", 5)), None)
            .unwrap();

        let mut writer = BinaryArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
        let report = db.save_objects(&mut writer, Some(&record)).unwrap();
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(report.objects, 1);
        assert!(!writer.has_saved(NameHash::new("scenario::importer")));
    }

    #[test]
    fn objects_added_by_a_finishing_importer_are_saved() {
        let db = test_database();
        let record = db.new_record();
        let target = Arc::clone(&record);
        let work = WorkItem::submit(move || {
            std::thread::sleep(Duration::from_millis(50));
            target
                .insert_object(Arc::new(Mesh::new("scenario::late_import", 3)), None)
                .expect("late insert");
        })
        .unwrap();
        record
            .insert_object(Arc::new(SlowImporter::new("scenario::late_importer", work)), None)
            .unwrap();

        let mut writer = BinaryArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
        let report = db.save_objects(&mut writer, None).unwrap();
        assert!(writer.has_saved(NameHash::new("scenario::late_import")));
        assert_eq!(report.objects, 1);
    }

    #[test]
    fn importer_wait_can_time_out() {
        let (release, gate) = mpsc::channel::<()>();
        let work = WorkItem::submit(move || {
            gate.recv().ok();
        })
        .unwrap();

        let db = ObjectDatabase::with_config(
            Arc::new(test_registry()),
            DatabaseConfig {
                importer_timeout: Some(Duration::from_millis(20)),
                ..DatabaseConfig::default()
            },
        );
        let record = db.new_record();
        record
            .insert_object(Arc::new(SlowImporter::new("scenario::stuck", work)), None)
            .unwrap();

        let mut writer = BinaryArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
        let err = db.save_objects(&mut writer, None).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Timeout { hash, after } if hash == NameHash::new("scenario::stuck")
                && after == Duration::from_millis(20)
        ));
        release.send(()).unwrap();
    }

    // -----------------------------------------------------------------------
    // Names
    // -----------------------------------------------------------------------

    #[test]
    fn name_table_restores_names_and_is_not_retained() {
        let name = "scenario::named_only_by_table";
        let hash = NameHash::new(name);
        assert!(names::lookup(hash).is_none());

        let mut writer = BinaryArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
        Mesh::with_hash(hash, 2).save(&mut writer).unwrap();
        NameTable::new(vec![name.to_owned()]).save(&mut writer).unwrap();
        let bytes = writer.into_inner().unwrap().into_inner();

        let db = test_database();
        let loaded = db.load_binary(Cursor::new(bytes), ".").unwrap();
        assert_eq!(names::lookup(hash).as_deref(), Some(name));
        assert_eq!(loaded.hashes(), vec![hash]);
        assert!(!db.contains(NameHash::new(NAME_TABLE_NAME)));
    }

    #[test]
    fn cloned_object_cannot_be_saved() {
        let mesh = Mesh::new("scenario::clone_save", 1);
        let copy = mesh.clone();
        let mut writer = BinaryArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
        assert!(matches!(copy.save(&mut writer), Err(StoreError::ClonedObject(_))));
        assert!(writer.saved_objects().is_empty());
    }
}
