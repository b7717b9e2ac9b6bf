use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use strata_archive::RecordFilter;
use strata_types::NameHash;
use tracing::debug;

use crate::database::ObjectDatabase;
use crate::error::{StoreError, StoreResult};
use crate::object::{LinkState, Object};

enum Held {
    /// The record owns a reference.
    Strong(Arc<dyn Object>),
    /// The caller owns the object; the record only tracks it.
    Tracked(Weak<dyn Object>),
}

impl Held {
    fn get(&self) -> Option<Arc<dyn Object>> {
        match self {
            Held::Strong(object) => Some(Arc::clone(object)),
            Held::Tracked(object) => object.upgrade(),
        }
    }
}

struct Entry {
    hash: NameHash,
    held: Held,
}

/// The objects produced by one load, or gathered by a caller, in insertion
/// order.
///
/// A record keeps the object table and its own list consistent: inserting
/// links the object and imports it into the database, removing takes it
/// out of the table before unlinking it. Dropping the last handle removes
/// everything the record still holds from the database.
pub struct LoadRecord {
    id: u64,
    database: ObjectDatabase,
    entries: Mutex<Vec<Entry>>,
}

impl LoadRecord {
    pub(crate) fn new(id: u64, database: ObjectDatabase) -> Self {
        Self {
            id,
            database,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn database(&self) -> &ObjectDatabase {
        &self.database
    }

    /// Link `object` into this record and the database.
    ///
    /// With `is_referenced` unset, the type registry decides whether the
    /// record takes a reference. Taking one adds exactly one strong count;
    /// otherwise the caller stays responsible for keeping the object alive.
    pub fn insert_object(
        &self,
        object: Arc<dyn Object>,
        is_referenced: Option<bool>,
    ) -> StoreResult<()> {
        let header = object.header();
        let hash = header.name_hash();
        if hash.is_null() {
            return Err(StoreError::UnnamedObject {
                type_hash: object.type_hash(),
            });
        }
        match header.try_link(self.id) {
            Ok(()) => {}
            Err(LinkState::Linked(record)) => {
                return Err(StoreError::AlreadyLinked { hash, record });
            }
            Err(_) => return Err(StoreError::ClonedObject(hash)),
        }

        let referenced = is_referenced.unwrap_or_else(|| {
            self.database
                .registry()
                .get(object.type_hash())
                .map_or(true, |registration| registration.reference_counted)
        });
        let held = if referenced {
            Held::Strong(Arc::clone(&object))
        } else {
            Held::Tracked(Arc::downgrade(&object))
        };
        self.entries.lock().push(Entry { hash, held });
        self.database.import_object(&object, self.id);
        debug!(%hash, record = self.id, referenced, "object inserted");
        Ok(())
    }

    /// Take the object with `hash` out of the database and this record.
    /// Returns `false` if the record does not hold it.
    pub fn remove_object(&self, hash: NameHash) -> bool {
        if !self.has_object(hash) {
            return false;
        }
        self.database.remove_object(hash, self.id);
        let entry = {
            let mut entries = self.entries.lock();
            match entries.iter().position(|entry| entry.hash == hash) {
                Some(index) => entries.remove(index),
                None => return false,
            }
        };
        if let Some(object) = entry.held.get() {
            object.header().unlink(self.id);
        }
        debug!(%hash, record = self.id, "object removed");
        true
    }

    /// Linear scan of the record's objects.
    pub fn has_object(&self, hash: NameHash) -> bool {
        self.entries.lock().iter().any(|entry| entry.hash == hash)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Hashes in insertion order.
    pub fn hashes(&self) -> Vec<NameHash> {
        self.entries.lock().iter().map(|entry| entry.hash).collect()
    }

    /// Live objects in insertion order.
    pub fn objects(&self) -> Vec<Arc<dyn Object>> {
        self.entries.lock().iter().filter_map(|entry| entry.held.get()).collect()
    }

    /// Remove every object from the database and from this record.
    pub fn clear(&self) -> usize {
        let hashes = self.hashes();
        self.database.remove_objects(&hashes, self.id);
        let entries = std::mem::take(&mut *self.entries.lock());
        self.release(entries)
    }

    fn release(&self, entries: Vec<Entry>) -> usize {
        let count = entries.len();
        for entry in entries {
            if let Some(object) = entry.held.get() {
                object.header().unlink(self.id);
            }
        }
        if count > 0 {
            debug!(record = self.id, count, "load record cleared");
        }
        count
    }
}

impl RecordFilter for LoadRecord {
    fn contains(&self, hash: NameHash) -> bool {
        self.has_object(hash)
    }
}

impl Drop for LoadRecord {
    fn drop(&mut self) {
        let entries = std::mem::take(self.entries.get_mut());
        let hashes: Vec<NameHash> = entries.iter().map(|entry| entry.hash).collect();
        self.database.remove_objects(&hashes, self.id);
        self.release(entries);
    }
}

impl fmt::Debug for LoadRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadRecord")
            .field("id", &self.id)
            .field("objects", &self.len())
            .finish()
    }
}
