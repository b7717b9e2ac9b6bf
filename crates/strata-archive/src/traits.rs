use std::path::Path;
use std::sync::Arc;

use strata_types::{NameHash, TypeHash};

use crate::error::{ArchiveError, ArchiveResult};
use crate::value::{ArchiveEnum, ArchiveFlags, Primitive, Scalar, ScalarKind};

/// The identity header of one archived record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectStamp {
    pub type_hash: TypeHash,
    pub name_hash: NameHash,
}

impl ObjectStamp {
    pub fn new(type_hash: TypeHash, name_hash: NameHash) -> Self {
        Self {
            type_hash,
            name_hash,
        }
    }
}

/// Membership test used by writers to save only one load's objects.
pub trait RecordFilter: Send + Sync {
    fn contains(&self, hash: NameHash) -> bool;
}

/// Reads a stream of archived records.
///
/// `next_object` advances to the next record. Field reads are keyed by
/// name and return `Ok(None)` when the current record has no such field.
///
/// The structured archive looks fields up by name, so read order is free.
/// The binary archive stores no field names: fields must be read in
/// exactly the order they were written, and every named read simply
/// consumes the next value.
pub trait ArchiveReader {
    /// Advance to the next record. Returns `Ok(None)` at the end.
    fn next_object(&mut self) -> ArchiveResult<Option<ObjectStamp>>;

    /// Directory against which relative paths in field values resolve.
    fn base_directory(&self) -> &Path;

    fn read_scalar(&mut self, field: &str, kind: ScalarKind) -> ArchiveResult<Option<Scalar>>;

    fn read_string(&mut self, field: &str) -> ArchiveResult<Option<String>>;

    /// Fill `dest` with the little-endian encoding of an array of `kind`
    /// elements. `dest.len()` must be a multiple of `kind.width()`.
    /// Returns `Ok(false)` if the field is absent.
    fn read_raw(&mut self, field: &str, kind: ScalarKind, dest: &mut [u8]) -> ArchiveResult<bool>;

    /// Read an array field of `len` bytes into a new vector.
    ///
    /// `len` usually comes from the archive itself. The provided version
    /// allocates it up front; the built-in readers fail on a short field
    /// before allocating more than the field holds.
    fn read_raw_vec(
        &mut self,
        field: &str,
        kind: ScalarKind,
        len: u64,
    ) -> ArchiveResult<Option<Vec<u8>>> {
        let len = usize::try_from(len).map_err(|_| {
            ArchiveError::invalid(field, format!("{len} bytes does not fit in memory"))
        })?;
        let mut bytes = vec![0u8; len];
        Ok(self.read_raw(field, kind, &mut bytes)?.then_some(bytes))
    }

    /// Read a variable-length byte payload written by [`ArchiveWriter::write_blob`].
    fn read_blob(&mut self, field: &str) -> ArchiveResult<Option<Vec<u8>>>;

    fn read_bool(&mut self, field: &str) -> ArchiveResult<Option<bool>> {
        Ok(self
            .read_scalar(field, ScalarKind::U8)?
            .and_then(|s| s.as_integer())
            .map(|v| v != 0))
    }

    fn read_name_hash(&mut self, field: &str) -> ArchiveResult<Option<NameHash>> {
        Ok(self
            .read_scalar(field, ScalarKind::U64)?
            .and_then(u64::from_scalar)
            .map(NameHash::from_raw))
    }

    /// Read an enumeration index, validated against `names.len()`.
    fn read_enum_index(&mut self, field: &str, names: &[&str]) -> ArchiveResult<Option<u32>> {
        let Some(index) = self.read_scalar(field, ScalarKind::U32)?.and_then(u32::from_scalar)
        else {
            return Ok(None);
        };
        check_enum_range(field, u64::from(index), names.len()).map(Some)
    }

    /// Read a flag-set bitmask.
    fn read_flag_bits(
        &mut self,
        field: &str,
        _flags: &[(&str, u64)],
    ) -> ArchiveResult<Option<u64>> {
        Ok(self
            .read_scalar(field, ScalarKind::U64)?
            .and_then(u64::from_scalar))
    }
}

/// Writes a stream of archived records.
///
/// `start_object` opens a record. It returns `Ok(false)` when the record is
/// suppressed, either because the same name hash was already written in
/// this pass or because a record filter is active and excludes it. Field
/// writes for a suppressed record are silently discarded.
pub trait ArchiveWriter {
    fn start_object(&mut self, stamp: ObjectStamp) -> ArchiveResult<bool>;

    /// Restrict this pass to objects accepted by `filter`.
    fn set_record_filter(&mut self, filter: Option<Arc<dyn RecordFilter>>);

    /// Hashes of every record written so far, in write order.
    fn saved_objects(&self) -> &[NameHash];

    /// Returns `true` if a record with `hash` was already written.
    fn has_saved(&self, hash: NameHash) -> bool;

    fn write_scalar(&mut self, field: &str, value: Scalar) -> ArchiveResult<()>;

    fn write_string(&mut self, field: &str, value: &str) -> ArchiveResult<()>;

    /// Write an array of `kind` elements given as little-endian bytes.
    fn write_raw(&mut self, field: &str, kind: ScalarKind, bytes: &[u8]) -> ArchiveResult<()>;

    /// Write a variable-length byte payload.
    fn write_blob(&mut self, field: &str, bytes: &[u8]) -> ArchiveResult<()>;

    fn write_bool(&mut self, field: &str, value: bool) -> ArchiveResult<()> {
        self.write_scalar(field, Scalar::U8(u8::from(value)))
    }

    fn write_name_hash(&mut self, field: &str, value: NameHash) -> ArchiveResult<()> {
        self.write_scalar(field, Scalar::U64(value.raw()))
    }

    fn write_enum_index(&mut self, field: &str, index: u32, names: &[&str]) -> ArchiveResult<()> {
        check_enum_range(field, u64::from(index), names.len())?;
        self.write_scalar(field, Scalar::U32(index))
    }

    fn write_flag_bits(
        &mut self,
        field: &str,
        bits: u64,
        _flags: &[(&str, u64)],
    ) -> ArchiveResult<()> {
        self.write_scalar(field, Scalar::U64(bits))
    }
}

pub(crate) fn check_enum_range(field: &str, value: u64, count: usize) -> ArchiveResult<u32> {
    match u32::try_from(value) {
        Ok(index) if (index as usize) < count => Ok(index),
        _ => Err(ArchiveError::EnumOutOfRange {
            field: field.to_owned(),
            value,
            count,
        }),
    }
}

fn missing(field: &str) -> ArchiveError {
    ArchiveError::MissingField {
        field: field.to_owned(),
    }
}

/// Typed convenience reads on top of [`ArchiveReader`].
///
/// `read_*` returns `Ok(None)` for an absent field; `require_*` turns an
/// absent field into [`ArchiveError::MissingField`].
pub trait ReaderExt: ArchiveReader {
    fn read<T: Primitive>(&mut self, field: &str) -> ArchiveResult<Option<T>> {
        match self.read_scalar(field, T::KIND)? {
            Some(scalar) => T::from_scalar(scalar)
                .map(Some)
                .ok_or_else(|| ArchiveError::invalid(field, format!("expected {}", T::KIND))),
            None => Ok(None),
        }
    }

    fn require<T: Primitive>(&mut self, field: &str) -> ArchiveResult<T> {
        self.read(field)?.ok_or_else(|| missing(field))
    }

    fn require_string(&mut self, field: &str) -> ArchiveResult<String> {
        self.read_string(field)?.ok_or_else(|| missing(field))
    }

    fn require_bool(&mut self, field: &str) -> ArchiveResult<bool> {
        self.read_bool(field)?.ok_or_else(|| missing(field))
    }

    fn require_name_hash(&mut self, field: &str) -> ArchiveResult<NameHash> {
        self.read_name_hash(field)?.ok_or_else(|| missing(field))
    }

    fn require_blob(&mut self, field: &str) -> ArchiveResult<Vec<u8>> {
        self.read_blob(field)?.ok_or_else(|| missing(field))
    }

    fn read_enum<E: ArchiveEnum>(&mut self, field: &str) -> ArchiveResult<Option<E>> {
        match self.read_enum_index(field, E::NAMES)? {
            Some(index) => E::from_index(index).map(Some).ok_or_else(|| {
                ArchiveError::EnumOutOfRange {
                    field: field.to_owned(),
                    value: u64::from(index),
                    count: E::NAMES.len(),
                }
            }),
            None => Ok(None),
        }
    }

    fn require_enum<E: ArchiveEnum>(&mut self, field: &str) -> ArchiveResult<E> {
        self.read_enum(field)?.ok_or_else(|| missing(field))
    }

    fn read_flags<F: ArchiveFlags>(&mut self, field: &str) -> ArchiveResult<Option<F>> {
        Ok(self.read_flag_bits(field, F::FLAGS)?.map(F::from_bits))
    }

    fn require_flags<F: ArchiveFlags>(&mut self, field: &str) -> ArchiveResult<F> {
        self.read_flags(field)?.ok_or_else(|| missing(field))
    }

    /// Fill `dest` from an array field. Returns `Ok(false)` if absent.
    fn read_array<T: Primitive>(&mut self, field: &str, dest: &mut [T]) -> ArchiveResult<bool> {
        let width = T::KIND.width();
        let mut bytes = vec![0u8; dest.len() * width];
        if !self.read_raw(field, T::KIND, &mut bytes)? {
            return Ok(false);
        }
        for (slot, chunk) in dest.iter_mut().zip(bytes.chunks_exact(width)) {
            *slot = Scalar::read_le(T::KIND, chunk)
                .and_then(T::from_scalar)
                .ok_or_else(|| ArchiveError::invalid(field, "array element decode failed"))?;
        }
        Ok(true)
    }

    fn require_array<T: Primitive>(&mut self, field: &str, dest: &mut [T]) -> ArchiveResult<()> {
        if self.read_array(field, dest)? {
            Ok(())
        } else {
            Err(missing(field))
        }
    }
}

impl<R: ArchiveReader + ?Sized> ReaderExt for R {}

/// Typed convenience writes on top of [`ArchiveWriter`].
pub trait WriterExt: ArchiveWriter {
    fn write<T: Primitive>(&mut self, field: &str, value: T) -> ArchiveResult<()> {
        self.write_scalar(field, value.into_scalar())
    }

    fn write_enum<E: ArchiveEnum>(&mut self, field: &str, value: E) -> ArchiveResult<()> {
        self.write_enum_index(field, value.index(), E::NAMES)
    }

    fn write_flags<F: ArchiveFlags>(&mut self, field: &str, value: F) -> ArchiveResult<()> {
        self.write_flag_bits(field, value.bits(), F::FLAGS)
    }

    fn write_array<T: Primitive>(&mut self, field: &str, values: &[T]) -> ArchiveResult<()> {
        let mut bytes = Vec::with_capacity(values.len() * T::KIND.width());
        for value in values {
            value.into_scalar().write_le(&mut bytes);
        }
        self.write_raw(field, T::KIND, &bytes)
    }
}

impl<W: ArchiveWriter + ?Sized> WriterExt for W {}
