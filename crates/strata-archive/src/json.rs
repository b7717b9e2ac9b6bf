//! Structured (JSON) archive for tooling and debugging.
//!
//! The document is a single object. Every member whose value is an object
//! is one record, keyed by the hex form of its name hash:
//!
//! ```json
//! {
//!   "a1b2c3d4e5f60718": { "type_hash": 123, "name_hash": 456, "width": 640 },
//!   "d:version": 1
//! }
//! ```
//!
//! A record may give `type_name` instead of `type_hash`, and may omit
//! `name_hash`, in which case the member key itself is the object's name.
//! Raw buffers are written as base64 strings; on read, uniformly numeric
//! arrays are accepted too.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use strata_types::{names, NameHash, TypeHash};
use tracing::{debug, warn};

use crate::error::{ArchiveError, ArchiveResult};
use crate::tracker::WriteTracker;
use crate::traits::{check_enum_range, ArchiveReader, ArchiveWriter, ObjectStamp, RecordFilter};
use crate::value::{format_flag_names, parse_flag_names, Scalar, ScalarKind};

/// Current structured archive version.
pub const JSON_VERSION: u32 = 1;
/// Document-level version member, written after every record.
pub const VERSION_KEY: &str = "d:version";

const TYPE_HASH_KEY: &str = "type_hash";
const TYPE_NAME_KEY: &str = "type_name";
const NAME_HASH_KEY: &str = "name_hash";

/// Output options for [`JsonArchiveWriter`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWriterOptions {
    /// Write booleans as `true`/`false`, enumerations and flag sets by name,
    /// and name hashes as their registered strings where known.
    pub verbose: bool,
    /// Indent the document.
    pub pretty: bool,
}

impl JsonWriterOptions {
    /// Verbose, indented output for hand inspection.
    pub fn readable() -> Self {
        Self {
            verbose: true,
            pretty: true,
        }
    }
}

fn number_to_scalar(field: &str, kind: ScalarKind, n: &Number) -> ArchiveResult<Scalar> {
    let scalar = if let Some(u) = n.as_u64() {
        Scalar::from_integer(kind, i128::from(u))
    } else if let Some(i) = n.as_i64() {
        Scalar::from_integer(kind, i128::from(i))
    } else {
        n.as_f64().and_then(|f| Scalar::from_float(kind, f))
    };
    scalar.ok_or_else(|| ArchiveError::invalid(field, format!("{n} does not fit in {kind}")))
}

fn value_to_scalar(field: &str, kind: ScalarKind, value: &Value) -> ArchiveResult<Scalar> {
    match value {
        Value::Number(n) => number_to_scalar(field, kind, n),
        Value::Bool(b) => Scalar::from_integer(kind, i128::from(u8::from(*b)))
            .ok_or_else(|| ArchiveError::invalid(field, format!("boolean does not fit in {kind}"))),
        Value::String(s) => {
            let parsed = if kind.is_float() {
                s.trim().parse::<f64>().ok().and_then(|f| Scalar::from_float(kind, f))
            } else {
                s.trim().parse::<i128>().ok().and_then(|i| Scalar::from_integer(kind, i))
            };
            parsed.ok_or_else(|| ArchiveError::invalid(field, format!("{s:?} is not a {kind}")))
        }
        other => Err(ArchiveError::invalid(field, format!("expected {kind}, found {other}"))),
    }
}

fn scalar_to_value(field: &str, scalar: Scalar) -> ArchiveResult<Value> {
    let float = |f: f64| {
        Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| ArchiveError::invalid(field, "non-finite float"))
    };
    Ok(match scalar {
        Scalar::U8(v) => Value::from(v),
        Scalar::U16(v) => Value::from(v),
        Scalar::U32(v) => Value::from(v),
        Scalar::U64(v) => Value::from(v),
        Scalar::I8(v) => Value::from(v),
        Scalar::I16(v) => Value::from(v),
        Scalar::I32(v) => Value::from(v),
        Scalar::I64(v) => Value::from(v),
        Scalar::F32(v) => float(f64::from(v))?,
        Scalar::F64(v) => float(v)?,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArrayClass {
    Unsigned,
    Signed,
    Floating,
}

fn classify(field: &str, items: &[Value]) -> ArchiveResult<ArrayClass> {
    let numbers: Option<Vec<&Number>> = items
        .iter()
        .map(|v| match v {
            Value::Number(n) => Some(n),
            _ => None,
        })
        .collect();
    let numbers =
        numbers.ok_or_else(|| ArchiveError::invalid(field, "array is not uniformly numeric"))?;
    if numbers.iter().all(|n| n.is_u64()) {
        Ok(ArrayClass::Unsigned)
    } else if numbers.iter().all(|n| n.is_i64() || n.is_u64()) {
        Ok(ArrayClass::Signed)
    } else {
        Ok(ArrayClass::Floating)
    }
}

/// Copy a numeric array element by element into `dest`, range checking each
/// element against `kind`.
fn copy_numeric_array(
    field: &str,
    kind: ScalarKind,
    items: &[Value],
    dest: &mut [u8],
) -> ArchiveResult<()> {
    let width = kind.width();
    if items.len() * width != dest.len() {
        return Err(ArchiveError::invalid(
            field,
            format!("expected {} elements, found {}", dest.len() / width, items.len()),
        ));
    }
    let class = classify(field, items)?;
    let mut encoded = Vec::with_capacity(8);
    for (index, (item, chunk)) in items.iter().zip(dest.chunks_exact_mut(width)).enumerate() {
        let scalar = item.as_number().and_then(|n| match class {
            ArrayClass::Unsigned => {
                n.as_u64().and_then(|u| Scalar::from_integer(kind, i128::from(u)))
            }
            ArrayClass::Signed => {
                n.as_i64().and_then(|i| Scalar::from_integer(kind, i128::from(i)))
            }
            ArrayClass::Floating => n.as_f64().and_then(|f| Scalar::from_float(kind, f)),
        });
        let scalar = scalar.ok_or_else(|| {
            ArchiveError::invalid(field, format!("element {index} does not fit in {kind}"))
        })?;
        encoded.clear();
        scalar.write_le(&mut encoded);
        chunk.copy_from_slice(&encoded);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Reader over a structured archive. Field order within a record is free.
pub struct JsonArchiveReader {
    base_directory: PathBuf,
    records: std::vec::IntoIter<(String, Map<String, Value>)>,
    current: Option<Map<String, Value>>,
}

impl JsonArchiveReader {
    /// Parse a whole document from `stream`.
    pub fn new<R: Read>(stream: R, base_directory: impl Into<PathBuf>) -> ArchiveResult<Self> {
        let document: Value = serde_json::from_reader(stream)?;
        Self::from_value(document, base_directory)
    }

    /// Read from an already parsed document.
    pub fn from_value(document: Value, base_directory: impl Into<PathBuf>) -> ArchiveResult<Self> {
        let Value::Object(members) = document else {
            return Err(ArchiveError::InvalidDocument(
                "top level must be an object".into(),
            ));
        };
        if let Some(version) = members.get(VERSION_KEY) {
            let version = version
                .as_u64()
                .ok_or_else(|| ArchiveError::invalid(VERSION_KEY, "version must be a number"))?;
            if version != u64::from(JSON_VERSION) {
                return Err(ArchiveError::UnsupportedVersion(
                    u32::try_from(version).unwrap_or(u32::MAX),
                ));
            }
        }
        let records: Vec<(String, Map<String, Value>)> = members
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::Object(record) => Some((key, record)),
                _ => None,
            })
            .collect();
        debug!(records = records.len(), "structured archive opened");
        Ok(Self {
            base_directory: base_directory.into(),
            records: records.into_iter(),
            current: None,
        })
    }

    /// Records not yet visited.
    pub fn remaining(&self) -> usize {
        self.records.len()
    }

    fn field(&self, field: &str) -> ArchiveResult<Option<&Value>> {
        let record = self.current.as_ref().ok_or(ArchiveError::NoActiveObject)?;
        Ok(record.get(field).filter(|v| !v.is_null()))
    }
}

impl ArchiveReader for JsonArchiveReader {
    fn next_object(&mut self) -> ArchiveResult<Option<ObjectStamp>> {
        let Some((key, record)) = self.records.next() else {
            self.current = None;
            return Ok(None);
        };

        let type_hash = match (record.get(TYPE_HASH_KEY), record.get(TYPE_NAME_KEY)) {
            (Some(value), _) => value
                .as_u64()
                .map(TypeHash::from_raw)
                .ok_or_else(|| ArchiveError::invalid(TYPE_HASH_KEY, "expected u64"))?,
            (None, Some(Value::String(type_name))) => TypeHash::new(type_name),
            (None, Some(_)) => {
                return Err(ArchiveError::invalid(TYPE_NAME_KEY, "expected string"));
            }
            (None, None) => {
                return Err(ArchiveError::MissingField {
                    field: TYPE_HASH_KEY.into(),
                });
            }
        };

        let name_hash = match record.get(NAME_HASH_KEY) {
            Some(Value::Number(n)) => n
                .as_u64()
                .map(NameHash::from_raw)
                .ok_or_else(|| ArchiveError::invalid(NAME_HASH_KEY, "expected u64"))?,
            Some(Value::String(name)) => names::register(name),
            Some(_) => return Err(ArchiveError::invalid(NAME_HASH_KEY, "expected u64 or string")),
            None => names::register(&key),
        };

        self.current = Some(record);
        Ok(Some(ObjectStamp::new(type_hash, name_hash)))
    }

    fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    fn read_scalar(&mut self, field: &str, kind: ScalarKind) -> ArchiveResult<Option<Scalar>> {
        self.field(field)?
            .map(|value| value_to_scalar(field, kind, value))
            .transpose()
    }

    fn read_string(&mut self, field: &str) -> ArchiveResult<Option<String>> {
        match self.field(field)? {
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(ArchiveError::invalid(
                field,
                format!("expected string, found {other}"),
            )),
            None => Ok(None),
        }
    }

    fn read_raw(&mut self, field: &str, kind: ScalarKind, dest: &mut [u8]) -> ArchiveResult<bool> {
        match self.field(field)? {
            Some(Value::String(encoded)) => {
                let bytes = STANDARD.decode(encoded)?;
                if bytes.len() != dest.len() {
                    return Err(ArchiveError::invalid(
                        field,
                        format!("expected {} bytes, decoded {}", dest.len(), bytes.len()),
                    ));
                }
                dest.copy_from_slice(&bytes);
                Ok(true)
            }
            Some(Value::Array(items)) => {
                copy_numeric_array(field, kind, items, dest)?;
                Ok(true)
            }
            Some(other) => Err(ArchiveError::invalid(
                field,
                format!("expected base64 string or numeric array, found {other}"),
            )),
            None => Ok(false),
        }
    }

    fn read_raw_vec(
        &mut self,
        field: &str,
        kind: ScalarKind,
        len: u64,
    ) -> ArchiveResult<Option<Vec<u8>>> {
        let mismatch = |found: u64| {
            ArchiveError::invalid(field, format!("expected {len} bytes, field holds {found}"))
        };
        match self.field(field)? {
            Some(Value::String(encoded)) => {
                let bytes = STANDARD.decode(encoded)?;
                if bytes.len() as u64 != len {
                    return Err(mismatch(bytes.len() as u64));
                }
                if bytes.len() % kind.width() != 0 {
                    return Err(ArchiveError::invalid(
                        field,
                        format!("{} bytes is not a whole number of {kind} elements", bytes.len()),
                    ));
                }
                Ok(Some(bytes))
            }
            Some(Value::Array(items)) => {
                let found = items.len() as u64 * kind.width() as u64;
                if found != len {
                    return Err(mismatch(found));
                }
                let mut bytes = vec![0u8; items.len() * kind.width()];
                copy_numeric_array(field, kind, items, &mut bytes)?;
                Ok(Some(bytes))
            }
            Some(other) => Err(ArchiveError::invalid(
                field,
                format!("expected base64 string or numeric array, found {other}"),
            )),
            None => Ok(None),
        }
    }

    fn read_blob(&mut self, field: &str) -> ArchiveResult<Option<Vec<u8>>> {
        match self.field(field)? {
            Some(Value::String(encoded)) => Ok(Some(STANDARD.decode(encoded)?)),
            Some(Value::Array(items)) => {
                let mut bytes = vec![0u8; items.len()];
                copy_numeric_array(field, ScalarKind::U8, items, &mut bytes)?;
                Ok(Some(bytes))
            }
            Some(other) => Err(ArchiveError::invalid(
                field,
                format!("expected base64 string or byte array, found {other}"),
            )),
            None => Ok(None),
        }
    }

    fn read_bool(&mut self, field: &str) -> ArchiveResult<Option<bool>> {
        match self.field(field)? {
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::Number(n)) => Ok(Some(n.as_f64().is_some_and(|f| f != 0.0))),
            Some(Value::String(s)) => match s.as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(ArchiveError::invalid(field, format!("{s:?} is not a boolean"))),
            },
            Some(other) => Err(ArchiveError::invalid(
                field,
                format!("expected boolean, found {other}"),
            )),
            None => Ok(None),
        }
    }

    fn read_name_hash(&mut self, field: &str) -> ArchiveResult<Option<NameHash>> {
        match self.field(field)? {
            Some(Value::Number(n)) => n
                .as_u64()
                .map(|raw| Some(NameHash::from_raw(raw)))
                .ok_or_else(|| ArchiveError::invalid(field, "expected u64")),
            Some(Value::String(name)) => Ok(Some(names::register(name))),
            Some(other) => Err(ArchiveError::invalid(
                field,
                format!("expected name hash or name, found {other}"),
            )),
            None => Ok(None),
        }
    }

    fn read_enum_index(&mut self, field: &str, enum_names: &[&str]) -> ArchiveResult<Option<u32>> {
        match self.field(field)? {
            Some(Value::Number(n)) => {
                let raw = n.as_u64().ok_or_else(|| {
                    ArchiveError::invalid(field, format!("{n} is not an enum index"))
                })?;
                check_enum_range(field, raw, enum_names.len()).map(Some)
            }
            Some(Value::String(name)) => enum_names
                .iter()
                .position(|candidate| candidate == name)
                .map(|index| Some(index as u32))
                .ok_or_else(|| ArchiveError::UnknownEnumName {
                    field: field.to_owned(),
                    name: name.clone(),
                }),
            Some(other) => Err(ArchiveError::invalid(
                field,
                format!("expected enum index or name, found {other}"),
            )),
            None => Ok(None),
        }
    }

    fn read_flag_bits(&mut self, field: &str, flags: &[(&str, u64)]) -> ArchiveResult<Option<u64>> {
        match self.field(field)? {
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| ArchiveError::invalid(field, format!("{n} is not a bitmask"))),
            Some(Value::String(text)) => parse_flag_names(text, flags).map(Some).map_err(|name| {
                ArchiveError::UnknownEnumName {
                    field: field.to_owned(),
                    name,
                }
            }),
            Some(other) => Err(ArchiveError::invalid(
                field,
                format!("expected bitmask or flag names, found {other}"),
            )),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Structured archive writer.
///
/// Records are collected in memory and the document, followed by its
/// version member, is written by [`finish`](Self::finish). Dropping an
/// unfinished writer attempts the same and logs if it fails.
pub struct JsonArchiveWriter<W: Write> {
    stream: Option<W>,
    options: JsonWriterOptions,
    document: Map<String, Value>,
    current: Option<(String, Map<String, Value>)>,
    tracker: WriteTracker,
    finished: bool,
}

impl<W: Write> JsonArchiveWriter<W> {
    pub fn new(stream: W, options: JsonWriterOptions) -> Self {
        Self {
            stream: Some(stream),
            options,
            document: Map::new(),
            current: None,
            tracker: WriteTracker::new(),
            finished: false,
        }
    }

    fn close_record(&mut self) {
        if let Some((key, record)) = self.current.take() {
            self.document.insert(key, Value::Object(record));
        }
    }

    fn put(&mut self, field: &str, value: Value) -> ArchiveResult<()> {
        if !self.tracker.accepts_fields()? {
            return Ok(());
        }
        let (_, record) = self.current.as_mut().ok_or(ArchiveError::NoActiveObject)?;
        record.insert(field.to_owned(), value);
        Ok(())
    }

    /// Write the document and its version member.
    pub fn finish(&mut self) -> ArchiveResult<()> {
        if self.finished {
            return Ok(());
        }
        self.close_record();
        let mut document = std::mem::take(&mut self.document);
        document.insert(VERSION_KEY.into(), Value::from(JSON_VERSION));
        let records = document.len() - 1;
        let pretty = self.options.pretty;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ArchiveError::InvalidDocument("JSON writer already closed".into()))?;
        let document = Value::Object(document);
        if pretty {
            serde_json::to_writer_pretty(&mut *stream, &document)?;
        } else {
            serde_json::to_writer(&mut *stream, &document)?;
        }
        stream.flush()?;
        self.finished = true;
        debug!(records, "structured archive finished");
        Ok(())
    }

    /// Finish the document and hand back the stream.
    pub fn into_inner(mut self) -> ArchiveResult<W> {
        self.finish()?;
        self.stream
            .take()
            .ok_or_else(|| ArchiveError::InvalidDocument("JSON writer already closed".into()))
    }
}

impl<W: Write> ArchiveWriter for JsonArchiveWriter<W> {
    fn start_object(&mut self, stamp: ObjectStamp) -> ArchiveResult<bool> {
        if !self.tracker.start(stamp) {
            return Ok(false);
        }
        self.close_record();
        let mut record = Map::new();
        record.insert(TYPE_HASH_KEY.into(), Value::from(stamp.type_hash.raw()));
        record.insert(NAME_HASH_KEY.into(), Value::from(stamp.name_hash.raw()));
        self.current = Some((stamp.name_hash.to_hex(), record));
        Ok(true)
    }

    fn set_record_filter(&mut self, filter: Option<Arc<dyn RecordFilter>>) {
        self.tracker.set_filter(filter);
    }

    fn saved_objects(&self) -> &[NameHash] {
        self.tracker.saved()
    }

    fn has_saved(&self, hash: NameHash) -> bool {
        self.tracker.has_saved(hash)
    }

    fn write_scalar(&mut self, field: &str, value: Scalar) -> ArchiveResult<()> {
        let value = scalar_to_value(field, value)?;
        self.put(field, value)
    }

    fn write_string(&mut self, field: &str, value: &str) -> ArchiveResult<()> {
        self.put(field, Value::String(value.to_owned()))
    }

    fn write_raw(&mut self, field: &str, kind: ScalarKind, bytes: &[u8]) -> ArchiveResult<()> {
        if bytes.len() % kind.width() != 0 {
            return Err(ArchiveError::invalid(
                field,
                format!("{} bytes is not a whole number of {kind} elements", bytes.len()),
            ));
        }
        self.put(field, Value::String(STANDARD.encode(bytes)))
    }

    fn write_blob(&mut self, field: &str, bytes: &[u8]) -> ArchiveResult<()> {
        self.put(field, Value::String(STANDARD.encode(bytes)))
    }

    fn write_bool(&mut self, field: &str, value: bool) -> ArchiveResult<()> {
        let encoded = if self.options.verbose {
            Value::Bool(value)
        } else {
            Value::from(u8::from(value))
        };
        self.put(field, encoded)
    }

    fn write_name_hash(&mut self, field: &str, value: NameHash) -> ArchiveResult<()> {
        let name = self.options.verbose.then(|| names::lookup(value)).flatten();
        let encoded = match name {
            Some(name) => Value::String(name),
            None => Value::from(value.raw()),
        };
        self.put(field, encoded)
    }

    fn write_enum_index(
        &mut self,
        field: &str,
        index: u32,
        enum_names: &[&str],
    ) -> ArchiveResult<()> {
        check_enum_range(field, u64::from(index), enum_names.len())?;
        let encoded = if self.options.verbose {
            Value::String(enum_names[index as usize].to_owned())
        } else {
            Value::from(index)
        };
        self.put(field, encoded)
    }

    fn write_flag_bits(
        &mut self,
        field: &str,
        bits: u64,
        flags: &[(&str, u64)],
    ) -> ArchiveResult<()> {
        let names = self
            .options
            .verbose
            .then(|| format_flag_names(bits, flags))
            .flatten();
        let encoded = match names {
            Some(names) => Value::String(names),
            None => Value::from(bits),
        };
        self.put(field, encoded)
    }
}

impl<W: Write> Drop for JsonArchiveWriter<W> {
    fn drop(&mut self) {
        if self.finished || self.stream.is_none() {
            return;
        }
        if let Err(e) = self.finish() {
            warn!(error = %e, "structured archive dropped without finish; document not written");
        }
    }
}
