//! Compact binary archive.
//!
//! On-disk format (little-endian):
//! ```text
//! header:     [u32 magic "STRA"] [u32 version] [i32 object count]
//! per object: [u64 type hash] [u64 name hash] [fields, in write order]
//! string:     [i32 length including trailing NUL] [bytes] [NUL]
//! blob:       [u32 length] [bytes]
//! ```
//!
//! No field names or type tags are stored, so a type's reader must consume
//! its fields in exactly the order its writer produced them.
//!
//! The object count is only known once the pass is over: the writer emits a
//! zero-count header up front and rewrites it in [`BinaryArchiveWriter::finish`].
//! A writer that never finishes leaves a zero count followed by records,
//! which the reader rejects with [`ArchiveError::TrailingData`].

use std::io::{Read, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_types::{NameHash, TypeHash};
use tracing::{debug, warn};

use crate::error::{ArchiveError, ArchiveResult};
use crate::stream::ByteStream;
use crate::tracker::WriteTracker;
use crate::traits::{ArchiveReader, ArchiveWriter, ObjectStamp, RecordFilter};
use crate::value::{Scalar, ScalarKind};

/// "STRA" packed little-endian.
pub const BINARY_MAGIC: u32 = u32::from_le_bytes(*b"STRA");
/// Current binary format version.
pub const BINARY_VERSION: u32 = 1;
/// Header size in bytes.
pub const HEADER_SIZE: u64 = 12;

/// The fixed binary archive header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BinaryHeader {
    pub magic: u32,
    pub version: u32,
    pub object_count: i32,
}

impl BinaryHeader {
    fn to_bytes(self) -> [u8; HEADER_SIZE as usize] {
        let mut out = [0u8; HEADER_SIZE as usize];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..12].copy_from_slice(&self.object_count.to_le_bytes());
        out
    }

    /// Read and validate a header. Any magic or version other than the
    /// current one is rejected.
    pub fn read_from<R: Read>(stream: &mut R) -> ArchiveResult<Self> {
        let mut raw = [0u8; HEADER_SIZE as usize];
        stream.read_exact(&mut raw)?;
        let header = Self {
            magic: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            version: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            object_count: i32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
        };
        if header.magic != BINARY_MAGIC {
            return Err(ArchiveError::InvalidMagic {
                expected: BINARY_MAGIC,
                actual: header.magic,
            });
        }
        if header.version != BINARY_VERSION {
            return Err(ArchiveError::UnsupportedVersion(header.version));
        }
        if header.object_count < 0 {
            return Err(ArchiveError::InvalidDocument(format!(
                "negative object count {}",
                header.object_count
            )));
        }
        Ok(header)
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Sequential reader over a binary archive.
pub struct BinaryArchiveReader<R> {
    stream: R,
    base_directory: PathBuf,
    header: BinaryHeader,
    remaining: u32,
    in_object: bool,
}

impl<R: Read> BinaryArchiveReader<R> {
    /// Read and validate the header, leaving the stream at the first record.
    pub fn new(mut stream: R, base_directory: impl Into<PathBuf>) -> ArchiveResult<Self> {
        let header = BinaryHeader::read_from(&mut stream)?;
        debug!(objects = header.object_count, "binary archive opened");
        Ok(Self {
            stream,
            base_directory: base_directory.into(),
            header,
            remaining: header.object_count as u32,
            in_object: false,
        })
    }

    /// The validated header.
    pub fn header(&self) -> BinaryHeader {
        self.header
    }

    fn field_bytes<const N: usize>(&mut self) -> ArchiveResult<[u8; N]> {
        if !self.in_object {
            return Err(ArchiveError::NoActiveObject);
        }
        let mut buf = [0u8; N];
        self.stream.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_sized(&mut self, field: &str, len: u64) -> ArchiveResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.stream.by_ref().take(len).read_to_end(&mut buf)?;
        if buf.len() as u64 != len {
            return Err(ArchiveError::invalid(
                field,
                format!("expected {len} bytes, stream ended after {}", buf.len()),
            ));
        }
        Ok(buf)
    }
}

impl<R: Read> ArchiveReader for BinaryArchiveReader<R> {
    fn next_object(&mut self) -> ArchiveResult<Option<ObjectStamp>> {
        if self.remaining == 0 {
            self.in_object = false;
            let mut extra = [0u8; 1];
            if self.stream.read(&mut extra)? != 0 {
                return Err(ArchiveError::TrailingData);
            }
            return Ok(None);
        }
        self.in_object = true;
        let type_hash = u64::from_le_bytes(self.field_bytes()?);
        let name_hash = u64::from_le_bytes(self.field_bytes()?);
        self.remaining -= 1;
        Ok(Some(ObjectStamp::new(
            TypeHash::from_raw(type_hash),
            NameHash::from_raw(name_hash),
        )))
    }

    fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    fn read_scalar(&mut self, field: &str, kind: ScalarKind) -> ArchiveResult<Option<Scalar>> {
        let bytes: [u8; 8] = match kind.width() {
            1 => {
                let [b] = self.field_bytes::<1>()?;
                [b, 0, 0, 0, 0, 0, 0, 0]
            }
            2 => {
                let b = self.field_bytes::<2>()?;
                [b[0], b[1], 0, 0, 0, 0, 0, 0]
            }
            4 => {
                let b = self.field_bytes::<4>()?;
                [b[0], b[1], b[2], b[3], 0, 0, 0, 0]
            }
            _ => self.field_bytes::<8>()?,
        };
        Scalar::read_le(kind, &bytes[..kind.width()])
            .map(Some)
            .ok_or_else(|| ArchiveError::invalid(field, format!("cannot decode {kind}")))
    }

    fn read_string(&mut self, field: &str) -> ArchiveResult<Option<String>> {
        let len = i32::from_le_bytes(self.field_bytes()?);
        let len = u64::try_from(len)
            .map_err(|_| ArchiveError::invalid(field, format!("negative string length {len}")))?;
        let mut bytes = self.read_sized(field, len)?;
        if bytes.last() == Some(&0) {
            bytes.pop();
        }
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| ArchiveError::invalid(field, e.to_string()))
    }

    fn read_raw(&mut self, field: &str, kind: ScalarKind, dest: &mut [u8]) -> ArchiveResult<bool> {
        if dest.len() % kind.width() != 0 {
            return Err(ArchiveError::invalid(
                field,
                format!("{} bytes is not a whole number of {kind} elements", dest.len()),
            ));
        }
        if !self.in_object {
            return Err(ArchiveError::NoActiveObject);
        }
        self.stream.read_exact(dest)?;
        Ok(true)
    }

    fn read_raw_vec(
        &mut self,
        field: &str,
        kind: ScalarKind,
        len: u64,
    ) -> ArchiveResult<Option<Vec<u8>>> {
        if len % kind.width() as u64 != 0 {
            return Err(ArchiveError::invalid(
                field,
                format!("{len} bytes is not a whole number of {kind} elements"),
            ));
        }
        if !self.in_object {
            return Err(ArchiveError::NoActiveObject);
        }
        self.read_sized(field, len).map(Some)
    }

    fn read_blob(&mut self, field: &str) -> ArchiveResult<Option<Vec<u8>>> {
        let len = u32::from_le_bytes(self.field_bytes()?);
        self.read_sized(field, u64::from(len)).map(Some)
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Binary archive writer.
///
/// Call [`finish`](Self::finish) (or [`into_inner`](Self::into_inner)) to
/// rewrite the header with the final object count. Dropping an unfinished
/// writer attempts the same rewrite and logs if it fails.
pub struct BinaryArchiveWriter<W: ByteStream> {
    stream: Option<W>,
    start: u64,
    tracker: WriteTracker,
    scratch: Vec<u8>,
    finished: bool,
}

impl<W: ByteStream> BinaryArchiveWriter<W> {
    /// Start an archive at the stream's current position.
    pub fn new(mut stream: W) -> ArchiveResult<Self> {
        let start = stream.stream_position()?;
        let placeholder = BinaryHeader {
            magic: BINARY_MAGIC,
            version: BINARY_VERSION,
            object_count: 0,
        };
        stream.write_all(&placeholder.to_bytes())?;
        Ok(Self {
            stream: Some(stream),
            start,
            tracker: WriteTracker::new(),
            scratch: Vec::with_capacity(8),
            finished: false,
        })
    }

    fn stream(&mut self) -> ArchiveResult<&mut W> {
        self.stream
            .as_mut()
            .ok_or_else(|| ArchiveError::InvalidDocument("binary writer already closed".into()))
    }

    fn put(&mut self, bytes: &[u8]) -> ArchiveResult<()> {
        if !self.tracker.accepts_fields()? {
            return Ok(());
        }
        self.stream()?.write_all(bytes)?;
        Ok(())
    }

    /// Rewrite the header with the final object count and trim the stream
    /// to the end of the archive.
    pub fn finish(&mut self) -> ArchiveResult<()> {
        if self.finished {
            return Ok(());
        }
        let count = i32::try_from(self.tracker.saved().len()).map_err(|_| {
            ArchiveError::InvalidDocument("object count exceeds i32::MAX".into())
        })?;
        let start = self.start;
        let stream = self.stream()?;
        let end = stream.stream_position()?;
        stream.seek(SeekFrom::Start(start))?;
        let header = BinaryHeader {
            magic: BINARY_MAGIC,
            version: BINARY_VERSION,
            object_count: count,
        };
        stream.write_all(&header.to_bytes())?;
        stream.seek(SeekFrom::Start(end))?;
        stream.set_stream_size(end)?;
        stream.flush()?;
        self.finished = true;
        debug!(objects = count, bytes = end - start, "binary archive finished");
        Ok(())
    }

    /// Finish the archive and hand back the stream.
    pub fn into_inner(mut self) -> ArchiveResult<W> {
        self.finish()?;
        self.stream
            .take()
            .ok_or_else(|| ArchiveError::InvalidDocument("binary writer already closed".into()))
    }
}

impl<W: ByteStream> ArchiveWriter for BinaryArchiveWriter<W> {
    fn start_object(&mut self, stamp: ObjectStamp) -> ArchiveResult<bool> {
        if !self.tracker.start(stamp) {
            return Ok(false);
        }
        let mut record = [0u8; 16];
        record[..8].copy_from_slice(&stamp.type_hash.raw().to_le_bytes());
        record[8..].copy_from_slice(&stamp.name_hash.raw().to_le_bytes());
        self.stream()?.write_all(&record)?;
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

    fn write_scalar(&mut self, _field: &str, value: Scalar) -> ArchiveResult<()> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        value.write_le(&mut scratch);
        let result = self.put(&scratch);
        self.scratch = scratch;
        result
    }

    fn write_string(&mut self, field: &str, value: &str) -> ArchiveResult<()> {
        let len = i32::try_from(value.len() + 1)
            .map_err(|_| ArchiveError::invalid(field, "string longer than i32::MAX"))?;
        self.put(&len.to_le_bytes())?;
        self.put(value.as_bytes())?;
        self.put(&[0])
    }

    fn write_raw(&mut self, field: &str, kind: ScalarKind, bytes: &[u8]) -> ArchiveResult<()> {
        if bytes.len() % kind.width() != 0 {
            return Err(ArchiveError::invalid(
                field,
                format!("{} bytes is not a whole number of {kind} elements", bytes.len()),
            ));
        }
        self.put(bytes)
    }

    fn write_blob(&mut self, field: &str, bytes: &[u8]) -> ArchiveResult<()> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| ArchiveError::invalid(field, "blob longer than u32::MAX"))?;
        self.put(&len.to_le_bytes())?;
        self.put(bytes)
    }
}

impl<W: ByteStream> Drop for BinaryArchiveWriter<W> {
    fn drop(&mut self) {
        if self.finished || self.stream.is_none() {
            return;
        }
        if let Err(e) = self.finish() {
            warn!(error = %e, "binary archive dropped without finish; header not rewritten");
        }
    }
}
