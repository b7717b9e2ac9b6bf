//! Archive formats for Strata.
//!
//! An archive is a flat sequence of records. Each record carries the type
//! hash and name hash of one object followed by that object's fields.
//! Objects refer to each other only by name hash, so loading is a single
//! forward pass provided every dependency is written before its users.
//!
//! # Architecture
//!
//! - **[`ArchiveReader`] / [`ArchiveWriter`]**: the format-neutral field contract
//! - **Binary archive**: compact little-endian stream with a fixed header; fields are positional
//! - **JSON archive** (feature `json`): keyed records for tooling and hand editing
//! - **[`ReaderExt`] / [`WriterExt`]**: typed helpers for primitives, enums, flags and arrays

pub mod binary;
pub mod error;
#[cfg(feature = "json")]
pub mod json;
pub mod stream;
mod tracker;
pub mod traits;
pub mod value;

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

pub use binary::{
    BinaryArchiveReader, BinaryArchiveWriter, BinaryHeader, BINARY_MAGIC, BINARY_VERSION,
};
pub use error::{ArchiveError, ArchiveResult};
#[cfg(feature = "json")]
pub use json::{JsonArchiveReader, JsonArchiveWriter, JsonWriterOptions, JSON_VERSION};
pub use stream::ByteStream;
pub use traits::{ArchiveReader, ArchiveWriter, ObjectStamp, ReaderExt, RecordFilter, WriterExt};
pub use value::{ArchiveEnum, ArchiveFlags, Primitive, Scalar, ScalarKind};

/// On-disk archive flavour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    Binary,
    Json,
}

impl ArchiveFormat {
    /// Guess the format from the first bytes of a stream.
    pub fn detect(prefix: &[u8]) -> Option<Self> {
        if prefix.len() >= 4 && prefix[..4] == BINARY_MAGIC.to_le_bytes() {
            return Some(Self::Binary);
        }
        match prefix.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') | None if !prefix.is_empty() => Some(Self::Json),
            _ => None,
        }
    }

    /// Pick a format from a file extension; anything but `.json` is binary.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Binary,
        }
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary => write!(f, "binary"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Open a reader over `stream`, choosing the format from its first bytes.
pub fn open_reader<R: Read + 'static>(
    mut stream: R,
    base_directory: impl Into<PathBuf>,
) -> ArchiveResult<Box<dyn ArchiveReader>> {
    let mut prefix = Vec::with_capacity(4);
    (&mut stream).take(4).read_to_end(&mut prefix)?;
    let format = ArchiveFormat::detect(&prefix)
        .ok_or_else(|| ArchiveError::InvalidDocument("unrecognized archive format".into()))?;
    let stream = Cursor::new(prefix).chain(stream);
    match format {
        ArchiveFormat::Binary => Ok(Box::new(BinaryArchiveReader::new(stream, base_directory)?)),
        #[cfg(feature = "json")]
        ArchiveFormat::Json => Ok(Box::new(JsonArchiveReader::new(stream, base_directory)?)),
        #[cfg(not(feature = "json"))]
        ArchiveFormat::Json => Err(ArchiveError::InvalidDocument(
            "structured archives need the `json` feature".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::{NameHash, TypeHash};

    fn stamp(name: &str) -> ObjectStamp {
        ObjectStamp::new(TypeHash::new("lib::Thing"), NameHash::new(name))
    }

    // -----------------------------------------------------------------------
    // Format detection
    // -----------------------------------------------------------------------

    #[test]
    fn detect_formats() {
        assert_eq!(ArchiveFormat::detect(b"STRA\x01\x00"), Some(ArchiveFormat::Binary));
        assert_eq!(ArchiveFormat::detect(b"{\"a"), Some(ArchiveFormat::Json));
        assert_eq!(ArchiveFormat::detect(b"  \n{"), Some(ArchiveFormat::Json));
        assert_eq!(ArchiveFormat::detect(b"PK\x03\x04"), None);
        assert_eq!(ArchiveFormat::detect(b""), None);
    }

    #[test]
    fn format_from_path() {
        assert_eq!(ArchiveFormat::from_path(Path::new("scene.JSON")), ArchiveFormat::Json);
        assert_eq!(ArchiveFormat::from_path(Path::new("scene.strata")), ArchiveFormat::Binary);
        assert_eq!(ArchiveFormat::from_path(Path::new("scene")), ArchiveFormat::Binary);
    }

    // -----------------------------------------------------------------------
    // Same records through both formats
    // -----------------------------------------------------------------------

    fn write_records(writer: &mut dyn ArchiveWriter) {
        assert!(writer.start_object(stamp("lib::a")).unwrap());
        writer.write("count", 3u32).unwrap();
        writer.write_string("label", "first").unwrap();
        writer.write_array("extent", &[1.5f32, -2.0, 8.0]).unwrap();
        assert!(writer.start_object(stamp("lib::b")).unwrap());
        writer.write_name_hash("target", NameHash::new("lib::a")).unwrap();
        writer.write_blob("payload", &[9, 8, 7]).unwrap();
    }

    fn check_records(mut reader: Box<dyn ArchiveReader>) {
        assert_eq!(reader.next_object().unwrap(), Some(stamp("lib::a")));
        assert_eq!(reader.require::<u32>("count").unwrap(), 3);
        assert_eq!(reader.require_string("label").unwrap(), "first");
        let mut extent = [0f32; 3];
        reader.require_array("extent", &mut extent).unwrap();
        assert_eq!(extent, [1.5, -2.0, 8.0]);
        assert_eq!(reader.next_object().unwrap(), Some(stamp("lib::b")));
        assert_eq!(reader.require_name_hash("target").unwrap(), NameHash::new("lib::a"));
        assert_eq!(reader.require_blob("payload").unwrap(), vec![9, 8, 7]);
        assert_eq!(reader.next_object().unwrap(), None);
    }

    #[test]
    fn binary_through_open_reader() {
        let mut writer = BinaryArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
        write_records(&mut writer);
        let bytes = writer.into_inner().unwrap().into_inner();
        check_records(open_reader(Cursor::new(bytes), "/data").unwrap());
    }

    #[cfg(feature = "json")]
    #[test]
    fn json_through_open_reader() {
        let mut writer = JsonArchiveWriter::new(Vec::new(), JsonWriterOptions::readable());
        write_records(&mut writer);
        let bytes = writer.into_inner().unwrap();
        let reader = open_reader(Cursor::new(bytes), "/data").unwrap();
        assert_eq!(reader.base_directory(), Path::new("/data"));
        check_records(reader);
    }

    #[test]
    fn garbage_is_rejected() {
        let err = open_reader(Cursor::new(b"nonsense".to_vec()), ".").err().unwrap();
        assert!(matches!(err, ArchiveError::InvalidDocument(_)));
    }
}
