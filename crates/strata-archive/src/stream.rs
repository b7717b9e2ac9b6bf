//! Byte stream contract.
//!
//! Archives only ever touch a [`ByteStream`]: sequential read and write,
//! seeking, and querying or changing the total size. Files and in-memory
//! cursors both qualify.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// A seekable, resizable byte stream.
pub trait ByteStream: Read + Write + Seek {
    /// Total size of the stream in bytes.
    fn stream_size(&mut self) -> io::Result<u64> {
        let here = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(here))?;
        Ok(end)
    }

    /// Truncate or extend the stream to `size` bytes.
    fn set_stream_size(&mut self, size: u64) -> io::Result<()>;
}

impl<S: ByteStream + ?Sized> ByteStream for &mut S {
    fn stream_size(&mut self) -> io::Result<u64> {
        (**self).stream_size()
    }

    fn set_stream_size(&mut self, size: u64) -> io::Result<()> {
        (**self).set_stream_size(size)
    }
}

impl ByteStream for File {
    fn stream_size(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn set_stream_size(&mut self, size: u64) -> io::Result<()> {
        self.set_len(size)
    }
}

impl ByteStream for Cursor<Vec<u8>> {
    fn stream_size(&mut self) -> io::Result<u64> {
        Ok(self.get_ref().len() as u64)
    }

    fn set_stream_size(&mut self, size: u64) -> io::Result<()> {
        let size = usize::try_from(size).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "size exceeds address space")
        })?;
        self.get_mut().resize(size, 0);
        if self.position() > size as u64 {
            self.set_position(size as u64);
        }
        Ok(())
    }
}
