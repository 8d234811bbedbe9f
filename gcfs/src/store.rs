//! Random access to the bytes of an image.
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use crate::error::{Error, Result};

/// A byte-addressable image backing store.
///
/// Implemented for `std::fs::File`; tests wrap it to inject failures.
pub trait ImageStore: Send + Sync {
    fn len(&self) -> Result<u64>;
    /// Fill `buf` from `offset`, failing on a short read.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()>;
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<()>;
    fn set_len(&self, len: u64) -> Result<()>;
    /// Flush written data to stable storage.
    fn sync(&self) -> Result<()>;
}

impl ImageStore for File {
    fn len(&self) -> Result<u64> {
        Ok(self
            .metadata()
            .map_err(|e| Error::io("cannot stat image", e))?
            .len())
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        read_exact_at(self, buf, offset)
            .map_err(|e| Error::io(format!("cannot read {} bytes at {:#x}", buf.len(), offset), e))
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<()> {
        write_all_at(self, buf, offset)
            .map_err(|e| Error::io(format!("cannot write {} bytes at {:#x}", buf.len(), offset), e))
    }

    fn set_len(&self, len: u64) -> Result<()> {
        File::set_len(self, len).map_err(|e| Error::io(format!("cannot resize image to {len} bytes"), e))
    }

    fn sync(&self) -> Result<()> {
        self.sync_all().map_err(|e| Error::io("cannot flush image", e))
    }
}

impl<S: ImageStore + ?Sized> ImageStore for &S {
    fn len(&self) -> Result<u64> {
        (**self).len()
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        (**self).read_at(buf, offset)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<()> {
        (**self).write_at(buf, offset)
    }

    fn set_len(&self, len: u64) -> Result<()> {
        (**self).set_len(len)
    }

    fn sync(&self) -> Result<()> {
        (**self).sync()
    }
}

impl<S: ImageStore + ?Sized> ImageStore for Box<S> {
    fn len(&self) -> Result<u64> {
        (**self).len()
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        (**self).read_at(buf, offset)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<()> {
        (**self).write_at(buf, offset)
    }

    fn set_len(&self, len: u64) -> Result<()> {
        (**self).set_len(len)
    }

    fn sync(&self) -> Result<()> {
        (**self).sync()
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::write_all_at(file, buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Lazy accessor for one file's payload: a window of `size` bytes starting
/// at `start` in a store. Nothing is read until the caller asks.
pub struct PayloadReader<S> {
    store: S,
    start: u64,
    size: u64,
    pos: u64,
}

impl<S: ImageStore> PayloadReader<S> {
    pub fn new(store: S, start: u64, size: u64) -> PayloadReader<S> {
        PayloadReader {
            store,
            start,
            size,
            pos: 0,
        }
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl<S: ImageStore> Read for PayloadReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.size.saturating_sub(self.pos);
        let n = (buf.len() as u64).min(remaining) as usize;
        if n == 0 {
            return Ok(0);
        }
        self.store
            .read_at(&mut buf[..n], self.start + self.pos)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<S: ImageStore> Seek for PayloadReader<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(d) => self.size.checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        match target {
            Some(p) => {
                self.pos = p;
                Ok(p)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before the start of the file",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch(contents: &[u8]) -> File {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    #[test]
    fn test_file_store() {
        let file = scratch(b"0123456789");
        assert_eq!(ImageStore::len(&file).unwrap(), 10);

        let mut buf = [0u8; 3];
        file.read_at(&mut buf, 4).unwrap();
        assert_eq!(&buf, b"456");

        file.write_at(b"ab", 8).unwrap();
        ImageStore::set_len(&file, 12).unwrap();
        let mut all = [0u8; 12];
        file.read_at(&mut all, 0).unwrap();
        assert_eq!(&all, b"01234567ab\0\0");

        assert!(file.read_at(&mut buf, 11).is_err());
    }

    #[test]
    fn test_payload_reader() {
        let file = scratch(b"headerPAYLOADtrailer");
        let mut reader = PayloadReader::new(&file, 6, 7);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "PAYLOAD");

        reader.seek(SeekFrom::End(-4)).unwrap();
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, b"LOAD");

        assert!(reader.seek(SeekFrom::Current(-100)).is_err());
        reader.seek(SeekFrom::Start(100)).unwrap();
        assert_eq!(reader.read(&mut [0u8; 4]).unwrap(), 0);
    }
}
