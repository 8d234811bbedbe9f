//! Binary format primitives for GameCube disk structures
//!
//! Every multi-byte integer on a GameCube disc is big-endian. Names in the
//! filesystem string table and the text fields of the disk header and banners
//! are NUL-terminated byte strings.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// GcRead provides methods for reading GameCube binary primitives
pub trait GcRead: Read {
    /// Read a single byte
    fn read_gc_u8(&mut self) -> Result<u8> {
        Ok(self.read_u8()?)
    }

    /// Read a 24-bit unsigned integer (used for FST name offsets)
    fn read_gc_u24(&mut self) -> Result<u32> {
        Ok(self.read_u24::<BigEndian>()?)
    }

    /// Read a 32-bit unsigned integer
    fn read_gc_u32(&mut self) -> Result<u32> {
        Ok(self.read_u32::<BigEndian>()?)
    }

    /// Read a 16-bit unsigned integer
    fn read_gc_u16(&mut self) -> Result<u16> {
        Ok(self.read_u16::<BigEndian>()?)
    }

    /// Read a fixed-size text field, keeping the bytes before the first NUL
    fn read_gc_fixed_string(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        self.read_exact(&mut buffer)?;
        let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
        buffer.truncate(end);
        Ok(buffer)
    }
}

impl<R: Read> GcRead for R {}

/// GcWrite provides the matching writers
pub trait GcWrite: Write {
    fn write_gc_u8(&mut self, value: u8) -> Result<()> {
        Ok(self.write_u8(value)?)
    }

    fn write_gc_u24(&mut self, value: u32) -> Result<()> {
        Ok(self.write_u24::<BigEndian>(value)?)
    }

    fn write_gc_u32(&mut self, value: u32) -> Result<()> {
        Ok(self.write_u32::<BigEndian>(value)?)
    }

    /// Write a NUL-terminated string
    fn write_gc_cstring(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_all(bytes)?;
        Ok(self.write_u8(0)?)
    }
}

impl<W: Write> GcWrite for W {}

/// Read the NUL-terminated string that starts at `start` in `table`.
///
/// The terminator must appear within `max_len` bytes and before the end of
/// the table; `table_offset` is only used to report where the table lives.
pub fn cstring_at(table: &[u8], start: usize, max_len: usize, table_offset: u64) -> Result<&[u8]> {
    let at = table_offset + start as u64;
    if start >= table.len() {
        return Err(Error::format(at, "name starts outside the string table"));
    }
    let window = &table[start..table.len().min(start + max_len)];
    match window.iter().position(|&b| b == 0) {
        Some(end) => Ok(&window[..end]),
        None if window.len() == max_len => Err(Error::format(at, "name is too long")),
        None => Err(Error::format(at, "name runs past the end of the string table")),
    }
}

/// Big-endian u32 from a slice that is known to be long enough.
pub fn be_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Round `value` up to the next multiple of `alignment`.
pub fn align_up(value: u64, alignment: u64) -> u64 {
    match value % alignment {
        0 => value,
        r => value + (alignment - r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_gc_integers() {
        let data = [
            0x01, // u8 = 1
            0x00, 0x01, 0x02, // u24 = 0x102
            0xC2, 0x33, 0x9F, 0x3D, // u32 = DVD magic
            0x12, 0x34, // u16
        ];
        let mut cursor = Cursor::new(&data);

        assert_eq!(cursor.read_gc_u8().unwrap(), 1);
        assert_eq!(cursor.read_gc_u24().unwrap(), 0x102);
        assert_eq!(cursor.read_gc_u32().unwrap(), 0xC233_9F3D);
        assert_eq!(cursor.read_gc_u16().unwrap(), 0x1234);
        assert!(cursor.read_gc_u8().is_err());
    }

    #[test]
    fn test_read_gc_fixed_string() {
        let data = *b"GALE\0\0\0\0rest";
        let mut cursor = Cursor::new(&data);

        assert_eq!(cursor.read_gc_fixed_string(8).unwrap(), b"GALE");
        assert_eq!(cursor.read_gc_fixed_string(4).unwrap(), b"rest");
    }

    #[test]
    fn test_write_round_trip() {
        let mut out = Vec::new();
        out.write_gc_u8(1).unwrap();
        out.write_gc_u24(0x00AB_CDEF).unwrap();
        out.write_gc_u32(7).unwrap();
        out.write_gc_cstring(b"opening.bnr").unwrap();

        assert_eq!(&out[..8], &[0x01, 0xAB, 0xCD, 0xEF, 0, 0, 0, 7]);
        assert_eq!(&out[8..], b"opening.bnr\0");
    }

    #[test]
    fn test_cstring_at() {
        let table = b"a.txt\0dir\0";
        assert_eq!(cstring_at(table, 0, 0x200, 0).unwrap(), b"a.txt");
        assert_eq!(cstring_at(table, 6, 0x200, 0).unwrap(), b"dir");
        assert!(cstring_at(table, 10, 0x200, 0).is_err());
        assert!(cstring_at(b"abc", 0, 0x200, 0).is_err());
        assert!(cstring_at(b"abcdef\0", 0, 4, 0).is_err());
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(8, 4), 8);
        assert_eq!(align_up(0x2441, 0x8000), 0x8000);
    }
}
