//! Disk header
//! -----------
//!
//! The first 0x2460 bytes of a GameCube disc hold three system files that are
//! not part of the filesystem table:
//!
//! ```ascii
//!     0x0000  boot.bin   (0x440 bytes)
//!             0x000 [4]     game code
//!             0x004 [2]     maker code
//!             0x006 [1]     disc number
//!             0x007 [1]     version
//!             0x01C [UInt32] DVD magic word 0xC2339F3D
//!             0x020 [0x3E0] game name
//!             0x420 [UInt32] main.dol offset
//!             0x424 [UInt32] FST offset
//!             0x428 [UInt32] FST size
//!             0x42C [UInt32] maximum FST size
//!     0x0440  bi2.bin    (0x2000 bytes)
//!     0x2440  apploader
//!             0x2440 [10]    version date
//!             0x2450 [UInt32] entry point
//!             0x2454 [UInt32] size
//!             0x2458 [UInt32] trailer size
//! ```
//!
//! The FST pointer at 0x424..0x430 is rewritten in one write at the end of
//! every in-place commit.

use serde_derive::Serialize;
use std::io::{Cursor, Seek, SeekFrom};

use crate::binary::{be_u32, GcRead};
use crate::error::{Error, Result};
use crate::name::decode_text;

pub const DVD_MAGIC: u32 = 0xC233_9F3D;
/// Size of a full-length GameCube disc.
pub const FULL_DISC_SIZE: u64 = 1_459_978_240;

pub const BOOT_SIZE: u64 = 0x440;
pub const BI2_OFFSET: u64 = 0x440;
pub const BI2_SIZE: u64 = 0x2000;
pub const APPLOADER_OFFSET: u64 = 0x2440;
pub const APPLOADER_HEADER_SIZE: u64 = 0x20;
/// Bytes read from the start of the image to parse the header.
pub const HEADER_SIZE: usize = 0x2460;
pub const FST_POINTER_OFFSET: u64 = 0x424;
pub const MAX_FST_SIZE: u64 = 0x40_0000;
pub const DOL_HEADER_SIZE: usize = 0x100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskHeader {
    pub game_code: String,
    pub maker_code: String,
    pub disc_number: u8,
    pub version: u8,
    pub magic: u32,
    pub game_name: String,
    pub dol_offset: u32,
    pub fst_offset: u32,
    pub fst_size: u32,
    pub fst_max_size: u32,
    pub apploader_version: String,
    pub apploader_entry: u32,
    pub apploader_size: u32,
    pub apploader_trailer_size: u32,
}

impl DiskHeader {
    pub fn parse(buf: &[u8]) -> Result<DiskHeader> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::format(
                buf.len() as u64,
                "image is too small to hold a disk header",
            ));
        }
        let mut reader = Cursor::new(buf);
        let game_code = decode_text(&reader.read_gc_fixed_string(4)?);
        let maker_code = decode_text(&reader.read_gc_fixed_string(2)?);
        let disc_number = reader.read_gc_u8()?;
        let version = reader.read_gc_u8()?;

        reader.seek(SeekFrom::Start(0x1C))?;
        let magic = reader.read_gc_u32()?;
        let game_name = decode_text(&reader.read_gc_fixed_string(0x3E0)?);

        // reader is now at 0x400
        reader.seek(SeekFrom::Start(0x420))?;
        let dol_offset = reader.read_gc_u32()?;
        let fst_offset = reader.read_gc_u32()?;
        let fst_size = reader.read_gc_u32()?;
        let fst_max_size = reader.read_gc_u32()?;

        reader.seek(SeekFrom::Start(APPLOADER_OFFSET))?;
        let apploader_version = decode_text(&reader.read_gc_fixed_string(10)?);
        reader.seek(SeekFrom::Start(0x2450))?;
        let apploader_entry = reader.read_gc_u32()?;
        let apploader_size = reader.read_gc_u32()?;
        let apploader_trailer_size = reader.read_gc_u32()?;

        Ok(DiskHeader {
            game_code,
            maker_code,
            disc_number,
            version,
            magic,
            game_name,
            dol_offset,
            fst_offset,
            fst_size,
            fst_max_size,
            apploader_version,
            apploader_entry,
            apploader_size,
            apploader_trailer_size,
        })
    }

    /// Check the header against the image it came from.
    ///
    /// The plausibility checks only run with `sanity`; the FST bounds are
    /// always enforced because parsing depends on them.
    pub fn validate(&self, image_len: u64, sanity: bool) -> Result<()> {
        if sanity {
            if self.magic != DVD_MAGIC {
                return Err(Error::format(0x1C, "DVD magic word missing"));
            }
            if u64::from(self.fst_offset) < APPLOADER_OFFSET {
                return Err(Error::format(FST_POINTER_OFFSET, "filesystem starts too early"));
            }
            if u64::from(self.fst_size) > MAX_FST_SIZE {
                return Err(Error::format(
                    FST_POINTER_OFFSET + 4,
                    "filesystem table too large",
                ));
            }
        }
        if self.fst_size < 12 {
            return Err(Error::format(
                FST_POINTER_OFFSET + 4,
                "filesystem table too small",
            ));
        }
        if self.fst_end() > image_len {
            return Err(Error::format(
                FST_POINTER_OFFSET,
                format!(
                    "filesystem table ends at {:#x}, past the end of the image ({:#x})",
                    self.fst_end(),
                    image_len
                ),
            ));
        }
        Ok(())
    }

    pub fn fst_end(&self) -> u64 {
        u64::from(self.fst_offset) + u64::from(self.fst_size)
    }

    /// End of the apploader, which is where the pinned system area stops.
    pub fn apploader_end(&self) -> u64 {
        APPLOADER_OFFSET
            + APPLOADER_HEADER_SIZE
            + u64::from(self.apploader_size)
            + u64::from(self.apploader_trailer_size)
    }
}

/// The 12 bytes written at 0x424 to point the disk at a filesystem table.
pub fn fst_pointer(offset: u32, size: u32, max_size: u32) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[..4].copy_from_slice(&offset.to_be_bytes());
    out[4..8].copy_from_slice(&size.to_be_bytes());
    out[8..].copy_from_slice(&max_size.to_be_bytes());
    out
}

/// Extent of main.dol from its header: the furthest end of its 7 text and
/// 11 data sections.
pub fn dol_size(dol_header: &[u8]) -> u64 {
    if dol_header.len() < DOL_HEADER_SIZE {
        return 0;
    }
    let mut end = DOL_HEADER_SIZE as u64;
    for section in 0..18 {
        let offset = u64::from(be_u32(dol_header, section * 4));
        let size = u64::from(be_u32(dol_header, 0x90 + section * 4));
        if size > 0 {
            end = end.max(offset + size);
        }
    }
    end
}

/// A file on the disk that lives outside the filesystem table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemFile {
    pub name: &'static str,
    pub offset: u64,
    pub size: u64,
}

pub fn system_files(header: &DiskHeader, dol_size: u64) -> Vec<SystemFile> {
    let mut files = vec![
        SystemFile {
            name: "boot.bin",
            offset: 0,
            size: BOOT_SIZE,
        },
        SystemFile {
            name: "bi2.bin",
            offset: BI2_OFFSET,
            size: BI2_SIZE,
        },
        SystemFile {
            name: "appldr.bin",
            offset: APPLOADER_OFFSET,
            size: header.apploader_end() - APPLOADER_OFFSET,
        },
    ];
    if header.dol_offset != 0 && dol_size > 0 {
        files.push(SystemFile {
            name: "main.dol",
            offset: u64::from(header.dol_offset),
            size: dol_size,
        });
    }
    files
}
