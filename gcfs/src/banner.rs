//! Game banners
//! ------------
//!
//! `opening.bnr` in the disk root holds the picture and text shown by the
//! GameCube menu:
//!
//! ```ascii
//!     0x0000 [4]      "BNR1" (one text block) or "BNR2" (six, one per language)
//!     0x0020 [0x1800] 96x32 image, RGB5A3 texels in 4x4 tiles
//!     0x1820 (
//!         [0x20] short name
//!         [0x20] short developer
//!         [0x40] long name
//!         [0x40] long developer
//!         [0x80] description
//!     )   /* repeated per text block */
//! ```
use serde_derive::Serialize;
use std::io::{Cursor, Seek, SeekFrom};

use crate::binary::GcRead;
use crate::error::{Error, Result};
use crate::name::decode_text;

pub const WIDTH: usize = 96;
pub const HEIGHT: usize = 32;
const IMAGE_OFFSET: usize = 0x20;
const INFO_OFFSET: usize = 0x1820;
const INFO_SIZE: usize = 0x140;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BannerInfo {
    pub short_name: String,
    pub short_developer: String,
    pub long_name: String,
    pub long_developer: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Banner {
    /// 1 for BNR1, 2 for BNR2.
    pub version: u8,
    /// RGBA pixels, row by row.
    #[serde(skip)]
    pub pixels: Vec<[u8; 4]>,
    pub info: Vec<BannerInfo>,
}

/// Expand an RGB5A3 texel to RGBA8.
fn rgb5a3(texel: u16) -> [u8; 4] {
    let expand5 = |v: u16| ((v << 3) | (v >> 2)) as u8;
    let expand4 = |v: u16| (v * 0x11) as u8;
    let expand3 = |v: u16| ((v << 5) | (v << 2) | (v >> 1)) as u8;
    if texel & 0x8000 != 0 {
        [
            expand5((texel >> 10) & 0x1F),
            expand5((texel >> 5) & 0x1F),
            expand5(texel & 0x1F),
            0xFF,
        ]
    } else {
        [
            expand4((texel >> 8) & 0xF),
            expand4((texel >> 4) & 0xF),
            expand4(texel & 0xF),
            expand3((texel >> 12) & 0x7),
        ]
    }
}

impl Banner {
    pub fn parse(data: &[u8]) -> Result<Banner> {
        let version = match data.get(..4) {
            Some(b"BNR1") => 1,
            Some(b"BNR2") => 2,
            _ => return Err(Error::format(0, "banner magic missing")),
        };
        let blocks = if version == 1 { 1 } else { 6 };
        let needed = INFO_OFFSET + blocks * INFO_SIZE;
        if data.len() < needed {
            return Err(Error::format(
                data.len() as u64,
                format!("banner is truncated, expected {needed} bytes"),
            ));
        }

        let mut reader = Cursor::new(data);
        reader.seek(SeekFrom::Start(IMAGE_OFFSET as u64))?;
        let mut pixels = vec![[0u8; 4]; WIDTH * HEIGHT];
        for tile_y in 0..HEIGHT / 4 {
            for tile_x in 0..WIDTH / 4 {
                for y in 0..4 {
                    for x in 0..4 {
                        let texel = reader.read_gc_u16()?;
                        pixels[(tile_y * 4 + y) * WIDTH + tile_x * 4 + x] = rgb5a3(texel);
                    }
                }
            }
        }

        let mut info = Vec::with_capacity(blocks);
        for _ in 0..blocks {
            info.push(BannerInfo {
                short_name: decode_text(&reader.read_gc_fixed_string(0x20)?),
                short_developer: decode_text(&reader.read_gc_fixed_string(0x20)?),
                long_name: decode_text(&reader.read_gc_fixed_string(0x40)?),
                long_developer: decode_text(&reader.read_gc_fixed_string(0x40)?),
                description: decode_text(&reader.read_gc_fixed_string(0x80)?),
            });
        }
        Ok(Banner {
            version,
            pixels,
            info,
        })
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        self.pixels[y * WIDTH + x]
    }

    /// The image as a binary PPM, composited onto black.
    pub fn to_ppm(&self) -> Vec<u8> {
        let mut out = format!("P6\n{} {}\n255\n", WIDTH, HEIGHT).into_bytes();
        out.reserve(WIDTH * HEIGHT * 3);
        for [r, g, b, a] in &self.pixels {
            for channel in [r, g, b] {
                out.push((u16::from(*channel) * u16::from(*a) / 255) as u8);
            }
        }
        out
    }
}
