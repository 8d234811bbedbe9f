//! Yaz0
//! ----
//!
//! The run-length/LZ format Nintendo uses for `.szs` archives and other
//! compressed game files:
//!
//! ```ascii
//!     [4]      "Yaz0"
//!     [UInt32] decompressed size
//!     [8]      reserved
//!     (
//!         [UInt8:code]   /* read MSB first, 1 = literal byte, 0 = back-reference */
//!         (
//!             [UInt8:literal]
//!           | [UInt8:b1][UInt8:b2]            /* length (b1 >> 4) + 2 */
//!           | [UInt8:b1][UInt8:b2][UInt8:b3]  /* b1 >> 4 == 0, length b3 + 0x12 */
//!         )   /* once per code bit */
//!     )   /* until the decompressed size is reached */
//! ```
//!
//! A back-reference copies from `((b1 & 0xF) << 8 | b2) + 1` bytes back in the
//! output, so it may overlap the bytes it produces.
use crate::binary::be_u32;
use crate::error::{Error, Result};

pub const MAGIC: &[u8; 4] = b"Yaz0";
pub const HEADER_SIZE: usize = 16;

const WINDOW: usize = 0x1000;
const MIN_MATCH: usize = 3;
const MAX_MATCH: usize = 0x111;
const MAX_CHAIN: usize = 256;
const HASH_BITS: u32 = 15;

fn corrupt(offset: usize, reason: &'static str) -> Error {
    Error::Codec {
        path: String::new(),
        offset,
        reason,
    }
}

pub fn is_yaz0(data: &[u8]) -> bool {
    data.len() >= HEADER_SIZE && &data[..4] == MAGIC
}

/// Decompressed size declared in the header.
pub fn decoded_size(raw: &[u8]) -> Result<usize> {
    if raw.len() < HEADER_SIZE {
        return Err(corrupt(raw.len(), "truncated header"));
    }
    if &raw[..4] != MAGIC {
        return Err(corrupt(0, "missing Yaz0 magic"));
    }
    Ok(be_u32(raw, 4) as usize)
}

pub fn decode(raw: &[u8]) -> Result<Vec<u8>> {
    let size = decoded_size(raw)?;
    // the declared size is untrusted until the stream backs it up
    let mut out = Vec::with_capacity(size.min(raw.len().saturating_mul(9)));
    let mut pos = HEADER_SIZE;
    let byte_at = |at: usize| {
        raw.get(at)
            .copied()
            .ok_or_else(|| corrupt(at, "truncated stream"))
    };

    while out.len() < size {
        let code = byte_at(pos)?;
        pos += 1;
        for bit in (0..8).rev() {
            if out.len() >= size {
                break;
            }
            if code & (1 << bit) != 0 {
                out.push(byte_at(pos)?);
                pos += 1;
                continue;
            }
            let at = pos;
            let b1 = byte_at(pos)?;
            let b2 = byte_at(pos + 1)?;
            pos += 2;
            let distance = ((usize::from(b1 & 0x0F) << 8) | usize::from(b2)) + 1;
            let length = match b1 >> 4 {
                0 => {
                    let b3 = byte_at(pos)?;
                    pos += 1;
                    usize::from(b3) + 0x12
                }
                n => usize::from(n) + 2,
            };
            if distance > out.len() {
                return Err(corrupt(at, "back-reference before the start of the output"));
            }
            if out.len() + length > size {
                return Err(corrupt(at, "output overruns the declared size"));
            }
            let start = out.len() - distance;
            for i in 0..length {
                let byte = out[start + i];
                out.push(byte);
            }
        }
    }
    Ok(out)
}

/// Hash chains over every 3-byte prefix seen so far.
struct MatchFinder<'a> {
    data: &'a [u8],
    head: Vec<usize>,
    prev: Vec<usize>,
}

impl<'a> MatchFinder<'a> {
    const NONE: usize = usize::MAX;

    fn new(data: &'a [u8]) -> MatchFinder<'a> {
        MatchFinder {
            data,
            head: vec![Self::NONE; 1 << HASH_BITS],
            prev: vec![Self::NONE; data.len()],
        }
    }

    fn hash(&self, pos: usize) -> usize {
        let key = u32::from(self.data[pos]) << 16
            | u32::from(self.data[pos + 1]) << 8
            | u32::from(self.data[pos + 2]);
        (key.wrapping_mul(2_654_435_761) >> (32 - HASH_BITS)) as usize
    }

    fn insert(&mut self, pos: usize) {
        if pos + MIN_MATCH > self.data.len() {
            return;
        }
        let h = self.hash(pos);
        self.prev[pos] = self.head[h];
        self.head[h] = pos;
    }

    /// Longest earlier match for `pos` as (length, distance).
    fn longest(&self, pos: usize) -> (usize, usize) {
        if pos + MIN_MATCH > self.data.len() {
            return (0, 0);
        }
        let limit = MAX_MATCH.min(self.data.len() - pos);
        let mut best = (0, 0);
        let mut candidate = self.head[self.hash(pos)];
        let mut steps = 0;
        while candidate != Self::NONE && pos - candidate <= WINDOW && steps < MAX_CHAIN {
            let length = self.data[candidate..]
                .iter()
                .zip(&self.data[pos..pos + limit])
                .take_while(|(a, b)| a == b)
                .count();
            if length > best.0 {
                best = (length, pos - candidate);
                if length == limit {
                    break;
                }
            }
            candidate = self.prev[candidate];
            steps += 1;
        }
        best
    }
}

/// Compress `data` with a greedy longest-match search.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + data.len() + data.len() / 8 + 1);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(&[0u8; 8]);

    let mut finder = MatchFinder::new(data);
    let mut pos = 0;
    while pos < data.len() {
        let code_at = out.len();
        out.push(0);
        for bit in (0..8).rev() {
            if pos >= data.len() {
                break;
            }
            let (length, distance) = finder.longest(pos);
            if length >= MIN_MATCH {
                let d = distance - 1;
                if length >= 0x12 {
                    out.push((d >> 8) as u8);
                    out.push(d as u8);
                    out.push((length - 0x12) as u8);
                } else {
                    out.push((((length - 2) << 4) | (d >> 8)) as u8);
                    out.push(d as u8);
                }
                for p in pos..pos + length {
                    finder.insert(p);
                }
                pos += length;
            } else {
                out[code_at] |= 1 << bit;
                out.push(data[pos]);
                finder.insert(pos);
                pos += 1;
            }
        }
    }
    out
}
