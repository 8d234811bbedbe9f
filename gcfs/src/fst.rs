//! Filesystem table
//! ----------------
//!
//! The FST is an array of 12-byte entries followed by a string table:
//!
//! ```ascii
//!     [UInt8:is_directory]
//!     [UInt24:name_offset]      /* into the string table */
//!     [UInt32:offset_or_parent] /* file data offset, or parent directory index */
//!     [UInt32:size_or_next]     /* file size, or index one past the last descendant */
//! ```
//!
//! Entry 0 is the root directory; its `size_or_next` is the number of entries.
//! Entries are stored in depth-first pre-order, so every directory's
//! descendants are the contiguous run of entries that follows it.

use log::debug;
use std::collections::HashMap;
use std::io::Cursor;

use crate::binary::{cstring_at, GcRead, GcWrite};
use crate::error::{Error, Result};
use crate::name::{decode_name, MAX_NAME_LEN};
use crate::tree::{EntryId, Tree};

pub const ENTRY_SIZE: usize = 12;
/// Upper bound on plausible entry counts.
pub const MAX_ENTRIES: u32 = 100_000;
/// String table offsets are 24 bits wide.
pub const MAX_STRING_TABLE: u64 = 1 << 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FstKind {
    Directory { next: u32 },
    File { offset: u32, size: u32 },
}

/// One parsed table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstEntry {
    pub raw_name: Vec<u8>,
    pub name: String,
    /// Index of the containing directory; the root points at itself.
    pub parent: u32,
    pub kind: FstKind,
}

/// Parse a filesystem table read from `fst_offset`.
///
/// `image_len` bounds file extents when `sanity` is set.
pub fn parse(buf: &[u8], fst_offset: u64, image_len: u64, sanity: bool) -> Result<Vec<FstEntry>> {
    if buf.len() < ENTRY_SIZE {
        return Err(Error::format(fst_offset, "filesystem table too small"));
    }
    if buf[0] != 1 {
        return Err(Error::format(fst_offset, "root entry is not a directory"));
    }
    let count = crate::binary::be_u32(buf, 8);
    if count == 0 {
        return Err(Error::format(fst_offset + 8, "filesystem table has no entries"));
    }
    if sanity && count > MAX_ENTRIES {
        return Err(Error::format(
            fst_offset + 8,
            format!("implausible entry count {count}"),
        ));
    }
    let entries_len = count as usize * ENTRY_SIZE;
    if entries_len > buf.len() {
        return Err(Error::format(
            fst_offset,
            format!("filesystem table too small for {count} entries"),
        ));
    }
    let table = &buf[entries_len..];
    let table_offset = fst_offset + entries_len as u64;
    debug!("parsing {} FST entries at {:#x}", count, fst_offset);

    let mut entries = Vec::with_capacity(count as usize);
    entries.push(FstEntry {
        raw_name: Vec::new(),
        name: String::new(),
        parent: 0,
        kind: FstKind::Directory { next: count },
    });

    // (directory index, next) for every directory enclosing the current entry
    let mut open_dirs: Vec<(u32, u32)> = vec![(0, count)];
    let mut reader = Cursor::new(&buf[ENTRY_SIZE..entries_len]);
    for index in 1..count {
        let at = fst_offset + u64::from(index) * ENTRY_SIZE as u64;
        while matches!(open_dirs.last(), Some(&(_, next)) if next <= index) {
            open_dirs.pop();
        }
        let &(parent, parent_next) = open_dirs
            .last()
            .ok_or_else(|| Error::format(at, "entry lies outside the root directory"))?;

        let flag = reader.read_gc_u8()?;
        let name_offset = reader.read_gc_u24()?;
        let offset_or_parent = reader.read_gc_u32()?;
        let size_or_next = reader.read_gc_u32()?;

        let raw_name = cstring_at(table, name_offset as usize, MAX_NAME_LEN + 1, table_offset)?;
        let name = decode_name(raw_name, table_offset + u64::from(name_offset))?;

        let kind = if flag != 0 {
            if offset_or_parent != parent {
                return Err(Error::format(
                    at + 4,
                    format!(
                        "directory '{name}' names parent {offset_or_parent} but lies in directory {parent}"
                    ),
                ));
            }
            if size_or_next <= index || size_or_next > parent_next {
                return Err(Error::format(
                    at + 8,
                    format!("directory '{name}' ends at invalid entry {size_or_next}"),
                ));
            }
            open_dirs.push((index, size_or_next));
            FstKind::Directory { next: size_or_next }
        } else {
            let end = u64::from(offset_or_parent) + u64::from(size_or_next);
            if sanity && end > image_len {
                return Err(Error::format(
                    at + 4,
                    format!("file '{name}' extends past the end of the image"),
                ));
            }
            FstKind::File {
                offset: offset_or_parent,
                size: size_or_next,
            }
        };
        entries.push(FstEntry {
            raw_name: raw_name.to_vec(),
            name,
            parent,
            kind,
        });
    }
    Ok(entries)
}

/// Serialized size of the table for `order`, the tree's pre-order walk.
pub fn table_size(tree: &Tree, order: &[EntryId]) -> Result<(u64, u64)> {
    let mut strings = 0u64;
    for &id in order.iter().skip(1) {
        strings += tree.get(id)?.raw_name().len() as u64 + 1;
    }
    Ok((order.len() as u64 * ENTRY_SIZE as u64 + strings, strings))
}

/// Serialize `tree` in the order given by `order`, which must be its
/// pre-order walk starting at the root. `extent` yields every file's
/// planned offset and size.
pub fn serialize<F>(tree: &Tree, order: &[EntryId], extent: F) -> Result<Vec<u8>>
where
    F: Fn(EntryId) -> Option<(u32, u32)>,
{
    let index: HashMap<EntryId, u32> = order
        .iter()
        .enumerate()
        .map(|(i, &id)| (id, i as u32))
        .collect();
    let index_of = |id: EntryId| {
        index
            .get(&id)
            .copied()
            .ok_or_else(|| Error::InvalidOperation(format!("entry {id} missing from walk order")))
    };

    // subtree sizes, children always follow their parent in `order`
    let mut span = vec![1u32; order.len()];
    for (i, &id) in order.iter().enumerate().rev() {
        if let Some(parent) = tree.get(id)?.parent() {
            let parent_index = index_of(parent)? as usize;
            span[parent_index] += span[i];
        }
    }

    let mut out = Vec::with_capacity(order.len() * ENTRY_SIZE);
    let mut strings = Vec::new();
    for (i, &id) in order.iter().enumerate() {
        let entry = tree.get(id)?;
        let name_offset = if i == 0 { 0 } else { strings.len() as u32 };
        if u64::from(name_offset) >= MAX_STRING_TABLE {
            return Err(Error::Capacity {
                required: strings.len() as u64,
                limit: MAX_STRING_TABLE,
            });
        }
        if i > 0 {
            strings.write_gc_cstring(entry.raw_name())?;
        }
        if entry.is_dir() {
            let parent = match entry.parent() {
                Some(p) => index_of(p)?,
                None => 0,
            };
            out.write_gc_u8(1)?;
            out.write_gc_u24(name_offset)?;
            out.write_gc_u32(parent)?;
            out.write_gc_u32(i as u32 + span[i])?;
        } else {
            let (offset, size) = extent(id).ok_or_else(|| {
                Error::InvalidOperation(format!("no placement for '{}'", entry.name()))
            })?;
            out.write_gc_u8(0)?;
            out.write_gc_u24(name_offset)?;
            out.write_gc_u32(offset)?;
            out.write_gc_u32(size)?;
        }
    }
    out.extend_from_slice(&strings);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ByteSource;
    use hex_literal::hex;

    // root, "a.txt" (file at 0x3000, 5 bytes), "dir" containing "b"
    const TABLE: [u8; 60] = hex!(
        "01000000 00000000 00000004"
        "00000000 00003000 00000005"
        "01000006 00000000 00000004"
        "0000000A 00003008 00000002"
        "612E7478 7400 646972 00 6200"
    );

    #[test]
    fn test_parse_table() {
        let entries = parse(&TABLE, 0x2800, 0x4000, true).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1].name, "a.txt");
        assert_eq!(
            entries[1].kind,
            FstKind::File {
                offset: 0x3000,
                size: 5
            }
        );
        assert_eq!(entries[2].kind, FstKind::Directory { next: 4 });
        assert_eq!(entries[3].name, "b");
        assert_eq!(entries[3].parent, 2);
    }

    #[test]
    fn test_rejects_wrong_parent() {
        let mut table = TABLE;
        table[2 * 12 + 7] = 1;
        let err = parse(&table, 0x2800, 0x4000, true).unwrap_err();
        assert!(matches!(err, Error::Format { offset, .. } if offset == 0x2800 + 24 + 4));
    }

    #[test]
    fn test_rejects_directory_past_parent() {
        let mut table = TABLE;
        table[2 * 12 + 11] = 5;
        assert!(parse(&table, 0x2800, 0x4000, true).is_err());
    }

    #[test]
    fn test_rejects_directory_ending_before_itself() {
        let mut table = TABLE;
        table[2 * 12 + 11] = 2;
        assert!(parse(&table, 0x2800, 0x4000, true).is_err());
    }

    #[test]
    fn test_rejects_name_outside_table() {
        let mut table = TABLE;
        table[12 + 3] = 0x40;
        assert!(parse(&table, 0x2800, 0x4000, true).is_err());
    }

    #[test]
    fn test_file_bounds_only_checked_with_sanity() {
        assert!(parse(&TABLE, 0x2800, 0x3002, true).is_err());
        assert!(parse(&TABLE, 0x2800, 0x3002, false).is_ok());
    }

    #[test]
    fn test_rejects_count_larger_than_table() {
        let mut table = TABLE;
        table[11] = 9;
        assert!(parse(&table, 0x2800, 0x4000, true).is_err());
        table[11] = 0;
        assert!(parse(&table, 0x2800, 0x4000, true).is_err());
    }

    #[test]
    fn test_serialize_reproduces_table() {
        let entries = parse(&TABLE, 0x2800, 0x4000, true).unwrap();
        let tree = Tree::from_fst(&entries);
        let order = tree.walk();
        let bytes = serialize(&tree, &order, |id| {
            let entry = tree.get(id).ok()?;
            Some((entry.offset()? as u32, entry.size() as u32))
        })
        .unwrap();
        assert_eq!(bytes, TABLE);
        assert_eq!(table_size(&tree, &order).unwrap(), (60, 12));
    }

    #[test]
    fn test_serialize_requires_file_extents() {
        let mut tree = Tree::new();
        let root = tree.root();
        tree.import_file(root, "x", ByteSource::Bytes(vec![1]))
            .unwrap();
        let order = tree.walk();
        assert!(serialize(&tree, &order, |_| None).is_err());
    }
}
