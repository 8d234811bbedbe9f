//! Building a disk image from scratch.
//!
//! The result is a minimal but valid image: a header, a placeholder
//! apploader and main.dol, and a filesystem table holding the given
//! directories and files, laid out the same way `Disk::compact` lays out an
//! existing disk.
use log::debug;
use std::path::Path;

use crate::binary::align_up;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::header::{self, fst_pointer, APPLOADER_OFFSET, DOL_HEADER_SIZE, DVD_MAGIC, FST_POINTER_OFFSET};
use crate::layout::{self, Extent, ImageLayout};
use crate::tree::{ByteSource, Source, Tree};

const APPLOADER_VERSION: &[u8] = b"2004/02/01";
const APPLOADER_ENTRY: u32 = 0x8120_0000;

/// A DOL with one 0x20-byte text section right after its header.
fn placeholder_dol() -> Vec<u8> {
    let mut dol = vec![0u8; DOL_HEADER_SIZE + 0x20];
    dol[0..4].copy_from_slice(&(DOL_HEADER_SIZE as u32).to_be_bytes());
    dol[0x48..0x4C].copy_from_slice(&0x8000_3100u32.to_be_bytes());
    dol[0x90..0x94].copy_from_slice(&0x20u32.to_be_bytes());
    dol
}

fn put_text(buf: &mut [u8], at: usize, field: usize, text: &str) {
    let bytes = text.as_bytes();
    let n = bytes.len().min(field);
    buf[at..at + n].copy_from_slice(&bytes[..n]);
}

#[derive(Debug, Clone)]
enum Item {
    Directory(String),
    File(String, Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct ImageBuilder {
    game_code: String,
    maker_code: String,
    game_name: String,
    alignment: u64,
    fst_offset: Option<u64>,
    dol: Option<Vec<u8>>,
    pad_to: Option<u64>,
    apploader_size: u32,
    items: Vec<Item>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        ImageBuilder {
            game_code: "GTST".to_string(),
            maker_code: "01".to_string(),
            game_name: "gcfs test disc".to_string(),
            alignment: 4,
            fst_offset: None,
            dol: None,
            pad_to: None,
            apploader_size: 0x100,
            items: Vec::new(),
        }
    }
}

impl ImageBuilder {
    pub fn new() -> ImageBuilder {
        ImageBuilder::default()
    }

    pub fn game_code(mut self, code: &str) -> Self {
        self.game_code = code.to_string();
        self
    }

    pub fn maker_code(mut self, code: &str) -> Self {
        self.maker_code = code.to_string();
        self
    }

    pub fn game_name(mut self, name: &str) -> Self {
        self.game_name = name.to_string();
        self
    }

    pub fn alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    /// Put the filesystem table at `offset`, leaving the space between the
    /// system area and the table unused.
    pub fn fst_offset(mut self, offset: u64) -> Self {
        self.fst_offset = Some(offset);
        self
    }

    pub fn dol(mut self, dol: Vec<u8>) -> Self {
        self.dol = Some(dol);
        self
    }

    /// Make the image at least `size` bytes long.
    pub fn pad_to(mut self, size: u64) -> Self {
        self.pad_to = Some(size);
        self
    }

    pub fn apploader_size(mut self, size: u32) -> Self {
        self.apploader_size = size;
        self
    }

    /// Add an empty directory, creating missing parents.
    pub fn directory(mut self, path: &str) -> Self {
        self.items.push(Item::Directory(path.to_string()));
        self
    }

    /// Add a file, creating missing parent directories.
    pub fn file(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.items.push(Item::File(path.to_string(), data.into()));
        self
    }

    fn tree(&self) -> Result<Tree> {
        let mut tree = Tree::new();
        for item in &self.items {
            let (path, data) = match item {
                Item::Directory(path) => (path, None),
                Item::File(path, data) => (path, Some(data)),
            };
            let mut parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
            let leaf = match data {
                Some(_) => parts.pop(),
                None => None,
            };
            let mut dir = tree.root();
            for part in parts {
                dir = match tree.child(dir, part)? {
                    Some(id) => id,
                    None => tree.create_directory(dir, part)?,
                };
            }
            if let (Some(leaf), Some(data)) = (leaf, data) {
                tree.import_file(dir, leaf, ByteSource::Bytes(data.clone()))?;
            }
        }
        Ok(tree)
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        let config = Config {
            alignment: self.alignment,
            ..Config::default()
        };
        config.validate()?;
        let tree = self.tree()?;

        let dol = self.dol.clone().unwrap_or_else(placeholder_dol);
        let apploader_end = APPLOADER_OFFSET + 0x20 + u64::from(self.apploader_size);
        let dol_offset = align_up(apploader_end, 0x100);
        let dol_size = header::dol_size(&dol).max(dol.len() as u64);
        let mut pinned = vec![Extent::new(0, dol_offset), Extent::new(dol_offset, dol_size)];
        let system_end = dol_offset + dol_size;
        if let Some(offset) = self.fst_offset {
            if offset < system_end {
                return Err(Error::InvalidOperation(format!(
                    "filesystem table offset {offset:#x} overlaps the system area ending at {system_end:#x}"
                )));
            }
            pinned.push(Extent::new(system_end, offset - system_end));
        }
        let layout = ImageLayout {
            image_len: 0,
            pinned,
            fst: Extent::new(0, 0),
            fst_max_size: 0,
            files: Vec::new(),
        };
        let plan = layout::plan_repack(&tree, &layout, &config)?;

        let total = plan.total_size.max(self.pad_to.unwrap_or(0));
        let mut image = vec![0u8; total as usize];
        put_text(&mut image, 0, 4, &self.game_code);
        put_text(&mut image, 4, 2, &self.maker_code);
        image[0x1C..0x20].copy_from_slice(&DVD_MAGIC.to_be_bytes());
        put_text(&mut image, 0x20, 0x3DF, &self.game_name);
        image[0x420..0x424].copy_from_slice(&(dol_offset as u32).to_be_bytes());
        let pointer_at = FST_POINTER_OFFSET as usize;
        image[pointer_at..pointer_at + 12].copy_from_slice(&fst_pointer(
            plan.fst_offset as u32,
            plan.fst.len() as u32,
            plan.fst_max_size as u32,
        ));

        let apploader = APPLOADER_OFFSET as usize;
        image[apploader..apploader + APPLOADER_VERSION.len()].copy_from_slice(APPLOADER_VERSION);
        image[0x2450..0x2454].copy_from_slice(&APPLOADER_ENTRY.to_be_bytes());
        image[0x2454..0x2458].copy_from_slice(&self.apploader_size.to_be_bytes());

        let dol_at = dol_offset as usize;
        image[dol_at..dol_at + dol.len()].copy_from_slice(&dol);

        let fst_at = plan.fst_offset as usize;
        image[fst_at..fst_at + plan.fst.len()].copy_from_slice(&plan.fst);
        for placement in &plan.placements {
            let at = placement.offset as usize;
            match &placement.source {
                Source::Memory(bytes) => image[at..at + bytes.len()].copy_from_slice(bytes),
                _ => {
                    return Err(Error::InvalidOperation(format!(
                        "'{}' is not held in memory",
                        placement.path
                    )))
                }
            }
        }
        debug!(
            "built {} byte image with {} files, table at {:#x}",
            total,
            plan.placements.len(),
            plan.fst_offset
        );
        Ok(image)
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let image = self.build()?;
        std::fs::write(path, image).map_err(|e| Error::io(format!("cannot write '{}'", path.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::Disk;
    use crate::header::{DiskHeader, HEADER_SIZE};
    use std::io::Write;

    fn open(image: &[u8]) -> Disk {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(image).unwrap();
        Disk::from_store(Box::new(file), Config::default()).unwrap()
    }

    #[test]
    fn test_build_minimal() {
        let image = ImageBuilder::new().game_code("GABC").game_name("Minimal").build().unwrap();
        let header = DiskHeader::parse(&image[..HEADER_SIZE]).unwrap();
        assert_eq!(header.game_code, "GABC");
        assert_eq!(header.game_name, "Minimal");
        assert_eq!(header.magic, DVD_MAGIC);
        assert_eq!(header.fst_size, 12);
        assert_eq!(u64::from(header.fst_offset), u64::from(header.dol_offset) + 0x120);

        let disk = open(&image);
        assert_eq!(disk.tree().entry_count(), 1);
        assert_eq!(disk.system_files().len(), 4);
    }

    #[test]
    fn test_build_with_files() {
        let image = ImageBuilder::new()
            .file("readme.txt", b"hello".to_vec())
            .file("/data/b.bin", vec![7u8; 100])
            .directory("data/empty")
            .build()
            .unwrap();
        let disk = open(&image);
        let tree = disk.tree();
        let readme = tree.resolve("/readme.txt").unwrap();
        assert_eq!(disk.read_file(readme).unwrap(), b"hello");
        let b = tree.resolve("/data/b.bin").unwrap();
        assert_eq!(disk.read_file(b).unwrap(), vec![7u8; 100]);
        assert!(tree.get(tree.resolve("/data/empty").unwrap()).unwrap().is_dir());
    }

    #[test]
    fn test_build_fst_offset_and_padding() {
        let image = ImageBuilder::new()
            .fst_offset(0x10000)
            .pad_to(0x20000)
            .file("a.txt", b"a".to_vec())
            .build()
            .unwrap();
        assert_eq!(image.len(), 0x20000);
        let header = DiskHeader::parse(&image[..HEADER_SIZE]).unwrap();
        assert_eq!(header.fst_offset, 0x10000);

        assert!(matches!(
            ImageBuilder::new().fst_offset(0x2460).build(),
            Err(Error::InvalidOperation(_))
        ));
    }
}
