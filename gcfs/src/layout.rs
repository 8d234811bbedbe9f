//! Layout planning
//! ---------------
//!
//! A `LayoutPlan` says where the filesystem table and every file of a tree go
//! in the image. Planning is pure: it reads the tree and the current
//! `ImageLayout` and never touches the image.
//!
//! Two planners exist:
//!
//! * `plan` rewrites as little as possible. Files still backed by the image
//!   stay where they are, and the new table plus any new or moved payloads go
//!   into space that is free both before and after the commit. The old table
//!   and every old payload stay intact until the header is switched over, so
//!   the plan can be applied to the open image in place.
//! * `plan_repack` packs the table and every file right after the system
//!   area, in walk order, dropping all free space. It overwrites live data
//!   and is only ever applied to a fresh copy of the image.
use log::debug;
use serde_derive::Serialize;
use std::collections::{HashMap, HashSet};

use crate::binary::align_up;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fst::{self, MAX_STRING_TABLE};
use crate::header::MAX_FST_SIZE;
use crate::tree::{EntryId, Source, Tree};

const MAX_OFFSET: u64 = u32::MAX as u64 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Extent {
    pub offset: u64,
    pub size: u64,
}

impl Extent {
    pub fn new(offset: u64, size: u64) -> Extent {
        Extent { offset, size }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub fn overlaps(&self, other: &Extent) -> bool {
        self.size > 0 && other.size > 0 && self.offset < other.end() && other.offset < self.end()
    }
}

/// What the image looks like on disk right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    pub image_len: u64,
    /// System files that are never moved or overwritten.
    pub pinned: Vec<Extent>,
    pub fst: Extent,
    pub fst_max_size: u64,
    /// Payload extents referenced by the current table.
    pub files: Vec<Extent>,
}

impl ImageLayout {
    pub fn pinned_end(&self) -> u64 {
        self.pinned.iter().map(Extent::end).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct Placement {
    pub entry: EntryId,
    pub path: String,
    pub offset: u64,
    pub size: u64,
    pub source: Source,
    /// False when the payload already sits at `offset`.
    pub write: bool,
}

impl Placement {
    pub fn extent(&self) -> Extent {
        Extent::new(self.offset, self.size)
    }
}

#[derive(Debug, Clone)]
pub struct LayoutPlan {
    /// Tree generation the plan was computed from.
    pub generation: u64,
    /// Image length the plan was computed against.
    pub image_len: u64,
    pub fst_offset: u64,
    /// Serialized table; empty for a no-op plan.
    pub fst: Vec<u8>,
    pub fst_max_size: u64,
    /// One placement per file, in walk order.
    pub placements: Vec<Placement>,
    pub total_size: u64,
    /// Safe to apply to the open image without a copy.
    pub in_place: bool,
    /// Nothing changed; committing writes nothing.
    pub noop: bool,
}

impl LayoutPlan {
    pub fn fst_extent(&self) -> Extent {
        Extent::new(self.fst_offset, self.fst.len() as u64)
    }

    /// Bytes a commit of this plan has to copy.
    pub fn bytes_to_write(&self) -> u64 {
        self.placements
            .iter()
            .filter(|p| p.write)
            .map(|p| p.size)
            .sum::<u64>()
            + self.fst.len() as u64
    }
}

/// Free space tracker: a sorted list of gaps below `end`, plus everything
/// from `end` onwards.
struct FreeSpace {
    gaps: Vec<(u64, u64)>,
    end: u64,
    alignment: u64,
}

impl FreeSpace {
    fn new(mut occupied: Vec<Extent>, limit: u64, alignment: u64) -> FreeSpace {
        occupied.retain(|e| e.size > 0);
        occupied.sort_by_key(|e| e.offset);
        let mut gaps = Vec::new();
        let mut cursor = 0;
        for extent in &occupied {
            if extent.offset > cursor && cursor < limit {
                gaps.push((cursor, extent.offset.min(limit)));
            }
            cursor = cursor.max(extent.end());
        }
        if cursor < limit {
            gaps.push((cursor, limit));
        }
        FreeSpace {
            gaps,
            end: cursor.max(limit),
            alignment,
        }
    }

    fn fit(&self, gap: (u64, u64), size: u64) -> Option<u64> {
        let offset = align_up(gap.0, self.alignment);
        (offset + size <= gap.1).then_some(offset)
    }

    /// Lowest gap that can hold `size`, else the end.
    fn first_fit(&mut self, size: u64) -> u64 {
        let found = self
            .gaps
            .iter()
            .enumerate()
            .find_map(|(i, &gap)| self.fit(gap, size).map(|o| (i, o)));
        match found {
            Some((index, offset)) => self.take(index, offset, size),
            None => self.append(size),
        }
    }

    /// Smallest gap that can hold `size`, else the end.
    fn best_fit(&mut self, size: u64) -> u64 {
        let found = self
            .gaps
            .iter()
            .enumerate()
            .filter_map(|(i, &gap)| self.fit(gap, size).map(|o| (i, o, gap.1 - gap.0)))
            .min_by_key(|&(_, _, len)| len);
        match found {
            Some((index, offset, _)) => self.take(index, offset, size),
            None => self.append(size),
        }
    }

    fn take(&mut self, index: usize, offset: u64, size: u64) -> u64 {
        let (start, end) = self.gaps.remove(index);
        if offset + size < end {
            self.gaps.insert(index, (offset + size, end));
        }
        if start < offset {
            self.gaps.insert(index, (start, offset));
        }
        offset
    }

    fn append(&mut self, size: u64) -> u64 {
        let offset = align_up(self.end, self.alignment);
        self.end = offset + size;
        offset
    }
}

fn check_table_capacity(fst_size: u64, strings: u64) -> Result<()> {
    if fst_size > MAX_FST_SIZE {
        return Err(Error::Capacity {
            required: fst_size,
            limit: MAX_FST_SIZE,
        });
    }
    if strings > MAX_STRING_TABLE {
        return Err(Error::Capacity {
            required: strings,
            limit: MAX_STRING_TABLE,
        });
    }
    Ok(())
}

fn file_placements(tree: &Tree, order: &[EntryId]) -> Result<Vec<Placement>> {
    let mut placements = Vec::new();
    for &id in order {
        let entry = tree.get(id)?;
        if let Some(source) = entry.source() {
            placements.push(Placement {
                entry: id,
                path: tree.path(id)?,
                offset: entry.offset().unwrap_or(0),
                size: entry.size(),
                source: source.clone(),
                write: true,
            });
        }
    }
    Ok(placements)
}

/// Plan the smallest rewrite that applies the tree's changes in place.
pub fn plan(tree: &Tree, layout: &ImageLayout, config: &Config) -> Result<LayoutPlan> {
    let order = tree.walk();
    let mut placements = file_placements(tree, &order)?;

    if !tree.is_dirty() {
        for placement in &mut placements {
            placement.write = false;
        }
        return Ok(LayoutPlan {
            generation: tree.generation(),
            image_len: layout.image_len,
            fst_offset: layout.fst.offset,
            fst: Vec::new(),
            fst_max_size: layout.fst_max_size,
            placements,
            total_size: layout.image_len,
            in_place: true,
            noop: true,
        });
    }

    let (fst_size, strings) = fst::table_size(tree, &order)?;
    check_table_capacity(fst_size, strings)?;

    // the first reference to an image extent keeps it, copies get relocated
    let mut kept = HashSet::new();
    for placement in &mut placements {
        if let Source::Image { offset } = placement.source {
            if kept.insert((offset, placement.size)) {
                placement.write = false;
            }
        }
    }

    let mut occupied = layout.pinned.clone();
    occupied.push(layout.fst);
    occupied.extend(layout.files.iter().copied());
    occupied.extend(placements.iter().filter(|p| !p.write).map(Placement::extent));
    let mut space = FreeSpace::new(occupied, layout.image_len, config.alignment);

    let fst_offset = space.first_fit(fst_size);

    let mut pending: Vec<usize> = (0..placements.len())
        .filter(|&i| placements[i].write)
        .collect();
    pending.sort_by(|&a, &b| placements[b].size.cmp(&placements[a].size));
    for index in pending {
        let placement = &mut placements[index];
        placement.offset = match placement.size {
            0 => fst_offset,
            size => space.best_fit(size),
        };
    }

    let total_size = layout.image_len.max(space.end);
    debug!(
        "in-place plan: table at {:#x} ({} bytes), {} files to write, total {:#x}",
        fst_offset,
        fst_size,
        placements.iter().filter(|p| p.write).count(),
        total_size
    );
    finish(
        tree,
        &order,
        placements,
        fst_offset,
        fst_size.max(layout.fst_max_size),
        total_size,
        layout.image_len,
        true,
        config,
    )
}

/// Plan a compacted image: table and files packed after the system area.
pub fn plan_repack(tree: &Tree, layout: &ImageLayout, config: &Config) -> Result<LayoutPlan> {
    let order = tree.walk();
    let mut placements = file_placements(tree, &order)?;
    let (fst_size, strings) = fst::table_size(tree, &order)?;
    check_table_capacity(fst_size, strings)?;

    let mut space = FreeSpace::new(layout.pinned.clone(), layout.pinned_end(), config.alignment);
    let fst_offset = space.first_fit(fst_size);
    for placement in &mut placements {
        placement.write = true;
        placement.offset = match placement.size {
            0 => fst_offset,
            size => space.first_fit(size),
        };
    }

    let total_size = space.end;
    debug!(
        "repack plan: table at {:#x}, {} files, total {:#x}",
        fst_offset,
        placements.len(),
        total_size
    );
    finish(
        tree,
        &order,
        placements,
        fst_offset,
        fst_size,
        total_size,
        layout.image_len,
        false,
        config,
    )
}

#[allow(clippy::too_many_arguments)]
fn finish(
    tree: &Tree,
    order: &[EntryId],
    placements: Vec<Placement>,
    fst_offset: u64,
    fst_max_size: u64,
    total_size: u64,
    image_len: u64,
    in_place: bool,
    config: &Config,
) -> Result<LayoutPlan> {
    if total_size > config.max_image_size {
        return Err(Error::Capacity {
            required: total_size,
            limit: config.max_image_size,
        });
    }
    let mut extents = HashMap::with_capacity(placements.len());
    for placement in &placements {
        if placement.offset >= MAX_OFFSET || placement.size >= MAX_OFFSET {
            return Err(Error::Capacity {
                required: placement.offset + placement.size,
                limit: MAX_OFFSET,
            });
        }
        extents.insert(
            placement.entry,
            (placement.offset as u32, placement.size as u32),
        );
    }
    if fst_offset >= MAX_OFFSET {
        return Err(Error::Capacity {
            required: fst_offset,
            limit: MAX_OFFSET,
        });
    }
    let fst = fst::serialize(tree, order, |id| extents.get(&id).copied())?;
    Ok(LayoutPlan {
        generation: tree.generation(),
        image_len,
        fst_offset,
        fst,
        fst_max_size,
        placements,
        total_size,
        in_place,
        noop: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ByteSource;

    fn layout() -> ImageLayout {
        ImageLayout {
            image_len: 0x3000,
            pinned: vec![Extent::new(0, 0x2500), Extent::new(0x2500, 0x100)],
            fst: Extent::new(0x2600, 0x20),
            fst_max_size: 0x20,
            files: vec![Extent::new(0x2800, 0x400), Extent::new(0x2C00, 0x100)],
        }
    }

    fn new_file(tree: &mut Tree, name: &str, size: u64) -> EntryId {
        let root = tree.root();
        tree.import_file(root, name, ByteSource::Bytes(vec![0; size as usize]))
            .unwrap()
    }

    fn assert_disjoint(plan: &LayoutPlan, layout: &ImageLayout, alignment: u64) {
        let mut regions: Vec<Extent> = plan.placements.iter().map(Placement::extent).collect();
        regions.push(plan.fst_extent());
        for (i, a) in regions.iter().enumerate() {
            for pinned in &layout.pinned {
                assert!(!a.overlaps(pinned), "{a:?} overlaps pinned {pinned:?}");
            }
            for b in &regions[i + 1..] {
                assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
            }
        }
        for placement in plan.placements.iter().filter(|p| p.write) {
            assert_eq!(placement.offset % alignment, 0);
            assert!(placement.extent().end() <= plan.total_size);
        }
        assert_eq!(plan.fst_offset % alignment, 0);
    }

    #[test]
    fn test_clean_tree_gives_noop_plan() {
        let tree = Tree::new();
        let plan = plan(&tree, &layout(), &Config::default()).unwrap();
        assert!(plan.noop);
        assert_eq!(plan.total_size, 0x3000);
        assert_eq!(plan.bytes_to_write(), 0);
    }

    #[test]
    fn test_new_files_avoid_old_and_new_data() {
        let layout = layout();
        let mut tree = Tree::new();
        let big = new_file(&mut tree, "big.bin", 0x150);
        new_file(&mut tree, "small.bin", 0x10);
        let plan = plan(&tree, &layout, &Config::default()).unwrap();
        assert_disjoint(&plan, &layout, 4);

        let old: Vec<Extent> = layout
            .files
            .iter()
            .copied()
            .chain(std::iter::once(layout.fst))
            .collect();
        for placement in &plan.placements {
            for extent in &old {
                assert!(!placement.extent().overlaps(extent));
            }
        }
        // the largest file goes first, into the smallest gap that holds it
        let big = plan.placements.iter().find(|p| p.entry == big).unwrap();
        assert_eq!(big.offset, 0x2658);
    }

    #[test]
    fn test_table_is_placed_first_fit() {
        let layout = layout();
        let mut tree = Tree::new();
        new_file(&mut tree, "a.txt", 10);
        let plan = plan(&tree, &layout, &Config::default()).unwrap();
        // 2 entries plus "a.txt\0"
        assert_eq!(plan.fst.len(), 30);
        assert_eq!(plan.fst_offset, 0x2620);
        assert_eq!(plan.placements[0].offset, 0x2640);
        assert_eq!(plan.fst_max_size, 0x20);
    }

    #[test]
    fn test_alignment_is_respected() {
        let layout = layout();
        let mut tree = Tree::new();
        for (i, size) in [3u64, 0x801, 7, 0x20].iter().enumerate() {
            new_file(&mut tree, &format!("f{i}"), *size);
        }
        let config = Config {
            alignment: 0x800,
            ..Config::default()
        };
        let plan = plan(&tree, &layout, &config).unwrap();
        assert_disjoint(&plan, &layout, 0x800);
        assert!(plan.total_size >= layout.image_len);
    }

    #[test]
    fn test_capacity_error_before_any_write() {
        let layout = layout();
        let mut tree = Tree::new();
        new_file(&mut tree, "huge", 0x1000);
        let config = Config {
            max_image_size: 0x3000,
            ..Config::default()
        };
        let err = plan(&tree, &layout, &config).unwrap_err();
        assert!(matches!(err, Error::Capacity { limit: 0x3000, .. }));
    }

    #[test]
    fn test_repack_packs_after_system_area() {
        let layout = layout();
        let mut tree = Tree::new();
        new_file(&mut tree, "a", 5);
        new_file(&mut tree, "b", 8);
        let plan = plan_repack(&tree, &layout, &Config::default()).unwrap();
        assert!(!plan.in_place);
        assert_eq!(plan.fst_offset, 0x2600);
        // 3 entries + "a\0" + "b\0"
        assert_eq!(plan.fst.len(), 40);
        assert_eq!(plan.placements[0].offset, 0x2628);
        assert_eq!(plan.placements[1].offset, 0x2630);
        assert_eq!(plan.total_size, 0x2638);
        assert_disjoint(&plan, &layout, 4);
    }

    #[test]
    fn test_free_space_splits_gaps() {
        let mut space = FreeSpace::new(vec![Extent::new(0, 4), Extent::new(20, 4)], 40, 4);
        assert_eq!(space.gaps, vec![(4, 20), (24, 40)]);
        assert_eq!(space.best_fit(5), 4);
        assert_eq!(space.gaps, vec![(9, 20), (24, 40)]);
        assert_eq!(space.best_fit(16), 24);
        assert_eq!(space.first_fit(32), 40);
        assert_eq!(space.end, 72);
    }
}
