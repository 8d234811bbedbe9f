//! An open GameCube disk image.
//!
//! `Disk` owns the image handle, the parsed header and filesystem table, and
//! the editable `Tree`. Edits stay in memory until a plan is committed; every
//! successful commit re-reads the table from the result, so the tree always
//! describes what is on disk plus the edits made since.
use log::{debug, info, warn};
use serde_derive::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::banner::Banner;
use crate::compression::CompressionType;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fst::{self, FstEntry, FstKind};
use crate::header::{self, DiskHeader, SystemFile, DOL_HEADER_SIZE, FULL_DISC_SIZE, HEADER_SIZE};
use crate::host::{self, ExtractOptions};
use crate::layout::{self, Extent, ImageLayout, LayoutPlan};
use crate::progress::{CancelToken, Progress};
use crate::search::{self, SearchOptions};
use crate::store::{ImageStore, PayloadReader};
use crate::tree::{EntryId, Source, Tree};
use crate::writer::{self, CommitJob};

/// `Read + Seek` over a file's payload.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BannerEntry {
    pub file: String,
    #[serde(flatten)]
    pub banner: Banner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskInfo {
    pub game_code: String,
    pub maker_code: String,
    pub disc_number: u8,
    pub version: u8,
    pub game_name: String,
    pub apploader_version: String,
    pub image_size: u64,
    pub fst_offset: u32,
    pub fst_size: u32,
    pub files: usize,
    pub directories: usize,
    pub total_file_size: u64,
    pub banners: Vec<BannerEntry>,
}

/// Everything read from the image when it is opened or re-loaded.
struct Loaded {
    header: DiskHeader,
    dol_size: u64,
    layout: ImageLayout,
    fst_raw: Vec<u8>,
    table: Vec<FstEntry>,
}

fn load(store: &dyn ImageStore, config: &Config) -> Result<Loaded> {
    let image_len = store.len()?;
    if image_len < HEADER_SIZE as u64 {
        return Err(Error::format(
            image_len,
            "image is too small to hold a disk header",
        ));
    }
    let mut buf = vec![0u8; HEADER_SIZE];
    store.read_at(&mut buf, 0)?;
    let header = DiskHeader::parse(&buf)?;
    header.validate(image_len, config.sanity_checks)?;

    let dol_offset = u64::from(header.dol_offset);
    let dol_size = if dol_offset != 0 && dol_offset + DOL_HEADER_SIZE as u64 <= image_len {
        let mut dol = vec![0u8; DOL_HEADER_SIZE];
        store.read_at(&mut dol, dol_offset)?;
        header::dol_size(&dol).min(image_len - dol_offset)
    } else {
        0
    };

    let fst_offset = u64::from(header.fst_offset);
    let mut fst_raw = vec![0u8; header.fst_size as usize];
    store.read_at(&mut fst_raw, fst_offset)?;
    let table = fst::parse(&fst_raw, fst_offset, image_len, config.sanity_checks)?;

    let mut pinned = vec![Extent::new(0, header.apploader_end().min(image_len))];
    if dol_size > 0 {
        pinned.push(Extent::new(dol_offset, dol_size));
    }
    let files = table
        .iter()
        .filter_map(|e| match e.kind {
            FstKind::File { offset, size } => Some(Extent::new(u64::from(offset), u64::from(size))),
            FstKind::Directory { .. } => None,
        })
        .collect();
    let layout = ImageLayout {
        image_len,
        pinned,
        fst: Extent::new(fst_offset, u64::from(header.fst_size)),
        fst_max_size: u64::from(header.fst_max_size),
        files,
    };
    debug!(
        "loaded {} ({} entries, table at {:#x})",
        header.game_code,
        table.len(),
        fst_offset
    );
    Ok(Loaded {
        header,
        dol_size,
        layout,
        fst_raw,
        table,
    })
}

fn open_image(path: &Path) -> Result<File> {
    match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            warn!("'{}' is read-only, changes cannot be saved", path.display());
            File::open(path).map_err(|e| Error::io(format!("cannot open '{}'", path.display()), e))
        }
        Err(e) => Err(Error::io(format!("cannot open '{}'", path.display()), e)),
    }
}

pub struct Disk {
    path: Option<PathBuf>,
    store: Box<dyn ImageStore>,
    config: Config,
    header: DiskHeader,
    dol_size: u64,
    layout: ImageLayout,
    fst_raw: Vec<u8>,
    table: Vec<FstEntry>,
    tree: Tree,
    progress: Arc<Progress>,
    cancel: CancelToken,
}

impl std::fmt::Debug for Disk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disk")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("layout", &self.layout)
            .finish()
    }
}

impl Disk {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Disk> {
        Disk::open_with_config(path, Config::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: Config) -> Result<Disk> {
        let path = path.as_ref();
        config.validate()?;
        let file = open_image(path)?;
        let mut disk = Disk::new(Box::new(file), config)?;
        disk.path = Some(path.to_path_buf());
        info!("opened '{}'", path.display());
        Ok(disk)
    }

    /// Open an image held by any store. Without a path, only in-place
    /// commits and `commit_to` are possible.
    pub fn from_store(store: Box<dyn ImageStore>, config: Config) -> Result<Disk> {
        config.validate()?;
        Disk::new(store, config)
    }

    fn new(store: Box<dyn ImageStore>, config: Config) -> Result<Disk> {
        let loaded = load(&*store, &config)?;
        Ok(Disk {
            path: None,
            store,
            tree: Tree::from_fst(&loaded.table),
            header: loaded.header,
            dol_size: loaded.dol_size,
            layout: loaded.layout,
            fst_raw: loaded.fst_raw,
            table: loaded.table,
            config,
            progress: Arc::new(Progress::new()),
            cancel: CancelToken::new(),
        })
    }

    fn reload(&mut self) -> Result<()> {
        let loaded = load(&*self.store, &self.config)?;
        self.tree = Tree::from_fst(&loaded.table);
        self.header = loaded.header;
        self.dol_size = loaded.dol_size;
        self.layout = loaded.layout;
        self.fst_raw = loaded.fst_raw;
        self.table = loaded.table;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn header(&self) -> &DiskHeader {
        &self.header
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    /// Shared progress of commits on this disk.
    pub fn progress(&self) -> Arc<Progress> {
        self.progress.clone()
    }

    /// Cancels the running or next commit on this disk.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn image_len(&self) -> Result<u64> {
        self.store.len()
    }

    pub fn info(&self) -> Result<DiskInfo> {
        let files = self.tree.file_count();
        Ok(DiskInfo {
            game_code: self.header.game_code.clone(),
            maker_code: self.header.maker_code.clone(),
            disc_number: self.header.disc_number,
            version: self.header.version,
            game_name: self.header.game_name.clone(),
            apploader_version: self.header.apploader_version.clone(),
            image_size: self.store.len()?,
            fst_offset: self.header.fst_offset,
            fst_size: self.header.fst_size,
            files,
            directories: self.tree.entry_count() - files - 1,
            total_file_size: self.tree.total_size(self.tree.root()),
            banners: self.banners(),
        })
    }

    pub fn system_files(&self) -> Vec<SystemFile> {
        header::system_files(&self.header, self.dol_size)
    }

    pub fn read_system_file(&self, name: &str) -> Result<Vec<u8>> {
        let file = self
            .system_files()
            .into_iter()
            .find(|f| f.name == name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        let mut data = vec![0u8; file.size as usize];
        self.store.read_at(&mut data, file.offset)?;
        Ok(data)
    }

    pub fn extract_system_file<P: AsRef<Path>>(&self, name: &str, dest: P) -> Result<()> {
        let dest = dest.as_ref();
        let data = self.read_system_file(name)?;
        std::fs::write(dest, data).map_err(|e| Error::io(format!("cannot write '{}'", dest.display()), e))
    }

    /// Lazy reader over a file's current contents, wherever they live.
    pub fn payload(&self, id: EntryId) -> Result<Box<dyn ReadSeek + '_>> {
        let entry = self.tree.get(id)?;
        let size = entry.size();
        match entry.source() {
            None => Err(Error::IsADirectory(self.tree.path(id)?)),
            Some(Source::Image { offset }) => Ok(Box::new(PayloadReader::new(&*self.store, *offset, size))),
            Some(Source::Host { path }) => {
                let file = File::open(path)
                    .map_err(|e| Error::io(format!("cannot open '{}'", path.display()), e))?;
                Ok(Box::new(PayloadReader::new(file, 0, size)))
            }
            Some(Source::Memory(bytes)) => Ok(Box::new(Cursor::new(bytes.clone()))),
        }
    }

    pub fn read_file(&self, id: EntryId) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(self.tree.get(id)?.size() as usize);
        self.payload(id)?
            .read_to_end(&mut data)
            .map_err(|e| Error::from(e).at_path(&self.tree.path(id).unwrap_or_default()))?;
        Ok(data)
    }

    /// Read a file, decompressing it if it is Yaz0.
    pub fn read_file_decoded(&self, id: EntryId) -> Result<Vec<u8>> {
        let data = self.read_file(id)?;
        let compression = CompressionType::detect(&data);
        CompressionType::decompress(&data, compression).map_err(|e| match self.tree.path(id) {
            Ok(path) => e.at_path(&path),
            Err(_) => e,
        })
    }

    pub fn banner(&self, id: EntryId) -> Result<Banner> {
        Banner::parse(&self.read_file(id)?)
    }

    /// Every `*.bnr` file in the root that parses as a banner.
    pub fn banners(&self) -> Vec<BannerEntry> {
        let root = self.tree.root();
        let mut banners = Vec::new();
        for &id in self.tree.get(root).map(|e| e.children()).unwrap_or(&[]) {
            let entry = match self.tree.get(id) {
                Ok(entry) if !entry.is_dir() && entry.name().to_lowercase().ends_with(".bnr") => entry,
                _ => continue,
            };
            match self.banner(id) {
                Ok(banner) => banners.push(BannerEntry {
                    file: entry.name().to_string(),
                    banner,
                }),
                Err(e) => warn!("cannot read banner '{}': {}", entry.name(), e),
            }
        }
        banners
    }

    pub fn search(&self, pattern: &str, options: &SearchOptions) -> Result<Vec<EntryId>> {
        search::search(&self.tree, self.tree.root(), pattern, options)
    }

    pub fn extract<P: AsRef<Path>>(&self, id: EntryId, dest: P, options: &ExtractOptions) -> Result<Vec<PathBuf>> {
        host::extract(self, id, dest.as_ref(), options)
    }

    /// Plan an in-place commit of the current tree.
    pub fn plan(&self) -> Result<LayoutPlan> {
        layout::plan(&self.tree, &self.layout, &self.config)
    }

    /// Plan a compacted copy of the current tree.
    pub fn plan_repack(&self) -> Result<LayoutPlan> {
        layout::plan_repack(&self.tree, &self.layout, &self.config)
    }

    fn check_plan(&self, plan: &LayoutPlan) -> Result<()> {
        if plan.generation != self.tree.generation() || plan.image_len != self.layout.image_len {
            return Err(Error::StalePlan);
        }
        Ok(())
    }

    fn job<'a>(&'a self, plan: &'a LayoutPlan) -> CommitJob<'a> {
        CommitJob {
            source: &*self.store,
            plan,
            layout: &self.layout,
            config: &self.config,
            progress: &self.progress,
            cancel: &self.cancel,
        }
    }

    /// Write `plan` to this disk's image.
    ///
    /// In-place plans are applied to the open image; others are staged in a
    /// temporary file and renamed over the image path.
    pub fn commit(&mut self, plan: &LayoutPlan) -> Result<()> {
        self.check_plan(plan)?;
        if plan.noop {
            debug!("nothing to commit");
            return Ok(());
        }
        if !plan.in_place {
            let path = self.path.clone().ok_or_else(|| {
                Error::InvalidOperation("this plan needs an image path to stage a copy".to_string())
            })?;
            return self.commit_staged(plan, &path);
        }
        let result = writer::commit_in_place(&self.job(plan));
        self.cancel.reset();
        result?;
        self.reload()
    }

    /// Write the planned image to `target`, leaving the current image
    /// untouched unless `target` is the current image. The disk follows the
    /// new image afterwards.
    pub fn commit_to<P: AsRef<Path>>(&mut self, plan: &LayoutPlan, target: P) -> Result<()> {
        let target = target.as_ref();
        if self.is_own_path(target) {
            return self.commit(plan);
        }
        self.check_plan(plan)?;
        self.commit_staged(plan, target)
    }

    fn commit_staged(&mut self, plan: &LayoutPlan, target: &Path) -> Result<()> {
        let result = writer::commit_staged(&self.job(plan), target);
        self.cancel.reset();
        let file = result?;
        self.store = Box::new(file);
        self.path = Some(target.to_path_buf());
        self.reload()
    }

    fn is_own_path(&self, target: &Path) -> bool {
        let own = match &self.path {
            Some(own) => own,
            None => return false,
        };
        match (own.canonicalize(), target.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => own == target,
        }
    }

    /// True if the table on disk no longer matches the one loaded, for
    /// example because another program wrote to the image.
    pub fn disk_changed(&self) -> Result<bool> {
        let mut buf = vec![0u8; HEADER_SIZE];
        let len = self.store.len()?;
        if len < HEADER_SIZE as u64 {
            return Ok(true);
        }
        self.store.read_at(&mut buf, 0)?;
        let header = match DiskHeader::parse(&buf) {
            Ok(header) => header,
            Err(_) => return Ok(true),
        };
        if header.validate(len, self.config.sanity_checks).is_err() {
            return Ok(true);
        }
        if header.fst_offset != self.header.fst_offset || header.fst_size != self.header.fst_size {
            return Ok(true);
        }
        let mut fst_raw = vec![0u8; header.fst_size as usize];
        self.store.read_at(&mut fst_raw, u64::from(header.fst_offset))?;
        Ok(fst_raw != self.fst_raw)
    }

    /// Drop every edit made since the last load or commit.
    pub fn revert(&mut self) {
        self.tree = Tree::from_fst(&self.table);
    }

    /// Rewrite the image with all free space removed.
    pub fn compact(&mut self) -> Result<()> {
        let plan = self.plan_repack()?;
        let path = self.path.clone().ok_or_else(|| {
            Error::InvalidOperation("compacting needs an image path".to_string())
        })?;
        let before = self.store.len()?;
        self.commit_staged(&plan, &path)?;
        info!("compacted image from {} to {} bytes", before, plan.total_size);
        Ok(())
    }

    /// Extend the image to the size of a full disc, compacting it first if
    /// it is larger than that.
    pub fn pad_to_full_size(&mut self) -> Result<()> {
        if self.store.len()? > FULL_DISC_SIZE {
            self.compact()?;
        }
        let len = self.store.len()?;
        if len > FULL_DISC_SIZE {
            return Err(Error::Capacity {
                required: len,
                limit: FULL_DISC_SIZE,
            });
        }
        if len < FULL_DISC_SIZE {
            self.store.set_len(FULL_DISC_SIZE)?;
            self.store.sync()?;
            self.layout.image_len = FULL_DISC_SIZE;
            info!("padded image from {} to {} bytes", len, FULL_DISC_SIZE);
        }
        Ok(())
    }
}
