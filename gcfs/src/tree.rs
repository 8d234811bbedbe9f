//! Directory tree
//! --------------
//!
//! The in-memory view of a disk's filesystem. Entries live in an arena and are
//! addressed by `EntryId`; a directory holds the ordered ids of its children
//! and every entry knows its parent, so moves can be validated by walking the
//! ancestor chain.
//!
//! File entries never hold their payload. They carry a `Source` describing
//! where the bytes come from: the image they were loaded from, a file on the
//! host, or a buffer handed in by the caller.
//!
//! Every mutation validates its arguments before touching the tree and
//! either succeeds completely or leaves the tree as it was. Successful
//! mutations mark the changed entry and its ancestors dirty and take a new
//! generation stamp, which the layout planner records to detect stale plans.
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::fst::{FstEntry, FstKind};
use crate::name::{encode_name, sort_key};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(usize);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a file's bytes currently live.
#[derive(Debug, Clone)]
pub enum Source {
    /// At an offset in the open image.
    Image { offset: u64 },
    /// In a file on the host, read at commit time.
    Host { path: PathBuf },
    Memory(Arc<[u8]>),
}

/// Payload handed to `import_file` and `replace_file`.
#[derive(Debug, Clone)]
pub enum ByteSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl ByteSource {
    fn into_source(self) -> Result<(Source, u64)> {
        match self {
            ByteSource::Path(path) => {
                let meta = std::fs::metadata(&path)
                    .map_err(|e| Error::io(format!("cannot read '{}'", path.display()), e))?;
                if meta.is_dir() {
                    return Err(Error::IsADirectory(path.display().to_string()));
                }
                Ok((Source::Host { path }, meta.len()))
            }
            ByteSource::Bytes(bytes) => {
                let size = bytes.len() as u64;
                Ok((Source::Memory(Arc::from(bytes)), size))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum EntryKind {
    File { source: Source, size: u64 },
    Directory { children: Vec<EntryId> },
}

#[derive(Debug, Clone)]
pub struct Entry {
    name: String,
    raw_name: Vec<u8>,
    parent: Option<EntryId>,
    kind: EntryKind,
    dirty: bool,
}

impl Entry {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name as stored in the string table.
    pub fn raw_name(&self) -> &[u8] {
        &self.raw_name
    }

    pub fn parent(&self) -> Option<EntryId> {
        self.parent
    }

    pub fn kind(&self) -> &EntryKind {
        &self.kind
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory { .. })
    }

    /// Payload size; zero for directories.
    pub fn size(&self) -> u64 {
        match self.kind {
            EntryKind::File { size, .. } => size,
            EntryKind::Directory { .. } => 0,
        }
    }

    /// Offset in the image, for files whose bytes are still there.
    pub fn offset(&self) -> Option<u64> {
        match self.kind {
            EntryKind::File {
                source: Source::Image { offset },
                ..
            } => Some(offset),
            _ => None,
        }
    }

    pub fn source(&self) -> Option<&Source> {
        match &self.kind {
            EntryKind::File { source, .. } => Some(source),
            EntryKind::Directory { .. } => None,
        }
    }

    pub fn children(&self) -> &[EntryId] {
        match &self.kind {
            EntryKind::Directory { children } => children,
            EntryKind::File { .. } => &[],
        }
    }

    /// True when the entry or one of its descendants changed since load.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[derive(Debug, Clone)]
pub struct Tree {
    entries: Vec<Option<Entry>>,
    generation: u64,
}

impl Default for Tree {
    fn default() -> Self {
        Tree::new()
    }
}

impl Tree {
    /// A tree holding only an empty root directory.
    pub fn new() -> Tree {
        Tree {
            entries: vec![Some(Entry {
                name: String::new(),
                raw_name: Vec::new(),
                parent: None,
                kind: EntryKind::Directory {
                    children: Vec::new(),
                },
                dirty: false,
            })],
            generation: next_generation(),
        }
    }

    /// Build a clean tree from a parsed table. Ids equal table indices.
    pub fn from_fst(table: &[FstEntry]) -> Tree {
        let mut entries: Vec<Option<Entry>> = Vec::with_capacity(table.len());
        for (index, raw) in table.iter().enumerate() {
            let kind = match raw.kind {
                FstKind::Directory { .. } => EntryKind::Directory {
                    children: Vec::new(),
                },
                FstKind::File { offset, size } => EntryKind::File {
                    source: Source::Image {
                        offset: u64::from(offset),
                    },
                    size: u64::from(size),
                },
            };
            let parent = (index > 0).then(|| EntryId(raw.parent as usize));
            entries.push(Some(Entry {
                name: raw.name.clone(),
                raw_name: raw.raw_name.clone(),
                parent,
                kind,
                dirty: false,
            }));
            if let Some(EntryId(p)) = parent {
                if let Some(Some(Entry {
                    kind: EntryKind::Directory { children },
                    ..
                })) = entries.get_mut(p)
                {
                    children.push(EntryId(index));
                }
            }
        }
        Tree {
            entries,
            generation: next_generation(),
        }
    }

    pub fn root(&self) -> EntryId {
        EntryId(0)
    }

    /// Stamp of the last change; plans remember it.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_dirty(&self) -> bool {
        self.entries[0].as_ref().map_or(false, |root| root.dirty)
    }

    pub fn get(&self, id: EntryId) -> Result<&Entry> {
        self.entries
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::NotFound(format!("entry {id}")))
    }

    fn get_mut(&mut self, id: EntryId) -> Result<&mut Entry> {
        self.entries
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::NotFound(format!("entry {id}")))
    }

    pub fn children(&self, dir: EntryId) -> Result<&[EntryId]> {
        let entry = self.get(dir)?;
        if !entry.is_dir() {
            return Err(Error::NotADirectory(self.path(dir)?));
        }
        Ok(entry.children())
    }

    /// Look a name up in `dir`.
    pub fn child(&self, dir: EntryId, name: &str) -> Result<Option<EntryId>> {
        for &id in self.children(dir)? {
            if self.get(id)?.name == name {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Resolve a `/`-separated path relative to the root. Empty components
    /// are ignored, so `/a//b/` is `a/b`.
    pub fn resolve(&self, path: &str) -> Result<EntryId> {
        let mut current = self.root();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !self.get(current)?.is_dir() {
                return Err(Error::NotADirectory(self.path(current)?));
            }
            current = self
                .child(current, component)?
                .ok_or_else(|| Error::NotFound(path.to_string()))?;
        }
        Ok(current)
    }

    /// Absolute path of an entry; the root is `/`.
    pub fn path(&self, id: EntryId) -> Result<String> {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            let entry = self.get(cur)?;
            if entry.parent.is_some() {
                names.push(entry.name.as_str());
            }
            current = entry.parent;
        }
        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }

    /// Every entry in depth-first pre-order, starting at the root and
    /// following each directory's child order.
    pub fn walk(&self) -> Vec<EntryId> {
        self.walk_from(self.root())
    }

    pub fn walk_from(&self, start: EntryId) -> Vec<EntryId> {
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if let Ok(entry) = self.get(id) {
                order.push(id);
                stack.extend(entry.children().iter().rev());
            }
        }
        order
    }

    /// True when `ancestor` is `id` or one of its ancestors.
    pub fn is_ancestor(&self, ancestor: EntryId, id: EntryId) -> bool {
        let mut current = Some(id);
        while let Some(cur) = current {
            if cur == ancestor {
                return true;
            }
            current = self.get(cur).ok().and_then(|e| e.parent);
        }
        false
    }

    pub fn entry_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn file_count(&self) -> usize {
        self.entries
            .iter()
            .flatten()
            .filter(|e| !e.is_dir())
            .count()
    }

    /// Sum of the sizes of every file at or below `id`.
    pub fn total_size(&self, id: EntryId) -> u64 {
        self.walk_from(id)
            .into_iter()
            .filter_map(|e| self.get(e).ok())
            .map(Entry::size)
            .sum()
    }

    pub fn create_directory(&mut self, parent: EntryId, name: &str) -> Result<EntryId> {
        let raw_name = self.check_new_name(parent, name)?;
        let kind = EntryKind::Directory {
            children: Vec::new(),
        };
        self.insert(parent, name, raw_name, kind)
    }

    pub fn import_file(&mut self, parent: EntryId, name: &str, bytes: ByteSource) -> Result<EntryId> {
        let raw_name = self.check_new_name(parent, name)?;
        let (source, size) = bytes.into_source()?;
        self.insert(parent, name, raw_name, EntryKind::File { source, size })
    }

    /// Swap a file's contents, keeping its name and position.
    pub fn replace_file(&mut self, id: EntryId, bytes: ByteSource) -> Result<()> {
        if self.get(id)?.is_dir() {
            return Err(Error::IsADirectory(self.path(id)?));
        }
        let (new_source, new_size) = bytes.into_source()?;
        if let EntryKind::File { source, size } = &mut self.get_mut(id)?.kind {
            *source = new_source;
            *size = new_size;
        }
        self.touch(id);
        Ok(())
    }

    pub fn rename(&mut self, id: EntryId, new_name: &str) -> Result<()> {
        let parent = self.parent_of(id)?;
        if self.get(id)?.name == new_name {
            return Ok(());
        }
        let raw_name = self.check_new_name(parent, new_name)?;
        self.detach(id)?;
        {
            let entry = self.get_mut(id)?;
            entry.name = new_name.to_string();
            entry.raw_name = raw_name;
        }
        self.attach(parent, id)?;
        self.touch(id);
        Ok(())
    }

    /// Move an entry into another directory, keeping its name.
    pub fn move_to(&mut self, id: EntryId, new_parent: EntryId) -> Result<()> {
        let old_parent = self.parent_of(id)?;
        self.check_directory(new_parent)?;
        if self.is_ancestor(id, new_parent) {
            return Err(Error::Cycle {
                entry: self.path(id)?,
                target: self.path(new_parent)?,
            });
        }
        if old_parent == new_parent {
            return Ok(());
        }
        let name = self.get(id)?.name.clone();
        self.check_conflict(new_parent, &name)?;
        self.touch(old_parent);
        self.detach(id)?;
        self.get_mut(id)?.parent = Some(new_parent);
        self.attach(new_parent, id)?;
        self.touch(id);
        Ok(())
    }

    /// Recursively duplicate an entry into `new_parent`. Copied files share
    /// their source with the original.
    pub fn copy_to(&mut self, id: EntryId, new_parent: EntryId) -> Result<EntryId> {
        self.parent_of(id)?;
        self.check_directory(new_parent)?;
        if self.get(id)?.is_dir() && self.is_ancestor(id, new_parent) {
            return Err(Error::Cycle {
                entry: self.path(id)?,
                target: self.path(new_parent)?,
            });
        }
        let name = self.get(id)?.name.clone();
        self.check_conflict(new_parent, &name)?;
        self.copy_subtree(id, new_parent)
    }

    fn copy_subtree(&mut self, id: EntryId, new_parent: EntryId) -> Result<EntryId> {
        let entry = self.get(id)?;
        let name = entry.name.clone();
        let raw_name = entry.raw_name.clone();
        let (kind, children) = match &entry.kind {
            EntryKind::File { source, size } => (
                EntryKind::File {
                    source: source.clone(),
                    size: *size,
                },
                Vec::new(),
            ),
            EntryKind::Directory { children } => (
                EntryKind::Directory {
                    children: Vec::new(),
                },
                children.clone(),
            ),
        };
        let copy = self.insert(new_parent, &name, raw_name, kind)?;
        for child in children {
            self.copy_subtree(child, copy)?;
        }
        Ok(copy)
    }

    /// Remove an entry and everything below it.
    pub fn delete(&mut self, id: EntryId) -> Result<()> {
        let parent = self.parent_of(id)?;
        self.detach(id)?;
        for gone in self.walk_from(id) {
            self.entries[gone.0] = None;
        }
        self.touch(parent);
        Ok(())
    }

    /// Delete every child of a directory.
    pub fn clear(&mut self, dir: EntryId) -> Result<()> {
        let children = self.children(dir)?.to_vec();
        for child in children {
            self.delete(child)?;
        }
        Ok(())
    }

    /// Apply several mutations as one: `f` runs against a copy of the tree
    /// that replaces this one only if `f` succeeds.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tree) -> Result<T>,
    {
        let mut scratch = self.clone();
        let value = f(&mut scratch)?;
        *self = scratch;
        Ok(value)
    }

    fn parent_of(&self, id: EntryId) -> Result<EntryId> {
        self.get(id)?
            .parent
            .ok_or_else(|| Error::InvalidOperation("the root directory cannot be changed".to_string()))
    }

    fn check_directory(&self, dir: EntryId) -> Result<()> {
        if !self.get(dir)?.is_dir() {
            return Err(Error::NotADirectory(self.path(dir)?));
        }
        Ok(())
    }

    fn check_conflict(&self, parent: EntryId, name: &str) -> Result<()> {
        if self.child(parent, name)?.is_some() {
            return Err(Error::Conflict {
                parent: self.path(parent)?,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn check_new_name(&self, parent: EntryId, name: &str) -> Result<Vec<u8>> {
        self.check_directory(parent)?;
        let raw_name = encode_name(name)?;
        self.check_conflict(parent, name)?;
        Ok(raw_name)
    }

    fn insert(&mut self, parent: EntryId, name: &str, raw_name: Vec<u8>, kind: EntryKind) -> Result<EntryId> {
        let id = EntryId(self.entries.len());
        self.entries.push(Some(Entry {
            name: name.to_string(),
            raw_name,
            parent: Some(parent),
            kind,
            dirty: true,
        }));
        self.attach(parent, id)?;
        self.touch(id);
        Ok(id)
    }

    /// Insert `id` among `parent`'s children in case-insensitive name order.
    fn attach(&mut self, parent: EntryId, id: EntryId) -> Result<()> {
        let key = sort_key(&self.get(id)?.name);
        let mut position = 0;
        for (i, &child) in self.get(parent)?.children().iter().enumerate() {
            if sort_key(&self.get(child)?.name) <= key {
                position = i + 1;
            }
        }
        if let EntryKind::Directory { children } = &mut self.get_mut(parent)?.kind {
            children.insert(position, id);
        }
        Ok(())
    }

    fn detach(&mut self, id: EntryId) -> Result<()> {
        let parent = self.parent_of(id)?;
        if let EntryKind::Directory { children } = &mut self.get_mut(parent)?.kind {
            children.retain(|&c| c != id);
        }
        Ok(())
    }

    /// Mark `id` and its ancestors dirty and take a new generation.
    fn touch(&mut self, id: EntryId) {
        let mut current = Some(id);
        while let Some(cur) = current {
            match self.entries.get_mut(cur.0).and_then(Option::as_mut) {
                Some(entry) => {
                    entry.dirty = true;
                    current = entry.parent;
                }
                None => break,
            }
        }
        self.generation = next_generation();
    }
}
