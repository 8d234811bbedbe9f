//! Moving trees between the host filesystem and a disk.
use log::{debug, warn};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::disk::Disk;
use crate::error::{Error, Result};
use crate::tree::{ByteSource, EntryId, Tree};

fn host_name(path: &Path) -> Result<String> {
    let name = path.file_name().ok_or_else(|| Error::Name {
        name: path.display().to_string(),
        reason: "path has no file name",
    })?;
    name.to_str().map(str::to_string).ok_or_else(|| Error::Name {
        name: name.to_string_lossy().into_owned(),
        reason: "name is not valid Unicode",
    })
}

/// Import a host directory and everything below it into `parent`.
///
/// The whole import is one transaction: if any name is invalid or clashes,
/// the tree is left untouched. Anything that is neither a regular file nor
/// a directory is skipped.
pub fn import_dir(tree: &mut Tree, parent: EntryId, dir: &Path, follow_links: bool) -> Result<EntryId> {
    let name = host_name(dir)?;
    tree.transaction(|tree| {
        let top = tree.create_directory(parent, &name)?;
        let mut dirs: HashMap<PathBuf, EntryId> = HashMap::new();
        dirs.insert(dir.to_path_buf(), top);

        let walker = WalkDir::new(dir)
            .min_depth(1)
            .follow_links(follow_links)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry?;
            let path = entry.path();
            let parent_id = path
                .parent()
                .and_then(|p| dirs.get(p))
                .copied()
                .ok_or_else(|| Error::NotFound(path.display().to_string()))?;
            let name = host_name(path)?;
            let file_type = entry.file_type();
            if file_type.is_dir() {
                let id = tree.create_directory(parent_id, &name)?;
                dirs.insert(path.to_path_buf(), id);
            } else if file_type.is_file() {
                tree.import_file(parent_id, &name, ByteSource::Path(path.to_path_buf()))?;
            } else {
                warn!("skipping '{}': not a regular file or directory", path.display());
            }
        }
        debug!("imported {} directories from '{}'", dirs.len(), dir.display());
        Ok(top)
    })
}

/// Import a host file or directory into `parent` under its own name.
pub fn import_path(tree: &mut Tree, parent: EntryId, path: &Path) -> Result<EntryId> {
    let meta = fs::metadata(path).map_err(|e| Error::io(format!("cannot read '{}'", path.display()), e))?;
    if meta.is_dir() {
        import_dir(tree, parent, path, false)
    } else {
        let name = host_name(path)?;
        tree.import_file(parent, &name, ByteSource::Path(path.to_path_buf()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Replace existing files and reuse existing directories.
    pub overwrite: bool,
    /// Decompress Yaz0 payloads while extracting.
    pub decode: bool,
}

/// Extract an entry, recursively for directories, to `dest`.
///
/// Returns the host paths that could not be created: existing targets
/// without `overwrite`, files whose target is a directory, unwritable
/// locations and payloads that failed to decode. Reading the image itself
/// failing aborts the extraction.
pub fn extract(disk: &Disk, id: EntryId, dest: &Path, options: &ExtractOptions) -> Result<Vec<PathBuf>> {
    let mut failed = Vec::new();
    let mut pending = vec![(id, dest.to_path_buf())];
    while let Some((id, dest)) = pending.pop() {
        let entry = disk.tree().get(id)?;
        if entry.is_dir() {
            if let Err(e) = fs::create_dir(&dest) {
                let reusable = options.overwrite && e.kind() == io::ErrorKind::AlreadyExists && dest.is_dir();
                if !reusable {
                    debug!("cannot create '{}': {}", dest.display(), e);
                    failed.push(dest);
                    continue;
                }
            }
            for &child in entry.children().iter().rev() {
                let name = disk.tree().get(child)?.name().to_string();
                pending.push((child, dest.join(name)));
            }
        } else if dest.is_dir() || (dest.exists() && !options.overwrite) {
            failed.push(dest);
        } else if let Err(e) = extract_file(disk, id, &dest, options) {
            match e {
                Error::Io { .. } | Error::Codec { .. } => {
                    warn!("cannot extract '{}': {}", dest.display(), e);
                    failed.push(dest);
                }
                other => return Err(other),
            }
        }
    }
    Ok(failed)
}

fn extract_file(disk: &Disk, id: EntryId, dest: &Path, options: &ExtractOptions) -> Result<()> {
    let data = if options.decode {
        Some(disk.read_file_decoded(id)?)
    } else {
        None
    };
    let mut out = File::create(dest).map_err(|e| Error::io(format!("cannot create '{}'", dest.display()), e))?;
    match data {
        Some(data) => out.write_all(&data)?,
        None => {
            let mut payload = disk.payload(id)?;
            io::copy(&mut payload, &mut out)?;
        }
    }
    Ok(())
}
