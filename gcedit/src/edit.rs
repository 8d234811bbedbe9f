use std::path::Path;

use crate::error::{Error, Result};
use crate::utils;

use gcfs::disk::Disk;
use gcfs::host;
use gcfs::tree::ByteSource;

fn split_parent(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(at) => Ok((&trimmed[..at], &trimmed[at + 1..])),
        None if !trimmed.is_empty() => Ok(("/", trimmed)),
        None => Err(Error::CliInputError(format!("'{}' does not name an entry", path))),
    }
}

pub fn mkdir(disk: &mut Disk, path: &str, parents: bool) -> Result<()> {
    let tree = disk.tree_mut();
    if parents {
        let mut dir = tree.root();
        for name in path.split('/').filter(|c| !c.is_empty()) {
            dir = match tree.child(dir, name)? {
                Some(id) => id,
                None => tree.create_directory(dir, name)?,
            };
        }
    } else {
        let (parent, name) = split_parent(path)?;
        let parent = tree.resolve(parent)?;
        tree.create_directory(parent, name)?;
    }
    Ok(())
}

pub fn move_entry(disk: &mut Disk, source: &str, dest: &str) -> Result<()> {
    let source = utils::resolve(disk, source)?;
    let dest = utils::resolve(disk, dest)?;
    disk.tree_mut().move_to(source, dest)?;
    Ok(())
}

pub fn rename(disk: &mut Disk, path: &str, name: &str) -> Result<()> {
    let id = utils::resolve(disk, path)?;
    disk.tree_mut().rename(id, name)?;
    Ok(())
}

pub fn remove(disk: &mut Disk, path: &str) -> Result<()> {
    let id = utils::resolve(disk, path)?;
    disk.tree_mut().delete(id)?;
    Ok(())
}

pub fn import(disk: &mut Disk, host_path: &Path, dest: &str, replace: bool) -> Result<()> {
    let dest = utils::resolve(disk, dest)?;
    let tree = disk.tree_mut();
    if replace && host_path.is_file() {
        let name = host_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::CliInputError(format!("cannot import '{}'", host_path.display())))?;
        if let Some(existing) = tree.child(dest, name)? {
            tree.replace_file(existing, ByteSource::Path(host_path.to_path_buf()))?;
            return Ok(());
        }
    }
    host::import_path(tree, dest, host_path)?;
    Ok(())
}

pub fn compact(disk: &mut Disk, output: Option<&str>, show_progress: bool) -> Result<()> {
    let before = disk.image_len()?;
    let result = match output {
        Some(output) => disk
            .plan_repack()
            .and_then(|plan| disk.commit_to(&plan, output)),
        None => disk.compact(),
    };
    utils::end_progress(show_progress);
    result?;
    println!("{} -> {} bytes", before, disk.image_len()?);
    Ok(())
}

pub fn pad(disk: &mut Disk, show_progress: bool) -> Result<()> {
    let result = disk.pad_to_full_size();
    utils::end_progress(show_progress);
    result?;
    println!("{} bytes", disk.image_len()?);
    Ok(())
}
