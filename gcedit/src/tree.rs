use serde_derive::Serialize;

use crate::error::Result;
use crate::utils;

use gcfs::disk::Disk;
use gcfs::search::SearchOptions;
use gcfs::tree::EntryId;

#[derive(Debug, Serialize)]
pub struct Listing {
    pub path: String,
    pub kind: &'static str,
    pub size: u64,
    pub offset: Option<u64>,
    pub dirty: bool,
}

fn listing(disk: &Disk, id: EntryId) -> Result<Listing> {
    let tree = disk.tree();
    let entry = tree.get(id)?;
    Ok(Listing {
        path: tree.path(id)?,
        kind: if entry.is_dir() { "directory" } else { "file" },
        size: entry.size(),
        offset: entry.offset(),
        dirty: entry.is_dirty(),
    })
}

fn render(disk: &Disk, ids: &[EntryId], json: bool) -> Result<()> {
    let rows = ids
        .iter()
        .map(|&id| listing(disk, id))
        .collect::<Result<Vec<_>>>()?;
    if json {
        return utils::print_json(&rows);
    }
    for row in rows {
        if row.kind == "directory" {
            println!("d {:>10}  {}/", "-", row.path);
        } else {
            println!("f {:>10}  {}", row.size, row.path);
        }
    }
    Ok(())
}

pub fn list(disk: &Disk, path: &str, recursive: bool, json: bool) -> Result<()> {
    let tree = disk.tree();
    let id = utils::resolve(disk, path)?;
    let ids: Vec<EntryId> = if !tree.get(id)?.is_dir() {
        vec![id]
    } else if recursive {
        tree.walk_from(id).into_iter().skip(1).collect()
    } else {
        tree.children(id)?.to_vec()
    };
    render(disk, &ids, json)
}

pub fn search(disk: &Disk, pattern: &str, options: &SearchOptions, json: bool) -> Result<()> {
    let found = disk.search(pattern, options)?;
    if found.is_empty() && !json {
        eprintln!("no entries match '{}'", pattern);
        return Ok(());
    }
    render(disk, &found, json)
}
