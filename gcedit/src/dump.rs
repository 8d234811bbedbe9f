use std::path::Path;

use crate::error::{Error, Result};

use gcfs::disk::Disk;
use gcfs::host::ExtractOptions;

pub fn dump(disk: &Disk, path: &str, dest: &Path, options: &ExtractOptions) -> Result<()> {
    let id = disk.tree().resolve(path)?;
    let failed = disk.extract(id, dest, options)?;
    if failed.is_empty() {
        return Ok(());
    }
    for path in &failed {
        eprintln!("could not extract {}", path.display());
    }
    Err(Error::ExtractError(failed))
}

pub fn dump_system_file(disk: &Disk, name: &str, dest: &Path, overwrite: bool) -> Result<()> {
    if dest.exists() && !overwrite {
        return Err(Error::CliInputError(format!(
            "'{}' already exists, use --overwrite to replace it",
            dest.display()
        )));
    }
    disk.extract_system_file(name, dest)?;
    Ok(())
}
