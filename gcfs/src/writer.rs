//! Applying a `LayoutPlan` to storage.
//!
//! In place, the commit point is the 12-byte FST pointer at 0x424: payloads
//! and the new table are written to space the old table does not reference,
//! then the pointer is switched in a single write. A crash or error before
//! that write leaves the old table in charge and the old tree readable.
//!
//! Staged commits build a complete image in a temporary file next to the
//! target and rename it over the target once it is on disk.
use log::{debug, info, warn};
use std::fs::{self, File};
use std::path::Path;
use tempfile::NamedTempFile;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::header::{fst_pointer, FST_POINTER_OFFSET};
use crate::layout::{ImageLayout, LayoutPlan, Placement};
use crate::progress::{CancelToken, Progress};
use crate::store::ImageStore;
use crate::tree::Source;

pub(crate) struct CommitJob<'a> {
    /// The open image the plan was computed against.
    pub source: &'a dyn ImageStore,
    pub plan: &'a LayoutPlan,
    pub layout: &'a ImageLayout,
    pub config: &'a Config,
    pub progress: &'a Progress,
    pub cancel: &'a CancelToken,
}

impl<'a> CommitJob<'a> {
    fn copy_range(
        &self,
        from: &dyn ImageStore,
        from_offset: u64,
        to: &dyn ImageStore,
        to_offset: u64,
        size: u64,
    ) -> Result<()> {
        let mut buf = vec![0u8; (self.config.block_size as u64).min(size) as usize];
        let mut done = 0;
        while done < size {
            self.cancel.check()?;
            let n = (size - done).min(buf.len() as u64) as usize;
            from.read_at(&mut buf[..n], from_offset + done)?;
            to.write_at(&buf[..n], to_offset + done)?;
            done += n as u64;
            self.progress.advance(n as u64);
        }
        Ok(())
    }

    fn copy_payload(&self, placement: &Placement, dest: &dyn ImageStore) -> Result<()> {
        self.progress.set_current(Some(&placement.path));
        let result = match &placement.source {
            Source::Image { offset } => {
                self.copy_range(self.source, *offset, dest, placement.offset, placement.size)
            }
            Source::Host { path } => File::open(path)
                .map_err(|e| Error::io(format!("cannot open '{}'", path.display()), e))
                .and_then(|file| {
                    let len = file
                        .metadata()
                        .map_err(|e| Error::io(format!("cannot stat '{}'", path.display()), e))?
                        .len();
                    if len != placement.size {
                        return Err(Error::InvalidOperation(format!(
                            "'{}' changed size since it was imported ({} bytes, now {})",
                            path.display(),
                            placement.size,
                            len
                        )));
                    }
                    self.copy_range(&file, 0, dest, placement.offset, placement.size)
                }),
            Source::Memory(bytes) => self.copy_bytes(bytes, dest, placement.offset),
        };
        result.map_err(|e| e.at_path(&placement.path))
    }

    fn copy_bytes(&self, bytes: &[u8], dest: &dyn ImageStore, offset: u64) -> Result<()> {
        let mut at = offset;
        for chunk in bytes.chunks(self.config.block_size) {
            self.cancel.check()?;
            dest.write_at(chunk, at)?;
            at += chunk.len() as u64;
            self.progress.advance(chunk.len() as u64);
        }
        Ok(())
    }

    fn fst_pointer(&self) -> [u8; 12] {
        fst_pointer(
            self.plan.fst_offset as u32,
            self.plan.fst.len() as u32,
            self.plan.fst_max_size as u32,
        )
    }
}

/// Apply an in-place plan to the image it was computed against.
pub(crate) fn commit_in_place(job: &CommitJob) -> Result<()> {
    let store = job.source;
    let original_len = store.len()?;
    job.progress.start(job.plan.bytes_to_write());

    let switched = write_shadow(job, original_len)
        .and_then(|()| store.write_at(&job.fst_pointer(), FST_POINTER_OFFSET));
    if let Err(err) = switched {
        if job.plan.total_size > original_len {
            if let Err(rollback) = store.set_len(original_len) {
                warn!("could not restore the image length after a failed commit: {}", rollback);
            }
        }
        return Err(err);
    }

    store.sync()?;
    if job.plan.total_size < original_len {
        store.set_len(job.plan.total_size)?;
    }
    info!(
        "committed filesystem table at {:#x} ({} bytes), image is {} bytes",
        job.plan.fst_offset,
        job.plan.fst.len(),
        job.plan.total_size
    );
    Ok(())
}

/// Everything an in-place commit writes before the commit point.
fn write_shadow(job: &CommitJob, original_len: u64) -> Result<()> {
    let store = job.source;
    job.cancel.check()?;
    if job.plan.total_size > original_len {
        debug!("extending image from {} to {} bytes", original_len, job.plan.total_size);
        store.set_len(job.plan.total_size)?;
    }
    for placement in job.plan.placements.iter().filter(|p| p.write) {
        job.copy_payload(placement, store)?;
    }
    job.progress.set_current(None);
    job.cancel.check()?;
    store.write_at(&job.plan.fst, job.plan.fst_offset)?;
    job.progress.advance(job.plan.fst.len() as u64);
    store.sync()?;
    job.cancel.check()
}

/// Build the planned image in a temporary file next to `target` and move it
/// into place. Returns the handle of the new image.
pub(crate) fn commit_staged(job: &CommitJob, target: &Path) -> Result<File> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let staged = NamedTempFile::new_in(dir).map_err(|e| {
        Error::io(format!("cannot create a temporary image in '{}'", dir.display()), e)
    })?;
    if let Ok(meta) = fs::metadata(target) {
        if let Err(e) = fs::set_permissions(staged.path(), meta.permissions()) {
            warn!("could not copy permissions of '{}': {}", target.display(), e);
        }
    }
    let dest: &dyn ImageStore = staged.as_file();

    if job.plan.noop {
        let len = job.source.len()?;
        job.progress.start(len);
        dest.set_len(len)?;
        job.copy_range(job.source, 0, dest, 0, len)?;
    } else {
        let pinned: u64 = job.layout.pinned.iter().map(|e| e.size).sum();
        let payloads: u64 = job.plan.placements.iter().map(|p| p.size).sum();
        job.progress.start(pinned + payloads + job.plan.fst.len() as u64);
        dest.set_len(job.plan.total_size)?;
        for extent in &job.layout.pinned {
            job.copy_range(job.source, extent.offset, dest, extent.offset, extent.size)?;
        }
        for placement in &job.plan.placements {
            job.copy_payload(placement, dest)?;
        }
        job.progress.set_current(None);
        job.cancel.check()?;
        dest.write_at(&job.plan.fst, job.plan.fst_offset)?;
        job.progress.advance(job.plan.fst.len() as u64);
        job.cancel.check()?;
        dest.write_at(&job.fst_pointer(), FST_POINTER_OFFSET)?;
    }
    dest.sync()?;

    let file = staged
        .persist(target)
        .map_err(|e| Error::io(format!("cannot replace '{}'", target.display()), e.error))?;
    info!(
        "wrote {} ({} bytes)",
        target.display(),
        job.plan.total_size
    );
    Ok(file)
}
