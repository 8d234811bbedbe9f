//! A `Disk` shared between threads.
//!
//! Readers run concurrently; edits and commits take the session exclusively.
//! Progress and cancellation live outside the lock so a commit can be watched
//! and stopped from another thread while it holds the session.
use std::path::Path;
use std::sync::{Arc, RwLock, TryLockError};

use crate::disk::Disk;
use crate::error::{Error, Result};
use crate::progress::{CancelToken, Progress};
use crate::tree::Tree;

#[derive(Debug)]
pub struct SharedDisk {
    disk: RwLock<Disk>,
    progress: Arc<Progress>,
    cancel: CancelToken,
}

impl SharedDisk {
    pub fn new(disk: Disk) -> SharedDisk {
        SharedDisk {
            progress: disk.progress(),
            cancel: disk.cancel_token(),
            disk: RwLock::new(disk),
        }
    }

    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Disk) -> Result<T>,
    {
        let disk = self.disk.read().map_err(|_| Error::Poisoned)?;
        f(&disk)
    }

    /// Run `f` as one tree transaction, waiting for other users to finish.
    pub fn edit<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tree) -> Result<T>,
    {
        let mut disk = self.disk.write().map_err(|_| Error::Poisoned)?;
        disk.tree_mut().transaction(f)
    }

    /// Like `edit`, but fails with `Error::Busy` instead of waiting.
    pub fn try_edit<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tree) -> Result<T>,
    {
        let mut disk = match self.disk.try_write() {
            Ok(disk) => disk,
            Err(TryLockError::WouldBlock) => return Err(Error::Busy),
            Err(TryLockError::Poisoned(_)) => return Err(Error::Poisoned),
        };
        disk.tree_mut().transaction(f)
    }

    /// Plan and commit the current tree in place.
    pub fn commit(&self) -> Result<()> {
        let mut disk = self.disk.write().map_err(|_| Error::Poisoned)?;
        let plan = disk.plan()?;
        disk.commit(&plan)
    }

    /// Plan a compacted image and write it to `target`.
    pub fn commit_to<P: AsRef<Path>>(&self, target: P) -> Result<()> {
        let mut disk = self.disk.write().map_err(|_| Error::Poisoned)?;
        let plan = disk.plan_repack()?;
        disk.commit_to(&plan, target)
    }

    pub fn compact(&self) -> Result<()> {
        let mut disk = self.disk.write().map_err(|_| Error::Poisoned)?;
        disk.compact()
    }

    pub fn progress(&self) -> Arc<Progress> {
        self.progress.clone()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn into_inner(self) -> Result<Disk> {
        self.disk.into_inner().map_err(|_| Error::Poisoned)
    }
}
