//! Read, edit and rewrite the filesystem of GameCube disk images.
//!
//! ```no_run
//! use gcfs::disk::Disk;
//! use gcfs::tree::ByteSource;
//!
//! # fn main() -> gcfs::error::Result<()> {
//! let mut disk = Disk::open("game.iso")?;
//! let root = disk.tree().root();
//! disk.tree_mut()
//!     .import_file(root, "a.txt", ByteSource::Bytes(b"hello".to_vec()))?;
//! let plan = disk.plan()?;
//! disk.commit(&plan)?;
//! # Ok(())
//! # }
//! ```
pub mod banner;
pub mod binary;
pub mod builder;
pub mod compression;
pub mod config;
pub mod disk;
pub mod error;
pub mod fst;
pub mod header;
pub mod host;
pub mod layout;
pub mod name;
pub mod progress;
pub mod search;
pub mod session;
pub mod store;
pub mod tree;
mod writer;
pub mod yaz0;

pub use crate::disk::Disk;
pub use crate::error::{Error, Result};
pub use crate::session::SharedDisk;
