//! blockfs: the storage engine of a small block-device filesystem.
//!
//! The crate maps a file's logical blocks to physical blocks through a
//! 4-level pointer tree, hands out blocks and inode numbers from on-disk
//! bitmaps, and keeps directories as packed variable-length records.
//! A host supplies the block I/O through [BlockStore] and drives everything
//! through a [Volume].
pub mod block_store;
pub mod cli_interface;
pub mod error;
mod fs;
pub mod mkfs;
pub mod utils;
pub use block_store::{BlockStore, BufferCache, MemBlockStore, MmapBlockStore};
pub use error::{FsError, Result};
pub use fs::*;
