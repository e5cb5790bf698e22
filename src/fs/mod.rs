//! our block-device filesystem
pub mod bitmap;
pub mod block_map;
pub mod directory;
pub mod file;
pub mod filekind;
pub mod fs_layout;
pub mod inode;
pub mod namei;
pub mod superblock;
pub use bitmap::*;
pub use block_map::*;
pub use directory::*;
pub use filekind::*;
pub use fs_layout::*;
pub use inode::*;
pub use superblock::*;

pub type InodeNumber = u32;
pub type PhysicalBlock = u32;

pub const BLOCK_SIZE: usize = 4096;
pub const FS_MAGIC: u32 = 0x2021_05F5;
/// byte offset of the superblock record inside block 0
pub const SUPERBLOCK_OFFSET: usize = 1024;
/// inode bitmap bit `i` is inode `i + ROOT_INODE`
pub const ROOT_INODE: InodeNumber = 3;
pub const INODE_SIZE: usize = 256;
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;
pub const DIRECT_POINTERS: usize = 12;
pub const INDIRECT_ROOTS: usize = 3;
pub const BLOCK_POINTERS: usize = DIRECT_POINTERS + INDIRECT_ROOTS;
/// pointers per indirect node
pub const NODE_PER_BLK: usize = BLOCK_SIZE / std::mem::size_of::<PhysicalBlock>();
pub const BITS_PER_BLOCK: usize = BLOCK_SIZE * 8;
pub const MAX_NAME_LEN: usize = 255;
