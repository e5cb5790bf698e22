//! This module contains functions to calculate the size of different fs regions, in blocks

use crate::fs::{BITS_PER_BLOCK, BLOCK_SIZE, DIRECT_POINTERS, INODES_PER_BLOCK, NODE_PER_BLK};

/// calculate needed bitmap blocks
/// # Arguments
/// - `element_count`: the number of units the bitmap tracks
/// # Example
/// ```
/// use blockfs::utils::fs_size_calculator::bitmap_blocks;
/// assert_eq!(bitmap_blocks(1), 1);
/// assert_eq!(bitmap_blocks(4096 * 8), 1);
/// assert_eq!(bitmap_blocks(4096 * 8 + 1), 2);
/// ```
pub const fn bitmap_blocks(element_count: u64) -> u64 {
    element_count.div_ceil(BITS_PER_BLOCK as u64)
}

/// calculate needed Inode Table blocks
/// # Example
/// ```
/// use blockfs::utils::fs_size_calculator::inode_table_blocks;
/// assert_eq!(inode_table_blocks(16), 1);
/// assert_eq!(inode_table_blocks(17), 2);
/// ```
pub const fn inode_table_blocks(inode_count: u64) -> u64 {
    inode_count.div_ceil(INODES_PER_BLOCK as u64)
}

/// split `remaining` blocks between the data bitmap and the data region,
/// the data bitmap gets just enough blocks to cover what is left
/// # Return
/// `(data_bitmap_blocks, data_blocks)`
/// # Example
/// ```
/// use blockfs::utils::fs_size_calculator::split_data_blocks;
/// assert_eq!(split_data_blocks(100), (1, 99));
/// assert_eq!(split_data_blocks(4096 * 8 + 1), (1, 4096 * 8));
/// assert_eq!(split_data_blocks(4096 * 8 + 2), (2, 4096 * 8));
/// ```
pub const fn split_data_blocks(remaining: u64) -> (u64, u64) {
    let bitmap = remaining.div_ceil(BITS_PER_BLOCK as u64 + 1);
    (bitmap, remaining - bitmap)
}

/// how many blocks hold `bytes` bytes
/// # Example
/// ```
/// use blockfs::utils::fs_size_calculator::blocks_for_bytes;
/// assert_eq!(blocks_for_bytes(0), 0);
/// assert_eq!(blocks_for_bytes(1), 1);
/// assert_eq!(blocks_for_bytes(8192), 2);
/// ```
pub const fn blocks_for_bytes(bytes: u64) -> u64 {
    bytes.div_ceil(BLOCK_SIZE as u64)
}

/// number of logical blocks one inode can address
/// # Example
/// ```
/// use blockfs::utils::fs_size_calculator::max_file_blocks;
/// assert_eq!(max_file_blocks(), 12 + 1024 + 1024 * 1024 + 1024 * 1024 * 1024);
/// ```
pub const fn max_file_blocks() -> u64 {
    let n = NODE_PER_BLK as u64;
    DIRECT_POINTERS as u64 + n + n * n + n * n * n
}
