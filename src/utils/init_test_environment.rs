//! small in-memory volumes for unit tests
use crate::{
    block_store::MemBlockStore,
    fs::{Volume, VolumeLayout},
    mkfs::{format, write_empty_volume},
};

/// a formatted layout with nothing allocated, not even the root
pub fn blank_volume(blocks: u32, inodes: u32) -> Volume<MemBlockStore> {
    let mut store = MemBlockStore::new(blocks);
    let layout = VolumeLayout::compute(blocks as u64, inodes).expect("test geometry must fit");
    write_empty_volume(&mut store, &layout, (0, 0)).expect("Failed to write empty volume");
    Volume::open(store).expect("Failed to open blank volume")
}

/// 256 blocks and 64 inodes, root directory in place
pub fn test_volume() -> Volume<MemBlockStore> {
    format(MemBlockStore::new(256), 64, (0, 0)).expect("Failed to format test volume")
}
