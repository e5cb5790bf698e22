//! create our filesystem
use std::{fs::OpenOptions, path::Path};

use anyhow::anyhow;
use byte_unit::Byte;
use log::info;

use crate::{
    block_store::{BlockStore, MmapBlockStore},
    error::{FsError, Result},
    fs::{Inode, SuperBlock, Volume, VolumeLayout, BLOCK_SIZE, ROOT_INODE, SUPERBLOCK_OFFSET},
    utils::traits::SerializeAndDigest,
};

/// zero the metadata regions of `store` and write a superblock for `layout`,
/// nothing is allocated yet
pub(crate) fn write_empty_volume<S: BlockStore>(
    store: &mut S,
    layout: &VolumeLayout,
    owner: (u32, u32),
) -> Result<()> {
    let zero = vec![0u8; BLOCK_SIZE];
    for block in 1..layout.data.start {
        store.write_block(block, &zero)?;
    }
    let mut superblock = SuperBlock::new(store.block_count(), layout, owner.0, owner.1);
    let mut first = vec![0u8; BLOCK_SIZE];
    superblock.serialize_into(&mut first[SUPERBLOCK_OFFSET..])?;
    store.write_block(0, &first)?;
    store.sync_all()
}

/// format `store` and return it opened, with an empty root directory
/// # Params
/// - `store`: the whole device, its previous contents are lost
/// - `inode_count`: how many inodes the volume gets
/// - `owner`: uid and gid of the root directory
pub fn format<S: BlockStore>(mut store: S, inode_count: u32, owner: (u32, u32)) -> Result<Volume<S>> {
    let layout = VolumeLayout::compute(store.block_count(), inode_count)?;
    write_empty_volume(&mut store, &layout, owner)?;
    let mut volume = Volume::open(store)?;

    // the root is its own parent
    let anchor = Inode {
        ino: ROOT_INODE,
        uid: owner.0,
        gid: owner.1,
        ..Inode::default()
    };
    let mut root = volume.new_inode(&anchor, libc::S_IFDIR as u16 | 0o755)?;
    if root.ino != ROOT_INODE {
        return Err(FsError::Format(format!(
            "root directory got inode {}, expected {ROOT_INODE}",
            root.ino
        )));
    }
    root.links_count = 2;
    volume.init_as_directory(&mut root, ROOT_INODE)?;
    volume.sync()?;
    info!(
        "formatted {} blocks: {} inodes, {} data blocks",
        volume.superblock().block_count,
        layout.inode_count,
        layout.data.count
    );
    Ok(volume)
}

/// create a new filesystem image file
/// # Params
/// - `image_file_path`: the path of the image file, must not exist yet
/// - `file_size`: the size of the image file, rounded down to whole blocks
/// - `inode_count`: the number of inodes
///
/// # Return
/// an [anyhow::Result] type to indicate whether the operation is successful
pub fn mkfs<P>(image_file_path: P, file_size: u64, inode_count: u32) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    let image_file_path = image_file_path.as_ref();
    let blocks = file_size / BLOCK_SIZE as u64;
    // check the size before anything lands on disk
    VolumeLayout::compute(blocks, inode_count).map_err(|e| {
        anyhow!(
            "{} is not enough for {inode_count} inodes: {e}",
            Byte::from_bytes(file_size as _).get_appropriate_unit(true)
        )
    })?;

    // use `users` crate to get the uid and gid of this program
    let uid = users::get_effective_uid();
    let gid = users::get_effective_gid();

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(image_file_path)?;
    // all regions start out zero through `set_len`
    file.set_len(blocks * BLOCK_SIZE as u64)?;
    drop(file);

    let store = MmapBlockStore::open(image_file_path)?;
    let volume = format(store, inode_count, (uid, gid))?;
    volume.into_store()?;
    info!(
        "created {} image at {}",
        Byte::from_bytes((blocks * BLOCK_SIZE as u64) as _).get_appropriate_unit(true),
        image_file_path.display()
    );
    Ok(())
}
