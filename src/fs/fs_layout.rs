//! what does our filesystem look like in the memory

use std::collections::HashMap;

use log::{error, info};

use crate::{
    block_store::{BlockStore, BufferCache},
    error::{FsError, Result},
    utils::traits::SerializeAndDigest,
};

use super::{
    superblock::{SuperBlock, VolumeLayout},
    InodeNumber, Region, BLOCK_SIZE, SUPERBLOCK_OFFSET,
};

/// an opened volume, every core operation is a method on it
///
/// it owns:
/// - the buffer cache over the host's block store
/// - the superblock and the layout decoded from it
/// - per directory lookup hints and modification versions
/// - the read-only latch raised when corruption is found
#[derive(Debug)]
pub struct Volume<S> {
    pub(crate) cache: BufferCache<S>,
    superblock: SuperBlock,
    layout: VolumeLayout,
    /// directory inode -> block index of the last successful lookup
    pub(crate) lookup_hints: HashMap<InodeNumber, u32>,
    /// directory inode -> structural modification counter
    pub(crate) dir_versions: HashMap<InodeNumber, u64>,
    read_only: bool,
}

/// statfs-style numbers, counted from the bitmaps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeStats {
    pub block_size: u32,
    pub total_blocks: u64,
    pub data_blocks: u64,
    pub free_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
}

impl<S: BlockStore> Volume<S> {
    /// open a formatted volume
    /// # Params
    /// - `store`: the block device holding the volume
    /// # Return
    /// a [Volume] if the superblock is intact and its layout fits the device
    pub fn open(store: S) -> Result<Self> {
        let device_blocks = store.block_count();
        let mut cache = BufferCache::new(store);
        let superblock = cache.with_block(0, |block| {
            SuperBlock::deserialize_from(&block[SUPERBLOCK_OFFSET..]).map(|(sb, _)| sb)
        })??;
        superblock.check_identity()?;
        let layout = superblock.layout();
        layout.validate(device_blocks)?;

        let mut volume = Volume {
            cache,
            superblock,
            layout,
            lookup_hints: HashMap::new(),
            dir_versions: HashMap::new(),
            read_only: false,
        };
        volume.superblock.update_last_mounted_at();
        volume.write_superblock()?;
        info!(
            "opened volume: {} blocks, {} data blocks, {} inodes",
            device_blocks, layout.data.count, layout.inode_count
        );
        Ok(volume)
    }

    pub(crate) fn write_superblock(&mut self) -> Result<()> {
        let mut superblock = self.superblock.clone();
        let pinned = self.cache.pin(0)?;
        let written = superblock.serialize_into(&mut self.cache.data_mut(&pinned)[SUPERBLOCK_OFFSET..]);
        let synced = written.and_then(|_| self.cache.sync(&pinned));
        self.cache.release(pinned)?;
        synced?;
        self.superblock = superblock;
        Ok(())
    }

    /// write every dirty buffer back and sync the store
    pub fn sync(&mut self) -> Result<()> {
        self.cache.flush()
    }

    /// sync and give the store back
    pub fn into_store(self) -> Result<S> {
        info!("closing volume");
        self.cache.into_store()
    }

    /// count free units in both bitmaps
    pub fn stats(&mut self) -> Result<VolumeStats> {
        let free_blocks = self.count_free(Region::Data)?;
        let free_inodes = self.count_free(Region::Inode)?;
        Ok(VolumeStats {
            block_size: BLOCK_SIZE as u32,
            total_blocks: self.superblock.block_count,
            data_blocks: self.layout.data.count as u64,
            free_blocks,
            total_inodes: self.layout.inode_count as u64,
            free_inodes,
        })
    }
}

/// get [SuperBlock], [VolumeLayout] and the store of this filesystem
impl<S> Volume<S> {
    #[inline]
    pub fn superblock(&self) -> &SuperBlock {
        &self.superblock
    }

    #[inline]
    pub fn layout(&self) -> &VolumeLayout {
        &self.layout
    }

    #[inline]
    pub fn store(&self) -> &S {
        self.cache.store()
    }

    #[inline]
    pub fn store_mut(&mut self) -> &mut S {
        self.cache.store_mut()
    }
}

/// the read-only latch
impl<S> Volume<S> {
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            Err(FsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// pass `result` through, latching the volume read-only on corruption
    pub(crate) fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e @ FsError::Corrupt { .. }) = &result {
            if !self.read_only {
                error!("{e}, volume is now read-only");
            }
            self.read_only = true;
        }
        result
    }

    /// structural modification counter of a directory
    pub(crate) fn dir_version(&self, dir: InodeNumber) -> u64 {
        self.dir_versions.get(&dir).copied().unwrap_or(0)
    }

    pub(crate) fn bump_dir_version(&mut self, dir: InodeNumber) {
        *self.dir_versions.entry(dir).or_insert(0) += 1;
    }
}
