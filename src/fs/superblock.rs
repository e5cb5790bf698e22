use serde::{Deserialize, Serialize};

use crate::error::{FsError, Result};
use crate::utils::{
    digest,
    fs_size_calculator::{bitmap_blocks, inode_table_blocks, split_data_blocks},
    time_util::Timestamp,
    traits::{DigestInSelf, SerializeAndDigest},
};

use super::{PhysicalBlock, BITS_PER_BLOCK, BLOCK_SIZE, FS_MAGIC, ROOT_INODE};

/// a run of `count` blocks starting at `start`
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Extent {
    pub start: PhysicalBlock,
    pub count: u32,
}

impl Extent {
    pub const fn new(start: PhysicalBlock, count: u32) -> Self {
        Extent { start, count }
    }

    /// first block after this extent
    pub const fn end(&self) -> u64 {
        self.start as u64 + self.count as u64
    }

    pub const fn contains(&self, block: PhysicalBlock) -> bool {
        block >= self.start && (block as u64) < self.end()
    }
}

/// where each region of the volume lives, fixed once the volume is created
///
/// Regions follow block 0 in this order, back to back:
/// inode bitmap, data bitmap, inode table, data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeLayout {
    pub inode_bitmap: Extent,
    pub data_bitmap: Extent,
    pub inode_table: Extent,
    pub data: Extent,
    pub inode_count: u32,
}

impl VolumeLayout {
    /// size every region for a device of `total_blocks` blocks
    pub fn compute(total_blocks: u64, inode_count: u32) -> Result<Self> {
        if total_blocks > u32::MAX as u64 {
            return Err(FsError::Format(format!(
                "{total_blocks} blocks do not fit 32-bit block pointers"
            )));
        }
        if inode_count == 0 {
            return Err(FsError::Format("a volume needs at least one inode".into()));
        }
        let inode_bitmap = bitmap_blocks(inode_count as u64);
        let inode_table = inode_table_blocks(inode_count as u64);
        let fixed = 1 + inode_bitmap + inode_table;
        let remaining = total_blocks.saturating_sub(fixed);
        let (data_bitmap, data) = split_data_blocks(remaining);
        if data == 0 {
            return Err(FsError::Format(format!(
                "{total_blocks} blocks leave no room for data with {inode_count} inodes"
            )));
        }
        // every count below is bounded by `total_blocks`, which fits u32
        let inode_bitmap = Extent::new(1, inode_bitmap as u32);
        let data_bitmap = Extent::new(inode_bitmap.end() as u32, data_bitmap as u32);
        let inode_table = Extent::new(data_bitmap.end() as u32, inode_table as u32);
        let data = Extent::new(inode_table.end() as u32, data as u32);
        Ok(VolumeLayout {
            inode_bitmap,
            data_bitmap,
            inode_table,
            data,
            inode_count,
        })
    }

    /// check the regions are ordered, contiguous, large enough and inside the device
    pub fn validate(&self, device_blocks: u64) -> Result<()> {
        let bad = |detail: String| Err(FsError::Format(detail));
        if self.inode_bitmap.start != 1 {
            return bad(format!(
                "inode bitmap starts at {}, expected 1",
                self.inode_bitmap.start
            ));
        }
        let chain = [
            ("data bitmap", self.inode_bitmap, self.data_bitmap),
            ("inode table", self.data_bitmap, self.inode_table),
            ("data region", self.inode_table, self.data),
        ];
        for (name, before, region) in chain {
            if region.start as u64 != before.end() {
                return bad(format!(
                    "{name} starts at {}, expected {}",
                    region.start,
                    before.end()
                ));
            }
        }
        if self.data.end() > device_blocks {
            return bad(format!(
                "data region ends at {} past the device end {device_blocks}",
                self.data.end()
            ));
        }
        if self.inode_count == 0 || self.data.count == 0 {
            return bad("empty inode or data region".into());
        }
        if (self.inode_bitmap.count as u64) < bitmap_blocks(self.inode_count as u64)
            || (self.inode_table.count as u64) < inode_table_blocks(self.inode_count as u64)
            || (self.data_bitmap.count as u64) < bitmap_blocks(self.data.count as u64)
        {
            return bad("a region is too small for the units it tracks".into());
        }
        Ok(())
    }

    pub fn contains_data_block(&self, block: PhysicalBlock) -> bool {
        self.data.contains(block)
    }
}

/// The superblock of this filesystem
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SuperBlock {
    /// magic number
    pub magic: u32,
    /// data block size
    pub block_size: u32,
    /// blocks on the device when it was formatted
    pub block_count: u64,
    pub inode_count: u32,
    pub inode_bitmap: Extent,
    pub data_bitmap: Extent,
    pub inode_table: Extent,
    pub data: Extent,
    pub root_inode: u32,
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
    pub created_at: Timestamp,
    pub last_mounted_at: Option<Timestamp>,
    /// to verify the integrity of this superblock
    /// intend to use a fast secure hash function,like [blake3]
    pub digest: [u8; 32],
}

impl SuperBlock {
    pub fn new(block_count: u64, layout: &VolumeLayout, uid: u32, gid: u32) -> Self {
        SuperBlock {
            magic: FS_MAGIC,
            block_size: BLOCK_SIZE as u32,
            block_count,
            inode_count: layout.inode_count,
            inode_bitmap: layout.inode_bitmap,
            data_bitmap: layout.data_bitmap,
            inode_table: layout.inode_table,
            data: layout.data,
            root_inode: ROOT_INODE,
            uid,
            gid,
            created_at: Timestamp::now(),
            last_mounted_at: None,
            digest: [0u8; 32],
        }
    }

    pub fn layout(&self) -> VolumeLayout {
        VolumeLayout {
            inode_bitmap: self.inode_bitmap,
            data_bitmap: self.data_bitmap,
            inode_table: self.inode_table,
            data: self.data,
            inode_count: self.inode_count,
        }
    }

    /// reject records that belong to another filesystem or block size
    pub fn check_identity(&self) -> Result<()> {
        if self.magic != FS_MAGIC {
            return Err(FsError::Format(format!(
                "bad magic {:#010x}, expected {FS_MAGIC:#010x}",
                self.magic
            )));
        }
        if self.block_size as usize != BLOCK_SIZE {
            return Err(FsError::Format(format!(
                "unsupported block size {}",
                self.block_size
            )));
        }
        if self.root_inode != ROOT_INODE {
            return Err(FsError::Format(format!(
                "root inode {} is not {ROOT_INODE}",
                self.root_inode
            )));
        }
        Ok(())
    }

    pub fn update_last_mounted_at(&mut self) {
        self.last_mounted_at = Some(Timestamp::now());
    }
}

impl DigestInSelf for SuperBlock {
    fn digest(&mut self) -> Result<()> {
        self.digest = [0u8; 32];
        self.digest = digest::digest(self)?;
        Ok(())
    }

    fn verify_digest(&mut self) -> Result<bool> {
        // get digest from itself
        let stored = self.digest;
        // clear the digest from struct and recalculate
        self.digest = [0u8; 32];
        let calculated = digest::digest(self)?;
        self.digest = stored;
        Ok(stored == calculated)
    }
}

impl SerializeAndDigest for SuperBlock {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_orders_regions() {
        let layout = VolumeLayout::compute(1024, 64).unwrap();
        assert_eq!(layout.inode_bitmap, Extent::new(1, 1));
        assert_eq!(layout.data_bitmap, Extent::new(2, 1));
        assert_eq!(layout.inode_table, Extent::new(3, 4));
        assert_eq!(layout.data, Extent::new(7, 1017));
        layout.validate(1024).unwrap();
    }

    #[test]
    fn test_compute_rejects_tiny_devices() {
        assert!(matches!(
            VolumeLayout::compute(3, 16),
            Err(FsError::Format(_))
        ));
        assert!(matches!(
            VolumeLayout::compute(100, 0),
            Err(FsError::Format(_))
        ));
    }

    #[test]
    fn test_validate_rejects_gaps_and_overruns() {
        let layout = VolumeLayout::compute(1024, 64).unwrap();
        assert!(layout.validate(1000).is_err());

        let mut gap = layout;
        gap.data.start += 1;
        assert!(gap.validate(2048).is_err());

        let mut overlap = layout;
        overlap.inode_table.start -= 1;
        assert!(overlap.validate(1024).is_err());
    }

    #[test]
    fn test_superblock_digest_round_trip() {
        let layout = VolumeLayout::compute(256, 32).unwrap();
        let mut superblock = SuperBlock::new(256, &layout, 1000, 1000);
        let mut block = vec![0u8; BLOCK_SIZE];
        let written = superblock.serialize_into(&mut block).unwrap();
        let (decoded, read) = SuperBlock::deserialize_from(&block).unwrap();
        assert_eq!(written, read);
        assert_eq!(decoded, superblock);
        assert_eq!(decoded.layout(), layout);
        decoded.check_identity().unwrap();
    }

    #[test]
    fn test_serialize_into_short_buffer_fails() {
        let layout = VolumeLayout::compute(256, 32).unwrap();
        let mut superblock = SuperBlock::new(256, &layout, 0, 0);
        let mut small = [0u8; 8];
        assert!(matches!(
            superblock.serialize_into(&mut small),
            Err(FsError::Format(_))
        ));
        assert_eq!(small, [0u8; 8]);
    }

    #[test]
    fn test_tampered_superblock_fails_digest() {
        let layout = VolumeLayout::compute(256, 32).unwrap();
        let mut superblock = SuperBlock::new(256, &layout, 0, 0);
        let mut bytes = superblock.serialize_to_vec().unwrap();
        // magic is the first field
        bytes[0] ^= 0xFF;
        assert!(matches!(
            SuperBlock::deserialize_from(&bytes),
            Err(FsError::Format(_))
        ));
    }
}
