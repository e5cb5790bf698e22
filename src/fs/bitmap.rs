//! inode and data block allocation from the on-disk bitmaps
use std::fmt;

use bitvec::prelude::*;
use log::{debug, warn};
use smallvec::SmallVec;

use crate::{
    block_store::BlockStore,
    error::{FsError, Result},
};

use super::{superblock::Extent, Volume, BITS_PER_BLOCK, ROOT_INODE};

/// the two allocatable unit spaces of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// inode numbers, bit `i` is inode `ROOT_INODE + i`
    Inode,
    /// data blocks, bit `i` is physical block `data.start + i`
    Data,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Inode => f.write_str("inode"),
            Region::Data => f.write_str("data"),
        }
    }
}

/// units handed out by one [Volume::allocate] call
pub type Units = SmallVec<[u32; 4]>;

/// where a region's bits live and what the first bit means
#[derive(Debug, Clone, Copy)]
struct BitmapGeometry {
    bitmap: Extent,
    units: u64,
    base: u32,
}

impl BitmapGeometry {
    /// bits of bitmap block `k` that stand for real units
    fn valid_bits(&self, k: u32) -> usize {
        let first = k as u64 * BITS_PER_BLOCK as u64;
        self.units.saturating_sub(first).min(BITS_PER_BLOCK as u64) as usize
    }
}

/// bitmap allocator
impl<S: BlockStore> Volume<S> {
    fn geometry(&self, region: Region) -> BitmapGeometry {
        let layout = self.layout();
        match region {
            Region::Inode => BitmapGeometry {
                bitmap: layout.inode_bitmap,
                units: layout.inode_count as u64,
                base: ROOT_INODE,
            },
            Region::Data => BitmapGeometry {
                bitmap: layout.data_bitmap,
                units: layout.data.count as u64,
                base: layout.data.start,
            },
        }
    }

    /// claim `count` free units of `region`, lowest numbers first
    ///
    /// Every bitmap block that gained a bit is synced before this returns.
    /// When fewer than `count` units are free nothing stays claimed and
    /// [FsError::NoSpace] is returned.
    pub fn allocate(&mut self, region: Region, count: usize) -> Result<Units> {
        self.ensure_writable()?;
        let mut claimed = Units::new();
        match self.claim_units(region, count, &mut claimed) {
            Ok(()) if claimed.len() == count => {
                debug!("allocate({region}, {count}) -> {claimed:?}");
                Ok(claimed)
            }
            outcome => {
                let err = outcome.err().unwrap_or(FsError::NoSpace(region));
                self.release_claimed(region, &claimed);
                Err(err)
            }
        }
    }

    fn claim_units(&mut self, region: Region, count: usize, claimed: &mut Units) -> Result<()> {
        let geometry = self.geometry(region);
        for k in 0..geometry.bitmap.count {
            if claimed.len() == count {
                break;
            }
            let valid = geometry.valid_bits(k);
            if valid == 0 {
                break;
            }
            let pinned = self.cache.pin(geometry.bitmap.start + k)?;
            let has_free = self.cache.data(&pinned).view_bits::<Lsb0>()[..valid]
                .first_zero()
                .is_some();
            if !has_free {
                self.cache.release(pinned)?;
                continue;
            }
            let first_unit = geometry.base as u64 + k as u64 * BITS_PER_BLOCK as u64;
            let bits = &mut self.cache.data_mut(&pinned).view_bits_mut::<Lsb0>()[..valid];
            while claimed.len() < count {
                let Some(bit) = bits.first_zero() else {
                    break;
                };
                bits.set(bit, true);
                // bounded by the region's unit count, which fits u32
                claimed.push((first_unit + bit as u64) as u32);
            }
            // write-through before anybody can reference the new units
            let synced = self.cache.sync(&pinned);
            self.cache.release(pinned)?;
            synced?;
        }
        Ok(())
    }

    pub(crate) fn release_claimed(&mut self, region: Region, claimed: &[u32]) {
        for unit in claimed {
            if let Err(e) = self.free(region, *unit, 1) {
                warn!("rolling back {region} unit {unit} failed: {e}");
            }
        }
    }

    /// give `count` consecutive units starting at `unit` back to `region`
    ///
    /// Freeing a unit that is already free only logs a warning.
    pub fn free(&mut self, region: Region, unit: u32, count: u32) -> Result<()> {
        self.ensure_writable()?;
        let geometry = self.geometry(region);
        let first = (unit as u64)
            .checked_sub(geometry.base as u64)
            .filter(|first| first + count as u64 <= geometry.units)
            .ok_or_else(|| {
                FsError::corrupt(
                    unit,
                    format!("freeing {count} {region} units outside the region"),
                )
            })?;
        debug!("free({region}, {unit}, {count})");
        let mut bit = first;
        let end = first + count as u64;
        while bit < end {
            let k = (bit / BITS_PER_BLOCK as u64) as u32;
            let in_block = (bit % BITS_PER_BLOCK as u64) as usize;
            let run = (end - bit).min((BITS_PER_BLOCK - in_block) as u64) as usize;

            let pinned = self.cache.pin(geometry.bitmap.start + k)?;
            let bits = self.cache.data_mut(&pinned).view_bits_mut::<Lsb0>();
            let already_free = bits[in_block..in_block + run].count_zeros();
            bits[in_block..in_block + run].fill(false);
            if already_free > 0 {
                warn!(
                    "{already_free} of {run} {region} units from {} were already free",
                    geometry.base as u64 + bit
                );
            }
            let synced = self.cache.sync(&pinned);
            self.cache.release(pinned)?;
            synced?;
            bit += run as u64;
        }
        Ok(())
    }

    /// whether `unit` is marked in use, units outside the region never are
    pub fn is_allocated(&mut self, region: Region, unit: u32) -> Result<bool> {
        let geometry = self.geometry(region);
        let Some(bit) = (unit as u64)
            .checked_sub(geometry.base as u64)
            .filter(|bit| *bit < geometry.units)
        else {
            return Ok(false);
        };
        let k = (bit / BITS_PER_BLOCK as u64) as u32;
        let in_block = (bit % BITS_PER_BLOCK as u64) as usize;
        self.cache.with_block(geometry.bitmap.start + k, |block| {
            block.view_bits::<Lsb0>()[in_block]
        })
    }

    /// free units left in `region`
    pub fn count_free(&mut self, region: Region) -> Result<u64> {
        let geometry = self.geometry(region);
        let mut free = 0u64;
        for k in 0..geometry.bitmap.count {
            let valid = geometry.valid_bits(k);
            if valid == 0 {
                break;
            }
            free += self
                .cache
                .with_block(geometry.bitmap.start + k, |block| {
                    block.view_bits::<Lsb0>()[..valid].count_zeros()
                })? as u64;
        }
        Ok(free)
    }
}
