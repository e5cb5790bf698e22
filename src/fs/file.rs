//! byte-level file data on top of the block-pointer resolver
use log::{debug, info, warn};

use crate::{
    block_store::BlockStore,
    error::{FsError, Result},
    utils::fs_size_calculator::{blocks_for_bytes, max_file_blocks},
};

use super::{Inode, Volume, BLOCK_SIZE};

/// one block's share of a byte range
struct Span {
    logical: u64,
    in_block: usize,
    len: usize,
}

/// split `[offset, end)` at block boundaries
fn spans(offset: u64, end: u64) -> impl Iterator<Item = Span> {
    let mut pos = offset;
    std::iter::from_fn(move || {
        if pos >= end {
            return None;
        }
        let in_block = (pos % BLOCK_SIZE as u64) as usize;
        let len = (end - pos).min((BLOCK_SIZE - in_block) as u64) as usize;
        let span = Span {
            logical: pos / BLOCK_SIZE as u64,
            in_block,
            len,
        };
        pos += len as u64;
        Some(span)
    })
}

impl<S: BlockStore> Volume<S> {
    /// read from `offset` into `buf`, stopping at the end of file
    /// # Return
    /// bytes read, holes read as zeros
    pub fn read_at(&mut self, inode: &Inode, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        if offset >= inode.size {
            return Ok(0);
        }
        let end = inode.size.min(offset + buf.len() as u64);
        let mut copied = 0;
        for span in spans(offset, end) {
            let out = &mut buf[copied..copied + span.len];
            match self.map_block(inode, span.logical)? {
                Some(block) => self.cache.with_block(block, |data| {
                    out.copy_from_slice(&data[span.in_block..span.in_block + span.len])
                })?,
                None => out.fill(0),
            }
            copied += span.len;
        }
        Ok(copied)
    }

    /// write `data` at `offset`, allocating blocks as needed
    ///
    /// Blocks allocated past the old end of file are released again when the
    /// write fails part-way.
    pub fn write_at(&mut self, inode: &mut Inode, offset: u64, data: &[u8]) -> Result<usize> {
        self.ensure_writable()?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| blocks_for_bytes(*end) <= max_file_blocks())
            .ok_or(FsError::FileTooLarge)?;

        let kept_blocks = blocks_for_bytes(inode.size);
        if let Err(e) = self.write_spans(inode, offset, end, data) {
            if let Err(rollback) = self.truncate_blocks(inode, kept_blocks) {
                warn!("releasing blocks of inode {} failed: {rollback}", inode.ino);
            }
            return Err(e);
        }
        if end > inode.size {
            inode.size = end;
        }
        inode.touch_modified();
        self.write_inode(inode)?;
        debug!("write_at() wrote {} bytes to inode {} at {offset}", data.len(), inode.ino);
        Ok(data.len())
    }

    fn write_spans(&mut self, inode: &mut Inode, offset: u64, end: u64, data: &[u8]) -> Result<()> {
        let mut written = 0;
        for span in spans(offset, end) {
            let block = self
                .resolve(inode, span.logical, true)?
                .ok_or_else(|| FsError::InvalidArgument("data block not mapped".into()))?;
            let chunk = &data[written..written + span.len];
            if span.len == BLOCK_SIZE {
                // whole block, no need to read the old contents
                let pinned = self.cache.pin_zeroed(block);
                self.cache.data_mut(&pinned).copy_from_slice(chunk);
                self.cache.release(pinned)?;
            } else {
                self.cache.with_block_mut(block, |buf| {
                    buf[span.in_block..span.in_block + span.len].copy_from_slice(chunk)
                })?;
            }
            written += span.len;
        }
        Ok(())
    }

    /// set the size of a regular file
    ///
    /// Shrinking releases the blocks past the new end and zeroes the tail of
    /// the last kept block, growing leaves a hole.
    pub fn truncate(&mut self, inode: &mut Inode, new_size: u64) -> Result<()> {
        info!("truncate() called with inode {} size {new_size}", inode.ino);
        self.ensure_writable()?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        if blocks_for_bytes(new_size) > max_file_blocks() {
            return Err(FsError::FileTooLarge);
        }
        if new_size < inode.size {
            let keep = blocks_for_bytes(new_size);
            self.truncate_blocks(inode, keep)?;
            let tail = (new_size % BLOCK_SIZE as u64) as usize;
            if tail != 0 {
                if let Some(block) = self.map_block(inode, keep - 1)? {
                    self.cache
                        .with_block_mut(block, |data| data[tail..].fill(0))?;
                }
            }
        }
        inode.size = new_size;
        inode.touch_modified();
        self.write_inode(inode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{utils::init_test_environment::test_volume, MemBlockStore, Region, ROOT_INODE};

    fn new_file(volume: &mut Volume<MemBlockStore>) -> Inode {
        let root = volume.read_inode(ROOT_INODE).unwrap();
        volume.new_inode(&root, libc::S_IFREG as u16 | 0o644).unwrap()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_write_then_read_across_blocks() {
        let mut volume = test_volume();
        let mut file = new_file(&mut volume);
        let data = pattern(3 * BLOCK_SIZE + 100);
        assert_eq!(volume.write_at(&mut file, 10, &data).unwrap(), data.len());
        assert_eq!(file.size, 10 + data.len() as u64);
        assert_eq!(file.blocks, 4);

        let mut back = vec![0u8; data.len()];
        assert_eq!(volume.read_at(&file, 10, &mut back).unwrap(), data.len());
        assert_eq!(back, data);
        // the persisted inode agrees
        assert_eq!(volume.read_inode(file.ino).unwrap(), file);
    }

    #[test]
    fn test_read_stops_at_end_of_file() {
        let mut volume = test_volume();
        let mut file = new_file(&mut volume);
        volume.write_at(&mut file, 0, b"hello").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(volume.read_at(&file, 0, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(volume.read_at(&file, 5, &mut buf).unwrap(), 0);
        assert_eq!(volume.read_at(&file, 100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_holes_read_as_zeros() {
        let mut volume = test_volume();
        let mut file = new_file(&mut volume);
        volume
            .write_at(&mut file, 3 * BLOCK_SIZE as u64, b"tail")
            .unwrap();
        assert_eq!(file.blocks, 1);
        assert_eq!(volume.map_block(&file, 0).unwrap(), None);

        let mut buf = vec![0xffu8; BLOCK_SIZE];
        assert_eq!(volume.read_at(&file, 0, &mut buf).unwrap(), BLOCK_SIZE);
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_partial_overwrite_keeps_neighbours() {
        let mut volume = test_volume();
        let mut file = new_file(&mut volume);
        volume.write_at(&mut file, 0, &[b'a'; 64]).unwrap();
        volume.write_at(&mut file, 10, b"XYZ").unwrap();
        let mut buf = [0u8; 64];
        volume.read_at(&file, 0, &mut buf).unwrap();
        assert_eq!(&buf[8..14], b"aaXYZa");
        assert_eq!(file.size, 64);
    }

    #[test]
    fn test_failed_write_releases_new_blocks() {
        let mut volume = test_volume();
        let mut file = new_file(&mut volume);
        let free = volume.count_free(Region::Data).unwrap() as usize;
        volume.allocate(Region::Data, free - 3).unwrap();

        let data = pattern(5 * BLOCK_SIZE);
        assert!(matches!(
            volume.write_at(&mut file, 0, &data),
            Err(FsError::NoSpace(Region::Data))
        ));
        assert_eq!(volume.count_free(Region::Data).unwrap(), 3);
        assert_eq!(file.size, 0);
        assert_eq!(file.blocks, 0);
    }

    #[test]
    fn test_truncate_shrinks_and_zeroes_tail() {
        let mut volume = test_volume();
        let mut file = new_file(&mut volume);
        let free = volume.count_free(Region::Data).unwrap();
        volume.write_at(&mut file, 0, &[1u8; 3 * BLOCK_SIZE]).unwrap();

        volume.truncate(&mut file, 100).unwrap();
        assert_eq!(file.size, 100);
        assert_eq!(file.blocks, 1);
        assert_eq!(volume.count_free(Region::Data).unwrap(), free - 1);

        // growing again exposes zeros, not the old bytes
        volume.truncate(&mut file, 2 * BLOCK_SIZE as u64).unwrap();
        let mut buf = vec![0xffu8; 2 * BLOCK_SIZE];
        volume.read_at(&file, 0, &mut buf).unwrap();
        assert!(buf[..100].iter().all(|b| *b == 1));
        assert!(buf[100..].iter().all(|b| *b == 0));
        assert_eq!(file.blocks, 1);

        volume.truncate(&mut file, 0).unwrap();
        assert_eq!(volume.count_free(Region::Data).unwrap(), free);
    }

    #[test]
    fn test_directories_are_not_file_data() {
        let mut volume = test_volume();
        let mut root = volume.read_inode(ROOT_INODE).unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(
            volume.read_at(&root, 0, &mut buf),
            Err(FsError::IsDirectory)
        ));
        assert!(matches!(
            volume.write_at(&mut root, 0, b"x"),
            Err(FsError::IsDirectory)
        ));
        assert!(matches!(
            volume.truncate(&mut root, 0),
            Err(FsError::IsDirectory)
        ));
    }

    #[test]
    fn test_write_past_max_size_is_rejected() {
        let mut volume = test_volume();
        let mut file = new_file(&mut volume);
        let past = max_file_blocks() * BLOCK_SIZE as u64;
        assert!(matches!(
            volume.write_at(&mut file, past, b"x"),
            Err(FsError::FileTooLarge)
        ));
        assert!(matches!(
            volume.write_at(&mut file, u64::MAX, b"x"),
            Err(FsError::FileTooLarge)
        ));
    }
}
