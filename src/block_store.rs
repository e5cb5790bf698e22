//! block I/O underneath a [Volume](crate::Volume)
//!
//! - [BlockStore]: what a host has to supply, whole-block reads and writes by
//!   physical block number plus a durability barrier per block.
//! - [MemBlockStore] and [MmapBlockStore]: an in-memory store and an image
//!   file store.
//! - [BufferCache]: pinned, reference counted access to blocks on top of a
//!   store, so every in-flight user of a block shares one buffer.
use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{Error as IoError, ErrorKind};
use std::path::Path;

use log::{debug, warn};
use memmap2::MmapMut;

use crate::error::{FsError, Result};
use crate::fs::{PhysicalBlock, BLOCK_SIZE};

/// the collaborator every core operation reads and writes through
pub trait BlockStore {
    /// number of addressable blocks
    fn block_count(&self) -> u64;

    /// read one block, `buf.len()` must be [BLOCK_SIZE]
    fn read_block(&self, block: PhysicalBlock, buf: &mut [u8]) -> Result<()>;

    /// write one block, `buf.len()` must be [BLOCK_SIZE]
    fn write_block(&mut self, block: PhysicalBlock, buf: &[u8]) -> Result<()>;

    /// force a previously written block to stable storage
    fn sync_block(&mut self, block: PhysicalBlock) -> Result<()>;

    /// force everything to stable storage
    fn sync_all(&mut self) -> Result<()> {
        Ok(())
    }
}

fn check_request(block: PhysicalBlock, len: usize, block_count: u64) -> Result<()> {
    if u64::from(block) >= block_count {
        return Err(FsError::Io(IoError::new(
            ErrorKind::UnexpectedEof,
            format!("block {block} is past the end of the store ({block_count} blocks)"),
        )));
    }
    if len != BLOCK_SIZE {
        return Err(FsError::InvalidArgument(format!(
            "block buffer must be {BLOCK_SIZE} bytes, got {len}"
        )));
    }
    Ok(())
}

fn block_range(block: PhysicalBlock) -> std::ops::Range<usize> {
    let start = block as usize * BLOCK_SIZE;
    start..start + BLOCK_SIZE
}

/// a store kept entirely in memory
///
/// It remembers which blocks were synced and can be told to fail reads or
/// writes of chosen blocks.
#[derive(Debug, Clone, Default)]
pub struct MemBlockStore {
    data: Vec<u8>,
    blocks: u64,
    synced: Vec<PhysicalBlock>,
    failing_reads: HashSet<PhysicalBlock>,
    failing_writes: HashSet<PhysicalBlock>,
}

impl MemBlockStore {
    /// a zero-filled store of `blocks` blocks
    pub fn new(blocks: u32) -> Self {
        MemBlockStore {
            data: vec![0u8; blocks as usize * BLOCK_SIZE],
            blocks: blocks as u64,
            ..Default::default()
        }
    }

    /// every block number passed to `sync_block`, oldest first
    pub fn synced_blocks(&self) -> &[PhysicalBlock] {
        &self.synced
    }

    pub fn clear_sync_log(&mut self) {
        self.synced.clear();
    }

    /// make reads of `block` fail with an I/O error
    pub fn fail_reads_of(&mut self, block: PhysicalBlock) {
        self.failing_reads.insert(block);
    }

    /// make writes of `block` fail with an I/O error
    pub fn fail_writes_of(&mut self, block: PhysicalBlock) {
        self.failing_writes.insert(block);
    }

    pub fn heal(&mut self) {
        self.failing_reads.clear();
        self.failing_writes.clear();
    }

    /// raw view of one block, bypassing every cache
    pub fn block(&self, block: PhysicalBlock) -> &[u8] {
        &self.data[block_range(block)]
    }

    /// raw mutable view of one block, bypassing every cache
    pub fn block_mut(&mut self, block: PhysicalBlock) -> &mut [u8] {
        &mut self.data[block_range(block)]
    }
}

impl BlockStore for MemBlockStore {
    fn block_count(&self) -> u64 {
        self.blocks
    }

    fn read_block(&self, block: PhysicalBlock, buf: &mut [u8]) -> Result<()> {
        check_request(block, buf.len(), self.blocks)?;
        if self.failing_reads.contains(&block) {
            return Err(FsError::Io(IoError::new(
                ErrorKind::Other,
                format!("injected read failure at block {block}"),
            )));
        }
        buf.copy_from_slice(&self.data[block_range(block)]);
        Ok(())
    }

    fn write_block(&mut self, block: PhysicalBlock, buf: &[u8]) -> Result<()> {
        check_request(block, buf.len(), self.blocks)?;
        if self.failing_writes.contains(&block) {
            return Err(FsError::Io(IoError::new(
                ErrorKind::Other,
                format!("injected write failure at block {block}"),
            )));
        }
        self.data[block_range(block)].copy_from_slice(buf);
        Ok(())
    }

    fn sync_block(&mut self, block: PhysicalBlock) -> Result<()> {
        self.synced.push(block);
        Ok(())
    }
}

/// a store backed by a memory-mapped image file
#[derive(Debug)]
pub struct MmapBlockStore {
    map: MmapMut,
    blocks: u64,
}

impl MmapBlockStore {
    /// map an existing image file for read and write
    /// # Params
    /// - `image_path`: the image file, its length must be a multiple of [BLOCK_SIZE]
    pub fn open<P>(image_path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(image_path.as_ref())?;
        let len = file.metadata()?.len();
        if len == 0 || len % BLOCK_SIZE as u64 != 0 {
            return Err(FsError::Format(format!(
                "image length {len} is not a non-zero multiple of {BLOCK_SIZE}"
            )));
        }
        // Safety
        // This method returns an error when the underlying system call fails,
        // which can happen for a variety of reasons,
        // such as when the file is not open with read and write permissions.
        // from https://docs.rs/memmap2/0.5.10/memmap2/struct.MmapMut.html
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(MmapBlockStore {
            map,
            blocks: len / BLOCK_SIZE as u64,
        })
    }
}

impl BlockStore for MmapBlockStore {
    fn block_count(&self) -> u64 {
        self.blocks
    }

    fn read_block(&self, block: PhysicalBlock, buf: &mut [u8]) -> Result<()> {
        check_request(block, buf.len(), self.blocks)?;
        buf.copy_from_slice(&self.map[block_range(block)]);
        Ok(())
    }

    fn write_block(&mut self, block: PhysicalBlock, buf: &[u8]) -> Result<()> {
        check_request(block, buf.len(), self.blocks)?;
        self.map[block_range(block)].copy_from_slice(buf);
        Ok(())
    }

    fn sync_block(&mut self, block: PhysicalBlock) -> Result<()> {
        Ok(self.map.flush_range(block as usize * BLOCK_SIZE, BLOCK_SIZE)?)
    }

    fn sync_all(&mut self) -> Result<()> {
        Ok(self.map.flush()?)
    }
}

/// a pin on one cached block, handed out by [BufferCache::pin] and
/// given back through [BufferCache::release] or [BufferCache::forget]
#[must_use = "a pinned block stays cached until it is released"]
#[derive(Debug, PartialEq, Eq)]
pub struct BlockRef {
    block: PhysicalBlock,
}

impl BlockRef {
    pub fn block(&self) -> PhysicalBlock {
        self.block
    }
}

#[derive(Debug)]
struct Slot {
    data: Box<[u8]>,
    pins: usize,
    dirty: bool,
}

/// reference counted block buffers over a [BlockStore]
///
/// A buffer is read on its first pin, shared by every later pin, and written
/// back when its last pin is released. Writes are last-write-wins.
#[derive(Debug)]
pub struct BufferCache<S> {
    store: S,
    slots: HashMap<PhysicalBlock, Slot>,
}

impl<S> BufferCache<S> {
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}

impl<S: BlockStore> BufferCache<S> {
    pub fn new(store: S) -> Self {
        BufferCache {
            store,
            slots: HashMap::new(),
        }
    }

    /// pin `block`, reading it from the store unless it is already cached
    pub fn pin(&mut self, block: PhysicalBlock) -> Result<BlockRef> {
        if let Some(slot) = self.slots.get_mut(&block) {
            slot.pins += 1;
            return Ok(BlockRef { block });
        }
        let mut data = vec![0u8; BLOCK_SIZE].into_boxed_slice();
        self.store.read_block(block, &mut data)?;
        self.slots.insert(
            block,
            Slot {
                data,
                pins: 1,
                dirty: false,
            },
        );
        Ok(BlockRef { block })
    }

    /// pin `block` without reading it, its contents become zeros
    pub fn pin_zeroed(&mut self, block: PhysicalBlock) -> BlockRef {
        let slot = self.slots.entry(block).or_insert_with(|| Slot {
            data: vec![0u8; BLOCK_SIZE].into_boxed_slice(),
            pins: 0,
            dirty: false,
        });
        slot.data.fill(0);
        slot.pins += 1;
        slot.dirty = true;
        BlockRef { block }
    }

    pub fn data(&self, pinned: &BlockRef) -> &[u8] {
        &self.slots[&pinned.block].data
    }

    /// mutable view of a pinned block, marks it dirty
    pub fn data_mut(&mut self, pinned: &BlockRef) -> &mut [u8] {
        let slot = self
            .slots
            .get_mut(&pinned.block)
            .expect("a BlockRef always has a cached slot");
        slot.dirty = true;
        &mut slot.data
    }

    /// write a pinned block through to the store and make it durable now
    pub fn sync(&mut self, pinned: &BlockRef) -> Result<()> {
        let slot = self
            .slots
            .get_mut(&pinned.block)
            .expect("a BlockRef always has a cached slot");
        self.store.write_block(pinned.block, &slot.data)?;
        self.store.sync_block(pinned.block)?;
        slot.dirty = false;
        Ok(())
    }

    /// drop one pin, the last pin writes a dirty buffer back and evicts it
    pub fn release(&mut self, pinned: BlockRef) -> Result<()> {
        let block = pinned.block;
        let Some(slot) = self.slots.get_mut(&block) else {
            return Ok(());
        };
        slot.pins = slot.pins.saturating_sub(1);
        if slot.pins > 0 {
            return Ok(());
        }
        if slot.dirty {
            // a failed write keeps the dirty buffer around for `flush`
            self.store.write_block(block, &slot.data)?;
            slot.dirty = false;
        }
        self.slots.remove(&block);
        Ok(())
    }

    /// drop one pin without writing, the last pin discards pending changes
    pub fn forget(&mut self, pinned: BlockRef) {
        let block = pinned.block;
        if let Some(slot) = self.slots.get_mut(&block) {
            slot.pins = slot.pins.saturating_sub(1);
            if slot.pins == 0 {
                debug!("discarding buffer of block {block}");
                self.slots.remove(&block);
            }
        }
    }

    /// pin, look, release
    pub fn with_block<T>(&mut self, block: PhysicalBlock, f: impl FnOnce(&[u8]) -> T) -> Result<T> {
        let pinned = self.pin(block)?;
        let out = f(self.data(&pinned));
        self.release(pinned)?;
        Ok(out)
    }

    /// pin, mutate, mark dirty, release
    pub fn with_block_mut<T>(
        &mut self,
        block: PhysicalBlock,
        f: impl FnOnce(&mut [u8]) -> T,
    ) -> Result<T> {
        let pinned = self.pin(block)?;
        let out = f(self.data_mut(&pinned));
        self.release(pinned)?;
        Ok(out)
    }

    /// number of blocks currently holding at least one pin
    pub fn pinned_blocks(&self) -> usize {
        self.slots.values().filter(|slot| slot.pins > 0).count()
    }

    /// write every dirty buffer and sync the whole store
    pub fn flush(&mut self) -> Result<()> {
        let mut blocks: Vec<PhysicalBlock> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.dirty)
            .map(|(block, _)| *block)
            .collect();
        blocks.sort_unstable();
        for block in blocks {
            let slot = self
                .slots
                .get_mut(&block)
                .expect("block numbers were collected from the map");
            self.store.write_block(block, &slot.data)?;
            slot.dirty = false;
        }
        self.slots.retain(|_, slot| slot.pins > 0);
        self.store.sync_all()
    }

    /// flush and hand the store back
    pub fn into_store(mut self) -> Result<S> {
        if self.pinned_blocks() > 0 {
            warn!(
                "{} blocks still pinned while closing the buffer cache",
                self.pinned_blocks()
            );
        }
        self.flush()?;
        Ok(self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pins_share_one_buffer() {
        let mut cache = BufferCache::new(MemBlockStore::new(4));
        let first = cache.pin(2).unwrap();
        let second = cache.pin(2).unwrap();
        cache.data_mut(&first)[0] = 0xAB;
        assert_eq!(cache.data(&second)[0], 0xAB);
        assert_eq!(cache.pinned_blocks(), 1);

        cache.release(first).unwrap();
        // still pinned by `second`, nothing written yet
        assert_eq!(cache.store().block(2)[0], 0);
        cache.release(second).unwrap();
        assert_eq!(cache.store().block(2)[0], 0xAB);
        assert_eq!(cache.pinned_blocks(), 0);
    }

    #[test]
    fn test_sync_writes_through() {
        let mut cache = BufferCache::new(MemBlockStore::new(4));
        let pinned = cache.pin(1).unwrap();
        cache.data_mut(&pinned)[10] = 7;
        cache.sync(&pinned).unwrap();
        assert_eq!(cache.store().block(1)[10], 7);
        assert_eq!(cache.store().synced_blocks(), &[1]);
        cache.release(pinned).unwrap();
    }

    #[test]
    fn test_forget_discards_changes() {
        let mut cache = BufferCache::new(MemBlockStore::new(4));
        let pinned = cache.pin_zeroed(3);
        cache.data_mut(&pinned)[0] = 9;
        cache.forget(pinned);
        assert_eq!(cache.store().block(3)[0], 0);
        assert_eq!(cache.pinned_blocks(), 0);
    }

    #[test]
    fn test_pin_zeroed_clears_existing_contents() {
        let mut store = MemBlockStore::new(4);
        store.block_mut(1).fill(0xFF);
        let mut cache = BufferCache::new(store);
        let pinned = cache.pin_zeroed(1);
        assert!(cache.data(&pinned).iter().all(|b| *b == 0));
        cache.release(pinned).unwrap();
        assert!(cache.store().block(1).iter().all(|b| *b == 0));
    }

    #[test]
    fn test_read_failure_is_io_error() {
        let mut store = MemBlockStore::new(4);
        store.fail_reads_of(2);
        let mut cache = BufferCache::new(store);
        assert!(matches!(cache.pin(2), Err(FsError::Io(_))));
        assert!(matches!(cache.pin(9), Err(FsError::Io(_))));
        assert_eq!(cache.pinned_blocks(), 0);
    }

    #[test]
    fn test_failed_write_back_is_retried_by_flush() {
        let mut store = MemBlockStore::new(4);
        store.fail_writes_of(1);
        let mut cache = BufferCache::new(store);
        let result = cache.with_block_mut(1, |data| data[0] = 5);
        assert!(matches!(result, Err(FsError::Io(_))));

        cache.store_mut().heal();
        cache.flush().unwrap();
        assert_eq!(cache.store().block(1)[0], 5);
    }

    #[test]
    fn test_mmap_store_round_trip() {
        let image = tempfile::NamedTempFile::new().unwrap();
        image.as_file().set_len(4 * BLOCK_SIZE as u64).unwrap();

        let mut store = MmapBlockStore::open(image.path()).unwrap();
        assert_eq!(store.block_count(), 4);
        let block = vec![0x5Au8; BLOCK_SIZE];
        store.write_block(3, &block).unwrap();
        store.sync_block(3).unwrap();
        drop(store);

        let store = MmapBlockStore::open(image.path()).unwrap();
        let mut buf = vec![0u8; BLOCK_SIZE];
        store.read_block(3, &mut buf).unwrap();
        assert_eq!(buf, block);
    }

    #[test]
    fn test_mmap_store_rejects_ragged_image() {
        let image = tempfile::NamedTempFile::new().unwrap();
        image.as_file().set_len(BLOCK_SIZE as u64 + 1).unwrap();
        assert!(matches!(
            MmapBlockStore::open(image.path()),
            Err(FsError::Format(_))
        ));
    }
}
