//! logical to physical block mapping through the 15 pointers of an inode
//!
//! Logical block `i` is reached through a path of slot offsets:
//! - `i < 12`: direct slot `i`
//! - next 1024 blocks: slot 12, then one indirect node
//! - next 1024² blocks: slot 13, then two levels of nodes
//! - next 1024³ blocks: slot 14, then three levels of nodes
//!
//! A node is a block of 1024 little-endian pointers, zero meaning unallocated.
use log::{debug, warn};
use smallvec::SmallVec;

use crate::{
    block_store::{BlockRef, BlockStore},
    error::{FsError, Result},
    utils::byte_order::{read_u32_le, write_u32_le},
};

use super::{Inode, PhysicalBlock, Region, Volume, DIRECT_POINTERS, NODE_PER_BLK};

const DIRECT: u64 = DIRECT_POINTERS as u64;
const PTRS: u64 = NODE_PER_BLK as u64;

/// slot offsets from the inode pointer array down to the leaf, 1 to 4 long
pub type BlockPath = SmallVec<[usize; 4]>;

/// map a logical block index to its path of slot offsets
/// # Example
/// ```
/// use blockfs::path_for;
/// assert_eq!(path_for(5).unwrap().as_slice(), &[5]);
/// assert_eq!(path_for(12).unwrap().as_slice(), &[12, 0]);
/// assert_eq!(path_for(12 + 1024).unwrap().as_slice(), &[13, 0, 0]);
/// ```
pub fn path_for(logical: u64) -> Result<BlockPath> {
    let mut path = BlockPath::new();
    let mut rest = logical;
    if rest < DIRECT {
        path.push(rest as usize);
        return Ok(path);
    }
    rest -= DIRECT;
    if rest < PTRS {
        path.extend([DIRECT_POINTERS, rest as usize]);
        return Ok(path);
    }
    rest -= PTRS;
    if rest < PTRS * PTRS {
        path.extend([
            DIRECT_POINTERS + 1,
            (rest / PTRS) as usize,
            (rest % PTRS) as usize,
        ]);
        return Ok(path);
    }
    rest -= PTRS * PTRS;
    if rest < PTRS * PTRS * PTRS {
        path.extend([
            DIRECT_POINTERS + 2,
            (rest / (PTRS * PTRS)) as usize,
            (rest / PTRS % PTRS) as usize,
            (rest % PTRS) as usize,
        ]);
        return Ok(path);
    }
    Err(FsError::FileTooLarge)
}

/// where a chain member's pointer lives
#[derive(Debug)]
enum Holder {
    /// `Inode::block_ptrs`
    Inode,
    /// a pinned indirect node
    Node(BlockRef),
}

/// one pointer read while walking a path: the slot it came from and its value then
#[derive(Debug)]
struct ChainLink {
    holder: Holder,
    offset: usize,
    key: PhysicalBlock,
}

type Chain = SmallVec<[ChainLink; 4]>;

/// the leaf block when the chain reached the end of the path
fn leaf(chain: &Chain, depth: usize) -> Option<PhysicalBlock> {
    match chain.last() {
        Some(link) if chain.len() == depth && link.key != 0 => Some(link.key),
        _ => None,
    }
}

/// collapse sorted block numbers into `(start, len)` runs
pub(crate) fn coalesce_runs(sorted: &[PhysicalBlock]) -> Vec<(PhysicalBlock, u32)> {
    let mut runs: Vec<(PhysicalBlock, u32)> = Vec::new();
    for block in sorted {
        match runs.last_mut() {
            Some((start, len)) if *start as u64 + *len as u64 == *block as u64 => *len += 1,
            _ => runs.push((*block, 1)),
        }
    }
    runs
}

/// block-pointer resolver
impl<S: BlockStore> Volume<S> {
    /// physical block backing `logical`, `None` for a hole, never allocates
    pub fn map_block(&mut self, inode: &Inode, logical: u64) -> Result<Option<PhysicalBlock>> {
        let path = path_for(logical)?;
        let mut chain = Chain::new();
        let found = self
            .find_branch(inode, &path, &mut chain)
            .map(|()| leaf(&chain, path.len()));
        let released = self.release_chain(chain);
        let found = self.guard(found)?;
        released?;
        Ok(found)
    }

    /// physical block backing `logical`
    ///
    /// With `create` a hole is filled: the missing nodes and the leaf are
    /// allocated together, zero-filled, linked to each other, and spliced into
    /// the tree with a single pointer write. The inode is persisted.
    /// A chain that changed underneath the walk fails with [FsError::Stale].
    pub fn resolve(
        &mut self,
        inode: &mut Inode,
        logical: u64,
        create: bool,
    ) -> Result<Option<PhysicalBlock>> {
        if !create {
            return self.map_block(inode, logical);
        }
        self.ensure_writable()?;
        let path = path_for(logical)?;
        let mut chain = Chain::new();
        let outcome = self
            .find_branch(inode, &path, &mut chain)
            .and_then(|()| match leaf(&chain, path.len()) {
                Some(block) => Ok(block),
                None => self.grow_branch(inode, &path, &mut chain),
            });
        let released = self.release_chain(chain);
        let block = self.guard(outcome)?;
        released?;
        Ok(Some(block))
    }

    /// walk `path` as far as allocated pointers go, pinning every node read
    fn find_branch(&mut self, inode: &Inode, path: &[usize], chain: &mut Chain) -> Result<()> {
        let key = inode.block_ptrs[path[0]];
        let (table_block, _) = self.inode_position(inode.ino)?;
        self.check_data_pointer(table_block, key)?;
        chain.push(ChainLink {
            holder: Holder::Inode,
            offset: path[0],
            key,
        });
        for &offset in &path[1..] {
            let parent = match chain.last() {
                Some(link) if link.key != 0 => link.key,
                _ => break,
            };
            let node = self.cache.pin(parent)?;
            let key = read_u32_le(self.cache.data(&node), offset * 4);
            chain.push(ChainLink {
                holder: Holder::Node(node),
                offset,
                key,
            });
            // the read may have blocked, trust nothing that moved meanwhile
            if !self.verify_chain(inode, chain) {
                return Err(FsError::Stale);
            }
            self.check_data_pointer(parent, key)?;
        }
        Ok(())
    }

    /// every pointer in the chain still holds the value the walk saw
    fn verify_chain(&self, inode: &Inode, chain: &Chain) -> bool {
        chain.iter().all(|link| {
            let current = match &link.holder {
                Holder::Inode => inode.block_ptrs[link.offset],
                Holder::Node(node) => read_u32_le(self.cache.data(node), link.offset * 4),
            };
            current == link.key
        })
    }

    /// allocate and splice the part of `path` missing below the last chain link
    fn grow_branch(
        &mut self,
        inode: &mut Inode,
        path: &[usize],
        chain: &mut Chain,
    ) -> Result<PhysicalBlock> {
        let splice_at = chain.len() - 1;
        let missing_nodes = path.len() - chain.len();
        let new = self.allocate(Region::Data, missing_nodes + 1)?;
        if let Err(e) = self.fill_branch(&new, &path[splice_at + 1..]) {
            self.release_claimed(Region::Data, &new);
            return Err(e);
        }
        if !self.verify_chain(inode, chain) {
            self.release_claimed(Region::Data, &new);
            return Err(FsError::Stale);
        }

        let link = &mut chain[splice_at];
        match &link.holder {
            Holder::Inode => inode.block_ptrs[link.offset] = new[0],
            Holder::Node(node) => write_u32_le(self.cache.data_mut(node), link.offset * 4, new[0]),
        }
        link.key = new[0];
        inode.blocks += new.len() as u64;
        inode.touch_changed();
        self.write_inode(inode)?;

        let data_block = new[new.len() - 1];
        debug!(
            "resolve() grew inode {} by {} blocks, leaf {data_block}",
            inode.ino,
            new.len()
        );
        Ok(data_block)
    }

    /// zero every new block and link each node to the next one
    fn fill_branch(&mut self, new: &[PhysicalBlock], offsets: &[usize]) -> Result<()> {
        for (n, block) in new.iter().enumerate() {
            let pinned = self.cache.pin_zeroed(*block);
            if let Some(offset) = offsets.get(n) {
                write_u32_le(self.cache.data_mut(&pinned), offset * 4, new[n + 1]);
            }
            self.cache.release(pinned)?;
        }
        Ok(())
    }

    fn release_chain(&mut self, chain: Chain) -> Result<()> {
        let mut first_error = None;
        for link in chain {
            if let Holder::Node(node) = link.holder {
                if let Err(e) = self.cache.release(node) {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// non-zero pointers read from `holder` must point into the data region
    fn check_data_pointer(&self, holder: PhysicalBlock, ptr: PhysicalBlock) -> Result<()> {
        if ptr == 0 || self.layout().contains_data_block(ptr) {
            Ok(())
        } else {
            Err(FsError::corrupt(
                holder,
                format!("block pointer {ptr} outside the data region"),
            ))
        }
    }

    fn read_node(&mut self, node: PhysicalBlock) -> Result<Vec<PhysicalBlock>> {
        self.cache.with_block(node, |data| {
            (0..NODE_PER_BLK).map(|i| read_u32_le(data, i * 4)).collect()
        })
    }
}

/// block release
impl<S: BlockStore> Volume<S> {
    /// drop every block at logical index `>= keep_blocks`
    ///
    /// Nodes left without children go too. Pointers are cleared and the
    /// inode persisted before the bitmap bits are freed, in coalesced runs.
    /// An error part-way leaks blocks rather than freeing referenced ones.
    pub fn truncate_blocks(&mut self, inode: &mut Inode, keep_blocks: u64) -> Result<()> {
        self.ensure_writable()?;
        let mut released = Vec::new();
        let outcome = self.collect_truncated(inode, keep_blocks, &mut released);
        self.guard(outcome)?;
        if released.is_empty() {
            return Ok(());
        }
        inode.blocks = inode.blocks.saturating_sub(released.len() as u64);
        inode.touch_changed();
        self.write_inode(inode)?;

        released.sort_unstable();
        let before = released.len();
        released.dedup();
        if released.len() != before {
            warn!(
                "inode {} referenced {} blocks more than once",
                inode.ino,
                before - released.len()
            );
        }
        let runs = coalesce_runs(&released);
        debug!(
            "truncate_blocks() frees {} blocks of inode {} in {} runs",
            released.len(),
            inode.ino,
            runs.len()
        );
        for (start, len) in runs {
            let freed = self.free(Region::Data, start, len);
            self.guard(freed)?;
        }
        Ok(())
    }

    fn collect_truncated(
        &mut self,
        inode: &mut Inode,
        keep: u64,
        released: &mut Vec<PhysicalBlock>,
    ) -> Result<()> {
        let (table_block, _) = self.inode_position(inode.ino)?;
        for slot in keep.min(DIRECT) as usize..DIRECT_POINTERS {
            let block = inode.block_ptrs[slot];
            if block != 0 {
                self.check_data_pointer(table_block, block)?;
                released.push(block);
                inode.block_ptrs[slot] = 0;
            }
        }
        let mut start = DIRECT;
        for level in 1..=3u32 {
            let span = PTRS.pow(level);
            let root_slot = DIRECT_POINTERS + level as usize - 1;
            let root = inode.block_ptrs[root_slot];
            if root != 0 && keep < start + span {
                self.check_data_pointer(table_block, root)?;
                if self.trim_node(root, level, keep.saturating_sub(start), released)? {
                    released.push(root);
                    inode.block_ptrs[root_slot] = 0;
                }
            }
            start += span;
        }
        Ok(())
    }

    /// drop the children of `node` covering index `>= keep` of its subtree,
    /// `level` 1 means the children are data blocks
    /// # Return
    /// whether `node` has no children left
    fn trim_node(
        &mut self,
        node: PhysicalBlock,
        level: u32,
        keep: u64,
        released: &mut Vec<PhysicalBlock>,
    ) -> Result<bool> {
        let ptrs = self.read_node(node)?;
        let child_span = PTRS.pow(level - 1);
        let first_slot = (keep / child_span) as usize;
        let partial = keep % child_span;

        let mut cleared: SmallVec<[usize; 16]> = SmallVec::new();
        for (slot, &child) in ptrs.iter().enumerate().skip(first_slot) {
            if child == 0 {
                continue;
            }
            self.check_data_pointer(node, child)?;
            if slot == first_slot && partial != 0 {
                if self.trim_node(child, level - 1, partial, released)? {
                    released.push(child);
                    cleared.push(slot);
                }
            } else {
                self.collect_subtree(child, level - 1, released)?;
                cleared.push(slot);
            }
        }

        let live = ptrs.iter().filter(|p| **p != 0).count() - cleared.len();
        if live > 0 && !cleared.is_empty() {
            self.cache.with_block_mut(node, |data| {
                for slot in &cleared {
                    write_u32_le(data, slot * 4, 0);
                }
            })?;
        }
        Ok(live == 0)
    }

    /// `block` and everything below it, `depth` 0 is a data block
    fn collect_subtree(
        &mut self,
        block: PhysicalBlock,
        depth: u32,
        released: &mut Vec<PhysicalBlock>,
    ) -> Result<()> {
        if depth > 0 {
            for child in self.read_node(block)? {
                if child != 0 {
                    self.check_data_pointer(block, child)?;
                    self.collect_subtree(child, depth - 1, released)?;
                }
            }
        }
        released.push(block);
        Ok(())
    }
}
