use log::{debug, info};

use crate::{
    block_store::BlockStore,
    error::{FsError, Result},
    utils::{
        byte_order::{read_u16_le, read_u32_le, read_u64_le, write_u16_le, write_u32_le, write_u64_le},
        time_util::Timestamp,
    },
};

use super::{
    filekind::FileKind, InodeNumber, PhysicalBlock, Region, Volume, BLOCK_POINTERS, INODE_SIZE,
    INODES_PER_BLOCK, ROOT_INODE,
};

/// bytes of an inode slot carrying fields, the rest of the slot stays zero
pub const INODE_RECORD_LEN: usize = 136;

// field offsets inside the on-disk record
const MODE: usize = 0;
const UID: usize = 4;
const GID: usize = 8;
const LINKS: usize = 12;
const SIZE: usize = 16;
const BLOCKS: usize = 24;
const ATIME: usize = 32;
const CTIME: usize = 40;
const MTIME: usize = 48;
const ATIME_NSEC: usize = 56;
const CTIME_NSEC: usize = 60;
const MTIME_NSEC: usize = 64;
const FLAGS: usize = 68;
const PARENT: usize = 72;
const BLOCK_PTRS: usize = 76;

/// in-memory inode descriptor
///
/// `block_ptrs` holds 12 direct pointers followed by the single, double and
/// triple indirect roots. Together with `size` it decides which physical
/// blocks belong to the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inode {
    /// not stored, implied by the slot the record lives in
    pub ino: InodeNumber,
    pub mode: u16,
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
    pub links_count: u32,
    /// file size in bytes
    pub size: u64,
    /// blocks owned by the file, data and indirect nodes
    pub blocks: u64,
    pub atime: Timestamp,
    pub ctime: Timestamp,
    pub mtime: Timestamp,
    pub flags: u32,
    /// directory this inode was created in
    pub parent: InodeNumber,
    pub block_ptrs: [PhysicalBlock; BLOCK_POINTERS],
}

/// This block is about the on-disk record
impl Inode {
    /// encode into an inode-table slot,
    /// an inode without links encodes as an all-zero slot
    pub fn encode(&self) -> [u8; INODE_SIZE] {
        let mut buf = [0u8; INODE_SIZE];
        if self.links_count == 0 {
            return buf;
        }
        write_u16_le(&mut buf, MODE, self.mode);
        write_u32_le(&mut buf, UID, self.uid);
        write_u32_le(&mut buf, GID, self.gid);
        write_u32_le(&mut buf, LINKS, self.links_count);
        write_u64_le(&mut buf, SIZE, self.size);
        write_u64_le(&mut buf, BLOCKS, self.blocks);
        write_u64_le(&mut buf, ATIME, self.atime.sec);
        write_u64_le(&mut buf, CTIME, self.ctime.sec);
        write_u64_le(&mut buf, MTIME, self.mtime.sec);
        write_u32_le(&mut buf, ATIME_NSEC, self.atime.nsec);
        write_u32_le(&mut buf, CTIME_NSEC, self.ctime.nsec);
        write_u32_le(&mut buf, MTIME_NSEC, self.mtime.nsec);
        write_u32_le(&mut buf, FLAGS, self.flags);
        write_u32_le(&mut buf, PARENT, self.parent);
        for (i, ptr) in self.block_ptrs.iter().enumerate() {
            write_u32_le(&mut buf, BLOCK_PTRS + 4 * i, *ptr);
        }
        buf
    }

    /// decode the record of inode `ino`
    pub fn decode(ino: InodeNumber, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INODE_RECORD_LEN {
            return Err(FsError::InvalidArgument(format!(
                "inode record needs {INODE_RECORD_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut block_ptrs = [0; BLOCK_POINTERS];
        for (i, ptr) in block_ptrs.iter_mut().enumerate() {
            *ptr = read_u32_le(bytes, BLOCK_PTRS + 4 * i);
        }
        Ok(Inode {
            ino,
            mode: read_u16_le(bytes, MODE),
            uid: read_u32_le(bytes, UID),
            gid: read_u32_le(bytes, GID),
            links_count: read_u32_le(bytes, LINKS),
            size: read_u64_le(bytes, SIZE),
            blocks: read_u64_le(bytes, BLOCKS),
            atime: Timestamp::new(read_u64_le(bytes, ATIME), read_u32_le(bytes, ATIME_NSEC)),
            ctime: Timestamp::new(read_u64_le(bytes, CTIME), read_u32_le(bytes, CTIME_NSEC)),
            mtime: Timestamp::new(read_u64_le(bytes, MTIME), read_u32_le(bytes, MTIME_NSEC)),
            flags: read_u32_le(bytes, FLAGS),
            parent: read_u32_le(bytes, PARENT),
            block_ptrs,
        })
    }
}

/// This block is about file metadata
impl Inode {
    pub fn file_kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }

    pub fn is_dir(&self) -> bool {
        self.file_kind() == FileKind::Directory
    }

    pub fn is_regular_file(&self) -> bool {
        self.file_kind() == FileKind::RegularFile
    }

    pub fn touch_modified(&mut self) {
        let now = Timestamp::now();
        self.mtime = now;
        self.ctime = now;
    }

    pub fn touch_changed(&mut self) {
        self.ctime = Timestamp::now();
    }

    pub fn touch_accessed(&mut self) {
        self.atime = Timestamp::now();
    }
}

/// [Inode] operations
impl<S: BlockStore> Volume<S> {
    /// inode-table block and byte offset holding inode `ino`
    pub(crate) fn inode_position(&self, ino: InodeNumber) -> Result<(PhysicalBlock, usize)> {
        let layout = self.layout();
        let index = ino
            .checked_sub(ROOT_INODE)
            .filter(|index| *index < layout.inode_count)
            .ok_or(FsError::NotFound)? as usize;
        let block = layout.inode_table.start + (index / INODES_PER_BLOCK) as u32;
        Ok((block, (index % INODES_PER_BLOCK) * INODE_SIZE))
    }

    /// load inode `ino`
    /// # Return
    /// [FsError::NotFound] when the inode is not allocated or has no links
    pub fn read_inode(&mut self, ino: InodeNumber) -> Result<Inode> {
        let (block, offset) = self.inode_position(ino)?;
        if !self.is_allocated(Region::Inode, ino)? {
            return Err(FsError::NotFound);
        }
        let inode = self.cache.with_block(block, |data| {
            Inode::decode(ino, &data[offset..offset + INODE_SIZE])
        })??;
        if inode.links_count == 0 {
            return Err(FsError::NotFound);
        }
        Ok(inode)
    }

    /// store `inode` in its slot, the write reaches the device on release
    pub fn write_inode(&mut self, inode: &Inode) -> Result<()> {
        self.ensure_writable()?;
        let (block, offset) = self.inode_position(inode.ino)?;
        let record = inode.encode();
        self.cache.with_block_mut(block, |data| {
            data[offset..offset + INODE_SIZE].copy_from_slice(&record)
        })
    }

    fn sync_inode(&mut self, inode: &Inode) -> Result<()> {
        let (block, offset) = self.inode_position(inode.ino)?;
        let record = inode.encode();
        let pinned = self.cache.pin(block)?;
        self.cache.data_mut(&pinned)[offset..offset + INODE_SIZE].copy_from_slice(&record);
        let synced = self.cache.sync(&pinned);
        self.cache.release(pinned)?;
        synced
    }

    /// create a fresh inode of `mode` inside directory `dir`,
    /// owner and flags are inherited from `dir`
    pub fn new_inode(&mut self, dir: &Inode, mode: u16) -> Result<Inode> {
        let ino = self.allocate(Region::Inode, 1)?[0];
        let now = Timestamp::now();
        let inode = Inode {
            ino,
            mode,
            uid: dir.uid,
            gid: dir.gid,
            links_count: 1,
            flags: dir.flags,
            parent: dir.ino,
            atime: now,
            ctime: now,
            mtime: now,
            ..Inode::default()
        };
        if let Err(e) = self.sync_inode(&inode) {
            self.free(Region::Inode, ino, 1)?;
            return Err(e);
        }
        debug!("new_inode() -> {ino} in directory {}", dir.ino);
        Ok(inode)
    }

    /// the last link is gone: release every block, clear the record, free the number
    pub fn delete_inode(&mut self, inode: &mut Inode) -> Result<()> {
        info!("delete_inode() called with ino {}", inode.ino);
        self.truncate_blocks(inode, 0)?;
        inode.size = 0;
        inode.links_count = 0;
        self.write_inode(inode)?;
        self.free(Region::Inode, inode.ino, 1)?;
        self.lookup_hints.remove(&inode.ino);
        self.dir_versions.remove(&inode.ino);
        Ok(())
    }
}
