//! directory contents as packed variable-length records
//!
//! A record is `inode u32 | rec_len u16 | name_len u8 | file_type u8 | name`,
//! `rec_len` a multiple of 4 covering the record and any free space after it.
//! Records tile each directory block exactly. Inode 0 marks a free slot.
use std::collections::VecDeque;

use log::{debug, info};

use crate::{
    block_store::BlockStore,
    error::{FsError, Result},
    utils::byte_order::{read_u16_le, read_u32_le, write_u16_le, write_u32_le},
};

use super::{FileKind, Inode, InodeNumber, PhysicalBlock, Volume, BLOCK_SIZE, MAX_NAME_LEN};

pub const DIR_ENTRY_HEADER_LEN: usize = 8;

/// smallest `rec_len` able to hold a name of `name_len` bytes
/// # Example
/// ```
/// use blockfs::rec_len_for;
/// assert_eq!(rec_len_for(1), 12);
/// assert_eq!(rec_len_for(4), 12);
/// assert_eq!(rec_len_for(5), 16);
/// ```
pub const fn rec_len_for(name_len: usize) -> usize {
    (name_len + DIR_ENTRY_HEADER_LEN + 3) & !3
}

/// where a record sits: directory block index and byte offset inside it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    pub block_index: u32,
    pub offset: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: Vec<u8>,
    pub ino: InodeNumber,
    pub file_kind: FileKind,
}

impl DirEntry {
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// a record header read from a block
#[derive(Debug, Clone, Copy)]
struct RawRecord {
    ino: InodeNumber,
    rec_len: usize,
    name_len: usize,
    file_type: u8,
}

/// read and check the record header at `offset` of directory block `block`
fn parse_record(data: &[u8], offset: usize, block: PhysicalBlock) -> Result<RawRecord> {
    if offset + DIR_ENTRY_HEADER_LEN > data.len() {
        return Err(FsError::corrupt(
            block,
            format!("directory record at {offset} runs past the block"),
        ));
    }
    let record = RawRecord {
        ino: read_u32_le(data, offset),
        rec_len: read_u16_le(data, offset + 4) as usize,
        name_len: data[offset + 6] as usize,
        file_type: data[offset + 7],
    };
    let detail = if record.rec_len == 0 {
        Some("zero-length directory record")
    } else if record.rec_len % 4 != 0 {
        Some("directory record length is not 4-byte aligned")
    } else if offset + record.rec_len > data.len() {
        Some("directory record crosses the block end")
    } else if record.rec_len < rec_len_for(record.name_len) {
        Some("directory record too short for its name")
    } else {
        None
    };
    match detail {
        Some(detail) => Err(FsError::corrupt(
            block,
            format!("{detail} at offset {offset}"),
        )),
        None => Ok(record),
    }
}

fn record_name<'a>(data: &'a [u8], offset: usize, record: &RawRecord) -> &'a [u8] {
    let start = offset + DIR_ENTRY_HEADER_LEN;
    &data[start..start + record.name_len]
}

/// write a whole record, padding the name up to its minimal length
fn write_record(
    data: &mut [u8],
    offset: usize,
    ino: InodeNumber,
    rec_len: usize,
    kind: FileKind,
    name: &[u8],
) {
    write_u32_le(data, offset, ino);
    write_u16_le(data, offset + 4, rec_len as u16);
    data[offset + 6] = name.len() as u8;
    data[offset + 7] = kind.into();
    let start = offset + DIR_ENTRY_HEADER_LEN;
    data[start..start + name.len()].copy_from_slice(name);
    data[start + name.len()..offset + rec_len_for(name.len())].fill(0);
}

/// bytes of directory block `index` that lie inside the directory size
fn last_byte(dir: &Inode, index: u32) -> usize {
    dir.size
        .saturating_sub(index as u64 * BLOCK_SIZE as u64)
        .min(BLOCK_SIZE as u64) as usize
}

fn dir_blocks(dir: &Inode) -> u32 {
    crate::utils::fs_size_calculator::blocks_for_bytes(dir.size) as u32
}

/// scan one block for a live record called `name`
fn find_in_block(
    data: &[u8],
    limit: usize,
    name: &[u8],
    block: PhysicalBlock,
) -> Result<Option<(usize, InodeNumber)>> {
    let last = match limit.checked_sub(rec_len_for(1)) {
        Some(last) => last,
        None => return Ok(None),
    };
    let mut offset = 0;
    while offset <= last {
        let record = parse_record(data, offset, block)?;
        if record.ino != 0 && record_name(data, offset, &record) == name {
            return Ok(Some((offset, record.ino)));
        }
        offset += record.rec_len;
    }
    Ok(None)
}

/// where a new record of `needed` bytes goes
#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: usize,
    rec_len: usize,
    /// a live record to shrink to this length first
    split: Option<usize>,
}

fn find_slot(data: &[u8], needed: usize, block: PhysicalBlock) -> Result<Option<Slot>> {
    let last = BLOCK_SIZE - needed;
    let mut offset = 0;
    while offset <= last {
        let record = parse_record(data, offset, block)?;
        if record.ino == 0 && record.rec_len >= needed {
            return Ok(Some(Slot {
                offset,
                rec_len: record.rec_len,
                split: None,
            }));
        }
        let used = rec_len_for(record.name_len);
        if record.ino != 0 && record.rec_len >= used + needed {
            return Ok(Some(Slot {
                offset: offset + used,
                rec_len: record.rec_len - used,
                split: Some(offset),
            }));
        }
        offset += record.rec_len;
    }
    Ok(None)
}

/// the greatest record boundary `<= offset`
fn align_backward(data: &[u8], offset: usize, block: PhysicalBlock) -> Result<usize> {
    let mut boundary = 0;
    while boundary < offset {
        let next = boundary + parse_record(data, boundary, block)?.rec_len;
        if next > offset {
            break;
        }
        boundary = next;
    }
    Ok(boundary)
}

fn check_name(name: &[u8]) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(FsError::NameTooLong);
    }
    if name.is_empty() || name.contains(&b'/') || name.contains(&0) {
        return Err(FsError::InvalidName);
    }
    Ok(())
}

/// directory record manager
impl<S: BlockStore> Volume<S> {
    /// physical block of directory block `index`, a hole inside a directory is corruption
    fn dir_block(&mut self, dir: &Inode, index: u32) -> Result<PhysicalBlock> {
        match self.map_block(dir, index as u64)? {
            Some(block) => Ok(block),
            None => {
                let (table_block, _) = self.inode_position(dir.ino)?;
                Err(FsError::corrupt(
                    table_block,
                    format!("directory {} has no block at index {index}", dir.ino),
                ))
            }
        }
    }

    /// look `name` up in `dir`, starting at the block of the last hit
    pub fn find(
        &mut self,
        dir: &Inode,
        name: &[u8],
    ) -> Result<Option<(InodeNumber, RecordLocation)>> {
        if !dir.is_dir() {
            return Err(FsError::NotDirectory);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        let found = self.find_entry(dir, name);
        self.guard(found)
    }

    fn find_entry(
        &mut self,
        dir: &Inode,
        name: &[u8],
    ) -> Result<Option<(InodeNumber, RecordLocation)>> {
        let blocks = dir_blocks(dir);
        if blocks == 0 || name.is_empty() {
            return Ok(None);
        }
        let start = match self.lookup_hints.get(&dir.ino) {
            Some(hint) if *hint < blocks => *hint,
            _ => 0,
        };
        let mut n = start;
        loop {
            let block = self.dir_block(dir, n)?;
            let limit = last_byte(dir, n);
            let hit = self
                .cache
                .with_block(block, |data| find_in_block(data, limit, name, block))??;
            if let Some((offset, ino)) = hit {
                self.lookup_hints.insert(dir.ino, n);
                return Ok(Some((
                    ino,
                    RecordLocation {
                        block_index: n,
                        offset: offset as u16,
                    },
                )));
            }
            n = (n + 1) % blocks;
            if n == start {
                return Ok(None);
            }
        }
    }

    /// add `name -> ino` to `dir`
    ///
    /// Reuses a free record or the slack after a live one, else appends a
    /// new block. Fails with [FsError::AlreadyExists] before touching anything
    /// when the name is taken.
    pub fn insert(
        &mut self,
        dir: &mut Inode,
        name: &[u8],
        ino: InodeNumber,
        kind: FileKind,
    ) -> Result<()> {
        self.ensure_writable()?;
        check_name(name)?;
        if !dir.is_dir() {
            return Err(FsError::NotDirectory);
        }
        let outcome = self.insert_entry(dir, name, ino, kind);
        self.guard(outcome)
    }

    fn insert_entry(
        &mut self,
        dir: &mut Inode,
        name: &[u8],
        ino: InodeNumber,
        kind: FileKind,
    ) -> Result<()> {
        if self.find_entry(dir, name)?.is_some() {
            return Err(FsError::AlreadyExists);
        }
        let needed = rec_len_for(name.len());
        let blocks = dir_blocks(dir);
        let mut placed = None;
        for n in 0..blocks {
            let block = self.dir_block(dir, n)?;
            let pinned = self.cache.pin(block)?;
            let slot = find_slot(self.cache.data(&pinned), needed, block);
            let slot = match slot {
                Ok(Some(slot)) => slot,
                other => {
                    self.cache.release(pinned)?;
                    other?;
                    continue;
                }
            };
            let data = self.cache.data_mut(&pinned);
            if let Some(split) = slot.split {
                write_u16_le(data, split + 4, (slot.offset - split) as u16);
            }
            write_record(data, slot.offset, ino, slot.rec_len, kind, name);
            self.cache.release(pinned)?;
            placed = Some((n, slot.offset));
            break;
        }

        let (n, offset) = match placed {
            Some(placed) => placed,
            None => {
                // append one block holding the new record and free space
                let block = self
                    .resolve(dir, blocks as u64, true)?
                    .ok_or_else(|| FsError::InvalidArgument("directory block not mapped".into()))?;
                self.cache.with_block_mut(block, |data| {
                    data.fill(0);
                    write_record(data, 0, ino, BLOCK_SIZE, kind, name);
                })?;
                dir.size = (blocks as u64 + 1) * BLOCK_SIZE as u64;
                (blocks, 0)
            }
        };
        debug!(
            "insert() placed {:?} -> {ino} in directory {} block {n} offset {offset}",
            String::from_utf8_lossy(name),
            dir.ino
        );
        dir.touch_modified();
        self.bump_dir_version(dir.ino);
        self.write_inode(dir)
    }

    /// drop the record at `location` from `dir`
    ///
    /// The space joins the preceding record, a first record in its block is
    /// only marked free.
    pub fn remove(&mut self, dir: &mut Inode, location: RecordLocation) -> Result<()> {
        self.ensure_writable()?;
        if !dir.is_dir() {
            return Err(FsError::NotDirectory);
        }
        if location.block_index >= dir_blocks(dir) {
            return Err(FsError::NotFound);
        }
        if location.offset as usize + DIR_ENTRY_HEADER_LEN > BLOCK_SIZE {
            return Err(FsError::InvalidArgument(format!(
                "offset {} is past the last record of a block",
                location.offset
            )));
        }
        let outcome = self.remove_entry(dir, location);
        self.guard(outcome)
    }

    fn remove_entry(&mut self, dir: &mut Inode, location: RecordLocation) -> Result<()> {
        let block = self.dir_block(dir, location.block_index)?;
        let target = location.offset as usize;
        let pinned = self.cache.pin(block)?;
        let found = (|| -> Result<(Option<usize>, usize)> {
            let data = self.cache.data(&pinned);
            let mut previous = None;
            let mut offset = 0;
            while offset < target {
                previous = Some(offset);
                offset += parse_record(data, offset, block)?.rec_len;
            }
            if offset != target {
                return Err(FsError::InvalidArgument(format!(
                    "offset {target} is not a record boundary"
                )));
            }
            let record = parse_record(data, target, block)?;
            if record.ino == 0 {
                return Err(FsError::NotFound);
            }
            Ok((previous, target + record.rec_len))
        })();
        let (previous, end) = match found {
            Ok(found) => found,
            Err(e) => {
                self.cache.release(pinned)?;
                return Err(e);
            }
        };
        let data = self.cache.data_mut(&pinned);
        if let Some(previous) = previous {
            write_u16_le(data, previous + 4, (end - previous) as u16);
        }
        write_u32_le(data, target, 0);
        self.cache.release(pinned)?;

        dir.touch_modified();
        self.bump_dir_version(dir.ino);
        self.write_inode(dir)
    }

    /// only free records, `.` naming `dir` itself and `..` are left
    pub fn is_empty(&mut self, dir: &Inode) -> Result<bool> {
        if !dir.is_dir() {
            return Err(FsError::NotDirectory);
        }
        let outcome = self.only_dots(dir);
        self.guard(outcome)
    }

    fn only_dots(&mut self, dir: &Inode) -> Result<bool> {
        for n in 0..dir_blocks(dir) {
            let block = self.dir_block(dir, n)?;
            let limit = last_byte(dir, n);
            let empty = self.cache.with_block(block, |data| -> Result<bool> {
                let Some(last) = limit.checked_sub(rec_len_for(1)) else {
                    return Ok(true);
                };
                let mut offset = 0;
                while offset <= last {
                    let record = parse_record(data, offset, block)?;
                    if record.ino != 0 {
                        let name = record_name(data, offset, &record);
                        let dot = name == b"." && record.ino == dir.ino;
                        if !dot && name != b".." {
                            return Ok(false);
                        }
                    }
                    offset += record.rec_len;
                }
                Ok(true)
            })??;
            if !empty {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// give `dir` its first block holding `.` and `..`
    pub fn init_as_directory(&mut self, dir: &mut Inode, parent: InodeNumber) -> Result<()> {
        self.ensure_writable()?;
        let block = self
            .resolve(dir, 0, true)?
            .ok_or_else(|| FsError::InvalidArgument("directory block not mapped".into()))?;
        let self_ino = dir.ino;
        let dot_len = rec_len_for(1);
        self.cache.with_block_mut(block, |data| {
            data.fill(0);
            write_record(data, 0, self_ino, dot_len, FileKind::Directory, b".");
            write_record(
                data,
                dot_len,
                parent,
                BLOCK_SIZE - dot_len,
                FileKind::Directory,
                b"..",
            );
        })?;
        dir.size = dir.size.max(BLOCK_SIZE as u64);
        dir.touch_modified();
        self.bump_dir_version(dir.ino);
        info!("init_as_directory() called with dir {self_ino}, parent {parent}");
        self.write_inode(dir)
    }

    /// live records of `dir` from `cursor` on
    pub fn iterate(&mut self, dir: &Inode, cursor: DirCursor) -> Result<DirIter<'_, S>> {
        if !dir.is_dir() {
            return Err(FsError::NotDirectory);
        }
        Ok(DirIter {
            volume: self,
            dir: dir.clone(),
            cursor,
            block: None,
            pending: VecDeque::new(),
            done: false,
        })
    }
}

/// a resumable position inside a directory
///
/// The cursor remembers the directory version it was taken at. Resuming after
/// the directory changed moves the offset back to a record boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirCursor {
    pub block_index: u32,
    pub offset: u16,
    version: Option<u64>,
}

impl DirCursor {
    pub fn start() -> Self {
        DirCursor::default()
    }

    /// a cursor from a flat byte position, as a host hands back readdir offsets
    pub fn from_position(position: u64) -> Self {
        DirCursor {
            block_index: (position / BLOCK_SIZE as u64) as u32,
            offset: (position % BLOCK_SIZE as u64) as u16,
            version: None,
        }
    }

    pub fn position(&self) -> u64 {
        self.block_index as u64 * BLOCK_SIZE as u64 + self.offset as u64
    }
}

/// lazy walk over the live records of one directory, see [Volume::iterate]
pub struct DirIter<'v, S> {
    volume: &'v mut Volume<S>,
    dir: Inode,
    cursor: DirCursor,
    /// snapshot of the block being walked
    block: Option<(u32, Box<[u8]>)>,
    pending: VecDeque<(DirEntry, DirCursor)>,
    done: bool,
}

impl<'v, S: BlockStore> DirIter<'v, S> {
    /// where to resume after the entries returned so far
    pub fn cursor(&self) -> DirCursor {
        self.cursor
    }

    /// parse the rest of the current block into `pending`
    fn fill(&mut self) -> Result<()> {
        let blocks = dir_blocks(&self.dir);
        while self.pending.is_empty() && self.cursor.block_index < blocks {
            let index = self.cursor.block_index;
            let physical = self.volume.dir_block(&self.dir, index)?;
            let version = self.volume.dir_version(self.dir.ino);
            if self.block.as_ref().map(|(n, _)| *n) != Some(index)
                || self.cursor.version != Some(version)
            {
                let data = self
                    .volume
                    .cache
                    .with_block(physical, |data| Box::<[u8]>::from(data))?;
                if self.cursor.version != Some(version) && self.cursor.offset != 0 {
                    let aligned = align_backward(&data, self.cursor.offset as usize, physical)?;
                    self.cursor.offset = aligned as u16;
                }
                self.cursor.version = Some(version);
                self.block = Some((index, data));
            }
            let Some((_, data)) = self.block.as_ref() else {
                break;
            };

            let limit = last_byte(&self.dir, index);
            let mut offset = self.cursor.offset as usize;
            let mut after = self.cursor;
            while limit >= rec_len_for(1) && offset <= limit - rec_len_for(1) {
                let record = parse_record(data, offset, physical)?;
                offset += record.rec_len;
                after.offset = offset as u16;
                if record.ino != 0 {
                    let entry = DirEntry {
                        name: record_name(data, offset - record.rec_len, &record).to_vec(),
                        ino: record.ino,
                        file_kind: record.file_type.into(),
                    };
                    self.pending.push_back((entry, after));
                }
            }
            if self.pending.is_empty() {
                self.cursor = DirCursor {
                    block_index: index + 1,
                    offset: 0,
                    version: self.cursor.version,
                };
            } else if let Some((_, last)) = self.pending.back_mut() {
                // the final record ends the block, resume at the next one
                if last.offset as usize >= limit {
                    *last = DirCursor {
                        block_index: index + 1,
                        offset: 0,
                        version: last.version,
                    };
                }
            }
        }
        Ok(())
    }
}

impl<'v, S: BlockStore> Iterator for DirIter<'v, S> {
    type Item = Result<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.pending.is_empty() {
            let filled = self.fill();
            if let Err(e) = self.volume.guard(filled) {
                self.done = true;
                return Some(Err(e));
            }
        }
        match self.pending.pop_front() {
            Some((entry, after)) => {
                self.cursor = after;
                Some(Ok(entry))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{utils::init_test_environment::test_volume, MemBlockStore, ROOT_INODE};

    fn root(volume: &mut Volume<MemBlockStore>) -> Inode {
        volume.read_inode(ROOT_INODE).unwrap()
    }

    fn names(volume: &mut Volume<MemBlockStore>, dir: &Inode, cursor: DirCursor) -> Vec<String> {
        volume
            .iterate(dir, cursor)
            .unwrap()
            .map(|entry| entry.unwrap().name_lossy())
            .collect()
    }

    /// (offset, inode, rec_len) of every record in directory block 0
    fn records(volume: &mut Volume<MemBlockStore>, dir: &Inode) -> Vec<(usize, u32, usize)> {
        let block = volume.map_block(dir, 0).unwrap().unwrap();
        volume
            .cache
            .with_block(block, |data| {
                let mut out = Vec::new();
                let mut offset = 0;
                while offset < BLOCK_SIZE {
                    let record = parse_record(data, offset, block).unwrap();
                    out.push((offset, record.ino, record.rec_len));
                    offset += record.rec_len;
                }
                out
            })
            .unwrap()
    }

    #[test]
    fn test_fresh_directory_holds_dots() {
        let mut volume = test_volume();
        let root = root(&mut volume);
        assert_eq!(root.size, BLOCK_SIZE as u64);
        assert!(volume.is_empty(&root).unwrap());
        assert_eq!(
            records(&mut volume, &root),
            vec![(0, ROOT_INODE, 12), (12, ROOT_INODE, BLOCK_SIZE - 12)]
        );
        let (ino, location) = volume.find(&root, b"..").unwrap().unwrap();
        assert_eq!(ino, ROOT_INODE);
        assert_eq!(location, RecordLocation { block_index: 0, offset: 12 });
    }

    #[test]
    fn test_insert_then_find() {
        let mut volume = test_volume();
        let mut root = root(&mut volume);
        volume.insert(&mut root, b"a", 5, FileKind::RegularFile).unwrap();
        let (ino, location) = volume.find(&root, b"a").unwrap().unwrap();
        assert_eq!(ino, 5);
        // split off the slack of ".."
        assert_eq!(location, RecordLocation { block_index: 0, offset: 24 });
        assert!(!volume.is_empty(&root).unwrap());
        assert_eq!(volume.find(&root, b"b").unwrap(), None);
        // the directory inode was persisted
        assert_eq!(volume.read_inode(ROOT_INODE).unwrap(), root);
    }

    #[test]
    fn test_duplicate_insert_changes_nothing() {
        let mut volume = test_volume();
        let mut root = root(&mut volume);
        volume.insert(&mut root, b"a", 5, FileKind::RegularFile).unwrap();
        let before = records(&mut volume, &root);
        assert!(matches!(
            volume.insert(&mut root, b"a", 6, FileKind::RegularFile),
            Err(FsError::AlreadyExists)
        ));
        assert_eq!(records(&mut volume, &root), before);
        assert!(matches!(
            volume.insert(&mut root, b".", 6, FileKind::Directory),
            Err(FsError::AlreadyExists)
        ));
    }

    #[test]
    fn test_bad_names_are_rejected() {
        let mut volume = test_volume();
        let mut root = root(&mut volume);
        let long = vec![b'x'; MAX_NAME_LEN + 1];
        assert!(matches!(
            volume.insert(&mut root, &long, 5, FileKind::RegularFile),
            Err(FsError::NameTooLong)
        ));
        assert!(matches!(
            volume.insert(&mut root, b"a/b", 5, FileKind::RegularFile),
            Err(FsError::InvalidName)
        ));
        assert!(matches!(
            volume.insert(&mut root, b"", 5, FileKind::RegularFile),
            Err(FsError::InvalidName)
        ));
    }

    #[test]
    fn test_remove_then_reuse_space() {
        let mut volume = test_volume();
        let mut root = root(&mut volume);
        volume.insert(&mut root, b"a", 5, FileKind::RegularFile).unwrap();
        let record_count = records(&mut volume, &root).len();

        let (_, location) = volume.find(&root, b"a").unwrap().unwrap();
        volume.remove(&mut root, location).unwrap();
        assert_eq!(volume.find(&root, b"a").unwrap(), None);
        assert!(volume.is_empty(&root).unwrap());

        volume.insert(&mut root, b"b", 6, FileKind::RegularFile).unwrap();
        assert_eq!(records(&mut volume, &root).len(), record_count);
        assert_eq!(volume.find(&root, b"b").unwrap().unwrap().0, 6);
    }

    #[test]
    fn test_remove_merges_into_predecessor() {
        let mut volume = test_volume();
        let mut root = root(&mut volume);
        for (name, ino) in [(&b"a"[..], 5), (b"b", 6), (b"c", 7)] {
            volume.insert(&mut root, name, ino, FileKind::RegularFile).unwrap();
        }
        let (_, b) = volume.find(&root, b"b").unwrap().unwrap();
        volume.remove(&mut root, b).unwrap();
        let after = records(&mut volume, &root);
        // "a" at 24 now spans its own 12 bytes plus the 12 of "b"
        assert!(after.contains(&(24, 5, 24)));
        assert!(after.iter().all(|(offset, _, _)| *offset != b.offset as usize));
        assert_eq!(volume.find(&root, b"c").unwrap().unwrap().0, 7);
    }

    #[test]
    fn test_remove_first_record_only_marks_it_free() {
        let mut volume = test_volume();
        let mut root = root(&mut volume);
        let (_, dot) = volume.find(&root, b".").unwrap().unwrap();
        volume.remove(&mut root, dot).unwrap();
        assert_eq!(records(&mut volume, &root)[0], (0, 0, 12));
        assert!(matches!(
            volume.remove(&mut root, dot),
            Err(FsError::NotFound)
        ));
        assert!(matches!(
            volume.remove(&mut root, RecordLocation { block_index: 0, offset: 4 }),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_remove_past_block_end_is_a_bad_argument() {
        let mut volume = test_volume();
        let mut root = root(&mut volume);
        let before = records(&mut volume, &root);
        for offset in [BLOCK_SIZE as u16, BLOCK_SIZE as u16 - 4, u16::MAX] {
            assert!(matches!(
                volume.remove(&mut root, RecordLocation { block_index: 0, offset }),
                Err(FsError::InvalidArgument(_))
            ));
        }
        assert!(!volume.is_read_only());
        assert_eq!(records(&mut volume, &root), before);
        volume.insert(&mut root, b"x", 9, FileKind::RegularFile).unwrap();
    }

    #[test]
    fn test_full_block_grows_directory() {
        let mut volume = test_volume();
        let mut root = root(&mut volume);
        let name_of = |i: usize| format!("{i:0>200}").into_bytes();
        // 208 bytes each, 19 of them fill what ".." leaves in block 0
        for i in 0..25 {
            volume
                .insert(&mut root, &name_of(i), 100 + i as u32, FileKind::RegularFile)
                .unwrap();
        }
        assert_eq!(root.size, 2 * BLOCK_SIZE as u64);
        for i in 0..25 {
            let (ino, _) = volume.find(&root, &name_of(i)).unwrap().unwrap();
            assert_eq!(ino, 100 + i as u32);
        }
        let (_, location) = volume.find(&root, &name_of(24)).unwrap().unwrap();
        assert_eq!(location.block_index, 1);
        assert_eq!(volume.lookup_hints.get(&ROOT_INODE), Some(&1));
        // lookups starting from the hint still wrap around to block 0
        assert!(volume.find(&root, b"..").unwrap().is_some());
        assert_eq!(names(&mut volume, &root, DirCursor::start()).len(), 27);
    }

    #[test]
    fn test_zero_rec_len_is_corruption() {
        let mut volume = test_volume();
        let mut root = root(&mut volume);
        let block = volume.map_block(&root, 0).unwrap().unwrap();
        volume.sync().unwrap();
        write_u16_le(volume.store_mut().block_mut(block), 12 + 4, 0);

        assert!(matches!(
            volume.find(&root, b"missing"),
            Err(FsError::Corrupt { .. })
        ));
        assert!(volume.is_read_only());
        assert!(matches!(
            volume.insert(&mut root, b"x", 9, FileKind::RegularFile),
            Err(FsError::ReadOnly)
        ));
    }

    #[test]
    fn test_iterate_resumes_from_cursor() {
        let mut volume = test_volume();
        let mut root = root(&mut volume);
        for (name, ino) in [(&b"a"[..], 5), (b"b", 6), (b"c", 7)] {
            volume.insert(&mut root, name, ino, FileKind::RegularFile).unwrap();
        }
        assert_eq!(names(&mut volume, &root, DirCursor::start()), [".", "..", "a", "b", "c"]);

        let mut iter = volume.iterate(&root, DirCursor::start()).unwrap();
        assert_eq!(iter.next().unwrap().unwrap().name, b".");
        assert_eq!(iter.next().unwrap().unwrap().name, b"..");
        let cursor = iter.cursor();
        assert_eq!(cursor.position(), 24);
        assert_eq!(names(&mut volume, &root, cursor), ["a", "b", "c"]);
    }

    #[test]
    fn test_iterate_realigns_backward_after_change() {
        let mut volume = test_volume();
        let mut root = root(&mut volume);
        for (name, ino) in [(&b"a"[..], 5), (b"b", 6), (b"c", 7)] {
            volume.insert(&mut root, name, ino, FileKind::RegularFile).unwrap();
        }
        let mut iter = volume.iterate(&root, DirCursor::start()).unwrap();
        for _ in 0..3 {
            iter.next().unwrap().unwrap();
        }
        // resume point is the start of "b"
        let cursor = iter.cursor();
        assert_eq!(cursor.position(), 36);

        let (_, b) = volume.find(&root, b"b").unwrap().unwrap();
        volume.remove(&mut root, b).unwrap();
        // offset 36 now falls inside the merged "a" record
        assert_eq!(names(&mut volume, &root, cursor), ["a", "c"]);
        assert_eq!(
            names(&mut volume, &root, DirCursor::from_position(36)),
            ["a", "c"]
        );
    }

    #[test]
    fn test_iterate_past_end_is_empty() {
        let mut volume = test_volume();
        let root = root(&mut volume);
        let end = DirCursor::from_position(BLOCK_SIZE as u64);
        assert!(names(&mut volume, &root, end).is_empty());
    }
}
