//! namespace operations composed from the directory records and inode lifecycle
use log::{info, warn};

use crate::{
    block_store::BlockStore,
    error::{FsError, Result},
};

use super::{DirCursor, DirEntry, FileKind, Inode, Volume, ROOT_INODE};

impl<S: BlockStore> Volume<S> {
    /// the inode `name` refers to inside `dir`
    pub fn lookup(&mut self, dir: &Inode, name: &[u8]) -> Result<Inode> {
        match self.find(dir, name)? {
            Some((ino, _)) => self.read_inode(ino),
            None => Err(FsError::NotFound),
        }
    }

    /// create a non-directory `name` in `dir`, a mode without a file type
    /// makes a regular file
    pub fn create(&mut self, dir: &mut Inode, name: &[u8], mode: u16) -> Result<Inode> {
        info!(
            "create() called with parent inode number: {} and name: {:?}",
            dir.ino,
            String::from_utf8_lossy(name)
        );
        let mode = match FileKind::from_mode(mode) {
            FileKind::Directory => {
                return Err(FsError::InvalidArgument(
                    "directories are made with mkdir".into(),
                ))
            }
            FileKind::Unknown => mode | libc::S_IFREG as u16,
            _ => mode,
        };
        if self.find(dir, name)?.is_some() {
            return Err(FsError::AlreadyExists);
        }
        let mut inode = self.new_inode(dir, mode)?;
        if let Err(e) = self.insert(dir, name, inode.ino, inode.file_kind()) {
            self.discard_inode(&mut inode);
            return Err(e);
        }
        Ok(inode)
    }

    /// create directory `name` in `dir`
    pub fn mkdir(&mut self, dir: &mut Inode, name: &[u8], perm: u16) -> Result<Inode> {
        info!(
            "mkdir() called with parent inode number: {} and name: {:?}",
            dir.ino,
            String::from_utf8_lossy(name)
        );
        if self.find(dir, name)?.is_some() {
            return Err(FsError::AlreadyExists);
        }
        let mode = libc::S_IFDIR as u16 | (perm & 0o7777);
        let mut child = self.new_inode(dir, mode)?;
        child.links_count = 2;
        let made = self
            .init_as_directory(&mut child, dir.ino)
            .and_then(|()| self.insert(dir, name, child.ino, FileKind::Directory));
        if let Err(e) = made {
            self.discard_inode(&mut child);
            return Err(e);
        }
        dir.links_count += 1;
        dir.touch_changed();
        self.write_inode(dir)?;
        Ok(child)
    }

    /// drop `name` from `dir`, deleting the inode with its last link
    pub fn unlink(&mut self, dir: &mut Inode, name: &[u8]) -> Result<()> {
        info!(
            "unlink() called with parent inode number: {} and name: {:?}",
            dir.ino,
            String::from_utf8_lossy(name)
        );
        let (ino, location) = self.find(dir, name)?.ok_or(FsError::NotFound)?;
        let mut inode = self.read_inode(ino)?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        self.remove(dir, location)?;
        inode.links_count -= 1;
        if inode.links_count == 0 {
            self.delete_inode(&mut inode)
        } else {
            inode.touch_changed();
            self.write_inode(&inode)
        }
    }

    /// remove the empty directory `name` from `dir`
    pub fn rmdir(&mut self, dir: &mut Inode, name: &[u8]) -> Result<()> {
        info!(
            "rmdir() called with parent inode number: {} and name: {:?}",
            dir.ino,
            String::from_utf8_lossy(name)
        );
        match name {
            b"." => return Err(FsError::InvalidArgument("cannot remove `.`".into())),
            b".." => return Err(FsError::NotEmpty),
            _ => {}
        }
        let (ino, location) = self.find(dir, name)?.ok_or(FsError::NotFound)?;
        let mut child = self.read_inode(ino)?;
        if !child.is_dir() {
            return Err(FsError::NotDirectory);
        }
        if !self.is_empty(&child)? {
            return Err(FsError::NotEmpty);
        }
        self.remove(dir, location)?;
        child.size = 0;
        self.delete_inode(&mut child)?;
        dir.links_count = dir.links_count.saturating_sub(1);
        dir.touch_changed();
        self.write_inode(dir)
    }

    /// every live entry of `dir`, `.` and `..` included
    pub fn read_dir(&mut self, dir: &Inode) -> Result<Vec<DirEntry>> {
        info!("readdir() called with inode number: {}", dir.ino);
        self.iterate(dir, DirCursor::start())?.collect()
    }

    /// the inode at an absolute `/`-separated path
    pub fn resolve_path(&mut self, path: &str) -> Result<Inode> {
        let rest = path
            .strip_prefix('/')
            .ok_or_else(|| FsError::InvalidArgument(format!("{path} is not absolute")))?;
        let mut current = self.read_inode(ROOT_INODE)?;
        for component in rest.split('/').filter(|c| !c.is_empty()) {
            if !current.is_dir() {
                return Err(FsError::NotDirectory);
            }
            current = self.lookup(&current, component.as_bytes())?;
        }
        Ok(current)
    }

    /// the directory holding the last component of `path`, and that component
    pub fn resolve_parent<'p>(&mut self, path: &'p str) -> Result<(Inode, &'p str)> {
        if !path.starts_with('/') {
            return Err(FsError::InvalidArgument(format!("{path} is not absolute")));
        }
        let (parent, name) = path
            .trim_end_matches('/')
            .rsplit_once('/')
            .filter(|(_, name)| !name.is_empty())
            .ok_or(FsError::InvalidName)?;
        let parent = self.resolve_path(if parent.is_empty() { "/" } else { parent })?;
        if !parent.is_dir() {
            return Err(FsError::NotDirectory);
        }
        Ok((parent, name))
    }

    /// undo a half-made inode
    fn discard_inode(&mut self, inode: &mut Inode) {
        if let Err(e) = self.delete_inode(inode) {
            warn!("discarding inode {} failed: {e}", inode.ino);
        }
    }
}
