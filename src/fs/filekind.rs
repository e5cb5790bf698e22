/// an enum to describe the type of a file, as stored in a directory record
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// Unknown
    #[default]
    Unknown,
    /// an regular file
    RegularFile,
    /// a directory
    Directory,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    /// a symbolic link
    SymbolicLink,
}

impl FileKind {
    /// kind encoded in the `S_IFMT` bits of `mode`
    pub fn from_mode(mode: u16) -> Self {
        match mode as libc::mode_t & libc::S_IFMT {
            libc::S_IFREG => FileKind::RegularFile,
            libc::S_IFDIR => FileKind::Directory,
            libc::S_IFCHR => FileKind::CharDevice,
            libc::S_IFBLK => FileKind::BlockDevice,
            libc::S_IFIFO => FileKind::Fifo,
            libc::S_IFSOCK => FileKind::Socket,
            libc::S_IFLNK => FileKind::SymbolicLink,
            _ => FileKind::Unknown,
        }
    }

    /// the one-letter tag `ls -l` prints
    pub fn tag(self) -> char {
        match self {
            FileKind::RegularFile => '-',
            FileKind::Directory => 'd',
            FileKind::CharDevice => 'c',
            FileKind::BlockDevice => 'b',
            FileKind::Fifo => 'p',
            FileKind::Socket => 's',
            FileKind::SymbolicLink => 'l',
            FileKind::Unknown => '?',
        }
    }
}

/// directory record `file_type` byte
impl From<FileKind> for u8 {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::Unknown => 0,
            FileKind::RegularFile => 1,
            FileKind::Directory => 2,
            FileKind::CharDevice => 3,
            FileKind::BlockDevice => 4,
            FileKind::Fifo => 5,
            FileKind::Socket => 6,
            FileKind::SymbolicLink => 7,
        }
    }
}

/// unknown codes read back as [FileKind::Unknown]
impl From<u8> for FileKind {
    fn from(code: u8) -> Self {
        match code {
            1 => FileKind::RegularFile,
            2 => FileKind::Directory,
            3 => FileKind::CharDevice,
            4 => FileKind::BlockDevice,
            5 => FileKind::Fifo,
            6 => FileKind::Socket,
            7 => FileKind::SymbolicLink,
            _ => FileKind::Unknown,
        }
    }
}
