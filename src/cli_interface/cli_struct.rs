use clap::Parser;

#[derive(Parser, Debug, PartialEq)]
#[command(author, version, about, long_about)]
pub enum BlockFsCli {
    /// create a new file system image
    Mkfs(MkfsArgs),
    /// list a directory
    Ls(PathArgs),
    /// make a directory
    Mkdir(PathArgs),
    /// copy a host file into the image
    Put(PutArgs),
    /// print a file
    Cat(PathArgs),
    /// remove a file
    Rm(PathArgs),
    /// remove an empty directory
    Rmdir(PathArgs),
    /// show an inode
    Stat(PathArgs),
    /// show the physical block behind a logical block of a file
    Bmap(BmapArgs),
    /// show free blocks and inodes
    Df(ImageArgs),
}

/// parse sizes like `64MiB` or `4096` with `byte-unit`
fn parse_size(size: &str) -> Result<u64, String> {
    let bytes = byte_unit::Byte::from_str(size)
        .map_err(|e| e.to_string())?
        .get_bytes();
    u64::try_from(bytes).map_err(|e| e.to_string())
}

///make a new fs subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "make a new file system")]
pub struct MkfsArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// the size of the file system, unit suffixes like `MiB` are accepted
    #[clap(short, long, value_parser = parse_size)]
    pub size: u64,
    /// the inode count of the file system
    #[clap(short, long)]
    pub inode_count: u32,
}

/// subcommands that only need the image
#[derive(clap::Args, Debug, PartialEq)]
pub struct ImageArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
}

/// subcommands acting on one path inside the image
#[derive(clap::Args, Debug, PartialEq)]
pub struct PathArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// absolute path inside the file system
    pub path: String,
}

#[derive(clap::Args, Debug, PartialEq)]
pub struct PutArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// file on the host to copy from
    pub source: String,
    /// absolute destination path inside the file system
    pub path: String,
}

#[derive(clap::Args, Debug, PartialEq)]
pub struct BmapArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// absolute path inside the file system
    pub path: String,
    /// logical block index inside the file
    pub logical: u64,
}

/// test the `BlockFsCli` struct
/// test `mkfs` subcommand
#[cfg(test)]
mod mkfs_parse_args_tests {
    use super::*;
    /// test short parameter form
    #[test]
    fn test_short_parameter_form() {
        let args = BlockFsCli::parse_from([
            "blockfs", "mkfs", "-p", "test", "-s", "30MiB", "-i", "3172",
        ]);
        assert_eq!(
            args,
            BlockFsCli::Mkfs(MkfsArgs {
                image_file_path: "test".to_string(),
                size: 30 * 1024 * 1024,
                inode_count: 3172,
            })
        );
    }
    /// test long parameter form
    #[test]
    fn test_long_parameter_form() {
        let image_file_path_name = concat!("--", "image-file-path");
        let args = BlockFsCli::parse_from([
            "blockfs",
            "mkfs",
            image_file_path_name,
            "test",
            "--size",
            "40960",
            "--inode-count",
            "64",
        ]);
        assert_eq!(
            args,
            BlockFsCli::Mkfs(MkfsArgs {
                image_file_path: "test".to_string(),
                size: 40960,
                inode_count: 64,
            })
        );
    }
    /// a size `byte-unit` cannot read is a parse error
    #[test]
    fn test_bad_size() {
        assert!(BlockFsCli::try_parse_from([
            "blockfs", "mkfs", "-p", "test", "-s", "lots", "-i", "64",
        ])
        .is_err());
    }
}

/// test the subcommands working inside an image
#[cfg(test)]
mod path_parse_args_tests {
    use super::*;

    #[test]
    fn test_path_subcommands() {
        let args = BlockFsCli::parse_from(["blockfs", "ls", "-p", "fs.img", "/docs"]);
        assert_eq!(
            args,
            BlockFsCli::Ls(PathArgs {
                image_file_path: "fs.img".to_string(),
                path: "/docs".to_string(),
            })
        );
        let args = BlockFsCli::parse_from(["blockfs", "rmdir", "--image-file-path", "fs.img", "/d"]);
        assert!(matches!(args, BlockFsCli::Rmdir(PathArgs { path, .. }) if path == "/d"));
    }

    #[test]
    fn test_put_and_bmap() {
        let args = BlockFsCli::parse_from(["blockfs", "put", "-p", "fs.img", "local.txt", "/a.txt"]);
        assert_eq!(
            args,
            BlockFsCli::Put(PutArgs {
                image_file_path: "fs.img".to_string(),
                source: "local.txt".to_string(),
                path: "/a.txt".to_string(),
            })
        );
        let args = BlockFsCli::parse_from(["blockfs", "bmap", "-p", "fs.img", "/a.txt", "12"]);
        assert_eq!(
            args,
            BlockFsCli::Bmap(BmapArgs {
                image_file_path: "fs.img".to_string(),
                path: "/a.txt".to_string(),
                logical: 12,
            })
        );
    }

    #[test]
    fn test_image_path_is_required() {
        assert!(BlockFsCli::try_parse_from(["blockfs", "df"]).is_err());
        assert!(BlockFsCli::try_parse_from(["blockfs", "cat", "/a"]).is_err());
    }
}
