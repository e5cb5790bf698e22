use std::io::Write;

use anyhow::{anyhow, Context};
use byte_unit::Byte;
use log::info;

use crate::{
    block_store::MmapBlockStore,
    fs::{Volume, BLOCK_SIZE},
    mkfs::mkfs,
};

use super::BlockFsCli;

fn open_volume(image_file_path: &str) -> anyhow::Result<Volume<MmapBlockStore>> {
    let store = MmapBlockStore::open(image_file_path)
        .with_context(|| format!("cannot open image {image_file_path}"))?;
    Ok(Volume::open(store)?)
}

fn human(bytes: u64) -> String {
    Byte::from_bytes(bytes as _).get_appropriate_unit(true).to_string()
}

/// carry out one subcommand, writing what it prints to `out`
pub fn run(cli: BlockFsCli, out: &mut impl Write) -> anyhow::Result<()> {
    info!("run() called with {cli:?}");
    match cli {
        BlockFsCli::Mkfs(args) => {
            mkfs(&args.image_file_path, args.size, args.inode_count)?;
            writeln!(out, "created {}", args.image_file_path)?;
        }
        BlockFsCli::Ls(args) => {
            let mut volume = open_volume(&args.image_file_path)?;
            let dir = volume.resolve_path(&args.path)?;
            if !dir.is_dir() {
                return Err(anyhow!("{} is not a directory", args.path));
            }
            for entry in volume.read_dir(&dir)? {
                writeln!(
                    out,
                    "{} {:>8} {}",
                    entry.file_kind.tag(),
                    entry.ino,
                    entry.name_lossy()
                )?;
            }
        }
        BlockFsCli::Mkdir(args) => {
            let mut volume = open_volume(&args.image_file_path)?;
            let (mut parent, name) = volume.resolve_parent(&args.path)?;
            volume.mkdir(&mut parent, name.as_bytes(), 0o755)?;
            volume.into_store()?;
        }
        BlockFsCli::Put(args) => {
            let content = std::fs::read(&args.source)
                .with_context(|| format!("cannot read {}", args.source))?;
            let mut volume = open_volume(&args.image_file_path)?;
            let (mut parent, name) = volume.resolve_parent(&args.path)?;
            let mut file = match volume.lookup(&parent, name.as_bytes()) {
                Ok(mut existing) => {
                    volume.truncate(&mut existing, 0)?;
                    existing
                }
                Err(crate::FsError::NotFound) => {
                    volume.create(&mut parent, name.as_bytes(), 0o644)?
                }
                Err(e) => return Err(e.into()),
            };
            volume.write_at(&mut file, 0, &content)?;
            volume.into_store()?;
            writeln!(out, "{} bytes -> {}", content.len(), args.path)?;
        }
        BlockFsCli::Cat(args) => {
            let mut volume = open_volume(&args.image_file_path)?;
            let file = volume.resolve_path(&args.path)?;
            let mut buf = vec![0u8; 16 * BLOCK_SIZE];
            let mut offset = 0;
            loop {
                let n = volume.read_at(&file, offset, &mut buf)?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
                offset += n as u64;
            }
        }
        BlockFsCli::Rm(args) => {
            let mut volume = open_volume(&args.image_file_path)?;
            let (mut parent, name) = volume.resolve_parent(&args.path)?;
            volume.unlink(&mut parent, name.as_bytes())?;
            volume.into_store()?;
        }
        BlockFsCli::Rmdir(args) => {
            let mut volume = open_volume(&args.image_file_path)?;
            let (mut parent, name) = volume.resolve_parent(&args.path)?;
            volume.rmdir(&mut parent, name.as_bytes())?;
            volume.into_store()?;
        }
        BlockFsCli::Stat(args) => {
            let mut volume = open_volume(&args.image_file_path)?;
            let inode = volume.resolve_path(&args.path)?;
            writeln!(out, "inode: {}", inode.ino)?;
            writeln!(out, "kind: {:?}", inode.file_kind())?;
            writeln!(out, "mode: {:o}", inode.mode)?;
            writeln!(out, "links: {}", inode.links_count)?;
            writeln!(out, "owner: {}:{}", inode.uid, inode.gid)?;
            writeln!(out, "size: {}", inode.size)?;
            writeln!(out, "blocks: {}", inode.blocks)?;
            writeln!(out, "parent: {}", inode.parent)?;
            writeln!(out, "mtime: {}.{:09}", inode.mtime.sec, inode.mtime.nsec)?;
        }
        BlockFsCli::Bmap(args) => {
            let mut volume = open_volume(&args.image_file_path)?;
            let inode = volume.resolve_path(&args.path)?;
            match volume.map_block(&inode, args.logical)? {
                Some(block) => writeln!(out, "{} -> {block}", args.logical)?,
                None => writeln!(out, "{} -> hole", args.logical)?,
            }
        }
        BlockFsCli::Df(args) => {
            let mut volume = open_volume(&args.image_file_path)?;
            let stats = volume.stats()?;
            let block_size = stats.block_size as u64;
            writeln!(
                out,
                "blocks: {} free of {} data ({} of {})",
                stats.free_blocks,
                stats.data_blocks,
                human(stats.free_blocks * block_size),
                human(stats.data_blocks * block_size)
            )?;
            writeln!(
                out,
                "inodes: {} free of {}",
                stats.free_inodes, stats.total_inodes
            )?;
        }
    }
    Ok(())
}
