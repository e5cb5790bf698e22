use clap::Parser;
use blockfs::cli_interface::BlockFsCli;
/// a CLI interface to users to create a blockfs image,
/// and to look at or change the files inside it without mounting.
fn main() -> anyhow::Result<()> {
    env_logger::builder().format_timestamp_nanos().init();
    let args = BlockFsCli::parse();
    blockfs::cli_interface::run(args, &mut std::io::stdout().lock())
}
