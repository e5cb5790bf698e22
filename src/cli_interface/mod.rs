//! the `blockfs` command line: argument structs and what each subcommand does
mod cli_struct;
mod commands;
pub use cli_struct::*;
pub use commands::run;
