//! Interactive shell for the poolfs virtual file system.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod shell;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use poolfs::{DocFormat, VirtualFileSystem};

#[derive(Parser)]
#[command(
    name = "poolfs",
    version,
    about = "Deduplicating multi-user virtual file system"
)]
struct Cli {
    /// System root directory (created if missing).
    #[arg(long)]
    root: PathBuf,

    /// User whose namespace to open (created if missing).
    #[arg(long)]
    user: String,

    /// Write the tree document indented for human reading.
    #[arg(long)]
    pretty: bool,
}

fn main() {
    env_logger::init();
    if let Err(e) = run(Cli::parse()) {
        eprintln!("poolfs: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let format = DocFormat::new(cli.pretty, cli.pretty);
    let vfs = VirtualFileSystem::open_with_format(&cli.root, &cli.user, format)?;
    shell::repl(vfs)
}
