//! metacache inspection tool
//!
//! Prints the superblock, the cache image manifest, or cache diagnostics of
//! a container file. The file is always opened read-only.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use metacache::image::ImageBlock;
use metacache::io::{FileDriver, FsDriver};
use metacache::superblock::Superblock;
use metacache::{Config, MetadataFile, OpenMode};
use tracing_subscriber::{fmt, EnvFilter};

/// metacache inspector
#[derive(Parser, Debug)]
#[command(name = "metacache-inspect")]
#[command(about = "Inspect container files and their cache images")]
#[command(version)]
struct Args {
    /// Container file
    file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the superblock and its extension messages
    Superblock,

    /// Decode the cache image block and list its manifest
    Image,

    /// Print the group hierarchy
    Tree,

    /// Read datasets through the cache and print its diagnostics
    Stats {
        /// Dataset paths to read
        paths: Vec<String>,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,metacache=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let result = match &args.command {
        Commands::Superblock => print_superblock(&args.file),
        Commands::Image => print_image(&args.file),
        Commands::Tree => print_tree(&args.file),
        Commands::Stats { paths } => print_stats(&args.file, paths),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_superblock(path: &Path) -> metacache::Result<()> {
    let mut driver = FsDriver::open(path, true)?;
    let superblock = Superblock::read_from(&mut driver)?;

    println!("File:                 {}", path.display());
    println!("Physical size:        {} bytes", driver.size()?);
    println!("End of allocation:    {:#x}", superblock.eoa);
    println!("Root group header:    {:#x}", superblock.root_group);
    match superblock.extension.image {
        Some(message) => println!("{}", message),
        None => println!("Metadata cache image: none"),
    }
    Ok(())
}

fn print_image(path: &Path) -> metacache::Result<()> {
    let mut driver = FsDriver::open(path, true)?;
    let superblock = Superblock::read_from(&mut driver)?;

    let message = match superblock.extension.image {
        Some(message) if message.has_block() => message,
        Some(_) => {
            println!("Image message present without a block");
            return Ok(());
        }
        None => {
            println!("No cache image");
            return Ok(());
        }
    };

    let mut raw = vec![0u8; message.len as usize];
    driver.read_at(message.addr, &mut raw)?;
    let block = ImageBlock::decode(&raw)?;

    println!("{}", message);
    println!("Entries: {}", block.len());
    println!("{:>18}  {:<22} {:>8}", "Address", "Kind", "Bytes");
    for record in block.manifest() {
        println!(
            "{:>#18x}  {:<22} {:>8}",
            record.addr,
            record.kind.name(),
            record.len
        );
    }
    Ok(())
}

fn print_tree(path: &Path) -> metacache::Result<()> {
    let mut file = MetadataFile::open_path(path, OpenMode::ReadOnly, Config::default())?;
    println!("/");
    walk(&mut file, "", 1)?;
    file.close()
}

fn walk(file: &mut MetadataFile, prefix: &str, depth: usize) -> metacache::Result<()> {
    let group = if prefix.is_empty() { "/" } else { prefix };
    for name in file.list(group)? {
        let child = format!("{}/{}", prefix, name);
        println!("{}{}", "  ".repeat(depth), name);
        // datasets fail to list and end the descent
        if file.list(&child).is_ok() {
            walk(file, &child, depth + 1)?;
        }
    }
    Ok(())
}

fn print_stats(path: &Path, paths: &[String]) -> metacache::Result<()> {
    let mut file = MetadataFile::open_path(path, OpenMode::ReadOnly, Config::default())?;
    for dataset in paths {
        let ds = file.read_dataset(dataset)?;
        println!("{}: shape {:?}, {} bytes", dataset, ds.shape, ds.data.len());
    }

    println!("Image found at open: {}", file.load_image());
    print!("{}", file.cache_stats().report());
    println!("{:?}", file.io_counters());
    file.close()
}
