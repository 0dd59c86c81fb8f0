use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wumanber::{Index, dec, enc};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build an index from a file with one pattern per line
    Build {
        /// Pattern file; empty lines are skipped
        patterns: PathBuf,
        /// Where to write the serialized index
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Count pattern occurrences in a text
    Search {
        /// A serialized index produced by `build`
        index: PathBuf,
        /// Text to scan; read from stdin when omitted
        text: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Build { patterns, out } => build(&patterns, &out),
        Command::Search { index, text } => search(&index, text),
    }
}

fn build(patterns_path: &Path, out: &Path) -> anyhow::Result<()> {
    let raw = fs::read_to_string(patterns_path)
        .with_context(|| format!("reading {}", patterns_path.display()))?;
    let patterns: Vec<Vec<u8>> = raw
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| line.as_bytes().to_vec())
        .collect();

    let start = Instant::now();
    let index = Index::build(patterns)?;
    info!(
        patterns = index.patterns().len(),
        table_size = index.table_size(),
        "index built in {:?}",
        start.elapsed()
    );

    enc::encode_to_path(&index, out).with_context(|| format!("writing {}", out.display()))?;
    Ok(())
}

fn search(index_path: &Path, text: Option<String>) -> anyhow::Result<()> {
    let file = fs::File::open(index_path)
        .with_context(|| format!("opening {}", index_path.display()))?;
    let map = unsafe { memmap2::Mmap::map(&file)? };
    let index = dec::decode(&map[..])?;

    let text = match text {
        Some(text) => text.into_bytes(),
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };

    let start = Instant::now();
    let hits = index.search(&text);
    info!("scanned {} bytes in {:?}", text.len(), start.elapsed());

    println!("{hits}");
    Ok(())
}
