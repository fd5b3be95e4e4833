//! Main entry point for the metabgc application.
//!
//! Groups biosynthetic gene cluster reads into bins by the co-variation of
//! their abundance across metagenomic samples:
//! 1. Identify: reads matching a BGC domain model (precomputed FASTA).
//! 2. Quantify: per-sample abundance of every identified read.
//! 3. Cluster: Pearson-dissimilarity density clustering of abundance
//!    profiles into filtered bins.

mod abundance;
mod cli;
mod cluster;
mod config;
mod io;
mod pipeline;
mod quantify;
mod utils;

use anyhow::Result;
use clap::Parser;
use cli::{run_cli, Cli};
use env_logger::Env;
use log::{error, info};

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    info!("Starting metabgc {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run_cli(cli) {
        error!("{:#}", e);
        return Err(e);
    }
    info!("Analysis finished successfully.");
    Ok(())
}
