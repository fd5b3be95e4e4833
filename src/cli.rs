use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};

use crate::cluster::{run_cluster, ClusterInputs, ClusterOutput};
use crate::config::ClusterParams;
use crate::pipeline::{GatherQuantify, Pipeline, PrecomputedIdentify};
use crate::quantify::gather_abundance;
use crate::utils::parallel::CancelToken;

#[derive(Parser, Debug)]
#[command(author, version, about = "Binning of biosynthetic gene cluster reads by abundance co-variation", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Density clustering parameters shared by `cluster` and `search`.
#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    /// Maximum Pearson distance (1 - r) for two reads to be neighbours
    #[arg(long, default_value_t = 0.1)]
    pub max_dist: f64,

    /// Minimum neighbourhood size, the read itself included, of a core read
    #[arg(long, default_value_t = 1.0)]
    pub min_samples: f64,

    /// Minimum number of reads in a retained bin
    #[arg(long, default_value_t = 10.0)]
    pub min_reads_bin: f64,

    /// Minimum total abundance of a retained bin
    #[arg(long, default_value_t = 10.0)]
    pub min_abund_bin: f64,
}

impl ClusterArgs {
    fn params(&self, cpu: usize) -> Result<ClusterParams> {
        Ok(ClusterParams::new(
            self.max_dist,
            self.min_samples,
            self.min_reads_bin,
            self.min_abund_bin,
            cpu,
        )?)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Cluster reads into bins from their abundance profiles
    Cluster {
        /// Long-format abundance table (read_id, breadth, abundance, sample)
        #[arg(long)]
        table: PathBuf,

        /// Wide-format abundance table (read_id then one column per sample)
        #[arg(long)]
        table_wide: PathBuf,

        /// FASTA of the reads found by the Identify stage
        #[arg(long)]
        identify_fasta: PathBuf,

        /// Output directory (defaults to the directory of --table-wide)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[command(flatten)]
        cluster: ClusterArgs,

        /// Number of threads, 0 for all logical CPUs
        #[arg(long, default_value_t = 1)]
        cpu: usize,
    },

    /// Merge per-sample quantification files into abundance tables
    Gather {
        /// FASTA of the reads found by the Identify stage
        #[arg(long)]
        identify_fasta: PathBuf,

        /// Directory searched recursively for *-rpkm.tsv files
        #[arg(long)]
        quant_dir: PathBuf,

        /// Output directory
        #[arg(long)]
        output_dir: PathBuf,
    },

    /// Run Identify (precomputed), Quantify (gather) and Cluster in sequence
    Search {
        /// FASTA of the reads found by the Identify stage
        #[arg(long)]
        identify_fasta: PathBuf,

        /// Directory searched recursively for *-rpkm.tsv files
        #[arg(long)]
        quant_dir: PathBuf,

        /// Output directory
        #[arg(long)]
        output_dir: PathBuf,

        #[command(flatten)]
        cluster: ClusterArgs,

        /// Number of threads, 0 for all logical CPUs
        #[arg(long, default_value_t = 4)]
        cpu: usize,
    },
}

/// Main entry point for CLI
pub fn run_cli(cli: Cli) -> Result<()> {
    let cancel = CancelToken::new();
    match cli.command {
        Commands::Cluster {
            table,
            table_wide,
            identify_fasta,
            output_dir,
            cluster,
            cpu,
        } => {
            let params = cluster.params(cpu)?;
            let output_dir = output_dir.unwrap_or_else(|| default_output_dir(&table_wide));
            let inputs = ClusterInputs {
                long_table: table,
                wide_table: table_wide,
                identify_fasta,
            };
            let output = run_cluster(&inputs, &params, &output_dir, &cancel)?;
            print_cluster_output(&output);
            Ok(())
        }
        Commands::Gather {
            identify_fasta,
            quant_dir,
            output_dir,
        } => {
            let tables = gather_abundance(&identify_fasta, &quant_dir, &output_dir)?;
            println!(
                "Gathered {} samples for {} reads",
                tables.samples.len(),
                tables.reads
            );
            println!("Abundance table: {}", tables.long_table.display());
            println!("Wide abundance table: {}", tables.wide_table.display());
            println!("Breadth table: {}", tables.breadth_table.display());
            Ok(())
        }
        Commands::Search {
            identify_fasta,
            quant_dir,
            output_dir,
            cluster,
            cpu,
        } => {
            let params = cluster.params(cpu)?;
            info!("Search parameters: {:?}", params);
            let pipeline = Pipeline::new(
                PrecomputedIdentify {
                    reads_fasta: identify_fasta,
                },
                GatherQuantify {
                    quant_dir,
                    output_dir: output_dir.clone(),
                },
                params,
                output_dir,
            );
            let output = pipeline.run(&cancel)?;
            println!("Identify reads: {}", output.identify.reads_fasta.display());
            println!("Abundance table: {}", output.quantify.long_table.display());
            print_cluster_output(&output.cluster);
            Ok(())
        }
    }
}

fn default_output_dir(table: &Path) -> PathBuf {
    table
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn print_cluster_output(output: &ClusterOutput) {
    println!(
        "{} bins retained from {} clusters ({} noise reads)",
        output.report.bins_retained, output.report.clusters, output.report.noise_reads
    );
    println!("Cluster summary file: {}", output.paths.summary.display());
    println!("Cluster detail file: {}", output.paths.detail.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_defaults() {
        let cli = Cli::try_parse_from([
            "metabgc",
            "cluster",
            "--table",
            "out/abundance_long.tsv",
            "--table-wide",
            "out/abundance_wide.tsv",
            "--identify-fasta",
            "reads.fasta",
        ])
        .unwrap();
        match cli.command {
            Commands::Cluster {
                table_wide,
                output_dir,
                cluster,
                cpu,
                ..
            } => {
                assert_eq!(output_dir, None);
                assert_eq!(default_output_dir(&table_wide), PathBuf::from("out"));
                let params = cluster.params(cpu).unwrap();
                assert_eq!(params, ClusterParams::default());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_fractional_min_samples_is_rejected() {
        let cli = Cli::try_parse_from([
            "metabgc",
            "search",
            "--identify-fasta",
            "reads.fasta",
            "--quant-dir",
            "quant",
            "--output-dir",
            "out",
            "--min-samples",
            "2.5",
        ])
        .unwrap();
        match cli.command {
            Commands::Search { cluster, cpu, .. } => {
                assert_eq!(cpu, 4);
                assert!(cluster.params(cpu).is_err());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_default_output_dir_for_bare_file_name() {
        assert_eq!(default_output_dir(Path::new("table.tsv")), PathBuf::from("."));
    }
}
