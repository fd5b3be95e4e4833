//! The Cluster stage: abundance tables in, bin summary and detail tables out.
//!
//! 1. Validate parameters (before touching any input).
//! 2. Load the long/wide abundance tables and check them against the
//!    Identify FASTA.
//! 3. Compute the Pearson dissimilarity between every pair of reads.
//! 4. Run density clustering on the dissimilarities.
//! 5. Aggregate clusters into bins and drop bins below the thresholds.
//! 6. Write the output tables.

pub mod bins;
pub mod dbscan;
pub mod distance;

pub use bins::{summarize_bins, BinFilter, BinSet};
pub use dbscan::{Dbscan, NOISE};
pub use distance::DissimilarityMatrix;

use crate::abundance::{load_abundance, AbundanceMatrix, LoadError};
use crate::config::{ClusterParams, ConfigError};
use crate::io::{write_cluster_outputs, OutputPaths};
use crate::utils::parallel::{build_pool, CancelToken, ParallelError};
use anyhow::{Context, Result};
use log::info;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("invalid cluster parameters: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("cluster run cancelled")]
    Cancelled,

    #[error("worker pool error: {0}")]
    Pool(String),
}

impl From<ParallelError> for ClusterError {
    fn from(err: ParallelError) -> Self {
        match err {
            ParallelError::Cancelled => ClusterError::Cancelled,
            other => ClusterError::Pool(other.to_string()),
        }
    }
}

/// Input files of the Cluster stage.
#[derive(Debug, Clone)]
pub struct ClusterInputs {
    /// Long-format table (`read_id, breadth, abundance, sample`, no header).
    pub long_table: PathBuf,
    /// Wide-format table (header row, one column per sample).
    pub wide_table: PathBuf,
    /// FASTA written by the Identify stage.
    pub identify_fasta: PathBuf,
}

/// In-memory result of clustering one matrix.
#[derive(Debug, Clone)]
pub struct ClusterResult {
    /// Raw cluster label of every matrix row ([`NOISE`] for noise).
    pub labels: Vec<i64>,
    pub bins: BinSet,
}

impl ClusterResult {
    /// Retained bin id of every matrix row, [`NOISE`] otherwise.
    pub fn bin_labels(&self) -> Vec<i64> {
        self.bins.bin_labels(self.labels.len())
    }
}

/// Counts and parameters of a finished run, written as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterReport {
    pub params: ClusterParams,
    pub reads: usize,
    pub samples: usize,
    pub clusters: usize,
    pub noise_reads: usize,
    pub bins_retained: usize,
    pub bins_dropped: usize,
    pub summary_file: PathBuf,
    pub detail_file: PathBuf,
    pub bin_profiles_file: PathBuf,
}

/// Files written by [`run_cluster`].
#[derive(Debug, Clone)]
pub struct ClusterOutput {
    pub paths: OutputPaths,
    pub report: ClusterReport,
}

/// Clusters the rows of `matrix` and filters the resulting bins.
///
/// Distance and neighbourhood passes run on a pool of `params.cpu` threads;
/// the result is identical for any thread count.
pub fn cluster_matrix(
    matrix: &AbundanceMatrix,
    params: &ClusterParams,
    cancel: &CancelToken,
) -> Result<ClusterResult, ClusterError> {
    params.validate()?;
    let pool = build_pool(params.cpu)?;

    let started = Instant::now();
    let dist = pool.install(|| DissimilarityMatrix::compute(matrix, cancel))?;
    info!(
        "Computed {0}x{0} dissimilarity matrix in {1:.2?}",
        dist.len(),
        started.elapsed()
    );

    let started = Instant::now();
    let order = matrix.sorted_order();
    let dbscan = Dbscan::new(params.max_dist, params.min_samples);
    let labels = pool.install(|| dbscan.fit(&dist, &order, cancel))?;
    debug_assert!(params.produces_noise() || !labels.contains(&NOISE));
    info!("Density clustering finished in {:.2?}", started.elapsed());

    let filter = BinFilter {
        min_reads: params.min_reads_bin,
        min_abundance: params.min_abund_bin,
    };
    let bins = summarize_bins(&labels, matrix, filter);
    Ok(ClusterResult { labels, bins })
}

/// Runs the whole Cluster stage and writes its outputs into `output_dir`.
///
/// Nothing is written unless loading, clustering and serialisation of every
/// output file succeed.
pub fn run_cluster(
    inputs: &ClusterInputs,
    params: &ClusterParams,
    output_dir: &Path,
    cancel: &CancelToken,
) -> Result<ClusterOutput> {
    params.validate().map_err(ClusterError::from)?;
    let started = Instant::now();
    info!(
        "Clustering {} (wide: {}, identify: {})",
        inputs.long_table.display(),
        inputs.wide_table.display(),
        inputs.identify_fasta.display()
    );

    let loaded = load_abundance(&inputs.long_table, &inputs.wide_table, &inputs.identify_fasta)
        .map_err(ClusterError::from)?;
    let result = cluster_matrix(&loaded.matrix, params, cancel)?;

    let paths = OutputPaths::in_dir(output_dir);
    let report = ClusterReport {
        params: params.clone(),
        reads: loaded.matrix.n_reads(),
        samples: loaded.matrix.n_samples(),
        clusters: result.bins.clusters,
        noise_reads: result.bins.noise_reads,
        bins_retained: result.bins.bins.len(),
        bins_dropped: result.bins.dropped(),
        summary_file: paths.summary.clone(),
        detail_file: paths.detail.clone(),
        bin_profiles_file: paths.bin_profiles.clone(),
    };
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;
    write_cluster_outputs(&paths, &loaded.matrix, &loaded.reads, &result, &report)?;

    info!("Cluster stage finished in {:.2?}", started.elapsed());
    Ok(ClusterOutput { paths, report })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abundance::tests::toy_matrix;
    use std::fs;
    use tempfile::tempdir;

    fn params(max_dist: f64, min_samples: usize, min_reads_bin: f64, min_abund_bin: f64) -> ClusterParams {
        ClusterParams {
            max_dist,
            min_samples,
            min_reads_bin,
            min_abund_bin,
            cpu: 2,
        }
    }

    const WIDE: &str = "read_id\tS1\tS2\tS3\n\
read1\t10\t10\t10\n\
read2\t9\t11\t10\n\
read3\t0\t0\t0\n\
read4\t0\t0\t0\n\
read5\t50\t1\t1\n";

    const LONG: &str = "read1\t1.0\t10\tS1\n\
read1\t1.0\t10\tS2\n\
read1\t1.0\t10\tS3\n\
read2\t0.5\t9\tS1\n\
read2\t0.5\t11\tS2\n\
read5\t0.2\t50\tS1\n";

    const FASTA: &str = ">read1\nACGT\n>read2\nACG\n>read3\nAC\n>read4\nA\n>read5\nACGTA\n";

    fn write_inputs(dir: &Path, fasta: &str) -> ClusterInputs {
        let inputs = ClusterInputs {
            long_table: dir.join("abund.tsv"),
            wide_table: dir.join("abund_wide.tsv"),
            identify_fasta: dir.join("identify.fasta"),
        };
        fs::write(&inputs.long_table, LONG).unwrap();
        fs::write(&inputs.wide_table, WIDE).unwrap();
        fs::write(&inputs.identify_fasta, fasta).unwrap();
        inputs
    }

    #[test]
    fn test_covarying_reads_share_a_cluster() {
        let result = cluster_matrix(&toy_matrix(), &params(0.3, 1, 0.0, 0.0), &CancelToken::new()).unwrap();
        let labels = &result.labels;
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[2], labels[3]);
        assert_ne!(labels[0], labels[2]);
        assert_ne!(labels[4], labels[0]);
        assert_ne!(labels[4], labels[2]);
        assert_eq!(result.bins.bins.len(), 3);
    }

    #[test]
    fn test_min_reads_can_drop_every_bin() {
        let result = cluster_matrix(&toy_matrix(), &params(0.3, 1, 3.0, 0.0), &CancelToken::new()).unwrap();
        assert!(result.bins.bins.is_empty());
        assert!(result.bin_labels().iter().all(|&l| l == NOISE));
    }

    #[test]
    fn test_invalid_params_rejected_before_work() {
        let result = cluster_matrix(&toy_matrix(), &params(3.0, 1, 0.0, 0.0), &CancelToken::new());
        assert!(matches!(result, Err(ClusterError::Config(_))));
    }

    #[test]
    fn test_cancelled_run() {
        let token = CancelToken::new();
        token.cancel();
        let result = cluster_matrix(&toy_matrix(), &params(0.3, 1, 0.0, 0.0), &token);
        assert!(matches!(result, Err(ClusterError::Cancelled)));
    }

    #[test]
    fn test_run_cluster_writes_outputs() {
        let dir = tempdir().unwrap();
        let inputs = write_inputs(dir.path(), FASTA);
        let out_dir = dir.path().join("out");
        fs::create_dir(&out_dir).unwrap();

        let output = run_cluster(&inputs, &params(0.3, 1, 2.0, 10.0), &out_dir, &CancelToken::new()).unwrap();
        assert_eq!(output.report.reads, 5);
        assert_eq!(output.report.clusters, 3);
        assert_eq!(output.report.bins_retained, 1);

        let summary = fs::read_to_string(&output.paths.summary).unwrap();
        assert_eq!(
            summary,
            "bin_id\tread_count\ttotal_abundance\ttotal_breadth\n0\t2\t60.0\t4.0\n"
        );

        let detail = fs::read_to_string(&output.paths.detail).unwrap();
        let lines: Vec<&str> = detail.lines().collect();
        assert_eq!(lines[0], "read_id\tbin_id\tcluster\tlength\tS1\tS2\tS3");
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[1], "read1\t0\t0\t4\t10.0\t10.0\t10.0");
        assert_eq!(lines[3], "read3\t-1\t1\t2\t0.0\t0.0\t0.0");
        assert_eq!(lines[5], "read5\t-1\t2\t5\t50.0\t1.0\t1.0");

        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output.paths.report).unwrap()).unwrap();
        assert_eq!(report["bins_dropped"], 2);
    }

    #[test]
    fn test_run_is_deterministic() {
        let dir = tempdir().unwrap();
        let inputs = write_inputs(dir.path(), FASTA);
        let first_dir = dir.path().join("first");
        let second_dir = dir.path().join("second");
        fs::create_dir(&first_dir).unwrap();
        fs::create_dir(&second_dir).unwrap();

        let p = params(0.3, 1, 1.0, 0.0);
        let first = run_cluster(&inputs, &p, &first_dir, &CancelToken::new()).unwrap();
        let mut p4 = p.clone();
        p4.cpu = 4;
        let second = run_cluster(&inputs, &p4, &second_dir, &CancelToken::new()).unwrap();

        for (a, b) in [
            (&first.paths.summary, &second.paths.summary),
            (&first.paths.detail, &second.paths.detail),
        ] {
            assert_eq!(fs::read_to_string(a).unwrap(), fs::read_to_string(b).unwrap());
        }
    }

    #[test]
    fn test_read_missing_from_identify_writes_nothing() {
        let dir = tempdir().unwrap();
        let inputs = write_inputs(dir.path(), ">read1\nA\n>read2\nA\n>read3\nA\n>read4\nA\n");
        let out_dir = dir.path().join("out");
        fs::create_dir(&out_dir).unwrap();

        let err = run_cluster(&inputs, &ClusterParams::default(), &out_dir, &CancelToken::new())
            .unwrap_err();
        match err.downcast_ref::<ClusterError>() {
            Some(ClusterError::Load(LoadError::MissingFromIdentify { read_id, .. })) => {
                assert_eq!(read_id, "read5")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(fs::read_dir(&out_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_output_dir_created_only_after_success() {
        let dir = tempdir().unwrap();
        let out_dir = dir.path().join("nested").join("out");

        let failing = write_inputs(dir.path(), ">read1\nA\n");
        assert!(run_cluster(&failing, &ClusterParams::default(), &out_dir, &CancelToken::new()).is_err());
        assert!(!dir.path().join("nested").exists());

        let inputs = write_inputs(dir.path(), FASTA);
        let output = run_cluster(&inputs, &ClusterParams::default(), &out_dir, &CancelToken::new()).unwrap();
        assert!(output.paths.summary.exists());
        assert!(output.paths.detail.starts_with(&out_dir));
    }
}
