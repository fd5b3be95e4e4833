//! Aggregating clustered reads into bins and filtering them.

use super::dbscan::NOISE;
use crate::abundance::AbundanceMatrix;
use log::{debug, info};
use ndarray::Array1;
use statrs::statistics::{Data, Max, Median};
use std::collections::BTreeMap;

/// A retained cluster of co-varying reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    /// Cluster label the bin was built from.
    pub bin_id: i64,
    pub read_count: usize,
    /// Sum of all abundance values over member reads and samples.
    pub total_abundance: f64,
    /// Sum of all breadth values over member reads and samples.
    pub total_breadth: f64,
    /// Per-sample abundance summed over member reads.
    pub sample_abundance: Array1<f64>,
    /// Matrix rows of the member reads, ascending.
    pub members: Vec<usize>,
}

/// Thresholds a bin must meet to be retained.
#[derive(Debug, Clone, Copy)]
pub struct BinFilter {
    pub min_reads: f64,
    pub min_abundance: f64,
}

impl BinFilter {
    pub fn accepts(&self, bin: &Bin) -> bool {
        bin.read_count as f64 >= self.min_reads && bin.total_abundance >= self.min_abundance
    }
}

/// Outcome of summarising a cluster assignment.
#[derive(Debug, Clone)]
pub struct BinSet {
    /// Retained bins, ascending by id.
    pub bins: Vec<Bin>,
    /// Number of non-noise clusters before filtering.
    pub clusters: usize,
    /// Reads labelled noise by the clustering.
    pub noise_reads: usize,
}

impl BinSet {
    pub fn dropped(&self) -> usize {
        self.clusters - self.bins.len()
    }

    /// Bin id of every matrix row, with [`NOISE`] for noise reads and reads
    /// of dropped bins.
    pub fn bin_labels(&self, n_reads: usize) -> Vec<i64> {
        let mut labels = vec![NOISE; n_reads];
        for bin in &self.bins {
            for &row in &bin.members {
                labels[row] = bin.bin_id;
            }
        }
        labels
    }
}

/// Builds one bin per non-noise label and keeps those passing `filter`.
pub fn summarize_bins(labels: &[i64], matrix: &AbundanceMatrix, filter: BinFilter) -> BinSet {
    let mut grouped: BTreeMap<i64, Bin> = BTreeMap::new();
    let mut noise_reads = 0usize;

    for (row, &label) in labels.iter().enumerate() {
        if label == NOISE {
            noise_reads += 1;
            continue;
        }
        let bin = grouped.entry(label).or_insert_with(|| Bin {
            bin_id: label,
            read_count: 0,
            total_abundance: 0.0,
            total_breadth: 0.0,
            sample_abundance: Array1::zeros(matrix.n_samples()),
            members: Vec::new(),
        });
        bin.read_count += 1;
        bin.total_abundance += matrix.total_abundance(row);
        bin.total_breadth += matrix.total_breadth(row);
        bin.sample_abundance += &matrix.profile(row);
        bin.members.push(row);
    }

    let clusters = grouped.len();
    if clusters > 0 {
        let sizes: Vec<f64> = grouped.values().map(|b| b.read_count as f64).collect();
        let data = Data::new(sizes);
        debug!(
            "Cluster sizes: median {}, max {}",
            data.median(),
            data.max()
        );
    }

    let bins: Vec<Bin> = grouped.into_values().filter(|b| filter.accepts(b)).collect();
    info!(
        "{} of {} clusters retained as bins (min_reads_bin={}, min_abund_bin={}); {} noise reads",
        bins.len(),
        clusters,
        filter.min_reads,
        filter.min_abundance,
        noise_reads
    );
    BinSet {
        bins,
        clusters,
        noise_reads,
    }
}
