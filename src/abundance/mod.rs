//! Reads-by-samples abundance data.
//!
//! Rows are reads (identified by the Identify stage), columns are the samples
//! of the cohort in the order of the wide-format table header. Abundance and
//! breadth share the same row and column indexing.

pub mod loader;

pub use loader::{load_abundance, LoadError};

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One row of the long-format abundance table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbundanceRecord {
    pub read_id: String,
    pub breadth: f64,
    pub abundance: f64,
    pub sample: String,
}

/// Abundance (and breadth) matrix keyed by read identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbundanceMatrix {
    /// Per-sample abundance values (reads x samples).
    pub abundance: Array2<f64>,
    /// Per-sample breadth values (reads x samples).
    pub breadth: Array2<f64>,

    pub read_names: Vec<String>,
    pub read_map: HashMap<String, usize>,

    pub sample_names: Vec<String>,
    pub sample_map: HashMap<String, usize>,
}

impl AbundanceMatrix {
    /// Builds a matrix with zero breadth. Row and column names must match the
    /// dimensions of `abundance`.
    pub fn new(abundance: Array2<f64>, read_names: Vec<String>, sample_names: Vec<String>) -> Self {
        debug_assert_eq!(abundance.nrows(), read_names.len());
        debug_assert_eq!(abundance.ncols(), sample_names.len());
        let breadth = Array2::zeros(abundance.dim());
        let read_map = index_names(&read_names);
        let sample_map = index_names(&sample_names);
        AbundanceMatrix {
            abundance,
            breadth,
            read_names,
            read_map,
            sample_names,
            sample_map,
        }
    }

    pub fn n_reads(&self) -> usize {
        self.abundance.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.abundance.ncols()
    }

    /// Abundance profile of the read at `row`.
    pub fn profile(&self, row: usize) -> ArrayView1<f64> {
        self.abundance.row(row)
    }

    /// Sum of all abundance values of one read.
    pub fn total_abundance(&self, row: usize) -> f64 {
        self.abundance.row(row).sum()
    }

    /// Sum of all breadth values of one read.
    pub fn total_breadth(&self, row: usize) -> f64 {
        self.breadth.row(row).sum()
    }

    /// Row indices ordered by ascending read identifier.
    pub fn sorted_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.n_reads()).collect();
        order.sort_by(|&a, &b| self.read_names[a].cmp(&self.read_names[b]));
        order
    }
}

fn index_names(names: &[String]) -> HashMap<String, usize> {
    names
        .iter()
        .enumerate()
        .map(|(i, n)| (n.clone(), i))
        .collect()
}
