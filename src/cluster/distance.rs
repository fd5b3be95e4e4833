//! Pearson-correlation dissimilarity between read abundance profiles.
//!
//! `distance(i, j) = 1 - r(i, j)`, clipped to `[0, 2]`, using the population
//! covariance/variance formula. Profiles that are constant across samples
//! have no defined correlation and follow a fixed policy:
//!
//! * two constant profiles: `0` when the constants are identical, `2` otherwise;
//! * an all-zero profile against a varying one: `2`;
//! * a flat non-zero profile against a varying one: the uncentred (cosine)
//!   correlation distance, so a flat read still groups with reads that are
//!   present at nearly the same level everywhere.

use crate::abundance::AbundanceMatrix;
use crate::config::MAX_PEARSON_DISTANCE;
use crate::utils::parallel::{par_map_indexed, CancelToken, ParallelError};
use log::debug;
use ndarray::{Array2, ArrayView1};
use statrs::statistics::Statistics;

/// Precomputed per-read quantities reused by every pair.
#[derive(Debug, Clone)]
pub struct ProfileStats {
    values: Vec<f64>,
    centered: Vec<f64>,
    centered_norm: f64,
    norm: f64,
    /// `Some(value)` when every sample holds the same value.
    constant: Option<f64>,
}

impl ProfileStats {
    pub fn from_profile(profile: ArrayView1<f64>) -> Self {
        let constant = match profile.first() {
            Some(&first) if profile.iter().all(|&v| v == first) => Some(first),
            _ => None,
        };
        // Scaled into [-1, 1] so the dot products stay finite.
        let scale = profile.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let values: Vec<f64> = if scale > 0.0 {
            profile.iter().map(|v| v / scale).collect()
        } else {
            profile.to_vec()
        };
        let mean = values.iter().mean();
        let centered: Vec<f64> = values.iter().map(|v| v - mean).collect();
        let centered_norm = dot(&centered, &centered).sqrt();
        let norm = dot(&values, &values).sqrt();
        ProfileStats {
            values,
            centered,
            centered_norm,
            norm,
            constant,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.constant.is_some()
    }
}

/// Distance between two profiles, in `[0, 2]`.
pub fn pearson_distance(a: &ProfileStats, b: &ProfileStats) -> f64 {
    let distance = match (a.constant, b.constant) {
        (Some(x), Some(y)) => {
            if x == y {
                0.0
            } else {
                MAX_PEARSON_DISTANCE
            }
        }
        (Some(c), None) | (None, Some(c)) => {
            if c == 0.0 {
                MAX_PEARSON_DISTANCE
            } else {
                1.0 - dot(&a.values, &b.values) / (a.norm * b.norm)
            }
        }
        (None, None) => {
            1.0 - dot(&a.centered, &b.centered) / (a.centered_norm * b.centered_norm)
        }
    };
    if distance.is_nan() {
        return MAX_PEARSON_DISTANCE;
    }
    distance.clamp(0.0, MAX_PEARSON_DISTANCE)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Symmetric, zero-diagonal read-by-read distance matrix.
#[derive(Debug, Clone)]
pub struct DissimilarityMatrix {
    values: Array2<f64>,
}

impl DissimilarityMatrix {
    /// Computes all pairwise distances of the matrix rows.
    ///
    /// Runs on the current rayon pool. Each row of the upper triangle is an
    /// independent task; the cancellation token is checked before each row.
    pub fn compute(matrix: &AbundanceMatrix, cancel: &CancelToken) -> Result<Self, ParallelError> {
        let n = matrix.n_reads();
        let stats = par_map_indexed(n, cancel, |i| ProfileStats::from_profile(matrix.profile(i)))?;
        let constant = stats.iter().filter(|s| s.is_constant()).count();
        debug!("{} of {} profiles have zero variance", constant, n);

        let upper = par_map_indexed(n, cancel, |i| {
            (i + 1..n)
                .map(|j| pearson_distance(&stats[i], &stats[j]))
                .collect::<Vec<f64>>()
        })?;

        let mut values = Array2::zeros((n, n));
        for (i, row) in upper.into_iter().enumerate() {
            for (offset, d) in row.into_iter().enumerate() {
                let j = i + 1 + offset;
                values[[i, j]] = d;
                values[[j, i]] = d;
            }
        }
        Ok(DissimilarityMatrix { values })
    }

    #[cfg(test)]
    pub(crate) fn from_values(values: Array2<f64>) -> Self {
        DissimilarityMatrix { values }
    }

    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[[i, j]]
    }
}
