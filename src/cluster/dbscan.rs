//! Density-based clustering over a precomputed dissimilarity matrix.
//!
//! A read's neighbourhood is every read (itself included) within `max_dist`.
//! Reads whose neighbourhood holds at least `min_samples` reads are core
//! reads; clusters grow from core reads through their neighbourhoods and
//! absorb border reads. Anything left over is noise.
//!
//! Reads are visited in ascending identifier order and neighbourhoods are
//! expanded in that same order, so cluster numbering does not depend on the
//! order of rows in the input table.

use super::distance::DissimilarityMatrix;
use crate::utils::parallel::{par_map_indexed, CancelToken, ParallelError};
use log::debug;
use std::collections::VecDeque;

/// Label of reads reachable from no core read.
pub const NOISE: i64 = -1;

const UNCLASSIFIED: i64 = -2;

/// DBSCAN parameters.
#[derive(Debug, Clone, Copy)]
pub struct Dbscan {
    pub max_dist: f64,
    pub min_samples: usize,
}

impl Dbscan {
    pub fn new(max_dist: f64, min_samples: usize) -> Self {
        Dbscan {
            max_dist,
            min_samples,
        }
    }

    /// Assigns a label to every row of `dist`.
    ///
    /// `order` lists row indices in processing order (normally ascending read
    /// identifier) and must be a permutation of `0..dist.len()`. The
    /// returned vector is indexed by row; clusters are numbered from 0 and
    /// [`NOISE`] marks unassigned reads.
    pub fn fit(
        &self,
        dist: &DissimilarityMatrix,
        order: &[usize],
        cancel: &CancelToken,
    ) -> Result<Vec<i64>, ParallelError> {
        let n = dist.len();
        debug_assert_eq!(order.len(), n);

        let mut rank = vec![0usize; n];
        for (r, &idx) in order.iter().enumerate() {
            rank[idx] = r;
        }

        let neighborhoods = par_map_indexed(n, cancel, |i| {
            let mut neighbors: Vec<usize> = (0..n).filter(|&j| dist.get(i, j) <= self.max_dist).collect();
            neighbors.sort_by_key(|&j| rank[j]);
            neighbors
        })?;
        let is_core: Vec<bool> = neighborhoods
            .iter()
            .map(|nb| nb.len() >= self.min_samples)
            .collect();
        debug!(
            "{} of {} reads are core points (max_dist={}, min_samples={})",
            is_core.iter().filter(|&&c| c).count(),
            n,
            self.max_dist,
            self.min_samples
        );

        let mut labels = vec![UNCLASSIFIED; n];
        let mut next_label: i64 = 0;

        for &seed in order {
            if labels[seed] != UNCLASSIFIED || !is_core[seed] {
                continue;
            }
            cancel.check()?;
            let label = next_label;
            next_label += 1;
            labels[seed] = label;

            let mut queue: VecDeque<usize> = neighborhoods[seed].iter().copied().collect();
            while let Some(q) = queue.pop_front() {
                if labels[q] != UNCLASSIFIED {
                    continue;
                }
                labels[q] = label;
                if is_core[q] {
                    queue.extend(
                        neighborhoods[q]
                            .iter()
                            .copied()
                            .filter(|&p| labels[p] == UNCLASSIFIED),
                    );
                }
            }
        }

        for label in labels.iter_mut() {
            if *label == UNCLASSIFIED {
                *label = NOISE;
            }
        }
        debug!("Found {} clusters", next_label);
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abundance::tests::toy_matrix;
    use crate::abundance::AbundanceMatrix;
    use ndarray::arr2;

    fn cluster(matrix: &AbundanceMatrix, max_dist: f64, min_samples: usize) -> Vec<i64> {
        let token = CancelToken::new();
        let dist = DissimilarityMatrix::compute(matrix, &token).unwrap();
        Dbscan::new(max_dist, min_samples)
            .fit(&dist, &matrix.sorted_order(), &token)
            .unwrap()
    }

    #[test]
    fn test_covarying_groups() {
        let labels = cluster(&toy_matrix(), 0.3, 1);
        assert_eq!(labels, vec![0, 0, 1, 1, 2]);
    }

    #[test]
    fn test_min_samples_one_never_produces_noise() {
        for max_dist in [0.0, 0.05, 0.3, 1.0, 2.0] {
            let labels = cluster(&toy_matrix(), max_dist, 1);
            assert!(labels.iter().all(|&l| l != NOISE));
        }
    }

    #[test]
    fn test_isolated_zero_profile_is_noise() {
        let abundance = arr2(&[
            [1.0, 2.0, 3.0],
            [2.0, 4.0, 6.1],
            [1.5, 3.0, 4.4],
            [0.0, 0.0, 0.0],
        ]);
        let reads = ["a", "b", "c", "z"].iter().map(|s| s.to_string()).collect();
        let samples = ["S1", "S2", "S3"].iter().map(|s| s.to_string()).collect();
        let matrix = AbundanceMatrix::new(abundance, reads, samples);

        let labels = cluster(&matrix, 0.1, 2);
        assert_eq!(labels[3], NOISE);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_ne!(labels[0], NOISE);
    }

    #[test]
    fn test_border_point_joins_cluster() {
        // 0, 1, 2 form a dense core; 3 only reaches 2 and is a border read;
        // 4 reaches nothing.
        let far = 1.0;
        let near = 0.05;
        let values = arr2(&[
            [0.0, near, near, far, far],
            [near, 0.0, near, far, far],
            [near, near, 0.0, near, far],
            [far, far, near, 0.0, far],
            [far, far, far, far, 0.0],
        ]);
        let dist = DissimilarityMatrix::from_values(values);
        let labels = Dbscan::new(0.1, 3)
            .fit(&dist, &[0, 1, 2, 3, 4], &CancelToken::new())
            .unwrap();
        assert_eq!(labels, vec![0, 0, 0, 0, NOISE]);
    }

    #[test]
    fn test_dense_group_and_outlier() {
        let abundance = arr2(&[
            [1.0, 2.0, 3.0, 4.0],
            [1.0, 2.0, 3.0, 4.1],
            [1.0, 2.1, 3.0, 4.0],
            [4.0, 1.0, 3.0, 1.0],
        ]);
        let reads = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let samples = ["S1", "S2", "S3", "S4"].iter().map(|s| s.to_string()).collect();
        let matrix = AbundanceMatrix::new(abundance, reads, samples);

        let labels = cluster(&matrix, 0.01, 3);
        assert_eq!(labels, vec![0, 0, 0, NOISE]);
    }

    #[test]
    fn test_membership_independent_of_row_order() {
        let original = toy_matrix();
        let permutation = [4usize, 2, 0, 3, 1];
        let abundance = ndarray::Array2::from_shape_fn((5, 3), |(r, c)| {
            original.abundance[[permutation[r], c]]
        });
        let reads = permutation
            .iter()
            .map(|&p| original.read_names[p].clone())
            .collect();
        let shuffled = AbundanceMatrix::new(abundance, reads, original.sample_names.clone());

        let a = cluster(&original, 0.3, 1);
        let b = cluster(&shuffled, 0.3, 1);
        for (row, &p) in permutation.iter().enumerate() {
            assert_eq!(b[row], a[p]);
        }
    }

    #[test]
    fn test_cancelled_fit() {
        let matrix = toy_matrix();
        let dist = DissimilarityMatrix::compute(&matrix, &CancelToken::new()).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let result = Dbscan::new(0.3, 1).fit(&dist, &matrix.sorted_order(), &token);
        assert!(result.is_err());
    }
}
