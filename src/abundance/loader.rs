//! Loading the Quantify-stage tables into an [`AbundanceMatrix`].
//!
//! Two tables describe the same quantification:
//! * the wide table (header row, `read_id` then one column per sample) gives
//!   the abundance profiles and fixes the sample-column order;
//! * the long table (no header, `read_id, breadth, abundance, sample` and
//!   possibly more columns) supplies the breadth values.
//!
//! Every read of the wide table must also be present in the Identify FASTA.

use super::{AbundanceMatrix, AbundanceRecord};
use crate::io::fasta::{read_identify_fasta, IdentifiedReads};
use csv::{ReaderBuilder, StringRecord};
use log::{debug, info, warn};
use ndarray::Array2;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Minimum number of columns of a long-format row.
pub const LONG_TABLE_COLUMNS: usize = 4;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path}:{line}: expected {expected} columns, found {found}")]
    MalformedRow {
        path: PathBuf,
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("{path}:{line}: invalid numeric value '{value}'")]
    InvalidNumber {
        path: PathBuf,
        line: u64,
        value: String,
    },

    #[error("{path}: read '{read_id}' appears more than once")]
    DuplicateRead { path: PathBuf, read_id: String },

    #[error("{path}: read '{read_id}' has more than one row for sample '{sample}'")]
    DuplicateRecord {
        path: PathBuf,
        read_id: String,
        sample: String,
    },

    #[error("{path}: sample column '{sample}' appears more than once")]
    DuplicateSample { path: PathBuf, sample: String },

    #[error("{path}: abundance matrix is empty, nothing to cluster")]
    EmptyMatrix { path: PathBuf },

    #[error("{long} and {wide} share no read identifiers")]
    NoOverlap { long: PathBuf, wide: PathBuf },

    #[error("read '{read_id}' of the abundance table is absent from {path} ({missing} missing in total)")]
    MissingFromIdentify {
        read_id: String,
        path: PathBuf,
        missing: usize,
    },

    #[error("failed to read sequences from {path}: {message}")]
    Fasta { path: PathBuf, message: String },
}

/// Everything the Cluster stage needs from its input files.
#[derive(Debug)]
pub struct LoadedAbundance {
    pub matrix: AbundanceMatrix,
    pub reads: IdentifiedReads,
}

/// Loads the long and wide tables and checks them against the Identify FASTA.
pub fn load_abundance(
    long_table: &Path,
    wide_table: &Path,
    identify_fasta: &Path,
) -> Result<LoadedAbundance, LoadError> {
    let mut matrix = load_wide_table(wide_table)?;
    let reads = read_identify_fasta(identify_fasta)?;
    check_against_identify(&matrix, &reads, identify_fasta)?;

    let records = load_long_table(long_table)?;
    apply_breadth(&mut matrix, &records, long_table, wide_table)?;

    info!(
        "Loaded abundance matrix with {} reads x {} samples",
        matrix.n_reads(),
        matrix.n_samples()
    );
    Ok(LoadedAbundance { matrix, reads })
}

/// Parses the wide-format table into a matrix with zero breadth.
pub fn load_wide_table(path: &Path) -> Result<AbundanceMatrix, LoadError> {
    let csv_error = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(csv_error)?;

    let headers = rdr.headers().map_err(csv_error)?.clone();
    if headers.len() < 2 {
        return Err(LoadError::MalformedRow {
            path: path.to_path_buf(),
            line: 1,
            expected: 2,
            found: headers.len(),
        });
    }
    let sample_names: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();
    let mut seen_samples = HashSet::new();
    for sample in &sample_names {
        if !seen_samples.insert(sample.as_str()) {
            return Err(LoadError::DuplicateSample {
                path: path.to_path_buf(),
                sample: sample.clone(),
            });
        }
    }

    let n_samples = sample_names.len();
    let mut read_names = Vec::new();
    let mut seen_reads = HashSet::new();
    let mut values = Vec::new();

    for result in rdr.records() {
        let record = result.map_err(csv_error)?;
        let line = line_of(&record);
        if record.len() != n_samples + 1 {
            return Err(LoadError::MalformedRow {
                path: path.to_path_buf(),
                line,
                expected: n_samples + 1,
                found: record.len(),
            });
        }
        let read_id = record[0].trim().to_string();
        if read_id.is_empty() {
            warn!("{}:{}: skipping row with empty read identifier", path.display(), line);
            continue;
        }
        if !seen_reads.insert(read_id.clone()) {
            return Err(LoadError::DuplicateRead {
                path: path.to_path_buf(),
                read_id,
            });
        }
        for field in record.iter().skip(1) {
            values.push(parse_value(field, path, line)?);
        }
        read_names.push(read_id);
    }

    if read_names.is_empty() {
        return Err(LoadError::EmptyMatrix {
            path: path.to_path_buf(),
        });
    }

    let abundance = Array2::from_shape_vec((read_names.len(), n_samples), values)
        .map_err(|_| LoadError::EmptyMatrix {
            path: path.to_path_buf(),
        })?;
    debug!(
        "Wide table {} has {} reads and samples {:?}",
        path.display(),
        read_names.len(),
        sample_names
    );
    Ok(AbundanceMatrix::new(abundance, read_names, sample_names))
}

/// Parses the header-less long-format table.
pub fn load_long_table(path: &Path) -> Result<Vec<AbundanceRecord>, LoadError> {
    let csv_error = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(csv_error)?;

    let mut records = Vec::new();
    let mut seen = HashSet::new();
    for result in rdr.records() {
        let record = result.map_err(csv_error)?;
        let parsed = parse_long_record(&record, path)?;
        if !seen.insert((parsed.read_id.clone(), parsed.sample.clone())) {
            return Err(LoadError::DuplicateRecord {
                path: path.to_path_buf(),
                read_id: parsed.read_id,
                sample: parsed.sample,
            });
        }
        records.push(parsed);
    }
    debug!("Long table {} has {} rows", path.display(), records.len());
    Ok(records)
}

/// Parses one `read_id, breadth, abundance, sample` row; extra columns are
/// ignored.
pub(crate) fn parse_long_record(record: &StringRecord, path: &Path) -> Result<AbundanceRecord, LoadError> {
    let line = line_of(record);
    if record.len() < LONG_TABLE_COLUMNS {
        return Err(LoadError::MalformedRow {
            path: path.to_path_buf(),
            line,
            expected: LONG_TABLE_COLUMNS,
            found: record.len(),
        });
    }
    Ok(AbundanceRecord {
        read_id: record[0].trim().to_string(),
        breadth: parse_value(&record[1], path, line)?,
        abundance: parse_value(&record[2], path, line)?,
        sample: record[3].trim().to_string(),
    })
}

/// Every read of the matrix must have been reported by the Identify stage.
pub fn check_against_identify(
    matrix: &AbundanceMatrix,
    reads: &IdentifiedReads,
    identify_fasta: &Path,
) -> Result<(), LoadError> {
    let missing: Vec<&String> = matrix
        .read_names
        .iter()
        .filter(|r| !reads.contains_key(r.as_str()))
        .collect();
    match missing.first() {
        None => Ok(()),
        Some(first) => Err(LoadError::MissingFromIdentify {
            read_id: (*first).clone(),
            path: identify_fasta.to_path_buf(),
            missing: missing.len(),
        }),
    }
}

/// Fills the breadth matrix from long-format records.
fn apply_breadth(
    matrix: &mut AbundanceMatrix,
    records: &[AbundanceRecord],
    long_table: &Path,
    wide_table: &Path,
) -> Result<(), LoadError> {
    let mut overlapping = 0usize;
    let mut skipped: HashMap<&str, usize> = HashMap::new();

    for record in records {
        let row = matrix.read_map.get(&record.read_id).copied();
        let col = matrix.sample_map.get(&record.sample).copied();
        match (row, col) {
            (Some(r), Some(c)) => {
                matrix.breadth[[r, c]] = record.breadth;
                overlapping += 1;
            }
            (None, _) => *skipped.entry("read").or_default() += 1,
            (_, None) => *skipped.entry("sample").or_default() += 1,
        }
    }

    for (what, count) in &skipped {
        warn!(
            "{}: skipped {} rows whose {} is absent from {}",
            long_table.display(),
            count,
            what,
            wide_table.display()
        );
    }
    if overlapping == 0 {
        return Err(LoadError::NoOverlap {
            long: long_table.to_path_buf(),
            wide: wide_table.to_path_buf(),
        });
    }
    Ok(())
}

fn parse_value(field: &str, path: &Path, line: u64) -> Result<f64, LoadError> {
    let trimmed = field.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("na") || trimmed.eq_ignore_ascii_case("nan") {
        return Ok(0.0);
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(LoadError::InvalidNumber {
            path: path.to_path_buf(),
            line,
            value: trimmed.to_string(),
        }),
    }
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map_or(0, |p| p.line())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const WIDE: &str = "read_id\tS1\tS2\tS3\n\
r1\t10\t10\t10\n\
r2\t9\t11\t10\n\
r3\t0\tNA\t\n";

    const LONG: &str = "r1\t0.5\t10\tS1\n\
r1\t0.6\t10\tS2\n\
r2\t0.9\t11\tS2\n\
r3\t0\t0\tS3\n\
r9\t1.0\t5\tS1\n";

    const FASTA: &str = ">r1\nACGTACGT\n>r2\nACG\n>r3\nA\n>r4\nAC\n";

    fn write_inputs(dir: &Path, wide: &str, long: &str, fasta: &str) -> (PathBuf, PathBuf, PathBuf) {
        let wide_path = dir.join("abund_wide.tsv");
        let long_path = dir.join("abund.tsv");
        let fasta_path = dir.join("identify.fasta");
        fs::write(&wide_path, wide).unwrap();
        fs::write(&long_path, long).unwrap();
        fs::write(&fasta_path, fasta).unwrap();
        (long_path, wide_path, fasta_path)
    }

    #[test]
    fn test_load_abundance() {
        let dir = tempdir().unwrap();
        let (long, wide, fasta) = write_inputs(dir.path(), WIDE, LONG, FASTA);

        let loaded = load_abundance(&long, &wide, &fasta).unwrap();
        let matrix = &loaded.matrix;
        assert_eq!(matrix.n_reads(), 3);
        assert_eq!(matrix.sample_names, vec!["S1", "S2", "S3"]);
        assert_eq!(matrix.profile(matrix.read_map["r2"]).to_vec(), vec![9.0, 11.0, 10.0]);
        // missing values read as zero
        assert_eq!(matrix.profile(matrix.read_map["r3"]).to_vec(), vec![0.0, 0.0, 0.0]);
        assert_eq!(matrix.breadth[[0, 0]], 0.5);
        assert_eq!(matrix.breadth[[0, 1]], 0.6);
        assert_eq!(matrix.breadth[[0, 2]], 0.0);
        assert_eq!(matrix.breadth[[1, 1]], 0.9);
        assert_eq!(loaded.reads["r1"].length, 8);
    }

    #[test]
    fn test_read_missing_from_identify() {
        let dir = tempdir().unwrap();
        let (long, wide, fasta) = write_inputs(dir.path(), WIDE, LONG, ">r1\nACGT\n>r2\nAC\n");

        match load_abundance(&long, &wide, &fasta) {
            Err(LoadError::MissingFromIdentify { read_id, missing, .. }) => {
                assert_eq!(read_id, "r3");
                assert_eq!(missing, 1);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_wide_row() {
        let dir = tempdir().unwrap();
        let wide = "read_id\tS1\tS2\nr1\t1\t2\nr2\t3\n";
        let (long, wide, fasta) = write_inputs(dir.path(), wide, LONG, FASTA);

        match load_abundance(&long, &wide, &fasta) {
            Err(LoadError::MalformedRow { line, expected, found, .. }) => {
                assert_eq!(line, 3);
                assert_eq!(expected, 3);
                assert_eq!(found, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_long_row() {
        let dir = tempdir().unwrap();
        let (long, wide, fasta) = write_inputs(dir.path(), WIDE, "r1\t0.5\t10\n", FASTA);
        assert!(matches!(
            load_abundance(&long, &wide, &fasta),
            Err(LoadError::MalformedRow { expected: 4, found: 3, .. })
        ));
    }

    #[test]
    fn test_duplicate_read_in_wide_table() {
        let dir = tempdir().unwrap();
        let wide = "read_id\tS1\nr1\t1\nr1\t2\n";
        let (long, wide, fasta) = write_inputs(dir.path(), wide, LONG, FASTA);
        assert!(matches!(
            load_abundance(&long, &wide, &fasta),
            Err(LoadError::DuplicateRead { .. })
        ));
    }

    #[test]
    fn test_duplicate_sample_record_in_long_table() {
        let dir = tempdir().unwrap();
        let long = "r1\t0.5\t10\tS1\nr1\t0.7\t12\tS1\n";
        let (long, wide, fasta) = write_inputs(dir.path(), WIDE, long, FASTA);
        assert!(matches!(
            load_abundance(&long, &wide, &fasta),
            Err(LoadError::DuplicateRecord { .. })
        ));
    }

    #[test]
    fn test_empty_matrix() {
        let dir = tempdir().unwrap();
        let (long, wide, fasta) = write_inputs(dir.path(), "read_id\tS1\tS2\n", LONG, FASTA);
        assert!(matches!(
            load_abundance(&long, &wide, &fasta),
            Err(LoadError::EmptyMatrix { .. })
        ));
    }

    #[test]
    fn test_no_overlap() {
        let dir = tempdir().unwrap();
        let (long, wide, fasta) = write_inputs(dir.path(), WIDE, "r9\t1\t1\tS1\n", FASTA);
        assert!(matches!(
            load_abundance(&long, &wide, &fasta),
            Err(LoadError::NoOverlap { .. })
        ));
    }

    #[test]
    fn test_invalid_number() {
        let dir = tempdir().unwrap();
        let wide = "read_id\tS1\nr1\tabc\n";
        let (long, wide, fasta) = write_inputs(dir.path(), wide, LONG, FASTA);
        match load_abundance(&long, &wide, &fasta) {
            Err(LoadError::InvalidNumber { value, line, .. }) => {
                assert_eq!(value, "abc");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
