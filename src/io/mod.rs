//! Input/Output operations module.
//!
//! Reads the Identify FASTA and writes the Cluster stage tables. Every table
//! is tab-delimited with a header row and keeps the sample-column order of
//! the wide-format input.

pub mod fasta;

use crate::abundance::AbundanceMatrix;
use crate::cluster::{ClusterReport, ClusterResult};
use anyhow::{Context, Result};
use csv::WriterBuilder;
use fasta::IdentifiedReads;
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const SUMMARY_FILE: &str = "cluster_summary.tsv";
pub const DETAIL_FILE: &str = "cluster_detail.tsv";
pub const BIN_PROFILES_FILE: &str = "bin_profiles.tsv";
pub const REPORT_FILE: &str = "cluster_run.json";

/// Marker written in place of a bin id for reads outside every retained bin.
pub const NOISE_MARKER: &str = "-1";

/// Locations of the Cluster stage outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub summary: PathBuf,
    pub detail: PathBuf,
    pub bin_profiles: PathBuf,
    pub report: PathBuf,
}

impl OutputPaths {
    pub fn in_dir(dir: &Path) -> Self {
        OutputPaths {
            summary: dir.join(SUMMARY_FILE),
            detail: dir.join(DETAIL_FILE),
            bin_profiles: dir.join(BIN_PROFILES_FILE),
            report: dir.join(REPORT_FILE),
        }
    }
}

#[derive(Debug, Serialize)]
struct BinSummaryRow {
    bin_id: i64,
    read_count: usize,
    total_abundance: f64,
    total_breadth: f64,
}

/// Output files written to temporary siblings and moved into place together.
struct StagedFiles {
    staged: Vec<(NamedTempFile, PathBuf)>,
}

impl StagedFiles {
    fn new() -> Self {
        StagedFiles { staged: Vec::new() }
    }

    /// Writes `target`'s content into a temporary file in the same directory.
    fn stage<F>(&mut self, target: &Path, write: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Write) -> Result<()>,
    {
        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create output file in {}", dir.display()))?;
        write(tmp.as_file_mut()).with_context(|| format!("Failed to write {}", target.display()))?;
        self.staged.push((tmp, target.to_path_buf()));
        Ok(())
    }

    /// Moves every staged file into place. If one move fails, the files
    /// already moved are removed again.
    fn persist(self) -> Result<()> {
        let mut persisted: Vec<PathBuf> = Vec::with_capacity(self.staged.len());
        for (tmp, target) in self.staged {
            if let Err(e) = tmp.persist(&target) {
                for path in &persisted {
                    if let Err(err) = fs::remove_file(path) {
                        warn!("Failed to remove {}: {}", path.display(), err);
                    }
                }
                return Err(e.error).with_context(|| format!("Failed to write {}", target.display()));
            }
            debug!("Wrote {}", target.display());
            persisted.push(target);
        }
        Ok(())
    }
}

/// Writes the summary, detail, bin-profile and report files.
pub fn write_cluster_outputs(
    paths: &OutputPaths,
    matrix: &AbundanceMatrix,
    reads: &IdentifiedReads,
    result: &ClusterResult,
    report: &ClusterReport,
) -> Result<()> {
    let mut files = StagedFiles::new();
    files.stage(&paths.summary, |w| write_summary(w, result))?;
    files.stage(&paths.detail, |w| write_detail(w, matrix, reads, result))?;
    files.stage(&paths.bin_profiles, |w| write_bin_profiles(w, matrix, result))?;
    files.stage(&paths.report, |w| {
        serde_json::to_writer_pretty(&mut *w, report)?;
        writeln!(w)?;
        Ok(())
    })?;
    files.persist()?;

    info!("Cluster summary file: {}", paths.summary.display());
    info!("Cluster detail file: {}", paths.detail.display());
    Ok(())
}

/// One row per retained bin, ascending bin id.
pub fn write_summary(out: &mut dyn Write, result: &ClusterResult) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(out);
    writer.write_record(["bin_id", "read_count", "total_abundance", "total_breadth"])?;
    for bin in &result.bins.bins {
        writer.serialize(BinSummaryRow {
            bin_id: bin.bin_id,
            read_count: bin.read_count,
            total_abundance: bin.total_abundance,
            total_breadth: bin.total_breadth,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// One row per read, in wide-table order.
pub fn write_detail(
    out: &mut dyn Write,
    matrix: &AbundanceMatrix,
    reads: &IdentifiedReads,
    result: &ClusterResult,
) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(out);

    let mut header = vec![
        "read_id".to_string(),
        "bin_id".to_string(),
        "cluster".to_string(),
        "length".to_string(),
    ];
    header.extend(matrix.sample_names.iter().cloned());
    writer.write_record(&header)?;

    let bin_labels = result.bin_labels();
    for (row, read_id) in matrix.read_names.iter().enumerate() {
        let mut record = Vec::with_capacity(matrix.n_samples() + 4);
        record.push(read_id.clone());
        record.push(format_label(bin_labels[row]));
        record.push(result.labels[row].to_string());
        record.push(
            reads
                .get(read_id)
                .map_or_else(|| "NA".to_string(), |info| info.length.to_string()),
        );
        record.extend(matrix.profile(row).iter().map(|&v| format_value(v)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Per-sample summed abundance of each retained bin.
pub fn write_bin_profiles(
    out: &mut dyn Write,
    matrix: &AbundanceMatrix,
    result: &ClusterResult,
) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(out);

    let mut header = vec!["bin_id".to_string()];
    header.extend(matrix.sample_names.iter().cloned());
    writer.write_record(&header)?;

    for bin in &result.bins.bins {
        let mut record = vec![bin.bin_id.to_string()];
        record.extend(bin.sample_abundance.iter().map(|&v| format_value(v)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn format_label(label: i64) -> String {
    if label < 0 {
        NOISE_MARKER.to_string()
    } else {
        label.to_string()
    }
}

/// Formats a float the way the csv serializer does (`10.0`, not `10`).
pub(crate) fn format_value(value: f64) -> String {
    format!("{:?}", value)
}
