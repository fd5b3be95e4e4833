//! Gathering per-sample quantification files into the Cluster stage tables.
//!
//! Each sample's quantification is a header-less `*-rpkm.tsv` (optionally
//! gzipped) file with `read_id, breadth, abundance, sample` rows. The gather
//! step merges them into:
//!
//! * `abundance_long.tsv`: every row of every file, restricted to Identify reads;
//! * `abundance_wide.tsv`: one abundance column per sample;
//! * `breadth_wide.tsv`: the same shape holding breadth values.

use crate::abundance::loader::parse_long_record;
use crate::abundance::{AbundanceRecord, LoadError};
use crate::io::fasta::{read_identify_fasta, IdentifiedReads};
use crate::io::format_value;
use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use flate2::read::MultiGzDecoder;
use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LONG_TABLE_FILE: &str = "abundance_long.tsv";
pub const WIDE_TABLE_FILE: &str = "abundance_wide.tsv";
pub const BREADTH_TABLE_FILE: &str = "breadth_wide.tsv";

const QUANT_SUFFIX: &str = "-rpkm.tsv";
const QUANT_GZ_SUFFIX: &str = "-rpkm.tsv.gz";

#[derive(Error, Debug)]
pub enum QuantifyError {
    #[error("no quantification files (*-rpkm.tsv) found under {0}")]
    NoFiles(PathBuf),

    #[error("sample '{sample}' is reported by both {first} and {second}")]
    DuplicateSample {
        sample: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Rows of one sample's quantification file.
#[derive(Debug, Clone)]
pub struct SampleQuantification {
    pub path: PathBuf,
    pub sample: String,
    pub records: Vec<AbundanceRecord>,
}

/// Tables written by [`gather_abundance`].
#[derive(Debug, Clone)]
pub struct GatheredTables {
    pub long_table: PathBuf,
    pub wide_table: PathBuf,
    pub breadth_table: PathBuf,
    pub samples: Vec<String>,
    pub reads: usize,
}

/// Finds quantification files under `dir`, recursively, sorted by path.
pub fn find_quantification_files(dir: &Path) -> Result<Vec<PathBuf>, QuantifyError> {
    let mut files = Vec::new();
    collect_quantification_files(dir, &mut files).map_err(|source| QuantifyError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    files.sort();
    if files.is_empty() {
        return Err(QuantifyError::NoFiles(dir.to_path_buf()));
    }
    debug!("Found {} quantification files under {}", files.len(), dir.display());
    Ok(files)
}

fn collect_quantification_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_quantification_files(&path, files)?;
        } else if is_quantification_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

fn is_quantification_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |name| {
            name.ends_with(QUANT_SUFFIX) || name.ends_with(QUANT_GZ_SUFFIX)
        })
}

fn open_table(path: &Path) -> Result<Box<dyn Read>, QuantifyError> {
    let file = File::open(path).map_err(|source| QuantifyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let is_gz = path.extension().map_or(false, |ext| ext == "gz");
    if is_gz {
        Ok(Box::new(MultiGzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Reads one quantification file. Returns `None` for a file with no rows.
///
/// The sample name comes from the fourth column of the first row and is
/// applied to every row of the file.
pub fn read_quantification_file(path: &Path) -> Result<Option<SampleQuantification>, QuantifyError> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_reader(open_table(path)?);

    let mut sample: Option<String> = None;
    let mut records = Vec::new();
    let mut seen = HashSet::new();
    for result in rdr.records() {
        let record = result.map_err(|source| LoadError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let mut parsed = parse_long_record(&record, path)?;
        let sample = sample.get_or_insert_with(|| parsed.sample.clone());
        if parsed.sample != *sample {
            debug!(
                "{}: row for '{}' names sample '{}', using '{}'",
                path.display(),
                parsed.read_id,
                parsed.sample,
                sample
            );
            parsed.sample = sample.clone();
        }
        if !seen.insert(parsed.read_id.clone()) {
            return Err(LoadError::DuplicateRecord {
                path: path.to_path_buf(),
                read_id: parsed.read_id,
                sample: parsed.sample,
            }
            .into());
        }
        records.push(parsed);
    }

    Ok(sample.map(|sample| SampleQuantification {
        path: path.to_path_buf(),
        sample,
        records,
    }))
}

/// Reads every quantification file under `quant_dir`, skipping empty ones.
pub fn read_samples(quant_dir: &Path) -> Result<Vec<SampleQuantification>, QuantifyError> {
    let mut samples: IndexMap<String, SampleQuantification> = IndexMap::new();
    for path in find_quantification_files(quant_dir)? {
        let Some(quant) = read_quantification_file(&path)? else {
            warn!("Skipping empty quantification file {}", path.display());
            continue;
        };
        if let Some(previous) = samples.get(&quant.sample) {
            return Err(QuantifyError::DuplicateSample {
                sample: quant.sample,
                first: previous.path.clone(),
                second: path,
            });
        }
        samples.insert(quant.sample.clone(), quant);
    }
    if samples.is_empty() {
        return Err(QuantifyError::NoFiles(quant_dir.to_path_buf()));
    }
    Ok(samples.into_values().collect())
}

/// Merges the quantification files under `quant_dir` into the long, wide
/// and breadth tables in `output_dir`.
pub fn gather_abundance(identify_fasta: &Path, quant_dir: &Path, output_dir: &Path) -> Result<GatheredTables> {
    let reads = read_identify_fasta(identify_fasta)?;
    let samples = read_samples(quant_dir)?;
    info!(
        "Gathering {} samples for {} reads: {}",
        samples.len(),
        reads.len(),
        samples.iter().map(|s| s.sample.as_str()).join(", ")
    );

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;
    let tables = GatheredTables {
        long_table: output_dir.join(LONG_TABLE_FILE),
        wide_table: output_dir.join(WIDE_TABLE_FILE),
        breadth_table: output_dir.join(BREADTH_TABLE_FILE),
        samples: samples.iter().map(|s| s.sample.clone()).collect(),
        reads: reads.len(),
    };

    write_long_table(&tables.long_table, &reads, &samples)?;
    write_wide_table(&tables.wide_table, &reads, &samples, |r| r.abundance)?;
    write_wide_table(&tables.breadth_table, &reads, &samples, |r| r.breadth)?;

    info!("Abundance table: {}", tables.long_table.display());
    info!("Wide abundance table: {}", tables.wide_table.display());
    Ok(tables)
}

fn write_long_table(path: &Path, reads: &IdentifiedReads, samples: &[SampleQuantification]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut skipped = 0usize;
    for record in samples.iter().flat_map(|s| &s.records) {
        if !reads.contains_key(&record.read_id) {
            skipped += 1;
            continue;
        }
        writer.write_record([
            record.read_id.clone(),
            format_value(record.breadth),
            format_value(record.abundance),
            record.sample.clone(),
        ])?;
    }
    writer.flush()?;
    if skipped > 0 {
        debug!("{} quantification rows name reads absent from the Identify FASTA", skipped);
    }
    Ok(())
}

fn write_wide_table<F>(
    path: &Path,
    reads: &IdentifiedReads,
    samples: &[SampleQuantification],
    value: F,
) -> Result<()>
where
    F: Fn(&AbundanceRecord) -> f64,
{
    let by_sample: Vec<HashMap<&str, &AbundanceRecord>> = samples
        .iter()
        .map(|s| s.records.iter().map(|r| (r.read_id.as_str(), r)).collect())
        .collect();

    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut header = vec!["read_id".to_string()];
    header.extend(samples.iter().map(|s| s.sample.clone()));
    writer.write_record(&header)?;

    for read_id in reads.keys() {
        let mut row = Vec::with_capacity(samples.len() + 1);
        row.push(read_id.clone());
        row.extend(
            by_sample
                .iter()
                .map(|records| records.get(read_id.as_str()).map_or(0.0, |r| value(r)))
                .map(format_value),
        );
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}
