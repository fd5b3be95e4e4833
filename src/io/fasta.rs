//! Reading the Identify-stage FASTA.
//!
//! The Identify stage writes the candidate reads it found as a (possibly
//! compressed) FASTA file. Only identifiers and lengths are kept; the
//! clustering engine never looks at residues.

use crate::abundance::LoadError;
use indexmap::IndexMap;
use log::{debug, info, warn};
use needletail::parse_fastx_file;
use std::path::Path;

/// Metadata of a read reported by the Identify stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadInfo {
    /// Sequence length in residues.
    pub length: usize,
}

/// Reads of the Identify output, in file order.
pub type IdentifiedReads = IndexMap<String, ReadInfo>;

/// Loads identifiers and lengths from an Identify FASTA (plain or gzipped).
///
/// The identifier is the header text up to the first whitespace. Repeated
/// identifiers keep their first record.
pub fn read_identify_fasta(path: &Path) -> Result<IdentifiedReads, LoadError> {
    let fasta_error = |message: String| LoadError::Fasta {
        path: path.to_path_buf(),
        message,
    };

    let mut reader = parse_fastx_file(path).map_err(|e| fasta_error(e.to_string()))?;
    let mut reads = IdentifiedReads::new();
    let mut duplicates = 0usize;

    while let Some(record) = reader.next() {
        let record = record.map_err(|e| fasta_error(e.to_string()))?;
        let header = String::from_utf8_lossy(record.id()).into_owned();
        let read_id = header.split_whitespace().next().unwrap_or_default().to_string();
        if read_id.is_empty() {
            return Err(fasta_error("record with an empty identifier".to_string()));
        }
        let info = ReadInfo {
            length: record.num_bases(),
        };
        if reads.contains_key(&read_id) {
            duplicates += 1;
            debug!("Duplicate identifier {} in {}", read_id, path.display());
            continue;
        }
        reads.insert(read_id, info);
    }

    if duplicates > 0 {
        warn!(
            "{} duplicate read identifiers ignored in {}",
            duplicates,
            path.display()
        );
    }
    if reads.is_empty() {
        return Err(fasta_error("no sequences found".to_string()));
    }
    info!("Read {} identified reads from {}", reads.len(), path.display());
    Ok(reads)
}
