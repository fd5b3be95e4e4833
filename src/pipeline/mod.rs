//! Identify → Quantify → Cluster pipeline.
//!
//! Each stage consumes the typed output of the previous one. The Identify and
//! Quantify stages sit behind traits so that precomputed results (or other
//! implementations) can be slotted in; the Cluster stage is always
//! [`run_cluster`].

use crate::cluster::{run_cluster, ClusterInputs, ClusterOutput};
use crate::config::ClusterParams;
use crate::io::fasta::read_identify_fasta;
use crate::quantify::gather_abundance;
use crate::utils::parallel::CancelToken;
use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};

/// Reads reported by the Identify stage.
#[derive(Debug, Clone)]
pub struct IdentifyOutput {
    pub reads_fasta: PathBuf,
    pub reads: usize,
}

/// Abundance tables produced by the Quantify stage.
#[derive(Debug, Clone)]
pub struct QuantifyOutput {
    pub long_table: PathBuf,
    pub wide_table: PathBuf,
}

pub trait IdentifyStage {
    fn identify(&self) -> Result<IdentifyOutput>;
}

pub trait QuantifyStage {
    fn quantify(&self, identified: &IdentifyOutput) -> Result<QuantifyOutput>;
}

/// Uses an Identify FASTA written by an earlier run.
#[derive(Debug, Clone)]
pub struct PrecomputedIdentify {
    pub reads_fasta: PathBuf,
}

impl IdentifyStage for PrecomputedIdentify {
    fn identify(&self) -> Result<IdentifyOutput> {
        let reads = read_identify_fasta(&self.reads_fasta)
            .with_context(|| format!("Invalid Identify output {}", self.reads_fasta.display()))?;
        Ok(IdentifyOutput {
            reads_fasta: self.reads_fasta.clone(),
            reads: reads.len(),
        })
    }
}

/// Builds the abundance tables from per-sample quantification files.
#[derive(Debug, Clone)]
pub struct GatherQuantify {
    pub quant_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl QuantifyStage for GatherQuantify {
    fn quantify(&self, identified: &IdentifyOutput) -> Result<QuantifyOutput> {
        let tables = gather_abundance(&identified.reads_fasta, &self.quant_dir, &self.output_dir)?;
        Ok(QuantifyOutput {
            long_table: tables.long_table,
            wide_table: tables.wide_table,
        })
    }
}

/// Runs the Cluster stage on the outputs of the two earlier stages.
pub fn run_cluster_stage(
    quantified: &QuantifyOutput,
    identified: &IdentifyOutput,
    params: &ClusterParams,
    output_dir: &Path,
    cancel: &CancelToken,
) -> Result<ClusterOutput> {
    let inputs = ClusterInputs {
        long_table: quantified.long_table.clone(),
        wide_table: quantified.wide_table.clone(),
        identify_fasta: identified.reads_fasta.clone(),
    };
    run_cluster(&inputs, params, output_dir, cancel)
}

/// Outputs of every stage of a full run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub identify: IdentifyOutput,
    pub quantify: QuantifyOutput,
    pub cluster: ClusterOutput,
}

pub struct Pipeline<I, Q> {
    pub identify: I,
    pub quantify: Q,
    pub params: ClusterParams,
    pub output_dir: PathBuf,
}

impl<I: IdentifyStage, Q: QuantifyStage> Pipeline<I, Q> {
    pub fn new(identify: I, quantify: Q, params: ClusterParams, output_dir: PathBuf) -> Self {
        Pipeline {
            identify,
            quantify,
            params,
            output_dir,
        }
    }

    pub fn run(&self, cancel: &CancelToken) -> Result<PipelineOutput> {
        // Fail on bad parameters before the earlier stages do any work.
        self.params.validate()?;

        info!("Identify stage");
        let identify = self.identify.identify()?;
        info!("{} reads identified in {}", identify.reads, identify.reads_fasta.display());

        info!("Quantify stage");
        let quantify = self.quantify.quantify(&identify)?;

        info!("Cluster stage");
        let cluster = run_cluster_stage(&quantify, &identify, &self.params, &self.output_dir, cancel)?;
        Ok(PipelineOutput {
            identify,
            quantify,
            cluster,
        })
    }
}
