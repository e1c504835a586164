pub mod config;
pub mod constants;
pub mod domain;
pub mod checkpoint;
pub mod output;
pub mod classifier;
pub mod chunk;
pub mod processor;


pub use config::{CountryRule, LookupConfig, SorterConfig};
pub use processor::SortingPipeline;
pub use checkpoint::{CheckpointStore, ProcessingState};

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct SortStats {
    pub bucket_counts: BTreeMap<String, u64>,
    pub total_processed: u64,
    pub invalid_emails: usize,
    pub other_emails: usize,
    pub static_rule_hits: u64,
    pub remote_lookups: u64,
    pub cache_hits: u64,
    pub network_calls: u64,
    pub lookup_failures: u64,
    pub cached_domains: u64,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub processing_time_ms: u64,
    pub resumed: bool,
    pub completed: bool,
}

pub async fn sort_emails(input_files: &[PathBuf], config: SorterConfig) -> Result<SortStats> {
    let pipeline = SortingPipeline::new(config)?;
    pipeline.sort_emails(input_files).await
}
