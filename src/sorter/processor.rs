use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::lookup::{CachedCountryResolver, CountryLookup, HttpCountryClient};
use crate::sorter::checkpoint::{CheckpointStore, ProcessingState};
use crate::sorter::chunk::ChunkProcessor;
use crate::sorter::classifier::EmailClassifier;
use crate::sorter::config::SorterConfig;
use crate::sorter::domain::CountryTable;
use crate::sorter::output::OutputSink;
use crate::sorter::SortStats;
use crate::utils::{format_bytes, format_duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    Finished,
    Interrupted,
}

#[derive(Debug, Default)]
struct FileTally {
    processed: usize,
    skipped: usize,
}

/// Drives a full sorting run: resume, per-file chunking, final checkpoint
/// handling and the summary.
pub struct SortingPipeline {
    config: SorterConfig,
    shutdown_flag: Arc<AtomicBool>,
}

impl SortingPipeline {
    pub fn new(config: SorterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The run stops at the next chunk boundary once the flag is set and
    /// leaves a checkpoint behind.
    pub fn with_shutdown_signal(mut self, shutdown_flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = shutdown_flag;
        self
    }

    pub fn config(&self) -> &SorterConfig {
        &self.config
    }

    pub fn checkpoint_store(&self) -> CheckpointStore {
        CheckpointStore::new(&self.config.state_directory)
    }

    /// Sorts `input_files` in the given order, looking up unknown domains over
    /// HTTP when remote lookups are enabled.
    pub async fn sort_emails(&self, input_files: &[PathBuf]) -> Result<SortStats> {
        let client = if self.config.use_remote_lookup {
            Some(HttpCountryClient::new(&self.config.lookup)?)
        } else {
            None
        };
        self.run(input_files, client).await
    }

    /// Same as [`SortingPipeline::sort_emails`] with a caller supplied lookup.
    pub async fn sort_emails_with<L: CountryLookup>(
        &self,
        input_files: &[PathBuf],
        lookup: L,
    ) -> Result<SortStats> {
        self.run(input_files, Some(lookup)).await
    }

    async fn run<L: CountryLookup>(
        &self,
        input_files: &[PathBuf],
        lookup: Option<L>,
    ) -> Result<SortStats> {
        let start_time = Instant::now();

        let sink = OutputSink::new(
            self.config.output_directory.clone(),
            self.config.io_buffer_size_bytes(),
        );
        sink.prepare()?;

        let store = self.checkpoint_store();
        let (state, resumed) = match store.load()? {
            Some(state) => {
                info!(
                    "Resumed from previous state. Total processed: {}, files completed: {}",
                    state.total_processed,
                    state.completed_files.len()
                );
                (state, true)
            }
            None => {
                info!("No resume state found. Starting from the beginning.");
                (ProcessingState::default(), false)
            }
        };

        let resolver = lookup
            .filter(|_| self.config.use_remote_lookup)
            .map(|lookup| CachedCountryResolver::new(lookup, &self.config.lookup));

        let classifier = Arc::new(EmailClassifier::new(
            CountryTable::new(&self.config.countries),
            resolver,
            sink,
            state,
            self.config.save_state_interval,
        ));

        let mut tally = FileTally::default();
        let result = async {
            let outcome = self.process_files(&classifier, &store, input_files, &mut tally).await?;
            debug!("Closing {} open bucket files", classifier.sink().open_buckets());
            classifier.sink().close_all()?;
            Ok::<_, anyhow::Error>(outcome)
        }
        .await;

        match result {
            Ok(RunOutcome::Finished) => {
                // All output is closed at this point, so checkpoint trouble only costs a warning
                if let Err(e) = store.save(&classifier.snapshot()) {
                    warn!("Failed to save final state: {:#}", e);
                }
                if let Err(e) = store.remove() {
                    warn!("Failed to remove checkpoint after a finished run: {:#}", e);
                }

                let stats = self.build_stats(&classifier, &tally, start_time, resumed, true);
                log_summary(&stats);
                Ok(stats)
            }
            Ok(RunOutcome::Interrupted) => {
                store.save(&classifier.snapshot())?;
                warn!(
                    "Sorting interrupted; progress saved to {}. Run again to resume.",
                    store.path().display()
                );
                Ok(self.build_stats(&classifier, &tally, start_time, resumed, false))
            }
            Err(e) => {
                if let Err(close_err) = classifier.sink().close_all() {
                    error!("Failed to flush output after error: {:#}", close_err);
                }
                match store.save(&classifier.snapshot()) {
                    Ok(()) => error!(
                        "Error during email sorting, state saved to {}: {:#}",
                        store.path().display(),
                        e
                    ),
                    Err(save_err) => error!(
                        "Error during email sorting: {:#}; saving state also failed: {:#}",
                        e, save_err
                    ),
                }
                Err(e)
            }
        }
    }

    async fn process_files<L: CountryLookup>(
        &self,
        classifier: &Arc<EmailClassifier<L>>,
        store: &CheckpointStore,
        input_files: &[PathBuf],
        tally: &mut FileTally,
    ) -> Result<RunOutcome> {
        for (index, path) in input_files.iter().enumerate() {
            if self.shutdown_requested() {
                return Ok(RunOutcome::Interrupted);
            }

            if classifier.is_file_completed(path) {
                info!("Skipping {} (completed in a previous run)", path.display());
                tally.skipped += 1;
                continue;
            }

            info!("Processing file {}/{}: {}", index + 1, input_files.len(), path.display());
            if self.process_file(classifier, store, path).await? == RunOutcome::Interrupted {
                return Ok(RunOutcome::Interrupted);
            }

            classifier.with_state(|state| state.mark_file_completed(path));
            tally.processed += 1;
        }

        Ok(RunOutcome::Finished)
    }

    async fn process_file<L: CountryLookup>(
        &self,
        classifier: &Arc<EmailClassifier<L>>,
        store: &CheckpointStore,
        path: &Path,
    ) -> Result<RunOutcome> {
        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open input file {}", path.display()))?;
        let total_bytes = file.metadata().await.map(|m| m.len()).unwrap_or(0);
        let mut reader = BufReader::with_capacity(self.config.io_buffer_size_bytes(), file);

        let lines_to_skip = classifier.with_state(|state| {
            state.begin_file(path);
            state.lines_to_skip(path)
        });
        if lines_to_skip > 0 {
            info!("Resuming {} after line {}", path.display(), lines_to_skip);
        }

        let processor = ChunkProcessor::new(classifier.clone());
        let mut progress = ProgressReporter::new(path, total_bytes, self.progress_interval());
        let chunk_size = self.config.chunk_size_emails;
        let mut chunk: Vec<String> = Vec::with_capacity(chunk_size);
        let mut lines_read: u64 = 0;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let bytes = reader
                .read_until(b'\n', &mut buf)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if bytes == 0 {
                break;
            }
            progress.advance(bytes as u64);
            lines_read += 1;

            if lines_read <= lines_to_skip {
                continue;
            }

            chunk.push(String::from_utf8_lossy(&buf).into_owned());
            if chunk.len() >= chunk_size {
                let lines = std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size));
                self.run_chunk(&processor, classifier, store, lines, lines_read).await;

                if self.shutdown_requested() {
                    info!("Stopping {} at line {}", path.display(), lines_read);
                    return Ok(RunOutcome::Interrupted);
                }
            }
        }

        if !chunk.is_empty() {
            self.run_chunk(&processor, classifier, store, chunk, lines_read).await;
        }

        progress.finish();
        Ok(RunOutcome::Finished)
    }

    /// Classifies one chunk, records how far into the file the run has
    /// settled and writes a checkpoint if an interval was crossed.
    async fn run_chunk<L: CountryLookup>(
        &self,
        processor: &ChunkProcessor<L>,
        classifier: &Arc<EmailClassifier<L>>,
        store: &CheckpointStore,
        lines: Vec<String>,
        lines_read: u64,
    ) {
        processor.process_chunk(lines).await;
        classifier.with_state(|state| state.current_file_lines = lines_read);

        if classifier.take_checkpoint_due() {
            if let Err(e) = save_checkpoint(classifier, store) {
                warn!("Failed to save checkpoint, continuing: {:#}", e);
            }
        }
    }

    fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.config.progress_interval_seconds.max(1))
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    fn build_stats<L: CountryLookup>(
        &self,
        classifier: &EmailClassifier<L>,
        tally: &FileTally,
        start_time: Instant,
        resumed: bool,
        completed: bool,
    ) -> SortStats {
        let state = classifier.snapshot();
        let lookups = classifier.lookup_stats();

        SortStats {
            bucket_counts: state.email_counts,
            total_processed: state.total_processed,
            invalid_emails: state.invalid_emails.len(),
            other_emails: state.other_emails.len(),
            static_rule_hits: state.config_usage_count,
            remote_lookups: state.api_request_count,
            cache_hits: lookups.cache_hits,
            network_calls: lookups.network_calls,
            lookup_failures: lookups.failures,
            cached_domains: lookups.cached_domains,
            files_processed: tally.processed,
            files_skipped: tally.skipped,
            processing_time_ms: start_time.elapsed().as_millis() as u64,
            resumed,
            completed,
        }
    }
}

/// Output is flushed before the snapshot is taken, so a checkpoint never
/// counts an address whose line is still sitting in a buffer.
fn save_checkpoint<L: CountryLookup>(
    classifier: &EmailClassifier<L>,
    store: &CheckpointStore,
) -> Result<()> {
    classifier.sink().flush_all()?;
    store.save(&classifier.snapshot())
}

fn log_summary(stats: &SortStats) {
    for (bucket, count) in &stats.bucket_counts {
        info!("Emails written to {}.txt: {}", bucket, count);
    }
    info!("Invalid emails: {}", stats.invalid_emails);
    info!("Total processed emails: {}", stats.total_processed);
    info!("Config usage count: {}", stats.static_rule_hits);
    info!(
        "API request count: {} ({} cache hits, {} network calls, {} failures, {} domains cached)",
        stats.remote_lookups,
        stats.cache_hits,
        stats.network_calls,
        stats.lookup_failures,
        stats.cached_domains
    );
    info!(
        "Finished in {}",
        format_duration(stats.processing_time_ms as f64 / 1000.0)
    );
}

struct ProgressReporter {
    label: String,
    total_bytes: u64,
    bytes_read: u64,
    interval: Duration,
    last_report: Instant,
}

impl ProgressReporter {
    fn new(path: &Path, total_bytes: u64, interval: Duration) -> Self {
        Self {
            label: path.display().to_string(),
            total_bytes,
            bytes_read: 0,
            interval,
            last_report: Instant::now(),
        }
    }

    fn advance(&mut self, bytes: u64) {
        self.bytes_read += bytes;
        if self.last_report.elapsed() >= self.interval {
            self.report();
            self.last_report = Instant::now();
        }
    }

    fn finish(&mut self) {
        self.report();
    }

    fn report(&self) {
        let percent = if self.total_bytes > 0 {
            self.bytes_read as f64 * 100.0 / self.total_bytes as f64
        } else {
            100.0
        };
        info!(
            "Processing {}: {} / {} ({:.1}%)",
            self.label,
            format_bytes(self.bytes_read),
            format_bytes(self.total_bytes),
            percent
        );
    }
}
