use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error};
use crate::lookup::CountryLookup;
use crate::sorter::classifier::{Classification, EmailClassifier};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub bucketed: usize,
    pub invalid: usize,
    pub blank: usize,
    pub failed_tasks: usize,
}

/// Classifies one batch of lines concurrently and waits for all of them.
pub struct ChunkProcessor<L> {
    classifier: Arc<EmailClassifier<L>>,
}

impl<L: CountryLookup> ChunkProcessor<L> {
    pub fn new(classifier: Arc<EmailClassifier<L>>) -> Self {
        Self { classifier }
    }

    pub async fn process_chunk(&self, lines: Vec<String>) -> ChunkOutcome {
        let mut outcome = ChunkOutcome::default();
        let mut tasks = JoinSet::new();

        for line in lines {
            let address = line.trim();
            if address.is_empty() {
                outcome.blank += 1;
                continue;
            }

            let address = address.to_string();
            let classifier = self.classifier.clone();
            tasks.spawn(async move { classifier.classify(&address).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Classification::Bucketed(_)) => outcome.bucketed += 1,
                Ok(Classification::Invalid) => outcome.invalid += 1,
                Err(e) => {
                    // A panicking task must not take its siblings down with it
                    error!("Classification task failed: {}", e);
                    outcome.failed_tasks += 1;
                }
            }
        }

        debug!(
            "Chunk done: {} bucketed, {} invalid, {} blank",
            outcome.bucketed, outcome.invalid, outcome.blank
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;
    use crate::lookup::{CachedCountryResolver, LookupError};
    use crate::sorter::checkpoint::ProcessingState;
    use crate::sorter::config::{default_country_rules, LookupConfig};
    use crate::sorter::domain::CountryTable;
    use crate::sorter::output::OutputSink;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Tracks the peak number of lookups in flight at once.
    #[derive(Default)]
    struct InstrumentedLookup {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl CountryLookup for InstrumentedLookup {
        async fn fetch_country(&self, _domain: &str) -> Result<String, LookupError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("NO".to_string())
        }
    }

    fn build(dir: &Path, max_concurrent: usize) -> Arc<EmailClassifier<InstrumentedLookup>> {
        let lookup_config = LookupConfig {
            max_concurrent_requests: max_concurrent,
            ..LookupConfig::default()
        };
        let resolver = CachedCountryResolver::new(InstrumentedLookup::default(), &lookup_config);
        let sink = OutputSink::new(dir.to_path_buf(), 4096);
        sink.prepare().unwrap();
        Arc::new(EmailClassifier::new(
            CountryTable::new(&default_country_rules()),
            Some(resolver),
            sink,
            ProcessingState::default(),
            1_000,
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_malformed_address_among_valid_ones() {
        let temp_dir = tempdir().unwrap();
        let classifier = build(temp_dir.path(), 8);
        let processor = ChunkProcessor::new(classifier.clone());

        let mut lines: Vec<String> = (0..99).map(|i| format!("user{}@gmail.com\n", i)).collect();
        lines.insert(50, "not-an-email\n".to_string());
        lines.push("   \n".to_string());

        let outcome = processor.process_chunk(lines).await;
        assert_eq!(outcome.bucketed, 99);
        assert_eq!(outcome.invalid, 1);
        assert_eq!(outcome.blank, 1);
        assert_eq!(outcome.failed_tasks, 0);

        let state = classifier.snapshot();
        assert_eq!(state.total_processed, 99);
        assert_eq!(state.invalid_emails, vec!["not-an-email".to_string()]);
        assert!(state.counts_consistent());

        classifier.sink().close_all().unwrap();
        let us = std::fs::read_to_string(classifier.sink().bucket_path("US")).unwrap();
        assert_eq!(us.lines().count(), 99);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_remote_lookups_respect_concurrency_cap() {
        let temp_dir = tempdir().unwrap();
        let classifier = build(temp_dir.path(), 3);
        let processor = ChunkProcessor::new(classifier.clone());

        let lines: Vec<String> = (0..60).map(|i| format!("user@host{}.io", i)).collect();
        let outcome = processor.process_chunk(lines).await;
        assert_eq!(outcome.bucketed, 60);

        let lookup = classifier.resolver().unwrap().lookup();
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 60);
        let peak = lookup.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight lookups was {}", peak);
        assert!(peak >= 2, "lookups never overlapped");
        assert_eq!(classifier.with_state(|s| s.api_request_count), 60);

        classifier.sink().close_all().unwrap();
        let no = std::fs::read_to_string(classifier.sink().bucket_path("NO")).unwrap();
        assert_eq!(no.lines().count(), 60);
        assert!(classifier.sink().bucket_path(OTHER_BUCKET).parent().unwrap().is_dir());
    }
}
