use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};
use crate::constants::*;
use crate::lookup::{CachedCountryResolver, CountryLookup, LookupStats};
use crate::sorter::checkpoint::ProcessingState;
use crate::sorter::domain::{resolve_domain, CountryTable};
use crate::sorter::output::{bucket_name_for, OutputSink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Bucketed(String),
    Invalid,
}

/// Routes single addresses to buckets and owns the shared run state.
///
/// Every counter update and list append happens under the state lock, so
/// concurrent classifications never lose an update. Checkpoints are not
/// written here: crossing the save interval raises a flag that the chunk
/// driver consumes once the whole chunk has settled.
pub struct EmailClassifier<L> {
    table: CountryTable,
    resolver: Option<CachedCountryResolver<L>>,
    sink: OutputSink,
    state: Mutex<ProcessingState>,
    save_interval: u64,
    checkpoint_due: AtomicBool,
}

impl<L: CountryLookup> EmailClassifier<L> {
    pub fn new(
        table: CountryTable,
        resolver: Option<CachedCountryResolver<L>>,
        sink: OutputSink,
        state: ProcessingState,
        save_interval: u64,
    ) -> Self {
        Self {
            table,
            resolver,
            sink,
            state: Mutex::new(state),
            save_interval: save_interval.max(1),
            checkpoint_due: AtomicBool::new(false),
        }
    }

    pub async fn classify(&self, address: &str) -> Classification {
        let domain = match resolve_domain(address) {
            Some(domain) if !domain.is_empty() && !has_decoding_damage(address) => domain,
            _ => {
                warn!("Invalid email format: {}", address);
                self.record_invalid(address);
                return Classification::Invalid;
            }
        };

        let mut country = self.table.static_lookup(&domain).map(str::to_string);
        if country.is_some() {
            self.state.lock().config_usage_count += 1;
        } else if let Some(resolver) = &self.resolver {
            self.state.lock().api_request_count += 1;
            country = Some(resolver.lookup_country(&domain).await);
        }

        let bucket = normalize_bucket(country);

        if let Err(e) = self.sink.write(&bucket, address) {
            error!("Error processing email {} (domain {}): {:#}", address, domain, e);
            self.record_invalid(address);
            return Classification::Invalid;
        }

        let mut state = self.state.lock();
        if bucket == OTHER_BUCKET {
            state.other_emails.push(address.to_string());
        }
        let total = state.record_bucket(&bucket);
        if total % self.save_interval == 0 {
            self.checkpoint_due.store(true, Ordering::Release);
        }

        Classification::Bucketed(bucket)
    }

    pub fn record_invalid(&self, address: &str) {
        self.state.lock().invalid_emails.push(address.to_string());
        if let Err(e) = self.sink.write(INVALID_BUCKET, address) {
            error!("Failed to append {} to the invalid bucket: {:#}", address, e);
        }
    }

    /// Returns true once per crossed save interval.
    pub fn take_checkpoint_due(&self) -> bool {
        self.checkpoint_due.swap(false, Ordering::AcqRel)
    }

    pub fn snapshot(&self) -> ProcessingState {
        self.state.lock().clone()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut ProcessingState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn is_file_completed(&self, path: &Path) -> bool {
        self.state.lock().is_file_completed(path)
    }

    pub fn sink(&self) -> &OutputSink {
        &self.sink
    }

    #[cfg(test)]
    pub fn resolver(&self) -> Option<&CachedCountryResolver<L>> {
        self.resolver.as_ref()
    }

    pub fn lookup_stats(&self) -> LookupStats {
        self.resolver
            .as_ref()
            .map(CachedCountryResolver::stats)
            .unwrap_or_default()
    }
}

/// Absent, "Undefined" and blank codes all mean no country was found.
/// Anything else is kept as an open code, reduced to a safe bucket name.
pub fn normalize_bucket(country: Option<String>) -> String {
    let Some(code) = country else {
        return OTHER_BUCKET.to_string();
    };

    let code = code.trim();
    if code.is_empty() || code == UNDEFINED_COUNTRY {
        return OTHER_BUCKET.to_string();
    }

    match bucket_name_for(code) {
        // The invalid bucket only ever holds malformed addresses
        name if name == INVALID_BUCKET => OTHER_BUCKET.to_string(),
        name => name,
    }
}

// Lines that were not valid UTF-8 carry replacement characters after decoding
fn has_decoding_damage(address: &str) -> bool {
    address.contains(char::REPLACEMENT_CHARACTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::LookupError;
    use crate::sorter::config::{default_country_rules, LookupConfig};
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    struct FixedLookup {
        answer: Result<String, LookupError>,
        calls: AtomicUsize,
    }

    impl CountryLookup for FixedLookup {
        async fn fetch_country(&self, _domain: &str) -> Result<String, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    fn classifier(
        dir: &Path,
        answer: Option<Result<String, LookupError>>,
        save_interval: u64,
    ) -> EmailClassifier<FixedLookup> {
        let resolver = answer.map(|answer| {
            CachedCountryResolver::new(
                FixedLookup { answer, calls: AtomicUsize::new(0) },
                &LookupConfig::default(),
            )
        });
        let sink = OutputSink::new(dir.to_path_buf(), 1024);
        sink.prepare().unwrap();
        EmailClassifier::new(
            CountryTable::new(&default_country_rules()),
            resolver,
            sink,
            ProcessingState::default(),
            save_interval,
        )
    }

    fn classifier_with(dir: &Path, answer: &str) -> EmailClassifier<FixedLookup> {
        classifier(dir, Some(Ok(answer.to_string())), 100)
    }

    fn network_calls(classifier: &EmailClassifier<FixedLookup>) -> usize {
        classifier
            .resolver
            .as_ref()
            .map(|r| r.lookup().calls.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_static_rule_skips_remote_lookup() {
        let temp_dir = tempdir().unwrap();
        let classifier = classifier(temp_dir.path(), Some(Ok("ZZ".into())), 100);

        let result = classifier.classify("someone@mail.co.uk").await;
        assert_eq!(result, Classification::Bucketed("UK".into()));
        assert_eq!(network_calls(&classifier), 0);

        let state = classifier.snapshot();
        assert_eq!(state.config_usage_count, 1);
        assert_eq!(state.api_request_count, 0);
        assert_eq!(state.email_counts["UK"], 1);
    }

    #[tokio::test]
    async fn test_remote_lookup_counts_every_call() {
        let temp_dir = tempdir().unwrap();
        let classifier = classifier(temp_dir.path(), Some(Ok("SE".into())), 100);

        classifier.classify("a@foretag.io").await;
        classifier.classify("b@foretag.io").await;

        let state = classifier.snapshot();
        assert_eq!(state.api_request_count, 2);
        assert_eq!(state.email_counts["SE"], 2);
        assert_eq!(network_calls(&classifier), 1);
        assert_eq!(classifier.lookup_stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_invalid_addresses_are_isolated() {
        let temp_dir = tempdir().unwrap();
        let classifier = classifier(temp_dir.path(), None, 100);

        for address in ["no-at", "a@b@c", "user@", "bad\u{FFFD}@x.com"] {
            assert_eq!(classifier.classify(address).await, Classification::Invalid);
        }

        let state = classifier.snapshot();
        assert_eq!(state.invalid_emails.len(), 4);
        assert_eq!(state.total_processed, 0);

        classifier.sink().close_all().unwrap();
        let invalid = std::fs::read_to_string(classifier.sink().bucket_path(INVALID_BUCKET)).unwrap();
        assert_eq!(invalid.lines().count(), 4);
    }

    #[tokio::test]
    async fn test_only_separator_count_decides_validity() {
        let temp_dir = tempdir().unwrap();
        let classifier = classifier(temp_dir.path(), None, 100);

        assert_eq!(
            classifier.classify("john doe@gmail.com").await,
            Classification::Bucketed("US".into())
        );
        assert_eq!(
            classifier.classify("a@gmail.com\tJohn").await,
            Classification::Bucketed(OTHER_BUCKET.into())
        );

        let state = classifier.snapshot();
        assert!(state.invalid_emails.is_empty());
        assert_eq!(state.total_processed, 2);

        classifier.sink().close_all().unwrap();
        let us = std::fs::read_to_string(classifier.sink().bucket_path("US")).unwrap();
        assert_eq!(us, "john doe@gmail.com\n");
    }

    #[tokio::test]
    async fn test_free_form_remote_codes_become_buckets() {
        let temp_dir = tempdir().unwrap();
        let classifier = classifier(temp_dir.path(), Some(Ok("United Kingdom".into())), 100);

        for address in ["x@firma.io", "y@firma.io"] {
            assert_eq!(
                classifier.classify(address).await,
                Classification::Bucketed("United_Kingdom".into())
            );
        }
        assert_eq!(network_calls(&classifier), 1);
        assert_eq!(classifier.lookup_stats().failures, 0);

        let temp_dir = tempdir().unwrap();
        let dotted = classifier_with(temp_dir.path(), "GB.UK");
        assert_eq!(
            dotted.classify("x@firma.io").await,
            Classification::Bucketed("GB_UK".into())
        );
        dotted.sink().close_all().unwrap();
        assert!(temp_dir.path().join("GB_UK").join("GB_UK.txt").is_file());
    }

    #[tokio::test]
    async fn test_unmatched_without_remote_goes_to_other() {
        let temp_dir = tempdir().unwrap();
        let classifier = classifier(temp_dir.path(), None, 100);

        let result = classifier.classify("x@example.io").await;
        assert_eq!(result, Classification::Bucketed(OTHER_BUCKET.into()));

        let state = classifier.snapshot();
        assert_eq!(state.other_emails, vec!["x@example.io".to_string()]);
        assert_eq!(state.api_request_count, 0);

        classifier.sink().close_all().unwrap();
        let other = std::fs::read_to_string(classifier.sink().bucket_path(OTHER_BUCKET)).unwrap();
        assert_eq!(other, "x@example.io\n");
    }

    #[tokio::test]
    async fn test_remote_failure_and_undefined_become_other() {
        let temp_dir = tempdir().unwrap();
        let failing = classifier(temp_dir.path(), Some(Err(LookupError::Status(500))), 100);
        assert_eq!(
            failing.classify("x@example.io").await,
            Classification::Bucketed(OTHER_BUCKET.into())
        );

        let temp_dir = tempdir().unwrap();
        let undefined = classifier(temp_dir.path(), Some(Ok("Undefined".into())), 100);
        assert_eq!(
            undefined.classify("y@example.io").await,
            Classification::Bucketed(OTHER_BUCKET.into())
        );
        assert_eq!(undefined.snapshot().other_emails.len(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_flag_raised_on_interval() {
        let temp_dir = tempdir().unwrap();
        let classifier = classifier(temp_dir.path(), None, 3);

        classifier.classify("a@gmail.com").await;
        classifier.classify("b@gmail.com").await;
        assert!(!classifier.take_checkpoint_due());

        classifier.classify("c@gmail.com").await;
        assert!(classifier.take_checkpoint_due());
        assert!(!classifier.take_checkpoint_due());
    }

    #[test]
    fn test_normalize_bucket() {
        assert_eq!(normalize_bucket(None), OTHER_BUCKET);
        assert_eq!(normalize_bucket(Some("Undefined".into())), OTHER_BUCKET);
        assert_eq!(normalize_bucket(Some("   ".into())), OTHER_BUCKET);
        assert_eq!(normalize_bucket(Some(" DE\n".into())), "DE");
        assert_eq!(normalize_bucket(Some("Côte d'Ivoire".into())), "Côte_d_Ivoire");
        assert_eq!(normalize_bucket(Some(INVALID_BUCKET.into())), OTHER_BUCKET);
    }
}
