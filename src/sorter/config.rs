use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use crate::constants::*;
use crate::sorter::constants::*;
use crate::sorter::output::is_safe_bucket_name;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryRule {
    pub code: String,
    pub suffixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    pub url_template: String,
    pub timeout_seconds: u64,
    pub max_concurrent_requests: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SorterConfig {
    pub countries: Vec<CountryRule>,
    pub input_files: Vec<String>,
    pub output_directory: PathBuf,
    pub state_directory: PathBuf,
    pub use_remote_lookup: bool,
    pub lookup: LookupConfig,
    pub chunk_size_emails: usize,
    pub save_state_interval: u64,
    pub io_buffer_size_kb: usize,
    pub progress_interval_seconds: u64,
    pub verbose: bool,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_LOOKUP_URL_TEMPLATE.to_string(),
            timeout_seconds: DEFAULT_LOOKUP_TIMEOUT_SECONDS,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            accept_invalid_certs: false,
        }
    }
}

impl Default for SorterConfig {
    fn default() -> Self {
        Self {
            countries: default_country_rules(),
            input_files: DEFAULT_INPUT_PATTERNS.iter().map(|p| p.to_string()).collect(),
            output_directory: PathBuf::from(DEFAULT_OUTPUT_DIRECTORY),
            state_directory: PathBuf::from(DEFAULT_STATE_DIRECTORY),
            use_remote_lookup: true,
            lookup: LookupConfig::default(),
            chunk_size_emails: DEFAULT_CHUNK_SIZE_EMAILS,
            save_state_interval: DEFAULT_SAVE_STATE_INTERVAL,
            io_buffer_size_kb: DEFAULT_IO_BUFFER_SIZE_KB,
            progress_interval_seconds: DEFAULT_PROGRESS_INTERVAL_SECONDS,
            verbose: false,
        }
    }
}

pub fn default_country_rules() -> Vec<CountryRule> {
    DEFAULT_COUNTRY_RULES
        .iter()
        .map(|(code, suffixes)| CountryRule {
            code: code.to_string(),
            suffixes: suffixes.iter().map(|s| s.to_string()).collect(),
        })
        .collect()
}

impl LookupConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn url_for(&self, domain: &str) -> String {
        self.url_template.replace(DOMAIN_PLACEHOLDER, domain)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.url_template.contains(DOMAIN_PLACEHOLDER) {
            return Err(anyhow::anyhow!(
                "Lookup URL template must contain the {} placeholder",
                DOMAIN_PLACEHOLDER
            ));
        }

        if self.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Lookup timeout must be at least 1 second"));
        }

        if self.max_concurrent_requests == 0
            || self.max_concurrent_requests > MAX_CONCURRENT_REQUESTS_LIMIT {
            return Err(anyhow::anyhow!(
                "Max concurrent requests must be between 1 and {}",
                MAX_CONCURRENT_REQUESTS_LIMIT
            ));
        }

        if self.max_retries > MAX_LOOKUP_RETRIES {
            return Err(anyhow::anyhow!(
                "Max retries cannot exceed {}",
                MAX_LOOKUP_RETRIES
            ));
        }

        Ok(())
    }
}

impl SorterConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_emails == 0 {
            return Err(anyhow::anyhow!("Chunk size must be at least 1 email"));
        }

        if self.save_state_interval == 0 {
            return Err(anyhow::anyhow!("Save state interval must be at least 1 email"));
        }

        if self.io_buffer_size_kb == 0 {
            return Err(anyhow::anyhow!("IO buffer size must be at least 1 KB"));
        }

        let mut seen = HashSet::new();
        for rule in &self.countries {
            let code = rule.code.trim();
            if code.is_empty() {
                return Err(anyhow::anyhow!("Country code cannot be empty"));
            }
            if !is_safe_bucket_name(code) {
                return Err(anyhow::anyhow!(
                    "Country code {:?} must be at most {} letters, digits, '_' or '-'",
                    code,
                    MAX_BUCKET_NAME_LEN
                ));
            }
            if code == INVALID_BUCKET || code == OTHER_BUCKET {
                return Err(anyhow::anyhow!("Country code {} is reserved", code));
            }
            if !seen.insert(code) {
                return Err(anyhow::anyhow!("Duplicate country code: {}", code));
            }
            if rule.suffixes.iter().all(|s| s.trim().is_empty()) {
                return Err(anyhow::anyhow!("Country {} has no domain suffixes", code));
            }
        }

        if self.use_remote_lookup {
            self.lookup.validate()?;
        }

        Ok(())
    }

    pub fn io_buffer_size_bytes(&self) -> usize {
        self.io_buffer_size_kb * BYTES_PER_KB
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_codes(codes: &[&str]) -> SorterConfig {
        SorterConfig {
            countries: codes
                .iter()
                .map(|code| CountryRule {
                    code: code.to_string(),
                    suffixes: vec!["xyz".to_string()],
                })
                .collect(),
            ..SorterConfig::default()
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(SorterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_country_codes_must_be_bucket_names() {
        assert!(with_codes(&["U.S."]).validate().is_err());
        assert!(with_codes(&["North America"]).validate().is_err());
        assert!(with_codes(&["../US"]).validate().is_err());
        assert!(with_codes(&["US", "US-EAST", "uk_2"]).validate().is_ok());
    }

    #[test]
    fn test_reserved_and_duplicate_codes_rejected() {
        assert!(with_codes(&[OTHER_BUCKET]).validate().is_err());
        assert!(with_codes(&[INVALID_BUCKET]).validate().is_err());
        assert!(with_codes(&["DE", " DE "]).validate().is_err());
        assert!(with_codes(&[""]).validate().is_err());
    }

    #[test]
    fn test_lookup_checked_only_when_remote_enabled() {
        let mut config = SorterConfig::default();
        config.lookup.url_template = "https://example.com/".to_string();
        assert!(config.validate().is_err());

        config.use_remote_lookup = false;
        assert!(config.validate().is_ok());
    }
}
