use anyhow::{Context, Result};
use reqwest::Client;
use crate::lookup::{CountryLookup, LookupError};
use crate::sorter::config::LookupConfig;

/// Country lookup over HTTP: `GET url_template` with the domain substituted,
/// plain-text country code in the body.
///
/// One client (and its connection pool) is shared by every lookup of a run.
#[derive(Debug, Clone)]
pub struct HttpCountryClient {
    client: Client,
    config: LookupConfig,
}

impl HttpCountryClient {
    pub fn new(config: &LookupConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .user_agent(concat!("mailsift/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .context("Failed to build HTTP client for country lookups")?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }
}

impl CountryLookup for HttpCountryClient {
    async fn fetch_country(&self, domain: &str) -> Result<String, LookupError> {
        let url = self.config.url_for(domain);

        let response = self.client.get(&url).send().await.map_err(classify_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(classify_error)?;
        let code = body.trim();
        if code.is_empty() {
            return Err(LookupError::EmptyBody);
        }

        Ok(code.to_string())
    }
}

fn classify_error(e: reqwest::Error) -> LookupError {
    if e.is_timeout() {
        LookupError::Timeout
    } else {
        LookupError::Transport(e.to_string())
    }
}
