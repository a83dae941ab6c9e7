use crate::deadline::Deadline;
use crate::error::{Result, UpdaterError};
use reqwest::blocking::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

const INDEX_FILE: &str = "index.yaml";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_INDEX_BYTES: usize = 64 * 1024 * 1024;

/// Source of chart repository index documents.
pub trait IndexSource {
    /// Raw `index.yaml` text of the repository at `repository`.
    fn fetch_index(&self, repository: &Url, deadline: &Deadline) -> Result<String>;
}

/// Location of `index.yaml` relative to a repository base URL.
pub fn index_url(repository: &Url) -> Result<Url> {
    let mut base = repository.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(INDEX_FILE)
        .map_err(|e| UpdaterError::Fetch(format!("Invalid repository URL '{repository}': {e}")))
}

/// Fetches chart indexes over HTTP(S).
pub struct HttpIndexSource {
    client: Client,
}

impl HttpIndexSource {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("helm-version-updater/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpdaterError::Fetch(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl IndexSource for HttpIndexSource {
    fn fetch_index(&self, repository: &Url, deadline: &Deadline) -> Result<String> {
        let url = index_url(repository)?;
        let timeout = deadline.bounded(REQUEST_TIMEOUT, "chart index fetch")?;
        debug!(%url, "fetching chart index");

        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .map_err(|e| {
                if e.is_timeout() && deadline.is_expired() {
                    UpdaterError::Timeout("chart index fetch".to_string())
                } else {
                    UpdaterError::Fetch(format!("GET {url} failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(UpdaterError::Fetch(format!(
                "GET {url} returned HTTP {}",
                response.status()
            )));
        }

        if response
            .content_length()
            .is_some_and(|len| len > MAX_INDEX_BYTES as u64)
        {
            return Err(UpdaterError::Fetch(format!(
                "Index at {url} exceeds the 64MiB limit"
            )));
        }

        let text = response
            .text()
            .map_err(|e| UpdaterError::Fetch(format!("Failed to read body of {url}: {e}")))?;

        if text.len() > MAX_INDEX_BYTES {
            return Err(UpdaterError::Fetch(format!(
                "Index at {url} exceeds the 64MiB limit"
            )));
        }

        Ok(text)
    }
}
