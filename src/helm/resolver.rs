use crate::deadline::Deadline;
use crate::error::{Result, UpdaterError};
use crate::helm::index::IndexFile;
use crate::helm::repository::IndexSource;
use crate::helm::version::{UnparsableVersionPolicy, parse_chart_version};
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    UpToDate,
    Upgrade { target_version: String },
}

/// Decides whether a chart repository publishes something newer than a release pins.
pub struct VersionResolver<S: IndexSource> {
    source: S,
    policy: UnparsableVersionPolicy,
}

impl<S: IndexSource> VersionResolver<S> {
    pub fn new(source: S, policy: UnparsableVersionPolicy) -> Self {
        Self { source, policy }
    }

    /// Fetch a fresh index and compare its newest `chart` entry against `current`.
    pub fn resolve_latest(
        &self,
        repository: &Url,
        chart: &str,
        current: &str,
        deadline: &Deadline,
    ) -> Result<Resolution> {
        let text = self.source.fetch_index(repository, deadline)?;
        let index = IndexFile::parse(&text)?;
        let latest = index.latest_version(chart)?;
        debug!(
            chart,
            current,
            latest = %latest.version,
            app_version = ?latest.app_version,
            deprecated = latest.deprecated,
            "resolved newest chart version"
        );
        self.compare(current, &latest.version)
    }

    fn compare(&self, current: &str, candidate: &str) -> Result<Resolution> {
        let (Some(current_version), Some(candidate_version)) =
            (parse_chart_version(current), parse_chart_version(candidate))
        else {
            let offending = if parse_chart_version(current).is_none() {
                current
            } else {
                candidate
            };
            return match self.policy {
                UnparsableVersionPolicy::Skip => {
                    debug!(version = offending, "unparsable version, treating as up to date");
                    Ok(Resolution::UpToDate)
                }
                UnparsableVersionPolicy::Fail => {
                    Err(UpdaterError::InvalidVersion(offending.to_string()))
                }
            };
        };

        if current_version >= candidate_version {
            return Ok(Resolution::UpToDate);
        }

        Ok(Resolution::Upgrade {
            target_version: candidate.to_string(),
        })
    }
}
