use crate::error::{Result, UpdaterError};
use crate::helm::version::newest_first;
use serde::Deserialize;
use serde::de::IgnoredAny;
use std::collections::BTreeMap;

/// A chart repository `index.yaml`.
///
/// Unknown top-level keys are rejected. Chart entries only need a version;
/// the rest of the chart metadata is ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IndexFile {
    pub api_version: String,
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<ChartVersion>>,
    // Known index keys the resolver has no use for.
    #[serde(default, rename = "generated")]
    _generated: IgnoredAny,
    #[serde(default, rename = "publicKeys")]
    _public_keys: IgnoredAny,
    #[serde(default, rename = "serverInfo")]
    _server_info: IgnoredAny,
    #[serde(default, rename = "annotations")]
    _annotations: IgnoredAny,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartVersion {
    pub version: String,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
}

impl IndexFile {
    /// Parse and sort an index document; every chart's entries end up newest first.
    pub fn parse(text: &str) -> Result<Self> {
        let mut index: IndexFile =
            serde_yaml::from_str(text).map_err(|e| UpdaterError::IndexParse(e.to_string()))?;

        if index.api_version.trim().is_empty() {
            return Err(UpdaterError::IndexParse(
                "no API version specified".to_string(),
            ));
        }

        index.sort_entries();
        Ok(index)
    }

    fn sort_entries(&mut self) {
        for versions in self.entries.values_mut() {
            versions.sort_by(|a, b| newest_first(&a.version, &b.version));
        }
    }

    /// Newest published version of `chart`.
    pub fn latest_version(&self, chart: &str) -> Result<&ChartVersion> {
        self.entries
            .get(chart)
            .and_then(|versions| versions.first())
            .ok_or_else(|| UpdaterError::ChartNotFound(chart.to_string()))
    }
}
