//! Declared releases, read from a snapshot of the cluster's Flux objects.
//!
//! The snapshot is any YAML stream of `HelmRelease` and `HelmRepository`
//! objects, for example the output of
//! `kubectl get helmreleases,helmrepositories -A -o yaml`.

use crate::error::{Result, UpdaterError};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::io::Read;
use url::Url;

/// Version Flux assumes when a release pins none.
const ANY_VERSION: &str = "*";

/// One release to reconcile during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTarget {
    pub namespace: String,
    pub name: String,
    pub chart_name: String,
    pub current_version: String,
    pub repository_url: Url,
}

/// A declared release whose chart source could not be resolved.
#[derive(Debug)]
pub struct UnresolvedRelease {
    pub namespace: String,
    pub name: String,
    pub error: UpdaterError,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind")]
enum ClusterObject {
    HelmRelease(HelmRelease),
    HelmRepository(HelmRepository),
    List {
        #[serde(default)]
        items: Vec<ClusterObject>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    namespace: String,
}

// Specs stay raw until resolution so one malformed object only affects its own release.
#[derive(Debug, Clone, Deserialize)]
struct HelmRelease {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: serde_yaml::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HelmReleaseSpec {
    #[serde(default)]
    chart: Option<ChartTemplate>,
    #[serde(default)]
    chart_ref: Option<ChartRef>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChartTemplate {
    spec: ChartSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartSpec {
    chart: String,
    #[serde(default, deserialize_with = "scalar_string")]
    version: Option<String>,
    source_ref: SourceRef,
}

#[derive(Debug, Clone, Deserialize)]
struct ChartRef {
    kind: String,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SourceRef {
    #[serde(default = "default_source_kind")]
    kind: String,
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct HelmRepository {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: serde_yaml::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct HelmRepositorySpec {
    url: String,
    #[serde(default, rename = "type")]
    repository_type: Option<String>,
}

fn default_source_kind() -> String {
    "HelmRepository".to_string()
}

// Versions may arrive as YAML numbers (`version: 1.2`).
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_yaml::Value::String(s)) => Some(s),
        Some(serde_yaml::Value::Number(n)) => Some(n.to_string()),
        Some(serde_yaml::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Releases and chart repositories captured at pass start.
#[derive(Debug, Default)]
pub struct Snapshot {
    releases: Vec<HelmRelease>,
    repositories: HashMap<(String, String), HelmRepository>,
}

/// Read a snapshot from a YAML stream.
pub fn load_snapshot<R: Read>(mut reader: R) -> Result<Snapshot> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|e| UpdaterError::Snapshot(format!("Failed to read snapshot: {e}")))?;
    Snapshot::parse(&text)
}

impl Snapshot {
    pub fn parse(text: &str) -> Result<Self> {
        let mut snapshot = Snapshot::default();
        for document in serde_yaml::Deserializer::from_str(text) {
            let value = serde_yaml::Value::deserialize(document)
                .map_err(|e| UpdaterError::Snapshot(e.to_string()))?;
            if value.is_null() {
                continue;
            }
            let object: ClusterObject = serde_yaml::from_value(value)
                .map_err(|e| UpdaterError::Snapshot(e.to_string()))?;
            snapshot.insert(object);
        }
        Ok(snapshot)
    }

    fn insert(&mut self, object: ClusterObject) {
        match object {
            ClusterObject::HelmRelease(release) => self.releases.push(release),
            ClusterObject::HelmRepository(repository) => {
                let key = (
                    repository.metadata.namespace.clone(),
                    repository.metadata.name.clone(),
                );
                self.repositories.insert(key, repository);
            }
            ClusterObject::List { items } => {
                for item in items {
                    self.insert(item);
                }
            }
            ClusterObject::Other => {}
        }
    }

    pub fn release_count(&self) -> usize {
        self.releases.len()
    }

    /// Every declared release in snapshot order, with its chart repository resolved.
    pub fn release_targets(&self) -> Vec<std::result::Result<ReleaseTarget, UnresolvedRelease>> {
        self.releases
            .iter()
            .map(|release| {
                self.resolve(release).map_err(|error| UnresolvedRelease {
                    namespace: release.metadata.namespace.clone(),
                    name: release.metadata.name.clone(),
                    error,
                })
            })
            .collect()
    }

    fn resolve(&self, release: &HelmRelease) -> Result<ReleaseTarget> {
        let spec: HelmReleaseSpec = serde_yaml::from_value(release.spec.clone())
            .map_err(|e| UpdaterError::Snapshot(format!("invalid HelmRelease spec: {e}")))?;
        let chart = match (spec.chart, spec.chart_ref) {
            (Some(template), _) => template.spec,
            (None, Some(chart_ref)) => {
                return Err(UpdaterError::Snapshot(format!(
                    "chartRef to {} '{}' is not supported",
                    chart_ref.kind, chart_ref.name
                )));
            }
            (None, None) => {
                return Err(UpdaterError::Snapshot(
                    "HelmRelease has neither spec.chart nor spec.chartRef".to_string(),
                ));
            }
        };
        let source = &chart.source_ref;

        if source.kind != "HelmRepository" {
            return Err(UpdaterError::Snapshot(format!(
                "chart source kind '{}' is not supported",
                source.kind
            )));
        }

        let source_namespace = source
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| release.metadata.namespace.clone());
        let repository = self
            .repositories
            .get(&(source_namespace.clone(), source.name.clone()))
            .ok_or_else(|| {
                UpdaterError::Snapshot(format!(
                    "HelmRepository {source_namespace}/{} not found",
                    source.name
                ))
            })?;
        let repository: HelmRepositorySpec = serde_yaml::from_value(repository.spec.clone())
            .map_err(|e| {
                UpdaterError::Snapshot(format!(
                    "HelmRepository {source_namespace}/{} has an invalid spec: {e}",
                    source.name
                ))
            })?;

        if repository.repository_type.as_deref() == Some("oci") {
            return Err(UpdaterError::Snapshot(format!(
                "HelmRepository {source_namespace}/{} is an OCI registry without an index",
                source.name
            )));
        }

        let repository_url = Url::parse(&repository.url).map_err(|e| {
            UpdaterError::Snapshot(format!(
                "HelmRepository {source_namespace}/{} has an invalid URL '{}': {e}",
                source.name, repository.url
            ))
        })?;

        Ok(ReleaseTarget {
            namespace: release.metadata.namespace.clone(),
            name: release.metadata.name.clone(),
            chart_name: chart.chart.clone(),
            current_version: chart
                .version
                .clone()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| ANY_VERSION.to_string()),
            repository_url,
        })
    }
}
