use crate::cli::Cli;
use crate::error::{Result, UpdaterError};
use crate::git::CommitAuthor;
use crate::helm::UnparsableVersionPolicy;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Immutable settings for one pass, built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub author: CommitAuthor,
    pub target: Url,
    pub owner: String,
    pub repository: String,
    pub subdirectory: Option<PathBuf>,
    pub prefix: Option<String>,
    pub timeout: Duration,
    pub version_policy: UnparsableVersionPolicy,
    pub api_base: Url,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let token = require("github-token", &cli.github_token)?;
        let name = require("git-name", &cli.git_name)?;
        let email = require("git-email", &cli.git_email)?;

        let target = Url::parse(cli.target.trim())
            .map_err(|e| UpdaterError::Config(format!("Invalid target '{}': {e}", cli.target)))?;
        if !matches!(target.scheme(), "https" | "http") {
            return Err(UpdaterError::Config(format!(
                "Target must be an http(s) URL, got scheme '{}'",
                target.scheme()
            )));
        }
        let (owner, repository) = parse_repo_url(&target)?;

        let api_base = Url::parse(cli.github_api_url.trim()).map_err(|e| {
            UpdaterError::Config(format!("Invalid API URL '{}': {e}", cli.github_api_url))
        })?;

        let subdirectory = cli
            .path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .map(validate_relative)
            .transpose()?;

        let prefix = cli
            .prefix
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        if let Some(prefix) = &prefix {
            validate_prefix(prefix)?;
        }

        if cli.timeout == 0 {
            return Err(UpdaterError::Config(
                "Timeout must be at least one second".to_string(),
            ));
        }

        Ok(Self {
            token,
            author: CommitAuthor { name, email },
            target,
            owner,
            repository,
            subdirectory,
            prefix,
            timeout: Duration::from_secs(cli.timeout),
            version_policy: if cli.strict_versions {
                UnparsableVersionPolicy::Fail
            } else {
                UnparsableVersionPolicy::Skip
            },
            api_base,
        })
    }
}

fn require(flag: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(UpdaterError::Config(format!("--{flag} must not be empty")));
    }
    Ok(value.to_string())
}

/// Split `https://host/<owner>/<repo>[.git]` into owner and repository.
pub fn parse_repo_url(url: &Url) -> Result<(String, String)> {
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|segment| !segment.is_empty()).collect())
        .unwrap_or_default();

    match segments.as_slice() {
        [owner, repo] => {
            let repo = repo.strip_suffix(".git").unwrap_or(repo);
            if repo.is_empty() {
                return Err(UpdaterError::Config(format!(
                    "Target '{url}' has an empty repository name"
                )));
            }
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(UpdaterError::Config(format!(
            "Target '{url}' must look like https://host/<owner>/<repository>"
        ))),
    }
}

fn validate_relative(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Err(UpdaterError::Config(format!(
            "--path '{}' must be relative to the repository root",
            path.display()
        )));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(UpdaterError::Config(format!(
            "--path '{}' must not leave the repository",
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}

fn validate_prefix(prefix: &str) -> Result<()> {
    let valid = prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    if !valid || prefix.starts_with(['-', '/', '.']) || prefix.contains("..") {
        return Err(UpdaterError::Config(format!(
            "--prefix '{prefix}' is not usable in a branch name"
        )));
    }
    Ok(())
}
