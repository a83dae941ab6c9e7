use crate::deadline::Deadline;
use crate::error::{Result, UpdaterError};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PROPOSAL_BODY: &str =
    "A newer chart version is available. This pull request was opened by helm-version-updater.";

/// A pull request as reported by the hosting API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalRecord {
    pub number: u64,
    pub base: String,
    pub head: String,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProposal<'a> {
    pub title: &'a str,
    pub head: &'a str,
    pub base: &'a str,
    pub body: &'a str,
}

/// Pull-request operations of a code hosting service.
pub trait ProposalApi {
    fn list_open(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
        deadline: &Deadline,
    ) -> Result<Vec<ProposalRecord>>;

    fn create(
        &self,
        owner: &str,
        repo: &str,
        proposal: &NewProposal<'_>,
        deadline: &Deadline,
    ) -> Result<ProposalRecord>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalStatus {
    Created { number: u64, url: String },
    AlreadyExists { number: u64 },
}

/// Opens at most one pull request per (base, head) pair.
pub struct ChangeProposalManager<A: ProposalApi> {
    api: A,
}

impl<A: ProposalApi> ChangeProposalManager<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub fn ensure(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
        title: &str,
        deadline: &Deadline,
    ) -> Result<ProposalStatus> {
        let existing = self.api.list_open(owner, repo, base, head, deadline)?;
        if let Some(open) = existing
            .iter()
            .find(|record| record.base == base && record.head == head)
        {
            debug!(number = open.number, base, head, "pull request already open");
            return Ok(ProposalStatus::AlreadyExists {
                number: open.number,
            });
        }

        let proposal = NewProposal {
            title,
            head,
            base,
            body: PROPOSAL_BODY,
        };
        let created = self.api.create(owner, repo, &proposal, deadline)?;
        info!(number = created.number, url = %created.url, "opened pull request");
        Ok(ProposalStatus::Created {
            number: created.number,
            url: created.url,
        })
    }
}

/// GitHub REST client for pull requests.
pub struct GitHubClient {
    client: Client,
    api_base: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    html_url: String,
    title: String,
    head: BranchRef,
    base: BranchRef,
}

#[derive(Debug, Deserialize)]
struct BranchRef {
    #[serde(rename = "ref")]
    name: String,
}

impl From<PullRequest> for ProposalRecord {
    fn from(pr: PullRequest) -> Self {
        Self {
            number: pr.number,
            base: pr.base.name,
            head: pr.head.name,
            title: pr.title,
            url: pr.html_url,
        }
    }
}

impl GitHubClient {
    pub fn new(api_base: &Url, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("helm-version-updater/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpdaterError::Api(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: api_base.clone(),
            token: token.into(),
        })
    }

    fn pulls_url(&self, owner: &str, repo: &str) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| UpdaterError::Api(format!("Invalid API base URL '{}'", self.api_base)))?
            .pop_if_empty()
            .extend(["repos", owner, repo, "pulls"]);
        Ok(url)
    }

    fn send(
        &self,
        request: RequestBuilder,
        operation: &str,
        deadline: &Deadline,
    ) -> Result<Response> {
        let timeout = deadline.bounded(REQUEST_TIMEOUT, operation)?;
        let response = request
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .timeout(timeout)
            .send()
            .map_err(|e| {
                if e.is_timeout() && deadline.is_expired() {
                    UpdaterError::Timeout(operation.to_string())
                } else {
                    UpdaterError::Api(format!("{operation} failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        Err(UpdaterError::Api(describe_failure(operation, status, &body)))
    }
}

fn describe_failure(operation: &str, status: StatusCode, body: &str) -> String {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().chars().take(200).collect());
    format!("{operation} returned HTTP {status}: {message}")
}

impl ProposalApi for GitHubClient {
    fn list_open(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
        deadline: &Deadline,
    ) -> Result<Vec<ProposalRecord>> {
        let url = self.pulls_url(owner, repo)?;
        let head_filter = format!("{owner}:{head}");
        debug!(%url, base, head = %head_filter, "listing pull requests");

        let request = self.client.get(url).query(&[
            ("state", "open"),
            ("base", base),
            ("head", head_filter.as_str()),
        ]);
        let pulls: Vec<PullRequest> = self
            .send(request, "list pull requests", deadline)?
            .json()
            .map_err(|e| UpdaterError::Api(format!("Failed to decode pull requests: {e}")))?;

        Ok(pulls.into_iter().map(ProposalRecord::from).collect())
    }

    fn create(
        &self,
        owner: &str,
        repo: &str,
        proposal: &NewProposal<'_>,
        deadline: &Deadline,
    ) -> Result<ProposalRecord> {
        let url = self.pulls_url(owner, repo)?;
        let request = self.client.post(url).json(proposal);
        let created: PullRequest = self
            .send(request, "create pull request", deadline)?
            .json()
            .map_err(|e| UpdaterError::Api(format!("Failed to decode created pull request: {e}")))?;
        Ok(created.into())
    }
}
