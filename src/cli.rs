use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "helm-version-updater",
    about = "Open pull requests that bump Flux HelmRelease chart versions to the newest release",
    version,
    author
)]
pub struct Cli {
    /// Access token for cloning, pushing and opening pull requests
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: String,

    /// Name used for commits
    #[arg(long)]
    pub git_name: String,

    /// Email address used for commits
    #[arg(long)]
    pub git_email: String,

    /// Target repository in HTTPS form (e.g. https://github.com/org/gitops)
    #[arg(long)]
    pub target: String,

    /// Only patch manifests below this path of the repository
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Prefix for branch names and commit messages
    #[arg(long)]
    pub prefix: Option<String>,

    /// Snapshot of HelmRelease and HelmRepository objects ("-" reads stdin)
    #[arg(long, value_name = "FILE", default_value = "-")]
    pub releases: PathBuf,

    /// Deadline for the whole pass, in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = crate::deadline::DEFAULT_PASS_TIMEOUT.as_secs())]
    pub timeout: u64,

    /// Fail a release whose version is not a semantic version instead of skipping it
    #[arg(long)]
    pub strict_versions: bool,

    /// Base URL of the GitHub REST API
    #[arg(long, default_value = crate::proposal::DEFAULT_GITHUB_API)]
    pub github_api_url: String,

    /// Enable verbose output for debugging
    #[arg(short, long)]
    pub verbose: bool,
}
