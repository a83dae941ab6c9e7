use crate::deadline::Deadline;
use crate::error::{Result, UpdaterError};
use crate::git::command::GitRunner;
use std::fmt;
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, info};
use url::Url;

const REMOTE: &str = "origin";

/// Token used as the HTTP basic-auth username for clone and push.
#[derive(Clone)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    fn authenticate(&self, remote: &Url) -> Url {
        let mut url = remote.clone();
        // file:// and similar remotes carry no credentials.
        if url.set_username(&self.token).is_err() {
            return remote.clone();
        }
        url
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("token", &"***").finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

/// Default branch as it was when the clone was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadRef {
    pub sha: String,
    pub branch: String,
}

/// How a release branch was checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchSelection {
    /// New local branch from the captured default-branch head.
    Fresh,
    /// Existing remote branch, checked out with tracking.
    Resume,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { sha: String },
    Unchanged,
}

/// The operations the update pass needs from a checked-out manifest repository.
pub trait ManifestWorkspace {
    fn root(&self) -> &Path;

    /// Short name of the default branch captured at clone time.
    fn base_branch(&self) -> &str;

    fn select_branch(&mut self, name: &str) -> Result<BranchSelection>;

    fn commit_if_changed(&mut self, message: &str, author: &CommitAuthor)
    -> Result<CommitOutcome>;

    fn push(&mut self) -> Result<()>;
}

/// A shallow clone of the manifest repository in a private temporary directory.
///
/// The directory is removed by [`RepositoryWorkspace::close`] or, on any other
/// exit path, when the workspace is dropped.
pub struct RepositoryWorkspace {
    dir: TempDir,
    remote: Url,
    credentials: Credentials,
    head: HeadRef,
    branch: Option<String>,
    git: GitRunner,
    deadline: Deadline,
}

impl RepositoryWorkspace {
    /// Depth-1 clone of `remote` with every branch tip, so existing release
    /// branches can be resumed.
    pub fn clone(remote: &Url, credentials: Credentials, deadline: Deadline) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("helm-version-updater-")
            .tempdir()
            .map_err(|e| UpdaterError::Clone(format!("Failed to create temp directory: {e}")))?;

        let git = GitRunner::new(vec![credentials.token().to_string()]);
        let authenticated = credentials.authenticate(remote);

        info!(remote = %remote, "cloning manifest repository");
        git.run_checked(
            dir.path(),
            &[
                "clone",
                "--quiet",
                "--depth",
                "1",
                "--no-single-branch",
                authenticated.as_str(),
                ".",
            ],
            &deadline,
            UpdaterError::Clone,
        )?;

        // Keep the token out of .git/config; pushes authenticate explicitly.
        git.run_checked(
            dir.path(),
            &["remote", "set-url", REMOTE, remote.as_str()],
            &deadline,
            UpdaterError::Clone,
        )?;

        let sha = git
            .run_checked(dir.path(), &["rev-parse", "HEAD"], &deadline, UpdaterError::Clone)?
            .stdout
            .trim()
            .to_string();
        let branch = git
            .run_checked(
                dir.path(),
                &["symbolic-ref", "--short", "HEAD"],
                &deadline,
                UpdaterError::Clone,
            )?
            .stdout
            .trim()
            .to_string();

        info!(branch = %branch, sha = %sha, "captured default branch head");

        Ok(Self {
            dir,
            remote: remote.clone(),
            credentials,
            head: HeadRef { sha, branch },
            branch: None,
            git,
            deadline,
        })
    }

    pub fn current_branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    /// Delete the clone directory.
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!(path = %path.display(), "removed workspace");
        Ok(())
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        Ok(self
            .git
            .run_checked(self.dir.path(), args, &self.deadline, UpdaterError::Git)?
            .stdout)
    }

    fn remote_branch_exists(&self, name: &str) -> Result<bool> {
        let reference = format!("refs/remotes/{REMOTE}/{name}");
        let output = self.git.run(
            self.dir.path(),
            &["rev-parse", "--verify", "--quiet", &reference],
            &self.deadline,
        )?;
        Ok(output.success())
    }

    /// Drop anything an abandoned release left in the working tree.
    fn discard_changes(&self) -> Result<()> {
        self.git(&["reset", "--hard", "--quiet"])?;
        self.git(&["clean", "-fdq"])?;
        Ok(())
    }
}

impl ManifestWorkspace for RepositoryWorkspace {
    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn base_branch(&self) -> &str {
        &self.head.branch
    }

    fn select_branch(&mut self, name: &str) -> Result<BranchSelection> {
        self.discard_changes()?;

        let selection = if self.remote_branch_exists(name)? {
            let upstream = format!("{REMOTE}/{name}");
            self.git(&["checkout", "--quiet", "-B", name, "--track", &upstream])?;
            BranchSelection::Resume
        } else {
            let base = self.head.sha.clone();
            self.git(&["checkout", "--quiet", "-B", name, &base])?;
            BranchSelection::Fresh
        };

        debug!(branch = name, ?selection, "checked out release branch");
        self.branch = Some(name.to_string());
        Ok(selection)
    }

    fn commit_if_changed(
        &mut self,
        message: &str,
        author: &CommitAuthor,
    ) -> Result<CommitOutcome> {
        let status = self.git(&["status", "--porcelain"])?;
        if status.trim().is_empty() {
            return Ok(CommitOutcome::Unchanged);
        }

        self.git(&["add", "-A"])?;
        let name = format!("user.name={}", author.name);
        let email = format!("user.email={}", author.email);
        self.git(&[
            "-c",
            &name,
            "-c",
            &email,
            "-c",
            "commit.gpgsign=false",
            "commit",
            "--quiet",
            "-m",
            message,
        ])?;

        let sha = self.git(&["rev-parse", "HEAD"])?.trim().to_string();
        Ok(CommitOutcome::Committed { sha })
    }

    fn push(&mut self) -> Result<()> {
        let branch = self
            .current_branch()
            .map(str::to_string)
            .ok_or_else(|| UpdaterError::Push("no release branch checked out".to_string()))?;
        let refspec = format!("HEAD:refs/heads/{branch}");
        let authenticated = self.credentials.authenticate(&self.remote);

        self.git.run_checked(
            self.dir.path(),
            &["push", "--quiet", authenticated.as_str(), &refspec],
            &self.deadline,
            UpdaterError::Push,
        )?;
        info!(branch = %branch, "pushed release branch");
        Ok(())
    }
}
