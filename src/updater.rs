use crate::cluster::{ReleaseTarget, Snapshot, UnresolvedRelease};
use crate::config::Config;
use crate::deadline::Deadline;
use crate::error::{Result, UpdaterError};
use crate::git::{
    BranchSelection, CommitAuthor, CommitOutcome, Credentials, ManifestWorkspace,
    RepositoryWorkspace,
};
use crate::helm::{HttpIndexSource, IndexSource, Resolution, VersionResolver};
use crate::proposal::{ChangeProposalManager, GitHubClient, ProposalApi, ProposalStatus};
use crate::setter;
use crate::utils::PathValidator;
use colored::Colorize;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Step of a release update that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Source,
    Resolve,
    Checkout,
    Patch,
    Commit,
    Push,
    Proposal,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Source => "source",
            Stage::Resolve => "resolve",
            Stage::Checkout => "checkout",
            Stage::Patch => "patch",
            Stage::Commit => "commit",
            Stage::Push => "push",
            Stage::Proposal => "proposal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    UpToDate,
    /// Nothing was patched: no manifest carries a marker for the release, or
    /// a resumed release branch already holds the new version.
    NoMarker,
    Unchanged {
        version: String,
    },
    Proposed {
        version: String,
        branch: String,
        selection: BranchSelection,
        proposal: ProposalStatus,
    },
}

impl ReleaseOutcome {
    pub fn describe(&self) -> String {
        match self {
            ReleaseOutcome::UpToDate => "up to date".to_string(),
            ReleaseOutcome::NoMarker => {
                "nothing to patch (no marker, or the release branch already holds the new version)"
                    .to_string()
            }
            ReleaseOutcome::Unchanged { version } => format!("already at {version}"),
            ReleaseOutcome::Proposed {
                version, proposal, ..
            } => match proposal {
                ProposalStatus::Created { url, .. } => format!("-> {version}, opened {url}"),
                ProposalStatus::AlreadyExists { number } => {
                    format!("-> {version}, pull request #{number} already open")
                }
            },
        }
    }
}

#[derive(Debug)]
pub struct ReleaseFailure {
    pub stage: Stage,
    pub error: UpdaterError,
}

impl ReleaseFailure {
    fn at(stage: Stage) -> impl FnOnce(UpdaterError) -> ReleaseFailure {
        move |error| ReleaseFailure { stage, error }
    }
}

#[derive(Debug)]
pub struct ReleaseReport {
    pub namespace: String,
    pub name: String,
    pub result: std::result::Result<ReleaseOutcome, ReleaseFailure>,
}

#[derive(Debug, Default)]
pub struct PassSummary {
    pub reports: Vec<ReleaseReport>,
    /// Error that ended the pass early, with the number of releases never attempted.
    pub aborted: Option<(UpdaterError, usize)>,
}

impl PassSummary {
    /// `Err` with the aborting error, once the report has been printed.
    pub fn into_result(self) -> Result<()> {
        match self.aborted {
            Some((error, _)) => Err(error),
            None => Ok(()),
        }
    }

    pub fn proposed(&self) -> usize {
        self.count(|r| matches!(r, Ok(ReleaseOutcome::Proposed { .. })))
    }

    pub fn up_to_date(&self) -> usize {
        self.count(|r| {
            matches!(
                r,
                Ok(ReleaseOutcome::UpToDate | ReleaseOutcome::Unchanged { .. })
            )
        })
    }

    pub fn without_marker(&self) -> usize {
        self.count(|r| matches!(r, Ok(ReleaseOutcome::NoMarker)))
    }

    pub fn failed(&self) -> usize {
        self.count(|r| r.is_err())
    }

    fn count(
        &self,
        predicate: impl Fn(&std::result::Result<ReleaseOutcome, ReleaseFailure>) -> bool,
    ) -> usize {
        self.reports.iter().filter(|r| predicate(&r.result)).count()
    }
}

/// Per-pass values the orchestrator needs from [`Config`].
#[derive(Debug, Clone)]
pub struct PassSettings {
    pub author: CommitAuthor,
    pub owner: String,
    pub repository: String,
    pub subdirectory: Option<PathBuf>,
    pub prefix: Option<String>,
}

impl From<&Config> for PassSettings {
    fn from(config: &Config) -> Self {
        Self {
            author: config.author.clone(),
            owner: config.owner.clone(),
            repository: config.repository.clone(),
            subdirectory: config.subdirectory.clone(),
            prefix: config.prefix.clone(),
        }
    }
}

/// `[<prefix>-]helmupdate-<namespace>-<name>`
pub fn release_branch(prefix: Option<&str>, namespace: &str, name: &str) -> String {
    let branch = format!("helmupdate-{namespace}-{name}");
    match prefix {
        Some(prefix) => format!("{prefix}-{branch}"),
        None => branch,
    }
}

pub fn commit_message(prefix: Option<&str>, namespace: &str, name: &str, version: &str) -> String {
    let message = format!("Update HelmRelease {namespace}/{name} to {version}");
    match prefix {
        Some(prefix) => format!("[{prefix}] {message}"),
        None => message,
    }
}

pub fn proposal_title(namespace: &str, name: &str) -> String {
    format!("Update HelmRelease {namespace}/{name}")
}

/// Drives one update pass over every declared release against a single workspace.
pub struct UpdateOrchestrator<S: IndexSource, A: ProposalApi> {
    resolver: VersionResolver<S>,
    proposals: ChangeProposalManager<A>,
    settings: PassSettings,
}

impl<S: IndexSource, A: ProposalApi> UpdateOrchestrator<S, A> {
    pub fn new(
        resolver: VersionResolver<S>,
        proposals: ChangeProposalManager<A>,
        settings: PassSettings,
    ) -> Self {
        Self {
            resolver,
            proposals,
            settings,
        }
    }

    /// Update every release in order. A failing release is reported and the
    /// loop moves on; a fatal error such as an expired deadline stops the loop
    /// and is kept in [`PassSummary::aborted`] next to the finished reports.
    pub fn run_pass<W: ManifestWorkspace>(
        &self,
        workspace: &mut W,
        releases: Vec<std::result::Result<ReleaseTarget, UnresolvedRelease>>,
        deadline: &Deadline,
    ) -> PassSummary {
        let mut summary = PassSummary::default();
        let total = releases.len();

        for (position, release) in releases.into_iter().enumerate() {
            let report = match release {
                Ok(target) => ReleaseReport {
                    result: self.update_release(workspace, &target, deadline),
                    namespace: target.namespace,
                    name: target.name,
                },
                Err(unresolved) => ReleaseReport {
                    namespace: unresolved.namespace,
                    name: unresolved.name,
                    result: Err(ReleaseFailure {
                        stage: Stage::Source,
                        error: unresolved.error,
                    }),
                },
            };

            match &report.result {
                Ok(ReleaseOutcome::NoMarker) => {
                    debug!(namespace = %report.namespace, name = %report.name, "no marker to update");
                }
                Ok(outcome) => {
                    debug!(namespace = %report.namespace, name = %report.name, ?outcome, "release done");
                }
                Err(failure) => {
                    warn!(
                        namespace = %report.namespace,
                        name = %report.name,
                        stage = %failure.stage,
                        error = %failure.error,
                        "release skipped"
                    );
                }
            }

            match report.result {
                Err(failure) if failure.error.is_fatal() => {
                    summary.aborted = Some((failure.error, total - position));
                    break;
                }
                result => summary.reports.push(ReleaseReport { result, ..report }),
            }
        }

        summary
    }

    fn update_release<W: ManifestWorkspace>(
        &self,
        workspace: &mut W,
        target: &ReleaseTarget,
        deadline: &Deadline,
    ) -> std::result::Result<ReleaseOutcome, ReleaseFailure> {
        let (namespace, name) = (target.namespace.as_str(), target.name.as_str());
        deadline
            .remaining("release update")
            .map_err(ReleaseFailure::at(Stage::Resolve))?;

        info!(namespace, name, chart = %target.chart_name, "checking release");
        let resolution = self
            .resolver
            .resolve_latest(
                &target.repository_url,
                &target.chart_name,
                &target.current_version,
                deadline,
            )
            .map_err(ReleaseFailure::at(Stage::Resolve))?;
        let Resolution::Upgrade { target_version } = resolution else {
            return Ok(ReleaseOutcome::UpToDate);
        };
        info!(namespace, name, from = %target.current_version, to = %target_version, "newer chart available");

        let prefix = self.settings.prefix.as_deref();
        let branch = release_branch(prefix, namespace, name);
        let selection = workspace
            .select_branch(&branch)
            .map_err(ReleaseFailure::at(Stage::Checkout))?;

        let patch_root = match &self.settings.subdirectory {
            Some(relative) => PathValidator::resolve_subdirectory(workspace.root(), relative)
                .map_err(ReleaseFailure::at(Stage::Patch))?,
            None => workspace.root().to_path_buf(),
        };
        let changed = setter::apply(
            &patch_root,
            &setter::setter_key(namespace, name),
            &target_version,
        )
        .map_err(ReleaseFailure::at(Stage::Patch))?;
        if changed == 0 {
            return Ok(ReleaseOutcome::NoMarker);
        }

        let message = commit_message(prefix, namespace, name, &target_version);
        let outcome = workspace
            .commit_if_changed(&message, &self.settings.author)
            .map_err(ReleaseFailure::at(Stage::Commit))?;
        if outcome == CommitOutcome::Unchanged {
            return Ok(ReleaseOutcome::Unchanged {
                version: target_version,
            });
        }

        workspace.push().map_err(ReleaseFailure::at(Stage::Push))?;

        let base = workspace.base_branch().to_string();
        let proposal = self
            .proposals
            .ensure(
                &self.settings.owner,
                &self.settings.repository,
                &base,
                &branch,
                &proposal_title(namespace, name),
                deadline,
            )
            .map_err(ReleaseFailure::at(Stage::Proposal))?;

        Ok(ReleaseOutcome::Proposed {
            version: target_version,
            branch,
            selection,
            proposal,
        })
    }
}

/// Run one pass against the configured repository with production clients.
pub fn run(config: &Config, snapshot: &Snapshot) -> Result<PassSummary> {
    let deadline = Deadline::after(config.timeout);
    if snapshot.release_count() == 0 {
        info!("no HelmRelease objects in snapshot");
        return Ok(PassSummary::default());
    }
    info!(releases = snapshot.release_count(), "starting update pass");
    let releases = snapshot.release_targets();

    let resolver = VersionResolver::new(HttpIndexSource::new()?, config.version_policy);
    let proposals = ChangeProposalManager::new(GitHubClient::new(
        &config.api_base,
        config.token.clone(),
    )?);
    let orchestrator = UpdateOrchestrator::new(resolver, proposals, PassSettings::from(config));

    let mut workspace = RepositoryWorkspace::clone(
        &config.target,
        Credentials::new(config.token.clone()),
        deadline,
    )?;
    let summary = orchestrator.run_pass(&mut workspace, releases, &deadline);
    workspace.close()?;
    Ok(summary)
}

pub fn print_summary(summary: &PassSummary) {
    println!("\n{}", "Update summary".cyan().bold());
    for report in &summary.reports {
        let release = format!("{}/{}", report.namespace, report.name);
        match &report.result {
            Ok(outcome @ ReleaseOutcome::Proposed { .. }) => {
                println!(
                    "  {} {} {}",
                    "✓".green(),
                    release.bright_white(),
                    outcome.describe().green()
                );
            }
            Ok(outcome) => {
                println!("  {} {} {}", "•".dimmed(), release, outcome.describe().dimmed());
            }
            Err(failure) => {
                println!(
                    "  {} {} failed at {}: {}",
                    "✗".red(),
                    release.bright_white(),
                    failure.stage.to_string().yellow(),
                    failure.error
                );
            }
        }
    }
    if let Some((error, pending)) = &summary.aborted {
        println!(
            "  {} pass aborted, {} release(s) not processed: {}",
            "✗".red(),
            pending,
            error
        );
    }
    println!(
        "\n{} proposed, {} up to date, {} with nothing to patch, {} failed",
        summary.proposed().to_string().green().bold(),
        summary.up_to_date(),
        summary.without_marker(),
        if summary.failed() > 0 {
            summary.failed().to_string().red().bold()
        } else {
            summary.failed().to_string().normal()
        }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helm::UnparsableVersionPolicy;
    use crate::proposal::{NewProposal, ProposalRecord};
    use std::cell::RefCell;
    use std::collections::{BTreeMap, HashMap};
    use std::fs;
    use std::path::Path;
    use std::rc::Rc;
    use std::time::Duration;
    use tempfile::TempDir;
    use url::Url;

    const REPO: &str = "https://charts.example.com/";
    const SLOW_REPO: &str = "https://slow.example.com/";

    struct StaticIndex {
        indexes: HashMap<String, String>,
        expired: Vec<String>,
    }

    impl IndexSource for StaticIndex {
        fn fetch_index(&self, repository: &Url, _deadline: &Deadline) -> Result<String> {
            if self.expired.iter().any(|url| url == repository.as_str()) {
                return Err(UpdaterError::Timeout("chart index fetch".to_string()));
            }
            self.indexes
                .get(repository.as_str())
                .cloned()
                .ok_or_else(|| UpdaterError::Fetch(format!("{repository}: 404")))
        }
    }

    fn index(charts: &[(&str, &[&str])]) -> StaticIndex {
        let mut text = String::from("apiVersion: v1\nentries:\n");
        for (chart, versions) in charts {
            text.push_str(&format!("  {chart}:\n"));
            for version in *versions {
                text.push_str(&format!("    - name: {chart}\n      version: {version}\n"));
            }
        }
        StaticIndex {
            indexes: HashMap::from([(REPO.to_string(), text)]),
            expired: Vec::new(),
        }
    }

    #[derive(Default)]
    struct ApiState {
        open: Vec<ProposalRecord>,
        created: Vec<(String, String, String)>,
    }

    #[derive(Clone, Default)]
    struct RecordingApi {
        state: Rc<RefCell<ApiState>>,
    }

    impl ProposalApi for RecordingApi {
        fn list_open(
            &self,
            _owner: &str,
            _repo: &str,
            _base: &str,
            _head: &str,
            _deadline: &Deadline,
        ) -> Result<Vec<ProposalRecord>> {
            Ok(self.state.borrow().open.clone())
        }

        fn create(
            &self,
            _owner: &str,
            _repo: &str,
            proposal: &NewProposal<'_>,
            _deadline: &Deadline,
        ) -> Result<ProposalRecord> {
            let mut state = self.state.borrow_mut();
            state.created.push((
                proposal.base.to_string(),
                proposal.head.to_string(),
                proposal.title.to_string(),
            ));
            Ok(ProposalRecord {
                number: 7,
                base: proposal.base.to_string(),
                head: proposal.head.to_string(),
                title: proposal.title.to_string(),
                url: "https://github.com/octo/gitops/pull/7".to_string(),
            })
        }
    }

    /// In-memory stand-in for a cloned repository: a scratch directory plus
    /// the committed file contents per branch.
    struct FakeWorkspace {
        dir: TempDir,
        base: String,
        branches: HashMap<String, BTreeMap<PathBuf, String>>,
        current: Option<String>,
        commits: Vec<String>,
        pushed: Vec<String>,
        selected: Vec<String>,
    }

    impl FakeWorkspace {
        fn with_files(files: &[(&str, &str)]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            for (path, content) in files {
                let full = dir.path().join(path);
                fs::create_dir_all(full.parent().unwrap()).unwrap();
                fs::write(full, content).unwrap();
            }
            let base = "main".to_string();
            let tree = read_tree(dir.path());
            Self {
                dir,
                branches: HashMap::from([(base.clone(), tree)]),
                base,
                current: None,
                commits: Vec::new(),
                pushed: Vec::new(),
                selected: Vec::new(),
            }
        }

        fn remote_branch(&mut self, name: &str, files: &[(&str, &str)]) {
            let mut tree = self.branches[&self.base].clone();
            for (path, content) in files {
                tree.insert(PathBuf::from(path), content.to_string());
            }
            self.branches.insert(name.to_string(), tree);
            self.pushed.push(name.to_string());
        }

        fn checkout(&self, tree: &BTreeMap<PathBuf, String>) {
            for (path, content) in tree {
                fs::write(self.dir.path().join(path), content).unwrap();
            }
        }

        fn read(&self, path: &str) -> String {
            fs::read_to_string(self.dir.path().join(path)).unwrap()
        }
    }

    fn read_tree(root: &Path) -> BTreeMap<PathBuf, String> {
        let mut tree = BTreeMap::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    let relative = path.strip_prefix(root).unwrap().to_path_buf();
                    tree.insert(relative, fs::read_to_string(&path).unwrap());
                }
            }
        }
        tree
    }

    impl ManifestWorkspace for FakeWorkspace {
        fn root(&self) -> &Path {
            self.dir.path()
        }

        fn base_branch(&self) -> &str {
            &self.base
        }

        fn select_branch(&mut self, name: &str) -> Result<BranchSelection> {
            self.selected.push(name.to_string());
            let (selection, tree) = match self.branches.get(name) {
                Some(tree) if self.pushed.iter().any(|b| b == name) => {
                    (BranchSelection::Resume, tree.clone())
                }
                _ => (BranchSelection::Fresh, self.branches[&self.base].clone()),
            };
            self.checkout(&tree);
            self.branches.insert(name.to_string(), tree);
            self.current = Some(name.to_string());
            Ok(selection)
        }

        fn commit_if_changed(
            &mut self,
            message: &str,
            _author: &CommitAuthor,
        ) -> Result<CommitOutcome> {
            let branch = self.current.clone().unwrap();
            let tree = read_tree(self.dir.path());
            if self.branches[&branch] == tree {
                return Ok(CommitOutcome::Unchanged);
            }
            self.branches.insert(branch, tree);
            self.commits.push(message.to_string());
            Ok(CommitOutcome::Committed {
                sha: format!("{:040}", self.commits.len()),
            })
        }

        fn push(&mut self) -> Result<()> {
            let branch = self.current.clone().unwrap();
            if !self.pushed.contains(&branch) {
                self.pushed.push(branch);
            }
            Ok(())
        }
    }

    fn release(namespace: &str, name: &str, chart: &str, version: &str) -> ReleaseTarget {
        ReleaseTarget {
            namespace: namespace.to_string(),
            name: name.to_string(),
            chart_name: chart.to_string(),
            current_version: version.to_string(),
            repository_url: Url::parse(REPO).unwrap(),
        }
    }

    fn settings(prefix: Option<&str>) -> PassSettings {
        PassSettings {
            author: CommitAuthor {
                name: "Updater Bot".to_string(),
                email: "bot@example.com".to_string(),
            },
            owner: "octo".to_string(),
            repository: "gitops".to_string(),
            subdirectory: None,
            prefix: prefix.map(str::to_string),
        }
    }

    fn orchestrator(
        source: StaticIndex,
        api: &RecordingApi,
        settings: PassSettings,
    ) -> UpdateOrchestrator<StaticIndex, RecordingApi> {
        UpdateOrchestrator::new(
            VersionResolver::new(source, UnparsableVersionPolicy::Skip),
            ChangeProposalManager::new(api.clone()),
            settings,
        )
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(60))
    }

    const MANIFEST: &str = "spec:\n  chart:\n    spec:\n      chart: web\n      version: 1.1.0 # {\"$helmversionupdate\":\"apps:web\"}\n";

    #[test]
    fn names_follow_release_identity() {
        assert_eq!(release_branch(None, "apps", "web"), "helmupdate-apps-web");
        assert_eq!(
            release_branch(Some("prod"), "apps", "web"),
            "prod-helmupdate-apps-web"
        );
        assert_eq!(
            commit_message(Some("prod"), "apps", "web", "1.2.0"),
            "[prod] Update HelmRelease apps/web to 1.2.0"
        );
        assert_eq!(
            commit_message(None, "apps", "web", "1.2.0"),
            "Update HelmRelease apps/web to 1.2.0"
        );
        assert_eq!(proposal_title("apps", "web"), "Update HelmRelease apps/web");
    }

    #[test]
    fn upgrade_commits_pushes_and_opens_one_proposal() {
        let api = RecordingApi::default();
        let updater = orchestrator(index(&[("web", &["1.1.0", "1.2.0"])]), &api, settings(None));
        let mut workspace = FakeWorkspace::with_files(&[("apps/web.yaml", MANIFEST)]);

        let summary = updater.run_pass(
            &mut workspace,
            vec![Ok(release("apps", "web", "web", "1.1.0"))],
            &deadline(),
        );

        assert_eq!(summary.proposed(), 1);
        assert_eq!(
            summary.reports[0].result.as_ref().unwrap(),
            &ReleaseOutcome::Proposed {
                version: "1.2.0".to_string(),
                branch: "helmupdate-apps-web".to_string(),
                selection: BranchSelection::Fresh,
                proposal: ProposalStatus::Created {
                    number: 7,
                    url: "https://github.com/octo/gitops/pull/7".to_string(),
                },
            }
        );
        assert_eq!(workspace.commits, vec!["Update HelmRelease apps/web to 1.2.0"]);
        assert!(workspace.pushed.contains(&"helmupdate-apps-web".to_string()));
        assert!(workspace.read("apps/web.yaml").contains("version: 1.2.0 # {"));
        assert_eq!(
            api.state.borrow().created,
            vec![(
                "main".to_string(),
                "helmupdate-apps-web".to_string(),
                "Update HelmRelease apps/web".to_string()
            )]
        );
    }

    #[test]
    fn open_proposal_is_reused() {
        let api = RecordingApi::default();
        api.state.borrow_mut().open.push(ProposalRecord {
            number: 3,
            base: "main".to_string(),
            head: "helmupdate-apps-web".to_string(),
            title: "Update HelmRelease apps/web".to_string(),
            url: "https://github.com/octo/gitops/pull/3".to_string(),
        });
        let updater = orchestrator(index(&[("web", &["1.2.0"])]), &api, settings(None));
        let mut workspace = FakeWorkspace::with_files(&[("web.yaml", MANIFEST)]);

        let summary = updater.run_pass(
            &mut workspace,
            vec![Ok(release("apps", "web", "web", "1.1.0"))],
            &deadline(),
        );

        assert!(matches!(
            summary.reports[0].result,
            Ok(ReleaseOutcome::Proposed {
                proposal: ProposalStatus::AlreadyExists { number: 3 },
                ..
            })
        ));
        assert!(api.state.borrow().created.is_empty());
    }

    #[test]
    fn failing_release_does_not_stop_the_pass() {
        let api = RecordingApi::default();
        let updater = orchestrator(index(&[("web", &["1.2.0"])]), &api, settings(None));
        let mut workspace = FakeWorkspace::with_files(&[("web.yaml", MANIFEST)]);

        let summary = updater.run_pass(
            &mut workspace,
            vec![
                Ok(release("apps", "gone", "missing-chart", "1.0.0")),
                Ok(release("apps", "web", "web", "1.1.0")),
            ],
            &deadline(),
        );

        let failure = summary.reports[0].result.as_ref().unwrap_err();
        assert_eq!(failure.stage, Stage::Resolve);
        assert!(matches!(failure.error, UpdaterError::ChartNotFound(_)));
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.proposed(), 1);
        assert_eq!(workspace.selected, vec!["helmupdate-apps-web"]);
        assert_eq!(workspace.commits.len(), 1);
    }

    #[test]
    fn up_to_date_release_touches_nothing() {
        let api = RecordingApi::default();
        let updater = orchestrator(index(&[("web", &["1.1.0"])]), &api, settings(None));
        let mut workspace = FakeWorkspace::with_files(&[("web.yaml", MANIFEST)]);

        let summary = updater.run_pass(
            &mut workspace,
            vec![Ok(release("apps", "web", "web", "1.1.0"))],
            &deadline(),
        );

        assert_eq!(summary.up_to_date(), 1);
        assert!(workspace.selected.is_empty());
        assert_eq!(workspace.read("web.yaml"), MANIFEST);
    }

    #[test]
    fn release_without_marker_is_skipped_quietly() {
        let api = RecordingApi::default();
        let updater = orchestrator(index(&[("web", &["1.2.0"])]), &api, settings(None));
        let mut workspace =
            FakeWorkspace::with_files(&[("web.yaml", "spec:\n  version: 1.1.0\n")]);

        let summary = updater.run_pass(
            &mut workspace,
            vec![Ok(release("apps", "web", "web", "1.1.0"))],
            &deadline(),
        );

        assert_eq!(summary.without_marker(), 1);
        assert!(workspace.commits.is_empty());
        assert!(api.state.borrow().created.is_empty());
    }

    #[test]
    fn existing_release_branch_is_resumed() {
        let api = RecordingApi::default();
        let updater = orchestrator(index(&[("web", &["1.3.0"])]), &api, settings(Some("prod")));
        let mut workspace = FakeWorkspace::with_files(&[("web.yaml", MANIFEST)]);
        workspace.remote_branch(
            "prod-helmupdate-apps-web",
            &[(
                "web.yaml",
                "spec:\n  chart:\n    spec:\n      chart: web\n      version: 1.2.0 # {\"$helmversionupdate\":\"apps:web\"}\n",
            )],
        );

        let summary = updater.run_pass(
            &mut workspace,
            vec![Ok(release("apps", "web", "web", "1.1.0"))],
            &deadline(),
        );

        let Ok(ReleaseOutcome::Proposed {
            selection, branch, ..
        }) = &summary.reports[0].result
        else {
            panic!("expected a proposal: {:?}", summary.reports[0].result);
        };
        assert_eq!(*selection, BranchSelection::Resume);
        assert_eq!(branch, "prod-helmupdate-apps-web");
        assert_eq!(
            workspace.commits,
            vec!["[prod] Update HelmRelease apps/web to 1.3.0"]
        );
        assert_eq!(api.state.borrow().created.len(), 1);
    }

    #[test]
    fn unresolved_sources_are_reported() {
        let api = RecordingApi::default();
        let updater = orchestrator(index(&[]), &api, settings(None));
        let mut workspace = FakeWorkspace::with_files(&[]);

        let summary = updater.run_pass(
            &mut workspace,
            vec![Err(UnresolvedRelease {
                namespace: "apps".to_string(),
                name: "web".to_string(),
                error: UpdaterError::Snapshot("HelmRepository apps/charts not found".into()),
            })],
            &deadline(),
        );

        let failure = summary.reports[0].result.as_ref().unwrap_err();
        assert_eq!(failure.stage, Stage::Source);
    }

    #[test]
    fn subdirectory_limits_patching() {
        let api = RecordingApi::default();
        let mut pass = settings(None);
        pass.subdirectory = Some(PathBuf::from("clusters/prod"));
        let updater = orchestrator(index(&[("web", &["1.2.0"])]), &api, pass);
        let mut workspace = FakeWorkspace::with_files(&[
            ("clusters/prod/web.yaml", MANIFEST),
            ("clusters/staging/web.yaml", MANIFEST),
        ]);

        updater.run_pass(
            &mut workspace,
            vec![Ok(release("apps", "web", "web", "1.1.0"))],
            &deadline(),
        );

        assert!(workspace.read("clusters/prod/web.yaml").contains("1.2.0"));
        assert_eq!(workspace.read("clusters/staging/web.yaml"), MANIFEST);
    }

    #[test]
    fn expired_deadline_aborts_the_pass() {
        let api = RecordingApi::default();
        let updater = orchestrator(index(&[("web", &["1.2.0"])]), &api, settings(None));
        let mut workspace = FakeWorkspace::with_files(&[("web.yaml", MANIFEST)]);
        let expired = Deadline::after(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));

        let summary = updater.run_pass(
            &mut workspace,
            vec![
                Ok(release("apps", "web", "web", "1.1.0")),
                Ok(release("apps", "api", "web", "1.1.0")),
            ],
            &expired,
        );

        assert!(summary.reports.is_empty());
        assert!(matches!(summary.aborted, Some((UpdaterError::Timeout(_), 2))));
        assert!(workspace.selected.is_empty());
        assert!(matches!(
            summary.into_result(),
            Err(UpdaterError::Timeout(_))
        ));
    }

    #[test]
    fn finished_releases_survive_an_abort() {
        let api = RecordingApi::default();
        let mut source = index(&[("web", &["1.2.0"])]);
        source.expired.push(SLOW_REPO.to_string());
        let updater = orchestrator(source, &api, settings(None));
        let mut workspace = FakeWorkspace::with_files(&[("web.yaml", MANIFEST)]);
        let mut slow = release("apps", "slow", "slow", "1.0.0");
        slow.repository_url = Url::parse(SLOW_REPO).unwrap();

        let summary = updater.run_pass(
            &mut workspace,
            vec![
                Ok(release("apps", "web", "web", "1.1.0")),
                Ok(slow),
                Ok(release("apps", "later", "web", "1.1.0")),
            ],
            &deadline(),
        );

        assert_eq!(summary.proposed(), 1);
        assert_eq!(summary.reports.len(), 1);
        assert_eq!(summary.reports[0].name, "web");
        assert!(matches!(summary.aborted, Some((UpdaterError::Timeout(_), 2))));
        assert_eq!(workspace.selected, vec!["helmupdate-apps-web"]);
        assert_eq!(api.state.borrow().created.len(), 1);
    }

    #[test]
    fn outcomes_describe_themselves() {
        assert_eq!(ReleaseOutcome::UpToDate.describe(), "up to date");
        assert!(
            ReleaseOutcome::NoMarker
                .describe()
                .contains("release branch already holds the new version")
        );
        let proposed = ReleaseOutcome::Proposed {
            version: "1.2.0".to_string(),
            branch: "helmupdate-apps-web".to_string(),
            selection: BranchSelection::Resume,
            proposal: ProposalStatus::AlreadyExists { number: 3 },
        };
        assert_eq!(proposed.describe(), "-> 1.2.0, pull request #3 already open");
    }

    #[test]
    fn summary_counts_each_outcome() {
        let summary = PassSummary {
            reports: vec![
                ReleaseReport {
                    namespace: "a".into(),
                    name: "x".into(),
                    result: Ok(ReleaseOutcome::UpToDate),
                },
                ReleaseReport {
                    namespace: "a".into(),
                    name: "y".into(),
                    result: Ok(ReleaseOutcome::Unchanged {
                        version: "1.0.0".into(),
                    }),
                },
                ReleaseReport {
                    namespace: "a".into(),
                    name: "z".into(),
                    result: Err(ReleaseFailure {
                        stage: Stage::Push,
                        error: UpdaterError::Push("rejected".into()),
                    }),
                },
            ],
            aborted: None,
        };
        assert_eq!(summary.up_to_date(), 2);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.proposed(), 0);
        assert!(summary.into_result().is_ok());
        assert_eq!(Stage::Push.to_string(), "push");
    }
}
