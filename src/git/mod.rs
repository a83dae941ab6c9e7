pub mod command;
pub mod workspace;

pub use workspace::{
    BranchSelection, CommitAuthor, CommitOutcome, Credentials, ManifestWorkspace,
    RepositoryWorkspace,
};
