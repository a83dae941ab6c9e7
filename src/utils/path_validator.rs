use crate::error::{Result, UpdaterError};
use std::path::{Path, PathBuf};

/// Keeps manifest patching inside the cloned repository.
pub struct PathValidator;

impl PathValidator {
    /// Resolves `relative` against `root`, requiring an existing directory inside `root`.
    pub fn resolve_subdirectory(root: impl AsRef<Path>, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let root = root.as_ref();
        let relative = relative.as_ref();

        let canonical_root = root.canonicalize().map_err(|e| {
            UpdaterError::Config(format!("Invalid repository root '{}': {e}", root.display()))
        })?;

        let candidate = canonical_root.join(relative);
        let canonical = candidate.canonicalize().map_err(|e| {
            UpdaterError::Config(format!(
                "Path '{}' does not exist in the repository: {e}",
                relative.display()
            ))
        })?;

        if !canonical.starts_with(&canonical_root) {
            return Err(UpdaterError::Config(format!(
                "Path '{}' is outside the repository",
                relative.display()
            )));
        }

        if !canonical.is_dir() {
            return Err(UpdaterError::Config(format!(
                "Path '{}' is not a directory",
                relative.display()
            )));
        }

        Ok(canonical)
    }
}
