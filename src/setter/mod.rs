//! Marker-driven, format-preserving value substitution in YAML manifests.
//!
//! A field opts in by carrying a setter comment that names a release:
//!
//! ```yaml
//! spec:
//!   chart:
//!     spec:
//!       version: 6.0.0 # {"$helmversionupdate":"flux-system:podinfo"}
//! ```
//!
//! [`apply`] rewrites the scalar of every field whose setter name matches the
//! given `<namespace>:<name>` key and leaves every other byte untouched.

pub mod marker;

use crate::error::{Result, UpdaterError};
use marker::{BlockScalarTracker, LineMarker, classify_line, find_markers, render};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Setter key for a release: `<namespace>:<name>`.
pub fn setter_key(namespace: &str, name: &str) -> String {
    format!("{namespace}:{name}")
}

/// Rewrite every field under `root` marked for `key` to `new_value`.
///
/// Returns the number of fields whose value actually changed. Zero means no
/// applicable marker exists, or every marked field already holds `new_value`.
pub fn apply(root: &Path, key: &str, new_value: &str) -> Result<usize> {
    let mut changed = 0;
    for path in manifest_files(root)? {
        let text = fs::read_to_string(&path).map_err(|e| {
            UpdaterError::Patch(format!("Failed to read '{}': {e}", path.display()))
        })?;
        validate_manifest(&path, &text)?;

        let fields = find_markers(&text, key);
        if fields.is_empty() {
            continue;
        }
        let lines: Vec<usize> = fields.iter().map(|field| field.line + 1).collect();

        let (patched, count) = patch_text(&text, key, new_value, &path);
        if count == 0 {
            debug!(file = %path.display(), ?lines, "marked fields already up to date");
            continue;
        }

        fs::write(&path, patched).map_err(|e| {
            UpdaterError::Patch(format!("Failed to write '{}': {e}", path.display()))
        })?;
        debug!(file = %path.display(), ?lines, fields = count, "patched manifest");
        changed += count;
    }
    Ok(changed)
}

/// Substitute marked scalars in `text`; returns the new text and the number of changed fields.
pub fn patch_text(text: &str, key: &str, new_value: &str, origin: &Path) -> (String, usize) {
    let mut out = String::with_capacity(text.len());
    let mut changed = 0;
    let mut blocks = BlockScalarTracker::default();

    for (line_number, raw) in text.split_inclusive('\n').enumerate() {
        let body_len = raw.trim_end_matches(['\n', '\r']).len();
        let (body, terminator) = raw.split_at(body_len);
        if blocks.is_content(body) {
            out.push_str(raw);
            continue;
        }

        match classify_line(line_number, body, key) {
            LineMarker::Field(field) if field.value != new_value => {
                out.push_str(&body[..field.span.start]);
                out.push_str(&render(new_value, field.style));
                out.push_str(&body[field.span.end..]);
                out.push_str(terminator);
                changed += 1;
            }
            LineMarker::Unsupported(reason) => {
                debug!(
                    file = %origin.display(),
                    line = line_number + 1,
                    reason,
                    "skipping marked field"
                );
                out.push_str(raw);
            }
            _ => out.push_str(raw),
        }
    }

    (out, changed)
}

fn validate_manifest(path: &Path, text: &str) -> Result<()> {
    for document in serde_yaml::Deserializer::from_str(text) {
        serde_yaml::Value::deserialize(document).map_err(|e| {
            UpdaterError::Patch(format!("Failed to parse '{}': {e}", path.display()))
        })?;
    }
    Ok(())
}

/// YAML files below `root`, in a stable order; hidden directories are skipped.
fn manifest_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| {
            UpdaterError::Patch(format!("Failed to read directory '{}': {e}", dir.display()))
        })?;

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            let hidden = entry.file_name().to_string_lossy().starts_with('.');

            if file_type.is_dir() {
                if !hidden {
                    pending.push(path);
                }
            } else if file_type.is_file() && is_manifest(&path) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn is_manifest(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext))
}
