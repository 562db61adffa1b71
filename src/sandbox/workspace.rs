//! Per-cell isolated working areas.
//!
//! Every cell gets a fresh directory keyed by (snippet id, configuration
//! id) plus a uuid, so no two concurrent cells share mutable filesystem
//! state and repeated runs of the same cell never collide. Cleanup is
//! hygiene on every exit path, including forced termination; it is not
//! the isolation barrier itself.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Scoped working area for one execution cell.
pub struct CellWorkspace {
    root: PathBuf,
    source_file: PathBuf,
    artifact_file: PathBuf,
}

impl CellWorkspace {
    /// Create the working area and materialize the snippet source.
    pub fn create(
        base_dir: &Path,
        snippet_id: &str,
        configuration_id: &str,
        source: &str,
        extension: &str,
    ) -> io::Result<Self> {
        let dir_name = format!(
            "{snippet_id}__{configuration_id}__{}",
            Uuid::new_v4().simple()
        );
        let root = base_dir.join(sanitize(&dir_name));

        fs::create_dir_all(&root).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to create cell workspace {}: {e}", root.display()),
            )
        })?;

        let source_file = root.join(format!("snippet.{extension}"));
        fs::write(&source_file, source).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to write snippet source {}: {e}", source_file.display()),
            )
        })?;

        let artifact_file = root.join("artifact");
        Ok(Self {
            root,
            source_file,
            artifact_file,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    pub fn artifact_file(&self) -> &Path {
        &self.artifact_file
    }

    /// Remove the working area. Idempotent; failures are logged and
    /// swallowed because cleanup must never mask the cell's outcome.
    pub fn cleanup(&self) {
        if self.root.exists() {
            if let Err(e) = fs::remove_dir_all(&self.root) {
                log::warn!("failed to remove cell workspace {}: {e}", self.root.display());
            }
        }
    }
}

impl Drop for CellWorkspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Directory names are derived from catalog-supplied identifiers; strip
/// anything that could escape the base directory.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
