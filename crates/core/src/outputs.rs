//! Output file references reported by ComfyUI and their on-disk location.
//!
//! ComfyUI describes every saved artifact as `{filename, subfolder, type}`
//! relative to one of its data directories. Only `type == "output"` files
//! are deliverables; `temp` files are previews that ComfyUI deletes.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// ComfyUI folder type for persisted results.
pub const KIND_OUTPUT: &str = "output";

/// ComfyUI folder type for transient previews.
pub const KIND_TEMP: &str = "temp";

/// A single file reference from a ComfyUI history entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    KIND_OUTPUT.to_string()
}

impl OutputFile {
    pub fn new(filename: impl Into<String>, subfolder: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            subfolder: subfolder.into(),
            kind: KIND_OUTPUT.to_string(),
        }
    }

    /// Whether this file is a deliverable that must exist on disk.
    pub fn is_persistent(&self) -> bool {
        self.kind == KIND_OUTPUT
    }

    /// `subfolder/filename`, or just `filename` at the root.
    pub fn relative_path(&self) -> String {
        if self.subfolder.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.subfolder, self.filename)
        }
    }
}

/// Resolve an output file against the ComfyUI output directory.
///
/// Rejects absolute paths and any `..` or root component so a history
/// entry cannot point outside `root`.
pub fn resolve_output_path(root: &Path, file: &OutputFile) -> Result<PathBuf, CoreError> {
    if file.filename.is_empty() {
        return Err(CoreError::Validation("output filename is empty".into()));
    }

    let mut resolved = root.to_path_buf();
    for part in [file.subfolder.as_str(), file.filename.as_str()] {
        for component in Path::new(part).components() {
            match component {
                Component::Normal(segment) => resolved.push(segment),
                Component::CurDir => {}
                _ => {
                    return Err(CoreError::Validation(format!(
                        "output path '{}' escapes the output directory",
                        file.relative_path()
                    )));
                }
            }
        }
    }
    Ok(resolved)
}
