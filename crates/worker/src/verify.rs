//! Output file verification against the ComfyUI output directory.

use std::path::PathBuf;

use renderwatch_core::outputs::{resolve_output_path, OutputFile};

/// Result of checking a set of output files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifiedOutputs {
    /// Relative paths of files that exist and are non-empty.
    pub present: Vec<String>,
    /// Relative paths of files that are absent, empty, not regular files
    /// or point outside the output directory.
    pub missing: Vec<String>,
}

/// Checks that files reported by ComfyUI actually landed on disk.
#[derive(Debug, Clone)]
pub struct OutputVerifier {
    root: PathBuf,
}

impl OutputVerifier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Verify persistent outputs; `temp` previews are skipped.
    pub async fn verify(&self, files: &[OutputFile]) -> VerifiedOutputs {
        let mut result = VerifiedOutputs::default();

        for file in files.iter().filter(|f| f.is_persistent()) {
            let relative = file.relative_path();
            let path = match resolve_output_path(&self.root, file) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(path = %relative, error = %e, "Rejected output path");
                    result.missing.push(relative);
                    continue;
                }
            };

            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() && meta.len() > 0 => result.present.push(relative),
                Ok(meta) => {
                    tracing::debug!(
                        path = %path.display(),
                        is_file = meta.is_file(),
                        len = meta.len(),
                        "Output file is empty or not a regular file",
                    );
                    result.missing.push(relative);
                }
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Output file not found");
                    result.missing.push(relative);
                }
            }
        }

        result
    }
}
