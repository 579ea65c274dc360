//! Shared value types for the ingestion flow.
//!
//! `DatasetIdentity` names the dataset a run operates on; `CandidateFile`
//! carries a selected file through admission and upload.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// DatasetIdentity
// ─────────────────────────────────────────────────────────────────────────────

/// The (namespace, project, dataset) triple that keys every durable record
/// and every remote route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetIdentity {
    pub namespace: String,
    pub project: String,
    pub dataset: String,
}

impl DatasetIdentity {
    /// Builds an identity, rejecting empty or whitespace-only components.
    pub fn new(
        namespace: impl Into<String>,
        project: impl Into<String>,
        dataset: impl Into<String>,
    ) -> Result<Self, AppError> {
        let identity = Self {
            namespace: namespace.into(),
            project: project.into(),
            dataset: dataset.into(),
        };
        for (label, value) in [
            ("namespace", &identity.namespace),
            ("project", &identity.project),
            ("dataset", &identity.dataset),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::InvalidIdentity(format!("{} is empty", label)));
            }
        }
        Ok(identity)
    }

    /// Renders the identity as `namespace/project/dataset` for logs and messages.
    pub fn storage_key(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.project, self.dataset)
    }
}

impl std::fmt::Display for DatasetIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CandidateFile
// ─────────────────────────────────────────────────────────────────────────────

/// A file selected in the dashboard, before admission.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    /// Display name including the extension, e.g. `roadmap-q3.pdf`.
    pub name: String,
    /// MIME type as declared by the picker, e.g. `application/pdf`.
    pub declared_mime: String,
    /// Full file contents.
    pub bytes: Vec<u8>,
}

impl CandidateFile {
    pub fn new(name: impl Into<String>, declared_mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            declared_mime: declared_mime.into(),
            bytes,
        }
    }

    /// File size in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Lowercased extension without the dot, if the name carries one.
    pub fn extension(&self) -> Option<String> {
        let name = self.name.trim_end_matches('.');
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_accepts_valid_triple() {
        let identity = DatasetIdentity::new("acme", "roadmap", "specs").unwrap();
        assert_eq!(identity.storage_key(), "acme/roadmap/specs");
        assert_eq!(identity.to_string(), "acme/roadmap/specs");
    }

    #[test]
    fn identity_rejects_empty_components() {
        for (ns, project, dataset) in [
            ("", "roadmap", "specs"),
            ("acme", "  ", "specs"),
            ("acme", "roadmap", ""),
        ] {
            let err = DatasetIdentity::new(ns, project, dataset).unwrap_err();
            assert!(matches!(err, AppError::InvalidIdentity(_)), "{:?}", err);
        }
    }

    #[test]
    fn extension_is_lowercased() {
        let file = CandidateFile::new("Report.PDF", "application/pdf", vec![1, 2, 3]);
        assert_eq!(file.extension().as_deref(), Some("pdf"));
        assert_eq!(file.size(), 3);
    }

    #[test]
    fn extension_absent_for_bare_names() {
        for name in ["README", ".gitignore", "notes."] {
            let file = CandidateFile::new(name, "text/plain", vec![]);
            assert_eq!(file.extension(), None, "{}", name);
        }
    }
}
