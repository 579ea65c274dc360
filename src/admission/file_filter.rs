//! Pre-upload file admission with bounded content sniffing.
//!
//! Every file picked in the dashboard passes through here before any network
//! traffic. Checks are cheap and purely local:
//! - Extension allow-list
//! - Declared MIME type consistent with the extension
//! - Content probe on a bounded prefix (magic bytes or UTF-8 sample)
//!
//! The filter is a pure function of its inputs: the same file set always
//! splits the same way.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::CandidateFile;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum prefix inspected by the content probe (8 KB).
pub const SNIFF_SAMPLE_SIZE: usize = 8 * 1024;

/// ZIP local-file-header magic, shared by docx/xlsx containers.
const ZIP_MAGIC: &[u8] = &[0x50, 0x4B, 0x03, 0x04];

/// PDF header magic.
const PDF_MAGIC: &[u8] = b"%PDF-";

// ─────────────────────────────────────────────────────────────────────────────
// Policy table
// ─────────────────────────────────────────────────────────────────────────────

/// Content probe applied to the sniffed prefix of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentProbe {
    /// Prefix must start with the given magic bytes.
    Magic(&'static [u8]),
    /// Sampled prefix must decode as UTF-8 (tolerating a trailing partial
    /// code point at the sample boundary).
    Utf8Text,
    /// UTF-8 text whose first non-whitespace byte is one of the given bytes.
    Utf8LeadByte(&'static [u8]),
}

struct FileTypeRule {
    extension: &'static str,
    mime_types: &'static [&'static str],
    probe: ContentProbe,
}

/// Built-in rules for the document types the dashboard accepts.
const FILE_TYPE_RULES: &[FileTypeRule] = &[
    FileTypeRule {
        extension: "pdf",
        mime_types: &["application/pdf"],
        probe: ContentProbe::Magic(PDF_MAGIC),
    },
    FileTypeRule {
        extension: "txt",
        mime_types: &["text/plain"],
        probe: ContentProbe::Utf8Text,
    },
    FileTypeRule {
        extension: "md",
        mime_types: &["text/markdown", "text/plain"],
        probe: ContentProbe::Utf8Text,
    },
    FileTypeRule {
        extension: "csv",
        mime_types: &["text/csv", "application/csv", "text/plain"],
        probe: ContentProbe::Utf8Text,
    },
    FileTypeRule {
        extension: "json",
        mime_types: &["application/json", "text/json"],
        probe: ContentProbe::Utf8LeadByte(b"{["),
    },
    FileTypeRule {
        extension: "html",
        mime_types: &["text/html"],
        probe: ContentProbe::Utf8LeadByte(b"<"),
    },
    FileTypeRule {
        extension: "docx",
        mime_types: &[
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ],
        probe: ContentProbe::Magic(ZIP_MAGIC),
    },
    FileTypeRule {
        extension: "xlsx",
        mime_types: &["application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"],
        probe: ContentProbe::Magic(ZIP_MAGIC),
    },
];

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Why a file was turned away before upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    /// File is empty (0 bytes).
    EmptyFile,
    /// File name carries no extension.
    MissingExtension,
    /// Extension is not in the accepted set.
    UnsupportedExtension { extension: String },
    /// Declared MIME type does not match the extension.
    MimeMismatch {
        declared: String,
        expected: Vec<String>,
    },
    /// File contents do not look like the declared type.
    ContentMismatch { expected: String },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::EmptyFile => write!(f, "file is empty"),
            RejectionReason::MissingExtension => write!(f, "file name has no extension"),
            RejectionReason::UnsupportedExtension { extension } => {
                write!(f, "unsupported file type .{}", extension)
            }
            RejectionReason::MimeMismatch { declared, expected } => write!(
                f,
                "declared type {} does not match extension (expected {})",
                declared,
                expected.join(" or ")
            ),
            RejectionReason::ContentMismatch { expected } => {
                write!(f, "file contents are not valid {}", expected)
            }
        }
    }
}

/// A file turned away by the filter, with the first check that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub file_name: String,
    pub reason: RejectionReason,
}

/// Outcome of running the filter over a selection.
#[derive(Debug)]
pub struct AdmissionVerdict {
    /// Files cleared for upload, in input order.
    pub accepted: Vec<CandidateFile>,
    /// Files turned away, in input order.
    pub rejections: Vec<Rejection>,
}

impl AdmissionVerdict {
    /// True when at least one file was selected but none survived.
    pub fn all_rejected(&self) -> bool {
        self.accepted.is_empty() && !self.rejections.is_empty()
    }
}

/// The accepted-suffix set and its per-type checks.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    extensions: Vec<&'static str>,
}

impl Default for AdmissionPolicy {
    /// Accepts every built-in document type.
    fn default() -> Self {
        Self {
            extensions: FILE_TYPE_RULES.iter().map(|r| r.extension).collect(),
        }
    }
}

impl AdmissionPolicy {
    /// Restricts the policy to the given extensions (lowercase, no dot).
    /// Extensions without a built-in rule are ignored.
    pub fn with_extensions(extensions: &[&str]) -> Self {
        Self {
            extensions: FILE_TYPE_RULES
                .iter()
                .map(|r| r.extension)
                .filter(|known| extensions.iter().any(|e| e.eq_ignore_ascii_case(known)))
                .collect(),
        }
    }

    /// Extensions currently accepted.
    pub fn accepted_extensions(&self) -> &[&'static str] {
        &self.extensions
    }

    /// Splits a selection into accepted files and typed rejections.
    ///
    /// Checks run per file in order: empty-file, extension, declared MIME,
    /// content probe. The first failing check decides the rejection reason.
    /// An empty selection yields an empty verdict.
    pub fn admit(&self, files: Vec<CandidateFile>) -> AdmissionVerdict {
        let mut accepted = Vec::new();
        let mut rejections = Vec::new();

        for file in files {
            match self.check(&file) {
                None => accepted.push(file),
                Some(reason) => {
                    debug!(file = %file.name, %reason, "file rejected before upload");
                    rejections.push(Rejection {
                        file_name: file.name,
                        reason,
                    });
                }
            }
        }

        AdmissionVerdict {
            accepted,
            rejections,
        }
    }

    /// Runs the checks for one file. `None` means admitted.
    fn check(&self, file: &CandidateFile) -> Option<RejectionReason> {
        if file.bytes.is_empty() {
            return Some(RejectionReason::EmptyFile);
        }

        let extension = match file.extension() {
            Some(ext) => ext,
            None => return Some(RejectionReason::MissingExtension),
        };

        if !self.extensions.iter().any(|e| *e == extension) {
            return Some(RejectionReason::UnsupportedExtension { extension });
        }

        // Extension is in the accepted set, so a rule exists for it.
        let rule = FILE_TYPE_RULES
            .iter()
            .find(|r| r.extension == extension)?;

        let declared = file.declared_mime.to_ascii_lowercase();
        if !rule.mime_types.iter().any(|m| *m == declared) {
            return Some(RejectionReason::MimeMismatch {
                declared: file.declared_mime.clone(),
                expected: rule.mime_types.iter().map(|m| m.to_string()).collect(),
            });
        }

        let sample = &file.bytes[..file.bytes.len().min(SNIFF_SAMPLE_SIZE)];
        if !probe_matches(rule.probe, sample) {
            return Some(RejectionReason::ContentMismatch {
                expected: rule.extension.to_string(),
            });
        }

        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Content probes
// ─────────────────────────────────────────────────────────────────────────────

fn probe_matches(probe: ContentProbe, sample: &[u8]) -> bool {
    match probe {
        ContentProbe::Magic(magic) => sample.starts_with(magic),
        ContentProbe::Utf8Text => is_utf8_sample(sample),
        ContentProbe::Utf8LeadByte(leads) => {
            if !is_utf8_sample(sample) {
                return false;
            }
            sample
                .iter()
                .find(|b| !b.is_ascii_whitespace())
                .map(|b| leads.contains(b))
                .unwrap_or(false)
        }
    }
}

/// UTF-8 check tolerating a code point cut off at the sample boundary.
fn is_utf8_sample(sample: &[u8]) -> bool {
    match std::str::from_utf8(sample) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none() && e.valid_up_to() + 4 > sample.len(),
    }
}
