//! File admission: local validation of selected files before any upload.

pub mod file_filter;

pub use file_filter::{
    AdmissionPolicy, AdmissionVerdict, Rejection, RejectionReason, SNIFF_SAMPLE_SIZE,
};
