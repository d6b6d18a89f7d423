// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scrubwerk.
//
// Messages carry structural context only (sizes, offsets, format names).
// Decoded payloads, metadata values and filenames never reach an error string.

use thiserror::Error;

/// Top-level error type for all Scrubwerk operations.
#[derive(Debug, Error)]
pub enum ScrubError {
    // -- Model / detector errors --
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("model failed to load: {0}")]
    ModelLoad(String),

    #[error("model not ready after {0} ms")]
    ModelNotReady(u64),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("{detector} detector failed: {message}")]
    Detector { detector: String, message: String },

    // -- Container / codec errors --
    #[error("image processing failed: {0}")]
    ImageError(String),

    #[error("PDF operation failed: {0}")]
    PdfError(String),

    #[error("office container error: {0}")]
    OfficeError(String),

    #[error("XML parsing failed: {0}")]
    XmlError(String),

    #[error("malformed {format} structure: {detail}")]
    Malformed { format: String, detail: String },

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    // -- Resource abuse --
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    // -- Security / persistence --
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Operator-facing classification of a [`ScrubError`].
///
/// Drives what the pipeline does with the failure: skip the detector,
/// pass the file through with a warning, reject the container, or record
/// the failure and carry on with the remaining detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A model file or optional backend is missing. The detector is skipped.
    Unavailable,
    /// Bytes do not match the expected structure. Strip falls back to pass-through.
    MalformedInput,
    /// Zip-bomb style limits. Original bytes are returned untouched.
    ResourceAbuse,
    /// Sticky model load failure. Requires a process restart to clear.
    ModelLoad,
    /// A detector raised while running on one image.
    DetectorRuntime,
    /// Configuration, persistence and I/O problems.
    Internal,
}

impl ErrorClass {
    /// Whether the failure persists for the lifetime of the process.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorClass::ModelLoad)
    }
}

impl ScrubError {
    /// Build a [`ScrubError::Malformed`] for the given container format.
    pub fn malformed(format: &str, detail: impl Into<String>) -> Self {
        ScrubError::Malformed {
            format: format.to_owned(),
            detail: detail.into(),
        }
    }

    /// Map this error onto the operator-facing taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            ScrubError::ModelUnavailable(_) => ErrorClass::Unavailable,
            ScrubError::ModelLoad(_) => ErrorClass::ModelLoad,
            ScrubError::ModelNotReady(_)
            | ScrubError::Inference(_)
            | ScrubError::Detector { .. } => ErrorClass::DetectorRuntime,
            ScrubError::ImageError(_)
            | ScrubError::PdfError(_)
            | ScrubError::OfficeError(_)
            | ScrubError::XmlError(_)
            | ScrubError::Malformed { .. }
            | ScrubError::UnsupportedFormat(_) => ErrorClass::MalformedInput,
            ScrubError::ResourceLimit(_) => ErrorClass::ResourceAbuse,
            ScrubError::IntegrityMismatch { .. }
            | ScrubError::Database(_)
            | ScrubError::InvalidConfig(_)
            | ScrubError::Io(_)
            | ScrubError::Serialization(_) => ErrorClass::Internal,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScrubError>;
