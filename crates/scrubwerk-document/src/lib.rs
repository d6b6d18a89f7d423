// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scrubwerk-document — Container formats for Scrubwerk.
//
// Sniffs file types from magic bytes, strips embedded metadata per format
// (JPEG, PNG, TIFF, WebP, GIF, BMP, PDF, Office Open XML) and composes
// stripping with visual PHI redaction in `FileProtector`.

pub mod image;
pub mod metadata;
pub mod protect;

// Re-export the primary types so callers can use `scrubwerk_document::FileProtector` etc.
pub use metadata::{MetadataStripper, MetadataStrippingResult, Stripped, detect_file_type};
pub use protect::{FileProtector, ProtectionSummary};
