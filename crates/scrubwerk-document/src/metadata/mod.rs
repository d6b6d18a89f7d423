// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Metadata stripper — removes every non-pixel metadata element from a file
// and reports what it found, by name and classification only.
//
// The container format is sniffed from magic bytes. Each format has its own
// strategy; a strategy that cannot produce a clean file passes the original
// bytes through with a warning rather than emitting partial output.

pub mod filetype;
pub mod jpeg;
pub mod office;
pub mod pdf;
pub mod png;
pub mod raster;
pub mod xmp;

use std::time::Instant;

use scrubwerk_core::error::ScrubError;
use scrubwerk_core::{FileType, MetadataField, ProtectionConfig};
use scrubwerk_security::short_hash;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

pub use filetype::detect_file_type;

// ---------------------------------------------------------------------------
// Sensitive field tables
// ---------------------------------------------------------------------------

/// EXIF and TIFF tag names known to identify a person, device or moment.
pub const SENSITIVE_EXIF_TAGS: &[&str] = &[
    "GPSInfo",
    "GPSInfoIFDPointer",
    "Make",
    "Model",
    "Software",
    "HostComputer",
    "BodySerialNumber",
    "LensSerialNumber",
    "CameraSerialNumber",
    "SerialNumber",
    "ImageUniqueID",
    "CameraOwnerName",
    "OwnerName",
    "Artist",
    "Copyright",
    "Author",
    "Creator",
    "DateTime",
    "DateTimeOriginal",
    "DateTimeDigitized",
    "CreateDate",
    "ModifyDate",
    "ImageDescription",
    "UserComment",
    "XPComment",
    "XPAuthor",
    "XPKeywords",
    "ThumbnailImage",
    "JPEGThumbnail",
    "TIFFThumbnail",
    "JPEGInterchangeFormat",
    "JPEGInterchangeFormatLength",
];

/// Lower-case XMP property names that carry identifying data.
pub const SENSITIVE_XMP_FIELDS: &[&str] = &[
    "creator",
    "author",
    "title",
    "description",
    "subject",
    "rights",
    "creator-tool",
    "creatortool",
    "createdate",
    "modifydate",
    "metadatadate",
    "gps",
    "location",
];

/// Lower-case Office document property names that carry identifying data.
pub const SENSITIVE_OFFICE_FIELDS: &[&str] = &[
    "creator",
    "lastmodifiedby",
    "author",
    "manager",
    "company",
    "title",
    "subject",
    "keywords",
    "description",
    "category",
    "revision",
    "created",
    "modified",
    "lastprinted",
];

/// Whether an EXIF/TIFF tag name is sensitive: listed above, any GPS tag,
/// any serial number and any date or time stamp.
pub fn is_sensitive_exif(name: &str) -> bool {
    SENSITIVE_EXIF_TAGS.contains(&name)
        || name.starts_with("GPS")
        || name.contains("SerialNumber")
        || name.contains("Date")
        || name.contains("TimeStamp")
        || name.starts_with("SubSecTime")
        || name.starts_with("OffsetTime")
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// What a strip removed, without any of the removed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataStrippingResult {
    pub original_hash: String,
    pub stripped_hash: String,
    pub file_type: FileType,
    pub fields_removed: Vec<MetadataField>,
    pub processing_time_ms: f64,
    /// An embedded preview was present. It may be an unredacted copy of the
    /// whole image.
    pub had_thumbnail: bool,
    pub had_gps: bool,
    pub had_device_id: bool,
    pub had_author: bool,
    pub had_timestamps: bool,
    pub warnings: Vec<String>,
}

impl MetadataStrippingResult {
    pub fn total_fields_removed(&self) -> usize {
        self.fields_removed.len()
    }

    pub fn sensitive_fields_removed(&self) -> usize {
        self.fields_removed.iter().filter(|f| f.is_sensitive).count()
    }

    /// Hashes, counts and flags for the audit trail.
    pub fn to_audit(&self) -> serde_json::Value {
        serde_json::json!({
            "original_hash": self.original_hash,
            "stripped_hash": self.stripped_hash,
            "file_type": self.file_type.as_str(),
            "total_fields_removed": self.total_fields_removed(),
            "sensitive_fields_removed": self.sensitive_fields_removed(),
            "had_thumbnail": self.had_thumbnail,
            "had_gps": self.had_gps,
            "had_device_id": self.had_device_id,
            "had_author": self.had_author,
            "processing_time_ms": round1(self.processing_time_ms),
            "warnings": self.warnings,
        })
    }
}

/// Output of one format strategy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Stripped {
    pub bytes: Vec<u8>,
    pub fields: Vec<MetadataField>,
    pub warnings: Vec<String>,
}

impl Stripped {
    pub fn clean(bytes: Vec<u8>, fields: Vec<MetadataField>) -> Self {
        Self {
            bytes,
            fields,
            warnings: Vec::new(),
        }
    }

    /// The original bytes, untouched, with one warning.
    pub fn passthrough(data: &[u8], warning: impl Into<String>) -> Self {
        Self {
            bytes: data.to_vec(),
            fields: Vec::new(),
            warnings: vec![warning.into()],
        }
    }

    pub fn with_field(mut self, field: MetadataField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Push `field` unless an identical one is already recorded.
pub(crate) fn push_unique(fields: &mut Vec<MetadataField>, field: MetadataField) {
    if !fields.contains(&field) {
        fields.push(field);
    }
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub(crate) fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

// ---------------------------------------------------------------------------
// Stripper
// ---------------------------------------------------------------------------

const DICOM_WARNING: &str = "DICOM file detected. DICOM requires specialized de-identification; \
     use a dedicated DICOM anonymizer. Metadata not stripped.";

const UNKNOWN_WARNING: &str = "Unknown file type, metadata not stripped. File may contain \
     embedded PHI (GPS, device IDs, author info).";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataStripper {
    preserve_color_profile: bool,
}

impl MetadataStripper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep colour-profile data (PNG iCCP/sRGB/gAMA/cHRM, JPEG and WebP ICC).
    pub fn with_color_profile(preserve_color_profile: bool) -> Self {
        Self {
            preserve_color_profile,
        }
    }

    pub fn from_config(config: &ProtectionConfig) -> Self {
        Self::with_color_profile(config.preserve_color_profile)
    }

    /// Strip every metadata element from `data`.
    ///
    /// `filename_hint` is only ever logged by length. Never fails: anything
    /// that cannot be cleaned comes back unchanged with a warning.
    #[instrument(skip(self, data, filename_hint), fields(data_len = data.len(), name_len = filename_hint.len()))]
    pub fn strip(&self, data: &[u8], filename_hint: &str) -> (Vec<u8>, MetadataStrippingResult) {
        let start = Instant::now();
        let original_hash = short_hash(data);
        let file_type = detect_file_type(data);
        debug!(%file_type, "Detected container format");

        let stripped = match file_type {
            FileType::Jpeg => fold(data, file_type, jpeg::strip(data, self.preserve_color_profile)),
            FileType::Png => fold(data, file_type, png::strip(data, self.preserve_color_profile)),
            FileType::Tiff => fold(data, file_type, raster::strip_tiff(data)),
            FileType::Webp => fold(data, file_type, raster::strip_webp(data, self.preserve_color_profile)),
            FileType::Gif => fold(data, file_type, raster::strip_gif(data)),
            FileType::Bmp => fold(data, file_type, raster::strip_bmp(data)),
            FileType::Pdf => pdf::strip(data),
            FileType::Docx | FileType::Xlsx | FileType::Pptx => {
                fold(data, file_type, office::strip(data))
            }
            FileType::Dicom => {
                warn!("DICOM input passed through without de-identification");
                Stripped::passthrough(data, DICOM_WARNING)
            }
            FileType::Unknown => {
                warn!(
                    original_hash = %original_hash,
                    "Unknown file type, metadata NOT stripped; file may contain PHI in metadata"
                );
                Stripped::passthrough(data, UNKNOWN_WARNING)
            }
        };

        let result = summarize(original_hash, file_type, &stripped, start);
        if !result.fields_removed.is_empty() {
            info!(
                %file_type,
                removed = result.total_fields_removed(),
                sensitive = result.sensitive_fields_removed(),
                thumbnail = result.had_thumbnail,
                gps = result.had_gps,
                author = result.had_author,
                "Stripped metadata"
            );
        }
        (stripped.bytes, result)
    }
}

/// Turn a strategy failure into an untouched pass-through.
fn fold(data: &[u8], file_type: FileType, outcome: Result<Stripped, ScrubError>) -> Stripped {
    match outcome {
        Ok(stripped) => stripped,
        Err(err) => {
            warn!(%file_type, %err, "Metadata stripping failed, passing original through");
            Stripped::passthrough(
                data,
                format!("{} metadata not stripped: {}", file_type.as_str().to_uppercase(), err),
            )
        }
    }
}

fn summarize(
    original_hash: String,
    file_type: FileType,
    stripped: &Stripped,
    start: Instant,
) -> MetadataStrippingResult {
    let names: Vec<String> = stripped.fields.iter().map(|f| f.name.to_lowercase()).collect();
    let any = |keys: &[&str]| names.iter().any(|n| keys.iter().any(|k| n.contains(k)));

    MetadataStrippingResult {
        stripped_hash: short_hash(&stripped.bytes),
        original_hash,
        file_type,
        fields_removed: stripped.fields.clone(),
        processing_time_ms: elapsed_ms(start),
        had_thumbnail: any(&["thumbnail"]),
        had_gps: any(&["gps"]),
        had_device_id: any(&["make", "model", "serialnumber"]),
        had_author: any(&["author", "creator", "artist", "lastmodifiedby"]),
        had_timestamps: any(&["date", "time"]),
        warnings: stripped.warnings.clone(),
    }
}
