// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// File protector — metadata stripping followed by visual PHI redaction.
//
// Stripping always runs first, so that re-encoding the redacted pixels can
// never carry metadata over from the original capture.

use scrubwerk_core::error::{Result, ScrubError};
use scrubwerk_core::{FileType, ProtectionConfig, RegionKind};
use scrubwerk_security::{AuditLog, AuditRecord, short_hash};
use scrubwerk_vision::{ImagePhiProcessor, ImagePhiResult, PhiRegion, redact};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::image::codec;
use crate::metadata::{MetadataStripper, detect_file_type, raster, round1};

/// Region kinds redacted automatically. Handwriting is reported only.
const REDACTED_KINDS: [RegionKind; 3] = [RegionKind::Face, RegionKind::Barcode, RegionKind::Signature];

/// What happened to one file. Hashes, counts and audit dictionaries only:
/// no filename, no region payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectionSummary {
    pub original_size: usize,
    pub final_size: usize,
    pub file_type: FileType,
    pub original_hash: String,
    pub output_hash: String,
    pub metadata_stripped: bool,
    pub metadata: Option<serde_json::Value>,
    pub faces_redacted: bool,
    pub regions_redacted: usize,
    pub handwriting_candidates: usize,
    pub detection: Option<serde_json::Value>,
    pub face_detection: Option<serde_json::Value>,
    pub detection_error: Option<String>,
}

impl ProtectionSummary {
    fn new(data: &[u8]) -> Self {
        let hash = short_hash(data);
        Self {
            original_size: data.len(),
            final_size: data.len(),
            file_type: FileType::Unknown,
            output_hash: hash.clone(),
            original_hash: hash,
            metadata_stripped: false,
            metadata: None,
            faces_redacted: false,
            regions_redacted: 0,
            handwriting_candidates: 0,
            detection: None,
            face_detection: None,
            detection_error: None,
        }
    }

    /// Whether the file left with no detection failure.
    pub fn is_clean(&self) -> bool {
        self.detection_error.is_none()
            && self
                .detection
                .as_ref()
                .is_none_or(|d| d.get("errors").is_none_or(|e| e.is_null()))
    }
}

/// Redacted output of one image.
struct Redaction {
    bytes: Option<Vec<u8>>,
    result: ImagePhiResult,
    redacted: usize,
    faces: usize,
}

pub struct FileProtector {
    config: ProtectionConfig,
    stripper: MetadataStripper,
    processor: ImagePhiProcessor,
}

impl FileProtector {
    /// Protector with the detectors `config` enables.
    pub fn new(config: ProtectionConfig) -> Result<Self> {
        config.validate()?;
        let processor = ImagePhiProcessor::from_config(&config);
        Ok(Self::assemble(config, processor))
    }

    /// Protector with a caller-supplied detector set.
    pub fn with_processor(config: ProtectionConfig, processor: ImagePhiProcessor) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, processor))
    }

    fn assemble(config: ProtectionConfig, processor: ImagePhiProcessor) -> Self {
        Self {
            stripper: MetadataStripper::from_config(&config),
            config,
            processor,
        }
    }

    pub fn config(&self) -> &ProtectionConfig {
        &self.config
    }

    /// Begin loading detector models in the background.
    pub fn start_loading(&self) {
        self.processor.start_loading();
    }

    /// Strip, detect and redact one file.
    ///
    /// Per-file failures never surface as errors: a file that cannot be
    /// stripped passes through with a warning in `metadata`, and a detection
    /// failure leaves the stripped bytes in place with `detection_error` set.
    #[instrument(skip(self, data, filename), fields(data_len = data.len(), name_len = filename.len()))]
    pub fn process(&self, data: &[u8], filename: &str) -> Result<(Vec<u8>, ProtectionSummary)> {
        let mut summary = ProtectionSummary::new(data);

        let mut output = if self.config.strip_metadata {
            let (stripped, result) = self.stripper.strip(data, filename);
            summary.metadata = Some(result.to_audit());
            summary.metadata_stripped = true;
            stripped
        } else {
            data.to_vec()
        };

        let file_type = detect_file_type(&output);
        summary.file_type = file_type;

        if file_type.is_redactable_image() && !self.processor.detectors().is_empty() {
            match self.redact_image(&output, file_type) {
                Ok(redaction) => {
                    summary.regions_redacted = redaction.redacted;
                    summary.faces_redacted = redaction.faces > 0;
                    summary.handwriting_candidates = redaction.result.handwriting_detected;
                    summary.face_detection = Some(face_audit(&redaction.result));
                    summary.detection = Some(redaction.result.to_audit());
                    if let Some(bytes) = redaction.bytes {
                        output = bytes;
                    }
                }
                Err(err) => {
                    error!(%file_type, %err, "PHI detection failed, keeping stripped output");
                    summary.detection_error = Some(err.to_string());
                }
            }
        }

        summary.final_size = output.len();
        summary.output_hash = short_hash(&output);
        info!(
            %file_type,
            original_size = summary.original_size,
            final_size = summary.final_size,
            regions_redacted = summary.regions_redacted,
            handwriting_candidates = summary.handwriting_candidates,
            "File protected"
        );
        Ok((output, summary))
    }

    fn redact_image(&self, data: &[u8], file_type: FileType) -> Result<Redaction> {
        // Decoding keeps one frame, so redacting would drop the rest.
        let frames = raster::frame_count(data, file_type)?;
        if frames > 1 {
            return Err(ScrubError::UnsupportedFormat(format!(
                "{file_type} with {frames} frames, detection covers single-frame images only"
            )));
        }
        let image = codec::decode(data, file_type)?;
        let result = self.processor.process(&image);

        let targets: Vec<PhiRegion> = result
            .regions
            .iter()
            .filter(|r| REDACTED_KINDS.contains(&r.kind))
            .cloned()
            .collect();
        let faces = targets.iter().filter(|r| r.kind == RegionKind::Face).count();

        if targets.is_empty() {
            return Ok(Redaction {
                bytes: None,
                result,
                redacted: 0,
                faces,
            });
        }

        let redacted = redact(
            &image,
            &targets,
            self.config.redaction_method,
            self.config.redaction_padding,
        );
        let bytes = codec::encode(&redacted, file_type)?;
        Ok(Redaction {
            bytes: Some(bytes),
            redacted: targets.len(),
            result,
            faces,
        })
    }

    /// Persist `summary` as a `protect` entry.
    pub fn record(log: &AuditLog, summary: &ProtectionSummary) -> Result<()> {
        let details = serde_json::to_value(summary)?;
        log.record(&AuditRecord {
            action: "protect".to_owned(),
            original_hash: summary.original_hash.clone(),
            output_hash: Some(summary.output_hash.clone()),
            file_type: summary.file_type.as_str().to_owned(),
            success: summary.is_clean(),
            details: Some(details),
        })
    }
}

/// Faces-only view of an orchestration run.
fn face_audit(result: &ImagePhiResult) -> serde_json::Value {
    serde_json::json!({
        "faces_detected": result.faces_detected,
        "processing_time_ms": round1(result.processing_time_ms),
        "image_size": format!("{}x{}", result.image_width, result.image_height),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};
    use scrubwerk_core::RedactionMethod;
    use scrubwerk_vision::{Detector, SignatureDetector};

    /// White page with one wavy ink stroke.
    fn signed_page() -> DynamicImage {
        let mut page = RgbImage::from_pixel(640, 640, Rgb([255, 255, 255]));
        for x in 20..180u32 {
            let centre = (100.0 + 15.0 * (x as f32 / 10.0).sin()).round() as i32;
            for y in (centre - 3)..=(centre + 3) {
                page.put_pixel(x, y as u32, Rgb([10, 10, 10]));
            }
        }
        DynamicImage::ImageRgb8(page)
    }

    fn signature_only(method: RedactionMethod) -> FileProtector {
        let config = ProtectionConfig {
            redaction_method: method,
            ..ProtectionConfig::default()
        };
        let processor = ImagePhiProcessor::with_detectors(vec![Detector::Signature(SignatureDetector::new())]);
        FileProtector::with_processor(config, processor).unwrap()
    }

    #[test]
    fn invalid_config_is_refused() {
        let config = ProtectionConfig {
            face_confidence: 1.5,
            ..ProtectionConfig::default()
        };
        assert!(FileProtector::new(config).is_err());
    }

    #[test]
    fn signature_is_blacked_out_in_png() {
        let png = codec::encode(&signed_page(), FileType::Png).unwrap();
        let (out, summary) = signature_only(RedactionMethod::Black).process(&png, "scan.png").unwrap();

        assert_eq!(summary.file_type, FileType::Png);
        assert!(summary.metadata_stripped);
        assert_eq!(summary.regions_redacted, 1);
        assert!(!summary.faces_redacted);
        assert!(summary.detection_error.is_none());
        assert_eq!(summary.final_size, out.len());
        assert_ne!(summary.original_hash, summary.output_hash);

        let redacted = codec::decode(&out, FileType::Png).unwrap().to_rgb8();
        // Paper between stroke crests sits inside the box.
        assert_eq!(redacted.get_pixel(30, 88), &Rgb([0, 0, 0]));
        assert_eq!(redacted.get_pixel(500, 500), &Rgb([255, 255, 255]));
    }

    #[test]
    fn multi_page_tiff_keeps_every_page_and_reports_skipped_detection() {
        use std::io::Cursor;
        use tiff::encoder::{TiffEncoder, colortype};

        let signed = signed_page().to_rgb8();
        let blank = RgbImage::from_pixel(640, 640, Rgb([255, 255, 255]));
        let mut tiff = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut tiff).unwrap();
            for page in [&signed, &blank] {
                encoder.write_image::<colortype::RGB8>(640, 640, page.as_raw()).unwrap();
            }
        }
        let tiff = tiff.into_inner();

        let (out, summary) = signature_only(RedactionMethod::Black).process(&tiff, "").unwrap();
        assert_eq!(summary.file_type, FileType::Tiff);
        assert_eq!(raster::frame_count(&out, FileType::Tiff).unwrap(), 2);
        assert_eq!(summary.regions_redacted, 0);
        assert!(summary.detection.is_none());
        assert!(summary.detection_error.as_deref().unwrap().contains("2 frames"));
        assert!(!summary.is_clean());
    }

    #[test]
    fn animated_webp_passes_through_with_detection_error() {
        fn chunk(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
            let mut out = fourcc.to_vec();
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(payload);
            out
        }
        let mut body = b"WEBP".to_vec();
        body.extend(chunk(b"VP8X", &[0x02, 0, 0, 0, 9, 0, 0, 9, 0, 0]));
        body.extend(chunk(b"ANIM", &[0; 6]));
        body.extend(chunk(b"ANMF", &[1; 16]));
        body.extend(chunk(b"ANMF", &[2; 16]));
        body.extend(chunk(b"ANMF", &[3; 16]));
        let mut webp = b"RIFF".to_vec();
        webp.extend_from_slice(&(body.len() as u32).to_le_bytes());
        webp.extend(body);

        let (out, summary) = signature_only(RedactionMethod::Blur).process(&webp, "").unwrap();
        assert_eq!(summary.file_type, FileType::Webp);
        assert_eq!(out, webp);
        assert!(summary.detection_error.as_deref().unwrap().contains("3 frames"));
    }

    #[test]
    fn blank_image_is_left_as_stripped() {
        let blank = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([255, 255, 255])));
        let png = codec::encode(&blank, FileType::Png).unwrap();
        let (out, summary) = signature_only(RedactionMethod::Blur).process(&png, "").unwrap();
        assert_eq!(out, png);
        assert_eq!(summary.regions_redacted, 0);
        assert!(summary.detection.is_some());
        assert_eq!(summary.face_detection.as_ref().unwrap()["image_size"], "64x64");
    }

    #[test]
    fn filename_never_reaches_the_summary() {
        let png = codec::encode(&signed_page(), FileType::Png).unwrap();
        let (_, summary) = signature_only(RedactionMethod::Blur)
            .process(&png, "Jane_Doe_MRN_123456.png")
            .unwrap();
        let rendered = serde_json::to_string(&summary).unwrap();
        assert!(!rendered.contains("Jane_Doe"));
        assert!(!rendered.contains("123456"));
    }

    #[test]
    fn stripping_can_be_disabled() {
        let config = ProtectionConfig {
            strip_metadata: false,
            detect_faces: false,
            detect_barcodes: false,
            detect_handwriting: false,
            detect_signatures: false,
            ..ProtectionConfig::default()
        };
        let protector = FileProtector::new(config).unwrap();
        let blob = b"%PDF-1.7 not really a document".to_vec();
        let (out, summary) = protector.process(&blob, "").unwrap();
        assert_eq!(out, blob);
        assert!(!summary.metadata_stripped);
        assert!(summary.metadata.is_none());
        assert!(summary.detection.is_none());
    }

    #[test]
    fn summary_lands_in_the_audit_log() {
        let log = AuditLog::open_in_memory().unwrap();
        let png = codec::encode(&signed_page(), FileType::Png).unwrap();
        let (_, summary) = signature_only(RedactionMethod::Pixelate).process(&png, "").unwrap();
        FileProtector::record(&log, &summary).unwrap();

        let entries = log.entries_for_hash(&summary.original_hash).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "protect");
        assert_eq!(log.failure_count().unwrap(), 0);
    }
}
