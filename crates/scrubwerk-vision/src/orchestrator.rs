// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Detection orchestrator — runs every enabled detector on an image and
// merges their output into one region list.
//
// Each detector runs inside its own failure boundary: an error becomes an
// entry in `ImagePhiResult::errors` and the remaining detectors still run.

use std::time::Instant;

use image::DynamicImage;
use scrubwerk_core::error::{Result, ScrubError};
use scrubwerk_core::{ProtectionConfig, RegionKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::detect::face::{elapsed_ms, round1};
use crate::detect::{
    BarcodeDetector, DetectionFrame, Detector, FaceDetector, HandwritingDetector, PhiDetector,
    SignatureDetector,
};
use crate::region::PhiRegion;

/// Summary of one orchestration run. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePhiResult {
    pub regions: Vec<PhiRegion>,
    pub faces_detected: usize,
    pub barcodes_detected: usize,
    pub handwriting_detected: usize,
    pub signatures_detected: usize,
    pub processing_time_ms: f64,
    pub image_width: u32,
    pub image_height: u32,
    pub detectors_run: Vec<String>,
    pub errors: Vec<String>,
}

impl ImagePhiResult {
    fn empty(image_width: u32, image_height: u32) -> Self {
        Self {
            regions: Vec::new(),
            faces_detected: 0,
            barcodes_detected: 0,
            handwriting_detected: 0,
            signatures_detected: 0,
            processing_time_ms: 0.0,
            image_width,
            image_height,
            detectors_run: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn total_phi_detected(&self) -> usize {
        self.regions.len()
    }

    pub fn has_phi(&self) -> bool {
        !self.regions.is_empty()
    }

    pub fn regions_of(&self, kind: RegionKind) -> impl Iterator<Item = &PhiRegion> {
        self.regions.iter().filter(move |r| r.kind == kind)
    }

    /// Counts, timing, size and detector bookkeeping. `errors` is `null`
    /// when every detector succeeded.
    pub fn to_audit(&self) -> serde_json::Value {
        serde_json::json!({
            "total_phi_detected": self.total_phi_detected(),
            "faces": self.faces_detected,
            "barcodes": self.barcodes_detected,
            "handwriting": self.handwriting_detected,
            "signatures": self.signatures_detected,
            "processing_time_ms": round1(self.processing_time_ms),
            "image_size": format!("{}x{}", self.image_width, self.image_height),
            "detectors_run": self.detectors_run,
            "errors": if self.errors.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::json!(self.errors)
            },
        })
    }
}

/// Runs a fixed set of detectors over images.
pub struct ImagePhiProcessor {
    detectors: Vec<Detector>,
}

impl ImagePhiProcessor {
    /// Build the detectors enabled in `config`. The signature heuristic uses
    /// `yolo_confidence` as its score threshold.
    pub fn from_config(config: &ProtectionConfig) -> Self {
        let mut detectors = Vec::new();
        if config.detect_faces {
            detectors.push(Detector::Face(FaceDetector::from_config(config)));
        }
        if config.detect_barcodes {
            detectors.push(Detector::Barcode(BarcodeDetector::new()));
        }
        if config.detect_handwriting {
            detectors.push(Detector::Handwriting(HandwritingDetector::from_config(config)));
        }
        if config.detect_signatures {
            detectors.push(Detector::Signature(SignatureDetector::with_threshold(
                config.yolo_confidence,
            )));
        }
        Self::with_detectors(detectors)
    }

    pub fn with_detectors(detectors: Vec<Detector>) -> Self {
        Self { detectors }
    }

    pub fn detectors(&self) -> &[Detector] {
        &self.detectors
    }

    /// Begin loading every available model in the background.
    pub fn start_loading(&self) {
        for detector in &self.detectors {
            if detector.is_available() {
                detector.start_loading();
            }
        }
    }

    /// Run every available detector on `image`.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn process(&self, image: &DynamicImage) -> ImagePhiResult {
        let start = Instant::now();
        let (width, height) = (image.width(), image.height());
        let mut result = ImagePhiResult::empty(width, height);
        if width == 0 || height == 0 {
            return result;
        }

        let frame = DetectionFrame::new(image);
        for detector in &self.detectors {
            if !detector.is_available() {
                debug!(detector = detector.run_id(), "Detector unavailable, skipping");
                continue;
            }

            match detector.detect(&frame) {
                Ok(detections) => {
                    let count = detections.len();
                    match detector.kind() {
                        RegionKind::Face => result.faces_detected += count,
                        RegionKind::Barcode => result.barcodes_detected += count,
                        RegionKind::Handwriting => result.handwriting_detected += count,
                        RegionKind::Signature => result.signatures_detected += count,
                    }
                    result
                        .regions
                        .extend(detections.iter().map(|d| d.to_region()));
                    result.detectors_run.push(detector.run_id().to_owned());
                }
                Err(err) => {
                    error!(detector = detector.run_id(), %err, "Detector failed");
                    result.errors.push(format!("{}: {}", detector.kind(), err));
                }
            }
        }

        result.processing_time_ms = elapsed_ms(start);
        info!(
            regions = result.regions.len(),
            errors = result.errors.len(),
            "PHI detection complete"
        );
        result
    }

    /// Decode `bytes` and process the image.
    #[instrument(skip(self, bytes), fields(data_len = bytes.len()))]
    pub fn process_bytes(&self, bytes: &[u8]) -> Result<ImagePhiResult> {
        let image = image::load_from_memory(bytes)
            .map_err(|err| ScrubError::ImageError(format!("failed to decode image: {}", err)))?;
        Ok(self.process(&image))
    }
}
