// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Handwriting detection — YOLOv8 single-class detector.
//
// Regions found here are OCR candidates. The threshold is deliberately low
// and the file protector never redacts them on its own.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::DynamicImage;
use scrubwerk_core::error::{Result, ScrubError};
use scrubwerk_core::{ProtectionConfig, Rectangle, RegionKind};
use scrubwerk_security::short_hash;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::face::{elapsed_ms, round1};
use super::{Detection, DetectionFrame, PhiDetector};
use crate::geometry::{ChannelOrder, Letterbox, chw_tensor, letterbox, nms};
use crate::loader::ModelSlot;
use crate::region::PhiRegion;
use crate::runtime::{ModelRuntime, Tensor};

pub const HANDWRITING_MODEL_FILE: &str = "yolov8n_handwriting_detection.rten";

/// Class label attached to every region.
pub const HANDWRITING_CLASS: &str = "handwriting";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandwritingConfig {
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Total growth after NMS, split across both sides.
    pub expand: f32,
    pub load_timeout: Duration,
}

impl Default for HandwritingConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.4,
            iou_threshold: 0.45,
            expand: 0.05,
            load_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandwritingDetection {
    pub rect: Rectangle,
    pub confidence: f32,
}

impl HandwritingDetection {
    pub fn to_region(&self) -> PhiRegion {
        PhiRegion::new(self.rect, RegionKind::Handwriting, self.confidence, "yolo")
            .with_meta("class", HANDWRITING_CLASS)
    }
}

/// Result of [`HandwritingDetector::analyze`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandwritingScan {
    /// Fingerprint of the RGB pixel data that was scanned.
    pub original_hash: String,
    pub regions_detected: usize,
    pub detections: Vec<HandwritingDetection>,
    pub processing_time_ms: f64,
}

impl HandwritingScan {
    pub fn to_audit(&self) -> serde_json::Value {
        serde_json::json!({
            "original_hash": self.original_hash,
            "regions_detected": self.regions_detected,
            "processing_time_ms": round1(self.processing_time_ms),
        })
    }
}

pub struct HandwritingDetector {
    slot: Arc<ModelSlot>,
    config: HandwritingConfig,
}

impl HandwritingDetector {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self::with_slot(
            Arc::new(ModelSlot::new("handwriting", model_path)),
            HandwritingConfig::default(),
        )
    }

    pub fn with_slot(slot: Arc<ModelSlot>, config: HandwritingConfig) -> Self {
        Self { slot, config }
    }

    pub fn from_config(config: &ProtectionConfig) -> Self {
        Self::with_slot(
            Arc::new(ModelSlot::new(
                "handwriting",
                config.model_dir().join(HANDWRITING_MODEL_FILE),
            )),
            HandwritingConfig {
                confidence_threshold: config.yolo_confidence,
                load_timeout: config.model_load_timeout(),
                ..HandwritingConfig::default()
            },
        )
    }

    pub fn start_loading(&self) {
        self.slot.start_loading();
    }

    pub fn await_ready(&self, timeout: Duration) -> Result<bool> {
        self.slot.await_ready(timeout)
    }

    pub fn is_available(&self) -> bool {
        self.slot.is_available()
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.is_initialized()
    }

    pub fn is_loading(&self) -> bool {
        self.slot.is_loading()
    }

    /// Handwritten regions in `image`.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<HandwritingDetection>> {
        self.detect_frame(&DetectionFrame::new(image))
    }

    /// Detect and fingerprint in one pass.
    pub fn analyze(&self, image: &DynamicImage) -> Result<HandwritingScan> {
        let start = Instant::now();
        let frame = DetectionFrame::new(image);
        let original_hash = short_hash(frame.rgb().as_raw());
        let detections = self.detect_frame(&frame)?;
        Ok(HandwritingScan {
            original_hash,
            regions_detected: detections.len(),
            detections,
            processing_time_ms: elapsed_ms(start),
        })
    }

    /// Push a blank input through the model. Failures are logged only.
    pub fn warm_up(&self) {
        let size = self.config.input_size as usize;
        let outcome = self
            .slot
            .get_within(self.config.load_timeout)
            .and_then(|model| model.run(Tensor::zeros(vec![1, 3, size, size]), &[]));
        match outcome {
            Ok(_) => info!("Handwriting model warmed up"),
            Err(err) => warn!(%err, "Handwriting model warm-up failed"),
        }
    }

    pub(crate) fn detect_frame(&self, frame: &DetectionFrame<'_>) -> Result<Vec<HandwritingDetection>> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let model = self.slot.get_within(self.config.load_timeout)?;
        let (canvas, placement) = letterbox(frame.rgb(), self.config.input_size);
        let size = self.config.input_size;
        let input = chw_tensor(&canvas, ChannelOrder::Rgb, 1.0 / 255.0, size, size);

        let output = run_single_output(model.as_ref(), input)?;
        let detections = postprocess(&output, &placement, &self.config, width, height)?;
        debug!(regions = detections.len(), "Handwriting detection complete");
        Ok(detections)
    }
}

impl PhiDetector for HandwritingDetector {
    fn kind(&self) -> RegionKind {
        RegionKind::Handwriting
    }

    fn run_id(&self) -> &'static str {
        "handwriting_yolo"
    }

    fn is_available(&self) -> bool {
        self.slot.is_available()
    }

    fn detect(&self, frame: &DetectionFrame<'_>) -> Result<Vec<Detection>> {
        Ok(self
            .detect_frame(frame)?
            .into_iter()
            .map(Detection::Handwriting)
            .collect())
    }
}

fn run_single_output(model: &dyn ModelRuntime, input: Tensor) -> Result<Tensor> {
    model
        .run(input, &[])?
        .into_iter()
        .next()
        .ok_or_else(|| ScrubError::Inference("handwriting model returned no outputs".into()))
}

/// Rows of `[cx, cy, w, h, class scores...]` from a `[1, C, N]` or
/// `[1, N, C]` output.
fn output_rows(output: &Tensor) -> Result<Vec<Vec<f32>>> {
    let dims: Vec<usize> = output.shape.iter().copied().filter(|&d| d != 1).collect();
    let (a, b) = match (output.shape.len(), dims.as_slice()) {
        (3, _) => (output.shape[1], output.shape[2]),
        (2, _) => (output.shape[0], output.shape[1]),
        (_, [a, b]) => (*a, *b),
        _ => {
            return Err(ScrubError::Inference(format!(
                "unexpected handwriting output shape {:?}",
                output.shape
            )));
        }
    };
    if a * b != output.data.len() {
        return Err(ScrubError::Inference(format!(
            "handwriting output shape {:?} does not match {} values",
            output.shape,
            output.data.len()
        )));
    }

    // Channel-major when the first axis looks like the attribute axis.
    let channel_major = a <= 6 || a < b;
    let (rows, cols) = if channel_major { (b, a) } else { (a, b) };
    if cols < 5 {
        return Err(ScrubError::Inference(format!(
            "handwriting output has {cols} attributes, need at least 5"
        )));
    }

    Ok((0..rows)
        .map(|r| {
            (0..cols)
                .map(|c| {
                    if channel_major {
                        output.data[c * rows + r]
                    } else {
                        output.data[r * cols + c]
                    }
                })
                .collect()
        })
        .collect())
}

fn postprocess(
    output: &Tensor,
    placement: &Letterbox,
    config: &HandwritingConfig,
    width: u32,
    height: u32,
) -> Result<Vec<HandwritingDetection>> {
    let rows = output_rows(output)?;
    let total = rows.len();

    let candidates: Vec<(Rectangle, f32)> = rows
        .iter()
        .filter_map(|row| {
            let confidence = if row.len() == 5 {
                row[4]
            } else {
                row[4..].iter().copied().fold(f32::NEG_INFINITY, f32::max)
            };
            if !(confidence >= config.confidence_threshold) {
                return None;
            }
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            let (x1, y1) = placement.unmap(cx - w / 2.0, cy - h / 2.0);
            let (x2, y2) = placement.unmap(cx + w / 2.0, cy + h / 2.0);
            Rectangle::from_corners_clamped(x1, y1, x2, y2, width, height)
                .map(|rect| (rect, confidence.min(1.0)))
        })
        .collect();
    let above = candidates.len();

    let kept = nms(candidates, config.iou_threshold, |c| *c);
    debug!(total, above, kept = kept.len(), "YOLO candidates");

    Ok(kept
        .into_iter()
        .map(|(rect, confidence)| HandwritingDetection {
            rect: rect.expanded(config.expand, width, height),
            confidence,
        })
        .collect())
}
