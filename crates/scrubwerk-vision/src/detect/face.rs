// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Face detection — YuNet anchor-free detector.
//
// Pipeline:
//   1. Convert to BGR, keep raw 0-255 samples, zero-pad to a multiple of 32.
//   2. Run the model, fetching cls/obj/bbox/kps for strides 8, 16 and 32.
//   3. Decode anchors into 15-value rows (box, 5 landmarks, score).
//   4. Drop rows with non-finite geometry, threshold, top-K, greedy NMS.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::DynamicImage;
use scrubwerk_core::error::{Result, ScrubError};
use scrubwerk_core::{ProtectionConfig, Rectangle, RedactionMethod, RegionKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{Detection, DetectionFrame, PhiDetector};
use crate::geometry::{ChannelOrder, chw_tensor, nms};
use crate::loader::ModelSlot;
use crate::redact::redact;
use crate::region::PhiRegion;
use crate::runtime::{ModelRuntime, Tensor};

/// Model file expected inside the model directory.
pub const FACE_MODEL_FILE: &str = "face_detection_yunet_2023mar.rten";

/// Below this size in either dimension YuNet emits non-finite output.
pub const MIN_FACE_IMAGE_SIZE: u32 = 20;

const STRIDES: [usize; 3] = [8, 16, 32];
const OUTPUT_NAMES: [&str; 12] = [
    "cls_8", "cls_16", "cls_32", "obj_8", "obj_16", "obj_32", "bbox_8", "bbox_16", "bbox_32",
    "kps_8", "kps_16", "kps_32",
];

/// Values per decoded row: x, y, w, h, ten landmark coordinates, score.
const ROW_LEN: usize = 15;
type FaceRow = [f32; ROW_LEN];

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub rect: Rectangle,
    pub confidence: f32,
    /// Right eye, left eye, nose tip, right mouth corner, left mouth corner.
    pub landmarks: Option<[Landmark; 5]>,
}

impl FaceDetection {
    pub fn to_region(&self) -> PhiRegion {
        PhiRegion::new(self.rect, RegionKind::Face, self.confidence, "yunet")
            .with_meta("has_landmarks", self.landmarks.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetectionResult {
    pub faces_detected: usize,
    pub detections: Vec<FaceDetection>,
    pub processing_time_ms: f64,
    pub image_width: u32,
    pub image_height: u32,
}

impl FaceDetectionResult {
    /// Counts, timing and size only.
    pub fn to_audit(&self) -> serde_json::Value {
        serde_json::json!({
            "faces_detected": self.faces_detected,
            "processing_time_ms": round1(self.processing_time_ms),
            "image_size": format!("{}x{}", self.image_width, self.image_height),
        })
    }
}

pub(crate) fn round1(ms: f64) -> f64 {
    (ms * 10.0).round() / 10.0
}

pub(crate) fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceDetectorConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
    pub load_timeout: Duration,
}

impl Default for FaceDetectorConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.7,
            nms_threshold: 0.3,
            top_k: 5000,
            load_timeout: Duration::from_secs(60),
        }
    }
}

pub struct FaceDetector {
    slot: Arc<ModelSlot>,
    config: FaceDetectorConfig,
}

impl FaceDetector {
    /// Detector for the model at `model_path`, using the default backend.
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self::with_slot(
            Arc::new(ModelSlot::new("face", model_path)),
            FaceDetectorConfig::default(),
        )
    }

    pub fn with_slot(slot: Arc<ModelSlot>, config: FaceDetectorConfig) -> Self {
        Self { slot, config }
    }

    pub fn from_config(config: &ProtectionConfig) -> Self {
        Self::with_slot(
            Arc::new(ModelSlot::new("face", config.model_dir().join(FACE_MODEL_FILE))),
            FaceDetectorConfig {
                score_threshold: config.face_confidence,
                load_timeout: config.model_load_timeout(),
                ..FaceDetectorConfig::default()
            },
        )
    }

    pub fn config(&self) -> &FaceDetectorConfig {
        &self.config
    }

    // -- Loading -------------------------------------------------------------

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

    // -- Detection -----------------------------------------------------------

    /// Detect faces in `image`.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn detect(&self, image: &DynamicImage) -> Result<FaceDetectionResult> {
        let start = Instant::now();
        let detections = self.detect_frame(&DetectionFrame::new(image))?;
        Ok(FaceDetectionResult {
            faces_detected: detections.len(),
            detections,
            processing_time_ms: elapsed_ms(start),
            image_width: image.width(),
            image_height: image.height(),
        })
    }

    pub(crate) fn detect_frame(&self, frame: &DetectionFrame<'_>) -> Result<Vec<FaceDetection>> {
        let (width, height) = (frame.width(), frame.height());
        if width < MIN_FACE_IMAGE_SIZE || height < MIN_FACE_IMAGE_SIZE {
            debug!(width, height, "Image too small for face detection");
            return Ok(Vec::new());
        }

        let model = self.slot.get_within(self.config.load_timeout)?;
        let rows = run_yunet(model.as_ref(), frame)?;
        let faces = postprocess(rows, &self.config, width, height);
        debug!(faces = faces.len(), "Face detection complete");
        Ok(faces)
    }

    /// Run one blank 100x100 image through the model so the first real call
    /// does not pay for lazy initialisation.
    pub fn warm_up(&self) -> Result<()> {
        let blank = DynamicImage::new_rgb8(100, 100);
        self.detect(&blank).map(|_| ())
    }
}

impl PhiDetector for FaceDetector {
    fn kind(&self) -> RegionKind {
        RegionKind::Face
    }

    fn run_id(&self) -> &'static str {
        "face_yunet"
    }

    fn is_available(&self) -> bool {
        self.slot.is_available()
    }

    fn detect(&self, frame: &DetectionFrame<'_>) -> Result<Vec<Detection>> {
        Ok(self
            .detect_frame(frame)?
            .into_iter()
            .map(Detection::Face)
            .collect())
    }
}

// -- YuNet pre/post-processing -----------------------------------------------

fn pad32(v: u32) -> u32 {
    v.div_ceil(32) * 32
}

fn run_yunet(model: &dyn ModelRuntime, frame: &DetectionFrame<'_>) -> Result<Vec<FaceRow>> {
    let (width, height) = (frame.width(), frame.height());
    let (padded_w, padded_h) = (pad32(width), pad32(height));
    let input = chw_tensor(frame.rgb(), ChannelOrder::Bgr, 1.0, padded_w, padded_h);

    let outputs = model.run(input, &OUTPUT_NAMES)?;
    decode_outputs(&outputs, padded_w as usize, padded_h as usize)
}

/// Decode the twelve YuNet outputs into rows in padded-image pixel space.
fn decode_outputs(outputs: &[Tensor], padded_w: usize, padded_h: usize) -> Result<Vec<FaceRow>> {
    if outputs.len() != OUTPUT_NAMES.len() {
        return Err(ScrubError::Inference(format!(
            "face model returned {} outputs, expected {}",
            outputs.len(),
            OUTPUT_NAMES.len()
        )));
    }

    let mut rows = Vec::new();
    for (i, &stride) in STRIDES.iter().enumerate() {
        let cols = padded_w / stride;
        let lines = padded_h / stride;
        let anchors = cols * lines;

        let cls = &outputs[i].data;
        let obj = &outputs[3 + i].data;
        let bbox = &outputs[6 + i].data;
        let kps = &outputs[9 + i].data;
        if cls.len() < anchors || obj.len() < anchors || bbox.len() < anchors * 4 || kps.len() < anchors * 10 {
            return Err(ScrubError::Inference(format!(
                "face model output for stride {stride} is shorter than {anchors} anchors"
            )));
        }

        let s = stride as f32;
        for row in 0..lines {
            for col in 0..cols {
                let idx = row * cols + col;
                let score = (cls[idx].clamp(0.0, 1.0) * obj[idx].clamp(0.0, 1.0)).sqrt();

                let b = &bbox[idx * 4..idx * 4 + 4];
                let cx = (col as f32 + b[0]) * s;
                let cy = (row as f32 + b[1]) * s;
                let w = b[2].exp() * s;
                let h = b[3].exp() * s;

                let mut out = [0.0f32; ROW_LEN];
                out[0] = cx - w / 2.0;
                out[1] = cy - h / 2.0;
                out[2] = w;
                out[3] = h;
                let k = &kps[idx * 10..idx * 10 + 10];
                for n in 0..5 {
                    out[4 + 2 * n] = (col as f32 + k[2 * n]) * s;
                    out[5 + 2 * n] = (row as f32 + k[2 * n + 1]) * s;
                }
                out[14] = score;
                rows.push(out);
            }
        }
    }
    Ok(rows)
}

fn postprocess(
    rows: Vec<FaceRow>,
    config: &FaceDetectorConfig,
    width: u32,
    height: u32,
) -> Vec<FaceDetection> {
    let total = rows.len();
    let mut candidates: Vec<FaceRow> = rows
        .into_iter()
        .filter(|row| row[..14].iter().all(|v| v.is_finite()))
        .filter(|row| row[14] >= config.score_threshold)
        .collect();
    let finite_scored = candidates.len();

    candidates.sort_by(|a, b| b[14].total_cmp(&a[14]));
    candidates.truncate(config.top_k);

    let boxed: Vec<(Rectangle, FaceRow)> = candidates
        .into_iter()
        .filter_map(|row| {
            Rectangle::from_corners_clamped(row[0], row[1], row[0] + row[2], row[1] + row[3], width, height)
                .map(|rect| (rect, row))
        })
        .collect();

    let kept = nms(boxed, config.nms_threshold, |(rect, row)| (*rect, row[14]));
    debug!(total, finite_scored, kept = kept.len(), "YuNet candidates");

    kept.into_iter()
        .map(|(rect, row)| FaceDetection {
            rect,
            confidence: row[14].clamp(0.0, 1.0),
            landmarks: Some(std::array::from_fn(|n| Landmark {
                x: row[4 + 2 * n],
                y: row[5 + 2 * n],
            })),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Face protector
// ---------------------------------------------------------------------------

/// Outcome of detecting and redacting faces in one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRedactionResult {
    pub faces_detected: usize,
    pub faces_redacted: usize,
    pub redaction_method: RedactionMethod,
    pub processing_time_ms: f64,
    pub image_width: u32,
    pub image_height: u32,
}

impl FaceRedactionResult {
    pub fn to_audit(&self) -> serde_json::Value {
        serde_json::json!({
            "faces_detected": self.faces_detected,
            "faces_redacted": self.faces_redacted,
            "redaction_method": self.redaction_method.as_str(),
            "processing_time_ms": round1(self.processing_time_ms),
            "image_size": format!("{}x{}", self.image_width, self.image_height),
        })
    }
}

/// Face detector plus redaction in one step.
pub struct FaceProtector {
    detector: FaceDetector,
    method: RedactionMethod,
    padding: f32,
}

impl FaceProtector {
    pub fn new(detector: FaceDetector) -> Self {
        Self {
            detector,
            method: RedactionMethod::Blur,
            padding: 0.1,
        }
    }

    pub fn with_method(mut self, method: RedactionMethod, padding: f32) -> Self {
        self.method = method;
        self.padding = padding;
        self
    }

    pub fn detector(&self) -> &FaceDetector {
        &self.detector
    }

    /// Detect faces and return a redacted copy of `image`.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn process(&self, image: &DynamicImage) -> Result<(FaceRedactionResult, DynamicImage)> {
        let start = Instant::now();
        let detection = self.detector.detect(image)?;

        let regions: Vec<PhiRegion> = detection.detections.iter().map(FaceDetection::to_region).collect();
        let output = if regions.is_empty() {
            image.clone()
        } else {
            redact(image, &regions, self.method, self.padding)
        };

        let result = FaceRedactionResult {
            faces_detected: detection.faces_detected,
            faces_redacted: regions.len(),
            redaction_method: self.method,
            processing_time_ms: elapsed_ms(start),
            image_width: image.width(),
            image_height: image.height(),
        };
        info!(faces = result.faces_redacted, method = %self.method, "Face redaction complete");
        Ok((result, output))
    }

    pub fn warm_up(&self) -> Result<()> {
        if let Err(err) = self.detector.warm_up() {
            warn!(%err, "Face model warm-up failed");
            return Err(err);
        }
        Ok(())
    }

    pub fn start_loading(&self) {
        self.detector.start_loading();
    }

    pub fn await_ready(&self, timeout: Duration) -> Result<bool> {
        self.detector.await_ready(timeout)
    }

    pub fn is_available(&self) -> bool {
        self.detector.is_available()
    }

    pub fn is_initialized(&self) -> bool {
        self.detector.is_initialized()
    }

    pub fn is_loading(&self) -> bool {
        self.detector.is_loading()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::runtime::{ModelLoader, SharedModel};
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Emits one confident face in the stride-8 grid, centred on anchor
    /// (row 1, col 1), 16x16 px, for any input size.
    pub(crate) struct OneFace {
        pub calls: AtomicUsize,
    }

    impl ModelRuntime for OneFace {
        fn run(&self, input: Tensor, outputs: &[&str]) -> Result<Vec<Tensor>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(outputs.len(), 12);
            let (h, w) = (input.shape[2], input.shape[3]);
            let mut result = Vec::new();
            for (kind, per_anchor) in [("cls", 1), ("obj", 1), ("bbox", 4), ("kps", 10)] {
                for stride in STRIDES {
                    let anchors = (h / stride) * (w / stride);
                    let mut data = vec![0.0; anchors * per_anchor];
                    if stride == 8 && anchors > 0 {
                        let idx = (w / 8) + 1;
                        match kind {
                            "cls" | "obj" => data[idx] = 0.9,
                            "bbox" => {
                                data[idx * 4] = 0.5;
                                data[idx * 4 + 1] = 0.5;
                                data[idx * 4 + 2] = 2.0f32.ln();
                                data[idx * 4 + 3] = 2.0f32.ln();
                            }
                            _ => {}
                        }
                    }
                    result.push(Tensor::new(vec![1, anchors, per_anchor], data)?);
                }
            }
            Ok(result)
        }
    }

    pub(crate) fn one_face_loader() -> (ModelLoader, Arc<OneFace>) {
        let model = Arc::new(OneFace {
            calls: AtomicUsize::new(0),
        });
        let shared = Arc::clone(&model);
        let loader: ModelLoader = Arc::new(move |_path: &std::path::Path| {
            Ok(Arc::clone(&shared) as SharedModel)
        });
        (loader, model)
    }

    fn detector() -> (FaceDetector, Arc<OneFace>) {
        let (loader, model) = one_face_loader();
        let slot = Arc::new(ModelSlot::with_loader("face", "/nowhere/face.rten", loader));
        (FaceDetector::with_slot(slot, FaceDetectorConfig::default()), model)
    }

    #[test]
    fn tiny_images_return_nothing_without_loading() {
        let (detector, model) = detector();
        for (w, h) in [(19, 200), (200, 19), (1, 1)] {
            let image = DynamicImage::new_rgb8(w, h);
            let result = detector.detect(&image).unwrap();
            assert_eq!(result.faces_detected, 0);
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        assert!(!detector.is_initialized());
    }

    #[test]
    fn decodes_single_face() {
        let (detector, _) = detector();
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([200, 180, 160])));
        let result = detector.detect(&image).unwrap();
        assert_eq!(result.faces_detected, 1);

        let face = &result.detections[0];
        // Centre (1.5*8, 1.5*8) = (12, 12), size 16.
        assert_eq!(face.rect, Rectangle::new(4, 4, 16, 16));
        assert!((face.confidence - 0.9).abs() < 1e-5);
        assert!(face.landmarks.is_some());
        assert_eq!(result.to_audit()["image_size"], "64x48");
    }

    #[test]
    fn non_finite_rows_are_discarded() {
        let mut good = [0.0f32; ROW_LEN];
        good[2] = 10.0;
        good[3] = 10.0;
        good[14] = 0.95;
        let mut bad = good;
        bad[7] = f32::NAN;
        let mut inf = good;
        inf[0] = f32::INFINITY;

        let faces = postprocess(vec![bad, inf, good], &FaceDetectorConfig::default(), 50, 50);
        assert_eq!(faces.len(), 1);
    }

    #[test]
    fn threshold_and_nms_apply() {
        let mut row = [0.0f32; ROW_LEN];
        row[2] = 20.0;
        row[3] = 20.0;
        row[14] = 0.8;
        let mut overlapping = row;
        overlapping[0] = 1.0;
        overlapping[14] = 0.75;
        let mut weak = row;
        weak[0] = 25.0;
        weak[14] = 0.5;

        let faces = postprocess(vec![overlapping, row, weak], &FaceDetectorConfig::default(), 50, 50);
        assert_eq!(faces.len(), 1);
        assert!((faces[0].confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn wrong_output_count_is_an_error() {
        assert!(decode_outputs(&[], 32, 32).is_err());
    }

    #[test]
    fn protector_blurs_detected_face() {
        let (detector, _) = detector();
        let protector = FaceProtector::new(detector).with_method(RedactionMethod::Black, 0.0);
        let mut pixels = RgbImage::from_pixel(64, 48, Rgb([250, 250, 250]));
        pixels.put_pixel(10, 10, Rgb([1, 2, 3]));
        let image = DynamicImage::ImageRgb8(pixels);

        let (result, output) = protector.process(&image).unwrap();
        assert_eq!(result.faces_redacted, 1);
        assert_eq!(result.to_audit()["redaction_method"], "black");
        let out = output.to_rgb8();
        assert_eq!(out.get_pixel(10, 10), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(40, 40), &Rgb([250, 250, 250]));
        // Input untouched.
        assert_eq!(image.to_rgb8().get_pixel(10, 10), &Rgb([1, 2, 3]));
    }

    #[test]
    fn warm_up_loads_model() {
        let (detector, model) = detector();
        let protector = FaceProtector::new(detector);
        protector.warm_up().unwrap();
        assert!(protector.is_initialized());
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }
}
