// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Region detectors — one module per PHI kind, all behind `PhiDetector`.

pub mod barcode;
pub mod face;
pub mod handwriting;
pub mod signature;

use std::cell::OnceCell;

use image::{DynamicImage, GrayImage, RgbImage};
use scrubwerk_core::error::Result;
use scrubwerk_core::{Rectangle, RegionKind};

use crate::region::PhiRegion;

pub use barcode::{BarcodeDetection, BarcodeDetector, BarcodeType};
pub use face::{FaceDetection, FaceDetector};
pub use handwriting::{HandwritingDetection, HandwritingDetector};
pub use signature::{SignatureDetection, SignatureDetector};

// ---------------------------------------------------------------------------
// Shared input
// ---------------------------------------------------------------------------

/// One image plus colour conversions computed at most once, shared by every
/// detector that runs on it.
pub struct DetectionFrame<'a> {
    image: &'a DynamicImage,
    rgb: OnceCell<RgbImage>,
    gray: OnceCell<GrayImage>,
}

impl<'a> DetectionFrame<'a> {
    pub fn new(image: &'a DynamicImage) -> Self {
        Self {
            image,
            rgb: OnceCell::new(),
            gray: OnceCell::new(),
        }
    }

    pub fn image(&self) -> &DynamicImage {
        self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Three-channel 8-bit view. Single-channel input is replicated.
    pub fn rgb(&self) -> &RgbImage {
        self.rgb.get_or_init(|| self.image.to_rgb8())
    }

    /// Weighted-luma 8-bit view.
    pub fn gray(&self) -> &GrayImage {
        self.gray.get_or_init(|| self.image.to_luma8())
    }
}

// ---------------------------------------------------------------------------
// Detections
// ---------------------------------------------------------------------------

/// Output of any detector.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Face(FaceDetection),
    Barcode(BarcodeDetection),
    Handwriting(HandwritingDetection),
    Signature(SignatureDetection),
}

impl Detection {
    pub fn kind(&self) -> RegionKind {
        match self {
            Detection::Face(_) => RegionKind::Face,
            Detection::Barcode(_) => RegionKind::Barcode,
            Detection::Handwriting(_) => RegionKind::Handwriting,
            Detection::Signature(_) => RegionKind::Signature,
        }
    }

    pub fn rect(&self) -> Rectangle {
        match self {
            Detection::Face(d) => d.rect,
            Detection::Barcode(d) => d.rect,
            Detection::Handwriting(d) => d.rect,
            Detection::Signature(d) => d.rect,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            Detection::Face(d) => d.confidence,
            Detection::Barcode(d) => d.confidence,
            Detection::Handwriting(d) => d.confidence,
            Detection::Signature(d) => d.confidence,
        }
    }

    /// Project into the unified region shape.
    pub fn to_region(&self) -> PhiRegion {
        match self {
            Detection::Face(d) => d.to_region(),
            Detection::Barcode(d) => d.to_region(),
            Detection::Handwriting(d) => d.to_region(),
            Detection::Signature(d) => d.to_region(),
        }
    }
}

// ---------------------------------------------------------------------------
// Detector capability
// ---------------------------------------------------------------------------

/// What the orchestrator needs from a detector.
pub trait PhiDetector: Send + Sync {
    fn kind(&self) -> RegionKind;

    /// Identifier recorded in `detectors_run`, e.g. `face_yunet`.
    fn run_id(&self) -> &'static str;

    /// False when the detector's model is missing or cannot run in this
    /// build. Unavailable detectors are skipped, not reported as errors.
    fn is_available(&self) -> bool;

    fn detect(&self, frame: &DetectionFrame<'_>) -> Result<Vec<Detection>>;
}

/// The closed set of detectors the orchestrator can run.
pub enum Detector {
    Face(FaceDetector),
    Barcode(BarcodeDetector),
    Handwriting(HandwritingDetector),
    Signature(SignatureDetector),
}

impl Detector {
    /// Start background model loading, for detectors that have a model.
    pub fn start_loading(&self) {
        match self {
            Detector::Face(d) => d.start_loading(),
            Detector::Handwriting(d) => d.start_loading(),
            Detector::Barcode(_) | Detector::Signature(_) => {}
        }
    }

    fn inner(&self) -> &dyn PhiDetector {
        match self {
            Detector::Face(d) => d,
            Detector::Barcode(d) => d,
            Detector::Handwriting(d) => d,
            Detector::Signature(d) => d,
        }
    }
}

impl PhiDetector for Detector {
    fn kind(&self) -> RegionKind {
        self.inner().kind()
    }

    fn run_id(&self) -> &'static str {
        self.inner().run_id()
    }

    fn is_available(&self) -> bool {
        self.inner().is_available()
    }

    fn detect(&self, frame: &DetectionFrame<'_>) -> Result<Vec<Detection>> {
        self.inner().detect(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn frame_converts_gray_to_rgb_once() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 3, Luma([77])));
        let frame = DetectionFrame::new(&gray);
        let first = frame.rgb() as *const RgbImage;
        let second = frame.rgb() as *const RgbImage;
        assert_eq!(first, second);
        assert_eq!(frame.rgb().get_pixel(0, 0), &Rgb([77, 77, 77]));
        assert_eq!((frame.width(), frame.height()), (4, 3));
    }

    #[test]
    fn detection_projection_keeps_kind() {
        let d = Detection::Signature(SignatureDetection {
            rect: Rectangle::new(1, 1, 10, 5),
            confidence: 0.85,
        });
        let region = d.to_region();
        assert_eq!(region.kind, RegionKind::Signature);
        assert_eq!(region.detector, "contour");
        assert_eq!(region.rect, d.rect());
    }
}
