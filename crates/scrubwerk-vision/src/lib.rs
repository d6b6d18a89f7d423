// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scrubwerk-vision — PHI region detection and pixel redaction.
//
// Finds faces (YuNet), barcodes (rxing), handwriting (YOLOv8) and signatures
// (contour heuristic) in an image, merges them into `PhiRegion`s and paints
// over them with a black fill, Gaussian blur or pixelation. Neural models are
// loaded lazily from `.rten` files and only run when the crate is built with
// the `inference` feature.

pub mod detect;
pub mod geometry;
pub mod loader;
pub mod orchestrator;
pub mod redact;
pub mod region;
pub mod runtime;

#[cfg(feature = "inference")]
pub mod rten_backend;

pub use detect::barcode::{BarcodeDetectionResult, redact_barcodes};
pub use detect::face::{FaceDetectionResult, FaceProtector, FaceRedactionResult};
pub use detect::handwriting::HandwritingScan;
pub use detect::signature::SignatureRedactionResult;
pub use detect::{
    BarcodeDetection, BarcodeDetector, BarcodeType, Detection, DetectionFrame, Detector,
    FaceDetection, FaceDetector, HandwritingDetection, HandwritingDetector, PhiDetector,
    SignatureDetection, SignatureDetector,
};
pub use loader::ModelSlot;
pub use orchestrator::{ImagePhiProcessor, ImagePhiResult};
pub use redact::{annotate_regions, redact};
pub use region::PhiRegion;
pub use runtime::{ModelLoader, ModelRuntime, SharedModel, Tensor};
