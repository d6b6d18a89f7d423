// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Signature detection — contour heuristic, no model.
//
// Ink is isolated with an adaptive mean threshold, outer contours are
// measured, and each one is scored on shape: signatures are wide, sparse,
// irregular strokes, while printed blocks and boxes are dense or convex.

use std::time::Instant;

use image::{DynamicImage, GrayImage, Luma};
use imageproc::contours::{BorderType, find_contours};
use imageproc::geometry::{arc_length, contour_area, convex_hull};
use imageproc::point::Point;
use scrubwerk_core::error::Result;
use scrubwerk_core::{Rectangle, RedactionMethod, RegionKind};
use scrubwerk_security::short_hash;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::face::elapsed_ms;
use super::{Detection, DetectionFrame, PhiDetector};
use crate::geometry::nms;
use crate::redact::redact;
use crate::region::PhiRegion;

pub const SIGNATURE_CLASS: &str = "signature";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignatureConfig {
    /// Minimum shape score, 0..=1.
    pub threshold: f32,
    pub iou_threshold: f32,
    /// Total growth after NMS, split across both sides.
    pub expand: f32,
    /// Adaptive threshold neighbourhood radius (block 15).
    pub block_radius: u32,
    /// Subtracted from the local mean.
    pub c: i32,
    pub min_contour_area: f64,
    /// Largest contour area as a fraction of the image.
    pub max_contour_fraction: f64,
    /// Largest bounding box as a fraction of the image.
    pub max_box_fraction: f64,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            iou_threshold: 0.45,
            expand: 0.1,
            block_radius: 7,
            c: 10,
            min_contour_area: 500.0,
            max_contour_fraction: 0.5,
            max_box_fraction: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureDetection {
    pub rect: Rectangle,
    pub confidence: f32,
}

impl SignatureDetection {
    pub fn to_region(&self) -> PhiRegion {
        PhiRegion::new(self.rect, RegionKind::Signature, self.confidence, "contour")
            .with_meta("class", SIGNATURE_CLASS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureRedactionResult {
    pub original_hash: String,
    pub signatures_detected: usize,
    pub processing_time_ms: f64,
    pub redaction_applied: bool,
}

/// Shape measurements of one contour.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Shape {
    density: f64,
    aspect: f64,
    complexity: f64,
    solidity: f64,
}

impl Shape {
    fn score(&self) -> f32 {
        if self.density > 0.6 || self.solidity >= 0.8 {
            return 0.0;
        }
        let mut score = 0.0;
        if (1.5..=15.0).contains(&self.aspect) {
            score += 0.30;
        }
        if (0.05..=0.6).contains(&self.density) {
            score += 0.25;
        }
        if self.complexity >= 0.3 {
            score += 0.25;
        }
        if self.solidity < 0.8 {
            score += 0.20;
        }
        score
    }
}

#[derive(Debug, Default, Clone)]
pub struct SignatureDetector {
    config: SignatureConfig,
}

impl SignatureDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SignatureConfig) -> Self {
        Self { config }
    }

    pub fn with_threshold(threshold: f32) -> Self {
        Self::with_config(SignatureConfig {
            threshold,
            ..SignatureConfig::default()
        })
    }

    /// Heuristic detectors need no loading.
    pub fn is_initialized(&self) -> bool {
        true
    }

    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn detect(&self, image: &DynamicImage) -> Vec<SignatureDetection> {
        self.detect_gray(&image.to_luma8())
    }

    /// Detect and black-fill every signature.
    pub fn protect(&self, image: &DynamicImage) -> (SignatureRedactionResult, DynamicImage) {
        let start = Instant::now();
        let frame = DetectionFrame::new(image);
        let original_hash = short_hash(frame.rgb().as_raw());
        let detections = self.detect_gray(frame.gray());

        let regions: Vec<PhiRegion> = detections.iter().map(SignatureDetection::to_region).collect();
        let output = if regions.is_empty() {
            image.clone()
        } else {
            redact(image, &regions, RedactionMethod::Black, 0.0)
        };

        let result = SignatureRedactionResult {
            original_hash,
            signatures_detected: detections.len(),
            processing_time_ms: elapsed_ms(start),
            redaction_applied: !regions.is_empty(),
        };
        info!(signatures = result.signatures_detected, "Signature redaction complete");
        (result, output)
    }

    fn detect_gray(&self, gray: &GrayImage) -> Vec<SignatureDetection> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }
        let image_area = width as f64 * height as f64;

        let ink = adaptive_threshold_inv(gray, self.config.block_radius, self.config.c);
        let contours = find_contours::<i32>(&ink);
        let outer = contours
            .iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none());

        let mut candidates: Vec<(Rectangle, f32)> = Vec::new();
        let mut measured = 0usize;
        for contour in outer {
            let area = contour_area(&contour.points);
            if area < self.config.min_contour_area
                || area > self.config.max_contour_fraction * image_area
            {
                continue;
            }
            let Some(rect) = bounding_rect(&contour.points, width, height) else {
                continue;
            };
            if rect.area() as f64 > self.config.max_box_fraction * image_area {
                continue;
            }

            measured += 1;
            let score = measure(&contour.points, area, &rect).score();
            if score >= self.config.threshold {
                candidates.push((rect, score));
            }
        }

        let kept = nms(candidates, self.config.iou_threshold, |c| *c);
        debug!(measured, kept = kept.len(), "Signature contours scored");

        kept.into_iter()
            .map(|(rect, score)| SignatureDetection {
                rect: rect.expanded(self.config.expand, width, height),
                confidence: score.min(1.0),
            })
            .collect()
    }
}

impl PhiDetector for SignatureDetector {
    fn kind(&self) -> RegionKind {
        RegionKind::Signature
    }

    fn run_id(&self) -> &'static str {
        "signature_contour"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn detect(&self, frame: &DetectionFrame<'_>) -> Result<Vec<Detection>> {
        Ok(self
            .detect_gray(frame.gray())
            .into_iter()
            .map(Detection::Signature)
            .collect())
    }
}

// -- Measurements -------------------------------------------------------------

fn bounding_rect(points: &[Point<i32>], width: u32, height: u32) -> Option<Rectangle> {
    let min_x = points.iter().map(|p| p.x).min()?;
    let max_x = points.iter().map(|p| p.x).max()?;
    let min_y = points.iter().map(|p| p.y).min()?;
    let max_y = points.iter().map(|p| p.y).max()?;
    Rectangle::from_xywh_clamped(
        min_x as i64,
        min_y as i64,
        (max_x - min_x + 1) as i64,
        (max_y - min_y + 1) as i64,
        width,
        height,
    )
}

fn measure(points: &[Point<i32>], area: f64, rect: &Rectangle) -> Shape {
    let box_area = rect.area() as f64;
    let perimeter = arc_length(points, true);
    let hull_area = contour_area(&convex_hull(points.to_vec()));
    Shape {
        density: if box_area > 0.0 { area / box_area } else { 0.0 },
        aspect: rect.width as f64 / rect.height.max(1) as f64,
        complexity: if area > 0.0 { perimeter * perimeter / area } else { 0.0 },
        solidity: if hull_area > 0.0 { area / hull_area } else { 1.0 },
    }
}

// -- Thresholding ---------------------------------------------------------------

/// Inverted adaptive mean threshold: a pixel becomes ink (255) when it is
/// at most `local_mean - c`.
fn adaptive_threshold_inv(gray: &GrayImage, radius: u32, c: i32) -> GrayImage {
    let (width, height) = gray.dimensions();
    let integral = integral_image(gray);
    GrayImage::from_fn(width, height, |x, y| {
        let mean = window_mean(&integral, width, height, x, y, radius);
        let value = gray.get_pixel(x, y).0[0] as i32;
        if value <= mean as i32 - c {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Summed-area table with a zero border, `(width+1) x (height+1)`.
fn integral_image(gray: &GrayImage) -> Vec<u64> {
    let (w, h) = gray.dimensions();
    let stride = (w + 1) as usize;
    let mut table = vec![0u64; stride * (h + 1) as usize];
    for y in 0..h as usize {
        let mut row_sum = 0u64;
        for x in 0..w as usize {
            row_sum += gray.get_pixel(x as u32, y as u32).0[0] as u64;
            table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row_sum;
        }
    }
    table
}

fn window_mean(integral: &[u64], width: u32, height: u32, cx: u32, cy: u32, radius: u32) -> f64 {
    let stride = (width + 1) as usize;
    let x1 = cx.saturating_sub(radius) as usize;
    let y1 = cy.saturating_sub(radius) as usize;
    let x2 = (cx + radius + 1).min(width) as usize;
    let y2 = (cy + radius + 1).min(height) as usize;
    let area = ((x2 - x1) * (y2 - y1)) as f64;
    let sum = integral[y2 * stride + x2] as f64 - integral[y1 * stride + x2] as f64
        - integral[y2 * stride + x1] as f64
        + integral[y1 * stride + x1] as f64;
    sum / area
}
