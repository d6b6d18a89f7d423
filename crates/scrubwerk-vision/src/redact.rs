// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Redaction engine — destroys the pixels under each region.
//
// Every method works on a padded copy of the region's box. Regions that
// carry a polygon are filled exactly for Black and masked against a
// whole-image blur for Blur; Pixelate always uses the padded box.

use std::collections::HashMap;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_polygon_mut};
use imageproc::filter::gaussian_blur_f32;
use imageproc::point::Point;
use imageproc::rect::Rect;
use scrubwerk_core::{Rectangle, RedactionMethod, RegionKind};
use tracing::{debug, instrument};

use crate::region::PhiRegion;

/// Gaussian sigma for most regions (about a 99 px kernel).
pub const BLUR_SIGMA: f32 = 30.0;
/// Gaussian sigma for barcodes (about a 51 px kernel).
pub const BARCODE_BLUR_SIGMA: f32 = 20.0;
/// Pixelation block for barcodes. Smaller blocks leave symbols decodable.
pub const BARCODE_PIXELATE_BLOCK: u32 = 16;
pub const PIXELATE_BLOCK: u32 = 10;

const OPAQUE_BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

fn blur_sigma(kind: RegionKind) -> f32 {
    match kind {
        RegionKind::Barcode => BARCODE_BLUR_SIGMA,
        _ => BLUR_SIGMA,
    }
}

fn pixelate_block(kind: RegionKind) -> u32 {
    match kind {
        RegionKind::Barcode => BARCODE_PIXELATE_BLOCK,
        _ => PIXELATE_BLOCK,
    }
}

/// Redact `regions` in a copy of `image`.
///
/// `padding` grows each box by that fraction of its size on every side
/// before redaction. The result keeps the input's channel layout (8-bit).
#[instrument(skip(image, regions), fields(width = image.width(), height = image.height(), regions = regions.len()))]
pub fn redact(
    image: &DynamicImage,
    regions: &[PhiRegion],
    method: RedactionMethod,
    padding: f32,
) -> DynamicImage {
    let mut canvas = image.to_rgba8();
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return restore_layout(image, canvas);
    }

    // Whole-image blurs for polygon masks, one per sigma.
    let mut full_blurs: HashMap<u32, RgbaImage> = HashMap::new();
    let source = canvas.clone();

    for region in regions {
        let window = region.rect.padded(padding, width, height);
        if window.is_empty() {
            continue;
        }
        let polygon = region.polygon.as_deref().and_then(polygon_points);

        match (method, polygon) {
            (RedactionMethod::Black, Some(points)) => {
                draw_polygon_mut(&mut canvas, &points, OPAQUE_BLACK);
            }
            (RedactionMethod::Black, None) => fill_black(&mut canvas, window),
            (RedactionMethod::Blur, Some(points)) => {
                let sigma = blur_sigma(region.kind);
                let blurred = full_blurs
                    .entry(sigma.to_bits())
                    .or_insert_with(|| gaussian_blur_f32(&source, sigma));
                apply_masked(&mut canvas, blurred, &points);
            }
            (RedactionMethod::Blur, None) => blur_window(&mut canvas, window, blur_sigma(region.kind)),
            (RedactionMethod::Pixelate, _) => {
                pixelate_window(&mut canvas, window, pixelate_block(region.kind));
            }
        }
    }

    debug!(blur_passes = full_blurs.len(), "Redaction complete");
    restore_layout(image, canvas)
}

/// Convert back to the caller's colour layout.
fn restore_layout(original: &DynamicImage, canvas: RgbaImage) -> DynamicImage {
    let color = original.color();
    let rgba = DynamicImage::ImageRgba8(canvas);
    match (color.has_color(), color.has_alpha()) {
        (_, true) => rgba,
        (true, false) => DynamicImage::ImageRgb8(rgba.to_rgb8()),
        (false, false) => DynamicImage::ImageLuma8(rgba.to_luma8()),
    }
}

/// Polygon vertices with repeated points removed; imageproc rejects
/// polygons whose first and last points coincide.
fn polygon_points(polygon: &[(i32, i32)]) -> Option<Vec<Point<i32>>> {
    let mut points: Vec<Point<i32>> = Vec::with_capacity(polygon.len());
    for &(x, y) in polygon {
        let p = Point::new(x, y);
        if points.last() != Some(&p) {
            points.push(p);
        }
    }
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    (points.len() >= 3).then_some(points)
}

fn fill_black(canvas: &mut RgbaImage, window: Rectangle) {
    for y in window.y..window.y2() {
        for x in window.x..window.x2() {
            canvas.put_pixel(x, y, OPAQUE_BLACK);
        }
    }
}

fn blur_window(canvas: &mut RgbaImage, window: Rectangle, sigma: f32) {
    let roi = imageops::crop_imm(canvas, window.x, window.y, window.width, window.height).to_image();
    let blurred = gaussian_blur_f32(&roi, sigma);
    imageops::replace(canvas, &blurred, window.x as i64, window.y as i64);
}

fn apply_masked(canvas: &mut RgbaImage, blurred: &RgbaImage, points: &[Point<i32>]) {
    let (width, height) = canvas.dimensions();
    let mut mask = GrayImage::new(width, height);
    draw_polygon_mut(&mut mask, points, Luma([255]));
    for (x, y, m) in mask.enumerate_pixels() {
        if m.0[0] != 0 {
            canvas.put_pixel(x, y, *blurred.get_pixel(x, y));
        }
    }
}

fn pixelate_window(canvas: &mut RgbaImage, window: Rectangle, block: u32) {
    let (w, h) = (window.width, window.height);
    let block = if w < block || h < block {
        (w.min(h) / 2).max(1)
    } else {
        block
    };
    let small_w = (w / block).max(1);
    let small_h = (h / block).max(1);

    let roi = imageops::crop_imm(canvas, window.x, window.y, w, h).to_image();
    let small = imageops::resize(&roi, small_w, small_h, FilterType::Triangle);
    let blocky = imageops::resize(&small, w, h, FilterType::Nearest);
    imageops::replace(canvas, &blocky, window.x as i64, window.y as i64);
}

// ---------------------------------------------------------------------------
// Debug annotation
// ---------------------------------------------------------------------------

fn annotation_color(kind: RegionKind) -> Rgba<u8> {
    match kind {
        RegionKind::Face => Rgba([255, 0, 0, 255]),
        RegionKind::Barcode => Rgba([0, 255, 0, 255]),
        RegionKind::Handwriting => Rgba([0, 0, 255, 255]),
        RegionKind::Signature => Rgba([255, 165, 0, 255]),
    }
}

/// Copy of `image` with a hollow, colour-coded box around every region.
/// For debugging only: the output still shows the PHI.
pub fn annotate_regions(image: &DynamicImage, regions: &[PhiRegion]) -> DynamicImage {
    let mut canvas = image.to_rgba8();
    for region in regions {
        if region.rect.is_empty() {
            continue;
        }
        let rect = Rect::at(region.rect.x as i32, region.rect.y as i32)
            .of_size(region.rect.width, region.rect.height);
        draw_hollow_rect_mut(&mut canvas, rect, annotation_color(region.kind));
    }
    DynamicImage::ImageRgba8(canvas)
}
