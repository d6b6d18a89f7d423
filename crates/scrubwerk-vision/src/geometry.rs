// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Box geometry shared by the detectors: greedy non-maximum suppression,
// letterbox resizing and channel-first tensor packing.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use scrubwerk_core::Rectangle;

use crate::runtime::Tensor;

/// Neutral grey used to pad letterboxed model inputs.
pub const LETTERBOX_FILL: u8 = 114;

// ---------------------------------------------------------------------------
// Non-maximum suppression
// ---------------------------------------------------------------------------

/// Greedy NMS: visit candidates by descending score, keep each one unless it
/// overlaps an already-kept box with IoU strictly greater than `iou_threshold`.
///
/// `key` extracts the box and score of a candidate. Ties keep input order.
pub fn nms<T, F>(mut candidates: Vec<T>, iou_threshold: f32, key: F) -> Vec<T>
where
    F: Fn(&T) -> (Rectangle, f32),
{
    candidates.sort_by(|a, b| key(b).1.total_cmp(&key(a).1));

    let mut kept: Vec<T> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let (rect, _) = key(&candidate);
        let suppressed = kept
            .iter()
            .any(|existing| key(existing).0.iou(&rect) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

// ---------------------------------------------------------------------------
// Letterbox
// ---------------------------------------------------------------------------

/// How an image was placed inside a square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub size: u32,
}

impl Letterbox {
    /// Map a point from model-input space back to original image space.
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Aspect-preserving resize into a `size`x`size` canvas, centred, with the
/// border filled by [`LETTERBOX_FILL`].
pub fn letterbox(image: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
    let (width, height) = image.dimensions();
    let scale = (size as f32 / width.max(1) as f32).min(size as f32 / height.max(1) as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
    imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    (
        canvas,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            size,
        },
    )
}

// ---------------------------------------------------------------------------
// Tensor packing
// ---------------------------------------------------------------------------

/// Channel order used when packing pixels into a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// Pack `image` into a `[1, 3, H, W]` tensor, multiplying every sample by
/// `factor`. `tensor_w`/`tensor_h` may exceed the image size; the excess is
/// zero.
pub fn chw_tensor(
    image: &RgbImage,
    order: ChannelOrder,
    factor: f32,
    tensor_w: u32,
    tensor_h: u32,
) -> Tensor {
    let (tw, th) = (tensor_w as usize, tensor_h as usize);
    let plane = tw * th;
    let mut tensor = Tensor::zeros(vec![1, 3, th, tw]);

    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        if x >= tw || y >= th {
            continue;
        }
        let [r, g, b] = pixel.0;
        let channels = match order {
            ChannelOrder::Rgb => [r, g, b],
            ChannelOrder::Bgr => [b, g, r],
        };
        for (c, value) in channels.into_iter().enumerate() {
            tensor.data[c * plane + y * tw + x] = value as f32 * factor;
        }
    }
    tensor
}
