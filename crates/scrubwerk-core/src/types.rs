// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shared value types: region geometry, redaction methods, container formats
// and the record of a removed metadata element.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ScrubError;

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Axis-aligned pixel rectangle, always inside `[0, image_width) x [0, image_height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rectangle {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a rectangle from possibly out-of-bounds corner coordinates.
    ///
    /// Corners are rounded toward the inside of the image and clamped to its
    /// bounds. Returns `None` when nothing of the box remains visible or a
    /// coordinate is not finite.
    pub fn from_corners_clamped(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        image_width: u32,
        image_height: u32,
    ) -> Option<Self> {
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return None;
        }
        let left = x1.floor().clamp(0.0, image_width as f32) as u32;
        let top = y1.floor().clamp(0.0, image_height as f32) as u32;
        let right = x2.ceil().clamp(0.0, image_width as f32) as u32;
        let bottom = y2.ceil().clamp(0.0, image_height as f32) as u32;
        if right <= left || bottom <= top {
            return None;
        }
        Some(Self::new(left, top, right - left, bottom - top))
    }

    /// Build a rectangle from an `(x, y, w, h)` box in signed pixel space.
    pub fn from_xywh_clamped(
        x: i64,
        y: i64,
        width: i64,
        height: i64,
        image_width: u32,
        image_height: u32,
    ) -> Option<Self> {
        let left = x.clamp(0, image_width as i64);
        let top = y.clamp(0, image_height as i64);
        let right = (x + width).clamp(0, image_width as i64);
        let bottom = (y + height).clamp(0, image_height as i64);
        if right <= left || bottom <= top {
            return None;
        }
        Some(Self::new(
            left as u32,
            top as u32,
            (right - left) as u32,
            (bottom - top) as u32,
        ))
    }

    /// Right edge (exclusive).
    pub fn x2(&self) -> u32 {
        self.x + self.width
    }

    /// Bottom edge (exclusive).
    pub fn y2(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersection over union with another rectangle. Zero when disjoint.
    pub fn iou(&self, other: &Rectangle) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.x2().min(other.x2());
        let bottom = self.y2().min(other.y2());
        if right <= left || bottom <= top {
            return 0.0;
        }
        let intersection = (right - left) as u64 * (bottom - top) as u64;
        let union = self.area() + other.area() - intersection;
        if union == 0 {
            0.0
        } else {
            intersection as f32 / union as f32
        }
    }

    /// Grow by `fraction` of the width/height on *every* side, clamped.
    ///
    /// This is the redaction padding: `0.1` adds 10% of the width to the left
    /// and another 10% to the right.
    pub fn padded(&self, fraction: f32, image_width: u32, image_height: u32) -> Rectangle {
        let pad_w = (self.width as f32 * fraction) as i64;
        let pad_h = (self.height as f32 * fraction) as i64;
        Rectangle::from_xywh_clamped(
            self.x as i64 - pad_w,
            self.y as i64 - pad_h,
            self.width as i64 + 2 * pad_w,
            self.height as i64 + 2 * pad_h,
            image_width,
            image_height,
        )
        .unwrap_or(*self)
    }

    /// Grow by `fraction` of the width/height in *total*, split evenly across
    /// both sides and clamped. Used as the post-NMS safety margin.
    pub fn expanded(&self, fraction: f32, image_width: u32, image_height: u32) -> Rectangle {
        let grow_w = (self.width as f32 * fraction / 2.0) as i64;
        let grow_h = (self.height as f32 * fraction / 2.0) as i64;
        Rectangle::from_xywh_clamped(
            self.x as i64 - grow_w,
            self.y as i64 - grow_h,
            self.width as i64 + 2 * grow_w,
            self.height as i64 + 2 * grow_h,
            image_width,
            image_height,
        )
        .unwrap_or(*self)
    }
}

// ---------------------------------------------------------------------------
// Regions and redaction
// ---------------------------------------------------------------------------

/// Kind of PHI a region was flagged for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    Face,
    Barcode,
    Handwriting,
    Signature,
}

impl RegionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionKind::Face => "face",
            RegionKind::Barcode => "barcode",
            RegionKind::Handwriting => "handwriting",
            RegionKind::Signature => "signature",
        }
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a region's pixels are destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedactionMethod {
    /// Zero-fill.
    Black,
    /// Large-kernel Gaussian blur confined to the region.
    Blur,
    /// Block-downsample, then nearest-neighbour upsample.
    Pixelate,
}

impl RedactionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedactionMethod::Black => "black",
            RedactionMethod::Blur => "blur",
            RedactionMethod::Pixelate => "pixelate",
        }
    }
}

impl fmt::Display for RedactionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RedactionMethod {
    type Err = ScrubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "black" | "fill" => Ok(RedactionMethod::Black),
            "blur" => Ok(RedactionMethod::Blur),
            "pixelate" => Ok(RedactionMethod::Pixelate),
            other => Err(ScrubError::InvalidConfig(format!(
                "unknown redaction method {other:?}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Containers and metadata
// ---------------------------------------------------------------------------

/// Container format, detected from magic bytes only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Jpeg,
    Png,
    Tiff,
    Webp,
    Gif,
    Bmp,
    Pdf,
    Docx,
    Xlsx,
    Pptx,
    Dicom,
    Unknown,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Jpeg => "jpeg",
            FileType::Png => "png",
            FileType::Tiff => "tiff",
            FileType::Webp => "webp",
            FileType::Gif => "gif",
            FileType::Bmp => "bmp",
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
            FileType::Xlsx => "xlsx",
            FileType::Pptx => "pptx",
            FileType::Dicom => "dicom",
            FileType::Unknown => "unknown",
        }
    }

    /// Raster formats that go through detection and redaction after stripping.
    pub fn is_redactable_image(&self) -> bool {
        matches!(
            self,
            FileType::Jpeg | FileType::Png | FileType::Tiff | FileType::Webp | FileType::Bmp
        )
    }

    /// Office Open XML containers (zip-based).
    pub fn is_office(&self) -> bool {
        matches!(self, FileType::Docx | FileType::Xlsx | FileType::Pptx)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One metadata element that was found and discarded. Never carries its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataField {
    /// Family of the element, e.g. `EXIF`, `XMP`, `PNG`, `PDF`, `Office`.
    pub category: String,
    /// Element name, e.g. `GPSLatitude`, `tEXt`, `Info:Author`.
    pub name: String,
    /// Known to carry identifying data.
    pub is_sensitive: bool,
}

impl MetadataField {
    pub fn new(category: &str, name: impl Into<String>, is_sensitive: bool) -> Self {
        Self {
            category: category.to_owned(),
            name: name.into(),
            is_sensitive,
        }
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.name)
    }
}
