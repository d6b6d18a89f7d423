// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The unified region shape every detector's output is projected into.

use std::collections::BTreeMap;

use scrubwerk_core::{Rectangle, RegionKind};
use serde::{Deserialize, Serialize};

/// A PHI-bearing area of an image, independent of which detector found it.
///
/// `metadata` holds only classification values (types, lengths, flags). It
/// never holds decoded content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhiRegion {
    pub rect: Rectangle,
    pub kind: RegionKind,
    pub confidence: f32,
    /// Short detector tag, e.g. `yunet` or `rxing`.
    pub detector: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Tighter outline than `rect`, in image coordinates. At least three
    /// points when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polygon: Option<Vec<(i32, i32)>>,
}

impl PhiRegion {
    pub fn new(rect: Rectangle, kind: RegionKind, confidence: f32, detector: &str) -> Self {
        Self {
            rect,
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            detector: detector.to_owned(),
            metadata: BTreeMap::new(),
            polygon: None,
        }
    }

    /// Attach one metadata entry.
    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }

    /// Attach an outline. Outlines with fewer than three points are ignored.
    pub fn with_polygon(mut self, polygon: Option<Vec<(i32, i32)>>) -> Self {
        self.polygon = polygon.filter(|points| points.len() >= 3);
        self
    }
}
