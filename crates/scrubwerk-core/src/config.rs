// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Protection configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrubError};
use crate::types::RedactionMethod;

/// Settings recognised by the file protection pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    /// Remove container metadata before anything else runs.
    pub strip_metadata: bool,
    /// Run the face detector on raster images.
    pub detect_faces: bool,
    /// Run the barcode/QR detector on raster images.
    pub detect_barcodes: bool,
    /// Run the handwriting detector on raster images.
    pub detect_handwriting: bool,
    /// Run the signature heuristic on raster images.
    pub detect_signatures: bool,
    /// Minimum face detection score.
    pub face_confidence: f32,
    /// Minimum score for the handwriting model and the signature heuristic.
    pub yolo_confidence: f32,
    /// How detected regions are destroyed.
    pub redaction_method: RedactionMethod,
    /// Fractional bounding-box growth applied before redaction.
    pub redaction_padding: f32,
    /// Keep PNG colour chunks (iCCP, sRGB, gAMA, cHRM).
    pub preserve_color_profile: bool,
    /// Directory holding the `.rten` model files. `None` uses the data dir.
    pub models_dir: Option<PathBuf>,
    /// Upper bound on waiting for a background model load.
    pub model_load_timeout_secs: u64,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            strip_metadata: true,
            detect_faces: true,
            detect_barcodes: true,
            detect_handwriting: true,
            detect_signatures: true,
            face_confidence: 0.7,
            yolo_confidence: 0.5,
            redaction_method: RedactionMethod::Blur,
            redaction_padding: 0.1,
            preserve_color_profile: false,
            models_dir: None,
            model_load_timeout_secs: 60,
        }
    }
}

impl ProtectionConfig {
    /// Read a JSON config file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: ProtectionConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Reject thresholds and padding outside their meaningful ranges.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("face_confidence", self.face_confidence),
            ("yolo_confidence", self.yolo_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ScrubError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if !(0.0..1.0).contains(&self.redaction_padding) {
            return Err(ScrubError::InvalidConfig(format!(
                "redaction_padding must be within [0, 1), got {}",
                self.redaction_padding
            )));
        }
        Ok(())
    }

    /// Resolved model directory.
    pub fn model_dir(&self) -> PathBuf {
        self.models_dir.clone().unwrap_or_else(default_model_dir)
    }

    /// Wait budget for background model loads.
    pub fn model_load_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.model_load_timeout_secs)
    }
}

/// Default model directory: `$XDG_DATA_HOME/scrubwerk/models`, falling back
/// to `~/.local/share/scrubwerk/models`.
pub fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg).join("scrubwerk").join("models")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("scrubwerk")
            .join("models")
    } else {
        PathBuf::from("scrubwerk-models")
    }
}
