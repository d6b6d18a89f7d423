// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Barcode / QR detection.
//
// Decoded payloads are hashed inside the decoder and dropped there; nothing
// past `SymbolDecoder::decode` ever sees the content, only its truncated
// SHA-256 fingerprint and byte length.

use std::fmt;
use std::time::Instant;

use image::{DynamicImage, GrayImage, Luma};
use scrubwerk_core::error::{Result, ScrubError};
use scrubwerk_core::{Rectangle, RedactionMethod, RegionKind};
use scrubwerk_security::short_hash;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::face::{elapsed_ms, round1};
use super::{Detection, DetectionFrame, PhiDetector};
use crate::redact::redact;
use crate::region::PhiRegion;

/// Default redaction padding for barcode regions.
pub const BARCODE_PADDING: f32 = 0.05;

// ---------------------------------------------------------------------------
// Symbol types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarcodeType {
    #[serde(rename = "QRCODE")]
    QrCode,
    #[serde(rename = "PDF417")]
    Pdf417,
    #[serde(rename = "CODE128")]
    Code128,
    #[serde(rename = "CODE39")]
    Code39,
    #[serde(rename = "EAN13")]
    Ean13,
    #[serde(rename = "EAN8")]
    Ean8,
    #[serde(rename = "UPCA")]
    UpcA,
    #[serde(rename = "UPCE")]
    UpcE,
    #[serde(rename = "I25")]
    I25,
    #[serde(rename = "DATABAR")]
    DataBar,
    #[serde(rename = "DATABAR-EXP")]
    DataBarExpanded,
    #[serde(rename = "CODABAR")]
    Codabar,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl BarcodeType {
    /// Classify a decoder's format label. Case, `_` and `-` are ignored;
    /// anything unrecognised is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        let key: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        match key.as_str() {
            "QRCODE" | "QR" => BarcodeType::QrCode,
            "PDF417" => BarcodeType::Pdf417,
            "CODE128" => BarcodeType::Code128,
            "CODE39" => BarcodeType::Code39,
            "EAN13" => BarcodeType::Ean13,
            "EAN8" => BarcodeType::Ean8,
            "UPCA" => BarcodeType::UpcA,
            "UPCE" => BarcodeType::UpcE,
            "I25" | "ITF" => BarcodeType::I25,
            "DATABAR" | "RSS14" => BarcodeType::DataBar,
            "DATABAREXP" | "DATABAREXPANDED" | "RSSEXPANDED" => BarcodeType::DataBarExpanded,
            "CODABAR" => BarcodeType::Codabar,
            _ => BarcodeType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BarcodeType::QrCode => "QRCODE",
            BarcodeType::Pdf417 => "PDF417",
            BarcodeType::Code128 => "CODE128",
            BarcodeType::Code39 => "CODE39",
            BarcodeType::Ean13 => "EAN13",
            BarcodeType::Ean8 => "EAN8",
            BarcodeType::UpcA => "UPCA",
            BarcodeType::UpcE => "UPCE",
            BarcodeType::I25 => "I25",
            BarcodeType::DataBar => "DATABAR",
            BarcodeType::DataBarExpanded => "DATABAR-EXP",
            BarcodeType::Codabar => "CODABAR",
            BarcodeType::Unknown => "UNKNOWN",
        }
    }

    /// Formats that routinely carry structured identity data (licences,
    /// wristbands).
    pub fn is_high_risk(&self) -> bool {
        matches!(
            self,
            BarcodeType::Pdf417 | BarcodeType::QrCode | BarcodeType::Code128
        )
    }
}

impl fmt::Display for BarcodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Decoder seam
// ---------------------------------------------------------------------------

/// One decoded symbol as reported by a decoder. Carries no payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSymbol {
    pub format_label: String,
    pub payload_hash: String,
    pub payload_len: usize,
    /// Anchor points reported by the decoder, in image coordinates.
    pub points: Vec<(f32, f32)>,
}

impl DecodedSymbol {
    /// Fingerprint `payload` and forget it.
    pub fn from_payload(format_label: impl Into<String>, payload: &[u8], points: Vec<(f32, f32)>) -> Self {
        Self {
            format_label: format_label.into(),
            payload_hash: short_hash(payload),
            payload_len: payload.len(),
            points,
        }
    }
}

pub trait SymbolDecoder: Send + Sync {
    /// Every symbol found in `luma`. No symbols is `Ok(vec![])`.
    fn decode(&self, luma: &GrayImage) -> Result<Vec<DecodedSymbol>>;
}

/// `rxing` multi-symbol decoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct RxingDecoder;

impl SymbolDecoder for RxingDecoder {
    fn decode(&self, luma: &GrayImage) -> Result<Vec<DecodedSymbol>> {
        use rxing::Exceptions;

        let (width, height) = luma.dimensions();
        let results = match rxing::helpers::detect_multiple_in_luma(luma.as_raw().clone(), width, height) {
            Ok(results) => results,
            Err(
                Exceptions::NotFoundException(_)
                | Exceptions::FormatException(_)
                | Exceptions::ChecksumException(_),
            ) => return Ok(Vec::new()),
            Err(err) => {
                return Err(ScrubError::Detector {
                    detector: "barcode".into(),
                    message: format!("symbol decoding failed: {err}"),
                });
            }
        };

        Ok(results
            .iter()
            .map(|result| {
                // Raw bytes are the symbol's codewords; the payload is the text.
                let text = result.getText();
                let payload = if text.is_empty() {
                    result.getRawBytes()
                } else {
                    text.as_bytes()
                };
                let points = result.getPoints().iter().map(|p| (p.x, p.y)).collect();
                DecodedSymbol::from_payload(format!("{:?}", result.getBarcodeFormat()), payload, points)
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarcodeDetection {
    pub rect: Rectangle,
    /// Always 1.0: a detection exists only when the payload decoded.
    pub confidence: f32,
    pub barcode_type: BarcodeType,
    /// 16 hex chars of SHA-256 over the payload.
    pub data_hash: String,
    pub data_length: usize,
    pub polygon: Option<Vec<(i32, i32)>>,
}

impl BarcodeDetection {
    pub fn is_high_risk(&self) -> bool {
        self.barcode_type.is_high_risk()
    }

    /// Type, location and length. Omits the hash.
    pub fn to_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.barcode_type.as_str(),
            "rect": self.rect,
            "data_length": self.data_length,
            "high_risk": self.is_high_risk(),
        })
    }

    pub fn to_region(&self) -> PhiRegion {
        PhiRegion::new(self.rect, RegionKind::Barcode, self.confidence, "rxing")
            .with_meta("barcode_type", self.barcode_type.as_str())
            .with_meta("data_length", self.data_length)
            .with_meta("high_risk", self.is_high_risk())
            .with_polygon(self.polygon.clone())
    }
}

/// Free-function form of [`BarcodeDetection::is_high_risk`].
pub fn is_high_risk(detection: &BarcodeDetection) -> bool {
    detection.is_high_risk()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarcodeDetectionResult {
    pub barcodes_detected: usize,
    pub detections: Vec<BarcodeDetection>,
    pub processing_time_ms: f64,
    pub image_width: u32,
    pub image_height: u32,
}

impl BarcodeDetectionResult {
    pub fn to_audit(&self) -> serde_json::Value {
        let mut types: Vec<&'static str> = Vec::new();
        for d in &self.detections {
            let label = d.barcode_type.as_str();
            if !types.contains(&label) {
                types.push(label);
            }
        }
        serde_json::json!({
            "barcodes_detected": self.barcodes_detected,
            "barcode_types": types,
            "processing_time_ms": round1(self.processing_time_ms),
            "image_size": format!("{}x{}", self.image_width, self.image_height),
        })
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

pub struct BarcodeDetector {
    decoder: Box<dyn SymbolDecoder>,
}

impl Default for BarcodeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl BarcodeDetector {
    pub fn new() -> Self {
        Self::with_decoder(Box::new(RxingDecoder))
    }

    pub fn with_decoder(decoder: Box<dyn SymbolDecoder>) -> Self {
        Self { decoder }
    }

    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn detect(&self, image: &DynamicImage) -> Result<BarcodeDetectionResult> {
        let start = Instant::now();
        let detections = self.detect_image(image)?;
        Ok(BarcodeDetectionResult {
            barcodes_detected: detections.len(),
            detections,
            processing_time_ms: elapsed_ms(start),
            image_width: image.width(),
            image_height: image.height(),
        })
    }

    fn detect_image(&self, image: &DynamicImage) -> Result<Vec<BarcodeDetection>> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let luma = to_decoder_gray(image);
        let symbols = self.decoder.decode(&luma)?;
        let total = symbols.len();

        let detections: Vec<BarcodeDetection> = symbols
            .into_iter()
            .filter_map(|symbol| locate(symbol, width, height))
            .collect();
        debug!(decoded = total, located = detections.len(), "Barcode scan complete");
        Ok(detections)
    }
}

impl PhiDetector for BarcodeDetector {
    fn kind(&self) -> RegionKind {
        RegionKind::Barcode
    }

    fn run_id(&self) -> &'static str {
        "barcode_rxing"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn detect(&self, frame: &DetectionFrame<'_>) -> Result<Vec<Detection>> {
        Ok(self
            .detect_image(frame.image())?
            .into_iter()
            .map(Detection::Barcode)
            .collect())
    }
}

/// Project barcode detections to regions and redact them.
pub fn redact_barcodes(
    image: &DynamicImage,
    detections: &[BarcodeDetection],
    method: RedactionMethod,
    padding: f32,
) -> DynamicImage {
    let regions: Vec<PhiRegion> = detections.iter().map(BarcodeDetection::to_region).collect();
    redact(image, &regions, method, padding)
}

// -- Grayscale ----------------------------------------------------------------

/// 8-bit grayscale for the decoder.
///
/// Colour input averages its channels. Single-channel input whose samples
/// never exceed 1 is treated as a bilevel mask and scaled to 0/255.
pub fn to_decoder_gray(image: &DynamicImage) -> GrayImage {
    match image {
        DynamicImage::ImageLuma8(gray) => scale_bilevel(gray.clone()),
        DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA16(_) => {
            scale_bilevel(image.to_luma8())
        }
        _ => {
            let rgb = image.to_rgb8();
            GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                let [r, g, b] = rgb.get_pixel(x, y).0;
                Luma([((r as u16 + g as u16 + b as u16) / 3) as u8])
            })
        }
    }
}

fn scale_bilevel(mut gray: GrayImage) -> GrayImage {
    if gray.pixels().all(|p| p.0[0] <= 1) {
        for p in gray.pixels_mut() {
            p.0[0] *= 255;
        }
    }
    gray
}

// -- Geometry -----------------------------------------------------------------

fn centroid(points: &[(f32, f32)]) -> (f32, f32) {
    let n = points.len() as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
    (sx / n, sy / n)
}

fn scale_about_centroid(points: &[(f32, f32)], factor: f32) -> Vec<(f32, f32)> {
    let (cx, cy) = centroid(points);
    points
        .iter()
        .map(|(x, y)| (cx + (x - cx) * factor, cy + (y - cy) * factor))
        .collect()
}

/// Order points around their centroid so they form a simple polygon.
fn sort_around_centroid(mut points: Vec<(f32, f32)>) -> Vec<(f32, f32)> {
    let (cx, cy) = centroid(&points);
    points.sort_by(|a, b| {
        let ta = (a.1 - cy).atan2(a.0 - cx);
        let tb = (b.1 - cy).atan2(b.0 - cx);
        ta.total_cmp(&tb)
    });
    points
}

/// Turn decoder anchor points into a clamped rectangle and, for 2-D
/// symbols, a polygon. `None` when the symbol cannot be located.
fn locate(symbol: DecodedSymbol, width: u32, height: u32) -> Option<BarcodeDetection> {
    let barcode_type = BarcodeType::from_label(&symbol.format_label);
    let points: Vec<(f32, f32)> = symbol
        .points
        .iter()
        .copied()
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect();
    if points.is_empty() {
        debug!(barcode_type = %barcode_type, "Decoded symbol reported no location");
        return None;
    }

    let (rect, polygon) = if points.len() < 3 {
        let x1 = points.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
        let x2 = points.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
        let y1 = points.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
        let y2 = points.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);
        let margin = ((x2 - x1) / 4.0).max(1.0);
        let rect = Rectangle::from_corners_clamped(x1, y1 - margin, x2, y2 + margin, width, height)?;
        (rect, None)
    } else {
        let outline = if barcode_type == BarcodeType::Pdf417 {
            scale_about_centroid(&sort_around_centroid(points), 1.1)
        } else if barcode_type == BarcodeType::QrCode || points.len() == 3 {
            // Finder centres: bottom-left, top-left, top-right.
            let (bl, tl, tr) = (points[0], points[1], points[2]);
            let br = (bl.0 + tr.0 - tl.0, bl.1 + tr.1 - tl.1);
            scale_about_centroid(&[tl, tr, br, bl], 1.5)
        } else {
            scale_about_centroid(&sort_around_centroid(points), 1.5)
        };

        let polygon = clamp_polygon(&outline, width, height);
        let x1 = outline.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
        let x2 = outline.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
        let y1 = outline.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
        let y2 = outline.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);
        let rect = Rectangle::from_corners_clamped(x1, y1, x2, y2, width, height)?;
        (rect, polygon)
    };

    Some(BarcodeDetection {
        rect,
        confidence: 1.0,
        barcode_type,
        data_hash: symbol.payload_hash,
        data_length: symbol.payload_len,
        polygon,
    })
}

/// Round, clamp into the image and drop repeated vertices. `None` if fewer
/// than three distinct vertices remain.
fn clamp_polygon(points: &[(f32, f32)], width: u32, height: u32) -> Option<Vec<(i32, i32)>> {
    let max_x = width.saturating_sub(1) as f32;
    let max_y = height.saturating_sub(1) as f32;
    let mut out: Vec<(i32, i32)> = Vec::with_capacity(points.len());
    for (x, y) in points {
        let p = (x.round().clamp(0.0, max_x) as i32, y.round().clamp(0.0, max_y) as i32);
        if out.last() != Some(&p) {
            out.push(p);
        }
    }
    while out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    (out.len() >= 3).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    struct Fixed(Vec<DecodedSymbol>);

    impl SymbolDecoder for Fixed {
        fn decode(&self, _luma: &GrayImage) -> Result<Vec<DecodedSymbol>> {
            Ok(self.0.clone())
        }
    }

    fn qr_symbol() -> DecodedSymbol {
        DecodedSymbol::from_payload(
            "QR_CODE",
            b"DL:D1234567 DOB:1970-01-01",
            vec![(20.0, 80.0), (20.0, 20.0), (80.0, 20.0)],
        )
    }

    #[test]
    fn labels_map_to_types() {
        assert_eq!(BarcodeType::from_label("QR_CODE"), BarcodeType::QrCode);
        assert_eq!(BarcodeType::from_label("pdf_417"), BarcodeType::Pdf417);
        assert_eq!(BarcodeType::from_label("ITF"), BarcodeType::I25);
        assert_eq!(BarcodeType::from_label("RSS_EXPANDED"), BarcodeType::DataBarExpanded);
        assert_eq!(BarcodeType::from_label("DATABAR-EXP"), BarcodeType::DataBarExpanded);
        assert_eq!(BarcodeType::from_label("AZTEC"), BarcodeType::Unknown);
        assert_eq!(BarcodeType::from_label(""), BarcodeType::Unknown);
        assert_eq!(BarcodeType::DataBarExpanded.as_str(), "DATABAR-EXP");
    }

    #[test]
    fn high_risk_set() {
        assert!(BarcodeType::Pdf417.is_high_risk());
        assert!(BarcodeType::QrCode.is_high_risk());
        assert!(BarcodeType::Code128.is_high_risk());
        assert!(!BarcodeType::Ean13.is_high_risk());
        assert!(!BarcodeType::Unknown.is_high_risk());
    }

    #[test]
    fn payload_never_leaves_the_decoder() {
        let symbol = qr_symbol();
        assert_eq!(symbol.payload_hash.len(), 16);
        assert_eq!(symbol.payload_len, 26);

        let detector = BarcodeDetector::with_decoder(Box::new(Fixed(vec![symbol])));
        let image = DynamicImage::new_rgb8(100, 100);
        let result = detector.detect(&image).unwrap();
        let d = &result.detections[0];

        let everything = format!(
            "{} {} {} {:?}",
            serde_json::to_string(&result).unwrap(),
            result.to_audit(),
            d.to_summary(),
            d.to_region()
        );
        assert!(!everything.contains("D1234567"));
        assert!(!d.to_summary().to_string().contains(&d.data_hash));
        assert_eq!(d.confidence, 1.0);
    }

    #[test]
    fn qr_parallelogram_is_completed_and_grown() {
        let d = locate(qr_symbol(), 100, 100).unwrap();
        // Centres span 60 px; grown 1.5x about (50, 50) -> 5..95.
        assert_eq!(d.rect, Rectangle::new(5, 5, 90, 90));
        let polygon = d.polygon.unwrap();
        assert_eq!(polygon.len(), 4);
        assert!(polygon.contains(&(95, 95)));
    }

    #[test]
    fn linear_symbol_gets_vertical_margin() {
        let symbol = DecodedSymbol::from_payload("CODE_39", b"12345", vec![(10.0, 50.0), (90.0, 50.0)]);
        let d = locate(symbol, 200, 200).unwrap();
        assert_eq!(d.barcode_type, BarcodeType::Code39);
        assert!(d.polygon.is_none());
        assert_eq!(d.rect, Rectangle::new(10, 30, 80, 40));
    }

    #[test]
    fn symbols_without_points_are_dropped() {
        let symbol = DecodedSymbol::from_payload("QR_CODE", b"x", Vec::new());
        assert!(locate(symbol, 50, 50).is_none());
    }

    #[test]
    fn audit_lists_unique_types_in_order() {
        let detector = BarcodeDetector::with_decoder(Box::new(Fixed(vec![
            DecodedSymbol::from_payload("CODE_128", b"a", vec![(1.0, 5.0), (30.0, 5.0)]),
            qr_symbol(),
            DecodedSymbol::from_payload("CODE_128", b"b", vec![(1.0, 60.0), (30.0, 60.0)]),
        ])));
        let result = detector.detect(&DynamicImage::new_rgb8(100, 100)).unwrap();
        assert_eq!(result.barcodes_detected, 3);
        assert_eq!(
            result.to_audit()["barcode_types"],
            serde_json::json!(["CODE128", "QRCODE"])
        );
    }

    #[test]
    fn grayscale_conversions() {
        let bilevel = DynamicImage::ImageLuma8(GrayImage::from_fn(2, 1, |x, _| Luma([x as u8])));
        let g = to_decoder_gray(&bilevel);
        assert_eq!(g.as_raw(), &vec![0, 255]);

        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(1, 1, Luma([128])));
        assert_eq!(to_decoder_gray(&gray).as_raw(), &vec![128]);

        let colour = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([30, 60, 90])));
        assert_eq!(to_decoder_gray(&colour).as_raw(), &vec![60]);
    }

    #[test]
    fn blank_image_decodes_nothing() {
        let detector = BarcodeDetector::new();
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([255, 255, 255])));
        let result = detector.detect(&image).unwrap();
        assert_eq!(result.barcodes_detected, 0);
    }
}
