// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raster codec helpers — decode by detected container type and re-encode in
// the same container, carrying pixels only.

use std::io::Cursor;

use image::codecs::jpeg::{JpegDecoder, JpegEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageDecoder, ImageEncoder, ImageFormat};
use scrubwerk_core::FileType;
use scrubwerk_core::error::{Result, ScrubError};

/// Quality used whenever JPEG pixels are re-encoded.
pub const JPEG_QUALITY: u8 = 95;

/// Codec format for a container type, if it is a raster image.
pub fn image_format(file_type: FileType) -> Option<ImageFormat> {
    match file_type {
        FileType::Jpeg => Some(ImageFormat::Jpeg),
        FileType::Png => Some(ImageFormat::Png),
        FileType::Tiff => Some(ImageFormat::Tiff),
        FileType::Webp => Some(ImageFormat::WebP),
        FileType::Gif => Some(ImageFormat::Gif),
        FileType::Bmp => Some(ImageFormat::Bmp),
        _ => None,
    }
}

/// Decode `data` as the given container type. Multi-page containers yield
/// their first page.
pub fn decode(data: &[u8], file_type: FileType) -> Result<DynamicImage> {
    let format = image_format(file_type)
        .ok_or_else(|| ScrubError::UnsupportedFormat(file_type.as_str().to_owned()))?;
    image::load_from_memory_with_format(data, format).map_err(|err| {
        ScrubError::ImageError(format!("failed to decode {}: {}", file_type, err))
    })
}

/// Re-encode `image` into the given container type.
///
/// JPEG uses quality 95, WebP is lossless. Nothing besides pixel data is
/// written.
pub fn encode(image: &DynamicImage, file_type: FileType) -> Result<Vec<u8>> {
    match file_type {
        FileType::Jpeg => encode_jpeg(image, JPEG_QUALITY, None),
        FileType::Webp => encode_webp(image, None),
        FileType::Png | FileType::Tiff => encode_to_format(image, file_type, true),
        FileType::Bmp | FileType::Gif => encode_to_format(image, file_type, false),
        other => Err(ScrubError::UnsupportedFormat(other.as_str().to_owned())),
    }
}

/// JPEG encode, optionally embedding an ICC profile.
pub fn encode_jpeg(image: &DynamicImage, quality: u8, icc_profile: Option<Vec<u8>>) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    if let Some(icc) = icc_profile {
        encoder
            .set_icc_profile(icc)
            .map_err(|err| ScrubError::ImageError(format!("JPEG ICC embedding failed: {}", err)))?;
    }
    // JPEG carries neither alpha nor 16-bit samples.
    let pixels = match image {
        DynamicImage::ImageLuma8(_) => image.clone(),
        DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA16(_) => {
            DynamicImage::ImageLuma8(image.to_luma8())
        }
        _ => DynamicImage::ImageRgb8(image.to_rgb8()),
    };
    pixels
        .write_with_encoder(encoder)
        .map_err(|err| ScrubError::ImageError(format!("JPEG encoding failed: {}", err)))?;
    Ok(buffer)
}

/// Lossless WebP encode, optionally embedding an ICC profile.
pub fn encode_webp(image: &DynamicImage, icc_profile: Option<Vec<u8>>) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = WebPEncoder::new_lossless(&mut buffer);
    if let Some(icc) = icc_profile {
        encoder
            .set_icc_profile(icc)
            .map_err(|err| ScrubError::ImageError(format!("WebP ICC embedding failed: {}", err)))?;
    }
    to_8bit(image)
        .write_with_encoder(encoder)
        .map_err(|err| ScrubError::ImageError(format!("WebP encoding failed: {}", err)))?;
    Ok(buffer)
}

/// ICC profile embedded in a JPEG, if any.
pub fn jpeg_icc_profile(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoder = JpegDecoder::new(Cursor::new(data)).ok()?;
    decoder.icc_profile().ok().flatten()
}

fn encode_to_format(image: &DynamicImage, file_type: FileType, keep_16bit: bool) -> Result<Vec<u8>> {
    let format = image_format(file_type)
        .ok_or_else(|| ScrubError::UnsupportedFormat(file_type.as_str().to_owned()))?;
    let pixels = match image {
        DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_)
        | DynamicImage::ImageRgb16(_)
        | DynamicImage::ImageRgba16(_)
            if keep_16bit =>
        {
            image.clone()
        }
        _ => to_8bit(image),
    };

    let mut buffer = Vec::new();
    let mut cursor = Cursor::new(&mut buffer);
    pixels
        .write_to(&mut cursor, format)
        .map_err(|err| ScrubError::ImageError(format!("{} encoding failed: {}", file_type, err)))?;
    Ok(buffer)
}

/// Same channels, 8 bits per sample.
fn to_8bit(image: &DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_) => image.clone(),
        DynamicImage::ImageLuma16(_) => DynamicImage::ImageLuma8(image.to_luma8()),
        DynamicImage::ImageLumaA16(_) => DynamicImage::ImageLumaA8(image.to_luma_alpha8()),
        DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgb32F(_) => {
            DynamicImage::ImageRgb8(image.to_rgb8())
        }
        _ => DynamicImage::ImageRgba8(image.to_rgba8()),
    }
}
