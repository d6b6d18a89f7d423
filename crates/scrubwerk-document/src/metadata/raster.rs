// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// TIFF, WebP, GIF and BMP — enumerate what the container carries, then
// re-encode the pixels.

use std::io::Cursor;

use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::AnimationDecoder;
use scrubwerk_core::error::{Result, ScrubError};
use scrubwerk_core::{FileType, MetadataField};
use tiff::ColorType as TiffColor;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{TiffEncoder, colortype};
use tracing::{debug, warn};

use super::jpeg::exif_fields;
use super::{Stripped, push_unique};
use crate::image::codec;

// ---------------------------------------------------------------------------
// TIFF
// ---------------------------------------------------------------------------

/// Record every IFD tag, then write each page back with baseline tags only.
pub fn strip_tiff(data: &[u8]) -> Result<Stripped> {
    let fields = match exif::Reader::new().read_raw(data.to_vec()) {
        Ok(exif) => exif_fields(&exif, "TIFF"),
        Err(err) => {
            debug!(%err, "TIFF directory not enumerable");
            Vec::new()
        }
    };
    let bytes = match reencode_tiff_pages(data) {
        Ok(bytes) => bytes,
        Err(ScrubError::UnsupportedFormat(layout)) => {
            let pages = tiff_page_count(data)?;
            if pages > 1 {
                return Err(ScrubError::UnsupportedFormat(format!("{pages}-page TIFF with {layout} samples")));
            }
            debug!(%layout, "TIFF samples converted through the codec");
            let image = codec::decode(data, FileType::Tiff)?;
            codec::encode(&image, FileType::Tiff)?
        }
        Err(err) => return Err(err),
    };
    Ok(Stripped::clean(bytes, fields))
}

fn tiff_error(err: tiff::TiffError) -> ScrubError {
    ScrubError::ImageError(format!("TIFF: {err}"))
}

/// Number of images chained in the IFD list.
pub fn tiff_page_count(data: &[u8]) -> Result<usize> {
    let mut decoder = Decoder::new(Cursor::new(data)).map_err(tiff_error)?;
    let mut pages = 1;
    while decoder.more_images() {
        decoder.next_image().map_err(tiff_error)?;
        pages += 1;
    }
    Ok(pages)
}

type PageWriter<'a> = TiffEncoder<&'a mut Cursor<Vec<u8>>>;

fn reencode_tiff_pages(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = Decoder::new(Cursor::new(data)).map_err(tiff_error)?;
    let mut out = Cursor::new(Vec::new());
    let mut pages = 0usize;
    {
        let mut encoder = TiffEncoder::new(&mut out).map_err(tiff_error)?;
        loop {
            let (width, height) = decoder.dimensions().map_err(tiff_error)?;
            let color = decoder.colortype().map_err(tiff_error)?;
            let samples = decoder.read_image().map_err(tiff_error)?;
            write_tiff_page(&mut encoder, width, height, color, samples)?;
            pages += 1;
            if !decoder.more_images() {
                break;
            }
            decoder.next_image().map_err(tiff_error)?;
        }
    }
    debug!(pages, "TIFF pages re-encoded");
    Ok(out.into_inner())
}

/// Write decoded samples back unchanged. Layouts the encoder cannot
/// reproduce sample-for-sample are `UnsupportedFormat`.
fn write_tiff_page(
    encoder: &mut PageWriter<'_>,
    width: u32,
    height: u32,
    color: TiffColor,
    samples: DecodingResult,
) -> Result<()> {
    let written = match (color, samples) {
        (TiffColor::Gray(8), DecodingResult::U8(s)) => encoder.write_image::<colortype::Gray8>(width, height, &s),
        (TiffColor::Gray(16), DecodingResult::U16(s)) => encoder.write_image::<colortype::Gray16>(width, height, &s),
        (TiffColor::RGB(8), DecodingResult::U8(s)) => encoder.write_image::<colortype::RGB8>(width, height, &s),
        (TiffColor::RGB(16), DecodingResult::U16(s)) => encoder.write_image::<colortype::RGB16>(width, height, &s),
        (TiffColor::RGBA(8), DecodingResult::U8(s)) => encoder.write_image::<colortype::RGBA8>(width, height, &s),
        (TiffColor::RGBA(16), DecodingResult::U16(s)) => encoder.write_image::<colortype::RGBA16>(width, height, &s),
        (TiffColor::CMYK(8), DecodingResult::U8(s)) => encoder.write_image::<colortype::CMYK8>(width, height, &s),
        (other, _) => return Err(ScrubError::UnsupportedFormat(format!("{other:?}"))),
    };
    written.map_err(tiff_error)
}

/// Frames (or pages) a raster container holds. Still-image formats report one.
pub fn frame_count(data: &[u8], file_type: FileType) -> Result<usize> {
    match file_type {
        FileType::Tiff => tiff_page_count(data),
        FileType::Gif => Ok(scan_gif(data)?.images),
        FileType::Webp => {
            let frames = riff_chunks(data)?.iter().filter(|c| c.is(b"ANMF")).count();
            Ok(frames.max(1))
        }
        _ => Ok(1),
    }
}

// ---------------------------------------------------------------------------
// WebP
// ---------------------------------------------------------------------------

const VP8X_ICC: u8 = 0x20;
const VP8X_EXIF: u8 = 0x08;
const VP8X_XMP: u8 = 0x04;

struct RiffChunk<'a> {
    fourcc: [u8; 4],
    payload: &'a [u8],
}

impl RiffChunk<'_> {
    fn is(&self, fourcc: &[u8; 4]) -> bool {
        &self.fourcc == fourcc
    }
}

fn riff_chunks(data: &[u8]) -> Result<Vec<RiffChunk<'_>>> {
    if data.len() < 12 || !data.starts_with(b"RIFF") || &data[8..12] != b"WEBP" {
        return Err(ScrubError::malformed("WebP", "missing RIFF/WEBP header"));
    }
    let mut chunks = Vec::new();
    let mut pos = 12;
    while pos < data.len() {
        let header = data
            .get(pos..pos + 8)
            .ok_or_else(|| ScrubError::malformed("WebP", format!("truncated chunk header at offset {pos}")))?;
        let fourcc = [header[0], header[1], header[2], header[3]];
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let start = pos + 8;
        let payload = data.get(start..start + size).ok_or_else(|| {
            ScrubError::malformed("WebP", format!("chunk of {size} bytes overruns the file at offset {pos}"))
        })?;
        chunks.push(RiffChunk { fourcc, payload });
        // Chunks are padded to an even length.
        pos = start + size + (size & 1);
    }
    Ok(chunks)
}

/// Fields for the metadata chunks, and the ICC payload when it is kept.
fn webp_fields<'a>(chunks: &[RiffChunk<'a>], preserve_color_profile: bool) -> (Vec<MetadataField>, Option<&'a [u8]>) {
    let mut fields = Vec::new();
    let mut icc = None;
    for chunk in chunks {
        if chunk.is(b"EXIF") {
            let raw = chunk.payload.strip_prefix(b"Exif\0\0").unwrap_or(chunk.payload);
            match exif::Reader::new().read_raw(raw.to_vec()) {
                Ok(exif) => fields.extend(exif_fields(&exif, "EXIF")),
                Err(_) => fields.push(MetadataField::new("WebP", "EXIF", true)),
            }
        } else if chunk.is(b"XMP ") {
            push_unique(&mut fields, MetadataField::new("XMP", "XMPPacket", true));
        } else if chunk.is(b"ICCP") {
            if preserve_color_profile {
                icc = Some(chunk.payload);
            } else {
                push_unique(&mut fields, MetadataField::new("ICC", "ColorProfile", false));
            }
        }
    }
    (fields, icc)
}

pub fn strip_webp(data: &[u8], preserve_color_profile: bool) -> Result<Stripped> {
    let chunks = riff_chunks(data)?;
    let (fields, icc) = webp_fields(&chunks, preserve_color_profile);

    // The codec only yields the first frame of an animation.
    if chunks.iter().any(|c| c.is(b"ANIM")) {
        debug!("Animated WebP, stripping at chunk level");
        return strip_webp_chunks(data, preserve_color_profile);
    }

    let reencoded = codec::decode(data, FileType::Webp)
        .and_then(|image| codec::encode_webp(&image, icc.map(<[u8]>::to_vec)));
    match reencoded {
        Ok(bytes) => Ok(Stripped::clean(bytes, fields)),
        Err(err) => {
            warn!(%err, "WebP re-encode failed, stripping at chunk level");
            strip_webp_chunks(data, preserve_color_profile)
        }
    }
}

/// Drop EXIF, XMP and (unless kept) ICCP chunks, clear the matching VP8X
/// flags and rewrite the RIFF size. Image chunks are copied verbatim.
pub fn strip_webp_chunks(data: &[u8], preserve_color_profile: bool) -> Result<Stripped> {
    let chunks = riff_chunks(data)?;
    let (fields, _) = webp_fields(&chunks, preserve_color_profile);

    let mut clear = VP8X_EXIF | VP8X_XMP;
    if !preserve_color_profile {
        clear |= VP8X_ICC;
    }

    let mut out = Vec::with_capacity(data.len());
    out.extend_from_slice(b"RIFF\0\0\0\0WEBP");
    for chunk in &chunks {
        let dropped = chunk.is(b"EXIF") || chunk.is(b"XMP ") || (chunk.is(b"ICCP") && !preserve_color_profile);
        if dropped {
            continue;
        }
        out.extend_from_slice(&chunk.fourcc);
        out.extend_from_slice(&(chunk.payload.len() as u32).to_le_bytes());
        if chunk.is(b"VP8X") && !chunk.payload.is_empty() {
            out.push(chunk.payload[0] & !clear);
            out.extend_from_slice(&chunk.payload[1..]);
        } else {
            out.extend_from_slice(chunk.payload);
        }
        if chunk.payload.len() % 2 == 1 {
            out.push(0);
        }
    }
    let riff_size = (out.len() - 8) as u32;
    out[4..8].copy_from_slice(&riff_size.to_le_bytes());
    Ok(Stripped::clean(out, fields))
}

// ---------------------------------------------------------------------------
// GIF
// ---------------------------------------------------------------------------

/// Side-channel extensions found in a GIF block stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GifScan {
    pub images: usize,
    pub comments: usize,
    pub xmp: usize,
    pub icc: usize,
}

impl GifScan {
    fn has_text(&self) -> bool {
        self.comments > 0 || self.xmp > 0
    }
}

const GIF_TRAILER: u8 = 0x3B;
const GIF_EXTENSION: u8 = 0x21;
const GIF_IMAGE: u8 = 0x2C;
const GIF_COMMENT: u8 = 0xFE;
const GIF_APPLICATION: u8 = 0xFF;

fn color_table_len(packed: u8) -> usize {
    if packed & 0x80 == 0 {
        0
    } else {
        3 * (1 << ((packed & 0x07) + 1))
    }
}

/// Offset just past a data sub-block sequence starting at `pos`.
fn skip_sub_blocks(data: &[u8], mut pos: usize) -> Result<usize> {
    loop {
        let len = *data
            .get(pos)
            .ok_or_else(|| ScrubError::malformed("GIF", "sub-block runs past end of file"))? as usize;
        pos += 1;
        if len == 0 {
            return Ok(pos);
        }
        pos += len;
    }
}

/// Walk the block stream and count image descriptors along with comment,
/// XMP and ICC extensions.
pub fn scan_gif(data: &[u8]) -> Result<GifScan> {
    if !(data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a")) || data.len() < 13 {
        return Err(ScrubError::malformed("GIF", "missing header"));
    }
    let mut scan = GifScan::default();
    let mut pos = 13 + color_table_len(data[10]);

    loop {
        let introducer = *data
            .get(pos)
            .ok_or_else(|| ScrubError::malformed("GIF", "missing trailer"))?;
        match introducer {
            GIF_TRAILER => return Ok(scan),
            GIF_EXTENSION => {
                let label = *data
                    .get(pos + 1)
                    .ok_or_else(|| ScrubError::malformed("GIF", "truncated extension"))?;
                if label == GIF_COMMENT {
                    scan.comments += 1;
                } else if label == GIF_APPLICATION {
                    let id = data.get(pos + 3..pos + 14).unwrap_or_default();
                    if id == b"XMP DataXMP" {
                        scan.xmp += 1;
                    } else if id.starts_with(b"ICCRGBG1") {
                        scan.icc += 1;
                    }
                }
                pos = skip_sub_blocks(data, pos + 2)?;
            }
            GIF_IMAGE => {
                scan.images += 1;
                let packed = *data
                    .get(pos + 9)
                    .ok_or_else(|| ScrubError::malformed("GIF", "truncated image descriptor"))?;
                // Descriptor, local table, LZW minimum code size.
                pos = skip_sub_blocks(data, pos + 10 + color_table_len(packed) + 1)?;
            }
            other => {
                return Err(ScrubError::malformed(
                    "GIF",
                    format!("unexpected block introducer 0x{other:02X} at offset {pos}"),
                ));
            }
        }
    }
}

/// Re-encode every frame, looping forever, then confirm no comment or XMP
/// extension made it into the output.
pub fn strip_gif(data: &[u8]) -> Result<Stripped> {
    let found = scan_gif(data)?;

    let decoder = GifDecoder::new(Cursor::new(data))
        .map_err(|err| ScrubError::ImageError(format!("failed to decode GIF: {}", err)))?;
    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|err| ScrubError::ImageError(format!("failed to decode GIF frames: {}", err)))?;
    let frame_count = frames.len();

    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut bytes);
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|err| ScrubError::ImageError(format!("GIF encoding failed: {}", err)))?;
        encoder
            .encode_frames(frames)
            .map_err(|err| ScrubError::ImageError(format!("GIF encoding failed: {}", err)))?;
    }

    let survived = scan_gif(&bytes)?;
    if survived.has_text() {
        return Err(ScrubError::ImageError(format!(
            "GIF re-encode kept {} comment and {} XMP extensions",
            survived.comments, survived.xmp
        )));
    }

    let mut fields = Vec::new();
    if found.comments > 0 {
        fields.push(MetadataField::new("GIF", "Comment", true));
    }
    if found.xmp > 0 {
        fields.push(MetadataField::new("GIF", "XMP", true));
    }
    if found.icc > 0 {
        fields.push(MetadataField::new("ICC", "ColorProfile", false));
    }
    debug!(frames = frame_count, "GIF re-encoded");
    Ok(Stripped::clean(bytes, fields))
}

// ---------------------------------------------------------------------------
// BMP
// ---------------------------------------------------------------------------

pub fn strip_bmp(data: &[u8]) -> Result<Stripped> {
    let image = codec::decode(data, FileType::Bmp)?;
    Ok(Stripped::clean(codec::encode(&image, FileType::Bmp)?, Vec::new()))
}
