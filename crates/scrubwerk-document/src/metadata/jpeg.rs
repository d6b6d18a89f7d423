// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// JPEG — enumerate EXIF/XMP/IPTC/ICC/comment segments, then rebuild the file
// from decoded pixels. When the pixels cannot be decoded, a marker walk drops
// every APPn and COM segment and copies the rest verbatim.

use std::io::Cursor;

use exif::{Context, In, Tag};
use scrubwerk_core::error::{Result, ScrubError};
use scrubwerk_core::{FileType, MetadataField};
use tracing::{debug, warn};

use super::{Stripped, is_sensitive_exif, push_unique};
use crate::image::codec;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const SOS: u8 = 0xDA;
const COM: u8 = 0xFE;

const XMP_SIGNATURE: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
const XMP_EXTENDED_SIGNATURE: &[u8] = b"http://ns.adobe.com/xmp/extension/\0";
const ICC_SIGNATURE: &[u8] = b"ICC_PROFILE\0";
const PHOTOSHOP_SIGNATURE: &[u8] = b"Photoshop 3.0\0";

fn is_app(marker: u8) -> bool {
    (0xE0..=0xEF).contains(&marker)
}

/// Markers that stand alone without a length field.
fn is_standalone(marker: u8) -> bool {
    matches!(marker, 0x01 | 0xD0..=0xD9)
}

pub fn strip(data: &[u8], preserve_color_profile: bool) -> Result<Stripped> {
    match reencode(data, preserve_color_profile) {
        Ok(stripped) => Ok(stripped),
        Err(err) => {
            warn!(%err, "JPEG re-encode failed, falling back to marker walk");
            strip_markers(data, preserve_color_profile)
        }
    }
}

// ---------------------------------------------------------------------------
// Codec path
// ---------------------------------------------------------------------------

fn reencode(data: &[u8], preserve_color_profile: bool) -> Result<Stripped> {
    let segments = header_segments(data)?;
    let image = codec::decode(data, FileType::Jpeg)?;

    let mut fields = match exif::Reader::new().read_from_container(&mut Cursor::new(data)) {
        Ok(exif) => exif_fields(&exif, "EXIF"),
        Err(_) => Vec::new(),
    };

    let mut icc = None;
    for segment in &segments {
        match segment.marker {
            0xE1 if segment.payload.starts_with(XMP_SIGNATURE)
                || segment.payload.starts_with(XMP_EXTENDED_SIGNATURE) =>
            {
                push_unique(&mut fields, MetadataField::new("XMP", "XMPPacket", true));
            }
            0xE2 if segment.payload.starts_with(ICC_SIGNATURE) => {
                if preserve_color_profile {
                    icc = codec::jpeg_icc_profile(data);
                } else {
                    push_unique(&mut fields, MetadataField::new("ICC", "ColorProfile", false));
                }
            }
            0xED if segment.payload.starts_with(PHOTOSHOP_SIGNATURE) => {
                push_unique(&mut fields, MetadataField::new("IPTC", "PhotoshopData", true));
            }
            COM => push_unique(&mut fields, MetadataField::new("JPEG", "Comment", true)),
            _ => {}
        }
    }

    let bytes = codec::encode_jpeg(&image, codec::JPEG_QUALITY, icc)?;
    debug!(segments = segments.len(), fields = fields.len(), "JPEG re-encoded from pixels");
    Ok(Stripped::clean(bytes, fields))
}

/// One record per EXIF field, plus summary records for GPS data and for an
/// embedded thumbnail.
pub(crate) fn exif_fields(exif: &exif::Exif, category: &str) -> Vec<MetadataField> {
    let mut fields = Vec::new();
    let mut gps = false;
    let mut thumbnail = false;

    for field in exif.fields() {
        let name = field.tag.to_string();
        let sensitive = is_sensitive_exif(&name);
        fields.push(MetadataField::new(category, name, sensitive));
        gps |= field.tag.context() == Context::Gps;
        thumbnail |= field.ifd_num == In::THUMBNAIL || field.tag == Tag::JPEGInterchangeFormat;
    }

    if gps {
        fields.push(MetadataField::new(category, "GPSData", true));
    }
    if thumbnail {
        fields.push(MetadataField::new(category, "ThumbnailImage", true));
    }
    fields
}

struct Segment<'a> {
    marker: u8,
    payload: &'a [u8],
}

/// Marker segments before the first scan.
fn header_segments(data: &[u8]) -> Result<Vec<Segment<'_>>> {
    if !data.starts_with(&SOI) {
        return Err(ScrubError::malformed("JPEG", "missing SOI marker"));
    }
    let mut segments = Vec::new();
    let mut pos = 2;
    loop {
        let (marker, next) = marker_at(data, pos)?;
        if marker == 0xD9 {
            break;
        }
        if is_standalone(marker) {
            pos = next;
            continue;
        }
        let end = segment_end(data, next)?;
        if marker == SOS {
            break;
        }
        segments.push(Segment {
            marker,
            payload: &data[next + 2..end],
        });
        pos = end;
    }
    Ok(segments)
}

/// Marker byte at `pos` (after any fill bytes) and the offset just past it.
fn marker_at(data: &[u8], mut pos: usize) -> Result<(u8, usize)> {
    if data.get(pos) != Some(&0xFF) {
        return Err(ScrubError::malformed("JPEG", format!("expected marker at offset {pos}")));
    }
    while data.get(pos + 1) == Some(&0xFF) {
        pos += 1;
    }
    let marker = *data
        .get(pos + 1)
        .ok_or_else(|| ScrubError::malformed("JPEG", "truncated marker"))?;
    Ok((marker, pos + 2))
}

/// End of the segment whose length field starts at `pos`.
fn segment_end(data: &[u8], pos: usize) -> Result<usize> {
    let len_bytes = data
        .get(pos..pos + 2)
        .ok_or_else(|| ScrubError::malformed("JPEG", format!("truncated segment length at offset {pos}")))?;
    let length = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
    if length < 2 {
        return Err(ScrubError::malformed("JPEG", format!("invalid segment length {length}")));
    }
    let end = pos + length;
    if end > data.len() {
        return Err(ScrubError::malformed(
            "JPEG",
            format!("segment of {length} bytes overruns the file at offset {pos}"),
        ));
    }
    Ok(end)
}

// ---------------------------------------------------------------------------
// Marker-walk fallback
// ---------------------------------------------------------------------------

fn app_name(marker: u8) -> String {
    match marker {
        0xE0 => "JFIF".to_owned(),
        0xE1 => "EXIF/XMP".to_owned(),
        0xE2 => "ICC".to_owned(),
        0xED => "IPTC".to_owned(),
        COM => "Comment".to_owned(),
        other => format!("APP{}", other - 0xE0),
    }
}

/// Copy SOI, every non-APP/non-COM segment and the entropy-coded data;
/// drop APPn and COM segments by their declared length.
pub fn strip_markers(data: &[u8], preserve_color_profile: bool) -> Result<Stripped> {
    if !data.starts_with(&SOI) {
        return Err(ScrubError::malformed("JPEG", "missing SOI marker"));
    }
    let mut out = Vec::with_capacity(data.len());
    out.extend_from_slice(&SOI);
    let mut fields = Vec::new();
    let mut pos = 2;

    loop {
        let (marker, next) = marker_at(data, pos)?;
        if marker == 0xD9 {
            out.extend_from_slice(&EOI);
            break;
        }
        if is_standalone(marker) {
            out.extend_from_slice(&[0xFF, marker]);
            pos = next;
            continue;
        }

        let end = segment_end(data, next)?;
        if is_app(marker) || marker == COM {
            let payload = &data[next + 2..end];
            if preserve_color_profile && marker == 0xE2 && payload.starts_with(ICC_SIGNATURE) {
                out.extend_from_slice(&data[pos..end]);
            } else {
                let sensitive = matches!(marker, 0xE1 | 0xED | COM);
                fields.push(MetadataField::new("JPEG", app_name(marker), sensitive));
            }
            pos = end;
            continue;
        }

        out.extend_from_slice(&data[pos..end]);
        pos = end;
        if marker == SOS {
            pos = copy_entropy_data(data, pos, &mut out)?;
        }
    }

    Ok(Stripped::clean(out, fields))
}

/// Copy scan data up to the next real marker. Stuffed `FF 00` and restart
/// markers belong to the scan.
fn copy_entropy_data(data: &[u8], start: usize, out: &mut Vec<u8>) -> Result<usize> {
    let mut pos = start;
    while pos + 1 < data.len() {
        if data[pos] == 0xFF {
            let next = data[pos + 1];
            if next != 0x00 && !(0xD0..=0xD7).contains(&next) && next != 0xFF {
                out.extend_from_slice(&data[start..pos]);
                return Ok(pos);
            }
        }
        pos += 1;
    }
    Err(ScrubError::malformed("JPEG", "scan data runs past end of file"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use exif::experimental::Writer;
    use exif::{Field, Value};
    use image::{DynamicImage, Rgb, RgbImage};

    fn photo(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 8) as u8, (y * 8) as u8, 200])
        }));
        codec::encode(&img, FileType::Jpeg).unwrap()
    }

    /// Raw TIFF-structured EXIF with camera make, a GPS latitude reference
    /// and a JPEG thumbnail in IFD1.
    fn exif_blob(thumbnail: &[u8]) -> Vec<u8> {
        let make = Field {
            tag: Tag::Make,
            ifd_num: In::PRIMARY,
            value: Value::Ascii(vec![b"ExampleCam".to_vec()]),
        };
        let lat_ref = Field {
            tag: Tag::GPSLatitudeRef,
            ifd_num: In::PRIMARY,
            value: Value::Ascii(vec![b"N".to_vec()]),
        };
        let mut writer = Writer::new();
        writer.push_field(&make);
        writer.push_field(&lat_ref);
        writer.set_jpeg(thumbnail, In::THUMBNAIL);
        let mut buf = Cursor::new(Vec::new());
        writer.write(&mut buf, false).unwrap();
        buf.into_inner()
    }

    fn segment(marker: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, marker];
        out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    /// Insert `segments` straight after SOI.
    pub(crate) fn with_segments(jpeg: &[u8], segments: &[Vec<u8>]) -> Vec<u8> {
        let mut out = jpeg[..2].to_vec();
        for s in segments {
            out.extend_from_slice(s);
        }
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    /// A photo carrying EXIF (make, GPS, thumbnail), XMP and a comment.
    pub(crate) fn tagged_photo() -> Vec<u8> {
        let mut app1 = b"Exif\0\0".to_vec();
        app1.extend(exif_blob(&photo(8, 8)));
        let mut xmp = XMP_SIGNATURE.to_vec();
        xmp.extend_from_slice(b"<x:xmpmeta xmlns:x='adobe:ns:meta/'/>");
        with_segments(
            &photo(32, 24),
            &[segment(0xE1, &app1), segment(0xE1, &xmp), segment(COM, b"patient: J. Doe")],
        )
    }

    #[test]
    fn gps_and_thumbnail_are_flagged_and_removed() {
        let stripped = strip(&tagged_photo(), false).unwrap();
        let names: Vec<(&str, &str)> = stripped
            .fields
            .iter()
            .map(|f| (f.category.as_str(), f.name.as_str()))
            .collect();
        assert!(names.contains(&("EXIF", "Make")));
        assert!(names.contains(&("EXIF", "GPSData")));
        assert!(names.contains(&("EXIF", "ThumbnailImage")));
        assert!(names.contains(&("XMP", "XMPPacket")));
        assert!(names.contains(&("JPEG", "Comment")));

        let reparsed = exif::Reader::new().read_from_container(&mut Cursor::new(&stripped.bytes));
        match reparsed {
            Err(_) => {}
            Ok(exif) => assert!(exif.fields().all(|f| f.tag.context() != Context::Gps)),
        }
        let decoded = codec::decode(&stripped.bytes, FileType::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn header_scan_stops_at_scan_data() {
        let photo = tagged_photo();
        let segments = header_segments(&photo).unwrap();
        assert!(segments.iter().any(|s| s.marker == COM));
        assert!(segments.iter().all(|s| s.marker != SOS));
    }

    #[test]
    fn undecodable_jpeg_uses_marker_walk() {
        // Structurally valid, but no frame header: the decoder gives up.
        let mut data = SOI.to_vec();
        data.extend(segment(0xE0, b"JFIF\0\x01\x01\0\0\x01\0\x01\0\0"));
        data.extend(segment(0xE1, b"Exif\0\0MM\0*"));
        data.extend(segment(0xED, PHOTOSHOP_SIGNATURE));
        data.extend(segment(0xDB, &[0u8; 65]));
        data.extend(segment(SOS, &[1, 1, 0, 0, 0x3F, 0]));
        data.extend_from_slice(&[0x12, 0xFF, 0x00, 0x34, 0xFF, 0xD0, 0x56]);
        data.extend_from_slice(&EOI);

        let stripped = strip(&data, false).unwrap();
        let names: Vec<&str> = stripped.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["JFIF", "EXIF/XMP", "IPTC"]);
        assert!(!stripped.fields[0].is_sensitive);
        assert!(stripped.fields[1].is_sensitive);

        let mut expected = SOI.to_vec();
        expected.extend(segment(0xDB, &[0u8; 65]));
        expected.extend(segment(SOS, &[1, 1, 0, 0, 0x3F, 0]));
        expected.extend_from_slice(&[0x12, 0xFF, 0x00, 0x34, 0xFF, 0xD0, 0x56]);
        expected.extend_from_slice(&EOI);
        assert_eq!(stripped.bytes, expected);
    }

    #[test]
    fn truncated_marker_structure_is_an_error() {
        let mut data = SOI.to_vec();
        data.extend_from_slice(&[0xFF, 0xE1, 0x40, 0x00, b'E', b'x']);
        assert!(strip(&data, false).is_err());
        assert!(strip_markers(&data, false).is_err());
    }

    #[test]
    fn marker_walk_can_keep_icc() {
        let mut icc = ICC_SIGNATURE.to_vec();
        icc.extend_from_slice(&[1, 1, 0, 0]);
        let mut data = SOI.to_vec();
        data.extend(segment(0xE2, &icc));
        data.extend(segment(COM, b"note"));
        data.extend_from_slice(&EOI);

        let kept = strip_markers(&data, true).unwrap();
        assert!(kept.bytes.windows(ICC_SIGNATURE.len()).any(|w| w == ICC_SIGNATURE));
        assert_eq!(kept.fields.len(), 1);

        let dropped = strip_markers(&data, false).unwrap();
        assert_eq!(dropped.bytes, [SOI, EOI].concat());
        assert_eq!(dropped.fields.len(), 2);
    }
}
