// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PNG — chunk-level copy of the critical chunks. Pixel data is never
// re-encoded.

use scrubwerk_core::MetadataField;
use scrubwerk_core::error::{Result, ScrubError};

use super::Stripped;
use super::filetype::PNG_SIGNATURE;

const CRITICAL: [&[u8; 4]; 4] = [b"IHDR", b"PLTE", b"IDAT", b"IEND"];
const COLOR_PROFILE: [&[u8; 4]; 4] = [b"iCCP", b"sRGB", b"gAMA", b"cHRM"];

/// Text, EXIF and time chunks. Other ancillary chunks are removed too but
/// are not classified sensitive.
const SENSITIVE: [&str; 5] = ["text", "itxt", "ztxt", "exif", "time"];

/// Keep IHDR, PLTE, IDAT and IEND (plus the colour chunks when asked) and
/// drop everything else.
pub fn strip(data: &[u8], preserve_color_profile: bool) -> Result<Stripped> {
    if !data.starts_with(PNG_SIGNATURE) {
        return Err(ScrubError::malformed("PNG", "missing signature"));
    }

    let mut out = Vec::with_capacity(data.len());
    out.extend_from_slice(PNG_SIGNATURE);
    let mut fields = Vec::new();
    let mut pos = PNG_SIGNATURE.len();
    let mut saw_end = false;

    while pos < data.len() {
        let (kind, end) = chunk_at(data, pos)?;
        let keep = CRITICAL.contains(&kind)
            || (preserve_color_profile && COLOR_PROFILE.contains(&kind));
        if keep {
            out.extend_from_slice(&data[pos..end]);
        } else {
            let name = String::from_utf8_lossy(kind).into_owned();
            let sensitive = SENSITIVE.contains(&name.to_lowercase().as_str());
            fields.push(MetadataField::new("PNG", name, sensitive));
        }
        pos = end;
        if kind == b"IEND" {
            saw_end = true;
            break;
        }
    }

    if !saw_end {
        return Err(ScrubError::malformed("PNG", "missing IEND chunk"));
    }
    if pos < data.len() {
        // Bytes after IEND are invisible to viewers and can hide anything.
        fields.push(MetadataField::new("PNG", "TrailingData", true));
    }
    Ok(Stripped::clean(out, fields))
}

/// Type and end offset of the chunk starting at `pos`.
fn chunk_at(data: &[u8], pos: usize) -> Result<(&[u8; 4], usize)> {
    let header = data
        .get(pos..pos + 8)
        .ok_or_else(|| ScrubError::malformed("PNG", format!("truncated chunk header at offset {pos}")))?;
    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let kind: &[u8; 4] = header[4..8]
        .try_into()
        .map_err(|_| ScrubError::malformed("PNG", "short chunk type"))?;
    let end = pos
        .checked_add(12)
        .and_then(|p| p.checked_add(length))
        .filter(|&end| end <= data.len())
        .ok_or_else(|| {
            ScrubError::malformed("PNG", format!("chunk of {length} bytes overruns the file at offset {pos}"))
        })?;
    Ok((kind, end))
}
