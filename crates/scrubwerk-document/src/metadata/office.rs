// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Office Open XML (docx/xlsx/pptx) — rebuild the zip without custom
// properties, comments, revisions or people parts, and with emptied core and
// app property documents.
//
// Archives are attacker-controlled. Entry count, per-entry expansion ratio
// and total decompressed size are bounded before and during the copy; any
// breach returns the original bytes with a single error field.

use std::fmt;
use std::io::{Cursor, Read, Write};

use scrubwerk_core::MetadataField;
use scrubwerk_core::error::{Result, ScrubError};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{SENSITIVE_OFFICE_FIELDS, Stripped};

pub const MAX_ZIP_ENTRIES: usize = 10_000;
pub const MAX_EXTRACTION_RATIO: u64 = 100;
pub const MAX_DECOMPRESSED_SIZE: u64 = 200 * 1024 * 1024;

const CUSTOM_PROPERTIES: &str = "docProps/custom.xml";
const PROPERTY_PARTS: [&str; 2] = ["docProps/core.xml", "docProps/app.xml"];
const REMOVED_PART_MARKERS: [&str; 3] = ["comments", "revisions", "people.xml"];

/// Archive bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Limits {
    pub max_entries: usize,
    pub max_ratio: u64,
    pub max_total: u64,
}

impl Limits {
    pub const DEFAULT: Limits = Limits {
        max_entries: MAX_ZIP_ENTRIES,
        max_ratio: MAX_EXTRACTION_RATIO,
        max_total: MAX_DECOMPRESSED_SIZE,
    };

    fn ratio_exceeded(&self, size: u64, compressed: u64) -> bool {
        size > compressed.max(1).saturating_mul(self.max_ratio)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    TooManyEntries,
    ZipBombDetected,
    TooLarge,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rejection::TooManyEntries => "TooManyEntries",
            Rejection::ZipBombDetected => "ZipBombDetected",
            Rejection::TooLarge => "TooLarge",
        };
        f.write_str(name)
    }
}

enum Abort {
    Rejected(Rejection),
    Failed(ScrubError),
}

impl From<ScrubError> for Abort {
    fn from(err: ScrubError) -> Self {
        Abort::Failed(err)
    }
}

impl From<zip::result::ZipError> for Abort {
    fn from(err: zip::result::ZipError) -> Self {
        Abort::Failed(zip_error(err))
    }
}

fn zip_error(err: zip::result::ZipError) -> ScrubError {
    ScrubError::OfficeError(format!("zip container: {}", err))
}

pub fn strip(data: &[u8]) -> Result<Stripped> {
    strip_with(data, &Limits::DEFAULT)
}

pub(crate) fn strip_with(data: &[u8], limits: &Limits) -> Result<Stripped> {
    let mut archive = ZipArchive::new(Cursor::new(data)).map_err(zip_error)?;

    let outcome = match precheck(&mut archive, limits) {
        Ok(()) => copy_clean(&mut archive, limits),
        Err(abort) => Err(abort),
    };

    match outcome {
        Ok(stripped) => Ok(stripped),
        Err(Abort::Failed(err)) => Err(err),
        Err(Abort::Rejected(rejection)) => {
            warn!(%rejection, entries = archive.len(), "Office archive rejected");
            Ok(Stripped::passthrough(
                data,
                format!("Office archive rejected ({}), metadata not stripped", rejection),
            )
            .with_field(MetadataField::new("Office", format!("Error:{}", rejection), false)))
        }
    }
}

/// Declared sizes only; nothing is decompressed.
fn precheck(archive: &mut ZipArchive<Cursor<&[u8]>>, limits: &Limits) -> std::result::Result<(), Abort> {
    if archive.len() > limits.max_entries {
        return Err(Abort::Rejected(Rejection::TooManyEntries));
    }
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        if limits.ratio_exceeded(entry.size(), entry.compressed_size()) {
            debug!(index, "Declared expansion ratio over limit");
            return Err(Abort::Rejected(Rejection::ZipBombDetected));
        }
    }
    Ok(())
}

fn is_removed_part(name: &str) -> bool {
    let lower = name.to_lowercase();
    name == CUSTOM_PROPERTIES || REMOVED_PART_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn copy_clean(archive: &mut ZipArchive<Cursor<&[u8]>>, limits: &Limits) -> std::result::Result<Stripped, Abort> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut fields = Vec::new();
    let mut warnings = Vec::new();
    let mut total: u64 = 0;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_owned();

        if entry.is_dir() {
            writer.add_directory(name, options)?;
            continue;
        }
        if is_removed_part(&name) {
            fields.push(MetadataField::new("Office", format!("Removed:{}", name), true));
            continue;
        }

        // Declared sizes can lie; the reader is bounded by what is left.
        let budget = limits.max_total - total;
        let mut content = Vec::new();
        entry
            .by_ref()
            .take(budget + 1)
            .read_to_end(&mut content)
            .map_err(|err| ScrubError::OfficeError(format!("failed to read {}: {}", name, err)))?;
        let read = content.len() as u64;
        total += read;
        if total > limits.max_total {
            return Err(Abort::Rejected(Rejection::TooLarge));
        }
        if limits.ratio_exceeded(read, entry.compressed_size()) {
            return Err(Abort::Rejected(Rejection::ZipBombDetected));
        }

        if PROPERTY_PARTS.contains(&name.as_str()) {
            match clean_properties(&content) {
                Ok((cleaned, removed)) => {
                    fields.extend(removed);
                    content = cleaned;
                }
                Err(err) => {
                    warn!(%err, "Property part could not be parsed, dropping it");
                    fields.push(MetadataField::new("Office", format!("Removed:{}", name), true));
                    warnings.push(format!("{} dropped: {}", name, err));
                    continue;
                }
            }
        }

        writer.start_file(name.as_str(), options)?;
        writer
            .write_all(&content)
            .map_err(|err| ScrubError::OfficeError(format!("failed to write {}: {}", name, err)))?;
    }

    let bytes = writer.finish()?.into_inner();
    debug!(total_decompressed = total, removed = fields.len(), "Office archive rebuilt");
    Ok(Stripped {
        bytes,
        fields,
        warnings,
    })
}

/// Root element with its namespace declarations and nothing else, plus one
/// field per removed child element.
fn clean_properties(xml: &[u8]) -> Result<(Vec<u8>, Vec<MetadataField>)> {
    let text = std::str::from_utf8(xml)
        .map_err(|err| ScrubError::XmlError(format!("property part is not UTF-8: {}", err)))?;
    let doc = roxmltree::Document::parse(text)
        .map_err(|err| ScrubError::XmlError(format!("property part rejected: {}", err)))?;
    let root = doc.root_element();

    let fields = root
        .children()
        .filter(|n| n.is_element())
        .map(|child| {
            let name = child.tag_name().name();
            let sensitive = SENSITIVE_OFFICE_FIELDS.contains(&name.to_lowercase().as_str());
            MetadataField::new("Office", name, sensitive)
        })
        .collect();

    let local = root.tag_name().name();
    let qualified = match root.tag_name().namespace().and_then(|ns| root.lookup_prefix(ns)) {
        Some(prefix) => format!("{}:{}", prefix, local),
        None => local.to_owned(),
    };

    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<");
    out.push_str(&qualified);
    for ns in root.namespaces() {
        match ns.name() {
            Some("xml") => continue,
            Some(prefix) => out.push_str(&format!(" xmlns:{}=\"{}\"", prefix, escape_attr(ns.uri()))),
            None => out.push_str(&format!(" xmlns=\"{}\"", escape_attr(ns.uri()))),
        }
    }
    out.push_str("/>");
    Ok((out.into_bytes(), fields))
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
}
