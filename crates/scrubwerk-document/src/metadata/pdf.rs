// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF — delete the trailer Info dictionary and the catalog's XMP stream,
// prune the orphans and save.

use lopdf::{Dictionary, Document, Object};
use scrubwerk_core::MetadataField;
use scrubwerk_core::error::{Result, ScrubError};
use tracing::{debug, warn};

use super::Stripped;
use super::xmp::xmp_fields;

/// Info dictionary keys that identify a person, tool or moment.
const SENSITIVE_INFO_KEYS: &[&str] = &[
    "author",
    "creator",
    "producer",
    "title",
    "subject",
    "keywords",
    "creationdate",
    "moddate",
];

/// Strip document-level metadata. Never fails: a file lopdf cannot load
/// comes back unchanged with a `PDF:Warning` field.
pub fn strip(data: &[u8]) -> Stripped {
    let mut doc = match Document::load_mem(data) {
        Ok(doc) => doc,
        Err(err) => {
            warn!(%err, "PDF could not be parsed, passing original through");
            return Stripped::passthrough(data, format!("PDF could not be parsed, metadata not stripped: {}", err))
                .with_field(MetadataField::new("PDF", "Warning", false));
        }
    };

    match strip_document(&mut doc) {
        Ok(stripped) => stripped,
        Err(err) => {
            warn!(%err, "PDF metadata removal failed, passing original through");
            Stripped::passthrough(data, format!("PDF metadata not stripped: {}", err))
                .with_field(MetadataField::new("PDF", "Warning", false))
        }
    }
}

fn strip_document(doc: &mut Document) -> Result<Stripped> {
    let mut fields = info_fields(doc);
    let mut warnings = Vec::new();

    if let Some(Object::Reference(id)) = doc.trailer.remove(b"Info") {
        doc.delete_object(id);
    }

    if let Some(metadata) = catalog_metadata(doc)? {
        fields.push(MetadataField::new("PDF", "RootMetadata", true));
        if let Object::Reference(id) = metadata {
            match metadata_packet(doc, id).and_then(|packet| xmp_fields(&packet)) {
                Ok(xmp) => fields.extend(xmp),
                Err(err) => warnings.push(format!("XMP metadata removed without enumeration: {}", err)),
            }
            doc.delete_object(id);
        }
    }

    let pruned = doc.prune_objects();
    debug!(pruned = pruned.len(), "Pruned unreferenced PDF objects");

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|err| ScrubError::PdfError(format!("failed to save stripped PDF: {}", err)))?;

    Ok(Stripped {
        bytes,
        fields,
        warnings,
    })
}

/// `PDF:Info:<key>` for every key in the trailer Info dictionary.
fn info_fields(doc: &Document) -> Vec<MetadataField> {
    let info: Option<&Dictionary> = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => doc.get_dictionary(*id).ok(),
        Ok(Object::Dictionary(dict)) => Some(dict),
        _ => None,
    };
    let Some(info) = info else {
        return Vec::new();
    };

    info.iter()
        .map(|(key, _)| {
            let key = String::from_utf8_lossy(key);
            let sensitive = SENSITIVE_INFO_KEYS.contains(&key.to_lowercase().as_str());
            MetadataField::new("PDF", format!("Info:{}", key), sensitive)
        })
        .collect()
}

/// Remove `/Metadata` from the catalog, returning what it pointed at.
fn catalog_metadata(doc: &mut Document) -> Result<Option<Object>> {
    let catalog = doc
        .catalog_mut()
        .map_err(|err| ScrubError::PdfError(format!("document has no catalog: {}", err)))?;
    Ok(catalog.remove(b"Metadata"))
}

fn metadata_packet(doc: &Document, id: lopdf::ObjectId) -> Result<Vec<u8>> {
    let stream = doc
        .get_object(id)
        .and_then(Object::as_stream)
        .map_err(|err| ScrubError::PdfError(format!("metadata is not a stream: {}", err)))?;
    // Unfiltered streams have no decompressed form.
    Ok(stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone()))
}
