// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// XMP packet enumeration. Only property names are read; values are never
// copied out of the packet.

use scrubwerk_core::MetadataField;
use scrubwerk_core::error::{Result, ScrubError};

use super::{SENSITIVE_XMP_FIELDS, push_unique};

const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

pub fn is_sensitive_xmp(local_name: &str) -> bool {
    let lower = local_name.to_lowercase();
    SENSITIVE_XMP_FIELDS.contains(&lower.as_str()) || lower.starts_with("gps")
}

/// Property names under every `rdf:Description`, as `XMP:<local-name>`.
///
/// Parsed with DTDs disallowed, so a packet declaring entities is an error
/// rather than an expansion.
pub fn xmp_fields(packet: &[u8]) -> Result<Vec<MetadataField>> {
    let text = std::str::from_utf8(packet)
        .map_err(|err| ScrubError::XmlError(format!("XMP packet is not UTF-8: {}", err)))?;
    // Packet wrappers are processing instructions; roxmltree skips them.
    let doc = roxmltree::Document::parse(text.trim_end_matches('\0'))
        .map_err(|err| ScrubError::XmlError(format!("XMP packet rejected: {}", err)))?;

    let mut fields = Vec::new();
    let descriptions = doc.descendants().filter(|n| {
        n.is_element() && n.tag_name().name() == "Description" && n.tag_name().namespace() == Some(RDF_NS)
    });

    for description in descriptions {
        for attr in description.attributes() {
            if attr.namespace() == Some(RDF_NS) {
                continue;
            }
            let name = attr.name();
            push_unique(&mut fields, MetadataField::new("XMP", name, is_sensitive_xmp(name)));
        }
        for child in description.children().filter(|n| n.is_element()) {
            let name = child.tag_name().name();
            push_unique(&mut fields, MetadataField::new("XMP", name, is_sensitive_xmp(name)));
        }
    }
    Ok(fields)
}
