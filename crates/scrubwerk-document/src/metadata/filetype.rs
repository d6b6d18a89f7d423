// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Magic-byte format sniffing. Filenames and extensions are never consulted.

use std::io::Cursor;

use scrubwerk_core::FileType;
use zip::ZipArchive;

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
pub(crate) const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Offset of the `DICM` marker after the DICOM preamble.
const DICOM_MAGIC_OFFSET: usize = 128;

/// Shortest input that is classified at all.
pub const MIN_SNIFF_LEN: usize = 12;

/// Classify `data` by its leading bytes.
pub fn detect_file_type(data: &[u8]) -> FileType {
    if data.len() < MIN_SNIFF_LEN {
        return FileType::Unknown;
    }

    if data.starts_with(JPEG_MAGIC) {
        FileType::Jpeg
    } else if data.starts_with(PNG_SIGNATURE) {
        FileType::Png
    } else if data.starts_with(b"II*\0") || data.starts_with(b"MM\0*") {
        FileType::Tiff
    } else if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        FileType::Webp
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        FileType::Gif
    } else if data.starts_with(b"BM") {
        FileType::Bmp
    } else if data.starts_with(b"%PDF") {
        FileType::Pdf
    } else if data.starts_with(ZIP_MAGIC) {
        classify_zip(data)
    } else if data.len() > DICOM_MAGIC_OFFSET + 4
        && &data[DICOM_MAGIC_OFFSET..DICOM_MAGIC_OFFSET + 4] == b"DICM"
    {
        FileType::Dicom
    } else {
        FileType::Unknown
    }
}

/// Office Open XML flavour of a zip container, by its part directories.
fn classify_zip(data: &[u8]) -> FileType {
    let Ok(archive) = ZipArchive::new(Cursor::new(data)) else {
        return FileType::Unknown;
    };
    let has = |dir: &str| archive.file_names().any(|name| name.contains(dir));
    if has("word/") {
        FileType::Docx
    } else if has("xl/") {
        FileType::Xlsx
    } else if has("ppt/") {
        FileType::Pptx
    } else {
        FileType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    fn padded(prefix: &[u8]) -> Vec<u8> {
        let mut data = prefix.to_vec();
        data.resize(64, 0);
        data
    }

    fn zip_with(entries: &[&str]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for name in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(b"<x/>").unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn sniffs_raster_and_document_magic() {
        assert_eq!(detect_file_type(&padded(&[0xFF, 0xD8, 0xFF, 0xE0])), FileType::Jpeg);
        assert_eq!(detect_file_type(&padded(PNG_SIGNATURE)), FileType::Png);
        assert_eq!(detect_file_type(&padded(b"II*\0")), FileType::Tiff);
        assert_eq!(detect_file_type(&padded(b"MM\0*")), FileType::Tiff);
        assert_eq!(detect_file_type(&padded(b"RIFF\x10\0\0\0WEBPVP8L")), FileType::Webp);
        assert_eq!(detect_file_type(&padded(b"GIF89a")), FileType::Gif);
        assert_eq!(detect_file_type(&padded(b"BM")), FileType::Bmp);
        assert_eq!(detect_file_type(&padded(b"%PDF-1.7")), FileType::Pdf);
    }

    #[test]
    fn riff_without_webp_is_unknown() {
        assert_eq!(detect_file_type(&padded(b"RIFF\x10\0\0\0WAVEfmt ")), FileType::Unknown);
    }

    #[test]
    fn short_input_is_unknown() {
        assert_eq!(detect_file_type(&[0xFF, 0xD8, 0xFF]), FileType::Unknown);
        assert_eq!(detect_file_type(b""), FileType::Unknown);
    }

    #[test]
    fn dicom_needs_preamble() {
        let mut data = vec![0u8; 200];
        data[128..132].copy_from_slice(b"DICM");
        assert_eq!(detect_file_type(&data), FileType::Dicom);
        assert_eq!(detect_file_type(&data[..132]), FileType::Unknown);
    }

    #[test]
    fn office_flavour_comes_from_entries() {
        assert_eq!(detect_file_type(&zip_with(&["word/document.xml"])), FileType::Docx);
        assert_eq!(detect_file_type(&zip_with(&["xl/workbook.xml"])), FileType::Xlsx);
        assert_eq!(detect_file_type(&zip_with(&["ppt/presentation.xml"])), FileType::Pptx);
        assert_eq!(detect_file_type(&zip_with(&["notes.txt"])), FileType::Unknown);
    }

    #[test]
    fn broken_zip_is_unknown() {
        assert_eq!(detect_file_type(&padded(ZIP_MAGIC)), FileType::Unknown);
    }
}
