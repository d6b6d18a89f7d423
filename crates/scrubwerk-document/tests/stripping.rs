// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Metadata stripping through the public API, one container format at a time.

use std::io::{Cursor, Write};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lopdf::{Document, Object, Stream, dictionary};
use scrubwerk_core::FileType;
use scrubwerk_document::MetadataStripper;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn encoded(format: ImageFormat) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(24, 16, |x, y| {
        Rgb([(x * 10) as u8, (y * 15) as u8, 60])
    }));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

fn png_chunk(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = (payload.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out.extend_from_slice(&[0, 0, 0, 0]);
    out
}

/// JPEG with an APP1 EXIF segment holding make, model and a GPS tag.
fn jpeg_with_gps() -> Vec<u8> {
    use exif::experimental::Writer;
    use exif::{Field, In, Tag, Value};

    let fields = [
        Field {
            tag: Tag::Make,
            ifd_num: In::PRIMARY,
            value: Value::Ascii(vec![b"ExampleCam".to_vec()]),
        },
        Field {
            tag: Tag::Model,
            ifd_num: In::PRIMARY,
            value: Value::Ascii(vec![b"X100".to_vec()]),
        },
        Field {
            tag: Tag::GPSLatitudeRef,
            ifd_num: In::PRIMARY,
            value: Value::Ascii(vec![b"S".to_vec()]),
        },
    ];
    let mut writer = Writer::new();
    for field in &fields {
        writer.push_field(field);
    }
    let mut tiff = Cursor::new(Vec::new());
    writer.write(&mut tiff, false).unwrap();

    let mut payload = b"Exif\0\0".to_vec();
    payload.extend(tiff.into_inner());
    let mut segment = vec![0xFF, 0xE1];
    segment.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    segment.extend(payload);

    let jpeg = encoded(ImageFormat::Jpeg);
    let mut out = jpeg[..2].to_vec();
    out.extend(segment);
    out.extend_from_slice(&jpeg[2..]);
    out
}

#[test]
fn jpeg_exif_is_enumerated_then_dropped() {
    let input = jpeg_with_gps();
    assert!(contains(&input, b"ExampleCam"));

    let (out, result) = MetadataStripper::new().strip(&input, "IMG_0001.jpg");
    assert_eq!(result.file_type, FileType::Jpeg);
    assert!(result.had_gps);
    assert!(result.had_device_id);
    assert!(!result.had_thumbnail);
    assert!(result.warnings.is_empty());
    assert!(!contains(&out, b"ExampleCam"));
    assert!(!contains(&out, b"Exif\0\0"));
    assert_ne!(result.original_hash, result.stripped_hash);

    // Neither the audit record nor the field list carries tag values.
    let audit = serde_json::to_string(&result).unwrap();
    assert!(!audit.contains("ExampleCam"));
    assert!(!audit.contains("X100"));
}

#[test]
fn png_text_chunks_are_removed() {
    let base = encoded(ImageFormat::Png);
    let mut input = base[..33].to_vec();
    input.extend(png_chunk(b"tEXt", b"Author\0Dr. Jane Example"));
    input.extend(png_chunk(b"eXIf", b"MM\0*\0\0\0\x08\0\0"));
    input.extend_from_slice(&base[33..]);

    let (out, result) = MetadataStripper::new().strip(&input, "");
    assert_eq!(result.total_fields_removed(), 2);
    assert_eq!(result.sensitive_fields_removed(), 2);
    assert!(!contains(&out, b"Jane"));
    assert!(image::load_from_memory(&out).is_ok());
}

#[test]
fn truncated_png_passes_through_with_warning() {
    let png = encoded(ImageFormat::Png);
    let truncated = &png[..png.len() / 2];
    let (out, result) = MetadataStripper::new().strip(truncated, "");
    assert_eq!(out, truncated);
    assert_eq!(result.total_fields_removed(), 0);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].starts_with("PNG metadata not stripped"));
}

fn tiff_pages(data: &[u8]) -> usize {
    let mut decoder = tiff::decoder::Decoder::new(Cursor::new(data)).unwrap();
    let mut pages = 1;
    while decoder.more_images() {
        decoder.next_image().unwrap();
        pages += 1;
    }
    pages
}

#[test]
fn multi_page_tiff_keeps_every_page() {
    use tiff::encoder::{TiffEncoder, colortype};

    let mut input = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut input).unwrap();
        for shade in [0u8, 128, 255] {
            encoder.write_image::<colortype::Gray8>(16, 16, &[shade; 256]).unwrap();
        }
    }
    let input = input.into_inner();
    assert_eq!(tiff_pages(&input), 3);

    let (out, result) = MetadataStripper::new().strip(&input, "");
    assert_eq!(result.file_type, FileType::Tiff);
    assert!(result.warnings.is_empty());
    assert_eq!(tiff_pages(&out), 3);
}

#[test]
fn pdf_info_dictionary_is_deleted() {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(dictionary! {}, b"BT ET".to_vec()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "MediaBox" => vec![0.into(), 0.into(), 300.into(), 300.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    let info_id = doc.add_object(dictionary! {
        "Author" => Object::string_literal("Ward 7 Registrar"),
        "Keywords" => Object::string_literal("MRN 0042"),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);
    let mut input = Vec::new();
    doc.save_to(&mut input).unwrap();

    let (out, result) = MetadataStripper::new().strip(&input, "discharge.pdf");
    assert_eq!(result.file_type, FileType::Pdf);
    assert!(result.had_author);
    assert_eq!(result.sensitive_fields_removed(), 2);
    assert!(!contains(&out, b"Ward 7 Registrar"));
    assert!(!contains(&out, b"MRN 0042"));
    assert_eq!(Document::load_mem(&out).unwrap().get_pages().len(), 1);
}

fn docx_with(entries: &[(&str, &[u8])], method: CompressionMethod) -> Vec<u8> {
    let options = SimpleFileOptions::default().compression_method(method);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[test]
fn zip_bomb_returns_original_bytes() {
    let padding = vec![0u8; 1024 * 1024];
    let bomb = docx_with(
        &[
            ("word/document.xml", b"<w:document/>".as_slice()),
            ("word/media/image1.bin", padding.as_slice()),
        ],
        CompressionMethod::Deflated,
    );

    let (out, result) = MetadataStripper::new().strip(&bomb, "");
    assert_eq!(result.file_type, FileType::Docx);
    assert_eq!(out, bomb);
    assert_eq!(result.total_fields_removed(), 1);
    assert_eq!(result.fields_removed[0].to_string(), "Office:Error:ZipBombDetected");
    assert_eq!(result.warnings.len(), 1);
}

#[test]
fn spreadsheet_properties_are_emptied() {
    let core = br#"<cp:coreProperties xmlns:cp="urn:cp" xmlns:dc="urn:dc"><dc:creator>Nurse Example</dc:creator></cp:coreProperties>"#;
    let xlsx = docx_with(
        &[
            ("xl/workbook.xml", b"<workbook/>".as_slice()),
            ("xl/comments1.xml", b"<comments>check dosage</comments>".as_slice()),
            ("docProps/core.xml", core.as_slice()),
        ],
        CompressionMethod::Stored,
    );

    let (out, result) = MetadataStripper::new().strip(&xlsx, "");
    assert_eq!(result.file_type, FileType::Xlsx);
    assert!(result.had_author);
    assert!(!contains(&out, b"Nurse Example"));
    let names: Vec<String> = result.fields_removed.iter().map(|f| f.to_string()).collect();
    assert!(names.contains(&"Office:Removed:xl/comments1.xml".to_owned()));
    assert!(names.contains(&"Office:creator".to_owned()));
}
