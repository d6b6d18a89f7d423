// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the scrubwerk-vision crate: the three redaction
// methods over a handful of regions, and the contour-based signature scan.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{DynamicImage, Rgb, RgbImage};

use scrubwerk_core::{Rectangle, RedactionMethod, RegionKind};
use scrubwerk_vision::{PhiRegion, SignatureDetector, redact};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// 640x480 gradient so blur and pixelation have something to average.
fn gradient_photo() -> DynamicImage {
    let img = RgbImage::from_fn(640, 480, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    DynamicImage::ImageRgb8(img)
}

/// White page with a wavy pen stroke across its left half.
fn signed_page() -> DynamicImage {
    let mut page = RgbImage::from_pixel(800, 400, Rgb([255, 255, 255]));
    for x in 40..360u32 {
        let centre = (200.0 + 30.0 * (x as f32 / 20.0).sin()).round() as i32;
        for y in (centre - 3)..=(centre + 3) {
            page.put_pixel(x, y as u32, Rgb([10, 10, 10]));
        }
    }
    DynamicImage::ImageRgb8(page)
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_redaction_methods(c: &mut Criterion) {
    let photo = gradient_photo();
    let regions = vec![
        PhiRegion::new(Rectangle::new(40, 40, 120, 140), RegionKind::Face, 0.95, "yunet"),
        PhiRegion::new(Rectangle::new(300, 200, 90, 90), RegionKind::Barcode, 1.0, "rxing"),
        PhiRegion::new(Rectangle::new(420, 360, 180, 60), RegionKind::Signature, 0.85, "contour"),
    ];

    let mut group = c.benchmark_group("redact (640x480, 3 regions)");
    for method in [RedactionMethod::Black, RedactionMethod::Blur, RedactionMethod::Pixelate] {
        group.bench_function(method.as_str(), |b| {
            b.iter(|| black_box(redact(black_box(&photo), &regions, method, 0.1)));
        });
    }
    group.finish();
}

fn bench_signature_scan(c: &mut Criterion) {
    let page = signed_page();
    let detector = SignatureDetector::new();

    c.bench_function("signature_contour (800x400)", |b| {
        b.iter(|| black_box(detector.detect(black_box(&page))));
    });
}

criterion_group!(benches, bench_redaction_methods, bench_signature_scan);
criterion_main!(benches);
