//! Benchmarks for playlist parsing
//!
//! Run with: cargo bench -p marquee-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use marquee_core::{format_clock, parse_clock, parse_document, PlaylistSchema};
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

fn generate_playlist(entry_count: usize) -> String {
    let mut doc = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<movies>\n");
    for i in 0..entry_count {
        doc.push_str(&format!(
            "  <movie>\n    <title>Movie {i} &amp; friends</title>\n    <duration>{}:{:02}</duration>\n    \
             <poster>posters/{i}.png</poster>\n    <path>https://media.example.com/{i}/index.m3u8</path>\n  </movie>\n",
            90 + i % 60,
            i % 60
        ));
    }
    doc.push_str("</movies>\n");
    doc
}

// ============================================================================
// Document Parsing Benchmarks
// ============================================================================

fn bench_document_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Playlist Document Parsing");
    let schema = PlaylistSchema::default();

    for &entry_count in &[1, 10, 100, 1000] {
        let doc = generate_playlist(entry_count);
        group.throughput(Throughput::Bytes(doc.len() as u64));

        group.bench_with_input(
            BenchmarkId::new("parse_document", format!("{entry_count}_entries")),
            &doc,
            |b, doc| {
                b.iter(|| black_box(parse_document(black_box(doc.as_bytes()), &schema).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_truncated_document(c: &mut Criterion) {
    let schema = PlaylistSchema::default();
    let doc = generate_playlist(100);
    let truncated = &doc[..doc.len() * 3 / 4];

    c.bench_function("parse_truncated_100_entries", |b| {
        b.iter(|| black_box(parse_document(black_box(truncated.as_bytes()), &schema)))
    });
}

// ============================================================================
// Duration Label Benchmarks
// ============================================================================

fn bench_clock_labels(c: &mut Criterion) {
    let mut group = c.benchmark_group("Clock Labels");

    group.bench_function("parse_clock", |b| {
        b.iter(|| black_box(parse_clock(black_box("1:42:07"))))
    });

    group.bench_function("format_clock", |b| {
        b.iter(|| black_box(format_clock(black_box(Duration::from_secs(6127)))))
    });

    group.finish();
}

criterion_group!(parser_benches, bench_document_parsing, bench_truncated_document);

criterion_group!(clock_benches, bench_clock_labels);

criterion_main!(parser_benches, clock_benches);
