//! Benchmarks for ffmpeg diagnostic parsing
//!
//! Measures per-line field extraction and the full tracker loop over a
//! realistic stderr stream.

use cf_av::progress::{parse_line, ProgressTracker};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const PROGRESS_LINE: &str =
    "frame= 1234 fps= 48.2 q=28.0 size=   12288kB time=00:00:51.42 bitrate=1957.4kbits/s speed=2.01x";

const NOISE_LINE: &str =
    "  Stream #0:0(und): Video: h264 (High) (avc1 / 0x31637661), yuv420p, 1920x1080, 4986 kb/s, 23.98 fps";

/// A stderr stream of `n` progress lines with banner noise mixed in.
fn stream(n: usize) -> Vec<String> {
    let mut lines = Vec::with_capacity(n * 2);
    for i in 0..n {
        if i % 10 == 0 {
            lines.push(NOISE_LINE.to_string());
        }
        let secs = i as f64 * 0.5;
        lines.push(format!(
            "frame={:5} fps= 48.2 q=28.0 size={:8}kB time=00:{:02}:{:05.2} bitrate=1957.4kbits/s speed=2.01x",
            i * 12,
            i * 240,
            (secs / 60.0) as u64,
            secs % 60.0
        ));
    }
    lines
}

fn bench_parse_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_line");
    group.bench_function("progress", |b| b.iter(|| parse_line(black_box(PROGRESS_LINE))));
    group.bench_function("noise", |b| b.iter(|| parse_line(black_box(NOISE_LINE))));
    group.finish();
}

fn bench_tracker(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracker");
    for n in [100usize, 1_000, 10_000] {
        let lines = stream(n);
        group.throughput(Throughput::Elements(lines.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &lines, |b, lines| {
            b.iter(|| {
                let mut tracker = ProgressTracker::new(Some(n as f64 * 0.5));
                let mut emitted = 0usize;
                for line in lines {
                    if tracker.observe(black_box(line)).is_some() {
                        emitted += 1;
                    }
                }
                emitted
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse_line, bench_tracker);
criterion_main!(benches);
