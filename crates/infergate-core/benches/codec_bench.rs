//! Criterion benchmarks for the infergate framing codec.
//!
//! Measures frame encoding and prefix decoding for each supported width and
//! a few representative payload sizes.
//!
//! Run with:
//! ```bash
//! cargo bench --package infergate-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use infergate_core::{FrameCodec, LengthWidth};

const WIDTHS: [LengthWidth; 3] = [LengthWidth::U16, LengthWidth::U32, LengthWidth::U64];
const SIZES: [usize; 3] = [128, 4096, 60_000];

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for width in WIDTHS {
        let codec = FrameCodec::with_width(width);
        for size in SIZES {
            let payload = vec![0xA5u8; size];
            group.bench_with_input(
                BenchmarkId::new(format!("width_{width}"), size),
                &payload,
                |b, payload| b.iter(|| codec.encode(black_box(payload)).unwrap()),
            );
        }
    }
    group.finish();
}

fn bench_decode_length(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_length");
    for width in WIDTHS {
        let codec = FrameCodec::with_width(width);
        let prefix = codec.encode_length(4096).unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("width_{width}")),
            &prefix,
            |b, prefix| b.iter(|| codec.decode_length(black_box(prefix)).unwrap()),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode_length);
criterion_main!(benches);
