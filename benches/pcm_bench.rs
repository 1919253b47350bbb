use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use dante_receiver::audio::pcm::{apply_gain, scale_to_stereo, ChannelSlice};
use dante_receiver::protocol::ByteOrder;

const CHANNELS: usize = 64;

fn planar_frame(chunk_size: usize) -> Vec<u8> {
    (0..CHANNELS * chunk_size)
        .flat_map(|i| ByteOrder::Big.write_i16((i as i16).wrapping_mul(31)))
        .collect()
}

fn bench_demux_and_scale(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");
    for chunk_size in [64usize, 128, 256] {
        let frame = planar_frame(chunk_size);
        let slice = ChannelSlice {
            offset: 17 * chunk_size * 2,
            chunk_size,
            byte_order: ByteOrder::Big,
        };
        let mut planar = vec![0i16; chunk_size];
        let mut out = Vec::with_capacity(chunk_size * 2);

        group.bench_with_input(BenchmarkId::from_parameter(chunk_size), &frame, |b, frame| {
            b.iter(|| {
                slice.demux(black_box(frame), &mut planar);
                scale_to_stereo(&planar, black_box(73), &mut out);
                black_box(&out);
            })
        });
    }
    group.finish();
}

fn bench_gain(c: &mut Criterion) {
    let samples: Vec<i16> = (0..1024).map(|i| (i * 37) as i16).collect();
    c.bench_function("apply_gain_1024", |b| {
        b.iter(|| {
            let sum: i64 = samples
                .iter()
                .map(|s| apply_gain(*s, black_box(55)) as i64)
                .sum();
            black_box(sum)
        })
    });
}

criterion_group!(benches, bench_demux_and_scale, bench_gain);
criterion_main!(benches);
