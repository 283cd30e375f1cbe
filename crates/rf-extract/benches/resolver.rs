//! Benchmark split cut resolution and a full range extraction.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rf_core::config::{ReframerConfig, XRound};
use rf_core::{LaneInfo, Packet, Rational};
use rf_extract::resolver::{resolve, LaneView, Sample, SizePolicy, SplitRule};
use rf_extract::{MemoryHost, Reframer, Tick};

fn make_lane(count: i64, gop: i64, fps: u64) -> LaneView {
    LaneView {
        samples: (0..count)
            .map(|i| Sample {
                time: Rational::new(i, fps),
                end: Rational::new(i + 1, fps),
                size: if i % gop == 0 { 40_000 } else { 8_000 },
                sync: i % gop == 0,
            })
            .collect(),
        eos: true,
        boundary: true,
        sparse: false,
    }
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    // 1 minute of 25 fps video, 2s GOPs.
    let short = vec![make_lane(1500, 50, 25)];
    group.bench_function("duration_1min", |b| {
        b.iter(|| {
            resolve(
                SplitRule::Duration(Rational::from_secs(10)),
                Rational::ZERO,
                0,
                black_box(&short),
            )
        });
    });

    // 10 minutes.
    let long = vec![make_lane(15_000, 50, 25)];
    group.bench_function("size_10min", |b| {
        b.iter(|| {
            resolve(
                SplitRule::Size {
                    target: 50_000_000,
                    policy: SizePolicy::Closest,
                },
                Rational::ZERO,
                0,
                black_box(&long),
            )
        });
    });

    group.finish();
}

fn run(cfg: &ReframerConfig, packets: &[Packet]) -> usize {
    let mut host = MemoryHost::new();
    let info = LaneInfo::video(25);
    let lane = host.add_lane(info.clone(), packets.to_vec(), false);
    let mut stage = Reframer::new(cfg.clone());
    stage.attach_lane(lane, info);
    while let Ok(tick) = stage.process(&mut host) {
        if tick == Tick::Finished {
            break;
        }
    }
    host.outputs(lane).len()
}

fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract");

    let packets: Vec<Packet> = (0..15_000u64)
        .map(|i| {
            let p = Packet::new(i, 1, vec![0u8; 64]);
            if i % 50 == 0 {
                p.sync()
            } else {
                p
            }
        })
        .collect();

    let range = ReframerConfig {
        xs: vec!["60".into()],
        xe: vec!["300".into()],
        ..Default::default()
    };
    group.bench_function("range_10min", |b| {
        b.iter(|| run(black_box(&range), &packets));
    });

    let split = ReframerConfig {
        xs: vec!["D30".into()],
        xround: XRound::Before,
        ..Default::default()
    };
    group.bench_function("duration_split_10min", |b| {
        b.iter(|| run(black_box(&split), &packets));
    });

    group.finish();
}

criterion_group!(benches, bench_resolve, bench_extract);
criterion_main!(benches);
