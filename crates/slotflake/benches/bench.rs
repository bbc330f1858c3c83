use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use slotflake::{FixedSlot, Generator, LocalGenerators, TimeSource, WallClock, decode, encode};
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::Instant,
};

struct FixedMockTime {
    millis: u64,
}

impl TimeSource<u64> for FixedMockTime {
    fn current_millis(&self) -> u64 {
        self.millis
    }
}

// Number of IDs generated per benchmark iteration (per-thread for
// multi-threaded). Fits in one millisecond's sequence space.
const TOTAL_IDS: usize = 4096;

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(1));

    group.bench_function("encode", |b| {
        b.iter(|| encode(black_box(1_000), black_box(17), black_box(3), black_box(4)))
    });

    let bytes = encode(1_000, 17, 3, 4).unwrap();
    group.bench_function("decode", |b| b.iter(|| decode(black_box(&bytes))));

    group.finish();
}

/// Hot path where every ID lands in the same millisecond and never waits.
fn bench_generate_fixed_time(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate/fixed_time");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let generator =
                    Generator::new(FixedSlot::new(1).unwrap(), 1, FixedMockTime { millis: 1 })
                        .unwrap();
                for _ in 0..TOTAL_IDS {
                    black_box(generator.generate().unwrap());
                }
            }
            start.elapsed()
        });
    });

    group.bench_function(format!("batch/{TOTAL_IDS}"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let generator =
                    Generator::new(FixedSlot::new(1).unwrap(), 1, FixedMockTime { millis: 1 })
                        .unwrap();
                black_box(generator.batch(TOTAL_IDS).unwrap());
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Wall clock, contended by every core through one shared generator.
fn bench_generate_contended(c: &mut Criterion) {
    let threads = num_cpus::get();
    let generators = LocalGenerators::new(WallClock::default());
    let generator = generators.generator_for(1, 1).unwrap();

    let mut group = c.benchmark_group("generate/contended");
    group.throughput(Throughput::Elements((threads * TOTAL_IDS) as u64));

    group.bench_function(format!("threads/{threads}/elems/{TOTAL_IDS}"), |b| {
        b.iter_custom(|iters| {
            let barrier = Arc::new(Barrier::new(threads + 1));
            let start = scope(|s| {
                for _ in 0..threads {
                    let generator = Arc::clone(&generator);
                    let barrier = Arc::clone(&barrier);
                    s.spawn(move || {
                        barrier.wait();
                        for _ in 0..iters {
                            for _ in 0..TOTAL_IDS {
                                black_box(generator.generate().unwrap());
                            }
                        }
                    });
                }
                barrier.wait();
                Instant::now()
            });
            start.elapsed()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_codec,
    bench_generate_fixed_time,
    bench_generate_contended
);
criterion_main!(benches);
