//! Benchmarks for the per-frame hot path
//!
//! Run with: cargo bench

use chartfeed_rs::buffer::SeriesBuffer;
use chartfeed_rs::clock::ManualClock;
use chartfeed_rs::config::{DropPolicy, PipelineConfig};
use chartfeed_rs::ingest::{FrameDecoder, JsonFrameDecoder, QueueConfig, SampleIngestQueue};
use chartfeed_rs::routing::PaneRoutingTable;
use chartfeed_rs::types::{Sample, SampleBatch, SeriesCategory};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn tick_batch(start_seq: u64, len: usize) -> SampleBatch {
    (0..len as u64)
        .map(|i| Sample::tick(start_seq + i, "ES:ticks", start_seq + i, i as f64, Some(1.0)))
        .collect()
}

fn bench_ring_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_append");

    for batch in [1usize, 64, 1024].iter() {
        let times: Vec<u64> = (0..*batch as u64).collect();
        let prices: Vec<f64> = times.iter().map(|&t| t as f64).collect();
        let volumes = vec![1.0; *batch];

        group.throughput(Throughput::Elements(*batch as u64));
        group.bench_with_input(BenchmarkId::new("at_capacity", batch), batch, |b, _| {
            let mut buffer = SeriesBuffer::new(SeriesCategory::Tick, 100_000);
            // Fill so every append evicts
            let fill: Vec<u64> = (0..100_000).collect();
            let fill_values = vec![0.0; 100_000];
            buffer
                .append(&fill, &[fill_values.as_slice(), fill_values.as_slice()], None)
                .unwrap();
            b.iter(|| {
                buffer
                    .append(black_box(&times), &[prices.as_slice(), volumes.as_slice()], None)
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_ring_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_reads");

    for size in [1_000usize, 10_000, 100_000].iter() {
        let mut buffer = SeriesBuffer::new(SeriesCategory::Indicator, *size);
        let times: Vec<u64> = (0..*size as u64 + 500).collect();
        let values: Vec<f64> = times.iter().map(|&t| (t as f64).sin()).collect();
        buffer.append(&times, &[values.as_slice()], None).unwrap();

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("as_plot_points", size), &buffer, |b, buf| {
            b.iter(|| black_box(buf.as_plot_points(0)));
        });
        group.bench_with_input(BenchmarkId::new("value_range", size), &buffer, |b, buf| {
            b.iter(|| black_box(buf.value_range(0)));
        });
    }

    group.finish();
}

fn bench_queue_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest_queue");

    for policy in [DropPolicy::Oldest, DropPolicy::Newest].iter() {
        let config = QueueConfig {
            max_queue_size: 256,
            max_batches_per_frame: 8,
            max_ms_per_frame: 4.0,
            drop_policy: *policy,
        };
        group.bench_with_input(
            BenchmarkId::new("enqueue_then_drain", policy),
            &config,
            |b, config| {
                let mut queue = SampleIngestQueue::new(*config, ManualClock::new().shared())
                    .unwrap();
                queue.resume();
                let mut seq = 0;
                let mut sink = |batch: SampleBatch| {
                    black_box(batch.len());
                };
                b.iter(|| {
                    for _ in 0..8 {
                        queue.enqueue(tick_batch(seq, 32));
                        seq += 32;
                    }
                    black_box(queue.drain_into(&mut sink));
                });
            },
        );
    }

    group.finish();
}

fn bench_routing(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing");

    let config = (0..200)
        .fold(PipelineConfig::default(), |cfg, i| {
            cfg.with_route(format!("SYM{}:ticks", i), format!("pane-{}", i % 8))
        })
        .with_route("*:indicator:*", "indicators")
        .with_route("*:bars", "price");
    let table = PaneRoutingTable::from_config(&config).unwrap();

    for series in ["SYM150:ticks", "ES:indicator:sma", "ES:bars", "ES:unknown"].iter() {
        group.bench_with_input(BenchmarkId::new("resolve", series), series, |b, id| {
            b.iter(|| black_box(table.resolve(black_box(id))));
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for len in [1usize, 100].iter() {
        let samples: Vec<String> = (0..*len)
            .map(|i| {
                format!(
                    r#"{{"seq":{},"series_id":"ES:ticks","t_ms":{},"payload":{{"price":4500.25,"volume":3}}}}"#,
                    i,
                    1_000 + i
                )
            })
            .collect();
        let frame = format!(r#"{{"type":"delta","samples":[{}]}}"#, samples.join(","));

        group.throughput(Throughput::Elements(*len as u64));
        group.bench_with_input(BenchmarkId::new("json_delta", len), &frame, |b, frame| {
            let mut decoder = JsonFrameDecoder::new();
            b.iter(|| black_box(decoder.decode(frame.as_bytes()).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_ring_append,
    bench_ring_reads,
    bench_queue_cycle,
    bench_routing,
    bench_decode,
);

criterion_main!(benches);
