use core::{hint::black_box, time::Duration};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use pgsink_core::{Error, WorkItem};
use pgsink_queue::{QueueConfig, WorkQueue};
use std::time::Instant;
use tokio::runtime::Builder;

#[derive(Clone, Copy, Debug)]
struct QueueBenchParams {
    items: u64,
    concurrency: usize,
    payload_bytes: usize,
}

fn queue_bench(c: &mut Criterion) {
    let items_cases = [1_000, 10_000];
    let concurrency_cases = [1, 5, 16, 64];
    let payload_cases = [1024, 100 * 1024];

    let mut cases = Vec::new();
    for &items in &items_cases {
        for &concurrency in &concurrency_cases {
            for &payload_bytes in &payload_cases {
                cases.push(QueueBenchParams {
                    items,
                    concurrency,
                    payload_bytes,
                });
            }
        }
    }
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();

    for params in &cases {
        let mut group = c.benchmark_group("queue/enqueue_drain");
        group.throughput(Throughput::Elements(params.items));

        group.bench_function(
            format!(
                "items/{}/conc/{}/payload/{}",
                params.items, params.concurrency, params.payload_bytes,
            ),
            |b| {
                b.to_async(&rt).iter_custom(|iters| async move {
                    let payload = vec![b'x'; params.payload_bytes];
                    let start = Instant::now();

                    for _ in 0..iters {
                        run_queue_bench(&payload, params).await;
                    }

                    start.elapsed()
                });
            },
        );

        group.finish();
    }
}

async fn run_queue_bench(payload: &[u8], params: &QueueBenchParams) {
    let queue = WorkQueue::new(
        QueueConfig {
            concurrency: params.concurrency,
            max_retries: 0,
            retry_delay: Duration::ZERO,
            ..QueueConfig::default()
        },
        |item: WorkItem| async move {
            // Simulates a round trip to the store.
            tokio::task::yield_now().await;
            black_box(item.len());
            Ok::<(), Error>(())
        },
        || async { true },
    );

    for _ in 0..params.items {
        queue
            .enqueue(WorkItem::new(payload.to_vec()))
            .expect("queue accepts while open");
    }
    queue.close().await;
}

criterion_group!(benches, queue_bench);
criterion_main!(benches);
