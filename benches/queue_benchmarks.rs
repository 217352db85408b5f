use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use journal_forwarder::buffer::{OverflowPolicy, PublishTask, TaskQueue};
use journal_forwarder::domain::{LogEvent, Severity};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn create_test_task(id: usize) -> PublishTask {
    let event = LogEvent::new(
        Utc::now(),
        "bluetoothd",
        Severity::Info,
        format!("Test log message {id}"),
    )
    .with_field("_PID", "812")
    .with_field("_SYSTEMD_UNIT", "bluetooth.service");
    PublishTask::new(id as u64, event)
}

fn bench_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_pop");
    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime for benchmark");

    for &size in &[1000, 10000, 100_000] {
        group.throughput(Throughput::Elements(size as u64 * 2)); // Both push and pop
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                rt.block_on(async {
                    let queue = TaskQueue::new(size).expect("Failed to create queue");
                    let cancel = CancellationToken::new();
                    for i in 0..size {
                        queue
                            .push(std::hint::black_box(create_test_task(i)), OverflowPolicy::Block)
                            .await
                            .expect("push failed");
                    }
                    for _ in 0..size {
                        let task = queue.pop(&cancel).await.expect("pop failed");
                        std::hint::black_box(task);
                        queue.complete();
                    }
                });
            });
        });
    }
    group.finish();
}

fn bench_evict_when_full(c: &mut Criterion) {
    let mut group = c.benchmark_group("evict_when_full");
    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime for benchmark");

    for &capacity in &[64, 1024] {
        group.throughput(Throughput::Elements(10_000));
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| {
                    rt.block_on(async {
                        let queue = TaskQueue::new(capacity).expect("Failed to create queue");
                        for i in 0..10_000 {
                            let outcome = queue
                                .push(create_test_task(i), OverflowPolicy::Evict)
                                .await
                                .expect("push failed");
                            std::hint::black_box(outcome);
                        }
                    });
                });
            },
        );
    }
    group.finish();
}

fn bench_concurrent_workers(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_workers");
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime for benchmark");

    for &workers in &[1usize, 4] {
        group.throughput(Throughput::Elements(10_000));
        group.bench_with_input(
            BenchmarkId::from_parameter(workers),
            &workers,
            |b, &workers| {
                b.iter(|| {
                    rt.block_on(async {
                        let queue = Arc::new(TaskQueue::new(256).expect("Failed to create queue"));
                        let cancel = CancellationToken::new();

                        let consumers: Vec<_> = (0..workers)
                            .map(|_| {
                                let queue = queue.clone();
                                let cancel = cancel.clone();
                                tokio::spawn(async move {
                                    while let Some(task) = queue.pop(&cancel).await {
                                        std::hint::black_box(task);
                                        queue.complete();
                                    }
                                })
                            })
                            .collect();

                        for i in 0..10_000 {
                            queue
                                .push(create_test_task(i), OverflowPolicy::Block)
                                .await
                                .expect("push failed");
                        }
                        queue.close();
                        for consumer in consumers {
                            consumer.await.expect("consumer panicked");
                        }
                    });
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_push_pop,
    bench_evict_when_full,
    bench_concurrent_workers
);
criterion_main!(benches);
