use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;

use eventlog_core::{EventLogSequenceNumber, EventSourceId, EventStoreError, EventTypeId, TenantId};
use eventlog_events::{Artifact, CommitEventsRequest, ExecutionContext, UncommittedEvent};
use eventlog_infra::committer::CommitPipeline;
use eventlog_infra::{EventLogConfig, EventStoreRegistry, InMemoryEventStore, PersistCommits};

fn request(tenant: TenantId, event_type: EventTypeId, count: usize) -> CommitEventsRequest {
    CommitEventsRequest {
        execution_context: ExecutionContext::new(tenant),
        events: (0..count)
            .map(|i| {
                UncommittedEvent::new(
                    EventSourceId::new(format!("source-{i}")).unwrap(),
                    Artifact::new(event_type, 1),
                    serde_json::json!({ "i": i }),
                )
            })
            .collect(),
    }
}

/// Sequencing cost only: queue requests, then drain them into one commit.
fn bench_pipeline_batching(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_batching");
    let tenant = TenantId::new();
    let event_type = EventTypeId::new();

    for requests in [1usize, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*requests as u64));
        group.bench_with_input(
            BenchmarkId::new("add_and_drain", requests),
            requests,
            |b, &requests| {
                let template = request(tenant, event_type, 1);
                b.iter(|| {
                    let mut pipeline = CommitPipeline::new(EventLogSequenceNumber::INITIAL);
                    let mut pending = Vec::with_capacity(requests);
                    for _ in 0..requests {
                        pending.push(pipeline.try_add_events_from(template.clone()).unwrap());
                    }
                    let batch = pipeline.try_get_next_batch().unwrap().unwrap();
                    black_box(batch.commit().event_count());
                    batch.complete();
                    black_box(pending);
                });
            },
        );
    }

    group.finish();
}

fn bench_in_memory_persist(c: &mut Criterion) {
    let mut group = c.benchmark_group("in_memory_persist");
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let event_type = EventTypeId::new();

    for batch_size in [1usize, 10, 100].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("append_commit", batch_size),
            batch_size,
            |b, &batch_size| {
                let tenant = TenantId::new();
                let store = InMemoryEventStore::new();
                let mut pipeline = CommitPipeline::new(EventLogSequenceNumber::INITIAL);
                b.iter(|| {
                    let _pending = pipeline
                        .try_add_events_from(request(tenant, event_type, batch_size))
                        .unwrap();
                    let batch = pipeline.try_get_next_batch().unwrap().unwrap();
                    runtime
                        .block_on(store.persist(tenant, batch.commit()))
                        .unwrap();
                    batch.complete();
                });
            },
        );
    }

    group.finish();
}

/// Round trip through the committer actor: request, persist, response.
fn bench_commit_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_latency");
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let tenant = TenantId::new();
    let event_type = EventTypeId::new();

    let registry = runtime.block_on(async {
        let registry = EventStoreRegistry::start(
            EventLogConfig::default(),
            Arc::new(InMemoryEventStore::new()),
            [tenant],
        );
        let store = registry.get(tenant).unwrap();
        while let Err(EventStoreError::NotReady) = store.commit(request(tenant, event_type, 0)).await {
            tokio::task::yield_now().await;
        }
        registry
    });
    let store = registry.get(tenant).unwrap();

    group.bench_function("single_event", |b| {
        b.iter(|| {
            runtime
                .block_on(store.commit(request(tenant, event_type, 1)))
                .unwrap()
        });
    });

    group.finish();
    runtime.block_on(registry.shutdown());
}

criterion_group!(
    benches,
    bench_pipeline_batching,
    bench_in_memory_persist,
    bench_commit_latency
);
criterion_main!(benches);
