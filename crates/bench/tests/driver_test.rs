//! Integration tests for the benchmark driver
//!
//! Run with: cargo test -p beanbench --test driver_test
//!
//! Every run goes against an in-memory queue, so call counts can be checked
//! exactly.

use std::sync::Arc;
use std::time::Duration;

use beanbench::prelude::*;
use beanbench_queue::InMemoryQueue;

fn driver(queue: &InMemoryQueue, config: RunConfig) -> BenchmarkDriver {
    BenchmarkDriver::new(Arc::new(queue.clone()), config)
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_publishers_and_readers_move_exact_count() {
    let queue = InMemoryQueue::new();
    let config = RunConfig::new("memory")
        .with_publishers(2)
        .with_readers(2)
        .with_job_count(500)
        .with_payload_size(64);

    let summary = driver(&queue, config).execute().await.unwrap();

    let publishers = summary.publishers.expect("publishers ran");
    let readers = summary.readers.expect("readers ran");
    assert_eq!(publishers.pool.completed, 500);
    assert_eq!(readers.pool.completed, 500);
    assert_eq!(publishers.metrics.count, 500);
    assert!(readers.metrics.rate > 0.0);

    let stats = queue.stats();
    assert_eq!(stats.puts, 500);
    assert_eq!(stats.deletes, 500);
    assert_eq!(stats.delete_misses, 0);
    assert_eq!(queue.total_ready(), 0);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_put_count_is_exact_for_any_concurrency() {
    const JOBS: u64 = 12;

    for publishers in 1..=JOBS as usize {
        let queue = InMemoryQueue::new();
        let config = RunConfig::new("memory")
            .with_publishers(publishers)
            .with_readers(0)
            .with_job_count(JOBS);

        let summary = driver(&queue, config).execute().await.unwrap();

        assert_eq!(queue.stats().puts, JOBS, "publishers = {publishers}");
        assert_eq!(summary.publishers.unwrap().pool.completed, JOBS);
        assert!(summary.readers.is_none());
    }
}

#[test_log::test(tokio::test)]
async fn test_zero_count_makes_no_queue_calls() {
    let queue = InMemoryQueue::new();
    let config = RunConfig::new("memory")
        .with_publishers(4)
        .with_readers(4)
        .with_job_count(0);

    let summary = driver(&queue, config).execute().await.unwrap();

    assert_eq!(queue.stats(), Default::default());
    assert_eq!(summary.publishers.unwrap().pool.completed, 0);
    assert_eq!(summary.readers.unwrap().pool.completed, 0);
}

#[test_log::test(tokio::test)]
async fn test_no_roles_is_empty_run() {
    let queue = InMemoryQueue::new();
    let config = RunConfig::new("memory")
        .with_publishers(0)
        .with_readers(0)
        .with_job_count(1000);

    let summary = tokio::time::timeout(Duration::from_secs(1), driver(&queue, config).execute())
        .await
        .expect("empty run returns immediately")
        .unwrap();

    assert!(summary.publishers.is_none());
    assert!(summary.readers.is_none());
    assert!(summary.drained.is_none());
    assert!(summary.prefilled.is_none());
    assert_eq!(queue.stats().connects, 0);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_prefill_then_single_reader() {
    let queue = InMemoryQueue::new();
    let config = RunConfig::new("memory")
        .with_publishers(0)
        .with_readers(1)
        .with_job_count(50)
        .with_prefill(50);

    let summary = tokio::time::timeout(Duration::from_secs(5), driver(&queue, config).execute())
        .await
        .expect("reader run terminates")
        .unwrap();

    assert_eq!(summary.prefilled, Some(50));
    assert_eq!(summary.role(Role::Reader).unwrap().pool.completed, 50);
    assert_eq!(queue.stats().deletes, 50);
    assert_eq!(queue.total_ready(), 0);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_readers_leave_surplus_in_queue() {
    let queue = InMemoryQueue::new();
    for _ in 0..80 {
        queue.push("default", vec![0u8; 16]);
    }
    let config = RunConfig::new("memory")
        .with_publishers(0)
        .with_readers(2)
        .with_job_count(60);

    let summary = driver(&queue, config).execute().await.unwrap();

    assert_eq!(summary.readers.unwrap().pool.completed, 60);
    assert_eq!(queue.stats().deletes, 60);
    assert_eq!(queue.reserved_count(), 0);
    assert_eq!(queue.ready_count("default"), 20);
}

#[test_log::test(tokio::test)]
async fn test_drain_runs_before_timed_window() {
    let queue = InMemoryQueue::new();
    for _ in 0..5 {
        queue.push("default", b"stale".to_vec());
    }
    let config = RunConfig::new("memory")
        .with_publishers(0)
        .with_readers(0)
        .with_drain(true);

    let summary = tokio::time::timeout(Duration::from_secs(2), driver(&queue, config).execute())
        .await
        .expect("drain terminates")
        .unwrap();

    let drained = summary.drained.unwrap();
    assert_eq!(drained.drained, 5);
    assert_eq!(drained.delete_failures, 0);
    assert_eq!(queue.total_ready(), 0);
}

#[test_log::test(tokio::test)]
async fn test_custom_tube() {
    let queue = InMemoryQueue::new();
    let config = RunConfig::new("memory")
        .with_publishers(1)
        .with_readers(0)
        .with_job_count(10)
        .with_tube("bench");

    driver(&queue, config).execute().await.unwrap();

    assert_eq!(queue.ready_count("bench"), 10);
    assert_eq!(queue.ready_count("default"), 0);
}

#[test_log::test(tokio::test)]
async fn test_unreachable_host_is_not_healthy() {
    let queue = InMemoryQueue::new();
    queue.set_reachable(false);
    let config = RunConfig::new("memory")
        .with_publishers(1)
        .with_readers(1)
        .with_job_count(10);

    let result = driver(&queue, config).execute().await;

    match result {
        Err(BenchError::NotHealthy { host, waited }) => {
            assert_eq!(host, "memory");
            assert_eq!(waited, Duration::from_secs(1));
        }
        other => panic!("expected NotHealthy, got {other:?}"),
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_put_failure_stops_the_run() {
    let queue = InMemoryQueue::new();
    queue.fail_puts_after(100);
    let config = RunConfig::new("memory")
        .with_publishers(2)
        .with_readers(2)
        .with_job_count(1000);

    let result = tokio::time::timeout(Duration::from_secs(5), driver(&queue, config).execute())
        .await
        .expect("failed run still terminates");

    assert!(matches!(result, Err(BenchError::Enqueue(_))));
    assert_eq!(queue.stats().puts, 100);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_delete_failures_are_reported() {
    let queue = InMemoryQueue::new();
    queue.fail_next_deletes(3);
    let config = RunConfig::new("memory")
        .with_publishers(0)
        .with_readers(1)
        .with_job_count(20)
        .with_prefill(25);

    let summary = driver(&queue, config).execute().await.unwrap();

    let readers = summary.readers.unwrap();
    assert_eq!(readers.pool.completed, 20);
    assert_eq!(readers.pool.ack_failures, 3);
    assert_eq!(queue.stats().deletes, 20);
}

#[test_log::test(tokio::test)]
async fn test_summary_serializes() {
    let queue = InMemoryQueue::new();
    let config = RunConfig::new("memory")
        .with_publishers(1)
        .with_readers(1)
        .with_job_count(5);

    let summary = driver(&queue, config).execute().await.unwrap();
    let json = serde_json::to_value(&summary).unwrap();

    assert_eq!(json["config"]["job_count"], 5);
    assert_eq!(json["publishers"]["role"], "publisher");
    assert_eq!(json["readers"]["pool"]["completed"], 5);
    assert!(json["started_at"].is_string());
}
