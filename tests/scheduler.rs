//! Scheduler timing tests under paused tokio time.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{alternating_history, FakeSource, MemoryStore, StubForecaster};
use wingo_predictor::engine::{
    retrain_all, CycleParams, RetrainPolicy, Scheduler, StatusBoard, StreamWorker,
};
use wingo_predictor::notify::{NotifierHandle, NotifierParams};
use wingo_predictor::types::StreamConfig;

fn no_retrain() -> RetrainPolicy {
    RetrainPolicy {
        interval: Duration::from_secs(24 * 3600),
        on_startup: false,
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    forecasters: Vec<Arc<StubForecaster>>,
    workers: Vec<Arc<StreamWorker>>,
    status: Arc<StatusBoard>,
}

fn harness(streams: &[StreamConfig], forecasters: Vec<StubForecaster>) -> Harness {
    let mut source = FakeSource::new();
    for s in streams {
        source = source.with(&s.endpoint, alternating_history(80));
    }
    let source = Arc::new(source);
    let store = Arc::new(MemoryStore::default());
    let status = Arc::new(StatusBoard::new(streams));
    let notifier = NotifierHandle::spawn(NotifierParams::default());
    let forecasters: Vec<Arc<StubForecaster>> = forecasters.into_iter().map(Arc::new).collect();

    let workers = streams
        .iter()
        .zip(&forecasters)
        .map(|(s, f)| {
            Arc::new(StreamWorker::new(
                s.clone(),
                CycleParams::default(),
                source.clone(),
                f.clone(),
                store.clone(),
                notifier.clone(),
                status.clone(),
            ))
        })
        .collect();

    Harness {
        store,
        forecasters,
        workers,
        status,
    }
}

#[tokio::test(start_paused = true)]
async fn test_streams_run_on_their_own_intervals() {
    let streams = vec![
        StreamConfig::new("fast", "WinGo_A", 20),
        StreamConfig::new("slow", "WinGo_B", 25),
    ];
    let h = harness(
        &streams,
        vec![StubForecaster::new(Duration::ZERO), StubForecaster::new(Duration::ZERO)],
    );

    let running = Scheduler::new(h.workers.clone(), no_retrain()).start();
    // Ticks: fast at 0, 20, 40; slow at 0, 25, 50.
    tokio::time::sleep(Duration::from_secs(55)).await;
    running.shutdown().await;

    assert_eq!(h.store.count("fast"), 3);
    assert_eq!(h.store.count("slow"), 3);
    for f in &h.forecasters {
        assert_eq!(f.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(f.retrains.load(Ordering::SeqCst), 0);
    }

    let fast = h.status.snapshot().await;
    assert_eq!(fast[0].cycles_published, 3);
}

#[tokio::test(start_paused = true)]
async fn test_slow_cycle_never_overlaps_itself() {
    let streams = vec![StreamConfig::new("busy", "WinGo_C", 10)];
    let h = harness(&streams, vec![StubForecaster::new(Duration::from_secs(25))]);

    let running = Scheduler::new(h.workers.clone(), no_retrain()).start();
    // Cycles run 0-25 and 30-55; the ticks due meanwhile are skipped.
    tokio::time::sleep(Duration::from_secs(58)).await;
    running.shutdown().await;

    let f = &h.forecasters[0];
    assert_eq!(f.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(f.forecasts.load(Ordering::SeqCst), 2);
    assert_eq!(h.store.count("busy"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_ticks_missed_by_slow_cycle_are_dropped() {
    let streams = vec![StreamConfig::new("busy", "WinGo_C", 10)];
    let h = harness(&streams, vec![StubForecaster::new(Duration::from_secs(25))]);

    let running = Scheduler::new(h.workers.clone(), no_retrain()).start();
    tokio::time::sleep(Duration::from_secs(80)).await;
    running.shutdown().await;

    // A 25s cycle on a 10s stream: the ticks at 10, 20, 40, 50 and 70 fall
    // inside a running cycle and never start one of their own.
    assert_eq!(h.forecasters[0].start_secs(), vec![0, 30, 60]);
    assert_eq!(h.store.count("busy"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_lets_in_flight_cycle_finish() {
    let streams = vec![StreamConfig::new("1min", "WinGo_1M", 60)];
    let h = harness(&streams, vec![StubForecaster::new(Duration::from_secs(10))]);

    let running = Scheduler::new(h.workers.clone(), no_retrain()).start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.store.count("1min"), 0);

    running.shutdown().await;
    assert_eq!(h.store.count("1min"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retrain_on_startup_and_interval() {
    let streams = vec![
        StreamConfig::new("a", "WinGo_A", 3600),
        StreamConfig::new("b", "WinGo_B", 3600),
    ];
    let h = harness(
        &streams,
        vec![StubForecaster::new(Duration::ZERO), StubForecaster::new(Duration::ZERO)],
    );

    let policy = RetrainPolicy {
        interval: Duration::from_secs(24 * 3600),
        on_startup: true,
    };
    let running = Scheduler::new(h.workers.clone(), policy).start();
    // Startup pass plus the 24h and 48h passes.
    tokio::time::sleep(Duration::from_secs(49 * 3600)).await;
    running.shutdown().await;

    for f in &h.forecasters {
        assert_eq!(f.retrains.load(Ordering::SeqCst), 3);
    }
}

#[tokio::test]
async fn test_retrain_failures_are_independent() {
    let streams = vec![
        StreamConfig::new("ok", "WinGo_A", 30),
        StreamConfig::new("broken", "WinGo_B", 30),
    ];
    let h = harness(
        &streams,
        vec![
            StubForecaster::new(Duration::ZERO),
            StubForecaster::new(Duration::ZERO).failing_retrain(),
        ],
    );

    let results = retrain_all(&h.workers).await;
    assert_eq!(results.len(), 2);
    assert!(results[0].1.success);
    assert!(!results[1].1.success);

    let ok = h.status.get(&streams[0].id).await.unwrap();
    let broken = h.status.get(&streams[1].id).await.unwrap();
    assert_eq!(ok.last_retrain_success, Some(true));
    assert_eq!(broken.last_retrain_success, Some(false));
}
