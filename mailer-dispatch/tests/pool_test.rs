//! Worker pool, backpressure and shutdown behaviour.

mod support;

use std::{collections::HashSet, sync::Arc, time::Duration};

use mailer_dispatch::{
    BackpressurePolicy, DeliveryOutcome, DispatchConfig, DispatchError, DispatchQueue, Dispatcher,
    FailureKind, QueueError, RetryEngine, RetryPolicy, WorkerPool,
};
use pretty_assertions::assert_eq;
use support::{ChannelObserver, PanickingObserver, Script, ScriptedTransport, message};
use tokio::{
    sync::Semaphore,
    time::{Instant, timeout},
};

fn config(workers: usize, queue_capacity: usize) -> DispatchConfig {
    DispatchConfig {
        workers,
        queue_capacity,
        ..DispatchConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn submit_returns_before_delivery() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = ScriptedTransport::gated(Script::AlwaysSucceed, Arc::clone(&gate));
    let (observer, mut reports) = ChannelObserver::new();
    let dispatcher =
        Dispatcher::start_with_observer(DispatchConfig::default(), transport.clone(), observer)
            .unwrap();

    // The transport cannot finish, so returning at all proves submit does not wait for it
    timeout(Duration::from_millis(10), dispatcher.submit(message("hi")))
        .await
        .expect("submit should not wait for delivery")
        .unwrap();

    gate.add_permits(1);
    let report = reports.recv().await.unwrap();
    assert!(report.is_delivered());
    assert_eq!(report.attempts, 1);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_job_is_processed_exactly_once() {
    let transport = ScriptedTransport::new(Script::AlwaysSucceed);
    let (observer, mut reports) = ChannelObserver::new();
    let dispatcher =
        Dispatcher::start_with_observer(config(4, 100), transport.clone(), observer).unwrap();

    for i in 0..50 {
        dispatcher.submit(message(format!("job {i}"))).await.unwrap();
    }

    let mut job_ids = HashSet::new();
    for _ in 0..50 {
        let report = timeout(Duration::from_secs(10), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(report.is_delivered());
        assert!(job_ids.insert(report.job_id));
    }

    dispatcher.shutdown().await.unwrap();

    let subjects: HashSet<_> = transport.subjects().into_iter().collect();
    assert_eq!(transport.calls(), 50);
    assert_eq!(subjects.len(), 50);
    assert!((0..50).all(|i| subjects.contains(&format!("job {i}"))));
}

#[tokio::test(start_paused = true)]
async fn full_queue_applies_backpressure() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = ScriptedTransport::gated(Script::AlwaysSucceed, Arc::clone(&gate));
    let (observer, mut reports) = ChannelObserver::new();

    let queue = DispatchQueue::bounded(2);
    let engine = Arc::new(RetryEngine::new(RetryPolicy::default(), transport.clone()));
    let pool = WorkerPool::start(1, &queue, engine, observer).unwrap();

    let blocking = queue.submitter(BackpressurePolicy::Block);
    let rejecting = queue.submitter(BackpressurePolicy::Reject);

    // The only worker takes the first job and stalls in the transport
    blocking.submit(message("in flight")).await.unwrap();
    while transport.calls() == 0 {
        tokio::task::yield_now().await;
    }

    blocking.submit(message("queued 1")).await.unwrap();
    blocking.submit(message("queued 2")).await.unwrap();
    assert_eq!(queue.len(), 2);

    assert_eq!(blocking.try_submit(message("extra")), Err(QueueError::Full));
    assert_eq!(
        rejecting.submit(message("extra")).await,
        Err(QueueError::Full)
    );

    // A blocking submit waits while the queue stays full
    let waiting = tokio::spawn({
        let blocking = blocking.clone();
        async move { blocking.submit(message("waiting")).await }
    });
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!waiting.is_finished());

    // ... and goes through once the worker frees a slot
    gate.add_permits(1);
    waiting.await.unwrap().unwrap();

    gate.add_permits(10);
    for _ in 0..4 {
        assert!(reports.recv().await.unwrap().is_delivered());
    }

    pool.shutdown(Duration::from_secs(30)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failing_deliveries_hold_the_queue_until_retries_run_out() {
    let transport = ScriptedTransport::new(Script::AlwaysFail(FailureKind::Transient));
    let (observer, mut reports) = ChannelObserver::new();

    let queue = DispatchQueue::bounded(1);
    let engine = Arc::new(RetryEngine::new(
        RetryPolicy::new(3, Duration::from_secs(1)),
        transport.clone(),
    ));
    let pool = WorkerPool::start(1, &queue, engine, observer).unwrap();

    let blocking = queue.submitter(BackpressurePolicy::Block);
    let rejecting = queue.submitter(BackpressurePolicy::Reject);

    let start = Instant::now();
    blocking.submit(message("first")).await.unwrap();
    while transport.calls() == 0 {
        tokio::task::yield_now().await;
    }
    blocking.submit(message("second")).await.unwrap();

    assert_eq!(
        rejecting.submit(message("extra")).await,
        Err(QueueError::Full)
    );

    let waiting = tokio::spawn({
        let blocking = blocking.clone();
        async move { blocking.submit(message("third")).await }
    });
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!waiting.is_finished());

    // The slot frees once the first job has spent all four attempts
    waiting.await.unwrap().unwrap();
    assert!(start.elapsed() >= Duration::from_secs(3));

    let first = reports.recv().await.unwrap();
    assert_eq!(first.attempts, 4);
    assert!(matches!(first.outcome, DeliveryOutcome::Failed(_)));

    pool.shutdown(Duration::from_secs(30)).await.unwrap();
    assert_eq!(transport.calls(), 12);
}

#[tokio::test(start_paused = true)]
async fn shutdown_drains_queued_jobs() {
    let transport = ScriptedTransport::new(Script::FailTimes(1));
    let (observer, mut reports) = ChannelObserver::new();
    let dispatcher =
        Dispatcher::start_with_observer(config(2, 10), transport.clone(), observer).unwrap();
    let submitter = dispatcher.submitter();

    for i in 0..6 {
        submitter.submit(message(format!("job {i}"))).await.unwrap();
    }

    dispatcher.shutdown().await.unwrap();

    assert_eq!(submitter.submit(message("late")).await, Err(QueueError::Closed));
    assert_eq!(transport.calls(), 7);

    let mut delivered = 0;
    while let Ok(report) = reports.try_recv() {
        assert!(report.is_delivered());
        delivered += 1;
    }
    assert_eq!(delivered, 6);
}

#[tokio::test(start_paused = true)]
async fn shutdown_timeout_cancels_and_drops() {
    let transport = ScriptedTransport::new(Script::AlwaysFail(FailureKind::Transient));
    let (observer, mut reports) = ChannelObserver::new();

    let queue = DispatchQueue::bounded(10);
    let engine = Arc::new(RetryEngine::new(
        RetryPolicy::new(3, Duration::from_secs(5)),
        transport.clone(),
    ));
    let pool = WorkerPool::start(1, &queue, engine, observer).unwrap();
    let submitter = queue.submitter(BackpressurePolicy::Block);

    for i in 0..3 {
        submitter.submit(message(format!("job {i}"))).await.unwrap();
    }

    let err = pool.shutdown(Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::ShutdownTimeout { dropped: 2, .. }
    ));

    let report = reports.recv().await.unwrap();
    assert!(matches!(report.outcome, DeliveryOutcome::Cancelled));
    assert_eq!(report.attempts, 1);
    assert_eq!(transport.calls(), 1);
    assert!(queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn interrupted_shutdown_cancels_without_waiting_for_the_timeout() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = ScriptedTransport::gated(Script::AlwaysSucceed, Arc::clone(&gate));
    let (observer, mut reports) = ChannelObserver::new();

    let queue = DispatchQueue::bounded(10);
    let engine = Arc::new(RetryEngine::new(RetryPolicy::default(), transport.clone()));
    let pool = WorkerPool::start(1, &queue, engine, observer).unwrap();
    let submitter = queue.submitter(BackpressurePolicy::Block);

    for i in 0..3 {
        submitter.submit(message(format!("job {i}"))).await.unwrap();
    }
    while transport.calls() == 0 {
        tokio::task::yield_now().await;
    }

    let (interrupt, interrupted) = tokio::sync::oneshot::channel::<()>();
    let shutdown = tokio::spawn(pool.shutdown_or_cancel(Duration::from_secs(30), async move {
        let _ = interrupted.await;
    }));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!shutdown.is_finished());

    let start = Instant::now();
    interrupt.send(()).unwrap();
    let err = shutdown.await.unwrap().unwrap_err();

    assert!(matches!(
        err,
        DispatchError::ShutdownInterrupted { dropped: 2 }
    ));
    assert!(start.elapsed() < Duration::from_secs(29));

    let report = reports.recv().await.unwrap();
    assert!(matches!(report.outcome, DeliveryOutcome::Cancelled));
    assert_eq!(transport.calls(), 1);
    assert!(queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn panicking_transport_fails_the_job_not_the_worker() {
    let transport = ScriptedTransport::new(Script::Panic);
    let (observer, mut reports) = ChannelObserver::new();
    let config = DispatchConfig {
        retry_delay_secs: 1,
        ..config(1, 2)
    };
    let dispatcher =
        Dispatcher::start_with_observer(config, transport.clone(), observer).unwrap();

    // More jobs than the queue holds, so the last submit needs the worker alive
    for i in 0..4 {
        timeout(Duration::from_secs(60), dispatcher.submit(message(format!("job {i}"))))
            .await
            .expect("worker stopped taking jobs")
            .unwrap();
    }

    for _ in 0..4 {
        let report = reports.recv().await.unwrap();
        assert_eq!(report.attempts, 4);
        match report.outcome {
            DeliveryOutcome::Failed(error) => assert_eq!(error.kind(), FailureKind::Unknown),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    dispatcher.shutdown().await.unwrap();
    assert_eq!(transport.calls(), 16);
}

#[tokio::test]
async fn worker_panics_are_reported_with_dropped_jobs() {
    let transport = ScriptedTransport::new(Script::AlwaysSucceed);
    let queue = DispatchQueue::bounded(10);
    let engine = Arc::new(RetryEngine::new(RetryPolicy::default(), transport.clone()));
    let pool = WorkerPool::start(1, &queue, engine, Arc::new(PanickingObserver)).unwrap();
    let submitter = queue.submitter(BackpressurePolicy::Block);

    for i in 0..3 {
        submitter.submit(message(format!("job {i}"))).await.unwrap();
    }

    let err = pool.shutdown(Duration::from_secs(30)).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::WorkerPanic {
            count: 1,
            dropped: 2
        }
    ));
    assert_eq!(transport.calls(), 1);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let transport = ScriptedTransport::new(Script::AlwaysSucceed);
    let result = Dispatcher::start(config(0, 10), transport);
    assert!(matches!(result, Err(DispatchError::InvalidConfig(_))));
}
