use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use payroll_throttle::{
    ConfigUpdate, RejectReason, SubmitError, ThrottleConfig, ThrottleError, ThrottleEvent,
    Throttler,
};
use tokio::sync::oneshot;
use tokio::time::{advance, Instant};
use tokio_test::{assert_pending, task};

fn throttler(rate_per_minute: u32, max_queue_size: u32, refill_interval_ms: u64) -> Throttler {
    Throttler::new(ThrottleConfig::new(rate_per_minute, max_queue_size, refill_interval_ms).unwrap())
        .unwrap()
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

fn recorder(
    log: &Arc<Mutex<Vec<&'static str>>>,
    name: &'static str,
) -> impl FnOnce() -> std::future::Ready<Result<&'static str, String>> {
    let log = log.clone();
    move || {
        log.lock().unwrap().push(name);
        std::future::ready(Ok(name))
    }
}

#[tokio::test(start_paused = true)]
async fn test_fresh_instance_reports_full_bucket() {
    for rate in [1, 60, 250] {
        let throttler = throttler(rate, 10, 1000);
        let status = throttler.status();
        assert_eq!(status.current_tokens, rate);
        assert_eq!(status.max_tokens, rate);
        assert_eq!(status.rate_per_minute, rate);
        throttler.stop();
    }
}

#[tokio::test(start_paused = true)]
async fn test_immediate_submission_uses_callers_result() {
    let throttler = throttler(10, 5, 1000);
    let mut events = throttler.subscribe();

    let value = throttler
        .submit("tx-1", || async { Ok::<_, String>(41 + 1) }, false)
        .await
        .unwrap();

    assert_eq!(value, 42);
    let status = throttler.status();
    assert_eq!(status.current_tokens, 9);
    assert_eq!(status.processed_count, 1);
    assert_eq!(
        events.try_recv().unwrap(),
        ThrottleEvent::Processed {
            id: "tx-1".to_string(),
            success: true,
            immediate: true,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_immediate_work_runs_even_if_outcome_is_dropped() {
    let throttler = throttler(5, 5, 60_000);
    let invoked = Arc::new(AtomicBool::new(false));
    let flag = invoked.clone();

    drop(throttler.submit(
        "tx-dropped",
        move || async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<_, String>(())
        },
        false,
    ));
    settle().await;

    assert!(invoked.load(Ordering::SeqCst));
    let status = throttler.status();
    assert_eq!(status.current_tokens, 4);
    assert_eq!(status.processed_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_immediate_failure_is_forwarded_verbatim() {
    let throttler = throttler(10, 5, 1000);

    let err = throttler
        .submit("tx-1", || async { Err::<(), _>("tx_bad_seq".to_string()) }, false)
        .await
        .unwrap_err();

    assert_eq!(err.into_failure().as_deref(), Some("tx_bad_seq"));
    assert_eq!(throttler.status().processed_count, 1);
    assert_eq!(throttler.status().rejected_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_bucket_queues_and_stays_pending() {
    let throttler = throttler(1, 5, 60_000);
    throttler
        .submit("first", || async { Ok::<_, String>(()) }, false)
        .await
        .unwrap();

    let mut events = throttler.subscribe();
    let mut queued = task::spawn(throttler.submit("second", || async { Ok::<_, String>(2) }, false));

    assert_eq!(throttler.queue_length(), 1);
    assert_pending!(queued.poll());
    settle().await;
    assert_pending!(queued.poll());
    assert_eq!(
        events.try_recv().unwrap(),
        ThrottleEvent::Queued {
            id: "second".to_string(),
            queue_position: 1,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_full_queue_rejects_without_invoking_work() {
    let throttler = throttler(1, 1, 60_000);
    throttler
        .submit("a", || async { Ok::<_, String>(()) }, false)
        .await
        .unwrap();
    let _queued = throttler.submit("b", || async { Ok::<_, String>(()) }, false);

    let mut events = throttler.subscribe();
    let invoked = Arc::new(AtomicBool::new(false));
    let flag = invoked.clone();
    let err = throttler
        .submit(
            "c",
            move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, String>(())
            },
            false,
        )
        .await
        .unwrap_err();

    assert_eq!(err.rejection(), Some(&ThrottleError::QueueFull));
    assert!(!invoked.load(Ordering::SeqCst));
    assert_eq!(throttler.status().rejected_count, 1);
    assert_eq!(
        events.try_recv().unwrap(),
        ThrottleEvent::Rejected {
            id: "c".to_string(),
            reason: RejectReason::QueueFull,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_priority_runs_before_earlier_normal_item() {
    let throttler = throttler(1, 10, 1000);
    let log = Arc::new(Mutex::new(Vec::new()));
    throttler.submit("warmup", recorder(&log, "warmup"), false).await.unwrap();

    let normal = throttler.submit("normal", recorder(&log, "normal"), false);
    let priority = throttler.submit("priority", recorder(&log, "priority"), true);

    advance(Duration::from_millis(1000)).await;
    assert_eq!(priority.await.unwrap(), "priority");
    assert_eq!(normal.await.unwrap(), "normal");

    assert_eq!(*log.lock().unwrap(), vec!["warmup", "priority", "normal"]);
}

#[tokio::test(start_paused = true)]
async fn test_queued_event_reports_priority_position() {
    let throttler = throttler(1, 10, 60_000);
    throttler
        .submit("warmup", || async { Ok::<_, String>(()) }, false)
        .await
        .unwrap();
    let mut events = throttler.subscribe();

    let _n = throttler.submit("n", || async { Ok::<_, String>(()) }, false);
    let _p = throttler.submit("p", || async { Ok::<_, String>(()) }, true);
    let _n2 = throttler.submit("n2", || async { Ok::<_, String>(()) }, false);
    let _p2 = throttler.submit("p2", || async { Ok::<_, String>(()) }, true);

    let positions: Vec<(String, usize)> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|event| match event {
            ThrottleEvent::Queued { id, queue_position } => Some((id, queue_position)),
            _ => None,
        })
        .collect();
    assert_eq!(
        positions,
        vec![
            ("n".to_string(), 1),
            ("p".to_string(), 1),
            ("n2".to_string(), 3),
            ("p2".to_string(), 2),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_same_priority_preserves_arrival_order() {
    let throttler = throttler(1, 10, 1000);
    let log = Arc::new(Mutex::new(Vec::new()));
    throttler.submit("warmup", recorder(&log, "warmup"), false).await.unwrap();

    let first = throttler.submit("first", recorder(&log, "first"), false);
    let second = throttler.submit("second", recorder(&log, "second"), false);
    let p1 = throttler.submit("p1", recorder(&log, "p1"), true);
    let p2 = throttler.submit("p2", recorder(&log, "p2"), true);

    second.await.unwrap();
    first.await.unwrap();
    p1.await.unwrap();
    p2.await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["warmup", "p1", "p2", "first", "second"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_rate_update_clamps_tokens() {
    let throttler = throttler(10, 10, 60_000);
    for i in 0..3 {
        throttler
            .submit(format!("tx-{i}"), || async { Ok::<_, String>(()) }, false)
            .await
            .unwrap();
    }
    assert_eq!(throttler.status().current_tokens, 7);

    let mut events = throttler.subscribe();
    let config = throttler
        .update_config(ConfigUpdate::default().rate_per_minute(5))
        .unwrap();

    assert_eq!(config.rate_per_minute, 5);
    assert_eq!(throttler.config().rate_per_minute, 5);
    assert_eq!(throttler.status().current_tokens, 5);
    assert_eq!(throttler.status().max_tokens, 5);
    assert_eq!(
        events.try_recv().unwrap(),
        ThrottleEvent::ConfigUpdated { config }
    );

    throttler
        .update_config(ConfigUpdate::default().rate_per_minute(20))
        .unwrap();
    assert_eq!(throttler.status().current_tokens, 5);
    assert_eq!(throttler.status().max_tokens, 20);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_update_is_rejected() {
    let throttler = throttler(10, 10, 1000);
    let result = throttler.update_config(ConfigUpdate::default().max_queue_size(0));
    assert!(matches!(result, Err(ThrottleError::InvalidConfig(_))));
    assert_eq!(throttler.config().max_queue_size, 10);
}

#[tokio::test(start_paused = true)]
async fn test_refill_interval_change_restarts_timer() {
    let throttler = throttler(1, 10, 60_000);
    throttler
        .submit("a", || async { Ok::<_, String>(()) }, false)
        .await
        .unwrap();
    let queued = throttler.submit("b", || async { Ok::<_, String>("b") }, false);

    let start = Instant::now();
    throttler
        .update_config(ConfigUpdate::default().refill_interval_ms(50))
        .unwrap();
    assert_eq!(throttler.status().current_tokens, 0);

    assert_eq!(queued.await.unwrap(), "b");
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_clear_queue_rejects_every_item() {
    let throttler = throttler(1, 10, 60_000);
    throttler
        .submit("a", || async { Ok::<_, String>(()) }, false)
        .await
        .unwrap();

    let pending: Vec<_> = (0..3)
        .map(|i| throttler.submit(format!("q-{i}"), || async { Ok::<_, String>(()) }, i == 1))
        .collect();
    let mut events = throttler.subscribe();

    assert_eq!(throttler.clear_queue(), 3);
    assert_eq!(throttler.queue_length(), 0);
    assert_eq!(throttler.status().rejected_count, 3);

    for outcome in pending {
        let err = outcome.await.unwrap_err();
        assert_eq!(err.rejection(), Some(&ThrottleError::QueueCleared));
    }
    for _ in 0..3 {
        assert!(matches!(
            events.try_recv().unwrap(),
            ThrottleEvent::Rejected {
                reason: RejectReason::QueueCleared,
                ..
            }
        ));
    }
    assert_eq!(throttler.clear_queue(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_has_capacity() {
    let throttler = throttler(1, 1, 60_000);
    assert!(throttler.has_capacity());

    throttler
        .submit("a", || async { Ok::<_, String>(()) }, false)
        .await
        .unwrap();
    // No tokens, but the queue has room.
    assert!(throttler.has_capacity());

    let _queued = throttler.submit("b", || async { Ok::<_, String>(()) }, false);
    assert!(!throttler.has_capacity());
}

#[tokio::test(start_paused = true)]
async fn test_queued_failure_goes_to_submitter_only() {
    let throttler = throttler(1, 5, 1000);
    throttler
        .submit("a", || async { Ok::<_, String>(()) }, false)
        .await
        .unwrap();
    let mut events = throttler.subscribe();

    let failing = throttler.submit(
        "b",
        || async { Err::<(), _>("insufficient balance".to_string()) },
        false,
    );
    let ok = throttler.submit("c", || async { Ok::<_, String>("c") }, false);

    match failing.await {
        Err(SubmitError::Failed(message)) => assert_eq!(message, "insufficient balance"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(ok.await.unwrap(), "c");

    let status = throttler.status();
    assert_eq!(status.processed_count, 3);
    assert_eq!(status.rejected_count, 0);

    let received: Vec<ThrottleEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(received.contains(&ThrottleEvent::Failed {
        id: "b".to_string(),
        error: "insufficient balance".to_string(),
    }));
    assert!(received.contains(&ThrottleEvent::Processed {
        id: "c".to_string(),
        success: true,
        immediate: false,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_rate_one_queue_two_scenario() {
    let throttler = throttler(1, 2, 1000);

    let a = throttler
        .submit("A", || async { Ok::<_, String>("A") }, false)
        .await
        .unwrap();
    assert_eq!(a, "A");
    assert_eq!(throttler.status().current_tokens, 0);

    let b = throttler.submit("B", || async { Ok::<_, String>("B") }, false);
    let c = throttler.submit("C", || async { Ok::<_, String>("C") }, false);
    assert_eq!(throttler.queue_length(), 2);

    let d = throttler.submit("D", || async { Ok::<_, String>("D") }, false);
    assert_eq!(
        d.await.unwrap_err().rejection(),
        Some(&ThrottleError::QueueFull)
    );
    assert_eq!(throttler.status().rejected_count, 1);

    let mut b = task::spawn(b);
    assert_pending!(b.poll());

    advance(Duration::from_millis(1000)).await;
    assert_eq!(b.into_inner().await.unwrap(), "B");
    assert_eq!(throttler.queue_length(), 1);

    assert_eq!(c.await.unwrap(), "C");
    assert_eq!(throttler.queue_length(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_item_does_not_block_inspection() {
    let throttler = throttler(1, 10, 1000);
    throttler
        .submit("a", || async { Ok::<_, String>("a") }, false)
        .await
        .unwrap();

    let (release, released) = oneshot::channel::<()>();
    let slow = throttler.submit(
        "slow",
        move || async move {
            let _ = released.await;
            Ok::<_, String>("slow")
        },
        false,
    );
    let next = throttler.submit("next", || async { Ok::<_, String>("next") }, false);

    advance(Duration::from_millis(1000)).await;
    settle().await;

    let status = throttler.status();
    assert!(status.is_processing);
    assert_eq!(status.queue_size, 1);

    throttler
        .update_config(ConfigUpdate::default().max_queue_size(20))
        .unwrap();
    assert_eq!(throttler.status().max_queue_size, 20);

    let late = throttler.submit("late", || async { Ok::<_, String>("late") }, false);
    assert_eq!(throttler.queue_length(), 2);

    assert_eq!(throttler.clear_queue(), 2);
    assert_eq!(
        next.await.unwrap_err().rejection(),
        Some(&ThrottleError::QueueCleared)
    );
    assert_eq!(
        late.await.unwrap_err().rejection(),
        Some(&ThrottleError::QueueCleared)
    );

    release.send(()).unwrap();
    assert_eq!(slow.await.unwrap(), "slow");
}

#[tokio::test(start_paused = true)]
async fn test_stop_flushes_queue_and_cancels_refill() {
    let throttler = throttler(1, 10, 1000);
    throttler
        .submit("a", || async { Ok::<_, String>(()) }, false)
        .await
        .unwrap();
    let queued = throttler.submit("b", || async { Ok::<_, String>(()) }, false);

    throttler.stop();
    assert_eq!(
        queued.await.unwrap_err().rejection(),
        Some(&ThrottleError::QueueCleared)
    );

    advance(Duration::from_secs(10)).await;
    settle().await;
    assert_eq!(throttler.status().current_tokens, 0);
    assert!(throttler.is_stopped());
}
