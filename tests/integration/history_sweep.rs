//! Integration tests for the rate-limited per-resource history sweep

use std::sync::Arc;
use std::time::Duration;

use market_history_sync::ban::BanReason;
use market_history_sync::fetcher::{FetchOutcome, FetcherError};
use market_history_sync::persist::MarketStore;
use market_history_sync::sync::config::MARKET_HISTORY_CLASS;
use market_history_sync::sync::{SyncError, SyncTask, TaskRun};
use rust_decimal::Decimal;

use crate::support::{self, observation, test_policy, CancelOnFetch, ScriptedFetcher};

#[tokio::test]
async fn test_full_queue_completes_and_persists_every_record() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script_history(
        34,
        Ok(FetchOutcome::Success(vec![observation(
            "2026-08-01", "5.10", 12,
        )])),
    );
    fetcher.script_history(
        35,
        Ok(FetchOutcome::Success(vec![observation(
            "2026-08-01", "11.80", 4,
        )])),
    );
    fetcher.script_history(
        36,
        Ok(FetchOutcome::Success(vec![observation(
            "2026-08-02", "43.25", 9,
        )])),
    );
    let rig = support::rig(fetcher.clone(), test_policy()).await;

    let task = SyncTask::history(10000002, vec![34, 35, 36], 3);
    let run = rig.executor.run_task(task).await;

    match run {
        TaskRun::Completed(task) => {
            assert_eq!(task.remaining(), 0);
            assert_eq!(task.attempts, 0);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(fetcher.history_calls(), 3);
    assert!(rig.scheduler.released().is_empty());
    assert_eq!(rig.store.history_count(10000002).await.unwrap(), 3);

    let record = rig.store.history(10000002, 36).await.unwrap().unwrap();
    assert_eq!(record.observed_at, Some("2026-08-02".parse().unwrap()));
    assert_eq!(record.order_count, 9);
}

#[tokio::test]
async fn test_not_found_bans_resource_without_writing_a_record() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script_history(44992, Ok(FetchOutcome::NotFound { status: 404 }));
    let rig = support::rig(fetcher.clone(), test_policy()).await;

    let task = SyncTask::history(10000002, vec![44992], 3);
    let run = rig.executor.run_task(task).await;

    match run {
        TaskRun::Completed(task) => {
            assert_eq!(task.remaining(), 0);
            assert_eq!(task.attempts, 0, "a 404 must not consume retry budget");
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert!(rig.bans.is_banned(10000002, 44992).await.unwrap());
    assert!(rig.store.history(10000002, 44992).await.unwrap().is_none());
    assert_eq!(rig.store.history_count(10000002).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_release_keeps_queue_intact() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let mut policy = test_policy();
    policy.rate_ceiling = 1;
    let rig = support::rig(fetcher.clone(), policy.clone()).await;

    // Spend the window's only slot so the sweep is throttled before any fetch.
    assert!(rig
        .limiter
        .try_acquire(MARKET_HISTORY_CLASS, policy.rate_ceiling, policy.rate_window)
        .await
        .unwrap()
        .is_admitted());

    let task = SyncTask::history(10000002, vec![603, 604], 3);
    let run = rig.executor.run_task(task).await;

    assert!(matches!(run, TaskRun::Released { .. }));
    assert_eq!(fetcher.history_calls(), 0);

    let released = rig.scheduler.released();
    assert_eq!(released.len(), 1);
    let (released_task, delay) = &released[0];
    assert_eq!(released_task.remaining(), 2);
    assert_eq!(released_task.peek_id(), Some(603));
    assert_eq!(released_task.attempts, 0, "throttle must not consume budget");
    assert_eq!(*delay, Duration::from_secs(60));
}

#[tokio::test]
async fn test_transient_failures_consume_budget_then_fail_fatally() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    for _ in 0..3 {
        fetcher.script_history(
            17865,
            Ok(FetchOutcome::Retryable {
                reason: "HTTP 503".to_string(),
            }),
        );
    }
    let rig = support::rig(fetcher.clone(), test_policy()).await;

    let task = SyncTask::history(10000002, vec![17865, 34], 3);

    let first = rig.executor.run_task(task).await;
    assert!(matches!(first, TaskRun::Released { .. }));
    let (after_first, delay) = rig.scheduler.released()[0].clone();
    assert_eq!(after_first.attempts, 1);
    assert_eq!(delay, Duration::from_secs(60));

    let second = rig.executor.run_task(after_first).await;
    assert!(matches!(second, TaskRun::Released { .. }));
    let (after_second, _) = rig.scheduler.released()[1].clone();
    assert_eq!(after_second.attempts, 2);

    let third = rig.executor.run_task(after_second).await;
    match third {
        TaskRun::Failed { task, error } => {
            match error {
                SyncError::RetriesExhausted { attempts, reason } => {
                    assert_eq!(attempts, 3);
                    assert_eq!(reason, "HTTP 503");
                }
                other => panic!("expected exhausted retries, got {other:?}"),
            }
            // The failing id was never resolved, so the queue still holds it.
            assert_eq!(task.remaining(), 2);
            assert_eq!(task.peek_id(), Some(17865));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(fetcher.history_calls(), 3);
    assert_eq!(rig.scheduler.released().len(), 2);
    assert_eq!(rig.store.history_count(10000002).await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancelled_batch_performs_no_fetches() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let rig = support::rig(fetcher.clone(), test_policy()).await;
    rig.batch.cancel();

    let task = SyncTask::history(10000002, vec![34, 35], 3);
    let run = rig.executor.run_task(task).await;

    match run {
        TaskRun::Cancelled(task) => assert_eq!(task.remaining(), 2),
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(fetcher.history_calls(), 0);
}

#[tokio::test]
async fn test_cancellation_lands_between_resources() {
    let fetcher = Arc::new(CancelOnFetch::new());
    let rig = support::rig(fetcher.clone(), test_policy()).await;
    fetcher.arm(Arc::clone(&rig.batch));

    let task = SyncTask::history(10000002, vec![34, 35], 3);
    let run = rig.executor.run_task(task).await;

    match run {
        TaskRun::Cancelled(task) => {
            // The in-flight resource was finished and persisted; the rest stays.
            assert_eq!(task.remaining(), 1);
            assert_eq!(task.peek_id(), Some(35));
        }
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(fetcher.calls(), 1);
    assert!(rig.store.history(10000002, 34).await.unwrap().is_some());
    assert_eq!(rig.store.history_count(10000002).await.unwrap(), 1);
}

#[tokio::test]
async fn test_banned_resource_is_skipped_without_a_fetch() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script_history(
        34,
        Ok(FetchOutcome::Success(vec![observation(
            "2026-08-01", "5.10", 12,
        )])),
    );
    let rig = support::rig(fetcher.clone(), test_policy()).await;
    rig.bans
        .ban(
            10000002,
            604,
            BanReason::NotFound { status: 404 },
            Duration::from_secs(3600),
        )
        .await
        .unwrap();

    let task = SyncTask::history(10000002, vec![604, 34], 3);
    let run = rig.executor.run_task(task).await;

    assert!(matches!(run, TaskRun::Completed(_)));
    assert_eq!(fetcher.history_calls(), 1);
    assert!(rig.store.history(10000002, 604).await.unwrap().is_none());
    assert!(rig.store.history(10000002, 34).await.unwrap().is_some());
}

#[tokio::test]
async fn test_unclassified_error_fails_the_task_hard() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script_history(
        34,
        Err(FetcherError::ApiError {
            status: 403,
            body: "forbidden".to_string(),
        }),
    );
    let rig = support::rig(fetcher.clone(), test_policy()).await;

    let task = SyncTask::history(10000002, vec![34, 35], 3);
    let run = rig.executor.run_task(task).await;

    match run {
        TaskRun::Failed { task, error } => {
            assert!(matches!(
                error,
                SyncError::Fetcher(FetcherError::ApiError { status: 403, .. })
            ));
            // Distinguishable from retry exhaustion: no attempt was counted.
            assert_eq!(task.attempts, 0);
            assert_eq!(task.remaining(), 2);
        }
        other => panic!("expected hard failure, got {other:?}"),
    }
    assert!(rig.scheduler.released().is_empty());
}

#[tokio::test]
async fn test_throttle_consumes_budget_when_policy_enables_it() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let mut policy = test_policy();
    policy.rate_ceiling = 1;
    policy.max_attempts = 1;
    policy.throttle_consumes_retry = true;
    let rig = support::rig(fetcher.clone(), policy.clone()).await;

    assert!(rig
        .limiter
        .try_acquire(MARKET_HISTORY_CLASS, policy.rate_ceiling, policy.rate_window)
        .await
        .unwrap()
        .is_admitted());

    let task = SyncTask::history(10000002, vec![34], 1);
    let run = rig.executor.run_task(task).await;

    match run {
        TaskRun::Failed { error, .. } => match error {
            SyncError::RetriesExhausted { attempts, reason } => {
                assert_eq!(attempts, 1);
                assert_eq!(reason, "rate window throttled");
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        },
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(rig.scheduler.released().is_empty());
    assert_eq!(fetcher.history_calls(), 0);
}

#[tokio::test]
async fn test_unsampled_response_persists_the_neutral_record() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script_history(
        34,
        Ok(FetchOutcome::Success(vec![observation(
            "2026-08-01", "5.10", 0,
        )])),
    );
    let rig = support::rig(fetcher.clone(), test_policy()).await;

    let task = SyncTask::history(10000002, vec![34], 3);
    let run = rig.executor.run_task(task).await;

    assert!(matches!(run, TaskRun::Completed(_)));
    let record = rig.store.history(10000002, 34).await.unwrap().unwrap();
    assert!(!record.has_observation());
    assert_eq!(record.average, Decimal::ZERO);
    assert_eq!(record.order_count, 0);
}

#[tokio::test]
async fn test_latest_sampled_day_wins_over_newer_unsampled_day() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script_history(
        34,
        Ok(FetchOutcome::Success(vec![
            observation("2026-08-01", "5.10", 12),
            observation("2026-08-03", "5.45", 7),
            observation("2026-08-04", "5.60", 0),
        ])),
    );
    let rig = support::rig(fetcher.clone(), test_policy()).await;

    let task = SyncTask::history(10000002, vec![34], 3);
    rig.executor.run_task(task).await;

    let record = rig.store.history(10000002, 34).await.unwrap().unwrap();
    assert_eq!(record.observed_at, Some("2026-08-03".parse().unwrap()));
    assert_eq!(record.order_count, 7);
    assert_eq!(record.average, "5.45".parse::<Decimal>().unwrap());
}

#[tokio::test]
async fn test_resync_overwrites_the_existing_record() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script_history(
        34,
        Ok(FetchOutcome::Success(vec![observation(
            "2026-08-01", "5.10", 12,
        )])),
    );
    fetcher.script_history(
        34,
        Ok(FetchOutcome::Success(vec![observation(
            "2026-08-02", "5.30", 20,
        )])),
    );
    let rig = support::rig(fetcher.clone(), test_policy()).await;

    rig.executor
        .run_task(SyncTask::history(10000002, vec![34], 3))
        .await;
    rig.executor
        .run_task(SyncTask::history(10000002, vec![34], 3))
        .await;

    assert_eq!(rig.store.history_count(10000002).await.unwrap(), 1);
    let record = rig.store.history(10000002, 34).await.unwrap().unwrap();
    assert_eq!(record.observed_at, Some("2026-08-02".parse().unwrap()));
    assert_eq!(record.order_count, 20);
}
