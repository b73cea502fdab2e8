//! End-to-end tests wiring the executor into the in-process scheduler

use std::sync::Arc;
use std::time::Duration;

use market_history_sync::ban::{BanRegistry, InMemoryTtlStore};
use market_history_sync::fetcher::{FetchOutcome, FetcherError, MarketDataFetcher};
use market_history_sync::limit::{InMemoryWindowStore, RateLimiter};
use market_history_sync::persist::{MarketStore, SqliteMarketStore};
use market_history_sync::sync::{
    BatchState, InProcessScheduler, RunReport, SharedBatch, SyncError, SyncExecutor, SyncPolicy,
    SyncTask, TaskScheduler,
};

use crate::support::{observation, test_policy, ScriptedFetcher};

struct Pipeline {
    scheduler: InProcessScheduler,
    executor: Arc<SyncExecutor>,
    store: Arc<SqliteMarketStore>,
    batch: SharedBatch,
}

async fn pipeline(fetcher: Arc<dyn MarketDataFetcher>, policy: SyncPolicy) -> Pipeline {
    let batch = BatchState::shared("batch-1");
    let scheduler = InProcessScheduler::new(Arc::clone(&batch), policy.workers);
    let store = Arc::new(SqliteMarketStore::in_memory().await.unwrap());

    let store_port: Arc<dyn MarketStore> = Arc::clone(&store) as Arc<dyn MarketStore>;
    let executor = Arc::new(
        SyncExecutor::new(
            RateLimiter::new(Arc::new(InMemoryWindowStore::new())),
            BanRegistry::new(Arc::new(InMemoryTtlStore::new())),
            fetcher,
            store_port,
            Arc::new(scheduler.handle()),
            policy,
        )
        .with_batch(Arc::clone(&batch)),
    );

    Pipeline {
        scheduler,
        executor,
        store,
        batch,
    }
}

async fn drain(scheduler: InProcessScheduler, executor: Arc<SyncExecutor>) -> RunReport {
    scheduler
        .run(move |task| {
            let executor = Arc::clone(&executor);
            async move { executor.run_task(task).await }
        })
        .await
}

#[tokio::test(start_paused = true)]
async fn test_released_task_is_redelivered_until_complete() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script_history(
        34,
        Ok(FetchOutcome::Retryable {
            reason: "HTTP 503".to_string(),
        }),
    );
    fetcher.script_history(
        34,
        Ok(FetchOutcome::Success(vec![observation(
            "2026-08-01", "5.10", 12,
        )])),
    );
    let p = pipeline(fetcher.clone(), test_policy()).await;

    p.batch.register_tasks(1);
    p.scheduler
        .handle()
        .enqueue(SyncTask::history(10000002, vec![34], 3), Duration::ZERO)
        .await
        .unwrap();

    let report = drain(p.scheduler, p.executor).await;

    assert_eq!(report.completed.len(), 1);
    assert!(report.is_clean());
    assert_eq!(fetcher.history_calls(), 2);
    assert!(p.store.history(10000002, 34).await.unwrap().is_some());
    assert_eq!(p.batch.progress(), (1, 1));
}

#[tokio::test]
async fn test_batch_cancel_settles_all_tasks_without_fetching() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let p = pipeline(fetcher.clone(), test_policy()).await;

    p.batch.register_tasks(2);
    p.scheduler
        .handle()
        .enqueue(SyncTask::history(10000002, vec![34], 3), Duration::ZERO)
        .await
        .unwrap();
    p.scheduler
        .handle()
        .enqueue(SyncTask::history(10000002, vec![35], 3), Duration::ZERO)
        .await
        .unwrap();
    p.batch.cancel();

    let report = drain(p.scheduler, p.executor).await;

    assert_eq!(report.cancelled.len(), 2);
    assert!(report.completed.is_empty());
    assert_eq!(fetcher.history_calls(), 0);
    assert_eq!(p.batch.progress(), (2, 2));
}

#[tokio::test]
async fn test_worker_pool_completes_many_tasks() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    for type_id in [34u32, 35, 36] {
        fetcher.script_history(
            type_id,
            Ok(FetchOutcome::Success(vec![observation(
                "2026-08-01", "5.10", 12,
            )])),
        );
    }
    let mut policy = test_policy();
    policy.workers = 2;
    let p = pipeline(fetcher.clone(), policy).await;

    p.batch.register_tasks(3);
    for type_id in [34u32, 35, 36] {
        p.scheduler
            .handle()
            .enqueue(
                SyncTask::history(10000002, vec![type_id], 3),
                Duration::ZERO,
            )
            .await
            .unwrap();
    }

    let report = drain(p.scheduler, p.executor).await;

    assert_eq!(report.completed.len(), 3);
    assert!(report.is_clean());
    assert_eq!(p.store.history_count(10000002).await.unwrap(), 3);
}

#[tokio::test]
async fn test_mixed_outcomes_settle_into_their_buckets() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script_history(
        34,
        Ok(FetchOutcome::Success(vec![observation(
            "2026-08-01", "5.10", 12,
        )])),
    );
    fetcher.script_history(
        35,
        Err(FetcherError::ApiError {
            status: 403,
            body: "forbidden".to_string(),
        }),
    );
    let p = pipeline(fetcher.clone(), test_policy()).await;

    p.batch.register_tasks(2);
    p.scheduler
        .handle()
        .enqueue(SyncTask::history(10000002, vec![34], 3), Duration::ZERO)
        .await
        .unwrap();
    p.scheduler
        .handle()
        .enqueue(SyncTask::history(10000002, vec![35], 3), Duration::ZERO)
        .await
        .unwrap();

    let report = drain(p.scheduler, p.executor).await;

    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert!(!report.is_clean());

    let (failed_task, error) = &report.failed[0];
    assert!(matches!(error, SyncError::Fetcher(_)));
    assert_eq!(failed_task.remaining(), 1);
    assert_eq!(failed_task.peek_id(), Some(35));
}
