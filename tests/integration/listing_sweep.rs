//! Integration tests for the full-pagination listing sweep

use std::sync::Arc;
use std::time::Duration;

use market_history_sync::fetcher::FetchOutcome;
use market_history_sync::persist::MarketStore;
use market_history_sync::sync::config::MAX_LISTING_PAGES;
use market_history_sync::sync::{SyncError, SyncTask, TaskKind, TaskRun};

use crate::support::{self, listing_page, test_policy, ScriptedFetcher};

#[tokio::test]
async fn test_single_page_listing_performs_exactly_one_fetch() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script_listing(1, Ok(FetchOutcome::Success(listing_page(vec![34, 35], 1, 1))));
    let rig = support::rig(fetcher.clone(), test_policy()).await;

    let task = SyncTask::listing(10000002, 3);
    let run = rig.executor.run_task(task).await;

    match run {
        TaskRun::Completed(task) => {
            assert_eq!(task.kind, TaskKind::Listing { next_page: 1 });
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(fetcher.listing_calls(), 1);

    let listings = rig.store.listings(10000002).await.unwrap();
    let types: Vec<u32> = listings.iter().map(|entry| entry.type_id).collect();
    assert_eq!(types, vec![34, 35]);
}

#[tokio::test]
async fn test_multi_page_listing_fetches_exactly_the_reported_total() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script_listing(1, Ok(FetchOutcome::Success(listing_page(vec![34, 35], 1, 3))));
    fetcher.script_listing(2, Ok(FetchOutcome::Success(listing_page(vec![36], 2, 3))));
    fetcher.script_listing(3, Ok(FetchOutcome::Success(listing_page(vec![37, 38], 3, 3))));
    let rig = support::rig(fetcher.clone(), test_policy()).await;

    let task = SyncTask::listing(10000002, 3);
    let run = rig.executor.run_task(task).await;

    match run {
        TaskRun::Completed(task) => {
            // The cursor stops on the last page instead of advancing past it.
            assert_eq!(task.kind, TaskKind::Listing { next_page: 3 });
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(fetcher.listing_calls(), 3);

    let listings = rig.store.listings(10000002).await.unwrap();
    let types: Vec<u32> = listings.iter().map(|entry| entry.type_id).collect();
    assert_eq!(types, vec![34, 35, 36, 37, 38]);
}

#[tokio::test]
async fn test_retryable_page_resumes_from_the_same_page() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script_listing(1, Ok(FetchOutcome::Success(listing_page(vec![34], 1, 2))));
    fetcher.script_listing(
        2,
        Ok(FetchOutcome::Retryable {
            reason: "HTTP 503".to_string(),
        }),
    );
    fetcher.script_listing(2, Ok(FetchOutcome::Success(listing_page(vec![35], 2, 2))));
    let rig = support::rig(fetcher.clone(), test_policy()).await;

    let first = rig.executor.run_task(SyncTask::listing(10000002, 3)).await;
    assert!(matches!(first, TaskRun::Released { .. }));

    let (released_task, delay) = rig.scheduler.released()[0].clone();
    assert_eq!(released_task.kind, TaskKind::Listing { next_page: 2 });
    assert_eq!(released_task.attempts, 1);
    assert_eq!(delay, Duration::from_secs(60));

    let second = rig.executor.run_task(released_task).await;
    assert!(matches!(second, TaskRun::Completed(_)));
    assert_eq!(fetcher.listing_calls(), 3);

    let listings = rig.store.listings(10000002).await.unwrap();
    let types: Vec<u32> = listings.iter().map(|entry| entry.type_id).collect();
    assert_eq!(types, vec![34, 35]);
}

#[tokio::test]
async fn test_missing_listing_fails_the_task_fatally() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script_listing(1, Ok(FetchOutcome::NotFound { status: 404 }));
    let rig = support::rig(fetcher.clone(), test_policy()).await;

    let run = rig.executor.run_task(SyncTask::listing(10000002, 3)).await;

    match run {
        TaskRun::Failed { error, .. } => {
            assert!(matches!(
                error,
                SyncError::ListingMissing {
                    region_id: 10000002,
                    status: 404
                }
            ));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(rig.store.listings(10000002).await.unwrap().is_empty());
    assert!(rig.scheduler.released().is_empty());
}

#[tokio::test]
async fn test_pagination_runaway_aborts_before_persisting() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script_listing(
        1,
        Ok(FetchOutcome::Success(listing_page(
            vec![34],
            1,
            MAX_LISTING_PAGES + 1,
        ))),
    );
    let rig = support::rig(fetcher.clone(), test_policy()).await;

    let run = rig.executor.run_task(SyncTask::listing(10000002, 3)).await;

    match run {
        TaskRun::Failed { error, .. } => match error {
            SyncError::PaginationOverflow { total_pages, cap } => {
                assert_eq!(total_pages, MAX_LISTING_PAGES + 1);
                assert_eq!(cap, MAX_LISTING_PAGES);
            }
            other => panic!("expected pagination overflow, got {other:?}"),
        },
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(rig.store.listings(10000002).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_batch_listing_performs_no_fetches() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let rig = support::rig(fetcher.clone(), test_policy()).await;
    rig.batch.cancel();

    let run = rig.executor.run_task(SyncTask::listing(10000002, 3)).await;

    assert!(matches!(run, TaskRun::Cancelled(_)));
    assert_eq!(fetcher.listing_calls(), 0);
}
