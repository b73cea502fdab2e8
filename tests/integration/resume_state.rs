//! Integration tests for saving and resuming interrupted sync runs

use std::sync::Arc;

use market_history_sync::fetcher::FetchOutcome;
use market_history_sync::persist::MarketStore;
use market_history_sync::state::{state_path, RunState};
use market_history_sync::sync::{SyncTask, TaskRun};

use crate::support::{self, observation, test_policy, CancelOnFetch, ScriptedFetcher};

#[tokio::test]
async fn test_interrupted_sweep_resumes_where_it_stopped() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = state_path(dir.path(), 10000002);

    // First run: cancelled after the first resource resolves.
    let cancelling = Arc::new(CancelOnFetch::new());
    let first_rig = support::rig(cancelling.clone(), test_policy()).await;
    cancelling.arm(Arc::clone(&first_rig.batch));

    let run = first_rig
        .executor
        .run_task(SyncTask::history(10000002, vec![34, 35, 36], 3))
        .await;
    let interrupted = match run {
        TaskRun::Cancelled(task) => task,
        other => panic!("expected cancellation, got {other:?}"),
    };
    assert_eq!(interrupted.remaining(), 2);

    let mut state = RunState::new("run-1", 10000002);
    state.push_pending(interrupted.clone());
    state.save(&path).unwrap();

    // Second run: the restored task carries exactly the unfinished ids.
    let restored = RunState::load(&path).unwrap().into_pending();
    assert_eq!(restored, vec![interrupted]);

    let fetcher = Arc::new(ScriptedFetcher::new());
    for type_id in [35u32, 36] {
        fetcher.script_history(
            type_id,
            Ok(FetchOutcome::Success(vec![observation(
                "2026-08-02", "5.30", 8,
            )])),
        );
    }
    let second_rig = support::rig(fetcher.clone(), test_policy()).await;

    let resumed = second_rig
        .executor
        .run_task(restored.into_iter().next().unwrap())
        .await;
    assert!(matches!(resumed, TaskRun::Completed(_)));
    assert_eq!(fetcher.history_calls(), 2);
    assert!(second_rig.store.history(10000002, 35).await.unwrap().is_some());
    assert!(second_rig.store.history(10000002, 36).await.unwrap().is_some());
}

#[tokio::test]
async fn test_saved_task_keeps_its_consumed_attempt_budget() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = state_path(dir.path(), 10000002);

    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script_history(
        17865,
        Ok(FetchOutcome::Retryable {
            reason: "HTTP 503".to_string(),
        }),
    );
    let rig = support::rig(fetcher.clone(), test_policy()).await;

    let run = rig
        .executor
        .run_task(SyncTask::history(10000002, vec![17865], 3))
        .await;
    assert!(matches!(run, TaskRun::Released { .. }));
    let (released_task, _) = rig.scheduler.released()[0].clone();
    assert_eq!(released_task.attempts, 1);

    let mut state = RunState::new("run-1", 10000002);
    state.push_pending(released_task.clone());
    state.save(&path).unwrap();

    let restored = &RunState::load(&path).unwrap().into_pending()[0];
    assert_eq!(*restored, released_task);
    assert_eq!(restored.attempts, 1);
    assert_eq!(restored.peek_id(), Some(17865));
}

#[test]
fn test_resume_preserves_task_order_across_kinds() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = state_path(dir.path(), 10000002);

    let listing = SyncTask::listing(10000002, 3);
    let history_a = SyncTask::history(10000002, vec![34, 35], 3);
    let history_b = SyncTask::history(10000002, vec![603], 3);

    let mut state = RunState::new("run-1", 10000002);
    state.push_pending(listing.clone());
    state.push_pending(history_a.clone());
    state.push_pending(history_b.clone());
    state.save(&path).unwrap();

    let restored = RunState::load(&path).unwrap().into_pending();
    assert_eq!(restored, vec![listing, history_a, history_b]);
}
