//! Contract tests for the upstream market data API
//!
//! The ignored tests hit the live upstream and verify the response shapes the
//! fetcher depends on. Run them explicitly with `cargo test -- --ignored`.

use market_history_sync::fetcher::{FetchOutcome, HttpMarketFetcher, MarketDataFetcher};

const LIVE_BASE_URL: &str = "https://esi.evetech.net/latest";

#[tokio::test]
#[ignore] // Requires network access to the live upstream
async fn test_history_endpoint_returns_validated_observations() {
    let fetcher = HttpMarketFetcher::new(LIVE_BASE_URL);

    let outcome = fetcher.history(10000002, 34).await.expect("fetch failed");
    match outcome {
        FetchOutcome::Success(observations) => {
            assert!(
                !observations.is_empty(),
                "history for a liquid type should not be empty"
            );
            for obs in &observations {
                obs.validate()
                    .expect("upstream observation violates price invariants");
            }
        }
        other => panic!("expected success from live upstream, got {other:?}"),
    }
}

#[tokio::test]
#[ignore] // Requires network access to the live upstream
async fn test_listing_endpoint_reports_pagination() {
    let fetcher = HttpMarketFetcher::new(LIVE_BASE_URL);

    let outcome = fetcher
        .listing_page(10000002, 1)
        .await
        .expect("fetch failed");
    match outcome {
        FetchOutcome::Success(listing) => {
            assert_eq!(listing.page, 1);
            assert!(listing.total_pages >= 1);
            assert!(!listing.items.is_empty());
        }
        other => panic!("expected success from live upstream, got {other:?}"),
    }
}

#[tokio::test]
#[ignore] // Requires network access to the live upstream
async fn test_unknown_type_is_classified_not_found() {
    let fetcher = HttpMarketFetcher::new(LIVE_BASE_URL);

    let outcome = fetcher.history(10000002, 2).await.expect("fetch failed");
    assert!(
        matches!(outcome, FetchOutcome::NotFound { status: 404 }),
        "expected a 404 classification for a non-market type, got {outcome:?}"
    );
}

#[tokio::test]
async fn test_connection_failure_is_retryable() {
    // Nothing listens on this port; connection refusal must classify as
    // transient rather than failing the task.
    let fetcher = HttpMarketFetcher::new("http://127.0.0.1:1");

    let outcome = fetcher
        .history(10000002, 34)
        .await
        .expect("classification failed");
    match outcome {
        FetchOutcome::Retryable { reason } => assert!(reason.contains("network error")),
        other => panic!("expected retryable outcome, got {other:?}"),
    }
}
