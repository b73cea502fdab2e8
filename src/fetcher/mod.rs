//! Upstream market data API client.
//!
//! One fetch attempt is exactly one upstream call; retry policy belongs to the
//! job layer, which is why every call reports a [`FetchOutcome`] instead of
//! retrying internally:
//!
//! - `Success` carries the page or history payload,
//! - `Retryable` is the transient-outage signal (5xx, rate-limit statuses,
//!   network failures) that the job resolves by rescheduling,
//! - `NotFound` is the permanent per-resource signal that the job resolves by
//!   banning the resource.
//!
//! Anything else (unexpected 4xx, malformed payloads) is a real error and
//! propagates through the `Result`, aborting the task.

use async_trait::async_trait;
use serde::Deserialize;

use crate::HistoryObservation;

pub mod http;

pub use http::HttpMarketFetcher;

/// Fetcher errors
#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    /// API rejected the request in a way that is neither transient nor a ban
    /// candidate (400/401/403-class responses)
    #[error("API error {status}: {body}")]
    ApiError {
        /// HTTP status of the rejection
        status: u16,
        /// Response body, as far as it could be read
        body: String,
    },

    /// Response body did not deserialize into the expected shape
    #[error("parse error: {0}")]
    ParseError(String),

    /// Response deserialized but violates the documented schema
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// Classified result of a single upstream call.
///
/// The three arms map one-to-one onto the job layer's routing: persist,
/// reschedule, or ban. Exactly one `match` per call site keeps every branch
/// explicit.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    /// The call succeeded and returned a payload
    Success(T),
    /// Transient outage; the same call is expected to succeed later
    Retryable {
        /// Human-readable cause for logs and failure reports
        reason: String,
    },
    /// The upstream confirmed the resource does not exist
    NotFound {
        /// Numeric status carried by the not-found signal
        status: u16,
    },
}

/// One page of a region's market type listing.
///
/// `total_pages` is authoritative: callers request page N+1 until
/// `page == total_pages` and never rely on an out-of-band has-more flag.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListingPage {
    /// Type ids listed on this page
    pub items: Vec<u32>,
    /// 1-based index of this page
    pub page: u32,
    /// Total number of pages in the listing
    pub total_pages: u32,
}

impl ListingPage {
    /// Whether this is the final page of the listing
    pub fn is_last(&self) -> bool {
        self.page >= self.total_pages
    }
}

/// Market data fetcher trait.
///
/// The injection seam for tests: jobs are exercised against closure-backed
/// fakes, while production uses [`HttpMarketFetcher`].
#[async_trait]
pub trait MarketDataFetcher: Send + Sync {
    /// Fetch the daily history observations for one type in one region.
    ///
    /// # Arguments
    /// * `region_id` - Region owning the market
    /// * `type_id` - Resource type to fetch history for
    ///
    /// # Errors
    /// Returns `FetcherError` only for unclassified failures; transient and
    /// not-found conditions arrive as `FetchOutcome` variants.
    async fn history(
        &self,
        region_id: u32,
        type_id: u32,
    ) -> FetcherResult<FetchOutcome<Vec<HistoryObservation>>>;

    /// Fetch one page of a region's market type listing.
    ///
    /// # Arguments
    /// * `region_id` - Region whose listing to page through
    /// * `page` - 1-based page index to request
    async fn listing_page(
        &self,
        region_id: u32,
        page: u32,
    ) -> FetcherResult<FetchOutcome<ListingPage>>;

    /// Get the base URL this fetcher talks to
    fn base_url(&self) -> &str;
}
