//! HTTP market data client.
//!
//! One shared `reqwest::Client` serves every fetcher instance so connection
//! pooling works across all concurrent task executions. The client carries
//! explicit timeouts; a hung upstream surfaces as a retryable outcome instead
//! of stalling a worker indefinitely.

use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::fetcher::{FetchOutcome, FetcherError, FetcherResult, ListingPage, MarketDataFetcher};
use crate::metrics::FetchRequestMetrics;
use crate::HistoryObservation;

/// HTTP connect timeout (seconds) - time to establish the TCP connection
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// HTTP request timeout (seconds) - overall time budget for one request
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Global HTTP client shared by all fetcher instances
///
/// `reqwest::Client` clones cheaply, but a single global instance keeps the
/// connection pool shared across every concurrent sync task.
static GLOBAL_HTTP_CLIENT: Lazy<Arc<Client>> = Lazy::new(|| {
    Arc::new(
        Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                panic!("FATAL: Failed to build HTTP client: {e}. Check system TLS configuration.");
            }),
    )
});

/// Get the global HTTP client
pub fn global_http_client() -> Arc<Client> {
    GLOBAL_HTTP_CLIENT.clone()
}

/// How a response status routes into the outcome classification.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StatusClass {
    /// 2xx - deserialize the body
    Success,
    /// Transient: retry later (5xx, 420/429 upstream budget exhaustion)
    Retryable(String),
    /// Permanent per-resource: 404
    NotFound,
    /// Unexpected client error: fatal
    ClientError,
}

/// Classify a response status.
///
/// 420 is the upstream's own error-budget-exhausted signal and is transient
/// in the same sense as 429.
fn classify_status(status: StatusCode) -> StatusClass {
    if status.is_success() {
        return StatusClass::Success;
    }
    if status == StatusCode::NOT_FOUND {
        return StatusClass::NotFound;
    }
    if status.as_u16() == 420 || status.as_u16() == 429 {
        return StatusClass::Retryable(format!("upstream rate limited ({status})"));
    }
    if status.is_server_error() {
        return StatusClass::Retryable(format!("server error ({status})"));
    }
    StatusClass::ClientError
}

/// Market data fetcher over HTTP.
pub struct HttpMarketFetcher {
    client: Arc<Client>,
    base_url: String,
}

impl HttpMarketFetcher {
    /// Create a fetcher against `base_url` using the global HTTP client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: global_http_client(),
            base_url: base_url.into(),
        }
    }

    /// Create a fetcher with an explicit client (tests use this to inject
    /// short timeouts)
    pub fn with_client(client: Arc<Client>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn history_endpoint(region_id: u32, type_id: u32) -> String {
        format!("/markets/{region_id}/history/{type_id}")
    }

    fn listing_endpoint(region_id: u32, page: u32) -> String {
        format!("/markets/{region_id}/types?page={page}")
    }

    /// Execute one GET and classify the result.
    ///
    /// Network failures (connect, timeout) are transient by definition here -
    /// the upstream being unreachable is exactly the outage the job layer's
    /// retry budget exists for.
    async fn get_classified<T>(&self, endpoint: &str) -> FetcherResult<FetchOutcome<T>>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        let metrics = FetchRequestMetrics::start(endpoint).await;

        debug!(url = %url, "Making GET request");

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "Network error on fetch attempt");
                metrics.record_network_error();
                return Ok(FetchOutcome::Retryable {
                    reason: format!("network error: {e}"),
                });
            }
        };

        let status = response.status();
        metrics.record_complete(status.as_u16());

        match classify_status(status) {
            StatusClass::Success => {
                let payload = response.json::<T>().await.map_err(|e| {
                    FetcherError::ParseError(format!("Failed to deserialize response: {e}"))
                })?;
                Ok(FetchOutcome::Success(payload))
            }
            StatusClass::Retryable(reason) => {
                warn!(url = %url, status = status.as_u16(), "Transient upstream failure");
                Ok(FetchOutcome::Retryable { reason })
            }
            StatusClass::NotFound => Ok(FetchOutcome::NotFound {
                status: status.as_u16(),
            }),
            StatusClass::ClientError => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                Err(FetcherError::ApiError {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

#[async_trait::async_trait]
impl MarketDataFetcher for HttpMarketFetcher {
    async fn history(
        &self,
        region_id: u32,
        type_id: u32,
    ) -> FetcherResult<FetchOutcome<Vec<HistoryObservation>>> {
        let endpoint = Self::history_endpoint(region_id, type_id);
        let outcome = self
            .get_classified::<Vec<HistoryObservation>>(&endpoint)
            .await?;

        if let FetchOutcome::Success(observations) = &outcome {
            for obs in observations {
                obs.validate().map_err(FetcherError::InvalidResponse)?;
            }
            debug!(
                region_id = region_id,
                type_id = type_id,
                observations = observations.len(),
                "Fetched history"
            );
        }

        Ok(outcome)
    }

    async fn listing_page(
        &self,
        region_id: u32,
        page: u32,
    ) -> FetcherResult<FetchOutcome<ListingPage>> {
        let endpoint = Self::listing_endpoint(region_id, page);
        let outcome = self.get_classified::<ListingPage>(&endpoint).await?;

        if let FetchOutcome::Success(listing) = &outcome {
            if listing.total_pages > 0 && listing.page != page {
                return Err(FetcherError::InvalidResponse(format!(
                    "Requested page {page} but response reports page {}",
                    listing.page
                )));
            }
            debug!(
                region_id = region_id,
                page = page,
                total_pages = listing.total_pages,
                items = listing.items.len(),
                "Fetched listing page"
            );
        }

        Ok(outcome)
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}
