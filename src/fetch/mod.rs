//! Upstream HTTP access.
//!
//! [`Fetcher`] wraps an [`HttpClient`] and turns every request into either a
//! decoded payload or a [`FetchFailure`], counting calls as it goes.

mod basic;
mod client;
mod stats;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use stats::CallStats;

use crate::error::FetchFailure;
use serde::de::DeserializeOwned;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct Fetcher<C = BasicClient> {
    client: C,
    stats: Mutex<CallStats>,
}

impl<C: HttpClient> Fetcher<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            stats: Mutex::new(CallStats::default()),
        }
    }

    /// Fetches `url` and decodes the body as JSON.
    ///
    /// Network errors, non-2xx statuses and undecodable bodies all come back
    /// as a [`FetchFailure`] alongside the time spent.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &str,
        timeout: Duration,
    ) -> (Result<T, FetchFailure>, Duration) {
        let start = Instant::now();
        let result = self.try_fetch(url, timeout).await;
        let elapsed = start.elapsed();

        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(result.is_ok());

        match &result {
            Ok(_) => debug!(url, elapsed_ms = elapsed.as_millis() as u64, "Fetched"),
            Err(e) => warn!(url, error = %e, "Fetch failed"),
        }

        (result, elapsed)
    }

    async fn try_fetch<T: DeserializeOwned>(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<T, FetchFailure> {
        let parsed = reqwest::Url::parse(url).map_err(|e| FetchFailure::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let mut req = reqwest::Request::new(reqwest::Method::GET, parsed);
        *req.timeout_mut() = Some(timeout);

        let resp = self
            .client
            .execute(req)
            .await
            .map_err(|source| FetchFailure::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchFailure::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = resp.bytes().await.map_err(|source| FetchFailure::Transport {
            url: url.to_string(),
            source,
        })?;

        serde_json::from_slice(&body).map_err(|e| FetchFailure::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> CallStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
