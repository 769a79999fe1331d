//! Error types shared across the collection pipeline.

use crate::validate::ValidationReport;
use std::time::Duration;

/// Why a single upstream request produced no usable payload.
///
/// Fetch failures never cross the fetcher boundary as panics or `Err` from
/// an adapter task; callers decide whether a failure is per-unit or fatal.
#[derive(Debug, thiserror::Error)]
pub enum FetchFailure {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("malformed body from {url}: {reason}")]
    Decode { url: String, reason: String },
}

/// Run-level failures. Any of these aborts the run before a snapshot is written,
/// except `Publish`, which is raised while writing.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{agency} {phase} unavailable: {reason}")]
    SourceUnavailable {
        agency: String,
        phase: &'static str,
        reason: String,
    },

    #[error("{phase} did not finish within {timeout:?}")]
    PhaseTimeout {
        phase: &'static str,
        timeout: Duration,
    },

    #[error("graph store still shared after all collection tasks finished")]
    StoreStillShared,

    #[error("validation failed: {} check(s) failing", .0.failing_checks().len())]
    ValidationFailed(Box<ValidationReport>),

    #[error("publish failed: {0:#}")]
    Publish(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn source_unavailable(agency: &str, phase: &'static str, reason: impl ToString) -> Self {
        PipelineError::SourceUnavailable {
            agency: agency.to_string(),
            phase,
            reason: reason.to_string(),
        }
    }
}
