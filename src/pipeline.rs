//! One collection run: fetch both agencies, index, validate, publish.

use crate::config::CollectorConfig;
use crate::error::PipelineError;
use crate::fetch::{BasicClient, CallStats, Fetcher, HttpClient};
use crate::index::build_reverse_index;
use crate::model::NetworkGraph;
use crate::publish::{PublishOutcome, Publisher, RunVersion, Snapshot};
use crate::sources::{AdapterSummary, BatchSource, PerRouteSource, SourceAdapter};
use crate::store::GraphStore;
use crate::validate::{ValidationConfig, ValidationReport, validate};
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a successful run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub version: i64,
    pub adapters: Vec<AdapterSummary>,
    pub calls: CallStats,
    pub report: ValidationReport,
    pub publish: PublishOutcome,
}

pub struct Collector<C = BasicClient> {
    config: CollectorConfig,
    fetcher: Arc<Fetcher<C>>,
    publisher: Publisher,
}

impl Collector<BasicClient> {
    pub fn new(config: CollectorConfig, publisher: Publisher) -> anyhow::Result<Self> {
        let client = BasicClient::with_connect_timeout(CONNECT_TIMEOUT)
            .context("failed to build HTTP client")?;
        Ok(Self::with_client(config, client, publisher))
    }
}

impl<C: HttpClient + 'static> Collector<C> {
    pub fn with_client(config: CollectorConfig, client: C, publisher: Publisher) -> Self {
        Self {
            config,
            fetcher: Arc::new(Fetcher::new(client)),
            publisher,
        }
    }

    /// Runs both collection phases in order and publishes the result.
    ///
    /// Nothing is written to disk unless both phases finish and validation
    /// reports no failing check.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self) -> Result<RunOutcome, PipelineError> {
        let run = RunVersion::now();
        let started = Instant::now();
        info!(version = run.version, "Collection run started");

        let store = GraphStore::new();
        let timeout = self.config.request_timeout();

        let batch = BatchSource::new(
            self.fetcher.clone(),
            &self.config.kmb_base_url,
            timeout,
            self.config.route_id_policy,
        );
        let per_route = PerRouteSource::new(
            self.fetcher.clone(),
            &self.config.ctb_base_url,
            &self.config.ctb_company,
            timeout,
        )
        .with_concurrency(self.config.route_concurrency, self.config.stop_concurrency);

        let mut adapters = Vec::with_capacity(2);
        adapters.push(self.run_phase("batch", &batch, &store).await?);
        adapters.push(self.run_phase("per_route", &per_route, &store).await?);

        let collected = store.freeze().map_err(|_| PipelineError::StoreStillShared)?;
        let stop_routes = build_reverse_index(&collected);
        let graph = NetworkGraph {
            routes: collected.routes,
            stops: collected.stops,
            route_stops: collected.route_stops,
            stop_routes,
        };

        let report = validate(&graph, &self.config.validation);
        if !report.passed() {
            for check in report.failing_checks() {
                error!(check = %check.name, message = %check.message, "Validation check failed");
            }
            return Err(PipelineError::ValidationFailed(Box::new(report)));
        }

        let calls = self.fetcher.stats();
        let snapshot = Snapshot::new(run, graph, &calls, report.status);
        let publish = self.publisher.publish(&snapshot).await?;

        info!(
            version = run.version,
            routes = snapshot.summary.total_routes,
            stops = snapshot.summary.total_stops,
            api_calls = calls.api_calls_made,
            success_rate = %calls.success_rate(),
            elapsed_secs = started.elapsed().as_secs(),
            "Collection run finished"
        );

        Ok(RunOutcome {
            version: run.version,
            adapters,
            calls,
            report,
            publish,
        })
    }

    async fn run_phase(
        &self,
        phase: &'static str,
        adapter: &dyn SourceAdapter,
        store: &Arc<GraphStore>,
    ) -> Result<AdapterSummary, PipelineError> {
        let started = Instant::now();
        let collect = adapter.collect(store);
        let summary = match self.config.phase_timeout() {
            Some(limit) => tokio::time::timeout(limit, collect)
                .await
                .map_err(|_| PipelineError::PhaseTimeout {
                    phase,
                    timeout: limit,
                })??,
            None => collect.await?,
        };

        if summary.failed_tasks > 0 {
            warn!(
                phase,
                agency = %summary.agency,
                failed_tasks = summary.failed_tasks,
                "Phase finished with failed tasks"
            );
        }
        let (routes, stops, route_stops) = store.counts();
        info!(
            phase,
            agency = %adapter.agency(),
            routes,
            stops,
            route_stops,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Phase complete"
        );
        Ok(summary)
    }
}

/// Validates a previously published snapshot file without fetching anything.
pub fn validate_snapshot_file(
    path: &Path,
    config: &ValidationConfig,
) -> anyhow::Result<ValidationReport> {
    let raw = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let graph: NetworkGraph = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(validate(&graph, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Agency, Direction, Route};
    use crate::validate::CheckStatus;

    #[test]
    fn test_validate_snapshot_file_reads_published_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut graph = NetworkGraph::default();
        graph.routes.insert(
            "CTB_1_O".into(),
            Route {
                route_number: "1".into(),
                company: Agency::Ctb,
                direction: Direction::Outbound,
                origin_tc: "跑馬地".into(),
                origin_en: "HAPPY VALLEY".into(),
                dest_tc: "摩星嶺".into(),
                dest_en: "MOUNT DAVIS".into(),
                service_type: None,
            },
        );
        let snapshot = Snapshot::new(
            RunVersion::now(),
            graph,
            &CallStats::default(),
            CheckStatus::Warn,
        );
        let path = dir.path().join("bus_data.json");
        std::fs::write(&path, snapshot.to_bytes().unwrap()).unwrap();

        let config = ValidationConfig {
            min_routes: 1,
            min_stops: 0,
            ..Default::default()
        };
        let report = validate_snapshot_file(&path, &config).unwrap();

        assert_eq!(report.check("minimum_routes").unwrap().status, CheckStatus::Pass);
        // the only route has no stop list
        assert_ne!(report.check("orphaned_routes").unwrap().status, CheckStatus::Pass);
    }

    #[test]
    fn test_validate_snapshot_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(validate_snapshot_file(&path, &ValidationConfig::default()).is_err());
    }
}
