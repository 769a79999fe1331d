//! Per-route adapter for agencies without a bulk edge endpoint.
//!
//! Every (route, direction) pair becomes a task on a bounded pool. A task
//! fetches its stop sequence, then fetches details for stops nobody has
//! claimed yet on a second, smaller pool shared by all tasks.

use super::payload::{AgencyRoute, AgencyRouteStop, AgencyStop, Envelope};
use super::{AdapterSummary, RouteIdPolicy, SourceAdapter};
use crate::error::PipelineError;
use crate::fetch::{Fetcher, HttpClient};
use crate::model::{Agency, Direction, Route, RouteStopEdge, Stop, sort_by_sequence, stop_key};
use crate::store::GraphStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, warn};

const PROGRESS_EVERY: usize = 50;

pub struct PerRouteSource<C> {
    fetcher: Arc<Fetcher<C>>,
    base_url: String,
    company: String,
    agency: Agency,
    timeout: Duration,
    route_concurrency: usize,
    stop_concurrency: usize,
}

impl<C: HttpClient + 'static> PerRouteSource<C> {
    pub fn new(
        fetcher: Arc<Fetcher<C>>,
        base_url: impl Into<String>,
        company: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let company = company.into();
        Self {
            fetcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agency: Agency::from_code(&company),
            company,
            timeout,
            route_concurrency: 10,
            stop_concurrency: 5,
        }
    }

    /// Sets the outer (route-direction) and inner (stop detail) pool sizes.
    pub fn with_concurrency(mut self, routes: usize, stops: usize) -> Self {
        self.route_concurrency = routes.max(1);
        self.stop_concurrency = stops.max(1);
        self
    }

    async fn fetch_route_list(&self) -> Result<Vec<AgencyRoute>, PipelineError> {
        let url = format!("{}/route/{}", self.base_url, self.company);
        let (result, elapsed) = self
            .fetcher
            .fetch_json::<Envelope<Vec<AgencyRoute>>>(&url, self.timeout)
            .await;
        let routes = result
            .map_err(|e| PipelineError::source_unavailable(self.agency.as_str(), "route list", e))?
            .data
            .unwrap_or_default();

        if routes.is_empty() {
            return Err(PipelineError::source_unavailable(
                self.agency.as_str(),
                "route list",
                "no routes returned",
            ));
        }
        info!(
            routes = routes.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Route list fetched"
        );
        Ok(routes)
    }
}

struct RouteTask {
    route_id: String,
    route_number: String,
    direction: Direction,
}

enum TaskOutcome {
    Routed { edges: usize, fetched_stops: usize },
    Empty,
    Failed,
}

/// State shared by every task of one collection run.
struct TaskContext<C> {
    fetcher: Arc<Fetcher<C>>,
    store: Arc<GraphStore>,
    base_url: String,
    company: String,
    agency: Agency,
    timeout: Duration,
    stop_permits: Arc<Semaphore>,
    completed: AtomicUsize,
    total: usize,
}

impl<C: HttpClient + 'static> TaskContext<C> {
    async fn run(self: Arc<Self>, task: RouteTask) -> TaskOutcome {
        let outcome = self.clone().fetch_route_stops(&task).await;
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if done % PROGRESS_EVERY == 0 || done == self.total {
            info!(completed = done, total = self.total, "Per-route progress");
        }
        outcome
    }

    async fn fetch_route_stops(self: Arc<Self>, task: &RouteTask) -> TaskOutcome {
        let url = format!(
            "{}/route-stop/{}/{}/{}",
            self.base_url, self.company, task.route_number, task.direction
        );
        let (result, _) = self
            .fetcher
            .fetch_json::<Envelope<Vec<AgencyRouteStop>>>(&url, self.timeout)
            .await;

        let rows = match result {
            Ok(envelope) => envelope.data.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Route stop list unavailable, route left without stops");
                return TaskOutcome::Failed;
            }
        };
        if rows.is_empty() {
            debug!("No stops for route direction");
            return TaskOutcome::Empty;
        }

        // Claim and fetch are separate steps: the lock is never held while
        // a stop detail request is in flight.
        let mut edges = Vec::with_capacity(rows.len());
        let mut unclaimed = Vec::new();
        for row in rows {
            if self.store.claim_stop(&self.agency, &row.stop) {
                unclaimed.push(row.stop.clone());
            }
            edges.push(RouteStopEdge {
                stop_id: stop_key(&self.agency, &row.stop),
                sequence: row.seq,
            });
        }
        sort_by_sequence(&mut edges);

        // Dropping the set aborts lookups still in flight.
        let mut lookups = JoinSet::new();
        for upstream_id in unclaimed {
            let ctx = self.clone();
            lookups.spawn(async move { ctx.fetch_stop(upstream_id).await }.in_current_span());
        }
        let mut fetched_stops = 0;
        while let Some(joined) = lookups.join_next().await {
            match joined {
                Ok(Some((key, stop))) => {
                    self.store.upsert_stop(key, stop);
                    fetched_stops += 1;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Stop detail task did not complete"),
            }
        }

        let count = edges.len();
        self.store.set_route_stops(task.route_id.clone(), edges);
        TaskOutcome::Routed {
            edges: count,
            fetched_stops,
        }
    }

    async fn fetch_stop(self: Arc<Self>, upstream_id: String) -> Option<(String, Stop)> {
        let _permit = self.stop_permits.clone().acquire_owned().await.ok()?;
        let url = format!("{}/stop/{}", self.base_url, upstream_id);
        let (result, _) = self
            .fetcher
            .fetch_json::<Envelope<AgencyStop>>(&url, self.timeout)
            .await;

        let detail: AgencyStop = result.ok()?.data?;
        Some((
            stop_key(&self.agency, &upstream_id),
            Stop {
                upstream_id,
                name_tc: detail.name_tc,
                name_en: detail.name_en,
                latitude: detail.lat,
                longitude: detail.lon,
                company: self.agency.clone(),
            },
        ))
    }
}

#[async_trait]
impl<C: HttpClient + 'static> SourceAdapter for PerRouteSource<C> {
    fn agency(&self) -> Agency {
        self.agency.clone()
    }

    #[tracing::instrument(skip_all, fields(agency = %self.agency))]
    async fn collect(&self, store: &Arc<GraphStore>) -> Result<AdapterSummary, PipelineError> {
        let listing = self.fetch_route_list().await?;

        let mut tasks = Vec::with_capacity(listing.len() * 2);
        for info in &listing {
            for direction in Direction::BOTH {
                let route_id = RouteIdPolicy::CollapseServiceType.route_id(
                    &self.agency,
                    &info.route,
                    &direction,
                    None,
                );
                store.upsert_route(
                    route_id.clone(),
                    Route {
                        route_number: info.route.clone(),
                        company: self.agency.clone(),
                        direction: direction.clone(),
                        origin_tc: info.orig_tc.clone(),
                        origin_en: info.orig_en.clone(),
                        dest_tc: info.dest_tc.clone(),
                        dest_en: info.dest_en.clone(),
                        service_type: None,
                    },
                );
                tasks.push(RouteTask {
                    route_id,
                    route_number: info.route.clone(),
                    direction,
                });
            }
        }

        let total = tasks.len();
        info!(
            tasks = total,
            route_concurrency = self.route_concurrency,
            stop_concurrency = self.stop_concurrency,
            "Dispatching route-direction tasks"
        );

        let ctx = Arc::new(TaskContext {
            fetcher: self.fetcher.clone(),
            store: store.clone(),
            base_url: self.base_url.clone(),
            company: self.company.clone(),
            agency: self.agency.clone(),
            timeout: self.timeout,
            stop_permits: Arc::new(Semaphore::new(self.stop_concurrency)),
            completed: AtomicUsize::new(0),
            total,
        });
        let route_permits = Arc::new(Semaphore::new(self.route_concurrency));

        // Owned by this future: if the caller drops it (phase timeout), every
        // route task and its stop lookups are aborted with it.
        let mut running = JoinSet::new();
        for task in tasks {
            let permits = route_permits.clone();
            let ctx = ctx.clone();
            let span = tracing::info_span!(
                "route_task",
                route_id = %task.route_id,
            );
            running.spawn(
                async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return TaskOutcome::Empty;
                    };
                    ctx.run(task).await
                }
                .instrument(span),
            );
        }

        let mut summary = AdapterSummary {
            agency: self.agency.to_string(),
            routes: total,
            ..Default::default()
        };
        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(TaskOutcome::Routed {
                    edges,
                    fetched_stops,
                }) => {
                    summary.routes_with_stops += 1;
                    summary.edges += edges;
                    summary.stops += fetched_stops;
                }
                Ok(TaskOutcome::Empty) => {}
                Ok(TaskOutcome::Failed) => summary.failed_tasks += 1,
                Err(e) => {
                    warn!(error = %e, "Route task did not complete");
                    summary.failed_tasks += 1;
                }
            }
        }

        let orphaned = total - summary.routes_with_stops;
        info!(
            routes = total,
            routes_with_stops = summary.routes_with_stops,
            orphaned,
            edges = summary.edges,
            stops = summary.stops,
            "Per-route collection complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;
    use serde_json::json;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount(server: &MockServer, endpoint: &str, status: u16, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(server)
            .await;
    }

    fn stop_body(id: &str) -> serde_json::Value {
        json!({"data": {"stop": id, "name_tc": "站", "name_en": format!("STOP {id}"),
                        "lat": "22.28", "long": "114.16"}})
    }

    fn source(server: &MockServer) -> (PerRouteSource<BasicClient>, Arc<Fetcher<BasicClient>>) {
        let fetcher = Arc::new(Fetcher::new(BasicClient::new()));
        let source = PerRouteSource::new(
            fetcher.clone(),
            format!("{}/ctb", server.uri()),
            "CTB",
            Duration::from_secs(5),
        )
        .with_concurrency(4, 2);
        (source, fetcher)
    }

    #[tokio::test]
    async fn test_collect_fetches_both_directions_and_stop_details() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/ctb/route/CTB",
            200,
            json!({"data": [{"route": "1", "orig_tc": "跑馬地", "orig_en": "HAPPY VALLEY",
                             "dest_tc": "堅尼地城", "dest_en": "KENNEDY TOWN"}]}),
        )
        .await;
        mount(
            &server,
            "/ctb/route-stop/CTB/1/outbound",
            200,
            json!({"data": [{"stop": "002", "seq": 2}, {"stop": "001", "seq": 1}]}),
        )
        .await;
        mount(
            &server,
            "/ctb/route-stop/CTB/1/inbound",
            200,
            json!({"data": [{"stop": "001", "seq": 1}, {"stop": "003", "seq": 2}]}),
        )
        .await;
        for id in ["001", "002", "003"] {
            mount(&server, &format!("/ctb/stop/{id}"), 200, stop_body(id)).await;
        }

        let (source, _fetcher) = source(&server);
        let store = GraphStore::new();
        let summary = source.collect(&store).await.unwrap();

        assert_eq!(summary.routes, 2);
        assert_eq!(summary.routes_with_stops, 2);
        assert_eq!(summary.stops, 3);

        let graph = store.freeze().unwrap();
        assert_eq!(graph.routes.len(), 2);
        assert_eq!(graph.stops.len(), 3);
        let outbound: Vec<_> = graph.route_stops["CTB_1_O"]
            .iter()
            .map(|e| e.stop_id.as_str())
            .collect();
        assert_eq!(outbound, vec!["CTB_001", "CTB_002"]);
        assert_eq!(graph.stops["CTB_003"].upstream_id, "003");
        assert_eq!(graph.routes["CTB_1_I"].direction, Direction::Inbound);
    }

    #[tokio::test]
    async fn test_failed_route_task_leaves_orphaned_route() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/ctb/route/CTB",
            200,
            json!({"data": [{"route": "10", "orig_tc": "北角", "orig_en": "NORTH POINT",
                             "dest_tc": "堅尼地城", "dest_en": "KENNEDY TOWN"}]}),
        )
        .await;
        mount(&server, "/ctb/route-stop/CTB/10/outbound", 500, json!({})).await;
        mount(
            &server,
            "/ctb/route-stop/CTB/10/inbound",
            200,
            json!({"data": [{"stop": "010", "seq": 1}]}),
        )
        .await;
        mount(&server, "/ctb/stop/010", 200, stop_body("010")).await;

        let (source, fetcher) = source(&server);
        let store = GraphStore::new();
        let summary = source.collect(&store).await.unwrap();

        assert_eq!(summary.routes_with_stops, 1);
        assert_eq!(summary.failed_tasks, 1);
        assert_eq!(fetcher.stats().failed_calls, 1);

        let graph = store.freeze().unwrap();
        assert!(graph.routes.contains_key("CTB_10_O"));
        assert!(graph.route_stops.get("CTB_10_O").is_none_or(|e| e.is_empty()));
        assert_eq!(graph.route_stops["CTB_10_I"].len(), 1);
    }

    #[tokio::test]
    async fn test_failed_stop_detail_keeps_edge() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/ctb/route/CTB",
            200,
            json!({"data": [{"route": "5", "orig_tc": "甲", "orig_en": "A",
                             "dest_tc": "乙", "dest_en": "B"}]}),
        )
        .await;
        mount(
            &server,
            "/ctb/route-stop/CTB/5/outbound",
            200,
            json!({"data": [{"stop": "050", "seq": 1}]}),
        )
        .await;
        mount(&server, "/ctb/route-stop/CTB/5/inbound", 200, json!({"data": []})).await;
        mount(&server, "/ctb/stop/050", 404, json!({})).await;

        let (source, _) = source(&server);
        let store = GraphStore::new();
        let summary = source.collect(&store).await.unwrap();

        assert_eq!(summary.stops, 0);
        assert_eq!(summary.edges, 1);
        let graph = store.freeze().unwrap();
        assert_eq!(graph.route_stops["CTB_5_O"].len(), 1);
        assert!(graph.stops.is_empty());
    }

    #[tokio::test]
    async fn test_missing_route_list_is_fatal() {
        let server = MockServer::start().await;
        mount(&server, "/ctb/route/CTB", 502, json!({})).await;

        let (source, _) = source(&server);
        let store = GraphStore::new();
        let err = source.collect(&store).await.unwrap_err();

        assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
        assert_eq!(store.counts(), (0, 0, 0));
    }

    /// Counts requests in flight per endpoint kind and keeps the peak.
    #[derive(Default)]
    struct InFlight {
        route_stops: AtomicUsize,
        route_stops_peak: AtomicUsize,
        stops: AtomicUsize,
        stops_peak: AtomicUsize,
    }

    struct GaugedClient {
        inner: BasicClient,
        gauge: Arc<InFlight>,
    }

    #[async_trait]
    impl HttpClient for GaugedClient {
        async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            let path = req.url().path().to_string();
            let (current, peak) = if path.contains("/route-stop/") {
                (&self.gauge.route_stops, &self.gauge.route_stops_peak)
            } else if path.contains("/stop/") {
                (&self.gauge.stops, &self.gauge.stops_peak)
            } else {
                return self.inner.execute(req).await;
            };
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            let resp = self.inner.execute(req).await;
            current.fetch_sub(1, Ordering::SeqCst);
            resp
        }
    }

    #[tokio::test]
    async fn test_route_and_stop_pools_stay_within_bounds() {
        let server = MockServer::start().await;
        let routes: Vec<_> = (0..4)
            .map(|i| json!({"route": format!("R{i}"), "orig_tc": "甲", "orig_en": "A",
                            "dest_tc": "乙", "dest_en": "B"}))
            .collect();
        mount(&server, "/ctb/route/CTB", 200, json!({"data": routes})).await;
        for i in 0..4 {
            for direction in ["inbound", "outbound"] {
                Mock::given(method("GET"))
                    .and(path(format!("/ctb/route-stop/CTB/R{i}/{direction}")))
                    .respond_with(
                        ResponseTemplate::new(200)
                            .set_body_json(json!({"data": [
                                {"stop": format!("{i}{direction}-1"), "seq": 1},
                                {"stop": format!("{i}{direction}-2"), "seq": 2}
                            ]}))
                            .set_delay(Duration::from_millis(100)),
                    )
                    .mount(&server)
                    .await;
            }
        }
        Mock::given(method("GET"))
            .and(path_regex(r"^/ctb/stop/.+$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(stop_body("any"))
                    .set_delay(Duration::from_millis(30)),
            )
            .mount(&server)
            .await;

        let gauge = Arc::new(InFlight::default());
        let client = GaugedClient {
            inner: BasicClient::new(),
            gauge: gauge.clone(),
        };
        let source = PerRouteSource::new(
            Arc::new(Fetcher::new(client)),
            format!("{}/ctb", server.uri()),
            "CTB",
            Duration::from_secs(5),
        )
        .with_concurrency(2, 1);

        let store = GraphStore::new();
        let summary = source.collect(&store).await.unwrap();

        assert_eq!(summary.routes_with_stops, 8);
        assert_eq!(summary.stops, 16);
        let route_peak = gauge.route_stops_peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&route_peak), "route pool peak {route_peak}");
        assert_eq!(gauge.stops_peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_collection_aborts_outstanding_tasks() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/ctb/route/CTB",
            200,
            json!({"data": [{"route": "1", "orig_tc": "甲", "orig_en": "A",
                             "dest_tc": "乙", "dest_en": "B"}]}),
        )
        .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/ctb/route-stop/CTB/1/.+$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": [{"stop": "001", "seq": 1}]}))
                    .set_delay(Duration::from_millis(600)),
            )
            .mount(&server)
            .await;
        mount(&server, "/ctb/stop/001", 200, stop_body("001")).await;

        let (source, _) = source(&server);
        let store = GraphStore::new();
        let result =
            tokio::time::timeout(Duration::from_millis(200), source.collect(&store)).await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(1000)).await;

        let requests = server.received_requests().await.unwrap();
        assert!(
            requests.iter().all(|r| !r.url.path().starts_with("/ctb/stop/")),
            "stop detail fetched after the collection was dropped"
        );
        // no aborted task still holds the store
        let graph = store.freeze().unwrap();
        assert!(graph.route_stops.is_empty());
    }
}
