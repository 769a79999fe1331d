//! Bulk-endpoint adapter: three dumps, one in-memory join.

use super::payload::{BulkRoute, BulkRouteStop, BulkStop, Envelope};
use super::{AdapterSummary, RouteIdPolicy, SourceAdapter};
use crate::error::PipelineError;
use crate::fetch::{Fetcher, HttpClient};
use crate::model::{Agency, Direction, Route, RouteStopEdge, Stop, sort_by_sequence, stop_key};
use crate::store::GraphStore;
use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct BatchSource<C> {
    fetcher: Arc<Fetcher<C>>,
    base_url: String,
    agency: Agency,
    timeout: Duration,
    policy: RouteIdPolicy,
}

impl<C: HttpClient> BatchSource<C> {
    pub fn new(
        fetcher: Arc<Fetcher<C>>,
        base_url: impl Into<String>,
        timeout: Duration,
        policy: RouteIdPolicy,
    ) -> Self {
        Self {
            fetcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agency: Agency::Kmb,
            timeout,
            policy,
        }
    }

    /// Fetches one bulk dump. Any failure, or an empty dump, is fatal for the phase.
    async fn fetch_dump<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
    ) -> Result<Vec<T>, PipelineError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let (result, elapsed) = self.fetcher.fetch_json::<Envelope<Vec<T>>>(&url, self.timeout).await;
        let rows = result
            .map_err(|e| PipelineError::source_unavailable(self.agency.as_str(), endpoint, e))?
            .data
            .unwrap_or_default();

        if rows.is_empty() {
            return Err(PipelineError::source_unavailable(
                self.agency.as_str(),
                endpoint,
                "empty dataset",
            ));
        }

        info!(
            agency = %self.agency,
            endpoint,
            rows = rows.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Bulk dump fetched"
        );
        Ok(rows)
    }
}

/// Result of joining the three dumps, before anything is written to the store.
#[derive(Debug, Default)]
pub struct BatchJoin {
    pub routes: IndexMap<String, Route>,
    pub stops: IndexMap<String, Stop>,
    pub route_stops: IndexMap<String, Vec<RouteStopEdge>>,
    pub dropped_edges: usize,
    pub unresolved_stops: usize,
}

/// Joins the bulk dumps into route, stop and edge records.
///
/// Route metadata for a collapsed id comes from the first edge whose
/// (route, bound, service type) has an entry in the route dump. Only stops
/// referenced by at least one edge are kept. Each stop list is stably sorted
/// by sequence after the pass.
pub fn join_bulk(
    agency: &Agency,
    policy: RouteIdPolicy,
    stops: &[BulkStop],
    routes: &[BulkRoute],
    edges: &[BulkRouteStop],
) -> BatchJoin {
    let stops_index: HashMap<String, &BulkStop> = stops
        .iter()
        .map(|s| (stop_key(agency, &s.stop), s))
        .collect();
    let routes_index: HashMap<(&str, &str, &str), &BulkRoute> = routes
        .iter()
        .map(|r| {
            (
                (r.route.as_str(), r.bound.as_str(), r.service_type.as_str()),
                r,
            )
        })
        .collect();

    let mut join = BatchJoin::default();

    for edge in edges {
        let direction = Direction::from_bound(&edge.bound);
        let route_id = policy.route_id(agency, &edge.route, &direction, Some(&edge.service_type));

        join.route_stops
            .entry(route_id.clone())
            .or_default()
            .push(RouteStopEdge {
                stop_id: stop_key(agency, &edge.stop),
                sequence: edge.seq,
            });

        if join.routes.contains_key(&route_id) {
            continue;
        }
        let key = (edge.route.as_str(), edge.bound.as_str(), edge.service_type.as_str());
        if let Some(info) = routes_index.get(&key) {
            join.routes.insert(
                route_id,
                Route {
                    route_number: edge.route.clone(),
                    company: agency.clone(),
                    direction,
                    origin_tc: info.orig_tc.clone(),
                    origin_en: info.orig_en.clone(),
                    dest_tc: info.dest_tc.clone(),
                    dest_en: info.dest_en.clone(),
                    service_type: Some(edge.service_type.clone()),
                },
            );
        }
    }

    // Edges whose route id never found metadata would dangle; drop them.
    join.route_stops.retain(|route_id, list| {
        if join.routes.contains_key(route_id) {
            true
        } else {
            warn!(route_id = %route_id, edges = list.len(), "No route metadata, dropping edges");
            join.dropped_edges += list.len();
            false
        }
    });

    let used_stops: IndexSet<&str> = join
        .route_stops
        .values()
        .flatten()
        .map(|e| e.stop_id.as_str())
        .collect();
    for stop_id in used_stops {
        match stops_index.get(stop_id) {
            Some(stop) => {
                join.stops.insert(
                    stop_id.to_string(),
                    Stop {
                        upstream_id: stop.stop.clone(),
                        name_tc: stop.name_tc.clone(),
                        name_en: stop.name_en.clone(),
                        latitude: stop.lat,
                        longitude: stop.lon,
                        company: agency.clone(),
                    },
                );
            }
            None => join.unresolved_stops += 1,
        }
    }

    for list in join.route_stops.values_mut() {
        sort_by_sequence(list);
    }

    join
}

#[async_trait]
impl<C: HttpClient + 'static> SourceAdapter for BatchSource<C> {
    fn agency(&self) -> Agency {
        self.agency.clone()
    }

    #[tracing::instrument(skip_all, fields(agency = %self.agency))]
    async fn collect(&self, store: &Arc<GraphStore>) -> Result<AdapterSummary, PipelineError> {
        let stops: Vec<BulkStop> = self.fetch_dump("stop").await?;
        let routes: Vec<BulkRoute> = self.fetch_dump("route").await?;
        let edges: Vec<BulkRouteStop> = self.fetch_dump("route-stop").await?;

        let join = join_bulk(&self.agency, self.policy, &stops, &routes, &edges);

        let summary = AdapterSummary {
            agency: self.agency.to_string(),
            routes: join.routes.len(),
            routes_with_stops: join.route_stops.len(),
            stops: join.stops.len(),
            edges: join.route_stops.values().map(Vec::len).sum(),
            dropped_edges: join.dropped_edges,
            unresolved_stops: join.unresolved_stops,
            failed_tasks: 0,
        };

        for (id, route) in join.routes {
            store.upsert_route(id, route);
        }
        for (id, stop) in join.stops {
            store.claim_stop(&self.agency, &stop.upstream_id);
            store.upsert_stop(id, stop);
        }
        for (id, list) in join.route_stops {
            store.set_route_stops(id, list);
        }

        if summary.unresolved_stops > 0 {
            warn!(
                unresolved = summary.unresolved_stops,
                "Edges reference stops missing from the stop dump"
            );
        }
        info!(
            routes = summary.routes,
            stops = summary.stops,
            edges = summary.edges,
            dropped_edges = summary.dropped_edges,
            "Bulk collection complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn bulk_stop(id: &str, lat: f64, lon: f64) -> BulkStop {
        BulkStop {
            stop: id.into(),
            name_tc: format!("站{id}"),
            name_en: format!("STOP {id}"),
            lat,
            lon,
        }
    }

    fn bulk_route(route: &str, bound: &str, st: &str, dest: &str) -> BulkRoute {
        BulkRoute {
            route: route.into(),
            bound: bound.into(),
            service_type: st.into(),
            orig_tc: "起點".into(),
            orig_en: "ORIGIN".into(),
            dest_tc: "終點".into(),
            dest_en: dest.into(),
        }
    }

    fn bulk_edge(route: &str, bound: &str, st: &str, seq: u32, stop: &str) -> BulkRouteStop {
        BulkRouteStop {
            route: route.into(),
            bound: bound.into(),
            service_type: st.into(),
            seq,
            stop: stop.into(),
        }
    }

    #[test]
    fn test_join_sorts_edges_by_sequence() {
        let stops = vec![bulk_stop("A", 22.3, 114.1), bulk_stop("B", 22.4, 114.2)];
        let routes = vec![bulk_route("1", "O", "1", "STAR FERRY")];
        let edges = vec![bulk_edge("1", "O", "1", 2, "B"), bulk_edge("1", "O", "1", 1, "A")];

        let join = join_bulk(&Agency::Kmb, RouteIdPolicy::default(), &stops, &routes, &edges);

        let ids: Vec<_> = join.route_stops["KMB_1_O"]
            .iter()
            .map(|e| e.stop_id.as_str())
            .collect();
        assert_eq!(ids, vec!["KMB_A", "KMB_B"]);
        assert_eq!(join.routes["KMB_1_O"].direction, Direction::Outbound);
    }

    #[test]
    fn test_join_collapses_service_types() {
        let stops = vec![
            bulk_stop("A", 22.3, 114.1),
            bulk_stop("B", 22.4, 114.2),
            bulk_stop("C", 22.5, 114.3),
        ];
        let routes = vec![
            bulk_route("1", "O", "1", "FIRST VARIANT"),
            bulk_route("1", "O", "2", "SECOND VARIANT"),
        ];
        let edges = vec![
            bulk_edge("1", "O", "1", 1, "A"),
            bulk_edge("1", "O", "1", 2, "B"),
            bulk_edge("1", "O", "2", 1, "C"),
        ];

        let join = join_bulk(&Agency::Kmb, RouteIdPolicy::CollapseServiceType, &stops, &routes, &edges);

        assert_eq!(join.routes.len(), 1);
        assert_eq!(join.routes["KMB_1_O"].dest_en, "FIRST VARIANT");
        let ids: Vec<_> = join.route_stops["KMB_1_O"]
            .iter()
            .map(|e| (e.stop_id.as_str(), e.sequence))
            .collect();
        assert_eq!(ids, vec![("KMB_A", 1), ("KMB_C", 1), ("KMB_B", 2)]);
    }

    #[test]
    fn test_join_keeps_service_types_apart_when_asked() {
        let stops = vec![bulk_stop("A", 22.3, 114.1), bulk_stop("C", 22.5, 114.3)];
        let routes = vec![
            bulk_route("1", "O", "1", "FIRST VARIANT"),
            bulk_route("1", "O", "2", "SECOND VARIANT"),
        ];
        let edges = vec![bulk_edge("1", "O", "1", 1, "A"), bulk_edge("1", "O", "2", 1, "C")];

        let join = join_bulk(&Agency::Kmb, RouteIdPolicy::KeepServiceType, &stops, &routes, &edges);

        assert_eq!(join.routes.len(), 2);
        assert_eq!(join.routes["KMB_1_O_2"].dest_en, "SECOND VARIANT");
    }

    #[test]
    fn test_join_prunes_unused_stops_and_drops_dangling_edges() {
        let stops = vec![bulk_stop("A", 22.3, 114.1), bulk_stop("UNUSED", 22.3, 114.1)];
        let routes = vec![bulk_route("1", "O", "1", "X")];
        let edges = vec![
            bulk_edge("1", "O", "1", 1, "A"),
            bulk_edge("1", "O", "1", 2, "GHOST"),
            bulk_edge("99", "I", "1", 1, "A"),
        ];

        let join = join_bulk(&Agency::Kmb, RouteIdPolicy::default(), &stops, &routes, &edges);

        assert!(join.stops.contains_key("KMB_A"));
        assert_eq!(join.stops["KMB_A"].upstream_id, "A");
        assert!(!join.stops.contains_key("KMB_UNUSED"));
        assert_eq!(join.unresolved_stops, 1);
        assert_eq!(join.dropped_edges, 1);
        assert!(!join.route_stops.contains_key("KMB_99_I"));
        for route_id in join.route_stops.keys() {
            assert!(join.routes.contains_key(route_id));
        }
    }

    async fn mount(server: &MockServer, endpoint: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_collect_writes_into_store() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/kmb/stop",
            json!({"data": [
                {"stop": "A", "name_tc": "甲", "name_en": "A", "lat": "22.30", "long": "114.17"},
                {"stop": "B", "name_tc": "乙", "name_en": "B", "lat": "22.31", "long": "114.18"}
            ]}),
        )
        .await;
        mount(
            &server,
            "/kmb/route",
            json!({"data": [
                {"route": "1", "bound": "O", "service_type": "1",
                 "orig_tc": "竹園", "orig_en": "CHUK YUEN", "dest_tc": "尖沙咀", "dest_en": "STAR FERRY"}
            ]}),
        )
        .await;
        mount(
            &server,
            "/kmb/route-stop",
            json!({"data": [
                {"route": "1", "bound": "O", "service_type": "1", "seq": "2", "stop": "B"},
                {"route": "1", "bound": "O", "service_type": "1", "seq": "1", "stop": "A"}
            ]}),
        )
        .await;

        let fetcher = Arc::new(Fetcher::new(BasicClient::new()));
        let source = BatchSource::new(
            fetcher.clone(),
            format!("{}/kmb", server.uri()),
            Duration::from_secs(5),
            RouteIdPolicy::default(),
        );
        let store = GraphStore::new();

        let summary = source.collect(&store).await.unwrap();
        assert_eq!(summary.routes, 1);
        assert_eq!(summary.stops, 2);
        assert_eq!(fetcher.stats().api_calls_made, 3);

        let graph = store.freeze().unwrap();
        let ids: Vec<_> = graph.route_stops["KMB_1_O"]
            .iter()
            .map(|e| e.stop_id.as_str())
            .collect();
        assert_eq!(ids, vec!["KMB_A", "KMB_B"]);
        assert_eq!(graph.stops["KMB_A"].latitude, 22.30);
    }

    #[tokio::test]
    async fn test_collect_fails_without_stop_dump() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kmb/stop"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = Arc::new(Fetcher::new(BasicClient::new()));
        let source = BatchSource::new(
            fetcher,
            format!("{}/kmb", server.uri()),
            Duration::from_secs(5),
            RouteIdPolicy::default(),
        );
        let store = GraphStore::new();

        let err = source.collect(&store).await.unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnavailable { phase: "stop", .. }));
        assert_eq!(store.counts(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_collect_fails_on_empty_dump() {
        let server = MockServer::start().await;
        mount(&server, "/kmb/stop", json!({"data": []})).await;

        let fetcher = Arc::new(Fetcher::new(BasicClient::new()));
        let source = BatchSource::new(
            fetcher,
            format!("{}/kmb", server.uri()),
            Duration::from_secs(5),
            RouteIdPolicy::default(),
        );

        let result = source.collect(&GraphStore::new()).await;
        assert!(result.is_err());
    }
}
