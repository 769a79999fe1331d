use super::{BoundingBox, CheckResult, CheckStatus, ValidationConfig};
use crate::model::NetworkGraph;

/// Collects offenders for one check, keeping at most `limit` examples.
struct Offenders {
    count: usize,
    examples: Vec<String>,
    limit: usize,
}

impl Offenders {
    fn new(limit: usize) -> Self {
        Self {
            count: 0,
            examples: Vec::new(),
            limit,
        }
    }

    fn push(&mut self, example: impl FnOnce() -> String) {
        self.count += 1;
        if self.examples.len() < self.limit {
            self.examples.push(example());
        }
    }

    fn into_result(
        self,
        name: &str,
        status: CheckStatus,
        checked: usize,
        message: String,
    ) -> CheckResult {
        CheckResult {
            name: name.to_string(),
            status,
            checked,
            offending: self.count,
            examples: self.examples,
            message,
        }
    }
}

fn fail_if_any(count: usize) -> CheckStatus {
    if count > 0 { CheckStatus::Fail } else { CheckStatus::Pass }
}

fn warn_if_any(count: usize) -> CheckStatus {
    if count > 0 { CheckStatus::Warn } else { CheckStatus::Pass }
}

fn cardinality(name: &str, actual: usize, minimum: usize, what: &str) -> CheckResult {
    let status = if actual < minimum {
        CheckStatus::Fail
    } else {
        CheckStatus::Pass
    };
    CheckResult {
        name: name.to_string(),
        status,
        checked: actual,
        offending: minimum.saturating_sub(actual),
        examples: Vec::new(),
        message: format!("{actual} {what} (minimum {minimum})"),
    }
}

pub(super) fn minimum_routes(graph: &NetworkGraph, config: &ValidationConfig) -> CheckResult {
    cardinality("minimum_routes", graph.routes.len(), config.min_routes, "routes")
}

pub(super) fn minimum_stops(graph: &NetworkGraph, config: &ValidationConfig) -> CheckResult {
    cardinality("minimum_stops", graph.stops.len(), config.min_stops, "stops")
}

pub(super) fn required_fields(graph: &NetworkGraph, config: &ValidationConfig) -> CheckResult {
    let mut offenders = Offenders::new(config.max_examples);
    for (id, route) in &graph.routes {
        let missing = route.missing_fields();
        if !missing.is_empty() {
            offenders.push(|| format!("{id}: {}", missing.join(",")));
        }
    }
    let message = format!("{} route(s) with empty required fields", offenders.count);
    let status = fail_if_any(offenders.count);
    offenders.into_result("required_fields", status, graph.routes.len(), message)
}

pub(super) fn orphaned_routes(graph: &NetworkGraph, config: &ValidationConfig) -> CheckResult {
    let mut offenders = Offenders::new(config.max_examples);
    for id in graph.routes.keys() {
        let has_stops = graph
            .route_stops
            .get(id)
            .is_some_and(|edges| !edges.is_empty());
        if !has_stops {
            offenders.push(|| id.clone());
        }
    }

    let total = graph.routes.len();
    let ratio = if total == 0 {
        0.0
    } else {
        offenders.count as f64 / total as f64
    };
    let status = if ratio > config.max_orphan_ratio {
        CheckStatus::Fail
    } else if offenders.count > 0 {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    };
    let message = format!(
        "{} orphaned route(s), ratio {:.3} (maximum {:.3})",
        offenders.count, ratio, config.max_orphan_ratio
    );
    offenders.into_result("orphaned_routes", status, total, message)
}

/// Why a coordinate pair is unusable, or `None` if it is acceptable.
pub fn coordinate_problem(lat: f64, lon: f64, bbox: &BoundingBox) -> Option<&'static str> {
    if !lat.is_finite() || !lon.is_finite() {
        Some("non-finite")
    } else if lat == 0.0 || lon == 0.0 {
        Some("zero")
    } else if !bbox.contains(lat, lon) {
        Some("outside bounding box")
    } else {
        None
    }
}

pub(super) fn coordinates(graph: &NetworkGraph, config: &ValidationConfig) -> CheckResult {
    let mut offenders = Offenders::new(config.max_examples);
    for (id, stop) in &graph.stops {
        if let Some(problem) =
            coordinate_problem(stop.latitude, stop.longitude, &config.bounding_box)
        {
            offenders.push(|| format!("{id}: ({}, {}) {problem}", stop.latitude, stop.longitude));
        }
    }
    let message = format!("{} stop(s) with unusable coordinates", offenders.count);
    let status = fail_if_any(offenders.count);
    offenders.into_result("coordinates", status, graph.stops.len(), message)
}

pub(super) fn stop_cross_reference(graph: &NetworkGraph, config: &ValidationConfig) -> CheckResult {
    let mut offenders = Offenders::new(config.max_examples);
    for id in graph.stops.keys() {
        if !graph.stop_routes.contains_key(id) {
            offenders.push(|| id.clone());
        }
    }
    let message = format!("{} stop(s) served by no route", offenders.count);
    let status = warn_if_any(offenders.count);
    offenders.into_result("stop_cross_reference", status, graph.stops.len(), message)
}

pub(super) fn route_references(graph: &NetworkGraph, config: &ValidationConfig) -> CheckResult {
    let mut offenders = Offenders::new(config.max_examples);
    for id in graph.route_stops.keys() {
        if !graph.routes.contains_key(id) {
            offenders.push(|| id.clone());
        }
    }
    let message = format!("{} stop list(s) for unknown routes", offenders.count);
    let status = fail_if_any(offenders.count);
    offenders.into_result("route_references", status, graph.route_stops.len(), message)
}

pub(super) fn edge_stop_references(graph: &NetworkGraph, config: &ValidationConfig) -> CheckResult {
    let mut offenders = Offenders::new(config.max_examples);
    let mut checked = 0;
    for (route_id, edges) in &graph.route_stops {
        for edge in edges {
            checked += 1;
            if !graph.stops.contains_key(&edge.stop_id) {
                offenders.push(|| format!("{route_id} -> {}", edge.stop_id));
            }
        }
    }
    let message = format!("{} edge(s) pointing at stops without details", offenders.count);
    let status = warn_if_any(offenders.count);
    offenders.into_result("edge_stop_references", status, checked, message)
}

/// A route may only reference stops published by its own agency.
pub(super) fn stop_agency_consistency(
    graph: &NetworkGraph,
    config: &ValidationConfig,
) -> CheckResult {
    let mut offenders = Offenders::new(config.max_examples);
    let mut checked = 0;
    for (route_id, edges) in &graph.route_stops {
        let Some(route) = graph.routes.get(route_id) else {
            continue;
        };
        for edge in edges {
            let Some(stop) = graph.stops.get(&edge.stop_id) else {
                continue;
            };
            checked += 1;
            if stop.company != route.company {
                offenders.push(|| {
                    format!(
                        "{route_id} ({}) -> {} ({})",
                        route.company, edge.stop_id, stop.company
                    )
                });
            }
        }
    }
    let message = format!("{} edge(s) crossing agencies", offenders.count);
    let status = fail_if_any(offenders.count);
    offenders.into_result("stop_agency_consistency", status, checked, message)
}

pub(super) fn direction_vocabulary(graph: &NetworkGraph, config: &ValidationConfig) -> CheckResult {
    let mut offenders = Offenders::new(config.max_examples);
    let mut checked = 0;
    for (id, route) in &graph.routes {
        checked += 1;
        if !route.direction.is_recognized() {
            offenders.push(|| format!("route {id}: {:?}", route.direction.as_str()));
        }
    }
    for (stop_id, entries) in &graph.stop_routes {
        for entry in entries {
            checked += 1;
            if !entry.direction.is_recognized() {
                offenders.push(|| format!("stop {stop_id}: {:?}", entry.direction.as_str()));
            }
        }
    }
    let message = format!("{} unrecognized direction value(s)", offenders.count);
    let status = fail_if_any(offenders.count);
    offenders.into_result("direction_vocabulary", status, checked, message)
}

pub(super) fn agency_vocabulary(graph: &NetworkGraph, config: &ValidationConfig) -> CheckResult {
    let mut offenders = Offenders::new(config.max_examples);
    let mut checked = 0;
    for (id, route) in &graph.routes {
        checked += 1;
        if !route.company.is_recognized() {
            offenders.push(|| format!("route {id}: {:?}", route.company.as_str()));
        }
    }
    for (id, stop) in &graph.stops {
        checked += 1;
        if !stop.company.is_recognized() {
            offenders.push(|| format!("stop {id}: {:?}", stop.company.as_str()));
        }
    }
    for (stop_id, entries) in &graph.stop_routes {
        for entry in entries {
            checked += 1;
            if !entry.company.is_recognized() {
                offenders.push(|| format!("stop_routes {stop_id}: {:?}", entry.company.as_str()));
            }
        }
    }
    let message = format!("{} unrecognized agency value(s)", offenders.count);
    let status = fail_if_any(offenders.count);
    offenders.into_result("agency_vocabulary", status, checked, message)
}
