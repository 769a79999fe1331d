//! Stop → routes reverse index.

use crate::model::{StopRouteEdge, StopRoutesMap};
use crate::store::CollectedGraph;
use tracing::{info, warn};

/// Builds `stop_routes` from the frozen route → stops lists.
///
/// Entries for a stop appear in the order their routes appear in
/// `route_stops`. A route id with no route record is skipped; the validator
/// reports it separately.
pub fn build_reverse_index(graph: &CollectedGraph) -> StopRoutesMap {
    let mut stop_routes = StopRoutesMap::new();

    for (route_id, edges) in &graph.route_stops {
        let Some(route) = graph.routes.get(route_id) else {
            warn!(route_id = %route_id, "Edges for unknown route skipped in reverse index");
            continue;
        };

        for edge in edges {
            stop_routes
                .entry(edge.stop_id.clone())
                .or_default()
                .push(StopRouteEdge {
                    route_number: route.route_number.clone(),
                    company: route.company.clone(),
                    direction: route.direction.clone(),
                    destination: route.dest_tc.clone(),
                    sequence: edge.sequence,
                    route_id: route_id.clone(),
                });
        }
    }

    info!(stops = stop_routes.len(), "Reverse index built");
    stop_routes
}
