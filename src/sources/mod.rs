//! Source adapters that pull one agency's data into the [`GraphStore`].

pub mod batch;
pub mod payload;
pub mod per_route;

pub use batch::BatchSource;
pub use per_route::PerRouteSource;

use crate::error::PipelineError;
use crate::model::{Agency, Direction};
use crate::store::GraphStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How a canonical route id is built from upstream route keys.
///
/// The bulk agency publishes several service types (e.g. express and
/// all-stop variants) under one route number and direction. With
/// [`RouteIdPolicy::CollapseServiceType`] they share a single route id:
/// the first variant's metadata is kept and every variant's edges are
/// merged into one stop list. [`RouteIdPolicy::KeepServiceType`] gives each
/// variant its own id instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteIdPolicy {
    #[default]
    CollapseServiceType,
    KeepServiceType,
}

impl RouteIdPolicy {
    pub fn route_id(
        &self,
        agency: &Agency,
        route_number: &str,
        direction: &Direction,
        service_type: Option<&str>,
    ) -> String {
        match (self, service_type) {
            (RouteIdPolicy::KeepServiceType, Some(st)) => {
                format!("{}_{}_{}_{}", agency, route_number, direction.code(), st)
            }
            _ => format!("{}_{}_{}", agency, route_number, direction.code()),
        }
    }
}

/// Counts reported by an adapter once its phase completes.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AdapterSummary {
    pub agency: String,
    pub routes: usize,
    pub routes_with_stops: usize,
    pub stops: usize,
    pub edges: usize,
    /// Edges dropped because no route metadata exists for their route id.
    pub dropped_edges: usize,
    /// Edges pointing at a stop the source never described.
    pub unresolved_stops: usize,
    pub failed_tasks: usize,
}

/// One agency's collection strategy.
///
/// `collect` returns only after every write it started has landed in the
/// store; a phase-level failure is returned as an error and nothing from a
/// failed run is ever published.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn agency(&self) -> Agency;

    async fn collect(&self, store: &Arc<GraphStore>) -> Result<AdapterSummary, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_drops_service_type() {
        let policy = RouteIdPolicy::CollapseServiceType;
        let id = policy.route_id(&Agency::Kmb, "1A", &Direction::Outbound, Some("2"));
        assert_eq!(id, "KMB_1A_O");
    }

    #[test]
    fn test_keep_service_type() {
        let policy = RouteIdPolicy::KeepServiceType;
        let id = policy.route_id(&Agency::Kmb, "1A", &Direction::Inbound, Some("2"));
        assert_eq!(id, "KMB_1A_I_2");
        let id = policy.route_id(&Agency::Ctb, "E23", &Direction::Inbound, None);
        assert_eq!(id, "CTB_E23_I");
    }

    #[test]
    fn test_policy_deserializes_from_snake_case() {
        let policy: RouteIdPolicy = serde_json::from_str("\"keep_service_type\"").unwrap();
        assert_eq!(policy, RouteIdPolicy::KeepServiceType);
    }
}
