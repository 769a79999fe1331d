//! Record types for the aggregated bus network.
//!
//! Field names follow the published snapshot layout consumed by the mobile
//! client, so renaming a field here is a breaking change for downstream users.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transit operator that owns a route or stop.
///
/// Values outside the known set are kept verbatim so that a snapshot loaded
/// from disk can still be validated instead of failing to deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Agency {
    Kmb,
    Ctb,
    Nwfb,
    Unrecognized(String),
}

impl Agency {
    pub fn as_str(&self) -> &str {
        match self {
            Agency::Kmb => "KMB",
            Agency::Ctb => "CTB",
            Agency::Nwfb => "NWFB",
            Agency::Unrecognized(raw) => raw,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Agency::Unrecognized(_))
    }

    /// Builds an agency from an upstream company code such as `"CTB"`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "KMB" => Agency::Kmb,
            "CTB" => Agency::Ctb,
            "NWFB" => Agency::Nwfb,
            other => Agency::Unrecognized(other.to_string()),
        }
    }
}

impl From<String> for Agency {
    fn from(s: String) -> Self {
        Agency::from_code(&s)
    }
}

impl From<Agency> for String {
    fn from(a: Agency) -> Self {
        a.as_str().to_string()
    }
}

impl fmt::Display for Agency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of travel for a route variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Direction {
    Inbound,
    Outbound,
    Unrecognized(String),
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Inbound, Direction::Outbound];

    pub fn as_str(&self) -> &str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
            Direction::Unrecognized(raw) => raw,
        }
    }

    /// Single-letter code used in route ids and by the bulk API's `bound` field.
    pub fn code(&self) -> &str {
        match self {
            Direction::Inbound => "I",
            Direction::Outbound => "O",
            Direction::Unrecognized(raw) => raw,
        }
    }

    /// Parses a `bound` code (`"I"` / `"O"`).
    pub fn from_bound(bound: &str) -> Self {
        match bound {
            "I" => Direction::Inbound,
            "O" => Direction::Outbound,
            other => Direction::Unrecognized(other.to_string()),
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Direction::Unrecognized(_))
    }
}

impl From<String> for Direction {
    fn from(s: String) -> Self {
        match s.as_str() {
            "inbound" => Direction::Inbound,
            "outbound" => Direction::Outbound,
            _ => Direction::Unrecognized(s),
        }
    }
}

impl From<Direction> for String {
    fn from(d: Direction) -> Self {
        d.as_str().to_string()
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A physical stop as published by one agency.
///
/// Stops are keyed by [`stop_key`], so two agencies publishing the same
/// upstream id stay separate records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    /// Id used by the agency's own API, e.g. for arrival lookups.
    pub upstream_id: String,
    pub name_tc: String,
    pub name_en: String,
    pub latitude: f64,
    pub longitude: f64,
    pub company: Agency,
}

/// One direction (and, for the bulk agency, one collapsed service type) of a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub route_number: String,
    pub company: Agency,
    pub direction: Direction,
    pub origin_tc: String,
    pub origin_en: String,
    pub dest_tc: String,
    pub dest_en: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
}

impl Route {
    /// Names of required fields that are empty on this record.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let fields = [
            ("route_number", self.route_number.as_str()),
            ("company", self.company.as_str()),
            ("direction", self.direction.as_str()),
            ("origin_tc", self.origin_tc.as_str()),
            ("origin_en", self.origin_en.as_str()),
            ("dest_tc", self.dest_tc.as_str()),
            ("dest_en", self.dest_en.as_str()),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                missing.push(name);
            }
        }
        missing
    }
}

/// An edge from a route to one of its stops. The route id is the key of the
/// owning `route_stops` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteStopEdge {
    pub stop_id: String,
    pub sequence: u32,
}

/// Derived entry listing a route that serves a stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRouteEdge {
    pub route_number: String,
    pub company: Agency,
    pub direction: Direction,
    pub destination: String,
    pub sequence: u32,
    pub route_id: String,
}

pub type RouteMap = IndexMap<String, Route>;
pub type StopMap = IndexMap<String, Stop>;
pub type RouteStopsMap = IndexMap<String, Vec<RouteStopEdge>>;
pub type StopRoutesMap = IndexMap<String, Vec<StopRouteEdge>>;

/// The four graph maps of one run.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkGraph {
    pub routes: RouteMap,
    pub stops: StopMap,
    pub route_stops: RouteStopsMap,
    pub stop_routes: StopRoutesMap,
}

/// Agency-scoped stop key used in `stops`, route edges and `stop_routes`.
pub fn stop_key(agency: &Agency, upstream_id: &str) -> String {
    format!("{agency}_{upstream_id}")
}

/// Stable sort by sequence; edges sharing a sequence keep encounter order.
pub fn sort_by_sequence(edges: &mut [RouteStopEdge]) {
    edges.sort_by_key(|e| e.sequence);
}
