//! Structural and semantic checks run before a snapshot may be published.
//!
//! Every check runs regardless of the others' outcome. The overall status is
//! the worst individual status, and any `FAIL` blocks publishing.

mod checks;

pub use checks::coordinate_problem;

use crate::model::NetworkGraph;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Thresholds for the validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_routes: usize,
    pub min_stops: usize,
    /// Largest tolerated share of routes with no stops, in `0.0..=1.0`.
    pub max_orphan_ratio: f64,
    pub bounding_box: BoundingBox,
    /// Offending examples kept per check.
    pub max_examples: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_routes: 1500,
            min_stops: 3000,
            max_orphan_ratio: 0.2,
            bounding_box: BoundingBox::default(),
            max_examples: 10,
        }
    }
}

/// Inclusive latitude/longitude rectangle, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Default for BoundingBox {
    /// Hong Kong, with some slack around the territory's edges.
    fn default() -> Self {
        Self {
            min_lat: 22.1,
            max_lat: 22.6,
            min_lon: 113.8,
            max_lon: 114.5,
        }
    }
}

impl BoundingBox {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
        })
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    /// Number of records inspected.
    pub checked: usize,
    /// Number of records that tripped the check.
    pub offending: usize,
    pub examples: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub status: CheckStatus,
    pub checks: Vec<CheckResult>,
}

impl ValidationReport {
    fn from_checks(checks: Vec<CheckResult>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(CheckStatus::Pass);
        Self { status, checks }
    }

    pub fn passed(&self) -> bool {
        self.status != CheckStatus::Fail
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn failing_checks(&self) -> Vec<&CheckResult> {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .collect()
    }
}

/// Runs every check against `graph`.
pub fn validate(graph: &NetworkGraph, config: &ValidationConfig) -> ValidationReport {
    let checks = vec![
        checks::minimum_routes(graph, config),
        checks::minimum_stops(graph, config),
        checks::required_fields(graph, config),
        checks::orphaned_routes(graph, config),
        checks::coordinates(graph, config),
        checks::stop_cross_reference(graph, config),
        checks::route_references(graph, config),
        checks::edge_stop_references(graph, config),
        checks::stop_agency_consistency(graph, config),
        checks::direction_vocabulary(graph, config),
        checks::agency_vocabulary(graph, config),
    ];
    let report = ValidationReport::from_checks(checks);

    for check in &report.checks {
        match check.status {
            CheckStatus::Pass => info!(check = %check.name, "{}", check.message),
            CheckStatus::Warn => warn!(check = %check.name, examples = ?check.examples, "{}", check.message),
            CheckStatus::Fail => warn!(
                check = %check.name,
                offending = check.offending,
                examples = ?check.examples,
                "FAIL: {}",
                check.message
            ),
        }
    }
    info!(status = %report.status, "Validation finished");
    report
}
