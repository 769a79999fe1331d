//! Snapshot and metadata documents.

use super::checksum::Checksums;
use crate::fetch::CallStats;
use crate::model::NetworkGraph;
use crate::validate::CheckStatus;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version stamp fixed at the start of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunVersion {
    /// Unix milliseconds at run start.
    pub version: i64,
    pub generated_at: DateTime<Utc>,
}

impl RunVersion {
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(instant: DateTime<Utc>) -> Self {
        let generated_at = instant.trunc_subsecs(3);
        Self {
            version: generated_at.timestamp_millis(),
            generated_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_routes: usize,
    pub total_stops: usize,
    /// Stops with at least one serving route.
    pub total_stop_route_mappings: usize,
    pub routes_by_company: BTreeMap<String, usize>,
    #[serde(default)]
    pub api_calls_made: u64,
    #[serde(default)]
    pub successful_calls: u64,
    #[serde(default)]
    pub failed_calls: u64,
    #[serde(default)]
    pub success_rate: String,
}

impl Summary {
    pub fn new(graph: &NetworkGraph, calls: &CallStats) -> Self {
        let mut routes_by_company = BTreeMap::new();
        for route in graph.routes.values() {
            *routes_by_company
                .entry(route.company.to_string())
                .or_insert(0) += 1;
        }
        Self {
            total_routes: graph.routes.len(),
            total_stops: graph.stops.len(),
            total_stop_route_mappings: graph.stop_routes.len(),
            routes_by_company,
            api_calls_made: calls.api_calls_made,
            successful_calls: calls.successful_calls,
            failed_calls: calls.failed_calls,
            success_rate: calls.success_rate(),
        }
    }
}

/// The published document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: i64,
    pub generated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub graph: NetworkGraph,
    pub summary: Summary,
    pub validation_status: CheckStatus,
}

impl Snapshot {
    pub fn new(
        run: RunVersion,
        graph: NetworkGraph,
        calls: &CallStats,
        validation_status: CheckStatus,
    ) -> Self {
        let summary = Summary::new(&graph, calls);
        Self {
            version: run.version,
            generated_at: run.generated_at,
            graph,
            summary,
            validation_status,
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataSummary {
    pub total_routes: usize,
    pub total_stops: usize,
    pub total_mappings: usize,
    pub companies: Vec<String>,
}

/// Small companion document that lets consumers check for updates and verify
/// a download without parsing the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub version: i64,
    pub generated_at: DateTime<Utc>,
    pub file_size_bytes: u64,
    pub md5_checksum: String,
    pub sha256_checksum: String,
    pub summary: MetadataSummary,
    pub download_url: String,
}

impl SnapshotMetadata {
    pub fn new(snapshot: &Snapshot, bytes: &[u8], download_url: String) -> Self {
        let checksums = Checksums::of(bytes);
        Self {
            version: snapshot.version,
            generated_at: snapshot.generated_at,
            file_size_bytes: bytes.len() as u64,
            md5_checksum: checksums.md5,
            sha256_checksum: checksums.sha256,
            summary: MetadataSummary {
                total_routes: snapshot.summary.total_routes,
                total_stops: snapshot.summary.total_stops,
                total_mappings: snapshot.summary.total_stop_route_mappings,
                companies: snapshot.summary.routes_by_company.keys().cloned().collect(),
            },
            download_url,
        }
    }

    /// Key/value pairs attached to the uploaded snapshot object.
    pub fn object_metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("version".to_string(), self.version.to_string()),
            ("generated_at".to_string(), self.generated_at.to_rfc3339()),
            ("file_size".to_string(), self.file_size_bytes.to_string()),
            ("md5_checksum".to_string(), self.md5_checksum.clone()),
            ("sha256_checksum".to_string(), self.sha256_checksum.clone()),
            ("total_routes".to_string(), self.summary.total_routes.to_string()),
            ("total_stops".to_string(), self.summary.total_stops.to_string()),
        ])
    }
}
