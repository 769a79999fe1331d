//! Thread-safe graph store written by the source adapters.
//!
//! Every mutation takes the single store lock for the duration of one map
//! write and releases it before returning, so no caller can hold it across
//! a network call. Writes are insert-or-overwrite; the last writer wins.

use crate::model::{Agency, Route, RouteMap, RouteStopEdge, RouteStopsMap, Stop, StopMap};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct StoreInner {
    routes: RouteMap,
    stops: StopMap,
    route_stops: RouteStopsMap,
    seen_stops: HashSet<(Agency, String)>,
}

#[derive(Debug, Default)]
pub struct GraphStore {
    inner: Mutex<StoreInner>,
}

/// The graph as it stands once every adapter has finished writing.
///
/// Only obtainable through [`GraphStore::freeze`], which fails while any task
/// still holds a handle to the store.
#[derive(Debug, Default, Clone)]
pub struct CollectedGraph {
    pub routes: RouteMap,
    pub stops: StopMap,
    pub route_stops: RouteStopsMap,
}

impl GraphStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn upsert_route(&self, id: impl Into<String>, route: Route) {
        self.lock().routes.insert(id.into(), route);
    }

    pub fn upsert_stop(&self, id: impl Into<String>, stop: Stop) {
        self.lock().stops.insert(id.into(), stop);
    }

    pub fn set_route_stops(&self, route_id: impl Into<String>, edges: Vec<RouteStopEdge>) {
        self.lock().route_stops.insert(route_id.into(), edges);
    }

    /// Records `stop_id` as seen for `agency`. Returns `true` if it was not
    /// seen before, meaning the caller should fetch its details.
    pub fn claim_stop(&self, agency: &Agency, stop_id: &str) -> bool {
        self.lock()
            .seen_stops
            .insert((agency.clone(), stop_id.to_string()))
    }

    /// `(routes, stops, route_stops)` entry counts.
    pub fn counts(&self) -> (usize, usize, usize) {
        let inner = self.lock();
        (inner.routes.len(), inner.stops.len(), inner.route_stops.len())
    }

    /// Consumes the last handle to the store and hands back its maps.
    ///
    /// Returns the handle unchanged if other clones are still alive, which
    /// means some collection task has not been joined yet.
    pub fn freeze(self: Arc<Self>) -> Result<CollectedGraph, Arc<Self>> {
        let store = Arc::try_unwrap(self)?;
        let inner = store
            .inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(CollectedGraph {
            routes: inner.routes,
            stops: inner.stops,
            route_stops: inner.route_stops,
        })
    }
}
