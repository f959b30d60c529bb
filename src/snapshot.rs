use crate::geometry::{Position, SimplifiedPath, VehicleId};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One fully computed refresh result.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub as_of: DateTime<Utc>,
    /// Routed and resampled path per vehicle. This is the published document.
    pub paths: BTreeMap<VehicleId, SimplifiedPath>,
    /// Every position of the poll that produced this snapshot.
    pub positions: BTreeMap<VehicleId, Position>,
}

impl Snapshot {
    pub fn empty(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            paths: BTreeMap::new(),
            positions: BTreeMap::new(),
        }
    }

    /// `{"vehicle": [[lat, lon], ...], ...}`
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.paths)
    }

    /// Reads a document written by [`Snapshot::to_json`]. Positions are not
    /// part of the document and come back empty.
    pub fn from_json(bytes: &[u8], as_of: DateTime<Utc>) -> Result<Self, serde_json::Error> {
        Ok(Self {
            as_of,
            paths: serde_json::from_slice(bytes)?,
            positions: BTreeMap::new(),
        })
    }
}

/// Latest published [`Snapshot`], swapped in as a whole.
#[derive(Default)]
pub struct SnapshotStore {
    current: ArcSwapOption<Snapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
        }
    }

    pub fn publish(&self, snapshot: Snapshot) {
        self.current.store(Some(Arc::new(snapshot)));
    }

    /// `None` until the first cycle has published.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }
}
