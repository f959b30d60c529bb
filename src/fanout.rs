//! Bounded fan-out of routing requests.
//!
//! Work is split into batches that run one after the other. Inside a batch
//! every vehicle gets its own task, but a task only talks to the routing engine
//! while it holds a permit from the shared semaphore, so the number of
//! outstanding requests never exceeds the cap no matter how many batches or
//! callers there are.

use crate::geometry::{PositionPair, RawPath, VehicleId};
use crate::routing::{RouteClient, RouteError};
use ahash::AHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub type PairSet = AHashMap<VehicleId, PositionPair>;

#[derive(Debug, Clone, Copy)]
pub struct FanoutSettings {
    pub concurrency_cap: usize,
    pub batch_size: usize,
    pub request_timeout: Duration,
}

/// Paths that came back, plus how many vehicles got none.
#[derive(Debug, Default)]
pub struct FanoutResult {
    pub paths: AHashMap<VehicleId, RawPath>,
    pub failed: usize,
}

#[derive(Clone)]
pub struct RouteFanout {
    client: Arc<dyn RouteClient>,
    permits: Arc<Semaphore>,
    settings: FanoutSettings,
}

impl RouteFanout {
    pub fn new(client: Arc<dyn RouteClient>, settings: FanoutSettings) -> Self {
        let settings = FanoutSettings {
            concurrency_cap: settings.concurrency_cap.max(1),
            batch_size: settings.batch_size.max(1),
            ..settings
        };

        Self {
            client,
            permits: Arc::new(Semaphore::new(settings.concurrency_cap)),
            settings,
        }
    }

    pub fn settings(&self) -> FanoutSettings {
        self.settings
    }

    /// Permits not currently held by an outstanding request.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Routes every pair, batch by batch. A failed vehicle is left out of the
    /// result and never affects the others.
    pub async fn fanout(&self, pairs: PairSet) -> FanoutResult {
        let start = Instant::now();

        let mut work: Vec<(VehicleId, PositionPair)> = pairs.into_iter().collect();
        work.sort_by(|a, b| a.0.cmp(&b.0));

        let total = work.len();
        let mut result = FanoutResult {
            paths: AHashMap::with_capacity(total),
            failed: 0,
        };

        for (batch_index, batch) in work.chunks(self.settings.batch_size).enumerate() {
            let mut tasks = JoinSet::new();

            for (vehicle_id, pair) in batch {
                tasks.spawn(route_one(
                    Arc::clone(&self.client),
                    Arc::clone(&self.permits),
                    self.settings.request_timeout,
                    vehicle_id.clone(),
                    *pair,
                ));
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((vehicle_id, Ok(path))) => {
                        result.paths.insert(vehicle_id, path);
                    }
                    Ok((vehicle_id, Err(route_error))) => {
                        debug!("no route for {}: {}", vehicle_id, route_error);
                        result.failed += 1;
                    }
                    Err(join_error) => {
                        warn!("routing task in batch {} died: {}", batch_index, join_error);
                        result.failed += 1;
                    }
                }
            }
        }

        info!(
            "routed {}/{} vehicles ({} failed) in {:.2?}",
            result.paths.len(),
            total,
            result.failed,
            start.elapsed()
        );

        result
    }
}

async fn route_one(
    client: Arc<dyn RouteClient>,
    permits: Arc<Semaphore>,
    request_timeout: Duration,
    vehicle_id: VehicleId,
    pair: PositionPair,
) -> (VehicleId, Result<RawPath, RouteError>) {
    // the permit is released when this task ends, whichever way it ends
    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(closed) => return (vehicle_id, Err(RouteError::Aborted(closed.to_string()))),
    };

    let routed = tokio::time::timeout(request_timeout, client.route(pair.previous, pair.current))
        .await
        .unwrap_or_else(|_elapsed| Err(RouteError::Timeout(request_timeout)));

    (vehicle_id, routed)
}
