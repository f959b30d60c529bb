//! The refresh cycle: poll, pair, route, simplify, publish, sleep.
//!
//! The previous poll's positions are passed into [`RefreshLoop::run_cycle`]
//! and handed back as the baseline for the next one. A failed poll hands the
//! old baseline straight back, so pairing always happens against the last
//! poll that succeeded.

use crate::config::{LarchConfig, SleepPolicy};
use crate::fanout::{PairSet, RouteFanout};
use crate::feed::FeedSource;
use crate::geometry::{PositionPair, PositionSet};
use crate::simplify::simplify_with_precision;
use crate::snapshot::{Snapshot, SnapshotStore};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RefreshSettings {
    pub path_length: usize,
    pub coordinate_precision: u32,
    pub interval: Duration,
    pub sleep_policy: SleepPolicy,
    pub skip_stationary: bool,
}

impl From<&LarchConfig> for RefreshSettings {
    fn from(config: &LarchConfig) -> Self {
        Self {
            path_length: config.path_length,
            coordinate_precision: config.coordinate_precision,
            interval: config.refresh_interval,
            sleep_policy: config.sleep_policy,
            skip_stationary: config.skip_stationary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Polling,
    Routing,
    Publishing,
    Sleeping,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Idle => "idle",
            Phase::Polling => "polling",
            Phase::Routing => "routing",
            Phase::Publishing => "publishing",
            Phase::Sleeping => "sleeping",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The feed could not be polled. Nothing was published.
    FeedUnavailable,
    Published {
        polled: usize,
        paired: usize,
        routed: usize,
        failed: usize,
    },
}

/// Vehicles present in both polls. With `skip_stationary`, vehicles that did
/// not move are left out.
pub fn pair_positions(
    previous: &PositionSet,
    current: &PositionSet,
    skip_stationary: bool,
) -> PairSet {
    current
        .iter()
        .filter_map(|(vehicle_id, current)| {
            let previous = previous.get(vehicle_id)?;

            if skip_stationary && previous == current {
                return None;
            }

            Some((
                vehicle_id.clone(),
                PositionPair {
                    previous: *previous,
                    current: *current,
                },
            ))
        })
        .collect()
}

/// How long to wait after a cycle that took `elapsed`.
pub fn sleep_duration(policy: SleepPolicy, interval: Duration, elapsed: Duration) -> Duration {
    match policy {
        SleepPolicy::Fixed => interval,
        SleepPolicy::Aligned => interval.saturating_sub(elapsed),
    }
}

pub struct RefreshLoop {
    feed: Arc<dyn FeedSource>,
    fanout: RouteFanout,
    store: Arc<SnapshotStore>,
    settings: RefreshSettings,
}

impl RefreshLoop {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        fanout: RouteFanout,
        store: Arc<SnapshotStore>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            feed,
            fanout,
            store,
            settings,
        }
    }

    /// Runs one cycle against `previous` and returns the baseline for the next.
    pub async fn run_cycle(&self, previous: PositionSet) -> (PositionSet, CycleOutcome) {
        let start = Instant::now();

        debug!("refresh phase: {}", Phase::Polling);
        let current = match self.feed.poll().await {
            Ok(current) => current,
            Err(feed_error) => {
                warn!(
                    "feed poll failed, keeping {} vehicles from the last good poll: {}",
                    previous.len(),
                    feed_error
                );
                return (previous, CycleOutcome::FeedUnavailable);
            }
        };

        debug!("refresh phase: {}", Phase::Routing);
        let pairs = pair_positions(&previous, &current, self.settings.skip_stationary);
        let paired = pairs.len();
        let routed = self.fanout.fanout(pairs).await;

        debug!("refresh phase: {}", Phase::Publishing);
        let paths = routed
            .paths
            .into_iter()
            .map(|(vehicle_id, path)| {
                let simplified = simplify_with_precision(
                    &path,
                    self.settings.path_length,
                    self.settings.coordinate_precision,
                );
                (vehicle_id, simplified)
            })
            .collect();

        let snapshot = Snapshot {
            as_of: Utc::now(),
            paths,
            positions: current.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        };

        let outcome = CycleOutcome::Published {
            polled: current.len(),
            paired,
            routed: snapshot.paths.len(),
            failed: routed.failed,
        };

        info!(
            "refresh cycle took {:.2?}: {} polled, {} paired, {} routed, {} failed",
            start.elapsed(),
            current.len(),
            paired,
            snapshot.paths.len(),
            routed.failed
        );

        self.store.publish(snapshot);

        (current, outcome)
    }

    /// Cycles until the process exits.
    pub async fn run(self, mut baseline: PositionSet) {
        info!(
            "refresh loop started, interval {:?} ({:?})",
            self.settings.interval, self.settings.sleep_policy
        );

        loop {
            debug!("refresh phase: {}", Phase::Idle);
            let start = Instant::now();

            let (next_baseline, _outcome) = self.run_cycle(baseline).await;
            baseline = next_baseline;

            let pause = sleep_duration(
                self.settings.sleep_policy,
                self.settings.interval,
                start.elapsed(),
            );
            debug!("refresh phase: {} for {:.2?}", Phase::Sleeping, pause);
            tokio::time::sleep(pause).await;
        }
    }
}
