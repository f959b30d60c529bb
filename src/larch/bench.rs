//! Throughput check for the routing engine: fans out one request per synthetic
//! vehicle scattered around a base location and reports how long it took.

use larch::fanout::{PairSet, RouteFanout};
use larch::geometry::{Position, PositionPair};
use larch::simplify::simplify_with_precision;
use rand::Rng;
use std::time::Instant;

const METERS_PER_DEGREE: f64 = 111_320.0;

/// Uniform points within `distance` meters of `base` along each axis.
pub fn random_positions(
    rng: &mut impl Rng,
    base: Position,
    count: usize,
    distance: f64,
) -> Vec<Position> {
    let lon_scale = base.lat.to_radians().cos();

    (0..count)
        .map(|_| {
            let lat_offset = rng.random_range(-distance..=distance) / METERS_PER_DEGREE;
            let lon_offset =
                rng.random_range(-distance..=distance) / METERS_PER_DEGREE / lon_scale;
            Position::new(base.lat + lat_offset, base.lon + lon_offset)
        })
        .collect()
}

/// Every vehicle asks for a route from its position to itself.
pub fn stationary_pairs(positions: &[Position]) -> PairSet {
    positions
        .iter()
        .enumerate()
        .map(|(i, position)| {
            (
                format!("bench-{:06}", i),
                PositionPair {
                    previous: *position,
                    current: *position,
                },
            )
        })
        .collect()
}

pub struct BenchReport {
    pub requests: usize,
    pub routed: usize,
    pub failed: usize,
    pub elapsed: std::time::Duration,
}

pub async fn run(
    fanout: &RouteFanout,
    positions: &[Position],
    path_length: usize,
    coordinate_precision: u32,
) -> BenchReport {
    let start = Instant::now();

    let result = fanout.fanout(stationary_pairs(positions)).await;

    let simplified = result
        .paths
        .values()
        .map(|path| simplify_with_precision(path, path_length, coordinate_precision))
        .filter(|path| path.len() == path_length)
        .count();

    BenchReport {
        requests: positions.len(),
        routed: simplified,
        failed: result.failed,
        elapsed: start.elapsed(),
    }
}
