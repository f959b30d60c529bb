//! Resamples routed paths to a fixed number of points.

use crate::geometry::{DEFAULT_COORDINATE_PRECISION, Position, SimplifiedPath};

/// Reduces or expands `path` to exactly `path_length` points rounded to 5 decimals.
pub fn simplify(path: &[Position], path_length: usize) -> SimplifiedPath {
    simplify_with_precision(path, path_length, DEFAULT_COORDINATE_PRECISION)
}

/// Same as [`simplify`] with an explicit rounding precision.
///
/// Longer paths keep `path_length` evenly spaced original points, always including
/// the first and last one. Shorter paths are linearly interpolated along their index.
/// An empty input yields an empty output.
pub fn simplify_with_precision(
    path: &[Position],
    path_length: usize,
    precision: u32,
) -> SimplifiedPath {
    if path.is_empty() || path_length == 0 {
        return Vec::new();
    }

    if path.len() == path_length {
        return path.iter().map(|p| p.rounded(precision)).collect();
    }

    if path.len() > path_length {
        return evenly_spaced_indices(path.len(), path_length)
            .map(|i| path[i].rounded(precision))
            .collect();
    }

    interpolate(path, path_length)
        .into_iter()
        .map(|p| p.rounded(precision))
        .collect()
}

fn evenly_spaced_indices(len: usize, count: usize) -> impl Iterator<Item = usize> {
    let last = len - 1;

    (0..count).map(move |j| {
        if count == 1 {
            0
        } else {
            // integer arithmetic keeps the final index exact
            j * last / (count - 1)
        }
    })
}

fn interpolate(path: &[Position], count: usize) -> Vec<Position> {
    let last = path.len() - 1;

    if last == 0 || count == 1 {
        return vec![path[0]; count];
    }

    (0..count)
        .map(|j| {
            if j == count - 1 {
                return path[last];
            }

            let t = j as f64 * last as f64 / (count - 1) as f64;
            let index = t.floor() as usize;

            if index >= last {
                path[last]
            } else {
                path[index].lerp(path[index + 1], t - index as f64)
            }
        })
        .collect()
}
