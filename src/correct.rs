//! Clamps future-dated points to a trusted processing time.
//!
//! The store rejects points timestamped too far ahead of its own clock;
//! client clock skew and malformed input both produce such points.
//! Rewriting their time to the processing time observed by this pipeline
//! keeps the measurement instead of dropping it.

use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::point::{Point, TimeUnit};

/// How far ahead of the wall clock a point may be timestamped before it
/// is rewritten.
pub const FUTURE_THRESHOLD: Duration = Duration::from_secs(15 * 60);

/// Clamps each future-dated point against the current wall clock.
pub fn clamp_future_points(points: Vec<Point>, logical_time_ms: i64) -> Vec<Point> {
    clamp_future_points_at(points, logical_time_ms, Utc::now().timestamp_millis())
}

/// Clamps each point whose time, normalized to milliseconds, exceeds
/// `now_ms` plus [`FUTURE_THRESHOLD`]: its time becomes `logical_time_ms`
/// in milliseconds. All other points pass through untouched. Pure and
/// order-preserving.
pub fn clamp_future_points_at(
    points: Vec<Point>,
    logical_time_ms: i64,
    now_ms: i64,
) -> Vec<Point> {
    let cutoff_ms = now_ms.saturating_add(FUTURE_THRESHOLD.as_millis() as i64);

    points
        .into_iter()
        .map(|mut point| {
            let time_ms = point.time_millis();
            if time_ms > cutoff_ms {
                debug!(
                    measure = %point.measure_name,
                    time_ms,
                    cutoff_ms,
                    logical_time_ms,
                    "rewriting future-dated point to logical time",
                );
                point.time = logical_time_ms;
                point.time_unit = TimeUnit::Milliseconds;
            }
            point
        })
        .collect()
}
