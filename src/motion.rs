// Motion estimation
// Derives heading, speed and a moving/stationary classification from raw
// location samples. Only the previous sample is retained.

use serde::Deserialize;
use tracing::debug;

use crate::constants::{MIN_DISPLACEMENT_M, MOVING_THRESHOLD_MPS, RECENT_MOVE_MS};
use crate::geodesy;

/// One fix from the location source.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSample {
    pub lat: f64,
    pub lng: f64,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub reported_heading_deg: Option<f64>,
    #[serde(default)]
    pub speed_mps: Option<f64>,
}

/// Derived motion, overwritten on every sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionState {
    pub lat: f64,
    pub lng: f64,
    /// Degrees clockwise from north
    pub heading_deg: f64,
    pub speed_mps: f64,
    /// Instantaneous classification from this sample
    pub moving: bool,
    /// Timestamp of the last sample classified as moving
    pub last_move_timestamp_ms: Option<i64>,
}

/// Usable device-reported value: finite and not a negative "unknown" sentinel.
fn reported(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite() && *x >= 0.0)
}

#[derive(Debug, Default)]
pub struct MotionEstimator {
    previous: Option<PositionSample>,
    state: Option<MotionState>,
    /// Last value of the recently-moved indicator handed out
    indicator: bool,
}

impl MotionEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest motion state; `None` until the first sample.
    pub fn state(&self) -> Option<&MotionState> {
        self.state.as_ref()
    }

    /// Fold one sample into the motion state.
    pub fn ingest(&mut self, sample: PositionSample) -> MotionState {
        let state = match (self.previous, self.state) {
            (Some(prev), Some(last)) => {
                let dist_m = geodesy::haversine_m(prev.lat, prev.lng, sample.lat, sample.lng);
                let elapsed_ms = sample.timestamp_ms - prev.timestamp_ms;
                let elapsed_s = (elapsed_ms as f64 / 1000.0).max(1.0);

                let heading_deg = if let Some(h) = reported(sample.reported_heading_deg) {
                    geodesy::normalize_deg(h)
                } else if dist_m > MIN_DISPLACEMENT_M {
                    geodesy::initial_bearing_deg(prev.lat, prev.lng, sample.lat, sample.lng)
                } else {
                    last.heading_deg
                };

                let speed_mps = reported(sample.speed_mps).unwrap_or(dist_m / elapsed_s);
                let moving = speed_mps >= MOVING_THRESHOLD_MPS;
                let last_move_timestamp_ms = if moving {
                    Some(sample.timestamp_ms)
                } else {
                    last.last_move_timestamp_ms
                };

                MotionState {
                    lat: sample.lat,
                    lng: sample.lng,
                    heading_deg,
                    speed_mps,
                    moving,
                    last_move_timestamp_ms,
                }
            }
            _ => MotionState {
                lat: sample.lat,
                lng: sample.lng,
                heading_deg: 0.0,
                speed_mps: reported(sample.speed_mps).unwrap_or(0.0),
                moving: false,
                last_move_timestamp_ms: None,
            },
        };

        debug!(
            "motion: heading={:.0} speed={:.2}m/s moving={}",
            state.heading_deg, state.speed_mps, state.moving
        );
        self.previous = Some(sample);
        self.state = Some(state);
        state
    }

    /// Has the device moved within the recent window ending at `now_ms`?
    pub fn recently_moved(&self, now_ms: i64) -> bool {
        self.state
            .and_then(|s| s.last_move_timestamp_ms)
            .map_or(false, |t| now_ms - t < RECENT_MOVE_MS)
    }

    /// Periodic indicator check. Returns the new value only when it flips.
    pub fn refresh_indicator(&mut self, now_ms: i64) -> Option<bool> {
        let moved = self.recently_moved(now_ms);
        if moved == self.indicator {
            return None;
        }
        self.indicator = moved;
        Some(moved)
    }

    /// Forget everything (sign-out).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(lat: f64, lng: f64, ts: i64) -> PositionSample {
        PositionSample {
            lat,
            lng,
            timestamp_ms: ts,
            reported_heading_deg: None,
            speed_mps: None,
        }
    }

    #[test]
    fn test_first_sample_defaults() {
        let mut est = MotionEstimator::new();
        assert!(est.state().is_none());

        let s = est.ingest(PositionSample {
            reported_heading_deg: Some(123.0),
            ..sample(40.7, -74.0, 1_000)
        });
        assert_eq!(s.heading_deg, 0.0);
        assert!(!s.moving);
        assert_eq!(s.last_move_timestamp_ms, None);
    }

    #[test]
    fn test_computed_bearing_when_moved_far_enough() {
        let mut est = MotionEstimator::new();
        est.ingest(sample(40.7000, -74.0, 0));
        // ~111 m due north in 10 s
        let s = est.ingest(sample(40.7010, -74.0, 10_000));
        assert!(s.heading_deg.abs() < 1e-6 || (s.heading_deg - 360.0).abs() < 1e-6);
        assert!((s.speed_mps - 11.1).abs() < 0.2, "speed {}", s.speed_mps);
        assert!(s.moving);
        assert_eq!(s.last_move_timestamp_ms, Some(10_000));
    }

    #[test]
    fn test_small_displacement_keeps_heading() {
        let mut est = MotionEstimator::new();
        est.ingest(sample(40.7000, -74.0000, 0));
        let east = est.ingest(sample(40.7000, -73.9980, 30_000));
        assert!((east.heading_deg - 90.0).abs() < 0.1);

        // ~5 m north: below the 0.01 mi threshold
        let s = est.ingest(sample(40.70005, -73.9980, 60_000));
        assert_eq!(s.heading_deg, east.heading_deg);
        assert!(!s.moving);
        // still remembers the last move
        assert_eq!(s.last_move_timestamp_ms, Some(30_000));
    }

    #[test]
    fn test_reported_heading_and_speed_win() {
        let mut est = MotionEstimator::new();
        est.ingest(sample(40.7, -74.0, 0));
        let s = est.ingest(PositionSample {
            reported_heading_deg: Some(200.0),
            speed_mps: Some(0.2),
            ..sample(40.71, -74.0, 1_000)
        });
        assert_eq!(s.heading_deg, 200.0);
        assert_eq!(s.speed_mps, 0.2);
        assert!(!s.moving);
    }

    #[test]
    fn test_non_finite_reports_are_ignored() {
        let mut est = MotionEstimator::new();
        est.ingest(sample(40.7000, -74.0, 0));
        let s = est.ingest(PositionSample {
            reported_heading_deg: Some(f64::NAN),
            speed_mps: Some(-1.0),
            ..sample(40.7010, -74.0, 10_000)
        });
        assert!(s.heading_deg < 1.0 || s.heading_deg > 359.0);
        assert!(s.moving);
    }

    #[test]
    fn test_elapsed_floor() {
        let mut est = MotionEstimator::new();
        est.ingest(sample(40.7000, -74.0, 0));
        // same timestamp: elapsed floors to 1 s instead of dividing by zero
        let s = est.ingest(sample(40.7001, -74.0, 0));
        assert!(s.speed_mps.is_finite());
        assert!((s.speed_mps - 11.1).abs() < 0.2);
    }

    #[test]
    fn test_recently_moved_indicator() {
        let mut est = MotionEstimator::new();
        assert_eq!(est.refresh_indicator(0), None);

        est.ingest(sample(40.7000, -74.0, 0));
        est.ingest(sample(40.7010, -74.0, 10_000));
        assert_eq!(est.refresh_indicator(11_000), Some(true));
        assert_eq!(est.refresh_indicator(12_000), None);

        // a stationary fix doesn't flip the indicator by itself
        est.ingest(sample(40.7010, -74.0, 12_000));
        assert!(est.recently_moved(14_999));
        assert_eq!(est.refresh_indicator(15_000), Some(false));
    }

    #[test]
    fn test_reset() {
        let mut est = MotionEstimator::new();
        est.ingest(sample(40.7, -74.0, 0));
        est.reset();
        assert!(est.state().is_none());
        assert!(!est.recently_moved(0));
    }
}
