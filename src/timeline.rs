// Time alignment
// Maps wall-clock time onto a cyclic weekly schedule of frames and
// drives the live auto-advance of the time cursor.

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::constants::{LIVE_SUPPRESS_MS, MINUTES_PER_WEEK};
use crate::error::{EngineError, Result};

const DOW_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// One frame of the weekly schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRef {
    /// Position in the backend's frame sequence (`GET /frame/{index}`)
    pub index: usize,
    /// Minute of week, Monday 00:00 = 0
    pub time_of_week_minutes: i32,
}

/// Shortest distance between `a` and `b` on a circle of circumference `modulus`.
///
/// Inputs outside `[0, modulus)` are wrapped first, so the result is always
/// in `[0, modulus / 2]`.
#[inline]
pub fn cyclic_distance(a: i32, b: i32, modulus: i32) -> i32 {
    let d = (a - b).rem_euclid(modulus);
    d.min(modulus - d)
}

/// Index of the schedule entry cyclically closest to `target_minute`.
///
/// Ties go to the lowest index (first hit of an ascending scan).
pub fn resolve_closest_index(schedule_minutes: &[i32], target_minute: i32) -> Result<usize> {
    if schedule_minutes.is_empty() {
        return Err(EngineError::ScheduleUnavailable("schedule is empty".to_string()));
    }

    let mut best_idx = 0;
    let mut best_diff = i32::MAX;
    for (i, &minute) in schedule_minutes.iter().enumerate() {
        let diff = cyclic_distance(minute, target_minute, MINUTES_PER_WEEK);
        if diff < best_diff {
            best_diff = diff;
            best_idx = i;
        }
    }
    Ok(best_idx)
}

/// Current wall-clock time as a bin-floored minute of week in the civil timezone `tz`.
pub fn current_target_minute(now: DateTime<Utc>, tz: Tz, bin_minutes: i32) -> i32 {
    let local = now.with_timezone(&tz);
    let total = local.weekday().num_days_from_monday() as i32 * 1440
        + local.hour() as i32 * 60
        + local.minute() as i32;
    let bin = bin_minutes.max(1);
    (total / bin) * bin
}

const CIVIL_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
];

/// Parses a frame timestamp as civil time. Naive ISO (`2025-01-06T00:20:00`)
/// is the backend format; an explicit offset is accepted and ignored.
fn parse_civil(iso: &str) -> Result<NaiveDateTime> {
    let s = iso.trim();
    for fmt in CIVIL_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.naive_local())
        .map_err(|_| EngineError::InvalidTimestamp(iso.to_string()))
}

/// Minute of week for a frame timestamp.
pub fn minute_of_week_from_iso(iso: &str) -> Result<i32> {
    let dt = parse_civil(iso)?;
    let day = dt.weekday().num_days_from_monday() as i32;
    Ok(day * 1440 + dt.hour() as i32 * 60 + dt.minute() as i32)
}

/// Cursor label for a frame timestamp, e.g. `Mon 1:20 AM`.
pub fn frame_label(iso: &str) -> Result<String> {
    let dt = parse_civil(iso)?;
    let h = dt.hour();
    let hr12 = ((h + 11) % 12) + 1;
    let ampm = if h >= 12 { "PM" } else { "AM" };
    Ok(format!(
        "{} {}:{:02} {}",
        DOW_NAMES[dt.weekday().num_days_from_monday() as usize],
        hr12,
        dt.minute(),
        ampm
    ))
}

/// A loaded weekly schedule. Immutable; a refresh builds a new one.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// Sorted ascending by minute of week
    frames: Vec<FrameRef>,
    /// Same order as `frames`, kept for the resolver
    minutes: Vec<i32>,
    /// Indexed by `FrameRef::index`
    labels: Vec<String>,
}

impl Schedule {
    /// Build from the backend's `/timeline` timestamps.
    pub fn from_timestamps<S: AsRef<str>>(timestamps: &[S]) -> Result<Self> {
        let minutes = timestamps
            .iter()
            .map(|t| minute_of_week_from_iso(t.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let labels = timestamps
            .iter()
            .map(|t| frame_label(t.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::build(minutes, labels)
    }

    /// Build from raw minutes of week; labels fall back to `#index`.
    pub fn from_minutes(minutes: Vec<i32>) -> Result<Self> {
        let labels = (0..minutes.len()).map(|i| format!("#{}", i)).collect();
        Self::build(minutes, labels)
    }

    fn build(minutes: Vec<i32>, labels: Vec<String>) -> Result<Self> {
        if minutes.is_empty() {
            return Err(EngineError::ScheduleUnavailable("timeline empty".to_string()));
        }

        let mut frames: Vec<FrameRef> = minutes
            .iter()
            .enumerate()
            .map(|(index, &m)| FrameRef {
                index,
                time_of_week_minutes: m.rem_euclid(MINUTES_PER_WEEK),
            })
            .collect();
        // stable: equal minutes keep backend order
        frames.sort_by_key(|f| f.time_of_week_minutes);
        let minutes = frames.iter().map(|f| f.time_of_week_minutes).collect();

        Ok(Schedule { frames, minutes, labels })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[FrameRef] {
        &self.frames
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Frame closest to `target_minute`.
    pub fn closest(&self, target_minute: i32) -> Result<FrameRef> {
        let pos = resolve_closest_index(&self.minutes, target_minute)?;
        Ok(self.frames[pos])
    }
}

/// Live auto-advance of the time cursor.
///
/// A tick re-resolves "now" and yields a frame index only when it differs
/// from the last one it yielded. Touching the cursor holds ticks off for a
/// bounded window so the tick never fights a manual scrub.
#[derive(Debug, Clone)]
pub struct LiveAdvance {
    last_emitted: Option<usize>,
    suppressed_until_ms: i64,
    suppress_ms: i64,
}

impl LiveAdvance {
    pub fn new(suppress_ms: i64) -> Self {
        LiveAdvance {
            last_emitted: None,
            suppressed_until_ms: 0,
            suppress_ms,
        }
    }

    /// User touched the time cursor.
    pub fn suppress(&mut self, now_ms: i64) {
        self.suppressed_until_ms = now_ms + self.suppress_ms;
    }

    pub fn is_suppressed(&self, now_ms: i64) -> bool {
        now_ms < self.suppressed_until_ms
    }

    pub fn last_emitted(&self) -> Option<usize> {
        self.last_emitted
    }

    /// Record the index the cursor was aligned to on initial load.
    pub fn seed(&mut self, index: usize) {
        self.last_emitted = Some(index);
    }

    /// One live tick. `Ok(Some(index))` means the cursor should move.
    pub fn tick(
        &mut self,
        schedule: Option<&Schedule>,
        target_minute: i32,
        now_ms: i64,
    ) -> Result<Option<usize>> {
        let schedule = schedule
            .ok_or_else(|| EngineError::ScheduleUnavailable("no schedule loaded".to_string()))?;

        if self.is_suppressed(now_ms) {
            debug!("live tick suppressed for {} ms", self.suppressed_until_ms - now_ms);
            return Ok(None);
        }

        let frame = schedule.closest(target_minute)?;
        if self.last_emitted == Some(frame.index) {
            return Ok(None);
        }
        self.last_emitted = Some(frame.index);
        Ok(Some(frame.index))
    }
}

impl Default for LiveAdvance {
    fn default() -> Self {
        Self::new(LIVE_SUPPRESS_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn weekly_bins() -> Vec<i32> {
        (0..MINUTES_PER_WEEK).step_by(20).collect()
    }

    #[test]
    fn test_wraparound_tie_goes_to_lowest_index() {
        let bins = weekly_bins();
        assert_eq!(*bins.last().unwrap(), 10_060);
        // distance to bin 0 and to bin 10060 are both 10
        assert_eq!(resolve_closest_index(&bins, 10_070).unwrap(), 0);
    }

    #[test]
    fn test_cyclic_distance_bounds() {
        for a in (0..MINUTES_PER_WEEK).step_by(13) {
            for b in (0..MINUTES_PER_WEEK).step_by(17) {
                let d = cyclic_distance(a, b, MINUTES_PER_WEEK);
                assert!((0..=5040).contains(&d), "d({}, {}) = {}", a, b, d);
                assert_eq!(d, cyclic_distance(b, a, MINUTES_PER_WEEK));
            }
        }
        assert_eq!(cyclic_distance(0, 5040, MINUTES_PER_WEEK), 5040);
        assert_eq!(cyclic_distance(10_079, 0, MINUTES_PER_WEEK), 1);
    }

    #[test]
    fn test_resolve_interior_tie() {
        // 30 is 10 from both 20 and 40; the earlier index wins
        assert_eq!(resolve_closest_index(&[0, 20, 40], 30).unwrap(), 1);
        assert_eq!(resolve_closest_index(&[0, 20, 40], 39).unwrap(), 2);
    }

    #[test]
    fn test_resolve_empty_is_unavailable() {
        let err = resolve_closest_index(&[], 100).unwrap_err();
        assert!(matches!(err, EngineError::ScheduleUnavailable(_)));
    }

    #[test]
    fn test_minute_of_week_from_iso() {
        // 2025-01-06 is a Monday
        assert_eq!(minute_of_week_from_iso("2025-01-06T00:20:00").unwrap(), 20);
        assert_eq!(minute_of_week_from_iso("2025-01-07T01:00:00").unwrap(), 1440 + 60);
        assert_eq!(
            minute_of_week_from_iso("2025-01-12T23:40:00").unwrap(),
            6 * 1440 + 23 * 60 + 40
        );
        assert_eq!(minute_of_week_from_iso("2025-01-06T00:20").unwrap(), 20);
        assert_eq!(minute_of_week_from_iso("2025-01-06T00:20:00-05:00").unwrap(), 20);
        assert!(matches!(
            minute_of_week_from_iso("yesterday"),
            Err(EngineError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_frame_label() {
        assert_eq!(frame_label("2025-01-06T01:20:00").unwrap(), "Mon 1:20 AM");
        assert_eq!(frame_label("2025-01-06T00:00:00").unwrap(), "Mon 12:00 AM");
        assert_eq!(frame_label("2025-01-10T12:05:00").unwrap(), "Fri 12:05 PM");
        assert_eq!(frame_label("2025-01-12T23:40:00").unwrap(), "Sun 11:40 PM");
    }

    #[test]
    fn test_current_target_minute() {
        let tz: Tz = "America/New_York".parse().unwrap();

        // Monday 10:07 EST
        let now = Utc.with_ymd_and_hms(2025, 1, 6, 15, 7, 0).unwrap();
        assert_eq!(current_target_minute(now, tz, 20), 600);

        // Monday 10:30 EDT
        let now = Utc.with_ymd_and_hms(2025, 7, 7, 14, 30, 0).unwrap();
        assert_eq!(current_target_minute(now, tz, 20), 620);

        // Sunday 23:59 local, still the previous week in New York
        let now = Utc.with_ymd_and_hms(2025, 1, 13, 4, 59, 0).unwrap();
        assert_eq!(current_target_minute(now, tz, 20), 10_060);
    }

    #[test]
    fn test_schedule_keeps_backend_indices() {
        let sched = Schedule::from_timestamps(&[
            "2025-01-06T00:40:00",
            "2025-01-06T00:00:00",
            "2025-01-06T00:20:00",
        ])
        .unwrap();
        let minutes: Vec<i32> = sched.frames().iter().map(|f| f.time_of_week_minutes).collect();
        assert_eq!(minutes, vec![0, 20, 40]);
        assert_eq!(sched.closest(19).unwrap().index, 2);
        assert_eq!(sched.label(0), Some("Mon 12:40 AM"));
    }

    #[test]
    fn test_schedule_empty() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            Schedule::from_timestamps(&empty),
            Err(EngineError::ScheduleUnavailable(_))
        ));
    }

    #[test]
    fn test_live_advance_emits_only_on_change() {
        let sched = Schedule::from_minutes(weekly_bins()).unwrap();
        let mut live = LiveAdvance::default();

        assert_eq!(live.tick(Some(&sched), 600, 0).unwrap(), Some(30));
        // same bin on the next tick: no reload
        assert_eq!(live.tick(Some(&sched), 600, 20_000).unwrap(), None);
        assert_eq!(live.tick(Some(&sched), 620, 40_000).unwrap(), Some(31));
        assert_eq!(live.last_emitted(), Some(31));
    }

    #[test]
    fn test_live_advance_suppression_expires() {
        let sched = Schedule::from_minutes(weekly_bins()).unwrap();
        let mut live = LiveAdvance::new(15_000);
        live.seed(30);

        live.suppress(100_000);
        assert!(live.is_suppressed(114_999));
        assert_eq!(live.tick(Some(&sched), 620, 110_000).unwrap(), None);
        assert!(!live.is_suppressed(115_000));
        assert_eq!(live.tick(Some(&sched), 620, 115_000).unwrap(), Some(31));
    }

    #[test]
    fn test_live_advance_without_schedule() {
        let mut live = LiveAdvance::default();
        assert!(matches!(
            live.tick(None, 0, 0),
            Err(EngineError::ScheduleUnavailable(_))
        ));
        assert_eq!(live.last_emitted(), None);
    }
}
