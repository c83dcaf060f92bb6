//! Update scheduling: minute-aligned cadence with drift-free intended times.
//!
//! The next update instant is always derived from the previous *intended*
//! instant, never from the actual completion time, so slow cycles do not
//! push the whole schedule later and later. Interactive dashboards get a
//! fixed settle offset past the minute boundary so remote content has
//! finished loading before the capture.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

use crate::config::DashboardMode;

/// Seconds past the boundary before capturing an interactive dashboard.
pub const INTERACTIVE_SETTLE_SECS: i64 = 5;

/// Compute the next intended update instant after `reference`.
///
/// Whole-minute intervals align to the next minute boundary that is a
/// multiple of the interval; sub-minute intervals align to the very next
/// minute boundary. Anything else adds the interval to the reference with
/// no alignment (fixed cadence, drifts relative to wall-clock minutes --
/// kept as-observed).
pub fn next_update(
    reference: DateTime<Utc>,
    interval_secs: u32,
    mode: DashboardMode,
) -> DateTime<Utc> {
    let interval = i64::from(interval_secs);
    let settle = match mode {
        DashboardMode::Interactive => INTERACTIVE_SETTLE_SECS,
        DashboardMode::Static => 0,
    };

    let aligned_secs = if interval >= 60 && interval % 60 == 0 {
        let interval_minutes = interval / 60;
        let minute = reference.timestamp().div_euclid(60);
        let next_minute = (minute.div_euclid(interval_minutes) + 1) * interval_minutes;
        Some(next_minute * 60 + settle)
    } else if interval < 60 {
        let next_minute = reference.timestamp().div_euclid(60) + 1;
        Some(next_minute * 60 + settle)
    } else {
        None
    };

    match aligned_secs.and_then(|secs| Utc.timestamp_opt(secs, 0).single()) {
        Some(instant) => instant,
        None => reference + ChronoDuration::seconds(interval),
    }
}

/// Seconds between the intended instant and the actual completion.
/// Positive means the cycle finished late. Observability only; nothing
/// branches on this value.
pub fn measure_offset(intended: DateTime<Utc>, actual: DateTime<Utc>) -> f64 {
    (actual - intended).num_milliseconds() as f64 / 1000.0
}

/// Schedule state for the continuous loop.
#[derive(Debug, Clone)]
pub struct Schedule {
    interval_secs: u32,
    mode: DashboardMode,
    intended: Option<DateTime<Utc>>,
}

impl Schedule {
    /// Create a schedule; the first advance aligns from "now".
    pub fn new(interval_secs: u32, mode: DashboardMode) -> Self {
        Self {
            interval_secs,
            mode,
            intended: None,
        }
    }

    /// Advance to the next intended instant, chaining from the previous
    /// intended instant. A stalled cycle can leave the result in the past;
    /// the caller then runs immediately without sleeping, and the chain
    /// catches up one slot per cycle instead of skipping slots.
    pub fn advance(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let reference = self.intended.unwrap_or(now);
        let next = next_update(reference, self.interval_secs, self.mode);
        self.intended = Some(next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_five_minute_interactive_alignment() {
        // 300s interval aligns to :00/:05/:10...; interactive adds 5s
        let next = next_update(at(12, 3, 10), 300, DashboardMode::Interactive);
        assert_eq!(next, at(12, 5, 5));
    }

    #[test]
    fn test_five_minute_static_alignment() {
        let next = next_update(at(12, 3, 10), 300, DashboardMode::Static);
        assert_eq!(next, at(12, 5, 0));
    }

    #[test]
    fn test_non_round_minute_interval_adds_without_alignment() {
        // 90s is not a whole number of minutes: fixed cadence
        let next = next_update(at(12, 0, 0), 90, DashboardMode::Interactive);
        assert_eq!(next, at(12, 1, 30));
    }

    #[test]
    fn test_sub_minute_interval_aligns_to_next_minute() {
        let next = next_update(at(12, 0, 40), 30, DashboardMode::Static);
        assert_eq!(next, at(12, 1, 0));

        let next = next_update(at(12, 0, 40), 30, DashboardMode::Interactive);
        assert_eq!(next, at(12, 1, 5));
    }

    #[test]
    fn test_boundary_reference_moves_to_next_slot() {
        // Exactly on a slot: "next" means strictly after
        let next = next_update(at(12, 5, 0), 300, DashboardMode::Static);
        assert_eq!(next, at(12, 10, 0));
    }

    #[test]
    fn test_one_minute_interval() {
        let next = next_update(at(9, 59, 59), 60, DashboardMode::Static);
        assert_eq!(next, at(10, 0, 0));
    }

    #[test]
    fn test_measure_offset_sign() {
        let intended = at(12, 5, 0);
        assert_eq!(measure_offset(intended, at(12, 5, 2)), 2.0);
        assert_eq!(measure_offset(intended, at(12, 4, 59)), -1.0);
        assert_eq!(measure_offset(intended, intended), 0.0);
    }

    #[test]
    fn test_schedule_chains_from_intended_not_actual() {
        let mut schedule = Schedule::new(300, DashboardMode::Static);

        let first = schedule.advance(at(12, 3, 10));
        assert_eq!(first, at(12, 5, 0));

        // The cycle stalls until 12:11:30; the chain continues from the
        // 12:05 slot, not from the late completion time
        let second = schedule.advance(at(12, 11, 30));
        assert_eq!(second, at(12, 10, 0));
        assert!(second < at(12, 11, 30));

        // Catches up one slot per advance
        let third = schedule.advance(at(12, 11, 31));
        assert_eq!(third, at(12, 15, 0));
    }
}
