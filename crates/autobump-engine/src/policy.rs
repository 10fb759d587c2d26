//! Scheduling Policy Engine — maps (strategy, now) to the next
//! eligible execution time.
//!
//! Pure apart from bounded jitter: no state, no clock reads. Callers
//! pass `now` in, which keeps every strategy testable with fixed dates.
//! Returned times are never in the past relative to the input `now`.

use autobump_core::types::Strategy;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use rand::Rng;

/// Start of the automation day for SpreadEvenly, 08:00.
const SPREAD_BAND_START_HOUR: u32 = 8;
/// End of the automation day for SpreadEvenly, 22:00.
const SPREAD_BAND_END_HOUR: u32 = 22;
/// Max jobs placed on a single day by SpreadEvenly.
const SPREAD_SLOTS_PER_DAY: usize = 5;

/// Stateless strategy evaluator.
pub struct PolicyEngine;

impl PolicyEngine {
    /// Next execution time for one job under the given strategy.
    pub fn next_time(&self, strategy: Strategy, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut rng = rand::thread_rng();
        let t = match strategy {
            Strategy::PeakHours => peak_hours(now, &mut rng),
            Strategy::BusinessHours => business_hours(now, &mut rng),
            Strategy::WeekendFocus => weekend_focus(now, &mut rng),
            Strategy::SpreadEvenly => spread_evenly(1, now, &mut rng)[0],
            Strategy::Continuous => now + Duration::minutes(rng.gen_range(4 * 60..=6 * 60)),
            Strategy::SmartAi => {
                // Peak-hours timing with extra scatter. Heuristic
                // placeholder, not a trained timing model.
                let base = peak_hours(now, &mut rng);
                let wobble = Duration::minutes(rng.gen_range(-15..=15));
                (base + wobble).max(now + Duration::minutes(1))
            }
        };
        debug_assert!(t >= now);
        t
    }

    /// Times for a batch of jobs, in input order. A monotonic minute
    /// offset per slot breaks exact ties so bulk-enabled targets never
    /// fire at the same instant.
    pub fn bulk_schedule(&self, count: usize, strategy: Strategy, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        if count == 0 {
            return Vec::new();
        }
        if strategy == Strategy::SpreadEvenly {
            return spread_evenly(count, now, &mut rand::thread_rng());
        }
        let mut times: Vec<DateTime<Utc>> = Vec::with_capacity(count);
        for _ in 0..count {
            let mut t = self.next_time(strategy, now);
            if let Some(&prev) = times.last() {
                if t <= prev {
                    t = prev + Duration::minutes(1);
                }
            }
            times.push(t);
        }
        times
    }
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Peak window start times (hour, minute) for a given date.
fn peak_window_starts(date: NaiveDate) -> &'static [(u32, u32)] {
    if is_weekend(date) {
        &[(10, 0), (14, 0), (19, 0)]
    } else {
        &[(12, 0), (18, 0)]
    }
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::from_hms_opt(hour, minute, 0).unwrap()))
}

/// Start of the next upcoming peak window, today if one remains, else
/// the first window tomorrow (weekday/weekend recomputed for that day).
fn peak_hours(now: DateTime<Utc>, rng: &mut impl Rng) -> DateTime<Utc> {
    let jitter = Duration::minutes(rng.gen_range(0..=30));
    let today = now.date_naive();
    for &(h, m) in peak_window_starts(today) {
        let start = at(today, h, m);
        if start > now {
            return start + jitter;
        }
    }
    let tomorrow = today + Duration::days(1);
    let &(h, m) = &peak_window_starts(tomorrow)[0];
    at(tomorrow, h, m) + jitter
}

/// Next of 12:00 / 17:00 today, else 12:00 tomorrow.
fn business_hours(now: DateTime<Utc>, rng: &mut impl Rng) -> DateTime<Utc> {
    let jitter = Duration::minutes(rng.gen_range(0..=45));
    let today = now.date_naive();
    for h in [12, 17] {
        let slot = at(today, h, 0);
        if slot > now {
            return slot + jitter;
        }
    }
    at(today + Duration::days(1), 12, 0) + jitter
}

/// On a weekend, behave like peak hours; otherwise aim for the next
/// Saturday morning.
fn weekend_focus(now: DateTime<Utc>, rng: &mut impl Rng) -> DateTime<Utc> {
    let today = now.date_naive();
    if is_weekend(today) {
        return peak_hours(now, rng);
    }
    let days_to_sat = 5 - i64::from(today.weekday().num_days_from_monday());
    let saturday = today + Duration::days(days_to_sat);
    at(saturday, 10, 0) + Duration::minutes(rng.gen_range(0..=120))
}

/// Distribute `count` slots across the next ceil(count/5) days inside
/// the 08:00-22:00 band, with per-slot minute jitter.
fn spread_evenly(count: usize, now: DateTime<Utc>, rng: &mut impl Rng) -> Vec<DateTime<Utc>> {
    let days = count.div_ceil(SPREAD_SLOTS_PER_DAY).max(1);
    let per_day = count.div_ceil(days);
    let band_mins =
        i64::from(SPREAD_BAND_END_HOUR - SPREAD_BAND_START_HOUR) * 60;
    let step_mins = band_mins / per_day as i64;

    let mut slots = Vec::with_capacity(count);
    for i in 0..count {
        let day_offset = (i / per_day) as i64;
        let slot_in_day = (i % per_day) as i64;
        let date = now.date_naive() + Duration::days(day_offset);
        let base = at(date, SPREAD_BAND_START_HOUR, 0)
            + Duration::minutes(slot_in_day * step_mins)
            + Duration::minutes(rng.gen_range(0..step_mins.max(2)));
        // Slots already behind `now` (e.g. this afternoon's band on a
        // late start) slip forward instead of firing immediately.
        let mut slot = base.max(now + Duration::minutes(rng.gen_range(2..=10)));
        // A slip near the band edge can leave the band entirely; such
        // slots move to the start of the next band day.
        if slot.hour() >= SPREAD_BAND_END_HOUR || slot.hour() < SPREAD_BAND_START_HOUR {
            let date = if slot.hour() >= SPREAD_BAND_END_HOUR {
                slot.date_naive() + Duration::days(1)
            } else {
                slot.date_naive()
            };
            slot = at(date, SPREAD_BAND_START_HOUR, 0)
                + Duration::minutes(rng.gen_range(0..step_mins.max(2)));
        }
        slots.push(slot);
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    // 2026-02-22 is a Sunday; 2026-02-23 a Monday.
    fn sunday(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 22, h, m, 0).unwrap()
    }

    fn monday(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 23, h, m, 0).unwrap()
    }

    #[test]
    fn test_peak_hours_weekday_morning_hits_lunch_window() {
        let now = monday(9, 0);
        for _ in 0..20 {
            let t = PolicyEngine.next_time(Strategy::PeakHours, now);
            assert_eq!(t.date_naive(), now.date_naive());
            assert_eq!(t.hour(), 12);
            assert!(t.minute() <= 30);
        }
    }

    #[test]
    fn test_peak_hours_weekday_late_rolls_to_next_day() {
        let now = monday(22, 0);
        for _ in 0..20 {
            let t = PolicyEngine.next_time(Strategy::PeakHours, now);
            assert!(t > now);
            assert_eq!(t.date_naive(), now.date_naive() + Duration::days(1));
            // Tuesday is a weekday: first window starts at 12:00
            assert_eq!(t.hour(), 12);
        }
    }

    #[test]
    fn test_peak_hours_weekend_windows() {
        let now = sunday(8, 0);
        let t = PolicyEngine.next_time(Strategy::PeakHours, now);
        assert_eq!(t.date_naive(), now.date_naive());
        assert_eq!(t.hour(), 10);
    }

    #[test]
    fn test_saturday_night_rolls_to_sunday_weekend_window() {
        // 2026-02-21 is a Saturday
        let now = Utc.with_ymd_and_hms(2026, 2, 21, 23, 0, 0).unwrap();
        let t = PolicyEngine.next_time(Strategy::PeakHours, now);
        assert_eq!(t.date_naive(), now.date_naive() + Duration::days(1));
        assert_eq!(t.hour(), 10);
    }

    #[test]
    fn test_business_hours_afternoon_targets_five_pm() {
        let now = monday(13, 0);
        for _ in 0..20 {
            let t = PolicyEngine.next_time(Strategy::BusinessHours, now);
            assert_eq!(t.date_naive(), now.date_naive());
            assert!(t.hour() == 17 && t.minute() <= 45);
        }
    }

    #[test]
    fn test_business_hours_evening_rolls_over() {
        let now = monday(18, 0);
        let t = PolicyEngine.next_time(Strategy::BusinessHours, now);
        assert_eq!(t.date_naive(), now.date_naive() + Duration::days(1));
        assert_eq!(t.hour(), 12);
    }

    #[test]
    fn test_weekend_focus_targets_saturday() {
        // Wednesday 2026-02-25 → Saturday 2026-02-28
        let now = Utc.with_ymd_and_hms(2026, 2, 25, 9, 0, 0).unwrap();
        for _ in 0..20 {
            let t = PolicyEngine.next_time(Strategy::WeekendFocus, now);
            assert_eq!(t.weekday(), Weekday::Sat);
            assert_eq!(t.date_naive(), NaiveDate::from_ymd_opt(2026, 2, 28).unwrap());
            assert!(t.hour() >= 10 && t.hour() <= 12);
        }
    }

    #[test]
    fn test_weekend_focus_on_weekend_behaves_like_peak() {
        let now = sunday(8, 0);
        let t = PolicyEngine.next_time(Strategy::WeekendFocus, now);
        assert_eq!(t.date_naive(), now.date_naive());
        assert_eq!(t.hour(), 10);
    }

    #[test]
    fn test_continuous_between_four_and_six_hours() {
        let now = monday(9, 0);
        for _ in 0..20 {
            let t = PolicyEngine.next_time(Strategy::Continuous, now);
            assert!(t >= now + Duration::hours(4));
            assert!(t <= now + Duration::hours(6));
        }
    }

    #[test]
    fn test_smart_ai_never_in_the_past() {
        let now = monday(11, 58);
        for _ in 0..50 {
            let t = PolicyEngine.next_time(Strategy::SmartAi, now);
            assert!(t > now);
        }
    }

    #[test]
    fn test_spread_evenly_stays_in_band() {
        let now = monday(6, 0);
        let slots = PolicyEngine.bulk_schedule(12, Strategy::SpreadEvenly, now);
        assert_eq!(slots.len(), 12);
        // 12 slots → 3 days
        let last_day = slots.iter().map(|t| t.date_naive()).max().unwrap();
        assert!(last_day <= now.date_naive() + Duration::days(2));
        for t in &slots {
            assert!(*t > now);
            assert!(t.hour() >= SPREAD_BAND_START_HOUR && t.hour() < SPREAD_BAND_END_HOUR);
        }
    }

    #[test]
    fn test_spread_evenly_late_start_rolls_to_next_morning() {
        // After ~21:50 the forward slip would leave the band; those
        // slots belong to the next morning instead.
        let now = monday(21, 55);
        for _ in 0..20 {
            let slots = PolicyEngine.bulk_schedule(3, Strategy::SpreadEvenly, now);
            for t in &slots {
                assert!(*t > now);
                assert!(
                    t.hour() >= SPREAD_BAND_START_HOUR && t.hour() < SPREAD_BAND_END_HOUR,
                    "slot {t} escaped the 08:00-22:00 band"
                );
            }
        }
    }

    #[test]
    fn test_bulk_schedule_breaks_ties_monotonically() {
        let now = monday(9, 0);
        let times = PolicyEngine.bulk_schedule(5, Strategy::BusinessHours, now);
        assert_eq!(times.len(), 5);
        for pair in times.windows(2) {
            assert!(pair[1] > pair[0], "bulk times must be strictly increasing");
        }
    }

    #[test]
    fn test_bulk_schedule_empty() {
        assert!(PolicyEngine.bulk_schedule(0, Strategy::PeakHours, monday(9, 0)).is_empty());
    }
}
