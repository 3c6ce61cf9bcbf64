//! rollcall-recurrence: Pure recurrence and reporting-window calculations.
//!
//! All comparisons are at calendar-date granularity (UTC dates). Calendar
//! month/year additions clamp to the last valid day of the target month,
//! so a Jan 31 monthly recipient lands on Feb 28/29, and a Feb 29 annual
//! recipient lands on Feb 28 in non-leap years.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use rollcall_types::Frequency;

/// Compute the next date a recipient becomes due.
///
/// Never sent: the anchor `start_date` itself. Otherwise exactly one period
/// past `last_sent` — a recipient that was down for several periods catches
/// up once, never with a burst of back-filled sends.
///
/// Returns None when `start_date` is still in the future (never due, no
/// matter what `last_sent` says) or when the calendar addition overflows.
pub fn next_send_date(
    frequency: Frequency,
    start_date: NaiveDate,
    last_sent: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<NaiveDate> {
    if now.date_naive() < start_date {
        return None;
    }
    match last_sent {
        None => Some(start_date),
        Some(sent) => advance_one_period(frequency, sent.date_naive()),
    }
}

/// Is this recipient due for a delivery at `now`?
pub fn is_due(
    frequency: Frequency,
    start_date: NaiveDate,
    last_sent: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    match next_send_date(frequency, start_date, last_sent, now) {
        Some(candidate) => now.date_naive() >= candidate,
        None => false,
    }
}

/// One recurrence period forward from `date`.
fn advance_one_period(frequency: Frequency, date: NaiveDate) -> Option<NaiveDate> {
    match frequency {
        Frequency::Daily => date.checked_add_days(Days::new(1)),
        Frequency::Weekly => date.checked_add_days(Days::new(7)),
        Frequency::Monthly => date.checked_add_months(Months::new(1)),
        Frequency::Quarterly => date.checked_add_months(Months::new(3)),
        Frequency::Annually => date.checked_add_months(Months::new(12)),
    }
}

/// The [start, end) date range summarized in one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportingWindow {
    /// Calendar-date form the attendance API expects.
    pub fn start_iso(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn end_iso(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

impl std::fmt::Display for ReportingWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start_iso(), self.end_iso())
    }
}

/// Resolve the reporting window for a delivery at `now`.
///
/// Daily/Weekly report a trailing window ending today; Monthly, Quarterly
/// and Annually report the previous complete calendar period. When the
/// recipient has a `last_sent`, the window instead starts there, so a
/// recipient that missed a cycle reports from their actual last delivery.
pub fn resolve_window(
    frequency: Frequency,
    now: DateTime<Utc>,
    last_sent: Option<DateTime<Utc>>,
) -> ReportingWindow {
    let today = now.date_naive();
    let end = match frequency {
        Frequency::Daily | Frequency::Weekly => today,
        Frequency::Monthly => first_of_month(today),
        Frequency::Quarterly => first_of_quarter(today),
        Frequency::Annually => first_of_year(today),
    };
    let start = match last_sent {
        Some(sent) => sent.date_naive(),
        None => fallback_start(frequency, end),
    };
    ReportingWindow { start, end }
}

/// Window start when the recipient has never been sent to: one whole
/// period back from the window end.
fn fallback_start(frequency: Frequency, end: NaiveDate) -> NaiveDate {
    let back = match frequency {
        Frequency::Daily => end.checked_sub_days(Days::new(1)),
        Frequency::Weekly => end.checked_sub_days(Days::new(7)),
        Frequency::Monthly => end.checked_sub_months(Months::new(1)),
        Frequency::Quarterly => end.checked_sub_months(Months::new(3)),
        Frequency::Annually => end.checked_sub_months(Months::new(12)),
    };
    back.unwrap_or(end)
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn first_of_quarter(date: NaiveDate) -> NaiveDate {
    let quarter_month = ((date.month0() / 3) * 3) + 1;
    date.with_day(1)
        .and_then(|d| d.with_month(quarter_month))
        .unwrap_or(date)
}

fn first_of_year(date: NaiveDate) -> NaiveDate {
    date.with_day(1).and_then(|d| d.with_month(1)).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
    }

    #[test]
    fn never_sent_due_once_start_date_arrives() {
        for f in Frequency::ALL {
            assert!(!is_due(f, date(2024, 6, 1), None, at(2024, 5, 31)));
            assert!(is_due(f, date(2024, 6, 1), None, at(2024, 6, 1)));
            assert!(is_due(f, date(2024, 6, 1), None, at(2024, 8, 15)));
        }
    }

    #[test]
    fn future_start_date_suppresses_even_with_last_sent() {
        let sent = Some(at(2024, 1, 1));
        assert!(!is_due(Frequency::Daily, date(2030, 1, 1), sent, at(2024, 6, 1)));
        assert_eq!(
            next_send_date(Frequency::Daily, date(2030, 1, 1), sent, at(2024, 6, 1)),
            None
        );
    }

    #[test]
    fn daily_and_weekly_advance() {
        let sent = Some(at(2024, 1, 1));
        assert_eq!(
            next_send_date(Frequency::Daily, date(2024, 1, 1), sent, at(2024, 1, 2)),
            Some(date(2024, 1, 2))
        );
        assert_eq!(
            next_send_date(Frequency::Weekly, date(2024, 1, 1), sent, at(2024, 1, 8)),
            Some(date(2024, 1, 8))
        );
        assert!(!is_due(Frequency::Weekly, date(2024, 1, 1), sent, at(2024, 1, 5)));
        assert!(is_due(Frequency::Weekly, date(2024, 1, 1), sent, at(2024, 1, 8)));
    }

    #[test]
    fn single_period_advance_no_catchup_burst() {
        // Recipient down for months: candidate is still one period past
        // last_sent, so one send catches them up.
        let sent = Some(at(2024, 1, 15));
        let now = at(2024, 7, 1);
        assert_eq!(
            next_send_date(Frequency::Weekly, date(2024, 1, 1), sent, now),
            Some(date(2024, 1, 22))
        );
        assert_eq!(
            next_send_date(Frequency::Monthly, date(2024, 1, 1), sent, now),
            Some(date(2024, 2, 15))
        );
    }

    #[test]
    fn monthly_end_of_month_clamping() {
        let sent = Some(at(2024, 1, 31));
        // Jan 31 + 1 month in a leap year clamps to Feb 29.
        assert_eq!(
            next_send_date(Frequency::Monthly, date(2024, 1, 1), sent, at(2024, 3, 1)),
            Some(date(2024, 2, 29))
        );
        // Mar 31 + 1 month clamps to Apr 30, not May 1.
        let sent = Some(at(2024, 3, 31));
        assert_eq!(
            next_send_date(Frequency::Monthly, date(2024, 1, 1), sent, at(2024, 5, 1)),
            Some(date(2024, 4, 30))
        );
    }

    #[test]
    fn quarterly_clamping() {
        // Nov 30 + 3 months: February has no day 30.
        let sent = Some(at(2023, 11, 30));
        assert_eq!(
            next_send_date(Frequency::Quarterly, date(2023, 1, 1), sent, at(2024, 3, 1)),
            Some(date(2024, 2, 29))
        );
    }

    #[test]
    fn annual_leap_day_clamps_to_feb_28() {
        let sent = Some(at(2024, 2, 29));
        assert_eq!(
            next_send_date(Frequency::Annually, date(2024, 1, 1), sent, at(2025, 3, 1)),
            Some(date(2025, 2, 28))
        );
    }

    #[test]
    fn weekly_scenario_from_enrollment() {
        // Enrolled Jan 1, never sent: due immediately.
        let start = date(2024, 1, 1);
        assert!(is_due(Frequency::Weekly, start, None, at(2024, 1, 1)));
        // After a successful send on Jan 1: quiet on Jan 5, due again Jan 8.
        let sent = Some(at(2024, 1, 1));
        assert!(!is_due(Frequency::Weekly, start, sent, at(2024, 1, 5)));
        assert!(is_due(Frequency::Weekly, start, sent, at(2024, 1, 8)));
    }

    #[test]
    fn window_daily_and_weekly_trail_now() {
        let w = resolve_window(Frequency::Daily, at(2024, 6, 10), None);
        assert_eq!(w, ReportingWindow { start: date(2024, 6, 9), end: date(2024, 6, 10) });

        let w = resolve_window(Frequency::Weekly, at(2024, 6, 10), None);
        assert_eq!(w, ReportingWindow { start: date(2024, 6, 3), end: date(2024, 6, 10) });
    }

    #[test]
    fn window_monthly_is_previous_calendar_month() {
        let w = resolve_window(Frequency::Monthly, at(2024, 6, 10), None);
        assert_eq!(w, ReportingWindow { start: date(2024, 5, 1), end: date(2024, 6, 1) });
    }

    #[test]
    fn window_quarterly_is_previous_quarter() {
        let w = resolve_window(Frequency::Quarterly, at(2024, 5, 20), None);
        assert_eq!(w, ReportingWindow { start: date(2024, 1, 1), end: date(2024, 4, 1) });
    }

    #[test]
    fn window_annual_is_previous_year() {
        let w = resolve_window(Frequency::Annually, at(2024, 3, 5), None);
        assert_eq!(w, ReportingWindow { start: date(2023, 1, 1), end: date(2024, 1, 1) });
    }

    #[test]
    fn window_starts_at_last_sent_when_present() {
        let w = resolve_window(Frequency::Weekly, at(2024, 6, 17), Some(at(2024, 6, 1)));
        assert_eq!(w, ReportingWindow { start: date(2024, 6, 1), end: date(2024, 6, 17) });

        let w = resolve_window(Frequency::Monthly, at(2024, 6, 10), Some(at(2024, 4, 15)));
        assert_eq!(w, ReportingWindow { start: date(2024, 4, 15), end: date(2024, 6, 1) });
    }

    #[test]
    fn window_iso_formatting() {
        let w = resolve_window(Frequency::Weekly, at(2024, 1, 8), Some(at(2024, 1, 1)));
        assert_eq!(w.start_iso(), "2024-01-01");
        assert_eq!(w.end_iso(), "2024-01-08");
        assert_eq!(w.to_string(), "[2024-01-01, 2024-01-08)");
    }
}
