//! Daily wall-clock trigger for the sweep.
//!
//! Fires at a configured local time in a configured IANA timezone, once per
//! day. Sweeps serialize through the driver's gate; a trigger that lands
//! while a sweep is still running is skipped, not queued.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::sweep::{SweepDriver, SweepError};

/// When the daily sweep fires.
#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    /// Hour of day, 0-23, in `timezone`.
    pub hour: u32,
    /// Minute of the hour, 0-59.
    pub minute: u32,
    pub timezone: Tz,
}

/// Compute the next trigger instant strictly after `after`.
///
/// A local time that does not exist that day (DST gap) rolls to the next
/// day rather than firing at a shifted instant.
pub fn next_trigger(after: DateTime<Utc>, config: &RunnerConfig) -> DateTime<Utc> {
    let local_now = after.with_timezone(&config.timezone);
    let mut day = local_now.date_naive();
    for _ in 0..3 {
        if let Some(naive) = day.and_hms_opt(config.hour, config.minute, 0)
            && let Some(candidate) = config.timezone.from_local_datetime(&naive).earliest()
            && candidate > local_now
        {
            return candidate.with_timezone(&Utc);
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    // Unreachable for sane configs; keep the loop alive anyway.
    after + chrono::Duration::days(1)
}

/// Owns the timer loop around a `SweepDriver`.
pub struct Runner {
    driver: Arc<SweepDriver>,
    config: RunnerConfig,
}

impl Runner {
    pub fn new(driver: Arc<SweepDriver>, config: RunnerConfig) -> Self {
        Self { driver, config }
    }

    /// Run until `cancel` fires. Each day: sleep to the trigger instant,
    /// then run one sweep. Cancellation mid-sweep lets the in-flight
    /// recipient finish persisting before the loop exits.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            hour = self.config.hour,
            minute = self.config.minute,
            timezone = %self.config.timezone,
            "scheduler started"
        );

        loop {
            let now = Utc::now();
            let next = next_trigger(now, &self.config);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next_trigger = %next, "sleeping until next sweep");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            match self.driver.run_with_cancel(Utc::now(), &cancel).await {
                Ok(report) => info!(
                    sent = report.sent,
                    failed = report.failed,
                    skipped = report.skipped,
                    "scheduled sweep finished"
                ),
                Err(SweepError::AlreadyRunning) => {
                    warn!("previous sweep still running, skipping this trigger");
                }
                Err(e) => error!("scheduled sweep failed: {e}"),
            }

            if cancel.is_cancelled() {
                break;
            }
        }

        info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(hour: u32, minute: u32, tz: &str) -> RunnerConfig {
        RunnerConfig {
            hour,
            minute,
            timezone: tz.parse().unwrap(),
        }
    }

    #[test]
    fn fires_later_today_when_trigger_is_ahead() {
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap();
        let next = next_trigger(after, &config(7, 0, "UTC"));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 7, 0, 0).unwrap());
    }

    #[test]
    fn rolls_to_tomorrow_once_todays_trigger_passed() {
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 7, 0, 0).unwrap();
        let next = next_trigger(after, &config(7, 0, "UTC"));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 2, 7, 0, 0).unwrap());
    }

    #[test]
    fn respects_configured_timezone() {
        // 06:00 in New York during DST is 10:00 UTC; a 07:00 local trigger
        // lands at 11:00 UTC.
        let after = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        let next = next_trigger(after, &config(7, 0, "America/New_York"));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 15, 11, 0, 0).unwrap());
    }

    #[test]
    fn minute_precision() {
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 6, 45, 0).unwrap();
        let next = next_trigger(after, &config(6, 50, "UTC"));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 6, 50, 0).unwrap());
    }
}
