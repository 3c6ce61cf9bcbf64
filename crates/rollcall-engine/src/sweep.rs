//! The sweep driver — one invocation walks every active recipient.
//!
//! Per-recipient errors are contained: a recipient that fails to fetch,
//! render or send never stops the rest of the batch. The cron-run row
//! brackets the whole sweep regardless of individual outcomes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use rollcall_attendance::{AttendanceSource, summarize};
use rollcall_recurrence::{is_due, resolve_window};
use rollcall_sms::SmsGateway;
use rollcall_storage::{Storage, StorageError};
use rollcall_types::{DeliveryLogEntry, Recipient, RunStatus, Schedule};

use crate::message::{self, FormatError};
use crate::retry;

/// Job type recorded on cron-run rows.
pub const SWEEP_JOB_TYPE: &str = "delivery-sweep";

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("a sweep is already running")]
    AlreadyRunning,
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Recipients that reached a delivery attempt.
    pub processed: u32,
    pub sent: u32,
    pub failed: u32,
    /// Due recipients skipped before the gateway (backoff, no data, bad template).
    pub skipped: u32,
    /// Recipients whose retry budget ran out this sweep.
    pub deactivated: u32,
}

/// Orchestrates one delivery sweep over all active recipients.
pub struct SweepDriver {
    storage: Arc<Storage>,
    gateway: Arc<dyn SmsGateway>,
    attendance: Arc<dyn AttendanceSource>,
    stagger: Duration,
    /// Serializes sweeps; an overlapping trigger is refused, never queued.
    gate: tokio::sync::Mutex<()>,
}

impl SweepDriver {
    pub fn new(
        storage: Arc<Storage>,
        gateway: Arc<dyn SmsGateway>,
        attendance: Arc<dyn AttendanceSource>,
        stagger: Duration,
    ) -> Self {
        Self {
            storage,
            gateway,
            attendance,
            stagger,
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Run one sweep evaluated at `now`.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<SweepReport, SweepError> {
        self.run_with_cancel(now, &CancellationToken::new()).await
    }

    /// Run one sweep, stopping cleanly between recipients once `cancel`
    /// fires. The in-flight recipient's state is always persisted first.
    pub async fn run_with_cancel(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<SweepReport, SweepError> {
        let _guard = self.gate.try_lock().map_err(|_| SweepError::AlreadyRunning)?;

        let run_id = self.storage.start_run(SWEEP_JOB_TYPE, now).await?;

        let recipients = match self.storage.list_active_recipients().await {
            Ok(list) => list,
            Err(e) => {
                error!("sweep aborted, could not load recipients: {e}");
                let detail = e.to_string();
                self.storage
                    .finish_run(&run_id, RunStatus::Failed, 0, Some(&detail), Utc::now())
                    .await?;
                return Err(e.into());
            }
        };

        info!(run_id = %run_id, candidates = recipients.len(), "sweep started");

        let mut report = SweepReport::default();
        let mut cancelled = false;

        for recipient in recipients {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            self.process_recipient(recipient, now, &mut report).await;
        }

        let detail = cancelled.then(|| format!("cancelled after {} deliveries", report.processed));
        self.storage
            .finish_run(
                &run_id,
                RunStatus::Completed,
                report.processed,
                detail.as_deref(),
                Utc::now(),
            )
            .await?;

        info!(
            run_id = %run_id,
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            "sweep finished"
        );
        Ok(report)
    }

    /// Evaluate and, if due, deliver to a single recipient. Never errors —
    /// every failure mode is logged and contained here.
    async fn process_recipient(
        &self,
        mut recipient: Recipient,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        // Backoff gate: a pending retry instant in the future wins over
        // the recurrence rule.
        if recipient.next_retry_at.is_some_and(|at| at > now) {
            report.skipped += 1;
            return;
        }

        if !is_due(
            recipient.frequency,
            recipient.start_date,
            recipient.last_sent,
            now,
        ) {
            return;
        }

        let schedule = match self.storage.get_schedule(&recipient.schedule_id).await {
            Ok(Some(s)) => s,
            Ok(None) => {
                warn!(
                    recipient_id = %recipient.id,
                    schedule_id = %recipient.schedule_id,
                    "recipient references missing schedule, skipping"
                );
                report.skipped += 1;
                return;
            }
            Err(e) => {
                error!(recipient_id = %recipient.id, "schedule load failed: {e}");
                report.skipped += 1;
                return;
            }
        };

        let window = resolve_window(recipient.frequency, now, recipient.last_sent);

        // Data errors are a separate failure domain from delivery errors:
        // the recipient stays due and the retry budget is untouched.
        let records = match self
            .attendance
            .fetch(&recipient.phone, &window, &schedule.event_id)
            .await
        {
            Ok(records) if records.is_empty() => {
                warn!(
                    recipient_id = %recipient.id,
                    client = %recipient.client_code,
                    window = %window,
                    "no attendance records in window, skipping this cycle"
                );
                report.skipped += 1;
                return;
            }
            Ok(records) => records,
            Err(e) => {
                warn!(
                    recipient_id = %recipient.id,
                    client = %recipient.client_code,
                    "attendance fetch failed, skipping this cycle: {e}"
                );
                report.skipped += 1;
                return;
            }
        };

        let summary = summarize(&records);
        let tokens = message::summary_tokens(&summary, &window);
        let template = schedule.template_for(recipient.message_kind);

        let content = match message::render(template, &tokens) {
            Ok(content) => content,
            Err(e @ FormatError::MessageTooLong { .. }) => {
                // Configuration defect, not a delivery failure: no retry.
                error!(
                    recipient_id = %recipient.id,
                    schedule_id = %schedule.id,
                    "template did not render, skipping: {e}"
                );
                self.append_log(DeliveryLogEntry::failed(
                    &recipient,
                    template,
                    &e.to_string(),
                    now,
                ))
                .await;
                report.skipped += 1;
                return;
            }
        };

        // Stagger: a courtesy pause so the batch does not burst the gateway.
        if report.processed > 0 && !self.stagger.is_zero() {
            tokio::time::sleep(self.stagger).await;
        }
        report.processed += 1;

        match self
            .gateway
            .send(&schedule.sender_name, &recipient.phone, &content)
            .await
        {
            Ok(ack) => {
                retry::apply_success(&mut recipient, now);
                report.sent += 1;
                info!(
                    recipient_id = %recipient.id,
                    client = %recipient.client_code,
                    message_id = %ack.message_id,
                    "summary delivered"
                );
                self.append_log(DeliveryLogEntry::sent(
                    &recipient,
                    &content,
                    &ack.message_id,
                    now,
                ))
                .await;
            }
            Err(e) => {
                retry::apply_failure(&mut recipient, now);
                report.failed += 1;
                if recipient.active {
                    warn!(
                        recipient_id = %recipient.id,
                        attempt = recipient.retry_attempts,
                        "delivery failed, backing off: {e}"
                    );
                } else {
                    report.deactivated += 1;
                    warn!(
                        recipient_id = %recipient.id,
                        client = %recipient.client_code,
                        "retry budget exhausted, recipient deactivated: {e}"
                    );
                }
                self.append_log(DeliveryLogEntry::failed(
                    &recipient,
                    &content,
                    &e.to_string(),
                    now,
                ))
                .await;
            }
        }

        // The idempotency boundary: failing here risks a duplicate send on
        // the next sweep, so shout about it.
        if let Err(e) = self.storage.upsert_recipient(&recipient).await {
            error!(
                recipient_id = %recipient.id,
                "failed to persist recipient state after attempt, duplicate send possible: {e}"
            );
        }
    }

    async fn append_log(&self, entry: DeliveryLogEntry) {
        if let Err(e) = self.storage.append_delivery_log(&entry).await {
            error!(phone = %entry.phone, "failed to append delivery log: {e}");
        }
    }
}

/// Validate a schedule's templates against the known token set, using
/// placeholder values. Lets the CLI refuse a template that could never
/// render within the SMS limit.
pub fn validate_templates(schedule: &Schedule) -> Result<(), FormatError> {
    let summary = rollcall_attendance::AttendanceSummary {
        member_name: Some("Placeholder Name".into()),
        members: 999,
        clock_ins: 999,
        clock_outs: 999,
        lates: 999,
    };
    let window = rollcall_recurrence::ReportingWindow {
        start: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
        end: chrono::NaiveDate::from_ymd_opt(2024, 12, 31).unwrap_or_default(),
    };
    let tokens = message::summary_tokens(&summary, &window);
    message::render(&schedule.user_template, &tokens)?;
    message::render(&schedule.admin_template, &tokens)?;
    Ok(())
}
