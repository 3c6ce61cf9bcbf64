//! rollcall-types: Shared domain types for the rollcall notifier.
//!
//! Pure data model — recipients, schedules, delivery/run logs and the
//! retry state machine. No I/O lives here.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a gateway sender id (SMS alphanumeric sender limit).
pub const MAX_SENDER_NAME_LEN: usize = 11;

/// Error text stored on a delivery-log row is cut to this many characters.
pub const MAX_LOGGED_ERROR_LEN: usize = 500;

// ──────────────────── Recurrence Types ────────────────────

/// How often a recipient receives their summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annually,
}

impl Frequency {
    /// All known frequencies, for CLI help and validation.
    pub const ALL: [Frequency; 5] = [
        Frequency::Daily,
        Frequency::Weekly,
        Frequency::Monthly,
        Frequency::Quarterly,
        Frequency::Annually,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Annually => "annually",
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "quarterly" => Ok(Frequency::Quarterly),
            "annually" | "annual" | "yearly" => Ok(Frequency::Annually),
            other => Err(format!("unknown frequency: {other}")),
        }
    }
}

/// Which template a recipient receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Per-member summary (the member's own clock-ins).
    User,
    /// Aggregate summary across all members of the event.
    Admin,
}

impl MessageKind {
    pub fn is_admin(&self) -> bool {
        matches!(self, MessageKind::Admin)
    }
}

// ──────────────────── Recipient ────────────────────

/// A phone number subscribed to a recurring summary under one schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    /// Unique recipient ID.
    pub id: String,
    /// Destination phone number, E.164-normalized.
    pub phone: String,
    /// Owning schedule ID.
    pub schedule_id: String,
    /// Recurrence period.
    pub frequency: Frequency,
    /// Anchor date — never due before this.
    pub start_date: NaiveDate,
    /// Last successful send. None means never sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sent: Option<DateTime<Utc>>,
    /// Template selection (admin aggregate vs per-member).
    pub message_kind: MessageKind,
    /// Tenant/client code, carried on every log row for isolation.
    pub client_code: String,
    /// Consecutive failed delivery attempts since the last success.
    #[serde(default)]
    pub retry_attempts: u32,
    /// When set, the recipient is in backoff until this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Inactive recipients are never selected for delivery.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Recipient {
    /// Create a fresh, active, never-sent recipient.
    pub fn new(
        phone: &str,
        schedule_id: &str,
        frequency: Frequency,
        start_date: NaiveDate,
        message_kind: MessageKind,
        client_code: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            phone: phone.to_string(),
            schedule_id: schedule_id.to_string(),
            frequency,
            start_date,
            last_sent: None,
            message_kind,
            client_code: client_code.to_string(),
            retry_attempts: 0,
            next_retry_at: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    /// Project the persisted retry columns into the tagged state machine.
    pub fn retry_state(&self) -> RetryState {
        if !self.active {
            return RetryState::Deactivated;
        }
        match (self.retry_attempts, self.next_retry_at) {
            (0, _) => RetryState::Ready,
            (attempt, Some(at)) => RetryState::Backoff {
                attempt,
                next_retry_at: at,
            },
            // Attempts recorded but no pending retry instant: treat as
            // ready so the next due evaluation can proceed.
            (_, None) => RetryState::Ready,
        }
    }

    /// Write a retry state back into the persisted columns.
    pub fn apply_retry_state(&mut self, state: RetryState) {
        match state {
            RetryState::Ready => {
                self.retry_attempts = 0;
                self.next_retry_at = None;
            }
            RetryState::Backoff {
                attempt,
                next_retry_at,
            } => {
                self.retry_attempts = attempt;
                self.next_retry_at = Some(next_retry_at);
            }
            RetryState::Deactivated => {
                self.active = false;
                self.next_retry_at = None;
            }
        }
    }

    /// Record a successful delivery. `last_sent` never moves backwards.
    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.apply_retry_state(RetryState::Ready);
        if self.last_sent.is_none_or(|prev| prev <= now) {
            self.last_sent = Some(now);
        }
    }
}

/// Explicit retry state of a recipient between delivery attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RetryState {
    /// No pending retry; eligible as soon as the recurrence says due.
    Ready,
    /// Waiting out a backoff delay after `attempt` consecutive failures.
    Backoff {
        attempt: u32,
        next_retry_at: DateTime<Utc>,
    },
    /// Retry budget exhausted; only an operator can re-activate.
    Deactivated,
}

// ──────────────────── Schedule ────────────────────

/// A named recurring-report definition owned by a tenant.
///
/// Read-only from the engine's perspective; edited via the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// Unique schedule ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// SMS sender id shown on the recipient's handset (≤ 11 chars).
    pub sender_name: String,
    /// Default recurrence for recipients enrolled under this schedule.
    pub frequency: Frequency,
    /// Time-of-day anchor (hour, 0-23) for cron-style schedules.
    /// None means recipients are anchored to their own start dates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_hour: Option<u32>,
    /// Template rendered for `MessageKind::User` recipients.
    pub user_template: String,
    /// Template rendered for `MessageKind::Admin` recipients.
    pub admin_template: String,
    /// External attendance resource (meeting event) to summarize.
    pub event_id: String,
    /// Tenant/client code.
    pub client_code: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("sender name '{0}' exceeds {MAX_SENDER_NAME_LEN} characters")]
    SenderNameTooLong(String),
    #[error("schedule name must not be empty")]
    EmptyName,
}

impl Schedule {
    /// Validate gateway-facing constraints before persistence.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.name.trim().is_empty() {
            return Err(ScheduleError::EmptyName);
        }
        if self.sender_name.chars().count() > MAX_SENDER_NAME_LEN {
            return Err(ScheduleError::SenderNameTooLong(self.sender_name.clone()));
        }
        Ok(())
    }

    /// Template for the given recipient kind.
    pub fn template_for(&self, kind: MessageKind) -> &str {
        match kind {
            MessageKind::User => &self.user_template,
            MessageKind::Admin => &self.admin_template,
        }
    }
}

// ──────────────────── Delivery Log ────────────────────

/// Outcome recorded on a delivery-log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// Write-once audit record of one attempted send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryLogEntry {
    pub id: String,
    pub phone: String,
    pub content: String,
    pub status: DeliveryStatus,
    /// Provider message id, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    /// Human-readable failure reason, truncated to `MAX_LOGGED_ERROR_LEN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub frequency: Frequency,
    pub client_code: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl DeliveryLogEntry {
    pub fn sent(recipient: &Recipient, content: &str, message_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            phone: recipient.phone.clone(),
            content: content.to_string(),
            status: DeliveryStatus::Sent,
            provider_message_id: Some(message_id.to_string()),
            error: None,
            frequency: recipient.frequency,
            client_code: recipient.client_code.clone(),
            is_admin: recipient.message_kind.is_admin(),
            created_at: now,
        }
    }

    pub fn failed(recipient: &Recipient, content: &str, error: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            phone: recipient.phone.clone(),
            content: content.to_string(),
            status: DeliveryStatus::Failed,
            provider_message_id: None,
            error: Some(truncate_error(error)),
            frequency: recipient.frequency,
            client_code: recipient.client_code.clone(),
            is_admin: recipient.message_kind.is_admin(),
            created_at: now,
        }
    }
}

/// Cut failure text down to what the log schema allows.
pub fn truncate_error(error: &str) -> String {
    if error.chars().count() <= MAX_LOGGED_ERROR_LEN {
        error.to_string()
    } else {
        error.chars().take(MAX_LOGGED_ERROR_LEN).collect()
    }
}

// ──────────────────── Cron Run Log ────────────────────

/// Lifecycle of one scheduler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Started,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "started",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(RunStatus::Started),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// One record per sweep, for operational visibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronRunLog {
    pub id: String,
    /// Job kind, e.g. "delivery-sweep".
    pub job_type: String,
    pub status: RunStatus,
    /// Recipients that reached a delivery attempt this run.
    pub processed: u32,
    /// Free-text detail (error summary on failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

// ──────────────────── Phone Normalization ────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhoneError {
    #[error("phone number contains non-digit characters: {0}")]
    InvalidCharacters(String),
    #[error("phone number has implausible length: {0}")]
    BadLength(String),
}

/// Normalize a raw phone number into E.164 form.
///
/// Accepts local format (leading `0`, converted using `default_country_code`,
/// e.g. "233" for Ghana) and international format (leading `+` or `00`).
/// Formatting characters (spaces, dashes, parens) are stripped.
pub fn normalize_phone(raw: &str, default_country_code: &str) -> Result<String, PhoneError> {
    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();

    let digits = if let Some(rest) = stripped.strip_prefix('+') {
        rest.to_string()
    } else if let Some(rest) = stripped.strip_prefix("00") {
        rest.to_string()
    } else if let Some(rest) = stripped.strip_prefix('0') {
        format!("{default_country_code}{rest}")
    } else {
        stripped.clone()
    };

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(PhoneError::InvalidCharacters(raw.to_string()));
    }
    // E.164 allows up to 15 digits; anything under 8 is not a real mobile.
    if digits.len() < 8 || digits.len() > 15 {
        return Err(PhoneError::BadLength(raw.to_string()));
    }

    Ok(format!("+{digits}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_frequency_roundtrip() {
        for f in Frequency::ALL {
            let parsed: Frequency = f.as_str().parse().unwrap();
            assert_eq!(parsed, f);
        }
        assert!("fortnightly".parse::<Frequency>().is_err());
    }

    #[test]
    fn test_recipient_serde() {
        let r = Recipient::new(
            "+233201234567",
            "sched-1",
            Frequency::Weekly,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            MessageKind::User,
            "acme",
        );
        let json = serde_json::to_string(&r).unwrap();
        let parsed: Recipient = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.phone, "+233201234567");
        assert_eq!(parsed.frequency, Frequency::Weekly);
        assert!(parsed.active);
        assert_eq!(parsed.retry_attempts, 0);
    }

    #[test]
    fn test_retry_state_projection() {
        let mut r = Recipient::new(
            "+233201234567",
            "sched-1",
            Frequency::Daily,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            MessageKind::User,
            "acme",
        );
        assert_eq!(r.retry_state(), RetryState::Ready);

        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        r.apply_retry_state(RetryState::Backoff {
            attempt: 2,
            next_retry_at: at,
        });
        assert_eq!(r.retry_attempts, 2);
        assert_eq!(r.next_retry_at, Some(at));
        assert_eq!(
            r.retry_state(),
            RetryState::Backoff {
                attempt: 2,
                next_retry_at: at
            }
        );

        r.apply_retry_state(RetryState::Deactivated);
        assert!(!r.active);
        assert!(r.next_retry_at.is_none());
        assert_eq!(r.retry_state(), RetryState::Deactivated);
    }

    #[test]
    fn test_mark_sent_is_monotonic() {
        let mut r = Recipient::new(
            "+233201234567",
            "sched-1",
            Frequency::Daily,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            MessageKind::User,
            "acme",
        );
        let later = Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap();
        r.mark_sent(later);
        r.mark_sent(earlier);
        assert_eq!(r.last_sent, Some(later));
    }

    #[test]
    fn test_schedule_validation() {
        let mut s = Schedule {
            id: "s1".into(),
            name: "Weekly rollup".into(),
            sender_name: "RollCall".into(),
            frequency: Frequency::Weekly,
            send_hour: Some(8),
            user_template: "Hi [FirstName]".into(),
            admin_template: "Total [ClockIns]".into(),
            event_id: "evt-1".into(),
            client_code: "acme".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(s.validate().is_ok());

        s.sender_name = "WayTooLongSenderName".into();
        assert_eq!(
            s.validate(),
            Err(ScheduleError::SenderNameTooLong("WayTooLongSenderName".into()))
        );
    }

    #[test]
    fn test_truncate_error() {
        let long = "x".repeat(600);
        assert_eq!(truncate_error(&long).len(), MAX_LOGGED_ERROR_LEN);
        assert_eq!(truncate_error("short"), "short");
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(
            normalize_phone("020 123 4567", "233").unwrap(),
            "+233201234567"
        );
        assert_eq!(
            normalize_phone("+233 20-123-4567", "233").unwrap(),
            "+233201234567"
        );
        assert_eq!(
            normalize_phone("00233201234567", "233").unwrap(),
            "+233201234567"
        );
        assert!(matches!(
            normalize_phone("call-me", "233"),
            Err(PhoneError::InvalidCharacters(_))
        ));
        assert!(matches!(
            normalize_phone("0123", "233"),
            Err(PhoneError::BadLength(_))
        ));
    }
}
