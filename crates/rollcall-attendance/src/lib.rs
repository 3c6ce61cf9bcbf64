//! rollcall-attendance: Client for the attendance summary source.
//!
//! Fetches clock-in/out records for a phone over a reporting window and
//! reduces them to the counts the message templates consume. An empty
//! result is not an error — the sweep skips the recipient and tries again
//! next cycle.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use rollcall_recurrence::ReportingWindow;

/// One member's clock activity for one day.
#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub member_name: String,
    pub clock_in: Option<DateTime<Utc>>,
    pub clock_out: Option<DateTime<Utc>>,
    /// Clock-ins after this time of day count as late.
    pub late_threshold: Option<NaiveTime>,
}

/// Attendance source failure — local data error, never counted against the
/// delivery retry budget.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("attendance transport error: {0}")]
    Transport(String),
    #[error("attendance response malformed: {0}")]
    BadResponse(String),
}

/// Attendance data seam consumed by the sweep.
#[async_trait]
pub trait AttendanceSource: Send + Sync {
    async fn fetch(
        &self,
        phone: &str,
        window: &ReportingWindow,
        event_id: &str,
    ) -> Result<Vec<AttendanceRecord>, FetchError>;
}

// ─── Summarization ───────────────────────────────────

/// Counts substituted into message templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendanceSummary {
    /// Name on the first record (the member themself for user messages).
    pub member_name: Option<String>,
    /// Distinct members seen in the window.
    pub members: u32,
    pub clock_ins: u32,
    pub clock_outs: u32,
    pub lates: u32,
}

impl AttendanceSummary {
    /// First given name, for the [FirstName] token.
    pub fn first_name(&self) -> Option<&str> {
        self.member_name
            .as_deref()
            .and_then(|n| n.split_whitespace().next())
    }
}

/// Reduce raw records to template counts. A clock-in later than the
/// record's threshold counts as late; records without a threshold never do.
pub fn summarize(records: &[AttendanceRecord]) -> AttendanceSummary {
    let mut summary = AttendanceSummary {
        member_name: records.first().map(|r| r.member_name.clone()),
        ..Default::default()
    };
    let mut seen: Vec<&str> = Vec::new();

    for record in records {
        if !seen.contains(&record.member_name.as_str()) {
            seen.push(&record.member_name);
        }
        if let Some(clock_in) = record.clock_in {
            summary.clock_ins += 1;
            if let Some(threshold) = record.late_threshold
                && clock_in.time() > threshold
            {
                summary.lates += 1;
            }
        }
        if record.clock_out.is_some() {
            summary.clock_outs += 1;
        }
    }

    summary.members = seen.len() as u32;
    summary
}

// ─── Wire Types ───────────────────────────────────

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    data: Vec<WireRecord>,
}

#[derive(Debug, Deserialize)]
struct WireRecord {
    member_name: String,
    #[serde(default)]
    clock_in: Option<DateTime<Utc>>,
    #[serde(default)]
    clock_out: Option<DateTime<Utc>>,
    /// "HH:MM" time of day.
    #[serde(default)]
    late_threshold: Option<String>,
}

impl WireRecord {
    fn into_record(self) -> AttendanceRecord {
        AttendanceRecord {
            member_name: self.member_name,
            clock_in: self.clock_in,
            clock_out: self.clock_out,
            late_threshold: self
                .late_threshold
                .and_then(|s| NaiveTime::parse_from_str(&s, "%H:%M").ok()),
        }
    }
}

// ─── HTTP Implementation ───────────────────────────────────

/// HTTP client for the attendance API.
pub struct HttpAttendanceSource {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpAttendanceSource {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl AttendanceSource for HttpAttendanceSource {
    async fn fetch(
        &self,
        phone: &str,
        window: &ReportingWindow,
        event_id: &str,
    ) -> Result<Vec<AttendanceRecord>, FetchError> {
        let start = window.start_iso();
        let end = window.end_iso();
        let resp = self
            .client
            .get(format!("{}/attendance", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[
                ("phone", phone),
                ("startDate", start.as_str()),
                ("endDate", end.as_str()),
                ("eventId", event_id),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Transport(format!("attendance request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(FetchError::BadResponse(format!(
                "attendance API returned {}",
                resp.status()
            )));
        }

        let body: FetchResponse = resp
            .json()
            .await
            .map_err(|e| FetchError::BadResponse(e.to_string()))?;

        tracing::debug!(%phone, count = body.data.len(), "attendance records fetched");
        Ok(body.data.into_iter().map(WireRecord::into_record).collect())
    }
}
