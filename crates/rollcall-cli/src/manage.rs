//! Operator commands: recipients, schedules, log inspection.

use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{NaiveDate, Utc};

use rollcall_config::RollcallConfig;
use rollcall_storage::Storage;
use rollcall_types::{Frequency, MessageKind, Recipient, Schedule, normalize_phone};

fn open_storage(config: &RollcallConfig) -> anyhow::Result<Arc<Storage>> {
    let db_path = config.db_path()?;
    Ok(Arc::new(
        Storage::open(&db_path).context("failed to open database")?,
    ))
}

pub async fn add_recipient(
    config: RollcallConfig,
    phone: &str,
    schedule_id: &str,
    frequency: Option<Frequency>,
    start_date: Option<NaiveDate>,
    message_kind: MessageKind,
) -> anyhow::Result<()> {
    let storage = open_storage(&config)?;

    let Some(schedule) = storage.get_schedule(schedule_id).await? else {
        bail!("no such schedule: {schedule_id}");
    };

    let normalized = normalize_phone(phone, &config.scheduler.country_code)?;
    let recipient = Recipient::new(
        &normalized,
        &schedule.id,
        frequency.unwrap_or(schedule.frequency),
        start_date.unwrap_or_else(|| Utc::now().date_naive()),
        message_kind,
        &schedule.client_code,
    );
    storage.upsert_recipient(&recipient).await?;

    println!(
        "enrolled {} under '{}' ({}, starts {})  id={}",
        recipient.phone, schedule.name, recipient.frequency, recipient.start_date, recipient.id
    );
    Ok(())
}

pub async fn list_recipients(config: RollcallConfig) -> anyhow::Result<()> {
    let storage = open_storage(&config)?;
    let recipients = storage.list_recipients().await?;
    if recipients.is_empty() {
        println!("no recipients");
        return Ok(());
    }
    for r in recipients {
        let state = if !r.active {
            "deactivated".to_string()
        } else if let Some(at) = r.next_retry_at {
            format!("backoff({}) until {}", r.retry_attempts, at.format("%Y-%m-%d %H:%M"))
        } else {
            "ready".to_string()
        };
        let last = r
            .last_sent
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{}  {}  {}  {}  last-sent={}  {}",
            r.id, r.phone, r.frequency, r.client_code, last, state
        );
    }
    Ok(())
}

pub async fn set_recipient_active(
    config: RollcallConfig,
    id: &str,
    active: bool,
) -> anyhow::Result<()> {
    let storage = open_storage(&config)?;
    if !storage.set_recipient_active(id, active).await? {
        bail!("no such recipient: {id}");
    }
    println!(
        "{} {}",
        if active { "activated" } else { "deactivated" },
        id
    );
    Ok(())
}

/// Inputs for `schedule add`, bundled to keep the CLI surface tidy.
pub struct NewSchedule {
    pub config: RollcallConfig,
    pub id: Option<String>,
    pub name: String,
    pub sender: String,
    pub frequency: Frequency,
    pub event_id: String,
    pub client: String,
    pub user_template: String,
    pub admin_template: String,
    pub send_hour: Option<u32>,
}

pub async fn add_schedule(new: NewSchedule) -> anyhow::Result<()> {
    let storage = open_storage(&new.config)?;
    let now = Utc::now();

    let schedule = Schedule {
        id: new
            .id
            .unwrap_or_else(|| uuid_like_id(&new.name)),
        name: new.name,
        sender_name: new.sender,
        frequency: new.frequency,
        send_hour: new.send_hour,
        user_template: new.user_template,
        admin_template: new.admin_template,
        event_id: new.event_id,
        client_code: new.client,
        created_at: now,
        updated_at: now,
    };

    schedule.validate()?;
    rollcall_engine::validate_templates(&schedule)
        .context("template cannot render within the SMS length limit")?;

    storage.upsert_schedule(&schedule).await?;
    println!("saved schedule '{}'  id={}", schedule.name, schedule.id);
    Ok(())
}

/// Stable, readable schedule id from the display name.
fn uuid_like_id(name: &str) -> String {
    let slug: String = name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("{}-{}", slug.trim_matches('-'), &uuid_suffix())
}

fn uuid_suffix() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

pub async fn list_schedules(config: RollcallConfig) -> anyhow::Result<()> {
    let storage = open_storage(&config)?;
    let schedules = storage.list_schedules().await?;
    if schedules.is_empty() {
        println!("no schedules");
        return Ok(());
    }
    for s in schedules {
        println!(
            "{}  '{}'  sender={}  {}  event={}  client={}",
            s.id, s.name, s.sender_name, s.frequency, s.event_id, s.client_code
        );
    }
    Ok(())
}

pub async fn show_logs(config: RollcallConfig, limit: u32) -> anyhow::Result<()> {
    let storage = open_storage(&config)?;
    for entry in storage.recent_delivery_logs(limit).await? {
        let outcome = match entry.status {
            rollcall_types::DeliveryStatus::Sent => entry
                .provider_message_id
                .map(|id| format!("sent ({id})"))
                .unwrap_or_else(|| "sent".to_string()),
            rollcall_types::DeliveryStatus::Failed => format!(
                "failed: {}",
                entry.error.unwrap_or_else(|| "unknown".to_string())
            ),
            rollcall_types::DeliveryStatus::Pending => "pending".to_string(),
        };
        println!(
            "{}  {}  [{}]  {}  {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.phone,
            entry.client_code,
            outcome,
            entry.content
        );
    }
    Ok(())
}

pub async fn show_runs(config: RollcallConfig, limit: u32) -> anyhow::Result<()> {
    let storage = open_storage(&config)?;
    for run in storage.recent_runs(limit).await? {
        let finished = run
            .finished_at
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {}  {}  processed={}  finished={}  {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.job_type,
            run.status.as_str(),
            run.processed,
            finished,
            run.detail.unwrap_or_default()
        );
    }
    Ok(())
}
