//! Daemon and one-shot sweep wiring.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::Utc;
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;
use tracing::info;

use rollcall_attendance::HttpAttendanceSource;
use rollcall_config::RollcallConfig;
use rollcall_engine::{Runner, RunnerConfig, SweepDriver};
use rollcall_sms::HttpSmsGateway;
use rollcall_storage::Storage;

/// Build the storage + clients + driver stack from config.
pub fn build_driver(config: &RollcallConfig) -> anyhow::Result<(Arc<Storage>, Arc<SweepDriver>)> {
    let db_path = config.db_path()?;
    let storage = Arc::new(Storage::open(&db_path).context("failed to open database")?);

    let Some(sms_key) = config.sms.api_key.as_deref() else {
        bail!("sms.api_key is not set (config file or ROLLCALL_SMS_API_KEY)");
    };
    let Some(attendance_key) = config.attendance.api_key.as_deref() else {
        bail!("attendance.api_key is not set (config file or ROLLCALL_ATTENDANCE_KEY)");
    };

    let gateway = HttpSmsGateway::new(
        &config.sms.base_url,
        sms_key,
        Duration::from_secs(config.sms.timeout_secs),
    )
    .context("failed to build SMS gateway client")?;
    let attendance = HttpAttendanceSource::new(
        &config.attendance.base_url,
        attendance_key,
        Duration::from_secs(config.attendance.timeout_secs),
    )
    .context("failed to build attendance client")?;

    let driver = Arc::new(SweepDriver::new(
        storage.clone(),
        Arc::new(gateway),
        Arc::new(attendance),
        Duration::from_millis(config.scheduler.stagger_ms),
    ));
    Ok((storage, driver))
}

/// `rollcall run` — the scheduler daemon.
pub async fn run_daemon(config: RollcallConfig) -> anyhow::Result<()> {
    let (_storage, driver) = build_driver(&config)?;

    let timezone: Tz = config
        .scheduler
        .timezone
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid scheduler.timezone: {e}"))?;
    let runner = Runner::new(
        driver,
        RunnerConfig {
            hour: config.scheduler.send_hour,
            minute: config.scheduler.send_minute,
            timezone,
        },
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested, finishing in-flight work");
            signal_cancel.cancel();
        }
    });

    runner.run(cancel).await;
    Ok(())
}

/// `rollcall sweep` — one sweep, right now.
pub async fn run_once(config: RollcallConfig) -> anyhow::Result<()> {
    let (_storage, driver) = build_driver(&config)?;
    let report = driver.run(Utc::now()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
