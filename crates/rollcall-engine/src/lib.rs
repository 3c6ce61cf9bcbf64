//! rollcall-engine: The recurrence scheduling and delivery-retry core.
//!
//! One sweep walks every active recipient: backoff gate, due filter,
//! reporting window, attendance fetch, template render, staggered gateway
//! send, retry/backoff bookkeeping, audit + run logging. The runner fires
//! one sweep per day at a configured local time.

pub mod message;
pub mod retry;
pub mod runner;
pub mod sweep;

pub use message::{FormatError, MAX_SMS_LEN, render, summary_tokens};
pub use retry::{BACKOFF_HOURS, MAX_RETRIES, on_failure, on_success};
pub use runner::{Runner, RunnerConfig};
pub use sweep::{SWEEP_JOB_TYPE, SweepDriver, SweepError, SweepReport, validate_templates};
