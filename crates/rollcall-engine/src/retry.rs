//! Retry/backoff policy.
//!
//! Pure transitions over `RetryState`; the sweep applies the result to the
//! recipient and persists it. Ladder: 2h, 6h, 24h, then deactivation —
//! a recipient that fails four times in a row goes quiet until an operator
//! re-activates them.

use chrono::{DateTime, Duration, Utc};

use rollcall_types::{Recipient, RetryState};

/// Consecutive failures tolerated before deactivation.
pub const MAX_RETRIES: u32 = 3;

/// Backoff delay after the 1st, 2nd and 3rd consecutive failure.
pub const BACKOFF_HOURS: [i64; 3] = [2, 6, 24];

/// Next state after a failed delivery attempt at `now`.
pub fn on_failure(state: RetryState, now: DateTime<Utc>) -> RetryState {
    match state {
        RetryState::Ready => RetryState::Backoff {
            attempt: 1,
            next_retry_at: now + Duration::hours(BACKOFF_HOURS[0]),
        },
        RetryState::Backoff { attempt, .. } if attempt >= MAX_RETRIES => RetryState::Deactivated,
        RetryState::Backoff { attempt, .. } => RetryState::Backoff {
            attempt: attempt + 1,
            next_retry_at: now + Duration::hours(BACKOFF_HOURS[attempt as usize]),
        },
        RetryState::Deactivated => RetryState::Deactivated,
    }
}

/// Next state after a successful delivery. Idempotent.
pub fn on_success(_state: RetryState, _now: DateTime<Utc>) -> RetryState {
    RetryState::Ready
}

/// Record a failure on the recipient's persisted columns.
pub fn apply_failure(recipient: &mut Recipient, now: DateTime<Utc>) {
    let next = on_failure(recipient.retry_state(), now);
    recipient.apply_retry_state(next);
}

/// Record a success: reset retry state and advance `last_sent`.
pub fn apply_success(recipient: &mut Recipient, now: DateTime<Utc>) {
    recipient.mark_sent(now);
}
