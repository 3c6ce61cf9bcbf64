//! Message template rendering.
//!
//! Tokens are written `[TokenName]`, matched case-sensitively. Tokens with
//! no value stay in the output verbatim — that mirrors what recipients have
//! always received — but each one is logged, since shipping a literal
//! `[TokenName]` to a handset is almost certainly a template mistake.

use thiserror::Error;

use rollcall_attendance::AttendanceSummary;
use rollcall_recurrence::ReportingWindow;

/// Single-segment SMS limit.
pub const MAX_SMS_LEN: usize = 160;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("formatted message is {len} characters, over the {MAX_SMS_LEN} character SMS limit")]
    MessageTooLong { len: usize },
}

/// Substitute tokens into a template and enforce the SMS length limit.
pub fn render(template: &str, tokens: &[(&str, String)]) -> Result<String, FormatError> {
    let mut out = template.to_string();
    for (name, value) in tokens {
        out = out.replace(&format!("[{name}]"), value);
    }

    let unresolved = unresolved_tokens(&out);
    if !unresolved.is_empty() {
        tracing::warn!(
            tokens = %unresolved.join(", "),
            "template tokens left unresolved in outgoing message"
        );
    }

    let len = out.chars().count();
    if len > MAX_SMS_LEN {
        return Err(FormatError::MessageTooLong { len });
    }
    Ok(out)
}

/// Bracketed names still present after substitution.
fn unresolved_tokens(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let tail = &rest[open + 1..];
        match tail.find(']') {
            Some(close) => {
                let name = &tail[..close];
                if name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
                    && name.chars().all(|c| c.is_ascii_alphanumeric())
                {
                    found.push(name.to_string());
                }
                rest = &tail[close + 1..];
            }
            None => break,
        }
    }
    found
}

/// Token values for one delivery: attendance counts plus the window bounds.
pub fn summary_tokens(
    summary: &AttendanceSummary,
    window: &ReportingWindow,
) -> Vec<(&'static str, String)> {
    let mut tokens = vec![
        ("ClockIns", summary.clock_ins.to_string()),
        ("ClockOuts", summary.clock_outs.to_string()),
        ("Lates", summary.lates.to_string()),
        ("Members", summary.members.to_string()),
        ("PeriodStart", window.start_iso()),
        ("PeriodEnd", window.end_iso()),
    ];
    if let Some(name) = &summary.member_name {
        tokens.push(("Name", name.clone()));
    }
    if let Some(first) = summary.first_name() {
        tokens.push(("FirstName", first.to_string()));
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_render_substitutes_tokens() {
        let out = render(
            "Hi [FirstName], you had [ClockIns] clock-ins",
            &[("FirstName", "Ama".into()), ("ClockIns", "5".into())],
        )
        .unwrap();
        assert_eq!(out, "Hi Ama, you had 5 clock-ins");
    }

    #[test]
    fn test_render_is_case_sensitive() {
        let out = render("Hi [firstname]", &[("FirstName", "Ama".into())]).unwrap();
        assert_eq!(out, "Hi [firstname]");
    }

    #[test]
    fn test_render_leaves_unresolved_tokens_verbatim() {
        let out = render("Hi [FirstName], [Mystery]", &[("FirstName", "Ama".into())]).unwrap();
        assert_eq!(out, "Hi Ama, [Mystery]");
    }

    #[test]
    fn test_render_rejects_over_long_message() {
        let filler = "x".repeat(200);
        let err = render("[Body]", &[("Body", filler)]).unwrap_err();
        assert_eq!(err, FormatError::MessageTooLong { len: 200 });
    }

    #[test]
    fn test_render_length_exactly_at_limit() {
        let body = "y".repeat(MAX_SMS_LEN);
        assert!(render("[Body]", &[("Body", body)]).is_ok());
    }

    #[test]
    fn test_unresolved_token_scan() {
        assert_eq!(unresolved_tokens("no tokens here"), Vec::<String>::new());
        assert_eq!(unresolved_tokens("[One] and [Two]"), vec!["One", "Two"]);
        // Unterminated or non-token brackets are not reported.
        assert!(unresolved_tokens("array[0] and [dangling").is_empty());
    }

    #[test]
    fn test_summary_tokens() {
        let summary = AttendanceSummary {
            member_name: Some("Ama Mensah".into()),
            members: 3,
            clock_ins: 12,
            clock_outs: 11,
            lates: 2,
        };
        let window = ReportingWindow {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 8).unwrap(),
        };
        let tokens = summary_tokens(&summary, &window);
        let get = |name: &str| {
            tokens
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("ClockIns").as_deref(), Some("12"));
        assert_eq!(get("Members").as_deref(), Some("3"));
        assert_eq!(get("PeriodStart").as_deref(), Some("2024-01-01"));
        assert_eq!(get("FirstName").as_deref(), Some("Ama"));
        assert_eq!(get("Name").as_deref(), Some("Ama Mensah"));
    }
}
