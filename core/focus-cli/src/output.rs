//! Stdout rendering for CLI commands.

use agent_focus_protocol::SessionRecord;
use chrono::{DateTime, Utc};
use focus_core::{CleanupReport, FocusEngine, FocusError};

pub fn print_json(sessions: &[SessionRecord]) -> Result<(), FocusError> {
    let json = serde_json::to_string_pretty(sessions).map_err(|source| FocusError::Json {
        context: "rendering session list".to_string(),
        source,
    })?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(engine: &FocusEngine, sessions: &[SessionRecord]) {
    if sessions.is_empty() {
        println!("No sessions");
        return;
    }
    let now = Utc::now();
    for session in sessions {
        println!("{}", format_row(&engine.display_name(session), session, now));
    }
}

pub fn print_report(verb: &str, report: &CleanupReport) {
    println!("{} {} sessions", verb, report.removed_count);
    for id in &report.removed_ids {
        println!("  {}", id);
    }
}

fn format_row(name: &str, session: &SessionRecord, now: DateTime<Utc>) -> String {
    let status = match &session.reason {
        Some(reason) => format!("{} ({})", session.status, reason),
        None => session.status.to_string(),
    };
    format!(
        "{:<24} {:<32} {:<20} {}",
        session.id,
        name,
        status,
        format_age(session.last_update, now)
    )
}

fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{}s ago", secs),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn ages_are_coarse() {
        let now = Utc::now();
        assert_eq!(format_age(now, now), "0s ago");
        assert_eq!(format_age(now - Duration::seconds(90), now), "1m ago");
        assert_eq!(format_age(now - Duration::hours(5), now), "5h ago");
        assert_eq!(format_age(now - Duration::days(3), now), "3d ago");
        // clock skew never renders negative
        assert_eq!(format_age(now + Duration::seconds(5), now), "0s ago");
    }

    #[test]
    fn row_shows_attention_reason() {
        let now = Utc::now();
        let record = SessionRecord::attention("ppid-9", "permission_prompt", "/repo", now)
            .expect("reason is not blank");
        let row = format_row("repo", &record, now);
        assert!(row.contains("attention (permission_prompt)"));
        assert!(row.starts_with("ppid-9"));
    }
}
