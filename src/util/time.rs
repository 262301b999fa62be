//! Timestamp helpers.
//!
//! Every timestamp in the database is UTC text in `TS_FORMAT`, so string
//! comparison in SQL matches chronological order.

use chrono::{DateTime, NaiveDateTime, Utc};

pub const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn format_ts(dt: DateTime<Utc>) -> String {
    dt.format(TS_FORMAT).to_string()
}

/// Parses a stored timestamp. Falls back to RFC 3339 for values written by hand.
pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, TS_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

/// French relative time label used by the dashboard activity feed.
pub fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds();
    if secs < 60 {
        return "à l'instant".to_string();
    }
    let minutes = secs / 60;
    if minutes < 60 {
        return plural(minutes, "minute", "minutes");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return plural(hours, "heure", "heures");
    }
    let days = hours / 24;
    if days == 1 {
        return "hier".to_string();
    }
    if days < 30 {
        return format!("il y a {} jours", days);
    }
    if days < 365 {
        // "mois" est invariable
        return format!("il y a {} mois", days / 30);
    }
    plural(days / 365, "an", "ans")
}

fn plural(n: i64, one: &str, many: &str) -> String {
    format!("il y a {} {}", n, if n == 1 { one } else { many })
}
