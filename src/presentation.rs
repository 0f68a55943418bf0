use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::Path;

/// Date pattern used in grade listings and notification mails.
pub const DISPLAY_DATE_FORMAT: &str = "%d.%m.%Y %H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

/// A message queued in the session by one request and shown by the next page view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Formats `date` with a strftime-style pattern. An invalid pattern yields a
/// readable fallback instead of a panic.
pub fn format_date(date: &DateTime<Utc>, pattern: &str) -> String {
    let mut out = String::new();
    match write!(out, "{}", date.format(pattern)) {
        Ok(()) => out,
        Err(_) => format!("Invalid date format: {}", date.to_rfc3339()),
    }
}

/// Class label as shown to users, e.g. `1.A`.
pub fn class_name(grade_year: i32, name_letter: &str) -> String {
    format!("{}.{}", grade_year, name_letter)
}

/// Whether an uploaded profile photo exists for `user_id` under `public_dir/uploads`.
pub fn asset_exists(public_dir: &Path, user_id: i64) -> bool {
    public_dir
        .join("uploads")
        .join(format!("{}.jpg", user_id))
        .is_file()
}
