//! Caption schedule
//!
//! Captions come from a JSON file keyed by account, then by English weekday
//! name:
//!
//! ```json
//! {
//!   "eclipsed_by_you": {
//!     "Monday": { "caption": "New week ✨", "description": "Longer Page text" }
//!   }
//! }
//! ```
//!
//! `description` falls back to `caption`; a missing account, day or caption
//! falls back to the configured default caption.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::ScheduleConfig;
use crate::error::ScheduleError;
use crate::types::Captions;

#[derive(Debug, Clone, Default, Deserialize)]
struct DayEntry {
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Schedule {
    accounts: HashMap<String, HashMap<String, DayEntry>>,
}

impl Schedule {
    pub fn load(path: &Path) -> Result<Self, ScheduleError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ScheduleError> {
        let accounts = serde_json::from_str(content)?;
        Ok(Self { accounts })
    }

    /// Captions for `account` on `weekday` (e.g. `"Monday"`)
    pub fn captions_for(&self, account: &str, weekday: &str, default_caption: &str) -> Captions {
        let entry = self.accounts.get(account).and_then(|days| days.get(weekday));
        let caption = entry
            .and_then(|e| e.caption.as_deref())
            .filter(|c| !c.trim().is_empty());

        match caption {
            Some(caption) => {
                let description = entry
                    .and_then(|e| e.description.as_deref())
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or(caption);
                Captions::new(caption, description)
            }
            None => {
                warn!(account, weekday, "No caption scheduled; using default");
                Captions::new(default_caption, default_caption)
            }
        }
    }
}

/// Parse a `+HH:MM` / `-HH:MM` offset
pub fn parse_utc_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    let (sign, rest) = match value.chars().next()? {
        '+' => (1, &value[1..]),
        '-' => (-1, &value[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// English weekday name of `now` in the given offset
pub fn weekday_name(now: DateTime<Utc>, offset: FixedOffset) -> String {
    now.with_timezone(&offset).format("%A").to_string()
}

/// Today's captions for `account`.
///
/// Read failures are logged and answered with the default caption; the
/// returned warning, if any, is meant for the notifier.
pub fn todays_captions(config: &ScheduleConfig, account: &str, now: DateTime<Utc>) -> (Captions, Option<String>) {
    let offset = parse_utc_offset(&config.utc_offset).unwrap_or_else(|| {
        warn!(offset = %config.utc_offset, "Invalid schedule offset; using UTC");
        Utc.fix()
    });
    let weekday = weekday_name(now, offset);
    let path = shellexpand::tilde(&config.path).to_string();

    match Schedule::load(Path::new(&path)) {
        Ok(schedule) => {
            debug!(path = %path, weekday = %weekday, "Loaded caption schedule");
            (schedule.captions_for(account, &weekday, &config.default_caption), None)
        }
        Err(e) => {
            warn!(path = %path, error = %e, "Could not load caption schedule");
            (
                Captions::new(config.default_caption.as_str(), config.default_caption.as_str()),
                Some(format!("Failed to read captions from {}: {}", path, e)),
            )
        }
    }
}
