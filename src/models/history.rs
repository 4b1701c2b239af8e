use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One day of exercise history as the backend groups it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryDay {
    /// Display date for the section header, e.g. "22.08.26".
    pub title: String,
    pub data: Vec<HistoryEntry>,
}

/// A single completed exercise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub name: String,
    /// Muscle group, e.g. "costas".
    pub group: String,
    /// Completion time for display, e.g. "08:12".
    pub hour: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}
