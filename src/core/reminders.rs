use crate::domain::ports::Storage;
use crate::utils::error::Result;
use chrono::{DateTime, Utc};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

#[derive(Debug, Clone, Default)]
pub struct Reminder {
    pub message: String,
    pub topic: Option<String>,
    pub next_step: Option<String>,
    pub tags: Vec<String>,
}

pub fn format_entry(timestamp: &str, reminder: &Reminder) -> String {
    let mut lines = vec![format!("## {}", timestamp)];
    if let Some(topic) = reminder.topic.as_deref().filter(|t| !t.is_empty()) {
        lines.push(format!("- **Topic:** {}", topic.trim()));
    }
    lines.push(format!("- **Note:** {}", reminder.message.trim()));
    if let Some(next_step) = reminder.next_step.as_deref().filter(|s| !s.is_empty()) {
        lines.push(format!("- **Next step:** {}", next_step.trim()));
    }
    let tags: Vec<&str> = reminder
        .tags
        .iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .collect();
    if !tags.is_empty() {
        lines.push(format!("- **Tags:** {}", tags.join(", ")));
    }
    lines.join("\n") + "\n"
}

/// 附加到 capsule 收件匣；既有內容非空白時先補一個空行
pub async fn append_reminder<S: Storage>(
    storage: &S,
    capsule_file: &str,
    reminder: &Reminder,
    now: DateTime<Utc>,
) -> Result<String> {
    let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
    let entry = format_entry(&timestamp, reminder);

    let needs_leading_newline = if storage.exists(capsule_file).await {
        let existing = storage.read_file(capsule_file).await?;
        !String::from_utf8_lossy(&existing).trim().is_empty()
    } else {
        false
    };

    let mut payload = String::new();
    if needs_leading_newline {
        payload.push('\n');
    }
    payload.push_str(&entry);
    storage.append_file(capsule_file, payload.as_bytes()).await?;
    tracing::debug!("Appended reminder to {}", capsule_file);
    Ok(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::LocalStorage;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn reminder() -> Reminder {
        Reminder {
            message: "  Revisit the stream filter width  ".to_string(),
            topic: Some("ux".to_string()),
            next_step: None,
            tags: vec![" cli ".to_string(), "".to_string(), "filter".to_string()],
        }
    }

    #[test]
    fn test_format_entry() {
        assert_eq!(
            format_entry("2025-01-01 00:00:00 UTC", &reminder()),
            "## 2025-01-01 00:00:00 UTC\n- **Topic:** ux\n- **Note:** Revisit the stream filter width\n- **Tags:** cli, filter\n"
        );

        let bare = Reminder {
            message: "note".to_string(),
            tags: vec!["  ".to_string()],
            ..Default::default()
        };
        assert_eq!(format_entry("T", &bare), "## T\n- **Note:** note\n");
    }

    #[tokio::test]
    async fn test_append_reminder_separates_entries() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        let now = Utc.with_ymd_and_hms(2025, 2, 3, 4, 5, 6).unwrap();
        let file = "docs/agents/capsules/remember-later.md";

        let ts = append_reminder(&storage, file, &reminder(), now).await.unwrap();
        assert_eq!(ts, "2025-02-03 04:05:06 UTC");
        append_reminder(&storage, file, &reminder(), now).await.unwrap();

        let content = std::fs::read_to_string(dir.path().join(file)).unwrap();
        assert!(content.starts_with("## 2025-02-03 04:05:06 UTC\n"));
        assert!(content.contains("- **Tags:** cli, filter\n\n## 2025-02-03"));
    }
}
