//! Plain-text per-user transcripts
//!
//! Every user message is appended as one line to `<dir>/<username> - <id>.txt`
//! (or `<dir>/<id>.txt` when the user has no name), formatted as
//! `YYYY-MM-DD, HH:MM:SS, text` in server local time. Failures are logged and
//! swallowed; a transcript must never break a conversation.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

use crate::utils::safe_filename;

#[derive(Debug, Clone)]
pub struct TranscriptLogger {
    base_dir: PathBuf,
}

impl TranscriptLogger {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// File that holds the user's transcript
    pub fn file_path(&self, user_id: i64, username: Option<&str>) -> PathBuf {
        let name = username
            .map(safe_filename)
            .filter(|n| !n.is_empty())
            .map(|n| format!("{} - {}.txt", n, user_id))
            .unwrap_or_else(|| format!("{}.txt", user_id));
        self.base_dir.join(name)
    }

    /// Append one line for the user, stamped with the current local time
    pub async fn log_message(&self, user_id: i64, username: Option<&str>, text: &str) {
        self.log_message_at(user_id, username, text, Local::now()).await
    }

    pub async fn log_message_at(
        &self,
        user_id: i64,
        username: Option<&str>,
        text: &str,
        at: DateTime<Local>,
    ) {
        let path = self.file_path(user_id, username);
        let line = format_line(text, at);
        if let Err(e) = self.append(&path, &line).await {
            error!("Failed to log message for user {}: {}", user_id, e);
        } else {
            debug!("Logged message for user {}", user_id);
        }
    }

    async fn append(&self, path: &Path, line: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

fn format_line(text: &str, at: DateTime<Local>) -> String {
    let flat = text.replace(['\r', '\n'], " ");
    format!("{}, {}\n", at.format("%Y-%m-%d, %H:%M:%S"), flat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_file_names() {
        let logger = TranscriptLogger::new("/tmp/history");
        assert_eq!(
            logger.file_path(42, Some("anna")),
            PathBuf::from("/tmp/history/anna - 42.txt")
        );
        assert_eq!(
            logger.file_path(42, None),
            PathBuf::from("/tmp/history/42.txt")
        );
        assert_eq!(
            logger.file_path(42, Some("a/b")),
            PathBuf::from("/tmp/history/a_b - 42.txt")
        );
    }

    #[test]
    fn test_line_format_flattens_newlines() {
        let at = Local.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();
        assert_eq!(
            format_line("one\ntwo\r\nthree", at),
            "2024-02-03, 04:05:06, one two  three\n"
        );
    }

    #[tokio::test]
    async fn test_appends_lines() {
        let dir = TempDir::new().unwrap();
        let logger = TranscriptLogger::new(dir.path().join("history"));
        logger.log_message(7, Some("oleg"), "first").await;
        logger.log_message(7, Some("oleg"), "second").await;

        let content = tokio::fs::read_to_string(logger.file_path(7, Some("oleg")))
            .await
            .unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(", first"));
        assert!(lines[1].ends_with(", second"));
    }

    #[tokio::test]
    async fn test_unwritable_dir_is_swallowed() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "not a dir").unwrap();
        let logger = TranscriptLogger::new(blocker.join("history"));
        // Must not panic
        logger.log_message(1, None, "lost").await;
    }
}
