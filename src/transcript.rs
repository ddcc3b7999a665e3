//! Best-effort chat log. One JSON object per line, appended as messages
//! enter the history. Logging failures never interrupt the conversation.

use crate::api::ChatMessage;
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

pub struct Transcript {
    path: Option<PathBuf>,
}

impl Transcript {
    pub fn new(path: Option<String>) -> Self {
        Self {
            path: path.map(PathBuf::from),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn record(&mut self, message: &ChatMessage) {
        let Ok(line) = serde_json::to_string(message) else {
            return;
        };
        self.append_line(&line);
    }

    /// Marks a history reset in the log so a reader can tell where the
    /// model's context was truncated.
    pub fn record_reset(&mut self) {
        let line = json!({"role": "system", "content": "History reset"}).to_string();
        self.append_line(&line);
    }

    fn append_line(&mut self, line: &str) {
        let Some(path) = &self.path else {
            return;
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(err) = result {
            warn!(path = %path.display(), error = %err, "Failed to write chat log");
        }
    }
}
