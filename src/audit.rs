//! Append-only decision log.
//!
//! One line per routing decision: timestamp, status tag, free-text detail.
//! Never rotated here — the file is an operator artifact, not process
//! state. Write failures are logged and swallowed; auditing must never
//! break routing.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;

/// Plain-text audit writer.
pub struct AuditLog {
    path: Option<PathBuf>,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    /// A no-op log for dry runs and tests.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    /// Append one decision line: `<ISO-8601> [<tag>] <detail>`.
    pub fn record(&self, tag: &str, detail: &str) {
        let Some(path) = &self.path else {
            return;
        };
        let line = format!(
            "{} [{}] {}\n",
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            tag,
            detail.replace('\n', " ")
        );
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), "audit write failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn records_append_one_line_each() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("audit.log");
        let log = AuditLog::new(path.clone());
        log.record("routed", "gemini: research task");
        log.record("gate_blocked", "secrets in message");

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[routed]"));
        assert!(lines[1].contains("[gate_blocked]"));
    }

    #[test]
    fn newlines_in_detail_are_flattened() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("audit.log");
        let log = AuditLog::new(path.clone());
        log.record("routed", "line one\nline two");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn disabled_log_is_a_no_op() {
        let log = AuditLog::disabled();
        log.record("routed", "goes nowhere");
    }
}
