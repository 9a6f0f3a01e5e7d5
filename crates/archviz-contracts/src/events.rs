use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::log::{LogRecord, LogSink};

pub type EventPayload = Map<String, Value>;

/// Session event log, one JSON object per line. Caller fields win over
/// `type`, `session_id` and `ts` on collision.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    session_id: String,
    file: Mutex<Option<File>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                path: path.into(),
                session_id: session_id.into(),
                file: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let event = self.envelope(event_type, payload);
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let mut file = self
            .shared
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        if file.is_none() {
            *file = Some(open_append(&self.shared.path)?);
        }
        if let Some(file) = file.as_mut() {
            file.write_all(&line)
                .with_context(|| format!("failed appending to {}", self.shared.path.display()))?;
        }
        Ok(Value::Object(event))
    }

    fn envelope(&self, event_type: &str, payload: EventPayload) -> EventPayload {
        let mut event = EventPayload::with_capacity(payload.len() + 3);
        event.insert("type".into(), event_type.into());
        event.insert("session_id".into(), self.shared.session_id.as_str().into());
        event.insert(
            "ts".into(),
            Utc::now()
                .to_rfc3339_opts(SecondsFormat::Micros, false)
                .into(),
        );
        event.extend(payload);
        event
    }
}

fn open_append(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed opening event log {}", path.display()))
}

impl LogSink for EventWriter {
    fn record(&self, record: &LogRecord) -> anyhow::Result<()> {
        let mut payload = EventPayload::new();
        payload.insert("level".into(), record.level.as_str().into());
        payload.insert("category".into(), record.category.as_str().into());
        payload.extend(record.fields.clone());
        self.emit(&record.message, payload).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;
    use crate::log::{LogLevel, Logger};

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        let mut payload = EventPayload::new();
        payload.insert("image_type".to_string(), Value::String("hologram".to_string()));
        let emitted = writer.emit("generation_started", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("generation_started".to_string()));
        assert_eq!(parsed["session_id"], Value::String("session-123".to_string()));
        assert_eq!(parsed["image_type"], Value::String("hologram".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "session-123");

        let mut payload = EventPayload::new();
        payload.insert("session_id".to_string(), Value::String("other".to_string()));
        let emitted = writer.emit("capture_finished", payload)?;

        assert_eq!(emitted["session_id"], Value::String("other".to_string()));
        Ok(())
    }

    #[test]
    fn logger_records_land_as_typed_events() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let logger = Logger::new().with_sink(EventWriter::new(&path, "session-9"));

        logger.log(
            LogLevel::Warn,
            "capture",
            "static_map_failed",
            crate::log_fields! { "status": 403 },
        );
        logger.info("generation", "generation_started", crate::log_fields!());

        let content = fs::read_to_string(&path)?;
        let lines: Vec<Value> = content
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], Value::String("static_map_failed".to_string()));
        assert_eq!(lines[0]["level"], Value::String("warn".to_string()));
        assert_eq!(lines[0]["category"], Value::String("capture".to_string()));
        assert_eq!(lines[0]["status"], serde_json::json!(403));
        assert_eq!(lines[1]["type"], Value::String("generation_started".to_string()));
        Ok(())
    }
}
