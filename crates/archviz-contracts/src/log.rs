use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

pub type LogFields = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub category: String,
    pub message: String,
    pub fields: LogFields,
}

pub trait LogSink: Send + Sync {
    fn record(&self, record: &LogRecord) -> anyhow::Result<()>;
}

/// A failing sink never fails the caller; the remaining sinks still get the record.
#[derive(Clone, Default)]
pub struct Logger {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink<S: LogSink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn LogSink>) {
        self.sinks.push(sink);
    }

    pub fn log(&self, level: LogLevel, category: &str, message: &str, fields: LogFields) {
        let record = LogRecord {
            level,
            category: category.to_string(),
            message: message.to_string(),
            fields,
        };
        for sink in &self.sinks {
            if let Err(err) = sink.record(&record) {
                tracing::warn!(category = %record.category, "log sink failed: {err:#}");
            }
        }
    }

    pub fn debug(&self, category: &str, message: &str, fields: LogFields) {
        self.log(LogLevel::Debug, category, message, fields);
    }

    pub fn info(&self, category: &str, message: &str, fields: LogFields) {
        self.log(LogLevel::Info, category, message, fields);
    }

    pub fn warn(&self, category: &str, message: &str, fields: LogFields) {
        self.log(LogLevel::Warn, category, message, fields);
    }

    pub fn error(&self, category: &str, message: &str, fields: LogFields) {
        self.log(LogLevel::Error, category, message, fields);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn record(&self, record: &LogRecord) -> anyhow::Result<()> {
        let fields = if record.fields.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&record.fields)?
        };
        let category = record.category.as_str();
        let message = record.message.as_str();
        match record.level {
            LogLevel::Debug => tracing::debug!(category, fields = %fields, "{message}"),
            LogLevel::Info => tracing::info!(category, fields = %fields, "{message}"),
            LogLevel::Warn => tracing::warn!(category, fields = %fields, "{message}"),
            LogLevel::Error => tracing::error!(category, fields = %fields, "{message}"),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self, category: &str) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|record| record.category == category)
            .map(|record| record.message)
            .collect()
    }
}

impl LogSink for MemorySink {
    fn record(&self, record: &LogRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink lock poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

#[macro_export]
macro_rules! log_fields {
    () => {
        $crate::log::LogFields::new()
    };
    ($($key:literal : $value:expr),+ $(,)?) => {{
        let mut fields = $crate::log::LogFields::new();
        $(fields.insert($key.to_string(), $crate::__serde_json::json!($value));)+
        fields
    }};
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{LogLevel, LogRecord, LogSink, Logger, MemorySink};

    struct BrokenSink;

    impl LogSink for BrokenSink {
        fn record(&self, _record: &LogRecord) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn logger_fans_out_to_every_sink() {
        let first = MemorySink::new();
        let second = MemorySink::new();
        let logger = Logger::new()
            .with_sink(first.clone())
            .with_sink(second.clone());

        logger.info("capture", "static map ok", log_fields! { "bytes": 42 });

        for sink in [first, second] {
            let records = sink.records();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].level, LogLevel::Info);
            assert_eq!(records[0].category, "capture");
            assert_eq!(records[0].fields["bytes"], json!(42));
        }
    }

    #[test]
    fn broken_sink_does_not_starve_later_sinks() {
        let memory = MemorySink::new();
        let logger = Logger::new().with_sink(BrokenSink).with_sink(memory.clone());

        logger.error("generation", "boom", log_fields!());

        assert_eq!(memory.messages("generation"), vec!["boom".to_string()]);
    }

    #[test]
    fn levels_order_by_severity() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }
}
