//! Job event log
//!
//! Background jobs report progress as structured events tied to their job id.
//! Each event carries the job's start time, the time of the event and the
//! elapsed seconds, so a log search on `job_id` reconstructs the whole run.
//!
//! Where an event goes depends on the configured [`EventLogKind`]:
//!
//! - `filelog` appends one JSON object per line to a daily-rolled file of its
//!   own, separate from the service log
//! - `console` prints one plain text line per event on stdout
//! - `stackdriver` emits a `tracing` event under the `i2ap::events` target
//!   carrying the log name, for the JSON log shipper to pick up
//!
//! Without an [`EventWriter`] the first two also fall back to `tracing`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::config::EventSettings;

/// Target used for every job event
pub const EVENT_TARGET: &str = "i2ap::events";

/// File name prefix of the daily event files
pub const EVENT_FILE_PREFIX: &str = "i2ap-events";

/// Which event log flavour the service writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventLogKind {
    /// JSON lines in a daily-rolled file of their own
    #[default]
    FileLog,
    /// Events carry the configured log name and pod, for a central collector
    Stackdriver,
    /// Plain text lines on stdout
    Console,
}

impl FromStr for EventLogKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "filelog" => Ok(EventLogKind::FileLog),
            "stackdriver" => Ok(EventLogKind::Stackdriver),
            "console" => Ok(EventLogKind::Console),
            _ => Err(anyhow::anyhow!("Invalid logging type: {}", s)),
        }
    }
}

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Unknown names degrade to `DEBUG` rather than failing the caller.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "INFO" => Severity::Info,
            "NOTICE" => Severity::Notice,
            "WARNING" | "WARN" => Severity::Warning,
            "ERROR" => Severity::Error,
            "CRITICAL" => Severity::Critical,
            _ => Severity::Debug,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Notice => "NOTICE",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// Shared, line-oriented sink for job events
#[derive(Clone)]
pub struct EventWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl fmt::Debug for EventWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventWriter").finish_non_exhaustive()
    }
}

impl EventWriter {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// `{prefix}.YYYY-MM-DD.jsonl` files under `directory`, rolled daily
    pub fn daily(directory: impl AsRef<Path>, prefix: &str) -> anyhow::Result<Self> {
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(prefix)
            .filename_suffix("jsonl")
            .build(directory.as_ref())?;
        Ok(Self::new(appender))
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// The sink a given event log kind writes to, if it has one
    pub fn for_settings(settings: &EventSettings) -> anyhow::Result<Option<Self>> {
        Ok(match settings.kind {
            EventLogKind::FileLog => Some(Self::daily(&settings.directory, EVENT_FILE_PREFIX)?),
            EventLogKind::Console => Some(Self::stdout()),
            EventLogKind::Stackdriver => None,
        })
    }

    fn write_line(&self, line: &str) -> io::Result<()> {
        // The boxed writer holds no invariant a poisoned lock could break
        let mut writer = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

/// One `filelog` line
#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct EventRecord<'a> {
    timestamp: String,
    severity: &'static str,
    message: &'a str,
    job_id: &'a str,
    project_id: &'a str,
    pod: &'a str,
    job_status: &'a str,
    start_time: String,
    end_time: String,
    duration_secs: f64,
}

/// Event log bound to one job
#[derive(Debug, Clone)]
pub struct JobEventLog {
    kind: EventLogKind,
    job_id: String,
    project_id: String,
    log_name: Option<String>,
    pod: String,
    started: DateTime<Utc>,
    writer: Option<EventWriter>,
}

impl JobEventLog {
    pub fn new(
        kind: EventLogKind,
        job_id: impl Into<String>,
        project_id: impl Into<String>,
        log_name: Option<String>,
        pod: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            job_id: job_id.into(),
            project_id: project_id.into(),
            log_name,
            pod: pod.into(),
            started: Utc::now(),
            writer: None,
        }
    }

    /// Send `filelog` and `console` events to `writer`
    pub fn with_writer(mut self, writer: EventWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    /// Record one event. `job_status` is free-form (`INPROGRESS`, `END`, ...).
    pub fn log_event(&self, message: &str, severity: Severity, job_status: &str) {
        let now = Utc::now();
        let duration_secs = (now - self.started).num_milliseconds() as f64 / 1000.0;

        if let Some(writer) = &self.writer {
            let line = match self.kind {
                EventLogKind::FileLog => {
                    Some(self.json_line(message, severity, job_status, now, duration_secs))
                },
                EventLogKind::Console => Some(self.text_line(message, severity, job_status, now)),
                EventLogKind::Stackdriver => None,
            };
            if let Some(line) = line {
                if let Err(e) = writer.write_line(&line) {
                    warn!(job_id = %self.job_id, error = %e, "Failed to write job event");
                }
                return;
            }
        }

        let log_name = match self.kind {
            EventLogKind::Stackdriver => self.log_name.as_deref().unwrap_or("i2ap"),
            _ => "",
        };

        macro_rules! emit {
            ($level:expr) => {
                tracing::event!(
                    target: EVENT_TARGET,
                    $level,
                    job_id = %self.job_id,
                    project_id = %self.project_id,
                    log_name,
                    pod = %self.pod,
                    job_status,
                    severity = severity.as_str(),
                    start_time = %self.started.to_rfc3339(),
                    end_time = %now.to_rfc3339(),
                    duration_secs,
                    "{}",
                    message
                )
            };
        }

        match severity {
            Severity::Debug => emit!(tracing::Level::DEBUG),
            Severity::Info | Severity::Notice => emit!(tracing::Level::INFO),
            Severity::Warning => emit!(tracing::Level::WARN),
            Severity::Error | Severity::Critical => emit!(tracing::Level::ERROR),
        }
    }

    fn json_line(
        &self,
        message: &str,
        severity: Severity,
        job_status: &str,
        now: DateTime<Utc>,
        duration_secs: f64,
    ) -> String {
        let record = EventRecord {
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            severity: severity.as_str(),
            message,
            job_id: &self.job_id,
            project_id: &self.project_id,
            pod: &self.pod,
            job_status,
            start_time: self.started.to_rfc3339(),
            end_time: now.to_rfc3339(),
            duration_secs,
        };
        serde_json::to_string(&record).unwrap_or_else(|_| message.to_string())
    }

    fn text_line(&self, message: &str, severity: Severity, job_status: &str, now: DateTime<Utc>) -> String {
        format!(
            "{} {:<8} {} [{}] {}",
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
            severity.as_str(),
            self.job_id,
            job_status,
            message
        )
    }

    pub fn info(&self, message: &str, job_status: &str) {
        self.log_event(message, Severity::Info, job_status);
    }

    pub fn warning(&self, message: &str, job_status: &str) {
        self.log_event(message, Severity::Warning, job_status);
    }

    pub fn error(&self, message: &str, job_status: &str) {
        self.log_event(message, Severity::Error, job_status);
    }
}
