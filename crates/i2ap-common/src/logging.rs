//! Process-wide logging bootstrap
//!
//! Every i2ap binary installs one `tracing` subscriber at startup. Output goes
//! to stdout, to a daily-rotated file, or to both, either as plain text or as
//! one JSON object per line. The JSON encoding is what log shippers consume.
//!
//! Settings come from a builder (the binary's defaults) and are then
//! overridden by environment variables:
//!
//! | variable          | values                          |
//! |-------------------|---------------------------------|
//! | `LOG_LEVEL`       | trace, debug, info, warn, error |
//! | `LOG_SINK`        | stdout, file, both              |
//! | `LOG_ENCODING`    | plain, json                     |
//! | `LOG_DIR`         | directory for rotated files     |
//! | `LOG_FILE_PREFIX` | file name prefix                |
//! | `LOG_FILTER`      | extra directives, comma separated |
//!
//! # Example
//!
//! ```no_run
//! use i2ap_common::logging::{self, LogSettings, LogSink};
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = LogSettings::builder()
//!         .file_prefix("i2ap-server")
//!         .sink(LogSink::Both)
//!         .build()
//!         .merge_env()?;
//!     let _guard = logging::init(&settings)?;
//!     tracing::info!("started");
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Where log lines are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogSink {
    #[default]
    Stdout,
    File,
    Both,
}

impl LogSink {
    fn writes_stdout(self) -> bool {
        matches!(self, LogSink::Stdout | LogSink::Both)
    }

    fn writes_file(self) -> bool {
        matches!(self, LogSink::File | LogSink::Both)
    }
}

impl FromStr for LogSink {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stdout" | "console" => Ok(LogSink::Stdout),
            "file" | "filelog" => Ok(LogSink::File),
            "both" | "all" => Ok(LogSink::Both),
            _ => Err(anyhow!("Invalid log sink: {}", s)),
        }
    }
}

/// How each log line is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogEncoding {
    #[default]
    Plain,
    Json,
}

impl FromStr for LogEncoding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plain" | "text" => Ok(LogEncoding::Plain),
            "json" => Ok(LogEncoding::Json),
            _ => Err(anyhow!("Invalid log encoding: {}", s)),
        }
    }
}

/// Parse a level name, accepting `warning` as an alias of `warn`.
pub fn parse_level(s: &str) -> Result<LevelFilter> {
    let normalized = match s.to_lowercase().as_str() {
        "warning" => "warn".to_string(),
        other => other.to_string(),
    };
    LevelFilter::from_str(&normalized).map_err(|_| anyhow!("Invalid log level: {}", s))
}

/// Logging settings for one process
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: LevelFilter,
    pub sink: LogSink,
    pub encoding: LogEncoding,
    pub directory: PathBuf,
    /// Rotated files are named `{prefix}.{date}`
    pub file_prefix: String,
    /// Extra filter directives, e.g. `sqlx=warn,tower_http=debug`
    pub directives: Option<String>,
    pub with_location: bool,
    pub with_thread_ids: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            sink: LogSink::Stdout,
            encoding: LogEncoding::Plain,
            directory: PathBuf::from("./logs"),
            file_prefix: "i2ap".to_string(),
            directives: None,
            with_location: false,
            with_thread_ids: false,
        }
    }
}

impl LogSettings {
    pub fn builder() -> LogSettingsBuilder {
        LogSettingsBuilder::default()
    }

    /// Override fields from `LOG_*` environment variables.
    pub fn merge_env(self) -> Result<Self> {
        self.merge_from(|key| std::env::var(key).ok())
    }

    fn merge_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(level) = lookup("LOG_LEVEL") {
            self.level = parse_level(&level)?;
        }
        if let Some(sink) = lookup("LOG_SINK").or_else(|| lookup("LOG_OUTPUT")) {
            self.sink = sink.parse()?;
        }
        if let Some(encoding) = lookup("LOG_ENCODING").or_else(|| lookup("LOG_FORMAT")) {
            self.encoding = encoding.parse()?;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.directory = PathBuf::from(dir);
        }
        if let Some(prefix) = lookup("LOG_FILE_PREFIX") {
            self.file_prefix = prefix;
        }
        if let Some(filter) = lookup("LOG_FILTER") {
            self.directives = Some(filter);
        }
        if let Some(val) = lookup("LOG_INCLUDE_LOCATION") {
            self.with_location = val.parse().unwrap_or(false);
        }
        Ok(self)
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let mut filter = EnvFilter::builder()
            .with_default_directive(self.level.into())
            .from_env_lossy();

        if let Some(ref directives) = self.directives {
            for directive in directives.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                filter = filter.add_directive(
                    directive
                        .parse()
                        .with_context(|| format!("Failed to parse filter directive '{}'", directive))?,
                );
            }
        }
        Ok(filter)
    }

    fn fmt_layer<W>(&self, writer: W, ansi: bool) -> BoxedLayer
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .with_thread_ids(self.with_thread_ids)
            .with_file(self.with_location)
            .with_line_number(self.with_location);

        match self.encoding {
            LogEncoding::Plain => layer.boxed(),
            LogEncoding::Json => layer.json().flatten_event(true).boxed(),
        }
    }
}

/// Fluent builder for [`LogSettings`]
#[derive(Default)]
pub struct LogSettingsBuilder {
    settings: LogSettings,
}

impl LogSettingsBuilder {
    pub fn level(mut self, level: LevelFilter) -> Self {
        self.settings.level = level;
        self
    }

    pub fn sink(mut self, sink: LogSink) -> Self {
        self.settings.sink = sink;
        self
    }

    pub fn encoding(mut self, encoding: LogEncoding) -> Self {
        self.settings.encoding = encoding;
        self
    }

    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.directory = dir.into();
        self
    }

    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.file_prefix = prefix.into();
        self
    }

    pub fn directives(mut self, directives: impl Into<String>) -> Self {
        self.settings.directives = Some(directives.into());
        self
    }

    pub fn with_location(mut self, include: bool) -> Self {
        self.settings.with_location = include;
        self
    }

    pub fn build(self) -> LogSettings {
        self.settings
    }
}

/// Install the global subscriber.
///
/// When a file sink is configured the returned guard flushes the background
/// writer on drop, so the caller keeps it alive for the life of the process.
pub fn init(settings: &LogSettings) -> Result<Option<WorkerGuard>> {
    let filter = settings.env_filter()?;
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if settings.sink.writes_stdout() {
        layers.push(settings.fmt_layer(std::io::stdout, true));
    }

    if settings.sink.writes_file() {
        std::fs::create_dir_all(&settings.directory).with_context(|| {
            format!("Failed to create log directory {}", settings.directory.display())
        })?;
        let appender =
            tracing_appender::rolling::daily(&settings.directory, &settings.file_prefix);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(settings.fmt_layer(writer, false));
        guard = Some(worker);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(guard)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG").unwrap(), LevelFilter::DEBUG);
        assert_eq!(parse_level("warning").unwrap(), LevelFilter::WARN);
        assert!(parse_level("loud").is_err());
    }

    #[test]
    fn test_sink_and_encoding_from_str() {
        assert_eq!("console".parse::<LogSink>().unwrap(), LogSink::Stdout);
        assert_eq!("filelog".parse::<LogSink>().unwrap(), LogSink::File);
        assert_eq!("BOTH".parse::<LogSink>().unwrap(), LogSink::Both);
        assert!("syslog".parse::<LogSink>().is_err());

        assert_eq!("json".parse::<LogEncoding>().unwrap(), LogEncoding::Json);
        assert_eq!("text".parse::<LogEncoding>().unwrap(), LogEncoding::Plain);
        assert!("xml".parse::<LogEncoding>().is_err());
    }

    #[test]
    fn test_env_overrides_builder_defaults() {
        let settings = LogSettings::builder()
            .file_prefix("i2ap-server")
            .directives("sqlx=warn")
            .build()
            .merge_from(lookup(&[("LOG_LEVEL", "debug"), ("LOG_FORMAT", "json")]))
            .unwrap();

        assert_eq!(settings.level, LevelFilter::DEBUG);
        assert_eq!(settings.encoding, LogEncoding::Json);
        assert_eq!(settings.sink, LogSink::Stdout);
        assert_eq!(settings.file_prefix, "i2ap-server");
        assert_eq!(settings.directives.as_deref(), Some("sqlx=warn"));
    }

    #[test]
    fn test_invalid_env_value_is_rejected() {
        let result = LogSettings::default().merge_from(lookup(&[("LOG_SINK", "pigeon")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_directive_is_reported() {
        let settings = LogSettings::builder().directives("sqlx=[[").build();
        assert!(settings.env_filter().is_err());
    }
}
