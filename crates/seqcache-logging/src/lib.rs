//! Structured logging for seqcache
//!
//! Sets up a `tracing` subscriber for processes that host one or more cache
//! nodes.
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines for log aggregation (default)
//! - **Node Context**: Tag spans with the node they belong to
//! - **File Rotation**: Daily/hourly log rotation via tracing-appender
//!
//! # Quick Start
//!
//! ```ignore
//! use seqcache_logging::{LogConfig, SeqcacheSubscriberBuilder};
//!
//! // JSONL to console
//! SeqcacheSubscriberBuilder::new().init()?;
//!
//! // Pretty console output while developing
//! SeqcacheSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init()?;
//! ```
//!
//! # Node Context
//!
//! ```ignore
//! use seqcache_logging::NodeContextGuard;
//!
//! let _guard = NodeContextGuard::new("node-a");
//! tracing::info!("Polling started"); // spans opened here carry node-a
//! ```

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, LogConfig, RotationStrategy};
pub use context::{NodeContextData, NodeContextGuard};
pub use layers::{NodeContextExtension, NodeContextLayer};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Failed to open log output: {0}")]
    Io(#[from] std::io::Error),

    #[error("A global subscriber is already set: {0}")]
    AlreadyInitialized(String),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Builder for configuring and installing the global subscriber
///
/// Console output is JSONL unless [`LogConfig::development`] (or
/// `console.pretty`) asks for human-readable output. File output is always
/// JSONL.
pub struct SeqcacheSubscriberBuilder {
    config: LogConfig,
}

impl SeqcacheSubscriberBuilder {
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Install the subscriber globally
    ///
    /// The returned guard flushes file output when dropped and must be kept
    /// alive for as long as logs should be written.
    pub fn init(self) -> Result<Option<WorkerGuard>, LogError> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.default_level));

        let mut outputs: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;

        if self.config.console.enabled {
            if self.config.console.pretty {
                outputs.push(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(self.config.console.ansi)
                        .with_target(true)
                        .boxed(),
                );
            } else {
                outputs.push(self.jsonl_layer(std::io::stdout));
            }
        }

        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            outputs.push(self.jsonl_layer(writer));
            guard = Some(file_guard);
        }

        Registry::default()
            .with(outputs)
            .with(env_filter)
            .with(NodeContextLayer::new())
            .try_init()
            .map_err(|e| LogError::AlreadyInitialized(e.to_string()))?;

        Ok(guard)
    }

    fn jsonl_layer<W>(&self, writer: W) -> BoxedLayer
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(self.config.include_spans)
            .flatten_event(true)
            .with_file(self.config.include_location)
            .with_line_number(self.config.include_location)
            .with_writer(writer)
            .boxed()
    }
}

impl Default for SeqcacheSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer for file output; `Never` truncates a single file, the others roll
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LogError> {
    fs::create_dir_all(&config.directory)?;

    let pair = match config.rotation {
        RotationStrategy::Never => {
            let path = config.directory.join(format!("{}.log", config.prefix));
            tracing_appender::non_blocking(File::create(path)?)
        }
        RotationStrategy::Daily => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::DAILY,
            &config.directory,
            &config.prefix,
        )),
        RotationStrategy::Hourly => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::HOURLY,
            &config.directory,
            &config.prefix,
        )),
    };
    Ok(pair)
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() -> Result<(), LogError> {
    SeqcacheSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
        .map(|_| ())
}

/// Initialize logging for tests; later calls in the same process are no-ops
pub fn init_testing() {
    let _ = SeqcacheSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder_defaults_to_jsonl() {
        let builder = SeqcacheSubscriberBuilder::new();
        assert_eq!(builder.config.default_level, "info");
        assert!(!builder.config.console.pretty);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = SeqcacheSubscriberBuilder::new()
            .with_config(LogConfig::development())
            .with_level("trace")
            .with_console(false);
        assert_eq!(builder.config.default_level, "trace");
        assert!(!builder.config.console.enabled);
    }

    #[test]
    fn test_file_writer_never_truncates_single_file() {
        let temp = TempDir::new().unwrap();
        let config = FileConfig {
            directory: temp.path().join("nested"),
            prefix: "node-a".to_string(),
            rotation: RotationStrategy::Never,
        };
        let (_writer, _guard) = file_writer(&config).unwrap();
        assert!(temp.path().join("nested/node-a.log").exists());
    }

    // Installs the global subscriber, so it is the only test that does
    #[test]
    fn test_init_writes_jsonl_file_once() {
        let temp = TempDir::new().unwrap();
        let guard = SeqcacheSubscriberBuilder::new()
            .with_console(false)
            .with_file_output(FileConfig {
                directory: temp.path().to_path_buf(),
                prefix: "cache".to_string(),
                rotation: RotationStrategy::Never,
            })
            .init()
            .unwrap();

        tracing::warn!(channel = "ABC", "Failed to record sequence in channel");
        drop(guard);

        let contents = std::fs::read_to_string(temp.path().join("cache.log")).unwrap();
        let line: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(line["channel"], "ABC");
        assert_eq!(line["level"], "WARN");

        assert!(matches!(
            SeqcacheSubscriberBuilder::new().init(),
            Err(LogError::AlreadyInitialized(_))
        ));
    }
}
