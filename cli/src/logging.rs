// Logging setup for the ddal binary, powered by tracing-subscriber.
//
// The library crates log through the `log` facade; `tracing_log::LogTracer`
// forwards those records into the subscriber installed here. Console output
// goes to stderr so stdout only carries the routing report.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::Path;

use ddal_configs::LoggingSettings;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// timestamp LEVEL target - message
    Compact,
    /// JSON Lines
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" | "jsonl" => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Filter directives: base level, quiet third-party crates, then per-target
/// overrides from `[logging.targets]`.
pub fn filter_directives(level: &str, targets: &HashMap<String, String>) -> String {
    let mut directives = vec![level.to_string(), "sqlparser=warn".to_string()];

    let mut overrides: Vec<_> = targets.iter().collect();
    overrides.sort();
    for (target, lvl) in overrides {
        directives.push(format!("{}={}", target, lvl));
    }

    directives.join(",")
}

fn build_env_filter(level: &str, targets: &HashMap<String, String>) -> anyhow::Result<EnvFilter> {
    let filter_str = filter_directives(level, targets);
    EnvFilter::try_new(&filter_str)
        .map_err(|e| anyhow::anyhow!("Invalid tracing filter '{}': {}", filter_str, e))
}

/// Install the global subscriber.
///
/// `verbose` raises the base level to `debug` regardless of the configured one.
pub fn init_logging(settings: &LoggingSettings, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { settings.level.as_str() };
    let format = LogFormat::parse(&settings.format);

    tracing_log::LogTracer::init().ok();

    let console_layer = if settings.log_to_console || verbose {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .with_target(true)
                .with_filter(build_env_filter(level, &settings.targets)?),
        )
    } else {
        None
    };

    let file_layer = match settings.file_path.as_deref() {
        Some(file_path) => {
            if let Some(parent) = Path::new(file_path).parent() {
                fs::create_dir_all(parent)?;
            }
            let log_file = OpenOptions::new().create(true).append(true).open(file_path)?;

            let layer = if format == LogFormat::Json {
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(log_file)
                    .with_target(true)
                    .with_filter(build_env_filter(level, &settings.targets)?)
                    .boxed()
            } else {
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(log_file)
                    .with_target(true)
                    .with_filter(build_env_filter(level, &settings.targets)?)
                    .boxed()
            };
            Some(layer)
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))?;

    tracing::trace!(
        "Logging initialized: level={}, console={}, file={:?}",
        level,
        settings.log_to_console,
        settings.file_path
    );

    Ok(())
}
