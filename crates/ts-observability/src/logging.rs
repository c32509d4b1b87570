//! Logging setup for tenant-sweep.
//!
//! Structured logging through `tracing`. `RUST_LOG` wins when set; otherwise
//! every workspace crate logs at the configured level.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const WORKSPACE_CRATES: [&str; 5] = [
    "ts_core",
    "ts_policy",
    "ts_connectors",
    "ts_observability",
    "tenant_sweep",
];

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    /// Emit one JSON object per line instead of human readable text.
    pub json_format: bool,
    /// Log span open/close events.
    pub include_spans: bool,
    /// Include file and line.
    pub include_location: bool,
    pub include_thread_ids: bool,
    /// Include the module path.
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            json_format: false,
            include_spans: false,
            include_location: false,
            include_thread_ids: false,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// Verbose output for troubleshooting a run.
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            json_format: false,
            include_spans: true,
            include_location: true,
            include_thread_ids: true,
            include_target: true,
        }
    }

    /// JSON lines for scheduled, unattended runs.
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            json_format: true,
            include_spans: false,
            include_location: false,
            include_thread_ids: false,
            include_target: true,
        }
    }

    /// Maps `-v` counts to a level: 0 warn, 1 info, 2 debug, 3+ trace.
    pub fn for_verbosity(verbose: u8, json_format: bool) -> Self {
        let level = match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };
        Self {
            level,
            json_format,
            include_spans: verbose >= 3,
            include_location: verbose >= 2,
            ..Self::default()
        }
    }

    /// Filter directives used when `RUST_LOG` is not set.
    pub fn default_directives(&self) -> String {
        WORKSPACE_CRATES
            .iter()
            .map(|krate| format!("{}={}", krate, self.level))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Initializes logging with the default configuration.
pub fn init_logging() {
    init_logging_with_config(LoggingConfig::default());
}

/// Initializes logging. Returns false if a global subscriber was already set.
pub fn init_logging_with_config(config: LoggingConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directives()));

    let span_events = if config.include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    // Logs go to stderr so stdout stays clean for reports and JSON output.
    let result = if config.json_format {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_thread_ids(config.include_thread_ids)
            .with_target(config.include_target);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_thread_ids(config.include_thread_ids)
            .with_target(config.include_target);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
    };

    result.is_ok()
}

/// Span for a whole permission scan.
#[macro_export]
macro_rules! scan_span {
    ($principal:expr) => {
        tracing::info_span!("scan", principal = %$principal)
    };
    ($principal:expr, $($field:tt)*) => {
        tracing::info_span!("scan", principal = %$principal, $($field)*)
    };
}

/// Span for the checks on one site.
#[macro_export]
macro_rules! site_span {
    ($site_url:expr, $index:expr) => {
        tracing::debug_span!("site", site = %$site_url, index = $index)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, Level::WARN);
        assert!(!config.json_format);
    }

    #[test]
    fn test_production_config() {
        let config = LoggingConfig::production();
        assert!(config.json_format);
        assert!(!config.include_location);
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(LoggingConfig::for_verbosity(0, false).level, Level::WARN);
        assert_eq!(LoggingConfig::for_verbosity(1, false).level, Level::INFO);
        assert_eq!(LoggingConfig::for_verbosity(2, true).level, Level::DEBUG);
        assert_eq!(LoggingConfig::for_verbosity(9, false).level, Level::TRACE);
        assert!(LoggingConfig::for_verbosity(2, true).json_format);
    }

    #[test]
    fn test_default_directives() {
        let directives = LoggingConfig::for_verbosity(1, false).default_directives();
        assert!(directives.contains("ts_core=INFO"));
        assert!(directives.contains("tenant_sweep=INFO"));
    }

    #[test]
    fn test_span_macros_compile() {
        let _scan = scan_span!("jdoe@contoso.com", sites = 3);
        let _site = site_span!("https://contoso.sharepoint.com/sites/hr", 0usize);
    }
}
