use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Output format selected by `--log-format`, shared by every subcommand.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}', expected 'text' or 'json'")),
        }
    }
}

/// Installs the global tracing subscriber shared by every subcommand
/// (`manager`, `dhcp`, `dns`, `proxy`). `level` follows `RUST_LOG` filter
/// syntax; when absent, falls back to `info`.
pub fn init_tracing(level: Option<&str>, format: LogFormat) {
    let env_filter = level
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            let logger = tracing_subscriber::fmt::layer().json();
            let collector = Registry::default().with(logger).with(env_filter);
            tracing::subscriber::set_global_default(collector)
                .expect("tracing subscriber already set");
        }
        LogFormat::Text => {
            let logger = tracing_subscriber::fmt::layer();
            let collector = Registry::default().with(logger).with(env_filter);
            tracing::subscriber::set_global_default(collector)
                .expect("tracing subscriber already set");
        }
    }
}

/// Maps the spec's `logLevel` enum (`trace, debug, info, warning, error,
/// critical`) onto `tracing`'s level vocabulary. `critical` and `warning`
/// are the two spellings that don't match a `tracing::Level` variant name
/// directly.
pub fn log_level_to_filter(level: &str) -> &'static str {
    match level {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warning" => "warn",
        "error" => "error",
        "critical" => "error",
        _ => "info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_spec_log_levels() {
        assert_eq!(log_level_to_filter("warning"), "warn");
        assert_eq!(log_level_to_filter("critical"), "error");
        assert_eq!(log_level_to_filter("debug"), "debug");
        assert_eq!(log_level_to_filter("unknown"), "info");
    }

    #[test]
    fn parses_log_format() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
