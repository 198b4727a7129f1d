use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Target used for per-message transport traces
pub const WIRE_TARGET: &str = "WIRE";

/// Filter directive for the configured level, with wire traces off unless enabled
pub fn filter_directive(config: &AppConfig) -> String {
    if config.enable_wire_trace {
        format!("{},{}=debug", config.log_level, WIRE_TARGET)
    } else {
        format!("{},{}=off", config.log_level, WIRE_TARGET)
    }
}

pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let file_appender = match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, &config.log_file),
        _ => tracing_appender::rolling::never(&config.log_dir, &config.log_file),
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiation::Origin;

    fn config(enable_wire_trace: bool) -> AppConfig {
        AppConfig {
            log_level: "info".into(),
            log_dir: "./logs".into(),
            log_file: "test.log".into(),
            use_json: false,
            rotation: "never".into(),
            enable_wire_trace,
            local_role: Origin::Requester,
            node_id: 1,
            categories: Vec::new(),
        }
    }

    #[test]
    fn test_wire_target_is_silenced_by_default() {
        assert_eq!(filter_directive(&config(false)), "info,WIRE=off");
        assert_eq!(filter_directive(&config(true)), "info,WIRE=debug");
        assert!(EnvFilter::try_new(filter_directive(&config(false))).is_ok());
    }
}
