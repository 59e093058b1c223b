use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub service_name: String,
    pub log_level: String,
    pub json_format: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::new("isvc-manager", "info", false)
    }
}

impl TracingConfig {
    pub fn new(service_name: &str, log_level: &str, json_format: bool) -> Self {
        Self {
            service_name: service_name.to_string(),
            log_level: log_level.to_string(),
            json_format,
        }
    }

    fn filter(&self) -> Result<EnvFilter, TracingError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.log_level)
                .map_err(|e| TracingError::Setup(format!("bad log level {:?}: {e}", self.log_level))),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `log_level`.
///
/// JSON output carries source locations and the current span's fields.
/// Plain output is compact.
pub fn setup_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let fmt_layer = if config.json_format {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .boxed()
    };

    Registry::default()
        .with(config.filter()?)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TracingError::Setup(e.to_string()))?;

    ::tracing::debug!(service = %config.service_name, json = config.json_format, "tracing initialized");
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Tracing setup error: {0}")]
    Setup(String),
}
