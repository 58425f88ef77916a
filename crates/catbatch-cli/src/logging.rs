use tracing_subscriber::EnvFilter;

/// Env var checked before `RUST_LOG`.
pub const LOG_ENV: &str = "CATBATCH_LOG";

/// Filter used when neither env var is set: `level` for catbatch, warnings
/// only from the HTTP stack.
pub fn default_directive(log_level: &str) -> String {
    format!("{log_level},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn")
}

/// Initialize structured logging with tracing-subscriber.
///
/// Events go to stderr; stdout carries the run report.
pub fn init(log_level: &str) {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level)));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
