/// Initialize tracing/logging for the fabric client.
///
/// The level is taken from the `WEFT_LOG` environment variable when set,
/// falling back to `default_level`.
pub fn init(default_level: &str) {
    let configured = std::env::var("WEFT_LOG").unwrap_or_else(|_| default_level.to_string());
    let level = match configured.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" | "warning" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    };

    // Use try_init so tests and embedding applications can call this multiple
    // times without panicking
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}
