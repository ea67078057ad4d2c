// 📜 Logging - tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. RUST_LOG filters (default "info").
///
/// Safe to call more than once; later calls are no-ops.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = if json {
        builder.json().with_target(false).try_init()
    } else {
        builder.with_target(false).try_init()
    };
    // Fails when a global subscriber is already set
    installed.ok();
}
