use tracing_subscriber::EnvFilter;

/// Install the process-wide subscriber. Call once at the composition
/// point; library code only ever logs through the `tracing` macros.
pub fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,reqwest=warn".into());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .compact()
        .init();
}
