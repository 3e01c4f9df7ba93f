pub mod alarm;
pub mod api;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod forecast;
pub mod ingress;
pub mod pipeline;
pub mod reading;
pub mod state;
pub mod store;

/// Install the fmt subscriber used by both binaries.
pub fn init_tracing(level: tracing::Level) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
