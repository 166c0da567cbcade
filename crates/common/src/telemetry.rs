//! Logging setup. Mirrors the teacher's use of `tracing` spans per session
//! (`crates/smtp/src/core/mod.rs` holds one `Span` per `Session`); this just
//! wires the global subscriber once at process start.

use tracing_subscriber::{fmt, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
