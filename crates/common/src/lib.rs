//! Shared configuration, error taxonomy and process-wide constants used by
//! every other crate in the workspace.

pub mod config;
pub mod error;
pub mod ids;
pub mod telemetry;

pub use config::Config;
pub use error::{MailError, MailResult};

pub static PRODUCT: &str = concat!("mailcore/", env!("CARGO_PKG_VERSION"));
