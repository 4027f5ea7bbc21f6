//! CLI command implementations.

mod analyze;
mod config;

pub use analyze::run_analyze;
pub use config::run_config;
