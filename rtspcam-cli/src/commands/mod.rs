//! CLI command implementations

mod config;
mod info;
mod probe;
mod start;

pub use config::{config, ConfigArgs};
pub use info::info;
pub use probe::{probe, ProbeArgs};
pub use start::{start, StartArgs};
