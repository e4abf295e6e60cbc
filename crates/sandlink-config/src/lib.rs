//! Configuration for the sandlink host and viewer.
//!
//! Settings persist to disk as RON files, can be overridden from the command
//! line via clap, and tolerate missing or unknown fields so config files keep
//! working across versions.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, ServerConfig, SocketOptions, ViewerConfig};
pub use error::ConfigError;
