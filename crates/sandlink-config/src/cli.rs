//! Command-line argument parsing shared by the host and viewer.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(about = "Heightfield streaming between a sandbox host and remote viewers")]
pub struct CliArgs {
    /// Address the host listens on.
    #[arg(long)]
    pub bind: Option<String>,

    /// Port the host listens on, or the viewer connects to.
    #[arg(long)]
    pub port: Option<u16>,

    /// Host address for the viewer to connect to.
    #[arg(long)]
    pub server: Option<String>,

    /// Seconds between snapshot requests.
    #[arg(long)]
    pub request_interval: Option<f64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.bind {
            self.server.bind_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
            self.viewer.server_port = port;
        }
        if let Some(ref addr) = args.server {
            self.viewer.server_address = addr.clone();
        }
        if let Some(interval) = args.request_interval {
            self.server.request_interval_secs = interval;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            server: Some("192.168.1.1".to_string()),
            port: Some(27000),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.viewer.server_address, "192.168.1.1");
        assert_eq!(config.viewer.server_port, 27000);
        assert_eq!(config.server.port, 27000);
        // Non-overridden fields retain defaults
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.server.request_interval_secs, 0.1);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from([
            "sandlink-host",
            "--bind",
            "127.0.0.1",
            "--request-interval",
            "0.5",
            "--log-level",
            "debug",
        ]);
        let mut config = Config::default();
        config.apply_cli_overrides(&args);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.server.request_interval_secs, 0.5);
        assert_eq!(config.debug.log_level, "debug");
    }
}
