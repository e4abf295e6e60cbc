//! Configuration structs with defaults and RON persistence.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level configuration shared by the host and viewer binaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Host settings.
    pub server: ServerConfig,
    /// Viewer settings.
    pub viewer: ViewerConfig,
    /// TCP options for every connection.
    pub socket: SocketOptions,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Host configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_address: String,
    /// Port to listen on.
    pub port: u16,
    /// Seconds between snapshot requests while viewers are connected.
    pub request_interval_secs: f64,
    /// Fraction of the elevation domain added above and below it before
    /// quantization.
    pub elevation_margin: f32,
    /// Vertex columns of the streamed grid.
    pub grid_width: u32,
    /// Vertex rows of the streamed grid.
    pub grid_height: u32,
    /// Cell width in world units.
    pub cell_width: f32,
    /// Cell height in world units.
    pub cell_height: f32,
    /// Lowest elevation the producer generates.
    pub domain_min_elevation: f32,
    /// Highest elevation the producer generates.
    pub domain_max_elevation: f32,
}

/// Viewer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewerConfig {
    /// Host to connect to.
    pub server_address: String,
    /// Host port.
    pub server_port: u16,
    /// Milliseconds between pose reports.
    pub pose_interval_ms: u64,
    /// Height of the viewer's eye above the terrain.
    pub eye_height: f32,
}

/// TCP socket options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SocketOptions {
    /// Disable Nagle's algorithm.
    pub tcp_nodelay: bool,
    /// Enable TCP keepalive.
    pub keepalive_enabled: bool,
    /// Seconds idle before the first keepalive probe.
    pub keepalive_idle_secs: u64,
    /// Seconds between keepalive probes.
    pub keepalive_interval_secs: u64,
    /// Unanswered probes before the connection is dropped.
    pub keepalive_retries: u32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 26000,
            request_interval_secs: 0.1,
            elevation_margin: 0.05,
            grid_width: 128,
            grid_height: 96,
            cell_width: 1.0,
            cell_height: 1.0,
            domain_min_elevation: -20.0,
            domain_max_elevation: 40.0,
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 26000,
            pose_interval_ms: 50,
            eye_height: 1.6,
        }
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive_enabled: true,
            keepalive_idle_secs: 60,
            keepalive_interval_secs: 10,
            keepalive_retries: 3,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// --- Address resolution ---

impl ServerConfig {
    /// The socket address to listen on.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Seconds between snapshot requests, never zero or negative.
    pub fn request_interval(&self) -> f64 {
        self.request_interval_secs.max(1.0e-3)
    }
}

impl ViewerConfig {
    /// Resolve the host address, which may be a name or an IP.
    pub fn server_addr(&self) -> Result<SocketAddr, ConfigError> {
        let invalid = || ConfigError::InvalidAddress(self.server_address.clone());
        (self.server_address.as_str(), self.server_port)
            .to_socket_addrs()
            .map_err(|_| invalid())?
            .next()
            .ok_or_else(invalid)
    }

    pub fn pose_interval(&self) -> Duration {
        Duration::from_millis(self.pose_interval_ms)
    }
}

impl SocketOptions {
    pub fn keepalive_idle(&self) -> Duration {
        Duration::from_secs(self.keepalive_idle_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join(CONFIG_FILE);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("port: 26000"));
        assert!(ron_str.contains("grid_width: 128"));
        assert!(ron_str.contains("log_level: \"info\""));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(server: (port: 27000))";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.server.port, 27000);
        assert_eq!(config.server.grid_width, 128);
        assert_eq!(config.viewer, ViewerConfig::default());
        assert_eq!(config.socket, SocketOptions::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.grid_width = 640;
        config.server.grid_height = 480;
        config.viewer.server_address = "10.0.0.1".to_string();

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.server.request_interval_secs = 0.25;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.unwrap().server.request_interval_secs, 0.25);
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let result: Result<Config, _> = ron::from_str("{{not valid}}");
        assert!(result.is_err());
    }

    #[test]
    fn test_bind_addr_parses() {
        let server = ServerConfig::default();
        let addr = server.bind_addr().unwrap();
        assert!(addr.ip().is_unspecified());
        assert_eq!(addr.port(), 26000);

        let bad = ServerConfig {
            bind_address: "not an ip".to_string(),
            ..Default::default()
        };
        assert!(matches!(bad.bind_addr(), Err(ConfigError::InvalidAddress(_))));
    }

    #[test]
    fn test_viewer_addr_resolves_ip() {
        let viewer = ViewerConfig::default();
        assert_eq!(viewer.server_addr().unwrap(), "127.0.0.1:26000".parse().unwrap());
        assert_eq!(viewer.pose_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_request_interval_is_positive() {
        let server = ServerConfig {
            request_interval_secs: 0.0,
            ..Default::default()
        };
        assert!(server.request_interval() > 0.0);
    }
}
