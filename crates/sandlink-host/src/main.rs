//! Demo host that streams a synthetic heightfield to remote viewers.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p sandlink-host -- --port 26000`.

mod producer;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use glam::{UVec2, Vec2};
use sandlink_config::{CliArgs, Config, SocketOptions};
use sandlink_net::{RemoteServer, ServerSettings, SocketConfig};
use sandlink_terrain::GridGeometry;
use tracing::{error, info};

use producer::{SyntheticTerrain, TerrainParams};

const FRAME_TIME: Duration = Duration::from_millis(16);
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

fn socket_config(options: &SocketOptions) -> SocketConfig {
    SocketConfig {
        tcp_nodelay: options.tcp_nodelay,
        keepalive_enabled: options.keepalive_enabled,
        keepalive_idle: options.keepalive_idle(),
        keepalive_interval: options.keepalive_interval(),
        keepalive_retries: options.keepalive_retries,
        ..SocketConfig::default()
    }
}

fn config_dir(args: &CliArgs) -> PathBuf {
    args.config.clone().unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sandlink")
    })
}

fn load_config(args: &CliArgs, config_dir: &Path) -> Config {
    let mut config = Config::load_or_create(config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(args);
    config
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let config_dir = config_dir(&args);
    let config = load_config(&args, &config_dir);
    sandlink_log::init_logging(
        Some(&config_dir.join("logs")),
        cfg!(debug_assertions),
        Some(&config),
    );

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let server_config = &config.server;
    let domain = (
        server_config.domain_min_elevation,
        server_config.domain_max_elevation,
    );
    let geometry = GridGeometry::with_elevation_margin(
        UVec2::new(server_config.grid_width, server_config.grid_height),
        Vec2::new(server_config.cell_width, server_config.cell_height),
        domain.0,
        domain.1,
        server_config.elevation_margin,
    )?;
    info!(
        "Grid {}x{}, elevation range [{:.2}, {:.2}]",
        geometry.width(),
        geometry.height(),
        geometry.elevation_min(),
        geometry.elevation_max()
    );

    let settings = ServerSettings {
        bind_addr: server_config.bind_addr()?,
        socket: socket_config(&config.socket),
        request_interval: server_config.request_interval(),
    };
    let producer = SyntheticTerrain::new(geometry, domain, TerrainParams::default());
    let mut server = RemoteServer::start(settings, geometry)?;
    info!("Listening on {}", server.local_addr());

    let start = Instant::now();
    let mut last_status = start;
    let mut published: u64 = 0;

    loop {
        let app_time = start.elapsed().as_secs_f64();
        if server.frame(app_time) {
            producer.fill(server.snapshot_slot(), app_time);
            server.publish_snapshot();
            published += 1;
        }

        if last_status.elapsed() >= STATUS_INTERVAL {
            last_status = Instant::now();
            info!(
                "{} viewer(s) streaming, {published} snapshot(s) published",
                server.streaming_clients()
            );
            for (index, pose) in server.client_poses().iter().enumerate() {
                info!(
                    "  viewer {index}: offset ({:.2}, {:.2}, {:.2})",
                    pose.translation.x, pose.translation.y, pose.translation.z
                );
            }
        }

        std::thread::sleep(FRAME_TIME);
    }
}
