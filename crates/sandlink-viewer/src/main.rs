//! Headless viewer that streams terrain from a host and reports its pose.
//!
//! The viewer walks a circle around the grid centre, keeps its eye planted
//! on the terrain and logs what it sees.
//! Run with `cargo run -p sandlink-viewer -- --server 127.0.0.1 --port 26000`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use glam::Vec2;
use sandlink_config::{CliArgs, Config, SocketOptions};
use sandlink_net::{ConnectionState, SocketConfig, ViewerClient};
use tracing::{error, info, warn};

/// Radians per second along the walking circle.
const WALK_SPEED: f32 = 0.2;
const STATUS_INTERVAL: Duration = Duration::from_secs(2);

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

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sandlink")
    });
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

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

/// Position on the walking circle at `time` seconds, and the walking direction.
fn walk(centre: Vec2, radius: f32, time: f32) -> (Vec2, Vec2) {
    let angle = time * WALK_SPEED;
    let (sin, cos) = angle.sin_cos();
    (centre + Vec2::new(cos, sin) * radius, Vec2::new(-sin, cos))
}

fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.viewer.server_addr()?;
    info!("Connecting to {addr}");
    let mut client = ViewerClient::connect(addr, &socket_config(&config.socket))?;

    let geometry = *client.geometry();
    let extent = geometry.extent();
    let centre = extent * 0.5;
    let radius = extent.min_element() * 0.3;
    let eye_height = config.viewer.eye_height;
    let pose_interval = config.viewer.pose_interval();
    // Downward probe spans the whole negotiated elevation range.
    let probe_top = geometry.elevation_max() + eye_height;
    let probe_bottom = geometry.elevation_min() - eye_height;

    let start = Instant::now();
    let mut last_status = start;
    let mut was_underwater = false;

    while client.state() != ConnectionState::Disconnected {
        // Wake early for a fresh snapshot, otherwise on the pose cadence.
        let _ = client.updates().recv_timeout(pose_interval);
        client.lock_latest();

        let (ground, heading) = walk(centre, radius, start.elapsed().as_secs_f32());
        let Some(elevation) = client.terrain_elevation(ground) else {
            continue;
        };
        let eye = ground.extend(elevation + eye_height);

        let underwater = client.is_underwater(eye);
        if underwater != was_underwater {
            info!(
                "Eye at ({:.1}, {:.1}) is now {}",
                eye.x,
                eye.y,
                if underwater { "underwater" } else { "above water" }
            );
            was_underwater = underwater;
        }

        if let Err(err) = client.send_pose(eye, heading.extend(0.0)) {
            warn!("Failed to send pose: {err}");
            break;
        }

        if last_status.elapsed() >= STATUS_INTERVAL {
            last_status = Instant::now();
            let top = ground.extend(probe_top);
            let bottom = ground.extend(probe_bottom);
            let t = client.intersect_line(top, bottom);
            let hit = top.lerp(bottom, t);
            let water = client.water_level(ground).unwrap_or(f32::NAN);
            info!(
                "Grid version {}, ground hit at z={:.2} (t={t:.3}), water at z={water:.2}",
                client.grid_version(),
                hit.z
            );
        }
    }

    info!("Disconnected from {addr}");
    client.disconnect();
    Ok(())
}
