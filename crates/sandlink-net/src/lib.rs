//! Heightfield streaming between a host and remote viewers.
//!
//! The host publishes terrain and water snapshots into a [`RemoteServer`],
//! which quantizes and broadcasts them over TCP. Each [`ViewerClient`] keeps
//! the newest snapshot available for rendering and terrain queries, and
//! reports the viewer's pose back to the host.

pub mod client;
pub mod dispatcher;
mod error;
pub mod platform;
mod pose;
mod quantize;
mod schedule;
pub mod server;
pub mod session;
pub mod wire;

pub use client::{ConnectionState, ConnectionStateWatch, ViewerClient};
pub use dispatcher::{Dispatcher, DispatcherHandle, Flow, ListenerKey, Readiness};
pub use error::{ErrorKind, NetError};
pub use platform::SocketConfig;
pub use pose::{ClientPose, PoseSample};
pub use quantize::ElevationQuantizer;
pub use schedule::RequestScheduler;
pub use server::{DEFAULT_PORT, RemoteServer, ServerSettings};
pub use session::{Session, SessionState};
