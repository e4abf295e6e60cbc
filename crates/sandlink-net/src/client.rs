//! Viewer side: connects to a host, keeps the newest snapshot available and
//! reports the viewer's pose.
//!
//! Connecting is synchronous up to and including the first snapshot, so a
//! connected [`ViewerClient`] never exposes an empty terrain. After that a
//! background dispatch thread decodes snapshots into a triple buffer and
//! signals the application through a bounded channel.

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use glam::{Vec2, Vec3};
use mio::Interest;
use mio::net::TcpStream;
use sandlink_sync::{TripleBufferReader, TripleBufferWriter, triple_buffer};
use sandlink_terrain::{GridGeometry, HeightfieldSnapshot, TerrainIntersector};
use socket2::SockRef;
use tracing::{debug, info, warn};

use crate::dispatcher::{Dispatcher, DispatcherHandle, Flow, Readiness};
use crate::error::NetError;
use crate::platform::{PoseSender, SocketConfig, StreamStatus, configure_socket, drain_into};
use crate::pose::PoseSample;
use crate::quantize::ElevationQuantizer;
use crate::wire::{self, ByteOrder, ENDIANNESS_MAGIC, GEOMETRY_PAYLOAD_LEN, MAGIC_LEN};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Performing the handshake.
    Connecting,
    /// Streaming snapshots.
    Connected,
    /// The connection ended, by request or by error.
    Disconnected,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Connection state shared between the application and the network thread.
#[derive(Debug)]
pub struct ConnectionStateWatch {
    state: AtomicU8,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
        }
    }

    pub fn set(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn current(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// State owned by the viewer's dispatch thread.
struct ClientLink {
    stream: TcpStream,
    order: ByteOrder,
    quantizer: ElevationQuantizer,
    grids: TripleBufferWriter<HeightfieldSnapshot>,
    inbox: Vec<u8>,
    message_len: usize,
    updates: Sender<()>,
    state: Arc<ConnectionStateWatch>,
}

impl ClientLink {
    fn on_readable(link: &mut Self, d: &mut Dispatcher<Self>, r: Readiness) -> Flow {
        match link.receive() {
            Ok(()) => Flow::Keep,
            Err(err) => {
                match err {
                    NetError::ConnectionClosed => info!("Server closed the connection"),
                    _ => warn!("Dropping server connection ({:?}): {err}", err.kind()),
                }
                link.state.set(ConnectionState::Disconnected);
                if let Err(err) = d.remove_listener(r.key, &mut link.stream) {
                    debug!("Deregistering server stream failed: {err}");
                }
                if let Err(err) = d.handle().stop() {
                    debug!("Stopping viewer dispatcher failed: {err}");
                }
                Flow::Remove
            }
        }
    }

    /// Drain the socket and publish the newest complete snapshot in it.
    fn receive(&mut self) -> Result<(), NetError> {
        let status = drain_into(&mut self.stream, &mut self.inbox)?;
        let complete = self.inbox.len() / self.message_len;
        if complete > 0 {
            // Only the newest snapshot matters; older complete ones are skipped.
            let start = (complete - 1) * self.message_len;
            let message = &self.inbox[start..start + self.message_len];
            wire::decode_snapshot(
                message,
                self.order,
                &self.quantizer,
                self.grids.acquire_write_slot(),
            )?;
            self.grids.publish();
            self.inbox.drain(..complete * self.message_len);
            // A full channel already holds a pending wake-up.
            let _ = self.updates.try_send(());
        }
        match status {
            StreamStatus::Open => Ok(()),
            StreamStatus::Closed => Err(NetError::ConnectionClosed),
        }
    }

    fn run(mut self, mut dispatcher: Dispatcher<Self>) {
        if let Err(err) = dispatcher.run(&mut self) {
            warn!("Viewer dispatch failed: {err}");
        }
        self.state.set(ConnectionState::Disconnected);
        debug!("Viewer network thread exiting");
    }
}

/// A viewer's connection to a [`RemoteServer`](crate::RemoteServer).
pub struct ViewerClient {
    geometry: GridGeometry,
    grids: TripleBufferReader<HeightfieldSnapshot>,
    grid_version: u64,
    sender: PoseSender,
    pose_message: Vec<u8>,
    state: Arc<ConnectionStateWatch>,
    updates: Receiver<()>,
    handle: DispatcherHandle,
    thread: Option<JoinHandle<()>>,
}

impl ViewerClient {
    /// Connect, handshake, receive the first snapshot and start streaming.
    ///
    /// Any failure here is returned to the caller; there is no retry.
    pub fn connect(addr: SocketAddr, socket: &SocketConfig) -> Result<Self, NetError> {
        let state = Arc::new(ConnectionStateWatch::new());
        state.set(ConnectionState::Connecting);

        let mut stream = std::net::TcpStream::connect(addr)?;
        configure_socket(SockRef::from(&stream), socket)?;
        stream.write_all(&ENDIANNESS_MAGIC.to_ne_bytes())?;

        let mut token = [0u8; MAGIC_LEN];
        stream.read_exact(&mut token).map_err(NetError::from_read)?;
        let order = wire::check_magic(token)?;

        let mut payload = [0u8; GEOMETRY_PAYLOAD_LEN];
        stream.read_exact(&mut payload).map_err(NetError::from_read)?;
        let geometry = wire::decode_geometry(&payload, order)?;
        info!(
            "Connected to {addr}: {}x{} grid, cell {:?}, elevation [{}, {}], {:?} byte order",
            geometry.width(),
            geometry.height(),
            geometry.cell_size(),
            geometry.elevation_min(),
            geometry.elevation_max(),
            order
        );

        let quantizer = ElevationQuantizer::new(geometry.elevation_min(), geometry.elevation_max());
        let (mut writer, mut grids) = triple_buffer(|| HeightfieldSnapshot::zeroed(&geometry));

        let message_len = wire::snapshot_message_len(&geometry);
        let mut message = vec![0u8; message_len];
        stream.read_exact(&mut message).map_err(NetError::from_read)?;
        wire::decode_snapshot(&message, order, &quantizer, writer.acquire_write_slot())?;
        writer.publish();
        grids.lock_latest();

        stream.set_nonblocking(true)?;
        let sender = PoseSender::new(stream.try_clone()?)?;
        let stream = TcpStream::from_std(stream);

        let (updates_tx, updates) = crossbeam_channel::bounded(1);
        let mut link = ClientLink {
            stream,
            order,
            quantizer,
            grids: writer,
            inbox: Vec::with_capacity(message_len),
            message_len,
            updates: updates_tx,
            state: Arc::clone(&state),
        };

        let mut dispatcher = Dispatcher::new()?;
        dispatcher.add_listener(
            &mut link.stream,
            Interest::READABLE,
            Box::new(ClientLink::on_readable),
        )?;
        let handle = dispatcher.handle();

        state.set(ConnectionState::Connected);
        let thread = std::thread::Builder::new()
            .name("sandlink-viewer-net".to_string())
            .spawn(move || link.run(dispatcher))?;

        Ok(Self {
            geometry,
            grids,
            grid_version: 0,
            sender,
            pose_message: Vec::with_capacity(wire::POSE_MESSAGE_LEN),
            state,
            updates,
            handle,
            thread: Some(thread),
        })
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Receives a value whenever a new snapshot has been published.
    pub fn updates(&self) -> &Receiver<()> {
        &self.updates
    }

    /// Lock the newest received snapshot. Returns `true` if it changed.
    pub fn lock_latest(&mut self) -> bool {
        let fresh = self.grids.lock_latest();
        if fresh {
            self.grid_version += 1;
        }
        fresh
    }

    /// Counts the snapshots locked since connecting.
    pub fn grid_version(&self) -> u64 {
        self.grid_version
    }

    /// The locked snapshot.
    pub fn snapshot(&self) -> &HeightfieldSnapshot {
        self.grids.locked()
    }

    /// Terrain queries over the locked snapshot.
    pub fn intersector(&self) -> TerrainIntersector<'_> {
        TerrainIntersector::new(&self.geometry, self.grids.locked())
    }

    /// Intersect a world-space segment with the locked terrain.
    pub fn intersect_line(&self, p0: Vec3, p1: Vec3) -> f32 {
        self.intersector().intersect_line(p0, p1)
    }

    pub fn terrain_elevation(&self, point: Vec2) -> Option<f32> {
        self.intersector().terrain_elevation(point)
    }

    pub fn water_level(&self, point: Vec2) -> Option<f32> {
        self.intersector().water_level(point)
    }

    pub fn is_underwater(&self, head: Vec3) -> bool {
        self.intersector().is_underwater(head)
    }

    /// Report the viewer's pose to the host.
    pub fn send_pose(&mut self, position: Vec3, direction: Vec3) -> Result<(), NetError> {
        if self.state() == ConnectionState::Disconnected {
            return Err(NetError::ConnectionClosed);
        }
        self.pose_message.clear();
        wire::encode_pose(&PoseSample::new(position, direction), &mut self.pose_message);
        self.sender.send(&self.pose_message)?;
        Ok(())
    }

    /// Close the connection and stop the network thread.
    pub fn disconnect(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if let Err(err) = self.sender.shutdown() {
            debug!("Socket shutdown failed: {err}");
        }
        if let Err(err) = self.handle.stop() {
            warn!("Failed to signal viewer thread: {err}");
        }
        if thread.join().is_err() {
            warn!("Viewer network thread panicked");
        }
        self.state.set(ConnectionState::Disconnected);
    }
}

impl Drop for ViewerClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_watch_defaults_to_disconnected() {
        let watch = ConnectionStateWatch::new();
        assert_eq!(watch.current(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_state_watch_transitions() {
        let watch = ConnectionStateWatch::new();
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ] {
            watch.set(state);
            assert_eq!(watch.current(), state);
        }
    }

    #[test]
    fn test_connect_refused_is_transport_error() {
        // Bind then drop to get a port nothing listens on.
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let err = ViewerClient::connect(addr, &SocketConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::Transport);
    }
}
