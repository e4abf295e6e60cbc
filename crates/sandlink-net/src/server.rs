//! Host side: accepts viewers, streams snapshots to them and collects their poses.
//!
//! [`RemoteServer`] owns the producer's ends of two triple buffers and a
//! dispatch thread. The thread owns the listener and every session. After
//! each dispatch iteration it republishes the viewers' poses and, when the
//! producer has published a new snapshot, broadcasts it to every streaming
//! viewer.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use mio::Interest;
use mio::net::{TcpListener, TcpStream};
use sandlink_sync::{TripleBufferReader, TripleBufferWriter, triple_buffer};
use sandlink_terrain::{GridGeometry, HeightfieldSnapshot};
use socket2::SockRef;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{Dispatcher, DispatcherHandle, Flow, ListenerKey, Readiness};
use crate::error::NetError;
use crate::platform::{
    MessageSink, SocketConfig, StreamStatus, bind_listener, configure_socket, drain_into,
    write_fully,
};
use crate::pose::ClientPose;
use crate::quantize::ElevationQuantizer;
use crate::schedule::RequestScheduler;
use crate::session::Session;
use crate::wire;

/// Port viewers connect to unless configured otherwise.
pub const DEFAULT_PORT: u16 = 26000;

/// Settings for [`RemoteServer::start`].
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    /// Address to listen on. Default: `0.0.0.0:26000`.
    pub bind_addr: SocketAddr,
    /// Options applied to every accepted stream.
    pub socket: SocketConfig,
    /// Seconds of application time between snapshot requests. Default: 0.1.
    pub request_interval: f64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            socket: SocketConfig::default(),
            request_interval: 0.1,
        }
    }
}

struct Peer {
    session: Session,
    stream: TcpStream,
    addr: SocketAddr,
    /// Whether this peer is included in the streaming counter.
    counted: bool,
}

impl Peer {
    /// Read everything available and feed it to the session.
    fn pump(&mut self, scratch: &mut Vec<u8>, streaming: &AtomicUsize) -> Result<(), NetError> {
        scratch.clear();
        let status = drain_into(&mut self.stream, scratch)?;
        let update = self.session.receive(scratch)?;
        if update.entered_streaming {
            self.counted = true;
            streaming.fetch_add(1, Ordering::AcqRel);
            info!(
                "Viewer {} is streaming ({:?} byte order)",
                self.addr,
                self.session.byte_order()
            );
        }
        if update.poses > 0 {
            debug!("Viewer {} sent {} pose(s)", self.addr, update.poses);
        }
        match status {
            StreamStatus::Open => Ok(()),
            StreamStatus::Closed => Err(NetError::ConnectionClosed),
        }
    }
}

/// Write `message` to every streaming session.
///
/// Sinks that fail are returned with their error and are not retried. The
/// caller removes them once the pass is over.
pub(crate) fn broadcast<'a, S, I>(peers: I, message: &[u8]) -> Vec<(ListenerKey, NetError)>
where
    S: MessageSink + 'a,
    I: IntoIterator<Item = (ListenerKey, &'a Session, &'a mut S)>,
{
    let mut failed = Vec::new();
    for (key, session, sink) in peers {
        if !session.is_streaming() {
            continue;
        }
        if let Err(err) = sink.send(message) {
            failed.push((key, NetError::Io(err)));
        }
    }
    failed
}

/// State owned by the server's dispatch thread.
struct ServerCore {
    listener: TcpListener,
    peers: BTreeMap<ListenerKey, Peer>,
    socket: SocketConfig,
    geometry: GridGeometry,
    handshake: Vec<u8>,
    quantizer: ElevationQuantizer,
    snapshots: TripleBufferReader<HeightfieldSnapshot>,
    poses: TripleBufferWriter<Vec<ClientPose>>,
    streaming: Arc<AtomicUsize>,
    scratch: Vec<u8>,
    message: Vec<u8>,
}

impl ServerCore {
    fn new(
        listener: TcpListener,
        socket: SocketConfig,
        geometry: GridGeometry,
        snapshots: TripleBufferReader<HeightfieldSnapshot>,
        poses: TripleBufferWriter<Vec<ClientPose>>,
        streaming: Arc<AtomicUsize>,
    ) -> Self {
        let mut handshake = Vec::with_capacity(wire::MAGIC_LEN + wire::GEOMETRY_PAYLOAD_LEN);
        wire::encode_handshake(&geometry, &mut handshake);
        Self {
            listener,
            peers: BTreeMap::new(),
            socket,
            geometry,
            handshake,
            quantizer: ElevationQuantizer::new(geometry.elevation_min(), geometry.elevation_max()),
            snapshots,
            poses,
            streaming,
            scratch: Vec::new(),
            message: Vec::with_capacity(wire::snapshot_message_len(&geometry)),
        }
    }

    fn on_listener_ready(core: &mut Self, d: &mut Dispatcher<Self>, _: Readiness) -> Flow {
        core.accept_pending(d);
        Flow::Keep
    }

    fn on_client_ready(core: &mut Self, d: &mut Dispatcher<Self>, r: Readiness) -> Flow {
        let Some(peer) = core.peers.get_mut(&r.key) else {
            return Flow::Remove;
        };
        match peer.pump(&mut core.scratch, &core.streaming) {
            Ok(()) => Flow::Keep,
            Err(err) => {
                core.disconnect(d, r.key, &err);
                Flow::Remove
            }
        }
    }

    fn accept_pending(&mut self, d: &mut Dispatcher<Self>) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(err) = self.admit(d, stream, addr) {
                        warn!("Dropping viewer {addr} during handshake: {err}");
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!("Accept failed: {err}");
                    break;
                }
            }
        }
    }

    /// Send our half of the handshake and start listening to the viewer.
    fn admit(
        &mut self,
        d: &mut Dispatcher<Self>,
        mut stream: TcpStream,
        addr: SocketAddr,
    ) -> Result<(), NetError> {
        configure_socket(SockRef::from(&stream), &self.socket)?;
        write_fully(&mut stream, &self.handshake)?;
        let key = d.add_listener(&mut stream, Interest::READABLE, Box::new(Self::on_client_ready))?;
        info!("Accepted viewer {addr}");
        self.peers.insert(
            key,
            Peer {
                session: Session::new(),
                stream,
                addr,
                counted: false,
            },
        );
        Ok(())
    }

    fn disconnect(&mut self, d: &mut Dispatcher<Self>, key: ListenerKey, reason: &NetError) {
        let Some(mut peer) = self.peers.remove(&key) else {
            return;
        };
        peer.session.close();
        if let Err(err) = d.remove_listener(key, &mut peer.stream) {
            debug!("Deregistering viewer {} failed: {err}", peer.addr);
        }
        if peer.counted {
            self.streaming.fetch_sub(1, Ordering::AcqRel);
        }
        match reason {
            NetError::ConnectionClosed => info!("Viewer {} disconnected", peer.addr),
            _ => warn!("Viewer {} disconnected ({:?}): {reason}", peer.addr, reason.kind()),
        }
    }

    /// Republish the latest pose of every streaming viewer.
    fn publish_client_poses(&mut self) {
        let offset = self.geometry.grid_offset();
        let slot = self.poses.acquire_write_slot();
        slot.clear();
        slot.extend(
            self.peers
                .values()
                .filter(|peer| peer.session.is_streaming())
                .filter_map(|peer| peer.session.latest_pose())
                .map(|pose| ClientPose::from_sample(pose, offset)),
        );
        self.poses.publish();
    }

    fn broadcast_latest(&mut self, d: &mut Dispatcher<Self>) {
        let snapshot = self.snapshots.locked();
        if !snapshot.matches(&self.geometry) {
            warn!("Skipping snapshot whose layers do not match the negotiated grid");
            return;
        }
        wire::encode_snapshot(snapshot, &self.quantizer, &mut self.message);

        let peers = self
            .peers
            .iter_mut()
            .map(|(key, peer)| (*key, &peer.session, &mut peer.stream));
        let failed = broadcast(peers, &self.message);
        for (key, err) in failed {
            self.disconnect(d, key, &err);
        }
    }

    fn close_all(&mut self, d: &mut Dispatcher<Self>) {
        let keys: Vec<ListenerKey> = self.peers.keys().copied().collect();
        for key in keys {
            self.disconnect(d, key, &NetError::ConnectionClosed);
        }
    }

    fn run(mut self, mut dispatcher: Dispatcher<Self>) {
        loop {
            match dispatcher.dispatch_next(&mut self) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    error!("Server dispatch failed: {err}");
                    break;
                }
            }
            self.publish_client_poses();
            if self.snapshots.lock_latest() {
                self.broadcast_latest(&mut dispatcher);
            }
        }
        self.close_all(&mut dispatcher);
        info!("Server stopped");
    }
}

/// Streams heightfield snapshots to remote viewers.
pub struct RemoteServer {
    local_addr: SocketAddr,
    geometry: GridGeometry,
    streaming: Arc<AtomicUsize>,
    snapshots: TripleBufferWriter<HeightfieldSnapshot>,
    poses: TripleBufferReader<Vec<ClientPose>>,
    scheduler: RequestScheduler,
    handle: DispatcherHandle,
    thread: Option<JoinHandle<()>>,
}

impl RemoteServer {
    /// Bind the listener and start the dispatch thread.
    pub fn start(settings: ServerSettings, geometry: GridGeometry) -> Result<Self, NetError> {
        let listener = bind_listener(settings.bind_addr, &settings.socket)?;
        let local_addr = listener.local_addr()?;

        let (snapshot_writer, snapshot_reader) =
            triple_buffer(|| HeightfieldSnapshot::zeroed(&geometry));
        let (pose_writer, pose_reader) = triple_buffer(Vec::new);
        let streaming = Arc::new(AtomicUsize::new(0));

        let mut core = ServerCore::new(
            listener,
            settings.socket,
            geometry,
            snapshot_reader,
            pose_writer,
            Arc::clone(&streaming),
        );
        let mut dispatcher = Dispatcher::new()?;
        dispatcher.add_listener(
            &mut core.listener,
            Interest::READABLE,
            Box::new(ServerCore::on_listener_ready),
        )?;
        let handle = dispatcher.handle();

        let thread = std::thread::Builder::new()
            .name("sandlink-server".to_string())
            .spawn(move || core.run(dispatcher))?;

        let scheduler = RequestScheduler::new(settings.request_interval);
        info!(
            "Serving {}x{} grid on {local_addr}, requesting snapshots every {}s",
            geometry.width(),
            geometry.height(),
            scheduler.interval()
        );

        Ok(Self {
            local_addr,
            geometry,
            streaming,
            snapshots: snapshot_writer,
            poses: pose_reader,
            scheduler,
            handle,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    /// Number of viewers that have completed the handshake.
    pub fn streaming_clients(&self) -> usize {
        self.streaming.load(Ordering::Acquire)
    }

    /// The snapshot buffer to fill before [`publish_snapshot`](Self::publish_snapshot).
    ///
    /// It holds stale data from an earlier snapshot; overwrite every sample.
    pub fn snapshot_slot(&mut self) -> &mut HeightfieldSnapshot {
        self.snapshots.acquire_write_slot()
    }

    /// Hand the filled slot to the dispatch thread for broadcast.
    pub fn publish_snapshot(&mut self) {
        if !self.snapshots.is_consumed() {
            debug!("Replacing a snapshot the server thread has not broadcast yet");
        }
        self.snapshots.publish();
        if let Err(err) = self.handle.interrupt() {
            warn!("Failed to wake server thread: {err}");
        }
    }

    /// Copy `snapshot` into the next slot and publish it.
    pub fn publish(&mut self, snapshot: &HeightfieldSnapshot) -> Result<(), NetError> {
        if !snapshot.matches(&self.geometry) {
            return Err(NetError::SnapshotLength {
                expected: wire::snapshot_message_len(&self.geometry),
                actual: (snapshot.terrain.len() + snapshot.water.len()) * 2,
            });
        }
        let slot = self.snapshots.acquire_write_slot();
        slot.terrain.copy_from_slice(&snapshot.terrain);
        slot.water.copy_from_slice(&snapshot.water);
        self.publish_snapshot();
        Ok(())
    }

    /// Per-frame update for the embedding application.
    ///
    /// Locks the latest viewer poses and returns whether a new snapshot should
    /// be produced and published now.
    pub fn frame(&mut self, app_time: f64) -> bool {
        self.poses.lock_latest();
        self.scheduler.poll(app_time, self.streaming_clients())
    }

    /// Viewer poses as of the last [`frame`](Self::frame).
    pub fn client_poses(&self) -> &[ClientPose] {
        self.poses.locked()
    }

    /// Stop the dispatch thread and close every session.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if let Err(err) = self.handle.stop() {
            warn!("Failed to signal server thread: {err}");
        }
        if thread.join().is_err() {
            error!("Server thread panicked");
        }
    }
}

impl Drop for RemoteServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
