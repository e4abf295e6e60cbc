//! Socket configuration and the blocking-aware I/O helpers the cores share.
//!
//! [`SocketConfig`] carries the TCP options applied to every connection.
//! Sockets run non-blocking under the dispatcher; [`write_fully`] falls back
//! to a blocking write when the kernel buffer fills, so a slow viewer stalls
//! the writer instead of losing part of a message.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};

/// TCP options applied to every accepted or connected stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketConfig {
    /// Disable Nagle's algorithm. Default: true.
    pub tcp_nodelay: bool,
    /// Enable TCP keepalive. Default: true.
    pub keepalive_enabled: bool,
    /// Idle time before the first keepalive probe. Default: 60s.
    pub keepalive_idle: Duration,
    /// Interval between keepalive probes. Default: 10s.
    pub keepalive_interval: Duration,
    /// Unanswered probes before the connection is declared dead. Default: 3.
    pub keepalive_retries: u32,
    /// Set `SO_REUSEADDR` on the listening socket. Default: true except on Windows.
    pub reuse_addr: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive_enabled: true,
            keepalive_idle: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(10),
            keepalive_retries: 3,
            reuse_addr: !cfg!(target_os = "windows"),
        }
    }
}

/// Apply `config` to a connected socket.
pub fn configure_socket(socket: SockRef<'_>, config: &SocketConfig) -> io::Result<()> {
    socket.set_nodelay(config.tcp_nodelay)?;

    if config.keepalive_enabled {
        let keepalive = TcpKeepalive::new()
            .with_time(config.keepalive_idle)
            .with_interval(config.keepalive_interval);

        // Retries are supported on Linux and Windows but not macOS.
        #[cfg(any(target_os = "linux", target_os = "windows"))]
        let keepalive = keepalive.with_retries(config.keepalive_retries);

        socket.set_tcp_keepalive(&keepalive)?;
    }

    Ok(())
}

/// Create a non-blocking listener on `addr`.
///
/// IPv6 addresses are bound dual-stack.
pub fn bind_listener(addr: SocketAddr, config: &SocketConfig) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    if config.reuse_addr {
        socket.set_reuse_address(true)?;
    }
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;

    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener))
}

/// Write all of `bytes` to a non-blocking stream.
///
/// When the socket would block, it is switched to blocking mode until the
/// rest of the message is written, then restored. There is no timeout.
pub fn write_fully(stream: &mut TcpStream, bytes: &[u8]) -> io::Result<()> {
    let mut rest = bytes;
    while !rest.is_empty() {
        match stream.write(rest) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => rest = &rest[n..],
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                SockRef::from(&*stream).set_nonblocking(false)?;
                let result = stream.write_all(rest);
                SockRef::from(&*stream).set_nonblocking(true)?;
                return result;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Destination for whole encoded messages.
pub trait MessageSink {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl MessageSink for TcpStream {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        write_fully(self, bytes)
    }
}

impl MessageSink for Vec<u8> {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

/// Whether the peer is still sending after a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Open,
    /// The peer closed its end. Bytes read before the close were still appended.
    Closed,
}

/// Read everything currently available from a non-blocking reader into `inbox`.
pub fn drain_into<R: Read>(reader: &mut R, inbox: &mut Vec<u8>) -> io::Result<StreamStatus> {
    let mut chunk = [0u8; 16 * 1024];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(StreamStatus::Closed),
            Ok(n) => inbox.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(StreamStatus::Open),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
}

/// Writes messages on a socket whose reads belong to another thread's
/// dispatcher.
///
/// The socket stays non-blocking. A write that would block waits for
/// writability on a private poll, so the dispatcher's reads are unaffected.
pub struct PoseSender {
    stream: TcpStream,
    poll: Poll,
    events: Events,
}

impl PoseSender {
    const WRITABLE: Token = Token(0);

    /// Take a non-blocking clone of the shared connection.
    pub fn new(stream: std::net::TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        let mut stream = TcpStream::from_std(stream);
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut stream, Self::WRITABLE, Interest::WRITABLE)?;
        Ok(Self {
            stream,
            poll,
            events: Events::with_capacity(4),
        })
    }

    /// Write one whole message, waiting for buffer space as needed.
    pub fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut rest = bytes;
        while !rest.is_empty() {
            match self.stream.write(rest) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => rest = &rest[n..],
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.wait_writable()?;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Shut down both directions of the shared connection.
    pub fn shutdown(&self) -> io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both)
    }

    fn wait_writable(&mut self) -> io::Result<()> {
        loop {
            match self.poll.poll(&mut self.events, None) {
                Ok(()) if !self.events.is_empty() => return Ok(()),
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream as StdStream;

    fn accept_blocking(listener: &TcpListener) -> (TcpStream, SocketAddr) {
        loop {
            match listener.accept() {
                Ok(pair) => return pair,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(err) => panic!("accept failed: {err}"),
            }
        }
    }

    #[test]
    fn test_listener_accepts_and_configures() {
        let config = SocketConfig::default();
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), &config).unwrap();
        let addr = listener.local_addr().unwrap();

        let client = StdStream::connect(addr).unwrap();
        let (server, _) = accept_blocking(&listener);
        configure_socket(SockRef::from(&server), &config).unwrap();
        configure_socket(SockRef::from(&client), &config).unwrap();

        assert!(server.nodelay().unwrap(), "TCP_NODELAY should be enabled");
        assert!(SockRef::from(&client).keepalive().unwrap());
    }

    #[test]
    fn test_nodelay_disabled_when_configured() {
        let config = SocketConfig {
            tcp_nodelay: false,
            keepalive_enabled: false,
            ..Default::default()
        };
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), &SocketConfig::default())
            .unwrap();
        let client = StdStream::connect(listener.local_addr().unwrap()).unwrap();
        configure_socket(SockRef::from(&client), &config).unwrap();
        assert!(!client.nodelay().unwrap());
    }

    #[test]
    fn test_reuse_addr_platform_default() {
        let config = SocketConfig::default();
        assert_eq!(config.reuse_addr, !cfg!(target_os = "windows"));
    }

    #[test]
    fn test_write_fully_survives_full_buffer() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), &SocketConfig::default())
            .unwrap();
        let mut client = StdStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut server, _) = accept_blocking(&listener);

        // Far more than a loopback socket buffers, so the write must block.
        let payload: Vec<u8> = (0..8 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let reader = std::thread::spawn(move || {
            let mut received = vec![0u8; expected.len()];
            client.read_exact(&mut received).unwrap();
            assert!(received == expected, "payload corrupted in transit");
            client
        });

        write_fully(&mut server, &payload).unwrap();
        let _client = reader.join().unwrap();

        // The socket is non-blocking again afterwards.
        let mut buf = [0u8; 1];
        let err = server.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_drain_into_reports_close_after_data() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), &SocketConfig::default())
            .unwrap();
        let mut client = StdStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut server, _) = accept_blocking(&listener);

        client.write_all(b"last words").unwrap();
        drop(client);

        let mut inbox = Vec::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut status = StreamStatus::Open;
        while status == StreamStatus::Open && std::time::Instant::now() < deadline {
            status = drain_into(&mut server, &mut inbox).unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(status, StreamStatus::Closed);
        assert_eq!(inbox, b"last words");
    }

    #[test]
    fn test_pose_sender_writes_through_clone() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), &SocketConfig::default())
            .unwrap();
        let client = StdStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut server, _) = accept_blocking(&listener);

        let mut sender = PoseSender::new(client.try_clone().unwrap()).unwrap();
        sender.send(b"pose bytes").unwrap();

        let mut inbox = Vec::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while inbox.len() < 10 && std::time::Instant::now() < deadline {
            drain_into(&mut server, &mut inbox).unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(inbox, b"pose bytes");

        sender.shutdown().unwrap();
        drop(client);
    }
}
