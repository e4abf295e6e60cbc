//! Per-connection protocol state on the host side.
//!
//! A session waits for the viewer's byte-order token, then accepts pose
//! messages until the connection ends. Any decode error closes it for good.

use crate::error::NetError;
use crate::pose::PoseSample;
use crate::wire::{self, ByteOrder, ClientMessage, MAGIC_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the viewer's byte-order token.
    AwaitingHandshake,
    /// Handshake done; the viewer receives snapshots and may send poses.
    Streaming,
    /// A fatal error occurred. Nothing more is decoded.
    Closed,
}

/// What one call to [`Session::receive`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    /// The handshake completed during this call.
    pub entered_streaming: bool,
    /// Number of pose messages decoded.
    pub poses: usize,
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    order: ByteOrder,
    pose: Option<PoseSample>,
    inbox: Vec<u8>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::AwaitingHandshake,
            order: ByteOrder::Native,
            pose: None,
            inbox: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == SessionState::Streaming
    }

    /// Byte order learned from the handshake.
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// The most recent pose the viewer reported, if any.
    pub fn latest_pose(&self) -> Option<&PoseSample> {
        self.pose.as_ref()
    }

    /// Mark the session closed without an error, e.g. on teardown.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.inbox.clear();
    }

    /// Feed bytes received from the viewer.
    ///
    /// Complete messages are decoded immediately; a trailing partial message
    /// waits for more bytes. On error the session is closed.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<SessionUpdate, NetError> {
        if self.state == SessionState::Closed {
            return Err(NetError::ConnectionClosed);
        }
        self.inbox.extend_from_slice(bytes);
        let result = self.process();
        if result.is_err() {
            self.close();
        }
        result
    }

    fn process(&mut self) -> Result<SessionUpdate, NetError> {
        let mut update = SessionUpdate::default();

        if self.state == SessionState::AwaitingHandshake {
            let Some(token) = self.inbox.first_chunk::<MAGIC_LEN>() else {
                return Ok(update);
            };
            self.order = wire::check_magic(*token)?;
            self.inbox.drain(..MAGIC_LEN);
            self.state = SessionState::Streaming;
            update.entered_streaming = true;
        }

        let mut consumed = 0;
        while let Some((message, len)) =
            wire::decode_client_message(&self.inbox[consumed..], self.order)?
        {
            match message {
                ClientMessage::Pose(pose) => {
                    self.pose = Some(pose);
                    update.poses += 1;
                }
            }
            consumed += len;
        }
        self.inbox.drain(..consumed);

        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{ENDIANNESS_MAGIC, encode_pose};
    use glam::Vec3;

    fn pose(x: f32) -> PoseSample {
        PoseSample::new(Vec3::new(x, 0.0, 1.0), Vec3::NEG_Z)
    }

    #[test]
    fn test_native_magic_enters_streaming() {
        let mut session = Session::new();
        let update = session.receive(&ENDIANNESS_MAGIC.to_ne_bytes()).unwrap();
        assert!(update.entered_streaming);
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.byte_order(), ByteOrder::Native);
    }

    #[test]
    fn test_swapped_magic_enables_swap() {
        let mut session = Session::new();
        session
            .receive(&ENDIANNESS_MAGIC.swap_bytes().to_ne_bytes())
            .unwrap();
        assert!(session.is_streaming());
        assert_eq!(session.byte_order(), ByteOrder::Swapped);
    }

    #[test]
    fn test_bad_magic_closes_session() {
        let mut session = Session::new();
        let result = session.receive(&[0xde, 0xad, 0xbe, 0xef]);
        assert!(matches!(result, Err(NetError::BadMagic(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.receive(&ENDIANNESS_MAGIC.to_ne_bytes()),
            Err(NetError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_magic_split_across_reads() {
        let mut session = Session::new();
        let magic = ENDIANNESS_MAGIC.to_ne_bytes();
        let update = session.receive(&magic[..3]).unwrap();
        assert!(!update.entered_streaming);
        assert_eq!(session.state(), SessionState::AwaitingHandshake);
        assert!(session.receive(&magic[3..]).unwrap().entered_streaming);
    }

    #[test]
    fn test_poses_in_one_burst_keep_latest() {
        let mut bytes = ENDIANNESS_MAGIC.to_ne_bytes().to_vec();
        for x in [1.0, 2.0, 3.0] {
            encode_pose(&pose(x), &mut bytes);
        }
        // Half of a fourth message stays buffered.
        let mut partial = Vec::new();
        encode_pose(&pose(4.0), &mut partial);
        bytes.extend_from_slice(&partial[..10]);

        let mut session = Session::new();
        let update = session.receive(&bytes).unwrap();
        assert!(update.entered_streaming);
        assert_eq!(update.poses, 3);
        assert_eq!(session.latest_pose(), Some(&pose(3.0)));

        let update = session.receive(&partial[10..]).unwrap();
        assert_eq!(update.poses, 1);
        assert_eq!(session.latest_pose(), Some(&pose(4.0)));
    }

    #[test]
    fn test_unknown_tag_closes_streaming_session() {
        let mut session = Session::new();
        session.receive(&ENDIANNESS_MAGIC.to_ne_bytes()).unwrap();
        let result = session.receive(&9u16.to_ne_bytes());
        assert!(matches!(result, Err(NetError::UnknownMessage(9))));
        assert_eq!(session.state(), SessionState::Closed);
    }
}
