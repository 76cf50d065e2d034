// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The unit of queueing.
//!
//! A [`Frame`] is created by the connection layer (stream data, datagrams,
//! acknowledgements) or synthesized by the engine itself (blocked
//! advertisements, probes, close). It migrates between the pending lists
//! and the transmitted list and is destroyed on acknowledgement or purge;
//! it is never copied.

use crate::{crypto::Level, path::PathAlt, stream::StreamId, time::Timestamp, varint};
use bytes::Bytes;

/// The frame type together with its type-specific fields
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tag {
    Ping {
        /// Pad the carrying packet to this payload size (PLPMTUD / PTO
        /// probes)
        probe_size: Option<u16>,
    },
    Ack,
    Crypto,
    Stream {
        fin: bool,
    },
    Datagram,
    ResetStream {
        errcode: u64,
    },
    StreamDataBlocked {
        /// The send limit in force when the advertisement was created
        limit: u64,
    },
    DataBlocked {
        limit: u64,
    },
    ConnectionClose {
        /// True for the application variant (CONNECTION_CLOSE_APP)
        app: bool,
        errcode: u64,
        /// The frame type that triggered the close
        frame_type: u64,
    },
}

impl Tag {
    /// Datagram frames are never retransmitted
    #[inline]
    pub fn is_dgram(&self) -> bool {
        matches!(self, Self::Datagram)
    }

    #[inline]
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream { .. })
    }

    #[inline]
    pub fn is_ping(&self) -> bool {
        matches!(self, Self::Ping { .. })
    }
}

#[derive(Clone, Debug)]
pub struct Frame {
    pub(crate) tag: Tag,
    pub(crate) level: Level,
    pub(crate) payload: Bytes,
    pub(crate) offset: u64,
    pub(crate) stream: Option<StreamId>,
    /// On-wire length contribution
    pub(crate) len: usize,
    /// Payload bytes counted against flow control; 0 for control frames
    pub(crate) bytes: usize,
    /// The packet number of the carrying packet; `None` until transmitted
    pub(crate) number: Option<u64>,
    pub(crate) transmit_ts: Option<Timestamp>,
    /// The carrying packet was sent with an ECN marking
    pub(crate) ecn: bool,
    pub(crate) path_alt: PathAlt,
}

impl Frame {
    fn new(tag: Tag, level: Level, len: usize) -> Self {
        Self {
            tag,
            level,
            payload: Bytes::new(),
            offset: 0,
            stream: None,
            len,
            bytes: 0,
            number: None,
            transmit_ts: None,
            ecn: false,
            path_alt: PathAlt::NONE,
        }
    }

    /// A STREAM frame carrying application data at the given offset
    pub fn stream(stream: StreamId, offset: u64, payload: Bytes, fin: bool) -> Self {
        let len = 1
            + varint::size(stream.as_u64())
            + varint::size(offset)
            + varint::size(payload.len() as u64)
            + payload.len();
        Self {
            offset,
            stream: Some(stream),
            bytes: payload.len(),
            payload,
            ..Self::new(Tag::Stream { fin }, Level::App, len)
        }
    }

    /// A DATAGRAM frame
    pub fn datagram(payload: Bytes) -> Self {
        let len = 1 + varint::size(payload.len() as u64) + payload.len();
        Self {
            bytes: payload.len(),
            payload,
            ..Self::new(Tag::Datagram, Level::App, len)
        }
    }

    /// A CRYPTO frame carrying handshake messages
    pub fn crypto(level: Level, offset: u64, payload: Bytes) -> Self {
        let len =
            1 + varint::size(offset) + varint::size(payload.len() as u64) + payload.len();
        Self {
            offset,
            payload,
            ..Self::new(Tag::Crypto, level, len)
        }
    }

    /// An ACK frame; the ranges are assembled by the packet builder, the
    /// queue only accounts for the reported wire length
    pub fn ack(level: Level, len: usize) -> Self {
        Self::new(Tag::Ack, level, len)
    }

    /// A bare PING
    pub fn ping(level: Level) -> Self {
        Self::new(Tag::Ping { probe_size: None }, level, 1)
    }

    /// A PING padded to `probe_size` by the builder
    pub fn ping_probe(level: Level, probe_size: u16) -> Self {
        Self::new(
            Tag::Ping {
                probe_size: Some(probe_size),
            },
            level,
            1,
        )
    }

    /// A RESET_STREAM frame
    pub fn reset_stream(stream: StreamId, errcode: u64, final_size: u64) -> Self {
        let len = 1
            + varint::size(stream.as_u64())
            + varint::size(errcode)
            + varint::size(final_size);
        Self {
            stream: Some(stream),
            ..Self::new(Tag::ResetStream { errcode }, Level::App, len)
        }
    }

    /// A STREAM_DATA_BLOCKED advertisement for `stream` at `limit`
    pub fn stream_data_blocked(stream: StreamId, limit: u64) -> Self {
        let len = 1 + varint::size(stream.as_u64()) + varint::size(limit);
        Self {
            stream: Some(stream),
            ..Self::new(Tag::StreamDataBlocked { limit }, Level::App, len)
        }
    }

    /// A DATA_BLOCKED advertisement at `limit`
    pub fn data_blocked(limit: u64) -> Self {
        let len = 1 + varint::size(limit);
        Self::new(Tag::DataBlocked { limit }, Level::App, len)
    }

    /// A CONNECTION_CLOSE (or CONNECTION_CLOSE_APP) frame; `phrase` is
    /// carried as the frame payload
    pub fn connection_close(
        level: Level,
        app: bool,
        errcode: u64,
        frame_type: u64,
        phrase: Option<&str>,
    ) -> Self {
        let phrase = phrase.map(|p| Bytes::copy_from_slice(p.as_bytes()));
        let phrase_len = phrase.as_ref().map_or(0, |p| p.len());
        let mut len = 1 + varint::size(errcode) + varint::size(phrase_len as u64) + phrase_len;
        if !app {
            len += varint::size(frame_type);
        }
        Self {
            payload: phrase.unwrap_or_default(),
            ..Self::new(
                Tag::ConnectionClose {
                    app,
                    errcode,
                    frame_type,
                },
                level,
                len,
            )
        }
    }

    /// Marks the frame as tied to the given alternate path directions
    pub fn with_path_alt(mut self, path_alt: PathAlt) -> Self {
        self.path_alt = path_alt;
        self
    }

    #[inline]
    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    #[inline]
    pub fn level(&self) -> Level {
        self.level
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub fn stream_id(&self) -> Option<StreamId> {
        self.stream
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    #[inline]
    pub fn number(&self) -> Option<u64> {
        self.number
    }

    #[inline]
    pub fn transmit_ts(&self) -> Option<Timestamp> {
        self.transmit_ts
    }

    #[inline]
    pub fn ecn(&self) -> bool {
        self.ecn
    }

    #[inline]
    pub fn path_alt(&self) -> PathAlt {
        self.path_alt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_frame_accounting() {
        let frame = Frame::stream(StreamId::new(4), 300, Bytes::from_static(&[0; 50]), false);

        // 1 type + 1 id + 2 offset + 1 length + payload
        assert_eq!(frame.len(), 55);
        assert_eq!(frame.bytes(), 50);
        assert_eq!(frame.level(), Level::App);
        assert_eq!(frame.number(), None);
    }

    #[test]
    fn control_frames_carry_no_flow_controlled_bytes() {
        let frames = [
            Frame::ping(Level::Initial),
            Frame::ack(Level::App, 9),
            Frame::crypto(Level::Initial, 0, Bytes::from_static(b"hello")),
            Frame::stream_data_blocked(StreamId::new(8), 1000),
            Frame::data_blocked(4096),
            Frame::connection_close(Level::App, false, 0x0a, 0x06, Some("gone")),
        ];

        for frame in frames {
            assert_eq!(frame.bytes(), 0, "{:?}", frame.tag());
        }
    }

    #[test]
    fn close_frame_length_includes_phrase() {
        let bare = Frame::connection_close(Level::App, true, 1, 0, None);
        let phrased = Frame::connection_close(Level::App, true, 1, 0, Some("whoops"));

        assert_eq!(phrased.len() - bare.len(), "whoops".len());
        assert_eq!(phrased.payload().as_ref(), b"whoops");
    }
}
