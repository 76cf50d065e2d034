// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-stream send state.

use core::fmt;
use std::collections::BTreeMap;

pub mod send;

use send::Sender;

/// A stream identifier
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(u64);

impl StreamId {
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The send half of a stream, as seen by the outbound queue
#[derive(Clone, Debug)]
pub struct SendStream {
    id: StreamId,
    pub(crate) state: Sender,
    /// Cumulative bytes handed to the queue
    pub(crate) bytes: u64,
    /// Peer-advertised send credit
    pub(crate) max_bytes: u64,
    /// The credit in force when the last STREAM_DATA_BLOCKED was emitted
    pub(crate) last_max_bytes: u64,
    pub(crate) data_blocked: bool,
    /// Transmitted, unacknowledged byte-bearing fragments
    pub(crate) frags: usize,
    /// Error code carried by an emitted RESET_STREAM
    pub(crate) errcode: u64,
}

impl SendStream {
    pub fn new(id: StreamId, max_bytes: u64) -> Self {
        Self {
            id,
            state: Sender::default(),
            bytes: 0,
            max_bytes,
            last_max_bytes: 0,
            data_blocked: false,
            frags: 0,
            errcode: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> StreamId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> &Sender {
        &self.state
    }

    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    #[inline]
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Applies a MAX_STREAM_DATA update from the peer
    #[inline]
    pub fn set_max_bytes(&mut self, max_bytes: u64) {
        self.max_bytes = max_bytes;
    }

    #[inline]
    pub fn last_max_bytes(&self) -> u64 {
        self.last_max_bytes
    }

    #[inline]
    pub fn is_data_blocked(&self) -> bool {
        self.data_blocked
    }

    #[inline]
    pub fn frags(&self) -> usize {
        self.frags
    }

    #[inline]
    pub fn errcode(&self) -> u64 {
        self.errcode
    }

    #[inline]
    pub fn set_errcode(&mut self, errcode: u64) {
        self.errcode = errcode;
    }
}

/// Resolves the frame back-references to stream send halves
///
/// The connection owns the streams; the queue reaches them through this
/// contract. Frames referencing a stream must be purged before the stream
/// is dropped from the set.
pub trait StreamSet {
    fn get(&self, id: StreamId) -> Option<&SendStream>;

    fn get_mut(&mut self, id: StreamId) -> Option<&mut SendStream>;

    /// The stream currently designated for active sending, if any
    fn send_active(&self) -> Option<StreamId>;

    fn set_send_active(&mut self, id: Option<StreamId>);
}

/// A ready-made [`StreamSet`] backed by an ordered map
#[derive(Debug, Default)]
pub struct StreamMap {
    streams: BTreeMap<StreamId, SendStream>,
    send_active: Option<StreamId>,
}

impl StreamMap {
    pub fn insert(&mut self, stream: SendStream) {
        self.streams.insert(stream.id(), stream);
    }

    pub fn remove(&mut self, id: StreamId) -> Option<SendStream> {
        if self.send_active == Some(id) {
            self.send_active = None;
        }
        self.streams.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SendStream> {
        self.streams.values()
    }
}

impl StreamSet for StreamMap {
    fn get(&self, id: StreamId) -> Option<&SendStream> {
        self.streams.get(&id)
    }

    fn get_mut(&mut self, id: StreamId) -> Option<&mut SendStream> {
        self.streams.get_mut(&id)
    }

    fn send_active(&self) -> Option<StreamId> {
        self.send_active
    }

    fn set_send_active(&mut self, id: Option<StreamId>) {
        self.send_active = id;
    }
}
