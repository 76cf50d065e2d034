// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! User visible connection events.
//!
//! Several state transitions offer the event to the user first; when the
//! user claims it, the engine suppresses its default handling.

use crate::stream::{send::Sender, StreamId};

/// A change of a stream's send state
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamUpdate {
    pub id: StreamId,
    pub state: Sender,
    pub errcode: u64,
}

/// The connection is closing with the given transport error
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionClose {
    pub errcode: u64,
    /// The frame type that triggered the close
    pub frame: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    StreamUpdate(StreamUpdate),
    ConnectionClose(ConnectionClose),
    ConnectionMigration {
        /// True when the local address migrated
        local: bool,
    },
}

/// Receives engine events on behalf of the user
pub trait Subscriber {
    /// Delivers `event`; returns true if the user consumed it, in which
    /// case the engine suppresses its default handling
    fn event_recv(&mut self, event: &Event) -> bool;
}
