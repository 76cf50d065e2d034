// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Packet builder contract.
//!
//! The builder owns packet assembly, protection and emission. The engine
//! feeds it frames in scheduling order and splices everything the builder
//! reports as emitted into the transmitted queue.

use crate::{crypto::Level, frame::Frame, path::PathAlt};
use bytes::Bytes;

/// The smallest UDP payload every QUIC endpoint must support
pub const MIN_UDP_PAYLOAD: u16 = 1200;

/// Outcome of configuring the builder for a frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Config {
    /// The builder accepts frames for this level and path
    Ready,
    /// This frame is filtered out; skip it and keep going
    Filtered,
    /// The builder cannot take this level right now; stop the phase
    Blocked,
}

/// Reported for every packet the builder emits
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentInfo {
    /// The packet number the emitted packet carries
    pub number: u64,
    /// True if the packet was sent with an ECN marking
    pub ecn: bool,
}

/// A packet whose protection completed off the connection lock
#[derive(Clone, Debug)]
pub struct EncryptedPacket {
    pub level: Level,
    pub path_alt: PathAlt,
    pub payload: Bytes,
}

pub trait Builder {
    /// Prepares the builder for frames of `level` on the given path
    fn config(&mut self, level: Level, path_alt: PathAlt) -> Config;

    /// Appends `frame` to the packet under construction; returns false
    /// when the packet must be finalized first
    fn tail(&mut self, frame: &Frame, is_dgram: bool) -> bool;

    /// Finalizes and emits the packet under construction
    fn create(&mut self) -> Option<SentInfo>;

    /// Emits any partially built packet
    fn flush(&mut self) -> Option<SentInfo>;

    /// Hands an already protected packet to the wire
    fn xmit(&mut self, packet: EncryptedPacket, resume: bool);

    /// Applies a new maximum packet payload size
    fn mss_update(&mut self, mss: usize);

    /// The AEAD authentication tag length in bytes
    fn taglen(&self) -> usize;

    fn set_taglen(&mut self, len: usize);

    /// Restricts packet assembly to `level` for the next transmit pass
    fn set_filter(&mut self, level: Level);

    /// Sets the remaining ECN probe budget
    fn set_ecn_probes(&mut self, count: u8);
}
