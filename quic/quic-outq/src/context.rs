// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The collaborator bundle every engine operation runs against.
//!
//! The connection owns keys, the packet builder, the congestion
//! controller, the per-level packet number maps, timers, paths and the
//! user event channel; the engine borrows them for the duration of each
//! operation through this trait. All operations run to completion under
//! the connection lock; the context is never held across a suspension
//! point.

use crate::{
    congestion, connection,
    crypto::{self, Level},
    event, packet, path, pnmap, stream, timers,
    time::{Duration, Timestamp},
};

pub trait Context {
    type Keys: crypto::KeyChain;
    type Builder: packet::Builder;
    type Cong: congestion::Controller;
    type Pnmap: pnmap::Map;
    type Events: event::Subscriber;
    type Timers: timers::Scheduler;
    type Path: path::Manager;
    type Streams: stream::StreamSet;

    /// The current point in time
    fn now(&self) -> Timestamp;

    fn keys(&self) -> &Self::Keys;

    fn keys_mut(&mut self) -> &mut Self::Keys;

    fn builder(&mut self) -> &mut Self::Builder;

    fn cong(&mut self) -> &mut Self::Cong;

    fn pnmap(&self, level: Level) -> &Self::Pnmap;

    fn pnmap_mut(&mut self, level: Level) -> &mut Self::Pnmap;

    fn events(&mut self) -> &mut Self::Events;

    fn timers(&mut self) -> &mut Self::Timers;

    fn path(&mut self) -> &mut Self::Path;

    fn streams(&mut self) -> &mut Self::Streams;

    fn state(&self) -> connection::State;

    fn set_state(&mut self, state: connection::State);

    /// Charges `len` bytes against the connection's write memory
    fn wmem_charge(&mut self, len: usize);

    /// Refunds `len` bytes of write memory, waking blocked writers
    fn wmem_refund(&mut self, len: usize);

    fn set_sndbuf(&mut self, len: usize);

    /// Marks outgoing datagrams as ECT(0)
    fn set_ecn_ect0(&mut self);

    /// Applies the validated path's address to the connection
    fn set_addr(&mut self, local: bool);

    /// The base period of the path validation timer
    fn probe_timeout(&self) -> Duration;

    /// The locally configured idle timeout
    fn max_idle_timeout(&self) -> Option<Duration>;

    fn set_max_idle_timeout(&mut self, timeout: Duration);

    /// True if this endpoint offered to disable 1-RTT encryption
    fn disable_1rtt_encryption(&self) -> bool;

    #[inline]
    fn is_established(&self) -> bool {
        self.state().is_established()
    }

    #[inline]
    fn is_establishing(&self) -> bool {
        self.state().is_establishing()
    }
}
