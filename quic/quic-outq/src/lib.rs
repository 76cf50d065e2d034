// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Outbound transmission engine for a QUIC endpoint.
//!
//! The engine turns application writes, control signals and ack/loss
//! feedback into a flow- and congestion-controlled stream of packets. It
//! owns the pending frame queues and the transmitted-but-unacknowledged
//! queue; everything else (keys, packet assembly, congestion control,
//! packet-number bookkeeping, timers, paths, user events) is reached
//! through the contracts in [`context`].

#[macro_use]
mod macros;

pub mod congestion;
pub mod connection;
pub mod context;
pub mod counter;
pub mod crypto;
pub mod event;
pub mod frame;
pub mod outq;
pub mod packet;
pub mod params;
pub mod path;
pub mod pnmap;
pub mod stream;
pub mod time;
pub mod timers;
pub mod varint;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use outq::OutQueue;
