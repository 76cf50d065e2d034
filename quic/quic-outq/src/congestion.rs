// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Congestion controller contract.

use crate::time::{Duration, Timestamp};

/// The slice of a congestion controller the outbound queue drives
///
/// The algorithm behind it is out of scope; the engine only feeds it
/// acknowledgement and timeout signals and reads the resulting window.
pub trait Controller {
    /// Updates the RTT estimate from an acknowledgement of the largest
    /// acked packet, sent at `transmit_ts`
    fn rtt_update(&mut self, now: Timestamp, transmit_ts: Timestamp, ack_delay: Duration);

    /// The current retransmission timeout
    fn rto(&self) -> Duration;

    /// The base probe period used for the loss timer backoff
    fn duration(&self) -> Duration;

    /// The current congestion window in bytes
    fn window(&self) -> usize;

    /// Called once per processed acknowledgement batch
    fn cwnd_update_after_sack(
        &mut self,
        acked_number: u64,
        transmit_ts: Timestamp,
        acked_bytes: usize,
        inflight: usize,
    );

    /// Called for every byte-bearing frame declared lost
    fn cwnd_update_after_timeout(&mut self, number: u64, transmit_ts: Timestamp, last_number: u64);
}
