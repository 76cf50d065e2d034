// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Peer transport parameters consumed by the outbound queue.

use crate::time::Duration;

/// The peer-advertised transport parameters the send side mirrors
///
/// Applied once at handshake completion via
/// [`OutQueue::set_param`](crate::OutQueue::set_param).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportParameters {
    /// Connection level send credit
    pub max_data: u64,
    /// 0 when the peer does not accept DATAGRAM frames
    pub max_datagram_frame_size: u64,
    pub max_udp_payload_size: u64,
    pub ack_delay_exponent: u8,
    /// `None` when the peer does not enforce an idle timeout
    pub max_idle_timeout: Option<Duration>,
    pub max_ack_delay: Duration,
    pub grease_quic_bit: bool,
    pub disable_1rtt_encryption: bool,
}

impl Default for TransportParameters {
    fn default() -> Self {
        Self {
            max_data: 0,
            max_datagram_frame_size: 0,
            max_udp_payload_size: 65527,
            ack_delay_exponent: 3,
            max_idle_timeout: None,
            max_ack_delay: Duration::from_millis(25),
            grease_quic_bit: false,
            disable_1rtt_encryption: false,
        }
    }
}
