// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The outbound frame queue manager.
//!
//! Four pending queues (control, datagram, stream) plus the transmitted
//! queue, drained by a single [`transmit`](OutQueue::transmit) entry
//! point in fixed priority order and mutated by ack and loss feedback.

use crate::{
    context::Context,
    counter::Counter,
    crypto::Level,
    frame::{Frame, Tag},
    params::TransportParameters,
    pnmap::Map,
    stream::{StreamId, StreamSet},
    time::Duration,
};

mod ack;
mod close;
pub mod encrypted;
mod list;
mod loss;
mod migration;
mod transmit;

#[cfg(test)]
mod tests;

use encrypted::EncryptedQueue;
use list::{Arena, FrameId, List};

/// The outbound queue of a single connection
///
/// All methods must be called under the connection lock; the engine has
/// no interior locking of its own.
#[derive(Debug, Default)]
pub struct OutQueue {
    arena: Arena,
    control: List,
    stream: List,
    datagram: List,
    transmitted: List,
    /// Frames handed to the builder for the packet under construction
    packing: List,

    /// Cumulative stream bytes sent
    bytes: u64,
    /// Connection level send credit
    max_bytes: u64,
    /// The credit in force when the last DATA_BLOCKED was emitted
    last_max_bytes: u64,
    data_blocked: bool,

    /// Flow-controlled payload bytes in flight
    data_inflight: Counter,
    /// Wire bytes in flight
    inflight: Counter,

    /// Congestion window snapshot
    window: usize,
    /// Consecutive loss-recovery epochs
    rtx_count: u32,
    /// The epoch stream and datagram frames are sent at
    data_level: Level,

    close_errcode: u64,
    close_frame: u64,
    close_phrase: Option<String>,

    // peer transport parameters
    max_datagram_frame_size: u64,
    max_udp_payload_size: u64,
    ack_delay_exponent: u8,
    max_idle_timeout: Option<Duration>,
    max_ack_delay: Duration,
    grease_quic_bit: bool,
    disable_1rtt_encryption: bool,

    encrypted: EncryptedQueue,
}

/// Congestion window snapshot used until the controller reports one
const INITIAL_WINDOW: usize = 14720;

impl OutQueue {
    pub fn new() -> Self {
        Self {
            window: INITIAL_WINDOW,
            ..Self::default()
        }
    }

    /// Appends a stream frame and drives the stream's send state
    ///
    /// A frame carrying FIN moves the stream out of the active-sending
    /// slot and into `DataSent`.
    pub fn stream_tail<C: Context>(&mut self, cx: &mut C, frame: Frame, cork: bool) {
        debug_assert!(frame.tag.is_stream());
        let fin = matches!(frame.tag, Tag::Stream { fin: true });

        if let Some(id) = frame.stream {
            let mut clear_active = false;
            if let Some(stream) = cx.streams().get_mut(id) {
                if stream.state.is_ready() {
                    let _ = stream.state.on_send_stream();
                }
                if fin && stream.state.is_sending() {
                    let _ = stream.state.on_send_fin();
                    clear_active = true;
                }
            }
            if clear_active && cx.streams().send_active() == Some(id) {
                cx.streams().set_send_active(None);
            }
        }

        cx.wmem_charge(frame.bytes);
        let id = self.arena.insert(frame);
        self.stream.push_back(&mut self.arena, id);
        if !cork {
            self.transmit(cx);
        }
    }

    /// Appends a datagram frame
    pub fn dgram_tail<C: Context>(&mut self, cx: &mut C, frame: Frame, cork: bool) {
        cx.wmem_charge(frame.bytes);
        let id = self.arena.insert(frame);
        self.datagram.push_back(&mut self.arena, id);
        if !cork {
            self.transmit(cx);
        }
    }

    /// Appends a control frame, keeping earlier epochs ahead of later
    /// ones so handshake progress is never starved by application frames
    pub fn ctrl_tail<C: Context>(&mut self, cx: &mut C, frame: Frame, cork: bool) {
        cx.wmem_charge(frame.bytes);
        let id = self.arena.insert(frame);
        level_ordered_tail(&mut self.arena, &mut self.control, id);
        if !cork {
            self.transmit(cx);
        }
    }

    /// Splices a just-packed frame into the transmitted queue, same
    /// epoch ordering as the control queue
    fn transmitted_tail(&mut self, id: FrameId) {
        level_ordered_tail(&mut self.arena, &mut self.transmitted, id);
    }

    /// Removes every frame referencing `stream_id` from the transmitted
    /// and pending stream queues, refunding its write memory
    pub fn stream_purge<C: Context>(&mut self, cx: &mut C, stream_id: StreamId) {
        let mut refund = 0;

        let mut cur = self.transmitted.head();
        while let Some(id) = cur {
            let next = self.transmitted.next(&self.arena, id);
            if self.arena.get(id).stream == Some(stream_id) {
                let (level, len, bytes) = {
                    let frame = self.arena.get(id);
                    (frame.level, frame.len, frame.bytes)
                };
                cx.pnmap_mut(level).dec_inflight(len);
                self.data_inflight -= bytes;
                self.inflight -= len;
                self.transmitted.unlink(&mut self.arena, id);
                refund += self.arena.remove(id).bytes;
            }
            cur = next;
        }

        let mut cur = self.stream.head();
        while let Some(id) = cur {
            let next = self.stream.next(&self.arena, id);
            if self.arena.get(id).stream == Some(stream_id) {
                self.stream.unlink(&mut self.arena, id);
                refund += self.arena.remove(id).bytes;
            }
            cur = next;
        }

        cx.wmem_refund(refund);
    }

    /// Applies the peer's transport parameters at handshake completion
    pub fn set_param<C: Context>(&mut self, cx: &mut C, p: &TransportParameters) {
        use crate::packet::Builder as _;

        self.max_datagram_frame_size = p.max_datagram_frame_size;
        self.max_udp_payload_size = p.max_udp_payload_size;
        self.ack_delay_exponent = p.ack_delay_exponent;
        self.max_idle_timeout = p.max_idle_timeout;
        self.max_ack_delay = p.max_ack_delay;
        self.grease_quic_bit = p.grease_quic_bit;
        self.disable_1rtt_encryption = p.disable_1rtt_encryption;

        self.max_bytes = p.max_data;
        cx.set_sndbuf((2 * p.max_data) as usize);

        // the effective idle timeout is the smaller enforced one
        if let Some(remote) = p.max_idle_timeout {
            match cx.max_idle_timeout() {
                Some(local) if local <= remote => {}
                _ => cx.set_max_idle_timeout(remote),
            }
        }

        // both sides agreed to plaintext 1-RTT packets
        if cx.disable_1rtt_encryption() && p.disable_1rtt_encryption {
            cx.builder().set_taglen(0);
        }
    }

    /// Purges every queue and drops the close phrase
    pub fn free<C: Context>(&mut self, cx: &mut C) {
        let mut refund = 0;
        for list in [
            &mut self.transmitted,
            &mut self.datagram,
            &mut self.control,
            &mut self.stream,
            &mut self.packing,
        ] {
            while let Some(id) = list.head() {
                list.unlink(&mut self.arena, id);
                refund += self.arena.remove(id).bytes;
            }
        }
        self.data_inflight = Counter::default();
        self.inflight = Counter::default();
        cx.wmem_refund(refund);
        self.close_phrase = None;
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn set_window(&mut self, window: usize) {
        self.window = window;
    }

    pub fn data_level(&self) -> Level {
        self.data_level
    }

    pub fn set_data_level(&mut self, level: Level) {
        self.data_level = level;
    }

    /// Cumulative stream bytes sent
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Applies a MAX_DATA update from the peer
    pub fn set_max_bytes(&mut self, max_bytes: u64) {
        self.max_bytes = max_bytes;
    }

    pub fn is_data_blocked(&self) -> bool {
        self.data_blocked
    }

    pub fn data_inflight(&self) -> usize {
        self.data_inflight.get()
    }

    pub fn inflight(&self) -> usize {
        self.inflight.get()
    }

    pub fn rtx_count(&self) -> u32 {
        self.rtx_count
    }

    pub fn close_errcode(&self) -> u64 {
        self.close_errcode
    }

    pub fn set_close_errcode(&mut self, errcode: u64) {
        self.close_errcode = errcode;
    }

    pub fn close_frame(&self) -> u64 {
        self.close_frame
    }

    pub fn set_close_frame(&mut self, frame_type: u64) {
        self.close_frame = frame_type;
    }

    pub fn close_phrase(&self) -> Option<&str> {
        self.close_phrase.as_deref()
    }

    pub fn set_close_phrase(&mut self, phrase: Option<String>) {
        self.close_phrase = phrase;
    }

    pub fn max_datagram_frame_size(&self) -> u64 {
        self.max_datagram_frame_size
    }

    pub fn max_udp_payload_size(&self) -> u64 {
        self.max_udp_payload_size
    }

    pub fn ack_delay_exponent(&self) -> u8 {
        self.ack_delay_exponent
    }

    pub fn max_ack_delay(&self) -> Duration {
        self.max_ack_delay
    }

    pub fn grease_quic_bit(&self) -> bool {
        self.grease_quic_bit
    }

    pub fn control_frames(&self) -> impl Iterator<Item = &Frame> {
        self.control.iter(&self.arena).map(|(_, frame)| frame)
    }

    pub fn stream_frames(&self) -> impl Iterator<Item = &Frame> {
        self.stream.iter(&self.arena).map(|(_, frame)| frame)
    }

    pub fn datagram_frames(&self) -> impl Iterator<Item = &Frame> {
        self.datagram.iter(&self.arena).map(|(_, frame)| frame)
    }

    pub fn transmitted_frames(&self) -> impl Iterator<Item = &Frame> {
        self.transmitted.iter(&self.arena).map(|(_, frame)| frame)
    }
}

/// Inserts before the first frame of a later epoch; FIFO within an epoch
fn level_ordered_tail(arena: &mut Arena, list: &mut List, id: FrameId) {
    let priority = arena.get(id).level.priority();
    let mut pos = list.head();
    while let Some(at) = pos {
        if arena.get(at).level.priority() > priority {
            list.insert_before(arena, id, at);
            return;
        }
        pos = list.next(arena, at);
    }
    list.push_back(arena, id);
}
