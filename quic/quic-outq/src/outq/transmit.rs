// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The transmit scheduler.
//!
//! One idempotent entry point drains the pending queues into the packet
//! builder in fixed priority order: control, datagram, stream. Each phase
//! is gated on key readiness; datagram and stream phases are additionally
//! gated on the congestion window and (at the application level) on flow
//! control. A frame leaves its pending queue only when the builder
//! accepts it; a frame that does not fit stays put and the current packet
//! is finalized before the same frame is retried.

use crate::{
    context::Context,
    crypto::KeyChain as _,
    frame::Frame,
    packet::{Builder as _, Config},
    pnmap::Map as _,
    stream::StreamSet as _,
};

use super::OutQueue;

impl OutQueue {
    /// Packs and transmits pending frames; returns the number of packets
    /// emitted
    pub fn transmit<C: Context>(&mut self, cx: &mut C) -> usize {
        let mut packets = self.transmit_ctrl(cx);
        packets += self.transmit_dgram(cx);
        packets += self.transmit_stream(cx);
        packets + self.packet_flush(cx)
    }

    fn transmit_ctrl<C: Context>(&mut self, cx: &mut C) -> usize {
        let mut packets = 0;
        let mut cur = self.control.head();
        while let Some(id) = cur {
            let next = self.control.next(&self.arena, id);
            let (level, path_alt) = {
                let frame = self.arena.get(id);
                (frame.level, frame.path_alt)
            };
            if !cx.keys().send_ready(level) {
                break;
            }
            match cx.builder().config(level, path_alt) {
                Config::Filtered => {
                    cur = next;
                    continue;
                }
                Config::Blocked => break,
                Config::Ready => {}
            }
            if cx.builder().tail(self.arena.get(id), false) {
                self.control.unlink(&mut self.arena, id);
                self.packing.push_back(&mut self.arena, id);
                cur = next;
                continue;
            }
            // the frame does not fit; emit what is packed so far, then
            // retry the same frame without advancing the cursor
            if self.packing.is_empty() {
                break;
            }
            packets += self.packet_create(cx);
        }
        packets
    }

    fn transmit_dgram<C: Context>(&mut self, cx: &mut C) -> usize {
        let level = self.data_level;
        ensure!(cx.keys().send_ready(level), 0);

        let mut packets = 0;
        let mut cur = self.datagram.head();
        while let Some(id) = cur {
            let next = self.datagram.next(&self.arena, id);
            let (len, bytes, path_alt) = {
                let frame = self.arena.get(id);
                (frame.len, frame.bytes, frame.path_alt)
            };
            if self.data_inflight.get() + len > self.window {
                break;
            }
            match cx.builder().config(level, path_alt) {
                Config::Filtered => {
                    cur = next;
                    continue;
                }
                Config::Blocked => break,
                Config::Ready => {}
            }
            if cx.builder().tail(self.arena.get(id), true) {
                self.data_inflight += bytes;
                self.datagram.unlink(&mut self.arena, id);
                self.packing.push_back(&mut self.arena, id);
                cur = next;
                continue;
            }
            if self.packing.is_empty() {
                break;
            }
            packets += self.packet_create(cx);
        }
        packets
    }

    fn transmit_stream<C: Context>(&mut self, cx: &mut C) -> usize {
        let level = self.data_level;
        ensure!(cx.keys().send_ready(level), 0);

        let mut packets = 0;
        let mut cur = self.stream.head();
        while let Some(id) = cur {
            let next = self.stream.next(&self.arena, id);
            if level.is_app() {
                let (blocked, emitted) = self.flow_control(cx, id);
                packets += emitted;
                if blocked {
                    break;
                }
            }
            let path_alt = self.arena.get(id).path_alt;
            match cx.builder().config(level, path_alt) {
                Config::Filtered => {
                    cur = next;
                    continue;
                }
                Config::Blocked => break,
                Config::Ready => {}
            }
            if cx.builder().tail(self.arena.get(id), false) {
                let (bytes, stream_id) = {
                    let frame = self.arena.get(id);
                    (frame.bytes, frame.stream)
                };
                if let Some(stream_id) = stream_id {
                    if let Some(stream) = cx.streams().get_mut(stream_id) {
                        stream.frags += 1;
                        stream.bytes += bytes as u64;
                    }
                }
                self.bytes += bytes as u64;
                self.data_inflight += bytes;
                self.stream.unlink(&mut self.arena, id);
                self.packing.push_back(&mut self.arena, id);
                cur = next;
                continue;
            }
            if self.packing.is_empty() {
                break;
            }
            packets += self.packet_create(cx);
        }
        packets
    }

    /// Checks the congestion, stream and connection send gates for a
    /// stream frame; emits blocked advertisements as needed
    ///
    /// Returns whether the frame is blocked, plus the packets emitted
    /// while packetizing a freshly queued advertisement.
    fn flow_control<C: Context>(&mut self, cx: &mut C, id: super::FrameId) -> (bool, usize) {
        let (len, stream_id) = {
            let frame = self.arena.get(id);
            (frame.bytes, frame.stream)
        };
        let Some(stream_id) = stream_id else {
            debug_assert!(false, "stream frame without a stream");
            return (false, 0);
        };

        let mut blocked = false;
        let mut advertised = false;

        // congestion control
        if self.data_inflight.get() + len > self.window {
            blocked = true;
        }

        // stream send credit
        let mut stream_limit = None;
        if let Some(stream) = cx.streams().get_mut(stream_id) {
            if stream.bytes + len as u64 > stream.max_bytes {
                if !stream.data_blocked && stream.last_max_bytes < stream.max_bytes {
                    stream_limit = Some(stream.max_bytes);
                    stream.last_max_bytes = stream.max_bytes;
                    stream.data_blocked = true;
                }
                blocked = true;
            }
        }
        if let Some(limit) = stream_limit {
            self.ctrl_tail(cx, Frame::stream_data_blocked(stream_id, limit), true);
            advertised = true;
        }

        // connection send credit
        if self.bytes + len as u64 > self.max_bytes {
            if !self.data_blocked && self.last_max_bytes < self.max_bytes {
                let limit = self.max_bytes;
                self.last_max_bytes = self.max_bytes;
                self.data_blocked = true;
                self.ctrl_tail(cx, Frame::data_blocked(limit), true);
                advertised = true;
            }
            blocked = true;
        }

        // packetize the advertisement right away
        let packets = if advertised { self.transmit_ctrl(cx) } else { 0 };
        (blocked, packets)
    }

    /// Finalizes and emits the packet under construction
    pub(super) fn packet_create<C: Context>(&mut self, cx: &mut C) -> usize {
        match cx.builder().create() {
            Some(info) => {
                self.on_packet_emitted(cx, info);
                1
            }
            None => {
                debug_assert!(self.packing.is_empty());
                0
            }
        }
    }

    /// Emits any partially built packet
    pub(super) fn packet_flush<C: Context>(&mut self, cx: &mut C) -> usize {
        match cx.builder().flush() {
            Some(info) => {
                self.on_packet_emitted(cx, info);
                1
            }
            None => {
                debug_assert!(self.packing.is_empty());
                0
            }
        }
    }

    /// Stamps the staged frames with the emitted packet's number and
    /// splices them into the transmitted queue
    fn on_packet_emitted<C: Context>(&mut self, cx: &mut C, info: crate::packet::SentInfo) {
        let now = cx.now();
        while let Some(id) = self.packing.head() {
            self.packing.unlink(&mut self.arena, id);
            let (level, len) = {
                let frame = self.arena.get_mut(id);
                frame.number = Some(info.number);
                frame.transmit_ts = Some(now);
                frame.ecn = info.ecn;
                (frame.level, frame.len)
            };
            self.inflight += len;
            let pnmap = cx.pnmap_mut(level);
            pnmap.inc_inflight(len);
            pnmap.set_last_sent_ts(now);
            self.transmitted_tail(id);
        }
    }
}
