// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Loss detection feedback.
//!
//! The loss timer walks the transmitted queue and returns overdue frames
//! to their origin pending queue; datagrams are dropped instead. When a
//! probe timeout fires with nothing to retransmit, a PING keeps the path
//! and the RTT estimate alive.

use crate::{
    congestion::Controller as _,
    context::Context,
    crypto::Level,
    frame::Frame,
    packet::{Builder as _, MIN_UDP_PAYLOAD},
    pnmap::Map as _,
    stream::StreamSet as _,
    time::Duration,
    timers::Scheduler as _,
};

use super::{FrameId, OutQueue};

/// Numbers this far behind the largest acknowledged are lost regardless
/// of their age
const PACKET_THRESHOLD: u64 = 6;

impl OutQueue {
    /// Walks the transmitted queue at `level` and returns overdue frames
    /// to their pending queues; returns how many were queued again
    ///
    /// With `immediate` every frame of the level is declared lost, as on
    /// key discard. Otherwise the walk stops at the first frame that is
    /// neither old enough nor far enough behind the largest
    /// acknowledgement, and the loss timer is stamped with its deadline.
    pub fn retransmit_mark<C: Context>(
        &mut self,
        cx: &mut C,
        level: Level,
        immediate: bool,
    ) -> usize {
        tracing::trace!(?level, immediate, "marking lost frames");
        cx.pnmap_mut(level).set_loss_ts(None);
        let last = cx.pnmap(level).next_number().saturating_sub(1);
        let now = cx.now();
        let mut count = 0;
        let mut freed = 0;

        let mut cur = self.transmitted.head();
        while let Some(id) = cur {
            let next = self.transmitted.next(&self.arena, id);
            let (frame_level, number, transmit_ts, frame_len, frame_bytes, is_dgram) = {
                let frame = self.arena.get(id);
                (
                    frame.level,
                    frame.number,
                    frame.transmit_ts,
                    frame.len,
                    frame.bytes,
                    frame.tag.is_dgram(),
                )
            };
            if frame_level != level {
                cur = next;
                continue;
            }
            let Some(number) = number else {
                debug_assert!(false, "transmitted frame without a number");
                cur = next;
                continue;
            };
            let transmit_ts = transmit_ts.unwrap_or(now);
            let rto = cx.cong().rto();
            if !immediate
                && transmit_ts + rto > now
                && number + PACKET_THRESHOLD > cx.pnmap(level).max_pn_acked()
            {
                cx.pnmap_mut(level).set_loss_ts(Some(transmit_ts + rto));
                break;
            }

            cx.pnmap_mut(level).dec_inflight(frame_len);
            self.data_inflight -= frame_bytes;
            self.inflight -= frame_len;
            self.transmitted.unlink(&mut self.arena, id);
            if is_dgram {
                // datagrams are not retransmitted
                freed += self.arena.remove(id).bytes;
            } else {
                self.retransmit_one(cx, id);
                count += 1;
            }

            if frame_bytes > 0 {
                cx.cong().cwnd_update_after_timeout(number, transmit_ts, last);
                self.window = cx.cong().window();
            }
            cur = next;
        }

        cx.wmem_refund(freed);
        self.update_loss_timer(cx, level);
        count
    }

    /// Returns an unlinked frame to its origin pending queue
    ///
    /// Byte-bearing frames go back to the stream queue, everything else
    /// to the control queue. Placement keeps earlier epochs first; within
    /// an epoch a loss return replays ahead of fresh frames and in offset
    /// order among other loss returns.
    pub(super) fn retransmit_one<C: Context>(&mut self, cx: &mut C, id: FrameId) {
        let (frame_bytes, stream_id, priority, offset) = {
            let frame = self.arena.get(id);
            (
                frame.bytes,
                frame.stream,
                frame.level.priority(),
                frame.offset,
            )
        };

        let into_stream = frame_bytes > 0;
        if into_stream {
            if let Some(stream_id) = stream_id {
                if let Some(stream) = cx.streams().get_mut(stream_id) {
                    stream.frags -= 1;
                    stream.bytes -= frame_bytes as u64;
                }
            }
            self.bytes -= frame_bytes as u64;
        }

        let list = if into_stream {
            &mut self.stream
        } else {
            &mut self.control
        };
        let mut before = None;
        let mut pos = list.head();
        while let Some(at) = pos {
            let peer = self.arena.get(at);
            let peer_priority = peer.level.priority();
            if peer_priority < priority {
                pos = list.next(&self.arena, at);
                continue;
            }
            if peer_priority > priority || peer.number.is_none() || offset < peer.offset {
                before = Some(at);
                break;
            }
            pos = list.next(&self.arena, at);
        }
        match before {
            Some(at) => list.insert_before(&mut self.arena, id, at),
            None => list.push_back(&mut self.arena, id),
        }
    }

    /// Returns an externally drained list of transmitted frames (such as
    /// a discarded key epoch's) to the pending queues
    ///
    /// Unlike [`retransmit_mark`](Self::retransmit_mark) this has no
    /// timer or congestion effects.
    pub fn retransmit_list<C: Context>(
        &mut self,
        cx: &mut C,
        frames: impl IntoIterator<Item = Frame>,
    ) {
        let mut freed = 0;
        for frame in frames {
            self.data_inflight -= frame.bytes;
            if frame.tag.is_dgram() {
                freed += frame.bytes;
                continue;
            }
            let id = self.arena.insert(frame);
            self.retransmit_one(cx, id);
        }
        cx.wmem_refund(freed);
    }

    /// Re-arms the loss timer for `level`
    pub fn update_loss_timer<C: Context>(&mut self, cx: &mut C, level: Level) {
        let now = cx.now();
        let (loss_ts, inflight, last_sent) = {
            let pnmap = cx.pnmap(level);
            (pnmap.loss_ts(), pnmap.inflight(), pnmap.last_sent_ts())
        };

        let deadline = match loss_ts {
            Some(deadline) => deadline,
            None => {
                if inflight == 0 {
                    return cx.timers().stop(level.into());
                }
                let backoff = cx.cong().duration() * (1 + self.rtx_count);
                last_sent.unwrap_or(now) + backoff
            }
        };

        let deadline = deadline.max(now + Duration::from_micros(1));
        cx.timers().reduce(level.into(), deadline - now);
    }

    /// Called when a level's loss timer fires without a specific lost
    /// packet: transmit what is pending, fall back to marking loss, and
    /// as a last resort probe with a PING
    pub fn transmit_one<C: Context>(&mut self, cx: &mut C, level: Level) {
        cx.builder().set_filter(level);
        let mut sent = self.transmit(cx) > 0;

        if !sent && self.retransmit_mark(cx, level, false) > 0 {
            cx.builder().set_filter(level);
            sent = self.transmit(cx) > 0;
        }

        if !sent {
            tracing::debug!(?level, "probe timeout with nothing to send; pinging");
            self.ctrl_tail(cx, Frame::ping_probe(level, MIN_UDP_PAYLOAD), false);
        }

        self.rtx_count += 1;
        self.update_loss_timer(cx, level);
    }
}
