// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Acknowledgement processing.
//!
//! An acknowledgement releases transmitted frames, drives stream send
//! states to their terminal states, feeds the congestion controller and
//! confirms outstanding path-MTU probes.

use crate::{
    congestion::Controller as _,
    context::Context,
    crypto::{KeyChain as _, Level},
    event::{Event, StreamUpdate, Subscriber as _},
    frame::Tag,
    packet::Builder as _,
    path::Manager as _,
    pnmap::Map as _,
    stream::{send::Sender, StreamSet as _},
    time::Duration,
    timers::{self, Scheduler as _},
};

use super::OutQueue;

impl OutQueue {
    /// Processes an acknowledgement covering packet numbers in
    /// `[smallest, largest]`, with `ack_largest` the largest directly
    /// acked number; returns the number of payload bytes released
    pub fn transmitted_sack<C: Context>(
        &mut self,
        cx: &mut C,
        level: Level,
        largest: u64,
        smallest: u64,
        ack_largest: u64,
        ack_delay: Duration,
    ) -> usize {
        tracing::debug!(?level, largest, smallest, "processing acknowledgement");

        if cx.path().pl_confirm(largest, smallest) {
            let info = cx.path().pl_recv();
            if let Some(pathmtu) = info.pathmtu {
                let taglen = cx.builder().taglen();
                cx.builder().mss_update(pathmtu as usize + taglen);
            }
            if !info.complete {
                self.transmit_probe(cx);
            }
            if info.raise_timer {
                // reuse the probe timer as a raise timer
                let timeout = cx.probe_timeout() * 30;
                cx.timers().reset(timers::Id::Path, timeout);
            }
        }

        let mut acked_bytes = 0usize;
        let mut acked_number = None;
        let mut acked_ts = None;

        let mut cur = self.transmitted.tail();
        while let Some(id) = cur {
            let prev = self.transmitted.prev(&self.arena, id);
            let (frame_level, number, transmit_ts, tag, stream_id, frame_bytes, frame_len, ecn) = {
                let frame = self.arena.get(id);
                (
                    frame.level,
                    frame.number,
                    frame.transmit_ts,
                    frame.tag.clone(),
                    frame.stream,
                    frame.bytes,
                    frame.len,
                    frame.ecn,
                )
            };
            if frame_level != level {
                cur = prev;
                continue;
            }
            let Some(number) = number else {
                debug_assert!(false, "transmitted frame without a number");
                cur = prev;
                continue;
            };
            if number > largest {
                cur = prev;
                continue;
            }
            if number < smallest {
                break;
            }

            let transmit_ts = transmit_ts.unwrap_or_else(|| cx.now());
            if number == ack_largest {
                let now = cx.now();
                cx.cong().rtt_update(now, transmit_ts, ack_delay);
                let rto = cx.cong().rto();
                cx.pnmap_mut(level).set_max_record_ts(rto * 2);
                cx.keys_mut().set_key_update_ts(level, rto * 2);
            }
            if acked_number.is_none() {
                acked_number = Some(number);
                acked_ts = Some(transmit_ts);
            }

            if ecn {
                cx.set_ecn_ect0();
            }

            if frame_bytes > 0 {
                if let Some(stream_id) = stream_id {
                    let mut deliver = false;
                    if let Some(stream) = cx.streams().get_mut(stream_id) {
                        stream.frags -= 1;
                        deliver = stream.frags == 0 && stream.state.is_data_sent();
                    }
                    if deliver {
                        let update = StreamUpdate {
                            id: stream_id,
                            state: Sender::DataRecvd,
                            errcode: 0,
                        };
                        if cx.events().event_recv(&Event::StreamUpdate(update)) {
                            // the user is not ready for the transition;
                            // leave the frame for the next acknowledgement
                            if let Some(stream) = cx.streams().get_mut(stream_id) {
                                stream.frags += 1;
                            }
                            cur = prev;
                            continue;
                        }
                        if let Some(stream) = cx.streams().get_mut(stream_id) {
                            let _ = stream.state.on_recv_all_acks();
                        }
                    }
                }
            } else {
                match tag {
                    Tag::ResetStream { .. } => {
                        if let Some(stream_id) = stream_id {
                            let errcode =
                                cx.streams().get(stream_id).map_or(0, |s| s.errcode());
                            let update = StreamUpdate {
                                id: stream_id,
                                state: Sender::ResetRecvd,
                                errcode,
                            };
                            if cx.events().event_recv(&Event::StreamUpdate(update)) {
                                cur = prev;
                                continue;
                            }
                            if let Some(stream) = cx.streams().get_mut(stream_id) {
                                let _ = stream.state.on_recv_reset_ack();
                            }
                        }
                    }
                    Tag::StreamDataBlocked { .. } => {
                        if let Some(stream_id) = stream_id {
                            if let Some(stream) = cx.streams().get_mut(stream_id) {
                                stream.data_blocked = false;
                            }
                        }
                    }
                    Tag::DataBlocked { .. } => {
                        self.data_blocked = false;
                    }
                    _ => {}
                }
            }

            cx.pnmap_mut(level).set_max_pn_acked(number);
            acked_bytes += frame_bytes;

            cx.pnmap_mut(level).dec_inflight(frame_len);
            self.data_inflight -= frame_bytes;
            self.inflight -= frame_len;
            self.transmitted.unlink(&mut self.arena, id);
            let refund = self.arena.remove(id).bytes;
            cx.wmem_refund(refund);
            cur = prev;
        }

        self.rtx_count = 0;
        if acked_bytes > 0 {
            let number = acked_number.unwrap_or(ack_largest);
            let transmit_ts = acked_ts.unwrap_or_else(|| cx.now());
            cx.cong().cwnd_update_after_sack(
                number,
                transmit_ts,
                acked_bytes,
                self.data_inflight.get(),
            );
            self.window = cx.cong().window();
        }
        acked_bytes
    }
}
