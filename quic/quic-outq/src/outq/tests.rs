// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::OutQueue;
use crate::{
    connection::{State, APPLICATION_ERROR},
    crypto::Level,
    event::Event,
    frame::{Frame, Tag},
    packet::EncryptedPacket,
    path::{PathAlt, PlInfo},
    stream::{send::Sender, StreamSet as _},
    testing::{Endpoint, TimerOp},
    time::Duration,
    timers,
};
use bolero::check;
use bytes::Bytes;

fn payload(len: usize) -> Bytes {
    Bytes::from(vec![7u8; len])
}

fn established() -> (Endpoint, OutQueue) {
    let mut outq = OutQueue::new();
    outq.set_max_bytes(1 << 20);
    (Endpoint::new(), outq)
}

/// Checks the counter invariants against the transmitted queue
fn assert_consistent(outq: &OutQueue, env: &Endpoint) {
    let data: usize = outq.transmitted_frames().map(|f| f.bytes()).sum();
    assert_eq!(outq.data_inflight(), data, "data_inflight out of sync");

    let wire: usize = outq.transmitted_frames().map(|f| f.len()).sum();
    assert_eq!(outq.inflight(), wire, "inflight out of sync");

    for stream in env.streams.iter() {
        let frags = outq
            .transmitted_frames()
            .filter(|f| f.stream_id() == Some(stream.id()) && f.bytes() > 0)
            .count();
        assert_eq!(
            stream.frags(),
            frags,
            "frags out of sync for stream {}",
            stream.id()
        );
    }
}

#[test]
fn backpressure_emits_stream_data_blocked() {
    let (mut env, mut outq) = established();
    let id = env.stream(4, 1000);
    env.streams.get_mut(id).unwrap().bytes = 900;

    outq.stream_tail(&mut env, Frame::stream(id, 900, payload(200), false), false);

    // the data frame stays pending
    assert_eq!(outq.stream_frames().count(), 1);
    assert_eq!(outq.bytes(), 0);

    // the advertisement was queued and packetized right away
    let advert: Vec<_> = outq
        .transmitted_frames()
        .filter(|f| matches!(f.tag(), Tag::StreamDataBlocked { limit: 1000 }))
        .collect();
    assert_eq!(advert.len(), 1);
    assert!(env
        .builder
        .emitted()
        .any(|f| matches!(f.tag, Tag::StreamDataBlocked { .. })));

    let stream = env.streams.get(id).unwrap();
    assert!(stream.is_data_blocked());
    assert_eq!(stream.last_max_bytes(), 1000);
    assert_consistent(&outq, &env);
}

#[test]
fn ack_releases_frame_and_drives_state() {
    let (mut env, mut outq) = established();
    let id = env.stream(4, 1 << 20);
    env.builder.next_number = 42;

    outq.stream_tail(&mut env, Frame::stream(id, 0, payload(500), true), true);
    assert_eq!(outq.transmit(&mut env), 1);

    {
        let stream = env.streams.get(id).unwrap();
        assert!(stream.state().is_data_sent());
        assert_eq!(stream.frags(), 1);
    }
    assert_eq!(outq.data_inflight(), 500);
    assert_consistent(&outq, &env);

    let acked = outq.transmitted_sack(&mut env, Level::App, 42, 42, 42, Duration::ZERO);

    assert_eq!(acked, 500);
    assert_eq!(outq.data_inflight(), 0);
    assert_eq!(outq.transmitted_frames().count(), 0);
    assert_eq!(outq.rtx_count(), 0);

    let stream = env.streams.get(id).unwrap();
    assert_eq!(stream.frags(), 0);
    assert!(stream.state().is_data_received());

    assert!(env.events.received.iter().any(|event| matches!(
        event,
        Event::StreamUpdate(update) if update.state == Sender::DataRecvd
    )));

    // the congestion controller saw the batch
    assert_eq!(env.cong.rtt_updates.len(), 1);
    assert_eq!(env.cong.sacks.len(), 1);
    let (number, _, bytes, inflight) = env.cong.sacks[0];
    assert_eq!((number, bytes, inflight), (42, 500, 0));
    assert_consistent(&outq, &env);
}

#[test]
fn loss_returns_frames_in_offset_order() {
    let (mut env, mut outq) = established();
    let id = env.stream(4, 1 << 20);

    for offset in [0u64, 100, 200] {
        outq.stream_tail(&mut env, Frame::stream(id, offset, payload(100), false), true);
    }
    outq.transmit(&mut env);
    assert_eq!(outq.transmitted_frames().count(), 3);
    assert_eq!(outq.bytes(), 300);

    // age every frame past the RTO with the ack horizon far ahead
    env.advance(Duration::from_millis(200));
    env.pnmaps[Level::App.index()].max_pn_acked = 100;
    env.pnmaps[Level::App.index()].next_number = 101;

    let count = outq.retransmit_mark(&mut env, Level::App, false);

    assert_eq!(count, 3);
    assert_eq!(outq.transmitted_frames().count(), 0);
    let offsets: Vec<u64> = outq.stream_frames().map(|f| f.offset()).collect();
    assert_eq!(offsets, [0, 100, 200]);

    assert_eq!(env.streams.get(id).unwrap().frags(), 0);
    assert_eq!(outq.bytes(), 0);
    assert_eq!(outq.data_inflight(), 0);
    assert_eq!(env.cong.timeouts.len(), 3);
    assert_consistent(&outq, &env);
}

#[test]
fn pto_probes_with_ping() {
    let (mut env, mut outq) = established();

    outq.transmit_one(&mut env, Level::App);

    let pings: Vec<_> = env
        .builder
        .emitted()
        .filter(|f| f.tag.is_ping())
        .collect();
    assert_eq!(pings.len(), 1);
    assert_eq!(pings[0].level, Level::App);

    assert_eq!(outq.rtx_count(), 1);

    // the loss timer backs off with the recovery epoch count
    let backoff = env.cong.duration * 2;
    assert_eq!(
        env.timers.last_for(timers::Id::LossApp),
        Some(TimerOp::Reduce(backoff))
    );
    assert!(env.timers.timer(timers::Id::LossApp).is_armed());
    let deadline = env.now + backoff;
    assert_eq!(env.timers.poll_expired(deadline), [timers::Id::LossApp]);
}

#[test]
fn handshake_frames_jump_ahead_of_app_control() {
    let (mut env, mut outq) = established();

    outq.ctrl_tail(&mut env, Frame::ack(Level::App, 9), true);
    outq.ctrl_tail(
        &mut env,
        Frame::crypto(Level::Initial, 0, Bytes::from_static(b"ch")),
        true,
    );

    let queued: Vec<Level> = outq.control_frames().map(|f| f.level()).collect();
    assert_eq!(queued, [Level::Initial, Level::App]);

    outq.transmit(&mut env);
    let emitted: Vec<Level> = env.builder.emitted().map(|f| f.level).collect();
    assert_eq!(emitted, [Level::Initial, Level::App]);
}

#[test]
fn path_validation_clears_alt_bits() {
    let (mut env, mut outq) = established();

    for _ in 0..5 {
        outq.ctrl_tail(
            &mut env,
            Frame::ping(Level::App).with_path_alt(PathAlt::DST),
            true,
        );
    }
    outq.transmit(&mut env);
    assert_eq!(outq.transmitted_frames().count(), 5);

    let mut trigger = Frame::ping(Level::App).with_path_alt(PathAlt::DST);
    outq.validate_path(&mut env, &mut trigger, false);

    assert!(outq
        .transmitted_frames()
        .all(|f| !f.path_alt().contains(PathAlt::DST)));
    assert!(!trigger.path_alt().contains(PathAlt::DST));

    assert_eq!(
        env.timers.last_for(timers::Id::Path),
        Some(TimerOp::Reset(env.probe_timeout))
    );
    assert!(env.timers.timer(timers::Id::Path).is_armed());
    assert_eq!(env.path.frees, 1);
    assert_eq!(env.path.swaps, 0);
    assert_eq!(env.addrs_set, [false]);
    assert_eq!(env.builder.ecn_probes, [0]);
}

#[test]
fn local_path_validation_swaps_active() {
    let (mut env, mut outq) = established();
    outq.ctrl_tail(
        &mut env,
        Frame::ping(Level::App).with_path_alt(PathAlt::SRC | PathAlt::DST),
        true,
    );

    let mut trigger = Frame::ping(Level::App).with_path_alt(PathAlt::SRC);
    outq.validate_path(&mut env, &mut trigger, true);

    assert_eq!(env.path.swaps, 1);
    assert_eq!(env.addrs_set, [true]);
    // only the source bit clears
    let frame = outq.control_frames().next().unwrap();
    assert!(!frame.path_alt().contains(PathAlt::SRC));
    assert!(frame.path_alt().contains(PathAlt::DST));
}

#[test]
fn handled_migration_event_suppresses_default() {
    let (mut env, mut outq) = established();
    env.events.handle_migration = true;

    let mut trigger = Frame::ping(Level::App).with_path_alt(PathAlt::DST);
    outq.validate_path(&mut env, &mut trigger, false);

    assert_eq!(env.path.frees, 0);
    assert!(trigger.path_alt().contains(PathAlt::DST));
    assert!(env.timers.ops.is_empty());
}

#[test]
fn transmit_is_idempotent() {
    let (mut env, mut outq) = established();
    let id = env.stream(4, 1 << 20);

    outq.stream_tail(&mut env, Frame::stream(id, 0, payload(100), false), true);
    assert_eq!(outq.transmit(&mut env), 1);
    assert_eq!(outq.transmit(&mut env), 0);
    assert_eq!(env.builder.packets.len(), 1);
    assert_consistent(&outq, &env);
}

#[test]
fn control_levels_transmit_in_epoch_order() {
    let (mut env, mut outq) = established();

    outq.ctrl_tail(&mut env, Frame::ping(Level::App), true);
    outq.ctrl_tail(
        &mut env,
        Frame::crypto(Level::Handshake, 0, Bytes::from_static(b"fin")),
        true,
    );
    outq.ctrl_tail(
        &mut env,
        Frame::crypto(Level::Initial, 0, Bytes::from_static(b"ch")),
        true,
    );
    outq.ctrl_tail(&mut env, Frame::ack(Level::Handshake, 5), true);

    outq.transmit(&mut env);

    let emitted: Vec<Level> = env.builder.emitted().map(|f| f.level).collect();
    assert_eq!(
        emitted,
        [Level::Initial, Level::Handshake, Level::Handshake, Level::App]
    );
    // FIFO within the handshake level
    assert!(matches!(env.builder.emitted().nth(1).unwrap().tag, Tag::Crypto));
}

#[test]
#[cfg_attr(miri, ignore)]
fn control_level_order_holds_for_any_enqueue_order() {
    check!()
        .with_type::<Vec<u8>>()
        .cloned()
        .for_each(|seq: Vec<u8>| {
            let (mut env, mut outq) = established();
            for byte in seq.iter().take(12) {
                let level = match byte % 3 {
                    0 => Level::Initial,
                    1 => Level::Handshake,
                    _ => Level::App,
                };
                outq.ctrl_tail(&mut env, Frame::ping(level), true);
            }
            outq.transmit(&mut env);

            let priorities: Vec<u8> =
                env.builder.emitted().map(|f| f.level.priority()).collect();
            let mut sorted = priorities.clone();
            sorted.sort_unstable();
            assert_eq!(priorities, sorted);
        });
}

#[test]
fn datagrams_respect_congestion_window() {
    let (mut env, mut outq) = established();
    outq.set_window(50);

    outq.dgram_tail(&mut env, Frame::datagram(payload(100)), false);
    assert_eq!(outq.datagram_frames().count(), 1);
    assert!(env.builder.packets.is_empty());

    outq.set_window(1000);
    assert_eq!(outq.transmit(&mut env), 1);
    assert_eq!(outq.datagram_frames().count(), 0);
    assert_eq!(outq.data_inflight(), 100);
    assert_consistent(&outq, &env);
}

#[test]
fn lost_datagrams_are_dropped_with_refund() {
    let (mut env, mut outq) = established();

    outq.dgram_tail(&mut env, Frame::datagram(payload(100)), false);
    assert_eq!(outq.transmitted_frames().count(), 1);
    assert_eq!(env.wmem_charged, 100);

    env.advance(Duration::from_millis(200));
    let requeued = outq.retransmit_mark(&mut env, Level::App, false);

    assert_eq!(requeued, 0);
    assert_eq!(outq.transmitted_frames().count(), 0);
    assert_eq!(outq.datagram_frames().count(), 0);
    assert_eq!(env.wmem_refunded, 100);
    assert_eq!(outq.data_inflight(), 0);
    assert_consistent(&outq, &env);
}

#[test]
fn immediate_mark_empties_level() {
    let (mut env, mut outq) = established();
    let id = env.stream(4, 1 << 20);

    outq.stream_tail(&mut env, Frame::stream(id, 0, payload(100), false), true);
    outq.stream_tail(&mut env, Frame::stream(id, 100, payload(100), false), true);
    outq.ctrl_tail(&mut env, Frame::ping(Level::App), true);
    outq.transmit(&mut env);
    assert_eq!(outq.transmitted_frames().count(), 3);

    let requeued = outq.retransmit_mark(&mut env, Level::App, true);

    assert_eq!(requeued, 3);
    assert_eq!(outq.transmitted_frames().count(), 0);
    assert_eq!(outq.stream_frames().count(), 2);
    assert_eq!(outq.control_frames().count(), 1);
    assert_eq!(outq.data_inflight(), 0);
    assert_eq!(outq.inflight(), 0);
    assert_consistent(&outq, &env);
}

#[test]
fn round_trip_ack_releases_everything() {
    let (mut env, mut outq) = established();
    let id = env.stream(4, 1 << 20);

    outq.stream_tail(&mut env, Frame::stream(id, 0, payload(100), false), true);
    outq.stream_tail(&mut env, Frame::stream(id, 100, payload(100), false), true);
    outq.stream_tail(&mut env, Frame::stream(id, 200, payload(100), true), true);
    assert_eq!(outq.transmit(&mut env), 1);
    assert_eq!(outq.bytes(), 300);

    let acked = outq.transmitted_sack(&mut env, Level::App, 0, 0, 0, Duration::ZERO);

    assert_eq!(acked, 300);
    // acknowledgement releases frames without rolling back sent bytes
    assert_eq!(outq.bytes(), 300);
    assert_eq!(outq.data_inflight(), 0);
    assert_eq!(outq.inflight(), 0);
    assert!(env.streams.get(id).unwrap().state().is_data_received());
    assert_consistent(&outq, &env);
}

#[test]
fn stream_update_refusal_keeps_frame() {
    let (mut env, mut outq) = established();
    let id = env.stream(4, 1 << 20);
    env.events.handle_stream_update = true;

    outq.stream_tail(&mut env, Frame::stream(id, 0, payload(100), true), false);
    assert_eq!(outq.transmitted_frames().count(), 1);

    let acked = outq.transmitted_sack(&mut env, Level::App, 0, 0, 0, Duration::ZERO);

    // the user refused the transition; the frame stays for the next ack
    assert_eq!(acked, 0);
    assert_eq!(outq.transmitted_frames().count(), 1);
    let stream = env.streams.get(id).unwrap();
    assert_eq!(stream.frags(), 1);
    assert!(stream.state().is_data_sent());
    assert_consistent(&outq, &env);

    env.events.handle_stream_update = false;
    let acked = outq.transmitted_sack(&mut env, Level::App, 0, 0, 0, Duration::ZERO);
    assert_eq!(acked, 100);
    assert!(env.streams.get(id).unwrap().state().is_data_received());
    assert_consistent(&outq, &env);
}

#[test]
fn reset_stream_ack_transitions_state() {
    let (mut env, mut outq) = established();
    let id = env.stream(4, 1 << 20);
    {
        let stream = env.streams.get_mut(id).unwrap();
        stream.set_errcode(9);
        stream.state.on_send_reset().unwrap();
    }

    outq.ctrl_tail(&mut env, Frame::reset_stream(id, 9, 0), false);
    assert_eq!(outq.transmitted_frames().count(), 1);

    outq.transmitted_sack(&mut env, Level::App, 0, 0, 0, Duration::ZERO);

    assert!(env.streams.get(id).unwrap().state().is_reset_received());
    assert!(env.events.received.iter().any(|event| matches!(
        event,
        Event::StreamUpdate(update)
            if update.state == Sender::ResetRecvd && update.errcode == 9
    )));
    assert_eq!(outq.transmitted_frames().count(), 0);
}

#[test]
fn blocked_advertisements_clear_on_ack() {
    let (mut env, mut outq) = established();
    outq.set_max_bytes(60);
    let id = env.stream(4, 50);

    outq.stream_tail(&mut env, Frame::stream(id, 0, payload(100), false), false);

    assert!(outq.is_data_blocked());
    assert!(env.streams.get(id).unwrap().is_data_blocked());
    // both advertisements share the flushed packet
    assert_eq!(outq.transmitted_frames().count(), 2);

    outq.transmitted_sack(&mut env, Level::App, 0, 0, 0, Duration::ZERO);

    assert!(!outq.is_data_blocked());
    assert!(!env.streams.get(id).unwrap().is_data_blocked());
    assert_consistent(&outq, &env);
}

#[test]
fn full_packet_is_flushed_and_frame_retried() {
    let (mut env, mut outq) = established();
    env.builder.mtu = 120;
    let id = env.stream(4, 1 << 20);

    outq.stream_tail(&mut env, Frame::stream(id, 0, payload(100), false), true);
    outq.stream_tail(&mut env, Frame::stream(id, 100, payload(100), false), true);

    assert_eq!(outq.transmit(&mut env), 2);
    assert_eq!(env.builder.packets.len(), 2);
    assert_eq!(env.builder.packets[0].frames.len(), 1);
    assert_eq!(env.builder.packets[1].frames.len(), 1);

    let numbers: Vec<_> = outq.transmitted_frames().map(|f| f.number()).collect();
    assert_eq!(numbers, [Some(0), Some(1)]);
    assert_consistent(&outq, &env);
}

#[test]
fn loss_timer_arms_to_loss_deadline() {
    let (mut env, mut outq) = established();
    env.pnmaps[Level::App.index()].loss_ts = Some(env.now + Duration::from_millis(50));

    outq.update_loss_timer(&mut env, Level::App);

    assert_eq!(
        env.timers.last_for(timers::Id::LossApp),
        Some(TimerOp::Reduce(Duration::from_millis(50)))
    );

    // the armed deadline fires once the clock reaches it
    let early = env.now + Duration::from_millis(49);
    assert!(env.timers.poll_expired(early).is_empty());
    let deadline = env.now + Duration::from_millis(50);
    assert_eq!(env.timers.poll_expired(deadline), [timers::Id::LossApp]);
}

#[test]
fn loss_timer_clamps_past_deadlines() {
    let (mut env, mut outq) = established();
    env.pnmaps[Level::App.index()].loss_ts = Some(env.now);

    outq.update_loss_timer(&mut env, Level::App);

    assert_eq!(
        env.timers.last_for(timers::Id::LossApp),
        Some(TimerOp::Reduce(Duration::from_micros(1)))
    );
}

#[test]
fn loss_timer_stops_without_inflight() {
    let (mut env, mut outq) = established();

    outq.update_loss_timer(&mut env, Level::Handshake);

    assert_eq!(
        env.timers.last_for(timers::Id::LossHandshake),
        Some(TimerOp::Stop)
    );
    assert!(!env.timers.timer(timers::Id::LossHandshake).is_armed());
}

#[test]
fn stream_purge_removes_frames_and_refunds() {
    let (mut env, mut outq) = established();
    let purged = env.stream(4, 1 << 20);
    let kept = env.stream(8, 1 << 20);

    outq.stream_tail(&mut env, Frame::stream(purged, 0, payload(100), false), true);
    outq.stream_tail(&mut env, Frame::stream(kept, 0, payload(50), false), true);
    outq.transmit(&mut env);
    outq.stream_tail(&mut env, Frame::stream(purged, 100, payload(100), false), true);

    let refunded_before = env.wmem_refunded;
    outq.stream_purge(&mut env, purged);

    assert!(outq
        .transmitted_frames()
        .chain(outq.stream_frames())
        .all(|f| f.stream_id() != Some(purged)));
    assert_eq!(env.wmem_refunded - refunded_before, 200);
    assert_eq!(outq.data_inflight(), 50);

    // purge drops the bookkeeping for the gone stream's fragments
    env.streams.remove(purged);
    assert_consistent(&outq, &env);
}

#[test]
fn close_emits_frame_and_closes() {
    let (mut env, mut outq) = established();
    outq.set_close_phrase(Some("went away".into()));

    outq.transmit_close(&mut env, 0x06, 0x0a, Level::App);

    assert_eq!(env.state, State::Closed);
    assert_eq!(outq.close_errcode(), 0x0a);
    assert_eq!(outq.close_frame(), 0x06);
    assert!(env.builder.emitted().any(|f| matches!(
        f.tag,
        Tag::ConnectionClose {
            app: false,
            errcode: 0x0a,
            frame_type: 0x06,
        }
    )));
    assert!(env
        .events
        .received
        .iter()
        .any(|event| matches!(event, Event::ConnectionClose(_))));
}

#[test]
fn close_with_zero_errcode_is_noop() {
    let (mut env, mut outq) = established();

    outq.transmit_close(&mut env, 0x06, 0, Level::App);

    assert_eq!(env.state, State::Established);
    assert!(env.builder.packets.is_empty());
    assert!(env.events.received.is_empty());
}

#[test]
fn handled_close_event_suppresses_emission_but_records() {
    let (mut env, mut outq) = established();
    env.events.handle_close = true;

    outq.transmit_close(&mut env, 0x06, 0x0a, Level::App);

    assert_eq!(env.state, State::Established);
    assert!(env.builder.packets.is_empty());
    // the error is still recorded for diagnostics
    assert_eq!(outq.close_errcode(), 0x0a);
    assert_eq!(outq.close_frame(), 0x06);
}

#[test]
fn app_close_depends_on_connection_state() {
    // established: application close at the application level
    let (mut env, mut outq) = established();
    outq.transmit_app_close(&mut env);
    assert!(env
        .builder
        .emitted()
        .any(|f| matches!(f.tag, Tag::ConnectionClose { app: true, .. })
            && f.level == Level::App));

    // establishing: transport close at the initial level
    let (mut env, mut outq) = established();
    env.state = State::Establishing;
    outq.transmit_app_close(&mut env);
    assert_eq!(outq.close_errcode(), APPLICATION_ERROR);
    assert!(env
        .builder
        .emitted()
        .any(|f| matches!(f.tag, Tag::ConnectionClose { app: false, .. })
            && f.level == Level::Initial));

    // closed: nothing at all
    let (mut env, mut outq) = established();
    env.state = State::Closed;
    outq.transmit_app_close(&mut env);
    assert!(env.builder.packets.is_empty());
}

#[test]
fn probe_pings_and_arms_path_timer() {
    let (mut env, mut outq) = established();
    env.path.probe_size = 1400;
    env.path.pl_send_mtu = Some(1400);
    env.pnmaps[Level::App.index()].next_number = 7;

    outq.transmit_probe(&mut env);

    assert!(env.builder.emitted().any(|f| matches!(
        f.tag,
        Tag::Ping {
            probe_size: Some(1400)
        }
    )));
    assert_eq!(env.path.pl_sends, [7]);
    assert_eq!(env.builder.mss_updates, [1400 + 16]);
    assert_eq!(
        env.timers.last_for(timers::Id::Path),
        Some(TimerOp::Reset(env.probe_timeout))
    );
}

#[test]
fn probe_requires_established_connection() {
    let (mut env, mut outq) = established();
    env.state = State::Establishing;

    outq.transmit_probe(&mut env);

    assert!(env.builder.packets.is_empty());
    assert!(env.timers.ops.is_empty());
}

#[test]
fn ack_confirms_path_probe() {
    let (mut env, mut outq) = established();
    env.path.confirm = true;
    env.path.recv = PlInfo {
        pathmtu: Some(1400),
        raise_timer: true,
        complete: false,
    };

    outq.ctrl_tail(&mut env, Frame::ping(Level::App), false);
    outq.transmitted_sack(&mut env, Level::App, 0, 0, 0, Duration::ZERO);

    // the confirmed probe raised the MSS and triggered the next probe
    assert_eq!(env.builder.mss_updates, [1400 + 16]);
    assert!(env
        .timers
        .ops
        .contains(&(timers::Id::Path, TimerOp::Reset(env.probe_timeout))));
    // the parked search stretched the probe timer into a raise timer
    assert_eq!(
        env.timers.last_for(timers::Id::Path),
        Some(TimerOp::Reset(env.probe_timeout * 30))
    );
}

#[test]
fn set_param_applies_side_effects() {
    let (mut env, mut outq) = established();
    env.disable_1rtt = true;
    env.max_idle_timeout = Some(Duration::from_secs(60));

    let params = crate::params::TransportParameters {
        max_data: 1000,
        max_datagram_frame_size: 1200,
        max_idle_timeout: Some(Duration::from_secs(30)),
        disable_1rtt_encryption: true,
        ..Default::default()
    };
    outq.set_param(&mut env, &params);

    assert_eq!(outq.max_bytes(), 1000);
    assert_eq!(env.sndbuf, 2000);
    assert_eq!(outq.max_datagram_frame_size(), 1200);
    // the smaller enforced idle timeout wins
    assert_eq!(env.max_idle_timeout, Some(Duration::from_secs(30)));
    // both sides disabled 1-RTT protection
    assert_eq!(env.builder.taglen, 0);
}

#[test]
fn set_param_keeps_smaller_local_idle_timeout() {
    let (mut env, mut outq) = established();
    env.max_idle_timeout = Some(Duration::from_secs(10));

    let params = crate::params::TransportParameters {
        max_idle_timeout: Some(Duration::from_secs(30)),
        ..Default::default()
    };
    outq.set_param(&mut env, &params);

    assert_eq!(env.max_idle_timeout, Some(Duration::from_secs(10)));
    // only one side disabled 1-RTT protection
    assert_eq!(env.builder.taglen, 16);
}

#[test]
fn encrypted_worker_drains_queue() {
    let (mut env, mut outq) = established();
    let handle = outq.encrypted();

    let packet = EncryptedPacket {
        level: Level::App,
        path_alt: PathAlt::NONE,
        payload: Bytes::from_static(b"sealed"),
    };
    assert!(handle.tail(packet.clone()));
    assert!(!handle.tail(packet));

    outq.encrypted_work(&mut env);

    assert_eq!(env.builder.xmitted.len(), 2);
    assert!(env.builder.xmitted.iter().all(|(_, resume)| *resume));
    assert!(handle.is_empty());
}

#[test]
fn encrypted_worker_purges_when_closed() {
    let (mut env, mut outq) = established();
    env.state = State::Closed;
    let handle = outq.encrypted();

    handle.tail(EncryptedPacket {
        level: Level::App,
        path_alt: PathAlt::NONE,
        payload: Bytes::from_static(b"sealed"),
    });
    outq.encrypted_work(&mut env);

    assert!(env.builder.xmitted.is_empty());
    assert!(handle.is_empty());
}

#[test]
fn external_list_returns_to_pending() {
    let (mut env, mut outq) = established();

    // a datagram in flight keeps the payload accounting non-zero
    outq.dgram_tail(&mut env, Frame::datagram(payload(100)), false);
    assert_eq!(outq.data_inflight(), 100);

    let mut crypto = Frame::crypto(Level::Handshake, 0, Bytes::from_static(b"fin"));
    crypto.number = Some(3);
    let mut dgram = Frame::datagram(payload(100));
    dgram.number = Some(4);

    let refunded_before = env.wmem_refunded;
    outq.retransmit_list(&mut env, [crypto, dgram]);

    // the crypto frame is pending again; the datagram is gone
    assert!(outq
        .control_frames()
        .any(|f| matches!(f.tag(), Tag::Crypto) && f.level() == Level::Handshake));
    assert_eq!(env.wmem_refunded - refunded_before, 100);
    assert_eq!(outq.data_inflight(), 0);
}

#[test]
fn crypto_not_ready_stops_control_phase() {
    let (mut env, mut outq) = established();
    env.keys.ready[Level::Initial.index()] = false;

    outq.ctrl_tail(
        &mut env,
        Frame::crypto(Level::Initial, 0, Bytes::from_static(b"ch")),
        true,
    );
    outq.ctrl_tail(&mut env, Frame::ack(Level::App, 9), true);

    assert_eq!(outq.transmit(&mut env), 0);
    assert_eq!(outq.control_frames().count(), 2);

    env.keys.ready[Level::Initial.index()] = true;
    assert_eq!(outq.transmit(&mut env), 1);
    assert_eq!(outq.control_frames().count(), 0);
}

#[test]
fn builder_filter_skips_other_levels() {
    let (mut env, mut outq) = established();
    env.builder.filter = Some(Level::App);

    outq.ctrl_tail(
        &mut env,
        Frame::crypto(Level::Initial, 0, Bytes::from_static(b"ch")),
        true,
    );
    outq.ctrl_tail(&mut env, Frame::ack(Level::App, 9), true);
    outq.transmit(&mut env);

    let emitted: Vec<Level> = env.builder.emitted().map(|f| f.level).collect();
    assert_eq!(emitted, [Level::App]);
    // the filtered frame is still pending
    assert_eq!(outq.control_frames().count(), 1);
}

#[test]
fn builder_block_stops_stream_phase() {
    let (mut env, mut outq) = established();
    env.builder.blocked.push(Level::App);
    let id = env.stream(4, 1 << 20);

    outq.stream_tail(&mut env, Frame::stream(id, 0, payload(100), false), false);

    assert!(env.builder.packets.is_empty());
    assert_eq!(outq.stream_frames().count(), 1);
}

#[test]
fn stream_tail_drives_send_state() {
    let (mut env, mut outq) = established();
    let id = env.stream(4, 1 << 20);
    env.streams.set_send_active(Some(id));

    outq.stream_tail(&mut env, Frame::stream(id, 0, payload(10), false), true);
    assert!(env.streams.get(id).unwrap().state().is_sending());
    assert_eq!(env.streams.send_active(), Some(id));

    outq.stream_tail(&mut env, Frame::stream(id, 10, payload(10), true), true);
    assert!(env.streams.get(id).unwrap().state().is_data_sent());
    assert_eq!(env.streams.send_active(), None);
}

#[test]
fn write_memory_charges_and_refunds_balance() {
    let (mut env, mut outq) = established();
    let id = env.stream(4, 1 << 20);

    outq.stream_tail(&mut env, Frame::stream(id, 0, payload(100), false), true);
    outq.stream_tail(&mut env, Frame::stream(id, 100, payload(100), false), true);
    assert_eq!(env.wmem_charged, 200);

    outq.transmit(&mut env);
    outq.transmitted_sack(&mut env, Level::App, 0, 0, 0, Duration::ZERO);

    assert_eq!(env.wmem_refunded, 200);
}

#[test]
fn free_purges_every_queue() {
    let (mut env, mut outq) = established();
    let id = env.stream(4, 1 << 20);
    outq.set_close_phrase(Some("bye".into()));

    outq.stream_tail(&mut env, Frame::stream(id, 0, payload(100), false), true);
    outq.ctrl_tail(&mut env, Frame::ping(Level::App), true);
    outq.dgram_tail(&mut env, Frame::datagram(payload(50)), true);
    outq.transmit(&mut env);
    outq.stream_tail(&mut env, Frame::stream(id, 100, payload(100), true), true);

    outq.free(&mut env);

    assert_eq!(outq.control_frames().count(), 0);
    assert_eq!(outq.stream_frames().count(), 0);
    assert_eq!(outq.datagram_frames().count(), 0);
    assert_eq!(outq.transmitted_frames().count(), 0);
    assert_eq!(outq.data_inflight(), 0);
    assert_eq!(outq.inflight(), 0);
    assert_eq!(outq.close_phrase(), None);
    assert_eq!(env.wmem_charged, env.wmem_refunded);
}

#[test]
#[cfg_attr(miri, ignore)]
fn counters_stay_consistent_for_any_ack_pattern() {
    check!()
        .with_type::<(Vec<u8>, u8)>()
        .cloned()
        .for_each(|(offsets, acked): (Vec<u8>, u8)| {
            let (mut env, mut outq) = established();
            let id = env.stream(4, 1 << 20);

            let mut offset = 0u64;
            for len in offsets.iter().take(8) {
                let len = usize::from(*len) + 1;
                outq.stream_tail(
                    &mut env,
                    Frame::stream(id, offset, payload(len), false),
                    true,
                );
                offset += len as u64;
            }
            outq.transmit(&mut env);

            let largest = u64::from(acked % 8);
            outq.transmitted_sack(&mut env, Level::App, largest, 0, largest, Duration::ZERO);
            assert_consistent(&outq, &env);

            env.advance(Duration::from_millis(200));
            outq.retransmit_mark(&mut env, Level::App, false);
            assert_consistent(&outq, &env);
        });
}
