// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A mock endpoint for exercising the engine without a network.
//!
//! Every collaborator contract gets a recording implementation with
//! knobs for the behaviors the engine reacts to (key readiness, builder
//! capacity, event consumption, probe confirmation).

use crate::{
    congestion, connection,
    context::Context,
    crypto::{self, Level},
    event::{self, Event},
    frame::{Frame, Tag},
    packet::{self, Config, EncryptedPacket, SentInfo},
    path::{self, PathAlt, PlInfo},
    pnmap,
    stream::{SendStream, StreamId, StreamMap},
    time::{Clock as _, Duration, NoopClock, Timer, Timestamp},
    timers,
};

#[derive(Debug)]
pub struct Keys {
    pub ready: [bool; 3],
    pub key_update_ts: Vec<(Level, Duration)>,
}

impl Default for Keys {
    fn default() -> Self {
        Self {
            ready: [true; 3],
            key_update_ts: Vec::new(),
        }
    }
}

impl crypto::KeyChain for Keys {
    fn send_ready(&self, level: Level) -> bool {
        self.ready[level.index()]
    }

    fn set_key_update_ts(&mut self, level: Level, timeout: Duration) {
        self.key_update_ts.push((level, timeout));
    }
}

/// A frame as the builder saw it
#[derive(Clone, Debug)]
pub struct PackedFrame {
    pub tag: Tag,
    pub level: Level,
    pub offset: u64,
    pub len: usize,
    pub stream: Option<StreamId>,
    pub is_dgram: bool,
}

#[derive(Clone, Debug)]
pub struct Packet {
    pub number: u64,
    pub frames: Vec<PackedFrame>,
}

#[derive(Debug)]
pub struct Builder {
    /// Maximum payload bytes per packet
    pub mtu: usize,
    pub taglen: usize,
    pub filter: Option<Level>,
    /// Levels for which `config` reports `Blocked`
    pub blocked: Vec<Level>,
    /// Mark emitted packets as ECN-capable
    pub ecn: bool,
    pub next_number: u64,
    pub packets: Vec<Packet>,
    pub xmitted: Vec<(EncryptedPacket, bool)>,
    pub mss_updates: Vec<usize>,
    pub ecn_probes: Vec<u8>,
    pub configs: Vec<(Level, PathAlt)>,
    staged: Vec<PackedFrame>,
    staged_len: usize,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            mtu: 1200,
            taglen: 16,
            filter: None,
            blocked: Vec::new(),
            ecn: false,
            next_number: 0,
            packets: Vec::new(),
            xmitted: Vec::new(),
            mss_updates: Vec::new(),
            ecn_probes: Vec::new(),
            configs: Vec::new(),
            staged: Vec::new(),
            staged_len: 0,
        }
    }
}

impl Builder {
    /// All frames emitted so far, in emission order
    pub fn emitted(&self) -> impl Iterator<Item = &PackedFrame> {
        self.packets.iter().flat_map(|packet| packet.frames.iter())
    }
}

impl packet::Builder for Builder {
    fn config(&mut self, level: Level, path_alt: PathAlt) -> Config {
        self.configs.push((level, path_alt));
        if self.blocked.contains(&level) {
            return Config::Blocked;
        }
        if let Some(filter) = self.filter {
            if filter != level {
                return Config::Filtered;
            }
        }
        Config::Ready
    }

    fn tail(&mut self, frame: &Frame, is_dgram: bool) -> bool {
        if self.staged_len + frame.len() > self.mtu {
            return false;
        }
        self.staged.push(PackedFrame {
            tag: frame.tag().clone(),
            level: frame.level(),
            offset: frame.offset(),
            len: frame.len(),
            stream: frame.stream_id(),
            is_dgram,
        });
        self.staged_len += frame.len();
        true
    }

    fn create(&mut self) -> Option<SentInfo> {
        if self.staged.is_empty() {
            return None;
        }
        let number = self.next_number;
        self.next_number += 1;
        self.packets.push(Packet {
            number,
            frames: core::mem::take(&mut self.staged),
        });
        self.staged_len = 0;
        Some(SentInfo {
            number,
            ecn: self.ecn,
        })
    }

    fn flush(&mut self) -> Option<SentInfo> {
        self.create()
    }

    fn xmit(&mut self, packet: EncryptedPacket, resume: bool) {
        self.xmitted.push((packet, resume));
    }

    fn mss_update(&mut self, mss: usize) {
        self.mss_updates.push(mss);
    }

    fn taglen(&self) -> usize {
        self.taglen
    }

    fn set_taglen(&mut self, len: usize) {
        self.taglen = len;
    }

    fn set_filter(&mut self, level: Level) {
        self.filter = Some(level);
    }

    fn set_ecn_probes(&mut self, count: u8) {
        self.ecn_probes.push(count);
    }
}

#[derive(Debug)]
pub struct Cong {
    pub rto: Duration,
    pub duration: Duration,
    pub window: usize,
    pub rtt_updates: Vec<(Timestamp, Timestamp, Duration)>,
    pub sacks: Vec<(u64, Timestamp, usize, usize)>,
    pub timeouts: Vec<(u64, Timestamp, u64)>,
}

impl Default for Cong {
    fn default() -> Self {
        Self {
            rto: Duration::from_millis(100),
            duration: Duration::from_millis(200),
            window: 14720,
            rtt_updates: Vec::new(),
            sacks: Vec::new(),
            timeouts: Vec::new(),
        }
    }
}

impl congestion::Controller for Cong {
    fn rtt_update(&mut self, now: Timestamp, transmit_ts: Timestamp, ack_delay: Duration) {
        self.rtt_updates.push((now, transmit_ts, ack_delay));
    }

    fn rto(&self) -> Duration {
        self.rto
    }

    fn duration(&self) -> Duration {
        self.duration
    }

    fn window(&self) -> usize {
        self.window
    }

    fn cwnd_update_after_sack(
        &mut self,
        acked_number: u64,
        transmit_ts: Timestamp,
        acked_bytes: usize,
        inflight: usize,
    ) {
        self.sacks
            .push((acked_number, transmit_ts, acked_bytes, inflight));
    }

    fn cwnd_update_after_timeout(&mut self, number: u64, transmit_ts: Timestamp, last_number: u64) {
        self.timeouts.push((number, transmit_ts, last_number));
    }
}

#[derive(Debug, Default)]
pub struct PnMap {
    pub next_number: u64,
    pub inflight: usize,
    pub loss_ts: Option<Timestamp>,
    pub last_sent_ts: Option<Timestamp>,
    pub max_pn_acked: u64,
    pub max_record_ts: Vec<Duration>,
}

impl pnmap::Map for PnMap {
    fn next_number(&self) -> u64 {
        self.next_number
    }

    fn inflight(&self) -> usize {
        self.inflight
    }

    fn inc_inflight(&mut self, len: usize) {
        self.inflight += len;
    }

    fn dec_inflight(&mut self, len: usize) {
        self.inflight = self.inflight.saturating_sub(len);
    }

    fn loss_ts(&self) -> Option<Timestamp> {
        self.loss_ts
    }

    fn set_loss_ts(&mut self, ts: Option<Timestamp>) {
        self.loss_ts = ts;
    }

    fn last_sent_ts(&self) -> Option<Timestamp> {
        self.last_sent_ts
    }

    fn set_last_sent_ts(&mut self, ts: Timestamp) {
        self.last_sent_ts = Some(ts);
    }

    fn max_pn_acked(&self) -> u64 {
        self.max_pn_acked
    }

    fn set_max_pn_acked(&mut self, number: u64) {
        self.max_pn_acked = self.max_pn_acked.max(number);
    }

    fn set_max_record_ts(&mut self, timeout: Duration) {
        self.max_record_ts.push(timeout);
    }
}

#[derive(Debug, Default)]
pub struct Events {
    pub handle_stream_update: bool,
    pub handle_close: bool,
    pub handle_migration: bool,
    pub received: Vec<Event>,
}

impl event::Subscriber for Events {
    fn event_recv(&mut self, event: &Event) -> bool {
        self.received.push(event.clone());
        match event {
            Event::StreamUpdate(_) => self.handle_stream_update,
            Event::ConnectionClose(_) => self.handle_close,
            Event::ConnectionMigration { .. } => self.handle_migration,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerOp {
    Reset(Duration),
    Reduce(Duration),
    Start(Duration),
    Stop,
}

const TIMER_IDS: [timers::Id; 5] = [
    timers::Id::LossInitial,
    timers::Id::LossHandshake,
    timers::Id::LossApp,
    timers::Id::Sack,
    timers::Id::Path,
];

fn timer_index(id: timers::Id) -> usize {
    TIMER_IDS.iter().position(|at| *at == id).unwrap()
}

/// A scheduler keeping one armed [`Timer`] per id, plus an op log
#[derive(Debug, Default)]
pub struct Timers {
    /// Kept in step with the endpoint clock
    pub now: Timestamp,
    pub armed: [Timer; 5],
    pub ops: Vec<(timers::Id, TimerOp)>,
}

impl Timers {
    pub fn last_for(&self, id: timers::Id) -> Option<TimerOp> {
        self.ops
            .iter()
            .rev()
            .find(|(at, _)| *at == id)
            .map(|(_, op)| *op)
    }

    pub fn timer(&self, id: timers::Id) -> &Timer {
        &self.armed[timer_index(id)]
    }

    /// Cancels and returns every timer whose deadline passed at `now`
    pub fn poll_expired(&mut self, now: Timestamp) -> Vec<timers::Id> {
        let mut expired = Vec::new();
        for id in TIMER_IDS {
            if self.armed[timer_index(id)].poll_expiration(now).is_ready() {
                expired.push(id);
            }
        }
        expired
    }
}

impl timers::Scheduler for Timers {
    fn reset(&mut self, id: timers::Id, timeout: Duration) {
        self.ops.push((id, TimerOp::Reset(timeout)));
        let deadline = self.now + timeout;
        self.armed[timer_index(id)].set(deadline);
    }

    fn reduce(&mut self, id: timers::Id, timeout: Duration) {
        self.ops.push((id, TimerOp::Reduce(timeout)));
        let deadline = self.now + timeout;
        let timer = &mut self.armed[timer_index(id)];
        match timer.expiration() {
            Some(current) if current <= deadline => {}
            _ => timer.set(deadline),
        }
    }

    fn start(&mut self, id: timers::Id, timeout: Duration) {
        self.ops.push((id, TimerOp::Start(timeout)));
        let deadline = self.now + timeout;
        let timer = &mut self.armed[timer_index(id)];
        if !timer.is_armed() {
            timer.set(deadline);
        }
    }

    fn stop(&mut self, id: timers::Id) {
        self.ops.push((id, TimerOp::Stop));
        self.armed[timer_index(id)].cancel();
    }
}

#[derive(Debug)]
pub struct Path {
    pub confirm: bool,
    pub recv: PlInfo,
    pub probe_size: u16,
    pub pl_send_mtu: Option<u32>,
    pub pl_sends: Vec<u64>,
    pub swaps: usize,
    pub frees: usize,
    pub sent_cnts: Vec<u8>,
}

impl Default for Path {
    fn default() -> Self {
        Self {
            confirm: false,
            recv: PlInfo::default(),
            probe_size: 1200,
            pl_send_mtu: None,
            pl_sends: Vec::new(),
            swaps: 0,
            frees: 0,
            sent_cnts: Vec::new(),
        }
    }
}

impl path::Manager for Path {
    fn pl_confirm(&mut self, _largest: u64, _smallest: u64) -> bool {
        self.confirm
    }

    fn pl_recv(&mut self) -> PlInfo {
        self.recv
    }

    fn pl_send(&mut self, number: u64) -> Option<u32> {
        self.pl_sends.push(number);
        self.pl_send_mtu
    }

    fn probe_size(&self) -> u16 {
        self.probe_size
    }

    fn swap_active(&mut self) {
        self.swaps += 1;
    }

    fn free_inactive(&mut self) {
        self.frees += 1;
    }

    fn set_sent_cnt(&mut self, count: u8) {
        self.sent_cnts.push(count);
    }
}

/// The mock endpoint bundling every collaborator
#[derive(Debug)]
pub struct Endpoint {
    pub keys: Keys,
    pub builder: Builder,
    pub cong: Cong,
    pub pnmaps: [PnMap; 3],
    pub events: Events,
    pub timers: Timers,
    pub path: Path,
    pub streams: StreamMap,
    pub state: connection::State,
    pub now: Timestamp,
    pub wmem_charged: usize,
    pub wmem_refunded: usize,
    pub sndbuf: usize,
    pub ecn_ect0: bool,
    pub addrs_set: Vec<bool>,
    pub probe_timeout: Duration,
    pub max_idle_timeout: Option<Duration>,
    pub disable_1rtt: bool,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl Endpoint {
    /// An established endpoint with all keys installed
    pub fn new() -> Self {
        let now = NoopClock.get_time();
        Self {
            keys: Keys::default(),
            builder: Builder::default(),
            cong: Cong::default(),
            pnmaps: [PnMap::default(), PnMap::default(), PnMap::default()],
            events: Events::default(),
            timers: Timers {
                now,
                ..Timers::default()
            },
            path: Path::default(),
            streams: StreamMap::default(),
            state: connection::State::Established,
            now,
            wmem_charged: 0,
            wmem_refunded: 0,
            sndbuf: 0,
            ecn_ect0: false,
            addrs_set: Vec::new(),
            probe_timeout: Duration::from_millis(500),
            max_idle_timeout: None,
            disable_1rtt: false,
        }
    }

    /// Registers a stream with the given send credit
    pub fn stream(&mut self, id: u64, max_bytes: u64) -> StreamId {
        let id = StreamId::new(id);
        self.streams.insert(SendStream::new(id, max_bytes));
        id
    }

    /// Advances the mock clock
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
        self.timers.now = self.now;
    }
}

impl Context for Endpoint {
    type Keys = Keys;
    type Builder = Builder;
    type Cong = Cong;
    type Pnmap = PnMap;
    type Events = Events;
    type Timers = Timers;
    type Path = Path;
    type Streams = StreamMap;

    fn now(&self) -> Timestamp {
        self.now
    }

    fn keys(&self) -> &Keys {
        &self.keys
    }

    fn keys_mut(&mut self) -> &mut Keys {
        &mut self.keys
    }

    fn builder(&mut self) -> &mut Builder {
        &mut self.builder
    }

    fn cong(&mut self) -> &mut Cong {
        &mut self.cong
    }

    fn pnmap(&self, level: Level) -> &PnMap {
        &self.pnmaps[level.index()]
    }

    fn pnmap_mut(&mut self, level: Level) -> &mut PnMap {
        &mut self.pnmaps[level.index()]
    }

    fn events(&mut self) -> &mut Events {
        &mut self.events
    }

    fn timers(&mut self) -> &mut Timers {
        &mut self.timers
    }

    fn path(&mut self) -> &mut Path {
        &mut self.path
    }

    fn streams(&mut self) -> &mut StreamMap {
        &mut self.streams
    }

    fn state(&self) -> connection::State {
        self.state
    }

    fn set_state(&mut self, state: connection::State) {
        self.state = state;
    }

    fn wmem_charge(&mut self, len: usize) {
        self.wmem_charged += len;
    }

    fn wmem_refund(&mut self, len: usize) {
        self.wmem_refunded += len;
    }

    fn set_sndbuf(&mut self, len: usize) {
        self.sndbuf = len;
    }

    fn set_ecn_ect0(&mut self) {
        self.ecn_ect0 = true;
    }

    fn set_addr(&mut self, local: bool) {
        self.addrs_set.push(local);
    }

    fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    fn max_idle_timeout(&self) -> Option<Duration> {
        self.max_idle_timeout
    }

    fn set_max_idle_timeout(&mut self, timeout: Duration) {
        self.max_idle_timeout = Some(timeout);
    }

    fn disable_1rtt_encryption(&self) -> bool {
        self.disable_1rtt
    }
}
