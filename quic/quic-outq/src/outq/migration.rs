// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Path validation.

use crate::{
    context::Context,
    event::{Event, Subscriber as _},
    frame::Frame,
    packet::Builder as _,
    path::{Manager as _, PathAlt},
    timers::{self, Scheduler as _},
};

use super::OutQueue;

impl OutQueue {
    /// Applies a successful path validation
    ///
    /// `frame` is the validating frame still held by the caller; `local`
    /// says which side migrated. The user is offered the migration event
    /// first and can take over the whole transition. Otherwise the path
    /// manager swaps to the validated address and every queued or
    /// in-flight frame loses its tie to the now-active direction.
    pub fn validate_path<C: Context>(&mut self, cx: &mut C, frame: &mut Frame, local: bool) {
        ensure!(!cx.events().event_recv(&Event::ConnectionMigration { local }));
        tracing::debug!(local, "path validated");

        let path_alt = if local {
            cx.path().swap_active();
            PathAlt::SRC
        } else {
            PathAlt::DST
        };
        cx.path().free_inactive();
        cx.set_addr(local);
        cx.path().set_sent_cnt(0);
        cx.timers().stop(timers::Id::Path);
        let timeout = cx.probe_timeout();
        cx.timers().reset(timers::Id::Path, timeout);

        let mut cur = self.control.head();
        while let Some(id) = cur {
            self.arena.get_mut(id).path_alt.remove(path_alt);
            cur = self.control.next(&self.arena, id);
        }
        let mut cur = self.transmitted.head();
        while let Some(id) = cur {
            self.arena.get_mut(id).path_alt.remove(path_alt);
            cur = self.transmitted.next(&self.arena, id);
        }
        frame.path_alt.remove(path_alt);

        cx.builder().set_ecn_probes(0);
    }
}
