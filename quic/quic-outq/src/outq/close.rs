// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection close and path probing.

use crate::{
    connection::{State, APPLICATION_ERROR},
    context::Context,
    crypto::Level,
    event::{ConnectionClose, Event, Subscriber as _},
    frame::Frame,
    packet::Builder as _,
    path::Manager as _,
    pnmap::Map as _,
    timers::{self, Scheduler as _},
};

use super::OutQueue;

impl OutQueue {
    /// Emits a CONNECTION_CLOSE for the transport error `errcode`
    /// triggered by `frame_type` and moves the connection to `Closed`
    ///
    /// The user is offered the event first; when the user consumes it,
    /// emission and the state change are suppressed. The error is
    /// recorded either way so diagnostics survive.
    pub fn transmit_close<C: Context>(
        &mut self,
        cx: &mut C,
        frame_type: u64,
        errcode: u64,
        level: Level,
    ) {
        ensure!(errcode != 0);

        self.close_errcode = errcode;
        self.close_frame = frame_type;

        let close = ConnectionClose {
            errcode,
            frame: frame_type,
        };
        ensure!(!cx.events().event_recv(&Event::ConnectionClose(close)));

        tracing::debug!(errcode, frame_type, "closing connection");
        let frame = Frame::connection_close(
            level,
            false,
            errcode,
            frame_type,
            self.close_phrase.as_deref(),
        );
        self.ctrl_tail(cx, frame, false);
        cx.set_state(State::Closed);
    }

    /// Emits the close frame for an application initiated close
    ///
    /// Sends CONNECTION_CLOSE_APP once established, a transport
    /// CONNECTION_CLOSE at the Initial level while still establishing,
    /// and nothing at all otherwise (idle timeout, closed by peer).
    pub fn transmit_app_close<C: Context>(&mut self, cx: &mut C) {
        let (level, app) = match cx.state() {
            State::Established => (Level::App, true),
            State::Establishing => {
                self.close_errcode = APPLICATION_ERROR;
                (Level::Initial, false)
            }
            State::Closed => return,
        };

        let frame = Frame::connection_close(
            level,
            app,
            self.close_errcode,
            self.close_frame,
            self.close_phrase.as_deref(),
        );
        self.ctrl_tail(cx, frame, false);
    }

    /// Emits a padded PING probing the path MTU and arms the path timer
    pub fn transmit_probe<C: Context>(&mut self, cx: &mut C) {
        ensure!(cx.is_established());

        let probe_size = cx.path().probe_size();
        let taglen = cx.builder().taglen();
        let number = cx.pnmap(Level::App).next_number();

        self.ctrl_tail(cx, Frame::ping_probe(Level::App, probe_size), false);

        if let Some(pathmtu) = cx.path().pl_send(number) {
            cx.builder().mss_update(pathmtu as usize + taglen);
        }

        let timeout = cx.probe_timeout();
        cx.timers().reset(timers::Id::Path, timeout);
    }
}
