// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Timer identifiers and the arming contract.
//!
//! The engine arms and stops timers; firing them back into the engine
//! (`transmit_one` for the loss timers, `transmit_probe` for the path
//! timer) is the owner's responsibility.

use crate::{crypto::Level, time::Duration};

/// The timers a connection owns
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Id {
    /// Loss timer for the Initial packet number space
    LossInitial,
    /// Loss timer for the Handshake packet number space
    LossHandshake,
    /// Loss timer for the application packet number space
    LossApp,
    /// Delayed acknowledgement timer
    Sack,
    /// Path validation and PLPMTUD probe timer
    Path,
}

impl From<Level> for Id {
    #[inline]
    fn from(level: Level) -> Self {
        match level {
            Level::Initial => Self::LossInitial,
            Level::Handshake => Self::LossHandshake,
            Level::App => Self::LossApp,
        }
    }
}

/// Arms and stops connection timers
pub trait Scheduler {
    /// Arms `id` to fire after `timeout`, replacing any armed deadline
    fn reset(&mut self, id: Id, timeout: Duration);

    /// Arms `id` to fire after `timeout` unless it is already armed to
    /// fire sooner
    fn reduce(&mut self, id: Id, timeout: Duration);

    /// Arms `id` only if it is not already armed
    fn start(&mut self, id: Id, timeout: Duration);

    /// Disarms `id`
    fn stop(&mut self, id: Id);
}
