// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::time::{Duration, Timestamp};

/// A `Clock` is a source of [`Timestamp`]s
pub trait Clock {
    /// Returns the current point in time
    fn get_time(&self) -> Timestamp;
}

/// A clock that always returns the same point in time
///
/// Useful as a base timestamp source in tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopClock;

impl Clock for NoopClock {
    #[inline]
    fn get_time(&self) -> Timestamp {
        Timestamp::from_duration(Duration::from_secs(1))
    }
}
