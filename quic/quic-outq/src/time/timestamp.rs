// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{fmt, ops, time::Duration};

/// An absolute point in time.
///
/// The absolute value of `Timestamp`s should be treated as opaque. It is
/// not necessarily related to any calendar time. `Timestamp`s should only
/// be compared if they are sourced from the same clock.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp from the `Duration` since the clock's epoch
    #[inline]
    pub const fn from_duration(duration: Duration) -> Self {
        Self(duration.as_micros() as u64)
    }

    /// Returns the `Duration` since the clock's epoch
    #[inline]
    pub const fn as_duration(self) -> Duration {
        Duration::from_micros(self.0)
    }

    /// Returns the `Duration` which elapsed since an earlier `Timestamp`.
    /// If `earlier` is more recent, the method returns a `Duration` of 0.
    #[inline]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }

    /// Returns true if the `Timestamp` has passed at `current_time`
    #[inline]
    pub fn has_elapsed(self, current_time: Self) -> bool {
        self <= current_time
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let duration = self.as_duration();
        let micros = duration.subsec_micros();
        let secs = duration.as_secs() % 60;
        let mins = duration.as_secs() / 60 % 60;
        let hours = duration.as_secs() / 60 / 60;
        write!(f, "Timestamp({hours}:{mins:02}:{secs:02}.{micros:06})")
    }
}

impl ops::Add<Duration> for Timestamp {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs.as_micros() as u64)
    }
}

impl ops::AddAssign<Duration> for Timestamp {
    #[inline]
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl ops::Sub for Timestamp {
    type Output = Duration;

    /// Returns the `Duration` by which `rhs` precedes `self`
    ///
    /// # Panics
    ///
    /// Panics if `rhs` is later than `self` and `debug_assertions` are
    /// enabled; saturates to 0 otherwise.
    #[inline]
    fn sub(self, rhs: Self) -> Duration {
        debug_assert!(rhs.0 <= self.0, "subtraction would underflow");
        self.saturating_duration_since(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic() {
        let base = Timestamp::from_duration(Duration::from_millis(100));
        let later = base + Duration::from_millis(50);

        assert_eq!(later - base, Duration::from_millis(50));
        assert_eq!(base.saturating_duration_since(later), Duration::ZERO);
        assert!(base.has_elapsed(later));
        assert!(!later.has_elapsed(base));
    }
}
