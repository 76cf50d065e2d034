// Copyright the quic-outq authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

/// Checks that the first argument is true, otherwise returns the second value
macro_rules! ensure {
    ($cond:expr $(,)?) => {
        ensure!($cond, ());
    };
    ($cond:expr, $otherwise:expr $(,)?) => {
        if !($cond) {
            return $otherwise;
        }
    };
}
