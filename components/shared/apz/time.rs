/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::ops::{Add, Sub};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A monotonic instant, as nanoseconds since an arbitrary epoch.
///
/// Every input event carries one of these and the sampler is driven with one
/// per compositor frame. The engine never reads a real clock itself, which
/// keeps both of its execution contexts schedulable from tests.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct TimeStamp(u64);

impl TimeStamp {
    pub const fn from_nanos(nanos: u64) -> Self {
        TimeStamp(nanos)
    }

    pub const fn from_millis(millis: u64) -> Self {
        TimeStamp(millis * 1_000_000)
    }

    pub const fn nanos(self) -> u64 {
        self.0
    }

    /// The duration since `earlier`, saturating to zero if `earlier` is in
    /// the future (timestamps from distinct devices can be slightly skewed).
    pub fn duration_since(self, earlier: TimeStamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    /// The number of milliseconds since `earlier`, as a float. Physics code
    /// works in milliseconds throughout.
    pub fn ms_since(self, earlier: TimeStamp) -> f32 {
        self.duration_since(earlier).as_secs_f32() * 1000.0
    }
}

impl Add<Duration> for TimeStamp {
    type Output = TimeStamp;

    fn add(self, rhs: Duration) -> TimeStamp {
        TimeStamp(self.0.saturating_add(rhs.as_nanos() as u64))
    }
}

impl Sub<TimeStamp> for TimeStamp {
    type Output = Duration;

    fn sub(self, rhs: TimeStamp) -> Duration {
        self.duration_since(rhs)
    }
}
