/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::time::Duration;

use apz_traits::TimeStamp;

use crate::recent_events::RecentEventsBuffer;

/// Only velocity samples newer than this, relative to the query time,
/// contribute to the estimate.
const VELOCITY_RELEVANCE_WINDOW: Duration = Duration::from_millis(100);
/// How long per-sample velocities are retained.
const VELOCITY_SAMPLE_MAX_AGE: Duration = Duration::from_millis(160);
/// Retained even when stale, so an estimate exists right after an idle gap.
const VELOCITY_SAMPLE_MIN_SIZE: usize = 3;

/// Estimates one axis's velocity from recent position samples.
///
/// Every position update contributes one instantaneous velocity to a
/// [`RecentEventsBuffer`]; the estimate is the average of the samples inside
/// the relevance window. Feeding coalesced historical sub-samples through
/// [`add_position`](Self::add_position) one at a time makes a replay with
/// historical records indistinguishable from one with separate events.
#[derive(Clone, Debug)]
pub struct SimpleVelocityTracker {
    samples: RecentEventsBuffer<f32>,
    last_position: Option<(TimeStamp, f32)>,
    max_velocity: f32,
}

impl SimpleVelocityTracker {
    pub fn new(max_velocity: f32) -> Self {
        SimpleVelocityTracker {
            samples: RecentEventsBuffer::new(VELOCITY_SAMPLE_MAX_AGE, VELOCITY_SAMPLE_MIN_SIZE),
            last_position: None,
            max_velocity,
        }
    }

    /// Begin a new tracking run at `position`. Existing samples are
    /// discarded; velocity must not leak across gestures.
    pub fn start_tracking(&mut self, position: f32, timestamp: TimeStamp) {
        self.samples.clear();
        self.last_position = Some((timestamp, position));
    }

    /// Record a new position. Returns the instantaneous velocity this sample
    /// contributed, if it contributed one.
    pub fn add_position(&mut self, position: f32, timestamp: TimeStamp) -> Option<f32> {
        let (last_time, last_position) = match self.last_position {
            Some(last) => last,
            None => {
                self.last_position = Some((timestamp, position));
                return None;
            },
        };

        let dt_ms = timestamp.ms_since(last_time);
        self.last_position = Some((timestamp, position));
        if dt_ms <= 0.0 {
            // Duplicate or out-of-order timestamp; ignore rather than divide
            // by zero.
            return None;
        }

        let velocity =
            ((position - last_position) / dt_ms).clamp(-self.max_velocity, self.max_velocity);
        self.samples.push(timestamp, velocity);
        Some(velocity)
    }

    /// The estimated velocity as of `now`, in units per millisecond.
    pub fn compute_velocity(&self, now: TimeStamp) -> f32 {
        let mut sum = 0.0;
        let mut count = 0;
        for (timestamp, velocity) in self.samples.iter() {
            if now.duration_since(timestamp) <= VELOCITY_RELEVANCE_WINDOW {
                sum += *velocity;
                count += 1;
            }
        }
        if count == 0 {
            return 0.0;
        }
        (sum / count as f32).clamp(-self.max_velocity, self.max_velocity)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.last_position = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> TimeStamp {
        TimeStamp::from_millis(n)
    }

    #[test]
    fn steady_motion_estimates_exact_velocity() {
        let mut tracker = SimpleVelocityTracker::new(100.0);
        tracker.start_tracking(0.0, ms(0));
        for i in 1..=5 {
            // 2 px per ms.
            tracker.add_position(i as f32 * 20.0, ms(i * 10));
        }
        let velocity = tracker.compute_velocity(ms(50));
        assert!((velocity - 2.0).abs() < 1e-5, "velocity = {}", velocity);
    }

    #[test]
    fn velocity_is_clamped() {
        let mut tracker = SimpleVelocityTracker::new(1.0);
        tracker.start_tracking(0.0, ms(0));
        tracker.add_position(10_000.0, ms(10));
        assert_eq!(tracker.compute_velocity(ms(10)), 1.0);
    }

    #[test]
    fn stale_samples_do_not_contribute() {
        let mut tracker = SimpleVelocityTracker::new(100.0);
        tracker.start_tracking(0.0, ms(0));
        tracker.add_position(50.0, ms(10));
        // Long pause, then query: the old sample is outside the relevance
        // window even though the buffer floor retained it.
        assert_eq!(tracker.compute_velocity(ms(1000)), 0.0);
    }

    #[test]
    fn duplicate_timestamp_ignored() {
        let mut tracker = SimpleVelocityTracker::new(100.0);
        tracker.start_tracking(0.0, ms(0));
        assert!(tracker.add_position(10.0, ms(0)).is_none());
        tracker.add_position(20.0, ms(10));
        assert!(tracker.compute_velocity(ms(10)).is_finite());
    }

    #[test]
    fn intermediate_samples_shape_the_estimate() {
        // Unevenly spaced samples: the per-interval velocities are 3.0,
        // 1.333, 2.5, and 3.0 px/ms.
        let mut dense = SimpleVelocityTracker::new(100.0);
        dense.start_tracking(0.0, ms(0));
        for (t, p) in [(5u64, 15.0f32), (20, 35.0), (30, 60.0), (40, 90.0)] {
            dense.add_position(p, ms(t));
        }

        // A tracker that only saw the endpoints measures 90 / 40 = 2.25
        // px/ms; the sample average weighs the intervals differently.
        let mut sparse = SimpleVelocityTracker::new(100.0);
        sparse.start_tracking(0.0, ms(0));
        sparse.add_position(90.0, ms(40));
        assert_eq!(sparse.compute_velocity(ms(40)), 2.25);
        assert_ne!(
            dense.compute_velocity(ms(40)),
            sparse.compute_velocity(ms(40))
        );
    }
}
