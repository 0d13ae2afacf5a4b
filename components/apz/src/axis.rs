/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Per-axis scroll state: velocity tracking, displacement splitting, and the
//! overscroll stretch lifecycle. The two axes of a controller are fully
//! independent; nothing here reads or writes the other axis.

use apz_traits::TimeStamp;

use crate::velocity::SimpleVelocityTracker;

/// Where one axis is in the overscroll lifecycle.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OverscrollState {
    #[default]
    NotOverscrolled,
    /// Live input is pushing past an edge.
    Stretching,
    /// The spring-back animation is running.
    Recovering,
    /// New input interrupted recovery before it finished; the stretch
    /// remains and recovery must be restarted on the next release.
    Aborted,
}

/// The result of applying a displacement against a scroll range: the portion
/// the offset can absorb and the excess that becomes overscroll.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdjustedDisplacement {
    pub allowed: f32,
    pub overscroll: f32,
}

/// Split `displacement` at the scroll range `[min, max]` starting from
/// `current`. Excess smaller than `epsilon` is discarded rather than turned
/// into overscroll, so floating-point residue at a boundary cannot start a
/// stretch or a handoff.
pub fn adjust_displacement(
    current: f32,
    displacement: f32,
    min: f32,
    max: f32,
    epsilon: f32,
) -> AdjustedDisplacement {
    let target = current + displacement;
    let clamped = target.clamp(min, max);
    let allowed = clamped - current;
    let mut overscroll = displacement - allowed;
    if overscroll.abs() < epsilon {
        overscroll = 0.0;
    }
    AdjustedDisplacement { allowed, overscroll }
}

/// One axis of an `AsyncPanZoomController`.
#[derive(Clone, Debug)]
pub struct AxisState {
    pub velocity_tracker: SimpleVelocityTracker,
    /// Signed stretch past the scroll range; the sign names the stretched
    /// edge. Exactly zero when not overscrolled.
    pub overscroll: f32,
    pub overscroll_state: OverscrollState,
}

impl AxisState {
    pub fn new(max_velocity: f32) -> Self {
        AxisState {
            velocity_tracker: SimpleVelocityTracker::new(max_velocity),
            overscroll: 0.0,
            overscroll_state: OverscrollState::NotOverscrolled,
        }
    }

    pub fn is_overscrolled(&self) -> bool {
        self.overscroll != 0.0
    }

    /// Accumulate stretch from live input.
    pub fn overscroll_by(&mut self, amount: f32) {
        if amount == 0.0 {
            return;
        }
        self.overscroll += amount;
        self.overscroll_state = if self.overscroll == 0.0 {
            OverscrollState::NotOverscrolled
        } else {
            OverscrollState::Stretching
        };
    }

    /// New input landed while recovery was running: stop the animation but
    /// keep the stretch. A later release restarts recovery.
    pub fn interrupt_recovery(&mut self) {
        if self.overscroll_state == OverscrollState::Recovering {
            self.overscroll_state = if self.overscroll == 0.0 {
                OverscrollState::NotOverscrolled
            } else {
                OverscrollState::Aborted
            };
        }
    }

    /// Drop the stretch entirely (controller reset).
    pub fn clear_overscroll(&mut self) {
        self.overscroll = 0.0;
        self.overscroll_state = OverscrollState::NotOverscrolled;
    }

    pub fn velocity(&self, now: TimeStamp) -> f32 {
        self.velocity_tracker.compute_velocity(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_range_displacement_is_fully_allowed() {
        let d = adjust_displacement(10.0, 30.0, 0.0, 100.0, 0.01);
        assert_eq!(d, AdjustedDisplacement { allowed: 30.0, overscroll: 0.0 });
    }

    #[test]
    fn excess_splits_into_overscroll() {
        let d = adjust_displacement(80.0, 50.0, 0.0, 100.0, 0.01);
        assert_eq!(d.allowed, 20.0);
        assert_eq!(d.overscroll, 30.0);
    }

    #[test]
    fn negative_excess_splits_toward_leading_edge() {
        let d = adjust_displacement(5.0, -20.0, 0.0, 100.0, 0.01);
        assert_eq!(d.allowed, -5.0);
        assert_eq!(d.overscroll, -15.0);
    }

    #[test]
    fn sub_epsilon_excess_is_discarded() {
        let d = adjust_displacement(99.999, 0.002, 0.0, 100.0, 0.01);
        assert_eq!(d.overscroll, 0.0);
    }

    #[test]
    fn recovery_interruption_keeps_stretch() {
        let mut axis = AxisState::new(10.0);
        axis.overscroll_by(12.0);
        axis.overscroll_state = OverscrollState::Recovering;
        axis.interrupt_recovery();
        assert_eq!(axis.overscroll_state, OverscrollState::Aborted);
        assert_eq!(axis.overscroll, 12.0);
    }
}
