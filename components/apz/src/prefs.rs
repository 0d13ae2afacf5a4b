/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::time::Duration;

/// How panning locks to an axis once a gesture's direction is established.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AxisLockMode {
    /// Panning is never constrained to an axis.
    Free,
    /// Lock to the initial axis for the rest of the gesture.
    #[default]
    Standard,
    /// Lock to the initial axis, but allow breaking out when movement along
    /// the other axis accumulates past `axis_breakout_distance`.
    Sticky,
    /// Follow whichever axis currently dominates the displacement.
    Dominant,
}

/// Engine tunables. Defaults are reasonable for desktop; embedders override
/// the ones their platform measured differently.
#[derive(Clone, Debug)]
pub struct ApzPrefs {
    /// Device pixels a touch point must travel before a pan starts.
    pub touch_start_tolerance: f32,
    pub axis_lock_mode: AxisLockMode,
    /// CSS pixels of perpendicular travel that break a sticky axis lock.
    pub axis_breakout_distance: f32,

    /// Exponential fling decay per millisecond, in `0.0..1.0`.
    pub fling_friction: f32,
    /// Speed below which a fling is considered stopped, in CSS px/ms.
    pub fling_stopped_threshold: f32,
    /// Minimum release speed that starts a fling, in CSS px/ms.
    pub fling_min_velocity: f32,
    /// Hard cap on estimated and animated speeds, in CSS px/ms.
    pub max_velocity: f32,
    /// A fling started while the previous one is still faster than
    /// `fling_acceleration_threshold` multiplies its seed velocity by this.
    pub fling_acceleration_multiplier: f32,
    pub fling_acceleration_threshold: f32,

    /// Overscroll spring stiffness, in 1/ms^2.
    pub spring_stiffness: f32,
    /// Overscroll damping ratio; 1.0 is critically damped.
    pub spring_damping_ratio: f32,

    /// Tolerance for "close enough to the scroll-range boundary", in CSS
    /// pixels. Compared after converting device displacement through the
    /// zoom, so its meaning does not drift with scale.
    pub boundary_epsilon: f32,

    /// How long to wait for a content response before treating a block as
    /// allowed.
    pub content_response_timeout: Duration,
    /// Wheel events within this window and on the same target join the
    /// current wheel block.
    pub wheel_transaction_timeout: Duration,

    /// Whether leftover displacement from a single pan may hand off to an
    /// ancestor mid-gesture, rather than only when the frame was already at
    /// its limit when the gesture began.
    pub allow_immediate_handoff: bool,
    /// Whether leftover fling velocity propagates to the parent as a new
    /// fling.
    pub allow_fling_handoff: bool,

    /// Whether smooth scrolls use the mass-spring-damper physics model
    /// instead of the bezier easing curve.
    pub smooth_scroll_msd: bool,
    /// Duration of a bezier-eased smooth scroll.
    pub smooth_scroll_duration: Duration,

    pub min_zoom: f32,
    pub max_zoom: f32,
}

impl Default for ApzPrefs {
    fn default() -> Self {
        ApzPrefs {
            touch_start_tolerance: 8.0,
            axis_lock_mode: AxisLockMode::Standard,
            axis_breakout_distance: 32.0,
            fling_friction: 0.002,
            fling_stopped_threshold: 0.01,
            fling_min_velocity: 0.025,
            max_velocity: 6.0,
            fling_acceleration_multiplier: 1.5,
            fling_acceleration_threshold: 1.0,
            spring_stiffness: 0.0018,
            spring_damping_ratio: 1.0,
            boundary_epsilon: 0.01,
            content_response_timeout: Duration::from_millis(400),
            wheel_transaction_timeout: Duration::from_millis(1500),
            allow_immediate_handoff: true,
            allow_fling_handoff: true,
            smooth_scroll_msd: false,
            smooth_scroll_duration: Duration::from_millis(150),
            min_zoom: 0.25,
            max_zoom: 10.0,
        }
    }
}
