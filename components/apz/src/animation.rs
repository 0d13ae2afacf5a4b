/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Physics models for scroll animations.
//!
//! Two interchangeable models drive a [`GenericScrollAnimation`]: a cubic
//! bezier easing curve (deterministic, classic smooth scroll) and a
//! critically-damped mass-spring-damper (velocity-continuous motion). Flings
//! and overscroll spring-back have their own simpler models. All velocities
//! are CSS pixels per millisecond.

use apz_traits::units::{CSSPoint, CSSVector};
use apz_traits::{ScrollDirection, TimeStamp};

/// Stiffness of the mass-spring-damper smooth-scroll model, in 1/ms^2.
const MSD_STIFFNESS: f32 = 0.0025;
/// Below this distance and speed an MSD axis reports its destination
/// exactly.
const MSD_SETTLE_EPSILON: f32 = 0.01;
/// Below this stretch and speed the overscroll spring snaps to exactly zero.
const SPRING_SETTLE_EPSILON: f32 = 0.01;
/// Physics integration never steps further than this in one sample, so a
/// long gap between frames cannot blow up the simulation.
const MAX_SAMPLE_GAP_MS: f32 = 100.0;

/// The standard CSS `ease` timing-function control points.
const EASE_X1: f32 = 0.25;
const EASE_Y1: f32 = 0.1;
const EASE_X2: f32 = 0.25;
const EASE_Y2: f32 = 1.0;

/// A cubic bezier through (0,0) and (1,1), evaluated as a timing function:
/// given progress `x` in `[0,1]`, find the curve parameter with that x and
/// return the corresponding y.
#[derive(Clone, Copy, Debug)]
pub struct CubicBezier {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl CubicBezier {
    pub fn ease() -> Self {
        CubicBezier {
            x1: EASE_X1,
            y1: EASE_Y1,
            x2: EASE_X2,
            y2: EASE_Y2,
        }
    }

    fn sample_axis(t: f32, p1: f32, p2: f32) -> f32 {
        // Cubic through 0, p1, p2, 1.
        let omt = 1.0 - t;
        3.0 * omt * omt * t * p1 + 3.0 * omt * t * t * p2 + t * t * t
    }

    fn sample_axis_derivative(t: f32, p1: f32, p2: f32) -> f32 {
        let omt = 1.0 - t;
        3.0 * omt * omt * p1 + 6.0 * omt * t * (p2 - p1) + 3.0 * t * t * (1.0 - p2)
    }

    /// Solve for the curve parameter whose x equals `x`, by Newton's method
    /// with a bisection fallback for flat regions.
    fn parameter_for_x(&self, x: f32) -> f32 {
        let mut t = x;
        for _ in 0..8 {
            let error = Self::sample_axis(t, self.x1, self.x2) - x;
            if error.abs() < 1e-6 {
                return t;
            }
            let slope = Self::sample_axis_derivative(t, self.x1, self.x2);
            if slope.abs() < 1e-6 {
                break;
            }
            t -= error / slope;
        }

        let (mut lo, mut hi) = (0.0f32, 1.0f32);
        let mut t = x;
        for _ in 0..32 {
            let sampled = Self::sample_axis(t, self.x1, self.x2);
            if (sampled - x).abs() < 1e-6 {
                break;
            }
            if sampled < x {
                lo = t;
            } else {
                hi = t;
            }
            t = (lo + hi) / 2.0;
        }
        t
    }

    /// The eased progress for input progress `x` in `[0,1]`.
    pub fn solve(&self, x: f32) -> f32 {
        if x <= 0.0 {
            return 0.0;
        }
        if x >= 1.0 {
            return 1.0;
        }
        let t = self.parameter_for_x(x);
        Self::sample_axis(t, self.y1, self.y2)
    }

    /// d(eased)/d(progress) at input progress `x`.
    pub fn slope(&self, x: f32) -> f32 {
        if !(0.0..=1.0).contains(&x) {
            return 0.0;
        }
        let t = self.parameter_for_x(x);
        let dx = Self::sample_axis_derivative(t, self.x1, self.x2);
        if dx.abs() < 1e-6 {
            return 0.0;
        }
        Self::sample_axis_derivative(t, self.y1, self.y2) / dx
    }
}

#[derive(Clone, Debug)]
struct BezierPhysics {
    start_time: TimeStamp,
    duration_ms: f32,
    start: CSSPoint,
    destination: CSSPoint,
    curve: CubicBezier,
}

impl BezierPhysics {
    fn progress(&self, now: TimeStamp) -> f32 {
        if self.duration_ms <= 0.0 {
            return 1.0;
        }
        (now.ms_since(self.start_time) / self.duration_ms).clamp(0.0, 1.0)
    }

    fn position_at(&self, now: TimeStamp) -> CSSPoint {
        let eased = self.curve.solve(self.progress(now));
        self.start + (self.destination - self.start) * eased
    }

    fn velocity_at(&self, now: TimeStamp) -> CSSVector {
        let progress = self.progress(now);
        if progress >= 1.0 || self.duration_ms <= 0.0 {
            return CSSVector::zero();
        }
        (self.destination - self.start) * (self.curve.slope(progress) / self.duration_ms)
    }

    fn is_finished(&self, now: TimeStamp) -> bool {
        self.progress(now) >= 1.0
    }
}

/// One axis of critically-damped spring motion toward a destination.
#[derive(Clone, Copy, Debug)]
struct MsdAxis {
    destination: f32,
    /// Displacement from the destination at `start_time`.
    initial_offset: f32,
    initial_velocity: f32,
    start_time: TimeStamp,
}

impl MsdAxis {
    fn new(position: f32, velocity: f32, destination: f32, now: TimeStamp) -> Self {
        MsdAxis {
            destination,
            initial_offset: position - destination,
            initial_velocity: velocity,
            start_time: now,
        }
    }

    fn omega() -> f32 {
        MSD_STIFFNESS.sqrt()
    }

    /// Critically damped solution: x(t) = (A + B t) e^(-w t) with
    /// A = x0 and B = v0 + w x0.
    fn offset_at(&self, now: TimeStamp) -> f32 {
        let tau = now.ms_since(self.start_time);
        let w = Self::omega();
        let a = self.initial_offset;
        let b = self.initial_velocity + w * a;
        (a + b * tau) * (-w * tau).exp()
    }

    fn position_at(&self, now: TimeStamp) -> f32 {
        if self.is_finished(now) {
            return self.destination;
        }
        self.destination + self.offset_at(now)
    }

    fn velocity_at(&self, now: TimeStamp) -> f32 {
        let tau = now.ms_since(self.start_time);
        let w = Self::omega();
        let a = self.initial_offset;
        let b = self.initial_velocity + w * a;
        (b - w * (a + b * tau)) * (-w * tau).exp()
    }

    fn is_finished(&self, now: TimeStamp) -> bool {
        self.offset_at(now).abs() < MSD_SETTLE_EPSILON &&
            self.velocity_at(now).abs() < MSD_SETTLE_EPSILON
    }
}

/// The physics model behind a [`GenericScrollAnimation`]. A closed set: new
/// models are added here and matched exhaustively, not trait objects.
#[derive(Clone, Debug)]
pub enum ScrollPhysics {
    Bezier(BezierState),
    Msd(MsdState),
}

// The per-model state is private; the enum shape is the public contract.
#[derive(Clone, Debug)]
pub struct BezierState(BezierPhysics);
#[derive(Clone, Debug)]
pub struct MsdState {
    x: MsdAxis,
    y: MsdAxis,
}

/// Advances a scroll offset toward a destination, re-clamped every update to
/// the live scroll range by its owner.
#[derive(Clone, Debug)]
pub struct GenericScrollAnimation {
    physics: ScrollPhysics,
    /// When set, displacement on this axis is expected to run into
    /// overscroll; if the content additionally refuses to move at all, the
    /// animation terminates early instead of free-wheeling against the wall.
    pub direction_forced_to_overscroll: Option<ScrollDirection>,
}

impl GenericScrollAnimation {
    /// A deterministic eased scroll, used when MSD smooth-scroll physics is
    /// disabled.
    pub fn bezier(now: TimeStamp, start: CSSPoint, destination: CSSPoint, duration_ms: f32) -> Self {
        GenericScrollAnimation {
            physics: ScrollPhysics::Bezier(BezierState(BezierPhysics {
                start_time: now,
                duration_ms,
                start,
                destination,
                curve: CubicBezier::ease(),
            })),
            direction_forced_to_overscroll: None,
        }
    }

    /// A velocity-continuous scroll seeded with the current velocity.
    pub fn msd(
        now: TimeStamp,
        start: CSSPoint,
        velocity: CSSVector,
        destination: CSSPoint,
    ) -> Self {
        GenericScrollAnimation {
            physics: ScrollPhysics::Msd(MsdState {
                x: MsdAxis::new(start.x, velocity.x, destination.x, now),
                y: MsdAxis::new(start.y, velocity.y, destination.y, now),
            }),
            direction_forced_to_overscroll: None,
        }
    }

    pub fn destination(&self) -> CSSPoint {
        match &self.physics {
            ScrollPhysics::Bezier(BezierState(b)) => b.destination,
            ScrollPhysics::Msd(m) => CSSPoint::new(m.x.destination, m.y.destination),
        }
    }

    pub fn position_at(&self, now: TimeStamp) -> CSSPoint {
        match &self.physics {
            ScrollPhysics::Bezier(BezierState(b)) => b.position_at(now),
            ScrollPhysics::Msd(m) => CSSPoint::new(m.x.position_at(now), m.y.position_at(now)),
        }
    }

    pub fn velocity_at(&self, now: TimeStamp) -> CSSVector {
        match &self.physics {
            ScrollPhysics::Bezier(BezierState(b)) => b.velocity_at(now),
            ScrollPhysics::Msd(m) => CSSVector::new(m.x.velocity_at(now), m.y.velocity_at(now)),
        }
    }

    pub fn is_finished(&self, now: TimeStamp) -> bool {
        match &self.physics {
            ScrollPhysics::Bezier(BezierState(b)) => b.is_finished(now),
            ScrollPhysics::Msd(m) => m.x.is_finished(now) && m.y.is_finished(now),
        }
    }

    /// Move the destination, restarting the physics from the current
    /// position and velocity so motion stays continuous. The caller clamps
    /// `destination` to the live scroll range first.
    pub fn update_destination(&mut self, now: TimeStamp, destination: CSSPoint) {
        let position = self.position_at(now);
        let velocity = self.velocity_at(now);
        match &mut self.physics {
            ScrollPhysics::Bezier(BezierState(b)) => {
                let remaining = (b.duration_ms - now.ms_since(b.start_time)).max(1.0);
                *b = BezierPhysics {
                    start_time: now,
                    duration_ms: remaining,
                    start: position,
                    destination,
                    curve: b.curve,
                };
            },
            ScrollPhysics::Msd(m) => {
                m.x = MsdAxis::new(position.x, velocity.x, destination.x, now);
                m.y = MsdAxis::new(position.y, velocity.y, destination.y, now);
            },
        }
    }

    /// Add `delta` to the destination (wheel events extending an in-flight
    /// scroll).
    pub fn update_delta(&mut self, now: TimeStamp, delta: CSSVector) {
        let destination = self.destination() + delta;
        self.update_destination(now, destination);
    }

    /// The layout scroll offset moved underneath the animation (content
    /// reflow); shift the whole trajectory so sampled displacement is
    /// unaffected.
    pub fn apply_content_shift(&mut self, delta: CSSVector) {
        match &mut self.physics {
            ScrollPhysics::Bezier(BezierState(b)) => {
                b.start += delta;
                b.destination += delta;
            },
            ScrollPhysics::Msd(m) => {
                m.x.destination += delta.x;
                m.y.destination += delta.y;
            },
        }
    }
}

/// Exponential-friction fling. Stepped in whole-millisecond increments so
/// the result is independent of sampling cadence.
#[derive(Clone, Debug)]
pub struct FlingPhysics {
    pub velocity: CSSVector,
    friction: f32,
    stop_threshold: f32,
    last_sample: TimeStamp,
    carry_ms: f32,
}

impl FlingPhysics {
    pub fn new(velocity: CSSVector, friction: f32, stop_threshold: f32, now: TimeStamp) -> Self {
        FlingPhysics {
            velocity,
            friction,
            stop_threshold,
            last_sample: now,
            carry_ms: 0.0,
        }
    }

    /// Advance to `now`, returning the displacement covered since the last
    /// sample.
    pub fn sample(&mut self, now: TimeStamp) -> CSSVector {
        let mut dt = now.ms_since(self.last_sample).min(MAX_SAMPLE_GAP_MS) + self.carry_ms;
        self.last_sample = now;

        let mut displacement = CSSVector::zero();
        let decay = 1.0 - self.friction;
        while dt >= 1.0 {
            displacement += self.velocity;
            self.velocity *= decay;
            dt -= 1.0;
        }
        self.carry_ms = dt;

        if self.is_finished() {
            self.velocity = CSSVector::zero();
        }
        displacement
    }

    pub fn is_finished(&self) -> bool {
        self.velocity.x.abs() < self.stop_threshold && self.velocity.y.abs() < self.stop_threshold
    }

    /// The instant this fling was last advanced to.
    pub fn sample_time(&self) -> TimeStamp {
        self.last_sample
    }
}

/// One axis of damped-spring overscroll recovery. The spring pulls the
/// stretch back to zero; the terminal value is exactly zero, not merely
/// close.
#[derive(Clone, Copy, Debug)]
pub struct SpringAxis {
    pub amount: f32,
    pub velocity: f32,
}

impl SpringAxis {
    pub fn new(amount: f32, velocity: f32) -> Self {
        SpringAxis { amount, velocity }
    }

    /// Integrate `dt_ms` of spring motion in millisecond substeps.
    pub fn step(&mut self, dt_ms: f32, stiffness: f32, damping_ratio: f32) {
        if self.is_finished() {
            return;
        }
        let damping = 2.0 * damping_ratio * stiffness.sqrt();
        let mut remaining = dt_ms.min(MAX_SAMPLE_GAP_MS);
        while remaining > 0.0 {
            let step = remaining.min(1.0);
            let acceleration = -stiffness * self.amount - damping * self.velocity;
            self.velocity += acceleration * step;
            self.amount += self.velocity * step;
            remaining -= step;

            if self.amount.abs() < SPRING_SETTLE_EPSILON &&
                self.velocity.abs() < SPRING_SETTLE_EPSILON
            {
                self.amount = 0.0;
                self.velocity = 0.0;
                return;
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.amount == 0.0 && self.velocity == 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> TimeStamp {
        TimeStamp::from_millis(n)
    }

    #[test]
    fn bezier_hits_endpoints() {
        let animation =
            GenericScrollAnimation::bezier(ms(0), CSSPoint::new(0.0, 0.0), CSSPoint::new(0.0, 100.0), 200.0);
        assert_eq!(animation.position_at(ms(0)), CSSPoint::new(0.0, 0.0));
        assert_eq!(animation.position_at(ms(200)), CSSPoint::new(0.0, 100.0));
        assert!(animation.is_finished(ms(200)));
        assert!(!animation.is_finished(ms(100)));
    }

    #[test]
    fn bezier_is_monotonic() {
        let animation =
            GenericScrollAnimation::bezier(ms(0), CSSPoint::new(0.0, 0.0), CSSPoint::new(0.0, 100.0), 300.0);
        let mut last = 0.0;
        for t in 0..=300 {
            let y = animation.position_at(ms(t)).y;
            assert!(y >= last - 1e-4, "regressed at t={}: {} < {}", t, y, last);
            last = y;
        }
    }

    #[test]
    fn msd_converges_to_destination() {
        let animation = GenericScrollAnimation::msd(
            ms(0),
            CSSPoint::new(0.0, 0.0),
            CSSVector::new(0.0, 2.0),
            CSSPoint::new(0.0, 300.0),
        );
        assert!(animation.is_finished(ms(10_000)));
        assert_eq!(animation.position_at(ms(10_000)), CSSPoint::new(0.0, 300.0));
    }

    #[test]
    fn update_destination_keeps_position_continuous() {
        let mut animation = GenericScrollAnimation::msd(
            ms(0),
            CSSPoint::new(0.0, 0.0),
            CSSVector::zero(),
            CSSPoint::new(0.0, 100.0),
        );
        let mid = animation.position_at(ms(50));
        animation.update_destination(ms(50), CSSPoint::new(0.0, 400.0));
        let after = animation.position_at(ms(50));
        assert!((after.y - mid.y).abs() < 1e-3);
        assert_eq!(animation.destination(), CSSPoint::new(0.0, 400.0));
    }

    #[test]
    fn update_delta_extends_destination() {
        let mut animation =
            GenericScrollAnimation::bezier(ms(0), CSSPoint::new(0.0, 0.0), CSSPoint::new(0.0, 100.0), 200.0);
        animation.update_delta(ms(50), CSSVector::new(0.0, 40.0));
        assert_eq!(animation.destination(), CSSPoint::new(0.0, 140.0));
    }

    #[test]
    fn content_shift_moves_trajectory() {
        let mut animation =
            GenericScrollAnimation::bezier(ms(0), CSSPoint::new(0.0, 0.0), CSSPoint::new(0.0, 100.0), 100.0);
        animation.apply_content_shift(CSSVector::new(0.0, 50.0));
        assert_eq!(animation.destination(), CSSPoint::new(0.0, 150.0));
        assert_eq!(animation.position_at(ms(0)), CSSPoint::new(0.0, 50.0));
    }

    #[test]
    fn fling_decays_to_stop() {
        let mut fling = FlingPhysics::new(CSSVector::new(0.0, 2.0), 0.05, 0.01, ms(0));
        let mut total = 0.0;
        let mut t = 0;
        while !fling.is_finished() && t < 10_000 {
            t += 16;
            total += fling.sample(ms(t)).y;
        }
        assert!(fling.is_finished());
        assert_eq!(fling.velocity, CSSVector::zero());
        // Geometric series bound: v0 / friction.
        assert!(total > 0.0 && total < 2.0 / 0.05 + 1.0);
    }

    #[test]
    fn fling_sampling_cadence_does_not_matter() {
        let mut coarse = FlingPhysics::new(CSSVector::new(0.0, 1.0), 0.01, 0.001, ms(0));
        let mut fine = FlingPhysics::new(CSSVector::new(0.0, 1.0), 0.01, 0.001, ms(0));

        let mut coarse_total = 0.0;
        coarse_total += coarse.sample(ms(32)).y;
        coarse_total += coarse.sample(ms(64)).y;

        let mut fine_total = 0.0;
        for t in (16..=64).step_by(16) {
            fine_total += fine.sample(ms(t)).y;
        }

        assert!((coarse_total - fine_total).abs() < 1e-3);
    }

    #[test]
    fn spring_returns_to_exactly_zero() {
        let mut spring = SpringAxis::new(40.0, 0.5);
        for _ in 0..2_000 {
            spring.step(16.0, 0.0018, 1.0);
            if spring.is_finished() {
                break;
            }
        }
        assert_eq!(spring.amount, 0.0);
        assert_eq!(spring.velocity, 0.0);
    }
}
