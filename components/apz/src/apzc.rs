/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The per-scrollable-frame controller.
//!
//! One `AsyncPanZoomController` exists per scrollable frame. It owns that
//! frame's [`FrameMetrics`], per-axis velocity trackers and overscroll state,
//! the active animation, and the gesture state machine. The controller thread
//! drives it with confirmed input-block events; the compositor thread calls
//! [`sample_animation`](AsyncPanZoomController::sample_animation) once per
//! frame. Both go through the per-controller mutex; nothing here ever takes
//! another controller's lock.

use std::sync::Arc;

use apz_traits::units::{CSSMargins, CSSPoint, CSSVector, DevicePoint};
use apz_traits::{
    FrameMetrics, OverscrollBehavior, PanGestureEvent, PanGesturePhase, PinchGestureEvent,
    PinchGesturePhase, RepaintRequest, ScrollDirection, ScrollMetadata, ScrollableNodeId,
    TimeStamp, TouchBehaviorFlags, TouchEvent,
};
use crossbeam_channel::Sender;
use log::{debug, warn};
use parking_lot::Mutex;
use smallvec::SmallVec;
use strum::IntoStaticStr;

use crate::animation::{FlingPhysics, GenericScrollAnimation, SpringAxis};
use crate::axis::{AxisState, OverscrollState, adjust_displacement};
use crate::handoff::OverscrollHandoffChain;
use crate::prefs::{ApzPrefs, AxisLockMode};

/// Displayport margin requested on each side of the composition bounds, in
/// CSS pixels.
const DISPLAYPORT_MARGIN: f32 = 128.0;
/// Offsets closer than this don't warrant a new repaint request.
const REPAINT_THRESHOLD: f32 = 0.5;
/// A flick this soon after an interrupted fling accelerates it instead of
/// starting from rest.
const FLING_ACCELERATION_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

/// The gesture state machine.
#[derive(Clone, Copy, Debug, Default, Eq, IntoStaticStr, PartialEq)]
pub enum ApzcState {
    #[default]
    Nothing,
    /// A touch point is down but has not exceeded the start tolerance.
    Touching,
    Panning,
    /// Panning constrained to the X axis.
    PanningLockedX,
    /// Panning constrained to the Y axis.
    PanningLockedY,
    /// Panning constrained to whichever axis currently dominates.
    PanningLockedDominantAxis,
    Pinching,
    Fling,
    OverscrollAnimation,
    SmoothScroll,
    WheelScroll,
}

impl ApzcState {
    pub fn is_panning(self) -> bool {
        matches!(
            self,
            ApzcState::Panning |
                ApzcState::PanningLockedX |
                ApzcState::PanningLockedY |
                ApzcState::PanningLockedDominantAxis
        )
    }

}

enum AnimationVariant {
    Fling {
        physics: FlingPhysics,
        chain: OverscrollHandoffChain,
        chain_index: usize,
    },
    Overscroll {
        x: SpringAxis,
        y: SpringAxis,
        last_sample: TimeStamp,
    },
    Scroll {
        animation: GenericScrollAnimation,
    },
}

struct ActiveAnimation {
    variant: AnimationVariant,
    /// Matched against the controller's generation before any deferred work
    /// for this animation is applied; a stale task is a no-op.
    generation: u64,
}

/// What the tree manager should do after a gesture ended on this controller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GestureEndAction {
    None,
    /// Start a fling with this seed velocity along the block's handoff
    /// chain.
    Fling(CSSVector),
}

/// One compositor-frame animation step.
#[derive(Debug, Default)]
pub struct SampleResult {
    /// Whether another frame must be scheduled.
    pub need_more: bool,
    /// Residual fling velocity to offer to the next handoff-chain link.
    pub fling_handoffs: SmallVec<[FlingHandoff; 1]>,
}

#[derive(Clone, Debug)]
pub struct FlingHandoff {
    pub velocity: CSSVector,
    pub chain: OverscrollHandoffChain,
    pub chain_index: usize,
    /// Only valid while the originating animation generation is live.
    pub generation: u64,
}

/// The visual effect of overscroll: a translation plus a stretch, applied by
/// the compositor on top of the async scroll offset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverscrollTransform {
    pub translation: CSSVector,
    pub stretch_x: f32,
    pub stretch_y: f32,
}

struct ApzcData {
    metrics: FrameMetrics,
    overscroll_behavior_x: OverscrollBehavior,
    overscroll_behavior_y: OverscrollBehavior,
    disregarded_direction: Option<ScrollDirection>,
    state: ApzcState,
    x: AxisState,
    y: AxisState,
    animation: Option<ActiveAnimation>,
    /// Bumped on every animation start and cancel.
    generation: u64,
    allowed_touch_behaviors: TouchBehaviorFlags,
    touch_start: Option<DevicePoint>,
    last_touch: Option<DevicePoint>,
    /// Accumulated pan-gesture position, for velocity tracking.
    pan_accumulator: CSSVector,
    /// Perpendicular travel since the axis lock engaged (sticky mode).
    lock_breakout_accumulator: f32,
    pinch_span: f32,
    last_repaint_offset: CSSPoint,
    /// Velocity and time of the most recently interrupted fling, kept so a
    /// quick follow-up flick can accelerate.
    interrupted_fling: Option<(CSSVector, TimeStamp)>,
}

pub struct AsyncPanZoomController {
    id: ScrollableNodeId,
    prefs: Arc<ApzPrefs>,
    repaint_tx: Sender<RepaintRequest>,
    data: Mutex<ApzcData>,
}

impl AsyncPanZoomController {
    pub fn new(
        metadata: &ScrollMetadata,
        prefs: Arc<ApzPrefs>,
        repaint_tx: Sender<RepaintRequest>,
    ) -> Self {
        let max_velocity = prefs.max_velocity;
        AsyncPanZoomController {
            id: metadata.scroll_id,
            prefs,
            repaint_tx,
            data: Mutex::new(ApzcData {
                metrics: metadata.metrics,
                overscroll_behavior_x: metadata.overscroll_behavior.x,
                overscroll_behavior_y: metadata.overscroll_behavior.y,
                disregarded_direction: metadata.disregarded_direction,
                state: ApzcState::Nothing,
                x: AxisState::new(max_velocity),
                y: AxisState::new(max_velocity),
                animation: None,
                generation: 0,
                allowed_touch_behaviors: TouchBehaviorFlags::all(),
                touch_start: None,
                last_touch: None,
                pan_accumulator: CSSVector::zero(),
                lock_breakout_accumulator: 0.0,
                pinch_span: 0.0,
                last_repaint_offset: metadata.metrics.visual_scroll_offset,
                interrupted_fling: None,
            }),
        }
    }

    pub fn id(&self) -> ScrollableNodeId {
        self.id
    }

    pub fn metrics(&self) -> FrameMetrics {
        self.data.lock().metrics
    }

    pub fn scroll_offset(&self) -> CSSPoint {
        self.data.lock().metrics.visual_scroll_offset
    }

    pub fn state(&self) -> ApzcState {
        self.data.lock().state
    }

    pub fn is_overscrolled(&self) -> bool {
        let data = self.data.lock();
        data.x.is_overscrolled() || data.y.is_overscrolled()
    }

    pub fn overscroll_amount(&self) -> CSSVector {
        let data = self.data.lock();
        CSSVector::new(data.x.overscroll, data.y.overscroll)
    }

    /// The transform the compositor applies while overscrolled: an
    /// asymptotic translation (the stretch can never exceed a fraction of
    /// the composition size) plus a proportional scale on the stretched
    /// axis.
    pub fn overscroll_transform(&self) -> OverscrollTransform {
        let data = self.data.lock();
        let composition = data.metrics.composition_size_in_css();

        fn asymptote(amount: f32, limit: f32) -> f32 {
            if limit <= 0.0 || amount == 0.0 {
                return 0.0;
            }
            let capped = limit * 0.35;
            capped * (1.0 - (-amount.abs() * 2.0 / limit).exp()) * amount.signum()
        }

        let tx = asymptote(data.x.overscroll, composition.width);
        let ty = asymptote(data.y.overscroll, composition.height);
        OverscrollTransform {
            // Content shifts away from the stretched edge.
            translation: CSSVector::new(-tx, -ty),
            stretch_x: 1.0 + if composition.width > 0.0 { tx.abs() / composition.width } else { 0.0 },
            stretch_y: 1.0 + if composition.height > 0.0 { ty.abs() / composition.height } else { 0.0 },
        }
    }

    pub fn set_allowed_touch_behaviors(&self, behaviors: TouchBehaviorFlags) {
        self.data.lock().allowed_touch_behaviors = behaviors;
    }

    /// Whether a pan whose accumulated travel is `delta` should be consumed,
    /// given the block's allowed touch behaviors. An ambiguous diagonal drag
    /// is conservatively consumed whenever any pan behavior is allowed.
    pub fn can_consume_pan(&self, delta: CSSVector) -> bool {
        let data = self.data.lock();
        self.can_consume_pan_locked(&data, delta)
    }

    fn can_consume_pan_locked(&self, data: &ApzcData, delta: CSSVector) -> bool {
        let allowed = data.allowed_touch_behaviors;
        let horizontal = allowed.contains(TouchBehaviorFlags::HORIZONTAL_PAN);
        let vertical = allowed.contains(TouchBehaviorFlags::VERTICAL_PAN);
        if horizontal && vertical {
            return true;
        }
        if !horizontal && !vertical {
            return false;
        }
        // The direction is ambiguous until one axis clearly dominates;
        // consume conservatively in the meantime.
        let ambiguous = (delta.x.abs() - delta.y.abs()).abs() < f32::EPSILON ||
            delta.x.abs().min(delta.y.abs()) > 0.5 * delta.x.abs().max(delta.y.abs());
        if ambiguous {
            return true;
        }
        if delta.x.abs() > delta.y.abs() { horizontal } else { vertical }
    }

    /// Zero out displacement components the block's touch behaviors forbid.
    fn apply_allowed_behaviors(&self, data: &ApzcData, displacement: CSSVector) -> CSSVector {
        let allowed = data.allowed_touch_behaviors;
        let x = if allowed.contains(TouchBehaviorFlags::HORIZONTAL_PAN) {
            displacement.x
        } else {
            0.0
        };
        let y = if allowed.contains(TouchBehaviorFlags::VERTICAL_PAN) {
            displacement.y
        } else {
            0.0
        };
        CSSVector::new(x, y)
    }

    // ---------------------------------------------------------------------
    // Animation lifecycle
    // ---------------------------------------------------------------------

    /// Force the controller back to `Nothing`. Any running animation is
    /// dropped and its generation invalidated, so a deferred task it
    /// scheduled can never fire. A recovery animation in progress is
    /// relieved in state only; the overscroll amount survives until the next
    /// release restarts recovery.
    pub fn cancel_animation(&self) {
        let mut data = self.data.lock();
        self.cancel_animation_locked(&mut data);
        self.assert_state_is_reset(&data);
    }

    fn cancel_animation_locked(&self, data: &mut ApzcData) {
        if data.animation.is_some() || data.state != ApzcState::Nothing {
            debug!("apzc {:?}: cancel animation in state {}", self.id, <&str>::from(data.state));
        }
        // An interrupted fling leaves its velocity behind so a follow-up
        // flick can accelerate from it.
        if let Some(ActiveAnimation {
            variant: AnimationVariant::Fling { physics, .. },
            ..
        }) = &data.animation
        {
            if !physics.is_finished() {
                data.interrupted_fling = Some((physics.velocity, physics.sample_time()));
            }
        }
        data.animation = None;
        data.generation = data.generation.wrapping_add(1);
        data.state = ApzcState::Nothing;
        data.x.interrupt_recovery();
        data.y.interrupt_recovery();
        data.x.velocity_tracker.clear();
        data.y.velocity_tracker.clear();
        data.touch_start = None;
        data.last_touch = None;
        data.pan_accumulator = CSSVector::zero();
        data.lock_breakout_accumulator = 0.0;
    }

    /// Post-condition check after a total cancel. Debug builds hard-fail;
    /// release builds have already been clamped to the safe state by
    /// `cancel_animation_locked`.
    fn assert_state_is_reset(&self, data: &ApzcData) {
        debug_assert_eq!(data.state, ApzcState::Nothing);
        debug_assert!(data.animation.is_none());
        debug_assert!(data.touch_start.is_none());
    }

    pub fn start_fling(
        &self,
        velocity: CSSVector,
        chain: OverscrollHandoffChain,
        chain_index: usize,
        now: TimeStamp,
    ) {
        let mut data = self.data.lock();
        let mut seed = velocity;

        // A fling started while the previous one (possibly interrupted by
        // the flick's own touch-down) is still fast accelerates: repeated
        // flicks build up speed.
        let previous = match &data.animation {
            Some(ActiveAnimation {
                variant: AnimationVariant::Fling { physics, .. },
                ..
            }) => Some((physics.velocity, physics.sample_time())),
            _ => data.interrupted_fling,
        };
        if let Some((velocity, at)) = previous {
            let fresh = now.duration_since(at) <= FLING_ACCELERATION_INTERVAL;
            let same_direction = |a: f32, b: f32| a * b > 0.0;
            if fresh &&
                velocity.length() > self.prefs.fling_acceleration_threshold &&
                (same_direction(velocity.x, seed.x) || same_direction(velocity.y, seed.y))
            {
                seed *= self.prefs.fling_acceleration_multiplier;
            }
        }

        let max = self.prefs.max_velocity;
        seed.x = seed.x.clamp(-max, max);
        seed.y = seed.y.clamp(-max, max);
        data.interrupted_fling = None;

        data.generation = data.generation.wrapping_add(1);
        let generation = data.generation;
        data.animation = Some(ActiveAnimation {
            variant: AnimationVariant::Fling {
                physics: FlingPhysics::new(
                    seed,
                    self.prefs.fling_friction,
                    self.prefs.fling_stopped_threshold,
                    now,
                ),
                chain,
                chain_index,
            },
            generation,
        });
        data.state = ApzcState::Fling;
    }

    /// Start (or restart) the spring-back animation for whatever stretch is
    /// currently accumulated, seeded with the given velocity.
    pub fn start_overscroll_recovery(&self, velocity: CSSVector, now: TimeStamp) {
        let mut data = self.data.lock();
        if !data.x.is_overscrolled() && !data.y.is_overscrolled() {
            return;
        }
        self.start_overscroll_recovery_locked(&mut data, velocity, now);
    }

    fn start_overscroll_recovery_locked(
        &self,
        data: &mut ApzcData,
        velocity: CSSVector,
        now: TimeStamp,
    ) {
        data.generation = data.generation.wrapping_add(1);
        let generation = data.generation;
        data.animation = Some(ActiveAnimation {
            variant: AnimationVariant::Overscroll {
                x: SpringAxis::new(data.x.overscroll, velocity.x),
                y: SpringAxis::new(data.y.overscroll, velocity.y),
                last_sample: now,
            },
            generation,
        });
        data.state = ApzcState::OverscrollAnimation;
        if data.x.is_overscrolled() {
            data.x.overscroll_state = OverscrollState::Recovering;
        }
        if data.y.is_overscrolled() {
            data.y.overscroll_state = OverscrollState::Recovering;
        }
    }

    /// Programmatic smooth scroll to `destination`.
    pub fn start_smooth_scroll(&self, destination: CSSPoint, now: TimeStamp) {
        let mut data = self.data.lock();
        let destination = data.metrics.clamp_scroll_offset(destination);
        let start = data.metrics.visual_scroll_offset;
        let velocity = CSSVector::new(data.x.velocity(now), data.y.velocity(now));
        let animation = if self.prefs.smooth_scroll_msd {
            GenericScrollAnimation::msd(now, start, velocity, destination)
        } else {
            GenericScrollAnimation::bezier(
                now,
                start,
                destination,
                self.prefs.smooth_scroll_duration.as_secs_f32() * 1000.0,
            )
        };
        data.generation = data.generation.wrapping_add(1);
        let generation = data.generation;
        data.animation = Some(ActiveAnimation {
            variant: AnimationVariant::Scroll { animation },
            generation,
        });
        data.state = ApzcState::SmoothScroll;
    }

    pub fn animation_generation(&self) -> u64 {
        self.data.lock().generation
    }

    // ---------------------------------------------------------------------
    // Touch gesture handling
    // ---------------------------------------------------------------------

    pub fn handle_touch_down(&self, point: DevicePoint, now: TimeStamp) {
        let mut data = self.data.lock();
        // A touch-down lands mid-animation: stop the animation at once, but
        // keep any overscroll stretch for the next release to recover.
        self.cancel_animation_locked(&mut data);
        data.state = ApzcState::Touching;
        data.touch_start = Some(point);
        data.last_touch = Some(point);
        let css = point / data.metrics.zoom;
        data.x.velocity_tracker.start_tracking(css.x, now);
        data.y.velocity_tracker.start_tracking(css.y, now);
    }

    /// Track a touch move. Returns the content displacement to dispatch
    /// along the handoff chain, if the gesture is (now) panning.
    pub fn handle_touch_move(&self, event: &TouchEvent) -> Option<CSSVector> {
        let mut data = self.data.lock();
        let zoom = data.metrics.zoom;

        // Feed historical sub-samples through the same velocity path as
        // ordinary moves, oldest first, so coalesced delivery estimates the
        // same velocity as separate events.
        for sample in &event.historical {
            let css = sample.point / zoom;
            data.x.velocity_tracker.add_position(css.x, sample.timestamp);
            data.y.velocity_tracker.add_position(css.y, sample.timestamp);
        }
        let css = event.point / zoom;
        data.x.velocity_tracker.add_position(css.x, event.timestamp);
        data.y.velocity_tracker.add_position(css.y, event.timestamp);

        match data.state {
            ApzcState::Touching => {
                let start = data.touch_start?;
                let travel = event.point - start;
                if travel.length() < self.prefs.touch_start_tolerance {
                    data.last_touch = Some(event.point);
                    return None;
                }
                if !self.can_consume_pan_locked(&data, travel / zoom) {
                    // touch-action forbids this pan. Stay in Touching so a
                    // later move in an allowed direction can still start one.
                    data.last_touch = Some(event.point);
                    return None;
                }
                // The tolerance distance is swallowed: panning applies
                // movement from here on, never a catch-up jump.
                data.state = self.initial_pan_state(travel.x.abs(), travel.y.abs());
                data.last_touch = Some(event.point);
                data.lock_breakout_accumulator = 0.0;
                None
            },
            state if state.is_panning() => {
                let last = data.last_touch.unwrap_or(event.point);
                data.last_touch = Some(event.point);
                let finger = (event.point - last) / zoom;
                // Content moves opposite the finger.
                let displacement = self.apply_allowed_behaviors(&data, -finger);
                if displacement == CSSVector::zero() {
                    return None;
                }
                Some(self.constrain_to_lock(&mut data, displacement))
            },
            _ => None,
        }
    }

    /// End the touch gesture. Idempotent: a duplicate terminal event finds
    /// the state machine already at rest and does nothing.
    pub fn handle_touch_up(&self, now: TimeStamp) -> GestureEndAction {
        let mut data = self.data.lock();
        match data.state {
            state if state.is_panning() => {
                let finger = CSSVector::new(data.x.velocity(now), data.y.velocity(now));
                let velocity = self.constrain_to_lock_readonly(&data, -finger);
                data.state = ApzcState::Nothing;
                data.touch_start = None;
                data.last_touch = None;
                if data.x.is_overscrolled() || data.y.is_overscrolled() {
                    self.start_overscroll_recovery_locked(&mut data, velocity, now);
                    GestureEndAction::None
                } else if velocity.length() >= self.prefs.fling_min_velocity {
                    GestureEndAction::Fling(velocity)
                } else {
                    GestureEndAction::None
                }
            },
            ApzcState::Touching => {
                data.state = ApzcState::Nothing;
                data.touch_start = None;
                data.last_touch = None;
                if data.x.is_overscrolled() || data.y.is_overscrolled() {
                    // The tap interrupted a recovery; restart it.
                    self.start_overscroll_recovery_locked(&mut data, CSSVector::zero(), now);
                }
                GestureEndAction::None
            },
            _ => GestureEndAction::None,
        }
    }

    pub fn handle_touch_cancel(&self, now: TimeStamp) {
        let mut data = self.data.lock();
        if data.state.is_panning() || data.state == ApzcState::Touching {
            data.state = ApzcState::Nothing;
            data.touch_start = None;
            data.last_touch = None;
            data.x.velocity_tracker.clear();
            data.y.velocity_tracker.clear();
            if data.x.is_overscrolled() || data.y.is_overscrolled() {
                self.start_overscroll_recovery_locked(&mut data, CSSVector::zero(), now);
            }
        }
    }

    fn initial_pan_state(&self, abs_x: f32, abs_y: f32) -> ApzcState {
        match self.prefs.axis_lock_mode {
            AxisLockMode::Free => ApzcState::Panning,
            AxisLockMode::Dominant => ApzcState::PanningLockedDominantAxis,
            AxisLockMode::Standard | AxisLockMode::Sticky => {
                if abs_x > abs_y {
                    ApzcState::PanningLockedX
                } else {
                    ApzcState::PanningLockedY
                }
            },
        }
    }

    fn constrain_to_lock(&self, data: &mut ApzcData, displacement: CSSVector) -> CSSVector {
        match data.state {
            ApzcState::PanningLockedX => {
                if self.prefs.axis_lock_mode == AxisLockMode::Sticky {
                    data.lock_breakout_accumulator += displacement.y.abs();
                    if data.lock_breakout_accumulator > self.prefs.axis_breakout_distance {
                        data.state = ApzcState::PanningLockedY;
                        data.lock_breakout_accumulator = 0.0;
                        return CSSVector::new(0.0, displacement.y);
                    }
                }
                CSSVector::new(displacement.x, 0.0)
            },
            ApzcState::PanningLockedY => {
                if self.prefs.axis_lock_mode == AxisLockMode::Sticky {
                    data.lock_breakout_accumulator += displacement.x.abs();
                    if data.lock_breakout_accumulator > self.prefs.axis_breakout_distance {
                        data.state = ApzcState::PanningLockedX;
                        data.lock_breakout_accumulator = 0.0;
                        return CSSVector::new(displacement.x, 0.0);
                    }
                }
                CSSVector::new(0.0, displacement.y)
            },
            ApzcState::PanningLockedDominantAxis => {
                if displacement.x.abs() > displacement.y.abs() {
                    CSSVector::new(displacement.x, 0.0)
                } else {
                    CSSVector::new(0.0, displacement.y)
                }
            },
            _ => displacement,
        }
    }

    fn constrain_to_lock_readonly(&self, data: &ApzcData, vector: CSSVector) -> CSSVector {
        match data.state {
            ApzcState::PanningLockedX => CSSVector::new(vector.x, 0.0),
            ApzcState::PanningLockedY => CSSVector::new(0.0, vector.y),
            ApzcState::PanningLockedDominantAxis => {
                if vector.x.abs() > vector.y.abs() {
                    CSSVector::new(vector.x, 0.0)
                } else {
                    CSSVector::new(0.0, vector.y)
                }
            },
            _ => vector,
        }
    }

    // ---------------------------------------------------------------------
    // Pan-gesture handling
    // ---------------------------------------------------------------------

    /// Handle one pan-gesture event. Returns the content displacement to
    /// dispatch, if any.
    pub fn handle_pan_gesture(&self, event: &PanGestureEvent) -> Option<CSSVector> {
        let mut data = self.data.lock();
        match event.phase {
            PanGesturePhase::MayStart | PanGesturePhase::Interrupted => {
                // Fingers down without motion: stop animations, produce
                // nothing content-visible. Keeps overscroll for recovery.
                self.cancel_animation_locked(&mut data);
                None
            },
            PanGesturePhase::Cancelled => {
                data.state = ApzcState::Nothing;
                data.pan_accumulator = CSSVector::zero();
                None
            },
            PanGesturePhase::Start => {
                self.cancel_animation_locked(&mut data);
                data.state = self.initial_pan_state(event.delta.x.abs(), event.delta.y.abs());
                data.pan_accumulator = CSSVector::zero();
                data.x.velocity_tracker.start_tracking(0.0, event.timestamp);
                data.y.velocity_tracker.start_tracking(0.0, event.timestamp);
                self.pan_displacement(&mut data, event)
            },
            PanGesturePhase::Pan => {
                if !data.state.is_panning() {
                    // A Pan without a Start (e.g. the Start was part of a
                    // prevented block): begin a pan here.
                    data.state = self.initial_pan_state(event.delta.x.abs(), event.delta.y.abs());
                    data.pan_accumulator = CSSVector::zero();
                    data.x.velocity_tracker.start_tracking(0.0, event.timestamp);
                    data.y.velocity_tracker.start_tracking(0.0, event.timestamp);
                }
                self.pan_displacement(&mut data, event)
            },
            PanGesturePhase::End => {
                if !data.state.is_panning() {
                    // Duplicate terminal event; the first one already reset
                    // the state machine.
                    return None;
                }
                data.state = ApzcState::Nothing;
                data.pan_accumulator = CSSVector::zero();
                if data.x.is_overscrolled() || data.y.is_overscrolled() {
                    let velocity =
                        CSSVector::new(data.x.velocity(event.timestamp), data.y.velocity(event.timestamp));
                    self.start_overscroll_recovery_locked(&mut data, velocity, event.timestamp);
                }
                None
            },
            PanGesturePhase::MomentumStart => {
                data.state = ApzcState::Panning;
                None
            },
            PanGesturePhase::MomentumPan => {
                if !data.state.is_panning() {
                    data.state = ApzcState::Panning;
                }
                self.pan_displacement(&mut data, event)
            },
            PanGesturePhase::MomentumEnd => {
                if data.state.is_panning() {
                    data.state = ApzcState::Nothing;
                    data.pan_accumulator = CSSVector::zero();
                    if data.x.is_overscrolled() || data.y.is_overscrolled() {
                        self.start_overscroll_recovery_locked(
                            &mut data,
                            CSSVector::zero(),
                            event.timestamp,
                        );
                    }
                }
                None
            },
        }
    }

    fn pan_displacement(&self, data: &mut ApzcData, event: &PanGestureEvent) -> Option<CSSVector> {
        let displacement = event.delta / data.metrics.zoom;
        data.pan_accumulator += displacement;
        let accumulated = data.pan_accumulator;
        data.x.velocity_tracker.add_position(accumulated.x, event.timestamp);
        data.y.velocity_tracker.add_position(accumulated.y, event.timestamp);
        if displacement == CSSVector::zero() {
            return None;
        }
        Some(self.constrain_to_lock(data, displacement))
    }

    // ---------------------------------------------------------------------
    // Wheel handling
    // ---------------------------------------------------------------------

    /// Apply a wheel delta (already converted to CSS pixels). Returns the
    /// leftover displacement for handoff.
    pub fn handle_wheel(&self, delta: CSSVector, now: TimeStamp) -> CSSVector {
        let mut data = self.data.lock();
        let delta = self.drop_disregarded(&data, delta);
        if delta == CSSVector::zero() {
            return CSSVector::zero();
        }

        if self.prefs.smooth_scroll_msd || self.prefs.smooth_scroll_duration.as_millis() > 0 {
            return self.wheel_animation(&mut data, delta, now);
        }
        self.wheel_instant(&mut data, delta)
    }

    fn wheel_animation(&self, data: &mut ApzcData, delta: CSSVector, now: TimeStamp) -> CSSVector {
        let current_destination = match &data.animation {
            Some(ActiveAnimation {
                variant: AnimationVariant::Scroll { animation },
                ..
            }) if data.state == ApzcState::WheelScroll => animation.destination(),
            _ => data.metrics.visual_scroll_offset,
        };
        let desired = current_destination + delta;
        let clamped = data.metrics.clamp_scroll_offset(desired);
        let leftover = desired - clamped;

        if clamped != current_destination {
            match &mut data.animation {
                Some(ActiveAnimation {
                    variant: AnimationVariant::Scroll { animation },
                    ..
                }) if data.state == ApzcState::WheelScroll => {
                    animation.update_destination(now, clamped);
                },
                _ => {
                    let start = data.metrics.visual_scroll_offset;
                    let animation = if self.prefs.smooth_scroll_msd {
                        GenericScrollAnimation::msd(now, start, CSSVector::zero(), clamped)
                    } else {
                        GenericScrollAnimation::bezier(
                            now,
                            start,
                            clamped,
                            self.prefs.smooth_scroll_duration.as_secs_f32() * 1000.0,
                        )
                    };
                    data.generation = data.generation.wrapping_add(1);
                    let generation = data.generation;
                    data.animation = Some(ActiveAnimation {
                        variant: AnimationVariant::Scroll { animation },
                        generation,
                    });
                    data.state = ApzcState::WheelScroll;
                },
            }
        }

        self.prune_epsilon(leftover)
    }

    fn wheel_instant(&self, data: &mut ApzcData, delta: CSSVector) -> CSSVector {
        let leftover = self.apply_displacement_locked(data, delta, false);
        self.request_repaint_locked(data);
        leftover
    }

    // ---------------------------------------------------------------------
    // Displacement application (the handoff building block)
    // ---------------------------------------------------------------------

    /// Apply as much of `displacement` as this frame's scroll range allows,
    /// returning the leftover. Never touches overscroll; the tree manager
    /// routes leftover into [`overscroll_by`](Self::overscroll_by) on the
    /// gesture's origin once the chain is exhausted.
    pub fn apply_displacement(&self, displacement: CSSVector) -> CSSVector {
        let mut data = self.data.lock();
        let leftover = self.apply_displacement_locked(&mut data, displacement, false);
        self.request_repaint_locked(&mut data);
        leftover
    }

    fn apply_displacement_locked(
        &self,
        data: &mut ApzcData,
        displacement: CSSVector,
        from_animation: bool,
    ) -> CSSVector {
        let displacement = if from_animation {
            displacement
        } else {
            self.drop_disregarded(data, displacement)
        };
        let range = data.metrics.scroll_range();
        let offset = data.metrics.visual_scroll_offset;
        let epsilon = self.prefs.boundary_epsilon;

        let dx = adjust_displacement(offset.x, displacement.x, range.min_x(), range.max_x(), epsilon);
        let dy = adjust_displacement(offset.y, displacement.y, range.min_y(), range.max_y(), epsilon);

        data.metrics.visual_scroll_offset = CSSPoint::new(offset.x + dx.allowed, offset.y + dy.allowed);
        CSSVector::new(dx.overscroll, dy.overscroll)
    }

    /// How much of `displacement` this frame could absorb without moving,
    /// used to skip direction-incompatible handoff links.
    pub fn can_scroll_in(&self, displacement: CSSVector) -> bool {
        let data = self.data.lock();
        let displacement = self.drop_disregarded(&data, displacement);
        let range = data.metrics.scroll_range();
        let offset = data.metrics.visual_scroll_offset;
        let epsilon = self.prefs.boundary_epsilon;
        let dx = adjust_displacement(offset.x, displacement.x, range.min_x(), range.max_x(), epsilon);
        let dy = adjust_displacement(offset.y, displacement.y, range.min_y(), range.max_y(), epsilon);
        dx.allowed.abs() >= epsilon || dy.allowed.abs() >= epsilon
    }

    /// Whether handoff may continue past this frame on each axis, per its
    /// `overscroll-behavior`.
    pub fn allows_handoff(&self) -> (bool, bool) {
        let data = self.data.lock();
        (
            data.overscroll_behavior_x == OverscrollBehavior::Auto,
            data.overscroll_behavior_y == OverscrollBehavior::Auto,
        )
    }

    /// Stretch past the edge. `is_momentum` displacement may deepen an
    /// existing stretch but never initiate one: momentum is a continuation,
    /// not a re-trigger.
    pub fn overscroll_by(&self, amount: CSSVector, is_momentum: bool) {
        let mut data = self.data.lock();
        let allow_x = data.overscroll_behavior_x != OverscrollBehavior::None &&
            data.disregarded_direction != Some(ScrollDirection::Horizontal) &&
            (!is_momentum || data.x.is_overscrolled());
        let allow_y = data.overscroll_behavior_y != OverscrollBehavior::None &&
            data.disregarded_direction != Some(ScrollDirection::Vertical) &&
            (!is_momentum || data.y.is_overscrolled());
        if allow_x {
            data.x.overscroll_by(amount.x);
        }
        if allow_y {
            data.y.overscroll_by(amount.y);
        }
    }

    fn drop_disregarded(&self, data: &ApzcData, mut displacement: CSSVector) -> CSSVector {
        match data.disregarded_direction {
            Some(ScrollDirection::Horizontal) => displacement.x = 0.0,
            Some(ScrollDirection::Vertical) => displacement.y = 0.0,
            None => {},
        }
        displacement
    }

    fn prune_epsilon(&self, mut v: CSSVector) -> CSSVector {
        if v.x.abs() < self.prefs.boundary_epsilon {
            v.x = 0.0;
        }
        if v.y.abs() < self.prefs.boundary_epsilon {
            v.y = 0.0;
        }
        v
    }

    // ---------------------------------------------------------------------
    // Pinch handling
    // ---------------------------------------------------------------------

    pub fn handle_pinch(&self, event: &PinchGestureEvent) {
        let mut data = self.data.lock();
        match event.phase {
            PinchGesturePhase::Start => {
                if !data
                    .allowed_touch_behaviors
                    .contains(TouchBehaviorFlags::PINCH_ZOOM)
                {
                    return;
                }
                self.cancel_animation_locked(&mut data);
                data.state = ApzcState::Pinching;
                data.pinch_span = event.span.max(1.0);
            },
            PinchGesturePhase::Scale => {
                if data.state != ApzcState::Pinching {
                    return;
                }
                if !data.metrics.is_root_content {
                    // Only the root content frame zooms.
                    return;
                }
                let old_span = data.pinch_span.max(1.0);
                let new_span = event.span.max(1.0);
                data.pinch_span = new_span;
                let factor = new_span / old_span;

                let old_zoom = data.metrics.zoom;
                let new_zoom =
                    (old_zoom.get() * factor).clamp(self.prefs.min_zoom, self.prefs.max_zoom);
                if new_zoom == old_zoom.get() {
                    return;
                }
                // Keep the content point under the pinch focus stationary.
                let focus = event.focus - data.metrics.composition_bounds.origin.to_vector();
                let offset = data.metrics.visual_scroll_offset;
                let shift = CSSVector::new(
                    focus.x / old_zoom.get() - focus.x / new_zoom,
                    focus.y / old_zoom.get() - focus.y / new_zoom,
                );
                data.metrics.zoom = apz_traits::units::Zoom::new(new_zoom);
                data.metrics.visual_scroll_offset =
                    data.metrics.clamp_scroll_offset(offset + shift);
                self.request_repaint_locked(&mut data);
            },
            PinchGesturePhase::End => {
                if data.state == ApzcState::Pinching {
                    data.state = ApzcState::Nothing;
                    data.pinch_span = 0.0;
                }
            },
        }
    }

    // ---------------------------------------------------------------------
    // Sampling (compositor thread)
    // ---------------------------------------------------------------------

    /// Advance the active animation to `now`. Called once per vsync by the
    /// sampler.
    pub fn sample_animation(&self, now: TimeStamp) -> SampleResult {
        let mut data = self.data.lock();
        let mut result = SampleResult::default();

        let Some(mut active) = data.animation.take() else {
            return result;
        };
        if active.generation != data.generation {
            // A cancel raced this sample; the animation is dead.
            warn!("apzc {:?}: sampled a cancelled animation", self.id);
            return result;
        }

        match &mut active.variant {
            AnimationVariant::Fling {
                physics,
                chain,
                chain_index,
            } => {
                let displacement = physics.sample(now);
                let leftover = self.apply_displacement_locked(&mut data, displacement, true);

                let mut spring_velocity = CSSVector::zero();
                let mut handoff_velocity = CSSVector::zero();
                for (axis_leftover, velocity, spring_seed, handoff_seed) in [
                    (leftover.x, physics.velocity.x, &mut spring_velocity.x, &mut handoff_velocity.x),
                    (leftover.y, physics.velocity.y, &mut spring_velocity.y, &mut handoff_velocity.y),
                ] {
                    if axis_leftover != 0.0 {
                        if self.prefs.allow_fling_handoff && chain.link(*chain_index + 1).is_some() {
                            *handoff_seed = velocity;
                        } else {
                            *spring_seed = velocity;
                        }
                    }
                }

                // Zero the exhausted axes so the local fling does not keep
                // pushing into the wall.
                if leftover.x != 0.0 {
                    physics.velocity.x = 0.0;
                }
                if leftover.y != 0.0 {
                    physics.velocity.y = 0.0;
                }

                if handoff_velocity != CSSVector::zero() {
                    result.fling_handoffs.push(FlingHandoff {
                        velocity: handoff_velocity,
                        chain: chain.clone(),
                        chain_index: *chain_index + 1,
                        generation: active.generation,
                    });
                }

                if spring_velocity != CSSVector::zero() {
                    // The edge stops the fling on this axis; the remaining
                    // momentum stretches into overscroll and springs back.
                    self.overscroll_into_spring(&mut data, spring_velocity, now);
                    result.need_more = true;
                    return result;
                }

                if physics.is_finished() {
                    if data.x.is_overscrolled() || data.y.is_overscrolled() {
                        self.start_overscroll_recovery_locked(&mut data, CSSVector::zero(), now);
                        result.need_more = true;
                    } else {
                        data.state = ApzcState::Nothing;
                    }
                } else {
                    data.animation = Some(active);
                    result.need_more = true;
                }
                self.request_repaint_locked(&mut data);
            },
            AnimationVariant::Overscroll { x, y, last_sample } => {
                let dt = now.ms_since(*last_sample);
                *last_sample = now;
                let stiffness = self.prefs.spring_stiffness;
                let damping = self.prefs.spring_damping_ratio;
                x.step(dt, stiffness, damping);
                y.step(dt, stiffness, damping);
                data.x.overscroll = x.amount;
                data.y.overscroll = y.amount;

                if x.is_finished() && y.is_finished() {
                    // Exactly zero, not merely close: the springs snap their
                    // terminal value.
                    data.x.clear_overscroll();
                    data.y.clear_overscroll();
                    data.state = ApzcState::Nothing;
                } else {
                    data.animation = Some(active);
                    result.need_more = true;
                }
            },
            AnimationVariant::Scroll { animation } => {
                let position = animation.position_at(now);
                let displacement = position - data.metrics.visual_scroll_offset;
                let finished = animation.is_finished(now);
                if finished {
                    data.x.velocity_tracker.clear();
                    data.y.velocity_tracker.clear();
                }

                let before = data.metrics.visual_scroll_offset;
                let leftover = self.apply_displacement_locked(&mut data, displacement, true);
                let moved = data.metrics.visual_scroll_offset != before;

                if let Some(direction) = animation.direction_forced_to_overscroll {
                    let amount = match direction {
                        ScrollDirection::Horizontal => CSSVector::new(leftover.x, 0.0),
                        ScrollDirection::Vertical => CSSVector::new(0.0, leftover.y),
                    };
                    self.overscroll_by_locked(&mut data, amount, false);
                }

                if finished {
                    data.state = ApzcState::Nothing;
                } else if displacement != CSSVector::zero() && !moved {
                    // Content cannot move in the requested direction at all;
                    // free-wheeling against the wall helps nobody.
                    data.state = ApzcState::Nothing;
                } else {
                    data.animation = Some(active);
                    result.need_more = true;
                }
                self.request_repaint_locked(&mut data);
            },
        }

        result
    }

    fn overscroll_into_spring(&self, data: &mut ApzcData, velocity: CSSVector, now: TimeStamp) {
        data.generation = data.generation.wrapping_add(1);
        let generation = data.generation;
        let can_x = data.overscroll_behavior_x != OverscrollBehavior::None;
        let can_y = data.overscroll_behavior_y != OverscrollBehavior::None;
        data.animation = Some(ActiveAnimation {
            variant: AnimationVariant::Overscroll {
                x: SpringAxis::new(data.x.overscroll, if can_x { velocity.x } else { 0.0 }),
                y: SpringAxis::new(data.y.overscroll, if can_y { velocity.y } else { 0.0 }),
                last_sample: now,
            },
            generation,
        });
        data.state = ApzcState::OverscrollAnimation;
        if can_x && (data.x.is_overscrolled() || velocity.x != 0.0) {
            data.x.overscroll_state = OverscrollState::Recovering;
        }
        if can_y && (data.y.is_overscrolled() || velocity.y != 0.0) {
            data.y.overscroll_state = OverscrollState::Recovering;
        }
    }

    fn overscroll_by_locked(&self, data: &mut ApzcData, amount: CSSVector, is_momentum: bool) {
        let allow_x = data.overscroll_behavior_x != OverscrollBehavior::None &&
            (!is_momentum || data.x.is_overscrolled());
        let allow_y = data.overscroll_behavior_y != OverscrollBehavior::None &&
            (!is_momentum || data.y.is_overscrolled());
        if allow_x {
            data.x.overscroll_by(amount.x);
        }
        if allow_y {
            data.y.overscroll_by(amount.y);
        }
    }

    // ---------------------------------------------------------------------
    // Layer-tree updates (controller thread, from the layout collaborator)
    // ---------------------------------------------------------------------

    /// Reconcile with a new layout/content snapshot. Idempotent: applying
    /// the same metadata twice is a no-op.
    pub fn notify_layers_updated(
        &self,
        metadata: &ScrollMetadata,
        is_first_paint: bool,
        this_layer_tree_updated: bool,
    ) {
        let mut data = self.data.lock();
        let old_metrics = data.metrics;

        data.overscroll_behavior_x = metadata.overscroll_behavior.x;
        data.overscroll_behavior_y = metadata.overscroll_behavior.y;
        data.disregarded_direction = metadata.disregarded_direction;

        if is_first_paint {
            self.cancel_animation_locked(&mut data);
            data.x.clear_overscroll();
            data.y.clear_overscroll();
            data.metrics = metadata.metrics;
            data.last_repaint_offset = metadata.metrics.visual_scroll_offset;
            return;
        }

        if !this_layer_tree_updated {
            return;
        }

        // Adopt the new geometry but decide separately what to do with the
        // main thread's scroll offset.
        let busy = data.state != ApzcState::Nothing || data.animation.is_some();
        let our_offset = data.metrics.visual_scroll_offset;
        data.metrics = metadata.metrics;

        if busy {
            // An active gesture or animation owns the visual offset; a paint
            // landing mid-gesture must not yank it (the composited position
            // would jump backwards).
            data.metrics.visual_scroll_offset = our_offset;
            let layout_shift = metadata.metrics.visual_scroll_offset - old_metrics.visual_scroll_offset;
            if layout_shift != CSSVector::zero() {
                if let Some(ActiveAnimation {
                    variant: AnimationVariant::Scroll { animation },
                    ..
                }) = &mut data.animation
                {
                    animation.apply_content_shift(layout_shift);
                }
            }
            let live_metrics = data.metrics;
            if let Some(ActiveAnimation {
                variant: AnimationVariant::Scroll { animation },
                ..
            }) = &mut data.animation
            {
                // Content size may have changed; the destination must stay
                // inside the live scroll range.
                let clamped = live_metrics.clamp_scroll_offset(animation.destination());
                if clamped != animation.destination() {
                    // Re-seeding at the stored timestamp is not possible
                    // here; the next sample recovers continuity.
                    animation.apply_content_shift(clamped - animation.destination());
                }
            }
        }

        self.reconcile_overscroll(&mut data, &old_metrics);

        // When not overscrolled the offset must lie inside the (possibly
        // shrunk) scroll range.
        if !data.x.is_overscrolled() && !data.y.is_overscrolled() {
            data.metrics.visual_scroll_offset =
                data.metrics.clamp_scroll_offset(data.metrics.visual_scroll_offset);
        }
    }

    /// Content grew while overscrolled: growth at the stretched edge turns
    /// the stretch into real scroll offset and relieves it; growth at the
    /// opposite edge leaves the stretch untouched.
    fn reconcile_overscroll(&self, data: &mut ApzcData, old_metrics: &FrameMetrics) {
        let old_range = old_metrics.scroll_range();
        let new_range = data.metrics.scroll_range();

        if data.x.is_overscrolled() {
            let overscroll = data.x.overscroll;
            let grew_trailing = new_range.max_x() > old_range.max_x();
            let grew_leading = new_range.min_x() < old_range.min_x();
            if (overscroll > 0.0 && grew_trailing) || (overscroll < 0.0 && grew_leading) {
                data.metrics.visual_scroll_offset.x += overscroll;
                data.x.clear_overscroll();
            }
        }
        if data.y.is_overscrolled() {
            let overscroll = data.y.overscroll;
            let grew_trailing = new_range.max_y() > old_range.max_y();
            let grew_leading = new_range.min_y() < old_range.min_y();
            if (overscroll > 0.0 && grew_trailing) || (overscroll < 0.0 && grew_leading) {
                data.metrics.visual_scroll_offset.y += overscroll;
                data.y.clear_overscroll();
            }
        }
    }

    // ---------------------------------------------------------------------
    // Repaint requests
    // ---------------------------------------------------------------------

    pub fn request_repaint(&self) {
        let mut data = self.data.lock();
        self.request_repaint_locked(&mut data);
    }

    fn request_repaint_locked(&self, data: &mut ApzcData) {
        let offset = data.metrics.visual_scroll_offset;
        if (offset - data.last_repaint_offset).length() < REPAINT_THRESHOLD {
            return;
        }
        data.last_repaint_offset = offset;
        let request = RepaintRequest {
            scroll_id: self.id,
            scroll_offset: offset,
            displayport_margins: CSSMargins::new(
                DISPLAYPORT_MARGIN,
                DISPLAYPORT_MARGIN,
                DISPLAYPORT_MARGIN,
                DISPLAYPORT_MARGIN,
            ),
            zoom: data.metrics.zoom,
            scroll_generation: data.metrics.scroll_generation,
        };
        // Best-effort: a closed channel means the embedder went away.
        let _ = self.repaint_tx.send(request);
    }
}
