/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::TimeStamp;
use crate::units::{DevicePoint, DeviceVector};

/// A raw input event submitted to the async pan/zoom engine.
///
/// Every variant carries a monotonic timestamp and screen-space coordinates.
/// The engine classifies a stream of these into input blocks; the embedder
/// should not try to pre-group them.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum InputEvent {
    Mouse(MouseEvent),
    PanGesture(PanGestureEvent),
    PinchGesture(PinchGestureEvent),
    Touch(TouchEvent),
    Wheel(WheelEvent),
}

impl InputEvent {
    pub fn point(&self) -> DevicePoint {
        match self {
            InputEvent::Mouse(event) => event.point,
            InputEvent::PanGesture(event) => event.point,
            InputEvent::PinchGesture(event) => event.focus,
            InputEvent::Touch(event) => event.point,
            InputEvent::Wheel(event) => event.point,
        }
    }

    pub fn timestamp(&self) -> TimeStamp {
        match self {
            InputEvent::Mouse(event) => event.timestamp,
            InputEvent::PanGesture(event) => event.timestamp,
            InputEvent::PinchGesture(event) => event.timestamp,
            InputEvent::Touch(event) => event.timestamp,
            InputEvent::Wheel(event) => event.timestamp,
        }
    }
}

/// An opaque identifier for a touch point.
///
/// <http://w3c.github.io/touch-events/#widl-Touch-identifier>
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TouchId(pub i32);

/// The type of input represented by a multi-touch event.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TouchEventType {
    /// A new touch point came in contact with the screen.
    Down,
    /// An existing touch point changed location.
    Move,
    /// A touch point was removed from the screen.
    Up,
    /// The system stopped tracking a touch point.
    Cancel,
}

/// A position sample reported retroactively on a touch-move event.
///
/// Platforms that coalesce input deliver skipped intermediate positions this
/// way; velocity estimation feeds them through the same path as ordinary
/// moves so the two deliveries are indistinguishable.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct TouchSample {
    pub point: DevicePoint,
    pub timestamp: TimeStamp,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TouchEvent {
    pub event_type: TouchEventType,
    pub id: TouchId,
    pub point: DevicePoint,
    pub timestamp: TimeStamp,
    /// Coalesced samples older than `point`, oldest first.
    pub historical: Vec<TouchSample>,
}

impl TouchEvent {
    pub fn new(
        event_type: TouchEventType,
        id: TouchId,
        point: DevicePoint,
        timestamp: TimeStamp,
    ) -> Self {
        TouchEvent {
            event_type,
            id,
            point,
            timestamp,
            historical: Vec::new(),
        }
    }

    pub fn with_historical(mut self, historical: Vec<TouchSample>) -> Self {
        self.historical = historical;
        self
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// The types of mouse events
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum MouseButtonAction {
    /// Mouse button down
    Down,
    /// Mouse moved with a button held
    Move,
    /// Mouse button up
    Up,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct MouseEvent {
    pub action: MouseButtonAction,
    pub button: MouseButton,
    pub point: DevicePoint,
    pub timestamp: TimeStamp,
}

/// The phase of a touchpad pan gesture.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum PanGesturePhase {
    /// The OS thinks a pan may be starting but is not yet sure.
    MayStart,
    /// The OS decided the gesture that might have started was not a pan.
    Cancelled,
    /// The pan definitely started.
    Start,
    /// A pan displacement.
    Pan,
    /// The user lifted their fingers.
    End,
    /// Momentum (inertial) scrolling generated by the OS begins.
    MomentumStart,
    /// A momentum displacement.
    MomentumPan,
    /// Momentum scrolling ended.
    MomentumEnd,
    /// Fingers were placed back on the pad without motion, interrupting any
    /// momentum. Produces no content-visible event by itself.
    Interrupted,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct PanGestureEvent {
    pub phase: PanGesturePhase,
    pub point: DevicePoint,
    pub delta: DeviceVector,
    pub timestamp: TimeStamp,
}

impl PanGestureEvent {
    pub fn is_momentum(&self) -> bool {
        matches!(
            self.phase,
            PanGesturePhase::MomentumStart |
                PanGesturePhase::MomentumPan |
                PanGesturePhase::MomentumEnd
        )
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum PinchGesturePhase {
    Start,
    Scale,
    End,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct PinchGestureEvent {
    pub phase: PinchGesturePhase,
    pub focus: DevicePoint,
    /// Distance between the two touch points, in device pixels. Zero for
    /// `End` events on platforms that do not report a final span.
    pub span: f32,
    pub timestamp: TimeStamp,
}

/// Mode to measure WheelDelta floats in
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum WheelDeltaMode {
    /// Delta values are specified in pixels
    Pixel,
    /// Delta values are specified in lines
    Line,
    /// Delta values are specified in pages
    Page,
}

/// The wheel event deltas in both axes
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct WheelDelta {
    /// Delta in the left/right direction
    pub x: f64,
    /// Delta in the up/down direction
    pub y: f64,
    /// Mode to measure the floats in
    pub mode: WheelDeltaMode,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct WheelEvent {
    pub delta: WheelDelta,
    pub point: DevicePoint,
    pub timestamp: TimeStamp,
}

bitflags! {
    /// The default actions content allows for a touch block, as reported by
    /// the touch-action computation on the main thread.
    #[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
    pub struct TouchBehaviorFlags: u8 {
        const HORIZONTAL_PAN = 1 << 0;
        const VERTICAL_PAN = 1 << 1;
        const PINCH_ZOOM = 1 << 2;
        const DOUBLE_TAP_ZOOM = 1 << 3;
    }
}

impl Default for TouchBehaviorFlags {
    fn default() -> Self {
        TouchBehaviorFlags::all()
    }
}
