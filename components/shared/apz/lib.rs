/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The interface to the `apz` crate.
//!
//! Everything the embedder, the content process, and the compositor need in
//! order to talk to the async pan/zoom engine lives here: typed pixel units,
//! the raw input-event union, scroll geometry snapshots, and the small
//! request/response protocols that cross the engine boundary. All of it is
//! `serde`-serializable so an embedding may put these types on an IPC channel.

#![deny(unsafe_code)]

mod geometry;
mod input_events;
mod protocol;
mod time;
pub mod units;

pub use geometry::{
    FrameMetrics, OverscrollBehavior, OverscrollBehaviorInfo, ScrollDirection, ScrollMetadata,
};
pub use input_events::{
    InputEvent, MouseButton, MouseButtonAction, MouseEvent, PanGestureEvent, PanGesturePhase,
    PinchGestureEvent, PinchGesturePhase, TouchBehaviorFlags, TouchEvent, TouchEventType, TouchId,
    TouchSample, WheelDelta, WheelDeltaMode, WheelEvent,
};
pub use protocol::{
    InputBlockId, InputEventResult, InputHandledStatus, RepaintRequest, ScrollGeneration,
    ScrollableNodeId,
};
pub use time::TimeStamp;
