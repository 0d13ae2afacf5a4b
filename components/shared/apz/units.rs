/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Typed pixel spaces used throughout the engine.
//!
//! `CSSPixel` is the coordinate space of content: scroll offsets and
//! scrollable rects are measured in it. `DevicePixel` is the coordinate space
//! of raw input and composition bounds. The two are related by the current
//! zoom, carried as a `euclid::Scale` so the compiler rejects accidental
//! cross-space arithmetic.

use euclid::{Point2D, Rect, Scale, SideOffsets2D, Size2D, Vector2D};
use serde::{Deserialize, Serialize};

/// One CSS pixel, the unit of content-space geometry.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct CSSPixel;

/// One device pixel, the unit of screen-space input coordinates.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct DevicePixel;

pub type CSSPoint = Point2D<f32, CSSPixel>;
pub type CSSSize = Size2D<f32, CSSPixel>;
pub type CSSRect = Rect<f32, CSSPixel>;
pub type CSSVector = Vector2D<f32, CSSPixel>;
pub type CSSMargins = SideOffsets2D<f32, CSSPixel>;

pub type DevicePoint = Point2D<f32, DevicePixel>;
pub type DeviceSize = Size2D<f32, DevicePixel>;
pub type DeviceRect = Rect<f32, DevicePixel>;
pub type DeviceVector = Vector2D<f32, DevicePixel>;

/// The zoom applied to content: CSS pixels to device pixels.
pub type Zoom = Scale<f32, CSSPixel, DevicePixel>;
