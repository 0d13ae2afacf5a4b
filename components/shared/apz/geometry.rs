/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use serde::{Deserialize, Serialize};

use crate::protocol::{ScrollGeneration, ScrollableNodeId};
use crate::units::{CSSPoint, CSSRect, CSSSize, DeviceRect, Zoom};

/// One axis of scrolling.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ScrollDirection {
    Horizontal,
    Vertical,
}

/// The `overscroll-behavior` CSS property value for one axis.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum OverscrollBehavior {
    /// Overscroll is allowed and unconsumed displacement hands off to the
    /// next scrollable ancestor.
    #[default]
    Auto,
    /// No handoff, but local overscroll effects still apply.
    Contain,
    /// No handoff and no local overscroll.
    None,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct OverscrollBehaviorInfo {
    pub x: OverscrollBehavior,
    pub y: OverscrollBehavior,
}

/// The geometry of one scrollable frame, replaced wholesale on every layout
/// or content update.
///
/// Invariant: when the frame is not overscrolled, `visual_scroll_offset` lies
/// within the scroll range on each axis.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct FrameMetrics {
    /// The bounds of the content, in CSS pixels, in the frame's own
    /// coordinate space.
    pub scrollable_rect: CSSRect,
    /// The area of the frame visible on screen, in device pixels.
    pub composition_bounds: DeviceRect,
    /// The scroll position the compositor is currently displaying.
    pub visual_scroll_offset: CSSPoint,
    /// CSS-to-device scale.
    pub zoom: Zoom,
    /// Whether this is the root content document's scroll frame.
    pub is_root_content: bool,
    /// Bumped by every main-thread scroll-position update, so the engine can
    /// tell a stale repaint acknowledgement from a fresh one.
    pub scroll_generation: ScrollGeneration,
}

impl FrameMetrics {
    /// The composition bounds converted into CSS pixels at the current zoom.
    pub fn composition_size_in_css(&self) -> CSSSize {
        if self.zoom.get() == 0.0 {
            return CSSSize::zero();
        }
        self.composition_bounds.size / self.zoom
    }

    /// The rect of valid scroll offsets. A frame whose content fits entirely
    /// within its composition bounds has an empty range on that axis.
    pub fn scroll_range(&self) -> CSSRect {
        let composition = self.composition_size_in_css();
        let size = CSSSize::new(
            (self.scrollable_rect.size.width - composition.width).max(0.0),
            (self.scrollable_rect.size.height - composition.height).max(0.0),
        );
        CSSRect::new(self.scrollable_rect.origin, size)
    }

    pub fn clamp_scroll_offset(&self, offset: CSSPoint) -> CSSPoint {
        let range = self.scroll_range();
        CSSPoint::new(
            offset.x.clamp(range.min_x(), range.max_x()),
            offset.y.clamp(range.min_y(), range.max_y()),
        )
    }

    /// Whether there is any room to scroll on either axis.
    pub fn can_scroll(&self) -> bool {
        let range = self.scroll_range();
        range.size.width > 0.0 || range.size.height > 0.0
    }
}

/// A `FrameMetrics` plus the per-node scrolling policy. One of these exists
/// per scrollable layer; a layer-tree update replaces it wholesale.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ScrollMetadata {
    pub scroll_id: ScrollableNodeId,
    pub metrics: FrameMetrics,
    pub overscroll_behavior: OverscrollBehaviorInfo,
    /// A direction in which this frame ignores scroll displacement entirely,
    /// e.g. the vertical axis of a single-line text control.
    pub disregarded_direction: Option<ScrollDirection>,
}
