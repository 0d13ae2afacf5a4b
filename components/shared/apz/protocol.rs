/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use serde::{Deserialize, Serialize};

use crate::units::{CSSMargins, CSSPoint, Zoom};

/// A stable identifier for a scrollable node, assigned by the layout
/// collaborator when the scrollable layer is first observed.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct ScrollableNodeId(pub u64);

/// An ID for a batch of raw events sharing one semantic gesture and one
/// (possibly provisional) target.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct InputBlockId(pub u64);

impl InputBlockId {
    pub fn next(&mut self) -> InputBlockId {
        self.0 = self.0.wrapping_add(1);
        *self
    }
}

/// A counter bumped by every main-thread scroll-position update.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct ScrollGeneration(pub u64);

/// How the engine consumed an input event. The embedding UI layer uses this
/// to decide whether to also dispatch the event elsewhere, e.g. as a DOM
/// event.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum InputHandledStatus {
    /// The engine will perform the default action; content must not.
    ConsumedNoDefault,
    /// The engine queued the event, but content may still prevent it.
    ConsumedDoesntPreventDefault,
    /// The event hit no scrollable region.
    Ignored,
}

/// The result of submitting one input event.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct InputEventResult {
    pub status: InputHandledStatus,
    /// The block the event was assigned to, when it was assigned to one.
    pub block_id: Option<InputBlockId>,
}

impl InputEventResult {
    pub fn ignored() -> Self {
        InputEventResult {
            status: InputHandledStatus::Ignored,
            block_id: None,
        }
    }
}

/// A best-effort notification asking the main thread to reconcile its scroll
/// position and displayport with the compositor's.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct RepaintRequest {
    pub scroll_id: ScrollableNodeId,
    pub scroll_offset: CSSPoint,
    pub displayport_margins: CSSMargins,
    pub zoom: Zoom,
    pub scroll_generation: ScrollGeneration,
}
