/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! An asynchronous pan/zoom scrolling engine.
//!
//! Raw pointer, wheel, and pan-gesture input arrives on the controller
//! thread, where the [`InputQueue`](input_queue::InputQueue) classifies it
//! into blocks and the per-frame
//! [`AsyncPanZoomController`](apzc::AsyncPanZoomController) state machines
//! consume it. Active animations (flings, overscroll spring-back, smooth
//! scrolls) are advanced once per vsync by the compositor thread through
//! [`ApzcTreeManager::sample`](tree::ApzcTreeManager::sample). Displacement a
//! frame cannot consume is offered to its scrollable ancestors along a
//! handoff chain snapshotted when the input block was created.

#![deny(unsafe_code)]

pub mod animation;
pub mod apzc;
pub mod axis;
pub mod handoff;
pub mod input_queue;
pub mod prefs;
pub mod recent_events;
pub mod tree;
pub mod velocity;

pub use apzc::AsyncPanZoomController;
pub use prefs::{ApzPrefs, AxisLockMode};
pub use tree::{ApzcTreeManager, ScrollTreeLayer};
