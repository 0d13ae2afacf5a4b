/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The controller-thread entry point: owns every [`AsyncPanZoomController`],
//! routes raw input through the [`InputQueue`], and walks the handoff chain
//! when a frame cannot absorb a displacement.
//!
//! Locking discipline: the controller table lock is never held while a
//! controller mutex is taken, and no two controller mutexes are ever held at
//! once. Cross-controller work that a sample discovers (fling handoff) is
//! deferred until the discovering controller's lock is released, keyed by
//! its animation generation so a racing cancel makes the task a no-op.

use std::sync::Arc;

use apz_traits::units::{CSSPoint, CSSVector, DevicePoint, DeviceVector};
use apz_traits::{
    InputBlockId, InputEvent, InputEventResult, InputHandledStatus, RepaintRequest,
    ScrollMetadata, ScrollableNodeId, TimeStamp, TouchBehaviorFlags, TouchEventType,
    WheelDeltaMode, WheelEvent,
};
use crossbeam_channel::Receiver;
use log::{debug, trace};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::apzc::{AsyncPanZoomController, FlingHandoff, GestureEndAction};
use crate::handoff::OverscrollHandoffChain;
use crate::input_queue::{InputQueue, ReadyBlock, ReceiveResult};
use crate::prefs::ApzPrefs;

/// Device pixels per wheel "line" tick.
const WHEEL_LINE_SIZE: f32 = 40.0;

/// One scrollable layer in the tree handed over by the layout collaborator.
/// Parents must precede their children; hit testing picks the deepest match.
#[derive(Clone, Debug)]
pub struct ScrollTreeLayer {
    pub metadata: ScrollMetadata,
    pub parent: Option<ScrollableNodeId>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ScrollSource {
    Touch,
    Pan,
    PanMomentum,
    Wheel,
}

impl ScrollSource {
    fn may_overscroll(self) -> bool {
        !matches!(self, ScrollSource::Wheel)
    }

    fn is_momentum(self) -> bool {
        self == ScrollSource::PanMomentum
    }

    fn is_gesture(self) -> bool {
        matches!(self, ScrollSource::Touch | ScrollSource::Pan | ScrollSource::PanMomentum)
    }
}

struct DeferredFling {
    source: ScrollableNodeId,
    handoff: FlingHandoff,
}

pub struct ApzcTreeManager {
    prefs: Arc<ApzPrefs>,
    controllers: RwLock<FxHashMap<ScrollableNodeId, Arc<AsyncPanZoomController>>>,
    /// Parent links plus hit-test order (parents before children).
    layers: RwLock<Vec<ScrollTreeLayer>>,
    queue: Mutex<InputQueue>,
    deferred_flings: Mutex<Vec<DeferredFling>>,
    /// With immediate handoff disabled, the first frame that moves during a
    /// block owns the rest of that block's displacement.
    gesture_lock: Mutex<Option<(InputBlockId, ScrollableNodeId)>>,
    repaint_tx: crossbeam_channel::Sender<RepaintRequest>,
}

impl ApzcTreeManager {
    /// Create a manager and the channel on which repaint requests for the
    /// main thread are delivered.
    pub fn new(prefs: ApzPrefs) -> (Self, Receiver<RepaintRequest>) {
        let prefs = Arc::new(prefs);
        let (repaint_tx, repaint_rx) = crossbeam_channel::unbounded();
        let manager = ApzcTreeManager {
            prefs: prefs.clone(),
            controllers: RwLock::new(FxHashMap::default()),
            layers: RwLock::new(Vec::new()),
            queue: Mutex::new(InputQueue::new(prefs)),
            deferred_flings: Mutex::new(Vec::new()),
            gesture_lock: Mutex::new(None),
            repaint_tx,
        };
        (manager, repaint_rx)
    }

    // ---------------------------------------------------------------------
    // Scroll tree maintenance
    // ---------------------------------------------------------------------

    /// Adopt a new layer tree from the layout collaborator. Controllers are
    /// created for new scroll ids, reconciled for surviving ones, and torn
    /// down for ids no longer present.
    pub fn update_scroll_tree(&self, layers: Vec<ScrollTreeLayer>, is_first_paint: bool) {
        let mut live = Vec::with_capacity(layers.len());
        for layer in &layers {
            live.push(layer.metadata.scroll_id);
            let existing = self.controller(layer.metadata.scroll_id);
            match existing {
                Some(apzc) => {
                    apzc.notify_layers_updated(&layer.metadata, is_first_paint, true);
                },
                None => {
                    let apzc = Arc::new(AsyncPanZoomController::new(
                        &layer.metadata,
                        self.prefs.clone(),
                        self.repaint_tx.clone(),
                    ));
                    debug!("created apzc for {:?}", layer.metadata.scroll_id);
                    self.controllers.write().insert(layer.metadata.scroll_id, apzc);
                },
            }
        }

        let removed: Vec<_> = {
            let mut table = self.controllers.write();
            let stale: Vec<_> = table
                .keys()
                .filter(|id| !live.contains(id))
                .copied()
                .collect();
            stale.iter().filter_map(|id| table.remove(id)).collect()
        };
        for apzc in removed {
            debug!("destroying apzc for {:?}", apzc.id());
            apzc.cancel_animation();
        }

        *self.layers.write() = layers;
    }

    fn controller(&self, id: ScrollableNodeId) -> Option<Arc<AsyncPanZoomController>> {
        self.controllers.read().get(&id).cloned()
    }

    fn root_content_controller(&self) -> Option<Arc<AsyncPanZoomController>> {
        let ids: Vec<_> = self.controllers.read().values().cloned().collect();
        ids.into_iter().find(|apzc| apzc.metrics().is_root_content)
    }

    /// The deepest layer containing `point`, plus its ancestor chain.
    fn hit_test(&self, point: DevicePoint) -> Option<OverscrollHandoffChain> {
        let layers = self.layers.read();
        let target = layers
            .iter()
            .rev()
            .find(|layer| layer.metadata.metrics.composition_bounds.contains(point))?;

        let mut links = vec![target.metadata.scroll_id];
        let mut parent = target.parent;
        while let Some(id) = parent {
            links.push(id);
            parent = layers
                .iter()
                .find(|layer| layer.metadata.scroll_id == id)
                .and_then(|layer| layer.parent);
        }
        Some(OverscrollHandoffChain::new(links))
    }

    // ---------------------------------------------------------------------
    // Input entry points
    // ---------------------------------------------------------------------

    /// Submit one raw input event. Returns how the engine disposed of it and
    /// the block it joined, so the embedder can route the matching content
    /// response back via [`content_response_received`](Self::content_response_received).
    pub fn receive_input_event(&self, event: InputEvent, now: TimeStamp) -> InputEventResult {
        let Some(chain) = self.hit_test(event.point()) else {
            trace!("input at {:?} hit no scrollable layer", event.point());
            return InputEventResult::ignored();
        };

        // Content never observes an animation that input interrupted, so
        // stopping it cannot wait for the block to clear confirmation.
        let interrupts = match &event {
            InputEvent::Touch(touch) => touch.event_type == TouchEventType::Down,
            InputEvent::PanGesture(pan) => {
                pan.phase == apz_traits::PanGesturePhase::Interrupted ||
                    pan.phase == apz_traits::PanGesturePhase::MayStart
            },
            _ => false,
        };
        if interrupts {
            for id in chain.iter() {
                if let Some(apzc) = self.controller(id) {
                    apzc.cancel_animation();
                }
            }
        }

        let result = self.queue.lock().receive(event.clone(), chain, now);
        let status = match result {
            ReceiveResult::Queued(_) => InputHandledStatus::ConsumedDoesntPreventDefault,
            ReceiveResult::Immediate(id) => {
                let chain = self.queue.lock().chain_for(id).unwrap_or_default();
                let scrolled = self.process_event(&chain, &event, Some(id), now);
                if scrolled {
                    InputHandledStatus::ConsumedNoDefault
                } else {
                    InputHandledStatus::ConsumedDoesntPreventDefault
                }
            },
            ReceiveResult::Dropped(_) => InputHandledStatus::ConsumedDoesntPreventDefault,
        };

        self.drain_ready_blocks(now);
        InputEventResult {
            status,
            block_id: Some(result.block_id()),
        }
    }

    /// The authoritative hit test confirmed (or corrected) a block's target.
    /// The chain snapshotted at block creation stays authoritative: a tree
    /// restructure between creation and confirmation must not retarget the
    /// in-flight block. Only a genuinely corrected target replaces it, and a
    /// correction to a frame inside the snapshot reuses the snapshot's tail.
    pub fn set_confirmed_target(
        &self,
        block: InputBlockId,
        target: Option<ScrollableNodeId>,
        now: TimeStamp,
    ) {
        let snapshot = self.queue.lock().chain_for(block);
        let chain = target.and_then(|id| match &snapshot {
            Some(snapshot) if snapshot.target() == Some(id) => None,
            Some(snapshot) => match snapshot.index_of(id) {
                Some(index) => Some(OverscrollHandoffChain::new(snapshot.iter().skip(index))),
                None => self.chain_for_node(id),
            },
            None => self.chain_for_node(id),
        });
        self.queue.lock().set_confirmed_target(block, chain);
        self.drain_ready_blocks(now);
    }

    /// Content finished processing a block's events.
    pub fn content_response_received(&self, block: InputBlockId, prevented: bool, now: TimeStamp) {
        self.queue.lock().content_response_received(block, prevented);
        self.drain_ready_blocks(now);
    }

    /// The touch-action computation finished for a block's target.
    pub fn set_allowed_touch_behaviors(&self, block: InputBlockId, behaviors: TouchBehaviorFlags) {
        let target = self.queue.lock().chain_for(block).and_then(|chain| chain.target());
        if let Some(apzc) = target.and_then(|id| self.controller(id)) {
            apzc.set_allowed_touch_behaviors(behaviors);
        }
    }

    fn chain_for_node(&self, id: ScrollableNodeId) -> Option<OverscrollHandoffChain> {
        let layers = self.layers.read();
        layers.iter().find(|layer| layer.metadata.scroll_id == id)?;
        let mut links = vec![id];
        let mut parent = layers
            .iter()
            .find(|layer| layer.metadata.scroll_id == id)
            .and_then(|layer| layer.parent);
        while let Some(ancestor) = parent {
            links.push(ancestor);
            parent = layers
                .iter()
                .find(|layer| layer.metadata.scroll_id == ancestor)
                .and_then(|layer| layer.parent);
        }
        Some(OverscrollHandoffChain::new(links))
    }

    // ---------------------------------------------------------------------
    // Programmatic scrolling and queries
    // ---------------------------------------------------------------------

    pub fn smooth_scroll_to(&self, id: ScrollableNodeId, destination: CSSPoint, now: TimeStamp) {
        if let Some(apzc) = self.controller(id) {
            apzc.start_smooth_scroll(destination, now);
        }
    }

    pub fn scroll_offset(&self, id: ScrollableNodeId) -> Option<CSSPoint> {
        self.controller(id).map(|apzc| apzc.scroll_offset())
    }

    pub fn is_overscrolled(&self, id: ScrollableNodeId) -> bool {
        self.controller(id).is_some_and(|apzc| apzc.is_overscrolled())
    }

    pub fn overscroll_transform(&self, id: ScrollableNodeId) -> Option<crate::apzc::OverscrollTransform> {
        self.controller(id).map(|apzc| apzc.overscroll_transform())
    }

    // ---------------------------------------------------------------------
    // Block dispatch
    // ---------------------------------------------------------------------

    fn drain_ready_blocks(&self, now: TimeStamp) {
        // Events are dispatched outside the queue lock; a content response
        // arriving re-entrantly from dispatch must not deadlock.
        let ready: Vec<ReadyBlock> = self.queue.lock().update(now);
        for block in ready {
            trace!("dispatching block {:?} with {} events", block.id, block.events.len());
            for event in &block.events {
                self.process_event(&block.chain, event, Some(block.id), now);
            }
        }
    }

    /// Dispatch one confirmed event. Returns whether it scrolled content.
    fn process_event(
        &self,
        chain: &OverscrollHandoffChain,
        event: &InputEvent,
        block: Option<InputBlockId>,
        now: TimeStamp,
    ) -> bool {
        let Some(target) = chain.target().and_then(|id| self.controller(id)) else {
            return false;
        };

        match event {
            InputEvent::Touch(touch) => match touch.event_type {
                TouchEventType::Down => {
                    target.handle_touch_down(touch.point, touch.timestamp);
                    false
                },
                TouchEventType::Move => match target.handle_touch_move(touch) {
                    Some(displacement) => {
                        self.dispatch_scroll(chain, displacement, ScrollSource::Touch, block);
                        true
                    },
                    None => false,
                },
                TouchEventType::Up => {
                    if let GestureEndAction::Fling(velocity) = target.handle_touch_up(touch.timestamp)
                    {
                        target.start_fling(velocity, chain.clone(), 0, touch.timestamp);
                    }
                    false
                },
                TouchEventType::Cancel => {
                    target.handle_touch_cancel(touch.timestamp);
                    false
                },
            },
            InputEvent::PanGesture(pan) => match target.handle_pan_gesture(pan) {
                Some(displacement) => {
                    let source = if pan.is_momentum() {
                        ScrollSource::PanMomentum
                    } else {
                        ScrollSource::Pan
                    };
                    self.dispatch_scroll(chain, displacement, source, block);
                    true
                },
                None => false,
            },
            InputEvent::Wheel(wheel) => {
                let delta = self.wheel_delta_in_css(&target, wheel);
                if delta == CSSVector::zero() {
                    return false;
                }
                let leftover = target.handle_wheel(delta, now);
                if leftover != CSSVector::zero() {
                    self.dispatch_handoff(chain, 1, leftover, ScrollSource::Wheel, block);
                }
                true
            },
            InputEvent::PinchGesture(pinch) => {
                // Zoom always applies to the root content frame, whatever
                // layer the fingers landed on.
                let zoom_target = self.root_content_controller().unwrap_or(target);
                zoom_target.handle_pinch(pinch);
                false
            },
            InputEvent::Mouse(_) => {
                // Drag blocks exist for ordering; the displacement side of
                // scrollbar dragging lives with the embedder's scrollbar
                // machinery.
                false
            },
        }
    }

    fn wheel_delta_in_css(&self, target: &AsyncPanZoomController, wheel: &WheelEvent) -> CSSVector {
        let metrics = target.metrics();
        let device: DeviceVector = match wheel.delta.mode {
            WheelDeltaMode::Pixel => DeviceVector::new(wheel.delta.x as f32, wheel.delta.y as f32),
            WheelDeltaMode::Line => DeviceVector::new(
                wheel.delta.x as f32 * WHEEL_LINE_SIZE,
                wheel.delta.y as f32 * WHEEL_LINE_SIZE,
            ),
            WheelDeltaMode::Page => {
                let page = metrics.composition_bounds.size;
                DeviceVector::new(
                    wheel.delta.x as f32 * page.width,
                    wheel.delta.y as f32 * page.height,
                )
            },
        };
        device / metrics.zoom
    }

    /// Walk the handoff chain with `displacement`, starting at the hit
    /// target. Whatever no frame could absorb becomes overscroll on the
    /// gesture's origin (when the source and its `overscroll-behavior`
    /// permit).
    fn dispatch_scroll(
        &self,
        chain: &OverscrollHandoffChain,
        displacement: CSSVector,
        source: ScrollSource,
        block: Option<InputBlockId>,
    ) {
        // A block that already locked onto a frame keeps feeding it alone.
        if !self.prefs.allow_immediate_handoff && source.is_gesture() {
            if let (Some(block), Some((locked_block, locked_id))) = (block, *self.gesture_lock.lock())
            {
                if block == locked_block {
                    if let Some(apzc) = self.controller(locked_id) {
                        let leftover = apzc.apply_displacement(displacement);
                        if leftover != CSSVector::zero() && source.may_overscroll() {
                            apzc.overscroll_by(leftover, source.is_momentum());
                        }
                    }
                    return;
                }
            }
        }

        self.dispatch_handoff(chain, 0, displacement, source, block);
    }

    fn dispatch_handoff(
        &self,
        chain: &OverscrollHandoffChain,
        start_index: usize,
        displacement: CSSVector,
        source: ScrollSource,
        block: Option<InputBlockId>,
    ) {
        let mut remaining = displacement;
        // Displacement that overscroll-behavior kept away from ancestors
        // still stretches the gesture's origin.
        let mut residue = CSSVector::zero();
        let mut index = start_index;
        while index < chain.len() && remaining != CSSVector::zero() {
            let Some(apzc) = chain.link(index).and_then(|id| self.controller(id)) else {
                index += 1;
                continue;
            };

            let before = remaining;
            remaining = apzc.apply_displacement(remaining);
            let consumed = remaining != before;

            if consumed && !self.prefs.allow_immediate_handoff && source.is_gesture() {
                // First frame to move wins the rest of the gesture; the
                // leftover stretches it rather than scrolling an ancestor.
                if let Some(block) = block {
                    *self.gesture_lock.lock() = Some((block, apzc.id()));
                }
                if remaining != CSSVector::zero() && source.may_overscroll() {
                    apzc.overscroll_by(remaining, source.is_momentum());
                }
                return;
            }

            if remaining != CSSVector::zero() {
                // overscroll-behavior on the frame we are leaving gates the
                // handoff per axis.
                let (handoff_x, handoff_y) = apzc.allows_handoff();
                if !handoff_x {
                    residue.x += remaining.x;
                    remaining.x = 0.0;
                }
                if !handoff_y {
                    residue.y += remaining.y;
                    remaining.y = 0.0;
                }
            }
            index += 1;
        }

        let leftover = remaining + residue;
        if leftover != CSSVector::zero() && source.may_overscroll() {
            if let Some(origin) = chain.link(start_index).and_then(|id| self.controller(id)) {
                origin.overscroll_by(leftover, source.is_momentum());
            }
        }
    }

    // ---------------------------------------------------------------------
    // Sampling (compositor thread)
    // ---------------------------------------------------------------------

    /// Advance every animation to `now` and release blocks whose content
    /// response deadline has passed. Returns whether any controller still
    /// needs another frame.
    pub fn sample(&self, now: TimeStamp) -> bool {
        self.drain_ready_blocks(now);
        self.run_deferred_flings(now);

        let controllers: Vec<_> = self.controllers.read().values().cloned().collect();
        let mut need_more = false;
        let mut discovered = Vec::new();
        for apzc in &controllers {
            let result = apzc.sample_animation(now);
            need_more |= result.need_more;
            for handoff in result.fling_handoffs {
                discovered.push(DeferredFling { source: apzc.id(), handoff });
            }
        }

        if !discovered.is_empty() {
            self.deferred_flings.lock().append(&mut discovered);
            // The handoffs run on the next call, after every source lock
            // from this pass is long released.
            need_more = true;
        }

        need_more || self.queue.lock().has_pending()
    }

    fn run_deferred_flings(&self, now: TimeStamp) {
        let tasks: Vec<DeferredFling> = std::mem::take(&mut *self.deferred_flings.lock());
        for task in tasks {
            let Some(source) = self.controller(task.source) else {
                continue;
            };
            if source.animation_generation() != task.handoff.generation {
                // The source was cancelled or restarted since it scheduled
                // this handoff.
                continue;
            }

            let mut velocity = task.handoff.velocity;
            let (handoff_x, handoff_y) = source.allows_handoff();
            if !handoff_x {
                velocity.x = 0.0;
            }
            if !handoff_y {
                velocity.y = 0.0;
            }
            if velocity == CSSVector::zero() {
                continue;
            }

            for index in task.handoff.chain_index..task.handoff.chain.len() {
                let Some(apzc) = task.handoff.chain.link(index).and_then(|id| self.controller(id))
                else {
                    continue;
                };
                if apzc.can_scroll_in(velocity) {
                    debug!("fling handoff {:?} -> {:?}", task.source, apzc.id());
                    apzc.start_fling(velocity, task.handoff.chain.clone(), index, now);
                    break;
                }
            }
        }
    }
}
