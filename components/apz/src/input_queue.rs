/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Input blocks and the queue that holds them until content has its say.
//!
//! Events are grouped into blocks, one logical gesture each. A block is held
//! until two confirmations arrive: the hit-test target (which may come from a
//! slower, more accurate collaborator) and the content response (whether a
//! listener called `preventDefault`). A content response that misses the
//! deadline counts as "not prevented"; slow pages degrade to default
//! scrolling, never to a hung gesture. Once a block is released, later events
//! of the same gesture flow through it immediately; once prevented, they are
//! dropped.

use std::sync::Arc;

use apz_traits::{InputBlockId, InputEvent, MouseButtonAction, PanGesturePhase, TimeStamp, TouchEventType};
use log::{debug, trace};

use crate::handoff::OverscrollHandoffChain;
use crate::prefs::ApzPrefs;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlockKind {
    Touch,
    Wheel,
    PanGesture,
    MouseDrag,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum BlockPhase {
    /// Accumulating events, waiting for confirmations.
    Pending,
    /// Dispatched; later events of the gesture bypass the queue.
    Released,
    /// Content prevented the block; later events of the gesture are dropped.
    Prevented,
}

struct BlockEntry {
    id: InputBlockId,
    kind: BlockKind,
    chain: OverscrollHandoffChain,
    events: Vec<InputEvent>,
    phase: BlockPhase,
    target_confirmed: bool,
    /// `Some(prevented)` once content responded.
    content_response: Option<bool>,
    deadline: TimeStamp,
    /// Set once the gesture's terminal event has been seen.
    closed: bool,
    last_event_time: TimeStamp,
}

impl BlockEntry {
    fn ready(&self, now: TimeStamp) -> bool {
        let responded = self.content_response.is_some() || now >= self.deadline;
        (self.target_confirmed || now >= self.deadline) && responded
    }

    fn prevented(&self) -> bool {
        self.content_response == Some(true)
    }
}

/// A block whose events are ready for dispatch.
pub struct ReadyBlock {
    pub id: InputBlockId,
    pub kind: BlockKind,
    pub chain: OverscrollHandoffChain,
    pub events: Vec<InputEvent>,
}

/// How `receive` disposed of an event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReceiveResult {
    /// Held in a pending block.
    Queued(InputBlockId),
    /// The block is already released; dispatch the event now.
    Immediate(InputBlockId),
    /// The block was prevented; the event is consumed by content.
    Dropped(InputBlockId),
}

impl ReceiveResult {
    pub fn block_id(self) -> InputBlockId {
        match self {
            ReceiveResult::Queued(id) | ReceiveResult::Immediate(id) | ReceiveResult::Dropped(id) => id,
        }
    }
}

pub struct InputQueue {
    prefs: Arc<ApzPrefs>,
    next_id: InputBlockId,
    blocks: Vec<BlockEntry>,
    current_touch: Option<InputBlockId>,
    current_wheel: Option<InputBlockId>,
    current_pan: Option<InputBlockId>,
    current_drag: Option<InputBlockId>,
}

impl InputQueue {
    pub fn new(prefs: Arc<ApzPrefs>) -> Self {
        InputQueue {
            prefs,
            next_id: InputBlockId(0),
            blocks: Vec::new(),
            current_touch: None,
            current_wheel: None,
            current_pan: None,
            current_drag: None,
        }
    }

    /// Route `event` into a block. `chain` is the handoff chain snapshotted
    /// from the current hit test; it is only consulted when the event opens
    /// a new block (an existing block keeps its snapshot).
    pub fn receive(
        &mut self,
        event: InputEvent,
        chain: OverscrollHandoffChain,
        now: TimeStamp,
    ) -> ReceiveResult {
        match &event {
            InputEvent::Touch(touch) => {
                let starts_block = touch.event_type == TouchEventType::Down &&
                    self.current_block(BlockKind::Touch).is_none_or(|b| b.closed);
                let closes = matches!(touch.event_type, TouchEventType::Up | TouchEventType::Cancel);
                self.route(BlockKind::Touch, event, chain, now, starts_block, closes)
            },
            InputEvent::Wheel(_) => {
                // A wheel transaction keeps routing to the same block (and
                // therefore the same target) until the inter-event gap
                // exceeds the transaction timeout.
                let timeout = self.prefs.wheel_transaction_timeout;
                let starts_block = match self.current_block(BlockKind::Wheel) {
                    Some(block) => now.duration_since(block.last_event_time) > timeout,
                    None => true,
                };
                self.route(BlockKind::Wheel, event, chain, now, starts_block, false)
            },
            InputEvent::PanGesture(pan) => {
                let starts_block = match pan.phase {
                    PanGesturePhase::MayStart | PanGesturePhase::Interrupted => {
                        self.current_block(BlockKind::PanGesture).is_none_or(|b| b.closed)
                    },
                    // A Start reuses the hold block only while that block is
                    // still pending; once the hold block was released or
                    // prevented, the pan is a fresh gesture.
                    PanGesturePhase::Start => self
                        .current_block(BlockKind::PanGesture)
                        .is_none_or(|b| b.closed || b.phase != BlockPhase::Pending),
                    _ => self.current_block(BlockKind::PanGesture).is_none_or(|b| b.closed),
                };
                let closes = matches!(
                    pan.phase,
                    PanGesturePhase::End | PanGesturePhase::MomentumEnd | PanGesturePhase::Cancelled
                );
                self.route(BlockKind::PanGesture, event, chain, now, starts_block, closes)
            },
            InputEvent::Mouse(mouse) => {
                let starts_block = mouse.action == MouseButtonAction::Down &&
                    self.current_block(BlockKind::MouseDrag).is_none_or(|b| b.closed);
                let closes = mouse.action == MouseButtonAction::Up;
                self.route(BlockKind::MouseDrag, event, chain, now, starts_block, closes)
            },
            InputEvent::PinchGesture(_) => {
                // Pinches ride the touch block of the fingers that make them
                // up; a standalone pinch stream gets a touch-kind block.
                let starts_block = self.current_block(BlockKind::Touch).is_none_or(|b| b.closed);
                self.route(BlockKind::Touch, event, chain, now, starts_block, false)
            },
        }
    }

    fn route(
        &mut self,
        kind: BlockKind,
        event: InputEvent,
        chain: OverscrollHandoffChain,
        now: TimeStamp,
        starts_block: bool,
        closes: bool,
    ) -> ReceiveResult {
        if starts_block {
            let id = self.next_id.next();
            debug!("input block {:?} ({:?}) opened, target {:?}", id, kind, chain.target());
            self.blocks.push(BlockEntry {
                id,
                kind,
                chain,
                events: vec![event],
                phase: BlockPhase::Pending,
                target_confirmed: false,
                content_response: None,
                deadline: now + self.prefs.content_response_timeout,
                closed: closes,
                last_event_time: now,
            });
            *self.current_slot(kind) = Some(id);
            return ReceiveResult::Queued(id);
        }

        let Some(block) = self.current_block_mut(kind) else {
            // An orphan continuation (e.g. a move after its block was
            // removed): open a block for it so ordering still holds.
            return self.route(kind, event, chain, now, true, closes);
        };
        block.last_event_time = now;
        if closes {
            block.closed = true;
        }
        let id = block.id;
        match block.phase {
            BlockPhase::Pending => {
                block.events.push(event);
                ReceiveResult::Queued(id)
            },
            BlockPhase::Released => ReceiveResult::Immediate(id),
            BlockPhase::Prevented => ReceiveResult::Dropped(id),
        }
    }

    fn current_slot(&mut self, kind: BlockKind) -> &mut Option<InputBlockId> {
        match kind {
            BlockKind::Touch => &mut self.current_touch,
            BlockKind::Wheel => &mut self.current_wheel,
            BlockKind::PanGesture => &mut self.current_pan,
            BlockKind::MouseDrag => &mut self.current_drag,
        }
    }

    fn current_id(&self, kind: BlockKind) -> Option<InputBlockId> {
        match kind {
            BlockKind::Touch => self.current_touch,
            BlockKind::Wheel => self.current_wheel,
            BlockKind::PanGesture => self.current_pan,
            BlockKind::MouseDrag => self.current_drag,
        }
    }

    fn current_block(&self, kind: BlockKind) -> Option<&BlockEntry> {
        let id = self.current_id(kind)?;
        self.blocks.iter().find(|block| block.id == id)
    }

    fn current_block_mut(&mut self, kind: BlockKind) -> Option<&mut BlockEntry> {
        let id = self.current_id(kind)?;
        self.blocks.iter_mut().find(|block| block.id == id)
    }

    fn find_mut(&mut self, id: InputBlockId) -> Option<&mut BlockEntry> {
        self.blocks.iter_mut().find(|block| block.id == id)
    }

    /// The embedder confirmed (or corrected) the hit-test target for a
    /// block. A corrected chain replaces the provisional snapshot only while
    /// the block is still pending.
    pub fn set_confirmed_target(&mut self, id: InputBlockId, chain: Option<OverscrollHandoffChain>) {
        if let Some(block) = self.find_mut(id) {
            block.target_confirmed = true;
            if let Some(chain) = chain {
                if block.phase == BlockPhase::Pending {
                    block.chain = chain;
                }
            }
        }
    }

    /// Content responded for a block. A response after release (the deadline
    /// already passed) is ignored; the gesture has moved on.
    pub fn content_response_received(&mut self, id: InputBlockId, prevented: bool) {
        if let Some(block) = self.find_mut(id) {
            if block.content_response.is_none() {
                trace!("input block {:?}: content response, prevented={}", id, prevented);
                block.content_response = Some(prevented);
            }
        }
    }

    /// Release every block whose confirmations (or deadline) have arrived,
    /// in arrival order. Stops at the first block that is still pending so
    /// blocks are never dispatched out of order.
    pub fn update(&mut self, now: TimeStamp) -> Vec<ReadyBlock> {
        // Wheel blocks have no terminal event; the transaction timing out
        // closes them.
        let wheel_timeout = self.prefs.wheel_transaction_timeout;
        for block in &mut self.blocks {
            if block.kind == BlockKind::Wheel &&
                now.duration_since(block.last_event_time) > wheel_timeout
            {
                block.closed = true;
            }
        }

        let mut ready = Vec::new();
        for block in &mut self.blocks {
            match block.phase {
                BlockPhase::Pending => {
                    if !block.ready(now) {
                        break;
                    }
                    if block.prevented() {
                        debug!("input block {:?} prevented by content", block.id);
                        block.phase = BlockPhase::Prevented;
                        block.events.clear();
                        continue;
                    }
                    block.phase = BlockPhase::Released;
                    ready.push(ReadyBlock {
                        id: block.id,
                        kind: block.kind,
                        chain: block.chain.clone(),
                        events: std::mem::take(&mut block.events),
                    });
                },
                BlockPhase::Released | BlockPhase::Prevented => {},
            }
        }

        self.blocks.retain(|block| !(block.closed && block.phase != BlockPhase::Pending));
        ready
    }

    /// The chain a released block snapshotted, for dispatching immediate
    /// continuation events.
    pub fn chain_for(&self, id: InputBlockId) -> Option<OverscrollHandoffChain> {
        self.blocks
            .iter()
            .find(|block| block.id == id)
            .map(|block| block.chain.clone())
    }

    pub fn has_pending(&self) -> bool {
        self.blocks.iter().any(|block| block.phase == BlockPhase::Pending)
    }

    /// The earliest pending deadline, for scheduling the next update.
    pub fn next_deadline(&self) -> Option<TimeStamp> {
        self.blocks
            .iter()
            .filter(|block| block.phase == BlockPhase::Pending)
            .map(|block| block.deadline)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use apz_traits::{
        MouseButton, MouseEvent, ScrollableNodeId, TouchEvent, TouchId, WheelDelta, WheelDeltaMode,
        WheelEvent,
    };
    use euclid::point2;

    use super::*;

    fn queue() -> InputQueue {
        InputQueue::new(Arc::new(ApzPrefs::default()))
    }

    fn ms(n: u64) -> TimeStamp {
        TimeStamp::from_millis(n)
    }

    fn chain() -> OverscrollHandoffChain {
        OverscrollHandoffChain::new([ScrollableNodeId(1)])
    }

    fn touch(event_type: TouchEventType, t: TimeStamp) -> InputEvent {
        InputEvent::Touch(TouchEvent::new(event_type, TouchId(0), point2(10.0, 10.0), t))
    }

    fn wheel(t: TimeStamp) -> InputEvent {
        InputEvent::Wheel(WheelEvent {
            delta: WheelDelta { x: 0.0, y: 10.0, mode: WheelDeltaMode::Pixel },
            point: point2(10.0, 10.0),
            timestamp: t,
        })
    }

    fn mouse(action: MouseButtonAction, t: TimeStamp) -> InputEvent {
        InputEvent::Mouse(MouseEvent {
            action,
            button: MouseButton::Left,
            point: point2(10.0, 10.0),
            timestamp: t,
        })
    }

    #[test]
    fn block_waits_for_both_confirmations() {
        let mut q = queue();
        let id = q.receive(touch(TouchEventType::Down, ms(0)), chain(), ms(0)).block_id();

        assert!(q.update(ms(1)).is_empty());
        q.set_confirmed_target(id, None);
        assert!(q.update(ms(2)).is_empty(), "target alone must not release the block");
        q.content_response_received(id, false);
        let ready = q.update(ms(3));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, id);
    }

    #[test]
    fn timeout_counts_as_not_prevented() {
        let mut q = queue();
        let id = q.receive(touch(TouchEventType::Down, ms(0)), chain(), ms(0)).block_id();
        q.set_confirmed_target(id, None);

        assert!(q.update(ms(399)).is_empty());
        let ready = q.update(ms(401));
        assert_eq!(ready.len(), 1, "deadline must release the block");
    }

    #[test]
    fn prevented_block_drops_all_events() {
        let mut q = queue();
        let id = q.receive(touch(TouchEventType::Down, ms(0)), chain(), ms(0)).block_id();
        q.receive(touch(TouchEventType::Move, ms(5)), chain(), ms(5));
        q.set_confirmed_target(id, None);
        q.content_response_received(id, true);

        assert!(q.update(ms(10)).is_empty());
        // The gesture continues; every further event is swallowed.
        let result = q.receive(touch(TouchEventType::Move, ms(20)), chain(), ms(20));
        assert_eq!(result, ReceiveResult::Dropped(id));
    }

    #[test]
    fn released_block_passes_later_events_through() {
        let mut q = queue();
        let id = q.receive(touch(TouchEventType::Down, ms(0)), chain(), ms(0)).block_id();
        q.set_confirmed_target(id, None);
        q.content_response_received(id, false);
        assert_eq!(q.update(ms(5)).len(), 1);

        let result = q.receive(touch(TouchEventType::Move, ms(10)), chain(), ms(10));
        assert_eq!(result, ReceiveResult::Immediate(id));
    }

    #[test]
    fn late_content_response_is_ignored() {
        let mut q = queue();
        let id = q.receive(touch(TouchEventType::Down, ms(0)), chain(), ms(0)).block_id();
        q.set_confirmed_target(id, None);
        assert_eq!(q.update(ms(500)).len(), 1);

        // preventDefault arrives after the deadline released the block.
        q.content_response_received(id, true);
        let result = q.receive(touch(TouchEventType::Move, ms(510)), chain(), ms(510));
        assert_eq!(result, ReceiveResult::Immediate(id));
    }

    #[test]
    fn blocks_release_in_order() {
        let mut q = queue();
        let first = q.receive(touch(TouchEventType::Down, ms(0)), chain(), ms(0)).block_id();
        q.receive(touch(TouchEventType::Up, ms(5)), chain(), ms(5));
        let second = q.receive(touch(TouchEventType::Down, ms(10)), chain(), ms(10)).block_id();
        assert_ne!(first, second);

        // Only the second block is fully confirmed.
        q.set_confirmed_target(second, None);
        q.content_response_received(second, false);
        assert!(q.update(ms(20)).is_empty(), "second block must wait behind the first");

        q.set_confirmed_target(first, None);
        q.content_response_received(first, false);
        let ready = q.update(ms(25));
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].id, first);
        assert_eq!(ready[1].id, second);
    }

    #[test]
    fn wheel_events_within_transaction_share_a_block() {
        let mut q = queue();
        let first = q.receive(wheel(ms(0)), chain(), ms(0)).block_id();
        let second = q.receive(wheel(ms(100)), chain(), ms(100)).block_id();
        assert_eq!(first, second);

        // Past the transaction timeout a new block begins.
        let third = q.receive(wheel(ms(2000)), chain(), ms(2000)).block_id();
        assert_ne!(first, third);
    }

    #[test]
    fn wheel_during_drag_keeps_drag_block() {
        let mut q = queue();
        let drag = q.receive(mouse(MouseButtonAction::Down, ms(0)), chain(), ms(0)).block_id();
        q.receive(mouse(MouseButtonAction::Move, ms(5)), chain(), ms(5));
        let wheel_block = q.receive(wheel(ms(10)), chain(), ms(10)).block_id();
        assert_ne!(drag, wheel_block);

        // The drag continues in its own block, undisturbed by the wheel.
        let result = q.receive(mouse(MouseButtonAction::Move, ms(15)), chain(), ms(15));
        assert_eq!(result.block_id(), drag);
    }

    #[test]
    fn pan_start_after_closed_hold_block_gets_new_block() {
        let mut q = queue();
        let hold = InputEvent::PanGesture(apz_traits::PanGestureEvent {
            phase: PanGesturePhase::Interrupted,
            point: point2(10.0, 10.0),
            delta: euclid::vec2(0.0, 0.0),
            timestamp: ms(0),
        });
        let hold_id = q.receive(hold, chain(), ms(0)).block_id();
        q.set_confirmed_target(hold_id, None);
        q.content_response_received(hold_id, false);
        q.update(ms(5));

        let start = InputEvent::PanGesture(apz_traits::PanGestureEvent {
            phase: PanGesturePhase::Start,
            point: point2(10.0, 10.0),
            delta: euclid::vec2(0.0, 5.0),
            timestamp: ms(600),
        });
        let start_id = q.receive(start, chain(), ms(600)).block_id();
        assert_ne!(hold_id, start_id, "a scroll after a released hold is a new block");
    }

    #[test]
    fn corrected_target_replaces_pending_chain() {
        let mut q = queue();
        let id = q.receive(touch(TouchEventType::Down, ms(0)), chain(), ms(0)).block_id();
        let corrected = OverscrollHandoffChain::new([ScrollableNodeId(7), ScrollableNodeId(1)]);
        q.set_confirmed_target(id, Some(corrected.clone()));
        q.content_response_received(id, false);
        let ready = q.update(ms(5));
        assert_eq!(ready[0].chain, corrected);
    }
}
