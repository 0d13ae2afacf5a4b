/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! End-to-end scrolling behavior through the public engine API: raw events
//! in, sampled offsets out.

use apz::{ApzPrefs, ApzcTreeManager, ScrollTreeLayer};
use apz_traits::units::{CSSPoint, CSSRect, DevicePoint, DeviceRect, Zoom};
use apz_traits::{
    FrameMetrics, InputEvent, InputEventResult, OverscrollBehaviorInfo, ScrollGeneration,
    ScrollableNodeId, TimeStamp, TouchEvent, TouchEventType, TouchId, WheelDelta, WheelDeltaMode,
    WheelEvent,
};
use euclid::{point2, size2};

fn ms(n: u64) -> TimeStamp {
    TimeStamp::from_millis(n)
}

fn layer(id: u64, parent: Option<u64>, bounds: DeviceRect, scrollable: CSSRect) -> ScrollTreeLayer {
    ScrollTreeLayer {
        metadata: apz_traits::ScrollMetadata {
            scroll_id: ScrollableNodeId(id),
            metrics: FrameMetrics {
                scrollable_rect: scrollable,
                composition_bounds: bounds,
                visual_scroll_offset: CSSPoint::zero(),
                zoom: Zoom::new(1.0),
                is_root_content: parent.is_none(),
                scroll_generation: ScrollGeneration(0),
            },
            overscroll_behavior: OverscrollBehaviorInfo::default(),
            disregarded_direction: None,
        },
        parent: parent.map(ScrollableNodeId),
    }
}

fn touch(event_type: TouchEventType, point: DevicePoint, t: TimeStamp) -> InputEvent {
    InputEvent::Touch(TouchEvent::new(event_type, TouchId(0), point, t))
}

fn wheel(x: f64, y: f64, point: DevicePoint, t: TimeStamp) -> InputEvent {
    InputEvent::Wheel(WheelEvent {
        delta: WheelDelta {
            x,
            y,
            mode: WheelDeltaMode::Pixel,
        },
        point,
        timestamp: t,
    })
}

fn allow(manager: &ApzcTreeManager, result: &InputEventResult, target: u64, now: TimeStamp) {
    let id = result.block_id.expect("event should have joined a block");
    manager.set_confirmed_target(id, Some(ScrollableNodeId(target)), now);
    manager.content_response_received(id, false, now);
}

/// Run the sampler until every animation settles. Returns the final time.
fn settle(manager: &ApzcTreeManager, mut t: u64) -> u64 {
    loop {
        t += 16;
        if !manager.sample(ms(t)) {
            return t;
        }
        assert!(t < 120_000, "animations did not settle");
    }
}

/// A drag released at speed flings into the bottom edge, stretches, and
/// springs back; the gesture settles exactly at the bottom of the scroll
/// range with no residual overscroll.
#[test]
fn fling_into_edge_recovers_to_exact_limit() {
    let prefs = ApzPrefs {
        // Nearly frictionless, so the fling is guaranteed to reach the edge
        // with speed to spare.
        fling_friction: 0.0005,
        ..ApzPrefs::default()
    };
    let (manager, _repaints) = ApzcTreeManager::new(prefs);
    manager.update_scroll_tree(
        vec![layer(
            1,
            None,
            DeviceRect::from_size(size2(100.0, 100.0)),
            CSSRect::from_size(size2(100.0, 400.0)),
        )],
        true,
    );

    let down = manager.receive_input_event(touch(TouchEventType::Down, point2(50.0, 95.0), ms(0)), ms(0));
    allow(&manager, &down, 1, ms(0));
    for i in 1..=5u64 {
        manager.receive_input_event(
            touch(TouchEventType::Move, point2(50.0, 95.0 - i as f32 * 15.0), ms(i * 8)),
            ms(i * 8),
        );
    }
    manager.receive_input_event(touch(TouchEventType::Up, point2(50.0, 20.0), ms(40)), ms(40));

    let mut seen_overscroll = false;
    let mut t = 40;
    loop {
        t += 16;
        let more = manager.sample(ms(t));
        seen_overscroll |= manager.is_overscrolled(ScrollableNodeId(1));
        if !more {
            break;
        }
        assert!(t < 120_000, "fling and recovery did not settle");
    }

    assert!(seen_overscroll, "the fling should have stretched past the edge");
    assert!(!manager.is_overscrolled(ScrollableNodeId(1)));
    // scroll_range().YMost() for 400px of content in a 100px viewport.
    assert_eq!(manager.scroll_offset(ScrollableNodeId(1)), Some(point2(0.0, 300.0)));
}

/// A single drag larger than the child's scroll range walks the handoff
/// chain: the child consumes its 50px, the parent its 10px.
#[test]
fn drag_hands_off_child_to_parent() {
    let (manager, _repaints) = ApzcTreeManager::new(ApzPrefs::default());
    manager.update_scroll_tree(
        vec![
            layer(
                1,
                None,
                DeviceRect::from_size(size2(200.0, 200.0)),
                CSSRect::from_size(size2(200.0, 210.0)),
            ),
            layer(
                2,
                Some(1),
                DeviceRect::from_size(size2(100.0, 100.0)),
                CSSRect::from_size(size2(100.0, 150.0)),
            ),
        ],
        true,
    );

    let down = manager.receive_input_event(touch(TouchEventType::Down, point2(50.0, 95.0), ms(0)), ms(0));
    allow(&manager, &down, 2, ms(0));
    // First move eats the start tolerance; the second carries 60px.
    manager.receive_input_event(touch(TouchEventType::Move, point2(50.0, 85.0), ms(8)), ms(8));
    manager.receive_input_event(touch(TouchEventType::Move, point2(50.0, 25.0), ms(24)), ms(24));
    manager.receive_input_event(touch(TouchEventType::Up, point2(50.0, 25.0), ms(200)), ms(200));
    settle(&manager, 200);

    assert_eq!(manager.scroll_offset(ScrollableNodeId(2)), Some(point2(0.0, 50.0)));
    assert_eq!(manager.scroll_offset(ScrollableNodeId(1)), Some(point2(0.0, 10.0)));
}

/// With immediate handoff disabled the first gesture is locked to the child;
/// a second gesture, started with the child already at its limit, scrolls
/// the parent.
#[test]
fn second_gesture_hands_off_when_immediate_handoff_disabled() {
    let prefs = ApzPrefs {
        allow_immediate_handoff: false,
        ..ApzPrefs::default()
    };
    let (manager, _repaints) = ApzcTreeManager::new(prefs);
    manager.update_scroll_tree(
        vec![
            layer(
                1,
                None,
                DeviceRect::from_size(size2(200.0, 200.0)),
                CSSRect::from_size(size2(200.0, 400.0)),
            ),
            layer(
                2,
                Some(1),
                DeviceRect::from_size(size2(100.0, 100.0)),
                CSSRect::from_size(size2(100.0, 150.0)),
            ),
        ],
        true,
    );

    let down = manager.receive_input_event(touch(TouchEventType::Down, point2(50.0, 95.0), ms(0)), ms(0));
    allow(&manager, &down, 2, ms(0));
    manager.receive_input_event(touch(TouchEventType::Move, point2(50.0, 85.0), ms(8)), ms(8));
    manager.receive_input_event(touch(TouchEventType::Move, point2(50.0, 15.0), ms(24)), ms(24));
    manager.receive_input_event(touch(TouchEventType::Up, point2(50.0, 15.0), ms(200)), ms(200));
    let t = settle(&manager, 200);

    assert_eq!(manager.scroll_offset(ScrollableNodeId(2)), Some(point2(0.0, 50.0)));
    assert_eq!(
        manager.scroll_offset(ScrollableNodeId(1)),
        Some(CSSPoint::zero()),
        "the first gesture must stay on the child"
    );

    // Second gesture: the child is at its limit and consumes nothing, so
    // the parent receives the displacement.
    let down =
        manager.receive_input_event(touch(TouchEventType::Down, point2(50.0, 95.0), ms(t + 10)), ms(t + 10));
    allow(&manager, &down, 2, ms(t + 10));
    manager.receive_input_event(
        touch(TouchEventType::Move, point2(50.0, 85.0), ms(t + 18)),
        ms(t + 18),
    );
    manager.receive_input_event(
        touch(TouchEventType::Move, point2(50.0, 55.0), ms(t + 34)),
        ms(t + 34),
    );
    manager.receive_input_event(touch(TouchEventType::Up, point2(50.0, 55.0), ms(t + 300)), ms(t + 300));
    settle(&manager, t + 300);

    let parent = manager.scroll_offset(ScrollableNodeId(1)).unwrap();
    assert!(parent.y > 0.0, "the second gesture should scroll the parent, got {:?}", parent);
}

/// Vertical and horizontal wheel ticks inside one unconfirmed block share the
/// block's snapshotted target; on release the vertical component scrolls the
/// (vertical-only) child and the horizontal component hands off to the
/// parent.
#[test]
fn mixed_axis_wheel_block_splits_across_chain() {
    let (manager, _repaints) = ApzcTreeManager::new(ApzPrefs::default());
    manager.update_scroll_tree(
        vec![
            layer(
                1,
                None,
                DeviceRect::from_size(size2(200.0, 200.0)),
                CSSRect::from_size(size2(500.0, 200.0)),
            ),
            // As wide as its viewport: no horizontal scroll range.
            layer(
                2,
                Some(1),
                DeviceRect::from_size(size2(100.0, 100.0)),
                CSSRect::from_size(size2(100.0, 300.0)),
            ),
        ],
        true,
    );

    let first = manager.receive_input_event(wheel(0.0, 40.0, point2(50.0, 50.0), ms(0)), ms(0));
    let second = manager.receive_input_event(wheel(30.0, 0.0, point2(50.0, 50.0), ms(50)), ms(50));
    assert_eq!(first.block_id, second.block_id, "one wheel transaction, one block");

    allow(&manager, &first, 2, ms(60));
    settle(&manager, 60);

    assert_eq!(manager.scroll_offset(ScrollableNodeId(2)), Some(point2(0.0, 40.0)));
    assert_eq!(manager.scroll_offset(ScrollableNodeId(1)), Some(point2(30.0, 0.0)));
}

/// A prevented block must leave every frame untouched, including events that
/// arrived after the preventDefault.
#[test]
fn prevented_block_never_scrolls() {
    let (manager, _repaints) = ApzcTreeManager::new(ApzPrefs::default());
    manager.update_scroll_tree(
        vec![layer(
            1,
            None,
            DeviceRect::from_size(size2(100.0, 100.0)),
            CSSRect::from_size(size2(100.0, 400.0)),
        )],
        true,
    );

    let down = manager.receive_input_event(touch(TouchEventType::Down, point2(50.0, 90.0), ms(0)), ms(0));
    let id = down.block_id.unwrap();
    manager.receive_input_event(touch(TouchEventType::Move, point2(50.0, 40.0), ms(10)), ms(10));
    manager.set_confirmed_target(id, Some(ScrollableNodeId(1)), ms(15));
    manager.content_response_received(id, true, ms(15));
    manager.receive_input_event(touch(TouchEventType::Move, point2(50.0, 10.0), ms(20)), ms(20));
    manager.receive_input_event(touch(TouchEventType::Up, point2(50.0, 10.0), ms(30)), ms(30));
    settle(&manager, 30);

    assert_eq!(manager.scroll_offset(ScrollableNodeId(1)), Some(CSSPoint::zero()));
}

/// The composited offset of a fling never moves backwards, even when a
/// main-thread paint with a stale scroll position lands mid-animation.
#[test]
fn fling_stays_monotonic_across_stale_paint() {
    let (manager, _repaints) = ApzcTreeManager::new(ApzPrefs::default());
    let make_layers = || {
        vec![layer(
            1,
            None,
            DeviceRect::from_size(size2(100.0, 100.0)),
            CSSRect::from_size(size2(100.0, 2000.0)),
        )]
    };
    manager.update_scroll_tree(make_layers(), true);

    let down = manager.receive_input_event(touch(TouchEventType::Down, point2(50.0, 95.0), ms(0)), ms(0));
    allow(&manager, &down, 1, ms(0));
    for i in 1..=5u64 {
        manager.receive_input_event(
            touch(TouchEventType::Move, point2(50.0, 95.0 - i as f32 * 15.0), ms(i * 8)),
            ms(i * 8),
        );
    }
    manager.receive_input_event(touch(TouchEventType::Up, point2(50.0, 20.0), ms(40)), ms(40));

    let mut last = manager.scroll_offset(ScrollableNodeId(1)).unwrap().y;
    let mut t = 40;
    for frame in 0..200 {
        t += 16;
        let more = manager.sample(ms(t));
        // A paint with the stale pre-gesture offset arrives mid-fling.
        if frame == 20 {
            manager.update_scroll_tree(make_layers(), false);
        }
        let offset = manager.scroll_offset(ScrollableNodeId(1)).unwrap().y;
        assert!(
            offset >= last,
            "offset regressed from {} to {} at t={}",
            last,
            offset,
            t
        );
        last = offset;
        if !more {
            break;
        }
    }
    assert!(last > 0.0, "the fling should have scrolled somewhere");
}

/// A finger landing during a fling stops it immediately, before any block
/// confirmation, and a tap that never becomes a pan leaves the offset alone.
#[test]
fn touch_down_interrupts_fling_without_confirmation() {
    let (manager, _repaints) = ApzcTreeManager::new(ApzPrefs::default());
    manager.update_scroll_tree(
        vec![layer(
            1,
            None,
            DeviceRect::from_size(size2(100.0, 100.0)),
            CSSRect::from_size(size2(100.0, 2000.0)),
        )],
        true,
    );

    let down = manager.receive_input_event(touch(TouchEventType::Down, point2(50.0, 95.0), ms(0)), ms(0));
    allow(&manager, &down, 1, ms(0));
    for i in 1..=5u64 {
        manager.receive_input_event(
            touch(TouchEventType::Move, point2(50.0, 95.0 - i as f32 * 15.0), ms(i * 8)),
            ms(i * 8),
        );
    }
    manager.receive_input_event(touch(TouchEventType::Up, point2(50.0, 20.0), ms(40)), ms(40));

    // Let the fling run a little.
    manager.sample(ms(56));
    manager.sample(ms(72));
    let mid = manager.scroll_offset(ScrollableNodeId(1)).unwrap();
    assert!(mid.y > 0.0);

    // Finger down: the fling stops now, not when the block resolves.
    manager.receive_input_event(touch(TouchEventType::Down, point2(50.0, 50.0), ms(80)), ms(80));
    let stopped = manager.scroll_offset(ScrollableNodeId(1)).unwrap();
    manager.sample(ms(96));
    manager.sample(ms(400));
    assert_eq!(manager.scroll_offset(ScrollableNodeId(1)), Some(stopped));
}
