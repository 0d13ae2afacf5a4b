/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::VecDeque;
use std::time::Duration;

use apz_traits::TimeStamp;

/// A bounded-duration buffer of timestamped samples.
///
/// After every insertion, samples older than `max_age` relative to the newest
/// sample are evicted, but never below `min_size` entries. The floor matters
/// for velocity estimation: after a long idle gap followed by fast input the
/// stale-but-retained entries are all the history there is.
#[derive(Clone, Debug)]
pub struct RecentEventsBuffer<T> {
    events: VecDeque<(TimeStamp, T)>,
    max_age: Duration,
    min_size: usize,
}

impl<T> RecentEventsBuffer<T> {
    pub fn new(max_age: Duration, min_size: usize) -> Self {
        RecentEventsBuffer {
            events: VecDeque::new(),
            max_age,
            min_size,
        }
    }

    pub fn push(&mut self, timestamp: TimeStamp, item: T) {
        self.events.push_back((timestamp, item));

        let newest = timestamp;
        while self.events.len() > self.min_size {
            match self.events.front() {
                Some((oldest, _)) if newest.duration_since(*oldest) > self.max_age => {
                    self.events.pop_front();
                },
                _ => break,
            }
        }
    }

    /// The oldest retained sample.
    pub fn front(&self) -> Option<(TimeStamp, &T)> {
        self.events.front().map(|(t, item)| (*t, item))
    }

    /// The newest retained sample.
    pub fn back(&self) -> Option<(TimeStamp, &T)> {
        self.events.back().map(|(t, item)| (*t, item))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (TimeStamp, &T)> {
        self.events.iter().map(|(t, item)| (*t, item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> TimeStamp {
        TimeStamp::from_millis(n)
    }

    #[test]
    fn evicts_stale_samples() {
        let mut buffer = RecentEventsBuffer::new(Duration::from_millis(100), 0);
        buffer.push(ms(0), 'a');
        buffer.push(ms(50), 'b');
        buffer.push(ms(200), 'c');
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.front().map(|(_, c)| *c), Some('c'));
    }

    #[test]
    fn retains_minimum_size_through_idle_gap() {
        let mut buffer = RecentEventsBuffer::new(Duration::from_millis(100), 2);
        buffer.push(ms(0), 'a');
        buffer.push(ms(10), 'b');
        // A sample long after the others must not shrink the buffer below
        // its floor.
        buffer.push(ms(10_000), 'c');
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.front().map(|(_, c)| *c), Some('b'));
        assert_eq!(buffer.back().map(|(_, c)| *c), Some('c'));
    }

    #[test]
    fn empty_queries_return_none() {
        let buffer: RecentEventsBuffer<u32> =
            RecentEventsBuffer::new(Duration::from_millis(100), 2);
        assert!(buffer.front().is_none());
        assert!(buffer.back().is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn fresh_samples_all_retained() {
        let mut buffer = RecentEventsBuffer::new(Duration::from_millis(100), 1);
        for i in 0..5 {
            buffer.push(ms(i * 10), i);
        }
        assert_eq!(buffer.len(), 5);
    }
}
