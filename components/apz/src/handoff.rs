/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use apz_traits::ScrollableNodeId;
use smallvec::SmallVec;

/// The ordered list of controllers that unconsumed scroll displacement is
/// offered to: the hit target first, then its scrollable ancestors up to the
/// root.
///
/// A chain is snapshotted when an input block is created and never changes
/// afterwards, so a scroll-tree restructure mid-gesture cannot retarget an
/// in-flight block; only later blocks see the new tree.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OverscrollHandoffChain {
    links: SmallVec<[ScrollableNodeId; 4]>,
}

impl OverscrollHandoffChain {
    pub fn new(links: impl IntoIterator<Item = ScrollableNodeId>) -> Self {
        OverscrollHandoffChain {
            links: links.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn link(&self, index: usize) -> Option<ScrollableNodeId> {
        self.links.get(index).copied()
    }

    pub fn target(&self) -> Option<ScrollableNodeId> {
        self.links.first().copied()
    }

    pub fn index_of(&self, id: ScrollableNodeId) -> Option<usize> {
        self.links.iter().position(|link| *link == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = ScrollableNodeId> + '_ {
        self.links.iter().copied()
    }
}
