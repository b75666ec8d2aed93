//! Edge Chains
//!
//! Every dependency edge is a member of two doubly-linked chains at once:
//!
//! - the target's *depends-on* chain, listing what the target read, in read
//!   order ([`Side::Sources`]);
//! - the source's *observed-by* chain, listing who to notify on change
//!   ([`Side::Targets`]).
//!
//! The links are stored inline in the edge record, addressed by [`EdgeId`],
//! so attaching, detaching and reordering are all O(1) with no rescans.

use super::arena::Arena;
use super::node::{Edge, EdgeId};

/// Which of the two chains an operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// A target's depends-on chain.
    Sources,
    /// A source's observed-by chain.
    Targets,
}

/// Neighbor pointers of one edge within one chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Link {
    pub prev: Option<EdgeId>,
    pub next: Option<EdgeId>,
}

/// Head and tail of a chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Chain {
    pub first: Option<EdgeId>,
    pub last: Option<EdgeId>,
}

impl Chain {
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    pub fn push_front(&mut self, edges: &mut Arena<EdgeId, Edge>, side: Side, id: EdgeId) {
        let old_first = self.first;
        *edges[id].link_mut(side) = Link {
            prev: None,
            next: old_first,
        };

        match old_first {
            Some(first) => edges[first].link_mut(side).prev = Some(id),
            None => self.last = Some(id),
        }
        self.first = Some(id);
    }

    pub fn push_back(&mut self, edges: &mut Arena<EdgeId, Edge>, side: Side, id: EdgeId) {
        let old_last = self.last;
        *edges[id].link_mut(side) = Link {
            prev: old_last,
            next: None,
        };

        match old_last {
            Some(last) => edges[last].link_mut(side).next = Some(id),
            None => self.first = Some(id),
        }
        self.last = Some(id);
    }

    /// Detach `id`, joining its neighbors. Both of its pointers are cleared.
    pub fn unlink(&mut self, edges: &mut Arena<EdgeId, Edge>, side: Side, id: EdgeId) {
        let Link { prev, next } = std::mem::take(edges[id].link_mut(side));

        match prev {
            Some(prev) => edges[prev].link_mut(side).next = next,
            None => {
                if self.first == Some(id) {
                    self.first = next;
                }
            }
        }

        match next {
            Some(next) => edges[next].link_mut(side).prev = prev,
            None => {
                if self.last == Some(id) {
                    self.last = prev;
                }
            }
        }
    }

    pub fn move_to_front(&mut self, edges: &mut Arena<EdgeId, Edge>, side: Side, id: EdgeId) {
        if self.first == Some(id) {
            return;
        }
        self.unlink(edges, side, id);
        self.push_front(edges, side, id);
    }

    pub fn move_to_back(&mut self, edges: &mut Arena<EdgeId, Edge>, side: Side, id: EdgeId) {
        if self.last == Some(id) {
            return;
        }
        self.unlink(edges, side, id);
        self.push_back(edges, side, id);
    }

    /// Collect the chain front to back.
    pub fn collect(&self, edges: &Arena<EdgeId, Edge>, side: Side) -> Vec<EdgeId> {
        let mut out = Vec::new();
        let mut cursor = self.first;
        while let Some(id) = cursor {
            out.push(id);
            cursor = edges[id].link(side).next;
        }
        out
    }
}
