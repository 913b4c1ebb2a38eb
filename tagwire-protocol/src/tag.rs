//! Correlation tag allocation.

use crate::envelope::{Envelope, PayloadSet};
use crate::Tag;
use std::sync::atomic::{AtomicI32, Ordering};

/// Hands out correlation tags for outbound requests.
///
/// Tags increase by one per call and wrap on overflow. Uniqueness holds for
/// 2^32 consecutive allocations; collisions after wraparound are not
/// detected.
#[derive(Debug, Default)]
pub struct TagAllocator {
    next: AtomicI32,
}

impl TagAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an allocator whose first tag is `first`.
    pub fn starting_at(first: Tag) -> Self {
        Self {
            next: AtomicI32::new(first),
        }
    }

    /// Returns the next tag.
    pub fn next(&self) -> Tag {
        // fetch_add wraps on overflow
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the tag the next call to [`next`](Self::next) would produce.
    pub fn peek(&self) -> Tag {
        self.next.load(Ordering::Relaxed)
    }

    /// Creates an empty request envelope carrying a fresh tag.
    pub fn request<P: PayloadSet>(&self) -> Envelope<P> {
        Envelope::empty(self.next())
    }
}
