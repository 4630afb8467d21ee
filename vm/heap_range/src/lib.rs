// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The [`HeapRange`] type, which represents a byte range of a managed
//! runtime's heap, plus the alignment algebra used to carve aligned holes
//! out of unaligned buffers.
//!
//! Unlike a page-range type, a `HeapRange` has no alignment invariant of
//! its own: runtime buffers start wherever the runtime's allocator put
//! them. Aligned subranges are computed on demand with
//! [`HeapRange::aligned_subrange`].

#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![no_std]

use core::ops::Range;

/// Represents a byte range of the runtime's address space.
///
/// The only invariant is `start <= end`; both bounds may be arbitrary
/// byte addresses.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct HeapRange {
    start: u64,
    end: u64,
}

impl core::fmt::Display for HeapRange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#x}-{:#x}", self.start(), self.end())
    }
}

impl TryFrom<Range<u64>> for HeapRange {
    type Error = InvalidHeapRange;

    fn try_from(range: Range<u64>) -> Result<Self, Self::Error> {
        Self::try_new(range)
    }
}

/// Error returned by [`HeapRange::try_new`].
#[derive(Debug, thiserror::Error)]
#[error("invalid heap range: {start:#x}-{end:#x}")]
pub struct InvalidHeapRange {
    start: u64,
    end: u64,
}

impl HeapRange {
    /// The empty range, with start and end addresses of zero.
    pub const EMPTY: Self = Self::new(0..0);

    /// Returns a new range for the given address range.
    ///
    /// Panics if the start is after the end.
    #[track_caller]
    pub const fn new(range: Range<u64>) -> Self {
        assert!(range.start <= range.end);
        Self {
            start: range.start,
            end: range.end,
        }
    }

    /// Returns a new range for the given address range.
    ///
    /// Fails if the start is after the end.
    pub const fn try_new(range: Range<u64>) -> Result<Self, InvalidHeapRange> {
        if range.start > range.end {
            return Err(InvalidHeapRange {
                start: range.start,
                end: range.end,
            });
        }
        Ok(Self {
            start: range.start,
            end: range.end,
        })
    }

    /// The start address.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// The end address.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// The length of the range in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Check if the range is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns the largest range contained in this range whose start and
    /// end are aligned to `alignment` bytes. This may be the empty range.
    ///
    /// Panics if `alignment` is not a power of two.
    pub fn aligned_subrange(&self, alignment: u64) -> Self {
        assert!(alignment.is_power_of_two());
        let start = (self.start + alignment - 1) & !(alignment - 1);
        let end = self.end & !(alignment - 1);
        if start <= end {
            Self::new(start..end)
        } else {
            Self::EMPTY
        }
    }

    /// Returns whether `self` and `other` overlap.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.end > other.start && self.start < other.end
    }

    /// Returns whether `self` contains `other`.
    pub fn contains(&self, other: &Self) -> bool {
        self.start <= other.start && self.end >= other.end
    }

    /// Returns whether `self` contains the byte at `addr`.
    pub fn contains_addr(&self, addr: u64) -> bool {
        (self.start..self.end).contains(&addr)
    }

    /// Returns the byte offset of `addr` within the range, if it is
    /// contained.
    pub fn offset_of(&self, addr: u64) -> Option<u64> {
        if self.contains_addr(addr) {
            Some(addr - self.start)
        } else {
            None
        }
    }

    /// Returns the intersection of `self` and `other`.
    pub fn intersection(&self, other: &Self) -> Self {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start <= end {
            Self::new(start..end)
        } else {
            Self::EMPTY
        }
    }
}

impl From<HeapRange> for Range<u64> {
    fn from(range: HeapRange) -> Self {
        Range {
            start: range.start(),
            end: range.end(),
        }
    }
}
