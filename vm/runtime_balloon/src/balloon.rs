// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The balloon entity: one unbacked hole inside a runtime-owned buffer.

use crate::bridge::BalloonMemory;
use crate::bridge::BalloonTag;
use crate::bridge::DurableRef;
use heap_range::HeapRange;

/// One balloon: a fixed-size runtime buffer whose aligned interior has
/// been left unbacked.
///
/// The runtime sees an ordinary buffer starting at `runtime_base`; the
/// hole is the aligned subrange the kernel actually unmapped. Identity
/// (`tag`), `handle`, `size`, and `alignment` are immutable; the address
/// fields are read and written only under the registry lock.
#[derive(Debug)]
pub(crate) struct Balloon {
    tag: BalloonTag,
    runtime_base: u64,
    hole: HeapRange,
    size: u64,
    alignment: u64,
    handle: DurableRef,
}

impl Balloon {
    pub(crate) fn new(
        tag: BalloonTag,
        runtime_base: u64,
        size: u64,
        alignment: u64,
        handle: DurableRef,
    ) -> Self {
        assert!(alignment.is_power_of_two());
        Self {
            tag,
            runtime_base,
            hole: HeapRange::EMPTY,
            size,
            alignment,
            handle,
        }
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn hole(&self) -> HeapRange {
        self.hole
    }

    pub(crate) fn handle(&self) -> DurableRef {
        self.handle
    }

    #[cfg(test)]
    pub(crate) fn runtime_base(&self) -> u64 {
        self.runtime_base
    }

    /// Recomputes the hole from the current base and maps it unbacked.
    ///
    /// The alignment is reapplied from scratch; nothing carries over
    /// from a previous layout. Returns the byte length the
    /// virtual-memory manager actually converted to hole.
    pub(crate) fn compute_hole(&mut self, mem: &impl BalloonMemory) -> u64 {
        let span = HeapRange::new(self.runtime_base..self.runtime_base + self.size);
        self.hole = span.aligned_subrange(self.alignment);
        mem.map_unbacked(self.hole, self.tag)
    }

    /// Restores ordinary backing over the hole.
    ///
    /// The runtime-visible address range is mapped again, but pages are
    /// only faulted in when the runtime reuses the buffer. The caller
    /// removes the balloon from the registry and drops the durable
    /// reference.
    pub(crate) fn release(&self, mem: &impl BalloonMemory) {
        mem.map_backed(self.hole);
    }

    /// Moves the balloon to the destination of an interrupted bulk copy.
    ///
    /// The fault hit the first unbacked byte, so `src` sits at the hole
    /// start, `skipped` bytes past the buffer base, and those `skipped`
    /// bytes have already been written at `dest - skipped`. Rebasing
    /// there keeps the buffer contents at the same internal offsets.
    ///
    /// The old hole is re-backed before the new one is mapped: if the
    /// two overlap, the virtual-memory manager's mapping-split handling
    /// resolves the overlap.
    ///
    /// Returns how many trailing bytes of the copy, counted from `dest`,
    /// were resolved by the remapping and need not be copied. Never more
    /// than the balloon size; zero if the relocated buffer ends at or
    /// before `dest`, in which case this copy is unaffected and a later
    /// copy will fault into the new hole.
    pub(crate) fn relocate(&mut self, mem: &impl BalloonMemory, dest: u64, src: u64) -> u64 {
        let skipped = self.hole.start() - self.runtime_base;
        debug_assert!(
            self.hole.contains_addr(src),
            "copy source {src:#x} is not inside the hole {}",
            self.hole
        );
        debug_assert!(dest >= skipped);

        self.runtime_base = dest - skipped;
        mem.map_backed(self.hole);
        self.compute_hole(mem);
        (self.runtime_base + self.size).saturating_sub(dest)
    }
}
