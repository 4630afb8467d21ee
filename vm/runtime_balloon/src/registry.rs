// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The live-balloon set, its single lock, and the fault relocation
//! engine that runs against it.

use crate::balloon::Balloon;
use crate::bridge::BalloonMemory;
use crate::bridge::BalloonTag;
use crate::bridge::CopyDecode;
use crate::bridge::DurableRef;
use crate::BALLOON_UNIT;
use crate::DEFAULT_ALIGNMENT;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Which balloon [`BalloonRegistry::release_up_to`] takes first.
///
/// The effect of release ordering on heap fragmentation is an open
/// policy question, so it is configurable rather than baked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleaseOrder {
    /// Release the most recently created balloon first.
    #[default]
    NewestFirst,
    /// Release the oldest balloon first.
    OldestFirst,
}

/// The set of live balloons.
///
/// The registry owns every balloon outright, and its single mutex
/// serializes all creation, relocation, and destruction: no balloon's
/// address fields are ever read or written without holding it. A fault
/// relocation and a concurrent create or release are therefore mutually
/// exclusive.
#[derive(Debug)]
pub struct BalloonRegistry<M> {
    mem: M,
    order: ReleaseOrder,
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    balloons: BTreeMap<BalloonTag, Balloon>,
    /// Creation order, oldest first.
    creation: Vec<BalloonTag>,
    /// Interval index from hole start address to owner, so a faulting
    /// address resolves to its balloon without a linear scan.
    holes: BTreeMap<u64, BalloonTag>,
    next_tag: u64,
}

impl<M: BalloonMemory> BalloonRegistry<M> {
    /// Creates an empty registry over the given virtual-memory manager.
    pub fn new(mem: M) -> Self {
        Self {
            mem,
            order: ReleaseOrder::default(),
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Overrides the release ordering policy.
    pub fn with_release_order(mut self, order: ReleaseOrder) -> Self {
        self.order = order;
        self
    }

    /// The number of live balloons.
    pub fn balloon_count(&self) -> usize {
        self.inner.lock().balloons.len()
    }

    /// Returns whether no balloons are live.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().balloons.is_empty()
    }

    /// Converts the runtime buffer at `runtime_base` into a balloon,
    /// carving an aligned hole out of it.
    ///
    /// `handle` is the durable reference pinning the buffer; the
    /// registry holds it until the balloon is released. Returns the
    /// number of bytes unbacked.
    pub fn create_balloon(&self, runtime_base: u64, handle: DurableRef) -> u64 {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let tag = BalloonTag(inner.next_tag);
        inner.next_tag += 1;

        let mut balloon = Balloon::new(tag, runtime_base, BALLOON_UNIT, DEFAULT_ALIGNMENT, handle);
        let reclaimed = balloon.compute_hole(&self.mem);
        debug_assert!(!balloon.hole().is_empty());

        tracing::debug!(
            tag = tag.raw(),
            base = runtime_base,
            hole = %balloon.hole(),
            "created balloon"
        );

        inner.holes.insert(balloon.hole().start(), tag);
        inner.creation.push(tag);
        inner.balloons.insert(tag, balloon);
        reclaimed
    }

    /// Releases balloons, in the registry's release order, until
    /// `target` bytes have been returned or no balloons remain.
    ///
    /// Each released balloon has its hole re-backed and its durable
    /// reference passed to `drop_ref`. Returns the bytes released,
    /// which is zero for a zero target or an empty registry.
    pub fn release_up_to(&self, target: u64, mut drop_ref: impl FnMut(DurableRef)) -> u64 {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let mut released = 0;
        while released < target {
            let tag = match self.order {
                ReleaseOrder::NewestFirst => inner.creation.pop(),
                ReleaseOrder::OldestFirst => {
                    (!inner.creation.is_empty()).then(|| inner.creation.remove(0))
                }
            };
            let Some(tag) = tag else { break };

            let balloon = inner
                .balloons
                .remove(&tag)
                .expect("creation-order entry must have a live balloon");
            inner.holes.remove(&balloon.hole().start());

            balloon.release(&self.mem);
            drop_ref(balloon.handle());
            released += balloon.size();
            tracing::debug!(tag = tag.raw(), "released balloon");
        }
        released
    }

    /// Handles a fault trapped inside a balloon's hole: the fault
    /// relocation engine.
    ///
    /// The collector's bulk copy is treated as an opaque memcpy-shaped
    /// operation. Rather than emulating it, the engine relocates the
    /// balloon to the copy's destination and patches the interrupted
    /// instruction with how many trailing bytes the remapping already
    /// satisfied, a constant-time adjustment regardless of the copied
    /// region's size.
    ///
    /// Panics if no balloons are live, if the decoder cannot identify
    /// the causative copy, or if `fault_addr` is inside no balloon's
    /// hole: each means a fault was trapped with no resolvable cause,
    /// and there is no safe state to unwind to.
    pub fn handle_copy_fault<D: CopyDecode>(
        &self,
        decoder: &D,
        frame: &mut D::Frame,
        fault_addr: u64,
    ) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        assert!(!inner.balloons.is_empty(), "balloon fault with no live balloons");

        let copy = decoder
            .find_copy(frame)
            .expect("balloon fault outside a recognized bulk copy");

        // Containment lookup: the relocation must hit the specific
        // balloon whose hole covers the fault, not just any balloon.
        let (&hole_start, &tag) = inner
            .holes
            .range(..=fault_addr)
            .next_back()
            .unwrap_or_else(|| panic!("fault address {fault_addr:#x} is below every hole"));
        let balloon = inner
            .balloons
            .get_mut(&tag)
            .expect("hole index points at a live balloon");
        assert!(
            balloon.hole().contains_addr(fault_addr),
            "fault address {fault_addr:#x} is not inside any balloon hole"
        );

        let resolved = balloon.relocate(&self.mem, copy.dest, copy.src);
        let new_start = balloon.hole().start();
        tracing::trace!(
            src = copy.src,
            dest = copy.dest,
            resolved,
            "balloon copy fault"
        );

        inner.holes.remove(&hole_start);
        inner.holes.insert(new_start, tag);

        decoder.patch_resume(frame, resolved);
    }
}
