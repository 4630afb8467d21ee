// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Contracts with the three collaborators the engine depends on: the
//! virtual-memory manager, the fault-frame decoder, and the managed
//! runtime itself.
//!
//! The engine never reports errors through these seams. Recoverable
//! conditions (a pending runtime error, a non-direct buffer) surface as
//! early termination with partial byte counts; anything else that goes
//! wrong mid-fault is a corrupted invariant and panics at the point of
//! detection.

use heap_range::HeapRange;

/// Identifies the balloon owning an unbacked mapping.
///
/// The virtual-memory manager tags hole mappings with this so that a
/// fault inside the hole can be routed back to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BalloonTag(pub(crate) u64);

impl BalloonTag {
    /// The raw tag value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Virtual-memory operations needed to open and close balloon holes.
pub trait BalloonMemory {
    /// Maps `range` at its fixed address as present-but-unbacked memory:
    /// no physical pages are allocated, and any access faults. The
    /// mapping is tagged with `tag` so the fault dispatch can find its
    /// owner.
    ///
    /// The range may overlap pre-existing mappings; splitting them is
    /// the implementor's responsibility. Returns the number of bytes
    /// converted to hole.
    fn map_unbacked(&self, range: HeapRange, tag: BalloonTag) -> u64;

    /// Restores ordinary anonymous read/write backing over `range` at
    /// its fixed address. Pages fault in lazily on next touch, so this
    /// does not consume physical memory up front.
    fn map_backed(&self, range: HeapRange);
}

/// An in-flight bulk copy reconstructed from a fault frame.
///
/// `dest` and `src` are the copy's positions at the faulting
/// instruction, not the operation's original base pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkCopy {
    /// The current destination pointer.
    pub dest: u64,
    /// The current source pointer.
    pub src: u64,
}

/// Fault-frame decoder for bulk-copy instruction sequences.
pub trait CopyDecode {
    /// The machine-specific faulting context.
    type Frame;

    /// Recognizes the bulk-copy instruction sequence responsible for the
    /// fault and extracts its current pointers. `None` means the access
    /// pattern is not a recognized copy, which is unrecoverable for the
    /// fault path.
    fn find_copy(&self, frame: &Self::Frame) -> Option<BulkCopy>;

    /// Rewrites `frame` so the interrupted copy resumes having skipped
    /// `resolved` trailing bytes of its destination. Implementations
    /// clamp `resolved` to the copy's actual remaining length, which the
    /// engine does not know.
    fn patch_resume(&self, frame: &mut Self::Frame, resolved: u64);
}

/// A reference to a runtime heap object that is only valid for the
/// duration of the current bridge call sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalRef(u64);

impl LocalRef {
    /// Wraps a bridge-defined raw reference value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw reference value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A strong reference to a runtime heap object that survives garbage
/// collection until explicitly released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurableRef(u64);

impl DurableRef {
    /// Wraps a bridge-defined raw reference value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw reference value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A freshly allocated runtime buffer, pinned for the duration of the
/// current bridge call.
#[derive(Debug, Clone, Copy)]
pub struct AllocatedBuffer {
    /// Local reference keeping the buffer alive until it is retained or
    /// abandoned.
    pub local: LocalRef,
    /// The address of the buffer contents.
    pub addr: u64,
    /// Whether `addr` is the live backing array. Some runtime
    /// allocation paths hand back a copy of the array instead, and a
    /// copy's address is useless for ballooning.
    pub is_direct: bool,
}

/// The managed-runtime bridge: buffer allocation, reference lifecycle,
/// and thread attachment.
pub trait RuntimeBridge {
    /// Returns whether the calling thread is already attached to the
    /// runtime's execution context.
    fn current_thread_attached(&self) -> bool;

    /// Attaches the calling thread to the runtime.
    fn attach_thread(&self);

    /// Detaches the calling thread from the runtime.
    fn detach_thread(&self);

    /// Allocates a `len`-byte buffer on the runtime heap.
    ///
    /// Returns `None` if the runtime raised a pending error (typically
    /// the runtime is itself out of memory); the bridge clears the error
    /// before returning.
    fn allocate_buffer(&self, len: u64) -> Option<AllocatedBuffer>;

    /// Promotes a local reference into one that survives garbage
    /// collection.
    fn retain_durable(&self, local: LocalRef) -> DurableRef;

    /// Drops a durable reference, making the object collectable again.
    fn release_durable(&self, durable: DurableRef);
}
