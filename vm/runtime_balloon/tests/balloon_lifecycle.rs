// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end balloon lifecycle: memory-pressure request, a collector
//! copy faulting through a hole, and release back to the runtime.

use heap_range::HeapRange;
use parking_lot::Mutex;
use runtime_balloon::bridge::AllocatedBuffer;
use runtime_balloon::bridge::BalloonMemory;
use runtime_balloon::bridge::BalloonTag;
use runtime_balloon::bridge::BulkCopy;
use runtime_balloon::bridge::CopyDecode;
use runtime_balloon::bridge::DurableRef;
use runtime_balloon::bridge::LocalRef;
use runtime_balloon::bridge::RuntimeBridge;
use runtime_balloon::BalloonRegistry;
use runtime_balloon::BalloonShrinker;
use runtime_balloon::BALLOON_UNIT;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

/// Tracks which ranges are currently holes, like the real
/// virtual-memory manager would via its mapping list. Cloning shares
/// the list, so the test keeps a handle alongside the registry's.
#[derive(Default, Clone)]
struct TrackingMem {
    holes: Arc<Mutex<Vec<HeapRange>>>,
}

impl BalloonMemory for TrackingMem {
    fn map_unbacked(&self, range: HeapRange, _tag: BalloonTag) -> u64 {
        self.holes.lock().push(range);
        range.len()
    }

    fn map_backed(&self, range: HeapRange) {
        let mut holes = self.holes.lock();
        let index = holes
            .iter()
            .position(|hole| *hole == range)
            .expect("re-backing a range that is not a hole");
        holes.swap_remove(index);
    }
}

/// Hands out unit-aligned heap buffers and counts reference traffic.
#[derive(Default)]
struct Runtime {
    attached: AtomicU64,
    next: AtomicU64,
    live_refs: AtomicU64,
}

impl RuntimeBridge for &Runtime {
    fn current_thread_attached(&self) -> bool {
        self.attached.load(Relaxed) != 0
    }

    fn attach_thread(&self) {
        self.attached.fetch_add(1, Relaxed);
    }

    fn detach_thread(&self) {
        self.attached.fetch_sub(1, Relaxed);
    }

    fn allocate_buffer(&self, len: u64) -> Option<AllocatedBuffer> {
        let n = self.next.fetch_add(1, Relaxed) + 1;
        Some(AllocatedBuffer {
            local: LocalRef::new(n),
            addr: n * 2 * len,
            is_direct: true,
        })
    }

    fn retain_durable(&self, local: LocalRef) -> DurableRef {
        self.live_refs.fetch_add(1, Relaxed);
        DurableRef::new(local.raw())
    }

    fn release_durable(&self, _durable: DurableRef) {
        self.live_refs.fetch_sub(1, Relaxed);
    }
}

struct Decoder {
    copy: BulkCopy,
}

impl CopyDecode for Decoder {
    type Frame = Option<u64>;

    fn find_copy(&self, _frame: &Self::Frame) -> Option<BulkCopy> {
        Some(self.copy)
    }

    fn patch_resume(&self, frame: &mut Self::Frame, resolved: u64) {
        *frame = Some(resolved);
    }
}

#[test]
fn balloon_lifecycle() {
    let mem = TrackingMem::default();
    let registry = Arc::new(BalloonRegistry::new(mem.clone()));
    let runtime = Runtime::default();
    let shrinker = BalloonShrinker::new(registry.clone(), &runtime);

    // Memory pressure: reclaim three units.
    let reclaimed = shrinker.request_memory(3 * BALLOON_UNIT);
    assert_eq!(reclaimed, 3 * BALLOON_UNIT);
    assert_eq!(registry.balloon_count(), 3);
    assert_eq!(runtime.live_refs.load(Relaxed), 3);
    assert_eq!(runtime.attached.load(Relaxed), 0, "attach not undone");

    // The collector moves the second buffer (base 4 units) to a fresh
    // region. The copy faults on the hole's first byte.
    let old_base = 2 * 2 * BALLOON_UNIT;
    let new_base = 32 * BALLOON_UNIT;
    let decoder = Decoder {
        copy: BulkCopy {
            dest: new_base,
            src: old_base,
        },
    };
    let mut frame = None;
    registry.handle_copy_fault(&decoder, &mut frame, old_base);
    assert_eq!(frame, Some(BALLOON_UNIT));

    // The hole followed the buffer: one hole now covers the new base
    // and none covers the old.
    {
        let holes = mem.holes.lock();
        assert!(holes.iter().any(|h| h.contains_addr(new_base)));
        assert!(!holes.iter().any(|h| h.contains_addr(old_base)));
        assert_eq!(holes.len(), 3);
    }

    // Pressure eases: give two units back, newest first.
    let released = shrinker.release_memory(2 * BALLOON_UNIT);
    assert_eq!(released, 2 * BALLOON_UNIT);
    assert_eq!(registry.balloon_count(), 1);
    assert_eq!(runtime.live_refs.load(Relaxed), 1);

    // The survivor is the oldest balloon, still faultable in place.
    let oldest_base = 2 * BALLOON_UNIT;
    let decoder = Decoder {
        copy: BulkCopy {
            dest: 48 * BALLOON_UNIT,
            src: oldest_base,
        },
    };
    let mut frame = None;
    registry.handle_copy_fault(&decoder, &mut frame, oldest_base);
    assert_eq!(frame, Some(BALLOON_UNIT));

    // Releasing more than remains degrades to what is left.
    assert_eq!(shrinker.release_memory(4 * BALLOON_UNIT), BALLOON_UNIT);
    assert!(registry.is_empty());
    assert_eq!(runtime.live_refs.load(Relaxed), 0);
    assert!(mem.holes.lock().is_empty(), "holes outlived their balloons");
}
