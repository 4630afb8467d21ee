// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The memory-pressure side of ballooning: turning coordinator byte
//! targets into balloon creation and destruction.

use crate::bridge::BalloonMemory;
use crate::bridge::RuntimeBridge;
use crate::registry::BalloonRegistry;
use crate::BALLOON_UNIT;
use std::sync::Arc;

/// Scoped runtime attachment for the calling thread.
///
/// Shrinker operations run either on a runtime-owned thread, which is
/// already attached, or on a foreign kernel thread, which must be
/// attached for the duration of the call. The guard records which case
/// applied, so a thread attached by its caller is never detached here.
struct AttachGuard<'a, R: RuntimeBridge> {
    bridge: &'a R,
    owned: bool,
}

impl<'a, R: RuntimeBridge> AttachGuard<'a, R> {
    fn enter(bridge: &'a R) -> Self {
        let owned = !bridge.current_thread_attached();
        if owned {
            bridge.attach_thread();
        }
        Self { bridge, owned }
    }
}

impl<R: RuntimeBridge> Drop for AttachGuard<'_, R> {
    fn drop(&mut self) {
        if self.owned {
            self.bridge.detach_thread();
        }
    }
}

/// Services memory-pressure requests by creating and destroying
/// balloons.
///
/// Both operations degrade gracefully: a request that cannot be fully
/// satisfied returns the bytes actually reclaimed or released, never an
/// error, and the coordinator adapts its policy to the shortfall.
#[derive(Debug)]
pub struct BalloonShrinker<M, R> {
    registry: Arc<BalloonRegistry<M>>,
    bridge: R,
}

impl<M: BalloonMemory, R: RuntimeBridge> BalloonShrinker<M, R> {
    /// Creates a shrinker driving `registry` through `bridge`.
    pub fn new(registry: Arc<BalloonRegistry<M>>, bridge: R) -> Self {
        Self { registry, bridge }
    }

    /// Reclaims up to `target` bytes from the runtime heap by
    /// allocating unit-size buffers and converting each into a balloon.
    ///
    /// Returns the bytes actually converted to holes, which may fall
    /// short of `target`: a pending runtime error (typically the
    /// runtime is itself out of memory) ends the loop with whatever
    /// progress was made.
    pub fn request_memory(&self, target: u64) -> u64 {
        let _attach = AttachGuard::enter(&self.bridge);

        let mut total = 0;
        while total < target {
            let Some(buffer) = self.bridge.allocate_buffer(BALLOON_UNIT) else {
                break;
            };

            // Some allocation paths hand back a copy of the array
            // rather than the live backing store. A copy's address is
            // useless for ballooning, and the behavior is a property of
            // the bridge configuration, so retrying cannot help.
            if !buffer.is_direct {
                break;
            }

            // The local reference dies with this call sequence; only a
            // durable reference keeps the collector from reclaiming the
            // buffer while the balloon exists.
            let handle = self.bridge.retain_durable(buffer.local);
            total += self.registry.create_balloon(buffer.addr, handle);
        }

        tracing::info!(requested = target, reclaimed = total, "balloon memory request");
        total
    }

    /// Returns up to `target` bytes to the runtime heap by destroying
    /// balloons, newest first by default.
    ///
    /// Dropping the durable reference is all the runtime needs: the
    /// collector disposes of the buffer whenever it chooses. Returns
    /// the bytes released, zero if no balloons remain.
    pub fn release_memory(&self, target: u64) -> u64 {
        let _attach = AttachGuard::enter(&self.bridge);

        let released = self
            .registry
            .release_up_to(target, |handle| self.bridge.release_durable(handle));

        tracing::info!(requested = target, released, "balloon memory release");
        released
    }
}
