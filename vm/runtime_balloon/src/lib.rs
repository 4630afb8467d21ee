// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Relocation engine for managed-runtime memory balloons.
//!
//! A balloon is a slice of a garbage-collected runtime's heap that the
//! kernel has quietly left unbacked by physical memory: the runtime
//! believes it owns an ordinary byte buffer, while the kernel reuses the
//! backing pages elsewhere. The runtime never touches the buffer itself,
//! but its collector periodically moves heap objects with large bulk
//! copies, and such a copy can run straight into the unbacked hole with
//! no advance warning.
//!
//! This crate traps that fault, reconstructs the copy through the
//! [`bridge::CopyDecode`] collaborator, moves the balloon so it keeps the
//! same offset relative to the copy's destination, and reports how many
//! trailing bytes of the copy were resolved implicitly by the remapping,
//! so the interrupted instruction can be patched and resumed. The page
//! table work, fault-frame decoding, and runtime bridge all live behind
//! traits in [`bridge`]; this crate owns only the balloon bookkeeping.
//!
//! Balloons are created and destroyed by [`BalloonShrinker`] in response
//! to a memory-pressure coordinator, and tracked in a [`BalloonRegistry`]
//! whose single lock serializes every creation, relocation, and
//! destruction.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod balloon;
pub mod bridge;
mod registry;
mod shrinker;

pub use registry::BalloonRegistry;
pub use registry::ReleaseOrder;
pub use shrinker::BalloonShrinker;

/// The fixed balloon size, one granularity unit.
///
/// Constant-size balloons keep the registry fungible: any balloon can
/// satisfy any release request, with no search for a best-fit size. The
/// size is also large enough to make it likely that whole huge pages map
/// in and out of the hole.
pub const BALLOON_UNIT: u64 = 128 << 20;

/// The default hole alignment: the largest practical backing-page size,
/// so the hole spans whole huge pages.
pub const DEFAULT_ALIGNMENT: u64 = 2 << 20;
