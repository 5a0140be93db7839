// SPDX-License-Identifier: GPL-2.0
//
// frame_boost: frame-aware boost groups for display pipelines.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Frame-aware boost groups.
//!
//! A *frame group* is the set of threads that collectively produce one
//! rendering pipeline's frames (UI thread, render thread, their helpers).
//! The library tracks each group's execution inside per-frame windows,
//! projects the load of the frame currently being drawn before it has been
//! measured, and turns both signals into CPU-cluster placement and
//! frequency-governor hints.
//!
//! Nothing here owns a thread. Every entry point runs synchronously on the
//! host scheduler's call stack and must not block; see [`hooks::HostCpus`]
//! for the interface the host provides in return.

mod clock;
mod cluster;
mod cluster_boost;
mod ctrl;
mod error;
mod frame_group;
mod frame_info;
mod hooks;
mod stats;
mod task;

pub use clock::{Clock, MonotonicTime, TimeSource};
pub use cluster::{Cluster, ClusterTopology, CpuMask, MAX_CPUS};
pub use ctrl::{BoostStage, FrameUtilInfo, TunableUpdate, MAX_KEY_THREADS};
pub use error::{FbgError, Result};
pub use frame_group::{
    BoostType, FrameBoost, FrameGroup, BOOST_TYPE_COUNT, DEFAULT_WINDOW_SIZE, ED_BOOST_MAX,
    ED_BOOST_MID, ED_BOOST_NONE,
};
pub use frame_info::{FrameState, FRAME_MAX_UTIL, MAX_FRAME_RATE, MIN_FRAME_RATE};
pub use hooks::{HostCpus, CPUFREQ_DEF_FRAMEBOOST, CPUFREQ_EARLY_DET, CPUFREQ_IMS_FRAMEBOOST,
                CPUFREQ_SF_FRAMEBOOST};
pub use stats::{boost_name, GroupSnapshot, TaskSnapshot};
pub use task::{GroupId, Membership, Pid, TaskArena, TaskEntry};

pub(crate) const NSEC_PER_SEC: u64 = 1_000_000_000;
pub(crate) const NSEC_PER_MSEC: u64 = 1_000_000;

/// Fixed-point shift shared with the host's capacity scale (1024 == one CPU
/// at full architectural capacity and maximum frequency).
pub const SCHED_CAPACITY_SHIFT: u32 = 10;
pub const SCHED_CAPACITY_SCALE: u64 = 1 << SCHED_CAPACITY_SHIFT;

#[cfg(test)]
pub(crate) mod sim;
