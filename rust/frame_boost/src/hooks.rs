// SPDX-License-Identifier: GPL-2.0

//! The interface the host scheduler provides to the library.
//!
//! Everything the library needs to know about CPUs and running tasks comes
//! through [`HostCpus`]; everything the library wants the host to do (kick
//! the frequency governor, signal the early-detection agent) goes back out
//! through the same trait. Implementations must be cheap and non-blocking:
//! every method may be called from a scheduling hot path.

use crate::cluster::CpuMask;
use crate::task::Pid;

/// Frequency-update request originated from a dynamic or default group.
pub const CPUFREQ_DEF_FRAMEBOOST: u32 = 1 << 29;
/// Request originated from the compositor group.
pub const CPUFREQ_SF_FRAMEBOOST: u32 = 1 << 28;
/// Request originated from the input-method group.
pub const CPUFREQ_IMS_FRAMEBOOST: u32 = 1 << 30;
/// Request originated from early detection of a long-runnable frame task.
pub const CPUFREQ_EARLY_DET: u32 = 1 << 27;

pub trait HostCpus: Send + Sync {
    fn nr_cpus(&self) -> usize;

    /// Hardware cluster id of `cpu`, or negative when unknown.
    fn cluster_id(&self, cpu: usize) -> i32;

    /// Architectural capacity of `cpu` on the 1024 scale.
    fn arch_capacity(&self, cpu: usize) -> u64;

    /// Capacity of `cpu` after thermal/frequency ceilings.
    fn current_capacity(&self, cpu: usize) -> u64;

    /// Current and maximum frequency of `cpu`, in kHz.
    fn cur_freq(&self, cpu: usize) -> u64;
    fn max_freq(&self, cpu: usize) -> u64;

    /// CPUs currently online and schedulable.
    fn active_mask(&self) -> CpuMask;

    /// Affinity mask of `pid`, empty if the task is gone.
    fn allowed_cpus(&self, pid: Pid) -> CpuMask;

    /// Task currently running on `cpu`, if any.
    fn current_task(&self, cpu: usize) -> Option<Pid>;

    /// CPU `pid` is executing on right now, `None` when not on a CPU.
    fn task_on_cpu(&self, pid: Pid) -> Option<usize>;

    /// CPU `pid` is assigned to (its runqueue), whether or not it is
    /// executing.
    fn task_cpu(&self, pid: Pid) -> Option<usize>;

    fn is_idle(&self, cpu: usize) -> bool;

    /// Utilization of `cpu` with `pid`'s own contribution removed.
    fn cpu_util_without(&self, cpu: usize, pid: Pid) -> u64;

    /// Whether `cpu` has runnable real-time or otherwise protected work
    /// queued that placement must not disturb.
    fn rt_runnable(&self, cpu: usize) -> bool;

    /// Whether the host marks `pid` as a latency-protected thread.
    fn is_protected(&self, pid: Pid) -> bool;

    /// Runnable tasks queued on `cpu`, best effort.
    fn runnable_tasks(&self, cpu: usize) -> Vec<Pid>;

    /// Kick the frequency governor for `cpu`. `flags` is one of the
    /// `CPUFREQ_*` request-origin bits.
    fn update_freq(&self, cpu: usize, flags: u32);

    /// Notify the registered early-detection agent that a frame task has
    /// been runnable too long.
    fn notify_early_detection(&self, agent: Pid);
}
