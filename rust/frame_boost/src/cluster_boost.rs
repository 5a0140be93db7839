// SPDX-License-Identifier: GPL-2.0

//! Per-task preferred-cluster overlay.
//!
//! One process at a time (typically a game) may pin individual threads to a
//! CPU cluster. The override only applies to threads of the registered
//! process, so stale per-task values left over from before registration can
//! never route unrelated threads to the little cluster.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::task::{Pid, TaskArena, TaskEntry};

pub struct ClusterBoost {
    /// Thread-group id whose threads the overlay applies to, -1 when unset.
    interested_tgid: AtomicI32,
}

impl Default for ClusterBoost {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterBoost {
    pub fn new() -> Self {
        Self { interested_tgid: AtomicI32::new(-1) }
    }

    /// Pin `tid` to `cluster_id`, registering its process as the interested
    /// one. Out-of-range ids clear the pin.
    pub fn set_task_preferred_cluster(
        &self,
        arena: &TaskArena,
        tid: Pid,
        cluster_id: i32,
        nr_clusters: usize,
    ) {
        let Some(entry) = arena.get(tid) else { return };
        self.interested_tgid.store(entry.tgid, Ordering::Relaxed);
        if cluster_id >= 0 && (cluster_id as usize) < nr_clusters {
            entry.set_preferred_cluster(cluster_id);
        } else {
            entry.set_preferred_cluster(-1);
        }
    }

    /// Cluster override for `entry`, if its process is the interested one.
    pub fn preferred_cluster(&self, entry: &TaskEntry, nr_clusters: usize) -> Option<usize> {
        if self.interested_tgid.load(Ordering::Relaxed) != entry.tgid {
            return None;
        }
        entry.preferred_cluster().filter(|&id| id < nr_clusters)
    }
}
