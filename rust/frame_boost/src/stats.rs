// SPDX-License-Identifier: GPL-2.0

//! Introspection: point-in-time snapshots of every group, serializable for
//! tooling and renderable as a plain-text dump.

use std::fmt::{self, Write};

use serde::Serialize;

use crate::frame_group::{BoostType, FrameBoost, BOOST_TYPE_COUNT};
use crate::task::{GroupId, Membership, Pid};

#[derive(Clone, Debug, Serialize)]
pub struct TaskSnapshot {
    pub pid: Pid,
    pub tgid: Pid,
    pub comm: String,
    pub membership: &'static str,
    pub binder_depth: Option<u8>,
    pub running: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct GroupSnapshot {
    pub id: u8,
    pub label: &'static str,
    pub ui: Option<Pid>,
    pub render: Option<Pid>,
    pub nr_running: i32,
    pub binder_threads: i32,
    pub frame_rate: u32,
    pub window_size: u64,
    pub window_busy: u64,
    pub prev_window_scale: u64,
    pub curr_window_scale: u64,
    pub policy_util: u64,
    pub curr_util: u64,
    pub preferred_cluster: Option<usize>,
    pub available_cluster: Option<usize>,
    pub boost: [i32; BOOST_TYPE_COUNT],
    pub tasks: Vec<TaskSnapshot>,
}

fn group_label(id: GroupId) -> &'static str {
    match id {
        GroupId::DEFAULT => "default",
        GroupId::COMPOSITOR => "compositor",
        GroupId::GAME => "game",
        GroupId::INPUT_METHOD => "input",
        _ => "multi",
    }
}

pub fn boost_name(ty: BoostType) -> &'static str {
    use BoostType::*;
    match ty {
        DefMigr => "migr",
        DefFreq => "freq",
        UtilFrameRate => "fps",
        UtilMinThreshold => "min_threshold",
        UtilMinObtainView => "min_obtain_view",
        UtilMinTimeout => "min_timeout",
        SfInGpu => "sf_in_gpu",
        SfMigrNongpu => "sf_migr_nongpu",
        SfFreqNongpu => "sf_freq_nongpu",
        SfMigrGpu => "sf_migr_gpu",
        SfFreqGpu => "sf_freq_gpu",
        EdTaskMidDuration => "ed_mid_duration",
        EdTaskMidUtil => "ed_mid_util",
        EdTaskMaxDuration => "ed_max_duration",
        EdTaskMaxUtil => "ed_max_util",
        EdTaskTimeoutDuration => "ed_timeout",
    }
}

const BOOST_TYPES: [BoostType; BOOST_TYPE_COUNT] = [
    BoostType::DefMigr,
    BoostType::DefFreq,
    BoostType::UtilFrameRate,
    BoostType::UtilMinThreshold,
    BoostType::UtilMinObtainView,
    BoostType::UtilMinTimeout,
    BoostType::SfInGpu,
    BoostType::SfMigrNongpu,
    BoostType::SfFreqNongpu,
    BoostType::SfMigrGpu,
    BoostType::SfFreqGpu,
    BoostType::EdTaskMidDuration,
    BoostType::EdTaskMidUtil,
    BoostType::EdTaskMaxDuration,
    BoostType::EdTaskMaxUtil,
    BoostType::EdTaskTimeoutDuration,
];

impl FrameBoost {
    pub fn group_snapshot(&self, id: GroupId) -> GroupSnapshot {
        let grp = self.group(id);
        let state = grp.state();

        let tasks = state
            .tasks
            .iter()
            .filter_map(|&pid| self.task_arena().get(pid))
            .map(|entry| {
                let tstate = entry.state();
                let (membership, binder_depth) = match tstate.membership {
                    Membership::None => ("none", None),
                    Membership::Static(_) => ("static", None),
                    Membership::Binder { depth, .. } => ("binder", Some(depth)),
                };
                TaskSnapshot {
                    pid: entry.pid,
                    tgid: entry.tgid,
                    comm: entry.comm.clone(),
                    membership,
                    binder_depth,
                    running: tstate.running,
                }
            })
            .collect();

        GroupSnapshot {
            id: id.raw(),
            label: group_label(id),
            ui: state.ui,
            render: state.render,
            nr_running: state.nr_running,
            binder_threads: state.binder_threads,
            frame_rate: self.frame_infos().frame_rate(id),
            window_size: state.window_size,
            window_busy: state.window_busy,
            prev_window_scale: state.prev_window_scale,
            curr_window_scale: state.curr_window_scale,
            policy_util: grp.policy_util(),
            curr_util: grp.curr_util(),
            preferred_cluster: state.preferred_cluster,
            available_cluster: state.available_cluster,
            boost: state.boost,
            tasks,
        }
    }

    /// Snapshot of every group, dynamic slots included.
    pub fn snapshot(&self) -> Vec<GroupSnapshot> {
        (1..GroupId::MAX_ID as i32)
            .filter_map(|raw| GroupId::from_raw(raw).ok())
            .map(|id| self.group_snapshot(id))
            .collect()
    }

    /// Human-readable dump of all groups, one block per group with member
    /// lines indented, in the shape of the kernel-style info node.
    pub fn dump<W: Write>(&self, w: &mut W) -> fmt::Result {
        for snap in self.snapshot() {
            writeln!(
                w,
                "grp[{}] {} fps={} busy={}% util={}/{} cluster={:?} nr_running={} binder={}",
                snap.id,
                snap.label,
                snap.frame_rate,
                snap.window_busy,
                snap.policy_util,
                snap.curr_util,
                snap.preferred_cluster,
                snap.nr_running,
                snap.binder_threads,
            )?;
            for (ty, value) in BOOST_TYPES.iter().zip(snap.boost.iter()) {
                if *value != 0 {
                    writeln!(w, "  boost {}={}", boost_name(*ty), value)?;
                }
            }
            for task in &snap.tasks {
                write!(
                    w,
                    "  task[{}] tgid={} comm={} {}",
                    task.pid, task.tgid, task.comm, task.membership
                )?;
                if let Some(depth) = task.binder_depth {
                    write!(w, " depth={depth}")?;
                }
                if task.running {
                    write!(w, " running")?;
                }
                writeln!(w)?;
            }
        }
        Ok(())
    }
}
