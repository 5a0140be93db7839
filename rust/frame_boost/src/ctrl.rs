// SPDX-License-Identifier: GPL-2.0

//! Control surface: the operations a userspace agent (compositor, activity
//! manager, game service) drives the library with. Raw group ids and thread
//! ids from the outside are validated here; the core modules only ever see
//! checked values.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{FbgError, Result};
use crate::frame_group::{BoostType, FrameBoost};
use crate::frame_info::FrameState;
use crate::task::{GroupId, Pid};
use crate::NSEC_PER_SEC;

/// Threads one game-group membership request may carry.
pub const MAX_KEY_THREADS: usize = 10;

/// Per-frame pipeline notifications, sent by the app whose UI or render
/// thread is the caller.
#[derive(Clone, Copy, Debug)]
pub enum BoostStage {
    FrameStart { buffer_count: i32 },
    FrameEnd { buffer_count: i32, next_vsync: i32 },
    /// An expensive view inflation is starting.
    ObtainView,
    /// The frame missed its deadline.
    FrameTimeout,
    SetRenderThread { tid: Pid },
    InputStart,
}

/// Previous-window readout handed back at a game frame start.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameUtilInfo {
    pub frame_scale: u64,
    pub frame_busy: u64,
}

/// Batched tunable update. Absent fields keep their current values;
/// out-of-range values are skipped, never applied partially clamped.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TunableUpdate {
    pub util_frame_rate: Option<i32>,
    pub vutil_margin: Option<i64>,
    pub boost_freq: Option<i32>,
    pub boost_migr: Option<i32>,
    pub util_min_threshold: Option<i32>,
    pub util_min_obtain_view: Option<i32>,
    pub util_min_timeout: Option<i32>,
    pub ed_task_mid_duration: Option<i32>,
    pub ed_task_mid_util: Option<i32>,
    pub ed_task_max_duration: Option<i32>,
    pub ed_task_max_util: Option<i32>,
    pub ed_task_timeout_duration: Option<i32>,
    pub sf_freq_nongpu: Option<i32>,
    pub sf_migr_nongpu: Option<i32>,
    pub sf_freq_gpu: Option<i32>,
    pub sf_migr_gpu: Option<i32>,
}

fn boost_type_from_raw(raw: i32) -> Option<BoostType> {
    use BoostType::*;
    Some(match raw {
        0 => DefMigr,
        1 => DefFreq,
        2 => UtilFrameRate,
        3 => UtilMinThreshold,
        4 => UtilMinObtainView,
        5 => UtilMinTimeout,
        6 => SfInGpu,
        7 => SfMigrNongpu,
        8 => SfFreqNongpu,
        9 => SfMigrGpu,
        10 => SfFreqGpu,
        11 => EdTaskMidDuration,
        12 => EdTaskMidUtil,
        13 => EdTaskMaxDuration,
        14 => EdTaskMaxUtil,
        15 => EdTaskTimeoutDuration,
        _ => return None,
    })
}

impl FrameBoost {
    /// The compositor announced its vsync period; it caps every app rate.
    /// The compositor window follows the period even when the rate is
    /// unchanged.
    pub fn set_compositor_refresh_rate(&self, vsync_ns: u64) -> Result<()> {
        if vsync_ns == 0 {
            return Err(FbgError::InvalidArg);
        }
        let rate = (NSEC_PER_SEC / vsync_ns) as u32;
        self.frame_infos().set_frame_rate(GroupId::COMPOSITOR, rate)?;
        self.set_window_size(GroupId::COMPOSITOR, vsync_ns);
        Ok(())
    }

    /// An app announced its render rate. Only the group's own UI or render
    /// thread may speak for it, and only active dynamic groups or the game
    /// group listen.
    pub fn set_app_refresh_rate(&self, caller: Pid, pid: Pid, tid: Pid, vsync_ns: u64) -> Result<()> {
        if vsync_ns == 0 {
            return Err(FbgError::InvalidArg);
        }
        if caller != pid && caller != tid {
            return Ok(());
        }
        let Ok(id) = self.task_group_id(pid) else { return Ok(()) };
        if !self.frame_infos().is_active_multi(id) && id != GroupId::GAME {
            return Ok(());
        }
        let rate = (NSEC_PER_SEC / vsync_ns) as u32;
        if self.frame_infos().set_frame_rate(id, rate)? {
            self.set_window_size(id, vsync_ns);
        }
        Ok(())
    }

    /// Per-frame hint from the app owning `pid`'s group. Hints from threads
    /// that are neither the named UI nor render thread are dropped; apps
    /// outside any group (status bars and the like) get a quiet `Ok`.
    pub fn frame_stage(&self, caller: Pid, pid: Pid, stage: BoostStage) -> Result<()> {
        let own = match stage {
            BoostStage::SetRenderThread { tid } => caller == pid || caller == tid,
            _ => caller == pid,
        };
        if !own {
            return Ok(());
        }
        let Ok(id) = self.task_group_id(pid) else { return Ok(()) };

        // The compositor, game, and input-method pipelines manage frame
        // state through their own entry points.
        let self_managed = id == GroupId::COMPOSITOR
            || id == GroupId::GAME
            || id == GroupId::INPUT_METHOD;

        match stage {
            BoostStage::FrameStart { buffer_count } => {
                if self_managed {
                    return Ok(());
                }
                self.frame_infos()
                    .set_state(id, FrameState::Start, buffer_count, -1);
                self.rollover_window(id);
                self.default_group_update_cpufreq(id);
            }
            BoostStage::FrameEnd { buffer_count, next_vsync } => {
                if self_managed {
                    return Ok(());
                }
                self.set_end_exec(id);
                self.frame_infos()
                    .set_state(id, FrameState::End, buffer_count, next_vsync);
                self.default_group_update_cpufreq(id);
            }
            BoostStage::ObtainView => {
                if !id.is_multi() {
                    return Err(FbgError::InvalidGroupId(id.raw() as i32));
                }
                let rate = self.frame_infos().frame_rate(id) as i32;
                if rate >= self.boost(id, BoostType::UtilFrameRate) {
                    let floor = self.boost(id, BoostType::UtilMinObtainView) as i64;
                    self.frame_infos().set_util_min(id, floor, true)?;
                    self.default_group_update_cpufreq(id);
                }
            }
            BoostStage::FrameTimeout => {
                if !id.is_multi() {
                    return Err(FbgError::InvalidGroupId(id.raw() as i32));
                }
                let rate = self.frame_infos().frame_rate(id) as i32;
                let thresh = self.boost(id, BoostType::UtilMinThreshold) as u64;
                if rate >= self.boost(id, BoostType::UtilFrameRate)
                    && self.check_putil_over_thresh(id, thresh)
                {
                    let floor = self.boost(id, BoostType::UtilMinTimeout) as i64;
                    self.frame_infos().set_util_min(id, floor, true)?;
                    self.default_group_update_cpufreq(id);
                }
            }
            BoostStage::SetRenderThread { tid } => {
                self.set_render_thread(id, pid, tid);
            }
            BoostStage::InputStart => {
                if self.frame_infos().is_active_multi(id) {
                    self.frame_infos().set_state(id, FrameState::Start, -1, 1);
                    self.rollover_window(id);
                    let floor = self.boost(id, BoostType::UtilMinTimeout) as i64;
                    self.frame_infos().set_util_min(id, floor, true)?;
                } else if id != GroupId::INPUT_METHOD {
                    return Ok(());
                }
                self.input_set_boost_start(id);
            }
        }
        Ok(())
    }

    /// An app moved to the foreground. `grp_id` -1 allocates a fresh dynamic
    /// group; `pid`/`tid` -1 tears the named group down and frees its slot.
    pub fn move_to_foreground(&self, grp_id: i32, pid: Pid, tid: Pid) -> Result<GroupId> {
        let id = if grp_id == -1 {
            self.frame_infos().alloc_multi()?
        } else {
            let id = GroupId::from_raw(grp_id)?;
            if !self.frame_infos().is_active_multi(id) {
                return Err(FbgError::InactiveMultiId(grp_id));
            }
            if pid == -1 || tid == -1 {
                self.clear_static_tasks(id);
                self.frame_infos().release_multi(id);
                return Ok(id);
            }
            id
        };

        debug!("foreground group {} pid={pid} tid={tid}", id.raw());
        self.set_ui_thread(id, pid);
        self.set_render_thread(id, pid, tid);
        self.frame_infos().set_state(id, FrameState::End, 0, 0);
        self.rollover_window(id);
        Ok(id)
    }

    /// An input-method app moved to the foreground. Primes the group's
    /// utilization floor so the first keystroke is not serviced cold.
    pub fn move_ims_to_foreground(&self, pid: Pid, tid: Pid) -> GroupId {
        let id = GroupId::INPUT_METHOD;
        if pid == -1 || tid == -1 {
            self.clear_static_tasks(id);
            return id;
        }
        self.set_ui_thread(id, pid);
        self.set_render_thread(id, pid, tid);
        self.set_group_policy_util(id, self.boost(id, BoostType::UtilMinTimeout) as i64);
        id
    }

    /// Add or remove an auxiliary thread of an active dynamic group.
    pub fn add_frame_task(&self, grp_id: i32, tid: Pid, add: bool) -> Result<bool> {
        let id = GroupId::from_raw(grp_id)?;
        if !self.frame_infos().is_active_multi(id) {
            return Err(FbgError::InactiveMultiId(grp_id));
        }
        Ok(self.add_rm_related_task(id, tid, add))
    }

    pub fn add_frame_task_ims(&self, tid: Pid, add: bool) -> bool {
        self.add_rm_related_task(GroupId::INPUT_METHOD, tid, add)
    }

    /// The compositor started handing a frame to its main thread: its window
    /// turns over and every dynamic group's producer queue drains by one.
    pub fn sf_msg_trans_start(&self) {
        self.rollover_window(GroupId::COMPOSITOR);
        self.frame_infos().decay_buffer_counts();
    }

    /// Compositor execution notification: the main thread reports with
    /// `pid == tid`, the render engine with its own tid.
    pub fn sf_execute(&self, pid: Pid, tid: Pid) {
        if pid == tid {
            self.set_sf_thread(pid);
        } else {
            self.set_renderengine_thread(pid, tid);
        }
    }

    /// Game frame start: rolls the game window and reports the previous
    /// window's scaled execution and busy percent.
    pub fn game_frame_start(&self) -> FrameUtilInfo {
        self.frame_infos()
            .set_state(GroupId::GAME, FrameState::Start, -1, -1);
        self.rollover_window(GroupId::GAME);
        FrameUtilInfo {
            frame_scale: self.game_frame_scale(),
            frame_busy: self.game_frame_busy(),
        }
    }

    /// Batch game-group membership changes, capped per request.
    pub fn add_game_threads(&self, tids: &[Pid], add: bool) {
        for &tid in tids.iter().take(MAX_KEY_THREADS) {
            self.add_task_to_game_group(tid, add);
        }
    }

    /// Pin a thread of the interested process to a cluster.
    pub fn set_preferred_cluster(&self, tid: Pid, cluster_id: i32) {
        self.cluster_overlay().set_task_preferred_cluster(
            self.task_arena(),
            tid,
            cluster_id,
            self.topology().len(),
        );
    }

    /// Whether the compositor currently composes on the GPU; selects which
    /// of its boost pairs applies.
    pub fn set_compositor_gpu_composition(&self, in_gpu: bool) {
        self.set_boost(GroupId::COMPOSITOR, BoostType::SfInGpu, in_gpu as i32);
    }

    /// Drop the compositor back to its default boosts.
    pub fn reset_compositor_boosts(&self) {
        let sf = GroupId::COMPOSITOR;
        self.set_boost(sf, BoostType::SfFreqNongpu, 0);
        self.set_boost(sf, BoostType::SfMigrNongpu, 0);
        self.set_boost(sf, BoostType::SfFreqGpu, 30);
        self.set_boost(sf, BoostType::SfMigrGpu, 30);
    }

    /// Apply a batched tunable update to one group. Dynamic-group fields are
    /// ignored for the compositor and vice versa.
    pub fn apply_tunables(&self, grp_id: i32, upd: &TunableUpdate) -> Result<()> {
        let id = GroupId::from_raw(grp_id)?;

        if let Some(fps) = upd.util_frame_rate {
            if (0..=240).contains(&fps) {
                self.set_boost(id, BoostType::UtilFrameRate, fps);
            }
        }
        if let Some(margin) = upd.vutil_margin {
            if (-16..=16).contains(&margin) {
                self.frame_infos().set_margin(id, margin).ok();
            }
        }

        let pct = |v: i32| (0..=100).contains(&v);
        let util = |v: i32| (0..=1024).contains(&v);

        if id.is_multi() {
            let slots = [
                (upd.boost_freq, BoostType::DefFreq, pct as fn(i32) -> bool),
                (upd.boost_migr, BoostType::DefMigr, pct),
                (upd.util_min_threshold, BoostType::UtilMinThreshold, util),
                (upd.util_min_obtain_view, BoostType::UtilMinObtainView, util),
                (upd.util_min_timeout, BoostType::UtilMinTimeout, util),
                (upd.ed_task_mid_duration, BoostType::EdTaskMidDuration, |v| v >= 0),
                (upd.ed_task_mid_util, BoostType::EdTaskMidUtil, util),
                (upd.ed_task_max_duration, BoostType::EdTaskMaxDuration, |v| v >= 0),
                (upd.ed_task_max_util, BoostType::EdTaskMaxUtil, util),
                (
                    upd.ed_task_timeout_duration,
                    BoostType::EdTaskTimeoutDuration,
                    |v| v >= 0,
                ),
            ];
            for (value, ty, valid) in slots {
                if let Some(value) = value {
                    if valid(value) {
                        self.set_boost(id, ty, value);
                    }
                }
            }
        } else if id == GroupId::COMPOSITOR {
            let slots = [
                (upd.sf_freq_nongpu, BoostType::SfFreqNongpu),
                (upd.sf_migr_nongpu, BoostType::SfMigrNongpu),
                (upd.sf_freq_gpu, BoostType::SfFreqGpu),
                (upd.sf_migr_gpu, BoostType::SfMigrGpu),
            ];
            for (value, ty) in slots {
                if let Some(value) = value {
                    if pct(value) {
                        self.set_boost(id, ty, value);
                    }
                }
            }
        }
        Ok(())
    }

    /// JSON form of [`apply_tunables`], for config files and debug tooling.
    pub fn apply_tunables_json(&self, grp_id: i32, json: &str) -> Result<()> {
        let upd: TunableUpdate =
            serde_json::from_str(json).map_err(|_| FbgError::InvalidArg)?;
        self.apply_tunables(grp_id, &upd)
    }

    /// Raw single-slot write, clamped per slot kind. The default group's
    /// slots are not writable from here.
    pub fn write_stune_boost(&self, grp_id: i32, boost_type: i32, value: i32) -> Result<()> {
        let id = GroupId::from_raw(grp_id)?;
        if id == GroupId::DEFAULT {
            return Err(FbgError::InvalidGroupId(grp_id));
        }
        let ty = boost_type_from_raw(boost_type).ok_or(FbgError::InvalidArg)?;

        let value = match ty {
            BoostType::UtilFrameRate => value.clamp(0, 240),
            BoostType::UtilMinThreshold
            | BoostType::UtilMinObtainView
            | BoostType::UtilMinTimeout => value.clamp(0, 1024),
            BoostType::EdTaskMidDuration
            | BoostType::EdTaskMidUtil
            | BoostType::EdTaskMaxDuration
            | BoostType::EdTaskMaxUtil
            | BoostType::EdTaskTimeoutDuration => value,
            _ => value.min(100),
        };
        self.set_boost(id, ty, value);
        debug!("write boost grp_id={grp_id} boost_type={boost_type} value={value}");
        Ok(())
    }
}
