// SPDX-License-Identifier: GPL-2.0

//! Frame groups: membership, windowed load tracking, cluster selection,
//! frequency-policy utilization, placement and migration vetoes, and binder
//! membership propagation.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error};

use crate::clock::Clock;
use crate::cluster::{ClusterTopology, CpuMask};
use crate::cluster_boost::ClusterBoost;
use crate::error::{FbgError, Result};
use crate::frame_info::{FrameInfos, FrameState, DEFAULT_FRAME_RATE};
use crate::hooks::{HostCpus, CPUFREQ_DEF_FRAMEBOOST, CPUFREQ_EARLY_DET, CPUFREQ_IMS_FRAMEBOOST,
                   CPUFREQ_SF_FRAMEBOOST};
use crate::task::{GroupId, Membership, Pid, TaskArena, TaskEntry};
use crate::{NSEC_PER_MSEC, NSEC_PER_SEC, SCHED_CAPACITY_SCALE, SCHED_CAPACITY_SHIFT};

/// Inside the two-window span following the last frame start.
pub(crate) const FRAME_ZONE: u32 = 1 << 0;
/// A user interaction boost (slide/input) is active.
pub(crate) const USER_ZONE: u32 = 1 << 1;

/// A binder callee may itself pull in callees, but no deeper than this.
const MAX_BINDER_DEPTH: u8 = 2;
/// Binder callees one group may hold at a time.
const MAX_BINDER_THREADS: i32 = 6;

const FREQ_UPDATE_MIN_INTERVAL: u64 = 2 * NSEC_PER_MSEC;

/// Iteration cap on membership walks; a longer list means corrupted state.
const GROUP_TASKS_WALK_CAP: usize = 1000;

const GAME_ED_DEFAULT_DURATION: u64 = 9_500_000;
const GAME_ED_SIG_MIN_INTERVAL: u64 = 50 * NSEC_PER_MSEC;
/// Game-member candidates examined per early-detection scan.
const GAME_ED_SCAN_CAP: u32 = 5;

pub const DEFAULT_WINDOW_SIZE: u64 = NSEC_PER_SEC / DEFAULT_FRAME_RATE as u64;

/// Per-group tunable slots set from the control surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum BoostType {
    DefMigr = 0,
    DefFreq,
    UtilFrameRate,
    UtilMinThreshold,
    UtilMinObtainView,
    UtilMinTimeout,
    SfInGpu,
    SfMigrNongpu,
    SfFreqNongpu,
    SfMigrGpu,
    SfFreqGpu,
    EdTaskMidDuration,
    EdTaskMidUtil,
    EdTaskMaxDuration,
    EdTaskMaxUtil,
    EdTaskTimeoutDuration,
}

pub const BOOST_TYPE_COUNT: usize = BoostType::EdTaskTimeoutDuration as usize + 1;

/// Early-detection escalation level of the last qualifying task.
pub const ED_BOOST_NONE: u32 = 0;
pub const ED_BOOST_MID: u32 = 1;
pub const ED_BOOST_MAX: u32 = 2;

/// Everything a group protects with its lock. Placement and freq-query
/// readers take this; the two `policy_util`/`curr_util` atomics on
/// [`FrameGroup`] allow approximate reads without it.
pub(crate) struct GroupState {
    pub tasks: Vec<Pid>,
    pub ui: Option<Pid>,
    pub render: Option<Pid>,
    pub hwtasks: [Option<Pid>; 2],
    pub binder_threads: i32,

    pub window_start: u64,
    pub window_size: u64,
    pub prev_window_size: u64,

    pub curr_window_exec: u64,
    pub curr_window_scale: u64,
    pub prev_window_exec: u64,
    pub prev_window_scale: u64,

    /// Execution and timestamp captured at the frame-end notification.
    pub curr_end_exec: u64,
    pub curr_end_time: u64,
    pub handler_busy: bool,

    /// Percent of the last full window the group spent executing.
    pub window_busy: u64,

    pub nr_running: i32,
    /// Start of the serialized-load timeline; advanced on each accrual.
    pub mark_start: u64,

    pub frame_zone: u32,

    pub boost: [i32; BOOST_TYPE_COUNT],

    /// Capacity-order index into the topology, `None` until first selection.
    pub preferred_cluster: Option<usize>,
    pub available_cluster: Option<usize>,
}

impl GroupState {
    fn new() -> Self {
        Self {
            tasks: Vec::new(),
            ui: None,
            render: None,
            hwtasks: [None, None],
            binder_threads: 0,
            window_start: 0,
            window_size: DEFAULT_WINDOW_SIZE,
            prev_window_size: DEFAULT_WINDOW_SIZE,
            curr_window_exec: 0,
            curr_window_scale: 0,
            prev_window_exec: 0,
            prev_window_scale: 0,
            curr_end_exec: 0,
            curr_end_time: 0,
            handler_busy: false,
            window_busy: 0,
            nr_running: 0,
            mark_start: 0,
            frame_zone: 0,
            boost: [0; BOOST_TYPE_COUNT],
            preferred_cluster: None,
            available_cluster: None,
        }
    }
}

pub struct FrameGroup {
    pub id: GroupId,
    inner: Mutex<GroupState>,
    /// Utilization handed to the frequency governor.
    policy_util: AtomicU64,
    /// Physical utilization of the current window, or a user-set floor.
    curr_util: AtomicU64,
    last_freq_update_ns: AtomicU64,
    last_util_update_ns: AtomicU64,
}

impl FrameGroup {
    fn new(id: GroupId) -> Self {
        let mut state = GroupState::new();
        if id.is_multi() {
            state.boost[BoostType::EdTaskMidDuration as usize] = 60;
            state.boost[BoostType::EdTaskMaxDuration as usize] = 80;
            state.boost[BoostType::EdTaskTimeoutDuration as usize] = 200;
            state.boost[BoostType::EdTaskMidUtil as usize] = 600;
            state.boost[BoostType::EdTaskMaxUtil as usize] = 900;
        }
        if id == GroupId::COMPOSITOR {
            state.boost[BoostType::SfFreqGpu as usize] = 30;
            state.boost[BoostType::SfMigrGpu as usize] = 30;
        }
        Self {
            id,
            inner: Mutex::new(state),
            policy_util: AtomicU64::new(0),
            curr_util: AtomicU64::new(0),
            last_freq_update_ns: AtomicU64::new(0),
            last_util_update_ns: AtomicU64::new(0),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, GroupState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn policy_util(&self) -> u64 {
        self.policy_util.load(Ordering::Relaxed)
    }

    pub fn curr_util(&self) -> u64 {
        self.curr_util.load(Ordering::Relaxed)
    }

    pub(crate) fn last_util_update_ns(&self) -> u64 {
        self.last_util_update_ns.load(Ordering::Relaxed)
    }
}

/// Proportional boost margin: positive boost closes a fraction of the gap to
/// full capacity, negative boost gives a fraction of the signal back.
fn schedtune_margin(util: u64, boost: i64) -> i64 {
    if boost >= 0 {
        (SCHED_CAPACITY_SCALE as i64 - util as i64) * boost / 100
    } else {
        util as i64 * boost / 100
    }
}

fn schedtune_grp_margin(util: u64, boost_pct: i32) -> i64 {
    if boost_pct == 0 || util == 0 {
        return 0;
    }
    schedtune_margin(util, boost_pct as i64)
}

struct GameEd {
    duration_ns: AtomicU64,
    agent: AtomicI32,
    last_signal_ns: AtomicU64,
}

/// The context object owning all frame-boost state. One per host scheduler;
/// every instrumentation point is a method on it.
pub struct FrameBoost {
    host: Arc<dyn HostCpus>,
    clock: Clock,
    topo: ClusterTopology,
    groups: Vec<FrameGroup>,
    infos: FrameInfos,
    tasks: TaskArena,
    overlay: ClusterBoost,
    enabled: AtomicBool,
    /// Set while a slide or input boost scene is active.
    user_zone: AtomicBool,
    ed_boost: AtomicU32,
    game_ed: GameEd,
}

impl FrameBoost {
    pub fn new(host: Arc<dyn HostCpus>, clock: Clock) -> Self {
        let topo = ClusterTopology::new(host.as_ref());
        let groups = (1..GroupId::MAX_ID as i32)
            .filter_map(|raw| GroupId::from_raw(raw).ok())
            .map(FrameGroup::new)
            .collect();
        Self {
            host,
            clock,
            topo,
            groups,
            infos: FrameInfos::new(),
            tasks: TaskArena::new(),
            overlay: ClusterBoost::new(),
            enabled: AtomicBool::new(true),
            user_zone: AtomicBool::new(false),
            ed_boost: AtomicU32::new(ED_BOOST_NONE),
            game_ed: GameEd {
                duration_ns: AtomicU64::new(GAME_ED_DEFAULT_DURATION),
                agent: AtomicI32::new(-1),
                last_signal_ns: AtomicU64::new(0),
            },
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
    }

    pub fn set_user_zone(&self, on: bool) {
        self.user_zone.store(on, Ordering::Relaxed);
    }

    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    pub fn suspend(&self) {
        self.clock.suspend();
    }

    pub fn resume(&self) {
        self.clock.resume();
    }

    pub fn topology(&self) -> &ClusterTopology {
        &self.topo
    }

    pub fn frame_infos(&self) -> &FrameInfos {
        &self.infos
    }

    pub fn task_arena(&self) -> &TaskArena {
        &self.tasks
    }

    pub(crate) fn cluster_overlay(&self) -> &ClusterBoost {
        &self.overlay
    }

    pub fn group(&self, id: GroupId) -> &FrameGroup {
        &self.groups[(id.raw() - 1) as usize]
    }

    /* ------------------------------------------------------------------ */
    /* Task lifecycle notifications                                        */
    /* ------------------------------------------------------------------ */

    pub fn on_task_fork(&self, pid: Pid, tgid: Pid, uid: u32, comm: &str, prio: i32) {
        let entry = self.tasks.insert(TaskEntry::new(pid, tgid, uid, comm, prio));
        entry.set_last_wake_ns(self.now_ns());
    }

    pub fn on_task_wakeup(&self, pid: Pid) {
        if !self.enabled() {
            return;
        }
        if let Some(entry) = self.tasks.get(pid) {
            entry.set_last_wake_ns(self.now_ns());
        }
    }

    pub fn on_task_exit(&self, pid: Pid) {
        if let Some(entry) = self.tasks.get(pid) {
            match entry.membership() {
                Membership::Static(id) => {
                    let grp = self.group(id);
                    let mut state = grp.state();
                    self.remove_static_locked(grp, &mut state, &entry);
                }
                Membership::Binder { group, .. } => {
                    let grp = self.group(group);
                    let mut state = grp.state();
                    Self::detach_binder_locked(grp, &mut state, &entry);
                }
                Membership::None => {}
            }
        }
        self.tasks.remove(pid);
    }

    /* ------------------------------------------------------------------ */
    /* Static membership                                                   */
    /* ------------------------------------------------------------------ */

    pub fn task_group_id(&self, pid: Pid) -> Result<GroupId> {
        let entry = self.tasks.require(pid)?;
        entry
            .membership()
            .group()
            .ok_or(FbgError::UnknownTask(pid))
    }

    /// True when `entry` already belongs to a group other than `id`.
    fn group_conflict(entry: &TaskEntry, id: GroupId) -> bool {
        matches!(entry.membership().group(), Some(cur) if cur != id)
    }

    fn add_task_locked(&self, grp: &FrameGroup, state: &mut GroupState, entry: &Arc<TaskEntry>) {
        let mut tstate = entry.state();
        if tstate.membership.is_member() {
            return;
        }
        state.tasks.push(entry.pid);
        tstate.membership = Membership::Static(grp.id);
        debug!("add task[{}][{}] to group {}", entry.pid, entry.comm, grp.id.raw());
    }

    fn reset_if_empty(grp: &FrameGroup, state: &mut GroupState) {
        if state.tasks.is_empty() {
            state.preferred_cluster = None;
            state.available_cluster = None;
            grp.policy_util.store(0, Ordering::Relaxed);
            grp.curr_util.store(0, Ordering::Relaxed);
            state.nr_running = 0;
        }
    }

    fn remove_static_locked(&self, grp: &FrameGroup, state: &mut GroupState, entry: &TaskEntry) {
        {
            let mut tstate = entry.state();
            if tstate.membership != Membership::Static(grp.id) {
                return;
            }
            state.tasks.retain(|&pid| pid != entry.pid);
            tstate.membership = Membership::None;

            if state.ui == Some(entry.pid) {
                state.ui = None;
            } else if state.render == Some(entry.pid) {
                state.render = None;
            }

            if tstate.running {
                tstate.running = false;
                state.nr_running -= 1;
                if state.nr_running < 0 {
                    state.nr_running = 0;
                }
            }
        }
        Self::reset_if_empty(grp, state);
    }

    fn clear_group_locked(&self, grp: &FrameGroup, state: &mut GroupState) {
        let members = std::mem::take(&mut state.tasks);
        for (walked, pid) in members.into_iter().enumerate() {
            if walked >= GROUP_TASKS_WALK_CAP {
                error!("group {} member list over walk cap, truncating", grp.id.raw());
                break;
            }
            let Some(entry) = self.tasks.get(pid) else { continue };
            let mut tstate = entry.state();
            if tstate.membership.is_static() {
                if state.ui == Some(pid) {
                    state.ui = None;
                } else if state.render == Some(pid) {
                    state.render = None;
                }
                if tstate.running {
                    tstate.running = false;
                    state.nr_running -= 1;
                    if state.nr_running < 0 {
                        state.nr_running = 0;
                    }
                }
            }
            tstate.membership = Membership::None;
            debug!("remove task[{}][{}] from group {}", pid, entry.comm, grp.id.raw());
        }
        state.hwtasks = [None, None];
        state.preferred_cluster = None;
        state.available_cluster = None;
        grp.policy_util.store(0, Ordering::Relaxed);
        grp.curr_util.store(0, Ordering::Relaxed);
        state.nr_running = 0;
        state.binder_threads = 0;
    }

    pub fn clear_static_tasks(&self, id: GroupId) {
        let grp = self.group(id);
        let mut state = grp.state();
        self.clear_group_locked(grp, &mut state);
    }

    /// Designate the group's UI thread. Replacing the UI thread resets the
    /// whole group: the old pipeline's members are meaningless for the new
    /// one.
    pub fn set_ui_thread(&self, id: GroupId, pid: Pid) {
        if id.is_multi() && !self.infos.is_active_multi(id) {
            error!("set ui thread {pid} on inactive group {}", id.raw());
            return;
        }
        let grp = self.group(id);
        let mut state = grp.state();
        if pid <= 0 || state.ui == Some(pid) {
            return;
        }
        let entry = self.tasks.get(pid);
        if let Some(ref entry) = entry {
            if Self::group_conflict(entry, id) {
                return;
            }
        }

        if state.ui.is_some() {
            self.clear_group_locked(grp, &mut state);
        }
        if let Some(entry) = entry {
            state.ui = Some(pid);
            self.add_task_locked(grp, &mut state, &entry);
        }
    }

    /// Designate the render thread; it must belong to the UI thread's
    /// process.
    pub fn set_render_thread(&self, id: GroupId, pid: Pid, tid: Pid) {
        if id.is_multi() && !self.infos.is_active_multi(id) {
            error!("set render thread {tid} on inactive group {}", id.raw());
            return;
        }
        let grp = self.group(id);
        let mut state = grp.state();
        if tid <= 0 || state.ui != Some(pid) || state.render == Some(tid) {
            return;
        }
        let entry = self.tasks.get(tid);
        if let Some(ref entry) = entry {
            if Self::group_conflict(entry, id) {
                return;
            }
        }

        if let Some(old) = state.render {
            if let Some(old_entry) = self.tasks.get(old) {
                self.remove_static_locked(grp, &mut state, &old_entry);
            }
        }
        if let Some(entry) = entry {
            state.render = Some(tid);
            self.add_task_locked(grp, &mut state, &entry);
        }
    }

    /// Designate the pair of hardware-assist threads, both keyed to the UI
    /// thread's pid.
    pub fn set_hwui_threads(&self, id: GroupId, pid: Pid, hwtid1: Pid, hwtid2: Pid) {
        let grp = self.group(id);
        let mut state = grp.state();
        if hwtid1 <= 0
            || hwtid2 <= 0
            || state.hwtasks[0] == Some(hwtid1)
            || state.hwtasks[1] == Some(hwtid2)
            || state.ui != Some(pid)
        {
            return;
        }
        let e1 = self.tasks.get(hwtid1);
        let e2 = self.tasks.get(hwtid2);
        if let (Some(ref e1), Some(ref e2)) = (&e1, &e2) {
            if Self::group_conflict(e1, id) || Self::group_conflict(e2, id) {
                return;
            }
        }

        for slot in 0..2 {
            if let Some(old) = state.hwtasks[slot] {
                if let Some(old_entry) = self.tasks.get(old) {
                    self.remove_static_locked(grp, &mut state, &old_entry);
                }
                state.hwtasks[slot] = None;
            }
        }
        if let (Some(e1), Some(e2)) = (e1, e2) {
            state.hwtasks = [Some(hwtid1), Some(hwtid2)];
            self.add_task_locked(grp, &mut state, &e1);
            self.add_task_locked(grp, &mut state, &e2);
        }
    }

    /// Compositor main thread; same replacement semantics as a UI thread.
    pub fn set_sf_thread(&self, pid: Pid) {
        let grp = self.group(GroupId::COMPOSITOR);
        let mut state = grp.state();
        if pid <= 0 || state.ui == Some(pid) {
            return;
        }
        let entry = self.tasks.get(pid);
        if let Some(ref entry) = entry {
            if Self::group_conflict(entry, GroupId::COMPOSITOR) {
                return;
            }
        }
        if state.ui.is_some() {
            self.clear_group_locked(grp, &mut state);
        }
        if let Some(entry) = entry {
            state.ui = Some(pid);
            self.add_task_locked(grp, &mut state, &entry);
        }
    }

    pub fn set_renderengine_thread(&self, pid: Pid, tid: Pid) {
        let grp = self.group(GroupId::COMPOSITOR);
        let mut state = grp.state();
        if tid <= 0 || state.ui != Some(pid) || state.render == Some(tid) {
            return;
        }
        let entry = self.tasks.get(tid);
        if let Some(ref entry) = entry {
            if Self::group_conflict(entry, GroupId::COMPOSITOR) {
                return;
            }
        }
        if let Some(old) = state.render {
            if let Some(old_entry) = self.tasks.get(old) {
                self.remove_static_locked(grp, &mut state, &old_entry);
            }
        }
        if let Some(entry) = entry {
            state.render = Some(tid);
            self.add_task_locked(grp, &mut state, &entry);
        }
    }

    /// Add or remove an auxiliary thread. Additions must share the effective
    /// uid with the group's UI thread.
    pub fn add_rm_related_task(&self, id: GroupId, tid: Pid, add: bool) -> bool {
        let Some(entry) = self.tasks.get(tid) else { return false };
        let grp = self.group(id);
        let mut state = grp.state();
        if add {
            let same_uid = state
                .ui
                .and_then(|ui| self.tasks.get(ui))
                .map(|ui| ui.uid == entry.uid)
                .unwrap_or(false);
            if same_uid {
                self.add_task_locked(grp, &mut state, &entry);
            }
        } else {
            self.remove_static_locked(grp, &mut state, &entry);
        }
        true
    }

    /// Game-group membership. Binder worker threads never qualify; only an
    /// unaffiliated thread can be added, only a game member removed.
    pub fn add_task_to_game_group(&self, tid: Pid, add: bool) -> bool {
        let Some(entry) = self.tasks.get(tid) else { return false };
        if entry.comm.contains("binder:") || entry.comm.contains("HwBinder:") {
            return false;
        }
        {
            let m = entry.membership();
            if (add && m.is_member()) || (!add && m != Membership::Static(GroupId::GAME)) {
                return false;
            }
        }
        let grp = self.group(GroupId::GAME);
        let mut state = grp.state();
        if add {
            self.add_task_locked(grp, &mut state, &entry);
        } else {
            self.remove_static_locked(grp, &mut state, &entry);
        }
        true
    }

    pub fn group_ui(&self, id: GroupId) -> Option<Pid> {
        self.group(id).state().ui
    }

    /* ------------------------------------------------------------------ */
    /* Binder membership propagation                                       */
    /* ------------------------------------------------------------------ */

    fn detach_binder_locked(grp: &FrameGroup, state: &mut GroupState, entry: &TaskEntry) {
        let mut tstate = entry.state();
        if !tstate.membership.is_binder() {
            return;
        }
        state.tasks.retain(|&pid| pid != entry.pid);
        tstate.membership = Membership::None;
        state.binder_threads -= 1;
        if state.binder_threads < 0 {
            error!(
                "group {} binder count below zero ({})",
                grp.id.raw(),
                state.binder_threads
            );
        }
    }

    /// A synchronous binder transaction was handed from `from` to `binder`:
    /// pull the callee into the caller's group for the duration of the work.
    pub fn on_binder_sync_received(&self, binder: Pid, from: Pid) {
        let (Some(callee), Some(caller)) = (self.tasks.get(binder), self.tasks.get(from)) else {
            return;
        };

        let caller_m = caller.membership();
        let Some(id) = caller_m.group() else { return };
        // Game and input-method pipelines never propagate over binder.
        if id == GroupId::GAME || id == GroupId::INPUT_METHOD {
            return;
        }

        let grp = self.group(id);
        let mut state = grp.state();

        // Re-read under the group lock; the caller may have left meanwhile.
        let caller_m = caller.membership();
        if caller_m.group() != Some(id) || callee.membership().is_member() {
            return;
        }
        if state.binder_threads >= MAX_BINDER_THREADS {
            return;
        }
        let depth = match caller_m {
            Membership::Binder { depth, .. } if depth >= MAX_BINDER_DEPTH => return,
            Membership::Binder { depth, .. } => depth + 1,
            _ => 1,
        };

        let mut tstate = callee.state();
        if tstate.membership.is_member() {
            return;
        }
        state.tasks.push(callee.pid);
        tstate.membership = Membership::Binder { group: id, depth };
        drop(tstate);
        state.binder_threads += 1;
    }

    fn detach_binder(&self, pid: Pid) {
        let Some(entry) = self.tasks.get(pid) else { return };
        let Membership::Binder { group, .. } = entry.membership() else { return };
        let grp = self.group(group);
        let mut state = grp.state();
        Self::detach_binder_locked(grp, &mut state, &entry);
    }

    /// The binder thread went back to its idle pool.
    pub fn on_binder_wait_for_work(&self, pid: Pid, do_proc_work: bool) {
        if do_proc_work {
            self.detach_binder(pid);
        }
    }

    /// The binder thread finished its transaction and restored priority.
    pub fn on_binder_restore_priority(&self, pid: Pid) {
        self.detach_binder(pid);
    }

    /* ------------------------------------------------------------------ */
    /* Windowed load tracking                                              */
    /* ------------------------------------------------------------------ */

    pub fn set_window_size(&self, id: GroupId, window_ns: u64) {
        self.group(id).state().window_size = window_ns;
    }

    /// Scale raw execution time by current frequency and architectural
    /// capacity, so a little core at half speed contributes what it would
    /// have cost the big core.
    fn scale_exec_time(&self, delta: u64, cpu: usize) -> u64 {
        let cur_freq = self.host.cur_freq(cpu);
        let max_freq = self.host.max_freq(cpu);
        if cur_freq == 0 || max_freq == 0 || cur_freq > max_freq {
            error!("cpu={cpu} cur_freq={cur_freq} max_freq={max_freq}");
            return delta;
        }
        let scale = (cur_freq * self.host.arch_capacity(cpu) + max_freq - 1) / max_freq;
        (delta * scale) >> SCHED_CAPACITY_SHIFT
    }

    fn update_group_util_locked(
        &self,
        grp: &FrameGroup,
        state: &mut GroupState,
        entry: &TaskEntry,
        mut running: u64,
        wallclock: u64,
        cpu: usize,
    ) {
        if wallclock < state.window_start {
            debug!(
                "skip util update, wallclock={wallclock} behind window_start={}",
                state.window_start
            );
            return;
        }
        let delta_wc_ws = wallclock - state.window_start;

        // Static members account on a serialized timeline anchored at
        // mark_start; binder transients contribute their raw runtime.
        if entry.membership().is_static() {
            if state.mark_start == 0 || wallclock <= state.mark_start {
                return;
            }
            running = wallclock - state.mark_start;
            state.mark_start = wallclock;
        }

        if running == 0 {
            return;
        }

        if delta_wc_ws >= running {
            state.curr_window_exec += running;
            state.curr_window_scale += self.scale_exec_time(running, cpu);
        } else {
            // Straddles the rollover: the excess belongs to the previous
            // window.
            let prev_exec = running - delta_wc_ws;
            state.prev_window_exec += prev_exec;
            state.prev_window_scale += self.scale_exec_time(prev_exec, cpu);
            state.curr_window_exec += delta_wc_ws;
            state.curr_window_scale += self.scale_exec_time(delta_wc_ws, cpu);
        }

        grp.last_util_update_ns.store(wallclock, Ordering::Relaxed);
    }

    fn update_task_util(&self, entry: &Arc<TaskEntry>, runtime: u64, need_freq_update: bool) {
        let Some(id) = entry.membership().group() else { return };

        if id != GroupId::INPUT_METHOD {
            let grp = self.group(id);
            let mut state = grp.state();
            let wallclock = self.now_ns();
            let cpu = self.host.task_cpu(entry.pid).unwrap_or(0);
            self.update_group_util_locked(grp, &mut state, entry, runtime, wallclock, cpu);
        }

        if need_freq_update {
            if id == GroupId::COMPOSITOR {
                self.sf_composition_update_cpufreq(entry.pid);
            } else if id == GroupId::INPUT_METHOD {
                self.input_update_cpufreq(id, entry.pid);
            } else if id.is_multi() {
                self.default_group_update_cpufreq(id);
            }
        }
    }

    /// The host accounted `runtime` ns of execution to `pid`.
    pub fn on_runtime_update(&self, pid: Pid, runtime: u64) {
        let Some(entry) = self.tasks.get(pid) else { return };
        self.update_task_util(&entry, runtime, true);
    }

    /// Sample every affected CPU's current task at a frequency transition so
    /// the old rate's execution is scaled with the old frequency.
    pub fn on_cpufreq_transition(&self, cpus: &CpuMask) {
        for cpu in cpus.iter() {
            if let Some(pid) = self.host.current_task(cpu) {
                if let Some(entry) = self.tasks.get(pid) {
                    self.update_task_util(&entry, 0, false);
                }
            }
        }
    }

    fn update_window_start_locked(&self, state: &mut GroupState, id: GroupId, wallclock: u64) {
        if wallclock <= state.window_start {
            debug!(
                "wallclock={wallclock} behind window_start={} group {}",
                state.window_start,
                id.raw()
            );
            return;
        }
        let delta = wallclock - state.window_start;
        state.window_start = wallclock;
        state.prev_window_size = state.window_size;
        state.window_busy = state.curr_window_exec * 100 / delta;
    }

    fn rollover_exectime_locked(state: &mut GroupState) {
        state.prev_window_scale = state.curr_window_scale;
        state.curr_window_scale = 0;
        state.prev_window_exec = state.curr_window_exec;
        state.curr_window_exec = 0;
        state.curr_end_exec = 0;
        state.curr_end_time = 0;
        state.handler_busy = false;
    }

    /// The game group has no per-frame runtime notifications, so running
    /// members are sampled on every CPU right before its window turns over.
    fn update_util_before_rollover(&self, id: GroupId) {
        if id != GroupId::GAME {
            return;
        }
        for cpu in 0..self.topo.nr_cpus() {
            if let Some(pid) = self.host.current_task(cpu) {
                if let Some(entry) = self.tasks.get(pid) {
                    self.update_task_util(&entry, 0, false);
                }
            }
        }
    }

    /// Close the current frame window: current becomes previous, current
    /// resets, the end-of-frame markers clear.
    pub fn rollover_window(&self, id: GroupId) {
        self.update_util_before_rollover(id);

        let grp = self.group(id);
        let mut state = grp.state();
        let wallclock = self.now_ns();
        self.update_window_start_locked(&mut state, id, wallclock);
        Self::rollover_exectime_locked(&mut state);
    }

    /* ------------------------------------------------------------------ */
    /* Running count                                                       */
    /* ------------------------------------------------------------------ */

    fn group_nr_running(&self, entry: &TaskEntry, pick_next: bool) {
        let Some(id) = entry.membership().group() else { return };
        let grp = self.group(id);
        let mut state = grp.state();
        let mut tstate = entry.state();
        if pick_next && tstate.membership.is_static() {
            tstate.running = true;
            state.nr_running += 1;
            if state.nr_running == 1 {
                state.mark_start = state.mark_start.max(self.now_ns());
            }
        } else if !pick_next && tstate.running {
            tstate.running = false;
            state.nr_running -= 1;
            if state.nr_running < 0 {
                state.nr_running = 0;
            }
        }
    }

    /// Schedule-switch notification: maintains each group's running count
    /// and kicks the governor when the incoming task qualifies for early
    /// detection.
    pub fn on_schedule_switch(&self, prev: Option<Pid>, next: Option<Pid>) {
        if !self.enabled() || prev == next {
            return;
        }
        if let Some(entry) = prev.and_then(|pid| self.tasks.get(pid)) {
            self.group_nr_running(&entry, false);
        }
        if let Some(pid) = next {
            if let Some(entry) = self.tasks.get(pid) {
                self.group_nr_running(&entry, true);
                if self.is_ed_task(&entry, self.now_ns()) {
                    if let Some(cpu) = self.host.task_cpu(pid) {
                        self.host.update_freq(cpu, CPUFREQ_EARLY_DET);
                    }
                }
            }
        }
    }

    /* ------------------------------------------------------------------ */
    /* Frequency policy                                                    */
    /* ------------------------------------------------------------------ */

    fn update_frame_zone_locked(&self, state: &mut GroupState, id: GroupId, wallclock: u64) {
        state.frame_zone = 0;

        let delta = wallclock.saturating_sub(state.window_start);
        if delta <= 2 * state.window_size {
            if id.is_multi() && self.infos.next_vsync(id) != 0 {
                state.frame_zone |= FRAME_ZONE;
            }
            if id == GroupId::COMPOSITOR {
                state.frame_zone |= FRAME_ZONE;
            }
        }
        if self.user_zone.load(Ordering::Relaxed) {
            state.frame_zone |= USER_ZONE;
        }
    }

    /// Combine the measured (physical) and projected (virtual) utilization
    /// into the value handed to the governor. The projection is preferred as
    /// long as the measurement does not contradict it.
    fn update_freq_policy_util_locked(
        &self,
        grp: &FrameGroup,
        state: &mut GroupState,
        wallclock: u64,
    ) -> u64 {
        let id = grp.id;
        self.update_frame_zone_locked(state, id, wallclock);

        if state.frame_zone & FRAME_ZONE == 0 {
            return 0;
        }

        let in_zone = true;
        let prev_putil = self.infos.putil(id, state.prev_window_scale, in_zone);
        let curr_putil = self.infos.putil(id, state.curr_window_scale, in_zone);
        grp.curr_util.store(curr_putil, Ordering::Relaxed);
        let mut frame_util = prev_putil.max(curr_putil);

        // The compositor group runs RT; the projection means nothing there.
        if id != GroupId::COMPOSITOR {
            let timeline = wallclock.saturating_sub(state.window_start);

            if state.curr_end_time > 0 && state.curr_end_exec > 0 {
                let post_end_exec = state.curr_window_exec.saturating_sub(state.curr_end_exec);
                let post_end_time = wallclock.saturating_sub(state.curr_end_time);
                state.handler_busy = post_end_exec > (post_end_time >> 2);
            }

            let (vutil, buffers) = self.infos.vutil(id, timeline, state.handler_busy);

            let mut use_vutil = true;
            if frame_util >= vutil
                || buffers >= 3
                || (buffers == 2
                    && (curr_putil < prev_putil || prev_putil < 100)
                    && curr_putil < (vutil >> 1)
                    && !self.infos.is_high_frame_rate(id))
                || ((buffers == 1 && curr_putil < prev_putil) || prev_putil < 100)
            {
                use_vutil = false;
            }

            if use_vutil {
                frame_util = vutil;
            }
        }

        self.infos.uclamp(id, frame_util)
    }

    /// Whether any member of the group is executing on one of the query
    /// CPUs and the group's utilization is fresh.
    fn valid_freq_query(
        &self,
        grp: &FrameGroup,
        state: &GroupState,
        query: &CpuMask,
        now: u64,
    ) -> bool {
        if state.tasks.is_empty() {
            return false;
        }
        if now.saturating_sub(grp.last_util_update_ns()) >= 2 * state.window_size {
            return false;
        }
        for (walked, &pid) in state.tasks.iter().enumerate() {
            if walked >= GROUP_TASKS_WALK_CAP {
                error!("group {} member list over walk cap", grp.id.raw());
                break;
            }
            if let Some(cpu) = self.host.task_on_cpu(pid) {
                if query.test(cpu) {
                    return true;
                }
            }
        }
        false
    }

    /// The governor's utilization query: raise `util` with every group whose
    /// members currently run on `query_cpus`. Returns whether the value
    /// changed.
    pub fn freq_policy_util(&self, policy_flags: u32, query_cpus: &CpuMask, util: &mut u64) -> bool {
        if !self.enabled() {
            return false;
        }
        let raw_util = *util;
        let wallclock = self.now_ns();
        let own_query = policy_flags
            & (CPUFREQ_DEF_FRAMEBOOST | CPUFREQ_SF_FRAMEBOOST | CPUFREQ_IMS_FRAMEBOOST)
            != 0;

        for slot in 0..GroupId::MULTI_NUM as usize {
            let id = GroupId::multi(slot);
            let grp = self.group(id);
            let mut state = grp.state();
            if state.tasks.is_empty() {
                continue;
            }
            if state.preferred_cluster.is_none()
                || (self.infos.state(id) == FrameState::End && !state.handler_busy)
            {
                continue;
            }

            let mut boosted = 0u64;
            if self.valid_freq_query(grp, &state, query_cpus, wallclock) {
                // A governor-originated query refreshes the stored value so
                // the projection keeps climbing between our own kicks.
                if !own_query {
                    let fresh = self.update_freq_policy_util_locked(grp, &mut state, wallclock);
                    grp.policy_util.store(fresh, Ordering::Relaxed);
                }
                let policy = grp.policy_util.load(Ordering::Relaxed);
                let mut margin = 0;
                if policy as i64 > state.boost[BoostType::UtilMinThreshold as usize] as i64 {
                    margin =
                        schedtune_grp_margin(policy, state.boost[BoostType::DefFreq as usize]);
                }
                boosted = (policy as i64 + margin).max(0) as u64;
            }
            *util = (*util).max(boosted);
        }

        // Compositor contribution, with the GPU/non-GPU boost pair.
        {
            let grp = self.group(GroupId::COMPOSITOR);
            let state = grp.state();
            let mut boosted = 0u64;
            if self.valid_freq_query(grp, &state, query_cpus, wallclock) {
                let policy = grp.policy_util.load(Ordering::Relaxed);
                let pct = if state.boost[BoostType::SfInGpu as usize] != 0 {
                    state.boost[BoostType::SfFreqGpu as usize]
                } else {
                    state.boost[BoostType::SfFreqNongpu as usize]
                };
                boosted = (policy as i64 + schedtune_grp_margin(policy, pct)).max(0) as u64;
            }
            *util = (*util).max(boosted);
        }

        // Input-method contribution, unboosted.
        {
            let grp = self.group(GroupId::INPUT_METHOD);
            let state = grp.state();
            let mut policy = 0;
            if self.valid_freq_query(grp, &state, query_cpus, wallclock) {
                policy = grp.policy_util.load(Ordering::Relaxed);
            }
            *util = (*util).max(policy);
        }

        raw_util != *util
    }

    fn should_update_cpufreq(&self, grp: &FrameGroup, state: &GroupState, wallclock: u64) -> bool {
        if state.tasks.is_empty() {
            return false;
        }
        wallclock.saturating_sub(grp.last_freq_update_ns.load(Ordering::Relaxed))
            >= FREQ_UPDATE_MIN_INTERVAL
    }

    /// Pick the lowest-capacity cluster whose (boosted) policy utilization
    /// fits, falling back to the largest. Also records the spill-over
    /// cluster used when placement finds the preferred one full.
    fn best_cluster_locked(&self, grp: &FrameGroup, state: &mut GroupState) -> usize {
        let util = grp.policy_util.load(Ordering::Relaxed);
        let mut boosted = util as i64;
        if grp.id.is_multi()
            && util as i64 > state.boost[BoostType::UtilMinThreshold as usize] as i64
        {
            boosted += schedtune_grp_margin(util, state.boost[BoostType::DefMigr as usize]);
        }

        // The topology is sorted by architectural capacity; compare against
        // the current (freq-limited) capacity to respect thermal ceilings.
        let mut best = None;
        let mut max_cap = 0;
        let mut max_idx = 0;
        for cluster in self.topo.clusters() {
            let cap = self.host.current_capacity(cluster.first_cpu());
            if cap > max_cap {
                max_cap = cap;
                max_idx = cluster.id;
            }
            if boosted <= cap as i64 {
                best = Some(cluster.id);
                break;
            }
        }
        let best = best.unwrap_or(max_idx);

        let n = self.topo.len();
        if n <= 2 {
            state.available_cluster = None;
        } else if best == n - 1 {
            state.available_cluster = Some(n - 2);
        } else if best == n - 2 {
            state.available_cluster = Some(n - 1);
        } else if best == n - 3 {
            state.available_cluster = Some(n - 2);
        }

        best
    }

    /// Refresh a dynamic (or default) group's policy utilization and kick
    /// the governor on its preferred cluster. Returns whether the preferred
    /// cluster changed.
    pub fn default_group_update_cpufreq(&self, id: GroupId) -> bool {
        let grp = self.group(id);
        let wallclock = self.now_ns();
        let mut changed = false;
        let mut prev_kick = None;
        let mut next_kick = None;

        {
            let mut state = grp.state();
            if state.tasks.is_empty() {
                return false;
            }

            let fresh = self.update_freq_policy_util_locked(grp, &mut state, wallclock);
            grp.policy_util.store(fresh, Ordering::Relaxed);

            let best = self.best_cluster_locked(grp, &mut state);
            match state.preferred_cluster {
                None => state.preferred_cluster = Some(best),
                Some(cur) if cur != best => {
                    // The abandoned cluster needs one unthrottled update so
                    // its frequency can drop right away.
                    prev_kick = Some(self.topo.cluster(cur).first_cpu());
                    state.preferred_cluster = Some(best);
                    changed = true;
                }
                Some(_) => {}
            }
            let next_cpu = self.topo.cluster(best).first_cpu();

            if self.should_update_cpufreq(grp, &state, wallclock) {
                grp.last_freq_update_ns.store(wallclock, Ordering::Relaxed);
                next_kick = Some(next_cpu);
            }
        }

        if let Some(cpu) = prev_kick {
            self.host.update_freq(cpu, CPUFREQ_DEF_FRAMEBOOST);
        }
        if let Some(cpu) = next_kick {
            self.host.update_freq(cpu, CPUFREQ_DEF_FRAMEBOOST);
        }
        changed
    }

    /// Compositor variant: the kick lands on the notifying task's CPU.
    pub fn sf_composition_update_cpufreq(&self, pid: Pid) {
        let grp = self.group(GroupId::COMPOSITOR);
        let wallclock = self.now_ns();
        let mut kick = false;

        {
            let mut state = grp.state();
            if state.tasks.is_empty() {
                return;
            }
            let fresh = self.update_freq_policy_util_locked(grp, &mut state, wallclock);
            grp.policy_util.store(fresh, Ordering::Relaxed);

            if self.should_update_cpufreq(grp, &state, wallclock) {
                grp.last_freq_update_ns.store(wallclock, Ordering::Relaxed);
                kick = true;
            }
        }

        if kick {
            if let Some(cpu) = self.host.task_cpu(pid) {
                self.host.update_freq(cpu, CPUFREQ_SF_FRAMEBOOST);
            }
        }
    }

    /// Input-method variant: the stored policy expires after two windows of
    /// silence instead of being recomputed.
    pub fn input_update_cpufreq(&self, id: GroupId, pid: Pid) {
        let grp = self.group(id);
        let wallclock = self.now_ns();

        {
            let mut state = grp.state();
            if state.tasks.is_empty() {
                return;
            }
            if id == GroupId::INPUT_METHOD
                && wallclock.saturating_sub(grp.last_util_update_ns()) >= 2 * state.window_size
            {
                grp.policy_util.store(0, Ordering::Relaxed);
                grp.last_util_update_ns.store(wallclock, Ordering::Relaxed);
            }
            let best = self.best_cluster_locked(grp, &mut state);
            state.preferred_cluster = Some(best);
        }

        if let Some(cpu) = self.host.task_cpu(pid) {
            self.host.update_freq(cpu, CPUFREQ_IMS_FRAMEBOOST);
        }
    }

    /// An input event landed on the group: prime the policy utilization and
    /// kick the governor via the UI thread.
    pub fn input_set_boost_start(&self, id: GroupId) {
        let grp = self.group(id);
        let wallclock = self.now_ns();
        let ui;

        {
            let state = grp.state();
            if state.tasks.is_empty() {
                return;
            }
            if id.is_multi() {
                grp.policy_util
                    .store(self.infos.uclamp(id, 0), Ordering::Relaxed);
            } else if id == GroupId::INPUT_METHOD {
                grp.policy_util
                    .store(grp.curr_util.load(Ordering::Relaxed), Ordering::Relaxed);
                grp.last_util_update_ns.store(wallclock, Ordering::Relaxed);
            } else {
                return;
            }
            ui = state.ui;
        }

        if let Some(ui) = ui {
            self.input_update_cpufreq(id, ui);
        }
    }

    /// Stage a user-requested utilization floor; it reaches the governor on
    /// the group's next policy refresh.
    pub fn set_group_policy_util(&self, id: GroupId, min_util: i64) {
        self.group(id)
            .curr_util
            .store(min_util.max(0) as u64, Ordering::Relaxed);
    }

    /// Record how much execution the frame had accumulated when its end was
    /// announced; `handler_busy` is derived from what comes after.
    pub fn set_end_exec(&self, id: GroupId) {
        let grp = self.group(id);
        let mut state = grp.state();
        state.curr_end_exec = state.curr_window_exec;
        state.curr_end_time = grp.last_util_update_ns();
    }

    pub fn check_putil_over_thresh(&self, id: GroupId, thresh: u64) -> bool {
        let scale = self.group(id).state().curr_window_scale;
        self.infos.putil(id, scale, true) >= thresh
    }

    /// Previous-window scaled execution of the game group.
    pub fn game_frame_scale(&self) -> u64 {
        self.group(GroupId::GAME).state().prev_window_scale
    }

    /// Percent of the last game window spent executing.
    pub fn game_frame_busy(&self) -> u64 {
        self.group(GroupId::GAME).state().window_busy
    }

    pub fn default_group_prev_util(&self) -> Option<u64> {
        let grp = self.group(GroupId::DEFAULT);
        let state = grp.state();
        if state.frame_zone == 0 {
            return None;
        }
        Some(self.infos.putil(grp.id, state.prev_window_scale, state.frame_zone & FRAME_ZONE != 0))
    }

    pub fn default_group_curr_util(&self) -> Option<u64> {
        let grp = self.group(GroupId::DEFAULT);
        let state = grp.state();
        if state.frame_zone == 0 {
            return None;
        }
        Some(self.infos.putil(grp.id, state.curr_window_scale, state.frame_zone & FRAME_ZONE != 0))
    }

    /* ------------------------------------------------------------------ */
    /* Tunables                                                            */
    /* ------------------------------------------------------------------ */

    pub fn set_boost(&self, id: GroupId, ty: BoostType, value: i32) {
        self.group(id).state().boost[ty as usize] = value;
    }

    pub fn boost(&self, id: GroupId, ty: BoostType) -> i32 {
        self.group(id).state().boost[ty as usize]
    }

    /// Boost slot value seen by `pid` through its group, 0 when ungrouped.
    pub fn effect_boost(&self, pid: Pid, ty: BoostType) -> i32 {
        let Some(entry) = self.tasks.get(pid) else { return 0 };
        match entry.membership().group() {
            Some(id) => self.boost(id, ty),
            None => 0,
        }
    }

    /* ------------------------------------------------------------------ */
    /* Placement                                                           */
    /* ------------------------------------------------------------------ */

    /// A preferred cluster routes placement only when it exists and is not
    /// the lowest-capacity one; frame windows are too short to justify
    /// evicting little-core work.
    fn cluster_routes(pref: Option<usize>) -> Option<usize> {
        pref.filter(|&idx| idx != 0)
    }

    /// Pick a CPU for `pid` inside its preferred cluster (or its per-task
    /// override), spilling over to the recorded alternative cluster when the
    /// preferred one has no usable CPU.
    pub fn place_on_preferred_cpu(&self, pid: Pid) -> Option<usize> {
        if !self.enabled() {
            return None;
        }
        let entry = self.tasks.get(pid)?;

        // (cluster to search, group's preferred, group's alternative)
        let (mut cluster_idx, grp_pref, grp_avail) =
            match self.overlay.preferred_cluster(&entry, self.topo.len()) {
                Some(idx) => (idx, None, None),
                None => {
                    let id = entry.membership().group()?;
                    if id != GroupId::INPUT_METHOD && !id.is_multi() {
                        return None;
                    }
                    let state = self.group(id).state();
                    let pref = Self::cluster_routes(state.preferred_cluster)?;
                    (pref, Some(pref), state.available_cluster)
                }
            };

        loop {
            let cluster = self.topo.cluster(cluster_idx);
            let search = self
                .host
                .allowed_cpus(pid)
                .and(&self.host.active_mask())
                .and(&cluster.cpus);

            let mut walk_next_cls = grp_pref == Some(cluster_idx);
            let mut backup = None;
            let mut max_spare = 0u64;
            let mut max_spare_cpu = None;

            for cpu in search.iter() {
                if let Some(curr_pid) = self.host.current_task(cpu) {
                    let curr = self.tasks.get(curr_pid);
                    if let Some(ref curr) = curr {
                        // Two group members on one CPU serialize the frame;
                        // an RT member's CPU still works as a last resort.
                        if curr.membership().is_member() {
                            if backup.is_none() && curr.is_rt() {
                                backup = Some(cpu);
                                walk_next_cls = false;
                            }
                            continue;
                        }
                        if curr.is_rt() {
                            continue;
                        }
                    }
                    if self.host.is_protected(curr_pid) {
                        continue;
                    }
                    if self.host.rt_runnable(cpu) {
                        continue;
                    }
                }

                backup = Some(cpu);
                walk_next_cls = false;

                if self.host.is_idle(cpu) || self.host.task_on_cpu(pid) == Some(cpu) {
                    return Some(cpu);
                }
                let spare = self
                    .host
                    .current_capacity(cpu)
                    .saturating_sub(self.host.cpu_util_without(cpu, pid));
                if spare > max_spare {
                    max_spare = spare;
                    max_spare_cpu = Some(cpu);
                }
            }

            if max_spare_cpu.is_some() {
                return max_spare_cpu;
            }
            if !walk_next_cls && backup.is_some() {
                return backup;
            }
            match grp_avail {
                Some(avail) if walk_next_cls && avail != cluster_idx => cluster_idx = avail,
                _ => return None,
            }
        }
    }

    fn migration_candidate(&self, pid: Pid) -> Option<(Arc<TaskEntry>, GroupId)> {
        let entry = self.tasks.get(pid)?;
        let id = entry.membership().group()?;
        if id == GroupId::COMPOSITOR || id == GroupId::GAME || id == GroupId::INPUT_METHOD {
            return None;
        }
        Some((entry, id))
    }

    /// Does `pid` need to move up from `cpu` to reach its preferred
    /// cluster's capacity?
    pub fn need_up_migration(&self, pid: Pid, cpu: usize) -> bool {
        if !self.enabled() {
            return false;
        }
        let Some((_, id)) = self.migration_candidate(pid) else { return false };
        let pref = { self.group(id).state().preferred_cluster };
        let Some(pref) = Self::cluster_routes(pref) else { return false };
        self.host.current_capacity(cpu)
            < self.host.current_capacity(self.topo.cluster(pref).first_cpu())
    }

    /// Veto a load-balance move that would land the member below its
    /// preferred cluster, or onto a CPU already running a member.
    pub fn skip_migration(&self, pid: Pid, _src_cpu: usize, dst_cpu: usize) -> bool {
        if !self.enabled() {
            return false;
        }
        let Some((_, id)) = self.migration_candidate(pid) else { return false };

        if let Some(dst_curr) = self.host.current_task(dst_cpu) {
            if let Some(dst_entry) = self.tasks.get(dst_curr) {
                if dst_entry.membership().is_member() {
                    return true;
                }
            }
        }

        let pref = { self.group(id).state().preferred_cluster };
        let Some(pref) = Self::cluster_routes(pref) else { return false };
        self.host.current_capacity(dst_cpu)
            < self.host.current_capacity(self.topo.cluster(pref).first_cpu())
    }

    /// A compositor member fits `cpu` only if the CPU covers the group's
    /// migration-boosted policy utilization while the signal is fresh.
    pub fn rt_task_fits_capacity(&self, pid: Pid, cpu: usize) -> bool {
        if !self.enabled() {
            return true;
        }
        let Some(entry) = self.tasks.get(pid) else { return true };
        if entry.membership().group() != Some(GroupId::COMPOSITOR) {
            return true;
        }

        let grp = self.group(GroupId::COMPOSITOR);
        let now = self.now_ns();
        let boost_pct;
        {
            let state = grp.state();
            if state.frame_zone == 0
                || now.saturating_sub(grp.last_util_update_ns()) >= 2 * state.window_size
            {
                return true;
            }
            boost_pct = if state.boost[BoostType::SfInGpu as usize] != 0 {
                state.boost[BoostType::SfMigrGpu as usize]
            } else {
                state.boost[BoostType::SfMigrNongpu as usize]
            };
        }

        let raw = grp.policy_util.load(Ordering::Relaxed);
        let grp_util = (raw as i64 + schedtune_grp_margin(raw, boost_pct)).max(0) as u64;
        self.host.current_capacity(cpu) >= grp_util
    }

    /// Demote a sync wake onto an unfit CPU to a normal wake.
    pub fn skip_rt_sync(&self, cpu: usize, pid: Pid, sync: &mut bool) -> bool {
        if *sync && !self.rt_task_fits_capacity(pid, cpu) {
            *sync = false;
            return true;
        }
        false
    }

    /* ------------------------------------------------------------------ */
    /* Early detection                                                     */
    /* ------------------------------------------------------------------ */

    /// Has this default/dynamic group member been runnable long enough,
    /// relative to the window, to deserve a frequency bump before the
    /// window's own accounting notices it?
    pub(crate) fn is_ed_task(&self, entry: &TaskEntry, wallclock: u64) -> bool {
        if !self.enabled() || !self.user_zone.load(Ordering::Relaxed) {
            return false;
        }
        let Some(id) = entry.membership().group() else { return false };
        if id == GroupId::COMPOSITOR || id == GroupId::GAME || id == GroupId::INPUT_METHOD {
            return false;
        }

        let last_wake = entry.last_wake_ns();
        let exec_time = if last_wake != 0 && wallclock > last_wake {
            wallclock - last_wake
        } else {
            0
        };

        let state = self.group(id).state();
        let scaled = |pct: i32| state.window_size * pct.max(0) as u64 / 100;
        let mid = scaled(state.boost[BoostType::EdTaskMidDuration as usize]);
        let max = scaled(state.boost[BoostType::EdTaskMaxDuration as usize]);
        let timeout = scaled(state.boost[BoostType::EdTaskTimeoutDuration as usize]);

        if exec_time >= max && exec_time < timeout {
            self.ed_boost.store(ED_BOOST_MAX, Ordering::Relaxed);
            true
        } else if exec_time >= mid && exec_time < max {
            self.ed_boost.store(ED_BOOST_MID, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn ed_boost_type(&self) -> u32 {
        self.ed_boost.load(Ordering::Relaxed)
    }

    /// Scan a CPU's runnable game members; one waiting past the configured
    /// duration signals the registered agent, rate limited.
    pub fn game_ed_scan(&self, cpu: usize) {
        if !self.enabled() {
            return;
        }
        let runnable = self.host.runnable_tasks(cpu);
        if runnable.is_empty() {
            return;
        }

        let window_start;
        {
            let state = self.group(GroupId::GAME).state();
            if state.tasks.is_empty() {
                return;
            }
            window_start = state.window_start;
        }

        let now = self.now_ns();
        if now.saturating_sub(self.game_ed.last_signal_ns.load(Ordering::Relaxed))
            < GAME_ED_SIG_MIN_INTERVAL
        {
            return;
        }
        let duration = self.game_ed.duration_ns.load(Ordering::Relaxed);

        let mut examined = 0;
        for pid in runnable {
            if examined >= GAME_ED_SCAN_CAP {
                break;
            }
            let Some(entry) = self.tasks.get(pid) else { continue };
            if entry.membership().group() != Some(GroupId::GAME) {
                continue;
            }
            let waiting_since = entry.last_wake_ns().max(window_start);
            if now.saturating_sub(waiting_since) > duration {
                let agent = self.game_ed.agent.load(Ordering::Relaxed);
                if agent > 0 {
                    self.host.notify_early_detection(agent);
                }
                self.game_ed.last_signal_ns.store(now, Ordering::Relaxed);
                break;
            }
            examined += 1;
        }
    }

    /// Register the game early-detection agent; an unknown pid resets the
    /// configuration to defaults.
    pub fn set_game_ed_info(&self, duration_ns: u64, agent_pid: Pid) {
        self.game_ed.duration_ns.store(duration_ns, Ordering::Relaxed);
        if self.game_ed.agent.load(Ordering::Relaxed) != agent_pid {
            if self.tasks.get(agent_pid).is_some() {
                self.game_ed.agent.store(agent_pid, Ordering::Relaxed);
            } else {
                self.game_ed
                    .duration_ns
                    .store(GAME_ED_DEFAULT_DURATION, Ordering::Relaxed);
                self.game_ed.agent.store(-1, Ordering::Relaxed);
            }
        }
    }

    pub fn game_ed_info(&self) -> (u64, Pid) {
        (
            self.game_ed.duration_ns.load(Ordering::Relaxed),
            self.game_ed.agent.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_info::FRAME_MAX_UTIL;
    use crate::sim::sim_boost;

    fn spawn(fb: &FrameBoost, pid: Pid, tgid: Pid, comm: &str) {
        fb.on_task_fork(pid, tgid, 1000, comm, 120);
    }

    fn activate_multi(fb: &FrameBoost) -> GroupId {
        fb.frame_infos().alloc_multi().unwrap()
    }

    #[test]
    fn ui_thread_replacement_clears_group() {
        let (fb, _host, _time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        spawn(&fb, 101, 100, "render");
        spawn(&fb, 200, 200, "other-ui");

        fb.set_ui_thread(id, 100);
        fb.set_render_thread(id, 100, 101);
        assert_eq!(fb.group(id).state().tasks.len(), 2);
        assert_eq!(fb.task_group_id(101), Ok(id));

        fb.set_ui_thread(id, 200);
        let state = fb.group(id).state();
        assert_eq!(state.tasks, vec![200]);
        assert_eq!(state.ui, Some(200));
        assert_eq!(state.render, None);
        drop(state);
        assert!(fb.task_group_id(101).is_err());
    }

    #[test]
    fn render_thread_requires_ui_process() {
        let (fb, _host, _time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        spawn(&fb, 300, 300, "stranger");

        fb.set_ui_thread(id, 100);
        // pid must match the designated UI thread.
        fb.set_render_thread(id, 999, 300);
        assert!(fb.task_group_id(300).is_err());
    }

    #[test]
    fn thread_claimed_by_other_group_rejected() {
        let (fb, _host, _time) = sim_boost();
        let a = activate_multi(&fb);
        let b = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui-a");
        spawn(&fb, 200, 200, "ui-b");

        fb.set_ui_thread(a, 100);
        fb.set_ui_thread(b, 100);
        assert_eq!(fb.task_group_id(100), Ok(a));
        assert_eq!(fb.group(b).state().tasks.len(), 0);

        fb.set_ui_thread(b, 200);
        assert_eq!(fb.task_group_id(200), Ok(b));
    }

    #[test]
    fn related_task_requires_same_uid() {
        let (fb, _host, _time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        fb.on_task_fork(150, 100, 1000, "worker", 120);
        fb.on_task_fork(151, 151, 2000, "foreign", 120);

        fb.set_ui_thread(id, 100);
        assert!(fb.add_rm_related_task(id, 150, true));
        assert_eq!(fb.task_group_id(150), Ok(id));

        assert!(fb.add_rm_related_task(id, 151, true));
        assert!(fb.task_group_id(151).is_err());

        assert!(fb.add_rm_related_task(id, 150, false));
        assert!(fb.task_group_id(150).is_err());
    }

    #[test]
    fn hwui_threads_join_and_replace() {
        let (fb, _host, _time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        for tid in [110, 111, 112, 113] {
            fb.on_task_fork(tid, 100, 1000, "hwuiTask", 120);
        }
        fb.set_ui_thread(id, 100);

        // Keyed to the wrong UI pid: ignored.
        fb.set_hwui_threads(id, 999, 110, 111);
        assert!(fb.task_group_id(110).is_err());

        fb.set_hwui_threads(id, 100, 110, 111);
        assert_eq!(fb.task_group_id(110), Ok(id));
        assert_eq!(fb.task_group_id(111), Ok(id));

        // A new pair displaces the old one.
        fb.set_hwui_threads(id, 100, 112, 113);
        assert!(fb.task_group_id(110).is_err());
        assert_eq!(fb.task_group_id(112), Ok(id));
        assert_eq!(fb.group(id).state().hwtasks, [Some(112), Some(113)]);
    }

    #[test]
    fn effect_boost_follows_membership() {
        let (fb, _host, _time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        spawn(&fb, 300, 300, "loner");
        fb.set_ui_thread(id, 100);
        fb.set_boost(id, BoostType::DefFreq, 25);

        assert_eq!(fb.effect_boost(100, BoostType::DefFreq), 25);
        assert_eq!(fb.effect_boost(300, BoostType::DefFreq), 0);
        assert_eq!(fb.effect_boost(9999, BoostType::DefFreq), 0);
    }

    #[test]
    fn game_group_rejects_binder_workers() {
        let (fb, _host, _time) = sim_boost();
        spawn(&fb, 100, 100, "game-render");
        fb.on_task_fork(101, 100, 1000, "binder:100_2", 120);

        assert!(fb.add_task_to_game_group(100, true));
        assert!(!fb.add_task_to_game_group(101, true));
        assert_eq!(fb.task_group_id(100), Ok(GroupId::GAME));
    }

    #[test]
    fn binder_propagation_depth_and_cap() {
        let (fb, _host, _time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        fb.set_ui_thread(id, 100);

        for pid in 200..220 {
            spawn(&fb, pid, pid, "binder-worker");
        }

        // Static caller: depth-1 callee.
        fb.on_binder_sync_received(200, 100);
        assert_eq!(
            fb.tasks.get(200).unwrap().membership(),
            Membership::Binder { group: id, depth: 1 }
        );

        // Depth-1 caller: depth-2 callee; depth-2 caller: rejected.
        fb.on_binder_sync_received(201, 200);
        assert_eq!(fb.tasks.get(201).unwrap().membership().depth(), Some(2));
        fb.on_binder_sync_received(202, 201);
        assert_eq!(fb.tasks.get(202).unwrap().membership(), Membership::None);

        // Cap: at most 6 binder threads per group.
        for pid in 203..215 {
            fb.on_binder_sync_received(pid, 100);
        }
        assert_eq!(fb.group(id).state().binder_threads, MAX_BINDER_THREADS);

        // Detach on wait-for-work frees a slot.
        fb.on_binder_wait_for_work(200, true);
        assert_eq!(fb.tasks.get(200).unwrap().membership(), Membership::None);
        assert_eq!(fb.group(id).state().binder_threads, MAX_BINDER_THREADS - 1);

        // wait_for_work without do_proc_work keeps membership.
        fb.on_binder_sync_received(215, 100);
        fb.on_binder_wait_for_work(215, false);
        assert!(fb.tasks.get(215).unwrap().membership().is_binder());
        fb.on_binder_restore_priority(215);
        assert_eq!(fb.tasks.get(215).unwrap().membership(), Membership::None);
    }

    #[test]
    fn binder_never_propagates_from_game_or_ims() {
        let (fb, _host, _time) = sim_boost();
        spawn(&fb, 100, 100, "game");
        spawn(&fb, 101, 101, "ims-ui");
        spawn(&fb, 300, 300, "worker-a");
        spawn(&fb, 301, 301, "worker-b");

        fb.add_task_to_game_group(100, true);
        fb.set_ui_thread(GroupId::INPUT_METHOD, 101);

        fb.on_binder_sync_received(300, 100);
        fb.on_binder_sync_received(301, 101);
        assert_eq!(fb.tasks.get(300).unwrap().membership(), Membership::None);
        assert_eq!(fb.tasks.get(301).unwrap().membership(), Membership::None);
    }

    #[test]
    fn nr_running_and_mark_start() {
        let (fb, _host, time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        spawn(&fb, 101, 100, "render");
        fb.set_ui_thread(id, 100);
        fb.set_render_thread(id, 100, 101);

        time.set(1_000_000);
        fb.on_schedule_switch(None, Some(100));
        {
            let state = fb.group(id).state();
            assert_eq!(state.nr_running, 1);
            assert_eq!(state.mark_start, 1_000_000);
        }

        time.set(2_000_000);
        fb.on_schedule_switch(None, Some(101));
        assert_eq!(fb.group(id).state().nr_running, 2);
        // Second runner does not move mark_start.
        assert_eq!(fb.group(id).state().mark_start, 1_000_000);

        fb.on_schedule_switch(Some(100), None);
        fb.on_schedule_switch(Some(101), None);
        let state = fb.group(id).state();
        assert_eq!(state.nr_running, 0);
    }

    #[test]
    fn runtime_accrual_and_rollover() {
        let (fb, _host, time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        fb.set_ui_thread(id, 100);

        // Anchor the window and the serial timeline.
        time.set(10 * NSEC_PER_MSEC);
        fb.rollover_window(id);
        fb.on_schedule_switch(None, Some(100));

        // 6 ms of execution at full capacity and frequency.
        time.set(16 * NSEC_PER_MSEC);
        fb.on_runtime_update(100, 6 * NSEC_PER_MSEC);
        {
            let state = fb.group(id).state();
            assert_eq!(state.curr_window_exec, 6 * NSEC_PER_MSEC);
            assert_eq!(state.curr_window_scale, 6 * NSEC_PER_MSEC);
            assert_eq!(state.mark_start, 16 * NSEC_PER_MSEC);
        }

        // Roll over 10 ms after the window started with 6 ms executed:
        // window_busy is 60 percent and the windows shift.
        time.set(20 * NSEC_PER_MSEC);
        fb.rollover_window(id);
        let state = fb.group(id).state();
        assert_eq!(state.window_busy, 60);
        assert_eq!(state.prev_window_exec, 6 * NSEC_PER_MSEC);
        assert_eq!(state.curr_window_exec, 0);
        assert!(!state.handler_busy);
    }

    #[test]
    fn rollover_ignores_clock_regression() {
        let (fb, _host, time) = sim_boost();
        let id = activate_multi(&fb);
        time.set(5_000_000);
        fb.rollover_window(id);
        let before = fb.group(id).state().window_start;

        time.set(4_000_000);
        fb.rollover_window(id);
        assert_eq!(fb.group(id).state().window_start, before);
    }

    #[test]
    fn accrual_splits_across_window_boundary() {
        let (fb, _host, time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        fb.set_ui_thread(id, 100);

        time.set(10 * NSEC_PER_MSEC);
        fb.rollover_window(id);
        fb.on_schedule_switch(None, Some(100));
        // mark_start = 10 ms; roll the window at 14 ms while still running.
        time.set(14 * NSEC_PER_MSEC);
        fb.rollover_window(id);

        // Accrue at 18 ms: 8 ms total, 4 in the previous window, 4 here.
        time.set(18 * NSEC_PER_MSEC);
        fb.on_runtime_update(100, 0);
        let state = fb.group(id).state();
        assert_eq!(state.prev_window_exec, 4 * NSEC_PER_MSEC);
        assert_eq!(state.curr_window_exec, 4 * NSEC_PER_MSEC);
    }

    #[test]
    fn scale_exec_time_tracks_freq_and_capacity() {
        let (fb, host, _time) = sim_boost();
        // Half frequency on a full-capacity CPU halves the scaled time.
        host.set_freq(0, 500_000, 1_000_000);
        assert_eq!(fb.scale_exec_time(1000, 0), 500);
        // Garbage frequency data passes the delta through.
        host.set_freq(1, 0, 0);
        assert_eq!(fb.scale_exec_time(1000, 1), 1000);
    }

    #[test]
    fn best_cluster_picks_smallest_fitting() {
        let (fb, _host, _time) = sim_boost();
        let id = activate_multi(&fb);
        let grp = fb.group(id);

        // Zero utilization fits the little cluster.
        grp.policy_util.store(0, Ordering::Relaxed);
        let mut state = grp.state();
        assert_eq!(fb.best_cluster_locked(grp, &mut state), 0);

        // Mid-range fits the middle cluster (cap 768 in the sim topology).
        grp.policy_util.store(600, Ordering::Relaxed);
        assert_eq!(fb.best_cluster_locked(grp, &mut state), 1);
        assert_eq!(state.available_cluster, Some(2));

        // Nothing fits: highest-capacity cluster.
        grp.policy_util.store(FRAME_MAX_UTIL + 200, Ordering::Relaxed);
        assert_eq!(fb.best_cluster_locked(grp, &mut state), 2);
        assert_eq!(state.available_cluster, Some(1));
    }

    #[test]
    fn placement_prefers_idle_then_spare() {
        let (fb, host, _time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        fb.set_ui_thread(id, 100);
        fb.group(id).state().preferred_cluster = Some(1);

        // Sim topology: cluster 1 is cpus 4-6. cpu4 busy, cpu5 idle.
        host.set_current(4, Some(900));
        host.set_idle(5, true);
        assert_eq!(fb.place_on_preferred_cpu(100), Some(5));

        // No idle CPU: max spare capacity wins.
        host.set_idle(5, false);
        host.set_util(4, 700);
        host.set_util(5, 100);
        host.set_util(6, 400);
        assert_eq!(fb.place_on_preferred_cpu(100), Some(5));
    }

    #[test]
    fn placement_declines_little_cluster_and_nonmembers() {
        let (fb, _host, _time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        spawn(&fb, 400, 400, "loner");
        fb.set_ui_thread(id, 100);

        // Preferred cluster 0 never routes placement.
        fb.group(id).state().preferred_cluster = Some(0);
        assert_eq!(fb.place_on_preferred_cpu(100), None);

        // A task with no membership is not placed.
        fb.group(id).state().preferred_cluster = Some(1);
        assert_eq!(fb.place_on_preferred_cpu(400), None);
    }

    #[test]
    fn placement_spills_to_available_cluster() {
        let (fb, host, _time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        spawn(&fb, 101, 100, "peer");
        fb.set_ui_thread(id, 100);
        {
            let mut state = fb.group(id).state();
            state.preferred_cluster = Some(2);
            state.available_cluster = Some(1);
        }

        // The whole preferred cluster (cpu 7) runs another member, so the
        // search spills to the recorded alternative cluster.
        fb.add_rm_related_task(id, 101, true);
        host.set_current(7, Some(101));
        host.set_idle(5, true);
        assert_eq!(fb.place_on_preferred_cpu(100), Some(5));
    }

    #[test]
    fn migration_vetoes() {
        let (fb, host, _time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        spawn(&fb, 101, 100, "peer");
        fb.set_ui_thread(id, 100);
        fb.add_rm_related_task(id, 101, true);
        fb.group(id).state().preferred_cluster = Some(2);

        // cpu0 (cap 512) is below cluster 2's first cpu (cap 1024).
        assert!(fb.need_up_migration(100, 0));
        assert!(!fb.need_up_migration(100, 7));

        // Moving down in capacity is vetoed, as is a member destination.
        assert!(fb.skip_migration(100, 7, 0));
        host.set_current(5, Some(101));
        assert!(fb.skip_migration(100, 7, 5));
        assert!(!fb.skip_migration(100, 0, 7));

        // Compositor members never take these paths.
        spawn(&fb, 500, 500, "sf");
        fb.set_sf_thread(500);
        assert!(!fb.need_up_migration(500, 0));
    }

    #[test]
    fn freq_policy_util_raises_governor_value() {
        let (fb, host, time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        fb.set_ui_thread(id, 100);

        time.set(10 * NSEC_PER_MSEC);
        fb.rollover_window(id);
        {
            let mut state = fb.group(id).state();
            state.preferred_cluster = Some(1);
            state.handler_busy = true;
        }
        fb.group(id).policy_util.store(700, Ordering::Relaxed);
        fb.group(id)
            .last_util_update_ns
            .store(10 * NSEC_PER_MSEC, Ordering::Relaxed);

        // Member executing on a queried CPU.
        host.place(100, 4, true);
        time.set(12 * NSEC_PER_MSEC);

        let query = CpuMask::from_cpus([4, 5, 6]);
        let mut util = 100;
        // Own-kick flags skip the recompute and use the stored value.
        assert!(fb.freq_policy_util(CPUFREQ_DEF_FRAMEBOOST, &query, &mut util));
        assert_eq!(util, 700);

        // Util below the stored policy is raised, above is kept.
        let mut high = 900;
        assert!(!fb.freq_policy_util(CPUFREQ_DEF_FRAMEBOOST, &query, &mut high));
        assert_eq!(high, 900);

        // Members elsewhere: no contribution.
        let other = CpuMask::from_cpus([0, 1]);
        let mut util = 100;
        assert!(!fb.freq_policy_util(CPUFREQ_DEF_FRAMEBOOST, &other, &mut util));
        assert_eq!(util, 100);
    }

    #[test]
    fn stale_util_is_not_queried() {
        let (fb, host, time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        fb.set_ui_thread(id, 100);
        {
            let mut state = fb.group(id).state();
            state.preferred_cluster = Some(1);
            state.handler_busy = true;
        }
        fb.group(id).policy_util.store(700, Ordering::Relaxed);
        fb.group(id).last_util_update_ns.store(0, Ordering::Relaxed);
        host.place(100, 4, true);

        // Two windows with no accrual: the group stops contributing.
        time.set(40 * NSEC_PER_MSEC);
        let query = CpuMask::from_cpus([4]);
        let mut util = 0;
        assert!(!fb.freq_policy_util(CPUFREQ_DEF_FRAMEBOOST, &query, &mut util));
        assert_eq!(util, 0);
    }

    #[test]
    fn default_group_update_kicks_governor() {
        let (fb, host, time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        fb.set_ui_thread(id, 100);

        time.set(100 * NSEC_PER_MSEC);
        fb.rollover_window(id);
        time.set(101 * NSEC_PER_MSEC);
        fb.default_group_update_cpufreq(id);
        let kicks = host.freq_kicks();
        assert!(!kicks.is_empty());
        assert_eq!(kicks[0].1, CPUFREQ_DEF_FRAMEBOOST);

        // A second update inside the 2 ms throttle window stays silent.
        host.clear_freq_kicks();
        time.set(101 * NSEC_PER_MSEC + NSEC_PER_MSEC);
        fb.default_group_update_cpufreq(id);
        assert!(host.freq_kicks().is_empty());
    }

    #[test]
    fn end_exec_marker_drives_handler_busy() {
        let (fb, _host, time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        fb.set_ui_thread(id, 100);
        fb.frame_infos().set_state(id, FrameState::Start, 0, 1);

        time.set(10 * NSEC_PER_MSEC);
        fb.rollover_window(id);
        fb.on_schedule_switch(None, Some(100));

        // 2 ms of work, then the frame-end marker.
        time.set(12 * NSEC_PER_MSEC);
        fb.on_runtime_update(100, 0);
        fb.set_end_exec(id);

        // 4 more ms of post-end execution in 4 ms of wall time: busy.
        time.set(16 * NSEC_PER_MSEC);
        fb.on_runtime_update(100, 0);
        let grp = fb.group(id);
        let mut state = grp.state();
        fb.update_freq_policy_util_locked(grp, &mut state, 16 * NSEC_PER_MSEC);
        assert!(state.handler_busy);
    }

    #[test]
    fn ed_task_duration_bands() {
        let (fb, _host, time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        fb.set_ui_thread(id, 100);
        fb.set_user_zone(true);

        let entry = fb.tasks.get(100).unwrap();
        entry.set_last_wake_ns(0);

        // Window 16.67 ms; mid at 60%, max at 80%, timeout at 200%.
        time.set(11 * NSEC_PER_MSEC);
        assert!(fb.is_ed_task(&entry, time.get()));
        assert_eq!(fb.ed_boost_type(), ED_BOOST_MID);

        time.set(15 * NSEC_PER_MSEC);
        assert!(fb.is_ed_task(&entry, time.get()));
        assert_eq!(fb.ed_boost_type(), ED_BOOST_MAX);

        // Past timeout: stale waiters stop escalating.
        time.set(40 * NSEC_PER_MSEC);
        assert!(!fb.is_ed_task(&entry, time.get()));

        // Compositor members are exempt.
        spawn(&fb, 500, 500, "sf");
        fb.set_sf_thread(500);
        let sf = fb.tasks.get(500).unwrap();
        sf.set_last_wake_ns(0);
        time.set(11 * NSEC_PER_MSEC);
        assert!(!fb.is_ed_task(&sf, time.get()));
    }

    #[test]
    fn game_ed_scan_signals_agent() {
        let (fb, host, time) = sim_boost();
        spawn(&fb, 100, 100, "game");
        spawn(&fb, 900, 900, "agent");
        fb.add_task_to_game_group(100, true);
        fb.set_game_ed_info(9_500_000, 900);

        let entry = fb.tasks.get(100).unwrap();
        entry.set_last_wake_ns(NSEC_PER_MSEC);
        host.set_runnable(4, vec![100]);

        time.set(60 * NSEC_PER_MSEC);
        fb.game_ed_scan(4);
        assert_eq!(host.ed_signals(), vec![900]);

        // Rate limited: a second scan right away stays silent.
        fb.game_ed_scan(4);
        assert_eq!(host.ed_signals().len(), 1);
    }

    #[test]
    fn game_ed_unknown_agent_resets() {
        let (fb, _host, _time) = sim_boost();
        fb.set_game_ed_info(1_000_000, 4242);
        assert_eq!(fb.game_ed_info(), (GAME_ED_DEFAULT_DURATION, -1));
    }

    #[test]
    fn rt_fits_capacity_and_sync_demotion() {
        let (fb, _host, time) = sim_boost();
        spawn(&fb, 500, 500, "sf");
        fb.set_sf_thread(500);

        let grp = fb.group(GroupId::COMPOSITOR);
        time.set(10 * NSEC_PER_MSEC);
        fb.rollover_window(GroupId::COMPOSITOR);
        {
            let mut state = grp.state();
            state.frame_zone = FRAME_ZONE;
        }
        grp.policy_util.store(600, Ordering::Relaxed);
        grp.last_util_update_ns
            .store(10 * NSEC_PER_MSEC, Ordering::Relaxed);
        time.set(11 * NSEC_PER_MSEC);

        // cap 512 < 600: unfit; cap 1024 fits.
        assert!(!fb.rt_task_fits_capacity(500, 0));
        assert!(fb.rt_task_fits_capacity(500, 7));

        let mut sync = true;
        assert!(fb.skip_rt_sync(0, 500, &mut sync));
        assert!(!sync);
        let mut sync = true;
        assert!(!fb.skip_rt_sync(7, 500, &mut sync));
        assert!(sync);

        // Non-members always fit.
        spawn(&fb, 600, 600, "plain");
        assert!(fb.rt_task_fits_capacity(600, 0));
    }

    #[test]
    fn exit_cleans_membership() {
        let (fb, _host, _time) = sim_boost();
        let id = activate_multi(&fb);
        spawn(&fb, 100, 100, "ui");
        spawn(&fb, 200, 200, "worker");
        fb.set_ui_thread(id, 100);
        fb.on_binder_sync_received(200, 100);

        fb.on_task_exit(200);
        assert_eq!(fb.group(id).state().binder_threads, 0);
        fb.on_task_exit(100);
        let state = fb.group(id).state();
        assert!(state.tasks.is_empty());
        assert_eq!(state.nr_running, 0);
    }

    #[test]
    fn schedtune_margin_signs() {
        assert_eq!(schedtune_margin(1024, 0), 0);
        // 50% of the headroom above util 512.
        assert_eq!(schedtune_margin(512, 50), 256);
        // Negative boost gives back half the signal.
        assert_eq!(schedtune_margin(512, -50), -256);
        assert_eq!(schedtune_grp_margin(0, 50), 0);
        assert_eq!(schedtune_grp_margin(512, 0), 0);
    }
}
