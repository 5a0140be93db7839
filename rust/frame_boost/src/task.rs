// SPDX-License-Identifier: GPL-2.0

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::error::{FbgError, Result};

pub type Pid = i32;

/// Priorities below this are real-time, matching the host convention.
pub const MAX_RT_PRIO: i32 = 100;

/// Frame group identifier. Valid raw values are 1..=9: four fixed groups
/// followed by five dynamic (multi) slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct GroupId(u8);

impl GroupId {
    /// Catch-all group for frame tasks with no dedicated pipeline.
    pub const DEFAULT: GroupId = GroupId(1);
    /// The display compositor's own threads.
    pub const COMPOSITOR: GroupId = GroupId(2);
    /// Game render pipeline.
    pub const GAME: GroupId = GroupId(3);
    /// Input-method (keyboard) pipeline.
    pub const INPUT_METHOD: GroupId = GroupId(4);

    /// First dynamic group id.
    pub const MULTI_BASE: u8 = 5;
    /// Number of dynamic group slots.
    pub const MULTI_NUM: u8 = 5;
    /// One past the highest valid id.
    pub const MAX_ID: u8 = Self::MULTI_BASE + Self::MULTI_NUM;

    pub fn from_raw(raw: i32) -> Result<GroupId> {
        if raw >= 1 && (raw as u8) < Self::MAX_ID {
            Ok(GroupId(raw as u8))
        } else {
            Err(FbgError::InvalidGroupId(raw))
        }
    }

    pub fn multi(slot: usize) -> GroupId {
        debug_assert!(slot < Self::MULTI_NUM as usize);
        GroupId(Self::MULTI_BASE + slot as u8)
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    pub fn is_multi(self) -> bool {
        self.0 >= Self::MULTI_BASE
    }

    /// Dynamic slot index for multi ids.
    pub fn multi_slot(self) -> Option<usize> {
        self.is_multi().then(|| (self.0 - Self::MULTI_BASE) as usize)
    }

    /// Whether this group carries a frame model (rate, state, projection).
    /// The default and input-method groups do not.
    pub fn has_frame_info(self) -> bool {
        self == Self::COMPOSITOR || self == Self::GAME || self.is_multi()
    }
}

/// How (and whether) a task belongs to a frame group. A task is in at most
/// one group at a time; the variant records how it got there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Membership {
    None,
    /// Designated directly (UI/render/auxiliary thread).
    Static(GroupId),
    /// Pulled in transitively through a synchronous binder transaction from
    /// a member `depth` hops away from a static one.
    Binder { group: GroupId, depth: u8 },
}

impl Membership {
    pub fn group(&self) -> Option<GroupId> {
        match *self {
            Membership::None => None,
            Membership::Static(group) | Membership::Binder { group, .. } => Some(group),
        }
    }

    pub fn is_member(&self) -> bool {
        !matches!(self, Membership::None)
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Membership::Static(_))
    }

    pub fn is_binder(&self) -> bool {
        matches!(self, Membership::Binder { .. })
    }

    pub fn depth(&self) -> Option<u8> {
        match *self {
            Membership::Binder { depth, .. } => Some(depth),
            _ => None,
        }
    }
}

/// Mutable per-task group state, guarded by one lock so membership and the
/// running flag change together. Lock ordering: the owning group's lock is
/// always taken before any task state lock.
#[derive(Debug)]
pub struct TaskState {
    pub membership: Membership,
    /// Whether the task is currently on a CPU, as seen by the schedule-switch
    /// notifications. Drives the group's running count.
    pub running: bool,
}

pub struct TaskEntry {
    pub pid: Pid,
    pub tgid: Pid,
    pub uid: u32,
    pub comm: String,
    prio: AtomicI32,
    state: Mutex<TaskState>,
    last_wake_ns: AtomicU64,
    /// Placement override from the preferred-cluster overlay, -1 when unset.
    preferred_cluster: AtomicI32,
}

impl TaskEntry {
    pub fn new(pid: Pid, tgid: Pid, uid: u32, comm: &str, prio: i32) -> Self {
        Self {
            pid,
            tgid,
            uid,
            comm: comm.to_string(),
            prio: AtomicI32::new(prio),
            state: Mutex::new(TaskState { membership: Membership::None, running: false }),
            last_wake_ns: AtomicU64::new(0),
            preferred_cluster: AtomicI32::new(-1),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, TaskState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Snapshot of the membership without holding the state lock afterwards.
    pub fn membership(&self) -> Membership {
        self.state().membership
    }

    pub fn prio(&self) -> i32 {
        self.prio.load(Ordering::Relaxed)
    }

    pub fn set_prio(&self, prio: i32) {
        self.prio.store(prio, Ordering::Relaxed);
    }

    pub fn is_rt(&self) -> bool {
        self.prio() < MAX_RT_PRIO
    }

    pub fn last_wake_ns(&self) -> u64 {
        self.last_wake_ns.load(Ordering::Relaxed)
    }

    pub fn set_last_wake_ns(&self, now: u64) {
        self.last_wake_ns.store(now, Ordering::Relaxed);
    }

    pub fn preferred_cluster(&self) -> Option<usize> {
        let raw = self.preferred_cluster.load(Ordering::Relaxed);
        (raw >= 0).then(|| raw as usize)
    }

    pub fn set_preferred_cluster(&self, cluster: i32) {
        self.preferred_cluster.store(cluster, Ordering::Relaxed);
    }
}

/// All tasks the library currently knows about, keyed by pid. Entries are
/// inserted on fork and removed on exit by the host notifications.
#[derive(Default)]
pub struct TaskArena {
    tasks: RwLock<FxHashMap<Pid, Arc<TaskEntry>>>,
}

impl TaskArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: TaskEntry) -> Arc<TaskEntry> {
        let entry = Arc::new(entry);
        let mut tasks = match self.tasks.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.insert(entry.pid, entry.clone());
        entry
    }

    pub fn remove(&self, pid: Pid) -> Option<Arc<TaskEntry>> {
        let mut tasks = match self.tasks.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.remove(&pid)
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<TaskEntry>> {
        let tasks = match self.tasks.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.get(&pid).cloned()
    }

    pub fn require(&self, pid: Pid) -> Result<Arc<TaskEntry>> {
        self.get(pid).ok_or(FbgError::UnknownTask(pid))
    }

    pub fn len(&self) -> usize {
        match self.tasks.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
