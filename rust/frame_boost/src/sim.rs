// SPDX-License-Identifier: GPL-2.0

//! Deterministic host used by the unit tests: a fixed three-cluster
//! topology, a hand-cranked clock, and recorded governor/agent callbacks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::clock::{Clock, TimeSource};
use crate::cluster::CpuMask;
use crate::frame_group::FrameBoost;
use crate::hooks::HostCpus;
use crate::task::Pid;

/// Manually advanced time source.
pub struct SimTime(AtomicU64);

impl SimTime {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, ns: u64) {
        self.0.store(ns, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn advance(&self, ns: u64) {
        self.0.fetch_add(ns, Ordering::Relaxed);
    }
}

impl TimeSource for SimTime {
    fn now_ns(&self) -> u64 {
        self.get()
    }
}

struct SimCpu {
    cluster: i32,
    /// Freq-limited capacity; the architectural capacity is uniform 1024.
    cur_cap: u64,
    cur_freq: u64,
    max_freq: u64,
    idle: bool,
    current: Option<Pid>,
    rt_runnable: bool,
    runnable: Vec<Pid>,
    util: u64,
}

struct Inner {
    cpus: Vec<SimCpu>,
    /// pid -> (cpu, executing right now)
    placed: FxHashMap<Pid, (usize, bool)>,
    allowed: FxHashMap<Pid, CpuMask>,
    protected: FxHashSet<Pid>,
    freq_kicks: Vec<(usize, u32)>,
    ed_signals: Vec<Pid>,
}

/// Eight CPUs in three clusters: 0-3 (cap 512), 4-6 (cap 768), 7 (cap 1024).
pub struct SimHost {
    inner: Mutex<Inner>,
}

impl SimHost {
    pub fn new() -> Arc<Self> {
        let caps: [(i32, u64); 8] = [
            (0, 512),
            (0, 512),
            (0, 512),
            (0, 512),
            (1, 768),
            (1, 768),
            (1, 768),
            (2, 1024),
        ];
        let cpus = caps
            .iter()
            .map(|&(cluster, cur_cap)| SimCpu {
                cluster,
                cur_cap,
                cur_freq: 1_000_000,
                max_freq: 1_000_000,
                idle: false,
                current: None,
                rt_runnable: false,
                runnable: Vec::new(),
                util: 0,
            })
            .collect();
        Arc::new(Self {
            inner: Mutex::new(Inner {
                cpus,
                placed: FxHashMap::default(),
                allowed: FxHashMap::default(),
                protected: FxHashSet::default(),
                freq_kicks: Vec::new(),
                ed_signals: Vec::new(),
            }),
        })
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn set_freq(&self, cpu: usize, cur: u64, max: u64) {
        let mut inner = self.inner();
        inner.cpus[cpu].cur_freq = cur;
        inner.cpus[cpu].max_freq = max;
    }

    pub fn set_capacity(&self, cpu: usize, cap: u64) {
        self.inner().cpus[cpu].cur_cap = cap;
    }

    pub fn set_current(&self, cpu: usize, pid: Option<Pid>) {
        let mut inner = self.inner();
        inner.cpus[cpu].current = pid;
        if let Some(pid) = pid {
            inner.placed.insert(pid, (cpu, true));
        }
    }

    pub fn set_idle(&self, cpu: usize, idle: bool) {
        self.inner().cpus[cpu].idle = idle;
    }

    pub fn set_util(&self, cpu: usize, util: u64) {
        self.inner().cpus[cpu].util = util;
    }

    pub fn set_rt_runnable(&self, cpu: usize, rt: bool) {
        self.inner().cpus[cpu].rt_runnable = rt;
    }

    pub fn set_runnable(&self, cpu: usize, tasks: Vec<Pid>) {
        self.inner().cpus[cpu].runnable = tasks;
    }

    pub fn set_allowed(&self, pid: Pid, mask: CpuMask) {
        self.inner().allowed.insert(pid, mask);
    }

    pub fn set_protected(&self, pid: Pid) {
        self.inner().protected.insert(pid);
    }

    pub fn place(&self, pid: Pid, cpu: usize, executing: bool) {
        self.inner().placed.insert(pid, (cpu, executing));
    }

    pub fn freq_kicks(&self) -> Vec<(usize, u32)> {
        self.inner().freq_kicks.clone()
    }

    pub fn clear_freq_kicks(&self) {
        self.inner().freq_kicks.clear();
    }

    pub fn ed_signals(&self) -> Vec<Pid> {
        self.inner().ed_signals.clone()
    }
}

impl HostCpus for SimHost {
    fn nr_cpus(&self) -> usize {
        self.inner().cpus.len()
    }

    fn cluster_id(&self, cpu: usize) -> i32 {
        self.inner().cpus[cpu].cluster
    }

    fn arch_capacity(&self, _cpu: usize) -> u64 {
        crate::SCHED_CAPACITY_SCALE
    }

    fn current_capacity(&self, cpu: usize) -> u64 {
        self.inner().cpus[cpu].cur_cap
    }

    fn cur_freq(&self, cpu: usize) -> u64 {
        self.inner().cpus[cpu].cur_freq
    }

    fn max_freq(&self, cpu: usize) -> u64 {
        self.inner().cpus[cpu].max_freq
    }

    fn active_mask(&self) -> CpuMask {
        CpuMask::from_cpus(0..self.inner().cpus.len())
    }

    fn allowed_cpus(&self, pid: Pid) -> CpuMask {
        let inner = self.inner();
        match inner.allowed.get(&pid) {
            Some(mask) => mask.clone(),
            None => CpuMask::from_cpus(0..inner.cpus.len()),
        }
    }

    fn current_task(&self, cpu: usize) -> Option<Pid> {
        self.inner().cpus[cpu].current
    }

    fn task_on_cpu(&self, pid: Pid) -> Option<usize> {
        let inner = self.inner();
        inner
            .placed
            .get(&pid)
            .and_then(|&(cpu, executing)| executing.then_some(cpu))
    }

    fn task_cpu(&self, pid: Pid) -> Option<usize> {
        self.inner().placed.get(&pid).map(|&(cpu, _)| cpu)
    }

    fn is_idle(&self, cpu: usize) -> bool {
        self.inner().cpus[cpu].idle
    }

    fn cpu_util_without(&self, cpu: usize, _pid: Pid) -> u64 {
        self.inner().cpus[cpu].util
    }

    fn rt_runnable(&self, cpu: usize) -> bool {
        self.inner().cpus[cpu].rt_runnable
    }

    fn is_protected(&self, pid: Pid) -> bool {
        self.inner().protected.contains(&pid)
    }

    fn runnable_tasks(&self, cpu: usize) -> Vec<Pid> {
        self.inner().cpus[cpu].runnable.clone()
    }

    fn update_freq(&self, cpu: usize, flags: u32) {
        self.inner().freq_kicks.push((cpu, flags));
    }

    fn notify_early_detection(&self, agent: Pid) {
        self.inner().ed_signals.push(agent);
    }
}

/// Fully wired context over the default sim topology and a fresh clock.
pub fn sim_boost() -> (FrameBoost, Arc<SimHost>, Arc<SimTime>) {
    let host = SimHost::new();
    let time = Arc::new(SimTime::new());
    let fb = FrameBoost::new(host.clone(), Clock::new(time.clone()));
    (fb, host, time)
}
