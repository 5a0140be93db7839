// SPDX-License-Identifier: GPL-2.0

use std::fmt;

use bitvec::prelude::*;
use log::warn;

use crate::hooks::HostCpus;

/// Upper bound on CPUs the mask can describe.
pub const MAX_CPUS: usize = 256;

/// Fixed-size CPU bit set.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CpuMask {
    bits: BitArr!(for MAX_CPUS, in u64, Lsb0),
}

impl CpuMask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cpus<I: IntoIterator<Item = usize>>(cpus: I) -> Self {
        let mut mask = Self::new();
        for cpu in cpus {
            mask.set(cpu);
        }
        mask
    }

    pub fn set(&mut self, cpu: usize) {
        if cpu < MAX_CPUS {
            self.bits.set(cpu, true);
        }
    }

    pub fn clear(&mut self, cpu: usize) {
        if cpu < MAX_CPUS {
            self.bits.set(cpu, false);
        }
    }

    pub fn test(&self, cpu: usize) -> bool {
        cpu < MAX_CPUS && self.bits[cpu]
    }

    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }

    pub fn weight(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn first(&self) -> Option<usize> {
        self.bits.first_one()
    }

    pub fn and(&self, other: &CpuMask) -> CpuMask {
        let mut out = self.clone();
        out.bits &= other.bits;
        out
    }

    pub fn or(&self, other: &CpuMask) -> CpuMask {
        let mut out = self.clone();
        out.bits |= other.bits;
        out
    }

    pub fn intersects(&self, other: &CpuMask) -> bool {
        !self.and(other).is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }
}

impl fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// One capacity-homogeneous CPU cluster.
#[derive(Clone, Debug)]
pub struct Cluster {
    /// Position in the capacity-ascending order; 0 is the lowest-capacity
    /// cluster.
    pub id: usize,
    pub cpus: CpuMask,
    /// Architectural capacity of the cluster's CPUs (1024 scale).
    pub capacity: u64,
}

impl Cluster {
    pub fn first_cpu(&self) -> usize {
        self.cpus.first().unwrap_or(0)
    }
}

/// CPU clusters ordered by ascending architectural capacity, with a reverse
/// per-CPU index. Built once at startup; topology is treated as immutable
/// afterwards.
pub struct ClusterTopology {
    clusters: Vec<Cluster>,
    cpu_cluster: Vec<usize>,
    nr_cpus: usize,
}

impl ClusterTopology {
    /// Build from the host's sibling and capacity information. Falls back to
    /// a single flat cluster when the host cannot report cluster ids, so the
    /// placement paths degrade instead of disappearing.
    pub fn new(host: &dyn HostCpus) -> Self {
        let nr_cpus = host.nr_cpus().min(MAX_CPUS);
        let info: Vec<(i32, u64)> = (0..nr_cpus)
            .map(|cpu| (host.cluster_id(cpu), host.arch_capacity(cpu)))
            .collect();
        match Self::from_cpu_info(&info) {
            Some(topo) => topo,
            None => {
                warn!("incomplete cluster topology, using a flat fallback");
                Self::flat(nr_cpus)
            }
        }
    }

    /// `info[cpu]` is `(cluster_id, arch_capacity)`. Returns `None` when any
    /// CPU reports no cluster.
    pub fn from_cpu_info(info: &[(i32, u64)]) -> Option<Self> {
        let nr_cpus = info.len().min(MAX_CPUS);
        if nr_cpus == 0 {
            return None;
        }

        let mut clusters: Vec<(i32, Cluster)> = Vec::new();
        for (cpu, &(raw_id, capacity)) in info.iter().enumerate().take(nr_cpus) {
            if raw_id < 0 {
                return None;
            }
            match clusters.iter_mut().find(|(id, _)| *id == raw_id) {
                Some((_, cluster)) => cluster.cpus.set(cpu),
                None => {
                    let mut cpus = CpuMask::new();
                    cpus.set(cpu);
                    clusters.push((raw_id, Cluster { id: 0, cpus, capacity }));
                }
            }
        }

        let mut clusters: Vec<Cluster> = clusters.into_iter().map(|(_, c)| c).collect();
        clusters.sort_by_key(|c| c.capacity);
        for (idx, cluster) in clusters.iter_mut().enumerate() {
            cluster.id = idx;
        }

        let mut cpu_cluster = vec![0usize; nr_cpus];
        for cluster in &clusters {
            for cpu in cluster.cpus.iter() {
                cpu_cluster[cpu] = cluster.id;
            }
        }

        Some(Self { clusters, cpu_cluster, nr_cpus })
    }

    /// One cluster spanning every CPU.
    pub fn flat(nr_cpus: usize) -> Self {
        let nr_cpus = nr_cpus.max(1).min(MAX_CPUS);
        let cluster = Cluster {
            id: 0,
            cpus: CpuMask::from_cpus(0..nr_cpus),
            capacity: crate::SCHED_CAPACITY_SCALE,
        };
        Self {
            clusters: vec![cluster],
            cpu_cluster: vec![0; nr_cpus],
            nr_cpus,
        }
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn nr_cpus(&self) -> usize {
        self.nr_cpus
    }

    pub fn cluster(&self, idx: usize) -> &Cluster {
        &self.clusters[idx]
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn cluster_of(&self, cpu: usize) -> Option<&Cluster> {
        self.cpu_cluster.get(cpu).map(|&idx| &self.clusters[idx])
    }

    pub fn highest(&self) -> &Cluster {
        &self.clusters[self.clusters.len() - 1]
    }
}
