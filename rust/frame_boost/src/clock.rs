// SPDX-License-Identifier: GPL-2.0

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of monotonic nanosecond timestamps. Injected so tests can drive
/// window arithmetic deterministically.
pub trait TimeSource: Send + Sync {
    fn now_ns(&self) -> u64;
}

/// Wall-backed monotonic time, anchored at construction.
pub struct MonotonicTime {
    start: Instant,
}

impl MonotonicTime {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    fn now_ns(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }
}

/// Suspend-aware clock. While the host is suspended the clock reports the
/// timestamp captured at suspend, so frame windows do not silently span a
/// sleep period.
pub struct Clock {
    source: Arc<dyn TimeSource>,
    frozen: AtomicBool,
    frozen_ns: AtomicU64,
}

impl Clock {
    pub fn new(source: Arc<dyn TimeSource>) -> Self {
        Self {
            source,
            frozen: AtomicBool::new(false),
            frozen_ns: AtomicU64::new(0),
        }
    }

    pub fn monotonic() -> Self {
        Self::new(Arc::new(MonotonicTime::new()))
    }

    pub fn now_ns(&self) -> u64 {
        if self.frozen.load(Ordering::Acquire) {
            self.frozen_ns.load(Ordering::Acquire)
        } else {
            self.source.now_ns()
        }
    }

    /// Freeze the clock at the current timestamp. Ordering matters: the
    /// timestamp must be visible before readers observe the frozen flag.
    pub fn suspend(&self) {
        self.frozen_ns.store(self.source.now_ns(), Ordering::Release);
        self.frozen.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.frozen.store(false, Ordering::Release);
    }
}
