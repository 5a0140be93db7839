// SPDX-License-Identifier: GPL-2.0

//! Per-group frame model: refresh rate, frame state, in-flight buffer count,
//! and the virtual-utilization projection. The default and input-method
//! groups have no frame model; the compositor, game, and every dynamic group
//! carry one.

use std::sync::{Mutex, MutexGuard, RwLock};

use bitvec::prelude::*;
use log::{debug, error};

use crate::error::{FbgError, Result};
use crate::task::GroupId;
use crate::{NSEC_PER_MSEC, NSEC_PER_SEC, SCHED_CAPACITY_SHIFT};

pub const MIN_FRAME_RATE: u32 = 1;
pub const MAX_FRAME_RATE: u32 = 144;
pub const DEFAULT_FRAME_RATE: u32 = 60;
pub const DEFAULT_FRAME_INTERVAL: u64 = 16_666_667;

/// Ceiling of the utilization scale; also the peak of the projection.
pub const FRAME_MAX_UTIL: u64 = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    /// Between the vsync that started the frame and its completion.
    Start,
    /// Frame handed off (or the pipeline went background).
    End,
}

#[derive(Debug)]
pub struct FrameInfo {
    frame_rate: u32,
    /// Frame length in ns, `NSEC_PER_SEC / frame_rate`.
    frame_interval: u64,
    frame_max_util: u64,
    frame_min_util: u64,
    /// Adjusts, in ms, the point where the projection saturates.
    vutil_margin: i64,
    state: FrameState,
    /// Frames already queued ahead of the consumer.
    buffer_count: i32,
    /// Nonzero when the producer announced another vsync is coming.
    next_vsync: i32,
    /// Reset min/max clamps on the next frame start.
    clear_limit: bool,
    last_compose_ns: u64,
}

impl Default for FrameInfo {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            frame_max_util: FRAME_MAX_UTIL,
            frame_min_util: 0,
            vutil_margin: 0,
            state: FrameState::End,
            buffer_count: 0,
            next_vsync: 0,
            clear_limit: false,
            last_compose_ns: 0,
        }
    }
}

impl FrameInfo {
    fn set_rate(&mut self, rate: u32) {
        self.frame_rate = rate;
        self.frame_interval = NSEC_PER_SEC / rate as u64;
        self.vutil_margin = 0;
    }
}

const MULTI_NUM: usize = GroupId::MULTI_NUM as usize;

/// Allocation state of the dynamic group slots. The offset makes allocation
/// round-robin so a just-released id is not immediately recycled.
struct MultiIds {
    map: BitArr!(for MULTI_NUM, in u8, Lsb0),
    offset: usize,
}

impl MultiIds {
    fn alloc(&mut self) -> Result<usize> {
        // The backing storage is wider than the slot count; keep the scans
        // inside the real slots.
        let slot = self.map[self.offset..MULTI_NUM]
            .first_zero()
            .map(|bit| bit + self.offset)
            .or_else(|| self.map[..MULTI_NUM].first_zero());
        match slot {
            Some(slot) => {
                self.map.set(slot, true);
                self.offset = slot;
                Ok(slot)
            }
            _ => {
                error!("no free dynamic frame group slot");
                Err(FbgError::NoFreeMultiId)
            }
        }
    }

    fn release(&mut self, slot: usize) {
        self.map.set(slot, false);
    }

    fn is_active(&self, slot: usize) -> bool {
        self.map[slot]
    }
}

/// The frame-model table: one record for the compositor, one for the game
/// group, one per dynamic slot, plus the dynamic-slot allocator.
pub struct FrameInfos {
    sf: Mutex<FrameInfo>,
    game: Mutex<FrameInfo>,
    multi: [Mutex<FrameInfo>; MULTI_NUM],
    ids: RwLock<MultiIds>,
}

fn lock(info: &Mutex<FrameInfo>) -> MutexGuard<'_, FrameInfo> {
    match info.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Default for FrameInfos {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameInfos {
    pub fn new() -> Self {
        Self {
            sf: Mutex::new(FrameInfo::default()),
            game: Mutex::new(FrameInfo::default()),
            multi: Default::default(),
            ids: RwLock::new(MultiIds { map: BitArray::ZERO, offset: 0 }),
        }
    }

    fn info(&self, id: GroupId) -> Result<&Mutex<FrameInfo>> {
        if id == GroupId::COMPOSITOR {
            Ok(&self.sf)
        } else if id == GroupId::GAME {
            Ok(&self.game)
        } else if let Some(slot) = id.multi_slot() {
            Ok(&self.multi[slot])
        } else {
            Err(FbgError::NoFrameInfo(id.raw() as i32))
        }
    }

    fn active_multi_info(&self, id: GroupId) -> Result<&Mutex<FrameInfo>> {
        let slot = id.multi_slot().ok_or(FbgError::InvalidGroupId(id.raw() as i32))?;
        if !self.is_active_multi(id) {
            return Err(FbgError::InactiveMultiId(id.raw() as i32));
        }
        Ok(&self.multi[slot])
    }

    fn ids_read(&self) -> std::sync::RwLockReadGuard<'_, MultiIds> {
        match self.ids.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn ids_write(&self) -> std::sync::RwLockWriteGuard<'_, MultiIds> {
        match self.ids.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_active_multi(&self, id: GroupId) -> bool {
        match id.multi_slot() {
            Some(slot) => self.ids_read().is_active(slot),
            None => false,
        }
    }

    /// Allocate a dynamic group and reset its frame model to defaults.
    pub fn alloc_multi(&self) -> Result<GroupId> {
        let slot = self.ids_write().alloc()?;
        let id = GroupId::multi(slot);
        *lock(&self.multi[slot]) = FrameInfo::default();
        debug!("allocated dynamic frame group {}", id.raw());
        Ok(id)
    }

    pub fn release_multi(&self, id: GroupId) {
        let Some(slot) = id.multi_slot() else { return };
        let mut ids = self.ids_write();
        if !ids.is_active(slot) {
            error!("dynamic frame group {} is already inactive", id.raw());
            return;
        }
        ids.release(slot);
    }

    /// Dynamic ids currently allocated.
    pub fn active_multi_ids(&self) -> Vec<GroupId> {
        let ids = self.ids_read();
        (0..MULTI_NUM)
            .filter(|&slot| ids.is_active(slot))
            .map(GroupId::multi)
            .collect()
    }

    /// Update the group's refresh rate. Returns whether the stored rate
    /// changed; out-of-range rates are rejected, and a non-compositor group
    /// can never exceed the compositor's rate.
    pub fn set_frame_rate(&self, id: GroupId, rate: u32) -> Result<bool> {
        let sf_rate = lock(&self.sf).frame_rate;
        let info = self.info(id)?;
        let mut info = lock(info);

        if rate == info.frame_rate {
            return Ok(false);
        }
        if !(MIN_FRAME_RATE..=MAX_FRAME_RATE).contains(&rate) {
            debug!("invalid frame rate {rate}, min {MIN_FRAME_RATE} max {MAX_FRAME_RATE}");
            return Err(FbgError::InvalidArg);
        }
        if id != GroupId::COMPOSITOR && rate > sf_rate {
            return Ok(false);
        }

        info.set_rate(rate);
        debug!("group {} frame rate set to {rate}", id.raw());
        Ok(true)
    }

    pub fn frame_rate(&self, id: GroupId) -> u32 {
        match self.info(id) {
            Ok(info) => lock(info).frame_rate,
            Err(_) => 0,
        }
    }

    pub fn frame_interval(&self, id: GroupId) -> u64 {
        match self.info(id) {
            Ok(info) => lock(info).frame_interval,
            Err(_) => DEFAULT_FRAME_INTERVAL,
        }
    }

    pub fn is_high_frame_rate(&self, id: GroupId) -> bool {
        match self.info(id) {
            Ok(info) => lock(info).frame_rate > DEFAULT_FRAME_RATE,
            Err(_) => false,
        }
    }

    /// Shift, in ms, of the point where the projection saturates. Bounded by
    /// the frame interval above and minus half of it below.
    pub fn set_margin(&self, id: GroupId, margin_ms: i64) -> Result<()> {
        let info = self.info(id)?;
        let mut info = lock(info);

        let interval_ms = (info.frame_interval / NSEC_PER_MSEC) as i64;
        let max_margin = interval_ms;
        let min_margin = -(interval_ms >> 1);
        if margin_ms < min_margin || margin_ms > max_margin {
            debug!("invalid frame margin {margin_ms}, min {min_margin} max {max_margin}");
            return Err(FbgError::InvalidArg);
        }

        info.vutil_margin = margin_ms;
        Ok(())
    }

    /// Floor the clamp window. Only active dynamic groups accept this; when
    /// `clear` is set the clamps revert to defaults on the next frame start.
    pub fn set_util_min(&self, id: GroupId, min_util: i64, clear: bool) -> Result<()> {
        if !(0..=FRAME_MAX_UTIL as i64).contains(&min_util) {
            return Err(FbgError::InvalidArg);
        }
        let info = self.active_multi_info(id)?;
        let mut info = lock(info);
        info.frame_min_util = min_util as u64;
        info.clear_limit = clear;
        Ok(())
    }

    /// Record a frame-state transition. `buffer_count`/`next_vsync` of -1
    /// leave the stored value alone; the next-vsync hint only accompanies
    /// frame end.
    pub fn set_state(&self, id: GroupId, state: FrameState, buffer_count: i32, next_vsync: i32) {
        let Ok(info) = self.info(id) else { return };
        let mut info = lock(info);

        info.state = state;
        if buffer_count != -1 {
            info.buffer_count = buffer_count;
        }
        if next_vsync != -1 {
            info.next_vsync = next_vsync;
        }
        if info.clear_limit && state == FrameState::Start {
            info.frame_max_util = FRAME_MAX_UTIL;
            info.frame_min_util = 0;
            info.clear_limit = false;
        }
    }

    pub fn state(&self, id: GroupId) -> FrameState {
        match self.info(id) {
            Ok(info) => lock(info).state,
            Err(_) => FrameState::End,
        }
    }

    pub fn next_vsync(&self, id: GroupId) -> i32 {
        match self.info(id) {
            Ok(info) => lock(info).next_vsync,
            Err(_) => 0,
        }
    }

    /// Virtual utilization: a parabola in the elapsed frame time `delta`,
    /// anchored at (0, 0) and saturating at FRAME_MAX_UTIL once
    /// `frame_interval + margin` has passed:
    ///
    ///   vutil(t) = t * (t + 1024/max_time - max_time)
    ///
    /// A deep producer queue (3+ buffered frames) or a finished frame with an
    /// idle handler suppresses the projection entirely. Returns the value and
    /// the buffer count observed under the lock.
    pub fn vutil(&self, id: GroupId, delta: u64, handler_busy: bool) -> (u64, i32) {
        let Ok(info) = self.info(id) else { return (0, 0) };
        let info = lock(info);

        let delta_ms = (delta / NSEC_PER_MSEC) as i64;
        let buffer_count = info.buffer_count;
        if info.state == FrameState::End && !handler_busy {
            return (0, buffer_count);
        }

        let interval_ms = (info.frame_interval / NSEC_PER_MSEC) as i64;
        let min_margin = -(interval_ms >> 1);

        let margin_eff = if buffer_count <= 1 {
            min_margin.min(info.vutil_margin)
        } else if buffer_count == 2 {
            info.vutil_margin
        } else {
            return (0, buffer_count);
        };

        let max_time = interval_ms + margin_eff;
        if max_time <= 0 || delta_ms > max_time {
            return (FRAME_MAX_UTIL, buffer_count);
        }

        let tmp = delta_ms + FRAME_MAX_UTIL as i64 / max_time;
        if tmp <= max_time {
            return (0, buffer_count);
        }

        ((delta_ms * (tmp - max_time)) as u64, buffer_count)
    }

    /// Physical utilization of `delta` ns of scaled execution against one
    /// frame interval. Outside the frame zone the default 60 Hz interval is
    /// used so stale windows are not inflated by a short interval.
    pub fn putil(&self, id: GroupId, delta: u64, in_frame_zone: bool) -> u64 {
        let interval = match self.info(id) {
            Ok(info) if in_frame_zone => lock(info).frame_interval,
            _ => DEFAULT_FRAME_INTERVAL,
        };
        if interval > 0 {
            (delta << SCHED_CAPACITY_SHIFT) / interval
        } else {
            0
        }
    }

    /// Clamp `util` between the group's user-set floor and ceiling. An
    /// inverted window passes the value through.
    pub fn uclamp(&self, id: GroupId, util: u64) -> u64 {
        let Ok(info) = self.info(id) else { return util };
        let info = lock(info);
        if info.frame_min_util > info.frame_max_util {
            return util;
        }
        util.max(info.frame_min_util).min(info.frame_max_util)
    }

    /// Track the compositor's last client-composition timestamp; reports
    /// whether one happened within the current frame interval.
    pub fn check_last_compose_time(&self, composition: bool, now: u64) -> bool {
        let mut info = lock(&self.sf);
        if composition {
            info.last_compose_ns = now;
        }
        now.saturating_sub(info.last_compose_ns) <= info.frame_interval
    }

    /// One compositor transaction consumed a buffer from every active
    /// dynamic group's queue.
    pub fn decay_buffer_counts(&self) {
        for id in self.active_multi_ids() {
            if let Ok(info) = self.info(id) {
                let mut info = lock(info);
                if info.buffer_count > 0 {
                    info.buffer_count -= 1;
                }
            }
        }
    }
}
