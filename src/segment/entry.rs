//! Segment information table
//!
//! One [`SegmentEntry`] per segment tracks which blocks are still live, how
//! many were live at the last checkpoint, the log the segment belongs to and
//! an age estimate (`mtime`). [`SitInfo`] holds the whole table plus the
//! running mtime bounds the cost-benefit policy normalizes against.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::address::{SegNo, SegmentGeometry};
use crate::segment::curseg::CursegType;
use crate::utility::Bitmap;

/// Per-segment bookkeeping
#[derive(Debug, Clone)]
pub struct SegmentEntry {
    valid_blocks: u32,
    ckpt_valid_blocks: u32,
    cur_valid_map: Bitmap,
    mtime: u64,
    seg_type: CursegType,
}

impl SegmentEntry {
    pub(crate) fn new(blocks_per_seg: u32) -> Self {
        Self {
            valid_blocks: 0,
            ckpt_valid_blocks: 0,
            cur_valid_map: Bitmap::new(blocks_per_seg as usize),
            mtime: 0,
            seg_type: CursegType::default(),
        }
    }

    /// Live blocks right now
    #[inline]
    pub fn valid_blocks(&self) -> u32 {
        self.valid_blocks
    }

    /// Live blocks as of the last checkpoint
    #[inline]
    pub fn ckpt_valid_blocks(&self) -> u32 {
        self.ckpt_valid_blocks
    }

    /// Average write time of the live blocks
    #[inline]
    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    /// Log the segment was last opened for
    #[inline]
    pub fn seg_type(&self) -> CursegType {
        self.seg_type
    }

    /// Check if block offset `off` is live
    #[inline]
    pub fn is_valid(&self, off: u32) -> bool {
        self.cur_valid_map.get(off as usize)
    }

    /// Mark `off` live; returns false if it already was.
    pub(crate) fn mark_valid(&mut self, off: u32, now: u64) -> bool {
        if self.cur_valid_map.set(off as usize) {
            return false;
        }
        let valid = u64::from(self.valid_blocks);
        self.mtime = (self.mtime * valid + now) / (valid + 1);
        self.valid_blocks += 1;
        debug_assert_eq!(self.valid_blocks as usize, self.cur_valid_map.count_ones());
        true
    }

    /// Mark `off` dead; returns false if it already was.
    pub(crate) fn mark_invalid(&mut self, off: u32) -> bool {
        if !self.cur_valid_map.clear(off as usize) {
            return false;
        }
        self.valid_blocks -= 1;
        debug_assert_eq!(self.valid_blocks as usize, self.cur_valid_map.count_ones());
        true
    }

    pub(crate) fn checkpoint(&mut self) {
        self.ckpt_valid_blocks = self.valid_blocks;
    }

    pub(crate) fn set_type(&mut self, seg_type: CursegType) {
        self.seg_type = seg_type;
    }

    pub(crate) fn set_mtime(&mut self, mtime: u64) {
        self.mtime = mtime;
    }
}

/// The segment information table
#[derive(Debug)]
pub struct SitInfo {
    sentries: Vec<SegmentEntry>,
    written_valid_blocks: u64,
    min_mtime: AtomicU64,
    max_mtime: AtomicU64,
}

impl SitInfo {
    pub(crate) fn new(geometry: &SegmentGeometry) -> Self {
        Self {
            sentries: (0..geometry.total_segs())
                .map(|_| SegmentEntry::new(geometry.blocks_per_seg()))
                .collect(),
            written_valid_blocks: 0,
            min_mtime: AtomicU64::new(u64::MAX),
            max_mtime: AtomicU64::new(0),
        }
    }

    /// Entry of `segno`
    #[inline]
    pub fn entry(&self, segno: SegNo) -> &SegmentEntry {
        &self.sentries[segno as usize]
    }

    #[inline]
    pub(crate) fn entry_mut(&mut self, segno: SegNo) -> &mut SegmentEntry {
        &mut self.sentries[segno as usize]
    }

    /// Live blocks across the whole main area
    #[inline]
    pub fn written_valid_blocks(&self) -> u64 {
        self.written_valid_blocks
    }

    /// Live blocks in `segno`, or in its whole section when `section` is set
    pub fn valid_blocks(&self, geometry: &SegmentGeometry, segno: SegNo, section: bool) -> u32 {
        if !section || geometry.segs_per_sec() == 1 {
            return self.entry(segno).valid_blocks();
        }
        let start = geometry.first_segno(geometry.sec_no(segno));
        (start..start + geometry.segs_per_sec())
            .map(|s| self.entry(s).valid_blocks())
            .sum()
    }

    /// Smallest section mtime observed
    #[inline]
    pub fn min_mtime(&self) -> u64 {
        self.min_mtime.load(Ordering::Acquire)
    }

    /// Largest mtime observed
    #[inline]
    pub fn max_mtime(&self) -> u64 {
        self.max_mtime.load(Ordering::Acquire)
    }

    /// Overwrite the mtime bounds (after the clock was changed)
    pub fn set_mtime_bounds(&self, min: u64, max: u64) {
        self.min_mtime.store(min, Ordering::Release);
        self.max_mtime.store(max, Ordering::Release);
    }

    /// Widen the bounds to include `mtime`; returns the resulting `(min, max)`.
    ///
    /// Runs under the shared table lock, so the bounds are atomics.
    pub(crate) fn observe_mtime(&self, mtime: u64) -> (u64, u64) {
        let min = self.min_mtime.fetch_min(mtime, Ordering::AcqRel).min(mtime);
        let max = self.max_mtime.fetch_max(mtime, Ordering::AcqRel).max(mtime);
        (min, max)
    }

    pub(crate) fn mark_valid(&mut self, segno: SegNo, off: u32, now: u64) -> bool {
        let changed = self.entry_mut(segno).mark_valid(off, now);
        if changed {
            self.written_valid_blocks += 1;
            self.max_mtime.fetch_max(now, Ordering::AcqRel);
        }
        changed
    }

    pub(crate) fn mark_invalid(&mut self, segno: SegNo, off: u32) -> bool {
        let changed = self.entry_mut(segno).mark_invalid(off);
        if changed {
            self.written_valid_blocks -= 1;
        }
        changed
    }

    pub(crate) fn checkpoint_all(&mut self) {
        self.sentries.iter_mut().for_each(SegmentEntry::checkpoint);
    }
}
