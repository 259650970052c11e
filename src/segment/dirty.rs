//! Dirty segment classification
//!
//! A segment is *dirty* when it holds some but not all valid blocks, and
//! *prefree* when it holds none but has not yet been released by a
//! checkpoint. Dirty segments are tracked both in a global map and in a
//! per-log map; `victim_secmap` marks sections background GC has staged.

use crate::address::{SecNo, SegNo, NULL_SECNO};
use crate::gc::NR_GC_MODES;
use crate::segment::curseg::CursegType;
use crate::utility::Bitmap;

/// Number of dirty classes
pub const NR_DIRTY_TYPE: usize = 8;

/// Dirty class of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DirtyType {
    /// Dirty hot data segment
    DirtyHotData = 0,
    /// Dirty warm data segment
    DirtyWarmData = 1,
    /// Dirty cold data segment
    DirtyColdData = 2,
    /// Dirty hot node segment
    DirtyHotNode = 3,
    /// Dirty warm node segment
    DirtyWarmNode = 4,
    /// Dirty cold node segment
    DirtyColdNode = 5,
    /// Any dirty segment
    Dirty = 6,
    /// Fully invalid segment waiting for the next checkpoint
    Pre = 7,
}

impl DirtyType {
    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

impl From<CursegType> for DirtyType {
    fn from(seg_type: CursegType) -> Self {
        match seg_type {
            CursegType::HotData => DirtyType::DirtyHotData,
            CursegType::WarmData => DirtyType::DirtyWarmData,
            CursegType::ColdData => DirtyType::DirtyColdData,
            CursegType::HotNode => DirtyType::DirtyHotNode,
            CursegType::WarmNode => DirtyType::DirtyWarmNode,
            CursegType::ColdNode => DirtyType::DirtyColdNode,
            CursegType::NoCheckType => DirtyType::Dirty,
        }
    }
}

/// Dirty segment maps and counters
#[derive(Debug, Clone)]
pub struct DirtySeglistInfo {
    dirty_segmap: Vec<Bitmap>,
    nr_dirty: [u32; NR_DIRTY_TYPE],
    victim_secmap: Bitmap,
}

impl DirtySeglistInfo {
    pub(crate) fn new(total_segs: u32, total_secs: u32) -> Self {
        Self {
            dirty_segmap: (0..NR_DIRTY_TYPE)
                .map(|_| Bitmap::new(total_segs as usize))
                .collect(),
            nr_dirty: [0; NR_DIRTY_TYPE],
            victim_secmap: Bitmap::new(total_secs as usize),
        }
    }

    /// Map of segments in class `dirty_type`
    #[inline]
    pub fn segmap(&self, dirty_type: DirtyType) -> &Bitmap {
        &self.dirty_segmap[dirty_type.index()]
    }

    /// Number of segments in class `dirty_type`
    #[inline]
    pub fn nr_dirty(&self, dirty_type: DirtyType) -> u32 {
        self.nr_dirty[dirty_type.index()]
    }

    /// Check if `segno` is in class `dirty_type`
    #[inline]
    pub fn is_dirty(&self, dirty_type: DirtyType, segno: SegNo) -> bool {
        self.segmap(dirty_type).get(segno as usize)
    }

    /// Sections staged by background GC
    #[inline]
    pub fn victim_secmap(&self) -> &Bitmap {
        &self.victim_secmap
    }

    pub(crate) fn mark_victim_sec(&mut self, secno: SecNo) -> bool {
        self.victim_secmap.set(secno as usize)
    }

    pub(crate) fn clear_victim_sec(&mut self, secno: SecNo) -> bool {
        self.victim_secmap.clear(secno as usize)
    }

    fn test_and_set(&mut self, dirty_type: DirtyType, segno: SegNo) {
        if !self.dirty_segmap[dirty_type.index()].set(segno as usize) {
            self.nr_dirty[dirty_type.index()] += 1;
        }
    }

    fn test_and_clear(&mut self, dirty_type: DirtyType, segno: SegNo) {
        if self.dirty_segmap[dirty_type.index()].clear(segno as usize) {
            self.nr_dirty[dirty_type.index()] -= 1;
        }
    }

    /// Add `segno` to `dirty_type`; `Dirty` also files it under its log.
    pub(crate) fn locate(&mut self, segno: SegNo, dirty_type: DirtyType, seg_type: CursegType) {
        self.test_and_set(dirty_type, segno);
        if dirty_type == DirtyType::Dirty && seg_type.log_index().is_some() {
            self.test_and_set(DirtyType::from(seg_type), segno);
        }
    }

    /// Drop `segno` from `dirty_type`.
    ///
    /// Removing from `Dirty` also drops the per-log bit, and releases the
    /// staged victim section when `empty_section` names it.
    pub(crate) fn remove(
        &mut self,
        segno: SegNo,
        dirty_type: DirtyType,
        seg_type: CursegType,
        empty_section: SecNo,
    ) {
        self.test_and_clear(dirty_type, segno);
        if dirty_type != DirtyType::Dirty {
            return;
        }
        if seg_type.log_index().is_some() {
            self.test_and_clear(DirtyType::from(seg_type), segno);
        }
        if empty_section != NULL_SECNO {
            self.victim_secmap.clear(empty_section as usize);
        }
    }
}

/// Everything guarded by the segment list lock: the dirty maps plus the
/// victim search cursors.
#[derive(Debug, Clone)]
pub struct SeglistInfo {
    pub(crate) dirty: DirtySeglistInfo,
    pub(crate) last_victim: [SegNo; NR_GC_MODES],
    pub(crate) cur_victim_sec: SecNo,
}

impl SeglistInfo {
    pub(crate) fn new(total_segs: u32, total_secs: u32) -> Self {
        Self {
            dirty: DirtySeglistInfo::new(total_segs, total_secs),
            last_victim: [0; NR_GC_MODES],
            cur_victim_sec: NULL_SECNO,
        }
    }

    /// Dirty maps
    #[inline]
    pub fn dirty(&self) -> &DirtySeglistInfo {
        &self.dirty
    }
}
