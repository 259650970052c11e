//! Segment manager
//!
//! Owns the segment information table, the dirty and free maps and the six
//! active logs. Block allocation and invalidation keep all of them in sync;
//! victim selection (in [`crate::gc`]) reads them under the same locks.
//!
//! Lock order: `cursegs` → `sit` → `seglist` → `free`. The current segment
//! numbers are mirrored in atomics so usage checks never need `cursegs`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::address::{BlockAddr, SecNo, SegNo, SegmentGeometry, NULL_SECNO, NULL_SEGNO};
use crate::gc::GcMode;
use crate::segment::curseg::{CursegInfo, CursegType, NR_CURSEG_TYPE};
use crate::segment::dirty::{DirtyType, SeglistInfo};
use crate::segment::entry::SitInfo;
use crate::segment::free::FreeSegmapInfo;
use crate::status::Status;

/// Upper bound on candidates examined by one victim search
pub const MAX_SEARCH_LIMIT: u32 = 4096;

/// Layout and search parameters of a segment manager
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// log2 of blocks per segment
    pub log_blocks_per_seg: u32,
    /// Segments per section
    pub segs_per_sec: u32,
    /// Segments in the main area
    pub total_segs: u32,
    /// First block of the main area
    pub main_blkaddr: u32,
    /// Sections held back for GC
    pub reserved_secs: u32,
    /// Cap on candidates per victim search
    pub max_search_limit: u32,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            log_blocks_per_seg: 9, // 512 blocks, 2 MiB with 4 KiB blocks
            segs_per_sec: 1,
            total_segs: 256,
            main_blkaddr: 512,
            reserved_secs: 2,
            max_search_limit: MAX_SEARCH_LIMIT,
        }
    }
}

impl SegmentConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set blocks per segment as a power of two
    pub fn with_log_blocks_per_seg(mut self, log: u32) -> Self {
        self.log_blocks_per_seg = log;
        self
    }

    /// Set segments per section
    pub fn with_segs_per_sec(mut self, segs: u32) -> Self {
        self.segs_per_sec = segs;
        self
    }

    /// Set the number of segments
    pub fn with_total_segs(mut self, segs: u32) -> Self {
        self.total_segs = segs;
        self
    }

    /// Set the first block of the main area
    pub fn with_main_blkaddr(mut self, addr: u32) -> Self {
        self.main_blkaddr = addr;
        self
    }

    /// Set the reserved section count
    pub fn with_reserved_secs(mut self, secs: u32) -> Self {
        self.reserved_secs = secs;
        self
    }

    /// Set the victim search cap
    pub fn with_max_search_limit(mut self, limit: u32) -> Self {
        self.max_search_limit = limit.max(1);
        self
    }

    /// Validate the layout
    pub fn geometry(&self) -> Result<SegmentGeometry, Status> {
        SegmentGeometry::new(
            self.main_blkaddr,
            self.log_blocks_per_seg,
            self.segs_per_sec,
            self.total_segs,
            self.reserved_secs,
        )
    }
}

/// Segment bookkeeping for one filesystem instance
pub struct SegmentManager {
    pub(crate) geometry: SegmentGeometry,
    pub(crate) max_search_limit: u32,
    pub(crate) sit: RwLock<SitInfo>,
    pub(crate) seglist: Mutex<SeglistInfo>,
    pub(crate) free: Mutex<FreeSegmapInfo>,
    cursegs: Mutex<[CursegInfo; NR_CURSEG_TYPE]>,
    cur_segnos: [AtomicU32; NR_CURSEG_TYPE],
    fg_gc_disabled: AtomicBool,
    mount_time: Instant,
}

impl SegmentManager {
    /// Build a manager with every segment free and one open segment per log.
    pub fn new(config: &SegmentConfig) -> Result<Self, Status> {
        let geometry = config.geometry()?;
        let mut free = FreeSegmapInfo::new(&geometry);
        let mut sit = SitInfo::new(&geometry);

        let mut cursegs = [CursegInfo {
            segno: NULL_SEGNO,
            next_blkoff: 0,
        }; NR_CURSEG_TYPE];
        let mut hint = 0;
        for log in CursegType::LOGS {
            let secno = free
                .find_free_section(&geometry, hint)
                .ok_or(Status::NoSpace)?;
            let segno = geometry.first_segno(secno);
            free.set_inuse(&geometry, segno);
            sit.entry_mut(segno).set_type(log);
            if let Some(idx) = log.log_index() {
                cursegs[idx].segno = segno;
            }
            hint = secno + 1;
        }

        let cur_segnos = cursegs.map(|c| AtomicU32::new(c.segno));
        Ok(Self {
            geometry,
            max_search_limit: config.max_search_limit.max(1),
            sit: RwLock::new(sit),
            seglist: Mutex::new(SeglistInfo::new(
                geometry.total_segs(),
                geometry.total_secs(),
            )),
            free: Mutex::new(free),
            cursegs: Mutex::new(cursegs),
            cur_segnos,
            fg_gc_disabled: AtomicBool::new(false),
            mount_time: Instant::now(),
        })
    }

    /// Main area layout
    #[inline]
    pub fn geometry(&self) -> &SegmentGeometry {
        &self.geometry
    }

    /// Cap on candidates per victim search
    #[inline]
    pub fn max_search_limit(&self) -> u32 {
        self.max_search_limit
    }

    fn now(&self) -> u64 {
        self.mount_time.elapsed().as_secs()
    }

    /// Append a block to the log of `seg_type`.
    pub fn allocate_block(&self, seg_type: CursegType) -> Result<BlockAddr, Status> {
        let idx = seg_type.log_index().ok_or(Status::InvalidArgument)?;
        let bps = self.geometry.blocks_per_seg();
        let mut cursegs = self.cursegs.lock();

        if cursegs[idx].next_blkoff >= bps {
            self.change_curseg(&mut cursegs[idx], idx, seg_type)?;
        }

        let curseg = &mut cursegs[idx];
        let segno = curseg.segno;
        let off = curseg.next_blkoff;
        curseg.next_blkoff += 1;
        {
            let mut sit = self.sit.write();
            sit.mark_valid(segno, off, self.now());
        }

        if curseg.next_blkoff >= bps {
            // Leave the full segment open if nothing is free; the next
            // allocation retries and reports NoSpace.
            if let Err(status) = self.change_curseg(curseg, idx, seg_type) {
                tracing::debug!(log = ?seg_type, segno, %status, "log stays on full segment");
            }
        }
        Ok(self.geometry.start_block(segno) + off)
    }

    fn change_curseg(
        &self,
        curseg: &mut CursegInfo,
        idx: usize,
        seg_type: CursegType,
    ) -> Result<(), Status> {
        let old = curseg.segno;
        let new = self.get_new_segment(old)?;
        *curseg = CursegInfo {
            segno: new,
            next_blkoff: 0,
        };
        self.cur_segnos[idx].store(new, Ordering::Release);

        let mut sit = self.sit.write();
        sit.entry_mut(new).set_type(seg_type);
        let mut seglist = self.seglist.lock();
        self.locate_dirty_segment_locked(&sit, &mut seglist, old);
        Ok(())
    }

    /// Next segment of the same section if free, else the first free
    /// section after it.
    fn get_new_segment(&self, old: SegNo) -> Result<SegNo, Status> {
        let geo = &self.geometry;
        let mut free = self.free.lock();

        let next = old + 1;
        if next % geo.segs_per_sec() != 0 && next < geo.total_segs() && !free.is_inuse(next) {
            free.set_inuse(geo, next);
            return Ok(next);
        }

        let hint = (geo.sec_no(old) + 1) % geo.total_secs();
        let secno = free.find_free_section(geo, hint).ok_or(Status::NoSpace)?;
        let segno = geo.first_segno(secno);
        free.set_inuse(geo, segno);
        Ok(segno)
    }

    /// Drop the block at `addr`; NULL and NEW addresses are ignored.
    pub fn invalidate_block(&self, addr: BlockAddr) -> Result<(), Status> {
        if !addr.is_allocated() {
            return Ok(());
        }
        let segno = self.geometry.seg_no(addr).ok_or(Status::OutOfRange)?;
        let off = self.geometry.blk_off(addr);

        let mut sit = self.sit.write();
        if !sit.mark_invalid(segno, off) {
            tracing::warn!(segno, off, "invalidating a block that is not valid");
            return Ok(());
        }
        let mut seglist = self.seglist.lock();
        self.locate_dirty_segment_locked(&sit, &mut seglist, segno);
        Ok(())
    }

    /// Reclassify `segno` after its valid count changed.
    pub fn locate_dirty_segment(&self, segno: SegNo) {
        let sit = self.sit.read();
        let mut seglist = self.seglist.lock();
        self.locate_dirty_segment_locked(&sit, &mut seglist, segno);
    }

    pub(crate) fn locate_dirty_segment_locked(
        &self,
        sit: &SitInfo,
        seglist: &mut SeglistInfo,
        segno: SegNo,
    ) {
        if segno == NULL_SEGNO || self.is_cur_seg(segno) {
            return;
        }

        let entry = sit.entry(segno);
        let seg_type = entry.seg_type();
        let valid = entry.valid_blocks();
        let empty_section = if sit.valid_blocks(&self.geometry, segno, true) == 0 {
            self.geometry.sec_no(segno)
        } else {
            NULL_SECNO
        };

        if valid == 0 {
            seglist.dirty.locate(segno, DirtyType::Pre, seg_type);
            seglist
                .dirty
                .remove(segno, DirtyType::Dirty, seg_type, empty_section);
        } else if valid < self.geometry.blocks_per_seg() {
            seglist.dirty.locate(segno, DirtyType::Dirty, seg_type);
        } else {
            seglist
                .dirty
                .remove(segno, DirtyType::Dirty, seg_type, empty_section);
        }
    }

    /// Snapshot checkpointed valid counts and release prefree segments.
    ///
    /// Returns the number of segments released.
    pub fn checkpoint_segments(&self) -> u32 {
        let mut sit = self.sit.write();
        sit.checkpoint_all();

        let mut seglist = self.seglist.lock();
        let prefree: Vec<SegNo> = seglist
            .dirty
            .segmap(DirtyType::Pre)
            .iter_ones()
            .map(|segno| segno as SegNo)
            .collect();

        let mut free = self.free.lock();
        for &segno in &prefree {
            let seg_type = sit.entry(segno).seg_type();
            seglist
                .dirty
                .remove(segno, DirtyType::Pre, seg_type, NULL_SECNO);
            free.set_free(&self.geometry, segno);
        }
        prefree.len() as u32
    }

    /// Live blocks of `segno`, or of its whole section when `section` is set
    pub fn valid_blocks(&self, segno: SegNo, section: bool) -> u32 {
        self.sit.read().valid_blocks(&self.geometry, segno, section)
    }

    /// Live blocks of `segno` at the last checkpoint
    pub fn ckpt_valid_blocks(&self, segno: SegNo) -> u32 {
        self.sit.read().entry(segno).ckpt_valid_blocks()
    }

    /// Check if `segno` (or its section) holds exactly `blocks` live blocks
    pub fn compare_valid_blocks(&self, blocks: u32, segno: SegNo, section: bool) -> bool {
        self.valid_blocks(segno, section) == blocks
    }

    /// Check if the block at `off` in `segno` is live
    pub fn is_valid_block(&self, segno: SegNo, off: u32) -> bool {
        self.sit.read().entry(segno).is_valid(off)
    }

    /// Log type recorded for `segno`
    pub fn segment_type(&self, segno: SegNo) -> CursegType {
        self.sit.read().entry(segno).seg_type()
    }

    /// Free segment count
    pub fn free_segments(&self) -> u32 {
        self.free.lock().free_segments()
    }

    /// Free section count
    pub fn free_sections(&self) -> u32 {
        self.free.lock().free_sections()
    }

    /// Segments waiting for a checkpoint to become free
    pub fn prefree_segments(&self) -> u32 {
        self.seglist.lock().dirty.nr_dirty(DirtyType::Pre)
    }

    /// Segment count of class `dirty_type`
    pub fn dirty_segments(&self, dirty_type: DirtyType) -> u32 {
        self.seglist.lock().dirty.nr_dirty(dirty_type)
    }

    /// Check if `segno` is in class `dirty_type`
    pub fn is_dirty(&self, dirty_type: DirtyType, segno: SegNo) -> bool {
        self.seglist.lock().dirty.is_dirty(dirty_type, segno)
    }

    /// Check if background GC has staged `secno`
    pub fn is_victim_section(&self, secno: SecNo) -> bool {
        self.seglist.lock().dirty.victim_secmap().get(secno as usize)
    }

    /// Check if `segno` is the open segment of some log
    pub fn is_cur_seg(&self, segno: SegNo) -> bool {
        self.cur_segnos
            .iter()
            .any(|cur| cur.load(Ordering::Acquire) == segno)
    }

    /// Check if any log writes into `secno`
    pub fn is_cur_sec(&self, secno: SecNo) -> bool {
        self.cur_segnos.iter().any(|cur| {
            let segno = cur.load(Ordering::Acquire);
            segno != NULL_SEGNO && self.geometry.sec_no(segno) == secno
        })
    }

    /// Check if `secno` is being written or collected
    pub fn sec_usage_check(&self, secno: SecNo) -> bool {
        let seglist = self.seglist.lock();
        self.sec_usage_check_locked(&seglist, secno)
    }

    pub(crate) fn sec_usage_check_locked(&self, seglist: &SeglistInfo, secno: SecNo) -> bool {
        self.is_cur_sec(secno) || seglist.cur_victim_sec == secno
    }

    /// Check if free sections, plus `freed_secs` about to be released, fall
    /// to the reserve once `needed_blocks` more blocks are written.
    pub fn has_not_enough_free_secs(&self, freed_secs: u32, needed_blocks: u32) -> bool {
        let needed_secs = needed_blocks.div_ceil(self.geometry.blocks_per_sec());
        let free_secs = self.free_sections();
        free_secs.saturating_add(freed_secs)
            <= self.geometry.reserved_secs().saturating_add(needed_secs)
    }

    /// Check if enough space is invalid, and little enough free, for
    /// background collection to pay off.
    pub fn has_enough_invalid_blocks(&self, invalid_pct: u32, free_pct: u32) -> bool {
        let geo = &self.geometry;
        let total = u64::from(geo.total_segs()) << geo.log_blocks_per_seg();
        let written = self.sit.read().written_valid_blocks();
        let reserved_segs = geo.reserved_secs() * geo.segs_per_sec();
        let free_blocks =
            u64::from(self.free_segments().saturating_sub(reserved_segs)) << geo.log_blocks_per_seg();

        let invalid = total.saturating_sub(written);
        let invalid_limit = total * u64::from(invalid_pct) / 100;
        let free_limit = total.saturating_sub(written) * u64::from(free_pct) / 100;
        invalid > invalid_limit && free_blocks < free_limit
    }

    /// Resume point of the victim search for `gc_mode`
    pub fn last_victim(&self, gc_mode: GcMode) -> SegNo {
        self.seglist.lock().last_victim[gc_mode.index()]
    }

    /// Move the victim search cursor for `gc_mode`
    pub fn set_last_victim(&self, gc_mode: GcMode, segno: SegNo) {
        self.seglist.lock().last_victim[gc_mode.index()] = segno;
    }

    /// Section under foreground collection, or `NULL_SECNO`
    pub fn cur_victim_sec(&self) -> SecNo {
        self.seglist.lock().cur_victim_sec
    }

    /// Set or clear the section under foreground collection
    pub fn set_cur_victim_sec(&self, secno: SecNo) {
        self.seglist.lock().cur_victim_sec = secno;
    }

    /// Stop [`crate::gc::GarbageCollector::balance_fs`] from collecting
    pub fn disable_fg_gc(&self) {
        self.fg_gc_disabled.store(true, Ordering::Release);
    }

    /// Allow foreground collection again
    pub fn enable_fg_gc(&self) {
        self.fg_gc_disabled.store(false, Ordering::Release);
    }

    /// Check if foreground collection is disabled
    pub fn is_fg_gc_disabled(&self) -> bool {
        self.fg_gc_disabled.load(Ordering::Acquire)
    }

    /// Refile `segno` under another log type (test hook)
    pub fn set_segment_type(&self, segno: SegNo, seg_type: CursegType) {
        let mut sit = self.sit.write();
        let mut seglist = self.seglist.lock();
        let old = sit.entry(segno).seg_type();
        if seglist.dirty.is_dirty(DirtyType::Dirty, segno) {
            seglist
                .dirty
                .remove(segno, DirtyType::Dirty, old, NULL_SECNO);
        }
        sit.entry_mut(segno).set_type(seg_type);
        self.locate_dirty_segment_locked(&sit, &mut seglist, segno);
    }

    /// Override the age of `segno` (test hook)
    pub fn set_segment_mtime(&self, segno: SegNo, mtime: u64) {
        self.sit.write().entry_mut(segno).set_mtime(mtime);
    }

    /// Override the mtime bounds used by cost-benefit selection
    pub fn set_mtime_bounds(&self, min: u64, max: u64) {
        self.sit.read().set_mtime_bounds(min, max);
    }
}

impl std::fmt::Debug for SegmentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentManager")
            .field("geometry", &self.geometry)
            .field("free_sections", &self.free_sections())
            .field("prefree_segments", &self.prefree_segments())
            .field("dirty_segments", &self.dirty_segments(DirtyType::Dirty))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SegmentManager {
        let config = SegmentConfig::new()
            .with_log_blocks_per_seg(2)
            .with_total_segs(16)
            .with_main_blkaddr(8)
            .with_reserved_secs(1);
        SegmentManager::new(&config).unwrap()
    }

    #[test]
    fn test_new_opens_one_section_per_log() {
        let sm = manager();
        assert_eq!(sm.free_sections(), 10);
        for (segno, log) in CursegType::LOGS.iter().enumerate() {
            assert!(sm.is_cur_seg(segno as SegNo));
            assert_eq!(sm.segment_type(segno as SegNo), *log);
        }
    }

    #[test]
    fn test_allocate_rolls_to_new_segment() {
        let sm = manager();
        let addrs: Vec<BlockAddr> = (0..5)
            .map(|_| sm.allocate_block(CursegType::WarmData).unwrap())
            .collect();

        assert_eq!(addrs[0], sm.geometry().start_block(1));
        assert_eq!(sm.geometry().seg_no(addrs[4]), Some(6));
        assert!(!sm.is_cur_seg(1));
        assert!(sm.is_cur_seg(6));
        assert_eq!(sm.segment_type(6), CursegType::WarmData);
        // Full segments are not dirty.
        assert!(!sm.is_dirty(DirtyType::Dirty, 1));
    }

    #[test]
    fn test_invalidate_classifies_segment() {
        let sm = manager();
        let addrs: Vec<BlockAddr> = (0..4)
            .map(|_| sm.allocate_block(CursegType::ColdData).unwrap())
            .collect();

        sm.invalidate_block(addrs[0]).unwrap();
        assert!(sm.is_dirty(DirtyType::Dirty, 2));
        assert!(sm.is_dirty(DirtyType::DirtyColdData, 2));
        assert_eq!(sm.valid_blocks(2, false), 3);

        for addr in &addrs[1..] {
            sm.invalidate_block(*addr).unwrap();
        }
        assert!(!sm.is_dirty(DirtyType::Dirty, 2));
        assert!(sm.is_dirty(DirtyType::Pre, 2));
        assert_eq!(sm.dirty_segments(DirtyType::DirtyColdData), 0);
        assert_eq!(sm.prefree_segments(), 1);
    }

    #[test]
    fn test_invalidate_ignores_sentinels() {
        let sm = manager();
        sm.invalidate_block(BlockAddr::NULL).unwrap();
        sm.invalidate_block(BlockAddr::NEW).unwrap();
        assert_eq!(sm.invalidate_block(BlockAddr(4)), Err(Status::OutOfRange));
    }

    #[test]
    fn test_checkpoint_releases_prefree() {
        let sm = manager();
        let addrs: Vec<BlockAddr> = (0..4)
            .map(|_| sm.allocate_block(CursegType::HotData).unwrap())
            .collect();
        let free_before = sm.free_sections();
        for addr in &addrs {
            sm.invalidate_block(*addr).unwrap();
        }
        assert_eq!(sm.free_sections(), free_before);

        assert_eq!(sm.checkpoint_segments(), 1);
        assert_eq!(sm.free_sections(), free_before + 1);
        assert_eq!(sm.prefree_segments(), 0);
        assert_eq!(sm.ckpt_valid_blocks(0), 0);
    }

    #[test]
    fn test_current_segment_never_dirty() {
        let sm = manager();
        let addr = sm.allocate_block(CursegType::HotNode).unwrap();
        sm.invalidate_block(addr).unwrap();
        let segno = sm.geometry().seg_no(addr).unwrap();
        assert!(sm.is_cur_seg(segno));
        assert!(!sm.is_dirty(DirtyType::Pre, segno));
        assert!(sm.sec_usage_check(segno));
    }

    #[test]
    fn test_allocate_reports_no_space() {
        let config = SegmentConfig::new()
            .with_log_blocks_per_seg(1)
            .with_total_segs(7)
            .with_main_blkaddr(8)
            .with_reserved_secs(0);
        let sm = SegmentManager::new(&config).unwrap();
        for _ in 0..4 {
            sm.allocate_block(CursegType::WarmData).unwrap();
        }
        assert_eq!(sm.allocate_block(CursegType::WarmData), Err(Status::NoSpace));
        assert_eq!(
            sm.allocate_block(CursegType::NoCheckType),
            Err(Status::InvalidArgument)
        );
    }

    #[test]
    fn test_has_not_enough_free_secs() {
        let sm = manager();
        // 10 free sections, 1 reserved.
        assert!(!sm.has_not_enough_free_secs(0, 0));
        assert!(!sm.has_not_enough_free_secs(0, 8 * 4));
        assert!(sm.has_not_enough_free_secs(0, 9 * 4));
        assert!(!sm.has_not_enough_free_secs(1, 9 * 4));
    }
}
