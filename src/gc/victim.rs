//! Victim search over the dirty segment maps

use crate::address::{SecNo, SegNo, NULL_SEGNO};
use crate::gc::policy::{
    get_gc_cost, get_max_cost, AllocMode, GcMode, GcType, VictimSelPolicy,
};
use crate::segment::{CursegType, DirtyType, SeglistInfo, SegmentManager, SitInfo};
use crate::status::Status;

impl SegmentManager {
    /// Search parameters for a `gc_type` collection of `seg_type` segments.
    ///
    /// SSR looks at one log's dirty map a segment at a time; LFS looks at
    /// every dirty segment a section at a time. Both resume where the last
    /// search of the same mode stopped.
    pub fn get_victim_sel_policy(
        &self,
        seglist: &SeglistInfo,
        gc_type: GcType,
        seg_type: CursegType,
        alloc_mode: AllocMode,
    ) -> VictimSelPolicy {
        let (gc_mode, dirty_type, ofs_unit) = match alloc_mode {
            AllocMode::Ssr => (GcMode::Greedy, DirtyType::from(seg_type), 1),
            AllocMode::Lfs => {
                let gc_mode = match gc_type {
                    GcType::BgGc => GcMode::CostBenefit,
                    GcType::FgGc => GcMode::Greedy,
                };
                (gc_mode, DirtyType::Dirty, self.geometry.segs_per_sec())
            }
        };
        let max_search = seglist
            .dirty()
            .nr_dirty(dirty_type)
            .min(self.max_search_limit);

        // A search that ran out of budget mid-section already scored that
        // section; resume at the next one.
        let mut offset = seglist.last_victim[gc_mode.index()];
        if offset % ofs_unit != 0 {
            offset = (offset - offset % ofs_unit + ofs_unit) % self.geometry.total_segs();
        }

        VictimSelPolicy::new(alloc_mode, gc_mode, dirty_type, max_search, offset, ofs_unit)
    }

    /// Pick the cheapest dirty segment (section, in LFS mode) to reclaim.
    ///
    /// Examines at most `max_search_limit` candidates. When the budget runs
    /// out the search position is saved, so repeated calls cover the whole
    /// main area. In LFS mode the returned segment is section aligned and
    /// the section is claimed: as the current foreground victim, or staged
    /// in the victim section map for background GC.
    pub fn get_victim_by_default(
        &self,
        gc_type: GcType,
        seg_type: CursegType,
        alloc_mode: AllocMode,
    ) -> Result<SegNo, Status> {
        let sit = self.sit.read();
        self.get_victim_locked(&sit, gc_type, seg_type, alloc_mode)
    }

    /// Pick a section for `gc_type` collection
    pub fn get_gc_victim(&self, gc_type: GcType, seg_type: CursegType) -> Result<SegNo, Status> {
        self.get_victim_by_default(gc_type, seg_type, AllocMode::Lfs)
    }

    fn get_victim_locked(
        &self,
        sit: &SitInfo,
        gc_type: GcType,
        seg_type: CursegType,
        alloc_mode: AllocMode,
    ) -> Result<SegNo, Status> {
        let geo = &self.geometry;
        let mut seglist = self.seglist.lock();

        let mut p = self.get_victim_sel_policy(&seglist, gc_type, seg_type, alloc_mode);
        if p.max_search == 0 {
            return Err(Status::Unavailable);
        }
        p.min_cost = get_max_cost(geo, &p);

        if p.alloc_mode == AllocMode::Lfs && gc_type == GcType::FgGc {
            if let Some(segno) = self.get_background_victim(&mut seglist) {
                p.min_segno = segno;
            }
        }

        if p.min_segno == NULL_SEGNO {
            let cursor = p.gc_mode.index();
            let resume = p.offset;
            let mut last_segment = geo.total_segs();
            let mut wrapped = false;
            let mut nsearched = 0;

            loop {
                let segno = seglist
                    .dirty()
                    .segmap(p.dirty_type)
                    .find_next_bit(p.offset as usize, last_segment as usize)
                    as SegNo;
                if segno >= last_segment {
                    // Wrap once, up to where this search started.
                    if resume != 0 && !wrapped {
                        wrapped = true;
                        last_segment = resume;
                        seglist.last_victim[cursor] = 0;
                        p.offset = 0;
                        continue;
                    }
                    seglist.last_victim[cursor] = 0;
                    break;
                }

                p.offset = segno + p.ofs_unit;
                if p.ofs_unit > 1 {
                    p.offset -= segno % p.ofs_unit;
                }
                nsearched += 1;

                let secno = geo.sec_no(segno);
                let claimed = self.sec_usage_check_locked(&seglist, secno)
                    || (gc_type == GcType::BgGc
                        && seglist.dirty().victim_secmap().get(secno as usize));
                if !claimed {
                    let cost = get_gc_cost(sit, geo, segno, &p);
                    if cost < p.min_cost {
                        p.min_segno = segno;
                        p.min_cost = cost;
                    }
                }

                if nsearched >= p.max_search {
                    seglist.last_victim[cursor] = (segno + 1) % geo.total_segs();
                    break;
                }
            }

            if tracing::enabled!(tracing::Level::DEBUG) {
                tracing::debug!(
                    gc_type = %gc_type,
                    gc_mode = ?p.gc_mode,
                    nsearched,
                    min_segno = p.min_segno,
                    min_cost = p.min_cost,
                    next = seglist.last_victim[cursor],
                    "victim search finished"
                );
            }
        }

        if p.min_segno == NULL_SEGNO {
            return Err(Status::Unavailable);
        }

        if p.alloc_mode == AllocMode::Lfs {
            let secno = geo.sec_no(p.min_segno);
            match gc_type {
                GcType::FgGc => seglist.cur_victim_sec = secno,
                GcType::BgGc => {
                    seglist.dirty.mark_victim_sec(secno);
                }
            }
        }
        Ok(p.min_segno - p.min_segno % p.ofs_unit)
    }

    /// Take over a section staged by background GC that nobody is using.
    fn get_background_victim(&self, seglist: &mut SeglistInfo) -> Option<SegNo> {
        let secno = seglist
            .dirty()
            .victim_secmap()
            .iter_ones()
            .map(|secno| secno as SecNo)
            .find(|&secno| !self.sec_usage_check_locked(seglist, secno))?;
        seglist.dirty.clear_victim_sec(secno);
        Some(self.geometry.first_segno(secno))
    }
}
