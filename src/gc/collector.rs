//! Section collection
//!
//! [`GarbageCollector`] moves the live blocks out of a victim section so the
//! section can be released at the next checkpoint. Summaries only say who
//! owned a block when it was written; every block is re-validated against
//! the node address table (node blocks) or the owning dnode (data blocks)
//! before it is touched, and stale entries are skipped.
//!
//! Foreground collection pins a new address for every moved page and hands
//! the pages to writeback in one batch per segment. Background collection
//! only dirties the pages and leaves them to regular writeback.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::address::{BlockAddr, SegNo, NULL_SECNO};
use crate::backend::{GcBackend, Vnode};
use crate::gc::gc_state::{GcPhase, GcState};
use crate::gc::policy::GcType;
use crate::gc::stats::GcStats;
use crate::page::{NodeInfo, PageList};
use crate::segment::{CursegType, SegmentManager};
use crate::status::Status;
use crate::summary::{Summary, SummaryBlock};

/// Owner of a data block that passed [`GarbageCollector::check_dnode`]
pub struct DnodeTarget {
    /// Inode the block belongs to
    pub vnode: Arc<dyn Vnode>,
    /// File block index of the block
    pub index: u64,
    /// Node address table entry of the direct node
    pub node: NodeInfo,
}

/// Migrates live blocks out of victim sections
pub struct GarbageCollector {
    segments: Arc<SegmentManager>,
    backend: GcBackend,
    state: GcState,
    stats: GcStats,
    gc_lock: Mutex<()>,
}

impl GarbageCollector {
    /// Create a collector over `segments`
    pub fn new(segments: Arc<SegmentManager>, backend: GcBackend) -> Self {
        Self {
            segments,
            backend,
            state: GcState::new(),
            stats: GcStats::new(),
            gc_lock: Mutex::new(()),
        }
    }

    /// Segment manager being collected
    pub fn segments(&self) -> &Arc<SegmentManager> {
        &self.segments
    }

    /// Current phase and run count
    pub fn state(&self) -> &GcState {
        &self.state
    }

    /// Cumulative counters
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Collect the section starting at `start_segno`.
    ///
    /// Segments without valid blocks are skipped. The first failing segment
    /// aborts the section; segments already collected stay collected.
    /// `start_segno` must be the first segment of a section in the main area.
    pub fn do_garbage_collect(&self, start_segno: SegNo, gc_type: GcType) -> Result<(), Status> {
        let geo = self.segments.geometry();
        let segs_per_sec = geo.segs_per_sec();
        if start_segno >= geo.total_segs() || start_segno % segs_per_sec != 0 {
            return Err(Status::InvalidArgument);
        }

        let start = Instant::now();
        let before = self.stats.snapshot();

        if tracing::enabled!(tracing::Level::INFO) {
            tracing::info!(
                start_segno,
                gc_type = %gc_type,
                valid_blocks = self.segments.valid_blocks(start_segno, true),
                "gc pass started"
            );
        }

        let mut result = Ok(());
        for segno in start_segno..start_segno + segs_per_sec {
            if self.segments.compare_valid_blocks(0, segno, false) {
                continue;
            }
            result = self.collect_segment(segno, gc_type);
            if result.is_err() {
                break;
            }
        }

        let elapsed = start.elapsed();
        self.stats.record_pass(result.is_ok(), elapsed);
        let after = self.stats.snapshot();
        match result {
            Ok(()) => {
                if tracing::enabled!(tracing::Level::INFO) {
                    tracing::info!(
                        start_segno,
                        gc_type = %gc_type,
                        duration_us = elapsed.as_micros() as u64,
                        migrated = after.blocks_migrated() - before.blocks_migrated(),
                        skipped = after.stale_entries_skipped - before.stale_entries_skipped,
                        orphans = after.orphan_holes_punched - before.orphan_holes_punched,
                        "gc pass finished"
                    );
                }
            }
            Err(status) => {
                tracing::warn!(
                    start_segno,
                    gc_type = %gc_type,
                    %status,
                    migrated = after.blocks_migrated() - before.blocks_migrated(),
                    "gc pass aborted"
                );
            }
        }
        result
    }

    fn collect_segment(&self, segno: SegNo, gc_type: GcType) -> Result<(), Status> {
        let sum = self.backend.summaries.get_sum_page(segno)?;
        self.stats.record_segment_scanned();

        let seg_type = self.segments.segment_type(segno);
        debug_assert_eq!(
            seg_type.summary_type(),
            Some(sum.summary_type()),
            "summary type of segment {segno} disagrees with its log {seg_type:?}"
        );

        if seg_type.is_node() {
            self.gc_node_segment(&sum, segno, gc_type)
        } else {
            self.gc_data_segment(&sum, segno, gc_type)
        }
    }

    fn should_yield(&self, gc_type: GcType) -> bool {
        gc_type == GcType::BgGc && self.segments.has_not_enough_free_secs(0, 0)
    }

    fn flush(&self, pages: PageList) {
        if pages.is_empty() {
            return;
        }
        let accepted = self.backend.writeback.schedule_write_blocks(pages);
        self.stats.record_writeback(accepted);
    }

    /// Move the live node blocks of `segno`.
    pub fn gc_node_segment(
        &self,
        sum: &SummaryBlock,
        segno: SegNo,
        gc_type: GcType,
    ) -> Result<(), Status> {
        let nodes = &self.backend.nodes;
        let start_addr = self.segments.geometry().start_block(segno);
        let mut pages = PageList::new();

        for (off, entry) in (0u32..).zip(sum.entries()) {
            if self.should_yield(gc_type) {
                tracing::debug!(segno, off, "background gc yields to allocation");
                self.flush(pages);
                return Err(Status::BadState);
            }
            if !self.segments.is_valid_block(segno, off) {
                continue;
            }

            let nid = entry.nid;
            if !nodes.check_nid_range(nid) {
                self.skip_stale(segno, off, "nid out of range");
                continue;
            }
            let node_page = match nodes.get_node_page(nid) {
                Ok(page) => page,
                Err(status) => {
                    tracing::debug!(segno, off, nid, %status, "node page unavailable");
                    self.stats.record_stale();
                    continue;
                }
            };
            let ni = match nodes.get_node_info(nid) {
                Ok(ni) => ni,
                Err(status) => {
                    tracing::debug!(segno, off, nid, %status, "node info unavailable");
                    self.stats.record_stale();
                    continue;
                }
            };
            if ni.blk_addr != start_addr + off {
                self.skip_stale(segno, off, "node moved");
                continue;
            }

            let page = node_page.page;
            page.set_dirty();
            self.stats.record_node_migrated();
            if gc_type == GcType::FgGc {
                if let Err(status) = nodes.get_block_addr(&page) {
                    self.flush(pages);
                    return Err(status);
                }
                page.set_writeback();
                pages.push(page);
            }
        }

        self.flush(pages);
        Ok(())
    }

    /// Check that the data block at `blkaddr` still belongs to the owner
    /// recorded in `sum`, and resolve that owner.
    ///
    /// The version stamp catches a reused nid cheaply; the dnode's block
    /// pointer is what decides.
    pub fn check_dnode(&self, sum: &Summary, blkaddr: BlockAddr) -> Option<DnodeTarget> {
        let nodes = &self.backend.nodes;
        if !nodes.check_nid_range(sum.nid) {
            return None;
        }
        let node_page = nodes.get_node_page(sum.nid).ok()?;
        let node = nodes.get_node_info(sum.nid).ok()?;
        if sum.version != node.version {
            return None;
        }
        let vnode = self.backend.vnodes.get_vnode(node.ino).ok()?;
        if node_page.datablock_addr(sum.ofs_in_node) != blkaddr {
            return None;
        }
        Some(DnodeTarget {
            vnode,
            index: node_page.start_bidx + u64::from(sum.ofs_in_node),
            node,
        })
    }

    /// Move the live data blocks of `segno`.
    ///
    /// Blocks of orphan inodes are released instead of moved. A foreground
    /// pass fails with `BadState` if the segment is not empty afterwards.
    pub fn gc_data_segment(
        &self,
        sum: &SummaryBlock,
        segno: SegNo,
        gc_type: GcType,
    ) -> Result<(), Status> {
        let start_addr = self.segments.geometry().start_block(segno);
        let mut pages = PageList::new();

        for (off, entry) in (0u32..).zip(sum.entries()) {
            if self.should_yield(gc_type) {
                tracing::debug!(segno, off, "background gc yields to allocation");
                self.flush(pages);
                return Err(Status::BadState);
            }
            if !self.segments.is_valid_block(segno, off) {
                continue;
            }

            let Some(target) = self.check_dnode(entry, start_addr + off) else {
                self.skip_stale(segno, off, "dnode no longer points here");
                continue;
            };
            let DnodeTarget { vnode, index, .. } = target;

            if !vnode.is_valid() {
                match vnode.truncate_hole_unsafe(index, index + 1, true) {
                    Ok(()) => self.stats.record_orphan_hole(),
                    Err(status) => tracing::warn!(
                        segno,
                        off,
                        ino = vnode.ino(),
                        index,
                        %status,
                        "failed to release orphan block"
                    ),
                }
                continue;
            }

            let page = match vnode.find_gc_page(index) {
                Ok(page) => page,
                Err(status) => {
                    tracing::debug!(segno, off, ino = vnode.ino(), index, %status, "data page unavailable");
                    continue;
                }
            };
            page.set_dirty();
            page.set_cold_data();
            self.stats.record_data_migrated();
            if gc_type == GcType::FgGc {
                if let Err(status) = vnode.get_block_addr(&page) {
                    self.flush(pages);
                    return Err(status);
                }
                page.set_writeback();
                pages.push(page);
            }
        }

        self.flush(pages);
        if gc_type == GcType::FgGc && !self.segments.compare_valid_blocks(0, segno, false) {
            tracing::warn!(
                segno,
                valid_blocks = self.segments.valid_blocks(segno, false),
                "foreground gc left valid blocks behind"
            );
            return Err(Status::BadState);
        }
        Ok(())
    }

    fn skip_stale(&self, segno: SegNo, off: u32, reason: &'static str) {
        tracing::debug!(segno, off, reason, "skipping stale summary entry");
        self.stats.record_stale();
    }

    fn write_checkpoint(&self) -> Result<(), Status> {
        self.backend.checkpoint.write_checkpoint()?;
        let released = self.segments.checkpoint_segments();
        tracing::debug!(released, "checkpoint released prefree segments");
        Ok(())
    }

    /// Collect until `needed_blocks` can be written without eating into the
    /// reserved sections.
    ///
    /// Starts in background mode and switches to foreground mode (after a
    /// checkpoint) once free space is short. Returns the number of sections
    /// freed by foreground passes. Fails with `NoSpace` if space is short
    /// and there is nothing to collect, and with `Unavailable` if a
    /// background run found no victim at all.
    pub fn start_gc(&self, needed_blocks: u32) -> Result<u32, Status> {
        let _guard = self.gc_lock.lock();
        self.run(needed_blocks)
    }

    /// Run [`Self::start_gc`] unless another run holds the GC lock
    pub fn try_start_gc(&self, needed_blocks: u32) -> Option<Result<u32, Status>> {
        let _guard = self.gc_lock.try_lock()?;
        Some(self.run(needed_blocks))
    }

    /// Collect in the foreground if writing `needed_blocks` would leave too
    /// few free sections. Returns the number of sections freed.
    pub fn balance_fs(&self, needed_blocks: u32) -> Result<u32, Status> {
        if self.segments.is_fg_gc_disabled()
            || !self.segments.has_not_enough_free_secs(0, needed_blocks)
        {
            return Ok(0);
        }
        self.start_gc(needed_blocks)
    }

    fn run(&self, needed_blocks: u32) -> Result<u32, Status> {
        if !self.state.begin() {
            return Err(Status::BadState);
        }
        let result = self.run_passes(needed_blocks);
        self.segments.set_cur_victim_sec(NULL_SECNO);
        self.state.complete();
        result
    }

    fn run_passes(&self, needed_blocks: u32) -> Result<u32, Status> {
        if self.backend.checkpoint.has_cp_error() {
            return Err(Status::BadState);
        }

        let segments = &self.segments;
        let mut gc_type = GcType::BgGc;
        let mut sec_freed = 0u32;
        let mut found_victim = false;

        loop {
            if gc_type == GcType::BgGc && segments.has_not_enough_free_secs(sec_freed, needed_blocks)
            {
                gc_type = GcType::FgGc;
                self.state.advance_to_checkpointing();
                self.write_checkpoint()?;
                self.state.advance_to_selecting();
            }

            let segno = match segments.get_gc_victim(gc_type, CursegType::NoCheckType) {
                Ok(segno) => segno,
                Err(Status::Unavailable) => break,
                Err(status) => return Err(status),
            };
            found_victim = true;

            self.state.advance_to_migrating();
            let result = self.do_garbage_collect(segno, gc_type);
            self.state.advance_to_selecting();
            match (gc_type, result) {
                (GcType::FgGc, Ok(())) => {
                    segments.set_cur_victim_sec(NULL_SECNO);
                    sec_freed += 1;
                }
                (GcType::FgGc, Err(status)) => return Err(status),
                // A yielding background pass escalates on the next round.
                (GcType::BgGc, Err(Status::BadState)) | (GcType::BgGc, Ok(())) => {}
                (GcType::BgGc, Err(status)) => return Err(status),
            }

            if !segments.has_not_enough_free_secs(sec_freed, needed_blocks) {
                break;
            }
        }

        if gc_type == GcType::FgGc {
            if sec_freed == 0 && segments.has_not_enough_free_secs(0, needed_blocks) {
                return Err(Status::NoSpace);
            }
            self.state.advance_to_checkpointing();
            self.write_checkpoint()?;
        } else if !found_victim {
            return Err(Status::Unavailable);
        }

        if tracing::enabled!(tracing::Level::INFO) {
            tracing::info!(
                sec_freed,
                needed_blocks,
                free_sections = segments.free_sections(),
                runs = self.state.gc_runs() + 1,
                "gc run finished"
            );
        }
        Ok(sec_freed)
    }

    /// Phase of the run in progress, if any
    pub fn phase(&self) -> GcPhase {
        self.state.phase()
    }
}
