//! In-memory filesystem backing the GC integration tests.
//!
//! Every file is a single direct node (`nid == ino`) whose slot `i` holds the
//! block of file index `i`. Blocks are placed through the real
//! `SegmentManager`, and a summary entry is recorded for every block
//! written, so the collector sees the same metadata it would on a device.
//!
//! Faults can be injected for summary reads, node page loads, address
//! pinning, orphan truncation and checkpoints.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use f2fs_gc::address::{Ino, Nid};
use f2fs_gc::backend::{
    Checkpoint, GcBackend, NodeManager, SummaryReader, Vnode, VnodeCache, Writeback,
};
use f2fs_gc::page::{NodeInfo, NodePage, Page, PageKey, PageList};
use f2fs_gc::segment::{CursegType, SegmentConfig, SegmentManager};
use f2fs_gc::summary::{Summary, SummaryBlock, SummaryType};
use f2fs_gc::{BlockAddr, GarbageCollector, SegNo, Status, NULL_SEGNO};

/// Data slots per direct node.
pub const ADDRS_PER_NODE: usize = 64;

/// 16-block segments, 64 of them, one segment per section.
pub fn small_config() -> SegmentConfig {
    SegmentConfig::new()
        .with_log_blocks_per_seg(4)
        .with_total_segs(64)
        .with_main_blkaddr(64)
        .with_reserved_secs(2)
}

/// Append `count` full segments to `log`; returns each segment with its
/// block addresses.
pub fn fill_segments(
    sm: &SegmentManager,
    log: CursegType,
    count: usize,
) -> Vec<(SegNo, Vec<BlockAddr>)> {
    let bps = sm.geometry().blocks_per_seg() as usize;
    (0..count)
        .map(|_| {
            let addrs: Vec<BlockAddr> = (0..bps)
                .map(|_| sm.allocate_block(log).expect("allocate block"))
                .collect();
            let segno = sm.geometry().seg_no(addrs[0]).expect("main area address");
            (segno, addrs)
        })
        .collect()
}

/// Invalidate all but `keep` blocks of a filled segment.
pub fn keep_valid(sm: &SegmentManager, addrs: &[BlockAddr], keep: usize) {
    for addr in &addrs[keep..] {
        sm.invalidate_block(*addr).expect("invalidate block");
    }
}

struct NodeState {
    ino: Ino,
    blk_addr: BlockAddr,
    version: u8,
    block_addrs: Vec<BlockAddr>,
    page: Page,
}

#[derive(Default)]
struct FsState {
    nodes: HashMap<Nid, NodeState>,
    vnodes: HashMap<Ino, Arc<FakeVnode>>,
    summaries: HashMap<SegNo, SummaryBlock>,
    next_nid: Nid,
}

/// Fake node manager, vnode cache, summary store, writeback queue and
/// checkpoint writer in one object.
pub struct FakeFs {
    pub segments: Arc<SegmentManager>,
    me: Weak<FakeFs>,
    state: Mutex<FsState>,

    fail_sum_segno: AtomicU32,
    fail_node_pages: AtomicBool,
    fail_pin: AtomicBool,
    fail_truncate: AtomicBool,
    fail_checkpoint: AtomicBool,
    cp_error: AtomicBool,

    writeback_batches: AtomicUsize,
    written: Mutex<Vec<PageKey>>,
    checkpoints: AtomicUsize,
    truncated: AtomicUsize,
}

impl FakeFs {
    pub fn new(config: &SegmentConfig) -> Arc<Self> {
        let segments = Arc::new(SegmentManager::new(config).expect("segment manager"));
        Arc::new_cyclic(|me| Self {
            segments,
            me: me.clone(),
            state: Mutex::new(FsState::default()),
            fail_sum_segno: AtomicU32::new(NULL_SEGNO),
            fail_node_pages: AtomicBool::new(false),
            fail_pin: AtomicBool::new(false),
            fail_truncate: AtomicBool::new(false),
            fail_checkpoint: AtomicBool::new(false),
            cp_error: AtomicBool::new(false),
            writeback_batches: AtomicUsize::new(0),
            written: Mutex::new(Vec::new()),
            checkpoints: AtomicUsize::new(0),
            truncated: AtomicUsize::new(0),
        })
    }

    /// A collector wired to this filesystem.
    pub fn collector(self: &Arc<Self>) -> GarbageCollector {
        GarbageCollector::new(
            Arc::clone(&self.segments),
            GcBackend::from_shared(Arc::clone(self)),
        )
    }

    fn record_summary(&self, state: &mut FsState, addr: BlockAddr, sum: Summary, ty: SummaryType) {
        let geo = self.segments.geometry();
        let segno = geo.seg_no(addr).expect("main area address");
        let bps = geo.blocks_per_seg() as usize;
        let block = state
            .summaries
            .entry(segno)
            .or_insert_with(|| SummaryBlock::new(ty, bps));
        if block.summary_type() != ty {
            *block = SummaryBlock::new(ty, bps);
        }
        block.set_entry(geo.blk_off(addr) as usize, sum);
    }

    /// Create a file of `nblocks` blocks written to `data_log`.
    pub fn create_file_in(&self, data_log: CursegType, nblocks: usize) -> Ino {
        assert!(nblocks <= ADDRS_PER_NODE);
        let mut state = self.state.lock();
        state.next_nid += 1;
        let nid = state.next_nid;

        let node_addr = self
            .segments
            .allocate_block(CursegType::WarmNode)
            .expect("allocate node block");
        self.record_summary(&mut state, node_addr, Summary::node(nid), SummaryType::Node);

        let mut block_addrs = vec![BlockAddr::NULL; ADDRS_PER_NODE];
        for (idx, slot) in block_addrs.iter_mut().enumerate().take(nblocks) {
            let addr = self
                .segments
                .allocate_block(data_log)
                .expect("allocate data block");
            self.record_summary(
                &mut state,
                addr,
                Summary::data(nid, 0, idx as u16),
                SummaryType::Data,
            );
            *slot = addr;
        }

        state.nodes.insert(
            nid,
            NodeState {
                ino: nid,
                blk_addr: node_addr,
                version: 0,
                block_addrs,
                page: Page::new(PageKey::Node(nid)),
            },
        );
        state.vnodes.insert(
            nid,
            Arc::new(FakeVnode {
                ino: nid,
                valid: AtomicBool::new(true),
                fs: self.me.clone(),
                pages: Mutex::new(HashMap::new()),
            }),
        );
        nid
    }

    /// Create a file of `nblocks` warm data blocks.
    pub fn create_file(&self, nblocks: usize) -> Ino {
        self.create_file_in(CursegType::WarmData, nblocks)
    }

    /// Rewrite block `index` of `ino` out of place.
    pub fn overwrite(&self, ino: Ino, index: usize) -> BlockAddr {
        self.move_data_block(ino, index as u64, CursegType::WarmData)
            .expect("overwrite block")
    }

    /// Drop block `index` of `ino`.
    pub fn punch(&self, ino: Ino, index: usize) {
        self.truncate_range(ino, index as u64, index as u64 + 1)
            .expect("punch block");
    }

    /// Delete `ino` and every block it owns.
    pub fn delete_file(&self, ino: Ino) {
        let mut state = self.state.lock();
        let node = state.nodes.remove(&ino).expect("file exists");
        state.vnodes.remove(&ino);
        for addr in node.block_addrs {
            self.segments.invalidate_block(addr).expect("invalidate data");
        }
        self.segments
            .invalidate_block(node.blk_addr)
            .expect("invalidate node");
    }

    /// Unlink `ino` while it is still open: its blocks stay until released.
    pub fn orphan(&self, ino: Ino) {
        let state = self.state.lock();
        state.vnodes[&ino].valid.store(false, Ordering::Release);
    }

    /// Rewrite the node block of `nid` out of place.
    pub fn rewrite_node(&self, nid: Nid) -> BlockAddr {
        self.move_node_block(nid).expect("rewrite node")
    }

    /// Simulate `nid` being freed and reused since its blocks were written.
    pub fn bump_node_version(&self, nid: Nid) {
        let mut state = self.state.lock();
        let node = state.nodes.get_mut(&nid).expect("node exists");
        node.version = node.version.wrapping_add(1);
    }

    /// Overwrite one summary entry without touching the block it describes.
    pub fn tamper_summary(&self, segno: SegNo, off: usize, sum: Summary) {
        let mut state = self.state.lock();
        state
            .summaries
            .get_mut(&segno)
            .expect("summary exists")
            .set_entry(off, sum);
    }

    /// Current block of file index `index`.
    pub fn block_addr(&self, ino: Ino, index: usize) -> BlockAddr {
        self.state.lock().nodes[&ino].block_addrs[index]
    }

    /// Every allocated block of `ino`, with its index.
    pub fn file_blocks(&self, ino: Ino) -> Vec<(usize, BlockAddr)> {
        self.state.lock().nodes[&ino]
            .block_addrs
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, addr)| addr.is_allocated())
            .collect()
    }

    /// Current block of node `nid`.
    pub fn node_addr(&self, nid: Nid) -> BlockAddr {
        self.state.lock().nodes[&nid].blk_addr
    }

    /// Cached page of node `nid`.
    pub fn node_page(&self, nid: Nid) -> Page {
        self.state.lock().nodes[&nid].page.clone()
    }

    /// Cached data page, if GC loaded it.
    pub fn data_page(&self, ino: Ino, index: u64) -> Option<Page> {
        let vnode = Arc::clone(&self.state.lock().vnodes[&ino]);
        let pages = vnode.pages.lock();
        pages.get(&index).cloned()
    }

    fn move_data_block(&self, ino: Ino, index: u64, log: CursegType) -> Result<BlockAddr, Status> {
        let mut state = self.state.lock();
        let idx = index as usize;
        let (old, version) = {
            let node = state.nodes.get(&ino).ok_or(Status::NotFound)?;
            (node.block_addrs[idx], node.version)
        };
        let new = self.segments.allocate_block(log)?;
        self.record_summary(
            &mut state,
            new,
            Summary::data(ino, version, idx as u16),
            SummaryType::Data,
        );
        self.segments.invalidate_block(old)?;
        if let Some(node) = state.nodes.get_mut(&ino) {
            node.block_addrs[idx] = new;
        }
        Ok(new)
    }

    fn move_node_block(&self, nid: Nid) -> Result<BlockAddr, Status> {
        let mut state = self.state.lock();
        let old = state.nodes.get(&nid).ok_or(Status::NotFound)?.blk_addr;
        let new = self.segments.allocate_block(CursegType::WarmNode)?;
        self.record_summary(&mut state, new, Summary::node(nid), SummaryType::Node);
        self.segments.invalidate_block(old)?;
        if let Some(node) = state.nodes.get_mut(&nid) {
            node.blk_addr = new;
        }
        Ok(new)
    }

    fn truncate_range(&self, ino: Ino, start: u64, end: u64) -> Result<(), Status> {
        let mut state = self.state.lock();
        let node = state.nodes.get_mut(&ino).ok_or(Status::NotFound)?;
        for idx in start..end {
            let slot = &mut node.block_addrs[idx as usize];
            self.segments.invalidate_block(*slot)?;
            *slot = BlockAddr::NULL;
        }
        Ok(())
    }

    // ---- fault injection ----

    pub fn fail_summary_read(&self, segno: SegNo) {
        self.fail_sum_segno.store(segno, Ordering::SeqCst);
    }

    pub fn fail_node_pages(&self, fail: bool) {
        self.fail_node_pages.store(fail, Ordering::SeqCst);
    }

    pub fn fail_pin(&self, fail: bool) {
        self.fail_pin.store(fail, Ordering::SeqCst);
    }

    pub fn fail_truncate(&self, fail: bool) {
        self.fail_truncate.store(fail, Ordering::SeqCst);
    }

    pub fn fail_checkpoint(&self, fail: bool) {
        self.fail_checkpoint.store(fail, Ordering::SeqCst);
    }

    pub fn set_cp_error(&self, error: bool) {
        self.cp_error.store(error, Ordering::SeqCst);
    }

    // ---- observations ----

    pub fn writeback_batches(&self) -> usize {
        self.writeback_batches.load(Ordering::SeqCst)
    }

    pub fn written_pages(&self) -> Vec<PageKey> {
        self.written.lock().clone()
    }

    pub fn checkpoints(&self) -> usize {
        self.checkpoints.load(Ordering::SeqCst)
    }

    pub fn truncated(&self) -> usize {
        self.truncated.load(Ordering::SeqCst)
    }
}

impl SummaryReader for FakeFs {
    fn get_sum_page(&self, segno: SegNo) -> Result<SummaryBlock, Status> {
        if self.fail_sum_segno.load(Ordering::SeqCst) == segno {
            return Err(Status::IoError);
        }
        self.state
            .lock()
            .summaries
            .get(&segno)
            .cloned()
            .ok_or(Status::NotFound)
    }
}

impl NodeManager for FakeFs {
    fn check_nid_range(&self, nid: Nid) -> bool {
        nid != 0 && nid <= self.state.lock().next_nid
    }

    fn get_node_page(&self, nid: Nid) -> Result<NodePage, Status> {
        if self.fail_node_pages.load(Ordering::SeqCst) {
            return Err(Status::IoError);
        }
        let state = self.state.lock();
        let node = state.nodes.get(&nid).ok_or(Status::NotFound)?;
        Ok(NodePage {
            page: node.page.clone(),
            nid,
            start_bidx: 0,
            block_addrs: node.block_addrs.clone(),
        })
    }

    fn get_node_info(&self, nid: Nid) -> Result<NodeInfo, Status> {
        let state = self.state.lock();
        let node = state.nodes.get(&nid).ok_or(Status::NotFound)?;
        Ok(NodeInfo {
            nid,
            ino: node.ino,
            blk_addr: node.blk_addr,
            version: node.version,
        })
    }

    fn get_block_addr(&self, page: &Page) -> Result<BlockAddr, Status> {
        if self.fail_pin.load(Ordering::SeqCst) {
            return Err(Status::NoSpace);
        }
        match page.key() {
            PageKey::Node(nid) => self.move_node_block(nid),
            PageKey::Data { .. } => Err(Status::InvalidArgument),
        }
    }
}

impl VnodeCache for FakeFs {
    fn get_vnode(&self, ino: Ino) -> Result<Arc<dyn Vnode>, Status> {
        let state = self.state.lock();
        let vnode = state.vnodes.get(&ino).ok_or(Status::NotFound)?;
        Ok(Arc::clone(vnode) as Arc<dyn Vnode>)
    }
}

impl Writeback for FakeFs {
    fn schedule_write_blocks(&self, pages: PageList) -> usize {
        self.writeback_batches.fetch_add(1, Ordering::SeqCst);
        let mut written = self.written.lock();
        written.extend(pages.iter().map(Page::key));
        pages.len()
    }
}

impl Checkpoint for FakeFs {
    fn has_cp_error(&self) -> bool {
        self.cp_error.load(Ordering::SeqCst)
    }

    fn write_checkpoint(&self) -> Result<(), Status> {
        if self.fail_checkpoint.load(Ordering::SeqCst) {
            return Err(Status::IoError);
        }
        self.checkpoints.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Open file backed by [`FakeFs`].
pub struct FakeVnode {
    ino: Ino,
    valid: AtomicBool,
    fs: Weak<FakeFs>,
    pages: Mutex<HashMap<u64, Page>>,
}

impl FakeVnode {
    fn fs(&self) -> Result<Arc<FakeFs>, Status> {
        self.fs.upgrade().ok_or(Status::BadState)
    }
}

impl Vnode for FakeVnode {
    fn ino(&self) -> Ino {
        self.ino
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn find_gc_page(&self, index: u64) -> Result<Page, Status> {
        let mut pages = self.pages.lock();
        let page = pages.entry(index).or_insert_with(|| {
            Page::new(PageKey::Data {
                ino: self.ino,
                index,
            })
        });
        Ok(page.clone())
    }

    fn get_block_addr(&self, page: &Page) -> Result<BlockAddr, Status> {
        let fs = self.fs()?;
        if fs.fail_pin.load(Ordering::SeqCst) {
            return Err(Status::NoSpace);
        }
        let PageKey::Data { ino, index } = page.key() else {
            return Err(Status::InvalidArgument);
        };
        let log = if page.clear_cold_data() {
            CursegType::ColdData
        } else {
            CursegType::WarmData
        };
        fs.move_data_block(ino, index, log)
    }

    fn truncate_hole_unsafe(&self, start: u64, end: u64, _evict: bool) -> Result<(), Status> {
        let fs = self.fs()?;
        if fs.fail_truncate.load(Ordering::SeqCst) {
            return Err(Status::IoError);
        }
        fs.truncate_range(self.ino, start, end)?;
        fs.truncated
            .fetch_add((end - start) as usize, Ordering::SeqCst);
        Ok(())
    }
}
