//! Collaborator interfaces consumed by the GC engine
//!
//! The engine does not own block I/O, the node address table, the vnode
//! cache, writeback or checkpointing. It reaches them through the traits in
//! this module, bundled into a [`GcBackend`].

use std::sync::Arc;

use crate::address::{BlockAddr, Ino, Nid, SegNo};
use crate::page::{NodeInfo, NodePage, Page, PageList};
use crate::status::Status;
use crate::summary::SummaryBlock;

/// Loads segment summary blocks from the device
pub trait SummaryReader: Send + Sync {
    /// Read the summary block of `segno`
    fn get_sum_page(&self, segno: SegNo) -> Result<SummaryBlock, Status>;
}

/// Node address table and node page cache
pub trait NodeManager: Send + Sync {
    /// Check that `nid` lies inside the node id space
    fn check_nid_range(&self, nid: Nid) -> bool;

    /// Load the node page of `nid`
    fn get_node_page(&self, nid: Nid) -> Result<NodePage, Status>;

    /// Fresh node address table lookup for `nid`
    fn get_node_info(&self, nid: Nid) -> Result<NodeInfo, Status>;

    /// Assign a new block to a dirty node page and repoint the node address
    /// table at it, invalidating the old block.
    fn get_block_addr(&self, page: &Page) -> Result<BlockAddr, Status>;
}

/// An in-memory inode
pub trait Vnode: Send + Sync {
    /// Inode number
    fn ino(&self) -> Ino;

    /// False once the inode is an orphan awaiting deletion
    fn is_valid(&self) -> bool;

    /// Find or read the data page at `index` for migration
    fn find_gc_page(&self, index: u64) -> Result<Page, Status>;

    /// Assign a new block to a dirty data page and repoint the dnode slot at
    /// it, invalidating the old block.
    fn get_block_addr(&self, page: &Page) -> Result<BlockAddr, Status>;

    /// Release the blocks backing `[start, end)` without taking the inode lock
    fn truncate_hole_unsafe(&self, start: u64, end: u64, evict: bool) -> Result<(), Status>;
}

/// Vnode lookup
pub trait VnodeCache: Send + Sync {
    /// Resolve `ino`, loading it if it is not cached
    fn get_vnode(&self, ino: Ino) -> Result<Arc<dyn Vnode>, Status>;
}

/// Writeback scheduler
pub trait Writeback: Send + Sync {
    /// Hand off a batch of dirty pages under writeback; returns pages accepted
    fn schedule_write_blocks(&self, pages: PageList) -> usize;
}

/// Checkpoint writer
pub trait Checkpoint: Send + Sync {
    /// True once a checkpoint has failed and the filesystem is read-only
    fn has_cp_error(&self) -> bool;

    /// Persist a checkpoint
    fn write_checkpoint(&self) -> Result<(), Status>;
}

/// All collaborators the collector needs
#[derive(Clone)]
pub struct GcBackend {
    /// Summary block source
    pub summaries: Arc<dyn SummaryReader>,
    /// Node manager
    pub nodes: Arc<dyn NodeManager>,
    /// Vnode cache
    pub vnodes: Arc<dyn VnodeCache>,
    /// Writeback scheduler
    pub writeback: Arc<dyn Writeback>,
    /// Checkpoint writer
    pub checkpoint: Arc<dyn Checkpoint>,
}

impl GcBackend {
    /// Bundle a single object implementing every collaborator
    pub fn from_shared<T>(fs: Arc<T>) -> Self
    where
        T: SummaryReader + NodeManager + VnodeCache + Writeback + Checkpoint + 'static,
    {
        Self {
            summaries: fs.clone(),
            nodes: fs.clone(),
            vnodes: fs.clone(),
            writeback: fs.clone(),
            checkpoint: fs,
        }
    }
}
