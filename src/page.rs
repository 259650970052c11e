//! Page handles exchanged with the node manager, vnodes and writeback
//!
//! A [`Page`] is a cheap, shareable handle to a cached node or data page. GC
//! only touches its state flags: it marks pages dirty (and cold for data),
//! and for foreground collection also puts them under writeback before
//! handing them to the writeback collaborator in one batch.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::address::{BlockAddr, Ino, Nid};

const PAGE_DIRTY: u8 = 1 << 0;
const PAGE_WRITEBACK: u8 = 1 << 1;
const PAGE_COLD_DATA: u8 = 1 << 2;

/// Identity of a cached page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKey {
    /// Node page for node `nid`
    Node(Nid),
    /// Data page `index` of inode `ino`
    Data {
        /// Owning inode
        ino: Ino,
        /// File block index
        index: u64,
    },
}

struct PageInner {
    key: PageKey,
    flags: AtomicU8,
}

/// Shared handle to a cached page
#[derive(Clone)]
pub struct Page(Arc<PageInner>);

/// Batch of pages handed to writeback together
pub type PageList = Vec<Page>;

impl Page {
    /// Create a clean page handle
    pub fn new(key: PageKey) -> Self {
        Self(Arc::new(PageInner {
            key,
            flags: AtomicU8::new(0),
        }))
    }

    /// Page identity
    #[inline]
    pub fn key(&self) -> PageKey {
        self.0.key
    }

    /// Check if two handles refer to the same cached page
    #[inline]
    pub fn ptr_eq(&self, other: &Page) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    #[inline]
    fn test(&self, flag: u8) -> bool {
        self.0.flags.load(Ordering::Acquire) & flag != 0
    }

    #[inline]
    fn set(&self, flag: u8) -> bool {
        self.0.flags.fetch_or(flag, Ordering::AcqRel) & flag != 0
    }

    #[inline]
    fn clear(&self, flag: u8) -> bool {
        self.0.flags.fetch_and(!flag, Ordering::AcqRel) & flag != 0
    }

    /// Mark dirty, returning whether it already was
    pub fn set_dirty(&self) -> bool {
        self.set(PAGE_DIRTY)
    }

    /// Clear the dirty flag, returning whether it was set
    pub fn clear_dirty(&self) -> bool {
        self.clear(PAGE_DIRTY)
    }

    /// Check the dirty flag
    pub fn is_dirty(&self) -> bool {
        self.test(PAGE_DIRTY)
    }

    /// Mark under writeback
    pub fn set_writeback(&self) -> bool {
        self.set(PAGE_WRITEBACK)
    }

    /// Writeback finished
    pub fn clear_writeback(&self) -> bool {
        self.clear(PAGE_WRITEBACK)
    }

    /// Check the writeback flag
    pub fn is_writeback(&self) -> bool {
        self.test(PAGE_WRITEBACK)
    }

    /// Tag a data page as cold so its next block lands on a cold data log
    pub fn set_cold_data(&self) -> bool {
        self.set(PAGE_COLD_DATA)
    }

    /// Drop the cold tag (done once the page has been placed)
    pub fn clear_cold_data(&self) -> bool {
        self.clear(PAGE_COLD_DATA)
    }

    /// Check the cold tag
    pub fn is_cold_data(&self) -> bool {
        self.test(PAGE_COLD_DATA)
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("key", &self.0.key)
            .field("dirty", &self.is_dirty())
            .field("writeback", &self.is_writeback())
            .field("cold", &self.is_cold_data())
            .finish()
    }
}

/// Node address table entry for a node id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node id
    pub nid: Nid,
    /// Inode that owns the node
    pub ino: Ino,
    /// Block currently holding the node
    pub blk_addr: BlockAddr,
    /// Version stamp, bumped whenever the nid is reused
    pub version: u8,
}

/// A loaded node page together with the direct block pointers it carries.
///
/// For direct nodes (and inodes), `block_addrs[i]` is the data block of file
/// index `start_bidx + i`.
#[derive(Debug, Clone)]
pub struct NodePage {
    /// Cached page backing the node
    pub page: Page,
    /// Node id
    pub nid: Nid,
    /// File index of the first data pointer
    pub start_bidx: u64,
    /// Data block pointers, in file order
    pub block_addrs: Vec<BlockAddr>,
}

impl NodePage {
    /// Data block recorded at `ofs_in_node`, or NULL when out of range
    pub fn datablock_addr(&self, ofs_in_node: u16) -> BlockAddr {
        self.block_addrs
            .get(usize::from(ofs_in_node))
            .copied()
            .unwrap_or(BlockAddr::NULL)
    }
}
