//! Segment summary blocks
//!
//! Each segment carries one summary block recording, per block offset, which
//! node claimed the block when it was written. For node segments the entry
//! names the node itself; for data segments it names the direct node and the
//! slot inside it. Summaries are hints: GC re-validates every entry against
//! live metadata before moving anything.

use crate::address::Nid;

/// Kind of segment a summary block describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryType {
    /// Node segment
    Node,
    /// Data segment
    Data,
}

/// One summary entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Summary {
    /// Node that owns the block (the node itself for node segments)
    pub nid: Nid,
    /// Node version when the block was written (data segments only)
    pub version: u8,
    /// Slot inside the direct node (data segments only)
    pub ofs_in_node: u16,
}

impl Summary {
    /// Entry for a node block
    pub const fn node(nid: Nid) -> Self {
        Self {
            nid,
            version: 0,
            ofs_in_node: 0,
        }
    }

    /// Entry for a data block
    pub const fn data(nid: Nid, version: u8, ofs_in_node: u16) -> Self {
        Self {
            nid,
            version,
            ofs_in_node,
        }
    }
}

/// Summary block of one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryBlock {
    summary_type: SummaryType,
    entries: Vec<Summary>,
}

impl SummaryBlock {
    /// Create a summary block with `blocks_per_seg` empty entries
    pub fn new(summary_type: SummaryType, blocks_per_seg: usize) -> Self {
        Self {
            summary_type,
            entries: vec![Summary::default(); blocks_per_seg],
        }
    }

    /// Type tag recorded in the footer
    #[inline]
    pub fn summary_type(&self) -> SummaryType {
        self.summary_type
    }

    /// All entries, indexed by block offset
    #[inline]
    pub fn entries(&self) -> &[Summary] {
        &self.entries
    }

    /// Entry for block offset `off`
    #[inline]
    pub fn entry(&self, off: usize) -> Option<&Summary> {
        self.entries.get(off)
    }

    /// Record the owner of block offset `off`
    pub fn set_entry(&mut self, off: usize, sum: Summary) {
        if let Some(slot) = self.entries.get_mut(off) {
            *slot = sum;
        }
    }
}
