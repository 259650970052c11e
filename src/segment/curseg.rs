//! Current segment logs

use crate::address::SegNo;
use crate::summary::SummaryType;

/// Number of active logs
pub const NR_CURSEG_TYPE: usize = 6;

/// Temperature and kind of an active log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CursegType {
    /// Hot data (directory entries)
    HotData = 0,
    /// Warm data (regular file data)
    #[default]
    WarmData = 1,
    /// Cold data (GC-migrated or rarely written data)
    ColdData = 2,
    /// Hot node (direct nodes of directories)
    HotNode = 3,
    /// Warm node (direct nodes of files)
    WarmNode = 4,
    /// Cold node (indirect nodes)
    ColdNode = 5,
    /// Any type; used by victim selection to search all dirty segments
    NoCheckType = 6,
}

impl CursegType {
    /// All real logs, in index order
    pub const LOGS: [CursegType; NR_CURSEG_TYPE] = [
        CursegType::HotData,
        CursegType::WarmData,
        CursegType::ColdData,
        CursegType::HotNode,
        CursegType::WarmNode,
        CursegType::ColdNode,
    ];

    /// Index of the log, or `None` for `NoCheckType`
    #[inline]
    pub const fn log_index(self) -> Option<usize> {
        match self {
            CursegType::NoCheckType => None,
            other => Some(other as usize),
        }
    }

    /// Check if this log holds node blocks
    #[inline]
    pub const fn is_node(self) -> bool {
        matches!(
            self,
            CursegType::HotNode | CursegType::WarmNode | CursegType::ColdNode
        )
    }

    /// Check if this log holds data blocks
    #[inline]
    pub const fn is_data(self) -> bool {
        matches!(
            self,
            CursegType::HotData | CursegType::WarmData | CursegType::ColdData
        )
    }

    /// Summary kind written for segments of this log
    pub const fn summary_type(self) -> Option<SummaryType> {
        if self.is_node() {
            Some(SummaryType::Node)
        } else if self.is_data() {
            Some(SummaryType::Data)
        } else {
            None
        }
    }
}

/// Write cursor of one active log
#[derive(Debug, Clone, Copy)]
pub(crate) struct CursegInfo {
    pub(crate) segno: SegNo,
    pub(crate) next_blkoff: u32,
}
