//! f2fs-gc - Segment garbage collection for a log-structured flash filesystem
//!
//! The main area of the device is split into segments, grouped into
//! sections. Writes always append to one of six active logs, so overwritten
//! and deleted blocks leave holes behind. This crate decides which sections
//! are worth reclaiming and moves their remaining live blocks elsewhere:
//! - **Segment bookkeeping**: per-segment valid maps, dirty/prefree/free
//!   classification, the active logs
//! - **Victim selection**: greedy and cost-benefit policies with a bounded,
//!   resumable search
//! - **Migration**: liveness-checked node and data block moves, batched
//!   writeback, orphan disposal
//! - **Background GC**: an adaptive worker thread
//!
//! Block I/O, the node address table, vnodes, writeback and checkpointing
//! are reached through the traits in [`backend`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use f2fs_gc::prelude::*;
//!
//! let segments = Arc::new(SegmentManager::new(&SegmentConfig::default())?);
//! let collector = GarbageCollector::new(segments.clone(), GcBackend::from_shared(fs));
//!
//! // Before writing 64 blocks, make sure there is room for them.
//! collector.balance_fs(64)?;
//! ```

#![warn(missing_docs)]

pub mod address;
pub mod backend;
pub mod config;
pub mod gc;
pub mod page;
pub mod segment;
pub mod status;
pub mod summary;
pub mod utility;

// Re-exports for convenience
pub use address::{BlockAddr, SecNo, SegNo, SegmentGeometry, NULL_SECNO, NULL_SEGNO};
pub use gc::{GarbageCollector, GcType};
pub use segment::{SegmentConfig, SegmentManager};
pub use status::Status;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::address::{BlockAddr, Ino, Nid, SecNo, SegNo, NULL_SECNO, NULL_SEGNO};
    pub use crate::backend::{
        Checkpoint, GcBackend, NodeManager, SummaryReader, Vnode, VnodeCache, Writeback,
    };
    pub use crate::gc::{
        AllocMode, BackgroundGcConfig, BackgroundGcWorker, GarbageCollector, GcMode, GcType,
    };
    pub use crate::page::{NodeInfo, NodePage, Page, PageKey, PageList};
    pub use crate::segment::{CursegType, DirtyType, SegmentConfig, SegmentManager};
    pub use crate::status::Status;
    pub use crate::summary::{Summary, SummaryBlock, SummaryType};
}
