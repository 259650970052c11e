//! Segment bookkeeping
//!
//! This module tracks the state GC decides on:
//! - `entry`: per-segment valid maps, checkpointed counts and ages
//! - `dirty`: dirty/prefree classification and the staged victim sections
//! - `free`: free segment and section maps
//! - `curseg`: the six active logs
//! - `manager`: [`SegmentManager`], which keeps all of the above consistent

mod curseg;
mod dirty;
mod entry;
mod free;
mod manager;

pub use curseg::{CursegType, NR_CURSEG_TYPE};
pub use dirty::{DirtySeglistInfo, DirtyType, SeglistInfo, NR_DIRTY_TYPE};
pub use entry::{SegmentEntry, SitInfo};
pub use free::FreeSegmapInfo;
pub use manager::{SegmentConfig, SegmentManager, MAX_SEARCH_LIMIT};
