//! Segment garbage collection
//!
//! Collection runs in two strictly separate steps:
//! - victim selection (`victim`) picks the cheapest dirty section under the
//!   segment manager's locks, using the cost functions in `policy`
//! - migration (`collector`) re-validates and moves the section's live
//!   blocks with no segment lock held
//!
//! The chosen segment number is the only thing passed between the two.
//! `background` drives collection from a worker thread.

mod background;
mod collector;
mod gc_state;
mod policy;
mod stats;
mod victim;

pub use background::{
    BackgroundGcConfig, BackgroundGcState, BackgroundGcStats, BackgroundGcTarget,
    BackgroundGcWorker,
};
pub use collector::{DnodeTarget, GarbageCollector};
pub use gc_state::{GcPhase, GcState};
pub use policy::{
    get_cost_benefit_ratio, get_gc_cost, get_max_cost, AllocMode, GcMode, GcType,
    VictimSelPolicy, NR_GC_MODES,
};
pub use stats::{GcStats, GcStatsSnapshot};
