//! Victim selection policy and cost functions
//!
//! Lower cost is better. Greedy cost is the number of blocks that would have
//! to move; cost-benefit additionally rewards old sections, following the
//! FAST heuristic `(1 - u) * age / (1 + u)` folded into a "lower is better"
//! scale by subtracting it from `u32::MAX`.

use crate::address::{SegNo, SegmentGeometry, NULL_SEGNO};
use crate::segment::{DirtyType, SitInfo};

/// Number of victim search modes, one search cursor each
pub const NR_GC_MODES: usize = 2;

/// Who asked for collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcType {
    /// Allocation is blocked on free space; migrate synchronously
    FgGc,
    /// Opportunistic collection from the background worker
    BgGc,
}

impl GcType {
    /// Get the type as a string
    pub const fn as_str(&self) -> &'static str {
        match self {
            GcType::FgGc => "foreground",
            GcType::BgGc => "background",
        }
    }
}

impl std::fmt::Display for GcType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cost function used by the victim search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GcMode {
    /// Fewest valid blocks wins
    Greedy = 0,
    /// Fewest valid blocks weighted by age
    CostBenefit = 1,
}

impl GcMode {
    /// Index of this mode's search cursor
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// How the caller will reuse the victim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocMode {
    /// Whole sections are reclaimed and then written sequentially
    Lfs,
    /// Invalid slots of a single segment are reused in place
    Ssr,
}

/// Parameters and running result of one victim search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VictimSelPolicy {
    /// Allocation mode the victim is chosen for
    pub alloc_mode: AllocMode,
    /// Cost function
    pub gc_mode: GcMode,
    /// Dirty map being scanned
    pub dirty_type: DirtyType,
    /// Candidates to examine before giving up
    pub max_search: u32,
    /// Next segment to examine
    pub offset: SegNo,
    /// Step between candidates; segments per section in LFS mode
    pub ofs_unit: u32,
    /// Best candidate so far
    pub min_segno: SegNo,
    /// Cost of the best candidate
    pub min_cost: u32,
}

impl VictimSelPolicy {
    /// Policy with no candidate yet
    pub fn new(
        alloc_mode: AllocMode,
        gc_mode: GcMode,
        dirty_type: DirtyType,
        max_search: u32,
        offset: SegNo,
        ofs_unit: u32,
    ) -> Self {
        Self {
            alloc_mode,
            gc_mode,
            dirty_type,
            max_search,
            offset,
            ofs_unit,
            min_segno: NULL_SEGNO,
            min_cost: u32::MAX,
        }
    }
}

/// Largest cost a candidate can have under `policy`; nothing at this cost is
/// ever chosen.
pub fn get_max_cost(geometry: &SegmentGeometry, policy: &VictimSelPolicy) -> u32 {
    if policy.alloc_mode == AllocMode::Ssr {
        return geometry.blocks_per_seg();
    }
    match policy.gc_mode {
        GcMode::Greedy => 2 * geometry.blocks_per_seg() * policy.ofs_unit,
        GcMode::CostBenefit => u32::MAX,
    }
}

/// Cost-benefit cost of the section holding `segno`.
///
/// Widens the table's mtime bounds when the section falls outside them, so
/// a clock that jumped backwards or forwards re-baselines the age scale.
pub fn get_cost_benefit_ratio(sit: &SitInfo, geometry: &SegmentGeometry, segno: SegNo) -> u32 {
    let segs_per_sec = geometry.segs_per_sec();
    let start = geometry.first_segno(geometry.sec_no(segno));

    let mtime = (start..start + segs_per_sec)
        .map(|s| sit.entry(s).mtime())
        .sum::<u64>()
        / u64::from(segs_per_sec);
    let vblocks = u64::from(sit.valid_blocks(geometry, segno, true));
    let u = vblocks * 100 / u64::from(geometry.blocks_per_sec());

    let (min_mtime, max_mtime) = sit.observe_mtime(mtime);
    let age = if max_mtime != min_mtime {
        100 - 100 * (mtime - min_mtime) / (max_mtime - min_mtime)
    } else {
        0
    };

    let benefit = 100 * (100 - u) * age / (100 + u);
    u32::MAX - benefit as u32
}

/// Cost of `segno` under `policy`
pub fn get_gc_cost(
    sit: &SitInfo,
    geometry: &SegmentGeometry,
    segno: SegNo,
    policy: &VictimSelPolicy,
) -> u32 {
    if policy.alloc_mode == AllocMode::Ssr {
        return sit.entry(segno).ckpt_valid_blocks();
    }
    match policy.gc_mode {
        GcMode::Greedy => sit.valid_blocks(geometry, segno, policy.ofs_unit > 1),
        GcMode::CostBenefit => get_cost_benefit_ratio(sit, geometry, segno),
    }
}
