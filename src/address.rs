//! Block addresses and segment geometry
//!
//! The main area of the device is a flat array of blocks grouped into
//! fixed-size segments, which are in turn grouped into sections of
//! `segs_per_sec` contiguous segments. A block address is an absolute block
//! number; segment and section numbers are relative to `main_blkaddr`.

use std::fmt;
use std::ops::Add;

use crate::status::Status;

/// Segment number within the main area
pub type SegNo = u32;

/// Section number within the main area
pub type SecNo = u32;

/// Node id
pub type Nid = u32;

/// Inode number
pub type Ino = u32;

/// Sentinel for "no segment"
pub const NULL_SEGNO: SegNo = u32::MAX;

/// Sentinel for "no section"
pub const NULL_SECNO: SecNo = u32::MAX;

/// An absolute block address on the device.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockAddr(pub u32);

impl BlockAddr {
    /// Unallocated block
    pub const NULL: Self = Self(0);

    /// Reserved but not yet written block
    pub const NEW: Self = Self(u32::MAX);

    /// Get the raw block number
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Check if this address points at a written block
    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.0 != Self::NULL.0 && self.0 != Self::NEW.0
    }
}

impl Add<u32> for BlockAddr {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u32) -> Self {
        Self(self.0 + rhs)
    }
}

impl fmt::Debug for BlockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NULL => write!(f, "BlockAddr(NULL)"),
            Self::NEW => write!(f, "BlockAddr(NEW)"),
            Self(raw) => write!(f, "BlockAddr({raw})"),
        }
    }
}

impl fmt::Display for BlockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static layout of the main area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentGeometry {
    main_blkaddr: u32,
    log_blocks_per_seg: u32,
    segs_per_sec: u32,
    total_segs: u32,
    reserved_secs: u32,
}

impl SegmentGeometry {
    /// Largest supported segment (2^16 blocks keeps valid counts in a u16)
    pub const MAX_LOG_BLOCKS_PER_SEG: u32 = 16;

    /// Build a geometry, rejecting layouts the segment manager cannot index.
    pub fn new(
        main_blkaddr: u32,
        log_blocks_per_seg: u32,
        segs_per_sec: u32,
        total_segs: u32,
        reserved_secs: u32,
    ) -> Result<Self, Status> {
        if log_blocks_per_seg == 0 || log_blocks_per_seg > Self::MAX_LOG_BLOCKS_PER_SEG {
            return Err(Status::InvalidArgument);
        }
        if segs_per_sec == 0 || total_segs == 0 || total_segs % segs_per_sec != 0 {
            return Err(Status::InvalidArgument);
        }
        let blocks = u64::from(total_segs) << log_blocks_per_seg;
        if u64::from(main_blkaddr) + blocks >= u64::from(BlockAddr::NEW.0) {
            return Err(Status::OutOfRange);
        }
        if main_blkaddr == 0 {
            // Block 0 doubles as NULL.
            return Err(Status::InvalidArgument);
        }
        Ok(Self {
            main_blkaddr,
            log_blocks_per_seg,
            segs_per_sec,
            total_segs,
            reserved_secs,
        })
    }

    /// First block of the main area
    #[inline]
    pub const fn main_blkaddr(&self) -> BlockAddr {
        BlockAddr(self.main_blkaddr)
    }

    /// log2 of blocks per segment
    #[inline]
    pub const fn log_blocks_per_seg(&self) -> u32 {
        self.log_blocks_per_seg
    }

    /// Blocks per segment
    #[inline]
    pub const fn blocks_per_seg(&self) -> u32 {
        1 << self.log_blocks_per_seg
    }

    /// Segments per section
    #[inline]
    pub const fn segs_per_sec(&self) -> u32 {
        self.segs_per_sec
    }

    /// Blocks per section
    #[inline]
    pub const fn blocks_per_sec(&self) -> u32 {
        self.blocks_per_seg() * self.segs_per_sec
    }

    /// Number of segments in the main area
    #[inline]
    pub const fn total_segs(&self) -> u32 {
        self.total_segs
    }

    /// Number of sections in the main area
    #[inline]
    pub const fn total_secs(&self) -> u32 {
        self.total_segs / self.segs_per_sec
    }

    /// Sections kept in reserve for GC itself
    #[inline]
    pub const fn reserved_secs(&self) -> u32 {
        self.reserved_secs
    }

    /// Section that contains `segno`
    #[inline]
    pub const fn sec_no(&self, segno: SegNo) -> SecNo {
        segno / self.segs_per_sec
    }

    /// First segment of `secno`
    #[inline]
    pub const fn first_segno(&self, secno: SecNo) -> SegNo {
        secno * self.segs_per_sec
    }

    /// First block of `segno`
    #[inline]
    pub const fn start_block(&self, segno: SegNo) -> BlockAddr {
        BlockAddr(self.main_blkaddr + (segno << self.log_blocks_per_seg))
    }

    /// Segment holding `addr`, if it lies inside the main area
    pub fn seg_no(&self, addr: BlockAddr) -> Option<SegNo> {
        if !addr.is_allocated() || addr.0 < self.main_blkaddr {
            return None;
        }
        let segno = (addr.0 - self.main_blkaddr) >> self.log_blocks_per_seg;
        (segno < self.total_segs).then_some(segno)
    }

    /// Offset of `addr` inside its segment
    #[inline]
    pub const fn blk_off(&self, addr: BlockAddr) -> u32 {
        (addr.0 - self.main_blkaddr) & (self.blocks_per_seg() - 1)
    }
}
