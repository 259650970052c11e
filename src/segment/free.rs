//! Free segment and section maps
//!
//! A set bit means "in use". A section is free only when all of its
//! segments are.

use crate::address::{SecNo, SegNo, SegmentGeometry};
use crate::utility::Bitmap;

/// Free segment/section bookkeeping
#[derive(Debug, Clone)]
pub struct FreeSegmapInfo {
    free_segmap: Bitmap,
    free_secmap: Bitmap,
    free_segments: u32,
    free_sections: u32,
}

impl FreeSegmapInfo {
    pub(crate) fn new(geometry: &SegmentGeometry) -> Self {
        Self {
            free_segmap: Bitmap::new(geometry.total_segs() as usize),
            free_secmap: Bitmap::new(geometry.total_secs() as usize),
            free_segments: geometry.total_segs(),
            free_sections: geometry.total_secs(),
        }
    }

    /// Free segment count
    #[inline]
    pub fn free_segments(&self) -> u32 {
        self.free_segments
    }

    /// Free section count
    #[inline]
    pub fn free_sections(&self) -> u32 {
        self.free_sections
    }

    /// Check if `segno` is allocated
    #[inline]
    pub fn is_inuse(&self, segno: SegNo) -> bool {
        self.free_segmap.get(segno as usize)
    }

    /// Check if any segment of `secno` is allocated
    #[inline]
    pub fn is_sec_inuse(&self, secno: SecNo) -> bool {
        self.free_secmap.get(secno as usize)
    }

    pub(crate) fn set_inuse(&mut self, geometry: &SegmentGeometry, segno: SegNo) {
        if !self.free_segmap.set(segno as usize) {
            self.free_segments -= 1;
        }
        if !self.free_secmap.set(geometry.sec_no(segno) as usize) {
            self.free_sections -= 1;
        }
    }

    /// Release `segno`; returns false if it was already free.
    pub(crate) fn set_free(&mut self, geometry: &SegmentGeometry, segno: SegNo) -> bool {
        if !self.free_segmap.clear(segno as usize) {
            return false;
        }
        self.free_segments += 1;

        let secno = geometry.sec_no(segno);
        let start = geometry.first_segno(secno) as usize;
        let end = start + geometry.segs_per_sec() as usize;
        if self.free_segmap.find_next_bit(start, end) >= end && self.free_secmap.clear(secno as usize)
        {
            self.free_sections += 1;
        }
        true
    }

    /// First free section at or after `hint`, wrapping around.
    pub(crate) fn find_free_section(
        &self,
        geometry: &SegmentGeometry,
        hint: SecNo,
    ) -> Option<SecNo> {
        let total = geometry.total_secs();
        (0..total)
            .map(|i| (hint + i) % total)
            .find(|&secno| !self.free_secmap.get(secno as usize))
    }
}
