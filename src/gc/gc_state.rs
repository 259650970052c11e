//! GC phase machine

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// GC phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GcPhase {
    /// No GC in progress
    Rest = 0,
    /// Searching the dirty maps for a victim section
    SelectingVictim = 1,
    /// Moving live blocks out of the victim
    Migrating = 2,
    /// Writing a checkpoint to release prefree segments
    Checkpointing = 3,
}

impl GcPhase {
    /// Get the phase as a string
    pub const fn as_str(&self) -> &'static str {
        match self {
            GcPhase::Rest => "Rest",
            GcPhase::SelectingVictim => "SelectingVictim",
            GcPhase::Migrating => "Migrating",
            GcPhase::Checkpointing => "Checkpointing",
        }
    }
}

impl From<u8> for GcPhase {
    fn from(value: u8) -> Self {
        match value {
            1 => GcPhase::SelectingVictim,
            2 => GcPhase::Migrating,
            3 => GcPhase::Checkpointing,
            _ => GcPhase::Rest,
        }
    }
}

impl std::fmt::Display for GcPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Phase of the running GC pass, readable from any thread.
///
/// Only the thread holding the collector's GC lock moves the phase; other
/// threads observe it.
#[derive(Debug, Default)]
pub struct GcState {
    phase: AtomicU8,
    gc_runs: AtomicU64,
}

impl GcState {
    /// Create a new GC state in the Rest phase
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current GC phase
    pub fn phase(&self) -> GcPhase {
        GcPhase::from(self.phase.load(Ordering::Acquire))
    }

    /// Check if GC is in progress (any phase other than Rest)
    pub fn is_active(&self) -> bool {
        self.phase() != GcPhase::Rest
    }

    /// Number of completed GC runs
    pub fn gc_runs(&self) -> u64 {
        self.gc_runs.load(Ordering::Acquire)
    }

    fn transition(&self, from: GcPhase, to: GcPhase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Start a run. Fails if one is already active.
    pub fn begin(&self) -> bool {
        self.transition(GcPhase::Rest, GcPhase::SelectingVictim)
    }

    /// Victim chosen; start moving blocks
    pub fn advance_to_migrating(&self) -> bool {
        self.transition(GcPhase::SelectingVictim, GcPhase::Migrating)
    }

    /// Section done; look for the next victim
    pub fn advance_to_selecting(&self) -> bool {
        self.transition(GcPhase::Migrating, GcPhase::SelectingVictim)
            || self.transition(GcPhase::Checkpointing, GcPhase::SelectingVictim)
    }

    /// Release prefree segments before continuing or finishing
    pub fn advance_to_checkpointing(&self) -> bool {
        self.transition(GcPhase::SelectingVictim, GcPhase::Checkpointing)
            || self.transition(GcPhase::Migrating, GcPhase::Checkpointing)
    }

    /// Finish the run from any phase and count it
    pub fn complete(&self) -> bool {
        let prev = self.phase.swap(GcPhase::Rest as u8, Ordering::AcqRel);
        if GcPhase::from(prev) == GcPhase::Rest {
            return false;
        }
        self.gc_runs.fetch_add(1, Ordering::AcqRel);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gc_state_new() {
        let state = GcState::new();
        assert_eq!(state.phase(), GcPhase::Rest);
        assert!(!state.is_active());
        assert_eq!(state.gc_runs(), 0);
    }

    #[test]
    fn test_gc_phase_transitions() {
        let state = GcState::new();

        assert!(state.begin());
        assert_eq!(state.phase(), GcPhase::SelectingVictim);
        assert!(state.is_active());

        assert!(state.advance_to_migrating());
        assert_eq!(state.phase(), GcPhase::Migrating);

        assert!(state.advance_to_selecting());
        assert!(state.advance_to_checkpointing());
        assert_eq!(state.phase(), GcPhase::Checkpointing);

        assert!(state.advance_to_selecting());
        assert!(state.complete());
        assert_eq!(state.phase(), GcPhase::Rest);
        assert_eq!(state.gc_runs(), 1);
    }

    #[test]
    fn test_gc_cannot_begin_when_active() {
        let state = GcState::new();
        assert!(state.begin());
        assert!(!state.begin());
    }

    #[test]
    fn test_gc_invalid_phase_transitions() {
        let state = GcState::new();
        assert!(!state.advance_to_migrating());
        assert!(!state.advance_to_selecting());
        assert!(!state.advance_to_checkpointing());
        assert!(!state.complete());
        assert_eq!(state.gc_runs(), 0);

        state.begin();
        // Cannot return to selection before migrating
        assert!(!state.advance_to_selecting());
    }

    #[test]
    fn test_gc_phase_display() {
        assert_eq!(GcPhase::Rest.as_str(), "Rest");
        assert_eq!(GcPhase::Migrating.as_str(), "Migrating");
        assert_eq!(format!("{}", GcPhase::Checkpointing), "Checkpointing");
    }

    #[test]
    fn test_gc_phase_from_u8() {
        assert_eq!(GcPhase::from(0), GcPhase::Rest);
        assert_eq!(GcPhase::from(1), GcPhase::SelectingVictim);
        assert_eq!(GcPhase::from(3), GcPhase::Checkpointing);
        assert_eq!(GcPhase::from(255), GcPhase::Rest);
    }
}
