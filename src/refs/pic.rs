//! The polymorphic inline cache shared by `FieldRef`, `IndexRef`, and
//! `MethodCallRef` (spec §4.4 "The PIC has two sizes: 2 and 4 ... State
//! machines").
//!
//! A cache site holds up to 4 `(shape, handler)` entries in move-to-front
//! order, plus an access-count window used to drive the adaptive 2↔4 sizing
//! and (when `HEURISTIC` is enabled) a freeze state that reverts a thrashing
//! site back to size 2 for a few windows.

use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::perf_flags::PerfFlags;

/// `(classId, layoutVersion)`. A zero `classId` means "shape not stable, do
/// not cache" (spec §4.4 "key 0 means 'shape not stable, do not cache'").
pub type ShapeKey = (u64, u64);

pub const UNSTABLE_SHAPE: ShapeKey = (0, 0);

const WINDOW_SIZE: u32 = 256;
const PROMOTE_MISS_RATE_PCT: u32 = 20;
const DEMOTE_MISS_RATE_PCT: u32 = 25;
const FREEZE_WINDOWS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SizeState {
    Size2,
    Size4,
    /// Frozen at size 2 for `remaining` more windows (spec §4.4 state machine).
    Frozen { remaining: u32 },
}

/// One entry: the shape it was installed for, its handler, and whether it's a
/// negative-cache entry remembering a thrown error's message (spec §4.4 "the
/// thrown error's message is installed as a negative-cache handler").
#[derive(Debug, Clone)]
pub enum CacheEntry<H> {
    Hit { shape: ShapeKey, handler: H },
    Miss { shape: ShapeKey, message: String },
}

impl<H> CacheEntry<H> {
    fn shape(&self) -> ShapeKey {
        match self {
            CacheEntry::Hit { shape, .. } => *shape,
            CacheEntry::Miss { shape, .. } => *shape,
        }
    }
}

/// A single call-site PIC, generic over the cached handler type `H`.
#[derive(Debug)]
pub struct Pic<H> {
    entries: SmallVec<[CacheEntry<H>; 4]>,
    state: SizeState,
    window_accesses: u32,
    window_misses: u32,
}

impl<H: Clone> Default for Pic<H> {
    fn default() -> Self {
        Pic {
            entries: SmallVec::new(),
            state: SizeState::Size2,
            window_accesses: 0,
            window_misses: 0,
        }
    }
}

pub enum Probe<'a, H> {
    Hit(&'a H),
    NegativeHit(&'a str),
    Miss,
}

impl<H: Clone> Pic<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force a site straight to size-4 (the static `*_PIC_SIZE_4` flags,
    /// distinct from the adaptive 2→4 promotion in [`Pic::record_access`]).
    /// A no-op once the site has already been sized by either mechanism.
    pub fn force_size4(&mut self) {
        if matches!(self.state, SizeState::Size2) {
            self.state = SizeState::Size4;
        }
    }

    fn capacity(&self) -> usize {
        match self.state {
            SizeState::Size2 | SizeState::Frozen { .. } => 2,
            SizeState::Size4 => 4,
        }
    }

    /// Probe the cache for `shape`. On a positive or negative hit, moves the
    /// entry to the front (spec §4.4 "move-to-front order").
    pub fn probe(&mut self, shape: ShapeKey) -> Probe<'_, H> {
        if shape == UNSTABLE_SHAPE {
            return Probe::Miss;
        }
        if let Some(idx) = self.entries.iter().position(|e| e.shape() == shape) {
            if idx != 0 {
                self.entries[..=idx].rotate_right(1);
            }
            return match &self.entries[0] {
                CacheEntry::Hit { handler, .. } => Probe::Hit(handler),
                CacheEntry::Miss { message, .. } => Probe::NegativeHit(message),
            };
        }
        Probe::Miss
    }

    pub fn install(&mut self, shape: ShapeKey, handler: H) {
        self.install_entry(CacheEntry::Hit { shape, handler });
    }

    pub fn install_negative(&mut self, shape: ShapeKey, message: String) {
        self.install_entry(CacheEntry::Miss { shape, message });
    }

    fn install_entry(&mut self, entry: CacheEntry<H>) {
        if entry.shape() == UNSTABLE_SHAPE {
            return;
        }
        self.entries.retain(|e| e.shape() != entry.shape());
        let cap = self.capacity();
        self.entries.insert(0, entry);
        while self.entries.len() > cap {
            self.entries.pop();
        }
    }

    /// Record a hit/miss for the current 256-access window and run the
    /// adaptive state machine (spec §4.4). `is_method_site` lets
    /// `pic_adaptive_methods_only` restrict adaptive sizing to method-call
    /// sites, leaving field/index PICs pinned at their static size.
    pub fn record_access(&mut self, flags: PerfFlags, is_method_site: bool, was_miss: bool) {
        if !flags.pic_adaptive {
            return;
        }
        if flags.pic_adaptive_methods_only && !is_method_site {
            return;
        }
        self.window_accesses += 1;
        if was_miss {
            self.window_misses += 1;
        }
        if self.window_accesses < WINDOW_SIZE {
            return;
        }
        let miss_rate_pct = self.window_misses * 100 / self.window_accesses;
        self.window_accesses = 0;
        self.window_misses = 0;

        match self.state {
            SizeState::Size2 if miss_rate_pct > PROMOTE_MISS_RATE_PCT => {
                trace!(miss_rate_pct, "PIC promoted to size 4");
                self.state = SizeState::Size4;
            }
            SizeState::Size4 if flags.pic_heuristic && miss_rate_pct >= DEMOTE_MISS_RATE_PCT => {
                warn!(miss_rate_pct, "PIC demoted and frozen at size 2");
                self.state = SizeState::Frozen { remaining: FREEZE_WINDOWS };
                while self.entries.len() > 2 {
                    self.entries.pop();
                }
            }
            SizeState::Frozen { remaining } => {
                if remaining <= 1 {
                    trace!("PIC unfrozen back to size 2");
                    self.state = SizeState::Size2;
                } else {
                    self.state = SizeState::Frozen { remaining: remaining - 1 };
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_to_front_on_hit() {
        let mut pic: Pic<u32> = Pic::new();
        pic.install((1, 0), 10);
        pic.install((2, 0), 20);
        assert!(matches!(pic.probe((1, 0)), Probe::Hit(h) if *h == 10));
        // (1,0) should now be at the front.
        assert_eq!(pic.entries[0].shape(), (1, 0));
    }

    #[test]
    fn unstable_shape_never_caches() {
        let mut pic: Pic<u32> = Pic::new();
        pic.install(UNSTABLE_SHAPE, 99);
        assert!(matches!(pic.probe(UNSTABLE_SHAPE), Probe::Miss));
    }

    #[test]
    fn promotes_to_size_4_on_high_miss_rate() {
        let mut pic: Pic<u32> = Pic::new();
        let flags = PerfFlags {
            pic_adaptive: true,
            pic_heuristic: false,
            ..PerfFlags::all_off()
        };
        for _ in 0..60 {
            pic.record_access(flags, true, true);
        }
        for _ in 0..196 {
            pic.record_access(flags, true, false);
        }
        assert_eq!(pic.capacity(), 4);
    }

    #[test]
    fn freezes_and_thaws_after_four_windows() {
        let mut pic: Pic<u32> = Pic::new();
        let flags = PerfFlags {
            pic_adaptive: true,
            pic_heuristic: true,
            ..PerfFlags::all_off()
        };
        for _ in 0..60 {
            pic.record_access(flags, true, true);
        }
        for _ in 0..196 {
            pic.record_access(flags, true, false);
        }
        assert_eq!(pic.capacity(), 4);
        for _ in 0..70 {
            pic.record_access(flags, true, true);
        }
        for _ in 0..186 {
            pic.record_access(flags, true, false);
        }
        assert_eq!(pic.capacity(), 2);
        for _ in 0..(WINDOW_SIZE * FREEZE_WINDOWS) {
            pic.record_access(flags, true, false);
        }
        assert_eq!(pic.capacity(), 2);
    }

    #[test]
    fn negative_cache_entry_round_trips() {
        let mut pic: Pic<u32> = Pic::new();
        pic.install_negative((1, 0), "no such field `x`".to_string());
        match pic.probe((1, 0)) {
            Probe::NegativeHit(msg) => assert_eq!(msg, "no such field `x`"),
            _ => panic!("expected negative hit"),
        }
    }

    #[test]
    fn adaptive_methods_only_ignores_non_method_sites() {
        let mut pic: Pic<u32> = Pic::new();
        let flags = PerfFlags {
            pic_adaptive: true,
            pic_adaptive_methods_only: true,
            ..PerfFlags::all_off()
        };
        for _ in 0..(WINDOW_SIZE * 2) {
            pic.record_access(flags, false, true);
        }
        assert_eq!(pic.capacity(), 2);
        for _ in 0..WINDOW_SIZE {
            pic.record_access(flags, true, true);
        }
        assert_eq!(pic.capacity(), 4);
    }
}
