//! Slot planning for the incremental cache.
//!
//! A slot is a half-open interval `[slot_start, slot_end)` aligned to
//! absolute epoch hours, so two requests at different `now` share most of
//! their slots. Finalized slots (`slot_end <= now`) aggregate immutable
//! facts and are cached forever; the trailing live slot is recomputed on
//! every miss and never persisted.

use serde::{Deserialize, Serialize};

use crate::utils::Window;

pub const SLOT_SECONDS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpan {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone)]
pub struct SlotPlan {
    /// Aligned start of the effective window. The effective window is
    /// `[floor(now/slot)*slot - window_seconds, now)`, up to one slot longer
    /// than the nominal window so that its finalized part tiles exactly.
    pub window_start: i64,
    pub finalized: Vec<SlotSpan>,
    pub live: Option<SlotSpan>,
}

impl SlotPlan {
    pub fn slot_count(&self) -> usize {
        self.finalized.len() + usize::from(self.live.is_some())
    }
}

pub fn plan(window: Window, now: i64) -> SlotPlan {
    let aligned_now = now - now.rem_euclid(SLOT_SECONDS);
    let window_start = aligned_now - window.seconds();

    let mut finalized = Vec::with_capacity((window.seconds() / SLOT_SECONDS) as usize);
    let mut start = window_start;
    while start < aligned_now {
        finalized.push(SlotSpan { start, end: start + SLOT_SECONDS });
        start += SLOT_SECONDS;
    }

    let live = if now > aligned_now {
        Some(SlotSpan { start: aligned_now, end: now })
    } else {
        None
    };

    SlotPlan { window_start, finalized, live }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_hour_aligned_and_tile_the_window() {
        let now = 1_700_000_000; // not hour-aligned
        let plan = plan(Window::D3, now);

        assert_eq!(plan.finalized.len(), 72);
        for span in &plan.finalized {
            assert_eq!(span.start % SLOT_SECONDS, 0);
            assert_eq!(span.end - span.start, SLOT_SECONDS);
        }
        // Contiguous tiling from window_start up to the live slot.
        let mut cursor = plan.window_start;
        for span in &plan.finalized {
            assert_eq!(span.start, cursor);
            cursor = span.end;
        }
        let live = plan.live.unwrap();
        assert_eq!(live.start, cursor);
        assert_eq!(live.end, now);
    }

    #[test]
    fn aligned_now_has_no_live_slot() {
        let now = 1_700_000_000 / SLOT_SECONDS * SLOT_SECONDS;
        let plan = plan(Window::D7, now);
        assert!(plan.live.is_none());
        assert_eq!(plan.finalized.len(), 7 * 24);
        assert_eq!(plan.finalized.last().unwrap().end, now);
    }

    #[test]
    fn two_requests_share_finalized_slots() {
        let base = 1_700_000_000;
        let a = plan(Window::D3, base);
        let b = plan(Window::D3, base + 120); // same hour, later
        assert_eq!(a.finalized, b.finalized);
        assert_ne!(a.live, b.live);
    }

    #[test]
    fn advancing_one_hour_shifts_one_slot() {
        let base = 1_700_000_000;
        let a = plan(Window::D3, base);
        let b = plan(Window::D3, base + SLOT_SECONDS);

        // All of a's finalized slots except the first remain in b.
        for span in &a.finalized[1..] {
            assert!(b.finalized.contains(span));
        }
        // b gained exactly one new finalized slot: a's live hour.
        let new_slot = b.finalized.last().unwrap();
        assert_eq!(new_slot.start, a.live.unwrap().start);
    }
}
