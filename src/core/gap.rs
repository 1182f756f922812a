//! Gap-based timeline fitting.
//!
//! A worker timeline is a set of gaps. An *open* gap is capacity that becomes free at
//! `start` (when `origin` finishes) and stays free until something consumes it. An
//! *idle* gap is a closed window `[start, end)` that was left over after a later
//! action claimed the capacity. Actions are placed in an idle gap when one admits them
//! at least as early as the open gaps would; otherwise open gaps are consumed greedily
//! in ascending start.

use serde::{Deserialize, Serialize};

use crate::core::action::ActionId;
use crate::core::resources::ResourceDescription;

/// Free-capacity interval on a worker timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    /// When the capacity becomes free (ms).
    pub start: u64,
    /// When it is claimed again; `u64::MAX` for open gaps.
    pub end: u64,
    /// Action whose end frees the capacity, if any.
    pub origin: Option<ActionId>,
    /// Capacity free during the window.
    pub capacity: ResourceDescription,
}

impl Gap {
    /// Whether the gap is unbounded on the right.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.end == u64::MAX
    }

    /// Start time at which `requirement` fits this gap, if it fits at all.
    #[must_use]
    pub fn fits(&self, requirement: &ResourceDescription, release: u64, duration: u64) -> Option<u64> {
        let start = release.max(self.start);
        let fits = self.capacity.contains(requirement)
            && start < self.end
            && (self.is_open() || start.saturating_add(duration) <= self.end);
        fits.then_some(start)
    }
}

/// Outcome of placing one action on a timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Projected start (ms).
    pub start: u64,
    /// Projected end (ms).
    pub end: u64,
    /// Actions whose capacity this placement waits on.
    pub predecessors: Vec<ActionId>,
}

/// Mutable projection of one worker's capacity over time.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    open: Vec<Gap>,
    idle: Vec<Gap>,
}

impl Timeline {
    /// Timeline with `free` capacity available from `now` on.
    #[must_use]
    pub fn new(now: u64, free: ResourceDescription) -> Self {
        let mut timeline = Self::default();
        if !free.is_empty() {
            timeline.open.push(Gap {
                start: now,
                end: u64::MAX,
                origin: None,
                capacity: free,
            });
        }
        timeline
    }

    /// Register capacity freed at `at` by `origin`.
    pub fn add_release(&mut self, at: u64, origin: ActionId, capacity: ResourceDescription) {
        if capacity.is_empty() {
            return;
        }
        self.open.push(Gap {
            start: at,
            end: u64::MAX,
            origin: Some(origin),
            capacity,
        });
    }

    fn sort_open(&mut self) {
        self.open.sort_by_key(|g| (g.start, g.origin));
    }

    fn best_idle(&self, requirement: &ResourceDescription, release: u64, duration: u64) -> Option<(u64, usize)> {
        self.idle
            .iter()
            .enumerate()
            .filter_map(|(i, g)| g.fits(requirement, release, duration).map(|s| (s, i)))
            .min()
    }

    fn open_start(&self, requirement: &ResourceDescription, release: u64) -> u64 {
        let mut open: Vec<&Gap> = self.open.iter().collect();
        open.sort_by_key(|g| (g.start, g.origin));
        let mut need = *requirement;
        let mut start = release;
        for gap in open {
            if need.is_empty() {
                break;
            }
            let take = gap.capacity.intersection(&need);
            if take.is_empty() {
                continue;
            }
            need.reduce(&take);
            start = start.max(gap.start);
        }
        start
    }

    /// Earliest start the timeline admits for `requirement`, without placing it.
    #[must_use]
    pub fn earliest_start(&self, requirement: &ResourceDescription, release: u64, duration: u64) -> u64 {
        if requirement.is_empty() {
            return release;
        }
        let open = self.open_start(requirement, release);
        match self.best_idle(requirement, release, duration) {
            Some((idle, _)) if idle <= open => idle,
            _ => open,
        }
    }

    /// Place `id` and return its projected window and capacity predecessors.
    pub fn place(
        &mut self,
        id: ActionId,
        requirement: &ResourceDescription,
        release: u64,
        duration: u64,
    ) -> Placement {
        if requirement.is_empty() {
            return Placement {
                start: release,
                end: release.saturating_add(duration),
                predecessors: Vec::new(),
            };
        }
        let open_start = self.open_start(requirement, release);
        let mut predecessors = Vec::new();
        let start = match self.best_idle(requirement, release, duration) {
            Some((start, index)) if start <= open_start => {
                let gap = &mut self.idle[index];
                gap.capacity.reduce(requirement);
                predecessors.extend(gap.origin);
                let window_end = gap.end;
                if gap.capacity.is_empty() {
                    self.idle.remove(index);
                }
                let end = start.saturating_add(duration);
                // Capacity returns to the window only, never past its end.
                if end < window_end {
                    self.idle.push(Gap {
                        start: end,
                        end: window_end,
                        origin: Some(id),
                        capacity: *requirement,
                    });
                }
                predecessors.sort_unstable();
                predecessors.dedup();
                return Placement {
                    start,
                    end,
                    predecessors,
                };
            }
            _ => {
                self.sort_open();
                let mut need = *requirement;
                for gap in &mut self.open {
                    if need.is_empty() {
                        break;
                    }
                    let take = gap.capacity.intersection(&need);
                    if take.is_empty() {
                        continue;
                    }
                    need.reduce(&take);
                    if gap.start < open_start {
                        self.idle.push(Gap {
                            start: gap.start,
                            end: open_start,
                            origin: gap.origin,
                            capacity: take,
                        });
                    }
                    gap.capacity.reduce(&take);
                    predecessors.extend(gap.origin);
                }
                self.open.retain(|g| !g.capacity.is_empty());
                open_start
            }
        };
        let end = start.saturating_add(duration);
        self.add_release(end, id, *requirement);
        predecessors.sort_unstable();
        predecessors.dedup();
        Placement {
            start,
            end,
            predecessors,
        }
    }

    /// Idle windows, ascending by start.
    #[must_use]
    pub fn idle_gaps(&self) -> Vec<Gap> {
        let mut gaps = self.idle.clone();
        gaps.sort_by_key(|g| (g.start, g.end));
        gaps
    }

    /// Open gaps, ascending by start.
    #[must_use]
    pub fn open_gaps(&self) -> Vec<Gap> {
        let mut gaps = self.open.clone();
        gaps.sort_by_key(|g| (g.start, g.origin));
        gaps
    }

    /// All gaps.
    #[must_use]
    pub fn gaps(&self) -> Vec<Gap> {
        let mut gaps = self.idle_gaps();
        gaps.extend(self.open_gaps());
        gaps
    }
}
