//! A nested stash-slot time wheel keyed by wall-clock milliseconds
//! (spec.md §4.F), grounded on `examples/original_source/src/scheduler.h`'s
//! `StashSlots`/`StashValues` nesting.
//!
//! Four fixed levels: ten 1 ms slots, ten 50 ms slots, twelve 500 ms
//! slots, 4800 × 18 s slots — chosen to cover sub-second debouncing up to
//! the ~24-hour range with coarsening granularity at longer horizons.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Level widths and slot counts, outermost (coarsest) last.
const LEVELS: [(u64, usize); 4] = [(1, 10), (50, 10), (500, 12), (18_000, 4800)];

/// A handle letting a caller cancel a scheduled task before it fires.
#[derive(Clone)]
pub struct TaskHandle {
    cleared: Arc<AtomicBool>,
}

impl TaskHandle {
    /// One-shot compare-exchange: clears the task, returns `true` if this
    /// call is the one that cleared it (spec.md §4.F).
    pub fn clear(&self) -> bool {
        !self.cleared.swap(true, Ordering::SeqCst)
    }

    pub fn is_cleared(&self) -> bool {
        self.cleared.load(Ordering::SeqCst)
    }
}

struct ScheduledTask {
    wakeup_ms: u64,
    cleared: Arc<AtomicBool>,
    run: Box<dyn FnOnce() + Send>,
}

struct Level {
    slot_width_ms: u64,
    slots: Vec<VecDeque<ScheduledTask>>,
}

impl Level {
    fn new(slot_width_ms: u64, num_slots: usize) -> Self {
        Level {
            slot_width_ms,
            slots: (0..num_slots).map(|_| VecDeque::new()).collect(),
        }
    }

    fn capacity_ms(&self) -> u64 {
        self.slot_width_ms * self.slots.len() as u64
    }

    fn slot_index(&self, wakeup_ms: u64) -> usize {
        ((wakeup_ms / self.slot_width_ms) as usize) % self.slots.len()
    }
}

/// The time wheel itself. `peep`/`next` perform a linear scan across all
/// slots rather than a cursor-advance cascade — a deliberate simplification
/// over a production hierarchical timer (acceptable at this scale; see
/// DESIGN.md).
pub struct TimeWheel {
    levels: [Level; 4],
}

impl Default for TimeWheel {
    fn default() -> Self {
        TimeWheel {
            levels: LEVELS.map(|(width, count)| Level::new(width, count)),
        }
    }
}

impl TimeWheel {
    pub fn new() -> Self {
        Self::default()
    }

    /// `add(task, wakeup_ms)`: bucket `task` in the coarsest level able to
    /// represent a delay of `wakeup_ms - now_ms`, falling back to the
    /// widest level if the delay exceeds every level's capacity.
    pub fn add<F>(&mut self, now_ms: u64, wakeup_ms: u64, run: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let cleared = Arc::new(AtomicBool::new(false));
        let task = ScheduledTask {
            wakeup_ms,
            cleared: cleared.clone(),
            run: Box::new(run),
        };
        let delay = wakeup_ms.saturating_sub(now_ms);
        let level_idx = self
            .levels
            .iter()
            .position(|level| delay < level.capacity_ms())
            .unwrap_or(self.levels.len() - 1);
        let level = &mut self.levels[level_idx];
        let slot = level.slot_index(wakeup_ms);
        level.slots[slot].push_back(task);
        TaskHandle { cleared }
    }

    /// Non-destructively return the earliest scheduled wakeup, ignoring
    /// already-cleared tasks.
    pub fn peep(&self) -> Option<u64> {
        self.levels
            .iter()
            .flat_map(|level| level.slots.iter())
            .flat_map(|slot| slot.iter())
            .filter(|task| !task.cleared.load(Ordering::SeqCst))
            .map(|task| task.wakeup_ms)
            .min()
    }

    /// Destructively drain every task whose `wakeup_ms <= final_key`, in
    /// ascending wakeup order, returning their closures for the caller to
    /// run (inline or on a worker pool). Cleared tasks are dropped without
    /// being returned. `keep_going` is accepted for interface parity with
    /// spec.md §4.F; this implementation always drains every ready task in
    /// one pass regardless of its value.
    pub fn next(&mut self, final_key: u64, _keep_going: bool) -> Vec<Box<dyn FnOnce() + Send>> {
        let mut ready = Vec::new();
        for level in &mut self.levels {
            for slot in &mut level.slots {
                let mut remaining = VecDeque::new();
                while let Some(task) = slot.pop_front() {
                    if task.wakeup_ms <= final_key {
                        ready.push(task);
                    } else {
                        remaining.push_back(task);
                    }
                }
                *slot = remaining;
            }
        }
        ready.sort_by_key(|t| t.wakeup_ms);
        ready
            .into_iter()
            .filter_map(|task| {
                if task.cleared.swap(true, Ordering::SeqCst) {
                    None
                } else {
                    Some(task.run)
                }
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(|level| level.slots.iter().all(VecDeque::is_empty))
    }
}
