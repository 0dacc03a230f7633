//! Fixed-resolution timing wheel multiplexing recurring tasks onto one driver.
//!
//! The wheel is a circular array of slots, each holding the ids of tasks due
//! when the cursor reaches it. One external driver calls [`TimingWheel::advance`]
//! once per tick; everything here is plain data manipulation, so scheduling
//! behavior is testable without clocks. Intervals longer than one revolution
//! are carried by a per-task round counter. Fired tasks re-arm themselves at
//! their current interval, giving O(1) amortized insert, cancel and fire.

use std::collections::HashMap;
use std::time::Duration;

/// Handle identifying one scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

/// Per-task bookkeeping.
struct WheelEntry<T> {
    /// Full revolutions left before the task may fire.
    rounds: u64,
    /// Interval applied when the task re-arms.
    interval: Duration,
    payload: T,
}

/// The wheel itself. Callers provide external synchronization.
pub(crate) struct TimingWheel<T> {
    tick: Duration,
    slots: Vec<Vec<u64>>,
    cursor: usize,
    tasks: HashMap<u64, WheelEntry<T>>,
    next_id: u64,
}

impl<T: Clone> TimingWheel<T> {
    /// Creates a wheel with `slot_count` slots of `tick` resolution each.
    ///
    /// Both values must be non-zero; the scheduler configuration clamps them
    /// before construction.
    pub(crate) fn new(tick: Duration, slot_count: usize) -> Self {
        debug_assert!(!tick.is_zero());
        debug_assert!(slot_count > 0);
        Self {
            tick,
            slots: vec![Vec::new(); slot_count],
            cursor: 0,
            tasks: HashMap::new(),
            next_id: 0,
        }
    }

    /// Number of currently scheduled tasks.
    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Schedules a recurring task, first firing after `interval`.
    pub(crate) fn insert(&mut self, payload: T, interval: Duration) -> TaskHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.tasks.insert(
            id,
            WheelEntry {
                rounds: 0,
                interval,
                payload,
            },
        );
        self.arm(id, interval);
        TaskHandle(id)
    }

    /// Cancels a task. Unknown or already-cancelled handles are a no-op;
    /// returns whether a task was actually removed.
    ///
    /// The slot entry is dropped lazily the next time the cursor passes it.
    pub(crate) fn cancel(&mut self, handle: TaskHandle) -> bool {
        self.tasks.remove(&handle.0).is_some()
    }

    /// Updates the interval a task re-arms with.
    ///
    /// The currently armed fire keeps its old deadline; the new interval
    /// takes effect from the re-arm after it. Returns `true` only when the
    /// task exists and the interval actually changed.
    pub(crate) fn set_interval(&mut self, handle: TaskHandle, interval: Duration) -> bool {
        match self.tasks.get_mut(&handle.0) {
            Some(entry) if entry.interval != interval => {
                entry.interval = interval;
                true
            }
            _ => false,
        }
    }

    /// Moves the cursor one slot forward and returns the tasks firing there.
    ///
    /// Fired tasks are re-armed before this returns; tasks with remaining
    /// rounds stay in the slot with their counter decremented.
    pub(crate) fn advance(&mut self) -> Vec<(TaskHandle, T)> {
        self.cursor = (self.cursor + 1) % self.slots.len();
        let drained = std::mem::take(&mut self.slots[self.cursor]);

        let mut due = Vec::new();
        let mut waiting = Vec::new();
        for id in drained {
            let Some(entry) = self.tasks.get_mut(&id) else {
                // Cancelled since it was armed.
                continue;
            };
            if entry.rounds > 0 {
                entry.rounds -= 1;
                waiting.push(id);
            } else {
                due.push((TaskHandle(id), entry.payload.clone()));
            }
        }
        self.slots[self.cursor] = waiting;

        for (handle, _) in &due {
            let interval = self.tasks.get(&handle.0).map(|entry| entry.interval);
            if let Some(interval) = interval {
                self.arm(handle.0, interval);
            }
        }
        due
    }

    /// Places `id` into the slot due `interval` from the current cursor.
    fn arm(&mut self, id: u64, interval: Duration) {
        let slot_count = self.slots.len() as u64;
        let ticks = self.ticks_for(interval);
        let slot = ((self.cursor as u64 + ticks) % slot_count) as usize;
        let rounds = (ticks - 1) / slot_count;
        if let Some(entry) = self.tasks.get_mut(&id) {
            entry.rounds = rounds;
        }
        self.slots[slot].push(id);
    }

    /// Converts an interval to a tick count, rounding up, minimum one tick.
    fn ticks_for(&self, interval: Duration) -> u64 {
        let ticks = interval.as_nanos().div_ceil(self.tick.as_nanos());
        (ticks.max(1)) as u64
    }
}
