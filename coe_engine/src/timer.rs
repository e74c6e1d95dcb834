// Timeouts and intervals measured in update pulses.
//
// A `TimerManager` counts the update pulses of its owner (a controller's
// `on_update`, typically) rather than wall-clock time, so every instance of a
// play sees its timers fire at the same point in the tick stream.
//
// Scheduling follows a discrete-event model: timers sit in a priority queue
// ordered by `(due_pulse, sequence)`. `pulse()` advances the counter and pops
// everything that is due. Cleared timers are dropped from the timer table
// only; their stale queue entries are skipped lazily when they surface.
// Intervals re-enter the queue at `due + interval` before their callback
// runs, so a callback that clears its own interval takes effect.
//
// Callbacks run with no borrow held, so they may schedule or clear timers.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::rc::Rc;

use crate::error::{EngineError, EngineResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

struct Scheduled {
    due: u64,
    sequence: u64,
    id: TimerId,
}

// Min-heap on (due, sequence).
impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.sequence == other.sequence
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct Timer {
    /// `None` for one-shot timeouts.
    interval: Option<u64>,
    callback: Rc<dyn Fn()>,
}

#[derive(Default)]
struct TimerState {
    pulse: u64,
    next_id: u64,
    next_sequence: u64,
    heap: BinaryHeap<Scheduled>,
    timers: BTreeMap<TimerId, Timer>,
    destroyed: bool,
}

impl TimerState {
    fn schedule(&mut self, due: u64, id: TimerId) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Scheduled { due, sequence, id });
    }

    fn add(&mut self, delay: u64, interval: Option<u64>, callback: Rc<dyn Fn()>) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.timers.insert(id, Timer { interval, callback });
        self.schedule(self.pulse + delay, id);
        id
    }

    /// Pop the next due timer and return its callback, rescheduling
    /// intervals and forgetting timeouts.
    fn pop_due(&mut self) -> Option<Rc<dyn Fn()>> {
        while self.heap.peek().is_some_and(|s| s.due <= self.pulse) {
            let Some(entry) = self.heap.pop() else {
                break;
            };
            let Some(timer) = self.timers.get(&entry.id) else {
                continue;
            };
            let callback = timer.callback.clone();
            match timer.interval {
                Some(interval) => self.schedule(entry.due + interval, entry.id),
                None => {
                    self.timers.remove(&entry.id);
                }
            }
            return Some(callback);
        }
        None
    }
}

#[derive(Default)]
pub struct TimerManager {
    state: RefCell<TimerState>,
}

impl TimerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` once, `pulses` update pulses from now. Zero is treated
    /// as one: a timeout never fires within the pulse that scheduled it.
    pub fn set_timeout(&self, callback: impl Fn() + 'static, pulses: u64) -> EngineResult<TimerId> {
        let mut state = self.state.borrow_mut();
        if state.destroyed {
            return Err(EngineError::TimerManagerDestroyed);
        }
        Ok(state.add(pulses.max(1), None, Rc::new(callback)))
    }

    /// Run `callback` every `interval` update pulses.
    pub fn set_interval(
        &self,
        callback: impl Fn() + 'static,
        interval: u64,
    ) -> EngineResult<TimerId> {
        let mut state = self.state.borrow_mut();
        if state.destroyed {
            return Err(EngineError::TimerManagerDestroyed);
        }
        if interval == 0 {
            return Err(EngineError::ZeroInterval);
        }
        Ok(state.add(interval, Some(interval), Rc::new(callback)))
    }

    /// Cancel a pending timeout. Returns false if `id` is not a pending
    /// timeout.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        self.clear(id, false)
    }

    /// Cancel an interval. Returns false if `id` is not a live interval.
    pub fn clear_interval(&self, id: TimerId) -> bool {
        self.clear(id, true)
    }

    fn clear(&self, id: TimerId, interval: bool) -> bool {
        let mut state = self.state.borrow_mut();
        let matches = state
            .timers
            .get(&id)
            .is_some_and(|t| t.interval.is_some() == interval);
        if matches {
            state.timers.remove(&id);
        }
        matches
    }

    /// Advance one update pulse and run everything that became due.
    pub fn pulse(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.destroyed {
                return;
            }
            state.pulse += 1;
        }
        loop {
            let next = self.state.borrow_mut().pop_due();
            match next {
                Some(callback) => callback(),
                None => break,
            }
        }
    }

    pub fn current_pulse(&self) -> u64 {
        self.state.borrow().pulse
    }

    /// Number of live timers (timeouts not yet fired plus intervals).
    pub fn len(&self) -> usize {
        self.state.borrow().timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().timers.is_empty()
    }

    pub fn destroy(&self) -> EngineResult<()> {
        let mut state = self.state.borrow_mut();
        if state.destroyed {
            return Err(EngineError::AlreadyDestroyed("timer manager"));
        }
        state.destroyed = true;
        state.timers.clear();
        state.heap.clear();
        Ok(())
    }
}
