use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Handle to a repeating task, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fired<T> {
    Once(T),
    Repeating(TaskHandle),
}

#[derive(Debug)]
struct Repeating {
    period: u64,
    next_due: u64,
}

/// Tick-driven scheduler for one-shot and repeating work.
///
/// Everything runs on the caller's thread when `advance` is called once per
/// host tick. One-shot tasks carry their payload by value.
#[derive(Debug)]
pub struct TickScheduler<T> {
    tick: u64,
    next_seq: u64,
    /// (due tick, sequence) so equal due ticks fire in scheduling order.
    queue: BinaryHeap<Reverse<(u64, u64)>>,
    pending: HashMap<u64, T>,
    repeating: HashMap<TaskHandle, Repeating>,
}

impl<T> Default for TickScheduler<T> {
    fn default() -> Self {
        TickScheduler {
            tick: 0,
            next_seq: 0,
            queue: BinaryHeap::new(),
            pending: HashMap::new(),
            repeating: HashMap::new(),
        }
    }
}

impl<T> TickScheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Run `task` after `delay_ticks` more calls to `advance` (minimum 1).
    pub fn schedule_once(&mut self, delay_ticks: u32, task: T) {
        let seq = self.bump();
        let due = self.tick + u64::from(delay_ticks.max(1));
        self.queue.push(Reverse((due, seq)));
        self.pending.insert(seq, task);
    }

    /// Fire every `period_ticks`, first after `initial_delay` ticks.
    pub fn schedule_repeating(&mut self, initial_delay: u32, period_ticks: u32) -> TaskHandle {
        let handle = TaskHandle(self.bump());
        self.repeating.insert(
            handle,
            Repeating {
                period: u64::from(period_ticks.max(1)),
                next_due: self.tick + u64::from(initial_delay.max(1)),
            },
        );
        handle
    }

    /// Cancel a repeating task. Returns false if it was not scheduled.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        self.repeating.remove(&handle).is_some()
    }

    pub fn pending_once(&self) -> usize {
        self.pending.len()
    }

    /// Move to the next tick and return everything due, repeating tasks first.
    pub fn advance(&mut self) -> Vec<Fired<T>> {
        self.tick += 1;
        let now = self.tick;
        let mut fired = Vec::new();

        let mut due_repeating: Vec<TaskHandle> = self
            .repeating
            .iter_mut()
            .filter(|(_, r)| r.next_due <= now)
            .map(|(h, r)| {
                r.next_due = now + r.period;
                *h
            })
            .collect();
        due_repeating.sort();
        fired.extend(due_repeating.into_iter().map(Fired::Repeating));

        while let Some(&Reverse((due, seq))) = self.queue.peek() {
            if due > now {
                break;
            }
            self.queue.pop();
            if let Some(task) = self.pending.remove(&seq) {
                fired.push(Fired::Once(task));
            }
        }
        fired
    }

    fn bump(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
