use crate::task::{Task, TaskId};
use slotmap::SlotMap;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Heap entry. Ordering is reversed so `BinaryHeap` pops the smallest
/// `(sort_index, seq)` first.
#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    sort_index: f64,
    seq: u64,
    id: TaskId,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .sort_index
            .total_cmp(&self.sort_index)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

enum Head {
    Live(TaskId),
    Cancelled,
    Stale,
}

/// Ready and delayed tasks. Task records live in a slot map; the two heaps only
/// hold keys into it. Removing a record without touching the heaps leaves a
/// stale entry behind, which is dropped whenever it reaches the top.
#[derive(Default)]
pub struct TaskQueue {
    tasks: SlotMap<TaskId, Task>,
    ready: BinaryHeap<QueueEntry>,
    delayed: BinaryHeap<QueueEntry>,
    /// Records that are not cancelled.
    live: usize,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mut task: Task, now: f64) -> TaskId {
        let delayed = task.start_time > now;
        task.sort_index = if delayed {
            task.start_time
        } else {
            task.expiration_time
        };
        let sort_index = task.sort_index;
        let seq = task.seq;
        let id = self.tasks.insert(task);
        self.live += 1;
        let entry = QueueEntry { sort_index, seq, id };
        if delayed {
            self.delayed.push(entry);
        } else {
            self.ready.push(entry);
        }
        id
    }

    /// Move every delayed task whose start time has passed into the ready heap.
    /// Returns how many were promoted.
    pub fn advance_timers(&mut self, now: f64) -> usize {
        let mut promoted = 0;
        while let Some(entry) = self.delayed.peek().copied() {
            match self.tasks.get_mut(entry.id) {
                None => {
                    self.delayed.pop();
                }
                Some(task) if task.cancelled => {
                    self.delayed.pop();
                    self.tasks.remove(entry.id);
                }
                Some(task) if task.start_time <= now => {
                    self.delayed.pop();
                    task.sort_index = task.expiration_time;
                    self.ready.push(QueueEntry {
                        sort_index: task.sort_index,
                        seq: task.seq,
                        id: entry.id,
                    });
                    promoted += 1;
                }
                Some(_) => break,
            }
        }
        promoted
    }

    fn ready_head(&self) -> Option<Head> {
        let entry = self.ready.peek()?;
        Some(match self.tasks.get(entry.id) {
            None => Head::Stale,
            Some(task) if task.cancelled => Head::Cancelled,
            Some(_) => Head::Live(entry.id),
        })
    }

    /// Highest-priority ready task, after promoting due timers. Cancelled and
    /// stale entries met on the way are discarded.
    pub fn peek(&mut self, now: f64) -> Option<TaskId> {
        self.advance_timers(now);
        loop {
            match self.ready_head()? {
                Head::Live(id) => return Some(id),
                Head::Cancelled => {
                    if let Some(entry) = self.ready.pop() {
                        self.tasks.remove(entry.id);
                    }
                }
                Head::Stale => {
                    self.ready.pop();
                }
            }
        }
    }

    pub fn pop(&mut self, now: f64) -> Option<Task> {
        let id = self.peek(now)?;
        self.ready.pop();
        self.release(id)
    }

    /// Logical delete. The heap is left untouched; the record is discarded once
    /// it surfaces. The callback is dropped right away so captured state is
    /// released. Returns false if the task is unknown or already cancelled.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        match self.tasks.get_mut(id) {
            Some(task) if !task.cancelled => {
                task.cancelled = true;
                task.callback = None;
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    /// Physically release a finished task.
    pub fn complete(&mut self, id: TaskId) -> Option<Task> {
        if self.ready.peek().is_some_and(|entry| entry.id == id) {
            self.ready.pop();
        }
        self.release(id)
    }

    fn release(&mut self, id: TaskId) -> Option<Task> {
        let task = self.tasks.remove(id)?;
        if !task.cancelled {
            self.live -= 1;
        }
        Some(task)
    }

    /// Start time of the earliest live delayed task.
    pub fn next_timer(&mut self) -> Option<f64> {
        while let Some(entry) = self.delayed.peek().copied() {
            match self.tasks.get(entry.id) {
                Some(task) if !task.cancelled => return Some(task.start_time),
                Some(_) => {
                    self.delayed.pop();
                    self.tasks.remove(entry.id);
                }
                None => {
                    self.delayed.pop();
                }
            }
        }
        None
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    /// Tasks that are neither finished nor cancelled, including one whose
    /// callback is running.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Heap sizes, including entries that are waiting to be discarded.
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn delayed_len(&self) -> usize {
        self.delayed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority::Priority;
    use crate::task::Callback;

    fn task(seq: u64, start: f64, expiration: f64) -> Task {
        Task::new(seq, Priority::Normal, start, expiration, Callback::once(|_| {}))
    }

    #[test]
    fn pops_by_expiration_then_seq() {
        let mut queue = TaskQueue::new();
        queue.insert(task(0, 0.0, 300.0), 0.0);
        queue.insert(task(1, 0.0, 100.0), 0.0);
        queue.insert(task(2, 0.0, 300.0), 0.0);
        queue.insert(task(3, 0.0, 100.0), 0.0);

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop(0.0).map(|t| t.seq)).collect();
        assert_eq!(order, vec![1, 3, 0, 2]);
    }

    #[test]
    fn delayed_tasks_wait_for_start_time() {
        let mut queue = TaskQueue::new();
        queue.insert(task(0, 50.0, 60.0), 0.0);
        assert_eq!(queue.delayed_len(), 1);
        assert!(queue.peek(10.0).is_none());
        assert_eq!(queue.next_timer(), Some(50.0));

        let id = queue.peek(50.0).unwrap();
        let promoted = queue.get(id).unwrap();
        assert_eq!(promoted.sort_index, 60.0);
        assert_eq!(queue.delayed_len(), 0);
        assert_eq!(queue.next_timer(), None);
    }

    #[test]
    fn cancelled_tasks_are_skipped() {
        let mut queue = TaskQueue::new();
        let a = queue.insert(task(0, 0.0, 10.0), 0.0);
        queue.insert(task(1, 0.0, 20.0), 0.0);
        assert!(queue.cancel(a));
        assert!(!queue.cancel(a));
        // still physically present until it surfaces
        assert_eq!(queue.ready_len(), 2);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.pop(0.0).map(|t| t.seq), Some(1));
        assert!(queue.get(a).is_none());
        assert!(queue.pop(0.0).is_none());
    }

    #[test]
    fn cancelled_delayed_task_is_never_promoted() {
        let mut queue = TaskQueue::new();
        let a = queue.insert(task(0, 100.0, 200.0), 0.0);
        queue.cancel(a);
        assert_eq!(queue.next_timer(), None);
        assert!(queue.peek(500.0).is_none());
    }

    #[test]
    fn completed_task_leaves_stale_entry_behind() {
        let mut queue = TaskQueue::new();
        let a = queue.insert(task(0, 0.0, 50.0), 0.0);
        // a newer, more urgent task lands on top before `a` finishes
        queue.insert(task(1, 0.0, 10.0), 0.0);
        assert!(queue.complete(a).is_some());
        assert_eq!(queue.ready_len(), 2);

        assert_eq!(queue.pop(0.0).map(|t| t.seq), Some(1));
        assert!(queue.pop(0.0).is_none());
        assert_eq!(queue.ready_len(), 0);
    }

    #[test]
    fn live_count_tracks_cancel_and_completion() {
        let mut queue = TaskQueue::new();
        let a = queue.insert(task(0, 0.0, 10.0), 0.0);
        let b = queue.insert(task(1, 0.0, 20.0), 0.0);
        let c = queue.insert(task(2, 50.0, 70.0), 0.0);
        assert_eq!(queue.len(), 3);

        queue.cancel(c);
        queue.cancel(c);
        assert_eq!(queue.len(), 2);

        // running: the callback is out but the record is still counted
        let callback = queue.get_mut(a).and_then(|t| t.callback.take());
        assert!(callback.is_some());
        assert_eq!(queue.len(), 2);
        queue.complete(a);
        assert_eq!(queue.len(), 1);

        // cancelled while running, then completed: counted once
        queue.get_mut(b).and_then(|t| t.callback.take());
        assert!(queue.cancel(b));
        assert_eq!(queue.len(), 0);
        queue.complete(b);
        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());

        // the cancelled timer is discarded without touching the count
        assert_eq!(queue.next_timer(), None);
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.delayed_len(), 0);
    }
}
