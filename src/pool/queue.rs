//! Circular task queue with head/tail indices
//!
//! Growth moves pending tasks to the front of the new slot array, so FIFO
//! order survives growing a queue whose contents wrap around the end.

use super::Task;

pub(crate) struct TaskQueue {
    slots: Vec<Option<Task>>,
    head: usize,
    tail: usize,
    pending: usize,
}

impl TaskQueue {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            slots: (0..size).map(|_| None).collect(),
            head: 0,
            tail: 0,
            pending: 0,
        }
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn pending(&self) -> usize {
        self.pending
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.pending == self.slots.len()
    }

    pub(crate) fn push(&mut self, task: Task) {
        debug_assert!(!self.is_full(), "push into a full task queue");
        self.slots[self.tail] = Some(task);
        self.tail = (self.tail + 1) % self.size();
        self.pending += 1;
    }

    pub(crate) fn pop(&mut self) -> Option<Task> {
        if self.pending == 0 {
            return None;
        }
        let task = self.slots[self.head].take();
        self.head = (self.head + 1) % self.size();
        self.pending -= 1;
        task
    }

    /// Reallocate to `new_size` slots. Returns false, leaving the queue
    /// untouched, if `new_size` is not larger or the allocation fails.
    pub(crate) fn grow(&mut self, new_size: usize) -> bool {
        if new_size <= self.size() {
            return false;
        }

        let mut slots = Vec::new();
        if slots.try_reserve_exact(new_size).is_err() {
            return false;
        }

        let size = self.size();
        for i in 0..self.pending {
            slots.push(self.slots[(self.head + i) % size].take());
        }
        slots.resize_with(new_size, || None);

        self.slots = slots;
        self.head = 0;
        self.tail = self.pending;
        true
    }

    /// Remove every pending task, oldest first.
    pub(crate) fn take_all(&mut self) -> Vec<Task> {
        let mut tasks = Vec::with_capacity(self.pending);
        while let Some(task) = self.pop() {
            tasks.push(task);
        }
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording(log: &Arc<Mutex<Vec<usize>>>, id: usize) -> Task {
        let log = Arc::clone(log);
        Task::new(move || log.lock().unwrap().push(id))
    }

    fn run_all(queue: &mut TaskQueue) {
        while let Some(task) = queue.pop() {
            task.run();
        }
    }

    #[test]
    fn test_fifo_with_wraparound() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = TaskQueue::new(3);

        for round in 0..4 {
            for i in 0..3 {
                queue.push(recording(&log, round * 3 + i));
            }
            assert!(queue.is_full());
            run_all(&mut queue);
        }

        assert_eq!(*log.lock().unwrap(), (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_grow_preserves_order_when_wrapped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = TaskQueue::new(4);

        queue.push(recording(&log, 100));
        queue.push(recording(&log, 101));
        queue.pop().unwrap().run();
        queue.pop().unwrap().run();

        // head = tail = 2; fill so the contents wrap
        for i in 0..4 {
            queue.push(recording(&log, i));
        }
        assert!(queue.is_full());

        assert!(queue.grow(8));
        assert_eq!(queue.size(), 8);
        assert_eq!(queue.pending(), 4);
        queue.push(recording(&log, 4));

        run_all(&mut queue);
        assert_eq!(*log.lock().unwrap(), vec![100, 101, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_grow_rejects_smaller_size() {
        let mut queue = TaskQueue::new(4);
        assert!(!queue.grow(4));
        assert!(!queue.grow(2));
        assert_eq!(queue.size(), 4);
    }

    #[test]
    fn test_take_all() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = TaskQueue::new(4);
        for i in 0..3 {
            queue.push(recording(&log, i));
        }

        let tasks = queue.take_all();
        assert_eq!(tasks.len(), 3);
        assert_eq!(queue.pending(), 0);
        assert!(queue.pop().is_none());
        assert!(log.lock().unwrap().is_empty());
    }
}
