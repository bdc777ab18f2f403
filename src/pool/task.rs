//! Unit of work accepted by the pool

use std::fmt;

/// An opaque job. The pool never looks inside; it only runs it once.
pub struct Task {
    job: Box<dyn FnOnce() + Send + 'static>,
}

impl Task {
    pub fn new<F>(job: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self { job: Box::new(job) }
    }

    /// A task in entry-point form: `entry(input, output)`.
    ///
    /// `input` carries the work item; `output` is where the task reports its
    /// result (a channel sender, a shared slot, a buffer half).
    pub fn with_args<F, I, O>(entry: F, input: I, output: O) -> Self
    where
        F: FnOnce(I, O) + Send + 'static,
        I: Send + 'static,
        O: Send + 'static,
    {
        Self::new(move || entry(input, output))
    }

    #[inline]
    pub(crate) fn run(self) {
        (self.job)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Task { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_with_args_passes_both_slots() {
        let (tx, rx) = mpsc::channel();
        let task =
            Task::with_args(|n: u32, out: mpsc::Sender<u32>| out.send(n * 2).unwrap(), 21, tx);
        task.run();
        assert_eq!(rx.recv().unwrap(), 42);
    }
}
