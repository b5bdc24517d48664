//! Run state machine and the cooperative stop latch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Immutable position of a run within its step list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestRunStatus {
    step_index: isize,
    chain_pending: bool,
    finished: bool,
    stopped: bool,
}

impl TestRunStatus {
    /// Status before the first step, with a chain pending when the case has
    /// chained children.
    pub fn new(chain_pending: bool) -> Self {
        Self {
            step_index: -1,
            chain_pending,
            finished: false,
            stopped: false,
        }
    }

    pub fn step_index(&self) -> isize {
        self.step_index
    }

    /// Index of the current step, `None` before the first one.
    pub fn current(&self) -> Option<usize> {
        usize::try_from(self.step_index).ok()
    }

    pub fn is_chain_pending(&self) -> bool {
        self.chain_pending
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Advance to the next step.
    pub fn start_step(self) -> Self {
        self.forward(1)
    }

    pub fn forward(self, n: usize) -> Self {
        Self {
            step_index: self
                .step_index
                .saturating_add(isize::try_from(n).unwrap_or(isize::MAX)),
            ..self
        }
    }

    pub fn to_step(self, index: usize) -> Self {
        Self {
            step_index: index as isize,
            ..self
        }
    }

    pub fn chain_called(self) -> Self {
        Self {
            chain_pending: false,
            ..self
        }
    }

    pub fn finish(self) -> Self {
        Self {
            finished: true,
            ..self
        }
    }

    pub fn stop(self) -> Self {
        Self {
            stopped: true,
            ..self
        }
    }

    /// Whether another step remains before `last_index` and the run has not
    /// been stopped.
    pub fn is_need_running(&self, last_index: isize) -> bool {
        !self.stopped && self.step_index < last_index
    }

    pub fn is_need_chain(&self) -> bool {
        self.chain_pending && !self.stopped
    }
}

/// Thread-safe stop latch. A child signal observes the stop of any of its
/// ancestors; stopping a child leaves the parent running.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    parent: Option<Box<StopSignal>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Box::new(self.clone())),
        }
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.is_stopped())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_return_new_values() {
        let initial = TestRunStatus::new(true);
        let started = initial.start_step();
        assert_eq!(initial.step_index(), -1);
        assert_eq!(initial.current(), None);
        assert_eq!(started.step_index(), 0);
        assert_eq!(started.forward(2).current(), Some(2));
        assert_eq!(started.to_step(5).current(), Some(5));

        let called = started.chain_called();
        assert!(started.is_need_chain());
        assert!(!called.is_need_chain());
        assert!(!started.is_finished());
        assert!(started.finish().is_finished());
    }

    #[test]
    fn test_forward_saturates() {
        let far = TestRunStatus::new(false).start_step().forward(usize::MAX);
        assert_eq!(far.step_index(), isize::MAX);
        assert!(!far.is_need_running(3));
    }

    #[test]
    fn test_is_need_running() {
        let status = TestRunStatus::new(false);
        assert!(status.is_need_running(2));
        assert!(!status.to_step(2).is_need_running(2));
        assert!(!status.stop().is_need_running(2));
        assert!(!TestRunStatus::new(false).is_need_running(-1));
    }

    #[test]
    fn test_stop_is_a_latch() {
        let stopped = TestRunStatus::new(true).stop();
        assert!(stopped.is_stopped());
        assert!(stopped.start_step().is_stopped());
        assert!(!stopped.is_need_chain());
    }

    #[test]
    fn test_stop_signal_propagates_down() {
        let root = StopSignal::new();
        let child = root.child();
        let grandchild = child.child();
        grandchild.stop();
        assert!(!root.is_stopped());
        assert!(!child.is_stopped());

        let other = child.child();
        root.stop();
        assert!(child.is_stopped());
        assert!(other.is_stopped());
    }

    #[test]
    fn test_stop_signal_across_threads() {
        let signal = StopSignal::new();
        let child = signal.child();
        let remote = signal.clone();
        std::thread::spawn(move || remote.stop()).join().unwrap();
        assert!(child.is_stopped());
    }
}
