use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct Slot<T> {
    value: Option<T>,
    completed: bool,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// One-shot completion for an asynchronous OS operation.
///
/// The OS side holds a [`Completer`] and calls [`Completer::complete`] from
/// whatever thread it runs on; the requesting thread blocks in
/// [`Completion::wait_timeout`]. The first completion wins. A value delivered
/// after the waiter has given up stays in the slot and is dropped with the
/// last handle, so any resource it owns is released through its own `Drop`.
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

/// Sending half of a [`Completion`].
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Completion<T> {
    pub fn new() -> (Completion<T>, Completer<T>) {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                value: None,
                completed: false,
            }),
            ready: Condvar::new(),
        });
        (
            Completion {
                shared: Arc::clone(&shared),
            },
            Completer { shared },
        )
    }

    /// Block until the operation completes or `timeout` elapses.
    ///
    /// Returns `None` on timeout. Never waits longer than `timeout` in total,
    /// spurious wakeups included.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        while !slot.completed {
            if self.shared.ready.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.value.take()
    }

    pub fn is_completed(&self) -> bool {
        self.shared.slot.lock().completed
    }
}

impl<T> Completer<T> {
    /// Deliver the result. Returns `false` if a result was already delivered,
    /// in which case `value` is dropped here.
    pub fn complete(&self, value: T) -> bool {
        let mut slot = self.shared.slot.lock();
        if slot.completed {
            return false;
        }
        slot.value = Some(value);
        slot.completed = true;
        drop(slot);
        self.shared.ready.notify_all();
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn delivers_value_from_another_thread() {
        let (completion, completer) = Completion::new();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete(42u32)
        });
        assert_eq!(completion.wait_timeout(Duration::from_secs(5)), Some(42));
        assert!(worker.join().unwrap());
    }

    #[test]
    fn times_out_without_completion() {
        let (completion, _completer) = Completion::<u32>::new();
        let started = Instant::now();
        assert_eq!(completion.wait_timeout(Duration::from_millis(50)), None);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(!completion.is_completed());
    }

    #[test]
    fn first_completion_wins() {
        let (completion, completer) = Completion::new();
        assert!(completer.complete("first"));
        assert!(!completer.clone().complete("second"));
        assert_eq!(completion.wait_timeout(Duration::from_millis(10)), Some("first"));
    }

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn late_completion_is_dropped_with_last_handle() {
        let drops = Arc::new(AtomicUsize::new(0));
        let (completion, completer) = Completion::new();

        assert!(completion.wait_timeout(Duration::from_millis(10)).is_none());
        drop(completion);

        assert!(completer.complete(Tracked(Arc::clone(&drops))));
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(completer);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
