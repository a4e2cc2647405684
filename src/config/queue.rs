//! Publish queue: a single dedicated worker thread that serializes every
//! config-change notification so watcher callbacks never run while a
//! config-node lock is held.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

type Action = Box<dyn FnOnce() + Send>;

struct State {
    actions: VecDeque<Action>,
}

/// FIFO of pending watcher-notification thunks, drained by one background
/// thread in submission order. With a bounded `depth`, a full queue makes
/// [`PublishQueue::publish`] block the calling thread until the worker has
/// made room, applying backpressure to a writer that outruns its watchers.
pub struct PublishQueue {
    state: Mutex<State>,
    wake: Condvar,
    drained: Condvar,
    not_full: Condvar,
    depth: Option<usize>,
    terminate: AtomicBool,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl PublishQueue {
    pub fn start() -> Arc<Self> {
        Self::start_with_depth(None)
    }

    /// Like [`PublishQueue::start`], but caps the queue at `depth` pending
    /// actions; `None` leaves it unbounded.
    pub fn start_with_depth(depth: Option<usize>) -> Arc<Self> {
        let queue = Arc::new(Self {
            state: Mutex::new(State { actions: VecDeque::new() }),
            wake: Condvar::new(),
            drained: Condvar::new(),
            not_full: Condvar::new(),
            depth,
            terminate: AtomicBool::new(false),
            thread: Mutex::new(None),
        });
        let worker = Arc::clone(&queue);
        let handle = std::thread::Builder::new()
            .name("config-publish-queue".into())
            .spawn(move || worker.run())
            .expect("failed to spawn publish-queue thread");
        *queue.thread.lock() = Some(handle);
        queue
    }

    /// Enqueues `action` to run on the publish-queue thread, in submission
    /// order relative to every other enqueued action. Blocks while the queue
    /// is at its configured depth.
    pub fn publish(&self, action: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock();
        if let Some(depth) = self.depth {
            while state.actions.len() >= depth && !self.terminate.load(Ordering::Acquire) {
                self.not_full.wait(&mut state);
            }
        }
        state.actions.push_back(Box::new(action));
        drop(state);
        self.wake.notify_one();
    }

    /// Blocks until the queue is empty. Any action still running when
    /// called is allowed to finish first.
    pub fn drain(&self) {
        let mut state = self.state.lock();
        while !state.actions.is_empty() {
            self.drained.wait(&mut state);
        }
    }

    fn run(&self) {
        loop {
            let action = {
                let mut state = self.state.lock();
                loop {
                    if let Some(action) = state.actions.pop_front() {
                        break Some(action);
                    }
                    if self.terminate.load(Ordering::Acquire) {
                        break None;
                    }
                    self.wake.wait(&mut state);
                }
            };
            match action {
                Some(action) => {
                    action();
                    let state = self.state.lock();
                    if state.actions.is_empty() {
                        self.drained.notify_all();
                    }
                    self.not_full.notify_one();
                }
                None => {
                    self.drained.notify_all();
                    self.not_full.notify_all();
                    return;
                }
            }
        }
    }

    /// Signals shutdown, drains whatever remains, and joins the worker
    /// thread.
    pub fn stop(&self) {
        self.terminate.store(true, Ordering::Release);
        self.wake.notify_all();
        self.not_full.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn actions_run_in_fifo_order() {
        let queue = PublishQueue::start();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = Arc::clone(&order);
            queue.publish(move || order.lock().push(i));
        }
        queue.drain();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        queue.stop();
    }

    #[test]
    fn drain_waits_for_in_flight_work() {
        let queue = PublishQueue::start();
        let done = Arc::new(AtomicUsize::new(0));
        let done2 = Arc::clone(&done);
        queue.publish(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            done2.store(1, Ordering::SeqCst);
        });
        queue.drain();
        assert_eq!(done.load(Ordering::SeqCst), 1);
        queue.stop();
    }

    #[test]
    fn bounded_depth_blocks_publish_until_worker_makes_room() {
        let queue = PublishQueue::start_with_depth(Some(1));
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let gate2 = Arc::clone(&gate);
        // Pulled off the queue and into the worker immediately, so it does
        // not itself count against the depth limit, but it keeps the worker
        // from draining anything enqueued after it.
        queue.publish(move || {
            let (lock, cvar) = &*gate2;
            let mut released = lock.lock();
            while !*released {
                cvar.wait(&mut released);
            }
        });
        std::thread::sleep(std::time::Duration::from_millis(20));

        // Fills the depth-1 queue while the worker is stuck on the gate.
        queue.publish(|| {});

        let blocked = Arc::new(AtomicUsize::new(0));
        let blocked2 = Arc::clone(&blocked);
        let queue2 = Arc::clone(&queue);
        let publisher = std::thread::spawn(move || {
            queue2.publish(move || {
                blocked2.store(1, Ordering::SeqCst);
            });
        });

        std::thread::sleep(std::time::Duration::from_millis(30));
        assert_eq!(blocked.load(Ordering::SeqCst), 0, "third publish should still be blocked on a full queue");

        {
            let (lock, cvar) = &*gate;
            *lock.lock() = true;
            cvar.notify_all();
        }
        publisher.join().unwrap();
        queue.drain();
        assert_eq!(blocked.load(Ordering::SeqCst), 1);
        queue.stop();
    }
}
