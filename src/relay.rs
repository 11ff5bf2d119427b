//! Hands host-controller completions back to their callbacks from a thread
//! dedicated to one device, instead of invoking them from whatever thread the
//! host controller happens to call completion on.
//!
//! The host controller may complete a request from deep inside its own
//! submission path; a callback that turns around and calls
//! [`crate::hci::HostController::queue_request`] again (as the control
//! transfer engine's retry and the interface claim paths both do) would
//! re-enter the host controller on its own thread. Queuing the callback here
//! and running it on a dedicated thread breaks that reentrancy.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::hci::{Completion, Request};

type QueuedCompletion = (Request, Completion, Box<dyn FnOnce(Request, Completion) + Send>);

struct Shared {
    queue: Mutex<VecDeque<QueuedCompletion>>,
    condvar: Condvar,
    stopped: Mutex<bool>,
}

/// Runs one dedicated thread per device, draining completions in FIFO order
/// and invoking their callbacks outside of the host controller's own call
/// stack.
pub struct RequestRelay {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl RequestRelay {
    /// Spawn the relay thread. `device_id` only labels the thread for
    /// diagnostics.
    pub fn spawn(device_id: u32) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            stopped: Mutex::new(false),
        });

        let worker = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name(format!("usb-compose-relay-{device_id}"))
            .spawn(move || Self::run(worker))
            .expect("failed to spawn request relay thread");

        Self {
            shared,
            thread: Some(thread),
        }
    }

    fn run(shared: Arc<Shared>) {
        loop {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if *shared.stopped.lock().unwrap() && queue.is_empty() {
                    return;
                }
                if !queue.is_empty() {
                    break;
                }
                queue = shared.condvar.wait(queue).unwrap();
            }
            let Some((req, completion, callback)) = queue.pop_front() else {
                continue;
            };
            drop(queue);
            callback(req, completion);
        }
    }

    /// Queue a completion for delivery on the relay thread, preserving FIFO
    /// order relative to other completions queued on this relay.
    pub fn deliver(
        &self,
        req: Request,
        completion: Completion,
        callback: Box<dyn FnOnce(Request, Completion) + Send>,
    ) {
        let mut queue = self.shared.queue.lock().unwrap();
        queue.push_back((req, completion, callback));
        self.shared.condvar.notify_one();
    }

    /// Stop the relay thread after it drains any completions already queued.
    /// Idempotent; safe to call from [`Drop::drop`].
    pub fn stop(&mut self) {
        *self.shared.stopped.lock().unwrap() = true;
        self.shared.condvar.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for RequestRelay {
    fn drop(&mut self) {
        self.stop();
    }
}
