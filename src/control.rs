//! Synchronous control transfers built on top of the asynchronous host
//! controller submission interface.
//!
//! Control transfers bypass [`crate::relay::RequestRelay`]: they are
//! submitted directly to the host controller and the calling thread blocks
//! on a condition variable for the result, rather than being delivered
//! through a per-device relay thread. There is no re-entrancy hazard here
//! because the caller, not a completion callback, is the one waiting.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{messages, Error};
use crate::hci::{Completion, HostController, Request, RequestStatus, SetupPacket, DEFAULT_CONTROL_TIMEOUT};

struct Outcome {
    completion: Option<Completion>,
    request: Option<Request>,
}

/// Issues synchronous control transfers on one device's default control
/// endpoint.
///
/// Transfers with no data stage (`SET_CONFIGURATION`, `SET_INTERFACE`, and
/// the like) reuse a small pool of zero-length requests across calls instead
/// of allocating a fresh one every time; transfers that carry data always
/// allocate a request sized for their own length, since pooling those would
/// mean pooling by size class for no benefit a single-request-at-a-time
/// engine would ever see.
pub struct ControlTransferEngine {
    device_id: u32,
    zero_length_pool: Mutex<Vec<Request>>,
}

impl ControlTransferEngine {
    pub fn new(device_id: u32) -> Self {
        Self {
            device_id,
            zero_length_pool: Mutex::new(Vec::new()),
        }
    }

    /// Perform one control transfer, blocking until it completes, fails, or
    /// times out.
    ///
    /// On timeout, every pending request on the control endpoint is
    /// cancelled and this call then waits indefinitely for the (now
    /// cancelled) completion to arrive, so that a late completion can never
    /// land on a stack frame that has already returned.
    pub fn control(
        &self,
        hci: &dyn HostController,
        setup: SetupPacket,
        mut data: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, Error> {
        let length = setup.length as usize;
        let req = if length == 0 {
            self.zero_length_pool
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| hci.alloc_request(0))
        } else {
            hci.alloc_request(length)
        };

        let completed = self.control_inner(hci, setup, &mut data, timeout, req)?;
        if length == 0 {
            self.zero_length_pool.lock().unwrap().push(completed);
        }
        Ok(data)
    }

    fn control_inner(
        &self,
        hci: &dyn HostController,
        setup: SetupPacket,
        data: &mut Vec<u8>,
        timeout: Option<Duration>,
        mut req: Request,
    ) -> Result<Request, Error> {
        let length = setup.length as usize;
        req.device_id = self.device_id;
        req.endpoint = 0;
        req.setup = Some(setup);
        if !setup.is_in() {
            req.buffer[..data.len().min(length)].copy_from_slice(&data[..data.len().min(length)]);
        }
        req.length = length;

        let shared = Arc::new((
            Mutex::new(Outcome {
                completion: None,
                request: None,
            }),
            Condvar::new(),
        ));
        let callback_shared = Arc::clone(&shared);

        hci.queue_request(
            req,
            Box::new(move |req, completion| {
                let (lock, condvar) = &*callback_shared;
                let mut outcome = lock.lock().unwrap();
                outcome.request = Some(req);
                outcome.completion = Some(completion);
                condvar.notify_all();
            }),
        );

        let (lock, condvar) = &*shared;
        let timeout = timeout.unwrap_or(DEFAULT_CONTROL_TIMEOUT);
        let guard = lock.lock().unwrap();
        let (mut guard, wait_result) = condvar
            .wait_timeout_while(guard, timeout, |outcome| outcome.completion.is_none())
            .unwrap();

        if wait_result.timed_out() {
            hci.cancel_all(self.device_id, 0);
            // The request is now guaranteed to complete (with
            // RequestStatus::Cancelled or similar); wait indefinitely so the
            // callback above never outlives this stack frame.
            while guard.completion.is_none() {
                guard = condvar.wait(guard).unwrap();
            }
            return Err(messages::timed_out("control transfer timed out").log_warn());
        }

        let completion = guard.completion.take().unwrap();
        let mut completed_req = guard.request.take().unwrap();
        match completion.status {
            RequestStatus::Ok => {
                if setup.is_in() {
                    let actual = completion.actual_len.min(data.len());
                    data[..actual].copy_from_slice(&completed_req.buffer[..actual]);
                    if actual < data.len() {
                        data.truncate(actual);
                    }
                }
                completed_req.setup = None;
                Ok(completed_req)
            }
            RequestStatus::Stall => Err(messages::bad_state("control endpoint stalled").log_warn()),
            RequestStatus::Cancelled => Err(messages::timed_out("control transfer was cancelled").log_warn()),
            RequestStatus::Disconnected => {
                Err(messages::io("device disconnected during control transfer").log_error())
            }
            RequestStatus::Error => Err(messages::io("control transfer failed").log_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hci::{request_type, ControlType, Direction, Recipient};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ImmediateController {
        status: RequestStatus,
        reply: Vec<u8>,
    }

    impl HostController for ImmediateController {
        fn alloc_request(&self, buffer_len: usize) -> Request {
            Request {
                device_id: 0,
                endpoint: 0,
                setup: None,
                buffer: vec![0u8; buffer_len],
                length: buffer_len,
            }
        }

        fn queue_request(&self, mut req: Request, on_complete: crate::hci::CompletionCallback) {
            let actual_len = if req.setup.map(|s| s.is_in()).unwrap_or(false) {
                let n = self.reply.len().min(req.buffer.len());
                req.buffer[..n].copy_from_slice(&self.reply[..n]);
                n
            } else {
                req.length
            };
            on_complete(
                req,
                Completion {
                    status: self.status,
                    actual_len,
                },
            );
        }

        fn cancel_all(&self, _device_id: u32, _endpoint: u8) {}
        fn reset_endpoint(&self, _device_id: u32, _endpoint: u8) {}
        fn current_frame(&self) -> u64 {
            0
        }
        fn max_transfer_size(&self, _device_id: u32, _endpoint: u8) -> usize {
            4096
        }
    }

    struct NeverCompletingController {
        cancelled: AtomicBool,
    }

    impl HostController for NeverCompletingController {
        fn alloc_request(&self, buffer_len: usize) -> Request {
            Request {
                device_id: 0,
                endpoint: 0,
                setup: None,
                buffer: vec![0u8; buffer_len],
                length: buffer_len,
            }
        }

        fn queue_request(&self, req: Request, on_complete: crate::hci::CompletionCallback) {
            // Simulate a cancellation arriving asynchronously, shortly after
            // cancel_all is observed, from a detached thread.
            let cancelled = &self.cancelled;
            while !cancelled.load(Ordering::SeqCst) {
                std::thread::yield_now();
            }
            on_complete(
                req,
                Completion {
                    status: RequestStatus::Cancelled,
                    actual_len: 0,
                },
            );
        }

        fn cancel_all(&self, _device_id: u32, _endpoint: u8) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
        fn reset_endpoint(&self, _device_id: u32, _endpoint: u8) {}
        fn current_frame(&self) -> u64 {
            0
        }
        fn max_transfer_size(&self, _device_id: u32, _endpoint: u8) -> usize {
            4096
        }
    }

    fn get_descriptor_setup(length: u16) -> SetupPacket {
        SetupPacket {
            request_type: request_type(Direction::In, ControlType::Standard, Recipient::Device),
            request: 0x06,
            value: 0x0100,
            index: 0,
            length,
        }
    }

    #[test]
    fn successful_in_transfer_returns_device_data() {
        let hci = ImmediateController {
            status: RequestStatus::Ok,
            reply: vec![18, 1, 0, 2],
        };
        let engine = ControlTransferEngine::new(1);
        let data = engine
            .control(&hci, get_descriptor_setup(4), vec![0u8; 4], None)
            .unwrap();
        assert_eq!(data, vec![18, 1, 0, 2]);
    }

    #[test]
    fn zero_length_requests_are_reused_across_calls() {
        struct CountingController {
            zero_length_allocs: std::sync::atomic::AtomicU32,
        }

        impl HostController for CountingController {
            fn alloc_request(&self, buffer_len: usize) -> Request {
                if buffer_len == 0 {
                    self.zero_length_allocs.fetch_add(1, Ordering::SeqCst);
                }
                Request {
                    device_id: 0,
                    endpoint: 0,
                    setup: None,
                    buffer: vec![0u8; buffer_len],
                    length: buffer_len,
                }
            }

            fn queue_request(&self, req: Request, on_complete: crate::hci::CompletionCallback) {
                on_complete(
                    req,
                    Completion {
                        status: RequestStatus::Ok,
                        actual_len: 0,
                    },
                );
            }

            fn cancel_all(&self, _device_id: u32, _endpoint: u8) {}
            fn reset_endpoint(&self, _device_id: u32, _endpoint: u8) {}
            fn current_frame(&self) -> u64 {
                0
            }
            fn max_transfer_size(&self, _device_id: u32, _endpoint: u8) -> usize {
                4096
            }
        }

        let hci = CountingController {
            zero_length_allocs: std::sync::atomic::AtomicU32::new(0),
        };
        let engine = ControlTransferEngine::new(1);
        let set_configuration = SetupPacket {
            request_type: request_type(Direction::Out, ControlType::Standard, Recipient::Device),
            request: 0x09,
            value: 1,
            index: 0,
            length: 0,
        };

        engine.control(&hci, set_configuration, Vec::new(), None).unwrap();
        engine.control(&hci, set_configuration, Vec::new(), None).unwrap();
        engine.control(&hci, set_configuration, Vec::new(), None).unwrap();

        assert_eq!(hci.zero_length_allocs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stall_maps_to_bad_state() {
        let hci = ImmediateController {
            status: RequestStatus::Stall,
            reply: vec![],
        };
        let engine = ControlTransferEngine::new(1);
        let err = engine
            .control(&hci, get_descriptor_setup(4), vec![0u8; 4], None)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadState);
    }

    #[test]
    fn timeout_cancels_and_then_waits_for_the_late_completion() {
        let hci = NeverCompletingController {
            cancelled: AtomicBool::new(false),
        };
        let engine = ControlTransferEngine::new(1);
        let err = engine
            .control(
                &hci,
                get_descriptor_setup(4),
                vec![0u8; 4],
                Some(Duration::from_millis(20)),
            )
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TimedOut);
    }
}
