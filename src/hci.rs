//! The host controller capability this crate consumes.
//!
//! The host controller interface (scheduling of bus frames, the submission
//! queue, the PHY) is explicitly out of scope for this crate — it is
//! consumed as a small capability set, expressed as the [`HostController`]
//! trait, rather than reimplemented. A real host controller driver, or a
//! test double such as [`crate::testutil::FakeController`], implements it.

use std::time::Duration;

/// Outcome of a completed or cancelled request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// The request completed successfully.
    Ok,
    /// The endpoint returned STALL.
    Stall,
    /// The request was cancelled, typically by [`HostController::cancel_all`].
    Cancelled,
    /// The device disconnected while the request was pending.
    Disconnected,
    /// An otherwise uncategorized transport error occurred.
    Error,
}

/// Status and actual transfer length reported by the host controller when a
/// request completes.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    /// Final status of the request.
    pub status: RequestStatus,
    /// Number of bytes actually transferred (may be less than the requested
    /// length on a short transfer, and is meaningless on error).
    pub actual_len: usize,
}

/// A single asynchronous request submitted to the host controller.
///
/// For transfers on the default control endpoint, [`setup`][Self::setup] is
/// populated; [`buffer`][Self::buffer] then holds OUT data to send (already
/// written by the caller) or IN space to receive into.
pub struct Request {
    /// Device this request targets.
    pub device_id: u32,
    /// Endpoint address (0 for the default control endpoint).
    pub endpoint: u8,
    /// Setup packet, for control transfers.
    pub setup: Option<SetupPacket>,
    /// Data buffer: OUT payload to transmit, or IN space to receive into.
    pub buffer: Vec<u8>,
    /// Requested transfer length.
    pub length: usize,
}

/// Called by the host controller when a [`Request`] it was given completes,
/// handing ownership of the request and its buffer back to the caller.
///
/// In the host controller driver this would originally have been written as
/// `usb_device_complete_callback_t` plus a `void *cookie`: the callback and
/// its cookie are collapsed here into one `FnOnce` closure, which already
/// owns whatever state the cookie would have carried.
pub type CompletionCallback = Box<dyn FnOnce(Request, Completion) + Send>;

/// Capability set consumed from the host controller.
///
/// Mirrors the "Downward (consumed)" list: request submission, cancellation,
/// endpoint reset, frame counting, and transfer-size limits, plus an
/// allocator for request objects.
pub trait HostController: Send + Sync {
    /// Allocate a request with a buffer of at least `buffer_len` bytes.
    fn alloc_request(&self, buffer_len: usize) -> Request;

    /// Submit `req` for asynchronous completion. `on_complete` runs on a
    /// thread owned by the host controller; callers that might re-enter the
    /// host controller from their own completion handling must not call this
    /// method directly from a completion callback — see
    /// [`crate::relay::RequestRelay`].
    fn queue_request(&self, req: Request, on_complete: CompletionCallback);

    /// Cancel all pending requests on `(device_id, endpoint)`. Cancelled
    /// requests complete later, asynchronously, with
    /// [`RequestStatus::Cancelled`].
    fn cancel_all(&self, device_id: u32, endpoint: u8);

    /// Reset a stalled endpoint's data toggle.
    fn reset_endpoint(&self, device_id: u32, endpoint: u8);

    /// Current USB frame number, per the controller's free-running counter.
    fn current_frame(&self) -> u64;

    /// Maximum single-request transfer size the controller supports on this
    /// endpoint.
    fn max_transfer_size(&self, device_id: u32, endpoint: u8) -> usize;
}

/// Default control-transfer timeout used where the caller does not specify one.
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

/// Transfer direction, as encoded in bit 7 of `bmRequestType`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host-to-device.
    Out = 0x00,
    /// Device-to-host.
    In = 0x80,
}

/// `bmRequestType` type field (bits 5-6).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlType {
    /// Standard USB request, defined by the USB specification.
    Standard = 0,
    /// Request defined by the device's class specification.
    Class = 1,
    /// Vendor-defined request.
    Vendor = 2,
}

/// `bmRequestType` recipient field (bits 0-4).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// The request is directed at the device as a whole.
    Device = 0,
    /// The request is directed at one interface.
    Interface = 1,
    /// The request is directed at one endpoint.
    Endpoint = 2,
    /// Other or reserved recipient.
    Other = 3,
}

/// Build a `bmRequestType` byte from its direction, type, and recipient fields.
pub fn request_type(direction: Direction, control_type: ControlType, recipient: Recipient) -> u8 {
    direction as u8 | ((control_type as u8) << 5) | recipient as u8
}

/// The 8-byte setup packet that begins every control transfer.
#[derive(Debug, Clone, Copy)]
pub struct SetupPacket {
    /// `bmRequestType`.
    pub request_type: u8,
    /// `bRequest`.
    pub request: u8,
    /// `wValue`.
    pub value: u16,
    /// `wIndex`.
    pub index: u16,
    /// `wLength`.
    pub length: u16,
}

impl SetupPacket {
    /// Encode the setup packet in its on-wire little-endian byte order.
    pub fn to_bytes(self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0] = self.request_type;
        buf[1] = self.request;
        buf[2..4].copy_from_slice(&self.value.to_le_bytes());
        buf[4..6].copy_from_slice(&self.index.to_le_bytes());
        buf[6..8].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    /// `true` if this setup packet requests an IN (device-to-host) data stage.
    pub fn is_in(&self) -> bool {
        self.request_type & 0x80 != 0
    }
}

/// Connection speed of a device, as reported by the host controller at
/// enumeration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Speed {
    /// 1.5 Mbit/s
    Low,
    /// 12 Mbit/s
    Full,
    /// 480 Mbit/s
    High,
    /// 5 Gbit/s (USB 3.x)
    Super,
    /// 10 Gbit/s (USB 3.1+)
    SuperPlus,
}
