#![warn(missing_docs)]
//! Host-side USB composite device core.
//!
//! This crate enumerates one USB device over a caller-supplied
//! [`HostController`][hci::HostController], parses its configuration
//! descriptors, and partitions them into per-interface and per-IAD groups
//! (see [`walker`]) that get published as child nodes through a
//! caller-supplied [`DeviceFramework`][framework::DeviceFramework]. It then
//! mediates every subsequent operation against those children: claiming an
//! interface, switching alternate settings, switching configurations, and
//! issuing control transfers on the shared default control endpoint.
//!
//! The host controller driver itself (bus scheduling, the submission queue,
//! the PHY) and the device-framework node/driver-binding machinery are both
//! out of scope; this crate consumes them as small trait-based capability
//! sets rather than reimplementing or depending on a specific platform.
//!
//! ## Overview
//!
//! [`DeviceCore::enumerate`] fetches the device descriptor and every
//! configuration descriptor, applies a small table of VID/PID-specific
//! configuration overrides, issues `SET_CONFIGURATION`, and walks the active
//! configuration's descriptor stream ([`walker::walk`]) to publish one child
//! per interface or interface association. [`registry::InterfaceRegistry`]
//! is the single source of truth for whether an interface is available,
//! published, or claimed by a sibling driver, and handles the race between a
//! client claiming an interface and this crate publishing its child.
//!
//! Completions from the host controller are handed to
//! [`relay::RequestRelay`], a dedicated per-device thread, so that a
//! completion callback can safely resubmit work without re-entering the host
//! controller on its own call stack. Synchronous control transfers
//! ([`control::ControlTransferEngine`]) are built directly on the
//! asynchronous [`hci::HostController::queue_request`] call, with a
//! timeout-then-cancel-then-wait-indefinitely sequence so a late completion
//! can never be delivered to a stack frame that has already returned.

pub mod control;
pub mod descriptors;
mod device;
/// Error types returned from every fallible operation in this crate.
pub mod error;
pub mod framework;
pub mod hci;
pub mod ioctl;
mod registry;
mod relay;
mod strings;
#[cfg(test)]
mod testutil;
mod walker;

pub use device::{DeviceCore, UsbDevice};
pub use error::{Error, ErrorKind};
pub use registry::InterfaceStatus;
