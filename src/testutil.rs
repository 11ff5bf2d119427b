//! In-memory test doubles for [`crate::hci::HostController`] and
//! [`crate::framework::DeviceFramework`], used by this crate's own unit and
//! integration tests. Not part of the public API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::Error;
use crate::framework::{ChildDescriptor, ChildHandle, DeviceFramework, DeviceProperties};
use crate::hci::{CompletionCallback, Completion, HostController, Request, RequestStatus};

const GET_DESCRIPTOR: u8 = 0x06;
const SET_CONFIGURATION: u8 = 0x09;
const SET_INTERFACE: u8 = 0x0b;

fn interface(number: u8, alt: u8, num_endpoints: u8) -> Vec<u8> {
    vec![9, 4, number, alt, num_endpoints, 0xff, 0, 0, 0]
}

fn endpoint(address: u8) -> Vec<u8> {
    vec![7, 5, address, 2, 0x40, 0, 1]
}

fn iad(first: u8, count: u8) -> Vec<u8> {
    vec![8, 0x0b, first, count, 0x0e, 3, 0, 0]
}

fn config_descriptor(value: u8, num_interfaces: u8, body: &[u8]) -> Vec<u8> {
    let total_length = 9 + body.len();
    let mut buf = vec![
        9,
        2,
        (total_length & 0xff) as u8,
        (total_length >> 8) as u8,
        num_interfaces,
        value,
        0,
        0xe0,
        0,
    ];
    buf.extend_from_slice(body);
    buf
}

fn device_descriptor_bytes(vendor_id: u16, product_id: u16, num_configurations: u8) -> Vec<u8> {
    let mut buf = vec![18, 1, 0x00, 0x02, 0, 0, 0, 64];
    buf.extend_from_slice(&vendor_id.to_le_bytes());
    buf.extend_from_slice(&product_id.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.push(0);
    buf.push(0);
    buf.push(0);
    buf.push(num_configurations);
    buf
}

/// A host controller double that serves a fixed device descriptor and a
/// fixed list of configuration descriptors out of memory, acking
/// `SET_CONFIGURATION`/`SET_INTERFACE` unconditionally.
pub struct FakeController {
    device_descriptor: Vec<u8>,
    configurations: Vec<Vec<u8>>,
}

impl FakeController {
    /// One configuration, one bare interface with two bulk endpoints.
    pub fn single_interface_device() -> Self {
        let mut body = interface(0, 0, 2);
        body.extend(endpoint(0x81));
        body.extend(endpoint(0x02));
        Self {
            device_descriptor: device_descriptor_bytes(0x1234, 0x5678, 1),
            configurations: vec![config_descriptor(1, 1, &body)],
        }
    }

    /// Two configurations: configuration 1 with one interface, configuration
    /// 2 with two, matching the VID/PID the override table does not touch.
    pub fn two_configuration_device() -> Self {
        let body1 = interface(0, 0, 0);
        let mut body2 = interface(0, 0, 0);
        body2.extend(interface(1, 0, 0));
        Self {
            device_descriptor: device_descriptor_bytes(0x1111, 0x2222, 2),
            configurations: vec![config_descriptor(1, 1, &body1), config_descriptor(2, 2, &body2)],
        }
    }

    /// Realtek RTL8153: configuration 1 is the installer, configuration 2
    /// (selected by the override table) is the network function.
    pub fn realtek_device() -> Self {
        let body1 = interface(0, 0, 0);
        let body2 = interface(0, 0, 1);
        Self {
            device_descriptor: device_descriptor_bytes(0x0bda, 0x8153, 2),
            configurations: vec![config_descriptor(1, 1, &body1), config_descriptor(2, 1, &body2)],
        }
    }

    /// A composite video-class device: one IAD spanning a video control
    /// interface and a video streaming interface with two alternate
    /// settings, plus one unrelated bare interface trailing it.
    pub fn iad_video_device() -> Self {
        let mut body = iad(0, 2);
        body.extend(interface(0, 0, 0));
        body.extend(interface(1, 0, 0));
        body.extend(interface(1, 1, 1));
        body.extend(endpoint(0x82));
        body.extend(interface(2, 0, 1));
        body.extend(endpoint(0x83));
        Self {
            device_descriptor: device_descriptor_bytes(0x05ac, 0x8600, 1),
            configurations: vec![config_descriptor(1, 3, &body)],
        }
    }
}

impl HostController for FakeController {
    fn alloc_request(&self, buffer_len: usize) -> Request {
        Request {
            device_id: 0,
            endpoint: 0,
            setup: None,
            buffer: vec![0u8; buffer_len],
            length: buffer_len,
        }
    }

    fn queue_request(&self, mut req: Request, on_complete: CompletionCallback) {
        let setup = req.setup.expect("FakeController only serves control transfers");
        let reply: Vec<u8> = match setup.request {
            GET_DESCRIPTOR if setup.value >> 8 == 0x01 => self.device_descriptor.clone(),
            GET_DESCRIPTOR if setup.value >> 8 == 0x02 => {
                let index = (setup.value & 0xff) as usize;
                self.configurations
                    .get(index)
                    .cloned()
                    .unwrap_or_default()
            }
            SET_CONFIGURATION | SET_INTERFACE => Vec::new(),
            _ => Vec::new(),
        };
        let n = reply.len().min(req.buffer.len());
        req.buffer[..n].copy_from_slice(&reply[..n]);
        on_complete(
            req,
            Completion {
                status: RequestStatus::Ok,
                actual_len: n,
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

/// A device-framework double that records every published and removed
/// child in memory.
#[derive(Default)]
pub struct FakeFramework {
    next_handle: AtomicU64,
    children: Mutex<Vec<(ChildHandle, ChildDescriptor)>>,
    device_properties: Mutex<Option<DeviceProperties>>,
}

impl FakeFramework {
    /// Snapshot of every currently-published child.
    pub fn children(&self) -> Vec<ChildDescriptor> {
        self.children
            .lock()
            .unwrap()
            .iter()
            .map(|(_, child)| child.clone())
            .collect()
    }

    /// The properties passed to the most recent `publish_device` call.
    pub fn device_properties(&self) -> Option<DeviceProperties> {
        self.device_properties.lock().unwrap().clone()
    }
}

impl DeviceFramework for FakeFramework {
    fn publish_device(&self, properties: &DeviceProperties) -> Result<(), Error> {
        *self.device_properties.lock().unwrap() = Some(properties.clone());
        Ok(())
    }

    fn add_child(&self, child: ChildDescriptor) -> Result<ChildHandle, Error> {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.children.lock().unwrap().push((handle, child));
        Ok(handle)
    }

    fn remove_child(&self, handle: ChildHandle) {
        self.children.lock().unwrap().retain(|(h, _)| *h != handle);
    }
}
