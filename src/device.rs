//! The composite device core: enumerates a device, walks its configuration
//! descriptors into interface and IAD groups, and mediates claiming,
//! alternate-setting, and configuration-switch requests against the
//! interface registry's single source of truth.

use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::control::ControlTransferEngine;
use crate::descriptors::{ConfigurationDescriptor, DeviceDescriptor, DESCRIPTOR_TYPE_CONFIGURATION};
use crate::error::{messages, Error};
use crate::framework::{ChildDescriptor, DeviceFramework, DeviceProperties, HubInterface};
use crate::hci::{request_type, ControlType, Direction, HostController, Recipient, SetupPacket};
use crate::registry::InterfaceRegistry;
use crate::relay::RequestRelay;
use crate::strings::StringCache;
use crate::walker::walk;

const GET_DESCRIPTOR: u8 = 0x06;
const SET_CONFIGURATION: u8 = 0x09;
const SET_INTERFACE: u8 = 0x0b;
const DESCRIPTOR_TYPE_DEVICE_VALUE: u8 = 0x01;
const DESCRIPTOR_LEN_DEVICE: u8 = 18;

/// `(idVendor, idProduct) -> bConfigurationValue` overrides applied after
/// enumeration, for devices whose default configuration is not the one this
/// crate should bind children against.
const VID_PID_CONFIG_OVERRIDES: &[((u16, u16), u8)] = &[
    // Realtek RTL8153 USB-to-Ethernet: configuration 1 is a CD-ROM-emulating
    // driver installer, configuration 2 is the actual network function.
    ((0x0bda, 0x8153), 2),
];

struct Configuration {
    bytes: Vec<u8>,
}

impl Configuration {
    fn descriptor(&self) -> ConfigurationDescriptor<'_> {
        ConfigurationDescriptor::new(&self.bytes).expect("validated at fetch time")
    }
}

struct Mutable {
    current_config_index: usize,
    hub_interface: Option<Arc<dyn HubInterface>>,
}

/// Owns one enumerated device's descriptors and mediates every operation a
/// class driver or the framework can perform against it.
///
/// `registry` is a sibling field of `state`, not nested inside it: it
/// already serializes its own publish/claim/retract sequence with its own
/// internal mutex (release, call out to the framework, reacquire, re-check),
/// and must never be reached through a guard on the outer `state` mutex —
/// doing so would hold `state` across a framework callout.
pub struct DeviceCore {
    device_id: u32,
    device_descriptor: DeviceDescriptor,
    configurations: Vec<Configuration>,
    hub_id: Option<u32>,
    relay: RequestRelay,
    control: ControlTransferEngine,
    strings: StringCache,
    registry: InterfaceRegistry,
    state: Mutex<Mutable>,
}

impl DeviceCore {
    /// Enumerate `device_id` over `hci`: fetch the device descriptor, fetch
    /// every configuration descriptor, apply the VID/PID override table,
    /// issue `SET_CONFIGURATION`, publish the device's own non-bindable node,
    /// and walk the active configuration to publish its interface children.
    pub fn enumerate(
        hci: &dyn HostController,
        framework: &dyn DeviceFramework,
        device_id: u32,
        hub_id: Option<u32>,
    ) -> Result<Self, Error> {
        let control = ControlTransferEngine::new(device_id);

        let raw_device = fetch_descriptor(
            &control,
            hci,
            DESCRIPTOR_TYPE_DEVICE_VALUE,
            0,
            DESCRIPTOR_LEN_DEVICE as usize,
        )?;
        let device_descriptor = DeviceDescriptor::new(&raw_device)
            .ok_or_else(|| messages::io("malformed device descriptor").log_error())?;

        let mut configurations = Vec::with_capacity(device_descriptor.num_configurations() as usize);
        for index in 0..device_descriptor.num_configurations() {
            configurations.push(Configuration {
                bytes: fetch_configuration(&control, hci, index)?,
            });
        }
        if configurations.is_empty() {
            return Err(messages::io("device advertises zero configurations"));
        }

        let mut target_value = configurations[0].descriptor().configuration_value();
        for &((vid, pid), config_value) in VID_PID_CONFIG_OVERRIDES {
            if vid == device_descriptor.vendor_id() && pid == device_descriptor.product_id() {
                if !configurations
                    .iter()
                    .any(|c| c.descriptor().configuration_value() == config_value)
                {
                    return Err(messages::internal(
                        "VID/PID override selected a configuration value the device does not advertise",
                    )
                    .log_error());
                }
                target_value = config_value;
            }
        }
        let current_config_index = configurations
            .iter()
            .position(|c| c.descriptor().configuration_value() == target_value)
            .expect("target_value was checked against configurations above");

        set_configuration_on_wire(&control, hci, target_value)?;

        framework.publish_device(&DeviceProperties {
            vendor_id: device_descriptor.vendor_id(),
            product_id: device_descriptor.product_id(),
            class: device_descriptor.class(),
            subclass: device_descriptor.subclass(),
            protocol: device_descriptor.protocol(),
        })?;

        let num_interfaces = configurations[current_config_index].descriptor().num_interfaces() as usize;
        let registry = InterfaceRegistry::new(num_interfaces);

        let core = Self {
            device_id,
            device_descriptor,
            configurations,
            hub_id,
            relay: RequestRelay::spawn(device_id),
            control,
            strings: StringCache::new(device_id),
            registry,
            state: Mutex::new(Mutable {
                current_config_index,
                hub_interface: None,
            }),
        };

        core.publish_active_configuration(framework)?;
        Ok(core)
    }

    fn publish_active_configuration(&self, framework: &dyn DeviceFramework) -> Result<(), Error> {
        let index = self.state.lock().unwrap().current_config_index;
        let config = &self.configurations[index];
        let descriptor = config.descriptor();
        let body = descriptor.descriptors().as_bytes();

        let result = walk(body);
        if !result.complete {
            warn!(
                "device {} configuration {} descriptor walk stopped early on malformed data",
                self.device_id,
                descriptor.configuration_value()
            );
        }

        // Errors publishing one group are logged and do not abort the walk:
        // every remaining group is still attempted, and the first failure is
        // returned only once the whole configuration has been walked.
        let mut first_error: Option<Error> = None;
        for group in &result.groups {
            let interface_number = group.first_interface_number();
            let child = ChildDescriptor {
                name: format!("{:03}", self.device_id),
                interface_number,
                descriptors: body[group.range.clone()].to_vec(),
            };
            if let Err(err) = self.registry.publish(framework, &group.interface_numbers, child) {
                warn!(
                    "device {} failed to publish interface group starting at {interface_number}: {err}",
                    self.device_id
                );
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        info!(
            "device {} published {} interface children for configuration {}",
            self.device_id,
            result.groups.len(),
            descriptor.configuration_value()
        );
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Claim `interface_number`, retracting its published child if present.
    pub fn claim_interface(&self, framework: &dyn DeviceFramework, interface_number: u8) -> Result<(), Error> {
        self.registry.claim(framework, interface_number)
    }

    /// Status of `interface_number` in the active configuration.
    pub fn interface_status(&self, interface_number: u8) -> Option<crate::registry::InterfaceStatus> {
        self.registry.status(interface_number)
    }

    /// Switch to the configuration identified by `configuration_value`,
    /// retracting every published child and republishing against the new
    /// configuration's descriptor.
    pub fn set_configuration(
        &self,
        hci: &dyn HostController,
        framework: &dyn DeviceFramework,
        configuration_value: u8,
    ) -> Result<(), Error> {
        let new_index = self
            .configurations
            .iter()
            .position(|c| c.descriptor().configuration_value() == configuration_value)
            .ok_or_else(|| messages::invalid_args("unknown configuration value"))?;

        set_configuration_on_wire(&self.control, hci, configuration_value)?;

        self.registry.retract_all(framework);

        let num_interfaces = self.configurations[new_index].descriptor().num_interfaces() as usize;
        self.state.lock().unwrap().current_config_index = new_index;
        self.registry.reset(num_interfaces);

        self.publish_active_configuration(framework)
    }

    /// Select an alternate setting on `interface_number`. Fails with
    /// `invalid_args` if no interface with that number exists in the active
    /// configuration.
    pub fn set_interface(
        &self,
        hci: &dyn HostController,
        interface_number: u8,
        alternate_setting: u8,
    ) -> Result<(), Error> {
        let index = self.state.lock().unwrap().current_config_index;
        let exists = self.configurations[index]
            .descriptor()
            .interface_alt_settings()
            .any(|i| i.interface_number() == interface_number);
        if !exists {
            return Err(messages::invalid_args("no such interface in the active configuration"));
        }

        let setup = SetupPacket {
            request_type: request_type(Direction::Out, ControlType::Standard, Recipient::Interface),
            request: SET_INTERFACE,
            value: alternate_setting as u16,
            index: interface_number as u16,
            length: 0,
        };
        self.control.control(hci, setup, Vec::new(), None)?;
        Ok(())
    }

    /// Issue a control transfer against this device's default control
    /// endpoint.
    pub fn control(
        &self,
        hci: &dyn HostController,
        setup: SetupPacket,
        data: Vec<u8>,
    ) -> Result<Vec<u8>, Error> {
        self.control.control(hci, setup, data, None)
    }

    /// Hand a host controller completion to this device's relay thread.
    pub fn deliver_completion(
        &self,
        req: crate::hci::Request,
        completion: crate::hci::Completion,
        callback: Box<dyn FnOnce(crate::hci::Request, crate::hci::Completion) + Send>,
    ) {
        self.relay.deliver(req, completion, callback);
    }

    /// Fetch and decode string descriptor `index`.
    pub fn get_string(&self, hci: &dyn HostController, index: u8) -> Result<String, Error> {
        self.strings.get_string(hci, index)
    }

    /// The device descriptor fetched at enumeration time.
    pub fn device_descriptor(&self) -> &DeviceDescriptor {
        &self.device_descriptor
    }

    /// Bytes of the currently active configuration descriptor, including its
    /// trailing interface and endpoint descriptors.
    pub fn active_configuration_bytes(&self) -> Vec<u8> {
        let index = self.state.lock().unwrap().current_config_index;
        self.configurations[index].bytes.clone()
    }

    /// `bConfigurationValue` of the currently active configuration.
    pub fn current_configuration_value(&self) -> u8 {
        let index = self.state.lock().unwrap().current_config_index;
        self.configurations[index].descriptor().configuration_value()
    }

    /// Parent hub's device id, if this device is not attached directly to the
    /// host controller's root port.
    pub fn hub_id(&self) -> Option<u32> {
        self.hub_id
    }

    /// Install the hub-protocol capability set used to service hub port
    /// commands for this device, if it is itself a hub.
    pub fn set_hub_interface(&self, hub_interface: Arc<dyn HubInterface>) {
        self.state.lock().unwrap().hub_interface = Some(hub_interface);
    }

    /// Release this device: retract every published child and stop the relay
    /// thread. After this call the `DeviceCore` should be dropped.
    pub fn release(&mut self, framework: &dyn DeviceFramework) {
        self.registry.retract_all(framework);
        self.relay.stop();
    }

    /// Dispatch one [`crate::ioctl::IoctlRequest`] against this device.
    pub fn ioctl(
        &self,
        hci: &dyn HostController,
        framework: &dyn DeviceFramework,
        speed: crate::hci::Speed,
        request: crate::ioctl::IoctlRequest,
    ) -> Result<crate::ioctl::IoctlResponse, Error> {
        crate::ioctl::dispatch(self, hci, framework, self.device_id, speed, request)
    }
}

/// Cheaply-cloneable handle to an enumerated device, for callers (typically
/// class drivers bound to one of its published children) that want the same
/// request-lifecycle, transfer, introspection, and control-plane operations
/// as [`DeviceCore`] without owning it outright.
///
/// Mirrors the teacher's `Device`/`Interface` split: this crate has no
/// separate per-interface handle type because interface identity here is
/// just an interface number checked against the active configuration, but
/// the Arc-wrapped, freely-cloned handle shape is the same.
#[derive(Clone)]
pub struct UsbDevice(Arc<DeviceCore>);

impl UsbDevice {
    /// Wrap an already-enumerated [`DeviceCore`] for shared use.
    pub fn new(core: Arc<DeviceCore>) -> Self {
        Self(core)
    }

    /// Claim `interface_number`, retracting its published child if present.
    pub fn claim_interface(&self, framework: &dyn DeviceFramework, interface_number: u8) -> Result<(), Error> {
        self.0.claim_interface(framework, interface_number)
    }

    /// Issue a control transfer against this device's default control
    /// endpoint.
    pub fn control(&self, hci: &dyn HostController, setup: SetupPacket, data: Vec<u8>) -> Result<Vec<u8>, Error> {
        self.0.control(hci, setup, data)
    }

    /// Select an alternate setting on `interface_number`.
    pub fn set_interface(
        &self,
        hci: &dyn HostController,
        interface_number: u8,
        alternate_setting: u8,
    ) -> Result<(), Error> {
        self.0.set_interface(hci, interface_number, alternate_setting)
    }

    /// Switch to the configuration identified by `configuration_value`.
    pub fn set_configuration(
        &self,
        hci: &dyn HostController,
        framework: &dyn DeviceFramework,
        configuration_value: u8,
    ) -> Result<(), Error> {
        self.0.set_configuration(hci, framework, configuration_value)
    }

    /// Fetch and decode string descriptor `index`.
    pub fn get_string(&self, hci: &dyn HostController, index: u8) -> Result<String, Error> {
        self.0.get_string(hci, index)
    }

    /// The device descriptor fetched at enumeration time.
    pub fn device_descriptor(&self) -> &DeviceDescriptor {
        self.0.device_descriptor()
    }

    /// `bConfigurationValue` of the currently active configuration.
    pub fn current_configuration_value(&self) -> u8 {
        self.0.current_configuration_value()
    }
}

fn fetch_descriptor(
    control: &ControlTransferEngine,
    hci: &dyn HostController,
    descriptor_type: u8,
    index: u8,
    length: usize,
) -> Result<Vec<u8>, Error> {
    let setup = SetupPacket {
        request_type: request_type(Direction::In, ControlType::Standard, Recipient::Device),
        request: GET_DESCRIPTOR,
        value: (u16::from(descriptor_type) << 8) | index as u16,
        index: 0,
        length: length as u16,
    };
    control.control(hci, setup, vec![0u8; length], None)
}

fn fetch_configuration(
    control: &ControlTransferEngine,
    hci: &dyn HostController,
    index: u8,
) -> Result<Vec<u8>, Error> {
    let header = fetch_descriptor(control, hci, DESCRIPTOR_TYPE_CONFIGURATION, index, 9)?;
    let total_length = u16::from_le_bytes([header[2], header[3]]) as usize;
    let full = fetch_descriptor(control, hci, DESCRIPTOR_TYPE_CONFIGURATION, index, total_length)?;
    ConfigurationDescriptor::new(&full).ok_or_else(|| messages::io("malformed configuration descriptor"))?;
    Ok(full)
}

fn set_configuration_on_wire(
    control: &ControlTransferEngine,
    hci: &dyn HostController,
    configuration_value: u8,
) -> Result<(), Error> {
    let setup = SetupPacket {
        request_type: request_type(Direction::Out, ControlType::Standard, Recipient::Device),
        request: SET_CONFIGURATION,
        value: configuration_value as u16,
        index: 0,
        length: 0,
    };
    control.control(hci, setup, Vec::new(), None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeController, FakeFramework};

    #[test]
    fn enumerate_publishes_children_for_a_single_interface_device() {
        let hci = FakeController::single_interface_device();
        let framework = FakeFramework::default();
        let core = DeviceCore::enumerate(&hci, &framework, 1, None).unwrap();

        assert_eq!(core.device_descriptor().vendor_id(), 0x1234);
        assert_eq!(framework.children().len(), 1);
        assert_eq!(
            core.interface_status(0),
            Some(crate::registry::InterfaceStatus::PublishedChild)
        );
    }

    #[test]
    fn realtek_override_selects_configuration_two() {
        let hci = FakeController::realtek_device();
        let framework = FakeFramework::default();
        let core = DeviceCore::enumerate(&hci, &framework, 1, None).unwrap();
        assert_eq!(core.current_configuration_value(), 2);
    }

    #[test]
    fn set_configuration_retracts_and_republishes() {
        let hci = FakeController::two_configuration_device();
        let framework = FakeFramework::default();
        let core = DeviceCore::enumerate(&hci, &framework, 1, None).unwrap();
        assert_eq!(framework.children().len(), 1);

        core.set_configuration(&hci, &framework, 2).unwrap();
        assert_eq!(core.current_configuration_value(), 2);
        assert_eq!(framework.children().len(), 2);
    }

    #[test]
    fn iad_groups_video_interfaces_into_one_child() {
        let hci = FakeController::iad_video_device();
        let framework = FakeFramework::default();
        let core = DeviceCore::enumerate(&hci, &framework, 1, None).unwrap();

        let children = framework.children();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].interface_number, 0);
        assert_eq!(children[1].interface_number, 2);
        assert_eq!(core.interface_status(0), Some(crate::registry::InterfaceStatus::PublishedChild));
        assert_eq!(core.interface_status(1), Some(crate::registry::InterfaceStatus::PublishedChild));
        assert_eq!(core.interface_status(2), Some(crate::registry::InterfaceStatus::PublishedChild));
    }

    #[test]
    fn child_name_is_the_device_id_not_the_interface_number() {
        let hci = FakeController::two_configuration_device();
        let framework = FakeFramework::default();
        let core = DeviceCore::enumerate(&hci, &framework, 42, None).unwrap();
        assert_eq!(core.interface_status(0), Some(crate::registry::InterfaceStatus::PublishedChild));

        let children = framework.children();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "042");
        assert_ne!(children[0].name, format!("{:03}", children[0].interface_number));
    }

    #[test]
    fn claim_after_publish_retracts_the_child() {
        let hci = FakeController::single_interface_device();
        let framework = FakeFramework::default();
        let core = DeviceCore::enumerate(&hci, &framework, 1, None).unwrap();
        assert_eq!(framework.children().len(), 1);

        core.claim_interface(&framework, 0).unwrap();
        assert_eq!(framework.children().len(), 0);
        assert_eq!(core.interface_status(0), Some(crate::registry::InterfaceStatus::Claimed));
    }
}
