//! The device-framework capability this crate publishes children to.
//!
//! Only the framework's contract with this crate matters here: the node
//! implementation itself, device-tree topology, and driver binding are out
//! of scope. A real device-framework binding, or a test double such as
//! [`crate::testutil::FakeFramework`], implements [`DeviceFramework`].

use crate::error::Error;

/// Opaque handle to a published child node, returned by
/// [`DeviceFramework::add_child`] and later passed to
/// [`DeviceFramework::remove_child`].
pub type ChildHandle = u64;

/// Properties published on the composite device's own (non-bindable) node.
#[derive(Debug, Clone)]
pub struct DeviceProperties {
    /// `idVendor` from the device descriptor.
    pub vendor_id: u16,
    /// `idProduct` from the device descriptor.
    pub product_id: u16,
    /// `bDeviceClass` from the device descriptor.
    pub class: u8,
    /// `bDeviceSubClass` from the device descriptor.
    pub subclass: u8,
    /// `bDeviceProtocol` from the device descriptor.
    pub protocol: u8,
}

/// Everything the framework needs to publish one interface (or IAD) child.
#[derive(Debug, Clone)]
pub struct ChildDescriptor {
    /// Name for the child node, e.g. `"000"` (the device id, zero-padded to
    /// three digits) for the device's first- and only- published interface.
    pub name: String,
    /// The interface number (or first interface number, for an IAD group)
    /// this child represents.
    pub interface_number: u8,
    /// Owned copy of the byte span of the configuration blob covering this
    /// interface (or IAD group) and all of its alternate settings.
    pub descriptors: Vec<u8>,
}

/// Capability set consumed from the device-framework surface.
pub trait DeviceFramework: Send + Sync {
    /// Publish the composite device's own node, flagged non-bindable: class
    /// drivers bind to the interface children, not to this node.
    fn publish_device(&self, properties: &DeviceProperties) -> Result<(), Error>;

    /// Publish one interface (or IAD) child node, returning a handle used to
    /// remove it later.
    fn add_child(&self, child: ChildDescriptor) -> Result<ChildHandle, Error>;

    /// Remove a previously published child node.
    fn remove_child(&self, handle: ChildHandle);
}

/// Marker for a hub-protocol capability set.
///
/// The core exposes `hub_id` as plain data (see
/// [`crate::device::DeviceCore::hub_id`]) but does not itself implement hub
/// port commands or status-change polling; those are delegated to whatever
/// implements this trait, set via
/// [`crate::device::DeviceCore::set_hub_interface`]. No methods are defined
/// here because hub protocol semantics are out of scope for this crate.
pub trait HubInterface: Send + Sync {}
