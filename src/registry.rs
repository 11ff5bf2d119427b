//! Tracks the publish/claim status of every interface number in the current
//! configuration, and coordinates claiming, publishing, and retracting their
//! child nodes with the device framework.
//!
//! An interface association groups several interface numbers behind one
//! published child; claiming any interface number in the group claims the
//! whole group, since the function they jointly implement can only be bound
//! to one driver.

use std::sync::Mutex;

use crate::{
    error::{messages, Error},
    framework::{ChildDescriptor, ChildHandle, DeviceFramework},
};

/// Status of one interface number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceStatus {
    /// No child has been published and no driver has claimed this interface.
    Available,
    /// A child node has been published for this interface (or the group it
    /// belongs to).
    PublishedChild,
    /// A sibling driver claimed this interface; no child is published.
    Claimed,
}

struct Child {
    interface_numbers: Vec<u8>,
    handle: ChildHandle,
}

struct Inner {
    statuses: Vec<InterfaceStatus>,
    children: Vec<Child>,
}

/// Outcome of [`InterfaceRegistry::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The child was published and its interfaces transitioned to `PublishedChild`.
    Published,
    /// One of the group's interfaces was already claimed; nothing was published.
    AlreadyClaimed,
}

/// Per-device registry of interface status, guarded by a single mutex
/// (`interface_mutex` in the design notes).
pub struct InterfaceRegistry {
    inner: Mutex<Inner>,
}

impl InterfaceRegistry {
    /// Create a registry with all interfaces `Available`.
    pub fn new(num_interfaces: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                statuses: vec![InterfaceStatus::Available; num_interfaces],
                children: Vec::new(),
            }),
        }
    }

    /// Status of `interface_number`, or `None` if it is out of range for the
    /// current configuration.
    pub fn status(&self, interface_number: u8) -> Option<InterfaceStatus> {
        self.inner
            .lock()
            .unwrap()
            .statuses
            .get(interface_number as usize)
            .copied()
    }

    /// Snapshot of every interface's status, indexed by interface number.
    pub fn statuses(&self) -> Vec<InterfaceStatus> {
        self.inner.lock().unwrap().statuses.clone()
    }

    /// Publish a child covering `interface_numbers` if all of them are
    /// `Available`.
    ///
    /// Re-checks status under the lock immediately after `framework.add_child`
    /// returns: if a sibling claimed one of the interfaces while the
    /// framework call was in flight, the freshly-published child is
    /// retracted instead of being left live and unreachable through the
    /// registry.
    pub fn publish(
        &self,
        framework: &dyn DeviceFramework,
        interface_numbers: &[u8],
        descriptor: ChildDescriptor,
    ) -> Result<PublishOutcome, Error> {
        {
            let inner = self.inner.lock().unwrap();
            for &n in interface_numbers {
                match inner.statuses.get(n as usize) {
                    Some(InterfaceStatus::Available) => {}
                    Some(InterfaceStatus::Claimed) => return Ok(PublishOutcome::AlreadyClaimed),
                    Some(InterfaceStatus::PublishedChild) => return Ok(PublishOutcome::Published),
                    None => {
                        return Err(messages::invalid_args(
                            "interface number out of range for current configuration",
                        ))
                    }
                }
            }
        }

        // Call out to the framework without holding the lock: add_child may
        // be synchronous and a foreign claim() must not deadlock on it.
        let handle = framework.add_child(descriptor)?;

        let mut inner = self.inner.lock().unwrap();
        let claimed_meanwhile = interface_numbers
            .iter()
            .any(|&n| inner.statuses.get(n as usize).copied() == Some(InterfaceStatus::Claimed));
        if claimed_meanwhile {
            drop(inner);
            framework.remove_child(handle);
            return Ok(PublishOutcome::AlreadyClaimed);
        }

        for &n in interface_numbers {
            inner.statuses[n as usize] = InterfaceStatus::PublishedChild;
        }
        inner.children.push(Child {
            interface_numbers: interface_numbers.to_vec(),
            handle,
        });
        Ok(PublishOutcome::Published)
    }

    /// Claim `interface_number` for the caller. If it currently belongs to a
    /// published child, the whole child (and every interface number it
    /// covers) is retracted and marked `Claimed` first.
    pub fn claim(&self, framework: &dyn DeviceFramework, interface_number: u8) -> Result<(), Error> {
        let retracted = {
            let mut inner = self.inner.lock().unwrap();
            let retracted = match inner.statuses.get(interface_number as usize).copied() {
                Some(InterfaceStatus::Claimed) => {
                    return Err(messages::already_bound("interface is already claimed"))
                }
                Some(InterfaceStatus::PublishedChild) => {
                    let idx = inner
                        .children
                        .iter()
                        .position(|c| c.interface_numbers.contains(&interface_number))
                        .ok_or_else(|| {
                            messages::bad_state(
                                "interface status is PublishedChild but no child record exists",
                            )
                        })?;
                    Some(inner.children.remove(idx))
                }
                Some(InterfaceStatus::Available) => None,
                None => {
                    return Err(messages::invalid_args(
                        "interface number out of range for current configuration",
                    ))
                }
            };
            let covered = retracted
                .as_ref()
                .map(|c| c.interface_numbers.clone())
                .unwrap_or_else(|| vec![interface_number]);
            for n in covered {
                inner.statuses[n as usize] = InterfaceStatus::Claimed;
            }
            retracted
        };

        if let Some(child) = retracted {
            framework.remove_child(child.handle);
        }
        Ok(())
    }

    /// Remove every published child and clear the set. Used before a
    /// configuration switch and during device teardown. Does not reset
    /// interface statuses — callers that are about to install a new
    /// configuration follow this with [`InterfaceRegistry::reset`].
    pub fn retract_all(&self, framework: &dyn DeviceFramework) {
        let children = {
            let mut inner = self.inner.lock().unwrap();
            std::mem::take(&mut inner.children)
        };
        for child in children {
            framework.remove_child(child.handle);
        }
    }

    /// Resize to `num_interfaces` and reset every status to `Available`.
    /// Callers must have already retracted all children via
    /// [`InterfaceRegistry::retract_all`].
    pub fn reset(&self, num_interfaces: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.statuses = vec![InterfaceStatus::Available; num_interfaces];
        inner.children.clear();
    }
}
