use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::catalog::DeviceType;
use crate::messages::{Message, Packet};
use crate::port::{Port, PortError};
use crate::{commands, Deadline, BROADCAST_ADDRESS, PARKING_ADDRESS};

/// A device heard during a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct DeviceEntry {
    pub serial: u32,
    pub address: u8,
    pub device_type: DeviceType,
}
impl DeviceEntry {
    pub const fn is_parked(&self) -> bool { self.address == PARKING_ADDRESS }
}
impl Display for DeviceEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let device_type = self.device_type.to_string();
        if self.is_parked() {
            write!(f, "{device_type:>13} with S/N: {:010} at Address: Park", self.serial)
        } else {
            write!(f, "{device_type:>13} with S/N: {:010} at Address: {}", self.serial, self.address)
        }
    }
}

/// Devices found on the bus, one per serial number, ordered by address then serial.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    entries: Vec<DeviceEntry>,
}
impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the first entry seen for a serial number; returns whether `entry` was added.
    pub fn insert(&mut self, entry: DeviceEntry) -> bool {
        if self.find(entry.serial).is_some() {
            return false;
        }
        let at = self
            .entries
            .partition_point(|known| (known.address, known.serial) < (entry.address, entry.serial));
        self.entries.insert(at, entry);
        true
    }
    pub fn find(&self, serial: u32) -> Option<&DeviceEntry> {
        self.entries.iter().find(|entry| entry.serial == serial)
    }
    pub fn holds_address(&self, address: u8) -> bool {
        let at = self.entries.partition_point(|entry| entry.address < address);
        self.entries.get(at).is_some_and(|entry| entry.address == address)
    }
    pub fn entries(&self) -> &[DeviceEntry] { &self.entries }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Devices waiting at the parking address, ordered by serial number.
    pub fn parked(&self) -> Vec<DeviceEntry> {
        let start = self.entries.partition_point(|entry| entry.address < PARKING_ADDRESS);
        // parking is the highest address, the tail is already ordered by serial
        self.entries[start..].iter().copied().filter(DeviceEntry::is_parked).collect()
    }

    /// Every configured device that shares its address with another one.
    pub fn conflicts(&self) -> Vec<DeviceEntry> {
        self.entries
            .chunk_by(|a, b| a.address == b.address)
            .filter(|group| group.len() > 1 && !group[0].is_parked())
            .flatten()
            .copied()
            .collect()
    }
}
impl FromIterator<DeviceEntry> for Registry {
    fn from_iter<T: IntoIterator<Item = DeviceEntry>>(iter: T) -> Self {
        let mut registry = Registry::new();
        for entry in iter {
            registry.insert(entry);
        }
        registry
    }
}

/// Broadcasts an info query and collects every Device-Status heard until `timeout`.
///
/// An empty registry means nothing answered; only port failures are errors.
pub fn discover<P: Port + ?Sized>(port: &P, timeout: Duration) -> Result<Registry, PortError> {
    let deadline = Deadline::after(timeout);
    port.send(&commands::query_device_info(BROADCAST_ADDRESS))?;
    let mut registry = Registry::new();
    while !deadline.expired() {
        let Some(frame) = port.receive(deadline.remaining())? else {
            continue;
        };
        match Packet::decode(&frame) {
            Ok(Packet {
                address,
                message: Message::DeviceStatus(report),
                ..
            }) => {
                let entry = DeviceEntry {
                    serial: report.serial,
                    address,
                    device_type: report.device_type,
                };
                if registry.insert(entry) {
                    tracing::debug!(serial = entry.serial, address, "device found");
                }
            }
            Ok(_) => {}
            Err(err) => tracing::trace!(%err, "frame dropped"),
        }
    }
    tracing::info!(devices = registry.len(), "scan finished");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(serial: u32, address: u8) -> DeviceEntry {
        DeviceEntry { serial, address, device_type: DeviceType::PSEUDO }
    }

    #[test]
    fn registry_is_sorted_by_address_then_serial() {
        let registry: Registry = [entry(9, 5), entry(3, 63), entry(4, 5), entry(1, 2), entry(2, 63)]
            .into_iter()
            .collect();
        let order: Vec<(u8, u32)> = registry.entries().iter().map(|e| (e.address, e.serial)).collect();
        assert_eq!(order, vec![(2, 1), (5, 4), (5, 9), (63, 2), (63, 3)]);
    }

    #[test]
    fn duplicate_serials_keep_first_sighting() {
        let mut registry = Registry::new();
        assert!(registry.insert(entry(7, 63)));
        assert!(!registry.insert(entry(7, 12)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find(7).map(|e| e.address), Some(63));
    }

    #[test]
    fn parked_and_conflicting_views() {
        let registry: Registry = [entry(20, 5), entry(10, 5), entry(30, 7), entry(50, 63), entry(40, 63)]
            .into_iter()
            .collect();

        let conflicts: Vec<u32> = registry.conflicts().iter().map(|e| e.serial).collect();
        assert_eq!(conflicts, vec![10, 20]);

        let parked: Vec<u32> = registry.parked().iter().map(|e| e.serial).collect();
        assert_eq!(parked, vec![40, 50]);
    }

    #[test]
    fn every_member_of_a_larger_collision_is_reported() {
        let registry: Registry = [entry(1, 4), entry(2, 4), entry(3, 4), entry(4, 6), entry(5, 9), entry(6, 9)]
            .into_iter()
            .collect();
        let conflicts: Vec<u32> = registry.conflicts().iter().map(|e| e.serial).collect();
        assert_eq!(conflicts, vec![1, 2, 3, 5, 6]);
    }

    #[test]
    fn no_conflicts_among_unique_addresses() {
        let registry: Registry = [entry(1, 1), entry(2, 2), entry(3, 63)].into_iter().collect();
        assert!(registry.conflicts().is_empty());
        assert!(registry.holds_address(2));
        assert!(!registry.holds_address(3));
    }
}
