use std::time::Duration;

use crate::discovery::{discover, DeviceEntry, Registry};
use crate::port::{Port, PortError};
use crate::{commands, MAX_DEVICE_ADDRESS};

#[derive(thiserror::Error, Debug)]
pub enum AutoconfigError {
    #[error(transparent)]
    Port(#[from] PortError),
    #[error("Address conflict found on {} device(s), autoconfig gives up", .0.len())]
    Conflict(Vec<DeviceEntry>),
    #[error("No free address left for {0} parked device(s)")]
    AddressesExhausted(usize),
    #[error("Device with S/N {serial} did not show up at address {address} after configuration")]
    Verification { serial: u32, address: u8 },
}

/// What an autoconfiguration run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    NoDevices,
    /// Nobody was parked, nothing was sent.
    AllConfigured(Registry),
    /// Parked devices moved to their new addresses, entries carry the new address.
    Assigned(Vec<DeviceEntry>),
}

/// Gives every parked device of `registry` the lowest address that no device on
/// the bus holds, walking the candidates once so no address is handed out twice.
pub fn assign_addresses(registry: &Registry) -> Result<Vec<DeviceEntry>, AutoconfigError> {
    let parked = registry.parked();
    let mut candidates = (1..=MAX_DEVICE_ADDRESS).filter(|address| !registry.holds_address(*address));
    let mut assigned = Vec::with_capacity(parked.len());
    for (i, entry) in parked.iter().enumerate() {
        let Some(address) = candidates.next() else {
            return Err(AutoconfigError::AddressesExhausted(parked.len() - i));
        };
        assigned.push(DeviceEntry { address, ..*entry });
    }
    Ok(assigned)
}

/// Scans the bus, addresses the parked devices and scans again to confirm.
pub fn autoconfig<P: Port + ?Sized>(port: &P, timeout: Duration) -> Result<Outcome, AutoconfigError> {
    let registry = discover(port, timeout)?;
    if registry.is_empty() {
        return Ok(Outcome::NoDevices);
    }
    let conflicts = registry.conflicts();
    if !conflicts.is_empty() {
        return Err(AutoconfigError::Conflict(conflicts));
    }
    let assigned = assign_addresses(&registry)?;
    if assigned.is_empty() {
        return Ok(Outcome::AllConfigured(registry));
    }
    for entry in &assigned {
        tracing::info!(serial = entry.serial, address = entry.address, "assigning address");
        port.send(&commands::set_address(entry.serial, entry.address))?;
    }

    let verification = discover(port, timeout)?;
    for entry in &assigned {
        if verification.find(entry.serial) != Some(entry) {
            return Err(AutoconfigError::Verification {
                serial: entry.serial,
                address: entry.address,
            });
        }
    }
    Ok(Outcome::Assigned(assigned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DeviceType;
    use crate::PARKING_ADDRESS;

    fn entry(serial: u32, address: u8) -> DeviceEntry {
        DeviceEntry { serial, address, device_type: DeviceType::TC1 }
    }

    #[test]
    fn parked_devices_fill_the_gaps_in_serial_order() {
        let registry: Registry = [
            entry(100, 1),
            entry(101, 3),
            entry(7, PARKING_ADDRESS),
            entry(5, PARKING_ADDRESS),
            entry(6, PARKING_ADDRESS),
        ]
        .into_iter()
        .collect();
        let assigned = assign_addresses(&registry).unwrap();
        let pairs: Vec<(u32, u8)> = assigned.iter().map(|e| (e.serial, e.address)).collect();
        assert_eq!(pairs, vec![(5, 2), (6, 4), (7, 5)]);
    }

    #[test]
    fn never_hands_out_broadcast_or_parking() {
        let registry: Registry = (1..=61u32)
            .map(|serial| entry(serial, serial as u8))
            .chain([entry(1000, PARKING_ADDRESS)])
            .collect();
        let assigned = assign_addresses(&registry).unwrap();
        assert_eq!(assigned[0].address, 62);

        let crowded: Registry = (1..=62u32)
            .map(|serial| entry(serial, serial as u8))
            .chain([entry(1000, PARKING_ADDRESS)])
            .collect();
        assert!(matches!(assign_addresses(&crowded), Err(AutoconfigError::AddressesExhausted(1))));
    }

    #[test]
    fn nothing_parked_nothing_assigned() {
        let registry: Registry = [entry(1, 4), entry(2, 9)].into_iter().collect();
        assert!(assign_addresses(&registry).unwrap().is_empty());
    }
}
