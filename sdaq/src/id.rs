use crate::PROTOCOL_ID;

/// Extended-frame flag of a SocketCAN identifier word.
pub const EFF_FLAG: u32 = 0x8000_0000;
/// Bits of a 29-bit extended identifier.
pub const EXTENDED_MASK: u32 = 0x1FFF_FFFF;
/// Set in `payload_type` for traffic flowing from a device to the master.
pub const DEVICE_TO_MASTER: u8 = 0x80;

// Identifier layout, least significant field first:
// channel 0..=5, address 6..=11, payload type 12..=19,
// protocol 20..=25, priority 26..=28.
const CHANNEL_SHIFT: u32 = 0;
const ADDRESS_SHIFT: u32 = 6;
const PAYLOAD_TYPE_SHIFT: u32 = 12;
const PROTOCOL_SHIFT: u32 = 20;
const PRIORITY_SHIFT: u32 = 26;

const SIX_BITS: u32 = 0x3F;
const EIGHT_BITS: u32 = 0xFF;
const THREE_BITS: u32 = 0x07;

/// Decoded view of the 29-bit SDAQ identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SdaqId {
    pub channel: u8,
    pub address: u8,
    pub payload_type: u8,
    pub protocol_id: u8,
    pub priority: u8,
}
impl SdaqId {
    pub const fn new(payload_type: u8, address: u8, channel: u8, priority: u8) -> Self {
        Self {
            channel,
            address,
            payload_type,
            protocol_id: PROTOCOL_ID,
            priority,
        }
    }
    pub const fn to_raw(&self) -> u32 {
        ((self.channel as u32 & SIX_BITS) << CHANNEL_SHIFT)
            | ((self.address as u32 & SIX_BITS) << ADDRESS_SHIFT)
            | ((self.payload_type as u32 & EIGHT_BITS) << PAYLOAD_TYPE_SHIFT)
            | ((self.protocol_id as u32 & SIX_BITS) << PROTOCOL_SHIFT)
            | ((self.priority as u32 & THREE_BITS) << PRIORITY_SHIFT)
    }
    /// Flag bits above the 29-bit identifier are ignored.
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            channel: ((raw >> CHANNEL_SHIFT) & SIX_BITS) as u8,
            address: ((raw >> ADDRESS_SHIFT) & SIX_BITS) as u8,
            payload_type: ((raw >> PAYLOAD_TYPE_SHIFT) & EIGHT_BITS) as u8,
            protocol_id: ((raw >> PROTOCOL_SHIFT) & SIX_BITS) as u8,
            priority: ((raw >> PRIORITY_SHIFT) & THREE_BITS) as u8,
        }
    }
    pub const fn is_sdaq(&self) -> bool { self.protocol_id == PROTOCOL_ID }
    pub const fn is_from_device(&self) -> bool { self.payload_type & DEVICE_TO_MASTER != 0 }
}

/// Acceptance filter, a frame passes when `(id & mask) == (self.id & mask)`.
///
/// Only the 29 identifier bits take part; ports add the extended-frame flag
/// themselves when they install the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxFilter {
    pub id: u32,
    pub mask: u32,
}
impl RxFilter {
    pub const ACCEPT_ALL: Self = Self { id: 0, mask: 0 };

    const PROTOCOL_MASK: u32 = SIX_BITS << PROTOCOL_SHIFT;
    const DIRECTION_MASK: u32 = (DEVICE_TO_MASTER as u32) << PAYLOAD_TYPE_SHIFT;
    const ADDRESS_MASK: u32 = SIX_BITS << ADDRESS_SHIFT;

    /// Everything the devices on the bus send to the master.
    pub const fn from_devices() -> Self {
        Self {
            id: ((PROTOCOL_ID as u32) << PROTOCOL_SHIFT) | Self::DIRECTION_MASK,
            mask: Self::PROTOCOL_MASK | Self::DIRECTION_MASK,
        }
    }
    /// Traffic sent to the master by the device at `address`.
    pub const fn from_device(address: u8) -> Self {
        let base = Self::from_devices();
        Self {
            id: base.id | ((address as u32 & SIX_BITS) << ADDRESS_SHIFT),
            mask: base.mask | Self::ADDRESS_MASK,
        }
    }
    /// Commands sent by a master, what a device listens to.
    pub const fn to_devices() -> Self {
        Self {
            id: (PROTOCOL_ID as u32) << PROTOCOL_SHIFT,
            mask: Self::PROTOCOL_MASK | Self::DIRECTION_MASK,
        }
    }
    pub const fn matches(&self, id: u32) -> bool {
        (id & self.mask) == (self.id & self.mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_land_on_documented_bits() {
        let id = SdaqId::new(0x86, 63, 5, 4);
        let raw = id.to_raw();
        assert_eq!(raw & 0x3F, 5);
        assert_eq!((raw >> 6) & 0x3F, 63);
        assert_eq!((raw >> 12) & 0xFF, 0x86);
        assert_eq!((raw >> 20) & 0x3F, 0x35);
        assert_eq!((raw >> 26) & 0x7, 4);
        assert_eq!(raw & !EXTENDED_MASK, 0);
        assert_eq!(SdaqId::from_raw(raw), id);
        assert_eq!(SdaqId::from_raw(raw | EFF_FLAG), id);
    }

    #[test]
    fn oversized_fields_are_truncated() {
        let id = SdaqId::new(0x07, 200, 70, 9);
        let back = SdaqId::from_raw(id.to_raw());
        assert_eq!(back.address, 200 & 0x3F);
        assert_eq!(back.channel, 70 & 0x3F);
        assert_eq!(back.priority, 9 & 0x7);
    }

    #[test]
    fn filters_split_traffic_by_direction() {
        let status = SdaqId::new(0x86, 5, 0, 4).to_raw();
        let query = SdaqId::new(0x07, 5, 0, 4).to_raw();
        let foreign = SdaqId { protocol_id: 0x12, ..SdaqId::new(0x86, 5, 0, 4) }.to_raw();

        assert!(RxFilter::from_devices().matches(status));
        assert!(!RxFilter::from_devices().matches(query));
        assert!(!RxFilter::from_devices().matches(foreign));
        assert!(RxFilter::to_devices().matches(query));
        assert!(!RxFilter::to_devices().matches(status));
        assert!(RxFilter::from_device(5).matches(status));
        assert!(!RxFilter::from_device(6).matches(status));
        assert!(RxFilter::ACCEPT_ALL.matches(foreign));
    }
}
