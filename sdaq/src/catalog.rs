use std::fmt::{Display, Formatter};

/// Unit codes below this value name a base unit, the rest a specific unit.
pub const BASE_UNIT_REGION: u8 = 20;

const UNIT_NAMES: &[&str] = &[
    // base units
    "-", "V", "mA", "°C", "Pa", "mV", "Ohm", "", "", "", "", "", "", "", "", "", "", "", "", "",
    // specific units
    "V", "uV", "mV", "kV",
    "A", "uA", "mA", "kA",
    "°C",
    "bar", "barg", "Pa", "kPa", "MPa", "GPa",
    "um/m",
    "N", "kN", "MN",
    "m", "um", "mm", "cm", "dm",
    "m/s", "mm/s", "km/h",
    "m/s2", "gee",
    "Ohm", "kOhm", "MOhm",
    "Nm", "kNm", "MNm",
    "kg", "gram", "Tonn",
    "deg", "rad",
    "Hz", "kHz", "MHz", "rpm",
    "rad/s2", "deg/s2",
    "rad/s", "deg/s",
    "kg/s", "kg/min", "kg/h",
    "m3/s", "m3/min", "m3/h", "l/s", "l/min", "l/h",
    "%",
    "W", "kW", "MW",
    "J", "kJ", "MJ", "Wh", "kWh", "MWh",
    "mV/V", "mV/mA",
    "l", "m3",
    "mbar",
];

/// Printable name of a unit code, empty for codes without one.
pub fn unit_name(code: u8) -> &'static str {
    UNIT_NAMES.get(code as usize).copied().unwrap_or("")
}

/// The specific units, starting at [`BASE_UNIT_REGION`].
pub fn specific_units() -> &'static [&'static str] {
    &UNIT_NAMES[BASE_UNIT_REGION as usize..]
}

/// Device type byte reported in status and info frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
    serde_derive::Serialize, serde_derive::Deserialize)]
#[serde(transparent)]
pub struct DeviceType(pub u8);
impl DeviceType {
    pub const PSEUDO: Self = Self(0);
    pub const TC1: Self = Self(1);
    pub const TC16: Self = Self(2);
    pub const RTD: Self = Self(3);
    pub const CURRENT: Self = Self(4);
    pub const VOLTAGE: Self = Self(5);

    const NAMES: [&'static str; 6] = ["Pseudo_SDAQ", "SDAQ-TC1", "SDAQ-TC16", "SDAQ-RTD", "SDAQ-I", "SDAQ-U"];

    pub fn name(&self) -> Option<&'static str> {
        Self::NAMES.get(self.0 as usize).copied()
    }
    pub const fn code(&self) -> u8 { self.0 }
}
impl Display for DeviceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Unknown({})", self.0),
        }
    }
}

/// Kind of a stored calibration value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde_derive::Serialize, serde_derive::Deserialize)]
pub enum PointType {
    Measure = 1,
    Reference = 2,
    Offset = 3,
    Gain = 4,
    C2 = 5,
    C3 = 6,
}
impl PointType {
    pub const ALL: [PointType; 6] = [
        PointType::Measure,
        PointType::Reference,
        PointType::Offset,
        PointType::Gain,
        PointType::C2,
        PointType::C3,
    ];
    pub const fn code(self) -> u8 { self as u8 }
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(PointType::Measure),
            2 => Some(PointType::Reference),
            3 => Some(PointType::Offset),
            4 => Some(PointType::Gain),
            5 => Some(PointType::C2),
            6 => Some(PointType::C3),
            _ => None,
        }
    }
    pub const fn name(self) -> &'static str {
        match self {
            PointType::Measure => "Measure",
            PointType::Reference => "Reference",
            PointType::Offset => "Offset",
            PointType::Gain => "Gain",
            PointType::C2 => "C2",
            PointType::C3 => "C3",
        }
    }
}
impl Display for PointType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags::bitflags! {
    /// Status byte of a Device-Status frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeviceStatus: u8 {
        const MEASURING = 1 << 0;
        const IN_SYNC = 1 << 1;
        const ERROR = 1 << 2;
        const BOOTLOADER = 1 << 7;
    }
}
impl DeviceStatus {
    pub fn state_name(&self) -> &'static str {
        if self.contains(DeviceStatus::MEASURING) { "Measuring" } else { "Stand-By" }
    }
    pub fn mode_name(&self) -> &'static str {
        if self.contains(DeviceStatus::BOOTLOADER) { "Booting" } else { "Normal" }
    }
}
impl Display for DeviceStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}, sync: {}, error: {}, mode: {}",
            self.state_name(),
            if self.contains(DeviceStatus::IN_SYNC) { "Yes" } else { "No" },
            if self.contains(DeviceStatus::ERROR) { "Yes" } else { "No" },
            self.mode_name(),
        )
    }
}

bitflags::bitflags! {
    /// Status byte of a measurement frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChannelStatus: u8 {
        const NO_SENSOR = 1 << 0;
        const OUT_OF_RANGE = 1 << 1;
        const OVER_RANGE = 1 << 2;
    }
}
impl Display for ChannelStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.contains(ChannelStatus::NO_SENSOR) {
            f.write_str("No Sensor")
        } else if self.contains(ChannelStatus::OUT_OF_RANGE) {
            f.write_str("Out of Range")
        } else if self.contains(ChannelStatus::OVER_RANGE) {
            f.write_str("Over Range")
        } else if self.is_empty() {
            f.write_str("OK")
        } else {
            f.write_str("Unclassified bit")
        }
    }
}

bitflags::bitflags! {
    /// Argument of the Configure-Additional-Data command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AdditionalData: u8 {
        const RAW_MEASUREMENT = 1 << 0;
        const SYNC_DEBUG = 1 << 1;
    }
}
