use crate::catalog::{AdditionalData, ChannelStatus, DeviceStatus, DeviceType, PointType};
use crate::id::SdaqId;
use crate::port::Frame;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Protocol id {0:#04x} is not SDAQ traffic")]
    WrongProtocol(u8),
    #[error("Unknown payload type {0:#04x}")]
    UnknownPayloadType(u8),
    #[error("{payload_type:?} carries {expected} bytes, frame has {found}")]
    Length {
        payload_type: PayloadType,
        expected: usize,
        found: usize,
    },
    #[error("Invalid calibration point type {0}")]
    InvalidPointType(u8),
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    Synchronization = 0x01,
    Start = 0x02,
    Stop = 0x03,
    SetAddress = 0x06,
    QueryDeviceInfo = 0x07,
    QueryCalibrationData = 0x08,
    WriteCalibrationDate = 0x09,
    WriteCalibrationPoint = 0x0A,
    ChangeBaudrate = 0x0B,
    ConfigureAdditionalData = 0x0C,
    QuerySystemVariables = 0x0D,
    WriteSystemVariable = 0x0E,
    GotoBootloader = 0x20,
    EraseFlash = 0x21,
    WriteToPageBuffer = 0x22,
    TransferPageToFlash = 0x23,
    QueryFlashData = 0x24,
    GotoApplication = 0x25,
    Measurement = 0x84,
    DeviceStatus = 0x86,
    DeviceInfo = 0x88,
    CalibrationDate = 0x89,
    CalibrationPointData = 0x8A,
    UncalibratedMeasurement = 0x8B,
    SystemVariable = 0x8D,
    BootloaderReply = 0xA0,
    PageBuffer = 0xA1,
    SyncDebug = 0xC0,
}
impl PayloadType {
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => PayloadType::Synchronization,
            0x02 => PayloadType::Start,
            0x03 => PayloadType::Stop,
            0x06 => PayloadType::SetAddress,
            0x07 => PayloadType::QueryDeviceInfo,
            0x08 => PayloadType::QueryCalibrationData,
            0x09 => PayloadType::WriteCalibrationDate,
            0x0A => PayloadType::WriteCalibrationPoint,
            0x0B => PayloadType::ChangeBaudrate,
            0x0C => PayloadType::ConfigureAdditionalData,
            0x0D => PayloadType::QuerySystemVariables,
            0x0E => PayloadType::WriteSystemVariable,
            0x20 => PayloadType::GotoBootloader,
            0x21 => PayloadType::EraseFlash,
            0x22 => PayloadType::WriteToPageBuffer,
            0x23 => PayloadType::TransferPageToFlash,
            0x24 => PayloadType::QueryFlashData,
            0x25 => PayloadType::GotoApplication,
            0x84 => PayloadType::Measurement,
            0x86 => PayloadType::DeviceStatus,
            0x88 => PayloadType::DeviceInfo,
            0x89 => PayloadType::CalibrationDate,
            0x8A => PayloadType::CalibrationPointData,
            0x8B => PayloadType::UncalibratedMeasurement,
            0x8D => PayloadType::SystemVariable,
            0xA0 => PayloadType::BootloaderReply,
            0xA1 => PayloadType::PageBuffer,
            0xC0 => PayloadType::SyncDebug,
            _ => return None,
        })
    }
    pub const fn code(self) -> u8 { self as u8 }
    pub const fn is_from_device(self) -> bool { self.code() & crate::id::DEVICE_TO_MASTER != 0 }

    /// Fixed payload size of the message kind.
    pub const fn payload_len(self) -> usize {
        match self {
            PayloadType::Start
            | PayloadType::Stop
            | PayloadType::QueryDeviceInfo
            | PayloadType::QueryCalibrationData
            | PayloadType::QuerySystemVariables
            | PayloadType::GotoBootloader
            | PayloadType::GotoApplication => 0,
            PayloadType::ChangeBaudrate | PayloadType::ConfigureAdditionalData => 1,
            PayloadType::Synchronization => 2,
            PayloadType::TransferPageToFlash | PayloadType::QueryFlashData | PayloadType::SyncDebug => 4,
            PayloadType::SetAddress | PayloadType::WriteSystemVariable | PayloadType::SystemVariable => 5,
            PayloadType::WriteCalibrationDate
            | PayloadType::WriteCalibrationPoint
            | PayloadType::CalibrationDate
            | PayloadType::CalibrationPointData
            | PayloadType::DeviceStatus
            | PayloadType::DeviceInfo => 6,
            PayloadType::EraseFlash
            | PayloadType::WriteToPageBuffer
            | PayloadType::PageBuffer
            | PayloadType::Measurement
            | PayloadType::UncalibratedMeasurement
            | PayloadType::BootloaderReply => 8,
        }
    }

    pub const fn default_priority(self) -> u8 {
        match self {
            PayloadType::SetAddress
            | PayloadType::WriteCalibrationDate
            | PayloadType::WriteCalibrationPoint
            | PayloadType::ConfigureAdditionalData
            | PayloadType::DeviceStatus
            | PayloadType::DeviceInfo
            | PayloadType::CalibrationDate
            | PayloadType::CalibrationPointData
            | PayloadType::SystemVariable => 4,
            PayloadType::Measurement | PayloadType::UncalibratedMeasurement => 3,
            PayloadType::SyncDebug => 7,
            _ => 0,
        }
    }
}

/// Calibration date of one channel as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalibrationDate {
    /// Years since 2000.
    pub year: u8,
    pub month: u8,
    pub day: u8,
    /// Calibration period in months.
    pub period: u8,
    pub points: u8,
    pub unit: u8,
}
impl CalibrationDate {
    pub const fn calendar_year(&self) -> u16 { 2000 + self.year as u16 }
    pub fn date(&self) -> Option<chrono::NaiveDate> {
        chrono::NaiveDate::from_ymd_opt(self.calendar_year() as i32, self.month as u32, self.day as u32)
    }
    /// `None` for dates outside the 2000..=2255 range the wire can express.
    pub fn with_date(self, date: chrono::NaiveDate) -> Option<Self> {
        use chrono::Datelike;
        let year = u8::try_from(date.year().checked_sub(2000)?).ok()?;
        Some(Self {
            year,
            month: date.month() as u8,
            day: date.day() as u8,
            ..self
        })
    }
    fn encode(&self, buf: &mut [u8; 8]) {
        buf[..6].copy_from_slice(&[self.year, self.month, self.day, self.period, self.points, self.unit]);
    }
    fn decode(p: &[u8]) -> Self {
        Self {
            year: p[0],
            month: p[1],
            day: p[2],
            period: p[3],
            points: p[4],
            unit: p[5],
        }
    }
}

/// One calibration value of a channel.
#[derive(Debug, Clone, Copy, PartialEq, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct PointData {
    pub value: f32,
    pub kind: PointType,
    pub index: u8,
}
impl std::fmt::Display for PointData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}] = {}", self.kind, self.index, self.value)
    }
}
impl PointData {
    fn encode(&self, buf: &mut [u8; 8]) {
        buf[..4].copy_from_slice(&self.value.to_le_bytes());
        buf[4] = self.kind.code();
        buf[5] = self.index;
    }
    fn decode(p: &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            value: f32::from_le_bytes([p[0], p[1], p[2], p[3]]),
            kind: PointType::from_code(p[4]).ok_or(CodecError::InvalidPointType(p[4]))?,
            index: p[5],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub value: f32,
    pub unit: u8,
    pub status: ChannelStatus,
    /// Device time in milliseconds, wraps at 60000.
    pub timestamp: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub serial: u32,
    pub status: DeviceStatus,
    pub device_type: DeviceType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub firmware_rev: u8,
    pub hardware_rev: u8,
    pub channels: u8,
    pub sample_rate: u8,
    pub max_cal_points: u8,
}

/// A system variable; the value word is either an integer or a float
/// depending on the variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemVariable {
    pub raw: u32,
    pub number: u8,
}
impl SystemVariable {
    pub const fn from_u32(number: u8, value: u32) -> Self { Self { raw: value, number } }
    pub fn from_f32(number: u8, value: f32) -> Self { Self { raw: value.to_bits(), number } }
    pub const fn as_u32(&self) -> u32 { self.raw }
    pub fn as_f32(&self) -> f32 { f32::from_bits(self.raw) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootloaderReply {
    pub error_code: u8,
    /// Payload type of the command being answered.
    pub command: u8,
    pub iap_return: u32,
}
impl BootloaderReply {
    pub const fn is_ok(&self) -> bool { self.error_code == 0 && self.iap_return == 0 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncDebug {
    pub reference_time: u16,
    pub device_time: u16,
}

/// Every message of the protocol, with its decoded payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Message {
    Synchronization { time_seed: u16 },
    Start,
    Stop,
    SetAddress { serial: u32, address: u8 },
    QueryDeviceInfo,
    QueryCalibrationData,
    WriteCalibrationDate(CalibrationDate),
    WriteCalibrationPoint(PointData),
    ChangeBaudrate { code: u8 },
    ConfigureAdditionalData(AdditionalData),
    QuerySystemVariables,
    WriteSystemVariable(SystemVariable),
    GotoBootloader,
    EraseFlash { start: u32, end: u32 },
    WriteToPageBuffer([u8; 8]),
    TransferPageToFlash { address: u32 },
    QueryFlashData { address: u32 },
    GotoApplication,
    Measurement(Measurement),
    DeviceStatus(StatusReport),
    DeviceInfo(DeviceInfo),
    CalibrationDate(CalibrationDate),
    CalibrationPointData(PointData),
    UncalibratedMeasurement(Measurement),
    SystemVariable(SystemVariable),
    BootloaderReply(BootloaderReply),
    PageBuffer([u8; 8]),
    SyncDebug(SyncDebug),
}
impl Message {
    pub const fn payload_type(&self) -> PayloadType {
        match self {
            Message::Synchronization { .. } => PayloadType::Synchronization,
            Message::Start => PayloadType::Start,
            Message::Stop => PayloadType::Stop,
            Message::SetAddress { .. } => PayloadType::SetAddress,
            Message::QueryDeviceInfo => PayloadType::QueryDeviceInfo,
            Message::QueryCalibrationData => PayloadType::QueryCalibrationData,
            Message::WriteCalibrationDate(_) => PayloadType::WriteCalibrationDate,
            Message::WriteCalibrationPoint(_) => PayloadType::WriteCalibrationPoint,
            Message::ChangeBaudrate { .. } => PayloadType::ChangeBaudrate,
            Message::ConfigureAdditionalData(_) => PayloadType::ConfigureAdditionalData,
            Message::QuerySystemVariables => PayloadType::QuerySystemVariables,
            Message::WriteSystemVariable(_) => PayloadType::WriteSystemVariable,
            Message::GotoBootloader => PayloadType::GotoBootloader,
            Message::EraseFlash { .. } => PayloadType::EraseFlash,
            Message::WriteToPageBuffer(_) => PayloadType::WriteToPageBuffer,
            Message::TransferPageToFlash { .. } => PayloadType::TransferPageToFlash,
            Message::QueryFlashData { .. } => PayloadType::QueryFlashData,
            Message::GotoApplication => PayloadType::GotoApplication,
            Message::Measurement(_) => PayloadType::Measurement,
            Message::DeviceStatus(_) => PayloadType::DeviceStatus,
            Message::DeviceInfo(_) => PayloadType::DeviceInfo,
            Message::CalibrationDate(_) => PayloadType::CalibrationDate,
            Message::CalibrationPointData(_) => PayloadType::CalibrationPointData,
            Message::UncalibratedMeasurement(_) => PayloadType::UncalibratedMeasurement,
            Message::SystemVariable(_) => PayloadType::SystemVariable,
            Message::BootloaderReply(_) => PayloadType::BootloaderReply,
            Message::PageBuffer(_) => PayloadType::PageBuffer,
            Message::SyncDebug(_) => PayloadType::SyncDebug,
        }
    }

    fn encode_payload(&self, buf: &mut [u8; 8]) {
        match self {
            Message::Start
            | Message::Stop
            | Message::QueryDeviceInfo
            | Message::QueryCalibrationData
            | Message::QuerySystemVariables
            | Message::GotoBootloader
            | Message::GotoApplication => {}
            Message::Synchronization { time_seed } => buf[..2].copy_from_slice(&time_seed.to_le_bytes()),
            Message::SetAddress { serial, address } => {
                buf[..4].copy_from_slice(&serial.to_le_bytes());
                buf[4] = *address;
            }
            Message::WriteCalibrationDate(date) | Message::CalibrationDate(date) => date.encode(buf),
            Message::WriteCalibrationPoint(point) | Message::CalibrationPointData(point) => point.encode(buf),
            Message::ChangeBaudrate { code } => buf[0] = *code,
            Message::ConfigureAdditionalData(config) => buf[0] = config.bits(),
            Message::WriteSystemVariable(var) | Message::SystemVariable(var) => {
                buf[..4].copy_from_slice(&var.raw.to_le_bytes());
                buf[4] = var.number;
            }
            Message::EraseFlash { start, end } => {
                buf[..4].copy_from_slice(&start.to_le_bytes());
                buf[4..].copy_from_slice(&end.to_le_bytes());
            }
            Message::WriteToPageBuffer(chunk) | Message::PageBuffer(chunk) => *buf = *chunk,
            Message::TransferPageToFlash { address } | Message::QueryFlashData { address } => {
                buf[..4].copy_from_slice(&address.to_le_bytes())
            }
            Message::Measurement(meas) | Message::UncalibratedMeasurement(meas) => {
                buf[..4].copy_from_slice(&meas.value.to_le_bytes());
                buf[4] = meas.unit;
                buf[5] = meas.status.bits();
                buf[6..].copy_from_slice(&meas.timestamp.to_le_bytes());
            }
            Message::DeviceStatus(report) => {
                buf[..4].copy_from_slice(&report.serial.to_le_bytes());
                buf[4] = report.status.bits();
                buf[5] = report.device_type.code();
            }
            Message::DeviceInfo(info) => buf[..6].copy_from_slice(&[
                info.device_type.code(),
                info.firmware_rev,
                info.hardware_rev,
                info.channels,
                info.sample_rate,
                info.max_cal_points,
            ]),
            Message::BootloaderReply(reply) => {
                buf[0] = reply.error_code;
                buf[1] = reply.command;
                buf[4..].copy_from_slice(&reply.iap_return.to_le_bytes());
            }
            Message::SyncDebug(sync) => {
                buf[..2].copy_from_slice(&sync.reference_time.to_le_bytes());
                buf[2..4].copy_from_slice(&sync.device_time.to_le_bytes());
            }
        }
    }

    /// `p` has already been checked against [`PayloadType::payload_len`].
    fn decode_payload(payload_type: PayloadType, p: &[u8]) -> Result<Self, CodecError> {
        let u16_at = |at: usize| u16::from_le_bytes([p[at], p[at + 1]]);
        let u32_at = |at: usize| u32::from_le_bytes([p[at], p[at + 1], p[at + 2], p[at + 3]]);
        let chunk = || {
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(p);
            chunk
        };
        let measurement = || Measurement {
            value: f32::from_bits(u32_at(0)),
            unit: p[4],
            status: ChannelStatus::from_bits_retain(p[5]),
            timestamp: u16_at(6),
        };
        let variable = || SystemVariable { raw: u32_at(0), number: p[4] };

        Ok(match payload_type {
            PayloadType::Synchronization => Message::Synchronization { time_seed: u16_at(0) },
            PayloadType::Start => Message::Start,
            PayloadType::Stop => Message::Stop,
            PayloadType::SetAddress => Message::SetAddress { serial: u32_at(0), address: p[4] },
            PayloadType::QueryDeviceInfo => Message::QueryDeviceInfo,
            PayloadType::QueryCalibrationData => Message::QueryCalibrationData,
            PayloadType::WriteCalibrationDate => Message::WriteCalibrationDate(CalibrationDate::decode(p)),
            PayloadType::WriteCalibrationPoint => Message::WriteCalibrationPoint(PointData::decode(p)?),
            PayloadType::ChangeBaudrate => Message::ChangeBaudrate { code: p[0] },
            PayloadType::ConfigureAdditionalData => {
                Message::ConfigureAdditionalData(AdditionalData::from_bits_retain(p[0]))
            }
            PayloadType::QuerySystemVariables => Message::QuerySystemVariables,
            PayloadType::WriteSystemVariable => Message::WriteSystemVariable(variable()),
            PayloadType::GotoBootloader => Message::GotoBootloader,
            PayloadType::EraseFlash => Message::EraseFlash { start: u32_at(0), end: u32_at(4) },
            PayloadType::WriteToPageBuffer => Message::WriteToPageBuffer(chunk()),
            PayloadType::TransferPageToFlash => Message::TransferPageToFlash { address: u32_at(0) },
            PayloadType::QueryFlashData => Message::QueryFlashData { address: u32_at(0) },
            PayloadType::GotoApplication => Message::GotoApplication,
            PayloadType::Measurement => Message::Measurement(measurement()),
            PayloadType::DeviceStatus => Message::DeviceStatus(StatusReport {
                serial: u32_at(0),
                status: DeviceStatus::from_bits_retain(p[4]),
                device_type: DeviceType(p[5]),
            }),
            PayloadType::DeviceInfo => Message::DeviceInfo(DeviceInfo {
                device_type: DeviceType(p[0]),
                firmware_rev: p[1],
                hardware_rev: p[2],
                channels: p[3],
                sample_rate: p[4],
                max_cal_points: p[5],
            }),
            PayloadType::CalibrationDate => Message::CalibrationDate(CalibrationDate::decode(p)),
            PayloadType::CalibrationPointData => Message::CalibrationPointData(PointData::decode(p)?),
            PayloadType::UncalibratedMeasurement => Message::UncalibratedMeasurement(measurement()),
            PayloadType::SystemVariable => Message::SystemVariable(variable()),
            PayloadType::BootloaderReply => Message::BootloaderReply(BootloaderReply {
                error_code: p[0],
                command: p[1],
                iap_return: u32_at(4),
            }),
            PayloadType::PageBuffer => Message::PageBuffer(chunk()),
            PayloadType::SyncDebug => Message::SyncDebug(SyncDebug {
                reference_time: u16_at(0),
                device_time: u16_at(2),
            }),
        })
    }
}

/// A message together with the identifier fields that route it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Packet {
    /// Destination for commands, source for device replies.
    pub address: u8,
    pub channel: u8,
    pub priority: u8,
    pub message: Message,
}
impl Packet {
    pub const fn new(address: u8, message: Message) -> Self {
        Self::on_channel(address, 0, message)
    }
    pub const fn on_channel(address: u8, channel: u8, message: Message) -> Self {
        Self {
            address,
            channel,
            priority: message.payload_type().default_priority(),
            message,
        }
    }
    pub const fn id(&self) -> SdaqId {
        SdaqId::new(self.message.payload_type().code(), self.address, self.channel, self.priority)
    }

    pub fn encode(&self) -> Frame {
        let mut data = [0u8; 8];
        self.message.encode_payload(&mut data);
        Frame::from_array(self.id().to_raw(), data, self.message.payload_type().payload_len() as u8)
    }

    pub fn decode(frame: &Frame) -> Result<Self, CodecError> {
        let id = SdaqId::from_raw(frame.id());
        if !id.is_sdaq() {
            return Err(CodecError::WrongProtocol(id.protocol_id));
        }
        let payload_type = PayloadType::from_code(id.payload_type)
            .ok_or(CodecError::UnknownPayloadType(id.payload_type))?;
        let expected = payload_type.payload_len();
        if frame.data().len() != expected {
            return Err(CodecError::Length {
                payload_type,
                expected,
                found: frame.data().len(),
            });
        }
        Ok(Self {
            address: id.address,
            channel: id.channel,
            priority: id.priority,
            message: Message::decode_payload(payload_type, frame.data())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<Packet> {
        let date = CalibrationDate { year: 24, month: 5, day: 17, period: 12, points: 3, unit: 3 };
        let point = PointData { value: -12.5, kind: PointType::Gain, index: 15 };
        let meas = Measurement {
            value: 21.75,
            unit: 3,
            status: ChannelStatus::OUT_OF_RANGE,
            timestamp: 59_999,
        };
        vec![
            Packet::new(0, Message::Synchronization { time_seed: 0xBEEF }),
            Packet::new(5, Message::Start),
            Packet::new(5, Message::Stop),
            Packet::new(0, Message::SetAddress { serial: 0xDEAD_BEEF, address: 12 }),
            Packet::new(0, Message::QueryDeviceInfo),
            Packet::on_channel(5, 3, Message::QueryCalibrationData),
            Packet::on_channel(5, 3, Message::WriteCalibrationDate(date)),
            Packet::on_channel(5, 3, Message::WriteCalibrationPoint(point)),
            Packet::new(5, Message::ChangeBaudrate { code: 2 }),
            Packet::new(5, Message::ConfigureAdditionalData(AdditionalData::RAW_MEASUREMENT)),
            Packet::new(5, Message::QuerySystemVariables),
            Packet::new(5, Message::WriteSystemVariable(SystemVariable::from_f32(2, 1.5))),
            Packet::new(5, Message::GotoBootloader),
            Packet::new(5, Message::EraseFlash { start: 0x6C00, end: 0x1_FFFF }),
            Packet::on_channel(5, 31, Message::WriteToPageBuffer([1, 2, 3, 4, 5, 6, 7, 8])),
            Packet::new(5, Message::TransferPageToFlash { address: 0x7000 }),
            Packet::new(5, Message::QueryFlashData { address: 0x7100 }),
            Packet::new(5, Message::GotoApplication),
            Packet::on_channel(5, 1, Message::Measurement(meas)),
            Packet::new(5, Message::DeviceStatus(StatusReport {
                serial: 42,
                status: DeviceStatus::MEASURING | DeviceStatus::IN_SYNC,
                device_type: DeviceType::RTD,
            })),
            Packet::new(5, Message::DeviceInfo(DeviceInfo {
                device_type: DeviceType::TC16,
                firmware_rev: 7,
                hardware_rev: 2,
                channels: 16,
                sample_rate: 10,
                max_cal_points: 16,
            })),
            Packet::on_channel(5, 2, Message::CalibrationDate(date)),
            Packet::on_channel(5, 2, Message::CalibrationPointData(point)),
            Packet::on_channel(5, 2, Message::UncalibratedMeasurement(meas)),
            Packet::new(5, Message::SystemVariable(SystemVariable::from_u32(1, 99))),
            Packet::new(5, Message::BootloaderReply(BootloaderReply {
                error_code: 1,
                command: 0x23,
                iap_return: 0x0102_0304,
            })),
            Packet::on_channel(5, 7, Message::PageBuffer([9; 8])),
            Packet::new(5, Message::SyncDebug(SyncDebug { reference_time: 100, device_time: 130 })),
        ]
    }

    #[test]
    fn every_message_survives_the_wire() {
        for packet in catalog() {
            let frame = packet.encode();
            assert_eq!(frame.data().len(), packet.message.payload_type().payload_len());
            assert_eq!(Packet::decode(&frame), Ok(packet), "{packet:?}");
        }
    }

    #[test]
    fn direction_bit_matches_catalog() {
        for packet in catalog() {
            let kind = packet.message.payload_type();
            assert_eq!(PayloadType::from_code(kind.code()), Some(kind));
            assert_eq!(packet.id().is_from_device(), kind.is_from_device());
        }
    }

    #[test]
    fn payload_is_little_endian_and_packed() {
        let frame = Packet::on_channel(9, 1, Message::Measurement(Measurement {
            value: 1.0,
            unit: 4,
            status: ChannelStatus::NO_SENSOR,
            timestamp: 0x1234,
        }))
        .encode();
        assert_eq!(frame.data(), &[0x00, 0x00, 0x80, 0x3F, 4, 1, 0x34, 0x12]);
        assert_eq!(SdaqId::from_raw(frame.id()).priority, 3);

        let frame = Packet::new(0, Message::SetAddress { serial: 0x0403_0201, address: 7 }).encode();
        assert_eq!(frame.data(), &[1, 2, 3, 4, 7]);
    }

    #[test]
    fn rejects_foreign_and_malformed_frames() {
        let good = Packet::new(5, Message::QueryDeviceInfo).encode();

        let foreign = SdaqId { protocol_id: 0x11, ..SdaqId::from_raw(good.id()) };
        let frame = Frame::new(foreign.to_raw(), &[]).unwrap();
        assert_eq!(Packet::decode(&frame), Err(CodecError::WrongProtocol(0x11)));

        let frame = Frame::new(good.id(), &[1]).unwrap();
        assert!(matches!(Packet::decode(&frame), Err(CodecError::Length { expected: 0, found: 1, .. })));

        let unknown = SdaqId::new(0x55, 5, 0, 4);
        let frame = Frame::new(unknown.to_raw(), &[]).unwrap();
        assert_eq!(Packet::decode(&frame), Err(CodecError::UnknownPayloadType(0x55)));

        let point = SdaqId::new(PayloadType::CalibrationPointData.code(), 5, 1, 4);
        let frame = Frame::new(point.to_raw(), &[0, 0, 0, 0, 9, 0]).unwrap();
        assert_eq!(Packet::decode(&frame), Err(CodecError::InvalidPointType(9)));
    }

    #[test]
    fn calibration_date_calendar() {
        let date = CalibrationDate { year: 24, month: 2, day: 29, ..Default::default() };
        assert_eq!(date.date(), chrono::NaiveDate::from_ymd_opt(2024, 2, 29));
        assert_eq!(CalibrationDate { month: 13, ..date }.date(), None);

        let moved = date.with_date(chrono::NaiveDate::from_ymd_opt(2031, 12, 1).unwrap()).unwrap();
        assert_eq!((moved.year, moved.month, moved.day), (31, 12, 1));
        assert!(date.with_date(chrono::NaiveDate::from_ymd_opt(1999, 1, 1).unwrap()).is_none());
    }
}
