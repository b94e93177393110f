//! Reading, comparing and writing the calibration data of one device.

use std::time::Duration;

use serde::Deserialize as _;

use crate::catalog::{unit_name, DeviceType, BASE_UNIT_REGION};
use crate::messages::{CalibrationDate, DeviceInfo, Message, Packet, PointData, StatusReport};
use crate::port::{Port, PortError};
use crate::{commands, Deadline, POINT_TYPES};

mod correlation;
pub use correlation::{correlate, Checks, CorrelationError, FieldMismatch};

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error(transparent)]
    Port(#[from] PortError),
    #[error("No device found at address {0}")]
    NotResponding(u8),
    #[error("Device at address {0} reports no channels")]
    NoChannels(u8),
    #[error("Data for CH{received} received while reading CH{expected}")]
    OutOfOrder { expected: u8, received: u8 },
    #[error("Reading the calibration points of CH{channel} failed after {limit} retries")]
    TooManyRetries { channel: u8, limit: u32 },
    #[error("CH{channel} has a calibration date the wire cannot carry")]
    InvalidDate { channel: u8 },
    #[error("Writing the calibration date of CH{channel} failed: {source}")]
    WriteDate { channel: u8, source: PortError },
    #[error("Writing calibration point {index} of CH{channel} failed: {source}")]
    WritePoint { channel: u8, index: u8, source: PortError },
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
}

/// Identity block of a configuration, what Device-Status and Device-Info report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct DeviceIdentity {
    pub serial: u32,
    pub device_type: DeviceType,
    pub firmware_rev: u8,
    pub hardware_rev: u8,
    pub channels: u8,
    pub sample_rate: u8,
    pub max_cal_points: u8,
}
impl DeviceIdentity {
    pub fn new(status: &StatusReport, info: &DeviceInfo) -> Self {
        Self {
            serial: status.serial,
            device_type: info.device_type,
            firmware_rev: info.firmware_rev,
            hardware_rev: info.hardware_rev,
            channels: info.channels,
            sample_rate: info.sample_rate,
            max_cal_points: info.max_cal_points,
        }
    }
}

/// Calibration record of one channel. `points` is `None` until the points were read.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct ChannelCalibration {
    pub channel: u8,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    /// Months the calibration stays valid.
    pub period: u8,
    pub amount_of_points: u8,
    pub unit: u8,
    #[serde(default)]
    pub points: Option<Vec<PointData>>,
}
impl ChannelCalibration {
    pub fn from_wire(channel: u8, date: &CalibrationDate) -> Self {
        Self {
            channel,
            year: date.calendar_year(),
            month: date.month,
            day: date.day,
            period: date.period,
            amount_of_points: date.points,
            unit: date.unit,
            points: None,
        }
    }
    /// `None` when the year is outside 2000..=2255.
    pub fn wire_date(&self) -> Option<CalibrationDate> {
        Some(CalibrationDate {
            year: u8::try_from(self.year.checked_sub(2000)?).ok()?,
            month: self.month,
            day: self.day,
            period: self.period,
            points: self.amount_of_points,
            unit: self.unit,
        })
    }
    pub fn date(&self) -> Option<chrono::NaiveDate> {
        chrono::NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)
    }
    /// Takes the date fields of `date`, the points stay.
    pub fn set_date(&mut self, date: &CalibrationDate) {
        let points = self.points.take();
        *self = Self { points, ..Self::from_wire(self.channel, date) };
    }
    /// Replaces the point with the same type and index in place, or appends it.
    pub fn upsert_point(&mut self, point: PointData) {
        let points = self.points.get_or_insert_with(Vec::new);
        match points.iter_mut().find(|known| known.kind == point.kind && known.index == point.index) {
            Some(known) => *known = point,
            None => points.push(point),
        }
    }
    pub fn has_points(&self) -> bool {
        self.points.as_ref().is_some_and(|points| !points.is_empty())
    }
    /// Unit name, tagged when it comes from the base region.
    pub fn unit_label(&self) -> String {
        if self.unit < BASE_UNIT_REGION {
            format!("{}(Base)", unit_name(self.unit))
        } else {
            unit_name(self.unit).to_owned()
        }
    }
}

fn sorted_channels<'de, D: serde::Deserializer<'de>>(de: D) -> Result<Vec<ChannelCalibration>, D::Error> {
    let mut channels = Vec::<ChannelCalibration>::deserialize(de)?;
    channels.sort_by_key(|record| record.channel);
    channels.dedup_by_key(|record| record.channel);
    Ok(channels)
}

/// Everything known about the calibration of one device, channels ordered by number.
#[derive(Debug, Clone, PartialEq, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct CalibrationSet {
    pub device: DeviceIdentity,
    #[serde(default, deserialize_with = "sorted_channels")]
    channels: Vec<ChannelCalibration>,
}
impl CalibrationSet {
    pub fn new(device: DeviceIdentity) -> Self {
        Self { device, channels: Vec::new() }
    }
    pub fn channels(&self) -> &[ChannelCalibration] { &self.channels }
    pub fn channel(&self, channel: u8) -> Option<&ChannelCalibration> {
        self.position(channel).ok().map(|at| &self.channels[at])
    }
    fn position(&self, channel: u8) -> Result<usize, usize> {
        self.channels.binary_search_by_key(&channel, |record| record.channel)
    }
    fn entry(&mut self, channel: u8) -> &mut ChannelCalibration {
        let at = match self.position(channel) {
            Ok(at) => at,
            Err(at) => {
                let empty = ChannelCalibration::from_wire(channel, &CalibrationDate::default());
                self.channels.insert(at, empty);
                at
            }
        };
        &mut self.channels[at]
    }

    /// Adds `record`, replacing any record of the same channel.
    pub fn insert(&mut self, record: ChannelCalibration) {
        match self.position(record.channel) {
            Ok(at) => self.channels[at] = record,
            Err(at) => self.channels.insert(at, record),
        }
    }
    pub fn upsert_date(&mut self, channel: u8, date: &CalibrationDate) {
        self.entry(channel).set_date(date);
    }
    pub fn upsert_point(&mut self, channel: u8, point: PointData) {
        self.entry(channel).upsert_point(point);
    }
    pub fn clear_points(&mut self, channel: u8) {
        if let Ok(at) = self.position(channel) {
            self.channels[at].points = None;
        }
    }
    pub fn has_points(&self) -> bool {
        self.channels.iter().any(ChannelCalibration::has_points)
    }
}

/// Runs the calibration sequences against the device at one address.
pub struct Calibrator<'p, P: Port + ?Sized> {
    port: &'p P,
    address: u8,
    timeout: Duration,
    channel_timeout: Duration,
    retries: u32,
    write_pace: Duration,
}
impl<'p, P: Port + ?Sized> Calibrator<'p, P> {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
    /// Time a device gets to send the whole point page of one channel.
    pub const CHANNEL_TIMEOUT: Duration = Duration::from_millis(250);
    pub const RETRIES: u32 = 10;
    /// Gap between consecutive writes, a real controller drops frames sent back to back.
    pub const WRITE_PACE: Duration = Duration::from_millis(10);

    pub fn new(port: &'p P, address: u8) -> Self {
        Self {
            port,
            address,
            timeout: Self::DEFAULT_TIMEOUT,
            channel_timeout: Self::CHANNEL_TIMEOUT,
            retries: Self::RETRIES,
            write_pace: Self::WRITE_PACE,
        }
    }
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
    pub fn with_channel_timeout(self, channel_timeout: Duration) -> Self {
        Self { channel_timeout, ..self }
    }
    pub fn with_write_pace(self, write_pace: Duration) -> Self {
        Self { write_pace, ..self }
    }
    pub const fn address(&self) -> u8 { self.address }

    /// Identity and calibration dates, without points.
    pub fn read_info(&self) -> Result<CalibrationSet, CalibrationError> {
        let deadline = Deadline::after(self.timeout);
        self.port.send(&commands::query_device_info(self.address))?;
        let mut status = None;
        let mut info: Option<DeviceInfo> = None;
        let mut dates = CalibrationSet::new(DeviceIdentity::default());
        loop {
            if let (Some(status), Some(info)) = (&status, &info) {
                if dates.channels.len() >= info.channels as usize {
                    dates.device = DeviceIdentity::new(status, info);
                    tracing::debug!(address = self.address, channels = info.channels, "device info read");
                    return Ok(dates);
                }
            }
            if deadline.expired() {
                return Err(CalibrationError::NotResponding(self.address));
            }
            let Some(frame) = self.port.receive(deadline.remaining())? else {
                continue;
            };
            let Ok(packet) = Packet::decode(&frame) else {
                continue;
            };
            if packet.address != self.address {
                continue;
            }
            match packet.message {
                Message::DeviceStatus(report) => status = Some(report),
                Message::DeviceInfo(report) => info = Some(report),
                Message::CalibrationDate(date) => dates.upsert_date(packet.channel, &date),
                _ => {}
            }
        }
    }

    /// Reads the points of `channels` (all channels when `None`) into `set`.
    pub fn read_points(&self, set: &mut CalibrationSet, channels: Option<&[u8]>) -> Result<(), CalibrationError> {
        if set.device.channels == 0 {
            return Err(CalibrationError::NoChannels(self.address));
        }
        let wanted: Vec<u8> = match channels {
            Some(channels) => channels.to_vec(),
            None => (1..=set.device.channels).collect(),
        };
        let page = set.device.max_cal_points as usize * POINT_TYPES as usize + 1;
        let mut retries = 0;
        for channel in wanted {
            while !self.read_channel(set, channel, page)? {
                retries += 1;
                if retries > self.retries {
                    return Err(CalibrationError::TooManyRetries { channel, limit: self.retries });
                }
                tracing::warn!(address = self.address, channel, retries, "incomplete point page, retrying");
                set.clear_points(channel);
            }
        }
        Ok(())
    }

    /// `Ok(false)` when the page did not complete in time.
    fn read_channel(&self, set: &mut CalibrationSet, channel: u8, page: usize) -> Result<bool, CalibrationError> {
        let deadline = Deadline::after(self.channel_timeout);
        self.port.send(&commands::query_calibration_data(self.address, channel))?;
        let mut received = 0;
        while received < page {
            if deadline.expired() {
                return Ok(false);
            }
            let Some(frame) = self.port.receive(deadline.remaining())? else {
                continue;
            };
            let Ok(packet) = Packet::decode(&frame) else {
                continue;
            };
            if packet.address != self.address {
                continue;
            }
            match packet.message {
                Message::CalibrationPointData(point) if packet.channel == channel => {
                    set.upsert_point(channel, point);
                    received += 1;
                }
                Message::CalibrationDate(_) if packet.channel != channel => {
                    return Err(CalibrationError::OutOfOrder { expected: channel, received: packet.channel });
                }
                Message::CalibrationDate(date) => {
                    set.upsert_date(channel, &date);
                    received += 1;
                }
                _ => {}
            }
        }
        Ok(true)
    }

    pub fn read_all(&self) -> Result<CalibrationSet, CalibrationError> {
        let mut set = self.read_info()?;
        self.read_points(&mut set, None)?;
        Ok(set)
    }

    pub fn write_date(&self, channel: u8, date: &CalibrationDate) -> Result<(), CalibrationError> {
        self.paced(&commands::write_calibration_date(self.address, channel, date))
            .map_err(|source| CalibrationError::WriteDate { channel, source })
    }
    pub fn write_point(&self, channel: u8, point: &PointData) -> Result<(), CalibrationError> {
        self.paced(&commands::write_calibration_point(self.address, channel, point))
            .map_err(|source| CalibrationError::WritePoint { channel, index: point.index, source })
    }
    fn paced(&self, frame: &crate::Frame) -> Result<(), PortError> {
        self.port.send(frame)?;
        if !self.write_pace.is_zero() {
            std::thread::sleep(self.write_pace);
        }
        Ok(())
    }

    /// Writes every channel of `set`. Channels with points get a zero-point date
    /// first, then their points, then the real date.
    pub fn write(&self, set: &CalibrationSet) -> Result<(), CalibrationError> {
        for record in set.channels() {
            let date = record
                .wire_date()
                .ok_or(CalibrationError::InvalidDate { channel: record.channel })?;
            if date.points > 0 {
                self.write_date(record.channel, &CalibrationDate { points: 0, ..date })?;
                for point in record.points.iter().flatten() {
                    self.write_point(record.channel, point)?;
                }
            }
            self.write_date(record.channel, &date)?;
            tracing::debug!(address = self.address, channel = record.channel, "calibration written");
        }
        Ok(())
    }

    /// Checks `new` belongs to the device, writes it and optionally reads it back.
    pub fn apply(&self, new: &CalibrationSet, verify: bool) -> Result<(), CalibrationError> {
        let current = self.read_info()?;
        correlate(&current, new, Checks::INFO)?;
        self.write(new)?;
        tracing::info!(address = self.address, channels = new.channels().len(), "configuration written");
        if !verify {
            return Ok(());
        }
        let mut written = self.read_info()?;
        let mut checks = Checks::empty();
        if !new.channels().is_empty() {
            checks |= Checks::DATE;
        }
        let with_points: Vec<u8> = new
            .channels()
            .iter()
            .filter(|record| record.has_points())
            .map(|record| record.channel)
            .collect();
        if !with_points.is_empty() {
            self.read_points(&mut written, Some(&with_points))?;
            checks |= Checks::POINTS;
        }
        correlate(&written, new, checks)?;
        tracing::info!(address = self.address, "configuration verified");
        Ok(())
    }
}
