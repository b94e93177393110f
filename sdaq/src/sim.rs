//! Pseudo devices answering the device side of the protocol.
//!
//! Each [`PseudoDevice`] keeps its state behind one mutex; [`PseudoDevice::run`]
//! serves it on a port from a dedicated thread while tests or a UI poke the
//! same state through the handle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;

use crate::catalog::{AdditionalData, ChannelStatus, DeviceStatus, DeviceType, PointType};
use crate::commands::{self, PAGE_SECTIONS, PAGE_SIZE};
use crate::messages::{
    BootloaderReply, CalibrationDate, DeviceInfo, Measurement, Message, Packet, PayloadType, PointData,
    StatusReport, SyncDebug, SystemVariable,
};
use crate::port::{Frame, Port, PortError};
use crate::{RunFlag, BROADCAST_ADDRESS, MAX_CHANNELS, MAX_POINTS, PARKING_ADDRESS, POINT_TYPES};

/// Measurement period.
pub const TICK: Duration = Duration::from_millis(100);
/// Ticks between two unsolicited Device-Status frames.
pub const STATUS_TICKS: u32 = 100;
/// Status periods the in-sync flag survives without a synchronization.
const SYNC_HOLD_PERIODS: u32 = 12;
/// Largest reference/device time difference still counted as in sync, in ms.
const SYNC_WINDOW: u32 = 100;
/// Device time wraps here, in ms.
const TIME_WRAP: u32 = 60_000;
/// A raw measurement goes out every this many ticks when enabled.
const RAW_EVERY: u8 = 10;

const POINTS_PER_CHANNEL: usize = MAX_POINTS as usize;
const KINDS: usize = POINT_TYPES as usize;

/// Identity of a simulated device, `channels` is capped at [`MAX_CHANNELS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSetup {
    pub serial: u32,
    pub device_type: DeviceType,
    pub channels: u8,
}
impl DeviceSetup {
    pub const fn new(serial: u32, channels: u8) -> Self {
        Self {
            serial,
            device_type: DeviceType::PSEUDO,
            channels: if channels > MAX_CHANNELS { MAX_CHANNELS } else { channels },
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelOutput {
    value: f32,
    noise: bool,
    status: ChannelStatus,
}

#[derive(Debug)]
struct Bootloader {
    page_buffer: [u8; PAGE_SIZE],
    erased: Option<(u32, u32)>,
    flash: BTreeMap<u32, [u8; PAGE_SIZE]>,
    /// Transfers to this address are answered with an error.
    fault: Option<u32>,
}
impl Default for Bootloader {
    fn default() -> Self {
        Self {
            page_buffer: [0xFF; PAGE_SIZE],
            erased: None,
            flash: BTreeMap::new(),
            fault: None,
        }
    }
}

/// Wrapping millisecond clock of a device.
#[derive(Debug)]
struct DeviceClock {
    origin: Instant,
    offset: u32,
}
impl DeviceClock {
    fn new() -> Self {
        Self { origin: Instant::now(), offset: 0 }
    }
    fn now(&self) -> u16 {
        let elapsed = (self.origin.elapsed().as_millis() % TIME_WRAP as u128) as u32;
        ((elapsed + self.offset) % TIME_WRAP) as u16
    }
    fn set(&mut self, time: u16) {
        let elapsed = (self.origin.elapsed().as_millis() % TIME_WRAP as u128) as u32;
        self.offset = (time as u32 + TIME_WRAP - elapsed) % TIME_WRAP;
    }
}

fn time_difference(a: u16, b: u16) -> u32 {
    let diff = (a as u32).abs_diff(b as u32);
    diff.min(TIME_WRAP - diff.min(TIME_WRAP))
}

#[derive(Debug)]
struct DeviceState {
    setup: DeviceSetup,
    address: u8,
    status: DeviceStatus,
    outputs: [ChannelOutput; MAX_CHANNELS as usize],
    dates: [CalibrationDate; MAX_CHANNELS as usize],
    points: Vec<[[f32; KINDS]; POINTS_PER_CHANNEL]>,
    variables: BTreeMap<u8, u32>,
    additional: AdditionalData,
    raw_counter: u8,
    clock: DeviceClock,
    sync_count: u8,
    sync_hold: u32,
    status_countdown: u32,
    bootloader: Bootloader,
}

impl DeviceState {
    fn new(setup: DeviceSetup) -> Self {
        Self {
            setup: DeviceSetup { channels: setup.channels.min(MAX_CHANNELS), ..setup },
            address: PARKING_ADDRESS,
            status: DeviceStatus::empty(),
            outputs: [ChannelOutput::default(); MAX_CHANNELS as usize],
            dates: [CalibrationDate::default(); MAX_CHANNELS as usize],
            points: vec![[[0.0; KINDS]; POINTS_PER_CHANNEL]; MAX_CHANNELS as usize],
            variables: BTreeMap::new(),
            additional: AdditionalData::empty(),
            raw_counter: 0,
            clock: DeviceClock::new(),
            sync_count: 0,
            sync_hold: 0,
            status_countdown: STATUS_TICKS,
            bootloader: Bootloader::default(),
        }
    }

    fn status_frame(&self) -> Frame {
        commands::device_status(self.address, StatusReport {
            serial: self.setup.serial,
            status: self.status,
            device_type: self.setup.device_type,
        })
    }
    fn info_frame(&self) -> Frame {
        commands::device_info(self.address, DeviceInfo {
            device_type: self.setup.device_type,
            firmware_rev: 0,
            hardware_rev: 0,
            channels: self.setup.channels,
            sample_rate: (Duration::from_secs(1).as_millis() / TICK.as_millis()) as u8,
            max_cal_points: MAX_POINTS,
        })
    }
    fn date_frame(&self, channel: u8) -> Frame {
        commands::calibration_date(self.address, channel, self.dates[channel as usize - 1])
    }
    fn output(&mut self, channel: u8) -> Option<&mut ChannelOutput> {
        let slot = usize::from(channel.checked_sub(1)?);
        self.outputs.get_mut(slot)
    }
    fn owns_channel(&self, channel: u8) -> bool {
        (1..=self.setup.channels).contains(&channel)
    }
    fn reply(&self, command: PayloadType, ok: bool) -> Frame {
        commands::bootloader_reply(self.address, BootloaderReply {
            error_code: u8::from(!ok),
            command: command.code(),
            iap_return: 0,
        })
    }

    fn handle(&mut self, packet: &Packet) -> Vec<Frame> {
        let direct = packet.address == self.address;
        if !direct && packet.address != BROADCAST_ADDRESS {
            return Vec::new();
        }
        if self.status.contains(DeviceStatus::BOOTLOADER) {
            return if direct { self.handle_bootloader(packet) } else { Vec::new() };
        }
        let channel = packet.channel;
        match packet.message {
            Message::Stop => {
                self.status.remove(DeviceStatus::MEASURING);
                vec![self.status_frame()]
            }
            Message::Start if self.address != PARKING_ADDRESS => {
                self.status.insert(DeviceStatus::MEASURING);
                vec![self.status_frame()]
            }
            Message::ConfigureAdditionalData(config) => {
                self.additional = config;
                self.raw_counter = 0;
                Vec::new()
            }
            Message::SetAddress { serial, address } if serial == self.setup.serial => {
                if address == BROADCAST_ADDRESS || address > PARKING_ADDRESS {
                    tracing::warn!(serial, address, "invalid address requested");
                    return Vec::new();
                }
                self.status.remove(DeviceStatus::MEASURING);
                self.address = address;
                vec![self.status_frame()]
            }
            Message::ChangeBaudrate { .. } => {
                self.status.remove(DeviceStatus::MEASURING);
                vec![self.status_frame()]
            }
            Message::QueryDeviceInfo => {
                let mut frames = vec![self.status_frame(), self.info_frame()];
                frames.extend((1..=self.setup.channels).map(|channel| self.date_frame(channel)));
                frames
            }
            Message::QueryCalibrationData if direct && self.owns_channel(channel) => {
                let table = &self.points[channel as usize - 1];
                let mut frames = Vec::with_capacity(POINTS_PER_CHANNEL * KINDS + 1);
                for (index, values) in table.iter().enumerate() {
                    for (kind, value) in PointType::ALL.iter().zip(values) {
                        let point = PointData { value: *value, kind: *kind, index: index as u8 };
                        frames.push(commands::calibration_point(self.address, channel, point));
                    }
                }
                frames.push(self.date_frame(channel));
                frames
            }
            Message::WriteCalibrationDate(date) if direct && self.owns_channel(channel) => {
                if date.points <= MAX_POINTS {
                    self.dates[channel as usize - 1] = date;
                }
                Vec::new()
            }
            Message::WriteCalibrationPoint(point) if direct && self.owns_channel(channel) => {
                let writable =
                    !self.status.contains(DeviceStatus::MEASURING) || self.dates[channel as usize - 1].points == 0;
                if writable && point.index < MAX_POINTS {
                    let slot = point.kind.code() as usize - 1;
                    self.points[channel as usize - 1][point.index as usize][slot] = point.value;
                }
                Vec::new()
            }
            Message::Synchronization { time_seed } if !direct => self.synchronize(time_seed),
            Message::QuerySystemVariables if direct => self
                .variables
                .iter()
                .map(|(number, value)| commands::system_variable(self.address, SystemVariable::from_u32(*number, *value)))
                .collect(),
            Message::WriteSystemVariable(variable) if direct => {
                self.variables.insert(variable.number, variable.raw);
                Vec::new()
            }
            Message::GotoBootloader if direct => {
                self.status = DeviceStatus::BOOTLOADER;
                self.bootloader.page_buffer = [0xFF; PAGE_SIZE];
                tracing::debug!(serial = self.setup.serial, "bootloader entered");
                vec![self.status_frame()]
            }
            _ => Vec::new(),
        }
    }

    fn synchronize(&mut self, reference: u16) -> Vec<Frame> {
        let device_time = self.clock.now();
        let mut frames = Vec::new();
        if self.additional.contains(AdditionalData::SYNC_DEBUG) {
            frames.push(commands::sync_debug(self.address, SyncDebug {
                reference_time: reference,
                device_time,
            }));
        }
        if time_difference(device_time, reference) < SYNC_WINDOW {
            if self.sync_count > 1 {
                self.status.insert(DeviceStatus::IN_SYNC);
                self.sync_hold = SYNC_HOLD_PERIODS;
            } else {
                self.sync_count += 1;
            }
        } else {
            self.status.remove(DeviceStatus::IN_SYNC);
            self.sync_count = 0;
        }
        self.clock.set(reference);
        frames
    }

    fn handle_bootloader(&mut self, packet: &Packet) -> Vec<Frame> {
        match packet.message {
            Message::EraseFlash { start, end } => {
                self.bootloader.erased = (start <= end).then_some((start, end));
                self.bootloader.flash.clear();
                vec![self.reply(PayloadType::EraseFlash, start <= end)]
            }
            Message::WriteToPageBuffer(chunk) if (packet.channel as usize) < PAGE_SECTIONS => {
                let at = packet.channel as usize * 8;
                self.bootloader.page_buffer[at..at + 8].copy_from_slice(&chunk);
                vec![commands::page_buffer(self.address, packet.channel, chunk)]
            }
            Message::TransferPageToFlash { address } => {
                let erased = self.bootloader.erased.is_some_and(|(start, end)| (start..=end).contains(&address));
                let ok = erased && self.bootloader.fault != Some(address);
                if ok {
                    self.bootloader.flash.insert(address, self.bootloader.page_buffer);
                } else {
                    tracing::debug!(serial = self.setup.serial, address, "page transfer refused");
                }
                vec![self.reply(PayloadType::TransferPageToFlash, ok)]
            }
            Message::GotoApplication => {
                self.status = DeviceStatus::empty();
                tracing::debug!(serial = self.setup.serial, "application started");
                vec![self.status_frame()]
            }
            Message::GotoBootloader | Message::QueryDeviceInfo => vec![self.status_frame()],
            _ => Vec::new(),
        }
    }

    fn tick(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        let booting = self.status.contains(DeviceStatus::BOOTLOADER);
        if self.status.contains(DeviceStatus::MEASURING) && !booting {
            let timestamp = self.clock.now();
            let raw = self.additional.contains(AdditionalData::RAW_MEASUREMENT) && self.raw_counter >= RAW_EVERY;
            let mut rng = rand::thread_rng();
            for channel in 1..=self.setup.channels {
                let output = self.outputs[channel as usize - 1];
                let noise = if output.noise { rng.gen_range(-10..10) as f32 / 1000.0 } else { 0.0 };
                let measurement = Measurement {
                    value: output.value + noise,
                    unit: self.dates[channel as usize - 1].unit,
                    status: output.status,
                    timestamp,
                };
                frames.push(commands::measurement(self.address, channel, measurement));
                if raw {
                    let raw = Measurement {
                        status: output.status & ChannelStatus::NO_SENSOR,
                        ..measurement
                    };
                    frames.push(commands::uncalibrated_measurement(self.address, channel, raw));
                }
            }
            if self.additional.contains(AdditionalData::RAW_MEASUREMENT) {
                self.raw_counter = if self.raw_counter >= RAW_EVERY { 1 } else { self.raw_counter + 1 };
            }
        }
        self.status_countdown = self.status_countdown.saturating_sub(1);
        if self.status_countdown == 0 {
            if self.sync_hold == 0 {
                self.status.remove(DeviceStatus::IN_SYNC);
            } else {
                self.sync_hold -= 1;
            }
            frames.push(self.status_frame());
            self.status_countdown = STATUS_TICKS;
        }
        frames
    }
}

/// Handle to one simulated device. Clones share the device.
#[derive(Clone)]
pub struct PseudoDevice {
    state: Arc<Mutex<DeviceState>>,
}
impl PseudoDevice {
    pub fn new(setup: DeviceSetup) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState::new(setup))),
        }
    }

    pub fn serial(&self) -> u32 { self.state.lock().setup.serial }
    pub fn address(&self) -> u8 { self.state.lock().address }
    pub fn status(&self) -> DeviceStatus { self.state.lock().status }

    /// Value reported by `channel` (1-based) while measuring.
    pub fn set_output(&self, channel: u8, value: f32) {
        if let Some(output) = self.state.lock().output(channel) {
            output.value = value;
        }
    }
    pub fn set_noise(&self, channel: u8, noise: bool) {
        if let Some(output) = self.state.lock().output(channel) {
            output.noise = noise;
        }
    }
    pub fn set_channel_status(&self, channel: u8, status: ChannelStatus) {
        if let Some(output) = self.state.lock().output(channel) {
            output.status = status;
        }
    }
    pub fn calibration_date(&self, channel: u8) -> Option<CalibrationDate> {
        let state = self.state.lock();
        state.owns_channel(channel).then(|| state.dates[channel as usize - 1])
    }
    pub fn calibration_point(&self, channel: u8, kind: PointType, index: u8) -> Option<f32> {
        let state = self.state.lock();
        if !state.owns_channel(channel) || index >= MAX_POINTS {
            return None;
        }
        Some(state.points[channel as usize - 1][index as usize][kind.code() as usize - 1])
    }

    /// Makes the bootloader refuse transfers to `address`.
    pub fn set_transfer_fault(&self, address: Option<u32>) {
        self.state.lock().bootloader.fault = address;
    }
    /// Flash pages written since the last erase, by address.
    pub fn flash(&self) -> BTreeMap<u32, [u8; PAGE_SIZE]> {
        self.state.lock().bootloader.flash.clone()
    }

    /// Frames the device sends in answer to `packet`.
    pub fn handle(&self, packet: &Packet) -> Vec<Frame> {
        self.state.lock().handle(packet)
    }
    /// Frames the device sends on its own during one [`TICK`].
    pub fn tick(&self) -> Vec<Frame> {
        self.state.lock().tick()
    }

    /// Serves the device on `port` until `run` is cleared.
    pub fn run<P: Port + ?Sized>(&self, port: &P, run: &RunFlag) -> Result<(), PortError> {
        port.send(&self.state.lock().status_frame())?;
        let mut next_tick = Instant::now() + TICK;
        while run.is_running() {
            let now = Instant::now();
            let frames = if now >= next_tick {
                next_tick = (next_tick + TICK).max(now);
                self.tick()
            } else {
                match port.receive(next_tick - now)? {
                    Some(frame) => match Packet::decode(&frame) {
                        Ok(packet) => self.handle(&packet),
                        Err(err) => {
                            tracing::trace!(%err, "frame dropped");
                            continue;
                        }
                    },
                    None => continue,
                }
            };
            for frame in &frames {
                port.send(frame)?;
            }
        }
        Ok(())
    }

    pub fn spawn<P: Port + Send + 'static>(&self, port: P, run: RunFlag) -> JoinHandle<Result<(), PortError>> {
        let device = self.clone();
        std::thread::spawn(move || device.run(&port, &run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> PseudoDevice {
        PseudoDevice::new(DeviceSetup::new(77, 2))
    }
    fn send(device: &PseudoDevice, address: u8, message: Message) -> Vec<Packet> {
        send_on(device, address, 0, message)
    }
    fn send_on(device: &PseudoDevice, address: u8, channel: u8, message: Message) -> Vec<Packet> {
        device
            .handle(&Packet::on_channel(address, channel, message))
            .iter()
            .map(|frame| Packet::decode(frame).unwrap())
            .collect()
    }

    #[test]
    fn starts_parked_and_takes_its_address() {
        let device = device();
        assert_eq!(device.address(), PARKING_ADDRESS);
        assert!(send(&device, 0, Message::SetAddress { serial: 78, address: 5 }).is_empty());
        assert!(send(&device, 0, Message::SetAddress { serial: 77, address: 0 }).is_empty());
        let out = send(&device, 0, Message::SetAddress { serial: 77, address: 5 });
        assert_eq!(out[0].address, 5);
        assert_eq!(device.address(), 5);
    }

    #[test]
    fn start_is_ignored_while_parked() {
        let device = device();
        assert!(send(&device, PARKING_ADDRESS, Message::Start).is_empty());
        send(&device, 0, Message::SetAddress { serial: 77, address: 3 });
        send(&device, 3, Message::Start);
        assert!(device.status().contains(DeviceStatus::MEASURING));
        send(&device, 0, Message::Stop);
        assert!(!device.status().contains(DeviceStatus::MEASURING));
    }

    #[test]
    fn info_query_answers_status_info_and_dates() {
        let device = device();
        let out = send(&device, 0, Message::QueryDeviceInfo);
        let kinds: Vec<PayloadType> = out.iter().map(|p| p.message.payload_type()).collect();
        assert_eq!(kinds, vec![
            PayloadType::DeviceStatus,
            PayloadType::DeviceInfo,
            PayloadType::CalibrationDate,
            PayloadType::CalibrationDate,
        ]);
        assert_eq!((out[2].channel, out[3].channel), (1, 2));
    }

    #[test]
    fn channel_count_is_capped() {
        assert_eq!(DeviceSetup::new(1, 40).channels, MAX_CHANNELS);
        let device = PseudoDevice::new(DeviceSetup { serial: 78, device_type: DeviceType::PSEUDO, channels: 200 });
        let out = send(&device, 0, Message::QueryDeviceInfo);
        let Message::DeviceInfo(info) = out[1].message else {
            panic!("device info expected, got {:?}", out[1]);
        };
        assert_eq!(info.channels, MAX_CHANNELS);
        assert_eq!(out.len(), 2 + MAX_CHANNELS as usize);
        assert_eq!(out.last().map(|packet| packet.channel), Some(MAX_CHANNELS));

        send(&device, 0, Message::SetAddress { serial: 78, address: 4 });
        send(&device, 4, Message::Start);
        let measured = device
            .tick()
            .iter()
            .filter_map(|frame| Packet::decode(frame).ok())
            .filter(|packet| matches!(packet.message, Message::Measurement(_)))
            .count();
        assert_eq!(measured, MAX_CHANNELS as usize);
    }

    #[test]
    fn calibration_writes_land_in_the_tables() {
        let device = device();
        send(&device, 0, Message::SetAddress { serial: 77, address: 9 });
        let date = CalibrationDate { year: 25, month: 1, day: 2, period: 6, points: 1, unit: 3 };
        send_on(&device, 9, 2, Message::WriteCalibrationDate(date));
        let point = PointData { value: 4.5, kind: PointType::Gain, index: 3 };
        send_on(&device, 9, 2, Message::WriteCalibrationPoint(point));
        send_on(&device, 9, 3, Message::WriteCalibrationDate(date));
        assert_eq!(device.calibration_date(2), Some(date));
        assert_eq!(device.calibration_date(3), None);
        assert_eq!(device.calibration_point(2, PointType::Gain, 3), Some(4.5));

        let page = send_on(&device, 9, 2, Message::QueryCalibrationData);
        assert_eq!(page.len(), POINTS_PER_CHANNEL * KINDS + 1);
        assert!(page.contains(&Packet::on_channel(9, 2, Message::CalibrationPointData(point))));
        assert_eq!(page.last().map(|p| p.message), Some(Message::CalibrationDate(date)));
    }

    #[test]
    fn measures_every_channel_per_tick() {
        let device = device();
        send(&device, 0, Message::SetAddress { serial: 77, address: 4 });
        device.set_output(2, 12.5);
        device.set_channel_status(1, ChannelStatus::NO_SENSOR);
        assert!(device.tick().is_empty());
        send(&device, 4, Message::Start);
        let out: Vec<Packet> = device.tick().iter().map(|f| Packet::decode(f).unwrap()).collect();
        assert_eq!(out.len(), 2);
        let Message::Measurement(second) = out[1].message else {
            panic!("measurement expected");
        };
        assert_eq!((out[1].channel, second.value), (2, 12.5));
        assert!(matches!(out[0].message, Message::Measurement(m) if m.status == ChannelStatus::NO_SENSOR));
    }

    #[test]
    fn bootloader_echoes_and_flashes_pages() {
        let device = device();
        send(&device, 0, Message::SetAddress { serial: 77, address: 2 });
        let out = send(&device, 2, Message::GotoBootloader);
        assert!(matches!(out[0].message, Message::DeviceStatus(r) if r.status == DeviceStatus::BOOTLOADER));

        send(&device, 2, Message::EraseFlash { start: 0x6C00, end: 0x7FFF });
        let echo = send_on(&device, 2, 5, Message::WriteToPageBuffer([1; 8]));
        assert_eq!(echo, vec![Packet::on_channel(2, 5, Message::PageBuffer([1; 8]))]);
        let reply = send(&device, 2, Message::TransferPageToFlash { address: 0x7000 });
        assert!(matches!(reply[0].message, Message::BootloaderReply(r) if r.is_ok()));
        let reply = send(&device, 2, Message::TransferPageToFlash { address: 0x9000 });
        assert!(matches!(reply[0].message, Message::BootloaderReply(r) if !r.is_ok()));

        let page = device.flash().remove(&0x7000).unwrap();
        assert_eq!(&page[40..48], &[1; 8]);
        assert_eq!(page[0], 0xFF);

        send(&device, 2, Message::GotoApplication);
        assert!(!device.status().contains(DeviceStatus::BOOTLOADER));
    }

    #[test]
    fn time_difference_wraps() {
        assert_eq!(time_difference(10, 59_990), 20);
        assert_eq!(time_difference(500, 400), 100);
    }
}
