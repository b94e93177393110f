//! Live view of one device: a receiver thread folds its frames into a snapshot
//! and queues every measurement for whoever prints or logs them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::Mutex;

use crate::catalog::{unit_name, AdditionalData};
use crate::commands;
use crate::messages::{CalibrationDate, DeviceInfo, Measurement, Message, Packet, StatusReport};
use crate::port::{Port, PortError};
use crate::RunFlag;

/// How long the receiver blocks before looking at the run flag again.
const POLL: Duration = Duration::from_millis(100);

/// One measurement as it came off the bus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub address: u8,
    pub channel: u8,
    pub measurement: Measurement,
    /// Uncalibrated measurement.
    pub raw: bool,
    pub received: DateTime<Local>,
}
impl Reading {
    pub const CSV_HEADER: &'static str = "timestamp,address,channel,value,unit,status";

    pub fn csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.received.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.address,
            self.channel,
            self.measurement.value,
            unit_name(self.measurement.unit),
            self.measurement.status,
        )
    }
}
impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CH{:02}{} {:>12.4} {:<6} {:>6}ms  {}",
            self.channel,
            if self.raw { " raw" } else { "" },
            self.measurement.value,
            unit_name(self.measurement.unit),
            self.measurement.timestamp,
            self.measurement.status,
        )
    }
}

/// Everything last heard from a device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSnapshot {
    pub status: Option<StatusReport>,
    pub info: Option<DeviceInfo>,
    pub dates: BTreeMap<u8, CalibrationDate>,
    pub measurements: BTreeMap<u8, Measurement>,
}
impl DeviceSnapshot {
    /// Folds `packet` in, returning it as a reading if it was a measurement.
    pub fn record(&mut self, packet: &Packet) -> Option<Reading> {
        let (measurement, raw) = match packet.message {
            Message::DeviceStatus(report) => {
                self.status = Some(report);
                return None;
            }
            Message::DeviceInfo(info) => {
                self.info = Some(info);
                return None;
            }
            Message::CalibrationDate(date) => {
                self.dates.insert(packet.channel, date);
                return None;
            }
            Message::Measurement(measurement) => {
                self.measurements.insert(packet.channel, measurement);
                (measurement, false)
            }
            Message::UncalibratedMeasurement(measurement) => (measurement, true),
            _ => return None,
        };
        Some(Reading {
            address: packet.address,
            channel: packet.channel,
            measurement,
            raw,
            received: Local::now(),
        })
    }
}

/// Watches the device at one address on a shared port.
pub struct DeviceMonitor<P: Port + Send + Sync + 'static> {
    address: u8,
    port: Arc<P>,
    snapshot: Arc<Mutex<DeviceSnapshot>>,
    readings: mpsc::Receiver<Reading>,
    run: RunFlag,
    handle: Option<JoinHandle<Result<(), PortError>>>,
}
impl<P: Port + Send + Sync + 'static> DeviceMonitor<P> {
    pub fn start(port: Arc<P>, address: u8) -> Self {
        let snapshot = Arc::new(Mutex::new(DeviceSnapshot::default()));
        let (tx, readings) = mpsc::channel();
        let run = RunFlag::new();
        let handle = {
            let port = port.clone();
            let snapshot = snapshot.clone();
            let run = run.clone();
            std::thread::spawn(move || receive_loop(&*port, address, &snapshot, &tx, &run))
        };
        Self {
            address,
            port,
            snapshot,
            readings,
            run,
            handle: Some(handle),
        }
    }

    pub const fn address(&self) -> u8 { self.address }
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.snapshot.lock().clone()
    }

    /// Waits at most `timeout` for the next reading.
    pub fn next_reading(&self, timeout: Duration) -> Option<Reading> {
        self.readings.recv_timeout(timeout).ok()
    }
    /// Readings already queued, without waiting.
    pub fn pending(&self) -> impl Iterator<Item = Reading> + '_ {
        self.readings.try_iter()
    }

    pub fn start_measuring(&self) -> Result<(), PortError> {
        self.port.send(&commands::start(self.address))
    }
    pub fn stop_measuring(&self) -> Result<(), PortError> {
        self.port.send(&commands::stop(self.address))
    }
    pub fn query_info(&self) -> Result<(), PortError> {
        self.port.send(&commands::query_device_info(self.address))
    }
    pub fn configure(&self, config: AdditionalData) -> Result<(), PortError> {
        self.port.send(&commands::configure_additional_data(self.address, config))
    }

    /// Stops the receiver and reports how it ended.
    pub fn stop(mut self) -> Result<(), PortError> {
        self.run.stop();
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(result)) => result,
            Some(Err(_)) => {
                tracing::error!(address = self.address, "monitor thread panicked");
                Err(PortError::Disconnected)
            }
            None => Ok(()),
        }
    }
}
impl<P: Port + Send + Sync + 'static> Drop for DeviceMonitor<P> {
    fn drop(&mut self) {
        self.run.stop();
    }
}

fn receive_loop<P: Port + ?Sized>(
    port: &P,
    address: u8,
    snapshot: &Mutex<DeviceSnapshot>,
    readings: &mpsc::Sender<Reading>,
    run: &RunFlag,
) -> Result<(), PortError> {
    tracing::debug!(address, "monitor started");
    while run.is_running() {
        let Some(frame) = port.receive(POLL)? else {
            continue;
        };
        let packet = match Packet::decode(&frame) {
            Ok(packet) if packet.address == address => packet,
            Ok(_) => continue,
            Err(err) => {
                tracing::trace!(%err, "frame dropped");
                continue;
            }
        };
        let Some(reading) = snapshot.lock().record(&packet) else {
            continue;
        };
        if readings.send(reading).is_err() {
            break;
        }
    }
    tracing::debug!(address, "monitor stopped");
    Ok(())
}
