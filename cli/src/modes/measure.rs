use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::mpsc::TryRecvError;
use std::time::Duration;

use anyhow::Context;
use sdaq::catalog::AdditionalData;
use sdaq::monitor::{DeviceMonitor, DeviceSnapshot};
use sdaq::port::CanPort;

use crate::options::Options;

const POLL: Duration = Duration::from_millis(100);

/// A line typed on stdin while measuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    Start,
    Stop,
    Info,
    /// Toggles the uncalibrated measurements next to the calibrated ones.
    Raw,
    Quit,
    Blank,
}
impl Input {
    const HELP: &'static str = "Commands: start, stop, info, raw, quit";
}
impl FromStr for Input {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "start" => Ok(Input::Start),
            "stop" => Ok(Input::Stop),
            "info" => Ok(Input::Info),
            "raw" => Ok(Input::Raw),
            "quit" | "q" => Ok(Input::Quit),
            "" => Ok(Input::Blank),
            other => anyhow::bail!("Unknown command {other}, {}", Input::HELP),
        }
    }
}

fn print_snapshot(address: u8, snapshot: &DeviceSnapshot) {
    match &snapshot.status {
        Some(report) => println!(
            "Address {address}: {} S/N {:010}, {}",
            report.device_type, report.serial, report.status
        ),
        None => println!("Address {address}: no status heard yet"),
    }
    if let Some(info) = &snapshot.info {
        println!(
            "Firmware rev: {}  Hardware rev: {}  Channels: {}  Sample rate: {} Hz",
            info.firmware_rev, info.hardware_rev, info.channels, info.sample_rate
        );
    }
}

fn start(interface: &str, address: u8) -> anyhow::Result<DeviceMonitor<CanPort>> {
    let port = Arc::new(super::open_device(interface, address)?);
    let monitor = DeviceMonitor::start(port, address);
    monitor.start_measuring()?;
    Ok(monitor)
}

pub fn measure(options: &Options, interface: &str, address: u8) -> anyhow::Result<()> {
    let monitor = start(interface, address)?;
    let commands = super::stdin_lines();
    if !options.silent() {
        eprintln!("{}", Input::HELP);
    }
    let mut extra = AdditionalData::empty();
    loop {
        if let Some(reading) = monitor.next_reading(POLL) {
            println!("{reading}");
            for reading in monitor.pending() {
                println!("{reading}");
            }
        }
        let command = match commands.try_recv() {
            Ok(command) => command,
            Err(TryRecvError::Empty) => continue,
            Err(TryRecvError::Disconnected) => break,
        };
        let input = match command.parse::<Input>() {
            Ok(input) => input,
            Err(err) => {
                eprintln!("{err}");
                continue;
            }
        };
        match input {
            Input::Start => monitor.start_measuring()?,
            Input::Stop => monitor.stop_measuring()?,
            Input::Info => {
                monitor.query_info()?;
                std::thread::sleep(options.timeout().min(Duration::from_millis(250)));
                print_snapshot(address, &monitor.snapshot());
            }
            Input::Raw => {
                extra.toggle(AdditionalData::RAW_MEASUREMENT);
                monitor.configure(extra)?;
                if !options.silent() {
                    let state = if extra.contains(AdditionalData::RAW_MEASUREMENT) { "on" } else { "off" };
                    eprintln!("Raw measurements {state}");
                }
            }
            Input::Quit => break,
            Input::Blank => {}
        }
    }
    monitor.stop_measuring()?;
    monitor.stop()?;
    Ok(())
}

fn log_file(directory: &Path, address: u8) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    directory.join(format!("sdaq_{address:02}_{stamp}.csv"))
}

pub fn logging(options: &Options, interface: &str, address: u8, directory: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(directory).with_context(|| format!("Failed to create {}", directory.display()))?;
    let path = log_file(directory, address);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "{}", sdaq::monitor::Reading::CSV_HEADER)?;

    let monitor = start(interface, address)?;
    let stdin = super::stdin_lines();
    if !options.silent() {
        eprintln!("Logging to {}, close stdin to stop", path.display());
    }
    let mut rows = 0usize;
    while !matches!(stdin.try_recv(), Err(TryRecvError::Disconnected)) {
        let Some(first) = monitor.next_reading(POLL) else {
            continue;
        };
        for reading in std::iter::once(first).chain(monitor.pending()) {
            writeln!(out, "{}", reading.csv_row())?;
            rows += 1;
        }
        out.flush()?;
    }
    monitor.stop_measuring()?;
    monitor.stop()?;
    out.flush()?;
    tracing::info!(rows, file = %path.display(), "logging finished");
    Ok(())
}
