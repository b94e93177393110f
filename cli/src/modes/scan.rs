use anyhow::Context;
use sdaq::autoconfig::Outcome;
use sdaq::discovery::{DeviceEntry, Registry};
use sdaq::{commands, Port};

use crate::options::Options;

/// What `discover --file` saves.
#[serde_with::skip_serializing_none]
#[derive(serde_derive::Serialize, Debug)]
struct ScanReport<'a> {
    interface: &'a str,
    scanned_at: chrono::DateTime<chrono::Local>,
    devices: &'a [DeviceEntry],
    conflicts: Option<Vec<DeviceEntry>>,
}

fn save_report(options: &Options, path: &std::path::Path, report: &ScanReport<'_>) -> anyhow::Result<()> {
    let json = if options.formatted() {
        serde_json::to_string_pretty(report)?
    } else {
        serde_json::to_string(report)?
    };
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

fn print_registry(registry: &Registry) {
    for entry in registry.entries() {
        println!("{entry}");
    }
}

pub fn discover(options: &Options, interface: &str) -> anyhow::Result<()> {
    let port = super::open(interface)?;
    let registry = sdaq::discovery::discover(&port, options.timeout())
        .with_context(|| format!("Scan on {interface} failed"))?;
    report_scan(options, interface, &registry)
}

fn report_scan(options: &Options, interface: &str, registry: &Registry) -> anyhow::Result<()> {
    if registry.is_empty() {
        println!("No device found on {interface}");
        return Ok(());
    }
    print_registry(registry);
    let conflicts = registry.conflicts();
    if !conflicts.is_empty() {
        eprintln!("Address conflicts:");
        for entry in &conflicts {
            eprintln!("  {entry}");
        }
    }
    if !options.silent() {
        println!("{} device(s), {} parked", registry.len(), registry.parked().len());
    }
    if let Some(path) = options.file() {
        let report = ScanReport {
            interface,
            scanned_at: chrono::Local::now(),
            devices: registry.entries(),
            conflicts: (!conflicts.is_empty()).then_some(conflicts),
        };
        save_report(options, path, &report)?;
    }
    Ok(())
}

pub fn autoconfig(options: &Options, interface: &str) -> anyhow::Result<()> {
    let port = super::open(interface)?;
    let outcome = sdaq::autoconfig::autoconfig(&port, options.timeout())?;
    report_outcome(options, interface, &outcome);
    Ok(())
}

fn report_outcome(options: &Options, interface: &str, outcome: &Outcome) {
    match outcome {
        Outcome::NoDevices => println!("No device found on {interface}"),
        Outcome::AllConfigured(registry) => {
            if !options.silent() {
                println!("Every device already has an address");
            }
            print_registry(registry);
        }
        Outcome::Assigned(entries) => {
            for entry in entries {
                println!("{entry}");
            }
        }
    }
}

pub fn set_address(options: &Options, interface: &str, address: u8, serial: u32) -> anyhow::Result<()> {
    let port = super::open(interface)?;
    port.send(&commands::set_address(serial, address))?;
    let registry = sdaq::discovery::discover(&port, options.timeout())?;
    match registry.find(serial) {
        Some(entry) if entry.address == address => {
            println!("{entry}");
            Ok(())
        }
        Some(entry) => anyhow::bail!("Device kept its address: {entry}"),
        None => anyhow::bail!("No device with S/N {serial} on {interface}"),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn empty_scan_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.json");
        let args = ["sdaq", "discover", "vcan0", "--file", path.to_str().unwrap()];
        let options = Options::try_parse_from(args).unwrap();
        assert!(report_scan(&options, "vcan0", &Registry::new()).is_ok());
        assert!(!path.exists());
        report_outcome(&options, "vcan0", &Outcome::NoDevices);
    }
}
