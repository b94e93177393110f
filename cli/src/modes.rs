use std::sync::mpsc;

use sdaq::id::RxFilter;
use sdaq::port::CanPort;

pub mod info;
pub mod measure;
pub mod program;
pub mod scan;
pub mod simulate;

/// Master side port hearing every device.
fn open(interface: &str) -> anyhow::Result<CanPort> {
    Ok(CanPort::open(interface, RxFilter::from_devices())?)
}
/// Master side port hearing only the device at `address`.
fn open_device(interface: &str, address: u8) -> anyhow::Result<CanPort> {
    Ok(CanPort::open(interface, RxFilter::from_device(address))?)
}

/// Lines typed on stdin; the channel disconnects when stdin closes.
fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line.trim().to_owned()).is_err() {
                break;
            }
        }
    });
    rx
}
