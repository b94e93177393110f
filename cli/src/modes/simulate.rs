use sdaq::id::RxFilter;
use sdaq::port::CanPort;
use sdaq::sim::{DeviceSetup, PseudoDevice};
use sdaq::RunFlag;

/// Runs `count` pseudo devices until stdin closes or says quit.
pub fn simulate(interface: &str, count: u8, channels: u8, first_serial: u32) -> anyhow::Result<()> {
    if !(1..=sdaq::MAX_CHANNELS).contains(&channels) {
        anyhow::bail!("Channels must be 1..={}", sdaq::MAX_CHANNELS);
    }
    let run = RunFlag::new();
    let mut handles = Vec::with_capacity(count as usize);
    for serial in (first_serial..).take(count as usize) {
        let port = CanPort::open(interface, RxFilter::to_devices())?;
        let device = PseudoDevice::new(DeviceSetup::new(serial, channels));
        handles.push(device.spawn(port, run.clone()));
        println!("Pseudo device S/N {serial:010} with {channels} channel(s) on {interface}");
    }

    let commands = super::stdin_lines();
    while let Ok(command) = commands.recv() {
        if matches!(command.as_str(), "quit" | "q") {
            break;
        }
    }
    run.stop();
    for handle in handles {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => anyhow::bail!("Pseudo device thread panicked"),
        }
    }
    Ok(())
}
