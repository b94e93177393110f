#![allow(dead_code)]

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use sdaq::bus::{BusPort, VirtualBus};
use sdaq::catalog::DeviceType;
use sdaq::id::RxFilter;
use sdaq::sim::{DeviceSetup, PseudoDevice};
use sdaq::{Message, Packet, PortError, RunFlag, BROADCAST_ADDRESS};

pub const TIMEOUT: Duration = Duration::from_millis(300);

/// A virtual bus with a master port and simulated devices serving it.
pub struct Bench {
    pub bus: VirtualBus,
    pub master: BusPort,
    pub devices: Vec<PseudoDevice>,
    run: RunFlag,
    handles: Vec<JoinHandle<Result<(), PortError>>>,
}
impl Bench {
    pub fn new() -> Self {
        let bus = VirtualBus::new();
        let master = bus.open(RxFilter::from_devices());
        Self {
            bus,
            master,
            devices: Vec::new(),
            run: RunFlag::new(),
            handles: Vec::new(),
        }
    }

    /// Attaches a device, moved to `address` first unless that is `None`.
    pub fn attach(&mut self, setup: DeviceSetup, address: Option<u8>) -> PseudoDevice {
        let device = PseudoDevice::new(setup);
        if let Some(address) = address {
            device.handle(&Packet::new(BROADCAST_ADDRESS, Message::SetAddress { serial: setup.serial, address }));
        }
        let port = self.bus.open(RxFilter::to_devices());
        self.handles.push(device.spawn(port, self.run.clone()));
        self.devices.push(device.clone());
        device
    }
    pub fn attach_pseudo(&mut self, serial: u32, channels: u8, address: Option<u8>) -> PseudoDevice {
        self.attach(DeviceSetup::new(serial, channels), address)
    }
    pub fn attach_typed(&mut self, serial: u32, device_type: DeviceType, address: u8) -> PseudoDevice {
        self.attach(DeviceSetup { serial, device_type, channels: 1 }, Some(address))
    }

    /// Drains whatever the master port has queued, e.g. the power-on status frames.
    pub fn settle(&self) {
        std::thread::sleep(Duration::from_millis(20));
        while let Ok(Some(_)) = sdaq::Port::receive(&self.master, Duration::ZERO) {}
    }
}
impl Drop for Bench {
    fn drop(&mut self) {
        self.run.stop();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Polls `condition` for up to a second.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
