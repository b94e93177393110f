mod common;

use std::time::Duration;

use common::{eventually, Bench};
use sdaq::catalog::{DeviceStatus, DeviceType};
use sdaq::commands::PAGE_SECTIONS;
use sdaq::firmware::{Failure, FirmwareImage, ProgramError, Programmer};
use sdaq::id::RxFilter;
use sdaq::{Message, Packet, Port};

const ADDRESS: u8 = 12;

fn programmer(bench: &Bench) -> Programmer<'_, sdaq::bus::BusPort> {
    Programmer::new(&bench.master, ADDRESS)
        .with_timeout(Duration::from_millis(500))
        .with_pace(Duration::ZERO)
}

fn image(len: usize) -> FirmwareImage {
    FirmwareImage::new(0x7000, (0..len).map(|i| (i % 251) as u8).collect()).unwrap()
}

#[test]
fn flashes_every_page_in_address_order() {
    let mut bench = Bench::new();
    let device = bench.attach_typed(3, DeviceType::TC1, ADDRESS);
    let tap = bench.bus.open(RxFilter::to_devices());
    bench.settle();

    let image = image(600);
    programmer(&bench).program(&image, DeviceType::TC1).unwrap();

    let mut transfers = Vec::new();
    let mut chunks = 0;
    while let Some(frame) = tap.receive(Duration::from_millis(50)).unwrap() {
        match Packet::decode(&frame).unwrap().message {
            Message::TransferPageToFlash { address } => transfers.push(address),
            Message::WriteToPageBuffer(_) => chunks += 1,
            _ => {}
        }
    }
    assert_eq!(transfers, vec![image.header_address(), 0x7000, 0x7100, 0x7200]);
    assert_eq!(chunks, transfers.len() * PAGE_SECTIONS);

    let flash = device.flash();
    assert_eq!(flash.get(&image.header_address()), Some(&image.header()));
    for index in 0..image.page_count() {
        let (address, page) = image.page(index).unwrap();
        assert_eq!(flash.get(&address), Some(&page));
    }
    assert!(!device.status().contains(DeviceStatus::BOOTLOADER));
}

#[test]
fn header_fault_returns_device_to_application() {
    let mut bench = Bench::new();
    let device = bench.attach_typed(3, DeviceType::TC1, ADDRESS);
    bench.settle();
    let image = image(300);
    device.set_transfer_fault(Some(image.header_address()));

    let err = programmer(&bench).program(&image, DeviceType::TC1).unwrap_err();
    assert!(matches!(err, ProgramError::Failed(Failure::Bootloader { command: 0x23, error_code: 1, .. })), "{err}");
    assert!(eventually(|| !device.status().contains(DeviceStatus::BOOTLOADER)));
    assert!(device.flash().is_empty());
}

#[test]
fn image_for_another_type_is_not_flashed() {
    let mut bench = Bench::new();
    let device = bench.attach_typed(3, DeviceType::RTD, ADDRESS);
    bench.settle();

    let err = programmer(&bench).program(&image(64), DeviceType::TC1).unwrap_err();
    assert!(matches!(
        err,
        ProgramError::Failed(Failure::WrongDeviceType { expected: DeviceType::TC1, found: DeviceType::RTD })
    ));
    assert!(eventually(|| !device.status().contains(DeviceStatus::BOOTLOADER)));
}

#[test]
fn missing_device_times_out() {
    let bench = Bench::new();
    let programmer = Programmer::new(&bench.master, ADDRESS)
        .with_timeout(Duration::from_millis(50))
        .with_pace(Duration::ZERO);
    let err = programmer.program(&image(16), DeviceType::TC1).unwrap_err();
    assert!(matches!(err, ProgramError::Failed(Failure::NotResponding)));
}
