use std::path::Path;

use anyhow::Context;
use sdaq::catalog::DeviceType;
use sdaq::firmware::{FirmwareImage, Programmer};
use sdaq::ihex::RomData;

use crate::options::Options;

/// Device type to flash for: what the image says, checked against `given`.
fn target_type(image: &FirmwareImage, given: Option<u8>) -> anyhow::Result<DeviceType> {
    match (image.device_type(), given.map(DeviceType)) {
        (Some(found), Some(given)) if found != given => {
            anyhow::bail!("Image is built for {found}, --device-type asks for {given}")
        }
        (Some(found), _) => Ok(found),
        (None, Some(given)) => Ok(given),
        (None, None) => anyhow::bail!("Image does not name its device type, use --device-type"),
    }
}

pub fn program(
    options: &Options,
    interface: &str,
    address: u8,
    path: &Path,
    device_type: Option<u8>,
) -> anyhow::Result<()> {
    let rom = RomData::read(path).with_context(|| format!("Failed to load {}", path.display()))?;
    let image = FirmwareImage::from_rom(&rom)?;
    let device_type = target_type(&image, device_type)?;
    tracing::info!(
        start = image.start(),
        bytes = image.len(),
        pages = image.page_count(),
        revision = image.revision(),
        %device_type,
        "firmware image loaded"
    );

    let port = super::open_device(interface, address)?;
    Programmer::new(&port, address)
        .with_timeout(options.timeout())
        .program(&image, device_type)
        .with_context(|| format!("Programming the device at address {address} failed"))?;
    if !options.silent() {
        println!("Firmware written: {} bytes in {} pages, CRC {:#010x}", image.len(), image.page_count(), image.crc());
    }
    Ok(())
}
