//! Frame builders, one per message a master or a device sends.
//!
//! Builders never touch a port; sending and retrying are up to the caller.

use crate::catalog::AdditionalData;
use crate::messages::{
    BootloaderReply, CalibrationDate, DeviceInfo, Measurement, Message, Packet, PointData, StatusReport,
    SyncDebug, SystemVariable,
};
use crate::port::Frame;
use crate::BROADCAST_ADDRESS;

/// Size of a flash page.
pub const PAGE_SIZE: usize = 256;
/// 8-byte chunks a page is sent in, the chunk index travels in the channel field.
pub const PAGE_SECTIONS: usize = PAGE_SIZE / 8;

#[inline]
fn frame(address: u8, message: Message) -> Frame {
    Packet::new(address, message).encode()
}
#[inline]
fn channel_frame(address: u8, channel: u8, message: Message) -> Frame {
    Packet::on_channel(address, channel, message).encode()
}

/// Synchronization is only ever broadcast.
pub fn synchronize(time_seed: u16) -> Frame {
    frame(BROADCAST_ADDRESS, Message::Synchronization { time_seed })
}
pub fn start(address: u8) -> Frame {
    frame(address, Message::Start)
}
pub fn stop(address: u8) -> Frame {
    frame(address, Message::Stop)
}
/// Broadcast; only the device holding `serial` takes the address.
pub fn set_address(serial: u32, new_address: u8) -> Frame {
    frame(BROADCAST_ADDRESS, Message::SetAddress { serial, address: new_address })
}
pub fn query_device_info(address: u8) -> Frame {
    frame(address, Message::QueryDeviceInfo)
}
pub fn query_calibration_data(address: u8, channel: u8) -> Frame {
    channel_frame(address, channel, Message::QueryCalibrationData)
}
pub fn write_calibration_date(address: u8, channel: u8, date: &CalibrationDate) -> Frame {
    channel_frame(address, channel, Message::WriteCalibrationDate(*date))
}
pub fn write_calibration_point(address: u8, channel: u8, point: &PointData) -> Frame {
    channel_frame(address, channel, Message::WriteCalibrationPoint(*point))
}
pub fn change_baudrate(address: u8, code: u8) -> Frame {
    frame(address, Message::ChangeBaudrate { code })
}
pub fn configure_additional_data(address: u8, config: AdditionalData) -> Frame {
    frame(address, Message::ConfigureAdditionalData(config))
}
pub fn query_system_variables(address: u8) -> Frame {
    frame(address, Message::QuerySystemVariables)
}
pub fn write_system_variable(address: u8, variable: SystemVariable) -> Frame {
    frame(address, Message::WriteSystemVariable(variable))
}

pub fn goto_bootloader(address: u8) -> Frame {
    frame(address, Message::GotoBootloader)
}
pub fn goto_application(address: u8) -> Frame {
    frame(address, Message::GotoApplication)
}
pub fn erase_flash(address: u8, start: u32, end: u32) -> Frame {
    frame(address, Message::EraseFlash { start, end })
}
pub fn write_page_chunk(address: u8, section: u8, chunk: [u8; 8]) -> Frame {
    channel_frame(address, section, Message::WriteToPageBuffer(chunk))
}
/// The whole page as [`PAGE_SECTIONS`] page-buffer writes, in chunk order.
pub fn write_page(address: u8, page: &[u8; PAGE_SIZE]) -> impl Iterator<Item = Frame> + '_ {
    page.chunks_exact(8).enumerate().map(move |(section, chunk)| {
        let mut data = [0u8; 8];
        data.copy_from_slice(chunk);
        write_page_chunk(address, section as u8, data)
    })
}
pub fn transfer_page_to_flash(address: u8, flash_address: u32) -> Frame {
    frame(address, Message::TransferPageToFlash { address: flash_address })
}
pub fn query_flash_data(address: u8, flash_address: u32) -> Frame {
    frame(address, Message::QueryFlashData { address: flash_address })
}

// Device side.

pub fn device_status(address: u8, report: StatusReport) -> Frame {
    frame(address, Message::DeviceStatus(report))
}
pub fn device_info(address: u8, info: DeviceInfo) -> Frame {
    frame(address, Message::DeviceInfo(info))
}
pub fn calibration_date(address: u8, channel: u8, date: CalibrationDate) -> Frame {
    channel_frame(address, channel, Message::CalibrationDate(date))
}
pub fn calibration_point(address: u8, channel: u8, point: PointData) -> Frame {
    channel_frame(address, channel, Message::CalibrationPointData(point))
}
pub fn measurement(address: u8, channel: u8, measurement: Measurement) -> Frame {
    channel_frame(address, channel, Message::Measurement(measurement))
}
pub fn uncalibrated_measurement(address: u8, channel: u8, measurement: Measurement) -> Frame {
    channel_frame(address, channel, Message::UncalibratedMeasurement(measurement))
}
pub fn system_variable(address: u8, variable: SystemVariable) -> Frame {
    frame(address, Message::SystemVariable(variable))
}
pub fn bootloader_reply(address: u8, reply: BootloaderReply) -> Frame {
    frame(address, Message::BootloaderReply(reply))
}
pub fn page_buffer(address: u8, section: u8, chunk: [u8; 8]) -> Frame {
    channel_frame(address, section, Message::PageBuffer(chunk))
}
pub fn sync_debug(address: u8, sync: SyncDebug) -> Frame {
    frame(address, Message::SyncDebug(sync))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SdaqId;
    use crate::messages::PayloadType;

    #[test]
    fn set_address_goes_to_everyone() {
        let packet = Packet::decode(&set_address(1234, 9)).unwrap();
        assert_eq!(packet.address, BROADCAST_ADDRESS);
        assert_eq!(packet.priority, 4);
        assert_eq!(packet.message, Message::SetAddress { serial: 1234, address: 9 });
    }

    #[test]
    fn query_calibration_names_the_channel() {
        let id = SdaqId::from_raw(query_calibration_data(7, 3).id());
        assert_eq!((id.address, id.channel), (7, 3));
        assert_eq!(id.payload_type, PayloadType::QueryCalibrationData.code());
    }

    #[test]
    fn page_is_split_into_indexed_chunks() {
        let mut page = [0u8; PAGE_SIZE];
        for (i, byte) in page.iter_mut().enumerate() {
            *byte = i as u8;
        }
        let frames: Vec<Frame> = write_page(4, &page).collect();
        assert_eq!(frames.len(), PAGE_SECTIONS);
        for (section, frame) in frames.iter().enumerate() {
            let packet = Packet::decode(frame).unwrap();
            assert_eq!(packet.channel as usize, section);
            assert_eq!(packet.priority, 0);
            assert_eq!(packet.message, Message::WriteToPageBuffer({
                let mut chunk = [0u8; 8];
                chunk.copy_from_slice(&page[section * 8..section * 8 + 8]);
                chunk
            }));
        }
    }
}
