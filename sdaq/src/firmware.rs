//! Flash programming through the device bootloader.
//!
//! [`FlashSession`] is the protocol state machine; it consumes decoded packets
//! and timeouts and yields the frames to send. [`Programmer`] drives a session
//! over a [`Port`].

use std::time::Duration;

use crate::catalog::{DeviceStatus, DeviceType};
use crate::commands::{self, PAGE_SECTIONS, PAGE_SIZE};
use crate::messages::{BootloaderReply, Message, Packet};
use crate::port::{Frame, Port, PortError};
use crate::RunFlag;

mod image;
pub use image::{FirmwareImage, ImageError, HEADER_MAGIC, HEADER_MAGIC_THRESHOLD, HEADER_OFFSET};

/// Consecutive unanswered receives or unexpected frames tolerated.
pub const RETRY_LIMIT: u32 = 2;

/// Why a session ended without success.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    #[error("Firmware is not for this device type ({expected} != {found})")]
    WrongDeviceType { expected: DeviceType, found: DeviceType },
    #[error("Bootloader replied with error {error_code} (IAP {iap_return}) to command {command:#04x}")]
    Bootloader { command: u8, error_code: u8, iap_return: u32 },
    #[error("Flash verification failed at section {section} of the page buffer")]
    Verification { section: u8 },
    #[error("Bootloader not responding")]
    NotResponding,
}

#[derive(thiserror::Error, Debug)]
pub enum ProgramError {
    #[error(transparent)]
    Port(#[from] PortError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Failed(#[from] Failure),
    #[error("Programming interrupted")]
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramState {
    EraseFlash,
    WriteHeader,
    FlashProgram,
    GotoApplication,
    Done,
    Failed(Failure),
}
impl ProgramState {
    pub const fn is_finished(&self) -> bool {
        matches!(self, ProgramState::Done | ProgramState::Failed(_))
    }
}

/// Programming state of one device.
pub struct FlashSession<'i> {
    address: u8,
    device_type: DeviceType,
    image: &'i FirmwareImage,
    state: ProgramState,
    /// Last page put into the page buffer, what echoes are checked against.
    page: [u8; PAGE_SIZE],
    next_page: usize,
    retries: u32,
}
impl<'i> FlashSession<'i> {
    pub fn new(address: u8, device_type: DeviceType, image: &'i FirmwareImage) -> Self {
        Self {
            address,
            device_type,
            image,
            state: ProgramState::EraseFlash,
            page: [0xFF; PAGE_SIZE],
            next_page: 0,
            retries: 0,
        }
    }
    pub fn state(&self) -> &ProgramState { &self.state }
    /// Image pages handed to the device so far, out of [`FirmwareImage::page_count`].
    pub const fn pages_sent(&self) -> usize { self.next_page }

    /// Frames that put the device into its bootloader.
    pub fn start(&self) -> Vec<Frame> {
        vec![commands::goto_bootloader(self.address)]
    }

    fn enter(&mut self, state: ProgramState) {
        match &state {
            ProgramState::Failed(failure) => tracing::warn!(address = self.address, %failure, "programming failed"),
            state => tracing::info!(address = self.address, ?state, "programming state"),
        }
        self.state = state;
    }

    fn load_page(&mut self, flash_address: u32, page: [u8; PAGE_SIZE]) -> Vec<Frame> {
        self.page = page;
        let mut frames: Vec<Frame> = commands::write_page(self.address, &self.page).collect();
        frames.push(commands::transfer_page_to_flash(self.address, flash_address));
        frames
    }

    pub fn on_packet(&mut self, packet: &Packet) -> Vec<Frame> {
        if self.state.is_finished() || packet.address != self.address {
            return Vec::new();
        }
        match packet.message {
            Message::DeviceStatus(report) => {
                self.retries = 0;
                self.on_status(report.status, report.device_type)
            }
            Message::BootloaderReply(reply) => {
                self.retries = 0;
                self.on_reply(reply)
            }
            Message::PageBuffer(chunk) => {
                self.retries = 0;
                let at = packet.channel as usize * 8;
                if packet.channel as usize >= PAGE_SECTIONS || self.page[at..at + 8] != chunk {
                    self.enter(ProgramState::Failed(Failure::Verification { section: packet.channel }));
                }
                Vec::new()
            }
            _ => self.on_silence(),
        }
    }

    /// A receive timed out, or the device sent something the bootloader never does.
    pub fn on_silence(&mut self) -> Vec<Frame> {
        if self.state.is_finished() {
            return Vec::new();
        }
        self.retries += 1;
        tracing::debug!(address = self.address, retries = self.retries, "no usable answer");
        if self.retries >= RETRY_LIMIT {
            self.enter(ProgramState::Failed(Failure::NotResponding));
        }
        Vec::new()
    }

    fn on_status(&mut self, status: DeviceStatus, device_type: DeviceType) -> Vec<Frame> {
        if device_type != self.device_type {
            self.enter(ProgramState::Failed(Failure::WrongDeviceType {
                expected: self.device_type,
                found: device_type,
            }));
            return vec![commands::goto_application(self.address)];
        }
        match self.state {
            ProgramState::EraseFlash if status.contains(DeviceStatus::BOOTLOADER) => {
                tracing::info!(address = self.address, "erasing flash");
                vec![commands::erase_flash(self.address, self.image.header_address(), self.image.last_address())]
            }
            ProgramState::GotoApplication => {
                self.enter(ProgramState::Done);
                vec![commands::query_device_info(self.address)]
            }
            _ => Vec::new(),
        }
    }

    fn on_reply(&mut self, reply: BootloaderReply) -> Vec<Frame> {
        if !reply.is_ok() {
            self.enter(ProgramState::Failed(Failure::Bootloader {
                command: reply.command,
                error_code: reply.error_code,
                iap_return: reply.iap_return,
            }));
            return vec![commands::goto_application(self.address)];
        }
        match self.state {
            ProgramState::EraseFlash => {
                self.enter(ProgramState::WriteHeader);
                self.load_page(self.image.header_address(), self.image.header())
            }
            ProgramState::WriteHeader | ProgramState::FlashProgram => match self.image.page(self.next_page) {
                Some((flash_address, page)) => {
                    if self.state == ProgramState::WriteHeader {
                        self.enter(ProgramState::FlashProgram);
                    }
                    self.next_page += 1;
                    tracing::debug!(
                        address = self.address,
                        page = self.next_page,
                        of = self.image.page_count(),
                        "writing page"
                    );
                    self.load_page(flash_address, page)
                }
                None => {
                    self.enter(ProgramState::GotoApplication);
                    vec![commands::goto_application(self.address)]
                }
            },
            _ => Vec::new(),
        }
    }
}

/// Flashes images into the device at one address.
pub struct Programmer<'p, P: Port + ?Sized> {
    port: &'p P,
    address: u8,
    timeout: Duration,
    pace: Duration,
    run: RunFlag,
}
impl<'p, P: Port + ?Sized> Programmer<'p, P> {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
    /// Gap between page-buffer chunks so the device FIFO keeps up.
    pub const CHUNK_PACE: Duration = Duration::from_millis(1);

    pub fn new(port: &'p P, address: u8) -> Self {
        Self {
            port,
            address,
            timeout: Self::DEFAULT_TIMEOUT,
            pace: Self::CHUNK_PACE,
            run: RunFlag::new(),
        }
    }
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
    pub fn with_pace(self, pace: Duration) -> Self {
        Self { pace, ..self }
    }
    pub fn with_run_flag(self, run: RunFlag) -> Self {
        Self { run, ..self }
    }

    fn send_all(&self, frames: Vec<Frame>) -> Result<(), PortError> {
        for frame in &frames {
            self.port.send(frame)?;
            if !self.pace.is_zero() {
                std::thread::sleep(self.pace);
            }
        }
        Ok(())
    }

    /// Runs a whole session. `device_type` is what the image was built for.
    pub fn program(&self, image: &FirmwareImage, device_type: DeviceType) -> Result<(), ProgramError> {
        let mut session = FlashSession::new(self.address, device_type, image);
        tracing::info!(address = self.address, "entering bootloader");
        self.send_all(session.start())?;
        loop {
            match session.state() {
                ProgramState::Done => return Ok(()),
                ProgramState::Failed(failure) => return Err(failure.clone().into()),
                _ => {}
            }
            if !self.run.is_running() {
                return Err(ProgramError::Interrupted);
            }
            let frames = match self.port.receive(self.timeout)? {
                Some(frame) => match Packet::decode(&frame) {
                    Ok(packet) => session.on_packet(&packet),
                    Err(err) => {
                        tracing::trace!(%err, "frame dropped");
                        continue;
                    }
                },
                None => session.on_silence(),
            };
            self.send_all(frames)?;
        }
    }
}
