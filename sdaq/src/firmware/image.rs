use crate::catalog::DeviceType;
use crate::commands::PAGE_SIZE;
use crate::ihex::RomData;

const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Magic word of the image header page.
pub const HEADER_MAGIC: u32 = 0x1828_1827;
/// Images starting below this address carry `HEADER_MAGIC + 1`.
pub const HEADER_MAGIC_THRESHOLD: u32 = 0x1_0000;
/// The header page sits this far in front of the image.
pub const HEADER_OFFSET: u32 = 0x400;

const DEVICE_ID_MARKER: &[u8] = b"@DeviceId@";
const DEVICE_ID_MARKER_550X: &[u8] = b"SDAQ_550X_";
const REVISION_MARKER: &[u8] = b"@Revision@";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("Firmware does not have data")]
    Empty,
    #[error("Image starts at {0:#x}, leaving no room for its header")]
    NoRoomForHeader(u32),
    #[error("Image of {len} bytes at {start:#x} runs past the end of the address space")]
    OutOfRange { start: u32, len: usize },
}

/// Application image to flash: the first data block of a HEX file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    start: u32,
    data: Vec<u8>,
}
impl FirmwareImage {
    pub fn new(start: u32, data: Vec<u8>) -> Result<Self, ImageError> {
        if data.is_empty() {
            return Err(ImageError::Empty);
        }
        if start < HEADER_OFFSET {
            return Err(ImageError::NoRoomForHeader(start));
        }
        let fits = u32::try_from(data.len() - 1).ok().and_then(|last| start.checked_add(last));
        if fits.is_none() {
            return Err(ImageError::OutOfRange { start, len: data.len() });
        }
        Ok(Self { start, data })
    }
    pub fn from_rom(rom: &RomData) -> Result<Self, ImageError> {
        let block = rom.blocks().first().ok_or(ImageError::Empty)?;
        Self::new(block.start, block.data.clone())
    }

    pub const fn start(&self) -> u32 { self.start }
    pub fn len(&self) -> usize { self.data.len() }
    pub fn is_empty(&self) -> bool { self.data.is_empty() }
    pub fn last_address(&self) -> u32 {
        self.start + (self.data.len() - 1) as u32
    }
    pub const fn header_address(&self) -> u32 {
        self.start - HEADER_OFFSET
    }
    pub fn crc(&self) -> u32 {
        CRC32.checksum(&self.data)
    }

    pub fn header(&self) -> [u8; PAGE_SIZE] {
        let magic = HEADER_MAGIC + u32::from(self.start < HEADER_MAGIC_THRESHOLD);
        let mut page = [0xFF; PAGE_SIZE];
        for (at, word) in [magic, self.start, self.last_address(), self.crc()].into_iter().enumerate() {
            page[at * 4..at * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        page
    }

    pub fn page_count(&self) -> usize {
        self.data.len().div_ceil(PAGE_SIZE)
    }
    /// Flash address and content of page `index`, the last one padded with 0xFF.
    pub fn page(&self, index: usize) -> Option<(u32, [u8; PAGE_SIZE])> {
        let chunk = self.data.chunks(PAGE_SIZE).nth(index)?;
        let mut page = [0xFF; PAGE_SIZE];
        page[..chunk.len()].copy_from_slice(chunk);
        Some((self.start + (index * PAGE_SIZE) as u32, page))
    }

    fn after(&self, marker: &[u8]) -> Option<&[u8]> {
        let at = self.data.windows(marker.len()).position(|window| window == marker)?;
        Some(&self.data[at + marker.len()..])
    }
    /// Device type the image was built for, if it says.
    pub fn device_type(&self) -> Option<DeviceType> {
        if let Some(rest) = self.after(DEVICE_ID_MARKER) {
            return rest.first().map(|code| DeviceType(*code));
        }
        let rest = self.after(DEVICE_ID_MARKER_550X)?;
        let digits = rest.iter().take_while(|c| c.is_ascii_hexdigit()).count();
        let text = std::str::from_utf8(&rest[..digits]).ok()?;
        u8::from_str_radix(text, 16).ok().map(DeviceType)
    }
    pub fn revision(&self) -> Option<u8> {
        self.after(REVISION_MARKER)?.first().copied()
    }
}
