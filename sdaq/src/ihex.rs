//! Intel-HEX images: parsing into contiguous blocks and writing back.

use std::fmt::Write as _;
use std::path::Path;

/// Data bytes per record when writing.
pub const RECORD_DATA_SIZE: usize = 16;

const DATA: u8 = 0x00;
const END_OF_FILE: u8 = 0x01;
const EXTENDED_SEGMENT: u8 = 0x02;
const START_SEGMENT: u8 = 0x03;
const EXTENDED_LINEAR: u8 = 0x04;
const START_LINEAR: u8 = 0x05;

/// Bytes one extended address reaches.
const WINDOW: u32 = 0x1_0000;
/// One past the highest 32-bit address.
const ADDRESS_SPACE: u64 = 1 << 32;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    #[error("record does not start with ':'")]
    MissingStartCode,
    #[error("invalid character in record")]
    InvalidCharacter,
    #[error("record size does not match its byte count")]
    Length,
    #[error("checksum error, record has {found:#04x}, expected {expected:#04x}")]
    Checksum { expected: u8, found: u8 },
    #[error("unknown record type {0:#04x}")]
    UnknownType(u8),
    #[error("invalid record of type {0:#04x}")]
    Invalid(u8),
    #[error("address of record is out of range")]
    AddressOutOfRange,
}

#[derive(thiserror::Error, Debug)]
pub enum HexError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Line {line}: {error}")]
    Record { line: usize, error: RecordError },
    #[error("No EOF record found")]
    NoEof,
}

/// Bytes stored from `start` on without a gap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomBlock {
    /// Extended address in effect when the block started.
    pub base: u32,
    pub start: u32,
    pub data: Vec<u8>,
}
impl RomBlock {
    /// Address right after the last byte.
    pub fn end(&self) -> u64 {
        u64::from(self.start) + self.data.len() as u64
    }
}

/// Content of an Intel-HEX file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RomData {
    blocks: Vec<RomBlock>,
    /// CS:IP of a start segment address record.
    pub start_segment: Option<(u16, u16)>,
    /// EIP of a start linear address record.
    pub start_linear: Option<u32>,
}

struct Record {
    kind: u8,
    address: u16,
    data: Vec<u8>,
}

fn checksum(len: u8, address: u16, kind: u8, data: &[u8]) -> u8 {
    let [hi, lo] = address.to_be_bytes();
    let sum = data.iter().fold(len.wrapping_add(hi).wrapping_add(lo).wrapping_add(kind), |sum, byte| {
        sum.wrapping_add(*byte)
    });
    sum.wrapping_neg()
}

fn decode_record(line: &str) -> Result<Record, RecordError> {
    let body = line.strip_prefix(':').ok_or(RecordError::MissingStartCode)?;
    if !body.bytes().all(|c| c.is_ascii_hexdigit()) {
        return Err(RecordError::InvalidCharacter);
    }
    if body.len() % 2 != 0 || body.len() < 10 {
        return Err(RecordError::Length);
    }
    let bytes: Vec<u8> = (0..body.len())
        .step_by(2)
        .map(|at| u8::from_str_radix(&body[at..at + 2], 16))
        .collect::<Result<_, _>>()
        .map_err(|_| RecordError::InvalidCharacter)?;
    let len = bytes[0];
    if bytes.len() != len as usize + 5 {
        return Err(RecordError::Length);
    }
    let address = u16::from_be_bytes([bytes[1], bytes[2]]);
    let kind = bytes[3];
    let data = bytes[4..4 + len as usize].to_vec();
    let found = bytes[4 + len as usize];
    let expected = checksum(len, address, kind, &data);
    if found != expected {
        return Err(RecordError::Checksum { expected, found });
    }
    Ok(Record { kind, address, data })
}

impl RomData {
    /// Blocks in file order.
    pub fn blocks(&self) -> &[RomBlock] { &self.blocks }

    pub fn from_blocks(blocks: Vec<RomBlock>) -> Self {
        Self { blocks, ..Self::default() }
    }

    pub fn parse(text: &str) -> Result<Self, HexError> {
        let mut rom = RomData::default();
        let mut base = 0u32;
        for (at, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let record_error = |error| HexError::Record { line: at + 1, error };
            let record = decode_record(line).map_err(record_error)?;
            if record.kind == END_OF_FILE {
                if !record.data.is_empty() || record.address != 0 {
                    return Err(record_error(RecordError::Invalid(END_OF_FILE)));
                }
                rom.blocks.retain(|block| !block.data.is_empty());
                return Ok(rom);
            }
            rom.apply(&mut base, record).map_err(record_error)?;
        }
        Err(HexError::NoEof)
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, HexError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    fn apply(&mut self, base: &mut u32, record: Record) -> Result<(), RecordError> {
        match record.kind {
            DATA => {
                if record.data.is_empty() {
                    return Err(RecordError::Invalid(DATA));
                }
                let address = base.checked_add(u32::from(record.address)).ok_or(RecordError::AddressOutOfRange)?;
                if u64::from(address) + record.data.len() as u64 > ADDRESS_SPACE {
                    return Err(RecordError::AddressOutOfRange);
                }
                let at = u64::from(address);
                match self.blocks.last_mut() {
                    Some(block) if !block.data.is_empty() && (u64::from(block.start)..block.end()).contains(&at) => {
                        return Err(RecordError::AddressOutOfRange);
                    }
                    Some(block) if block.data.is_empty() => {
                        block.start = address;
                        block.data = record.data;
                    }
                    Some(block) if block.end() == at => block.data.extend_from_slice(&record.data),
                    _ => self.blocks.push(RomBlock { base: *base, start: address, data: record.data }),
                }
            }
            EXTENDED_SEGMENT | EXTENDED_LINEAR => {
                if record.data.len() != 2 || record.address != 0 {
                    return Err(RecordError::Invalid(record.kind));
                }
                let value = u16::from_be_bytes([record.data[0], record.data[1]]) as u32;
                *base = if record.kind == EXTENDED_SEGMENT { value << 4 } else { value << 16 };
                let block = RomBlock { base: *base, start: *base, data: Vec::new() };
                match self.blocks.last_mut() {
                    Some(last) if last.data.is_empty() => *last = block,
                    _ => self.blocks.push(block),
                }
            }
            START_SEGMENT | START_LINEAR => {
                if record.data.len() != 4 || record.address != 0 {
                    return Err(RecordError::Invalid(record.kind));
                }
                let d = &record.data;
                if record.kind == START_SEGMENT {
                    if self.start_segment.is_some() {
                        return Err(RecordError::Invalid(START_SEGMENT));
                    }
                    self.start_segment = Some((u16::from_be_bytes([d[0], d[1]]), u16::from_be_bytes([d[2], d[3]])));
                } else {
                    if self.start_linear.is_some() {
                        return Err(RecordError::Invalid(START_LINEAR));
                    }
                    self.start_linear = Some(u32::from_be_bytes([d[0], d[1], d[2], d[3]]));
                }
            }
            kind => return Err(RecordError::UnknownType(kind)),
        }
        Ok(())
    }

    pub fn first_address(&self) -> Option<u32> {
        self.blocks.first().map(|block| block.start)
    }
    pub fn last_address(&self) -> Option<u32> {
        let last = u64::from(self.first_address()?) + self.address_range().checked_sub(1)?;
        u32::try_from(last).ok()
    }
    /// Bytes covered from the first block on, gaps between blocks included.
    pub fn address_range(&self) -> u64 {
        let Some(first) = self.first_address() else {
            return 0;
        };
        self.blocks
            .iter()
            .map(RomBlock::end)
            .max()
            .map_or(0, |end| end.saturating_sub(u64::from(first)))
    }

    pub fn to_hex_string(&self) -> String {
        let mut out = String::new();
        let mut base = 0u32;
        for block in self.blocks.iter().filter(|block| !block.data.is_empty()) {
            let mut wanted = match block.start.checked_sub(block.base) {
                Some(offset) if offset < WINDOW && reachable_base(block.base) => block.base,
                _ => block.start & !(WINDOW - 1),
            };
            let mut address = block.start;
            let mut rest = block.data.as_slice();
            while !rest.is_empty() {
                if address.wrapping_sub(wanted) >= WINDOW {
                    wanted = address & !(WINDOW - 1);
                }
                if wanted != base {
                    push_extended_address(&mut out, wanted);
                    base = wanted;
                }
                let offset = address - base;
                let room = (WINDOW - offset) as usize;
                let (record, tail) = rest.split_at(rest.len().min(RECORD_DATA_SIZE).min(room));
                push_record(&mut out, DATA, offset as u16, record);
                address = address.wrapping_add(record.len() as u32);
                rest = tail;
            }
        }
        if let Some((cs, ip)) = self.start_segment {
            let mut data = [0u8; 4];
            data[..2].copy_from_slice(&cs.to_be_bytes());
            data[2..].copy_from_slice(&ip.to_be_bytes());
            push_record(&mut out, START_SEGMENT, 0, &data);
        }
        if let Some(eip) = self.start_linear {
            push_record(&mut out, START_LINEAR, 0, &eip.to_be_bytes());
        }
        push_record(&mut out, END_OF_FILE, 0, &[]);
        out
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), HexError> {
        std::fs::write(path, self.to_hex_string())?;
        Ok(())
    }
}

/// Whether an extended address record can express `base`.
fn reachable_base(base: u32) -> bool {
    base % WINDOW == 0 || (base <= 0xF_FFF0 && base % 16 == 0)
}

fn push_extended_address(out: &mut String, base: u32) {
    if base & !0xF_FFFF != 0 {
        push_record(out, EXTENDED_LINEAR, 0, &((base >> 16) as u16).to_be_bytes());
    } else {
        push_record(out, EXTENDED_SEGMENT, 0, &((base >> 4) as u16).to_be_bytes());
    }
}

fn push_record(out: &mut String, kind: u8, address: u16, data: &[u8]) {
    let len = data.len() as u8;
    // writing into a String cannot fail
    let _ = write!(out, ":{len:02X}{address:04X}{kind:02X}");
    for byte in data {
        let _ = write!(out, "{byte:02X}");
    }
    let _ = writeln!(out, "{:02X}", checksum(len, address, kind, data));
}
