use crate::crc::{CRC16_SEED, crc16};
use core::fmt::{Debug, Formatter};

/// Size of the header at the start of every bank.
pub const BANK_HEADER_SIZE: usize = 16;
/// Size of the header preceding every record instance.
pub const DATA_HEADER_SIZE: usize = 12;

pub(crate) const BANK_MAGIC_1: u32 = 0xEC70_5ADE;
pub(crate) const BANK_MAGIC_2: u32 = 0xF033_9CC5;
pub(crate) const HEADER_MAGIC: u32 = 0x5FAE_45F0;

// the header crc covers everything in front of the crc field
const BANK_HEADER_CRC_OFFSET: usize = BANK_HEADER_SIZE - size_of::<u16>();

#[inline(always)]
fn read_u32(raw: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}

#[inline(always)]
fn read_u16(raw: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([raw[at], raw[at + 1]])
}

/// True if every 32-bit word of `raw` still holds the erased pattern.
pub(crate) fn is_erased(raw: &[u8], erased: u32) -> bool {
    raw.chunks_exact(size_of::<u32>())
        .all(|word| read_u32(word, 0) == erased)
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub(crate) struct BankHeader {
    pub(crate) magic1: u32,
    pub(crate) magic2: u32,
    pub(crate) counter: u32,
    pub(crate) reserved1: u16,
    pub(crate) crc: u16,
}

impl BankHeader {
    pub(crate) fn new(counter: u32, erased: u32) -> Self {
        let mut header = Self {
            magic1: BANK_MAGIC_1,
            magic2: BANK_MAGIC_2,
            counter,
            reserved1: erased as u16,
            crc: 0,
        };
        header.crc = header.calculate_crc16();
        header
    }

    pub(crate) fn from_bytes(raw: &[u8; BANK_HEADER_SIZE]) -> Self {
        Self {
            magic1: read_u32(raw, 0),
            magic2: read_u32(raw, 4),
            counter: read_u32(raw, 8),
            reserved1: read_u16(raw, 12),
            crc: read_u16(raw, 14),
        }
    }

    pub(crate) fn to_bytes(&self) -> [u8; BANK_HEADER_SIZE] {
        let mut raw = [0u8; BANK_HEADER_SIZE];
        raw[0..4].copy_from_slice(&self.magic1.to_le_bytes());
        raw[4..8].copy_from_slice(&self.magic2.to_le_bytes());
        raw[8..12].copy_from_slice(&self.counter.to_le_bytes());
        raw[12..14].copy_from_slice(&self.reserved1.to_le_bytes());
        raw[14..16].copy_from_slice(&self.crc.to_le_bytes());
        raw
    }

    pub(crate) fn calculate_crc16(&self) -> u16 {
        crc16(CRC16_SEED, &self.to_bytes()[..BANK_HEADER_CRC_OFFSET])
    }

    /// Structural validation of a header that is known not to be erased.
    pub(crate) fn is_valid(&self, erased: u32) -> bool {
        self.magic1 == BANK_MAGIC_1
            && self.magic2 == BANK_MAGIC_2
            && self.counter != erased
            && self.reserved1 == erased as u16
            && self.crc == self.calculate_crc16()
    }
}

impl Debug for BankHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let counter = self.counter;
        let crc = self.crc;
        f.write_fmt(format_args!(
            "BankHeader {{ magic1: 0x{:0>8x}, magic2: 0x{:0>8x}, counter: {counter}, crc: 0x{crc:0>4x} }}",
            self.magic1, self.magic2
        ))
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub(crate) struct DataHeader {
    pub(crate) magic: u32,
    pub(crate) id: u16,
    pub(crate) crc: u16,
    pub(crate) size: u32,
}

/// Result of the structural check of a record header found while scanning.
#[derive(strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) enum RecordState {
    // header area never written, end of the log
    Erased,
    Valid,
    // torn write or corruption, nothing behind it can be trusted
    Garbage,
}

impl DataHeader {
    /// Header of a record that is not yet committed: the magic is left erased and written last.
    pub(crate) fn uncommitted(id: u16, data: &[u8], erased: u32) -> Self {
        Self {
            magic: erased,
            id,
            crc: crc16(CRC16_SEED, data),
            size: data.len() as u32,
        }
    }

    pub(crate) fn tombstone(id: u16) -> Self {
        Self {
            magic: HEADER_MAGIC,
            id,
            crc: 0,
            size: 0,
        }
    }

    pub(crate) fn commit(&mut self) {
        self.magic = HEADER_MAGIC;
    }

    pub(crate) fn from_bytes(raw: &[u8; DATA_HEADER_SIZE]) -> Self {
        Self {
            magic: read_u32(raw, 0),
            id: read_u16(raw, 4),
            crc: read_u16(raw, 6),
            size: read_u32(raw, 8),
        }
    }

    pub(crate) fn to_bytes(&self) -> [u8; DATA_HEADER_SIZE] {
        let mut raw = [0u8; DATA_HEADER_SIZE];
        raw[0..4].copy_from_slice(&self.magic.to_le_bytes());
        raw[4..6].copy_from_slice(&self.id.to_le_bytes());
        raw[6..8].copy_from_slice(&self.crc.to_le_bytes());
        raw[8..12].copy_from_slice(&self.size.to_le_bytes());
        raw
    }

    /// Checks a raw header located at `offset` in a bank ending at `limit`.
    pub(crate) fn check(
        raw: &[u8; DATA_HEADER_SIZE],
        offset: u32,
        limit: u32,
        erased: u32,
        max_records: usize,
    ) -> RecordState {
        if is_erased(raw, erased) {
            return RecordState::Erased;
        }

        let header = Self::from_bytes(raw);
        let available = (limit - offset) as u64;
        if header.magic != HEADER_MAGIC
            || header.id == 0
            || header.id as usize > max_records
            || header.size as u64 + DATA_HEADER_SIZE as u64 > available
        {
            return RecordState::Garbage;
        }

        RecordState::Valid
    }
}

impl Debug for DataHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let id = self.id;
        let size = self.size;
        let crc = self.crc;
        f.write_fmt(format_args!(
            "DataHeader {{ magic: 0x{:0>8x}, id: {id:>3}, size: {size}, crc: 0x{crc:0>4x} }}",
            self.magic
        ))
    }
}
