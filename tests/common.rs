#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use mfs::config::{ErasedValue, MfsConfig};
use mfs::crc::{CRC16_SEED, crc16};
use mfs::platform::{self, Flash as _, NorFlashAdapter};
use mfs::{BANK_HEADER_SIZE, DATA_HEADER_SIZE, Mfs};

pub const FLASH_SECTOR_SIZE: usize = 4096;
// Taken from https://github.com/esp-rs/esp-hal/blob/main/esp-storage/src/stub.rs
pub const WORD_SIZE: usize = 4;

pub const BANK_MAGIC_1: u32 = 0xEC70_5ADE;
pub const BANK_MAGIC_2: u32 = 0xF033_9CC5;
pub const HEADER_MAGIC: u32 = 0x5FAE_45F0;

pub type TestMfs = Mfs<NorFlashAdapter<Flash>>;
pub type ZeroMfs = Mfs<ZeroFlash>;

#[derive(Default)]
pub struct Flash {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    /// How many operations fail once `fail_after_operation` is reached.
    pub max_faults: usize,
    pub faults: usize,
    pub operations: Vec<Operation>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

impl Flash {
    pub fn new(pages: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * pages],
            fail_after_operation: usize::MAX,
            max_faults: usize::MAX,
            ..Default::default()
        }
    }

    /// Every operation starting with `fail_after_operation` fails, like a device losing power.
    pub fn new_with_fault(pages: usize, fail_after_operation: usize) -> Self {
        Self {
            fail_after_operation,
            ..Self::new(pages)
        }
    }

    /// Only the operation `operation` fails, everything after it succeeds again.
    pub fn new_with_single_fault(pages: usize, operation: usize) -> Self {
        Self {
            fail_after_operation: operation,
            max_faults: 1,
            ..Self::new(pages)
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }

    pub fn writes(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Write { .. }))
            .count()
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }

    /// Places raw bytes without going through the program semantics.
    pub fn put(&mut self, offset: usize, bytes: &[u8]) {
        self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn fault(&mut self) -> bool {
        if self.operations.len() >= self.fail_after_operation && self.faults < self.max_faults {
            println!("    flash: FAULT");
            self.faults += 1;
            return true;
        }
        false
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl ErrorType for Flash {
    type Error = FlashError;
}

impl ReadNorFlash for Flash {
    const READ_SIZE: usize = WORD_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::READ_SIZE));

        println!(
            "    flash: read:  0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );
        if self.fault() {
            return Err(FlashError);
        }
        self.operations.push(Operation::Read {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl NorFlash for Flash {
    const WRITE_SIZE: usize = WORD_SIZE;

    const ERASE_SIZE: usize = FLASH_SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as _));

        println!(
            "    flash: erase: {from:04X} - {to:04X} #{:>2}",
            self.operations.len()
        );

        if self.fault() {
            return Err(FlashError);
        }

        self.operations.push(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        });

        for addr in from..to {
            self.buf[addr as usize] = 0xff;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE));

        println!(
            "    flash: write: 0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );

        if self.fault() {
            return Err(FlashError);
        }
        assert!(!bytes.is_empty());

        self.operations.push(Operation::Write {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        for (i, &val) in bytes.iter().enumerate() {
            // like NOR flash we can only flip bits from 1 to 0
            self.buf[offset + i] &= val;
        }
        Ok(())
    }
}

/// Flash whose cells erase to zero and whose programming can only set bits. Erasing completes
/// asynchronously: every erase is reported busy for `erase_polls` queries.
#[derive(Default)]
pub struct ZeroFlash {
    pub buf: Vec<u8>,
    pub erase_polls: u32,
    pub pending_polls: u32,
    pub slept_ms: u32,
    pub programs: usize,
    pub erases: usize,
}

impl ZeroFlash {
    pub fn new(pages: usize) -> Self {
        Self {
            buf: vec![0u8; FLASH_SECTOR_SIZE * pages],
            erase_polls: 1,
            ..Default::default()
        }
    }

    fn range(
        &self,
        offset: u32,
        len: usize,
    ) -> Result<std::ops::Range<usize>, platform::FlashError> {
        let start = offset as usize;
        let end = start + len;
        if end > self.buf.len() {
            return Err(platform::FlashError::Hardware);
        }
        Ok(start..end)
    }
}

impl platform::Flash for ZeroFlash {
    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), platform::FlashError> {
        let range = self.range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.buf[range]);
        Ok(())
    }

    fn program(&mut self, offset: u32, bytes: &[u8]) -> Result<(), platform::FlashError> {
        let range = self.range(offset, bytes.len())?;
        println!("    zero flash: program: 0x{offset:04X}[0x{:04X}]", bytes.len());
        self.programs += 1;
        for (cell, &val) in self.buf[range].iter_mut().zip(bytes) {
            // erased cells are 0, programming can only flip bits from 0 to 1
            *cell |= val;
        }
        Ok(())
    }

    fn start_erase_sector(&mut self, sector: u32) -> Result<(), platform::FlashError> {
        let offset = self.sector_offset(sector).ok_or(platform::FlashError::Hardware)?;
        let range = self.range(offset, FLASH_SECTOR_SIZE)?;
        println!("    zero flash: erase: sector {sector}");
        self.erases += 1;
        self.buf[range].fill(0);
        self.pending_polls = self.erase_polls;
        Ok(())
    }

    fn query_erase(&mut self) -> Result<Option<u32>, platform::FlashError> {
        if self.pending_polls == 0 {
            return Ok(None);
        }
        self.pending_polls -= 1;
        Ok(Some(2))
    }

    fn verify_erase(&mut self, sector: u32) -> Result<(), platform::FlashError> {
        let offset = self.sector_offset(sector).ok_or(platform::FlashError::Hardware)?;
        let range = self.range(offset, FLASH_SECTOR_SIZE)?;
        if self.buf[range].iter().any(|&b| b != 0) {
            return Err(platform::FlashError::Verify);
        }
        Ok(())
    }

    fn sector_offset(&self, sector: u32) -> Option<u32> {
        sector
            .checked_mul(FLASH_SECTOR_SIZE as u32)
            .filter(|&offset| offset as usize <= self.buf.len())
    }

    fn erased(&self) -> ErasedValue {
        ErasedValue::Zeros
    }
}

impl platform::Sleep for ZeroFlash {
    fn sleep_ms(&mut self, ms: u32) {
        self.slept_ms += ms;
    }
}

/// Same layout as [`config`] for a [`ZeroFlash`].
pub fn zero_config() -> MfsConfig {
    MfsConfig {
        erased: ErasedValue::Zeros,
        ..config()
    }
}

/// Two banks of one sector each, the first one at sector 0.
pub fn config() -> MfsConfig {
    MfsConfig::new(0, 1, FLASH_SECTOR_SIZE as u32)
}

/// Two banks of one sector each but only `bank_size` bytes are used.
pub fn small_config(bank_size: u32) -> MfsConfig {
    MfsConfig::new(0, 1, bank_size)
}

pub fn mount(flash: Flash, config: MfsConfig) -> TestMfs {
    let mut mfs = Mfs::new(NorFlashAdapter::new(flash));
    let _ = mfs.start(config).unwrap();
    mfs
}

pub fn into_flash(mfs: TestMfs) -> Flash {
    mfs.release().into_inner()
}

pub fn read_vec(mfs: &mut TestMfs, id: u16) -> Result<Vec<u8>, mfs::error::Error> {
    let mut buf = vec![0u8; FLASH_SECTOR_SIZE];
    let size = mfs.read_record(id, &mut buf)?;
    buf.truncate(size);
    Ok(buf)
}

pub fn bank_header(counter: u32) -> [u8; BANK_HEADER_SIZE] {
    let mut raw = [0xFFu8; BANK_HEADER_SIZE];
    raw[0..4].copy_from_slice(&BANK_MAGIC_1.to_le_bytes());
    raw[4..8].copy_from_slice(&BANK_MAGIC_2.to_le_bytes());
    raw[8..12].copy_from_slice(&counter.to_le_bytes());
    let crc = crc16(CRC16_SEED, &raw[..14]);
    raw[14..16].copy_from_slice(&crc.to_le_bytes());
    raw
}

/// Header and payload of a committed record.
pub fn record(id: u16, data: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(DATA_HEADER_SIZE + data.len());
    raw.extend_from_slice(&HEADER_MAGIC.to_le_bytes());
    raw.extend_from_slice(&id.to_le_bytes());
    raw.extend_from_slice(&crc16(CRC16_SEED, data).to_le_bytes());
    raw.extend_from_slice(&(data.len() as u32).to_le_bytes());
    raw.extend_from_slice(data);
    raw
}

/// Writes a bank image consisting of a header with `counter` and `records`.
pub fn put_bank(flash: &mut Flash, bank: usize, counter: u32, records: &[(u16, &str)]) {
    let mut offset = bank * FLASH_SECTOR_SIZE;
    flash.put(offset, &bank_header(counter));
    offset += BANK_HEADER_SIZE;
    for (id, data) in records {
        let raw = record(*id, data.as_bytes());
        flash.put(offset, &raw);
        offset += raw.len();
    }
}
