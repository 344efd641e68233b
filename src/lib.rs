#![doc = include_str ! ("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

mod bank;
pub mod config;
pub mod crc;
pub mod error;
mod flash;
mod gc;
mod mount;
pub mod platform;
mod raw;

extern crate alloc;

use crate::config::MfsConfig;
use crate::crc::{CRC16_SEED, crc16};
use crate::error::{Error, Outcome};
use crate::platform::Platform;
use crate::raw::DataHeader;
#[cfg(feature = "defmt")]
use defmt::{debug, trace};

pub use raw::{BANK_HEADER_SIZE, DATA_HEADER_SIZE};

/// Number of record ids managed when no explicit capacity is given.
pub const DEFAULT_MAX_RECORDS: usize = 32;

/// Size of the transient buffer used for copying and verifying flash contents.
pub(crate) const BUFFER_SIZE: usize = 32;

/// One of the two equally sized halves of the managed partition.
#[derive(strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bank {
    Bank0,
    Bank1,
}

impl Bank {
    pub fn other(self) -> Bank {
        match self {
            Bank::Bank0 => Bank::Bank1,
            Bank::Bank1 => Bank::Bank0,
        }
    }
}

#[derive(strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverState {
    /// Constructed or stopped, no partition mounted.
    Stop,
    /// A bank is mounted and records can be accessed.
    Ready,
    /// The flash failed. Only `start` leaves this state.
    Error,
}

/// Location of the latest instance of a record in the current bank.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) struct RecordDescriptor {
    /// Absolute flash offset of the data header.
    pub(crate) offset: u32,
    pub(crate) size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MfsStatistics {
    pub bank: Bank,
    pub counter: u32,
    /// Bank header plus header and payload of every live record.
    pub used_space: u32,
    /// Space available after compacting the bank.
    pub free_space: u32,
    /// Space available for appending without a garbage collection.
    pub contiguous_free_space: u32,
    pub records: u16,
}

/// Managed flash storage: up to `MAX_RECORDS` records, identified by `1..=MAX_RECORDS`, kept in
/// an append-only log in one of two flash banks.
///
/// Records are never overwritten in place. When the current bank runs out of space the live
/// records are copied to the other bank, which then becomes current, and the old bank is erased.
/// Interrupted writes, erases and compactions are detected and repaired when mounting.
///
/// The struct keeps one descriptor per record id in memory, the flash is only read to fetch
/// payloads.
pub struct Mfs<T: Platform, const MAX_RECORDS: usize = DEFAULT_MAX_RECORDS> {
    pub(crate) hal: T,
    pub(crate) config: Option<MfsConfig>,
    pub(crate) state: DriverState,
    /// Offsets of both banks, resolved when starting.
    pub(crate) bank_start: [u32; 2],

    // set after mounting
    pub(crate) current_bank: Bank,
    pub(crate) current_counter: u32,
    pub(crate) next_offset: u32,
    pub(crate) used_space: u32,
    pub(crate) descriptors: [Option<RecordDescriptor>; MAX_RECORDS],

    pub(crate) buffer: [u8; BUFFER_SIZE],
}

impl<T: Platform, const MAX_RECORDS: usize> Mfs<T, MAX_RECORDS> {
    /// Creates a stopped driver. Nothing is read from the flash until [`Mfs::start`].
    pub fn new(hal: T) -> Self {
        const {
            assert!(MAX_RECORDS >= 1 && MAX_RECORDS <= u16::MAX as usize);
        }

        Self {
            hal,
            config: None,
            state: DriverState::Stop,
            bank_start: [0; 2],
            current_bank: Bank::Bank0,
            current_counter: 0,
            next_offset: 0,
            used_space: 0,
            descriptors: [None; MAX_RECORDS],
            buffer: [0u8; BUFFER_SIZE],
        }
    }

    /// Validates the configuration and mounts the partition, repairing it if necessary.
    ///
    /// Returns [`Outcome::Repaired`] if damaged or stale data had to be discarded. Can be called
    /// again at any time, which is the only way out of the [`DriverState::Error`] state.
    pub fn start(&mut self, config: MfsConfig) -> Result<Outcome, Error> {
        self.bank_start = config.validate(&self.hal)?;

        #[cfg(feature = "defmt")]
        debug!("start: bank_size {}", config.bank_size);

        self.config = Some(config);
        self.mount()
    }

    pub fn stop(&mut self) {
        #[cfg(feature = "defmt")]
        debug!("stop");

        self.reset();
        self.config = None;
        self.state = DriverState::Stop;
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Erases both banks, destroying all records, and mounts the empty partition.
    pub fn erase_all(&mut self) -> Result<Outcome, Error> {
        self.ensure_ready()?;

        self.bank_erase(Bank::Bank0)?;
        self.bank_erase(Bank::Bank1)?;

        self.mount()
    }

    /// Reads record `id` into the beginning of `buf` and returns its size.
    ///
    /// A checksum mismatch of the payload is treated as a hardware failure.
    pub fn read_record(&mut self, id: u16, buf: &mut [u8]) -> Result<usize, Error> {
        self.ensure_ready()?;
        let index = Self::index(id)?;

        let descriptor = self.descriptors[index].ok_or(Error::NotFound)?;
        let size = descriptor.size as usize;
        if buf.len() < size {
            return Err(Error::InvalidSize);
        }

        #[cfg(feature = "defmt")]
        trace!("read_record: {} @{:#08x}[{}]", id, descriptor.offset, size);

        let mut raw = [0u8; DATA_HEADER_SIZE];
        self.flash_read(descriptor.offset, &mut raw)?;
        let header = DataHeader::from_bytes(&raw);

        self.flash_read(descriptor.offset + DATA_HEADER_SIZE as u32, &mut buf[..size])?;

        if crc16(CRC16_SEED, &buf[..size]) != header.crc {
            self.state = DriverState::Error;
            return Err(Error::FlashFailure);
        }

        Ok(size)
    }

    /// Creates or replaces record `id`.
    ///
    /// Room for one extra header is always kept free so that any record can be erased later.
    /// Returns [`Outcome::GarbageCollected`] if the bank had to be compacted first.
    pub fn write_record(&mut self, id: u16, data: &[u8]) -> Result<Outcome, Error> {
        self.ensure_ready()?;
        let index = Self::index(id)?;
        if data.is_empty() {
            return Err(Error::InvalidSize);
        }
        let config = self.config()?;

        let required = 2 * DATA_HEADER_SIZE as u64 + data.len() as u64;
        if required > (config.bank_size - self.used_space) as u64 {
            return Err(Error::OutOfMemory);
        }

        let mut outcome = Outcome::Done;
        if required > self.contiguous_free_space(&config) as u64 {
            self.garbage_collect()?;
            outcome = Outcome::GarbageCollected;
        }

        #[cfg(feature = "defmt")]
        trace!("write_record: {} @{:#08x}[{}]", id, self.next_offset, data.len());

        let offset = self.next_offset;
        let size = data.len() as u32;

        // the magic is written last, a header without it is never taken for a record
        let mut header = DataHeader::uncommitted(id, data, config.erased.word());
        self.flash_write(offset, &header.to_bytes())?;
        self.flash_write(offset + DATA_HEADER_SIZE as u32, data)?;
        header.commit();
        self.flash_write(offset, &header.to_bytes()[..size_of::<u32>()])?;

        if let Some(old) = self.descriptors[index] {
            self.used_space -= DATA_HEADER_SIZE as u32 + old.size;
        }
        self.descriptors[index] = Some(RecordDescriptor { offset, size });
        self.next_offset += DATA_HEADER_SIZE as u32 + size;
        self.used_space += DATA_HEADER_SIZE as u32 + size;

        Ok(outcome)
    }

    /// Erases record `id` by appending a zero sized header.
    pub fn erase_record(&mut self, id: u16) -> Result<Outcome, Error> {
        self.ensure_ready()?;
        let index = Self::index(id)?;
        let config = self.config()?;

        let descriptor = self.descriptors[index].ok_or(Error::NotFound)?;

        // writes always leave room for this header
        let required = DATA_HEADER_SIZE as u32;
        if required > config.bank_size - self.used_space {
            return Err(Error::Internal);
        }

        let mut outcome = Outcome::Done;
        if required > self.contiguous_free_space(&config) {
            self.garbage_collect()?;
            outcome = Outcome::GarbageCollected;
        }

        #[cfg(feature = "defmt")]
        trace!("erase_record: {} @{:#08x}", id, self.next_offset);

        let header = DataHeader::tombstone(id);
        self.flash_write(self.next_offset, &header.to_bytes())?;

        self.used_space -= DATA_HEADER_SIZE as u32 + descriptor.size;
        self.next_offset += DATA_HEADER_SIZE as u32;
        self.descriptors[index] = None;

        Ok(outcome)
    }

    /// Compacts the live records into the other bank and erases the current one.
    pub fn perform_garbage_collection(&mut self) -> Result<Outcome, Error> {
        self.ensure_ready()?;

        self.garbage_collect()?;
        Ok(Outcome::Done)
    }

    /// Size of record `id` without reading it.
    pub fn record_size(&self, id: u16) -> Result<usize, Error> {
        self.ensure_ready()?;
        let index = Self::index(id)?;

        self.descriptors[index]
            .map(|descriptor| descriptor.size as usize)
            .ok_or(Error::NotFound)
    }

    /// Returns usage information about the mounted bank.
    pub fn statistics(&self) -> Result<MfsStatistics, Error> {
        self.ensure_ready()?;
        let config = self.config()?;

        Ok(MfsStatistics {
            bank: self.current_bank,
            counter: self.current_counter,
            used_space: self.used_space,
            free_space: config.bank_size - self.used_space,
            contiguous_free_space: self.contiguous_free_space(&config),
            records: self.descriptors.iter().flatten().count() as u16,
        })
    }

    /// Returns the platform, dropping all in-memory state.
    pub fn release(self) -> T {
        self.hal
    }

    fn ensure_ready(&self) -> Result<(), Error> {
        if self.state != DriverState::Ready {
            return Err(Error::InvalidState);
        }
        Ok(())
    }

    fn index(id: u16) -> Result<usize, Error> {
        if id == 0 || id as usize > MAX_RECORDS {
            return Err(Error::InvalidId);
        }
        Ok(id as usize - 1)
    }

    pub(crate) fn config(&self) -> Result<MfsConfig, Error> {
        self.config.ok_or(Error::InvalidState)
    }

    fn contiguous_free_space(&self, config: &MfsConfig) -> u32 {
        self.bank_offset(self.current_bank) + config.bank_size - self.next_offset
    }

    pub(crate) fn reset(&mut self) {
        self.current_bank = Bank::Bank0;
        self.current_counter = 0;
        self.next_offset = 0;
        self.used_space = 0;
        self.descriptors = [None; MAX_RECORDS];
    }
}
