use crate::error::Error;
use crate::platform::Flash;
use crate::raw::{BANK_HEADER_SIZE, DATA_HEADER_SIZE};

/// Default number of mount attempts before the driver gives up.
pub const DEFAULT_MAX_REPAIR_ATTEMPTS: u32 = 3;

/// Default delay between two polls of a running erase.
pub const DEFAULT_ERASE_POLL_MS: u32 = 1;

/// Value of a flash word after erasing. Has to match [`Flash::erased`] of the device.
#[derive(strum::Display, Debug, PartialEq, Eq, Copy, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErasedValue {
    /// Erased cells read as `1`, the common case for NOR flash.
    #[default]
    Ones,
    Zeros,
}

impl ErasedValue {
    pub const fn word(self) -> u32 {
        match self {
            ErasedValue::Ones => u32::MAX,
            ErasedValue::Zeros => 0,
        }
    }
}

/// Layout of the managed partition.
///
/// Both banks consist of whole sectors and must cover at least `bank_size` bytes.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MfsConfig {
    pub erased: ErasedValue,
    pub bank_size: u32,
    pub bank0_start: u32,
    pub bank0_sectors: u32,
    pub bank1_start: u32,
    pub bank1_sectors: u32,
    /// How many times mounting is attempted when the flash fails.
    pub max_repair_attempts: u32,
    pub erase_poll_ms: u32,
    /// Verifies every payload checksum while mounting instead of on first read. Damaged records
    /// are dropped by the garbage collection that follows.
    pub strong_checking: bool,
}

impl MfsConfig {
    /// Two banks of `sectors` sectors each, placed back to back starting at `first_sector`.
    pub fn new(first_sector: u32, sectors: u32, bank_size: u32) -> Self {
        Self {
            erased: ErasedValue::Ones,
            bank_size,
            bank0_start: first_sector,
            bank0_sectors: sectors,
            bank1_start: first_sector.saturating_add(sectors),
            bank1_sectors: sectors,
            max_repair_attempts: DEFAULT_MAX_REPAIR_ATTEMPTS,
            erase_poll_ms: DEFAULT_ERASE_POLL_MS,
            strong_checking: false,
        }
    }

    /// Checks the layout against the device and returns the offsets of both banks.
    pub(crate) fn validate<T: Flash>(&self, hal: &T) -> Result<[u32; 2], Error> {
        if self.bank0_sectors == 0 || self.bank1_sectors == 0 || self.max_repair_attempts == 0 {
            return Err(Error::InvalidConfig);
        }

        if self.erased != hal.erased() {
            return Err(Error::InvalidConfig);
        }

        if (self.bank_size as usize) < BANK_HEADER_SIZE + 2 * DATA_HEADER_SIZE {
            return Err(Error::InvalidConfig);
        }

        let bank0 = span(hal, self.bank0_start, self.bank0_sectors)?;
        let bank1 = span(hal, self.bank1_start, self.bank1_sectors)?;

        if bank0.1 - bank0.0 < self.bank_size || bank1.1 - bank1.0 < self.bank_size {
            return Err(Error::InvalidConfig);
        }

        if bank0.0 < bank1.1 && bank1.0 < bank0.1 {
            return Err(Error::InvalidConfig);
        }

        Ok([bank0.0, bank1.0])
    }
}

fn span<T: Flash>(hal: &T, start: u32, sectors: u32) -> Result<(u32, u32), Error> {
    let end_sector = start.checked_add(sectors).ok_or(Error::InvalidConfig)?;
    let from = hal.sector_offset(start).ok_or(Error::InvalidConfig)?;
    let to = hal.sector_offset(end_sector).ok_or(Error::InvalidConfig)?;
    if to <= from {
        return Err(Error::InvalidConfig);
    }
    Ok((from, to))
}
