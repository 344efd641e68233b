use crate::config::ErasedValue;
use alloc::vec;
use embedded_storage::nor_flash::NorFlash;
use thiserror::Error;

#[cfg(feature = "defmt")]
use defmt::trace;

/// Errors reported by the flash device. The storage driver maps all of them to
/// [`crate::error::Error::FlashFailure`] except [`FlashError::Verify`] while assessing a bank.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    #[error("device busy erasing")]
    BusyErasing,
    #[error("read failed")]
    Read,
    #[error("program failed")]
    Program,
    #[error("erase failed")]
    Erase,
    /// The sector is not fully erased.
    #[error("erase verification failed")]
    Verify,
    #[error("hardware failure")]
    Hardware,
}

/// Byte addressable, sector erasable flash.
///
/// Offsets are absolute device offsets. Programming may only move bits away from their erased
/// value, just like NOR flash.
pub trait Flash {
    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), FlashError>;

    fn program(&mut self, offset: u32, bytes: &[u8]) -> Result<(), FlashError>;

    /// Starts erasing a sector. Completion is polled with [`Flash::query_erase`].
    fn start_erase_sector(&mut self, sector: u32) -> Result<(), FlashError>;

    /// Returns `Some(ms)` while an erase is still running, `ms` being a suggested delay before
    /// the next poll.
    fn query_erase(&mut self) -> Result<Option<u32>, FlashError>;

    /// Fails with [`FlashError::Verify`] if any byte of the sector is not erased.
    fn verify_erase(&mut self, sector: u32) -> Result<(), FlashError>;

    /// Absolute offset of the first byte of `sector`, `None` if it is not addressable.
    fn sector_offset(&self, sector: u32) -> Option<u32>;

    /// Value of the cells after erasing.
    fn erased(&self) -> ErasedValue {
        ErasedValue::Ones
    }
}

/// Blocking sleep used while waiting for erase completion.
pub trait Sleep {
    fn sleep_ms(&mut self, ms: u32);
}

/// See README.md for an example implementation.
pub trait Platform: Flash + Sleep {
    /// Polls the device until a running erase has completed. Sleeps at least `poll_ms` between
    /// two polls, more if the device asks for it.
    fn wait_erase(&mut self, poll_ms: u32) -> Result<(), FlashError> {
        while let Some(hint) = self.query_erase()? {
            self.sleep_ms(hint.max(poll_ms));
        }
        Ok(())
    }
}

impl<T: Flash + Sleep> Platform for T {}

impl<T: Flash> Flash for &mut T {
    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(offset, bytes)
    }

    fn program(&mut self, offset: u32, bytes: &[u8]) -> Result<(), FlashError> {
        (**self).program(offset, bytes)
    }

    fn start_erase_sector(&mut self, sector: u32) -> Result<(), FlashError> {
        (**self).start_erase_sector(sector)
    }

    fn query_erase(&mut self) -> Result<Option<u32>, FlashError> {
        (**self).query_erase()
    }

    fn verify_erase(&mut self, sector: u32) -> Result<(), FlashError> {
        (**self).verify_erase(sector)
    }

    fn sector_offset(&self, sector: u32) -> Option<u32> {
        (**self).sector_offset(sector)
    }

    fn erased(&self) -> ErasedValue {
        (**self).erased()
    }
}

impl<T: Sleep> Sleep for &mut T {
    fn sleep_ms(&mut self, ms: u32) {
        (**self).sleep_ms(ms)
    }
}

#[inline(always)]
const fn align_ceil(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size.saturating_add(alignment - 1) & !(alignment - 1)
    } else {
        size.saturating_add(alignment - 1) / alignment * alignment
    }
}

#[inline(always)]
const fn align_floor(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size & !(alignment - 1)
    } else {
        size / alignment * alignment
    }
}

const VERIFY_CHUNK_SIZE: usize = 64;

/// Exposes any [`NorFlash`] as managed flash. A sector is one `ERASE_SIZE` block.
///
/// Erasing through `embedded-storage` is blocking, so erase completion never has to be polled.
/// Accesses that don't match `READ_SIZE`/`WRITE_SIZE` alignment are widened; the padding of a
/// program is `0xFF` which leaves the surrounding cells untouched.
pub struct NorFlashAdapter<F> {
    inner: F,
}

impl<F: NorFlash> NorFlashAdapter<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut F {
        &mut self.inner
    }

    pub fn into_inner(self) -> F {
        self.inner
    }

    fn sector_range(&self, sector: u32) -> Result<(u32, u32), FlashError> {
        let from = self.sector_offset(sector).ok_or(FlashError::Hardware)?;
        let to = from
            .checked_add(F::ERASE_SIZE as u32)
            .ok_or(FlashError::Hardware)?;
        Ok((from, to))
    }
}

impl<F: NorFlash> Flash for NorFlashAdapter<F> {
    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), FlashError> {
        if bytes.is_empty() {
            return Ok(());
        }

        let offset = offset as usize;
        let start = align_floor(offset, F::READ_SIZE);
        let end = align_ceil(offset + bytes.len(), F::READ_SIZE);

        if start == offset && end == offset + bytes.len() {
            return self
                .inner
                .read(offset as u32, bytes)
                .map_err(|_| FlashError::Read);
        }

        #[cfg(feature = "defmt")]
        trace!("read widened @{:#08x}: [{}]", start, end - start);

        let mut buf = vec![0u8; end - start];
        self.inner
            .read(start as u32, &mut buf)
            .map_err(|_| FlashError::Read)?;
        let skip = offset - start;
        bytes.copy_from_slice(&buf[skip..skip + bytes.len()]);
        Ok(())
    }

    fn program(&mut self, offset: u32, bytes: &[u8]) -> Result<(), FlashError> {
        if bytes.is_empty() {
            return Ok(());
        }

        let offset = offset as usize;
        let start = align_floor(offset, F::WRITE_SIZE);
        let end = align_ceil(offset + bytes.len(), F::WRITE_SIZE);

        if start == offset && end == offset + bytes.len() {
            return self
                .inner
                .write(offset as u32, bytes)
                .map_err(|_| FlashError::Program);
        }

        #[cfg(feature = "defmt")]
        trace!("program widened @{:#08x}: [{}]", start, end - start);

        let mut buf = vec![0xFFu8; end - start];
        let skip = offset - start;
        buf[skip..skip + bytes.len()].copy_from_slice(bytes);
        self.inner
            .write(start as u32, &buf)
            .map_err(|_| FlashError::Program)
    }

    fn start_erase_sector(&mut self, sector: u32) -> Result<(), FlashError> {
        let (from, to) = self.sector_range(sector)?;
        self.inner.erase(from, to).map_err(|_| FlashError::Erase)
    }

    fn query_erase(&mut self) -> Result<Option<u32>, FlashError> {
        Ok(None)
    }

    fn verify_erase(&mut self, sector: u32) -> Result<(), FlashError> {
        let (mut offset, end) = self.sector_range(sector)?;
        let mut buf = [0u8; VERIFY_CHUNK_SIZE];

        while offset < end {
            let chunk = ((end - offset) as usize).min(VERIFY_CHUNK_SIZE);
            self.read(offset, &mut buf[..chunk])?;
            if buf[..chunk].iter().any(|&b| b != 0xFF) {
                return Err(FlashError::Verify);
            }
            offset += chunk as u32;
        }

        Ok(())
    }

    fn sector_offset(&self, sector: u32) -> Option<u32> {
        // the end of the last sector is still a valid boundary
        sector
            .checked_mul(F::ERASE_SIZE as u32)
            .filter(|&offset| offset as usize <= self.inner.capacity())
    }

    fn erased(&self) -> ErasedValue {
        ErasedValue::Ones
    }
}

impl<F: NorFlash> Sleep for NorFlashAdapter<F> {
    fn sleep_ms(&mut self, _ms: u32) {}
}

#[cfg(any(
    feature = "esp32",
    feature = "esp32s2",
    feature = "esp32s3",
    feature = "esp32c2",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32h2",
))]
mod chip {
    use crate::platform::NorFlashAdapter;
    use esp_storage::FlashStorage;

    /// The internal SPI flash of the ESP32 family, sectors are 4k.
    pub type EspFlash<'d> = NorFlashAdapter<FlashStorage<'d>>;
}

#[cfg(any(
    feature = "esp32",
    feature = "esp32s2",
    feature = "esp32s3",
    feature = "esp32c2",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32h2",
))]
pub use chip::*;
