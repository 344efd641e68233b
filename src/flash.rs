use crate::config::MfsConfig;
use crate::error::Error;
use crate::platform::{FlashError, Platform};
use crate::raw::BankHeader;
use crate::{BUFFER_SIZE, Bank, DriverState, Mfs};
use core::ops::Range;
#[cfg(feature = "defmt")]
use defmt::{error, trace};

impl<T: Platform, const MAX_RECORDS: usize> Mfs<T, MAX_RECORDS> {
    /// Every device error ends up here, the driver is unusable until it is started again.
    pub(crate) fn flash_failure(&mut self, _cause: FlashError) -> Error {
        #[cfg(feature = "defmt")]
        error!("flash failure: {}", _cause);

        #[cfg(feature = "debug-logs")]
        println!("  flash: failure: {_cause}");

        self.state = DriverState::Error;
        Error::FlashFailure
    }

    pub(crate) fn flash_read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("flash_read @{:#08x}: [{}]", offset, buf.len());

        match self.hal.read(offset, buf) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.flash_failure(e)),
        }
    }

    /// Reads into the head of the transient buffer.
    pub(crate) fn flash_read_buffer(&mut self, offset: u32, len: usize) -> Result<(), Error> {
        match self.hal.read(offset, &mut self.buffer[..len]) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.flash_failure(e)),
        }
    }

    pub(crate) fn flash_write(&mut self, offset: u32, data: &[u8]) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("flash_write @{:#08x}: [{}]", offset, data.len());

        if let Err(e) = self.hal.program(offset, data) {
            return Err(self.flash_failure(e));
        }

        #[cfg(feature = "write-verify")]
        self.flash_verify(offset, data)?;

        Ok(())
    }

    #[cfg(feature = "write-verify")]
    fn flash_verify(&mut self, mut offset: u32, data: &[u8]) -> Result<(), Error> {
        for expected in data.chunks(BUFFER_SIZE) {
            self.flash_read_buffer(offset, expected.len())?;
            if self.buffer[..expected.len()] != *expected {
                return Err(self.flash_failure(FlashError::Program));
            }
            offset += expected.len() as u32;
        }
        Ok(())
    }

    /// Copies `n` bytes within the flash. Chunks never cross a `BUFFER_SIZE` boundary of the
    /// destination so that no program operation spans two flash pages.
    pub(crate) fn flash_copy(&mut self, mut dst: u32, mut src: u32, mut n: u32) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("flash_copy @{:#08x} -> @{:#08x}: [{}]", src, dst, n);

        while n > 0 {
            let chunk = (((dst | (BUFFER_SIZE as u32 - 1)) + 1) - dst).min(n);

            self.flash_read_buffer(src, chunk as usize)?;
            // verification reuses the transient buffer
            let staged = self.buffer;
            self.flash_write(dst, &staged[..chunk as usize])?;

            src += chunk;
            dst += chunk;
            n -= chunk;
        }

        Ok(())
    }

    pub(crate) fn bank_offset(&self, bank: Bank) -> u32 {
        match bank {
            Bank::Bank0 => self.bank_start[0],
            Bank::Bank1 => self.bank_start[1],
        }
    }

    fn bank_sectors(config: &MfsConfig, bank: Bank) -> Range<u32> {
        match bank {
            Bank::Bank0 => config.bank0_start..config.bank0_start + config.bank0_sectors,
            Bank::Bank1 => config.bank1_start..config.bank1_start + config.bank1_sectors,
        }
    }

    /// Erases all sectors of `bank` and verifies them.
    pub(crate) fn bank_erase(&mut self, bank: Bank) -> Result<(), Error> {
        let config = self.config()?;

        #[cfg(feature = "defmt")]
        trace!("bank_erase: {}", bank);

        #[cfg(feature = "debug-logs")]
        println!("  flash: erase {bank}");

        for sector in Self::bank_sectors(&config, bank) {
            if let Err(e) = erase_sector(&mut self.hal, sector, config.erase_poll_ms) {
                return Err(self.flash_failure(e));
            }
        }

        Ok(())
    }

    /// Fails with [`Error::NotErased`] if any sector of `bank` contains data.
    pub(crate) fn bank_verify_erase(&mut self, bank: Bank) -> Result<(), Error> {
        let config = self.config()?;

        for sector in Self::bank_sectors(&config, bank) {
            match self.hal.verify_erase(sector) {
                Ok(()) => {}
                Err(FlashError::Verify) => return Err(Error::NotErased),
                Err(e) => return Err(self.flash_failure(e)),
            }
        }

        Ok(())
    }

    /// Writes the header validating `bank`.
    pub(crate) fn bank_write_header(&mut self, bank: Bank, counter: u32) -> Result<(), Error> {
        let config = self.config()?;

        #[cfg(feature = "defmt")]
        trace!("bank_write_header: {} counter {}", bank, counter);

        let header = BankHeader::new(counter, config.erased.word());
        let offset = self.bank_offset(bank);
        self.flash_write(offset, &header.to_bytes())
    }
}

fn erase_sector<T: Platform>(hal: &mut T, sector: u32, poll_ms: u32) -> Result<(), FlashError> {
    hal.start_erase_sector(sector)?;
    hal.wait_erase(poll_ms)?;
    hal.verify_erase(sector)
}
