use crate::error::Error;
use crate::platform::Platform;
use crate::raw::{BANK_HEADER_SIZE, DATA_HEADER_SIZE};
use crate::{DriverState, Mfs, RecordDescriptor};
#[cfg(feature = "defmt")]
use defmt::debug;

impl<T: Platform, const MAX_RECORDS: usize> Mfs<T, MAX_RECORDS> {
    /// Copies the latest instance of every record into the other bank, validates it with a
    /// header carrying the next counter and erases the current bank.
    ///
    /// The order matters: until the new header is written the new bank is garbage and the current
    /// one wins when mounting, afterwards the new bank wins because of its higher counter.
    pub(crate) fn garbage_collect(&mut self) -> Result<(), Error> {
        let config = self.config()?;

        let source = self.current_bank;
        let destination = source.other();
        let Some(counter) = self
            .current_counter
            .checked_add(1)
            .filter(|&counter| counter != config.erased.word())
        else {
            self.state = DriverState::Error;
            return Err(Error::Internal);
        };

        #[cfg(feature = "defmt")]
        debug!("garbage_collect: {} -> {} counter {}", source, destination, counter);

        #[cfg(feature = "debug-logs")]
        println!("  gc: {source} -> {destination}, counter {counter}");

        let mut offset = self.bank_offset(destination) + BANK_HEADER_SIZE as u32;

        for index in 0..MAX_RECORDS {
            let Some(descriptor) = self.descriptors[index] else {
                continue;
            };

            let total = DATA_HEADER_SIZE as u32 + descriptor.size;
            self.flash_copy(offset, descriptor.offset, total)?;
            self.descriptors[index] = Some(RecordDescriptor {
                offset,
                size: descriptor.size,
            });
            offset += total;
        }

        self.current_bank = destination;
        self.current_counter = counter;
        self.next_offset = offset;

        self.bank_write_header(destination, counter)?;
        self.bank_erase(source)?;

        Ok(())
    }
}
