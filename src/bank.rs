use crate::crc::{CRC16_SEED, crc16};
use crate::error::Error;
use crate::platform::Platform;
use crate::raw::{
    BANK_HEADER_SIZE, BankHeader, DATA_HEADER_SIZE, DataHeader, RecordState, is_erased,
};
use crate::{BUFFER_SIZE, Bank, Mfs, RecordDescriptor};
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

/// State of a bank judged by its header alone.
#[derive(strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum BankState {
    /// The whole bank is erased.
    Erased,
    /// Valid header carrying the bank counter.
    Ok(u32),
    /// Damaged header, or an erased header in front of data.
    Garbage,
}

/// Result of replaying the log of a bank.
#[derive(strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum ScanVerdict {
    Ok,
    /// The log contains a torn write or damaged records and has to be compacted.
    Partial,
}

impl<T: Platform, const MAX_RECORDS: usize> Mfs<T, MAX_RECORDS> {
    /// Determines the state of a bank. The data area is only looked at if the header is erased.
    pub(crate) fn bank_get_state(&mut self, bank: Bank) -> Result<BankState, Error> {
        let config = self.config()?;
        let erased = config.erased.word();

        let mut raw = [0u8; BANK_HEADER_SIZE];
        self.flash_read(self.bank_offset(bank), &mut raw)?;

        let state = if !is_erased(&raw, erased) {
            let header = BankHeader::from_bytes(&raw);

            #[cfg(feature = "debug-logs")]
            println!("  bank: {bank}: {header:?}");

            if header.is_valid(erased) {
                BankState::Ok(header.counter)
            } else {
                BankState::Garbage
            }
        } else {
            // an erased header in front of data is left over from an interrupted erase
            match self.bank_verify_erase(bank) {
                Ok(()) => BankState::Erased,
                Err(Error::NotErased) => BankState::Garbage,
                Err(e) => return Err(e),
            }
        };

        #[cfg(feature = "defmt")]
        trace!("bank_get_state: {}: {}", bank, state);

        Ok(state)
    }

    /// Replays the log of `bank`, rebuilding the descriptors and the append cursor.
    ///
    /// Scanning stops at the first erased header. A header that is neither erased nor valid stops
    /// the scan as well but the bank is reported as partial. Everything behind it is dead.
    pub(crate) fn bank_scan_records(&mut self, bank: Bank) -> Result<ScanVerdict, Error> {
        let config = self.config()?;
        let erased = config.erased.word();

        let start = self.bank_offset(bank);
        let end = start + config.bank_size;

        let mut offset = start + BANK_HEADER_SIZE as u32;
        let mut verdict = ScanVerdict::Ok;

        // less than a header left means nothing could ever have been written there
        while offset + DATA_HEADER_SIZE as u32 <= end {
            let mut raw = [0u8; DATA_HEADER_SIZE];
            self.flash_read(offset, &mut raw)?;

            match DataHeader::check(&raw, offset, end, erased, MAX_RECORDS) {
                RecordState::Erased => break,
                RecordState::Garbage => {
                    #[cfg(feature = "defmt")]
                    warn!("bank_scan_records: garbage @{:#08x}", offset);

                    #[cfg(feature = "debug-logs")]
                    println!("  bank: garbage @{offset:#08x}: {:?}", DataHeader::from_bytes(&raw));

                    verdict = ScanVerdict::Partial;
                    break;
                }
                RecordState::Valid => {
                    let header = DataHeader::from_bytes(&raw);
                    let index = header.id as usize - 1;

                    if header.size == 0 {
                        self.descriptors[index] = None;
                    } else if config.strong_checking && !self.payload_intact(offset, &header)? {
                        #[cfg(feature = "defmt")]
                        warn!("bank_scan_records: bad payload @{:#08x}", offset);

                        verdict = ScanVerdict::Partial;
                    } else {
                        self.descriptors[index] = Some(RecordDescriptor {
                            offset,
                            size: header.size,
                        });
                    }

                    offset += DATA_HEADER_SIZE as u32 + header.size;
                }
            }
        }

        if offset > end {
            return Err(Error::Internal);
        }

        self.next_offset = offset;

        Ok(verdict)
    }

    fn payload_intact(&mut self, offset: u32, header: &DataHeader) -> Result<bool, Error> {
        let mut crc = CRC16_SEED;
        let mut src = offset + DATA_HEADER_SIZE as u32;
        let mut remaining = header.size as usize;

        while remaining > 0 {
            let chunk = remaining.min(BUFFER_SIZE);
            self.flash_read_buffer(src, chunk)?;
            crc = crc16(crc, &self.buffer[..chunk]);
            src += chunk as u32;
            remaining -= chunk;
        }

        Ok(crc == header.crc)
    }

    /// Selects `bank` as current. Its header must have been validated or just written.
    pub(crate) fn bank_mount(&mut self, bank: Bank) -> Result<ScanVerdict, Error> {
        self.reset();

        self.current_counter = match self.bank_get_state(bank)? {
            BankState::Ok(counter) => counter,
            // the bank has just been selected or repaired
            BankState::Erased | BankState::Garbage => return Err(Error::Internal),
        };
        self.current_bank = bank;

        let verdict = self.bank_scan_records(bank)?;

        self.used_space = BANK_HEADER_SIZE as u32
            + self
                .descriptors
                .iter()
                .flatten()
                .map(|descriptor| DATA_HEADER_SIZE as u32 + descriptor.size)
                .sum::<u32>();

        #[cfg(feature = "defmt")]
        trace!(
            "bank_mount: {} counter {} next {:#08x} used {}",
            bank, self.current_counter, self.next_offset, self.used_space
        );

        Ok(verdict)
    }
}
