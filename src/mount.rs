use crate::bank::{BankState, ScanVerdict};
use crate::error::{Error, Outcome};
use crate::platform::Platform;
use crate::{Bank, DriverState, Mfs};
use core::cmp::Ordering;
#[cfg(feature = "defmt")]
use defmt::{debug, error, warn};

/// Counter of a freshly initialized bank.
const FIRST_COUNTER: u32 = 1;

impl<T: Platform, const MAX_RECORDS: usize> Mfs<T, MAX_RECORDS> {
    /// Assesses both banks and converges to exactly one mounted bank, the other one erased.
    ///
    /// | bank 0  | bank 1  | action                                           |
    /// |---------|---------|--------------------------------------------------|
    /// | erased  | erased  | initialize bank 0                                |
    /// | erased  | ok      | mount bank 1                                     |
    /// | ok      | erased  | mount bank 0                                     |
    /// | ok      | ok      | erase the bank with the lower counter            |
    /// | erased  | garbage | erase bank 1, initialize bank 0                  |
    /// | garbage | erased  | erase bank 0, initialize bank 1                  |
    /// | ok      | garbage | erase bank 1                                     |
    /// | garbage | ok      | erase bank 0                                     |
    /// | garbage | garbage | erase both, initialize bank 0, all data is lost  |
    ///
    /// A mounted bank with a damaged log is compacted right away.
    pub(crate) fn try_mount(&mut self) -> Result<Outcome, Error> {
        let state0 = self.bank_get_state(Bank::Bank0)?;
        let state1 = self.bank_get_state(Bank::Bank1)?;

        #[cfg(feature = "debug-logs")]
        println!("  mount: bank0 {state0:?} bank1 {state1:?}");

        let (bank, repaired) = match (state0, state1) {
            (BankState::Erased, BankState::Erased) => {
                self.bank_write_header(Bank::Bank0, FIRST_COUNTER)?;
                (Bank::Bank0, false)
            }
            (BankState::Erased, BankState::Ok(_)) => (Bank::Bank1, false),
            (BankState::Ok(_), BankState::Erased) => (Bank::Bank0, false),
            (BankState::Ok(counter0), BankState::Ok(counter1)) => {
                // a garbage collection was interrupted before the old bank got erased
                match counter0.cmp(&counter1) {
                    Ordering::Greater => {
                        self.bank_erase(Bank::Bank1)?;
                        (Bank::Bank0, true)
                    }
                    Ordering::Less => {
                        self.bank_erase(Bank::Bank0)?;
                        (Bank::Bank1, true)
                    }
                    Ordering::Equal => {
                        #[cfg(feature = "defmt")]
                        error!("try_mount: both banks carry counter {}", counter0);

                        return Err(Error::Internal);
                    }
                }
            }
            (BankState::Erased, BankState::Garbage) => {
                self.bank_erase(Bank::Bank1)?;
                self.bank_write_header(Bank::Bank0, FIRST_COUNTER)?;
                (Bank::Bank0, true)
            }
            (BankState::Garbage, BankState::Erased) => {
                self.bank_erase(Bank::Bank0)?;
                self.bank_write_header(Bank::Bank1, FIRST_COUNTER)?;
                (Bank::Bank1, true)
            }
            (BankState::Ok(_), BankState::Garbage) => {
                self.bank_erase(Bank::Bank1)?;
                (Bank::Bank0, true)
            }
            (BankState::Garbage, BankState::Ok(_)) => {
                self.bank_erase(Bank::Bank0)?;
                (Bank::Bank1, true)
            }
            (BankState::Garbage, BankState::Garbage) => {
                #[cfg(feature = "defmt")]
                warn!("try_mount: both banks unreadable, reinitializing");

                self.bank_erase(Bank::Bank0)?;
                self.bank_erase(Bank::Bank1)?;
                self.bank_write_header(Bank::Bank0, FIRST_COUNTER)?;
                (Bank::Bank0, true)
            }
        };

        if self.bank_mount(bank)? == ScanVerdict::Partial {
            #[cfg(feature = "defmt")]
            warn!("try_mount: {} partially written, compacting", bank);

            self.garbage_collect()?;
            return Ok(Outcome::Repaired);
        }

        Ok(if repaired {
            Outcome::Repaired
        } else {
            Outcome::Done
        })
    }

    /// Mounts the partition, retrying on flash failures. Internal errors are reported at once.
    pub(crate) fn mount(&mut self) -> Result<Outcome, Error> {
        let config = self.config()?;

        self.reset();

        for _attempt in 0..config.max_repair_attempts {
            match self.try_mount() {
                Ok(outcome) => {
                    #[cfg(feature = "defmt")]
                    debug!(
                        "mount: {} counter {} ({})",
                        self.current_bank, self.current_counter, outcome
                    );

                    self.state = DriverState::Ready;
                    return Ok(outcome);
                }
                Err(Error::Internal) => {
                    self.state = DriverState::Error;
                    return Err(Error::Internal);
                }
                Err(_e) => {
                    #[cfg(feature = "defmt")]
                    warn!("mount: attempt {} failed: {}", _attempt, _e);

                    #[cfg(feature = "debug-logs")]
                    println!("  mount: attempt {_attempt} failed: {_e}");
                }
            }
        }

        self.state = DriverState::Error;
        Err(Error::FlashFailure)
    }
}
