use thiserror::Error;

/// Errors that can occur during storage operations. Marked as non-exhaustive to allow for future
/// additions without breaking the API. A caller would usually only need to handle `NotFound`,
/// `OutOfMemory` and `FlashFailure`, the others indicate a misuse of the driver.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The driver is not in the state required by the operation. After a `FlashFailure` every
    /// operation fails with this error until the driver is started again.
    #[error("invalid state")]
    InvalidState,

    /// The passed buffer is too small for the record, or a zero sized write was requested.
    #[error("invalid size")]
    InvalidSize,

    /// Record ids are in the range `1..=MAX_RECORDS`.
    #[error("invalid record id")]
    InvalidId,

    /// The bank layout does not fit the flash sectors or the banks overlap.
    #[error("invalid configuration")]
    InvalidConfig,

    /// No record with the requested id exists.
    #[error("record not found")]
    NotFound,

    /// Not enough space even after compacting the bank.
    #[error("out of memory")]
    OutOfMemory,

    /// A sector that was expected to be erased still contains data. Only produced while assessing
    /// a bank, where it marks the bank for repair, so it is never returned by the driver.
    #[error("flash not erased")]
    NotErased,

    /// The flash reported an error or returned data that does not match its checksum. The driver
    /// enters the error state.
    #[error("flash failure")]
    FlashFailure,

    /// An inconsistency that must not happen with a valid configuration. Never retried. The driver
    /// enters the error state unless the flash was left untouched, as when erasing a record finds
    /// no room for its erase header.
    #[error("internal error")]
    Internal,
}

/// Successful completion of an operation, including the informational warnings.
#[must_use]
#[derive(strum::Display, Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// Completed without side effects.
    Done,

    /// Mounting found a damaged or stale bank and repaired it. Data written before the damage
    /// may have been lost.
    Repaired,

    /// The operation required a garbage collection to make room first.
    GarbageCollected,
}
