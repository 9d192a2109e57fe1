use core::fmt::{self, Display};
use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};

/// The error type used by this library.
///
/// Register access itself cannot fail, so everything here is either a
/// protocol misuse caught before touching the bus or a poll strategy giving
/// up on a status flag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// A status flag did not change before the poll strategy gave up.
    Timeout,

    /// The payload length is not supported by the selected transaction.
    InvalidLength,

    /// The bus is not in the correct mode for the operation.
    InvalidMode,

    /// Device is not the correct type.
    InvalidDevice,

    /// The configuration cannot be expressed by the controller or the MPU.
    InvalidConfiguration,

    /// The access runs past the end of the device.
    OutOfBounds,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Timeout => f.write_str("Timed out waiting for the QSPI controller"),
            Error::InvalidLength => f.write_str("Unsupported transfer length for this command"),
            Error::InvalidMode => f.write_str("The driver or device is not in the correct mode"),
            Error::InvalidDevice => {
                f.write_str("This is not the correct device for the driver or it is faulty")
            }
            Error::InvalidConfiguration => f.write_str("Invalid QSPI or capacity configuration"),
            Error::OutOfBounds => f.write_str("Address range exceeds the device capacity"),
        }
    }
}

impl NorFlashError for Error {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Error::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            Error::Timeout
            | Error::InvalidLength
            | Error::InvalidMode
            | Error::InvalidDevice
            | Error::InvalidConfiguration => NorFlashErrorKind::Other,
        }
    }
}
