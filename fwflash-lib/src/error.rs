use thiserror::Error;

/// Convenient result type for `fwflash-lib`.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Intel HEX parse error: {0}")]
    IntelHex(#[from] ihex::ReaderError),

    #[error("unsupported device family: {0}")]
    UnsupportedDevice(String),

    #[error("address 0x{address:08X} maps to no flash sector")]
    AddressOutOfRange { address: u32 },

    #[error("sector {sector} is restricted and may not be erased")]
    PolicyViolation { sector: u32 },

    #[error("an operation is already in flight on this engine")]
    OperationInFlight,

    #[error("read-back at 0x{address:08X} does not match the data written")]
    VerificationError {
        address: u32,
        expected: Vec<u8>,
        actual: Vec<u8>,
    },

    #[error("no response from device within {0:?}")]
    Timeout(std::time::Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("link error: {0}")]
    Link(String),
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn link(msg: impl Into<String>) -> Self {
        Self::Link(msg.into())
    }
}
