use crate::dma::DmaError;

/// Driver error.
///
/// Every operation surfaces exactly one of these. Allocation failures are
/// never retried internally, and a failed initialization leaves the
/// component unusable until it is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A DMA adapter, channel or buffer could not be allocated.
    ResourceExhausted,
    /// The hardware version, protocol or a supplied property cannot be
    /// supported, or derived clocking falls outside the register fields.
    ConfigurationInvalid,
    /// A polled hardware ready bit never asserted.
    HardwareNotReady,
    /// A caller-supplied value was rejected.
    InvalidParameter,
    /// The operation is not valid in the current lifecycle state.
    InvalidState,
    /// The platform DMA provider reported a failure.
    Dma(DmaError),
}

impl From<DmaError> for Error {
    fn from(value: DmaError) -> Self {
        match value {
            DmaError::ResourceExhausted => Error::ResourceExhausted,
            other => Error::Dma(other),
        }
    }
}

impl core::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::ResourceExhausted => write!(f, "DMA resources exhausted"),
            Error::ConfigurationInvalid => write!(f, "unsupported interface configuration"),
            Error::HardwareNotReady => write!(f, "hardware ready bit never asserted"),
            Error::InvalidParameter => write!(f, "invalid parameter"),
            Error::InvalidState => write!(f, "operation invalid in current state"),
            Error::Dma(e) => write!(f, "DMA provider error: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_maps_to_resource_exhausted() {
        assert_eq!(
            Error::from(DmaError::ResourceExhausted),
            Error::ResourceExhausted
        );
    }

    #[test]
    fn other_dma_errors_are_wrapped() {
        assert_eq!(
            Error::from(DmaError::Rejected),
            Error::Dma(DmaError::Rejected)
        );
    }
}
