//! Engine error taxonomy

use core::fmt;

use crate::traits::{PipelineError, RailError};

/// Errors returned to callers of the update engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Region outside the display, or alternate source size mismatch
    InvalidRegion,
    /// Waveform mode has no hardware index
    InvalidWaveformMode,
    /// No waveform data installed yet, or engine shut down
    NotReady,
    /// Every processing buffer is in use
    NoBufferAvailable,
    /// Co-processor did not finish in time
    PipelineTimeout,
    /// Co-processor rejected the job
    PipelineSubmitFailure,
    /// Drain did not reach quiescence in time
    FlushTimeout,
    /// Marker did not complete in time
    WaitTimeout,
    /// Power rails could not be brought up
    PowerSequenceFailure,
    /// Thermal safety cutoff is active
    Locked,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::InvalidRegion => "update region is invalid",
            Error::InvalidWaveformMode => "waveform mode is invalid",
            Error::NotReady => "engine is not ready",
            Error::NoBufferAvailable => "no processing buffer available",
            Error::PipelineTimeout => "co-processor timed out",
            Error::PipelineSubmitFailure => "co-processor submission failed",
            Error::FlushTimeout => "flush timed out",
            Error::WaitTimeout => "marker wait timed out",
            Error::PowerSequenceFailure => "power sequence failed",
            Error::Locked => "power locked out",
        };
        f.write_str(msg)
    }
}

impl From<PipelineError> for Error {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Timeout => Error::PipelineTimeout,
            PipelineError::Rejected | PipelineError::Busy => Error::PipelineSubmitFailure,
        }
    }
}

impl From<RailError> for Error {
    fn from(_: RailError) -> Self {
        Error::PowerSequenceFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_errors_map() {
        assert_eq!(Error::from(PipelineError::Timeout), Error::PipelineTimeout);
        assert_eq!(
            Error::from(PipelineError::Rejected),
            Error::PipelineSubmitFailure
        );
    }

    #[test]
    fn test_rail_error_maps_to_sequence_failure() {
        assert_eq!(
            Error::from(RailError::Fault),
            Error::PowerSequenceFailure
        );
    }
}
