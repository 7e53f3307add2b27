//! Image co-processor

use crate::pipeline::{HistogramStats, PipelineJob};

/// Co-processor failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PipelineError {
    /// Job did not complete within the timeout
    Timeout,
    /// Job was rejected at submission
    Rejected,
    /// A job is already outstanding
    Busy,
}

/// Trait for the co-processor that converts framebuffer regions into the
/// panel's pixel encoding
///
/// One job may be outstanding at a time.
pub trait ImagePipeline {
    /// Start a conversion job
    fn submit(&mut self, job: &PipelineJob) -> Result<(), PipelineError>;

    /// Wait for the outstanding job, returning its content histogram
    fn wait(&mut self, timeout_ms: u32) -> Result<HistogramStats, PipelineError>;

    /// Abort the outstanding job and reinitialize the channel
    fn reset(&mut self);
}
