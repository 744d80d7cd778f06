pub mod overlay;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use overlay::DisplayFrame;
pub use state::{CaptureOutcome, FrameOutcome, PipelineState, PipelineStats, ScanPipeline};
