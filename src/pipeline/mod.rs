//! The two ways this engine processes audio: one block at a time through
//! [`realtime::RealtimePipeline`], or a whole file at once through
//! [`batch::BatchPipeline`].

mod stft;

pub mod batch;
pub mod realtime;

pub use batch::BatchPipeline;
pub use realtime::{RealtimePipeline, StereoBlock};
