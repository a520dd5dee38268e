pub mod transcoder;

// Public API
pub use transcoder::{
    AudioSink, BoxedPipeline, FfmpegTranscoder, PipelineControl, PipelineEvent, PipelineSignal,
    Transcoder, TranscoderConfig,
};
