pub mod intercept_pipe;
pub mod recorder;
pub mod types;

pub use intercept_pipe::{InterceptPipe, PipeReader, PipeWriter};
pub use recorder::Recorder;
pub use types::{Direction, Header, RecordingOptions, Theme, ASCIICAST_VERSION};
