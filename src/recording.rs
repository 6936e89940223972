mod recorder;
mod registry;

pub use recorder::Mp4Recorder;
pub use registry::{RecorderHandle, RecorderRegistry};
