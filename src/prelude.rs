pub use crate::codecs::*;
pub use crate::error::*;

pub use crate::config::{StreamConfig, TransportProtocol};
pub use crate::detection::{DetectionDispatcher, DetectionSink, DetectionTask};
pub use crate::hls::HlsWriter;
pub use crate::prebuffer::{PreBuffer, PreBufferEntry};
pub use crate::recording::{Mp4Recorder, RecorderRegistry};
pub use crate::shutdown::{ComponentKind, ComponentState, ShutdownCoordinator};
pub use crate::state::{StreamLifecycle, StreamRegistry};

pub use crate::{InputOpener, MediaSource, TransportFactory};
pub use crate::{MediaKind, Packet, StreamDescriptor};
pub use crate::{Pipeline, PipelineOptions};
