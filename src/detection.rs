mod dispatcher;
mod memory;

pub use dispatcher::{
    DetectionDispatcher, DetectionSink, DetectionTask, DEFAULT_DETECTION_QUEUE_CAPACITY,
    DEFAULT_DETECTION_WORKERS,
};
pub use memory::{is_memory_constrained, MemoryProbe, ProcMeminfoProbe};
