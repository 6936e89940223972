use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tracing::info;

use crate::{
    codecs::{AudioCodecParameters, VideoCodecParameters},
    config::StreamConfig,
    detection::{
        is_memory_constrained, DetectionDispatcher, DetectionSink, DetectionTask, MemoryProbe,
        ProcMeminfoProbe,
    },
    error::{RegisterStreamError, RecordingControlError, StartStreamError},
    input::InputOpener,
    prebuffer::{PreBufferRegistry, DEFAULT_PREBUFFER_CAPACITY},
    recording::RecorderRegistry,
    shutdown::ShutdownCoordinator,
    state::{StreamLifecycle, StreamRegistry},
    stream_thread::{StreamThread, StreamThreadOptions},
    thread_utils::InitializableThread,
};

pub struct PipelineOptions {
    /// Root directory for HLS output; each stream gets a subdirectory.
    pub hls_root: PathBuf,
    pub detection_sink: Option<Arc<dyn DetectionSink>>,
    pub detection_workers: usize,
    pub detection_queue_capacity: usize,
    pub prebuffer_capacity: usize,
    /// Force the memory-constrained detection branch regardless of host RAM.
    pub memory_constrained: bool,
    pub memory_probe: Option<Arc<dyn MemoryProbe>>,
    pub opener: InputOpener,
}

impl PipelineOptions {
    pub fn new(hls_root: impl Into<PathBuf>) -> Self {
        Self {
            hls_root: hls_root.into(),
            detection_sink: None,
            detection_workers: crate::detection::DEFAULT_DETECTION_WORKERS,
            detection_queue_capacity: crate::detection::DEFAULT_DETECTION_QUEUE_CAPACITY,
            prebuffer_capacity: DEFAULT_PREBUFFER_CAPACITY,
            memory_constrained: false,
            memory_probe: None,
            opener: InputOpener::new(),
        }
    }
}

struct NoopSink;

impl DetectionSink for NoopSink {
    fn process(&self, _task: DetectionTask) {}
}

/// Shared services every stream thread needs. One context per pipeline, so
/// multiple independent pipelines can coexist in a single process.
pub(crate) struct PipelineCtx {
    pub streams: StreamRegistry,
    pub recorders: RecorderRegistry,
    pub prebuffers: PreBufferRegistry,
    pub detection: DetectionDispatcher,
    pub shutdown: ShutdownCoordinator,
    pub opener: InputOpener,
    pub hls_root: PathBuf,
    pub memory_constrained: bool,
}

/// The ingest pipeline: registries plus one long-lived thread per started
/// stream. The web/API surface drives this object; it owns nothing HTTP.
pub struct Pipeline {
    ctx: Arc<PipelineCtx>,
    threads: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> Self {
        let sink = options
            .detection_sink
            .unwrap_or_else(|| Arc::new(NoopSink));
        let detection = DetectionDispatcher::new(
            options.detection_workers,
            options.detection_queue_capacity,
            sink,
        );
        let probe: Arc<dyn MemoryProbe> = options
            .memory_probe
            .unwrap_or_else(|| Arc::new(ProcMeminfoProbe));
        let memory_constrained =
            is_memory_constrained(options.memory_constrained, probe.as_ref());
        if memory_constrained {
            info!("Running with the memory-constrained detection policy");
        }

        Self {
            ctx: Arc::new(PipelineCtx {
                streams: StreamRegistry::new(),
                recorders: RecorderRegistry::new(),
                prebuffers: PreBufferRegistry::new(options.prebuffer_capacity),
                detection,
                shutdown: ShutdownCoordinator::new(),
                opener: options.opener,
                hls_root: options.hls_root,
                memory_constrained,
            }),
            threads: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_stream(&self, config: StreamConfig) -> Result<(), RegisterStreamError> {
        self.ctx.streams.register(config).map(|_| ())
    }

    /// Swap in an edited config snapshot; the stream thread observes it on
    /// its next per-packet config read.
    pub fn update_stream_config(&self, config: StreamConfig) -> bool {
        self.ctx.streams.update_stream_config(config)
    }

    pub fn start_stream(&self, stream_name: &str) -> Result<(), StartStreamError> {
        let handle = self
            .ctx
            .streams
            .get_stream_by_name(stream_name)
            .ok_or_else(|| StartStreamError::UnknownStream(stream_name.to_string()))?;

        let mut threads = self.threads.lock().unwrap();
        match handle.state().lifecycle() {
            StreamLifecycle::Idle | StreamLifecycle::Stopped => {}
            _ => return Err(StartStreamError::AlreadyRunning(stream_name.to_string())),
        }
        handle.state().set_lifecycle(StreamLifecycle::Starting);
        handle.state().set_callbacks_enabled(true);

        let config = handle.config();
        if config.detection_based_recording {
            self.ctx.detection.start_stream_reader(
                stream_name,
                &config.detection_model,
                config.detection_threshold,
            );
        }

        let running = Arc::new(AtomicBool::new(true));
        let spawn_result = StreamThread::spawn(
            stream_name,
            StreamThreadOptions {
                ctx: self.ctx.clone(),
                stream_name: stream_name.to_string(),
                running,
            },
        );
        match spawn_result {
            Ok(handle) => {
                threads.insert(stream_name.to_string(), handle.running);
                Ok(())
            }
            Err(err) => {
                self.ctx.detection.stop_stream_reader(stream_name);
                Err(err.into())
            }
        }
    }

    /// Signal the stream thread to stop. Returns immediately; the thread
    /// reports stopped through the shutdown coordinator.
    pub fn stop_stream(&self, stream_name: &str) -> bool {
        let Some(handle) = self.ctx.streams.get_stream_by_name(stream_name) else {
            return false;
        };
        if matches!(
            handle.state().lifecycle(),
            StreamLifecycle::Starting | StreamLifecycle::Running
        ) {
            handle.state().set_lifecycle(StreamLifecycle::Stopping);
        }
        if let Some(running) = self.threads.lock().unwrap().remove(stream_name) {
            running.store(false, Ordering::Relaxed);
        }
        self.ctx.detection.stop_stream_reader(stream_name);
        true
    }

    /// Fast-disable path: the stream thread exits without a full state
    /// transition having been requested.
    pub fn set_callbacks_enabled(&self, stream_name: &str, enabled: bool) -> bool {
        match self.ctx.streams.get_stream_by_name(stream_name) {
            Some(handle) => {
                handle.state().set_callbacks_enabled(enabled);
                true
            }
            None => false,
        }
    }

    pub fn start_recording(
        &self,
        stream_name: &str,
        path: &Path,
        video: &VideoCodecParameters,
        audio: Option<&AudioCodecParameters>,
    ) -> Result<(), RecordingControlError> {
        if self.ctx.streams.get_stream_by_name(stream_name).is_none() {
            return Err(RecordingControlError::UnknownStream(
                stream_name.to_string(),
            ));
        }
        self.ctx
            .recorders
            .start_recording(stream_name, path, video, audio)
            .map(|_| ())
    }

    pub fn stop_recording(&self, stream_name: &str) -> Result<(), RecordingControlError> {
        self.ctx.recorders.stop_recording(stream_name)
    }

    /// Broadcast shutdown and join components in priority order. Recordings
    /// are finalized after every producer has quiesced.
    pub fn shutdown(&self, timeout: Duration) -> Result<(), Vec<String>> {
        self.ctx.shutdown.initiate_shutdown();
        let result = self.ctx.shutdown.wait_for_stopped(timeout);
        self.ctx.recorders.stop_all();
        self.threads.lock().unwrap().clear();
        result
    }

    pub fn streams(&self) -> &StreamRegistry {
        &self.ctx.streams
    }

    pub fn recorders(&self) -> &RecorderRegistry {
        &self.ctx.recorders
    }

    pub fn prebuffers(&self) -> &PreBufferRegistry {
        &self.ctx.prebuffers
    }

    pub fn detection(&self) -> &DetectionDispatcher {
        &self.ctx.detection
    }

    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.ctx.shutdown
    }

    pub fn hls_directory(&self, stream_name: &str) -> PathBuf {
        self.ctx.hls_root.join(stream_name)
    }
}
