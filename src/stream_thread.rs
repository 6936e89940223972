use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
    error::{ReadPacketError, StreamInitError},
    hls::{ensure_hls_directory, HlsWriter},
    input::{find_audio_stream, find_video_stream, MediaSource},
    pipeline::PipelineCtx,
    shutdown::{ComponentId, ComponentKind, ComponentState, SHUTDOWN_PRIORITY_LAST},
    state::{StreamHandle, StreamLifecycle},
    thread_utils::{InitializableThread, ThreadMetadata},
    types::{Packet, StreamDescriptor},
};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const AUDIO_ERROR_LOG_INTERVAL: Duration = Duration::from_secs(10);

pub(crate) struct StreamThreadOptions {
    pub ctx: Arc<PipelineCtx>,
    pub stream_name: String,
    pub running: Arc<AtomicBool>,
}

pub(crate) struct StreamThreadHandle {
    pub running: Arc<AtomicBool>,
}

/// The per-stream orchestrator. Owns the demuxed input and the HLS writer for
/// its whole lifetime, looks the MP4 recorder up per packet, and fans video
/// packets out to the pre-buffer and the detection dispatcher.
pub(crate) struct StreamThread {
    ctx: Arc<PipelineCtx>,
    stream_name: String,
    handle: Arc<StreamHandle>,
    running: Arc<AtomicBool>,
    hls_writer: Option<HlsWriter>,
    input: Box<dyn MediaSource>,
    video_stream: StreamDescriptor,
    audio_stream: Option<StreamDescriptor>,
    component_id: ComponentId,
    last_audio_error_log: Option<Instant>,
}

impl InitializableThread for StreamThread {
    type InitOptions = StreamThreadOptions;
    type SpawnOutput = StreamThreadHandle;
    type SpawnError = StreamInitError;

    const LABEL: &'static str = "Stream thread";

    fn init(options: Self::InitOptions) -> Result<(Self, Self::SpawnOutput), Self::SpawnError> {
        let StreamThreadOptions {
            ctx,
            stream_name,
            running,
        } = options;

        let fail = |running: &AtomicBool, handle: Option<&StreamHandle>| {
            running.store(false, Ordering::Relaxed);
            if let Some(handle) = handle {
                handle.state().set_lifecycle(StreamLifecycle::Stopped);
            }
        };

        let handle = match ctx.streams.get_stream_by_name(&stream_name) {
            Some(handle) => handle,
            None => {
                fail(&running, None);
                return Err(StreamInitError::UnknownStream(stream_name));
            }
        };

        info!("Starting stream thread for stream {stream_name}");

        if !running.load(Ordering::Relaxed) {
            warn!("Stream thread for {stream_name} started but already marked as not running");
            fail(&running, Some(handle.as_ref()));
            return Err(StreamInitError::AlreadyStopped(stream_name));
        }

        let output_dir = ctx.hls_root.join(&stream_name);
        if let Err(source) = ensure_hls_directory(&output_dir) {
            fail(&running, Some(handle.as_ref()));
            return Err(StreamInitError::Hls {
                stream: stream_name,
                source,
            });
        }

        let config = handle.config();
        let mut hls_writer = match HlsWriter::create(
            &output_dir,
            &stream_name,
            config.effective_segment_duration(),
        ) {
            Ok(writer) => writer,
            Err(source) => {
                fail(&running, Some(handle.as_ref()));
                return Err(StreamInitError::Hls {
                    stream: stream_name,
                    source,
                });
            }
        };

        let input = match ctx
            .opener
            .open_input_stream(&config.url, config.protocol)
        {
            Ok(input) => input,
            Err(source) => {
                let _ = hls_writer.close();
                fail(&running, Some(handle.as_ref()));
                return Err(StreamInitError::Input {
                    stream: stream_name,
                    source,
                });
            }
        };

        let Some(video_stream) = find_video_stream(input.as_ref()) else {
            let _ = hls_writer.close();
            fail(&running, Some(handle.as_ref()));
            return Err(StreamInitError::NoVideoStream(config.url.clone()));
        };

        let audio_stream = find_audio_stream(input.as_ref());
        if let Some(audio) = &audio_stream {
            info!(
                "Found audio stream at index {} for {stream_name}",
                audio.index
            );
        }

        let component_id = ctx.shutdown.register(
            &format!("hls_writer_{stream_name}"),
            ComponentKind::HlsWriter,
            SHUTDOWN_PRIORITY_LAST,
        );

        let thread = Self {
            ctx,
            stream_name,
            handle,
            running: running.clone(),
            hls_writer: Some(hls_writer),
            input,
            video_stream,
            audio_stream,
            component_id,
            last_audio_error_log: None,
        };
        Ok((thread, StreamThreadHandle { running }))
    }

    fn run(mut self) {
        self.handle.state().set_lifecycle(StreamLifecycle::Running);

        while self.running.load(Ordering::Relaxed) {
            if self.ctx.shutdown.is_shutdown_initiated() {
                info!(
                    "Stream thread for {} stopping due to system shutdown",
                    self.stream_name
                );
                self.running.store(false, Ordering::Relaxed);
                break;
            }

            if self.handle.state().is_stopping() {
                info!(
                    "Stream thread for {} stopping due to stream state STOPPING",
                    self.stream_name
                );
                self.running.store(false, Ordering::Relaxed);
                break;
            }

            if !self.handle.state().callbacks_enabled() {
                info!(
                    "Stream thread for {} stopping due to callbacks disabled",
                    self.stream_name
                );
                self.running.store(false, Ordering::Relaxed);
                break;
            }

            // last check before the potentially blocking read
            if !self.running.load(Ordering::Relaxed) {
                info!(
                    "Stream thread for {} detected shutdown before read",
                    self.stream_name
                );
                break;
            }

            match self.input.read_packet() {
                Ok(packet) => self.process_packet(packet),
                Err(ReadPacketError::Eof) | Err(ReadPacketError::TryAgain) => {
                    warn!(
                        "Stream {} disconnected, attempting to reconnect...",
                        self.stream_name
                    );
                    std::thread::sleep(RECONNECT_DELAY);
                    self.reconnect();
                }
                Err(err) => {
                    error!("Error reading frame: {err}");
                    break;
                }
            }
        }

        self.teardown();
    }

    fn metadata() -> ThreadMetadata {
        ThreadMetadata {
            thread_name: "Stream thread",
        }
    }
}

impl StreamThread {
    /// Close and reopen the input. Stream indices are not stable across a
    /// reopen, so both the video and the audio descriptor are re-resolved.
    fn reconnect(&mut self) {
        let config = self.handle.config();
        let input = match self
            .ctx
            .opener
            .open_input_stream(&config.url, config.protocol)
        {
            Ok(input) => input,
            Err(err) => {
                error!(
                    "Could not reconnect to input stream for {}: {err}",
                    self.stream_name
                );
                return;
            }
        };
        self.input = input;

        match find_video_stream(self.input.as_ref()) {
            Some(video) => self.video_stream = video,
            None => {
                error!(
                    "No video stream found after reconnect for {}",
                    self.stream_name
                );
                return;
            }
        }
        self.audio_stream = find_audio_stream(self.input.as_ref());
    }

    fn process_packet(&mut self, packet: Packet) {
        if packet.stream_index == self.video_stream.index {
            self.process_video_packet(packet);
        } else if self
            .audio_stream
            .as_ref()
            .map(|audio| audio.index == packet.stream_index)
            .unwrap_or(false)
        {
            self.process_audio_packet(packet);
        }
    }

    fn process_video_packet(&mut self, packet: Packet) {
        let is_keyframe = packet.is_keyframe;

        if is_keyframe {
            self.handle.update_keyframe_time(Instant::now());
            debug!("Received keyframe for stream {}", self.stream_name);
        }

        if let Some(hls_writer) = self.hls_writer.as_mut() {
            match hls_writer.write_packet(&packet, &self.video_stream) {
                Ok(()) => {
                    if is_keyframe {
                        if let Err(err) = hls_writer.flush() {
                            warn!(
                                "Failed to flush HLS output for stream {}: {err}",
                                self.stream_name
                            );
                        } else {
                            debug!("Flushed on key frame for stream {}", self.stream_name);
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        "Failed to write packet to HLS for stream {}: {err}",
                        self.stream_name
                    );
                }
            }
        }

        // after HLS so the live stream is never delayed by the pre-buffer
        self.ctx
            .prebuffers
            .add_packet(&self.stream_name, &packet, &self.video_stream);

        if let Some(recorder) = self.ctx.recorders.get_writer_for_stream(&self.stream_name) {
            // the recorder gets its own counted reference
            let mp4_packet = packet.clone();
            if let Err(err) = recorder.write_packet(&mp4_packet, &self.video_stream) {
                // only log errors for key frames to reduce log spam
                if is_keyframe {
                    error!(
                        "Failed to write packet to MP4 for stream {}: {err}",
                        self.stream_name
                    );
                }
            }
        }

        if is_keyframe
            && self
                .ctx
                .detection
                .is_stream_reader_running(&self.stream_name)
        {
            self.maybe_submit_detection(&packet);
        }
    }

    fn maybe_submit_detection(&mut self, packet: &Packet) {
        let now = Instant::now();
        let detection_interval = self.handle.detection_interval();
        let due = self
            .handle
            .last_detection_time()
            .map(|last| now.duration_since(last) >= detection_interval)
            .unwrap_or(true);
        if !due {
            return;
        }

        if self.ctx.memory_constrained && self.ctx.detection.is_busy() {
            debug!("Skipping detection on memory-constrained device - thread pool busy");
            return;
        }

        info!(
            "Submitting detection task for stream {} to thread pool",
            self.stream_name
        );
        match self
            .ctx
            .detection
            .submit(&self.stream_name, packet, &self.video_stream.parameters)
        {
            Ok(()) => self.handle.update_last_detection_time(now),
            Err(err) => debug!(
                "Detection submission rejected for stream {}: {err}",
                self.stream_name
            ),
        }
    }

    fn process_audio_packet(&mut self, packet: Packet) {
        // re-read the config so live edits to record_audio are picked up
        let config = self.handle.config();
        if !config.record_audio {
            return;
        }

        let Some(audio_stream) = self.audio_stream.clone() else {
            return;
        };
        let Some(recorder) = self.ctx.recorders.get_writer_for_stream(&self.stream_name) else {
            return;
        };
        if !recorder.has_audio() {
            return;
        }

        let mp4_packet = packet.clone();
        if let Err(err) = recorder.write_packet(&mp4_packet, &audio_stream) {
            let now = Instant::now();
            let should_log = self
                .last_audio_error_log
                .map(|last| now.duration_since(last) > AUDIO_ERROR_LOG_INTERVAL)
                .unwrap_or(true);
            if should_log {
                error!(
                    "Failed to write audio packet to MP4 for stream {}: {err}",
                    self.stream_name
                );
                self.last_audio_error_log = Some(now);
            }
        }
    }

    fn teardown(mut self) {
        drop(self.input);

        // take the writer out first so a close can never run twice
        let writer_to_close = self.hls_writer.take();
        if let Some(mut writer) = writer_to_close {
            if let Err(err) = writer.close() {
                error!(
                    "Failed to close HLS writer for stream {}: {err}",
                    self.stream_name
                );
            }
        }

        self.handle.state().set_lifecycle(StreamLifecycle::Stopped);
        self.ctx
            .shutdown
            .update_state(self.component_id, ComponentState::Stopped);
        info!("Stream thread for stream {} exited", self.stream_name);
    }
}
