use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender};
use url::Url;

use outpost::config::{StreamConfig, TransportProtocol};
use outpost::detection::{DetectionSink, DetectionTask};
use outpost::error::{DetectionSubmitError, InputInitError, StartStreamError};
use outpost::prelude::*;
use outpost::SyntheticSource;

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

fn stream_config(name: &str, url: &str) -> StreamConfig {
    StreamConfig {
        name: name.to_string(),
        url: url.to_string(),
        protocol: TransportProtocol::Tcp,
        segment_duration: 0.5,
        record_audio: false,
        detection_based_recording: false,
        detection_model: String::new(),
        detection_threshold: 0.0,
        detection_interval: 10,
    }
}

fn video_params() -> VideoCodecParameters {
    VideoCodecParameters {
        codec: VideoCodec::H264,
        width: 1280,
        height: 720,
        sps: Bytes::from_static(&[0x67, 0x64, 0x00, 0x1f, 0xac]),
        pps: Bytes::from_static(&[0x68, 0xeb, 0xe3, 0xcb]),
    }
}

fn audio_params() -> AudioCodecParameters {
    AudioCodecParameters {
        codec: AudioCodec::Aac,
        sample_rate: 48_000,
        channels: AudioChannels::Stereo,
    }
}

fn keyframe_packet() -> Packet {
    Packet {
        stream_index: 0,
        pts: Duration::ZERO,
        dts: Duration::ZERO,
        is_keyframe: true,
        data: Bytes::from_static(&[0x65; 64]),
    }
}

fn playlist_segment_uris(playlist_path: &Path) -> Vec<String> {
    let Ok(contents) = fs::read_to_string(playlist_path) else {
        return Vec::new();
    };
    contents
        .lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .collect()
}

fn lifecycle_of(pipeline: &Pipeline, name: &str) -> StreamLifecycle {
    pipeline
        .streams()
        .get_stream_by_name(name)
        .unwrap()
        .state()
        .lifecycle()
}

fn track_sample_counts(path: &Path) -> Vec<u32> {
    let file = fs::File::open(path).unwrap();
    let size = file.metadata().unwrap().len();
    let reader = mp4::Mp4Reader::read_header(file, size).unwrap();
    let mut ids: Vec<u32> = reader.tracks().keys().copied().collect();
    ids.sort_unstable();
    ids.iter()
        .map(|id| reader.sample_count(*id).unwrap())
        .collect()
}

#[test]
fn happy_path_produces_rolling_segments_and_advancing_keyframes() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(PipelineOptions::new(dir.path().join("hls")));

    pipeline
        .register_stream(stream_config("cam-a", "stub://pattern?gop=10&pace_ms=1"))
        .unwrap();
    pipeline.start_stream("cam-a").unwrap();

    let playlist_path = pipeline.hls_directory("cam-a").join("index.m3u8");
    assert!(
        wait_until(Duration::from_secs(10), || {
            playlist_segment_uris(&playlist_path).len() >= 4
        }),
        "expected at least 4 segments in the playlist"
    );

    let handle = pipeline.streams().get_stream_by_name("cam-a").unwrap();
    let first_keyframe = handle.last_keyframe_time().expect("keyframe seen");
    assert!(wait_until(Duration::from_secs(5), || {
        handle.last_keyframe_time() != Some(first_keyframe)
    }));

    assert!(pipeline.stop_stream("cam-a"));
    assert!(wait_until(Duration::from_secs(5), || {
        lifecycle_of(&pipeline, "cam-a") == StreamLifecycle::Stopped
    }));

    let contents = fs::read_to_string(&playlist_path).unwrap();
    assert!(contents.contains("#EXT-X-ENDLIST"));

    // every listed segment is an independently decodable MP4 starting on a keyframe
    let segments = playlist_segment_uris(&playlist_path);
    assert!(segments.len() >= 4);
    for uri in &segments {
        let path = pipeline.hls_directory("cam-a").join(uri);
        let file = fs::File::open(&path).unwrap();
        let size = file.metadata().unwrap().len();
        let mut reader = mp4::Mp4Reader::read_header(file, size).unwrap();
        let track_id = *reader.tracks().keys().next().unwrap();
        let first_sample = reader.read_sample(track_id, 1).unwrap().unwrap();
        assert!(first_sample.is_sync, "segment {uri} does not start on a keyframe");
    }
}

#[test]
fn starting_a_running_stream_is_rejected_until_it_stops() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(PipelineOptions::new(dir.path().join("hls")));

    pipeline
        .register_stream(stream_config("cam-a", "stub://pattern?gop=10&pace_ms=2"))
        .unwrap();
    pipeline.start_stream("cam-a").unwrap();
    assert!(matches!(
        pipeline.start_stream("cam-a"),
        Err(StartStreamError::AlreadyRunning(_))
    ));

    assert!(pipeline.stop_stream("cam-a"));
    assert!(wait_until(Duration::from_secs(5), || {
        lifecycle_of(&pipeline, "cam-a") == StreamLifecycle::Stopped
    }));

    // a stopped stream can be started again
    pipeline.start_stream("cam-a").unwrap();
    assert!(pipeline.stop_stream("cam-a"));
    assert!(wait_until(Duration::from_secs(5), || {
        lifecycle_of(&pipeline, "cam-a") == StreamLifecycle::Stopped
    }));
}

/// Transport that serves a finite stream and moves the elementary stream
/// indices around on every reconnect.
struct FlakyTransport {
    opens: AtomicUsize,
}

impl TransportFactory for FlakyTransport {
    fn open(
        &self,
        _url: &Url,
        _protocol: TransportProtocol,
    ) -> Result<Box<dyn MediaSource>, InputInitError> {
        let opens = self.opens.fetch_add(1, Ordering::SeqCst);
        let swap = if opens == 0 { "0" } else { "1" };
        let url = Url::parse(&format!(
            "stub://pattern?gop=5&pace_ms=1&packets=40&audio=true&swap={swap}"
        ))
        .unwrap();
        Ok(Box::new(SyntheticSource::from_url(&url)?))
    }
}

#[test]
fn reconnect_after_eof_reresolves_stream_indices() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(FlakyTransport {
        opens: AtomicUsize::new(0),
    });

    let mut options = PipelineOptions::new(dir.path().join("hls"));
    options.opener.register("flaky", transport.clone());
    let pipeline = Pipeline::new(options);

    let mut config = stream_config("cam-a", "flaky://cam");
    config.segment_duration = 0.25;
    pipeline.register_stream(config).unwrap();
    pipeline.start_stream("cam-a").unwrap();

    let playlist_path = pipeline.hls_directory("cam-a").join("index.m3u8");
    assert!(wait_until(Duration::from_secs(5), || {
        !playlist_segment_uris(&playlist_path).is_empty()
    }));

    // wait out the EOF and the 1 s reconnect delay, then require fresh
    // segments: they only appear if the video stream was re-resolved at its
    // new index after the reopen
    assert!(wait_until(Duration::from_secs(5), || {
        transport.opens.load(Ordering::SeqCst) >= 2
    }));
    let segments_at_reconnect = playlist_segment_uris(&playlist_path).len();
    assert!(
        wait_until(Duration::from_secs(10), || {
            playlist_segment_uris(&playlist_path).len() > segments_at_reconnect
        }),
        "no new segments after reconnect with swapped stream indices"
    );

    assert!(pipeline.stop_stream("cam-a"));
    assert!(wait_until(Duration::from_secs(5), || {
        lifecycle_of(&pipeline, "cam-a") == StreamLifecycle::Stopped
    }));
}

#[test]
fn demuxer_error_ends_the_stream_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(PipelineOptions::new(dir.path().join("hls")));

    pipeline
        .register_stream(stream_config(
            "cam-a",
            "stub://pattern?gop=5&pace_ms=1&error_after=20",
        ))
        .unwrap();
    pipeline.start_stream("cam-a").unwrap();

    // no stop request: the thread exits on the unrecoverable error alone
    assert!(wait_until(Duration::from_secs(5), || {
        lifecycle_of(&pipeline, "cam-a") == StreamLifecycle::Stopped
    }));

    let playlist_path = pipeline.hls_directory("cam-a").join("index.m3u8");
    let contents = fs::read_to_string(playlist_path).unwrap();
    assert!(contents.contains("#EXT-X-ENDLIST"), "writer was not closed");
}

#[test]
fn shutdown_stops_streams_and_reports_components_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(PipelineOptions::new(dir.path().join("hls")));

    for name in ["cam-a", "cam-b"] {
        pipeline
            .register_stream(stream_config(name, "stub://pattern?gop=10&pace_ms=5"))
            .unwrap();
        pipeline.start_stream(name).unwrap();
    }

    pipeline
        .shutdown(Duration::from_secs(10))
        .expect("all components stopped in time");

    for name in ["cam-a", "cam-b"] {
        assert_eq!(lifecycle_of(&pipeline, name), StreamLifecycle::Stopped);
        let contents =
            fs::read_to_string(pipeline.hls_directory(name).join("index.m3u8")).unwrap();
        assert!(contents.contains("#EXT-X-ENDLIST"));
    }
}

#[test]
fn disabling_callbacks_stops_the_thread_without_a_state_transition() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(PipelineOptions::new(dir.path().join("hls")));

    pipeline
        .register_stream(stream_config("cam-a", "stub://pattern?gop=10&pace_ms=2"))
        .unwrap();
    pipeline.start_stream("cam-a").unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        lifecycle_of(&pipeline, "cam-a") == StreamLifecycle::Running
    }));

    assert!(pipeline.set_callbacks_enabled("cam-a", false));
    assert!(wait_until(Duration::from_secs(5), || {
        lifecycle_of(&pipeline, "cam-a") == StreamLifecycle::Stopped
    }));
}

struct CollectingSink {
    submissions: Mutex<Vec<(String, Instant)>>,
}

impl DetectionSink for CollectingSink {
    fn process(&self, task: DetectionTask) {
        self.submissions
            .lock()
            .unwrap()
            .push((task.stream_name, Instant::now()));
    }
}

#[test]
fn detection_cadence_is_enforced_per_stream() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(CollectingSink {
        submissions: Mutex::new(Vec::new()),
    });

    let mut options = PipelineOptions::new(dir.path().join("hls"));
    options.detection_sink = Some(sink.clone());
    let pipeline = Pipeline::new(options);

    let mut config = stream_config("cam-a", "stub://pattern?gop=5&pace_ms=1");
    config.detection_based_recording = true;
    config.detection_model = "yolo-v8n".to_string();
    config.detection_threshold = 0.4;
    config.detection_interval = 1;
    pipeline.register_stream(config).unwrap();
    pipeline.start_stream("cam-a").unwrap();

    // keyframes arrive every few milliseconds; the 1 s cadence caps submissions
    std::thread::sleep(Duration::from_millis(3200));
    assert!(pipeline.stop_stream("cam-a"));
    assert!(wait_until(Duration::from_secs(5), || {
        lifecycle_of(&pipeline, "cam-a") == StreamLifecycle::Stopped
    }));

    let submissions = sink.submissions.lock().unwrap();
    let count = submissions.len();
    assert!(
        (2..=5).contains(&count),
        "expected one submission per second, got {count}"
    );
    for pair in submissions.windows(2) {
        let gap = pair[1].1.duration_since(pair[0].1);
        assert!(
            gap >= Duration::from_millis(900),
            "submissions only {gap:?} apart"
        );
    }

    let handle = pipeline.streams().get_stream_by_name("cam-a").unwrap();
    assert!(handle.last_detection_time().is_some());
}

struct BlockingSink {
    names: Mutex<Vec<String>>,
    release: Receiver<()>,
}

impl DetectionSink for BlockingSink {
    fn process(&self, task: DetectionTask) {
        self.names.lock().unwrap().push(task.stream_name);
        let _ = self.release.recv_timeout(Duration::from_secs(10));
    }
}

fn saturate_pool(pipeline: &Pipeline) {
    pipeline.detection().start_stream_reader("other", "model", 0.5);
    let packet = keyframe_packet();
    let params = CodecParameters::Video(video_params());

    // one task occupies the single worker, the second fills the queue
    let mut accepted = 0;
    let deadline = Instant::now() + Duration::from_secs(5);
    while accepted < 2 && Instant::now() < deadline {
        match pipeline.detection().submit("other", &packet, &params) {
            Ok(()) => accepted += 1,
            Err(DetectionSubmitError::QueueFull) => {
                std::thread::sleep(Duration::from_millis(10))
            }
            Err(err) => panic!("unexpected submit error: {err}"),
        }
    }
    assert_eq!(accepted, 2, "failed to saturate the detection pool");
}

#[test]
fn constrained_host_with_busy_pool_drops_detection_only() {
    let dir = tempfile::tempdir().unwrap();
    let (release_tx, release_rx): (Sender<()>, Receiver<()>) = bounded(16);
    let sink = Arc::new(BlockingSink {
        names: Mutex::new(Vec::new()),
        release: release_rx,
    });

    let mut options = PipelineOptions::new(dir.path().join("hls"));
    options.detection_sink = Some(sink.clone());
    options.detection_workers = 1;
    options.detection_queue_capacity = 1;
    options.memory_constrained = true;
    let pipeline = Pipeline::new(options);

    saturate_pool(&pipeline);

    let mut config = stream_config("cam-a", "stub://pattern?gop=2&pace_ms=1");
    config.detection_based_recording = true;
    config.detection_model = "yolo-v8n".to_string();
    config.detection_interval = 0;
    pipeline.register_stream(config).unwrap();
    pipeline.start_stream("cam-a").unwrap();

    let playlist_path = pipeline.hls_directory("cam-a").join("index.m3u8");
    assert!(wait_until(Duration::from_secs(5), || {
        !playlist_segment_uris(&playlist_path).is_empty()
    }));
    std::thread::sleep(Duration::from_millis(300));

    // media paths unaffected, detection fully skipped
    let handle = pipeline.streams().get_stream_by_name("cam-a").unwrap();
    assert!(handle.last_detection_time().is_none());
    assert!(!sink.names.lock().unwrap().iter().any(|name| name == "cam-a"));

    for _ in 0..4 {
        let _ = release_tx.send(());
    }
    assert!(pipeline.stop_stream("cam-a"));
    assert!(wait_until(Duration::from_secs(5), || {
        lifecycle_of(&pipeline, "cam-a") == StreamLifecycle::Stopped
    }));
}

#[test]
fn audio_toggle_mid_stream_gates_recorded_audio() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(PipelineOptions::new(dir.path().join("hls")));

    let config = {
        let mut config = stream_config("cam-a", "stub://pattern?gop=10&pace_ms=1&audio=true");
        config.record_audio = false;
        config
    };
    pipeline.register_stream(config.clone()).unwrap();

    let recording_path: PathBuf = dir.path().join("cam-a.mp4");
    pipeline
        .start_recording(
            "cam-a",
            &recording_path,
            &video_params(),
            Some(&audio_params()),
        )
        .unwrap();
    pipeline.start_stream("cam-a").unwrap();

    // record_audio is off: only video accumulates
    std::thread::sleep(Duration::from_millis(600));

    let mut enabled = config;
    enabled.record_audio = true;
    assert!(pipeline.update_stream_config(enabled));

    std::thread::sleep(Duration::from_millis(300));

    assert!(pipeline.stop_stream("cam-a"));
    assert!(wait_until(Duration::from_secs(5), || {
        lifecycle_of(&pipeline, "cam-a") == StreamLifecycle::Stopped
    }));
    pipeline.stop_recording("cam-a").unwrap();

    let counts = track_sample_counts(&recording_path);
    assert_eq!(counts.len(), 2, "expected video and audio tracks");
    let (video_samples, audio_samples) = (counts[0], counts[1]);
    assert!(video_samples > 0);
    assert!(audio_samples > 0, "no audio after enabling record_audio");
    assert!(
        audio_samples < video_samples * 3 / 4,
        "audio was recorded while record_audio was disabled ({audio_samples} audio vs {video_samples} video)"
    );
}

#[test]
fn recording_absence_never_stalls_hls() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(PipelineOptions::new(dir.path().join("hls")));

    pipeline
        .register_stream(stream_config("cam-a", "stub://pattern?gop=10&pace_ms=1"))
        .unwrap();
    pipeline.start_stream("cam-a").unwrap();

    // no recorder registered at all
    let playlist_path = pipeline.hls_directory("cam-a").join("index.m3u8");
    assert!(wait_until(Duration::from_secs(10), || {
        playlist_segment_uris(&playlist_path).len() >= 2
    }));

    // start a recording mid-stream, it picks up from the next keyframe
    let recording_path = dir.path().join("late.mp4");
    pipeline
        .start_recording("cam-a", &recording_path, &video_params(), None)
        .unwrap();
    std::thread::sleep(Duration::from_millis(300));
    pipeline.stop_recording("cam-a").unwrap();

    assert!(pipeline.stop_stream("cam-a"));
    assert!(wait_until(Duration::from_secs(5), || {
        lifecycle_of(&pipeline, "cam-a") == StreamLifecycle::Stopped
    }));

    let counts = track_sample_counts(&recording_path);
    assert_eq!(counts.len(), 1);
    assert!(counts[0] > 0, "mid-stream recording stayed empty");
}

#[test]
fn prebuffer_fills_with_recent_video_packets() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = PipelineOptions::new(dir.path().join("hls"));
    options.prebuffer_capacity = 16;
    let pipeline = Pipeline::new(options);

    pipeline
        .register_stream(stream_config("cam-a", "stub://pattern?gop=5&pace_ms=1&audio=true"))
        .unwrap();
    pipeline.start_stream("cam-a").unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        pipeline
            .prebuffers()
            .get("cam-a")
            .map(|buffer| buffer.len() == 16)
            .unwrap_or(false)
    }));

    let snapshot = pipeline.prebuffers().get("cam-a").unwrap().snapshot();
    assert_eq!(snapshot.len(), 16);
    // only video enters the pre-buffer, in demuxer order
    for pair in snapshot.windows(2) {
        assert!(pair[0].packet.pts <= pair[1].packet.pts);
    }
    assert!(snapshot
        .iter()
        .all(|entry| entry.descriptor.kind().is_video()));

    assert!(pipeline.stop_stream("cam-a"));
    assert!(wait_until(Duration::from_secs(5), || {
        lifecycle_of(&pipeline, "cam-a") == StreamLifecycle::Stopped
    }));
}
