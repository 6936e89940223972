use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, RwLock,
    },
    thread::JoinHandle,
};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, span, Level};

use crate::{codecs::CodecParameters, error::DetectionSubmitError, types::Packet};

pub const DEFAULT_DETECTION_WORKERS: usize = 2;
pub const DEFAULT_DETECTION_QUEUE_CAPACITY: usize = 4;

/// Work unit handed to the detection sink. Carries the model identifier and
/// threshold captured from the stream's reader registration at submit time.
pub struct DetectionTask {
    pub stream_name: String,
    pub packet: Packet,
    pub codec_params: CodecParameters,
    pub model: String,
    pub threshold: f32,
}

/// External consumer of detection work. The dispatcher never interprets model
/// output; it only hands tasks off.
pub trait DetectionSink: Send + Sync {
    fn process(&self, task: DetectionTask);
}

#[derive(Debug, Clone)]
struct ReaderInfo {
    model: String,
    threshold: f32,
}

/// Fixed-size worker pool shared across streams. `submit` is non-blocking:
/// a full queue is an error the caller absorbs by skipping the keyframe.
pub struct DetectionDispatcher {
    sender: Option<Sender<DetectionTask>>,
    readers: RwLock<HashMap<String, ReaderInfo>>,
    active_workers: Arc<AtomicUsize>,
    worker_count: usize,
    workers: Vec<JoinHandle<()>>,
}

impl DetectionDispatcher {
    pub fn new(
        worker_count: usize,
        queue_capacity: usize,
        sink: Arc<dyn DetectionSink>,
    ) -> Self {
        let (sender, receiver) = bounded(queue_capacity);
        let active_workers = Arc::new(AtomicUsize::new(0));

        let workers = (0..worker_count)
            .map(|worker_index| {
                let receiver: Receiver<DetectionTask> = receiver.clone();
                let sink = sink.clone();
                let active = active_workers.clone();
                std::thread::Builder::new()
                    .name(format!("Detection worker {worker_index}"))
                    .spawn(move || {
                        let _span =
                            span!(Level::INFO, "Detection worker", index = worker_index).entered();
                        for task in receiver {
                            active.fetch_add(1, Ordering::SeqCst);
                            sink.process(task);
                            active.fetch_sub(1, Ordering::SeqCst);
                        }
                        debug!("Detection worker exiting");
                    })
                    .unwrap()
            })
            .collect();

        Self {
            sender: Some(sender),
            readers: RwLock::new(HashMap::new()),
            active_workers,
            worker_count,
            workers,
        }
    }

    pub fn start_stream_reader(&self, stream_name: &str, model: &str, threshold: f32) {
        self.readers.write().unwrap().insert(
            stream_name.to_string(),
            ReaderInfo {
                model: model.to_string(),
                threshold,
            },
        );
    }

    pub fn stop_stream_reader(&self, stream_name: &str) {
        self.readers.write().unwrap().remove(stream_name);
    }

    pub fn is_stream_reader_running(&self, stream_name: &str) -> bool {
        self.readers.read().unwrap().contains_key(stream_name)
    }

    /// All workers occupied or the queue full: a constrained host should not
    /// pile more work on.
    pub fn is_busy(&self) -> bool {
        let queue_full = self
            .sender
            .as_ref()
            .map(|sender| sender.is_full())
            .unwrap_or(true);
        queue_full || self.active_workers.load(Ordering::SeqCst) >= self.worker_count
    }

    pub fn submit(
        &self,
        stream_name: &str,
        packet: &Packet,
        codec_params: &CodecParameters,
    ) -> Result<(), DetectionSubmitError> {
        let reader = self
            .readers
            .read()
            .unwrap()
            .get(stream_name)
            .cloned()
            .ok_or_else(|| DetectionSubmitError::StreamNotRegistered(stream_name.to_string()))?;

        let sender = self
            .sender
            .as_ref()
            .ok_or(DetectionSubmitError::PoolShutDown)?;
        let task = DetectionTask {
            stream_name: stream_name.to_string(),
            packet: packet.clone(),
            codec_params: codec_params.clone(),
            model: reader.model,
            threshold: reader.threshold,
        };
        sender.try_send(task).map_err(|err| match err {
            TrySendError::Full(_) => DetectionSubmitError::QueueFull,
            TrySendError::Disconnected(_) => DetectionSubmitError::PoolShutDown,
        })
    }
}

impl Drop for DetectionDispatcher {
    fn drop(&mut self) {
        // closing the channel lets workers drain the queue and exit
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Mutex,
        time::Duration,
    };

    use bytes::Bytes;

    use super::*;
    use crate::codecs::{VideoCodec, VideoCodecParameters};

    fn codec_params() -> CodecParameters {
        CodecParameters::Video(VideoCodecParameters {
            codec: VideoCodec::H264,
            width: 640,
            height: 480,
            sps: Bytes::from_static(&[0x67]),
            pps: Bytes::from_static(&[0x68]),
        })
    }

    fn keyframe() -> Packet {
        Packet {
            stream_index: 0,
            pts: Duration::ZERO,
            dts: Duration::ZERO,
            is_keyframe: true,
            data: Bytes::from_static(&[1, 2, 3]),
        }
    }

    struct CollectingSink {
        tasks: Mutex<Vec<(String, String, f32)>>,
        sender: Sender<()>,
    }

    impl DetectionSink for CollectingSink {
        fn process(&self, task: DetectionTask) {
            self.tasks
                .lock()
                .unwrap()
                .push((task.stream_name, task.model, task.threshold));
            let _ = self.sender.send(());
        }
    }

    struct BlockingSink {
        release: Receiver<()>,
    }

    impl DetectionSink for BlockingSink {
        fn process(&self, _task: DetectionTask) {
            let _ = self.release.recv_timeout(Duration::from_secs(5));
        }
    }

    #[test]
    fn tasks_reach_the_sink_with_reader_config() {
        let (done_tx, done_rx) = bounded(8);
        let sink = Arc::new(CollectingSink {
            tasks: Mutex::new(Vec::new()),
            sender: done_tx,
        });
        let dispatcher = DetectionDispatcher::new(1, 4, sink.clone());

        assert!(!dispatcher.is_stream_reader_running("cam-a"));
        dispatcher.start_stream_reader("cam-a", "yolo-v8n", 0.4);
        assert!(dispatcher.is_stream_reader_running("cam-a"));

        dispatcher.submit("cam-a", &keyframe(), &codec_params()).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let tasks = sink.tasks.lock().unwrap();
        assert_eq!(
            tasks.as_slice(),
            &[("cam-a".to_string(), "yolo-v8n".to_string(), 0.4)]
        );
    }

    #[test]
    fn unregistered_streams_cannot_submit() {
        let (done_tx, _done_rx) = bounded(8);
        let sink = Arc::new(CollectingSink {
            tasks: Mutex::new(Vec::new()),
            sender: done_tx,
        });
        let dispatcher = DetectionDispatcher::new(1, 4, sink);

        assert!(matches!(
            dispatcher.submit("cam-a", &keyframe(), &codec_params()),
            Err(DetectionSubmitError::StreamNotRegistered(_))
        ));
    }

    #[test]
    fn full_queue_rejects_submissions_and_reports_busy() {
        let (release_tx, release_rx) = bounded(8);
        let sink = Arc::new(BlockingSink {
            release: release_rx,
        });
        let dispatcher = DetectionDispatcher::new(1, 1, sink);
        dispatcher.start_stream_reader("cam-a", "model", 0.5);

        // first task occupies the worker, second fills the queue
        dispatcher.submit("cam-a", &keyframe(), &codec_params()).unwrap();
        let mut queued = false;
        for _ in 0..50 {
            match dispatcher.submit("cam-a", &keyframe(), &codec_params()) {
                Ok(()) => {
                    queued = true;
                    break;
                }
                Err(DetectionSubmitError::QueueFull) => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
        assert!(queued, "worker never picked up the first task");

        assert!(dispatcher.is_busy());
        assert!(matches!(
            dispatcher.submit("cam-a", &keyframe(), &codec_params()),
            Err(DetectionSubmitError::QueueFull)
        ));

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
    }
}
