use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex, RwLock},
};

use crate::{
    codecs::{AudioCodecParameters, VideoCodecParameters},
    error::{RecorderError, RecordingControlError},
    recording::Mp4Recorder,
    types::{Packet, StreamDescriptor},
};

/// Shared handle to an active recording. `has_audio` is fixed at construction
/// and readable without taking the writer lock, so the stream thread can gate
/// audio packets cheaply on every packet.
pub struct RecorderHandle {
    has_audio: bool,
    recorder: Mutex<Mp4Recorder>,
}

impl RecorderHandle {
    pub fn has_audio(&self) -> bool {
        self.has_audio
    }

    pub fn write_packet(
        &self,
        packet: &Packet,
        descriptor: &StreamDescriptor,
    ) -> Result<(), RecorderError> {
        self.recorder.lock().unwrap().write_packet(packet, descriptor)
    }
}

/// Recordings started and stopped by an external controller, looked up per
/// packet by the stream threads. A missing entry means recording is off for
/// that stream; the media paths are unaffected.
#[derive(Default)]
pub struct RecorderRegistry {
    recorders: RwLock<HashMap<String, Arc<RecorderHandle>>>,
}

impl RecorderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_writer_for_stream(&self, stream_name: &str) -> Option<Arc<RecorderHandle>> {
        self.recorders.read().unwrap().get(stream_name).cloned()
    }

    pub fn start_recording(
        &self,
        stream_name: &str,
        path: &Path,
        video: &VideoCodecParameters,
        audio: Option<&AudioCodecParameters>,
    ) -> Result<Arc<RecorderHandle>, RecordingControlError> {
        let mut recorders = self.recorders.write().unwrap();
        if recorders.contains_key(stream_name) {
            return Err(RecordingControlError::AlreadyRecording(
                stream_name.to_string(),
            ));
        }
        let recorder = Mp4Recorder::create(path, stream_name, video, audio)?;
        let handle = Arc::new(RecorderHandle {
            has_audio: recorder.has_audio(),
            recorder: Mutex::new(recorder),
        });
        recorders.insert(stream_name.to_string(), handle.clone());
        Ok(handle)
    }

    /// Remove the recording and write its trailer. Stream threads holding the
    /// old handle observe `AlreadyFinalized` on their next write and drop it.
    pub fn stop_recording(&self, stream_name: &str) -> Result<(), RecordingControlError> {
        let handle = self
            .recorders
            .write()
            .unwrap()
            .remove(stream_name)
            .ok_or_else(|| RecordingControlError::NotRecording(stream_name.to_string()))?;
        handle.recorder.lock().unwrap().finalize()?;
        Ok(())
    }

    pub fn stop_all(&self) {
        let handles: Vec<_> = {
            let mut recorders = self.recorders.write().unwrap();
            recorders.drain().collect()
        };
        for (stream_name, handle) in handles {
            if let Err(err) = handle.recorder.lock().unwrap().finalize() {
                tracing::warn!(stream = %stream_name, %err, "Failed to finalize recording during shutdown");
            }
        }
    }
}
