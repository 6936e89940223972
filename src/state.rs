use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc, Mutex, RwLock,
    },
    time::{Duration, Instant},
};

use crate::{config::StreamConfig, error::RegisterStreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLifecycle {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl StreamLifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StreamLifecycle::Idle,
            1 => StreamLifecycle::Starting,
            2 => StreamLifecycle::Running,
            3 => StreamLifecycle::Stopping,
            _ => StreamLifecycle::Stopped,
        }
    }
}

/// Runtime state of one stream. Flags are plain atomics so the stream thread
/// can poll them every iteration without locking; timestamps sit behind a
/// mutex and tolerate slightly stale reads from other threads.
#[derive(Debug)]
pub struct StreamRuntimeState {
    lifecycle: AtomicU8,
    callbacks_enabled: AtomicBool,
    last_keyframe: Mutex<Option<Instant>>,
    last_detection: Mutex<Option<Instant>>,
}

impl Default for StreamRuntimeState {
    fn default() -> Self {
        Self {
            lifecycle: AtomicU8::new(StreamLifecycle::Idle as u8),
            callbacks_enabled: AtomicBool::new(true),
            last_keyframe: Mutex::new(None),
            last_detection: Mutex::new(None),
        }
    }
}

impl StreamRuntimeState {
    pub fn lifecycle(&self) -> StreamLifecycle {
        StreamLifecycle::from_u8(self.lifecycle.load(Ordering::Relaxed))
    }

    pub fn set_lifecycle(&self, state: StreamLifecycle) {
        self.lifecycle.store(state as u8, Ordering::Relaxed);
    }

    pub fn is_stopping(&self) -> bool {
        self.lifecycle() == StreamLifecycle::Stopping
    }

    pub fn callbacks_enabled(&self) -> bool {
        self.callbacks_enabled.load(Ordering::Relaxed)
    }

    pub fn set_callbacks_enabled(&self, enabled: bool) {
        self.callbacks_enabled.store(enabled, Ordering::Relaxed);
    }
}

/// One registered stream: its config snapshot and runtime state. Handed out as
/// an `Arc` by the registry; config reads clone the inner `Arc` so every call
/// observes a consistent snapshot even while an update swaps it.
#[derive(Debug)]
pub struct StreamHandle {
    name: String,
    config: RwLock<Arc<StreamConfig>>,
    state: StreamRuntimeState,
}

impl StreamHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> Arc<StreamConfig> {
        self.config.read().unwrap().clone()
    }

    pub fn state(&self) -> &StreamRuntimeState {
        &self.state
    }

    pub fn detection_interval(&self) -> Duration {
        self.config().detection_interval()
    }

    /// Keyframe arrivals only ever move the timestamp forward.
    pub fn update_keyframe_time(&self, at: Instant) {
        let mut last = self.state.last_keyframe.lock().unwrap();
        if last.map(|prev| at > prev).unwrap_or(true) {
            *last = Some(at);
        }
    }

    pub fn last_keyframe_time(&self) -> Option<Instant> {
        *self.state.last_keyframe.lock().unwrap()
    }

    pub fn update_last_detection_time(&self, at: Instant) {
        *self.state.last_detection.lock().unwrap() = Some(at);
    }

    pub fn last_detection_time(&self) -> Option<Instant> {
        *self.state.last_detection.lock().unwrap()
    }
}

/// Named lookup of stream handles. All operations are safe to call from
/// stream threads concurrently with external config edits.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: RwLock<HashMap<String, Arc<StreamHandle>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, config: StreamConfig) -> Result<Arc<StreamHandle>, RegisterStreamError> {
        config.validate()?;
        let mut streams = self.streams.write().unwrap();
        if streams.contains_key(&config.name) {
            return Err(RegisterStreamError::AlreadyRegistered(config.name));
        }
        let handle = Arc::new(StreamHandle {
            name: config.name.clone(),
            config: RwLock::new(Arc::new(config)),
            state: StreamRuntimeState::default(),
        });
        streams.insert(handle.name.clone(), handle.clone());
        Ok(handle)
    }

    pub fn get_stream_by_name(&self, name: &str) -> Option<Arc<StreamHandle>> {
        self.streams.read().unwrap().get(name).cloned()
    }

    /// Swap the config snapshot of a registered stream. The stream thread
    /// picks the new snapshot up on its next per-packet config read.
    pub fn update_stream_config(&self, config: StreamConfig) -> bool {
        let streams = self.streams.read().unwrap();
        match streams.get(&config.name) {
            Some(handle) => {
                *handle.config.write().unwrap() = Arc::new(config);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, name: &str) -> Option<Arc<StreamHandle>> {
        self.streams.write().unwrap().remove(name)
    }

    pub fn stream_names(&self) -> Vec<String> {
        self.streams.read().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> StreamConfig {
        StreamConfig::from_json(&format!(r#"{{"name": "{name}", "url": "stub://x"}}"#)).unwrap()
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = StreamRegistry::new();
        registry.register(config("cam-a")).unwrap();
        assert!(matches!(
            registry.register(config("cam-a")),
            Err(RegisterStreamError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn config_updates_are_visible_as_new_snapshots() {
        let registry = StreamRegistry::new();
        let handle = registry.register(config("cam-a")).unwrap();
        let before = handle.config();
        assert!(!before.record_audio);

        let mut edited = (*before).clone();
        edited.record_audio = true;
        assert!(registry.update_stream_config(edited));

        assert!(handle.config().record_audio);
        // the old snapshot is unchanged
        assert!(!before.record_audio);
    }

    #[test]
    fn keyframe_time_is_monotonic() {
        let registry = StreamRegistry::new();
        let handle = registry.register(config("cam-a")).unwrap();

        let first = Instant::now();
        handle.update_keyframe_time(first);
        let later = first + Duration::from_secs(1);
        handle.update_keyframe_time(later);
        handle.update_keyframe_time(first);

        assert_eq!(handle.last_keyframe_time(), Some(later));
    }
}
