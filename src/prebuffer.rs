use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, RwLock},
    time::Instant,
};

use crate::types::{Packet, StreamDescriptor};

pub const DEFAULT_PREBUFFER_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct PreBufferEntry {
    pub packet: Packet,
    pub descriptor: StreamDescriptor,
    pub arrived_at: Instant,
}

/// Bounded ring of recent packets for one stream. Event-triggered recordings
/// read a snapshot to start slightly before the trigger. Single writer (the
/// stream thread), any number of readers.
#[derive(Debug)]
pub struct PreBuffer {
    entries: RwLock<VecDeque<PreBufferEntry>>,
    capacity: usize,
}

impl PreBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, packet: Packet, descriptor: StreamDescriptor) {
        let mut entries = self.entries.write().unwrap();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(PreBufferEntry {
            packet,
            descriptor,
            arrived_at: Instant::now(),
        });
    }

    pub fn snapshot(&self) -> Vec<PreBufferEntry> {
        self.entries.read().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

/// Per-stream pre-buffers, keyed by stream name.
#[derive(Debug)]
pub struct PreBufferRegistry {
    buffers: RwLock<HashMap<String, Arc<PreBuffer>>>,
    capacity: usize,
}

impl PreBufferRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub fn add_packet(&self, stream_name: &str, packet: &Packet, descriptor: &StreamDescriptor) {
        self.ensure(stream_name)
            .push(packet.clone(), descriptor.clone());
    }

    pub fn get(&self, stream_name: &str) -> Option<Arc<PreBuffer>> {
        self.buffers.read().unwrap().get(stream_name).cloned()
    }

    pub fn remove(&self, stream_name: &str) {
        self.buffers.write().unwrap().remove(stream_name);
    }

    fn ensure(&self, stream_name: &str) -> Arc<PreBuffer> {
        if let Some(buffer) = self.get(stream_name) {
            return buffer;
        }
        let mut buffers = self.buffers.write().unwrap();
        buffers
            .entry(stream_name.to_string())
            .or_insert_with(|| Arc::new(PreBuffer::new(self.capacity)))
            .clone()
    }
}
