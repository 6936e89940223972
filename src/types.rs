use std::{fmt, time::Duration};

use bytes::Bytes;

use crate::codecs::{AudioCodec, CodecParameters, VideoCodec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video(VideoCodec),
    Audio(AudioCodec),
}

impl MediaKind {
    pub fn is_video(&self) -> bool {
        matches!(self, MediaKind::Video(_))
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, MediaKind::Audio(_))
    }
}

/// A single demuxed media unit. The payload is immutable once emitted by the
/// demuxer; cloning a packet bumps the payload refcount instead of copying it,
/// so every fan-out consumer holds its own counted reference.
#[derive(Clone)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: Duration,
    pub dts: Duration,
    pub is_keyframe: bool,
    pub data: Bytes,
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("stream_index", &self.stream_index)
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("is_keyframe", &self.is_keyframe)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Describes one elementary stream inside a demuxed input.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub index: usize,
    pub parameters: CodecParameters,
}

impl StreamDescriptor {
    pub fn kind(&self) -> MediaKind {
        self.parameters.kind()
    }
}
