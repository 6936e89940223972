use bytes::Bytes;

use crate::types::MediaKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    H264,
    Vp8,
    Vp9,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Aac,
    Opus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioChannels {
    Mono,
    Stereo,
}

/// Codec parameters attached to a stream descriptor. Extradata
/// (H.264 parameter sets) is carried as refcounted bytes so descriptors are
/// cheap to clone across consumers.
#[derive(Debug, Clone)]
pub enum CodecParameters {
    Video(VideoCodecParameters),
    Audio(AudioCodecParameters),
}

#[derive(Debug, Clone)]
pub struct VideoCodecParameters {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub sps: Bytes,
    pub pps: Bytes,
}

#[derive(Debug, Clone)]
pub struct AudioCodecParameters {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: AudioChannels,
}

impl CodecParameters {
    pub fn kind(&self) -> MediaKind {
        match self {
            CodecParameters::Video(params) => MediaKind::Video(params.codec),
            CodecParameters::Audio(params) => MediaKind::Audio(params.codec),
        }
    }

    pub fn as_video(&self) -> Option<&VideoCodecParameters> {
        match self {
            CodecParameters::Video(params) => Some(params),
            CodecParameters::Audio(_) => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioCodecParameters> {
        match self {
            CodecParameters::Audio(params) => Some(params),
            CodecParameters::Video(_) => None,
        }
    }
}
