use std::{collections::HashMap, sync::Arc};

use url::Url;

use crate::{
    config::TransportProtocol,
    error::{InputInitError, ReadPacketError},
    types::{MediaKind, Packet, StreamDescriptor},
};

mod synthetic;

#[cfg(feature = "ffmpeg")]
mod ffmpeg;

pub use synthetic::SyntheticSource;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegInput;

/// A demuxed media input: a set of elementary stream descriptors and a
/// blocking packet reader. Stream indices are only valid for the lifetime of
/// one source; after a reopen the caller must re-resolve them.
pub trait MediaSource: Send {
    fn streams(&self) -> &[StreamDescriptor];

    fn read_packet(&mut self) -> Result<Packet, ReadPacketError>;
}

/// Opens a [`MediaSource`] for one URL scheme. Factories hold no per-stream
/// state; reconnects go through the same `open` call.
pub trait TransportFactory: Send + Sync {
    fn open(
        &self,
        url: &Url,
        protocol: TransportProtocol,
    ) -> Result<Box<dyn MediaSource>, InputInitError>;
}

/// Scheme-keyed registry of transports. Stateless across calls; the protocol
/// hint is forwarded to the factory, which decides what it means for its
/// transport.
pub struct InputOpener {
    transports: HashMap<String, Arc<dyn TransportFactory>>,
}

impl InputOpener {
    pub fn empty() -> Self {
        Self {
            transports: HashMap::new(),
        }
    }

    pub fn new() -> Self {
        let mut opener = Self::empty();
        opener.register("stub", Arc::new(synthetic::SyntheticTransport));
        #[cfg(feature = "ffmpeg")]
        {
            let transport = Arc::new(ffmpeg::FfmpegTransport);
            opener.register("rtsp", transport.clone());
            opener.register("http", transport.clone());
            opener.register("https", transport);
        }
        opener
    }

    pub fn register(&mut self, scheme: &str, factory: Arc<dyn TransportFactory>) {
        self.transports.insert(scheme.to_string(), factory);
    }

    pub fn open_input_stream(
        &self,
        url: &str,
        protocol: TransportProtocol,
    ) -> Result<Box<dyn MediaSource>, InputInitError> {
        let parsed = Url::parse(url).map_err(|source| InputInitError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let factory = self
            .transports
            .get(parsed.scheme())
            .ok_or_else(|| InputInitError::UnsupportedScheme(parsed.scheme().to_string()))?;
        factory.open(&parsed, protocol)
    }
}

impl Default for InputOpener {
    fn default() -> Self {
        Self::new()
    }
}

/// First video stream of the input, if any.
pub fn find_video_stream(source: &dyn MediaSource) -> Option<StreamDescriptor> {
    source
        .streams()
        .iter()
        .find(|descriptor| matches!(descriptor.kind(), MediaKind::Video(_)))
        .cloned()
}

/// First audio stream of the input, if any.
pub fn find_audio_stream(source: &dyn MediaSource) -> Option<StreamDescriptor> {
    source
        .streams()
        .iter()
        .find(|descriptor| matches!(descriptor.kind(), MediaKind::Audio(_)))
        .cloned()
}
