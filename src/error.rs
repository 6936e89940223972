use std::path::PathBuf;

use crate::container::MuxerError;

#[derive(Debug, thiserror::Error)]
pub enum InputInitError {
    #[error("Failed to parse input url \"{url}\".")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("No transport is registered for scheme \"{0}\".")]
    UnsupportedScheme(String),

    #[error("Failed to open input: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "ffmpeg")]
    #[error("Failed to open input. FFmpeg error: {0}.")]
    FfmpegError(ffmpeg_next::Error),
}

/// Outcome of a single demuxer read. `Eof` and `TryAgain` are transient; the
/// caller is expected to reopen the input. Everything else ends the stream.
#[derive(Debug, thiserror::Error)]
pub enum ReadPacketError {
    #[error("end of stream")]
    Eof,

    #[error("resource temporarily unavailable")]
    TryAgain,

    #[error("demuxer error: {0}")]
    Demuxer(String),
}

#[derive(Debug, thiserror::Error)]
pub enum HlsWriterError {
    #[error("Failed to create HLS output directory {0}.")]
    CreateDirectory(PathBuf, #[source] std::io::Error),

    #[error("HLS output directory {0} is not writable.")]
    DirectoryNotWritable(PathBuf, #[source] std::io::Error),

    #[error(transparent)]
    Muxer(#[from] MuxerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("The recording was already finalized.")]
    AlreadyFinalized,

    #[error(transparent)]
    Muxer(#[from] MuxerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterStreamError {
    #[error("Failed to register stream. Stream \"{0}\" is already registered.")]
    AlreadyRegistered(String),

    #[error("Failed to register stream. Stream name must not be empty.")]
    EmptyName,

    #[error("Failed to register stream. Stream name \"{name}\" exceeds {max} bytes.")]
    NameTooLong { name: String, max: usize },
}

/// Fatal startup failure of a stream thread. Produced by the init phase of the
/// spawn handshake; the thread never enters its main loop.
#[derive(Debug, thiserror::Error)]
pub enum StreamInitError {
    #[error("Stream \"{0}\" is not registered.")]
    UnknownStream(String),

    #[error("Stream \"{0}\" was stopped before its thread started.")]
    AlreadyStopped(String),

    #[error("Failed to create HLS writer for stream \"{stream}\".")]
    Hls {
        stream: String,
        #[source]
        source: HlsWriterError,
    },

    #[error("Could not open input stream for \"{stream}\".")]
    Input {
        stream: String,
        #[source]
        source: InputInitError,
    },

    #[error("No video stream found in \"{0}\".")]
    NoVideoStream(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StartStreamError {
    #[error("Stream \"{0}\" is not registered.")]
    UnknownStream(String),

    #[error("Stream \"{0}\" is already running.")]
    AlreadyRunning(String),

    #[error(transparent)]
    Init(#[from] StreamInitError),
}

#[derive(Debug, thiserror::Error)]
pub enum DetectionSubmitError {
    #[error("Detection queue is full.")]
    QueueFull,

    #[error("Detection worker pool is shut down.")]
    PoolShutDown,

    #[error("No detection reader is registered for stream \"{0}\".")]
    StreamNotRegistered(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RecordingControlError {
    #[error("Stream \"{0}\" is not registered.")]
    UnknownStream(String),

    #[error("A recording is already active for stream \"{0}\".")]
    AlreadyRecording(String),

    #[error("No recording is active for stream \"{0}\".")]
    NotRecording(String),

    #[error(transparent)]
    Recorder(#[from] RecorderError),
}
