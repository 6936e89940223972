mod directory;
mod playlist;
mod writer;

pub use directory::ensure_hls_directory;
pub use writer::{HlsWriter, DEFAULT_MAX_SEGMENTS};

pub(crate) use playlist::{Playlist, PlaylistSegment};
