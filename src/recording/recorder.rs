use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, error, warn};

use crate::{
    codecs::{AudioCodecParameters, VideoCodecParameters},
    container::Mp4Muxer,
    error::RecorderError,
    types::{MediaKind, Packet, StreamDescriptor},
};

/// One continuous MP4 recording session. Accepts video always and audio only
/// when constructed with audio parameters. Packets before the first video
/// keyframe are dropped so the file is playable from its first sample.
pub struct Mp4Recorder {
    stream_name: String,
    path: PathBuf,
    muxer: Option<Mp4Muxer>,
    saw_keyframe: bool,
}

impl Mp4Recorder {
    pub fn create(
        path: &Path,
        stream_name: &str,
        video: &VideoCodecParameters,
        audio: Option<&AudioCodecParameters>,
    ) -> Result<Self, RecorderError> {
        if path.exists() {
            let mut old_index = 0;
            let mut new_path_for_old_file;
            loop {
                new_path_for_old_file =
                    PathBuf::from(format!("{}.old.{}", path.to_string_lossy(), old_index));
                if !new_path_for_old_file.exists() {
                    break;
                }
                old_index += 1;
            }

            warn!(
                "Output file {} already exists. Renaming to {}.",
                path.to_string_lossy(),
                new_path_for_old_file.to_string_lossy()
            );
            if let Err(err) = fs::rename(path, &new_path_for_old_file) {
                error!("Failed to rename existing output file. Error: {}", err);
            }
        }

        let muxer = Mp4Muxer::create(path, video, audio)?;
        debug!(stream = stream_name, path = %path.display(), "Started MP4 recording");
        Ok(Self {
            stream_name: stream_name.to_string(),
            path: path.to_path_buf(),
            muxer: Some(muxer),
            saw_keyframe: false,
        })
    }

    pub fn has_audio(&self) -> bool {
        self.muxer
            .as_ref()
            .map(|muxer| muxer.has_audio())
            .unwrap_or(false)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_packet(
        &mut self,
        packet: &Packet,
        descriptor: &StreamDescriptor,
    ) -> Result<(), RecorderError> {
        let Some(muxer) = self.muxer.as_mut() else {
            return Err(RecorderError::AlreadyFinalized);
        };

        match descriptor.kind() {
            kind @ MediaKind::Video(_) => {
                if !self.saw_keyframe {
                    if !packet.is_keyframe {
                        return Ok(());
                    }
                    self.saw_keyframe = true;
                }
                muxer.write_packet(kind, packet)?;
            }
            kind @ MediaKind::Audio(_) => {
                if !muxer.has_audio() || !self.saw_keyframe {
                    return Ok(());
                }
                muxer.write_packet(kind, packet)?;
            }
        }
        Ok(())
    }

    /// Write the trailer and close the file. Exactly one finalize succeeds.
    pub fn finalize(&mut self) -> Result<(), RecorderError> {
        let Some(muxer) = self.muxer.take() else {
            return Err(RecorderError::AlreadyFinalized);
        };
        muxer.finish()?;
        debug!(stream = %self.stream_name, path = %self.path.display(), "Finalized MP4 recording");
        Ok(())
    }
}
