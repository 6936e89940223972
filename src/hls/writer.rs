use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::{debug, warn};

use crate::{
    codecs::VideoCodecParameters,
    container::Mp4Muxer,
    error::HlsWriterError,
    hls::{Playlist, PlaylistSegment},
    types::{Packet, StreamDescriptor},
};

pub const DEFAULT_MAX_SEGMENTS: usize = 8;

struct OpenSegment {
    muxer: Mp4Muxer,
    file_name: String,
    first_pts: Duration,
}

/// Writes incoming video packets into keyframe-aligned MP4 segments and
/// maintains the rolling playlist next to them. Rotation happens on the first
/// keyframe after the target duration has elapsed, so every segment starts
/// with a keyframe and is independently decodable.
pub struct HlsWriter {
    output_dir: PathBuf,
    stream_name: String,
    target_segment_duration: Duration,
    playlist: Playlist,
    segment: Option<OpenSegment>,
    next_segment_index: u64,
    closed: bool,
}

impl HlsWriter {
    pub fn create(
        output_dir: &Path,
        stream_name: &str,
        segment_duration: Duration,
    ) -> Result<Self, HlsWriterError> {
        Self::with_max_segments(output_dir, stream_name, segment_duration, DEFAULT_MAX_SEGMENTS)
    }

    pub fn with_max_segments(
        output_dir: &Path,
        stream_name: &str,
        segment_duration: Duration,
        max_segments: usize,
    ) -> Result<Self, HlsWriterError> {
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            stream_name: stream_name.to_string(),
            target_segment_duration: segment_duration,
            playlist: Playlist::new(segment_duration.as_secs_f64(), max_segments),
            segment: None,
            next_segment_index: 0,
            closed: false,
        })
    }

    /// Write one video packet. Packets arriving before the first keyframe are
    /// dropped; a keyframe past the target duration rotates the segment.
    pub fn write_packet(
        &mut self,
        packet: &Packet,
        descriptor: &StreamDescriptor,
    ) -> Result<(), HlsWriterError> {
        if self.closed {
            return Ok(());
        }
        let Some(video_params) = descriptor.parameters.as_video() else {
            return Ok(());
        };

        if packet.is_keyframe {
            let rotate = self
                .segment
                .as_ref()
                .map(|segment| {
                    // a pts jump backwards means the input was reopened;
                    // start a fresh segment instead of mixing timelines
                    packet.pts.saturating_sub(segment.first_pts) >= self.target_segment_duration
                        || packet.pts < segment.first_pts
                })
                .unwrap_or(false);
            if rotate {
                self.finish_segment(packet.pts)?;
            }
        }

        if self.segment.is_none() {
            if !packet.is_keyframe {
                return Ok(());
            }
            self.open_segment(video_params, packet.pts)?;
        }

        let segment = self.segment.as_mut().unwrap();
        segment.muxer.write_packet(descriptor.kind(), packet)?;
        Ok(())
    }

    /// Flush the current segment's buffered file writer. Called by the owner
    /// on keyframes to bound live latency without per-packet syscalls.
    pub fn flush(&self) -> Result<(), HlsWriterError> {
        if let Some(segment) = &self.segment {
            segment.muxer.flush()?;
        }
        Ok(())
    }

    /// Finalize the open segment and write the playlist with an end marker.
    /// Safe to call more than once.
    pub fn close(&mut self) -> Result<(), HlsWriterError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(segment) = self.segment.take() {
            // No following keyframe exists; account the target duration.
            let duration = self.target_segment_duration.as_secs_f64();
            self.complete_segment(segment, duration)?;
        }
        self.write_playlist(true)?;
        debug!(stream = %self.stream_name, "Closed HLS writer");
        Ok(())
    }

    pub fn playlist_path(&self) -> PathBuf {
        self.output_dir.join("index.m3u8")
    }

    pub fn segment_count(&self) -> usize {
        self.playlist.segments().count()
    }

    fn open_segment(
        &mut self,
        video_params: &VideoCodecParameters,
        first_pts: Duration,
    ) -> Result<(), HlsWriterError> {
        let file_name = format!("{}_{:05}.mp4", self.stream_name, self.next_segment_index);
        self.next_segment_index += 1;

        let muxer = Mp4Muxer::create(&self.output_dir.join(&file_name), video_params, None)?;
        debug!(stream = %self.stream_name, segment = %file_name, "Opened HLS segment");
        self.segment = Some(OpenSegment {
            muxer,
            file_name,
            first_pts,
        });
        Ok(())
    }

    fn finish_segment(&mut self, rotation_pts: Duration) -> Result<(), HlsWriterError> {
        let Some(segment) = self.segment.take() else {
            return Ok(());
        };
        let mut duration = rotation_pts
            .saturating_sub(segment.first_pts)
            .as_secs_f64();
        if duration <= 0.0 {
            duration = self.target_segment_duration.as_secs_f64();
        }
        self.complete_segment(segment, duration)?;
        self.write_playlist(false)?;
        Ok(())
    }

    fn complete_segment(
        &mut self,
        segment: OpenSegment,
        duration: f64,
    ) -> Result<(), HlsWriterError> {
        let file_name = segment.file_name;
        segment.muxer.finish()?;

        let evicted = self.playlist.push(PlaylistSegment {
            uri: file_name.clone(),
            duration,
        });
        if let Some(evicted) = evicted {
            let path = self.output_dir.join(&evicted.uri);
            if let Err(err) = fs::remove_file(&path) {
                warn!(stream = %self.stream_name, segment = %evicted.uri, %err, "Failed to delete evicted segment");
            }
        }
        debug!(stream = %self.stream_name, segment = %file_name, duration, "Completed HLS segment");
        Ok(())
    }

    fn write_playlist(&self, ended: bool) -> Result<(), HlsWriterError> {
        fs::write(self.playlist_path(), self.playlist.render(ended))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::codecs::{CodecParameters, VideoCodec};
    use crate::hls::ensure_hls_directory;

    fn descriptor() -> StreamDescriptor {
        StreamDescriptor {
            index: 0,
            parameters: CodecParameters::Video(VideoCodecParameters {
                codec: VideoCodec::H264,
                width: 640,
                height: 480,
                sps: Bytes::from_static(&[0x67, 0x42, 0x00, 0x1e]),
                pps: Bytes::from_static(&[0x68, 0xce, 0x38, 0x80]),
            }),
        }
    }

    fn packet(seq: u64, gop: u64) -> Packet {
        let pts = Duration::from_millis(seq * 100);
        Packet {
            stream_index: 0,
            pts,
            dts: pts,
            is_keyframe: seq % gop == 0,
            data: Bytes::from(vec![seq as u8; 64]),
        }
    }

    #[test]
    fn segments_rotate_on_keyframes_past_target_duration() {
        let dir = tempfile::tempdir().unwrap();
        ensure_hls_directory(dir.path()).unwrap();
        let mut writer =
            HlsWriter::create(dir.path(), "cam-a", Duration::from_secs(1)).unwrap();

        // 10 fps, keyframe every 0.5 s: rotation lands on every second keyframe
        let descriptor = descriptor();
        for seq in 0..40 {
            writer.write_packet(&packet(seq, 5), &descriptor).unwrap();
        }
        writer.close().unwrap();

        let contents = fs::read_to_string(dir.path().join("index.m3u8")).unwrap();
        let segments = Playlist::parse(&contents).unwrap();
        assert!(segments.len() >= 3, "expected rotated segments: {contents}");
        for segment in &segments {
            assert!(dir.path().join(&segment.uri).is_file());
        }
        assert!(contents.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn packets_before_first_keyframe_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            HlsWriter::create(dir.path(), "cam-a", Duration::from_secs(2)).unwrap();

        let descriptor = descriptor();
        let mut non_key = packet(1, 5);
        non_key.is_keyframe = false;
        writer.write_packet(&non_key, &descriptor).unwrap();
        assert!(writer.segment.is_none());

        writer.write_packet(&packet(0, 5), &descriptor).unwrap();
        assert!(writer.segment.is_some());
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            HlsWriter::create(dir.path(), "cam-a", Duration::from_secs(1)).unwrap();
        writer.write_packet(&packet(0, 5), &descriptor()).unwrap();

        writer.close().unwrap();
        writer.close().unwrap();

        let contents = fs::read_to_string(dir.path().join("index.m3u8")).unwrap();
        assert_eq!(contents.matches("#EXT-X-ENDLIST").count(), 1);
    }

    #[test]
    fn evicted_segments_are_deleted_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            HlsWriter::with_max_segments(dir.path(), "cam-a", Duration::from_millis(200), 2)
                .unwrap();

        let descriptor = descriptor();
        for seq in 0..30 {
            // keyframe every other packet at 10 fps rotates every 200 ms
            writer.write_packet(&packet(seq, 2), &descriptor).unwrap();
        }
        writer.close().unwrap();

        assert!(!dir.path().join("cam-a_00000.mp4").exists());
        let contents = fs::read_to_string(dir.path().join("index.m3u8")).unwrap();
        let segments = Playlist::parse(&contents).unwrap();
        assert_eq!(segments.len(), 2);
    }
}
