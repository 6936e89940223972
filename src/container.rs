use std::{
    fs::File,
    io::{self, BufWriter, Seek, Write},
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use mp4::{
    AacConfig, AudioObjectType, AvcConfig, ChannelConfig, MediaConfig, Mp4Config, Mp4Sample,
    Mp4Writer, SampleFreqIndex, TrackConfig, TrackType,
};

use crate::{
    codecs::{AudioChannels, AudioCodec, AudioCodecParameters, VideoCodec, VideoCodecParameters},
    types::{MediaKind, Packet},
};

const MOVIE_TIMESCALE: u32 = 1000;
const VIDEO_TIMESCALE: u32 = 90_000;
// Fallback durations until a pts delta is known (one 30 fps frame, one AAC frame).
const DEFAULT_VIDEO_SAMPLE_TICKS: u32 = VIDEO_TIMESCALE / 30;
const DEFAULT_AAC_FRAME_SAMPLES: u32 = 1024;

#[derive(Debug, thiserror::Error)]
pub enum MuxerError {
    #[error("An unsupported video codec was requested: {0:?}.")]
    UnsupportedVideoCodec(VideoCodec),

    #[error("An unsupported audio codec was requested: {0:?}.")]
    UnsupportedAudioCodec(AudioCodec),

    #[error("Audio sample rate {0} has no AAC frequency index.")]
    UnsupportedSampleRate(u32),

    #[error(transparent)]
    Mux(#[from] mp4::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// `Write + Seek` handle over a buffered file that can be cloned, so the
/// owner of an [`Mp4Muxer`] can flush the underlying buffer while the muxer
/// holds the write half.
#[derive(Clone)]
pub(crate) struct SharedWriter(Arc<Mutex<BufWriter<File>>>);

impl SharedWriter {
    fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self(Arc::new(Mutex::new(BufWriter::new(file)))))
    }

    pub fn flush_to_disk(&self) -> io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

impl Seek for SharedWriter {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.0.lock().unwrap().seek(pos)
    }
}

struct TrackState {
    track_id: u32,
    timescale: u32,
    /// First dts seen on this track; output timestamps start from zero.
    timestamp_offset: Option<Duration>,
    /// Sample held back until the next packet reveals its duration.
    pending: Option<PendingSample>,
    last_duration: u32,
}

struct PendingSample {
    start_time: u64,
    rendering_offset: i32,
    is_sync: bool,
    data: bytes::Bytes,
}

impl TrackState {
    fn new(track_id: u32, timescale: u32, default_duration: u32) -> Self {
        Self {
            track_id,
            timescale,
            timestamp_offset: None,
            pending: None,
            last_duration: default_duration,
        }
    }

    fn ticks(&self, timestamp: Duration) -> u64 {
        (timestamp.as_secs_f64() * self.timescale as f64).round() as u64
    }
}

/// Writes one MP4 file from demuxed packets. Used for both the continuous
/// recording file and the individual HLS segments. The video track is always
/// present; the audio track only when constructed with audio parameters.
pub(crate) struct Mp4Muxer {
    writer: Mp4Writer<SharedWriter>,
    output: SharedWriter,
    video: TrackState,
    audio: Option<TrackState>,
}

impl Mp4Muxer {
    pub fn create(
        path: &Path,
        video: &VideoCodecParameters,
        audio: Option<&AudioCodecParameters>,
    ) -> Result<Self, MuxerError> {
        let output = SharedWriter::create(path)?;

        let config = Mp4Config {
            major_brand: str::parse("isom").unwrap(),
            minor_version: 512,
            compatible_brands: vec![
                str::parse("isom").unwrap(),
                str::parse("iso2").unwrap(),
                str::parse("avc1").unwrap(),
                str::parse("mp41").unwrap(),
            ],
            timescale: MOVIE_TIMESCALE,
        };
        let mut writer = Mp4Writer::write_start(output.clone(), &config)?;

        writer.add_track(&video_track_config(video)?)?;
        let video_track = TrackState::new(1, VIDEO_TIMESCALE, DEFAULT_VIDEO_SAMPLE_TICKS);

        let audio_track = match audio {
            Some(audio) => {
                writer.add_track(&audio_track_config(audio)?)?;
                Some(TrackState::new(
                    2,
                    audio.sample_rate,
                    DEFAULT_AAC_FRAME_SAMPLES,
                ))
            }
            None => None,
        };

        Ok(Self {
            writer,
            output,
            video: video_track,
            audio: audio_track,
        })
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn write_packet(&mut self, kind: MediaKind, packet: &Packet) -> Result<(), MuxerError> {
        let track = match kind {
            MediaKind::Video(_) => &mut self.video,
            MediaKind::Audio(_) => match self.audio.as_mut() {
                Some(track) => track,
                None => return Ok(()),
            },
        };

        let timestamp_offset = *track.timestamp_offset.get_or_insert(packet.dts);
        let dts = packet.dts.saturating_sub(timestamp_offset);
        let pts = packet.pts.saturating_sub(timestamp_offset);

        let start_time = track.ticks(dts);
        let rendering_offset = track.ticks(pts) as i64 - start_time as i64;
        let next = PendingSample {
            start_time,
            rendering_offset: rendering_offset as i32,
            is_sync: packet.is_keyframe,
            data: packet.data.clone(),
        };

        if let Some(pending) = track.pending.take() {
            let delta = next.start_time.saturating_sub(pending.start_time) as u32;
            if delta > 0 {
                track.last_duration = delta;
            }
            let duration = track.last_duration;
            Self::write_sample(&mut self.writer, track, pending, duration)?;
        }
        track.pending = Some(next);
        Ok(())
    }

    /// Flush the buffered file writer. Samples already handed to the muxer
    /// reach the filesystem; the one pending sample per track does not.
    pub fn flush(&self) -> io::Result<()> {
        self.output.flush_to_disk()
    }

    /// Drain pending samples, write the trailer and flush. Consumes the muxer
    /// so the trailer is written exactly once.
    pub fn finish(mut self) -> Result<(), MuxerError> {
        let mut tracks = vec![&mut self.video];
        if let Some(audio) = self.audio.as_mut() {
            tracks.push(audio);
        }
        for track in tracks {
            if let Some(pending) = track.pending.take() {
                let duration = track.last_duration;
                Self::write_sample(&mut self.writer, track, pending, duration)?;
            }
        }
        self.writer.write_end()?;
        self.output.flush_to_disk()?;
        Ok(())
    }

    fn write_sample(
        writer: &mut Mp4Writer<SharedWriter>,
        track: &TrackState,
        sample: PendingSample,
        duration: u32,
    ) -> Result<(), MuxerError> {
        writer.write_sample(
            track.track_id,
            &Mp4Sample {
                start_time: sample.start_time,
                duration,
                rendering_offset: sample.rendering_offset,
                is_sync: sample.is_sync,
                bytes: sample.data,
            },
        )?;
        Ok(())
    }
}

fn video_track_config(params: &VideoCodecParameters) -> Result<TrackConfig, MuxerError> {
    match params.codec {
        VideoCodec::H264 => Ok(TrackConfig {
            track_type: TrackType::Video,
            timescale: VIDEO_TIMESCALE,
            language: "und".to_string(),
            media_conf: MediaConfig::AvcConfig(AvcConfig {
                width: params.width as u16,
                height: params.height as u16,
                seq_param_set: params.sps.to_vec(),
                pic_param_set: params.pps.to_vec(),
            }),
        }),
        codec => Err(MuxerError::UnsupportedVideoCodec(codec)),
    }
}

fn audio_track_config(params: &AudioCodecParameters) -> Result<TrackConfig, MuxerError> {
    match params.codec {
        AudioCodec::Aac => Ok(TrackConfig {
            track_type: TrackType::Audio,
            timescale: params.sample_rate,
            language: "und".to_string(),
            media_conf: MediaConfig::AacConfig(AacConfig {
                bitrate: 128_000,
                profile: AudioObjectType::AacLowComplexity,
                freq_index: freq_index(params.sample_rate)?,
                chan_conf: match params.channels {
                    AudioChannels::Mono => ChannelConfig::Mono,
                    AudioChannels::Stereo => ChannelConfig::Stereo,
                },
            }),
        }),
        codec => Err(MuxerError::UnsupportedAudioCodec(codec)),
    }
}

fn freq_index(sample_rate: u32) -> Result<SampleFreqIndex, MuxerError> {
    match sample_rate {
        96_000 => Ok(SampleFreqIndex::Freq96000),
        88_200 => Ok(SampleFreqIndex::Freq88200),
        64_000 => Ok(SampleFreqIndex::Freq64000),
        48_000 => Ok(SampleFreqIndex::Freq48000),
        44_100 => Ok(SampleFreqIndex::Freq44100),
        32_000 => Ok(SampleFreqIndex::Freq32000),
        24_000 => Ok(SampleFreqIndex::Freq24000),
        22_050 => Ok(SampleFreqIndex::Freq22050),
        16_000 => Ok(SampleFreqIndex::Freq16000),
        12_000 => Ok(SampleFreqIndex::Freq12000),
        11_025 => Ok(SampleFreqIndex::Freq11025),
        8_000 => Ok(SampleFreqIndex::Freq8000),
        other => Err(MuxerError::UnsupportedSampleRate(other)),
    }
}
