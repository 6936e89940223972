use std::time::Duration;

use bytes::Bytes;
use url::Url;

use crate::{
    codecs::{
        AudioChannels, AudioCodec, AudioCodecParameters, CodecParameters, VideoCodec,
        VideoCodecParameters,
    },
    config::TransportProtocol,
    error::{InputInitError, ReadPacketError},
    input::{MediaSource, TransportFactory},
    types::{Packet, StreamDescriptor},
};

const AAC_FRAME_SAMPLES: u64 = 1024;

/// `stub://` transport producing a deterministic packet pattern, mainly for
/// development and tests. Options are read from the query string:
///
/// - `gop`: video packets per keyframe interval (default 30)
/// - `fps`: video frame rate (default 30)
/// - `packets`: video packets before end-of-stream, 0 = endless (default 0)
/// - `audio`: emit an interleaved AAC stream (default false)
/// - `swap`: put audio at index 0 and video at index 1 (default false)
/// - `error_after`: fail with a demuxer error after N video packets
/// - `pace_ms`: sleep this long before every read to mimic a live source
pub(super) struct SyntheticTransport;

impl TransportFactory for SyntheticTransport {
    fn open(
        &self,
        url: &Url,
        _protocol: TransportProtocol,
    ) -> Result<Box<dyn MediaSource>, InputInitError> {
        Ok(Box::new(SyntheticSource::from_url(url)?))
    }
}

pub struct SyntheticSource {
    streams: Vec<StreamDescriptor>,
    video_index: usize,
    audio_index: Option<usize>,
    gop: u64,
    fps: u64,
    packets_before_eof: u64,
    error_after: Option<u64>,
    pace: Duration,
    video_seq: u64,
    audio_seq: u64,
}

impl SyntheticSource {
    pub fn from_url(url: &Url) -> Result<Self, InputInitError> {
        let mut gop = 30u64;
        let mut fps = 30u64;
        let mut packets_before_eof = 0u64;
        let mut audio = false;
        let mut swap = false;
        let mut error_after = None;
        let mut pace = Duration::ZERO;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "gop" => gop = parse_option(url, &key, &value)?,
                "fps" => fps = parse_option(url, &key, &value)?,
                "packets" => packets_before_eof = parse_option(url, &key, &value)?,
                "audio" => audio = value == "true" || value == "1",
                "swap" => swap = value == "true" || value == "1",
                "error_after" => error_after = Some(parse_option(url, &key, &value)?),
                "pace_ms" => pace = Duration::from_millis(parse_option(url, &key, &value)?),
                _ => {}
            }
        }
        if gop == 0 || fps == 0 {
            return Err(InputInitError::Transport(
                "stub source requires gop > 0 and fps > 0".to_string(),
            ));
        }

        let (video_index, audio_index) = match (audio, swap) {
            (false, _) => (0, None),
            (true, false) => (0, Some(1)),
            (true, true) => (1, Some(0)),
        };

        let mut streams = vec![StreamDescriptor {
            index: video_index,
            parameters: CodecParameters::Video(VideoCodecParameters {
                codec: VideoCodec::H264,
                width: 1280,
                height: 720,
                sps: Bytes::from_static(&[0x67, 0x64, 0x00, 0x1f, 0xac]),
                pps: Bytes::from_static(&[0x68, 0xeb, 0xe3, 0xcb]),
            }),
        }];
        if let Some(audio_index) = audio_index {
            streams.push(StreamDescriptor {
                index: audio_index,
                parameters: CodecParameters::Audio(AudioCodecParameters {
                    codec: AudioCodec::Aac,
                    sample_rate: 48_000,
                    channels: AudioChannels::Stereo,
                }),
            });
        }
        streams.sort_by_key(|descriptor| descriptor.index);

        Ok(Self {
            streams,
            video_index,
            audio_index,
            gop,
            fps,
            packets_before_eof,
            error_after,
            pace,
            video_seq: 0,
            audio_seq: 0,
        })
    }

    fn video_pts(&self, seq: u64) -> Duration {
        Duration::from_nanos(seq * 1_000_000_000 / self.fps)
    }

    fn audio_pts(&self, seq: u64) -> Duration {
        Duration::from_nanos(seq * AAC_FRAME_SAMPLES * 1_000_000_000 / 48_000)
    }

    fn next_video_packet(&mut self) -> Packet {
        let seq = self.video_seq;
        self.video_seq += 1;
        let pts = self.video_pts(seq);
        Packet {
            stream_index: self.video_index,
            pts,
            dts: pts,
            is_keyframe: seq % self.gop == 0,
            data: Bytes::from(vec![(seq % 251) as u8; 1024]),
        }
    }

    fn next_audio_packet(&mut self) -> Packet {
        let seq = self.audio_seq;
        self.audio_seq += 1;
        let pts = self.audio_pts(seq);
        Packet {
            stream_index: self.audio_index.unwrap(),
            pts,
            dts: pts,
            is_keyframe: false,
            data: Bytes::from(vec![(seq % 251) as u8; 256]),
        }
    }
}

impl MediaSource for SyntheticSource {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Packet, ReadPacketError> {
        if !self.pace.is_zero() {
            std::thread::sleep(self.pace);
        }
        if let Some(error_after) = self.error_after {
            if self.video_seq >= error_after {
                return Err(ReadPacketError::Demuxer(
                    "synthetic demuxer failure".to_string(),
                ));
            }
        }
        if self.packets_before_eof > 0 && self.video_seq >= self.packets_before_eof {
            return Err(ReadPacketError::Eof);
        }

        // interleave by presentation time, video first on ties
        if self.audio_index.is_some()
            && self.audio_pts(self.audio_seq) < self.video_pts(self.video_seq)
        {
            Ok(self.next_audio_packet())
        } else {
            Ok(self.next_video_packet())
        }
    }
}

fn parse_option(url: &Url, key: &str, value: &str) -> Result<u64, InputInitError> {
    value.parse().map_err(|_| {
        InputInitError::Transport(format!("invalid {key} value \"{value}\" in {url}"))
    })
}
