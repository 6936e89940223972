use std::{slice, time::Duration};

use bytes::Bytes;
use ffmpeg_next::{self as ffmpeg, media::Type, Dictionary, Rational};
use tracing::{info, warn};
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

/// Socket/read timeout passed to the demuxer, in microseconds.
const IO_TIMEOUT_US: &str = "5000000";

/// Opens RTSP and HTTP(S) sources through ffmpeg. The protocol hint selects
/// the RTSP lower transport; HTTP sources only get the timeout options.
pub(super) struct FfmpegTransport;

impl TransportFactory for FfmpegTransport {
    fn open(
        &self,
        url: &Url,
        protocol: TransportProtocol,
    ) -> Result<Box<dyn MediaSource>, InputInitError> {
        Ok(Box::new(FfmpegInput::open(url, protocol)?))
    }
}

pub struct FfmpegInput {
    input: ffmpeg::format::context::Input,
    streams: Vec<StreamDescriptor>,
    time_bases: Vec<Rational>,
}

impl FfmpegInput {
    pub fn open(url: &Url, protocol: TransportProtocol) -> Result<Self, InputInitError> {
        ffmpeg::init().map_err(InputInitError::FfmpegError)?;

        let mut options = Dictionary::new();
        if url.scheme() == "rtsp" {
            let transport = match protocol {
                TransportProtocol::Tcp => "tcp",
                TransportProtocol::Udp => "udp",
            };
            options.set("rtsp_transport", transport);
            options.set("stimeout", IO_TIMEOUT_US);
        } else {
            options.set("timeout", IO_TIMEOUT_US);
        }

        let input = ffmpeg::format::input_with_dictionary(&url.as_str(), options)
            .map_err(InputInitError::FfmpegError)?;

        let mut streams = Vec::new();
        let mut time_bases = Vec::new();
        for stream in input.streams() {
            time_bases.push(stream.time_base());
            match stream.parameters().medium() {
                Type::Video => match video_descriptor(&stream) {
                    Some(descriptor) => streams.push(descriptor),
                    None => warn!(
                        index = stream.index(),
                        "Skipping video stream with unsupported codec"
                    ),
                },
                Type::Audio => match audio_descriptor(&stream) {
                    Some(descriptor) => streams.push(descriptor),
                    None => warn!(
                        index = stream.index(),
                        "Skipping audio stream with unsupported codec"
                    ),
                },
                _ => {}
            }
        }
        info!(url = %url, streams = streams.len(), "Opened ffmpeg input");

        Ok(Self {
            input,
            streams,
            time_bases,
        })
    }

    fn to_timestamp(&self, stream_index: usize, timestamp: i64) -> Duration {
        let time_base = self
            .time_bases
            .get(stream_index)
            .copied()
            .unwrap_or(Rational(1, 90_000));
        Duration::from_secs_f64(
            f64::max(timestamp as f64, 0.0) * time_base.numerator() as f64
                / time_base.denominator() as f64,
        )
    }
}

impl MediaSource for FfmpegInput {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Packet, ReadPacketError> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof | ffmpeg::Error::Exit) => return Err(ReadPacketError::Eof),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                return Err(ReadPacketError::TryAgain)
            }
            Err(err) => return Err(ReadPacketError::Demuxer(err.to_string())),
        }

        let stream_index = packet.stream();
        let pts = self.to_timestamp(stream_index, packet.pts().unwrap_or(0));
        let dts = self.to_timestamp(stream_index, packet.dts().unwrap_or(0));
        let data = packet
            .data()
            .map(Bytes::copy_from_slice)
            .unwrap_or_default();

        Ok(Packet {
            stream_index,
            pts,
            dts,
            is_keyframe: packet.flags().contains(ffmpeg::packet::Flags::KEY),
            data,
        })
    }
}

fn video_descriptor(stream: &ffmpeg::format::stream::Stream) -> Option<StreamDescriptor> {
    let codec = match stream.parameters().id() {
        ffmpeg::codec::Id::H264 => VideoCodec::H264,
        ffmpeg::codec::Id::VP8 => VideoCodec::Vp8,
        ffmpeg::codec::Id::VP9 => VideoCodec::Vp9,
        _ => return None,
    };

    let (width, height, extradata) = unsafe {
        let codecpar = (*stream.as_ptr()).codecpar;
        let extradata_size = (*codecpar).extradata_size;
        let extradata = if extradata_size > 0 {
            Bytes::copy_from_slice(slice::from_raw_parts(
                (*codecpar).extradata,
                extradata_size as usize,
            ))
        } else {
            Bytes::new()
        };
        ((*codecpar).width as u32, (*codecpar).height as u32, extradata)
    };

    let (sps, pps) = parse_avc_decoder_config(&extradata).unwrap_or_default();
    Some(StreamDescriptor {
        index: stream.index(),
        parameters: CodecParameters::Video(VideoCodecParameters {
            codec,
            width,
            height,
            sps,
            pps,
        }),
    })
}

fn audio_descriptor(stream: &ffmpeg::format::stream::Stream) -> Option<StreamDescriptor> {
    let codec = match stream.parameters().id() {
        ffmpeg::codec::Id::AAC => AudioCodec::Aac,
        ffmpeg::codec::Id::OPUS => AudioCodec::Opus,
        _ => return None,
    };

    let (sample_rate, channel_count) = unsafe {
        let codecpar = (*stream.as_ptr()).codecpar;
        (
            (*codecpar).sample_rate as u32,
            (*codecpar).ch_layout.nb_channels,
        )
    };

    Some(StreamDescriptor {
        index: stream.index(),
        parameters: CodecParameters::Audio(AudioCodecParameters {
            codec,
            sample_rate,
            channels: match channel_count {
                1 => AudioChannels::Mono,
                _ => AudioChannels::Stereo,
            },
        }),
    })
}

/// First SPS and PPS from an `avcC` decoder configuration record.
fn parse_avc_decoder_config(extradata: &[u8]) -> Option<(Bytes, Bytes)> {
    if extradata.first() != Some(&1) {
        return None;
    }
    let mut offset = 5usize;

    let sps_count = (*extradata.get(offset)? & 0x1f) as usize;
    offset += 1;
    let mut sps = None;
    for _ in 0..sps_count {
        let len =
            u16::from_be_bytes([*extradata.get(offset)?, *extradata.get(offset + 1)?]) as usize;
        offset += 2;
        let nal = extradata.get(offset..offset + len)?;
        offset += len;
        sps.get_or_insert_with(|| Bytes::copy_from_slice(nal));
    }

    let pps_count = *extradata.get(offset)? as usize;
    offset += 1;
    let mut pps = None;
    for _ in 0..pps_count {
        let len =
            u16::from_be_bytes([*extradata.get(offset)?, *extradata.get(offset + 1)?]) as usize;
        offset += 2;
        let nal = extradata.get(offset..offset + len)?;
        offset += len;
        pps.get_or_insert_with(|| Bytes::copy_from_slice(nal));
    }

    Some((sps?, pps?))
}
