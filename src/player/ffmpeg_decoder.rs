use crate::core::{
    log_ctx, AudioDecoderConfig, AudioFrame, EncodedAVFrame, MediaError, PixelFormat, Result,
    SampleFormat, VideoDecoderConfig, VideoFrame,
};
use crate::player::decoder::{AudioDecoder, VideoDecoder};
use crate::player::ffmpeg_demuxer::CodecParameters;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, software, util};
use log::{debug, info, warn};
use std::collections::VecDeque;

fn codec_parameters(data: Option<&crate::core::BackendCodecData>) -> Result<codec::Parameters> {
    data.and_then(|data| data.downcast_ref::<CodecParameters>())
        .map(|params| params.0.clone())
        .ok_or_else(|| MediaError::DecodeError("缺少 FFmpeg 解码参数".to_string()))
}

/// 把压缩帧还原成 FFmpeg 数据包（时间戳以毫秒为单位）
fn to_packet(frame: &EncodedAVFrame) -> ffmpeg::Packet {
    let mut packet = ffmpeg::Packet::copy(&frame.data);
    packet.set_pts(Some(frame.pts));
    packet.set_dts(Some(frame.dts));
    packet.set_duration(frame.duration);
    if frame.is_keyframe {
        packet.set_flags(codec::packet::Flags::KEY);
    }
    packet
}

/// FFmpeg 软件视频解码器，输出 RGBA
pub struct FFmpegVideoDecoder {
    decoder: Option<codec::decoder::Video>,
    scaler: Option<software::scaling::Context>,
    scaler_key: (util::format::Pixel, u32, u32, u32, u32),
    pending: VecDeque<VideoFrame>,
    waiting_for_keyframe: bool,
    codec_name: String,
}

// SwsContext 本身不是 Send，但每个解码器实例只会在一个线程中使用
unsafe impl Send for FFmpegVideoDecoder {}

impl FFmpegVideoDecoder {
    pub fn new() -> Self {
        Self {
            decoder: None,
            scaler: None,
            scaler_key: (util::format::Pixel::None, 0, 0, 0, 0),
            pending: VecDeque::new(),
            waiting_for_keyframe: true,
            codec_name: String::new(),
        }
    }

    /// 转换帧格式为 RGBA，目标尺寸为 0 时保持原始尺寸
    fn convert_frame(&mut self, frame: &util::frame::Video, width: u32, height: u32) -> Result<VideoFrame> {
        let dst_width = if width == 0 { frame.width() } else { width };
        let dst_height = if height == 0 { frame.height() } else { height };
        let key = (frame.format(), frame.width(), frame.height(), dst_width, dst_height);

        if self.scaler.is_none() || self.scaler_key != key {
            self.scaler = Some(software::scaling::Context::get(
                frame.format(),
                frame.width(),
                frame.height(),
                util::format::Pixel::RGBA,
                dst_width,
                dst_height,
                software::scaling::Flags::BILINEAR,
            )?);
            self.scaler_key = key;
        }
        let Some(scaler) = self.scaler.as_mut() else {
            return Err(MediaError::DecodeError("缩放器不可用".to_string()));
        };

        let mut rgba_frame = util::frame::Video::empty();
        scaler.run(frame, &mut rgba_frame)?;

        // 复制数据到连续内存
        let row_size = dst_width as usize * 4;
        let stride = rgba_frame.stride(0);
        let frame_data = rgba_frame.data(0);
        let mut data = vec![0u8; row_size * dst_height as usize];
        for y in 0..dst_height as usize {
            let src_offset = y * stride;
            data[y * row_size..(y + 1) * row_size]
                .copy_from_slice(&frame_data[src_offset..src_offset + row_size]);
        }

        let pts = frame.timestamp().or(frame.pts()).unwrap_or(0);
        Ok(VideoFrame::new(pts, dst_width, dst_height, PixelFormat::RGBA, data))
    }
}

impl Default for FFmpegVideoDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoDecoder for FFmpegVideoDecoder {
    fn initialize(&mut self, config: &VideoDecoderConfig) -> Result<()> {
        let params = codec_parameters(config.backend_data.as_ref())?;
        let decoder = codec::context::Context::from_parameters(params)?.decoder().video()?;
        debug!(
            "{} 软件解码器: {}x{}, 格式: {:?}",
            log_ctx(),
            decoder.width(),
            decoder.height(),
            decoder.format()
        );
        self.codec_name = config.codec_name.clone();
        self.decoder = Some(decoder);
        self.waiting_for_keyframe = true;
        Ok(())
    }

    fn decode(&mut self, frame: &EncodedAVFrame, width: u32, height: u32) -> Result<Option<VideoFrame>> {
        if self.waiting_for_keyframe {
            if !frame.is_keyframe {
                return Ok(self.pending.pop_front());
            }
            self.waiting_for_keyframe = false;
        }

        let mut decoded = Vec::new();
        {
            let decoder = self
                .decoder
                .as_mut()
                .ok_or_else(|| MediaError::DecodeError("视频解码器尚未初始化".to_string()))?;
            match decoder.send_packet(&to_packet(frame)) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => {
                    debug!("{} 视频解码器收到 EOF，执行 flush", log_ctx());
                    decoder.flush();
                    return Ok(self.pending.pop_front());
                }
                Err(e) => return Err(e.into()),
            }
            loop {
                let mut decoded_frame = util::frame::Video::empty();
                match decoder.receive_frame(&mut decoded_frame) {
                    Ok(()) => decoded.push(decoded_frame),
                    Err(ffmpeg::Error::Other { errno: 11 }) => break, // EAGAIN
                    Err(ffmpeg::Error::Eof) => break,
                    Err(e) => {
                        warn!("{} 解码错误（已跳过）: {}", log_ctx(), e);
                        break;
                    }
                }
            }
        }
        for decoded_frame in decoded {
            let converted = self.convert_frame(&decoded_frame, width, height)?;
            self.pending.push_back(converted);
        }
        Ok(self.pending.pop_front())
    }

    fn clear_buffer(&mut self) {
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.flush();
        }
        self.pending.clear();
        self.waiting_for_keyframe = true;
    }

    fn name(&self) -> String {
        format!("FFmpeg 软件解码 ({})", self.codec_name)
    }
}

/// FFmpeg 音频解码器，重采样到输出设备的格式（f32 交错）
pub struct FFmpegAudioDecoder {
    decoder: Option<codec::decoder::Audio>,
    resampler: Option<software::resampling::Context>,
    target_sample_rate: u32,
    target_channels: u16,
    codec_name: String,
}

// SwrContext 同样只在解码线程上使用
unsafe impl Send for FFmpegAudioDecoder {}

impl FFmpegAudioDecoder {
    pub fn new() -> Self {
        Self {
            decoder: None,
            resampler: None,
            target_sample_rate: 48000,
            target_channels: 2,
            codec_name: String::new(),
        }
    }

    /// 转换音频帧为 f32 格式（支持声道转换和重采样）
    fn convert_frame(&mut self, frame: &util::frame::Audio) -> Result<AudioFrame> {
        if self.resampler.is_none() {
            let target_layout = match self.target_channels {
                1 => util::channel_layout::ChannelLayout::MONO,
                6 => util::channel_layout::ChannelLayout::_5POINT1,
                _ => util::channel_layout::ChannelLayout::STEREO,
            };
            debug!(
                "{} 🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch",
                log_ctx(),
                frame.rate(),
                frame.channels(),
                self.target_sample_rate,
                self.target_channels
            );
            self.resampler = Some(software::resampling::Context::get(
                frame.format(),
                frame.channel_layout(),
                frame.rate(),
                util::format::Sample::F32(util::format::sample::Type::Packed),
                target_layout,
                self.target_sample_rate,
            )?);
        }
        let Some(resampler) = self.resampler.as_mut() else {
            return Err(MediaError::DecodeError("重采样器不可用".to_string()));
        };

        let mut resampled = util::frame::Audio::empty();
        resampler.run(frame, &mut resampled)?;

        let data_size = resampled.samples() * self.target_channels as usize;
        let bytes = resampled.data(0);
        let data: Vec<f32> = bytes
            .chunks_exact(4)
            .take(data_size)
            .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(AudioFrame {
            pts: frame.timestamp().or(frame.pts()).unwrap_or(0),
            sample_rate: self.target_sample_rate,
            channels: self.target_channels,
            format: SampleFormat::F32,
            data,
        })
    }
}

impl Default for FFmpegAudioDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDecoder for FFmpegAudioDecoder {
    fn initialize(&mut self, config: &AudioDecoderConfig, output_rate: u32, output_channels: u16) -> Result<()> {
        let params = codec_parameters(config.backend_data.as_ref())?;
        let decoder = codec::context::Context::from_parameters(params)?.decoder().audio()?;
        info!(
            "{} 音频解码器: {} Hz, {} 声道 → 目标: {} Hz, {} 声道",
            log_ctx(),
            decoder.rate(),
            decoder.channels(),
            output_rate,
            output_channels
        );
        self.codec_name = config.codec_name.clone();
        self.target_sample_rate = output_rate;
        self.target_channels = output_channels;
        self.resampler = None;
        self.decoder = Some(decoder);
        Ok(())
    }

    fn decode(&mut self, frame: &EncodedAVFrame) -> Result<Option<AudioFrame>> {
        let mut decoded = Vec::new();
        {
            let decoder = self
                .decoder
                .as_mut()
                .ok_or_else(|| MediaError::DecodeError("音频解码器尚未初始化".to_string()))?;
            match decoder.send_packet(&to_packet(frame)) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => {
                    decoder.flush();
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
            loop {
                let mut decoded_frame = util::frame::Audio::empty();
                match decoder.receive_frame(&mut decoded_frame) {
                    Ok(()) => decoded.push(decoded_frame),
                    Err(ffmpeg::Error::Other { errno: 11 }) => break, // EAGAIN
                    Err(ffmpeg::Error::Eof) => break,
                    Err(e) => return Err(e.into()),
                }
            }
        }

        // 一个包解出多帧时合并成一帧
        let mut merged: Option<AudioFrame> = None;
        for decoded_frame in decoded {
            let converted = self.convert_frame(&decoded_frame)?;
            match merged.as_mut() {
                Some(frame) => frame.data.extend_from_slice(&converted.data),
                None => merged = Some(converted),
            }
        }
        Ok(merged)
    }

    fn clear_buffer(&mut self) {
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.flush();
        }
    }

    fn name(&self) -> String {
        format!("FFmpeg 音频解码 ({})", self.codec_name)
    }
}
