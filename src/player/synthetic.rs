// 内置测试图案源：不依赖任何编解码库即可驱动整条流水线

use crate::core::{
    log_ctx, AudioDecoderConfig, AudioFrame, EncodedAVFrame, MediaError, MediaInfo, PixelFormat,
    Result, SampleFormat, StreamType, VideoDecoderConfig, VideoFrame,
};
use crate::player::backend::MediaBackend;
use crate::player::decoder::{AudioDecoder, VideoDecoder};
use crate::player::demuxer_source::MediaDemuxer;
use log::{debug, info, warn};
use std::time::Duration;

/// 测试图案源参数，从 `synthetic://?key=value&...` 解析
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticOptions {
    pub duration_ms: i64,
    pub start_ms: i64,
    pub fps: u32,
    /// 关键帧间隔（毫秒）
    pub gop_ms: i64,
    pub audio: bool,
    pub sample_rate: u32,
    pub channels: u16,
    pub audio_frame_ms: i64,
    pub width: u32,
    pub height: u32,
    /// 每次读取的模拟 I/O 延迟
    pub read_delay_ms: u64,
    pub fail_open: bool,
    pub fail_decoder: bool,
    /// 读到该时间点后返回 I/O 错误
    pub fail_read_at_ms: Option<i64>,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            duration_ms: 10_000,
            start_ms: 0,
            fps: 25,
            gop_ms: 1000,
            audio: true,
            sample_rate: 48000,
            channels: 2,
            audio_frame_ms: 20,
            width: 64,
            height: 36,
            read_delay_ms: 0,
            fail_open: false,
            fail_decoder: false,
            fail_read_at_ms: None,
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| MediaError::OpenError(format!("测试源参数 {}={} 无效", key, value)))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(MediaError::OpenError(format!("测试源参数 {}={} 无效", key, value))),
    }
}

impl SyntheticOptions {
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("synthetic://")
            .ok_or_else(|| MediaError::OpenError(format!("不是测试源 URL: {}", url)))?;
        let query = rest.split_once('?').map(|(_, q)| q).unwrap_or("");

        let mut options = Self::default();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, "1"));
            match key {
                "duration" => options.duration_ms = parse_value(key, value)?,
                "start" => options.start_ms = parse_value(key, value)?,
                "fps" => options.fps = parse_value(key, value)?,
                "gop" => options.gop_ms = parse_value(key, value)?,
                "audio" => options.audio = parse_flag(key, value)?,
                "rate" => options.sample_rate = parse_value(key, value)?,
                "channels" => options.channels = parse_value(key, value)?,
                "audio_frame" => options.audio_frame_ms = parse_value(key, value)?,
                "width" => options.width = parse_value(key, value)?,
                "height" => options.height = parse_value(key, value)?,
                "read_delay" => options.read_delay_ms = parse_value(key, value)?,
                "fail_open" => options.fail_open = parse_flag(key, value)?,
                "fail_decoder" => options.fail_decoder = parse_flag(key, value)?,
                "fail_read_at" => options.fail_read_at_ms = Some(parse_value(key, value)?),
                _ => warn!("{} ⚠️  忽略未知的测试源参数: {}", log_ctx(), key),
            }
        }

        if options.fps == 0 || options.gop_ms <= 0 || options.audio_frame_ms <= 0 {
            return Err(MediaError::OpenError("测试源的 fps / gop / audio_frame 必须为正数".to_string()));
        }
        if options.audio && (options.sample_rate == 0 || options.channels == 0) {
            return Err(MediaError::OpenError("测试源音频参数无效".to_string()));
        }
        Ok(options)
    }

    fn frame_interval_ms(&self) -> f64 {
        1000.0 / self.fps as f64
    }

    fn frames_per_gop(&self) -> i64 {
        ((self.gop_ms as f64 / self.frame_interval_ms()).round() as i64).max(1)
    }

    fn video_pts(&self, index: i64) -> i64 {
        self.start_ms + (index as f64 * self.frame_interval_ms()).round() as i64
    }

    fn end_ms(&self) -> i64 {
        self.start_ms + self.duration_ms
    }
}

/// 测试图案解封装器：按时间戳交错产出视频帧和音频帧
pub struct SyntheticDemuxer {
    options: SyntheticOptions,
    next_video: i64,
    next_audio_pts: i64,
    opened: bool,
}

impl SyntheticDemuxer {
    pub fn new(options: SyntheticOptions) -> Self {
        let next_audio_pts = options.start_ms;
        Self {
            options,
            next_video: 0,
            next_audio_pts,
            opened: false,
        }
    }
}

impl MediaDemuxer for SyntheticDemuxer {
    fn open(&mut self) -> Result<MediaInfo> {
        if self.options.fail_open {
            return Err(MediaError::OpenError("测试源被配置为打开失败".to_string()));
        }
        self.opened = true;
        info!("{} 🧪 打开测试源: {:?}", log_ctx(), self.options);
        let o = &self.options;
        Ok(MediaInfo {
            duration: o.duration_ms,
            start_time: o.start_ms,
            width: o.width,
            height: o.height,
            fps: o.fps as f64,
            video_codec: "synthetic".to_string(),
            audio_codec: if o.audio { "pcm_f32".to_string() } else { "none".to_string() },
            sample_rate: if o.audio { o.sample_rate } else { 0 },
            channels: if o.audio { o.channels } else { 0 },
        })
    }

    fn read_frame(&mut self) -> Result<Option<EncodedAVFrame>> {
        if !self.opened {
            return Err(MediaError::Other("测试源尚未打开".to_string()));
        }
        if self.options.read_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.options.read_delay_ms));
        }

        let end = self.options.end_ms();
        let video_pts = self.options.video_pts(self.next_video);
        let video_left = video_pts < end;
        let audio_left = self.options.audio && self.next_audio_pts < end;
        let take_video = match (video_left, audio_left) {
            (false, false) => return Ok(None),
            (true, false) => true,
            (false, true) => false,
            (true, true) => video_pts <= self.next_audio_pts,
        };
        let pts = if take_video { video_pts } else { self.next_audio_pts };

        if let Some(fail_at) = self.options.fail_read_at_ms {
            if pts >= fail_at {
                return Err(MediaError::IoError(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "测试源模拟的读取失败",
                )));
            }
        }

        let frame = if take_video {
            let index = self.next_video;
            self.next_video += 1;
            EncodedAVFrame {
                stream_type: StreamType::Video,
                pts,
                dts: pts,
                duration: self.options.video_pts(index + 1) - pts,
                is_keyframe: index % self.options.frames_per_gop() == 0,
                data: pts.to_le_bytes().to_vec(),
            }
        } else {
            self.next_audio_pts += self.options.audio_frame_ms;
            EncodedAVFrame {
                stream_type: StreamType::Audio,
                pts,
                dts: pts,
                duration: self.options.audio_frame_ms,
                is_keyframe: true,
                data: pts.to_le_bytes().to_vec(),
            }
        };
        Ok(Some(frame))
    }

    fn seek(&mut self, timestamp_ms: i64) -> Result<()> {
        let o = &self.options;
        let target = timestamp_ms.clamp(o.start_ms, o.end_ms().max(o.start_ms));
        let mut index = ((target - o.start_ms) as f64 / o.frame_interval_ms()).floor() as i64;
        index -= index % o.frames_per_gop();
        // 不能落在末尾之后
        while index > 0 && o.video_pts(index) >= o.end_ms() {
            index -= o.frames_per_gop();
        }
        let index = index.max(0);
        let key_pts = o.video_pts(index);
        self.next_video = index;
        self.next_audio_pts =
            o.start_ms + (key_pts - o.start_ms) / o.audio_frame_ms * o.audio_frame_ms;
        debug!("{} 🧪 测试源 Seek {}ms → 关键帧 {}ms", log_ctx(), timestamp_ms, key_pts);
        Ok(())
    }

    fn video_config(&self) -> Option<VideoDecoderConfig> {
        Some(VideoDecoderConfig {
            codec_name: "synthetic".to_string(),
            width: self.options.width,
            height: self.options.height,
            backend_data: None,
        })
    }

    fn audio_config(&self) -> Option<AudioDecoderConfig> {
        self.options.audio.then(|| AudioDecoderConfig {
            codec_name: "pcm_f32".to_string(),
            sample_rate: self.options.sample_rate,
            channels: self.options.channels,
            backend_data: None,
        })
    }

    fn start_time(&self) -> i64 {
        self.options.start_ms
    }

    fn description(&self) -> String {
        format!(
            "Synthetic Demuxer: {}ms @ {}fps, gop {}ms",
            self.options.duration_ms, self.options.fps, self.options.gop_ms
        )
    }
}

/// 测试图案视频解码器
///
/// 与真实解码器一样，清空后在收到关键帧之前不产出画面。
pub struct SyntheticVideoDecoder {
    fail_init: bool,
    native_size: Option<(u32, u32)>,
    seen_keyframe: bool,
}

impl SyntheticVideoDecoder {
    pub fn new(fail_init: bool) -> Self {
        Self {
            fail_init,
            native_size: None,
            seen_keyframe: false,
        }
    }
}

impl VideoDecoder for SyntheticVideoDecoder {
    fn initialize(&mut self, config: &VideoDecoderConfig) -> Result<()> {
        if self.fail_init {
            return Err(MediaError::DecodeError("测试解码器被配置为初始化失败".to_string()));
        }
        self.native_size = Some((config.width.max(1), config.height.max(1)));
        self.seen_keyframe = false;
        Ok(())
    }

    fn decode(&mut self, frame: &EncodedAVFrame, width: u32, height: u32) -> Result<Option<VideoFrame>> {
        let (native_w, native_h) = self
            .native_size
            .ok_or_else(|| MediaError::DecodeError("解码器尚未初始化".to_string()))?;
        if frame.is_keyframe {
            self.seen_keyframe = true;
        }
        if !self.seen_keyframe {
            return Ok(None);
        }

        let w = if width == 0 { native_w } else { width };
        let h = if height == 0 { native_h } else { height };
        let shade = (frame.pts / 40 % 256) as u8;
        let mut data = Vec::with_capacity((w * h * 4) as usize);
        for _ in 0..(w * h) {
            data.extend_from_slice(&[shade, 255 - shade, 128, 255]);
        }
        let mut decoded = VideoFrame::new(frame.pts, w, h, PixelFormat::RGBA, data);
        decoded.duration = frame.duration;
        Ok(Some(decoded))
    }

    fn clear_buffer(&mut self) {
        self.seen_keyframe = false;
    }

    fn name(&self) -> String {
        "synthetic-video".to_string()
    }
}

/// 测试图案音频解码器（440Hz 正弦波）
pub struct SyntheticAudioDecoder {
    fail_init: bool,
    output: Option<(u32, u16)>,
}

impl SyntheticAudioDecoder {
    pub fn new(fail_init: bool) -> Self {
        Self { fail_init, output: None }
    }
}

impl AudioDecoder for SyntheticAudioDecoder {
    fn initialize(&mut self, _config: &AudioDecoderConfig, output_rate: u32, output_channels: u16) -> Result<()> {
        if self.fail_init {
            return Err(MediaError::DecodeError("测试解码器被配置为初始化失败".to_string()));
        }
        if output_rate == 0 || output_channels == 0 {
            return Err(MediaError::AudioError("输出格式无效".to_string()));
        }
        self.output = Some((output_rate, output_channels));
        Ok(())
    }

    fn decode(&mut self, frame: &EncodedAVFrame) -> Result<Option<AudioFrame>> {
        let (rate, channels) = self
            .output
            .ok_or_else(|| MediaError::DecodeError("解码器尚未初始化".to_string()))?;
        let samples = (rate as i64 * frame.duration / 1000).max(0) as usize;
        let start = frame.pts as f64 / 1000.0;
        let mut data = Vec::with_capacity(samples * channels as usize);
        for n in 0..samples {
            let t = start + n as f64 / rate as f64;
            let value = (t * 440.0 * std::f64::consts::TAU).sin() as f32 * 0.1;
            for _ in 0..channels {
                data.push(value);
            }
        }
        Ok(Some(AudioFrame {
            pts: frame.pts,
            sample_rate: rate,
            channels,
            format: SampleFormat::F32,
            data,
        }))
    }

    fn clear_buffer(&mut self) {}

    fn name(&self) -> String {
        "synthetic-audio".to_string()
    }
}

/// 测试图案后端
pub struct SyntheticBackend {
    options: SyntheticOptions,
}

impl SyntheticBackend {
    pub fn new(options: SyntheticOptions) -> Self {
        Self { options }
    }

    pub fn from_url(url: &str) -> Result<Self> {
        Ok(Self::new(SyntheticOptions::parse(url)?))
    }

    pub fn options(&self) -> &SyntheticOptions {
        &self.options
    }
}

impl MediaBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn create_demuxer(&self) -> Result<Box<dyn MediaDemuxer>> {
        Ok(Box::new(SyntheticDemuxer::new(self.options.clone())))
    }

    fn create_video_decoder(&self) -> Result<Box<dyn VideoDecoder>> {
        Ok(Box::new(SyntheticVideoDecoder::new(self.options.fail_decoder)))
    }

    fn create_audio_decoder(&self) -> Result<Box<dyn AudioDecoder>> {
        Ok(Box::new(SyntheticAudioDecoder::new(self.options.fail_decoder)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened(url: &str) -> SyntheticDemuxer {
        let mut demuxer = SyntheticDemuxer::new(SyntheticOptions::parse(url).unwrap());
        demuxer.open().unwrap();
        demuxer
    }

    #[test]
    fn test_parse_options() {
        let options = SyntheticOptions::parse("synthetic://?duration=3000&fps=30&audio=0").unwrap();
        assert_eq!(options.duration_ms, 3000);
        assert_eq!(options.fps, 30);
        assert!(!options.audio);
        assert!(SyntheticOptions::parse("synthetic://?fps=abc").is_err());
        assert!(SyntheticOptions::parse("synthetic://?fps=0").is_err());
        assert!(SyntheticOptions::parse("file:///a.mp4").is_err());
        assert_eq!(SyntheticOptions::parse("synthetic://").unwrap(), SyntheticOptions::default());
    }

    #[test]
    fn test_frames_are_interleaved_by_timestamp() {
        let mut demuxer = opened("synthetic://?duration=400");
        let mut last = i64::MIN;
        let mut video = 0;
        let mut audio = 0;
        while let Some(frame) = demuxer.read_frame().unwrap() {
            assert!(frame.pts >= last);
            last = frame.pts;
            match frame.stream_type {
                StreamType::Video => video += 1,
                StreamType::Audio => audio += 1,
            }
        }
        assert_eq!(video, 10);
        assert_eq!(audio, 20);
    }

    #[test]
    fn test_keyframes_follow_gop() {
        let mut demuxer = opened("synthetic://?duration=3000&audio=0&gop=1000");
        let keyframes: Vec<i64> = std::iter::from_fn(|| demuxer.read_frame().unwrap())
            .filter(|f| f.is_keyframe)
            .map(|f| f.pts)
            .collect();
        assert_eq!(keyframes, vec![0, 1000, 2000]);
    }

    #[test]
    fn test_seek_lands_on_previous_keyframe() {
        let mut demuxer = opened("synthetic://?duration=5000");
        demuxer.seek(1500).unwrap();
        let frame = demuxer.read_frame_of(StreamType::Video).unwrap().unwrap();
        assert_eq!(frame.pts, 1000);
        assert!(frame.is_keyframe);

        demuxer.seek(99_999).unwrap();
        let frame = demuxer.read_frame_of(StreamType::Video).unwrap().unwrap();
        assert_eq!(frame.pts, 4000);
    }

    #[test]
    fn test_injected_read_failure() {
        let mut demuxer = opened("synthetic://?duration=5000&fail_read_at=100");
        let mut result = Ok(None);
        for _ in 0..100 {
            result = demuxer.read_frame();
            if result.is_err() {
                break;
            }
        }
        assert!(result.is_err());
    }

    #[test]
    fn test_video_decoder_waits_for_keyframe() {
        let mut demuxer = opened("synthetic://?duration=3000&audio=0");
        let mut decoder = SyntheticVideoDecoder::new(false);
        decoder.initialize(&demuxer.video_config().unwrap()).unwrap();

        demuxer.seek(0).unwrap();
        let key = demuxer.read_frame().unwrap().unwrap();
        let next = demuxer.read_frame().unwrap().unwrap();
        decoder.clear_buffer();
        assert!(decoder.decode(&next, 0, 0).unwrap().is_none());
        assert!(decoder.decode(&key, 0, 0).unwrap().is_some());
        let frame = decoder.decode(&next, 32, 18).unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (32, 18));
        assert_eq!(frame.data.len(), 32 * 18 * 4);
    }

    #[test]
    fn test_audio_decoder_output_format() {
        let mut decoder = SyntheticAudioDecoder::new(false);
        decoder.initialize(&AudioDecoderConfig::default(), 44100, 1).unwrap();
        let encoded = EncodedAVFrame {
            stream_type: StreamType::Audio,
            pts: 0,
            dts: 0,
            duration: 20,
            is_keyframe: true,
            data: Vec::new(),
        };
        let frame = decoder.decode(&encoded).unwrap().unwrap();
        assert_eq!(frame.data.len(), 882);
        assert_eq!(frame.duration_ms(), 20);
    }
}
