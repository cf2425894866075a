use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 媒体源类型
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    /// 本地文件路径
    LocalFile(PathBuf),

    /// 网络流 URL
    NetworkStream {
        url: String,
        protocol: StreamProtocol,
    },

    /// 内置测试图案源（synthetic://?duration=10000&fps=25&gop=1000&audio=1）
    Synthetic(String),
}

impl MediaSource {
    /// 从 URL 字符串解析媒体源
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("synthetic://") {
            MediaSource::Synthetic(url.to_string())
        } else if url.starts_with("rtsp://") {
            MediaSource::NetworkStream {
                url: url.to_string(),
                protocol: StreamProtocol::RTSP,
            }
        } else if url.starts_with("rtmp://") {
            MediaSource::NetworkStream {
                url: url.to_string(),
                protocol: StreamProtocol::RTMP,
            }
        } else if url.ends_with(".m3u8") || url.contains("/hls/") {
            MediaSource::NetworkStream {
                url: url.to_string(),
                protocol: StreamProtocol::HLS,
            }
        } else if url.starts_with("http://") || url.starts_with("https://") {
            MediaSource::NetworkStream {
                url: url.to_string(),
                protocol: StreamProtocol::HTTP,
            }
        } else {
            // 默认当作本地文件
            MediaSource::LocalFile(PathBuf::from(url))
        }
    }

    /// 判断是否为网络流
    pub fn is_network_stream(&self) -> bool {
        matches!(self, MediaSource::NetworkStream { .. })
    }

    /// 用于日志和 onOpenFailed 的名称
    pub fn name(&self) -> String {
        match self {
            MediaSource::LocalFile(path) => path.to_string_lossy().to_string(),
            MediaSource::NetworkStream { url, .. } => url.clone(),
            MediaSource::Synthetic(url) => url.clone(),
        }
    }
}

/// 流媒体协议类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProtocol {
    /// RTSP - 实时流协议（监控摄像头）
    RTSP,
    /// RTMP - 实时消息协议（直播流）
    RTMP,
    /// HLS - HTTP Live Streaming
    HLS,
    /// HTTP - 普通 HTTP 流
    HTTP,
}

impl StreamProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamProtocol::RTSP => "RTSP",
            StreamProtocol::RTMP => "RTMP",
            StreamProtocol::HLS => "HLS",
            StreamProtocol::HTTP => "HTTP",
        }
    }
}

/// 流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamType {
    Audio,
    Video,
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    RGB,
    YUV420P,
    NV12,
}

impl PixelFormat {
    /// 每像素字节数（平面格式按亮度平面计算）
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::RGBA => 4,
            PixelFormat::RGB => 3,
            PixelFormat::YUV420P | PixelFormat::NV12 => 1,
        }
    }
}

/// 音频采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    F32,
    I16,
}

static FRAME_NO: AtomicU64 = AtomicU64::new(0);

/// 解码后的视频帧
///
/// 由解码单元产生，通过 `Arc` 共享，渲染器最多消费一次后释放。
#[derive(Clone, Serialize, Deserialize)]
pub struct VideoFrame {
    pub frame_no: u64,
    pub pts: i64,           // 显示时间戳（毫秒）
    pub duration: i64,      // 帧持续时间（毫秒）
    pub width: u32,
    pub height: u32,
    pub stride: u32,        // 每行字节数
    pub format: PixelFormat,
    pub data: Vec<u8>,      // CPU 内存数据
}

impl VideoFrame {
    /// 创建视频帧，stride 按紧密排列计算
    pub fn new(pts: i64, width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            frame_no: FRAME_NO.fetch_add(1, Ordering::Relaxed),
            pts,
            duration: 0,
            width,
            height,
            stride: width * format.bytes_per_pixel(),
            format,
            data,
        }
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("frame_no", &self.frame_no)
            .field("pts", &self.pts)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// 音频帧数据
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub pts: i64,           // 显示时间戳（毫秒）
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub data: Vec<f32>,     // 统一使用 f32 交错格式
}

impl AudioFrame {
    /// 帧时长（毫秒）
    pub fn duration_ms(&self) -> i64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let samples = self.data.len() as i64 / self.channels as i64;
        samples * 1000 / self.sample_rate as i64
    }
}

/// 压缩数据帧（解封装器产出，解码单元消费）
#[derive(Debug, Clone)]
pub struct EncodedAVFrame {
    pub stream_type: StreamType,
    pub pts: i64,           // 毫秒
    pub dts: i64,           // 毫秒
    pub duration: i64,      // 毫秒
    pub is_keyframe: bool,
    pub data: Vec<u8>,
}

/// 后端私有的解码参数（例如 FFmpeg 的 codec parameters）
pub type BackendCodecData = Arc<dyn Any + Send + Sync>;

/// 视频解码配置
#[derive(Clone, Default)]
pub struct VideoDecoderConfig {
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
    pub backend_data: Option<BackendCodecData>,
}

impl fmt::Debug for VideoDecoderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoDecoderConfig")
            .field("codec_name", &self.codec_name)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// 音频解码配置
#[derive(Clone, Default)]
pub struct AudioDecoderConfig {
    pub codec_name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub backend_data: Option<BackendCodecData>,
}

impl fmt::Debug for AudioDecoderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioDecoderConfig")
            .field("codec_name", &self.codec_name)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish()
    }
}

/// 媒体信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: i64,          // 总时长（毫秒）
    pub start_time: i64,        // 起始时间（毫秒）
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl MediaInfo {
    pub fn has_audio(&self) -> bool {
        self.audio_codec != "none" && self.sample_rate > 0
    }
}

impl Default for MediaInfo {
    fn default() -> Self {
        Self {
            duration: 0,
            start_time: 0,
            width: 0,
            height: 0,
            fps: 0.0,
            video_codec: String::new(),
            audio_codec: "none".to_string(),
            sample_rate: 0,
            channels: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_source_from_url() {
        assert!(matches!(MediaSource::from_url("/tmp/a.mp4"), MediaSource::LocalFile(_)));
        assert!(MediaSource::from_url("https://a.com/v.mp4").is_network_stream());
        assert!(matches!(
            MediaSource::from_url("http://a.com/live/index.m3u8"),
            MediaSource::NetworkStream { protocol: StreamProtocol::HLS, .. }
        ));
        assert!(matches!(
            MediaSource::from_url("synthetic://?duration=1000"),
            MediaSource::Synthetic(_)
        ));
    }

    #[test]
    fn test_audio_frame_duration() {
        let frame = AudioFrame {
            pts: 0,
            sample_rate: 48000,
            channels: 2,
            format: SampleFormat::F32,
            data: vec![0.0; 960 * 2],
        };
        assert_eq!(frame.duration_ms(), 20);
    }

    #[test]
    fn test_video_frame_stride() {
        let frame = VideoFrame::new(40, 16, 8, PixelFormat::RGBA, vec![0; 16 * 8 * 4]);
        assert_eq!(frame.stride, 64);
        assert_eq!(frame.pts, 40);
    }
}
