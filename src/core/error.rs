use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("无法打开媒体源: {0}")]
    OpenError(String),

    #[error("无法找到视频流")]
    NoVideoStream,

    #[error("无法找到音频流")]
    NoAudioStream,

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("配置解析错误: {0}")]
    ConfigParseError(#[from] serde_json::Error),

    #[error("任务派发错误: {0}")]
    DispatchError(String),

    #[error("其他错误: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, MediaError>;

/// 流水线各阶段回调携带的状态值
///
/// 所有阶段内的失败都折叠为这个值沿回调链传递，失败是值而不是控制流。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStatus {
    Ok,
    DemuxerOpenFailed,
    DemuxerReadFailed,
    DemuxerSeekFailed,
    AudioRendererInitFailed,
    VideoRendererInitFailed,
    DecoderInitFailed,
    PreviewInitFailed,
}

impl PipelineStatus {
    pub fn is_ok(self) -> bool {
        self == PipelineStatus::Ok
    }

    /// 稳定的错误码（onOpenFailed 使用）
    pub fn code(self) -> i32 {
        match self {
            PipelineStatus::Ok => 0,
            PipelineStatus::DemuxerOpenFailed => 1,
            PipelineStatus::DemuxerReadFailed => 2,
            PipelineStatus::DemuxerSeekFailed => 3,
            PipelineStatus::AudioRendererInitFailed => 4,
            PipelineStatus::VideoRendererInitFailed => 5,
            PipelineStatus::DecoderInitFailed => 6,
            PipelineStatus::PreviewInitFailed => 7,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            PipelineStatus::Ok => "正常",
            PipelineStatus::DemuxerOpenFailed => "无法打开媒体源或解析流信息",
            PipelineStatus::DemuxerReadFailed => "读取媒体数据失败",
            PipelineStatus::DemuxerSeekFailed => "Seek 失败",
            PipelineStatus::AudioRendererInitFailed => "音频渲染器初始化失败",
            PipelineStatus::VideoRendererInitFailed => "视频渲染器初始化失败",
            PipelineStatus::DecoderInitFailed => "解码器初始化失败",
            PipelineStatus::PreviewInitFailed => "预览流水线初始化失败",
        }
    }

    /// 初始化阶段的失败（打开失败），区别于播放中的 IO 失败
    pub fn is_init_failure(self) -> bool {
        matches!(
            self,
            PipelineStatus::DemuxerOpenFailed
                | PipelineStatus::AudioRendererInitFailed
                | PipelineStatus::VideoRendererInitFailed
                | PipelineStatus::DecoderInitFailed
        )
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.description(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_distinct() {
        let all = [
            PipelineStatus::Ok,
            PipelineStatus::DemuxerOpenFailed,
            PipelineStatus::DemuxerReadFailed,
            PipelineStatus::DemuxerSeekFailed,
            PipelineStatus::AudioRendererInitFailed,
            PipelineStatus::VideoRendererInitFailed,
            PipelineStatus::DecoderInitFailed,
            PipelineStatus::PreviewInitFailed,
        ];
        let mut codes: Vec<i32> = all.iter().map(|s| s.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
        assert!(PipelineStatus::Ok.is_ok());
        assert!(!PipelineStatus::DemuxerReadFailed.is_init_failure());
        assert!(PipelineStatus::DemuxerOpenFailed.is_init_failure());
    }
}
