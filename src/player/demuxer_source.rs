use crate::core::{AudioDecoderConfig, EncodedAVFrame, MediaInfo, Result, StreamType, VideoDecoderConfig};

/// 格式层解封装接口
///
/// 不同的后端（FFmpeg、内置测试图案源等）实现这个接口。
/// 所有方法都是阻塞的，只能在 Demux / Decode / Work 队列上调用。
pub trait MediaDemuxer: Send {
    /// 打开并探测媒体，返回媒体信息
    ///
    /// 没有视频流时返回 `MediaError::NoVideoStream`。
    fn open(&mut self) -> Result<MediaInfo>;

    /// 读取下一个压缩帧
    ///
    /// 返回：
    /// - Ok(Some(frame)): 成功读取一帧（音频或视频）
    /// - Ok(None): 到达末尾
    /// - Err(e): 读取错误
    fn read_frame(&mut self) -> Result<Option<EncodedAVFrame>>;

    /// Seek 到指定位置（毫秒），落在该位置之前最近的关键帧
    fn seek(&mut self, timestamp_ms: i64) -> Result<()>;

    fn video_config(&self) -> Option<VideoDecoderConfig>;

    fn audio_config(&self) -> Option<AudioDecoderConfig>;

    /// 媒体起始时间（毫秒）
    fn start_time(&self) -> i64 {
        0
    }

    fn is_seekable(&self) -> bool {
        true
    }

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;

    /// 跳过其他流，读取下一个指定类型的帧
    fn read_frame_of(&mut self, stream_type: StreamType) -> Result<Option<EncodedAVFrame>> {
        loop {
            match self.read_frame()? {
                Some(frame) if frame.stream_type == stream_type => return Ok(Some(frame)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }
}
