use crate::core::{AudioDecoderConfig, AudioFrame, EncodedAVFrame, Result, VideoDecoderConfig, VideoFrame};

/// 视频解码器接口
///
/// 一次 `decode` 喂入一个压缩帧，可能还不能产出画面（需要更多输入，
/// 或者清空后还没遇到关键帧），此时返回 `Ok(None)`。
pub trait VideoDecoder: Send {
    fn initialize(&mut self, config: &VideoDecoderConfig) -> Result<()>;

    /// 解码，`width` / `height` 为 0 时输出原始尺寸
    fn decode(&mut self, frame: &EncodedAVFrame, width: u32, height: u32) -> Result<Option<VideoFrame>>;

    /// 丢弃内部缓存的帧（Seek 时调用）
    fn clear_buffer(&mut self);

    fn name(&self) -> String;
}

/// 音频解码器接口，输出重采样到指定格式的 f32 交错数据
pub trait AudioDecoder: Send {
    fn initialize(&mut self, config: &AudioDecoderConfig, output_rate: u32, output_channels: u16) -> Result<()>;

    fn decode(&mut self, frame: &EncodedAVFrame) -> Result<Option<AudioFrame>>;

    fn clear_buffer(&mut self);

    fn name(&self) -> String;
}
