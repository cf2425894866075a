use crate::core::{log_ctx, EngineConfig, MediaSource, Result};
use crate::player::decoder::{AudioDecoder, VideoDecoder};
use crate::player::demuxer_source::MediaDemuxer;
use crate::player::synthetic::SyntheticBackend;
use log::info;
use std::sync::Arc;

/// 媒体后端：为一个媒体源创建解封装器和解码器
///
/// 每次调用 `create_demuxer` 都得到独立的实例（预览流水线和主流水线互不干扰）。
pub trait MediaBackend: Send + Sync {
    fn name(&self) -> &str;

    fn create_demuxer(&self) -> Result<Box<dyn MediaDemuxer>>;

    fn create_video_decoder(&self) -> Result<Box<dyn VideoDecoder>>;

    fn create_audio_decoder(&self) -> Result<Box<dyn AudioDecoder>>;
}

/// 根据媒体源选择后端
pub fn backend_for_source(source: &MediaSource, config: &EngineConfig) -> Result<Arc<dyn MediaBackend>> {
    let backend: Arc<dyn MediaBackend> = match source {
        MediaSource::Synthetic(url) => Arc::new(SyntheticBackend::from_url(url)?),
        #[cfg(feature = "ffmpeg")]
        _ => Arc::new(crate::player::ffmpeg_backend::FFmpegBackend::new(
            source.clone(),
            config.network.clone(),
        )?),
        #[cfg(not(feature = "ffmpeg"))]
        _ => {
            let _ = config;
            return Err(crate::core::MediaError::OpenError(format!(
                "未启用 ffmpeg 特性，无法打开: {}",
                source.name()
            )));
        }
    };
    info!("{} 🧩 使用 {} 后端: {}", log_ctx(), backend.name(), source.name());
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MediaError;

    #[test]
    fn test_synthetic_source_selects_synthetic_backend() {
        let source = MediaSource::from_url("synthetic://?duration=1000");
        let backend = backend_for_source(&source, &EngineConfig::default()).unwrap();
        assert_eq!(backend.name(), "synthetic");
        let mut a = backend.create_demuxer().unwrap();
        let mut b = backend.create_demuxer().unwrap();
        assert_eq!(a.open().unwrap(), b.open().unwrap());
    }

    #[test]
    fn test_bad_synthetic_url_is_rejected() {
        let source = MediaSource::from_url("synthetic://?fps=0");
        assert!(backend_for_source(&source, &EngineConfig::default()).is_err());
    }

    #[cfg(not(feature = "ffmpeg"))]
    #[test]
    fn test_file_source_needs_ffmpeg() {
        let source = MediaSource::from_url("/tmp/video.mp4");
        assert!(matches!(
            backend_for_source(&source, &EngineConfig::default()),
            Err(MediaError::OpenError(_))
        ));
    }
}
