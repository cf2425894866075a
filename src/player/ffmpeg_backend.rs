use crate::core::{log_ctx, MediaError, MediaSource, NetworkConfig, Result};
use crate::player::backend::MediaBackend;
use crate::player::decoder::{AudioDecoder, VideoDecoder};
use crate::player::demuxer_source::MediaDemuxer;
use crate::player::ffmpeg_decoder::{FFmpegAudioDecoder, FFmpegVideoDecoder};
use crate::player::ffmpeg_demuxer::FFmpegDemuxer;
use ffmpeg_next as ffmpeg;
use log::info;
use std::sync::Once;

static FFMPEG_INIT: Once = Once::new();

/// FFmpeg 后端：本地文件走自定义 I/O，网络流走 FFmpeg 自带协议
pub struct FFmpegBackend {
    source: MediaSource,
    network: NetworkConfig,
}

impl FFmpegBackend {
    pub fn new(source: MediaSource, network: NetworkConfig) -> Result<Self> {
        let mut init_result = Ok(());
        FFMPEG_INIT.call_once(|| {
            init_result = ffmpeg::init();
            if init_result.is_ok() {
                info!("{} ✅ FFmpeg 初始化成功", log_ctx());
            }
        });
        init_result?;
        Ok(Self { source, network })
    }
}

impl MediaBackend for FFmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn create_demuxer(&self) -> Result<Box<dyn MediaDemuxer>> {
        match &self.source {
            MediaSource::LocalFile(path) => Ok(Box::new(FFmpegDemuxer::from_file(path.clone()))),
            MediaSource::NetworkStream { url, protocol } => {
                info!("{} 🌐 {} 流: {}", log_ctx(), protocol.as_str(), url);
                Ok(Box::new(FFmpegDemuxer::from_url(url.clone(), self.network.clone())))
            }
            MediaSource::Synthetic(url) => Err(MediaError::OpenError(format!(
                "FFmpeg 后端不支持测试源: {}",
                url
            ))),
        }
    }

    fn create_video_decoder(&self) -> Result<Box<dyn VideoDecoder>> {
        Ok(Box::new(FFmpegVideoDecoder::new()))
    }

    fn create_audio_decoder(&self) -> Result<Box<dyn AudioDecoder>> {
        Ok(Box::new(FFmpegAudioDecoder::new()))
    }
}
