use crate::core::{
    log_ctx, AudioDecoderConfig, EncodedAVFrame, MediaError, MediaInfo, NetworkConfig, Result,
    StreamType, VideoDecoderConfig,
};
use crate::player::byte_source::{ByteSource, FileSource};
use crate::player::demuxer_source::MediaDemuxer;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{ffi, format, media, Rational};
use log::{debug, info, warn};
use std::io::SeekFrom;
use std::os::raw::{c_int, c_void};
use std::path::PathBuf;
use std::ptr;
use std::sync::Arc;

const AVIO_BUFFER_SIZE: usize = 64 * 1024;

/// 传给解码器的 codec parameters
///
/// 参数是深拷贝出来的，不再引用解封装上下文，只在解码线程上被读取。
pub struct CodecParameters(pub ffmpeg::codec::Parameters);

unsafe impl Send for CodecParameters {}
unsafe impl Sync for CodecParameters {}

unsafe extern "C" fn avio_read(opaque: *mut c_void, buf: *mut u8, buf_size: c_int) -> c_int {
    let source = &mut *(opaque as *mut Box<dyn ByteSource>);
    let out = std::slice::from_raw_parts_mut(buf, buf_size.max(0) as usize);
    match source.read(out) {
        Ok(0) => ffi::AVERROR_EOF,
        Ok(n) => n as c_int,
        Err(e) => {
            warn!("{} ⚠️  字节源读取失败: {}", log_ctx(), e);
            ffi::AVERROR_EXTERNAL
        }
    }
}

unsafe extern "C" fn avio_seek(opaque: *mut c_void, offset: i64, whence: c_int) -> i64 {
    let source = &mut *(opaque as *mut Box<dyn ByteSource>);
    if whence & ffi::AVSEEK_SIZE as c_int != 0 {
        return source.size().map_or(-1, |size| size as i64);
    }
    let pos = match whence & !(ffi::AVSEEK_FORCE as c_int) {
        0 => SeekFrom::Start(offset.max(0) as u64),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return -1,
    };
    match source.seek(pos) {
        Ok(position) => position as i64,
        Err(e) => {
            warn!("{} ⚠️  字节源 Seek 失败: {}", log_ctx(), e);
            -1
        }
    }
}

/// 自定义 I/O 上下文：FFmpeg 通过它从 `ByteSource` 拉取数据
struct AvioAdapter {
    ctx: *mut ffi::AVIOContext,
    opaque: *mut Box<dyn ByteSource>,
}

impl AvioAdapter {
    fn new(source: Box<dyn ByteSource>) -> Result<Self> {
        let opaque = Box::into_raw(Box::new(source));
        unsafe {
            let buffer = ffi::av_malloc(AVIO_BUFFER_SIZE) as *mut u8;
            if buffer.is_null() {
                drop(Box::from_raw(opaque));
                return Err(MediaError::OpenError("分配 AVIO 缓冲失败".to_string()));
            }
            let ctx = ffi::avio_alloc_context(
                buffer,
                AVIO_BUFFER_SIZE as c_int,
                0,
                opaque as *mut c_void,
                Some(avio_read),
                None,
                Some(avio_seek),
            );
            if ctx.is_null() {
                ffi::av_free(buffer as *mut c_void);
                drop(Box::from_raw(opaque));
                return Err(MediaError::OpenError("创建 AVIO 上下文失败".to_string()));
            }
            Ok(Self { ctx, opaque })
        }
    }

    /// 用自定义 I/O 打开输入
    fn open_input(&self, name: &str) -> Result<format::context::Input> {
        unsafe {
            let mut fmt_ctx = ffi::avformat_alloc_context();
            if fmt_ctx.is_null() {
                return Err(MediaError::OpenError("创建格式上下文失败".to_string()));
            }
            (*fmt_ctx).pb = self.ctx;
            (*fmt_ctx).flags |= ffi::AVFMT_FLAG_CUSTOM_IO as c_int;

            let url = std::ffi::CString::new(name)
                .map_err(|_| MediaError::OpenError(format!("无效的名称: {}", name)))?;
            let ret = ffi::avformat_open_input(&mut fmt_ctx, url.as_ptr(), ptr::null(), ptr::null_mut());
            if ret < 0 {
                // 失败时 avformat_open_input 已经释放了 fmt_ctx
                return Err(MediaError::FFmpegError(ffmpeg::Error::from(ret)));
            }
            let ret = ffi::avformat_find_stream_info(fmt_ctx, ptr::null_mut());
            if ret < 0 {
                ffi::avformat_close_input(&mut fmt_ctx);
                return Err(MediaError::FFmpegError(ffmpeg::Error::from(ret)));
            }
            Ok(format::context::Input::wrap(fmt_ctx))
        }
    }
}

impl Drop for AvioAdapter {
    fn drop(&mut self) {
        unsafe {
            if !self.ctx.is_null() {
                ffi::av_freep(&mut (*self.ctx).buffer as *mut *mut u8 as *mut c_void);
                ffi::avio_context_free(&mut self.ctx);
            }
            drop(Box::from_raw(self.opaque));
        }
    }
}

/// 输入来源
pub enum FFmpegInput {
    /// 本地文件，经过自定义 I/O 读取
    File(PathBuf),
    /// 任意字节源
    Bytes {
        name: String,
        source: Option<Box<dyn ByteSource>>,
    },
    /// 网络 URL，使用 FFmpeg 自带的协议
    Url { url: String, network: NetworkConfig },
}

impl FFmpegInput {
    fn name(&self) -> String {
        match self {
            FFmpegInput::File(path) => path.display().to_string(),
            FFmpegInput::Bytes { name, .. } => name.clone(),
            FFmpegInput::Url { url, .. } => url.clone(),
        }
    }
}

/// 网络流打开选项
fn network_options(url: &str, network: &NetworkConfig) -> ffmpeg::Dictionary<'static> {
    let mut options = ffmpeg::Dictionary::new();
    // discardcorrupt: 丢弃损坏的帧; genpts: 生成 PTS
    options.set("fflags", "+discardcorrupt+genpts");
    options.set("analyzeduration", &network.analyze_duration_us.to_string());
    options.set("probesize", &network.probe_size.to_string());
    options.set("timeout", &network.open_timeout_us.to_string());
    options.set("rw_timeout", &network.rw_timeout_us.to_string());
    options.set("buffer_size", "8388608");
    if network.reconnect {
        options.set("reconnect", "1");
        options.set("reconnect_streamed", "1");
        options.set("reconnect_delay_max", &network.reconnect_delay_max_s.to_string());
    }
    if url.starts_with("rtsp://") {
        options.set("rtsp_transport", "tcp");
        options.set("stimeout", &network.rw_timeout_us.to_string());
    }
    if url.contains(".m3u8") {
        info!("{} 🎬 HLS 流检测，应用 HLS 选项", log_ctx());
        options.set("live_start_index", "-1");
        options.set("max_reload", "10");
        options.set("http_persistent", "1");
    }
    options
}

fn to_ms(value: i64, time_base: Rational) -> i64 {
    if time_base.denominator() == 0 {
        return 0;
    }
    (value as f64 * time_base.numerator() as f64 / time_base.denominator() as f64 * 1000.0) as i64
}

/// FFmpeg 解封装器
pub struct FFmpegDemuxer {
    input: FFmpegInput,
    // 字段顺序：格式上下文先于自定义 I/O 释放
    context: Option<format::context::Input>,
    avio: Option<AvioAdapter>,
    video_index: Option<usize>,
    audio_index: Option<usize>,
    video_time_base: Rational,
    audio_time_base: Rational,
    start_time: i64,
    video_config: Option<VideoDecoderConfig>,
    audio_config: Option<AudioDecoderConfig>,
}

// 格式上下文只在持有解封装器锁的单个线程上使用
unsafe impl Send for FFmpegDemuxer {}

impl FFmpegDemuxer {
    pub fn new(input: FFmpegInput) -> Self {
        Self {
            input,
            context: None,
            avio: None,
            video_index: None,
            audio_index: None,
            video_time_base: Rational(1, 1000),
            audio_time_base: Rational(1, 1000),
            start_time: 0,
            video_config: None,
            audio_config: None,
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::new(FFmpegInput::File(path.into()))
    }

    pub fn from_url(url: impl Into<String>, network: NetworkConfig) -> Self {
        Self::new(FFmpegInput::Url {
            url: url.into(),
            network,
        })
    }

    pub fn from_byte_source(name: impl Into<String>, source: Box<dyn ByteSource>) -> Self {
        Self::new(FFmpegInput::Bytes {
            name: name.into(),
            source: Some(source),
        })
    }

    fn open_context(&mut self) -> Result<format::context::Input> {
        let name = self.input.name();
        match &mut self.input {
            FFmpegInput::File(path) => {
                let avio = AvioAdapter::new(Box::new(FileSource::open(path.as_path())?))?;
                let context = avio.open_input(&name)?;
                self.avio = Some(avio);
                Ok(context)
            }
            FFmpegInput::Bytes { source, .. } => {
                let source = source
                    .take()
                    .ok_or_else(|| MediaError::OpenError(format!("字节源已被使用: {}", name)))?;
                let avio = AvioAdapter::new(source)?;
                let context = avio.open_input(&name)?;
                self.avio = Some(avio);
                Ok(context)
            }
            FFmpegInput::Url { url, network } => {
                info!("{} 🌐 打开网络流: {}", log_ctx(), url);
                let options = network_options(url, network);
                format::input_with_dictionary(&url.as_str(), options)
                    .map_err(|e| MediaError::OpenError(format!("无法打开网络流: {}", e)))
            }
        }
    }

    fn probe(&mut self, context: &format::context::Input) -> Result<MediaInfo> {
        let video_stream = context
            .streams()
            .best(media::Type::Video)
            .ok_or(MediaError::NoVideoStream)?;
        let video_params = video_stream.parameters();
        let video_codec = video_params.id().name().to_string();
        let video_decoder = ffmpeg::codec::context::Context::from_parameters(video_params.clone())?
            .decoder()
            .video()?;
        let fps = video_stream.avg_frame_rate();
        let fps = if fps.denominator() == 0 {
            0.0
        } else {
            fps.numerator() as f64 / fps.denominator() as f64
        };

        self.video_index = Some(video_stream.index());
        self.video_time_base = video_stream.time_base();
        self.start_time = if video_stream.start_time() == ffi::AV_NOPTS_VALUE {
            0
        } else {
            to_ms(video_stream.start_time(), video_stream.time_base())
        };
        self.video_config = Some(VideoDecoderConfig {
            codec_name: video_codec.clone(),
            width: video_decoder.width(),
            height: video_decoder.height(),
            backend_data: Some(Arc::new(CodecParameters(video_params.clone()))),
        });

        let mut info = MediaInfo {
            duration: context.duration().max(0) / 1000,
            start_time: self.start_time,
            width: video_decoder.width(),
            height: video_decoder.height(),
            fps,
            video_codec,
            ..MediaInfo::default()
        };

        if let Some(audio_stream) = context.streams().best(media::Type::Audio) {
            let audio_params = audio_stream.parameters();
            let codec_name = audio_params.id().name().to_string();
            let audio_decoder = ffmpeg::codec::context::Context::from_parameters(audio_params.clone())?
                .decoder()
                .audio()?;
            self.audio_index = Some(audio_stream.index());
            self.audio_time_base = audio_stream.time_base();
            self.audio_config = Some(AudioDecoderConfig {
                codec_name: codec_name.clone(),
                sample_rate: audio_decoder.rate(),
                channels: audio_decoder.channels(),
                backend_data: Some(Arc::new(CodecParameters(audio_params.clone()))),
            });
            info.audio_codec = codec_name;
            info.sample_rate = audio_decoder.rate();
            info.channels = audio_decoder.channels();
        }
        Ok(info)
    }
}

impl MediaDemuxer for FFmpegDemuxer {
    fn open(&mut self) -> Result<MediaInfo> {
        let context = self.open_context()?;
        let info = self.probe(&context)?;
        debug!(
            "{} 视频流索引: {:?}, 音频流索引: {:?}",
            log_ctx(),
            self.video_index,
            self.audio_index
        );
        self.context = Some(context);
        Ok(info)
    }

    fn read_frame(&mut self) -> Result<Option<EncodedAVFrame>> {
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| MediaError::OpenError("解封装器尚未打开".to_string()))?;
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(context) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => return Err(e.into()),
            }

            let index = packet.stream();
            let (stream_type, time_base) = if Some(index) == self.video_index {
                (StreamType::Video, self.video_time_base)
            } else if Some(index) == self.audio_index {
                (StreamType::Audio, self.audio_time_base)
            } else {
                // 跳过其他流
                continue;
            };
            let pts = packet.pts().or(packet.dts()).unwrap_or(0);
            return Ok(Some(EncodedAVFrame {
                stream_type,
                pts: to_ms(pts, time_base),
                dts: to_ms(packet.dts().unwrap_or(pts), time_base),
                duration: to_ms(packet.duration(), time_base),
                is_keyframe: packet.is_key(),
                data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
            }));
        }
    }

    fn seek(&mut self, timestamp_ms: i64) -> Result<()> {
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| MediaError::OpenError("解封装器尚未打开".to_string()))?;
        let timestamp = timestamp_ms * 1000; // 毫秒转微秒
        context.seek(timestamp, ..timestamp)?;
        Ok(())
    }

    fn video_config(&self) -> Option<VideoDecoderConfig> {
        self.video_config.clone()
    }

    fn audio_config(&self) -> Option<AudioDecoderConfig> {
        self.audio_config.clone()
    }

    fn start_time(&self) -> i64 {
        self.start_time
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.input.name())
    }
}
