use crate::core::{log_ctx, AudioFrame, EncodedAVFrame, MediaError, Result, StreamType, VideoFrame};
use crate::player::decoder::{AudioDecoder, VideoDecoder};
use crate::player::demuxer::{DemuxerStream, ReadResult};
use crate::runtime::{Dispatcher, QueueId};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type FrameReadCallback<T> = Box<dyn FnOnce(ReadResult<T>) + Send>;

/// 解码单元：把某个流的压缩帧变成可渲染的帧
pub trait StreamDecoder: Send + 'static {
    type Output: Send + 'static;

    fn stream_type(&self) -> StreamType;

    fn initialize(&mut self, input: &DemuxerStream) -> Result<()>;

    fn decode(&mut self, frame: &EncodedAVFrame) -> Result<Option<Self::Output>>;

    fn clear_buffer(&mut self);

    fn name(&self) -> String;
}

/// 视频解码单元（可指定输出尺寸）
pub struct VideoDecodeUnit {
    decoder: Box<dyn VideoDecoder>,
    width: u32,
    height: u32,
}

impl VideoDecodeUnit {
    pub fn new(decoder: Box<dyn VideoDecoder>) -> Self {
        Self {
            decoder,
            width: 0,
            height: 0,
        }
    }

    pub fn with_output_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

impl StreamDecoder for VideoDecodeUnit {
    type Output = Arc<VideoFrame>;

    fn stream_type(&self) -> StreamType {
        StreamType::Video
    }

    fn initialize(&mut self, input: &DemuxerStream) -> Result<()> {
        let config = input.video_config().ok_or(MediaError::NoVideoStream)?;
        self.decoder.initialize(&config)?;
        info!("{} 🎞️  视频解码器就绪: {} ({:?})", log_ctx(), self.decoder.name(), config);
        Ok(())
    }

    fn decode(&mut self, frame: &EncodedAVFrame) -> Result<Option<Arc<VideoFrame>>> {
        Ok(self.decoder.decode(frame, self.width, self.height)?.map(Arc::new))
    }

    fn clear_buffer(&mut self) {
        self.decoder.clear_buffer();
    }

    fn name(&self) -> String {
        self.decoder.name()
    }
}

/// 音频解码单元，输出格式由音频设备决定
pub struct AudioDecodeUnit {
    decoder: Box<dyn AudioDecoder>,
    output_rate: u32,
    output_channels: u16,
}

impl AudioDecodeUnit {
    pub fn new(decoder: Box<dyn AudioDecoder>) -> Self {
        Self {
            decoder,
            output_rate: 48000,
            output_channels: 2,
        }
    }

    pub fn set_output_format(&mut self, sample_rate: u32, channels: u16) {
        self.output_rate = sample_rate;
        self.output_channels = channels;
    }
}

impl StreamDecoder for AudioDecodeUnit {
    type Output = AudioFrame;

    fn stream_type(&self) -> StreamType {
        StreamType::Audio
    }

    fn initialize(&mut self, input: &DemuxerStream) -> Result<()> {
        let config = input.audio_config().ok_or(MediaError::NoAudioStream)?;
        self.decoder
            .initialize(&config, self.output_rate, self.output_channels)?;
        info!(
            "{} 🔊 音频解码器就绪: {} ({:?} → {}Hz/{}ch)",
            log_ctx(),
            self.decoder.name(),
            config,
            self.output_rate,
            self.output_channels
        );
        Ok(())
    }

    fn decode(&mut self, frame: &EncodedAVFrame) -> Result<Option<AudioFrame>> {
        self.decoder.decode(frame)
    }

    fn clear_buffer(&mut self) {
        self.decoder.clear_buffer();
    }

    fn name(&self) -> String {
        self.decoder.name()
    }
}

struct FrameStreamShared<D: StreamDecoder> {
    dispatcher: Arc<Dispatcher>,
    decoder: Mutex<D>,
    input: Mutex<Option<DemuxerStream>>,
    /// 每次清空递增，旧一代的读取在下一步被取消
    generation: AtomicU64,
    decode_errors: AtomicU64,
}

impl<D: StreamDecoder> FrameStreamShared<D> {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn read_step(self: Arc<Self>, generation: u64, callback: FrameReadCallback<D::Output>) {
        if !self.is_current(generation) {
            callback(ReadResult::Aborted);
            return;
        }
        let Some(input) = self.input.lock().clone() else {
            warn!("{} ⚠️  解码流尚未初始化，读取被取消", log_ctx());
            callback(ReadResult::Aborted);
            return;
        };
        let shared = self.clone();
        input.read(Box::new(move |result| {
            shared.on_encoded_frame(generation, result, callback)
        }));
    }

    fn on_encoded_frame(
        self: Arc<Self>,
        generation: u64,
        result: ReadResult<EncodedAVFrame>,
        callback: FrameReadCallback<D::Output>,
    ) {
        let encoded = match result {
            ReadResult::Ready(encoded) => encoded,
            ReadResult::EndOfStream => return callback(ReadResult::EndOfStream),
            ReadResult::Aborted => return callback(ReadResult::Aborted),
            ReadResult::Failed(status) => return callback(ReadResult::Failed(status)),
        };
        if !self.is_current(generation) {
            callback(ReadResult::Aborted);
            return;
        }

        let decoded = self.decoder.lock().decode(&encoded);
        match decoded {
            Ok(Some(frame)) => callback(ReadResult::Ready(frame)),
            Ok(None) => self.post_next(generation, callback),
            Err(e) => {
                let errors = self.decode_errors.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "{} ⚠️  解码失败（已跳过，pts={}ms，累计 {} 次）: {}",
                    log_ctx(),
                    encoded.pts,
                    errors,
                    e
                );
                self.post_next(generation, callback);
            }
        }
    }

    /// 没有产出时重新投递，而不是在回调里递归读取
    fn post_next(self: Arc<Self>, generation: u64, callback: FrameReadCallback<D::Output>) {
        let dispatcher = self.dispatcher.clone();
        if let Err(e) = dispatcher.post_task(QueueId::Decode, move || self.read_step(generation, callback)) {
            debug!("{} 解码续读未能投递: {}", log_ctx(), e);
        }
    }
}

/// 解码流：从解封装流读取并解码，直到产出一帧
pub struct FrameStream<D: StreamDecoder> {
    shared: Arc<FrameStreamShared<D>>,
}

impl<D: StreamDecoder> Clone for FrameStream<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

pub type VideoFrameStream = FrameStream<VideoDecodeUnit>;
pub type AudioFrameStream = FrameStream<AudioDecodeUnit>;

impl<D: StreamDecoder> FrameStream<D> {
    pub fn new(dispatcher: Arc<Dispatcher>, decoder: D) -> Self {
        Self {
            shared: Arc::new(FrameStreamShared {
                dispatcher,
                decoder: Mutex::new(decoder),
                input: Mutex::new(None),
                generation: AtomicU64::new(0),
                decode_errors: AtomicU64::new(0),
            }),
        }
    }

    /// 绑定解封装流并初始化解码器（在 Decode 队列上调用）
    pub fn initialize(&self, input: DemuxerStream) -> Result<()> {
        if input.stream_type() != self.shared.decoder.lock().stream_type() {
            return Err(MediaError::Other(format!(
                "解码流类型不匹配: {:?}",
                input.stream_type()
            )));
        }
        self.shared.decoder.lock().initialize(&input)?;
        *self.shared.input.lock() = Some(input);
        Ok(())
    }

    /// 读取下一帧解码结果
    pub fn read(&self, callback: FrameReadCallback<D::Output>) {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        self.shared.clone().read_step(generation, callback);
    }

    /// 丢弃解码器缓存，进行中的读取在下一步被取消
    pub fn clear_buffer(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.decoder.lock().clear_buffer();
    }

    /// 访问解码单元（设置输出格式等）
    pub fn with_decoder<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut self.shared.decoder.lock())
    }

    pub fn decode_errors(&self) -> u64 {
        self.shared.decode_errors.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> String {
        self.shared.decoder.lock().name()
    }
}
