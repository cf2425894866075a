use crate::core::{log_ctx, PipelineStatus, StreamType, VideoFrame};
use crate::player::backend::MediaBackend;
use crate::player::decoder::VideoDecoder;
use crate::player::demuxer_source::MediaDemuxer;
use crate::runtime::{Dispatcher, QueueId};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// 预览关键帧回调（Main 队列）
pub type KeyFrameCallback = Arc<dyn Fn(i64, Arc<VideoFrame>) + Send + Sync>;

struct PreviewUnit {
    demuxer: Box<dyn MediaDemuxer>,
    decoder: Box<dyn VideoDecoder>,
}

impl PreviewUnit {
    /// 定位后连续解码，直到得到第一幅画面
    fn extract(&mut self, timestamp_ms: i64, width: u32, height: u32, max_frames: usize) -> Option<VideoFrame> {
        if let Err(e) = self.demuxer.seek(timestamp_ms) {
            warn!("{} ⚠️  预览 Seek 到 {}ms 失败: {}", log_ctx(), timestamp_ms, e);
            return None;
        }
        self.decoder.clear_buffer();

        for _ in 0..max_frames {
            let encoded = match self.demuxer.read_frame_of(StreamType::Video) {
                Ok(Some(encoded)) => encoded,
                Ok(None) => return None,
                Err(e) => {
                    warn!("{} ⚠️  预览读取失败: {}", log_ctx(), e);
                    return None;
                }
            };
            match self.decoder.decode(&encoded, width, height) {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => continue,
                Err(e) => debug!("{} 预览解码跳过一帧: {}", log_ctx(), e),
            }
        }
        warn!("{} ⚠️  预览解码 {} 帧仍未得到画面", log_ctx(), max_frames);
        None
    }
}

struct PreviewShared {
    dispatcher: Arc<Dispatcher>,
    backend: Arc<dyn MediaBackend>,
    max_decode_frames: usize,
    unit: Mutex<Option<PreviewUnit>>,
    /// 同一时刻只服务一个请求
    working: AtomicBool,
    stopped: AtomicBool,
    on_key_frame: Mutex<Option<KeyFrameCallback>>,
}

impl PreviewShared {
    fn open_unit(&self) -> crate::core::Result<PreviewUnit> {
        let mut demuxer = self.backend.create_demuxer()?;
        demuxer.open()?;
        let config = demuxer
            .video_config()
            .ok_or(crate::core::MediaError::NoVideoStream)?;
        let mut decoder = self.backend.create_video_decoder()?;
        decoder.initialize(&config)?;
        Ok(PreviewUnit { demuxer, decoder })
    }

    fn deliver(self: &Arc<Self>, timestamp_ms: i64, frame: VideoFrame) {
        let shared = self.clone();
        let frame = Arc::new(frame);
        let posted = self.dispatcher.post_task(QueueId::Main, move || {
            let callback = shared.on_key_frame.lock().clone();
            if let Some(callback) = callback {
                if !shared.stopped.load(Ordering::SeqCst) {
                    callback(timestamp_ms, frame);
                }
            }
            shared.working.store(false, Ordering::SeqCst);
        });
        if let Err(e) = posted {
            warn!("{} ⚠️  预览结果投递失败: {}", log_ctx(), e);
            self.working.store(false, Ordering::SeqCst);
        }
    }
}

/// 拖动预览流水线
///
/// 持有独立的解封装器和视频解码器，在 Work 队列上按需提取某个时间点附近的画面，
/// 与正在进行的播放互不干扰。请求在途时到达的新请求直接丢弃，只有最新的拖动位置有意义。
pub struct VideoPreviewPipeline {
    shared: Arc<PreviewShared>,
}

impl VideoPreviewPipeline {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        backend: Arc<dyn MediaBackend>,
        max_decode_frames: usize,
        on_key_frame: KeyFrameCallback,
    ) -> Self {
        Self {
            shared: Arc::new(PreviewShared {
                dispatcher,
                backend,
                max_decode_frames: max_decode_frames.max(1),
                unit: Mutex::new(None),
                working: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                on_key_frame: Mutex::new(Some(on_key_frame)),
            }),
        }
    }

    /// 在 Work 队列上打开预览用的解封装器和解码器
    pub fn initialize(&self) {
        let shared = self.shared.clone();
        let posted = self.shared.dispatcher.post_task(QueueId::Work, move || {
            if shared.stopped.load(Ordering::SeqCst) {
                return;
            }
            match shared.open_unit() {
                Ok(unit) => {
                    *shared.unit.lock() = Some(unit);
                    info!("{} ✅ 预览流水线初始化完成", log_ctx());
                }
                Err(e) => error!(
                    "{} ❌ {} (code {}): {}",
                    log_ctx(),
                    PipelineStatus::PreviewInitFailed.description(),
                    PipelineStatus::PreviewInitFailed.code(),
                    e
                ),
            }
        });
        if let Err(e) = posted {
            warn!("{} ⚠️  预览初始化任务投递失败: {}", log_ctx(), e);
        }
    }

    /// 请求 `timestamp_ms` 附近的画面，返回请求是否被接受
    pub fn get_key_frame(&self, timestamp_ms: i64, width: u32, height: u32) -> bool {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return false;
        }
        if self
            .shared
            .working
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("{} 预览请求 {}ms 被丢弃（上一个请求尚未完成）", log_ctx(), timestamp_ms);
            return false;
        }

        let shared = self.shared.clone();
        let posted = self.shared.dispatcher.post_task(QueueId::Work, move || {
            let started = Instant::now();
            let frame = {
                let mut unit = shared.unit.lock();
                match unit.as_mut() {
                    Some(unit) if !shared.stopped.load(Ordering::SeqCst) => {
                        unit.extract(timestamp_ms, width, height, shared.max_decode_frames)
                    }
                    Some(_) => None,
                    None => {
                        debug!("{} 预览流水线未就绪，忽略请求", log_ctx());
                        None
                    }
                }
            };
            match frame {
                Some(frame) => {
                    debug!(
                        "{} 🖼️  预览 {}ms → 帧 {}ms, 耗时 {:?}",
                        log_ctx(),
                        timestamp_ms,
                        frame.pts,
                        started.elapsed()
                    );
                    shared.deliver(timestamp_ms, frame);
                }
                None => shared.working.store(false, Ordering::SeqCst),
            }
        });
        if let Err(e) = posted {
            warn!("{} ⚠️  预览任务投递失败: {}", log_ctx(), e);
            self.shared.working.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    pub fn is_working(&self) -> bool {
        self.shared.working.load(Ordering::SeqCst)
    }

    /// 停止后不再回调，预览资源在 Work 队列上释放
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.shared.on_key_frame.lock() = None;
        let shared = self.shared.clone();
        let posted = self.shared.dispatcher.post_task(QueueId::Work, move || {
            shared.unit.lock().take();
        });
        if posted.is_err() {
            self.shared.unit.lock().take();
        }
        info!("{} ⏹️  预览流水线已停止", log_ctx());
    }
}
