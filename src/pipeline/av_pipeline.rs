use crate::core::{
    log_ctx, EngineConfig, MediaInfo, MediaSource, PipelineStatus, PlaybackClock, Result, Ticker,
    VideoFrame,
};
use crate::pipeline::observer::{AVPipelineObserver, ObserverId, ObserverList};
use crate::pipeline::preview::VideoPreviewPipeline;
use crate::player::audio_output::{AudioRendererSink, NullAudioSink};
use crate::player::backend::{backend_for_source, MediaBackend};
use crate::player::demuxer::{Demuxer, DemuxerEvents, StatusCallback};
use crate::player::frame_stream::{AudioDecodeUnit, AudioFrameStream, VideoDecodeUnit, VideoFrameStream};
use crate::renderer::{
    AudioRenderer, NullPaintSink, PaintSink, RenderStats, Renderer, RendererEvents, RendererParts,
    VideoRenderer, VideoRendererSettings,
};
use crate::runtime::{Dispatcher, QueueId};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// 流水线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    Create,
    InitDemuxer,
    InitRenderer,
    Playing,
    Seeking,
    SeekCompleted,
    Error,
}

impl PipelineState {
    /// 当前阶段成功完成后的下一个状态
    pub fn next_state(self) -> Option<PipelineState> {
        match self {
            PipelineState::Create => Some(PipelineState::InitDemuxer),
            PipelineState::InitDemuxer => Some(PipelineState::InitRenderer),
            PipelineState::InitRenderer => Some(PipelineState::Playing),
            PipelineState::Seeking => Some(PipelineState::SeekCompleted),
            PipelineState::Playing | PipelineState::SeekCompleted | PipelineState::Error => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == PipelineState::Error
    }
}

struct PipelineInner {
    dispatcher: Arc<Dispatcher>,
    source_name: String,
    /// 只在 Decode 队列上写
    state: Mutex<PipelineState>,
    seek_sequence: AtomicU64,
    /// 最近一个已结束（完成或被忽略）的 Seek 序号，与 seek_sequence 不等说明 Seek 进行中
    seek_settled: AtomicU64,
    user_paused: AtomicBool,
    started: AtomicBool,
    stopped: AtomicBool,
    last_aligned_seek: Mutex<Option<i64>>,
    media_info: Mutex<Option<MediaInfo>>,
    demuxer: Demuxer,
    renderer: Arc<Renderer>,
    preview: VideoPreviewPipeline,
    observers: ObserverList,
}

impl PipelineInner {
    /// 向所有观察者分发事件（Main 队列）
    fn notify<F>(self: &Arc<Self>, event: F)
    where
        F: Fn(&dyn AVPipelineObserver) + Send + 'static,
    {
        let inner = self.clone();
        let task = move || {
            if inner.stopped.load(Ordering::SeqCst) {
                return;
            }
            for observer in inner.observers.snapshot() {
                event(observer.as_ref());
            }
        };
        if self.dispatcher.is_on(QueueId::Main) {
            task();
        } else if let Err(e) = self.dispatcher.post_task(QueueId::Main, task) {
            warn!("{} ⚠️  观察者事件投递失败: {}", log_ctx(), e);
        }
    }

    fn set_state(self: &Arc<Self>, state: PipelineState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous == state {
            return;
        }
        info!("{} 🔄 流水线状态: {:?} → {:?}", log_ctx(), previous, state);
        self.notify(move |observer| observer.on_state_changed(state));
    }

    /// 阶段完成回调：转回 Decode 队列执行状态转换
    fn transit_callback(self: &Arc<Self>) -> StatusCallback {
        let inner = self.clone();
        Box::new(move |status| inner.post_transit(status))
    }

    fn post_transit(self: &Arc<Self>, status: PipelineStatus) {
        let inner = self.clone();
        if let Err(e) = self
            .dispatcher
            .post_task(QueueId::Decode, move || inner.state_transit_action(status))
        {
            warn!("{} ⚠️  状态转换任务投递失败: {}", log_ctx(), e);
        }
    }

    /// 状态机入口，只在 Decode 队列上运行
    fn state_transit_action(self: &Arc<Self>, status: PipelineStatus) {
        debug_assert!(self.dispatcher.is_on(QueueId::Decode));
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let current = *self.state.lock();
        if current.is_terminal() {
            debug!("{} 流水线已处于 Error，忽略状态 {:?}", log_ctx(), status);
            return;
        }
        if !status.is_ok() {
            self.fail(status);
            return;
        }

        let Some(next) = current.next_state() else {
            warn!("{} ⚠️  状态 {:?} 没有后继状态，忽略", log_ctx(), current);
            return;
        };
        self.set_state(next);
        match next {
            PipelineState::InitDemuxer => self.demuxer.initialize(self.transit_callback()),
            PipelineState::InitRenderer => {
                info!("{} ✅ 解封装器初始化完成", log_ctx());
                self.renderer.initialize(&self.demuxer, self.transit_callback());
            }
            PipelineState::Playing => {
                info!("{} ✅ 渲染器初始化完成，开始播放", log_ctx());
                self.renderer.start_playing_from(self.demuxer.start_time());
                if self.user_paused.load(Ordering::SeqCst) {
                    self.renderer.pause();
                }
            }
            PipelineState::SeekCompleted => {
                if !self.user_paused.load(Ordering::SeqCst) {
                    self.renderer.resume();
                    self.demuxer.resume();
                }
                self.set_state(PipelineState::Playing);
                self.show_state_info();
            }
            _ => {}
        }
    }

    fn fail(self: &Arc<Self>, status: PipelineStatus) {
        error!(
            "{} ❌ 流水线失败: {} (code {}) - {}",
            log_ctx(),
            status.description(),
            status.code(),
            self.source_name
        );
        self.set_state(PipelineState::Error);
        self.renderer.pause();
        self.demuxer.pause();

        if status.is_init_failure() {
            let name = self.source_name.clone();
            self.notify(move |observer| {
                observer.on_open_failed(&name, status.code(), status.description())
            });
        } else {
            self.notify(move |observer| observer.on_playback_error(status));
        }
    }

    /// Decode 队列上执行的 Seek
    fn seek_action(self: &Arc<Self>, timestamp_ms: i64, sequence: u64) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        if sequence != self.seek_sequence.load(Ordering::SeqCst) {
            debug!("{} Seek {}ms 已被后续请求取代", log_ctx(), timestamp_ms);
            return;
        }
        let current = *self.state.lock();
        if !matches!(current, PipelineState::Playing | PipelineState::Seeking) {
            warn!("{} ⚠️  状态 {:?} 下不能 Seek，忽略 {}ms", log_ctx(), current, timestamp_ms);
            self.seek_settled.store(sequence, Ordering::SeqCst);
            if !current.is_terminal() && !self.user_paused.load(Ordering::SeqCst) {
                self.demuxer.resume();
            }
            return;
        }

        self.set_state(PipelineState::Seeking);
        *self.last_aligned_seek.lock() = None;
        self.renderer.seek(timestamp_ms);

        let inner = self.clone();
        self.demuxer.seek(
            timestamp_ms,
            Box::new(move |status| {
                let pending = inner.clone();
                let posted = inner.dispatcher.post_task(QueueId::Decode, move || {
                    if sequence != pending.seek_sequence.load(Ordering::SeqCst) {
                        debug!("{} 过期的 Seek 完成回调被忽略", log_ctx());
                        return;
                    }
                    pending.seek_settled.store(sequence, Ordering::SeqCst);
                    pending.state_transit_action(status);
                });
                if let Err(e) = posted {
                    warn!("{} ⚠️  Seek 完成回调投递失败: {}", log_ctx(), e);
                }
            }),
        );
    }

    fn on_aligned_seek(self: &Arc<Self>, timestamp_ms: i64) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        self.renderer.update_aligned_seek_timestamp(timestamp_ms);
        *self.last_aligned_seek.lock() = Some(timestamp_ms);
        info!(
            "{} 🎯 Seek 落点 {}ms, 当前播放时间 {}ms",
            log_ctx(),
            timestamp_ms,
            self.renderer.get_playback_time()
        );
        self.notify(move |observer| observer.on_seek_aligned(timestamp_ms));
    }

    fn seek_in_flight(&self) -> bool {
        self.seek_sequence.load(Ordering::SeqCst) != self.seek_settled.load(Ordering::SeqCst)
    }

    fn show_state_info(&self) {
        debug!(
            "{} 📊 流水线 {:?}: 视频缓存 {} 帧, 音频缓存 {} 帧",
            log_ctx(),
            *self.state.lock(),
            self.demuxer.buffered_len(crate::core::StreamType::Video),
            self.demuxer.buffered_len(crate::core::StreamType::Audio)
        );
        self.renderer.show_state_info();
    }
}

/// 流水线构造器
pub struct AVPipelineBuilder {
    url: String,
    dispatcher: Option<Arc<Dispatcher>>,
    backend: Option<Arc<dyn MediaBackend>>,
    paint_sink: Option<Arc<dyn PaintSink>>,
    audio_sink: Option<Box<dyn AudioRendererSink>>,
    config: EngineConfig,
    ticker: Option<Arc<dyn Ticker>>,
}

impl AVPipelineBuilder {
    pub fn dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn MediaBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn paint_sink(mut self, sink: Arc<dyn PaintSink>) -> Self {
        self.paint_sink = Some(sink);
        self
    }

    pub fn audio_sink(mut self, sink: Box<dyn AudioRendererSink>) -> Self {
        self.audio_sink = Some(sink);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// 注入时钟的时间源（测试用）
    pub fn ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = Some(ticker);
        self
    }

    pub fn build(self) -> Result<AVPipeline> {
        let config = self.config;
        config.validate()?;

        let source = MediaSource::from_url(&self.url);
        let backend = match self.backend {
            Some(backend) => backend,
            None => backend_for_source(&source, &config)?,
        };
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(Dispatcher::new(Duration::from_millis(config.slow_task_warn_ms))));
        let paint_sink = self.paint_sink.unwrap_or_else(|| Arc::new(NullPaintSink));
        let audio_sink = self.audio_sink.unwrap_or_else(default_audio_sink);
        let clock = match self.ticker {
            Some(ticker) => PlaybackClock::with_ticker(ticker),
            None => PlaybackClock::new(),
        };

        let demuxer_source = backend.create_demuxer()?;
        let video_stream = VideoFrameStream::new(
            dispatcher.clone(),
            VideoDecodeUnit::new(backend.create_video_decoder()?),
        );
        let audio_stream = AudioFrameStream::new(
            dispatcher.clone(),
            AudioDecodeUnit::new(backend.create_audio_decoder()?),
        );
        let source_name = source.name();
        info!("{} 🏗️  创建流水线: {} ({} 后端)", log_ctx(), source_name, backend.name());

        let inner = Arc::new_cyclic(|weak: &Weak<PipelineInner>| {
            let demuxer_events = DemuxerEvents {
                on_media_info: {
                    let weak = weak.clone();
                    Arc::new(move |info: MediaInfo| {
                        if let Some(inner) = weak.upgrade() {
                            *inner.media_info.lock() = Some(info.clone());
                            inner.notify(move |observer| observer.on_media_info(&info));
                        }
                    })
                },
                on_aligned_seek: {
                    let weak = weak.clone();
                    Arc::new(move |timestamp_ms| {
                        let Some(inner) = weak.upgrade() else {
                            return;
                        };
                        let target = inner.clone();
                        let posted = inner
                            .dispatcher
                            .post_task(QueueId::Decode, move || target.on_aligned_seek(timestamp_ms));
                        if let Err(e) = posted {
                            warn!("{} ⚠️  Seek 落点事件投递失败: {}", log_ctx(), e);
                        }
                    })
                },
            };
            let demuxer = Demuxer::new(
                dispatcher.clone(),
                demuxer_source,
                config.demux_stream_queue_limit,
                demuxer_events,
            );

            let renderer_events = RendererEvents {
                on_progress: {
                    let weak = weak.clone();
                    Arc::new(move |timestamp_ms| {
                        if let Some(inner) = weak.upgrade() {
                            inner.notify(move |observer| observer.on_progress(timestamp_ms));
                        }
                    })
                },
                on_error: {
                    let weak = weak.clone();
                    Arc::new(move |status| {
                        if let Some(inner) = weak.upgrade() {
                            inner.post_transit(status);
                        }
                    })
                },
            };
            let audio_dispatcher = dispatcher.clone();
            let audio_capacity = config.audio_buffer_capacity;
            let video_dispatcher = dispatcher.clone();
            let settings = VideoRendererSettings::from_config(&config);
            let parts = RendererParts {
                clock,
                make_audio: Box::new(move |events| {
                    AudioRenderer::new(audio_dispatcher, audio_stream, audio_sink, audio_capacity, Some(events))
                }),
                make_video: Box::new(move |clock, events| {
                    VideoRenderer::new(video_dispatcher, video_stream, clock, paint_sink, settings, Some(events))
                }),
            };
            let renderer = Arc::new(Renderer::new(parts, renderer_events));

            let preview = {
                let weak = weak.clone();
                VideoPreviewPipeline::new(
                    dispatcher.clone(),
                    backend.clone(),
                    config.preview_max_decode_frames,
                    Arc::new(move |timestamp_ms, frame: Arc<VideoFrame>| {
                        if let Some(inner) = weak.upgrade() {
                            inner.notify(move |observer| observer.on_key_frame(timestamp_ms, frame.clone()));
                        }
                    }),
                )
            };

            PipelineInner {
                dispatcher: dispatcher.clone(),
                source_name,
                state: Mutex::new(PipelineState::Create),
                seek_sequence: AtomicU64::new(0),
                seek_settled: AtomicU64::new(0),
                user_paused: AtomicBool::new(false),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                last_aligned_seek: Mutex::new(None),
                media_info: Mutex::new(None),
                demuxer,
                renderer,
                preview,
                observers: ObserverList::new(),
            }
        });

        Ok(AVPipeline { inner })
    }
}

#[cfg(feature = "audio-output")]
fn default_audio_sink() -> Box<dyn AudioRendererSink> {
    match crate::player::audio_output::AudioOutput::new() {
        Ok(output) => Box::new(output),
        Err(e) => {
            warn!("{} ⚠️  音频设备不可用 ({})，使用静音输出", log_ctx(), e);
            Box::new(NullAudioSink::new())
        }
    }
}

#[cfg(not(feature = "audio-output"))]
fn default_audio_sink() -> Box<dyn AudioRendererSink> {
    Box::new(NullAudioSink::new())
}

/// 播放流水线
///
/// 顶层状态机：Create → InitDemuxer → InitRenderer → Playing，Seek 时经过
/// Seeking → SeekCompleted 回到 Playing；任何阶段失败进入 Error 且不再转换。
/// 状态只在 Decode 队列上修改，观察者事件在 Main 队列上分发。
pub struct AVPipeline {
    inner: Arc<PipelineInner>,
}

impl AVPipeline {
    pub fn builder(url: impl Into<String>) -> AVPipelineBuilder {
        AVPipelineBuilder {
            url: url.into(),
            dispatcher: None,
            backend: None,
            paint_sink: None,
            audio_sink: None,
            config: EngineConfig::default(),
            ticker: None,
        }
    }

    /// 开始初始化并播放，同时在 Work 队列上准备预览流水线
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            warn!("{} ⚠️  流水线已经启动", log_ctx());
            return;
        }
        info!("{} ▶️  启动流水线: {}", log_ctx(), self.inner.source_name);
        self.inner.post_transit(PipelineStatus::Ok);
        self.inner.preview.initialize();
    }

    pub fn pause(&self) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        self.inner.user_paused.store(true, Ordering::SeqCst);
        self.inner.renderer.pause();
        self.inner.demuxer.pause();
    }

    /// 未暂停时无操作；Seek 进行中只清除暂停标记，由 Seek 完成时恢复
    pub fn resume(&self) {
        if self.inner.stopped.load(Ordering::SeqCst) || self.state().is_terminal() {
            return;
        }
        if !self.inner.user_paused.swap(false, Ordering::SeqCst) {
            return;
        }
        if self.inner.seek_in_flight() {
            debug!("{} Seek 进行中，恢复推迟到 Seek 完成", log_ctx());
            return;
        }
        self.inner.renderer.resume();
        self.inner.demuxer.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.user_paused.load(Ordering::SeqCst)
    }

    /// 先同步暂停解封装器，再把 Seek 投递到 Decode 队列
    pub fn seek(&self, timestamp_ms: i64) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        info!("{} 🎯 请求 Seek 到 {}ms", log_ctx(), timestamp_ms);
        self.inner.demuxer.pause();
        let sequence = self.inner.seek_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = self.inner.clone();
        if let Err(e) = self
            .inner
            .dispatcher
            .post_task(QueueId::Decode, move || inner.seek_action(timestamp_ms, sequence))
        {
            warn!("{} ⚠️  Seek 任务投递失败: {}", log_ctx(), e);
        }
    }

    pub fn set_playback_rate(&self, rate: f64) {
        info!("{} ⏩ 播放速率: {}", log_ctx(), rate);
        self.inner.renderer.set_playback_rate(rate);
    }

    pub fn get_playback_time(&self) -> i64 {
        self.inner.renderer.get_playback_time()
    }

    pub fn set_volume(&self, volume: f32) {
        self.inner.renderer.set_volume(volume);
    }

    /// 异步获取预览画面，结果通过 `on_key_frame` 返回；上一个请求未完成时丢弃
    pub fn get_video_key_frame_async(&self, timestamp_ms: i64, width: u32, height: u32) -> bool {
        self.inner.preview.get_key_frame(timestamp_ms, width, height)
    }

    pub fn add_observer(&self, observer: &Arc<dyn AVPipelineObserver>) -> ObserverId {
        self.inner.observers.add(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.inner.observers.remove(id)
    }

    pub fn state(&self) -> PipelineState {
        *self.inner.state.lock()
    }

    pub fn media_info(&self) -> Option<MediaInfo> {
        self.inner.media_info.lock().clone()
    }

    /// 最近一次 Seek 的实际落点
    pub fn last_aligned_seek_timestamp(&self) -> Option<i64> {
        *self.inner.last_aligned_seek.lock()
    }

    pub fn render_stats(&self) -> RenderStats {
        self.inner.renderer.video().stats()
    }

    pub fn pending_paint_len(&self) -> usize {
        self.inner.renderer.video().pending_len()
    }

    /// 待绘制队列中各帧的时间戳
    pub fn pending_paint_timestamps(&self) -> Vec<i64> {
        self.inner.renderer.video().pending_timestamps()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub fn source_name(&self) -> &str {
        &self.inner.source_name
    }

    /// 停止顺序：预览、暂停、断开渲染器事件、停止渲染器、释放解封装器
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("{} ⏹️  停止流水线: {}", log_ctx(), self.inner.source_name);
        self.inner.preview.stop();
        self.inner.renderer.pause();
        self.inner.demuxer.pause();
        self.inner.renderer.detach_events();
        self.inner.renderer.stop();
        self.inner.demuxer.stop();
    }

    pub fn show_state_info(&self) {
        self.inner.show_state_info();
    }
}

impl Drop for AVPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_state_follows_transition_table() {
        assert_eq!(PipelineState::Create.next_state(), Some(PipelineState::InitDemuxer));
        assert_eq!(PipelineState::InitDemuxer.next_state(), Some(PipelineState::InitRenderer));
        assert_eq!(PipelineState::InitRenderer.next_state(), Some(PipelineState::Playing));
        assert_eq!(PipelineState::Seeking.next_state(), Some(PipelineState::SeekCompleted));
        assert_eq!(PipelineState::Playing.next_state(), None);
        assert_eq!(PipelineState::Error.next_state(), None);
        assert!(PipelineState::Error.is_terminal());
    }

    #[test]
    fn test_bad_config_is_rejected() {
        let config = EngineConfig {
            pending_paint_capacity: 0,
            ..EngineConfig::default()
        };
        let built = AVPipeline::builder("synthetic://?duration=1000").config(config).build();
        assert!(built.is_err());
    }

    #[test]
    fn test_start_reaches_playing() {
        let pipeline = AVPipeline::builder("synthetic://?duration=3000").build().unwrap();
        pipeline.start();
        let reached = pipeline
            .dispatcher()
            .run_main_until(Duration::from_secs(5), || pipeline.state() == PipelineState::Playing);
        assert!(reached);
        assert!(pipeline.media_info().is_some());
        pipeline.stop();
    }

    #[test]
    fn test_resume_without_pause_keeps_seek_paused_demuxer() {
        let ticker = Arc::new(crate::core::ManualTicker::new(0));
        let pipeline = AVPipeline::builder("synthetic://?duration=10000&audio=0")
            .ticker(ticker.clone())
            .build()
            .unwrap();
        pipeline.start();
        assert!(pipeline
            .dispatcher()
            .run_main_until(Duration::from_secs(5), || pipeline.state() == PipelineState::Playing));
        ticker.advance(8000);

        // 挡住 Decode 队列，让 Seek 停在进行中
        let (release, gate) = crossbeam_channel::bounded::<()>(0);
        pipeline
            .dispatcher()
            .post_task(QueueId::Decode, move || {
                let _ = gate.recv();
            })
            .unwrap();

        pipeline.seek(1000);
        pipeline.resume();
        assert!(pipeline.inner.demuxer.is_paused());
        assert!(!pipeline.is_paused());
        release.send(()).unwrap();

        assert!(pipeline.dispatcher().run_main_until(Duration::from_secs(5), || {
            pipeline.last_aligned_seek_timestamp() == Some(1000)
                && pipeline.state() == PipelineState::Playing
        }));
        assert!(!pipeline.inner.demuxer.is_paused());
        assert!(!pipeline.inner.renderer.is_seek_pending());
        assert_eq!(pipeline.get_playback_time(), 1000);
        ticker.advance(100);
        assert_eq!(pipeline.get_playback_time(), 1100);
        pipeline.stop();
    }

    #[test]
    fn test_resume_during_seek_is_deferred_to_completion() {
        let pipeline = AVPipeline::builder("synthetic://?duration=10000&audio=0")
            .build()
            .unwrap();
        pipeline.start();
        assert!(pipeline
            .dispatcher()
            .run_main_until(Duration::from_secs(5), || pipeline.state() == PipelineState::Playing));

        pipeline.pause();
        let (release, gate) = crossbeam_channel::bounded::<()>(0);
        pipeline
            .dispatcher()
            .post_task(QueueId::Decode, move || {
                let _ = gate.recv();
            })
            .unwrap();
        pipeline.seek(3300);
        pipeline.resume();
        assert!(!pipeline.is_paused());
        assert!(pipeline.inner.demuxer.is_paused());
        assert!(pipeline.inner.renderer.video().is_paused());
        release.send(()).unwrap();

        assert!(pipeline.dispatcher().run_main_until(Duration::from_secs(5), || {
            pipeline.last_aligned_seek_timestamp() == Some(3000)
                && pipeline.state() == PipelineState::Playing
        }));
        assert!(!pipeline.inner.demuxer.is_paused());
        assert!(!pipeline.inner.renderer.video().is_paused());
        pipeline.stop();
    }
}
