use crate::core::{log_ctx, EngineConfig, PipelineStatus, PlaybackClock, VideoFrame};
use crate::player::demuxer::{DemuxerStream, ReadResult, StatusCallback};
use crate::player::frame_stream::VideoFrameStream;
use crate::runtime::{Dispatcher, QueueId};
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 绘制目标，在渲染器自己的线程上被调用
pub trait PaintSink: Send + Sync {
    fn paint(&self, frame: Arc<VideoFrame>);

    /// 带上做出绘制决定时的时钟读数
    fn paint_at(&self, frame: Arc<VideoFrame>, _clock_ms: i64) {
        self.paint(frame);
    }
}

/// 丢弃所有画面的绘制目标（无界面运行时使用）
pub struct NullPaintSink;

impl PaintSink for NullPaintSink {
    fn paint(&self, _frame: Arc<VideoFrame>) {}
}

/// 渲染器生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    Uninitialized,
    Initializing,
    Initialized,
    Playing,
}

/// 队首帧的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOperation {
    /// 还没到时间，留在队列里
    Wait,
    Paint,
    /// 已经过时，出队但不绘制
    Drop,
}

impl FrameOperation {
    /// delta = 当前媒体时间 - 帧时间戳
    pub fn decide(now_ms: i64, frame_pts: i64, max_delta_ms: i64) -> Self {
        let delta = now_ms - frame_pts;
        if delta < 0 {
            FrameOperation::Wait
        } else if delta <= max_delta_ms {
            FrameOperation::Paint
        } else {
            FrameOperation::Drop
        }
    }
}

/// 视频渲染调度参数
#[derive(Debug, Clone, Copy)]
pub struct VideoRendererSettings {
    pub max_frame_delta_ms: i64,
    pub sleep_interval: Duration,
    pub pending_capacity: usize,
    pub wait_warn: Duration,
}

impl VideoRendererSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_frame_delta_ms: config.max_frame_delta_ms,
            sleep_interval: Duration::from_millis(config.paint_sleep_interval_ms.max(1)),
            pending_capacity: config.pending_paint_capacity.max(1),
            wait_warn: Duration::from_millis(config.wait_warn_ms),
        }
    }
}

impl Default for VideoRendererSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// 视频渲染器事件（构造时注入）
#[derive(Clone)]
pub struct VideoRendererEvents {
    /// 播放进度（在 Main 队列上回调）
    pub on_time_update: Arc<dyn Fn(i64) + Send + Sync>,
    /// 播放中的读取失败（在 Decode 队列上回调）
    pub on_error: Arc<dyn Fn(PipelineStatus) + Send + Sync>,
}

/// 渲染统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub painted: u64,
    pub dropped: u64,
    pub waits: u64,
}

/// 绘制线程和解码回调共享的状态，全部由一把锁保护
struct PaintState {
    pending: VecDeque<Arc<VideoFrame>>,
    read_in_flight: bool,
    /// 每次清空递增，旧 epoch 的读取结果被丢弃
    epoch: u64,
    end_of_stream: bool,
    failed: bool,
    paused: bool,
    stopped: bool,
    playing: bool,
    wait_happened: bool,
}

struct VideoRendererShared {
    dispatcher: Arc<Dispatcher>,
    settings: VideoRendererSettings,
    clock: PlaybackClock,
    stream: VideoFrameStream,
    sink: Arc<dyn PaintSink>,
    state: Mutex<PaintState>,
    /// 绘制期间持有；清空和停止借它等待进行中的绘制结束
    painting: Mutex<()>,
    paint_thread: Mutex<Option<thread::ThreadId>>,
    frame_available: Condvar,
    unpaused: Condvar,
    lifecycle: Mutex<RendererState>,
    events: Mutex<Option<VideoRendererEvents>>,
    time_update_acked: AtomicBool,
    painted: AtomicU64,
    dropped: AtomicU64,
    waits: AtomicU64,
}

impl VideoRendererShared {
    /// 等待进行中的绘制结束（绘制线程自己调用时直接返回）
    fn wait_paint_finished(&self) {
        if *self.paint_thread.lock() == Some(thread::current().id()) {
            return;
        }
        drop(self.painting.lock());
    }

    /// 队列未满、没有进行中的读取时发起一次读取（调用方持有锁）
    fn read_frame_if_needed(self: &Arc<Self>, state: &mut MutexGuard<'_, PaintState>) {
        if state.stopped
            || !state.playing
            || state.paused
            || state.read_in_flight
            || state.end_of_stream
            || state.failed
            || state.pending.len() >= self.settings.pending_capacity
        {
            return;
        }
        state.read_in_flight = true;
        let epoch = state.epoch;
        let shared = self.clone();
        let posted = self.dispatcher.post_task(QueueId::Decode, move || {
            let stream = shared.stream.clone();
            stream.read(Box::new(move |result| shared.on_read_done(epoch, result)));
        });
        if let Err(e) = posted {
            debug!("{} 视频读取未能投递: {}", log_ctx(), e);
            state.read_in_flight = false;
        }
    }

    fn on_read_done(self: &Arc<Self>, epoch: u64, result: ReadResult<Arc<VideoFrame>>) {
        let mut state = self.state.lock();
        state.read_in_flight = false;
        if state.stopped {
            return;
        }
        if epoch != state.epoch {
            debug!(
                "{} 🗑️  丢弃过期的读取结果（epoch {} != {}）",
                log_ctx(),
                epoch,
                state.epoch
            );
            self.read_frame_if_needed(&mut state);
            return;
        }

        let mut failure = None;
        match result {
            ReadResult::Ready(frame) => {
                if state.pending.len() < self.settings.pending_capacity {
                    state.pending.push_back(frame);
                } else {
                    // 只有一个读取在途且满时不会发起，这里不应到达
                    warn!("{} ⚠️  待绘制队列已满，丢弃帧 pts={}ms", log_ctx(), frame.pts);
                }
                self.frame_available.notify_all();
            }
            ReadResult::EndOfStream => {
                info!("{} 🏁 视频流结束", log_ctx());
                state.end_of_stream = true;
                self.frame_available.notify_all();
            }
            ReadResult::Aborted => {}
            ReadResult::Failed(status) => {
                error!("{} ❌ 视频读取失败: {}", log_ctx(), status);
                state.failed = true;
                failure = Some(status);
            }
        }
        self.read_frame_if_needed(&mut state);
        drop(state);

        if let Some(status) = failure {
            let events = self.events.lock().clone();
            if let Some(events) = events {
                (events.on_error)(status);
            }
        }
    }

    /// 上一次进度通知被处理后才投递新的
    fn maybe_post_time_update(self: &Arc<Self>) {
        if self.events.lock().is_none() {
            return;
        }
        if !self.time_update_acked.swap(false, Ordering::SeqCst) {
            return;
        }
        let shared = self.clone();
        let posted = self.dispatcher.post_task(QueueId::Main, move || {
            let events = shared.events.lock().clone();
            if let Some(events) = events {
                (events.on_time_update)(shared.clock.now());
            }
            shared.time_update_acked.store(true, Ordering::SeqCst);
        });
        if posted.is_err() {
            self.time_update_acked.store(true, Ordering::SeqCst);
        }
    }

    /// 绘制线程主循环
    fn thread_main(self: Arc<Self>) {
        info!("{} 🎬 视频绘制线程启动", log_ctx());
        loop {
            self.maybe_post_time_update();

            let mut state = self.state.lock();
            while state.paused && !state.stopped {
                self.unpaused.wait(&mut state);
            }
            if state.stopped {
                break;
            }

            if state.pending.is_empty() {
                self.read_frame_if_needed(&mut state);
                let begin = Instant::now();
                self.frame_available
                    .wait_for(&mut state, self.settings.sleep_interval * 4);
                let waited = begin.elapsed();
                if !state.pending.is_empty() && waited > self.settings.wait_warn {
                    state.wait_happened = true;
                    self.waits.fetch_add(1, Ordering::Relaxed);
                }
                continue;
            }

            let Some(head_pts) = state.pending.front().map(|f| f.pts) else {
                continue;
            };
            let now = self.clock.now();
            let operation = FrameOperation::decide(now, head_pts, self.settings.max_frame_delta_ms);

            if state.wait_happened {
                state.wait_happened = false;
                info!(
                    "{} ⏳ 等待解码后的下一帧: pts={}ms, 时钟={}ms, 操作={:?}",
                    log_ctx(),
                    head_pts,
                    now,
                    operation
                );
            }

            match operation {
                FrameOperation::Wait => {
                    drop(state);
                    let rate = self.clock.rate();
                    let ahead_ms = if rate > 0.0 {
                        ((head_pts - now) as f64 / rate) as u64
                    } else {
                        u64::MAX
                    };
                    thread::sleep(
                        Duration::from_millis(ahead_ms.max(1)).min(self.settings.sleep_interval),
                    );
                }
                FrameOperation::Paint => {
                    let frame = state.pending.pop_front();
                    let epoch = state.epoch;
                    self.read_frame_if_needed(&mut state);
                    drop(state);
                    if let Some(frame) = frame {
                        let _painting = self.painting.lock();
                        let stale = {
                            let state = self.state.lock();
                            state.stopped || state.epoch != epoch
                        };
                        if stale {
                            debug!("{} 🗑️  出队后缓冲已被清空，跳过 pts={}ms", log_ctx(), head_pts);
                            continue;
                        }
                        self.sink.paint_at(frame, now);
                        self.painted.fetch_add(1, Ordering::Relaxed);
                    }
                }
                FrameOperation::Drop => {
                    state.pending.pop_front();
                    self.read_frame_if_needed(&mut state);
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped.is_power_of_two() || dropped % 100 == 0 {
                        warn!(
                            "{} 🗑️  丢弃过期帧 pts={}ms（时钟 {}ms，累计丢弃 {} 帧）",
                            log_ctx(),
                            head_pts,
                            now,
                            dropped
                        );
                    }
                }
            }
        }
        info!(
            "{} 🛑 视频绘制线程退出（绘制 {} 帧，丢弃 {} 帧）",
            log_ctx(),
            self.painted.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed)
        );
    }
}

/// 视频渲染器
///
/// 专用绘制线程按播放时钟决定队首帧是等待、绘制还是丢弃；解码读取在 Decode 队列上
/// 异步进行，同一时刻最多一个读取在途。
pub struct VideoRenderer {
    shared: Arc<VideoRendererShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl VideoRenderer {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        stream: VideoFrameStream,
        clock: PlaybackClock,
        sink: Arc<dyn PaintSink>,
        settings: VideoRendererSettings,
        events: Option<VideoRendererEvents>,
    ) -> Self {
        Self {
            shared: Arc::new(VideoRendererShared {
                dispatcher,
                settings,
                clock,
                stream,
                sink,
                painting: Mutex::new(()),
                paint_thread: Mutex::new(None),
                state: Mutex::new(PaintState {
                    pending: VecDeque::with_capacity(settings.pending_capacity),
                    read_in_flight: false,
                    epoch: 0,
                    end_of_stream: false,
                    failed: false,
                    paused: false,
                    stopped: false,
                    playing: false,
                    wait_happened: false,
                }),
                frame_available: Condvar::new(),
                unpaused: Condvar::new(),
                lifecycle: Mutex::new(RendererState::Uninitialized),
                events: Mutex::new(events),
                time_update_acked: AtomicBool::new(true),
                painted: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                waits: AtomicU64::new(0),
            }),
            thread: Mutex::new(None),
        }
    }

    /// 在 Decode 队列上初始化解码流
    pub fn initialize(&self, input: Option<DemuxerStream>, done: StatusCallback) {
        *self.shared.lifecycle.lock() = RendererState::Initializing;
        let shared = self.shared.clone();
        let posted = self.shared.dispatcher.post_task(QueueId::Decode, move || {
            let status = match input {
                None => {
                    error!("{} ❌ 没有视频流", log_ctx());
                    PipelineStatus::VideoRendererInitFailed
                }
                Some(input) => match shared.stream.initialize(input) {
                    Ok(()) => PipelineStatus::Ok,
                    Err(e) => {
                        error!("{} ❌ 视频解码器初始化失败: {}", log_ctx(), e);
                        PipelineStatus::DecoderInitFailed
                    }
                },
            };
            *shared.lifecycle.lock() = if status.is_ok() {
                info!("{} ✅ 视频渲染器初始化完成", log_ctx());
                RendererState::Initialized
            } else {
                RendererState::Uninitialized
            };
            done(status);
        });
        if let Err(e) = posted {
            warn!("{} ⚠️  视频渲染器初始化任务投递失败: {}", log_ctx(), e);
        }
    }

    /// 启动绘制线程并开始读取
    pub fn start_playing_from(&self, timestamp_ms: i64) {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if *lifecycle != RendererState::Initialized {
                warn!("{} ⚠️  视频渲染器状态 {:?}，不能开始播放", log_ctx(), *lifecycle);
                debug_assert!(false, "start_playing_from called in state {:?}", *lifecycle);
                return;
            }
            *lifecycle = RendererState::Playing;
        }
        info!("{} ▶️  视频渲染器从 {}ms 开始播放", log_ctx(), timestamp_ms);

        {
            let mut state = self.shared.state.lock();
            state.playing = true;
            self.shared.read_frame_if_needed(&mut state);
        }

        let shared = self.shared.clone();
        match thread::Builder::new()
            .name("myy-video-paint".to_string())
            .spawn(move || shared.thread_main())
        {
            Ok(handle) => {
                *self.shared.paint_thread.lock() = Some(handle.thread().id());
                *self.thread.lock() = Some(handle);
            }
            Err(e) => {
                error!("{} ❌ 创建视频绘制线程失败: {}", log_ctx(), e);
                let events = self.shared.events.lock().clone();
                if let Some(events) = events {
                    (events.on_error)(PipelineStatus::VideoRendererInitFailed);
                }
            }
        }
    }

    /// 暂停（幂等）
    pub fn pause(&self) {
        let mut state = self.shared.state.lock();
        if !state.paused {
            state.paused = true;
            debug!("{} ⏸️  视频渲染器暂停（队列 {} 帧）", log_ctx(), state.pending.len());
        }
    }

    /// 恢复（未暂停时无操作）
    pub fn resume(&self) {
        let mut state = self.shared.state.lock();
        if !state.paused {
            return;
        }
        state.paused = false;
        self.shared.unpaused.notify_all();
        self.shared.read_frame_if_needed(&mut state);
        debug!("{} ▶️  视频渲染器恢复（队列 {} 帧）", log_ctx(), state.pending.len());
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    /// 清空待绘制队列（Seek 时使用），与绘制线程在同一把锁下进行
    pub fn clear_av_frame_buffer(&self) {
        {
            let mut state = self.shared.state.lock();
            let cleared = std::mem::take(&mut state.pending);
            state.epoch += 1;
            state.end_of_stream = false;
            state.failed = false;
            self.shared.stream.clear_buffer();
            self.shared.frame_available.notify_all();
            debug!(
                "{} 🧹 清空视频缓冲 {} 帧，epoch -> {}",
                log_ctx(),
                cleared.len(),
                state.epoch
            );
        }
        // 返回之后不会再画出清空前的帧
        self.shared.wait_paint_finished();
    }

    pub fn set_playback_rate(&self, rate: f64) {
        debug!("{} ⏩ 视频渲染速率 {:.2}", log_ctx(), rate);
        // 帧调度完全由时钟决定，唤醒绘制线程按新速率重新计算等待
        self.shared.frame_available.notify_all();
    }

    /// 断开事件回调
    pub fn detach_events(&self) {
        *self.shared.events.lock() = None;
    }

    /// 停止：唤醒所有等待者，不再绘制
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.pending.clear();
            self.shared.unpaused.notify_all();
            self.shared.frame_available.notify_all();
        }
        self.shared.wait_paint_finished();
        *self.shared.lifecycle.lock() = RendererState::Uninitialized;

        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            let _ = handle.join();
        }
        info!("{} ⏹️  视频渲染器已停止", log_ctx());
    }

    pub fn state(&self) -> RendererState {
        *self.shared.lifecycle.lock()
    }

    pub fn stats(&self) -> RenderStats {
        RenderStats {
            painted: self.shared.painted.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            waits: self.shared.waits.load(Ordering::Relaxed),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// 待绘制队列中各帧的时间戳
    pub fn pending_timestamps(&self) -> Vec<i64> {
        self.shared.state.lock().pending.iter().map(|f| f.pts).collect()
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.shared.state.lock().end_of_stream
    }

    pub fn show_state_info(&self) {
        let state = self.shared.state.lock();
        debug!(
            "{} 📊 视频渲染器: {:?}, 队列 {}/{}, 读取在途 {}, epoch {}, EOS {}, 暂停 {}, 时钟 {}ms, 统计 {:?}",
            log_ctx(),
            *self.shared.lifecycle.lock(),
            state.pending.len(),
            self.shared.settings.pending_capacity,
            state.read_in_flight,
            state.epoch,
            state.end_of_stream,
            state.paused,
            self.shared.clock.now(),
            self.stats()
        );
    }
}

impl Drop for VideoRenderer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_operation_boundaries() {
        assert_eq!(FrameOperation::decide(99, 100, 20), FrameOperation::Wait);
        assert_eq!(FrameOperation::decide(100, 100, 20), FrameOperation::Paint);
        assert_eq!(FrameOperation::decide(120, 100, 20), FrameOperation::Paint);
        assert_eq!(FrameOperation::decide(121, 100, 20), FrameOperation::Drop);
    }

    #[test]
    fn test_frame_operation_with_zero_tolerance() {
        assert_eq!(FrameOperation::decide(100, 100, 0), FrameOperation::Paint);
        assert_eq!(FrameOperation::decide(101, 100, 0), FrameOperation::Drop);
    }

    #[test]
    fn test_settings_from_config() {
        let config = EngineConfig {
            max_frame_delta_ms: 33,
            pending_paint_capacity: 4,
            ..Default::default()
        };
        let settings = VideoRendererSettings::from_config(&config);
        assert_eq!(settings.max_frame_delta_ms, 33);
        assert_eq!(settings.pending_capacity, 4);
        assert_eq!(settings.sleep_interval, Duration::from_millis(16));
    }
}
