// 渲染器：持有播放时钟和音视频两个子渲染器

pub mod audio_renderer;
pub mod video_renderer;

pub use audio_renderer::{AudioRenderer, AudioRendererEvents};
pub use video_renderer::{
    FrameOperation, NullPaintSink, PaintSink, RenderStats, RendererState, VideoRenderer,
    VideoRendererEvents, VideoRendererSettings,
};

use crate::core::{log_ctx, PipelineStatus, PlaybackClock, StreamType};
use crate::player::demuxer::{Demuxer, StatusCallback};
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// 组合渲染器事件（构造时注入）
#[derive(Clone)]
pub struct RendererEvents {
    /// 播放进度（Main 队列）
    pub on_progress: Arc<dyn Fn(i64) + Send + Sync>,
    /// 播放中的错误
    pub on_error: Arc<dyn Fn(PipelineStatus) + Send + Sync>,
}

#[derive(Debug, Default)]
struct SyncState {
    /// Seek 之后等待新数据重新定锚
    seek_pending: bool,
    aligned_seek_timestamp: Option<i64>,
    user_paused: bool,
}

struct RendererShared {
    clock: PlaybackClock,
    sync: Mutex<SyncState>,
    events: Mutex<Option<RendererEvents>>,
}

impl RendererShared {
    /// 音频渲染器报告第一个解码帧
    fn on_first_audio_frame(&self, pts: i64) {
        let mut sync = self.sync.lock();
        if sync.seek_pending {
            // 落点之前的音频不应把时钟拉回去
            let timestamp = sync.aligned_seek_timestamp.map_or(pts, |aligned| pts.max(aligned));
            self.clock.seek(timestamp);
            if !sync.user_paused {
                self.clock.resume();
            }
            sync.seek_pending = false;
            info!("{} ⏱️  Seek 后时钟重新定锚到 {}ms", log_ctx(), timestamp);
        } else {
            self.clock.start_ticking();
            info!("{} ⏱️  首个音频帧 {}ms 到达，时钟开始走动", log_ctx(), pts);
        }
    }

    fn progress(&self, timestamp_ms: i64) {
        let events = self.events.lock().clone();
        if let Some(events) = events {
            (events.on_progress)(timestamp_ms);
        }
    }

    fn error(&self, status: PipelineStatus) {
        let events = self.events.lock().clone();
        if let Some(events) = events {
            (events.on_error)(status);
        }
    }
}

/// 组合渲染器
///
/// 对外提供统一的 Initialize / Seek / Pause / Resume / Stop 接口。
/// 时钟在音频渲染器报告第一个解码帧后才开始走动；没有音频时在开始播放时走动。
pub struct Renderer {
    shared: Arc<RendererShared>,
    audio: AudioRenderer,
    video: VideoRenderer,
}

/// 子渲染器的构造参数，事件由组合渲染器注入
pub struct RendererParts {
    pub clock: PlaybackClock,
    pub make_audio: Box<dyn FnOnce(AudioRendererEvents) -> AudioRenderer>,
    pub make_video: Box<dyn FnOnce(PlaybackClock, VideoRendererEvents) -> VideoRenderer>,
}

impl Renderer {
    pub fn new(parts: RendererParts, events: RendererEvents) -> Self {
        let shared = Arc::new(RendererShared {
            clock: parts.clock.clone(),
            sync: Mutex::new(SyncState::default()),
            events: Mutex::new(Some(events)),
        });

        let weak: Weak<RendererShared> = Arc::downgrade(&shared);
        let audio_events = AudioRendererEvents {
            on_first_frame: {
                let weak = weak.clone();
                Arc::new(move |pts| {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_first_audio_frame(pts);
                    }
                })
            },
            on_error: {
                let weak = weak.clone();
                Arc::new(move |status| {
                    if let Some(shared) = weak.upgrade() {
                        shared.error(status);
                    }
                })
            },
        };
        let video_events = VideoRendererEvents {
            on_time_update: {
                let weak = weak.clone();
                Arc::new(move |ts| {
                    if let Some(shared) = weak.upgrade() {
                        shared.progress(ts);
                    }
                })
            },
            on_error: Arc::new(move |status| {
                if let Some(shared) = weak.upgrade() {
                    shared.error(status);
                }
            }),
        };

        let audio = (parts.make_audio)(audio_events);
        let video = (parts.make_video)(parts.clock, video_events);
        Self { shared, audio, video }
    }

    /// 先初始化音频渲染器，完成后再初始化视频渲染器（两者读同一个解封装器）
    pub fn initialize(self: &Arc<Self>, demuxer: &Demuxer, done: StatusCallback) {
        let renderer = self.clone();
        let video_input = demuxer.stream(StreamType::Video);
        self.audio.initialize(
            demuxer.stream(StreamType::Audio),
            Box::new(move |status| {
                if !status.is_ok() {
                    done(status);
                    return;
                }
                renderer.video.initialize(video_input, done);
            }),
        );
    }

    pub fn start_playing_from(&self, timestamp_ms: i64) {
        info!("{} ▶️  渲染器从 {}ms 开始播放", log_ctx(), timestamp_ms);
        self.shared.clock.set_start_time(timestamp_ms);
        self.video.start_playing_from(timestamp_ms);
        self.audio.start_playing_from(timestamp_ms);
        if !self.audio.has_audio() {
            self.shared.clock.start_ticking();
        }
    }

    pub fn pause(&self) {
        self.shared.sync.lock().user_paused = true;
        self.shared.clock.pause();
        self.audio.pause();
        self.video.pause();
    }

    pub fn resume(&self) {
        {
            let mut sync = self.shared.sync.lock();
            sync.user_paused = false;
            if sync.seek_pending && self.audio.has_audio() {
                // 等第一个新音频帧到达再恢复时钟
            } else {
                sync.seek_pending = false;
                self.shared.clock.resume();
            }
        }
        self.audio.resume();
        self.video.resume();
    }

    /// 暂停时钟、清空两个渲染器的缓冲，等待新数据重新定锚
    pub fn seek(&self, timestamp_ms: i64) {
        debug!("{} 🎯 渲染器 Seek {}ms", log_ctx(), timestamp_ms);
        {
            let mut sync = self.shared.sync.lock();
            sync.seek_pending = true;
            sync.aligned_seek_timestamp = None;
        }
        self.shared.clock.pause();
        self.audio.clear_av_frame_buffer();
        self.video.clear_av_frame_buffer();
    }

    /// 解封装器报告的实际落点
    pub fn update_aligned_seek_timestamp(&self, timestamp_ms: i64) {
        self.shared.sync.lock().aligned_seek_timestamp = Some(timestamp_ms);
        self.shared.clock.seek(timestamp_ms);
    }

    pub fn set_playback_rate(&self, rate: f64) {
        self.shared.clock.set_rate(rate);
        self.audio.set_playback_rate(rate);
        self.video.set_playback_rate(rate);
    }

    pub fn set_volume(&self, volume: f32) {
        self.audio.set_volume(volume);
    }

    pub fn get_playback_time(&self) -> i64 {
        self.shared.clock.now()
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.shared.clock
    }

    pub fn is_seek_pending(&self) -> bool {
        self.shared.sync.lock().seek_pending
    }

    /// 断开所有向上的事件
    pub fn detach_events(&self) {
        *self.shared.events.lock() = None;
        self.audio.detach_events();
        self.video.detach_events();
    }

    pub fn stop(&self) {
        self.video.stop();
        self.audio.stop();
        self.shared.clock.stop_ticking();
        info!("{} ⏹️  渲染器已停止", log_ctx());
    }

    pub fn video(&self) -> &VideoRenderer {
        &self.video
    }

    pub fn audio(&self) -> &AudioRenderer {
        &self.audio
    }

    pub fn show_state_info(&self) {
        debug!(
            "{} 📊 渲染器: 时钟 {}ms (走动 {}, 暂停 {}), {:?}",
            log_ctx(),
            self.shared.clock.now(),
            self.shared.clock.is_ticking(),
            self.shared.clock.is_paused(),
            *self.shared.sync.lock()
        );
        self.audio.show_state_info();
        self.video.show_state_info();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualTicker;

    /// 只验证时钟同步逻辑，不涉及子渲染器
    fn shared_with_manual_clock() -> (Arc<ManualTicker>, RendererShared) {
        let ticker = Arc::new(ManualTicker::new(0));
        let shared = RendererShared {
            clock: PlaybackClock::with_ticker(ticker.clone()),
            sync: Mutex::new(SyncState::default()),
            events: Mutex::new(None),
        };
        (ticker, shared)
    }

    #[test]
    fn test_first_audio_frame_starts_clock() {
        let (ticker, shared) = shared_with_manual_clock();
        shared.clock.set_start_time(0);
        ticker.advance(500);
        assert_eq!(shared.clock.now(), 0);
        shared.on_first_audio_frame(0);
        ticker.advance(40);
        assert_eq!(shared.clock.now(), 40);
    }

    #[test]
    fn test_first_audio_frame_after_seek_reseeds_clock() {
        let (ticker, shared) = shared_with_manual_clock();
        shared.clock.start_ticking();
        ticker.advance(300);

        // seek 流程：暂停时钟、等待落点
        shared.sync.lock().seek_pending = true;
        shared.clock.pause();
        shared.sync.lock().aligned_seek_timestamp = Some(1000);
        shared.clock.seek(1000);
        ticker.advance(100);
        assert_eq!(shared.clock.now(), 1000);

        // 音频帧早于落点时不回退
        shared.on_first_audio_frame(980);
        assert!(!shared.sync.lock().seek_pending);
        assert_eq!(shared.clock.now(), 1000);
        ticker.advance(20);
        assert_eq!(shared.clock.now(), 1020);
    }

    #[test]
    fn test_user_pause_survives_seek_reseed() {
        let (ticker, shared) = shared_with_manual_clock();
        shared.clock.start_ticking();
        shared.sync.lock().seek_pending = true;
        shared.sync.lock().user_paused = true;
        shared.clock.pause();
        shared.on_first_audio_frame(2000);
        ticker.advance(100);
        assert_eq!(shared.clock.now(), 2000);
        assert!(shared.clock.is_paused());
    }
}
