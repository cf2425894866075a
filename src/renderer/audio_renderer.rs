use crate::core::{log_ctx, AudioFrame, PipelineStatus};
use crate::player::audio_output::{AudioRenderSource, AudioRendererSink};
use crate::player::demuxer::{DemuxerStream, ReadResult, StatusCallback};
use crate::player::frame_stream::AudioFrameStream;
use crate::renderer::video_renderer::RendererState;
use crate::runtime::{Dispatcher, QueueId};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

/// 音频渲染器事件（构造时注入）
#[derive(Clone)]
pub struct AudioRendererEvents {
    /// 开始播放或 Seek 之后第一个解码出的音频帧的时间戳（Decode 队列）
    pub on_first_frame: Arc<dyn Fn(i64) + Send + Sync>,
    pub on_error: Arc<dyn Fn(PipelineStatus) + Send + Sync>,
}

struct AudioState {
    frames: VecDeque<AudioFrame>,
    /// 队首帧已经输出的采样数
    front_offset: usize,
    read_in_flight: bool,
    epoch: u64,
    end_of_stream: bool,
    failed: bool,
    paused: bool,
    stopped: bool,
    playing: bool,
    first_frame_pending: bool,
    volume: f32,
    underruns: u64,
}

struct AudioRendererShared {
    dispatcher: Arc<Dispatcher>,
    stream: AudioFrameStream,
    capacity: usize,
    state: Mutex<AudioState>,
    sink: Mutex<Box<dyn AudioRendererSink>>,
    lifecycle: Mutex<RendererState>,
    has_audio: Mutex<bool>,
    events: Mutex<Option<AudioRendererEvents>>,
}

impl AudioRendererShared {
    fn read_frame_if_needed(self: &Arc<Self>, state: &mut MutexGuard<'_, AudioState>) {
        if state.stopped
            || !state.playing
            || state.paused
            || state.read_in_flight
            || state.end_of_stream
            || state.failed
            || state.frames.len() >= self.capacity
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
            debug!("{} 音频读取未能投递: {}", log_ctx(), e);
            state.read_in_flight = false;
        }
    }

    fn on_read_done(self: &Arc<Self>, epoch: u64, result: ReadResult<AudioFrame>) {
        let mut state = self.state.lock();
        state.read_in_flight = false;
        if state.stopped {
            return;
        }
        if epoch != state.epoch {
            debug!("{} 🗑️  丢弃过期的音频读取结果", log_ctx());
            self.read_frame_if_needed(&mut state);
            return;
        }

        let mut first_frame = None;
        let mut failure = None;
        match result {
            ReadResult::Ready(frame) => {
                if state.first_frame_pending {
                    state.first_frame_pending = false;
                    first_frame = Some(frame.pts);
                }
                state.frames.push_back(frame);
            }
            ReadResult::EndOfStream => {
                info!("{} 🏁 音频流结束", log_ctx());
                state.end_of_stream = true;
            }
            ReadResult::Aborted => {}
            ReadResult::Failed(status) => {
                error!("{} ❌ 音频读取失败: {}", log_ctx(), status);
                state.failed = true;
                failure = Some(status);
            }
        }
        self.read_frame_if_needed(&mut state);
        drop(state);

        let events = self.events.lock().clone();
        if let Some(events) = events {
            if let Some(pts) = first_frame {
                debug!("{} 🔊 首个音频帧 pts={}ms", log_ctx(), pts);
                (events.on_first_frame)(pts);
            }
            if let Some(status) = failure {
                (events.on_error)(status);
            }
        }
    }

    fn render(self: &Arc<Self>, out: &mut [f32]) -> usize {
        let mut state = self.state.lock();
        if state.stopped || !state.playing || state.paused {
            out.fill(0.0);
            return 0;
        }

        let volume = state.volume;
        let mut written = 0;
        while written < out.len() {
            let offset = state.front_offset;
            let Some(front) = state.frames.front() else {
                break;
            };
            let available = &front.data[offset.min(front.data.len())..];
            let n = available.len().min(out.len() - written);
            for (dst, src) in out[written..written + n].iter_mut().zip(available) {
                *dst = src * volume;
            }
            written += n;
            if n == available.len() {
                state.frames.pop_front();
                state.front_offset = 0;
            } else {
                state.front_offset += n;
            }
        }
        if written < out.len() {
            out[written..].fill(0.0);
            if !state.end_of_stream {
                state.underruns += 1;
                if state.underruns.is_power_of_two() {
                    debug!("{} 🔈 音频缓冲不足（累计 {} 次）", log_ctx(), state.underruns);
                }
            }
        }
        self.read_frame_if_needed(&mut state);
        written
    }
}

/// 设备拉取数据的入口，只持有弱引用，避免渲染器和设备互相持有
struct RenderSource {
    shared: Weak<AudioRendererShared>,
}

impl AudioRenderSource for RenderSource {
    fn render(&self, out: &mut [f32]) -> usize {
        match self.shared.upgrade() {
            Some(shared) => shared.render(out),
            None => {
                out.fill(0.0);
                0
            }
        }
    }
}

/// 音频渲染器（拉模式）
///
/// 输出设备在自己的线程上调用 `render` 拉取采样；渲染器维护一个有界的已解码音频帧队列，
/// 由 Decode 队列上的单个在途读取补充。暂停时输出静音。
pub struct AudioRenderer {
    shared: Arc<AudioRendererShared>,
}

impl AudioRenderer {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        stream: AudioFrameStream,
        sink: Box<dyn AudioRendererSink>,
        capacity: usize,
        events: Option<AudioRendererEvents>,
    ) -> Self {
        Self {
            shared: Arc::new(AudioRendererShared {
                dispatcher,
                stream,
                capacity: capacity.max(1),
                state: Mutex::new(AudioState {
                    frames: VecDeque::new(),
                    front_offset: 0,
                    read_in_flight: false,
                    epoch: 0,
                    end_of_stream: false,
                    failed: false,
                    paused: false,
                    stopped: false,
                    playing: false,
                    first_frame_pending: false,
                    volume: 1.0,
                    underruns: 0,
                }),
                sink: Mutex::new(sink),
                lifecycle: Mutex::new(RendererState::Uninitialized),
                has_audio: Mutex::new(false),
                events: Mutex::new(events),
            }),
        }
    }

    /// 初始化输出设备和解码流；没有音频流时直接成功
    pub fn initialize(&self, input: Option<DemuxerStream>, done: StatusCallback) {
        *self.shared.lifecycle.lock() = RendererState::Initializing;
        let shared = self.shared.clone();
        let posted = self.shared.dispatcher.post_task(QueueId::Decode, move || {
            let status = match input {
                None => {
                    info!("{} 🔇 媒体没有音频流，跳过音频渲染器", log_ctx());
                    *shared.has_audio.lock() = false;
                    PipelineStatus::Ok
                }
                Some(input) => Self::initialize_stream(&shared, input),
            };
            *shared.lifecycle.lock() = if status.is_ok() {
                RendererState::Initialized
            } else {
                RendererState::Uninitialized
            };
            done(status);
        });
        if let Err(e) = posted {
            warn!("{} ⚠️  音频渲染器初始化任务投递失败: {}", log_ctx(), e);
        }
    }

    fn initialize_stream(shared: &Arc<AudioRendererShared>, input: DemuxerStream) -> PipelineStatus {
        let Some(config) = input.audio_config() else {
            return PipelineStatus::AudioRendererInitFailed;
        };
        let source: Arc<dyn AudioRenderSource> = Arc::new(RenderSource {
            shared: Arc::downgrade(shared),
        });
        let opened = shared
            .sink
            .lock()
            .initialize(config.sample_rate, config.channels, source);
        let (rate, channels) = match opened {
            Ok(format) => format,
            Err(e) => {
                error!("{} ❌ 打开音频输出失败: {}", log_ctx(), e);
                return PipelineStatus::AudioRendererInitFailed;
            }
        };
        shared
            .stream
            .with_decoder(|unit| unit.set_output_format(rate, channels));
        if let Err(e) = shared.stream.initialize(input) {
            error!("{} ❌ 音频解码器初始化失败: {}", log_ctx(), e);
            return PipelineStatus::DecoderInitFailed;
        }
        *shared.has_audio.lock() = true;
        info!("{} ✅ 音频渲染器初始化完成: {} Hz, {} 声道", log_ctx(), rate, channels);
        PipelineStatus::Ok
    }

    pub fn has_audio(&self) -> bool {
        *self.shared.has_audio.lock()
    }

    pub fn start_playing_from(&self, timestamp_ms: i64) {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if *lifecycle != RendererState::Initialized {
                warn!("{} ⚠️  音频渲染器状态 {:?}，不能开始播放", log_ctx(), *lifecycle);
                return;
            }
            *lifecycle = RendererState::Playing;
        }
        if !self.has_audio() {
            return;
        }
        info!("{} ▶️  音频渲染器从 {}ms 开始播放", log_ctx(), timestamp_ms);
        {
            let mut state = self.shared.state.lock();
            state.playing = true;
            state.first_frame_pending = true;
            self.shared.read_frame_if_needed(&mut state);
        }
        if let Err(e) = self.shared.sink.lock().play() {
            error!("{} ❌ 启动音频输出失败: {}", log_ctx(), e);
        }
    }

    /// 暂停（幂等）
    pub fn pause(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.paused {
                return;
            }
            state.paused = true;
        }
        if self.has_audio() {
            self.shared.sink.lock().pause();
        }
    }

    /// 恢复（未暂停时无操作）
    pub fn resume(&self) {
        let playing = {
            let mut state = self.shared.state.lock();
            if !state.paused {
                return;
            }
            state.paused = false;
            self.shared.read_frame_if_needed(&mut state);
            state.playing
        };
        if playing {
            if let Err(e) = self.shared.sink.lock().play() {
                error!("{} ❌ 恢复音频输出失败: {}", log_ctx(), e);
            }
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    /// 清空已解码的音频（Seek 时使用），之后第一个新帧会再次上报
    pub fn clear_av_frame_buffer(&self) {
        let mut state = self.shared.state.lock();
        let cleared = state.frames.len();
        state.frames.clear();
        state.front_offset = 0;
        state.epoch += 1;
        state.end_of_stream = false;
        state.failed = false;
        state.first_frame_pending = true;
        self.shared.stream.clear_buffer();
        self.shared.read_frame_if_needed(&mut state);
        debug!(
            "{} 🧹 清空音频缓冲 {} 帧，epoch -> {}",
            log_ctx(),
            cleared,
            state.epoch
        );
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared.state.lock().volume = volume.clamp(0.0, 1.0);
    }

    pub fn volume(&self) -> f32 {
        self.shared.state.lock().volume
    }

    pub fn set_playback_rate(&self, rate: f64) {
        // 音频不做变速处理
        debug!("{} ⏩ 音频渲染速率 {:.2}（按原速输出）", log_ctx(), rate);
    }

    pub fn detach_events(&self) {
        *self.shared.events.lock() = None;
    }

    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.frames.clear();
        }
        self.shared.sink.lock().stop();
        *self.shared.lifecycle.lock() = RendererState::Uninitialized;
        info!("{} ⏹️  音频渲染器已停止", log_ctx());
    }

    pub fn state(&self) -> RendererState {
        *self.shared.lifecycle.lock()
    }

    pub fn buffered_frames(&self) -> usize {
        self.shared.state.lock().frames.len()
    }

    /// 直接拉取采样（与输出设备的回调相同）
    pub fn render(&self, out: &mut [f32]) -> usize {
        self.shared.render(out)
    }

    pub fn show_state_info(&self) {
        let state = self.shared.state.lock();
        debug!(
            "{} 📊 音频渲染器: 缓冲 {}/{}, 读取在途 {}, epoch {}, EOS {}, 暂停 {}, 音量 {:.2}, 欠载 {}",
            log_ctx(),
            state.frames.len(),
            self.shared.capacity,
            state.read_in_flight,
            state.epoch,
            state.end_of_stream,
            state.paused,
            state.volume,
            state.underruns
        );
    }
}

impl Drop for AudioRenderer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MediaError, Result, StreamType};
    use crate::player::demuxer::{Demuxer, DemuxerEvents};
    use crate::player::frame_stream::AudioDecodeUnit;
    use crate::player::synthetic::{SyntheticAudioDecoder, SyntheticDemuxer, SyntheticOptions};
    use std::time::Duration;

    /// 不自己拉取的设备，由测试手动调用 render
    struct ManualSink {
        fail: bool,
    }

    impl AudioRendererSink for ManualSink {
        fn initialize(&mut self, rate: u32, channels: u16, _source: Arc<dyn AudioRenderSource>) -> Result<(u32, u16)> {
            if self.fail {
                return Err(MediaError::AudioError("无设备".to_string()));
            }
            Ok((rate, channels))
        }
        fn play(&mut self) -> Result<()> {
            Ok(())
        }
        fn pause(&mut self) {}
        fn stop(&mut self) {}
    }

    fn setup(fail_sink: bool) -> (Arc<Dispatcher>, Demuxer, AudioRenderer, Arc<Mutex<Vec<i64>>>) {
        let dispatcher = Arc::new(Dispatcher::default());
        let options = SyntheticOptions::parse("synthetic://?duration=3000&rate=1000&channels=1").unwrap();
        let demuxer = Demuxer::new(
            dispatcher.clone(),
            Box::new(SyntheticDemuxer::new(options)),
            64,
            DemuxerEvents::noop(),
        );
        let status = Arc::new(Mutex::new(None));
        let s = status.clone();
        demuxer.initialize(Box::new(move |st| *s.lock() = Some(st)));
        let s = status.clone();
        assert!(dispatcher.run_main_until(Duration::from_secs(2), move || s.lock().is_some()));

        let firsts = Arc::new(Mutex::new(Vec::new()));
        let f = firsts.clone();
        let renderer = AudioRenderer::new(
            dispatcher.clone(),
            AudioFrameStream::new(
                dispatcher.clone(),
                AudioDecodeUnit::new(Box::new(SyntheticAudioDecoder::new(false))),
            ),
            Box::new(ManualSink { fail: fail_sink }),
            4,
            Some(AudioRendererEvents {
                on_first_frame: Arc::new(move |pts| f.lock().push(pts)),
                on_error: Arc::new(|_| {}),
            }),
        );
        (dispatcher, demuxer, renderer, firsts)
    }

    fn init(dispatcher: &Arc<Dispatcher>, demuxer: &Demuxer, renderer: &AudioRenderer) -> PipelineStatus {
        let status = Arc::new(Mutex::new(None));
        let s = status.clone();
        renderer.initialize(
            demuxer.stream(StreamType::Audio),
            Box::new(move |st| *s.lock() = Some(st)),
        );
        let s = status.clone();
        assert!(dispatcher.run_main_until(Duration::from_secs(2), move || s.lock().is_some()));
        let result = status.lock().unwrap();
        result
    }

    #[test]
    fn test_sink_failure_fails_init() {
        let (dispatcher, demuxer, renderer, _) = setup(true);
        assert_eq!(
            init(&dispatcher, &demuxer, &renderer),
            PipelineStatus::AudioRendererInitFailed
        );
    }

    #[test]
    fn test_reports_first_frame_and_fills_buffer() {
        let (dispatcher, demuxer, renderer, firsts) = setup(false);
        assert_eq!(init(&dispatcher, &demuxer, &renderer), PipelineStatus::Ok);
        renderer.start_playing_from(0);
        let r = &renderer;
        assert!(dispatcher.run_main_until(Duration::from_secs(2), || r.buffered_frames() == 4));
        assert_eq!(*firsts.lock(), vec![0]);

        // 20ms @ 1000Hz 单声道 = 每帧 20 个采样
        let mut out = vec![1.0f32; 30];
        assert_eq!(renderer.render(&mut out), 30);
        renderer.set_volume(0.0);
        assert_eq!(renderer.render(&mut out), 30);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_paused_renderer_outputs_silence() {
        let (dispatcher, demuxer, renderer, _) = setup(false);
        assert_eq!(init(&dispatcher, &demuxer, &renderer), PipelineStatus::Ok);
        renderer.start_playing_from(0);
        let r = &renderer;
        assert!(dispatcher.run_main_until(Duration::from_secs(2), || r.buffered_frames() == 4));
        renderer.pause();
        renderer.pause();
        let mut out = vec![1.0f32; 16];
        assert_eq!(renderer.render(&mut out), 0);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(renderer.buffered_frames(), 4);
        renderer.resume();
        assert_eq!(renderer.render(&mut out), 16);
    }

    #[test]
    fn test_clear_reports_first_frame_again() {
        let (dispatcher, demuxer, renderer, firsts) = setup(false);
        assert_eq!(init(&dispatcher, &demuxer, &renderer), PipelineStatus::Ok);
        renderer.start_playing_from(0);
        let r = &renderer;
        assert!(dispatcher.run_main_until(Duration::from_secs(2), || r.buffered_frames() == 4));

        renderer.clear_av_frame_buffer();
        let f = firsts.clone();
        assert!(dispatcher.run_main_until(Duration::from_secs(2), move || f.lock().len() == 2));
        let reported = firsts.lock().clone();
        assert!(reported[1] > reported[0]);
    }
}
