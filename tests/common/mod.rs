#![allow(dead_code)]

use myy_engine::core::{MediaInfo, PipelineStatus, VideoFrame};
use myy_engine::{AVPipeline, AVPipelineObserver, PaintSink, PipelineState};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// 记录所有回调的观察者
#[derive(Default)]
pub struct RecordingObserver {
    pub media_info: Mutex<Vec<MediaInfo>>,
    pub progress: Mutex<Vec<i64>>,
    pub open_failed: Mutex<Vec<(String, i32, String)>>,
    pub key_frames: Mutex<Vec<(i64, i64)>>,
    pub states: Mutex<Vec<PipelineState>>,
    pub aligned: Mutex<Vec<i64>>,
    pub playback_errors: Mutex<Vec<PipelineStatus>>,
}

impl AVPipelineObserver for RecordingObserver {
    fn on_media_info(&self, info: &MediaInfo) {
        self.media_info.lock().push(info.clone());
    }

    fn on_progress(&self, timestamp_ms: i64) {
        self.progress.lock().push(timestamp_ms);
    }

    fn on_open_failed(&self, name: &str, code: i32, description: &str) {
        self.open_failed
            .lock()
            .push((name.to_string(), code, description.to_string()));
    }

    fn on_key_frame(&self, timestamp_ms: i64, frame: Arc<VideoFrame>) {
        self.key_frames.lock().push((timestamp_ms, frame.pts));
    }

    fn on_state_changed(&self, state: PipelineState) {
        self.states.lock().push(state);
    }

    fn on_seek_aligned(&self, timestamp_ms: i64) {
        self.aligned.lock().push(timestamp_ms);
    }

    fn on_playback_error(&self, status: PipelineStatus) {
        self.playback_errors.lock().push(status);
    }
}

/// 记录绘制帧时间戳的绘制目标
#[derive(Default)]
pub struct RecordingPaintSink {
    pub painted: Mutex<Vec<i64>>,
}

impl PaintSink for RecordingPaintSink {
    fn paint(&self, frame: Arc<VideoFrame>) {
        self.painted.lock().push(frame.pts);
    }
}

pub struct Harness {
    pub pipeline: AVPipeline,
    pub observer: Arc<RecordingObserver>,
    pub sink: Arc<RecordingPaintSink>,
}

impl Harness {
    pub fn new(url: &str) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let sink = Arc::new(RecordingPaintSink::default());
        let pipeline = AVPipeline::builder(url)
            .paint_sink(sink.clone())
            .build()
            .expect("build pipeline");
        let observer = Arc::new(RecordingObserver::default());
        let as_dyn: Arc<dyn AVPipelineObserver> = observer.clone();
        pipeline.add_observer(&as_dyn);
        Self {
            pipeline,
            observer,
            sink,
        }
    }

    /// 驱动 Main 队列直到条件满足
    pub fn pump_until(&self, timeout: Duration, done: impl FnMut() -> bool) -> bool {
        self.pipeline.dispatcher().run_main_until(timeout, done)
    }

    pub fn pump_for(&self, duration: Duration) {
        self.pipeline.dispatcher().run_main_for(duration);
    }

    pub fn start_and_wait_playing(&self) {
        self.pipeline.start();
        let playing = self.pump_until(Duration::from_secs(5), || {
            self.pipeline.state() == PipelineState::Playing
        });
        assert!(playing, "pipeline stuck in {:?}", self.pipeline.state());
    }
}
