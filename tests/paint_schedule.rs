use crossbeam_channel::{bounded, Receiver, Sender};
use myy_engine::core::{ManualTicker, PipelineStatus, PlaybackClock, StreamType, VideoFrame};
use myy_engine::player::frame_stream::VideoDecodeUnit;
use myy_engine::player::synthetic::{SyntheticDemuxer, SyntheticVideoDecoder};
use myy_engine::player::{Demuxer, DemuxerEvents, SyntheticOptions, VideoFrameStream};
use myy_engine::renderer::{FrameOperation, PaintSink, VideoRenderer, VideoRendererSettings};
use myy_engine::runtime::{Dispatcher, QueueId};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_decide_matches_delta_window() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..10_000 {
        let pts = rng.gen_range(-5_000..100_000);
        let now = rng.gen_range(-5_000..100_000);
        let max_delta = rng.gen_range(0..200);
        let delta = now - pts;
        let expected = if delta < 0 {
            FrameOperation::Wait
        } else if delta <= max_delta {
            FrameOperation::Paint
        } else {
            FrameOperation::Drop
        };
        assert_eq!(FrameOperation::decide(now, pts, max_delta), expected);
    }
}

/// 记录 (帧时间戳, 做出绘制决定时的时钟, 进入 sink 时的时钟)
struct ClockedSink {
    clock: PlaybackClock,
    painted: Mutex<Vec<(i64, i64, i64)>>,
}

impl PaintSink for ClockedSink {
    fn paint(&self, frame: Arc<VideoFrame>) {
        let now = self.clock.now();
        self.paint_at(frame, now);
    }

    fn paint_at(&self, frame: Arc<VideoFrame>, clock_ms: i64) {
        self.painted.lock().push((frame.pts, clock_ms, self.clock.now()));
    }
}

/// 第一帧绘制时阻塞，直到测试放行
struct BlockingSink {
    entered: Sender<i64>,
    release: Receiver<()>,
    blocked_once: AtomicBool,
    painted: Mutex<Vec<i64>>,
}

impl PaintSink for BlockingSink {
    fn paint(&self, frame: Arc<VideoFrame>) {
        if !self.blocked_once.swap(true, Ordering::SeqCst) {
            let _ = self.entered.send(frame.pts);
            let _ = self.release.recv_timeout(Duration::from_secs(5));
        }
        self.painted.lock().push(frame.pts);
    }
}

fn wait_status(init: impl FnOnce(Box<dyn FnOnce(PipelineStatus) + Send>)) -> PipelineStatus {
    let (tx, rx) = bounded(1);
    init(Box::new(move |status| {
        let _ = tx.send(status);
    }));
    rx.recv_timeout(Duration::from_secs(5))
        .expect("initialization timed out")
}

/// 无音频测试源 + 手动时钟驱动的视频渲染器
struct Rig {
    dispatcher: Arc<Dispatcher>,
    demuxer: Demuxer,
    renderer: VideoRenderer,
}

impl Rig {
    fn start(clock: PlaybackClock, sink: Arc<dyn PaintSink>, settings: VideoRendererSettings) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let dispatcher = Arc::new(Dispatcher::new(Duration::from_millis(500)));
        let options = SyntheticOptions {
            duration_ms: 60_000,
            audio: false,
            ..Default::default()
        };
        let demuxer = Demuxer::new(
            dispatcher.clone(),
            Box::new(SyntheticDemuxer::new(options)),
            64,
            DemuxerEvents::noop(),
        );
        assert_eq!(wait_status(|done| demuxer.initialize(done)), PipelineStatus::Ok);

        let stream = VideoFrameStream::new(
            dispatcher.clone(),
            VideoDecodeUnit::new(Box::new(SyntheticVideoDecoder::new(false))),
        );
        let renderer = VideoRenderer::new(dispatcher.clone(), stream, clock.clone(), sink, settings, None);
        let input = demuxer.stream(StreamType::Video);
        assert_eq!(wait_status(|done| renderer.initialize(input, done)), PipelineStatus::Ok);

        clock.set_start_time(0);
        clock.start_ticking();
        renderer.start_playing_from(0);
        Self {
            dispatcher,
            demuxer,
            renderer,
        }
    }

    fn shutdown(&self) {
        self.renderer.stop();
        self.demuxer.stop();
        self.dispatcher.stop_all();
    }
}

fn fuzz_settings() -> VideoRendererSettings {
    VideoRendererSettings {
        max_frame_delta_ms: 40,
        sleep_interval: Duration::from_millis(2),
        pending_capacity: 4,
        wait_warn: Duration::from_millis(500),
    }
}

#[test]
fn test_pending_queue_stays_bounded_under_random_control() {
    let settings = fuzz_settings();
    let ticker = Arc::new(ManualTicker::new(0));
    let clock = PlaybackClock::with_ticker(ticker.clone());
    let sink = Arc::new(ClockedSink {
        clock: clock.clone(),
        painted: Mutex::new(Vec::new()),
    });
    let rig = Rig::start(clock, sink.clone(), settings);

    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..300 {
        match rng.gen_range(0..10) {
            0 => rig.renderer.pause(),
            1 => rig.renderer.resume(),
            2 => {
                rig.demuxer.clear_buffer();
                rig.renderer.clear_av_frame_buffer();
            }
            _ => ticker.advance(rng.gen_range(0..60)),
        }
        thread::sleep(Duration::from_millis(rng.gen_range(0..3)));
        assert!(rig.renderer.pending_len() <= settings.pending_capacity);
    }
    rig.renderer.resume();
    ticker.advance(200);
    thread::sleep(Duration::from_millis(50));
    rig.shutdown();

    let painted = sink.painted.lock().clone();
    assert!(!painted.is_empty());
    for (pts, decided_at, painted_at) in &painted {
        let late = decided_at - pts;
        assert!(late >= 0, "frame {} painted early at {}", pts, decided_at);
        assert!(
            late <= settings.max_frame_delta_ms,
            "frame {} painted {}ms late",
            pts,
            late
        );
        assert!(painted_at >= decided_at);
    }
    for pair in painted.windows(2) {
        assert!(pair[0].0 < pair[1].0, "painted out of order: {:?}", pair);
    }
    assert_eq!(rig.dispatcher.pending_count(QueueId::Main), 0);
}

#[test]
fn test_clear_waits_for_in_progress_paint() {
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let sink = Arc::new(BlockingSink {
        entered: entered_tx,
        release: release_rx,
        blocked_once: AtomicBool::new(false),
        painted: Mutex::new(Vec::new()),
    });
    // 时钟停在 0：只有 pts=0 的帧到时间
    let clock = PlaybackClock::with_ticker(Arc::new(ManualTicker::new(0)));
    let rig = Rig::start(clock, sink.clone(), fuzz_settings());

    assert_eq!(entered_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);
    let cleared = AtomicBool::new(false);
    thread::scope(|scope| {
        scope.spawn(|| {
            rig.renderer.clear_av_frame_buffer();
            cleared.store(true, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!cleared.load(Ordering::SeqCst), "clear returned while a frame was being painted");
        release_tx.send(()).unwrap();
    });
    assert!(cleared.load(Ordering::SeqCst));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(*sink.painted.lock(), vec![0]);
    rig.shutdown();
    assert_eq!(*sink.painted.lock(), vec![0]);
}
