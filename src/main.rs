use anyhow::{bail, Context, Result};
use log::{error, info};
use myy_engine::{AVPipeline, AVPipelineObserver, EngineConfig, MediaInfo, PaintSink, PipelineState, VideoFrame};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const USAGE: &str = "用法: myy_engine <url> [--seconds N] [--seek MS] [--config FILE]";

struct Args {
    url: String,
    seconds: u64,
    seek: Option<i64>,
    config: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut url = None;
    let mut seconds = 10;
    let mut seek = None;
    let mut config = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--seconds" => {
                let value = args.next().context("--seconds 缺少参数")?;
                seconds = value.parse().with_context(|| format!("无效的秒数: {}", value))?;
            }
            "--seek" => {
                let value = args.next().context("--seek 缺少参数")?;
                seek = Some(value.parse().with_context(|| format!("无效的 Seek 位置: {}", value))?);
            }
            "--config" => config = Some(args.next().context("--config 缺少参数")?),
            "-h" | "--help" => bail!(USAGE),
            _ if url.is_none() => url = Some(arg),
            _ => bail!("多余的参数: {}\n{}", arg, USAGE),
        }
    }
    Ok(Args {
        url: url.context(USAGE)?,
        seconds,
        seek,
        config,
    })
}

/// 统计绘制的帧数
#[derive(Default)]
struct CountingPaintSink {
    frames: AtomicU64,
}

impl PaintSink for CountingPaintSink {
    fn paint(&self, _frame: Arc<VideoFrame>) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

/// 把流水线事件打印到日志
#[derive(Default)]
struct ConsoleObserver {
    last_progress: Mutex<Option<Instant>>,
    failed: AtomicBool,
}

impl AVPipelineObserver for ConsoleObserver {
    fn on_media_info(&self, info: &MediaInfo) {
        info!(
            "📎 媒体信息: {}x{} @ {:.2} fps, 时长 {}ms, 视频 {}, 音频 {} ({} Hz, {} 声道)",
            info.width,
            info.height,
            info.fps,
            info.duration,
            info.video_codec,
            info.audio_codec,
            info.sample_rate,
            info.channels
        );
    }

    fn on_progress(&self, timestamp_ms: i64) {
        let mut last = self.last_progress.lock();
        if last.map_or(true, |at| at.elapsed() >= Duration::from_secs(1)) {
            *last = Some(Instant::now());
            info!("⏱️  播放进度 {}ms", timestamp_ms);
        }
    }

    fn on_open_failed(&self, name: &str, code: i32, description: &str) {
        error!("❌ 打开失败: {} (code {}): {}", name, code, description);
        self.failed.store(true, Ordering::SeqCst);
    }

    fn on_key_frame(&self, timestamp_ms: i64, frame: Arc<VideoFrame>) {
        info!(
            "🖼️  预览 {}ms: 帧 {}ms, {}x{}",
            timestamp_ms, frame.pts, frame.width, frame.height
        );
    }

    fn on_state_changed(&self, state: PipelineState) {
        info!("🔄 状态: {:?}", state);
    }

    fn on_playback_error(&self, status: myy_engine::PipelineStatus) {
        error!("❌ 播放错误: {}", status);
        self.failed.store(true, Ordering::SeqCst);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        // 音频后端在枚举设备时比较吵
        .filter_module("cpal", log::LevelFilter::Warn)
        .filter_module("alsa", log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path).with_context(|| format!("读取配置失败: {}", path))?,
        None => EngineConfig::load().context("读取配置失败")?,
    };

    info!("🎬 MYY Engine 启动: {}", args.url);
    let paint_sink = Arc::new(CountingPaintSink::default());
    let pipeline = AVPipeline::builder(args.url.clone())
        .config(config)
        .paint_sink(paint_sink.clone())
        .build()
        .with_context(|| format!("创建流水线失败: {}", args.url))?;

    let console = Arc::new(ConsoleObserver::default());
    let observer: Arc<dyn AVPipelineObserver> = console.clone();
    pipeline.add_observer(&observer);
    pipeline.start();

    let dispatcher = pipeline.dispatcher().clone();
    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let playing = dispatcher.run_main_until(Duration::from_secs(args.seconds.max(1)), || {
        pipeline.state() == PipelineState::Playing || console.failed.load(Ordering::SeqCst)
    });
    if !playing || console.failed.load(Ordering::SeqCst) {
        pipeline.stop();
        dispatcher.run_main_pending();
        bail!("流水线未能进入播放状态: {:?}", pipeline.state());
    }

    if let Some(seek) = args.seek {
        dispatcher.run_main_for(Duration::from_secs(1).min(deadline.saturating_duration_since(Instant::now())));
        pipeline.seek(seek);
        pipeline.get_video_key_frame_async(seek, 160, 90);
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    dispatcher.run_main_until(remaining, || console.failed.load(Ordering::SeqCst));

    let stats = pipeline.render_stats();
    info!(
        "📊 播放时间 {}ms, 绘制 {} 帧 (sink {}), 丢弃 {} 帧, 等待解码 {} 次",
        pipeline.get_playback_time(),
        stats.painted,
        paint_sink.frames.load(Ordering::Relaxed),
        stats.dropped,
        stats.waits
    );
    pipeline.show_state_info();
    pipeline.stop();
    dispatcher.run_main_pending();

    if console.failed.load(Ordering::SeqCst) {
        bail!("播放失败: {}", pipeline.source_name());
    }
    info!("✅ 播放结束");
    Ok(())
}
