use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// 墙钟时间来源（毫秒），可注入以便测试
pub trait Ticker: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// 基于 `Instant` 的单调墙钟
pub struct SystemTicker {
    origin: Instant,
}

impl SystemTicker {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker for SystemTicker {
    fn now_ms(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }
}

/// 手动推进的墙钟（测试用）
#[derive(Default)]
pub struct ManualTicker {
    now: AtomicI64,
}

impl ManualTicker {
    pub fn new(start_ms: i64) -> Self {
        Self { now: AtomicI64::new(start_ms) }
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Ticker for ManualTicker {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// 播放时钟 - 用于音视频同步
///
/// 媒体时间 = 锚点以来的墙钟流逝 × 速率，暂停期间冻结，Seek 时重新定锚。
/// 只有在 `start_ticking()` 之后且未暂停时才走动。
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
    ticker: Arc<dyn Ticker>,
}

struct ClockInner {
    base_pts: i64,              // 基准 PTS（毫秒）
    base_wall: i64,             // 基准墙钟（毫秒）
    playback_rate: f64,         // 播放速率（1.0 = 正常）
    ticking: bool,              // 是否已开始走动（首个音频帧到达后）
    paused: bool,
    frozen_at: i64,             // 不走动时的位置
}

impl ClockInner {
    fn running(&self) -> bool {
        self.ticking && !self.paused
    }

    fn now(&self, wall: i64) -> i64 {
        if self.running() {
            let elapsed = (wall - self.base_wall).max(0);
            self.base_pts + (elapsed as f64 * self.playback_rate) as i64
        } else {
            self.frozen_at
        }
    }

    /// 冻结当前值或从冻结值重新定锚
    fn rebase(&mut self, wall: i64, pts: i64) {
        self.base_pts = pts;
        self.base_wall = wall;
        self.frozen_at = pts;
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::with_ticker(Arc::new(SystemTicker::new()))
    }

    pub fn with_ticker(ticker: Arc<dyn Ticker>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                base_pts: 0,
                base_wall: 0,
                playback_rate: 1.0,
                ticking: false,
                paused: false,
                frozen_at: 0,
            })),
            ticker,
        }
    }

    /// 获取当前播放时间（毫秒）
    pub fn now(&self) -> i64 {
        let wall = self.ticker.now_ms();
        self.inner.lock().now(wall)
    }

    /// 设置起始时间（开始走动前调用）
    pub fn set_start_time(&self, pts: i64) {
        let wall = self.ticker.now_ms();
        self.inner.lock().rebase(wall, pts);
    }

    /// 开始走动（首个音频帧到达时）
    pub fn start_ticking(&self) {
        let wall = self.ticker.now_ms();
        let mut inner = self.inner.lock();
        if inner.ticking {
            return;
        }
        let current = inner.now(wall);
        inner.ticking = true;
        inner.rebase(wall, current);
    }

    /// 停止走动
    pub fn stop_ticking(&self) {
        let wall = self.ticker.now_ms();
        let mut inner = self.inner.lock();
        let current = inner.now(wall);
        inner.ticking = false;
        inner.rebase(wall, current);
    }

    /// 暂停
    pub fn pause(&self) {
        let wall = self.ticker.now_ms();
        let mut inner = self.inner.lock();
        if inner.paused {
            return;
        }
        let current = inner.now(wall);
        inner.paused = true;
        inner.rebase(wall, current);
    }

    /// 恢复
    pub fn resume(&self) {
        let wall = self.ticker.now_ms();
        let mut inner = self.inner.lock();
        if !inner.paused {
            return;
        }
        let current = inner.now(wall);
        inner.paused = false;
        inner.rebase(wall, current);
    }

    /// 重新定锚到指定时间，保持走动/暂停状态不变
    pub fn seek(&self, pts: i64) {
        let wall = self.ticker.now_ms();
        self.inner.lock().rebase(wall, pts);
    }

    /// 设置播放速率
    pub fn set_rate(&self, rate: f64) {
        let wall = self.ticker.now_ms();
        let mut inner = self.inner.lock();
        let current = inner.now(wall);
        inner.rebase(wall, current);
        inner.playback_rate = rate.max(0.0);
    }

    pub fn rate(&self) -> f64 {
        self.inner.lock().playback_rate
    }

    /// 是否暂停
    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    pub fn is_ticking(&self) -> bool {
        self.inner.lock().ticking
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_clock() -> (Arc<ManualTicker>, PlaybackClock) {
        let ticker = Arc::new(ManualTicker::new(1_000));
        let clock = PlaybackClock::with_ticker(ticker.clone());
        (ticker, clock)
    }

    #[test]
    fn test_clock_does_not_move_before_ticking() {
        let (ticker, clock) = manual_clock();
        clock.set_start_time(500);
        ticker.advance(100);
        assert_eq!(clock.now(), 500);
        clock.start_ticking();
        ticker.advance(40);
        assert_eq!(clock.now(), 540);
    }

    #[test]
    fn test_pause_freezes_and_resume_continues() {
        let (ticker, clock) = manual_clock();
        clock.start_ticking();
        ticker.advance(100);
        clock.pause();
        clock.pause();
        ticker.advance(1_000);
        assert_eq!(clock.now(), 100);
        clock.resume();
        ticker.advance(10);
        assert_eq!(clock.now(), 110);
    }

    #[test]
    fn test_rate_scales_elapsed_time() {
        let (ticker, clock) = manual_clock();
        clock.start_ticking();
        ticker.advance(100);
        clock.set_rate(2.0);
        ticker.advance(100);
        assert_eq!(clock.now(), 300);
    }

    #[test]
    fn test_seek_rebases_while_paused() {
        let (ticker, clock) = manual_clock();
        clock.start_ticking();
        ticker.advance(100);
        clock.pause();
        clock.seek(1_200);
        ticker.advance(50);
        assert_eq!(clock.now(), 1_200);
        clock.resume();
        ticker.advance(50);
        assert_eq!(clock.now(), 1_250);
    }

    #[test]
    fn test_monotonic_with_system_ticker() {
        let clock = PlaybackClock::new();
        clock.start_ticking();
        let mut last = clock.now();
        for _ in 0..1000 {
            let now = clock.now();
            assert!(now >= last);
            last = now;
        }
    }
}
