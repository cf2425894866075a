use crate::core::{
    log_ctx, AudioDecoderConfig, EncodedAVFrame, MediaInfo, PipelineStatus, StreamType,
    VideoDecoderConfig,
};
use crate::player::demuxer_source::MediaDemuxer;
use crate::runtime::{Dispatcher, QueueId};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// 异步读取结果
#[derive(Debug)]
pub enum ReadResult<T> {
    Ready(T),
    EndOfStream,
    /// 读取被 Seek / 清空 / 停止取消
    Aborted,
    Failed(PipelineStatus),
}

impl<T> ReadResult<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadResult::Ready(_))
    }
}

pub type StatusCallback = Box<dyn FnOnce(PipelineStatus) + Send>;
pub type DemuxerReadCallback = Box<dyn FnOnce(ReadResult<EncodedAVFrame>) + Send>;

/// 解封装器事件（构造时注入）
#[derive(Clone)]
pub struct DemuxerEvents {
    /// 媒体信息就绪（Demux 线程）
    pub on_media_info: Arc<dyn Fn(MediaInfo) + Send + Sync>,
    /// Seek 实际落点（第一个视频帧的时间戳，Demux 线程）
    pub on_aligned_seek: Arc<dyn Fn(i64) + Send + Sync>,
}

impl DemuxerEvents {
    pub fn noop() -> Self {
        Self {
            on_media_info: Arc::new(|_| {}),
            on_aligned_seek: Arc::new(|_| {}),
        }
    }
}

struct ParkedRead {
    stream_type: StreamType,
    callback: DemuxerReadCallback,
}

/// 流控状态，与 I/O 状态分开加锁，阻塞读取期间仍可暂停
#[derive(Default)]
struct DemuxerControl {
    paused: bool,
    stopped: bool,
    parked: Vec<ParkedRead>,
}

struct DemuxerIo {
    source: Option<Box<dyn MediaDemuxer>>,
    media_info: Option<MediaInfo>,
    video_config: Option<VideoDecoderConfig>,
    audio_config: Option<AudioDecoderConfig>,
    start_time: i64,
    video_queue: VecDeque<EncodedAVFrame>,
    audio_queue: VecDeque<EncodedAVFrame>,
    source_eof: bool,
    dropped: u64,
}

impl DemuxerIo {
    fn clear_queues(&mut self) {
        self.video_queue.clear();
        self.audio_queue.clear();
    }

    /// 按流类型缓存压缩帧，超过上限丢弃最旧的
    fn buffer_frame(&mut self, frame: EncodedAVFrame, limit: usize) {
        let queue = match frame.stream_type {
            StreamType::Video => &mut self.video_queue,
            StreamType::Audio => &mut self.audio_queue,
        };
        if queue.len() >= limit {
            queue.pop_front();
            self.dropped += 1;
            if self.dropped.is_power_of_two() {
                warn!(
                    "{} ⚠️  {:?} 流缓存已满（上限 {}），累计丢弃 {} 帧",
                    log_ctx(),
                    frame.stream_type,
                    limit,
                    self.dropped
                );
            }
        }
        queue.push_back(frame);
    }

    /// 取出指定流的下一帧，缓存为空时从数据源读取
    fn pull(&mut self, stream_type: StreamType, limit: usize) -> ReadResult<EncodedAVFrame> {
        let buffered = match stream_type {
            StreamType::Video => self.video_queue.pop_front(),
            StreamType::Audio => self.audio_queue.pop_front(),
        };
        if let Some(frame) = buffered {
            return ReadResult::Ready(frame);
        }
        if self.source_eof {
            return ReadResult::EndOfStream;
        }

        loop {
            let Some(source) = self.source.as_mut() else {
                return ReadResult::Aborted;
            };
            match source.read_frame() {
                Ok(Some(frame)) if frame.stream_type == stream_type => {
                    return ReadResult::Ready(frame);
                }
                Ok(Some(frame)) => self.buffer_frame(frame, limit),
                Ok(None) => {
                    info!("{} 📭 数据源读取完毕", log_ctx());
                    self.source_eof = true;
                    return ReadResult::EndOfStream;
                }
                Err(e) => {
                    error!("{} ❌ 读取媒体数据失败: {}", log_ctx(), e);
                    return ReadResult::Failed(PipelineStatus::DemuxerReadFailed);
                }
            }
        }
    }

    /// Seek 后向前读到第一个视频帧，返回它的时间戳
    fn seek_and_align(&mut self, timestamp_ms: i64, limit: usize) -> crate::core::Result<i64> {
        self.clear_queues();
        self.source_eof = false;
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| crate::core::MediaError::Other("解封装器已释放".to_string()))?;
        source.seek(timestamp_ms)?;

        loop {
            let Some(source) = self.source.as_mut() else {
                return Ok(timestamp_ms);
            };
            match source.read_frame()? {
                Some(frame) if frame.stream_type == StreamType::Video => {
                    let aligned = frame.pts;
                    self.video_queue.push_back(frame);
                    return Ok(aligned);
                }
                Some(frame) => self.buffer_frame(frame, limit),
                None => {
                    self.source_eof = true;
                    return Ok(timestamp_ms);
                }
            }
        }
    }
}

struct DemuxerShared {
    dispatcher: Arc<Dispatcher>,
    queue_limit: usize,
    events: DemuxerEvents,
    control: Mutex<DemuxerControl>,
    io: Mutex<DemuxerIo>,
    description: String,
}

impl DemuxerShared {
    /// 取消的读取回到 Decode 队列上回调
    fn abort_reads(&self, reads: Vec<ParkedRead>) {
        if reads.is_empty() {
            return;
        }
        debug!("{} 🚫 取消 {} 个挂起的读取", log_ctx(), reads.len());
        for read in reads {
            let callback = read.callback;
            if let Err(e) = self
                .dispatcher
                .post_task(QueueId::Decode, move || callback(ReadResult::Aborted))
            {
                debug!("{} 读取取消回调未能投递: {}", log_ctx(), e);
            }
        }
    }

    fn read(self: &Arc<Self>, stream_type: StreamType, callback: DemuxerReadCallback) {
        {
            let mut control = self.control.lock();
            if control.stopped {
                drop(control);
                callback(ReadResult::Aborted);
                return;
            }
            if control.paused {
                control.parked.push(ParkedRead {
                    stream_type,
                    callback,
                });
                return;
            }
        }

        let result = self.io.lock().pull(stream_type, self.queue_limit);
        callback(result);
    }
}

/// 解封装单元
///
/// 包装一个格式层 `MediaDemuxer`，负责打开、分流缓存、暂停时挂起读取和 Seek 对齐。
/// 打开和 Seek 在 Demux 队列执行，流读取在 Decode 队列执行。
#[derive(Clone)]
pub struct Demuxer {
    shared: Arc<DemuxerShared>,
}

impl Demuxer {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        source: Box<dyn MediaDemuxer>,
        queue_limit: usize,
        events: DemuxerEvents,
    ) -> Self {
        let description = source.description();
        Self {
            shared: Arc::new(DemuxerShared {
                dispatcher,
                queue_limit: queue_limit.max(1),
                events,
                control: Mutex::new(DemuxerControl::default()),
                io: Mutex::new(DemuxerIo {
                    source: Some(source),
                    media_info: None,
                    video_config: None,
                    audio_config: None,
                    start_time: 0,
                    video_queue: VecDeque::new(),
                    audio_queue: VecDeque::new(),
                    source_eof: false,
                    dropped: 0,
                }),
                description,
            }),
        }
    }

    /// 异步打开数据源并探测流信息
    pub fn initialize(&self, done: StatusCallback) {
        let shared = self.shared.clone();
        let posted = self.shared.dispatcher.post_task(QueueId::Demux, move || {
            info!("{} 📂 打开数据源: {}", log_ctx(), shared.description);
            let opened = {
                let mut io = shared.io.lock();
                let opened = match io.source.as_mut() {
                    Some(source) => source.open().map(|info| {
                        let video = source.video_config();
                        let audio = source.audio_config();
                        let start = source.start_time();
                        (info, video, audio, start)
                    }),
                    None => Err(crate::core::MediaError::Other("解封装器已释放".to_string())),
                };
                match opened {
                    Ok((info, video, audio, start)) => {
                        io.media_info = Some(info.clone());
                        io.video_config = video;
                        io.audio_config = audio;
                        io.start_time = start;
                        Ok(info)
                    }
                    Err(e) => Err(e),
                }
            };

            match opened {
                Ok(info) => {
                    info!(
                        "{} ✅ 数据源已打开: {}x{} @ {:.2}fps, 时长 {}ms, 视频 {}, 音频 {}",
                        log_ctx(),
                        info.width,
                        info.height,
                        info.fps,
                        info.duration,
                        info.video_codec,
                        info.audio_codec
                    );
                    (shared.events.on_media_info)(info);
                    done(PipelineStatus::Ok);
                }
                Err(e) => {
                    error!("{} ❌ 打开数据源失败: {}", log_ctx(), e);
                    done(PipelineStatus::DemuxerOpenFailed);
                }
            }
        });
        if let Err(e) = posted {
            warn!("{} ⚠️  初始化任务投递失败: {}", log_ctx(), e);
        }
    }

    /// 获取指定类型的流（初始化之后可用）
    pub fn stream(&self, stream_type: StreamType) -> Option<DemuxerStream> {
        let io = self.shared.io.lock();
        let present = match stream_type {
            StreamType::Video => io.video_config.is_some(),
            StreamType::Audio => io.audio_config.is_some(),
        };
        present.then(|| DemuxerStream {
            shared: self.shared.clone(),
            stream_type,
        })
    }

    pub fn media_info(&self) -> Option<MediaInfo> {
        self.shared.io.lock().media_info.clone()
    }

    pub fn start_time(&self) -> i64 {
        self.shared.io.lock().start_time
    }

    /// 暂停：之后的读取被挂起，直到 `resume`
    pub fn pause(&self) {
        let mut control = self.shared.control.lock();
        if !control.paused {
            debug!("{} ⏸️  解封装器暂停", log_ctx());
            control.paused = true;
        }
    }

    /// 恢复：挂起的读取重新投递到 Decode 队列
    pub fn resume(&self) {
        let parked = {
            let mut control = self.shared.control.lock();
            if !control.paused {
                return;
            }
            control.paused = false;
            std::mem::take(&mut control.parked)
        };
        debug!("{} ▶️  解封装器恢复，重新投递 {} 个读取", log_ctx(), parked.len());
        for read in parked {
            let shared = self.shared.clone();
            let ParkedRead {
                stream_type,
                callback,
            } = read;
            if let Err(e) = self
                .shared
                .dispatcher
                .post_task(QueueId::Decode, move || shared.read(stream_type, callback))
            {
                debug!("{} 挂起的读取未能重新投递: {}", log_ctx(), e);
            }
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.control.lock().paused
    }

    /// 丢弃挂起的读取和已缓存的压缩帧
    pub fn clear_buffer(&self) {
        let parked = std::mem::take(&mut self.shared.control.lock().parked);
        self.shared.abort_reads(parked);
        self.shared.io.lock().clear_queues();
    }

    /// 异步 Seek
    ///
    /// 在 Demux 队列上定位后向前读到第一个视频帧，先通过 `on_aligned_seek`
    /// 报告实际落点，再回调 `done`。
    pub fn seek(&self, timestamp_ms: i64, done: StatusCallback) {
        let shared = self.shared.clone();
        let posted = self.shared.dispatcher.post_task(QueueId::Demux, move || {
            let parked = std::mem::take(&mut shared.control.lock().parked);
            shared.abort_reads(parked);

            let aligned = shared.io.lock().seek_and_align(timestamp_ms, shared.queue_limit);
            match aligned {
                Ok(aligned) => {
                    info!(
                        "{} 🎯 Seek 完成: 请求 {}ms → 落点 {}ms",
                        log_ctx(),
                        timestamp_ms,
                        aligned
                    );
                    (shared.events.on_aligned_seek)(aligned);
                    done(PipelineStatus::Ok);
                }
                Err(e) => {
                    error!("{} ❌ Seek 到 {}ms 失败: {}", log_ctx(), timestamp_ms, e);
                    done(PipelineStatus::DemuxerSeekFailed);
                }
            }
        });
        if let Err(e) = posted {
            warn!("{} ⚠️  Seek 任务投递失败: {}", log_ctx(), e);
        }
    }

    /// 停止并释放数据源，挂起的读取被取消
    pub fn stop(&self) {
        let parked = {
            let mut control = self.shared.control.lock();
            if control.stopped {
                return;
            }
            control.stopped = true;
            std::mem::take(&mut control.parked)
        };
        self.shared.abort_reads(parked);
        let mut io = self.shared.io.lock();
        io.clear_queues();
        io.source = None;
        info!("{} 🗑️  解封装器已释放: {}", log_ctx(), self.shared.description);
    }

    /// 指定流当前缓存的压缩帧数
    pub fn buffered_len(&self, stream_type: StreamType) -> usize {
        let io = self.shared.io.lock();
        match stream_type {
            StreamType::Video => io.video_queue.len(),
            StreamType::Audio => io.audio_queue.len(),
        }
    }

    pub fn description(&self) -> &str {
        &self.shared.description
    }
}

/// 解封装器的单个流，解码单元通过它读取压缩帧
#[derive(Clone)]
pub struct DemuxerStream {
    shared: Arc<DemuxerShared>,
    stream_type: StreamType,
}

impl DemuxerStream {
    pub fn stream_type(&self) -> StreamType {
        self.stream_type
    }

    pub fn video_config(&self) -> Option<VideoDecoderConfig> {
        self.shared.io.lock().video_config.clone()
    }

    pub fn audio_config(&self) -> Option<AudioDecoderConfig> {
        self.shared.io.lock().audio_config.clone()
    }

    /// 读取下一帧，结果通过回调返回；暂停期间挂起
    pub fn read(&self, callback: DemuxerReadCallback) {
        self.shared.read(self.stream_type, callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::synthetic::{SyntheticDemuxer, SyntheticOptions};
    use std::time::Duration;

    fn open_demuxer(
        dispatcher: &Arc<Dispatcher>,
        url: &str,
        limit: usize,
        events: DemuxerEvents,
    ) -> Demuxer {
        let options = SyntheticOptions::parse(url).unwrap();
        let demuxer = Demuxer::new(
            dispatcher.clone(),
            Box::new(SyntheticDemuxer::new(options)),
            limit,
            events,
        );
        let status = Arc::new(Mutex::new(None));
        let s = status.clone();
        demuxer.initialize(Box::new(move |st| *s.lock() = Some(st)));
        let s = status.clone();
        assert!(dispatcher.run_main_until(Duration::from_secs(2), move || s.lock().is_some()));
        assert_eq!(*status.lock(), Some(PipelineStatus::Ok));
        demuxer
    }

    fn read_now(dispatcher: &Arc<Dispatcher>, stream: &DemuxerStream) -> ReadResult<EncodedAVFrame> {
        let slot = Arc::new(Mutex::new(None));
        let s = slot.clone();
        let stream = stream.clone();
        dispatcher
            .post_task(QueueId::Decode, move || {
                stream.read(Box::new(move |r| *s.lock() = Some(r)))
            })
            .unwrap();
        let s = slot.clone();
        assert!(dispatcher.run_main_until(Duration::from_secs(2), move || s.lock().is_some()));
        let result = slot.lock().take().unwrap();
        result
    }

    #[test]
    fn test_initialize_reports_media_info() {
        let dispatcher = Arc::new(Dispatcher::default());
        let info = Arc::new(Mutex::new(None));
        let i = info.clone();
        let events = DemuxerEvents {
            on_media_info: Arc::new(move |m| *i.lock() = Some(m)),
            on_aligned_seek: Arc::new(|_| {}),
        };
        let demuxer = open_demuxer(&dispatcher, "synthetic://?duration=3000", 64, events);
        let info = info.lock().clone().unwrap();
        assert_eq!(info.duration, 3000);
        assert!(demuxer.stream(StreamType::Video).is_some());
        assert!(demuxer.stream(StreamType::Audio).is_some());
    }

    #[test]
    fn test_open_failure_reports_status() {
        let dispatcher = Arc::new(Dispatcher::default());
        let options = SyntheticOptions::parse("synthetic://?fail_open=1").unwrap();
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
        assert_eq!(*status.lock(), Some(PipelineStatus::DemuxerOpenFailed));
        assert!(demuxer.stream(StreamType::Video).is_none());
    }

    #[test]
    fn test_reads_are_split_per_stream() {
        let dispatcher = Arc::new(Dispatcher::default());
        let demuxer = open_demuxer(&dispatcher, "synthetic://?duration=2000", 64, DemuxerEvents::noop());
        let video = demuxer.stream(StreamType::Video).unwrap();
        let mut last = -1;
        for _ in 0..5 {
            match read_now(&dispatcher, &video) {
                ReadResult::Ready(frame) => {
                    assert_eq!(frame.stream_type, StreamType::Video);
                    assert!(frame.pts > last);
                    last = frame.pts;
                }
                other => panic!("意外的读取结果: {:?}", other),
            }
        }
        // 读视频时经过的音频帧被缓存下来
        assert!(demuxer.buffered_len(StreamType::Audio) > 0);
    }

    #[test]
    fn test_stream_queue_limit_drops_oldest() {
        let dispatcher = Arc::new(Dispatcher::default());
        let demuxer = open_demuxer(&dispatcher, "synthetic://?duration=5000", 4, DemuxerEvents::noop());
        let video = demuxer.stream(StreamType::Video).unwrap();
        for _ in 0..20 {
            assert!(read_now(&dispatcher, &video).is_ready());
        }
        assert_eq!(demuxer.buffered_len(StreamType::Audio), 4);
    }

    #[test]
    fn test_reads_park_while_paused() {
        let dispatcher = Arc::new(Dispatcher::default());
        let demuxer = open_demuxer(&dispatcher, "synthetic://?duration=2000", 64, DemuxerEvents::noop());
        let video = demuxer.stream(StreamType::Video).unwrap();
        demuxer.pause();

        let slot = Arc::new(Mutex::new(None));
        let s = slot.clone();
        let v = video.clone();
        dispatcher
            .post_task(QueueId::Decode, move || v.read(Box::new(move |r| *s.lock() = Some(r))))
            .unwrap();
        dispatcher.run_main_for(Duration::from_millis(50));
        assert!(slot.lock().is_none());

        demuxer.resume();
        let s = slot.clone();
        assert!(dispatcher.run_main_until(Duration::from_secs(2), move || s.lock().is_some()));
        assert!(slot.lock().as_ref().unwrap().is_ready());
    }

    #[test]
    fn test_seek_reports_keyframe_alignment() {
        let dispatcher = Arc::new(Dispatcher::default());
        let aligned = Arc::new(Mutex::new(None));
        let a = aligned.clone();
        let events = DemuxerEvents {
            on_media_info: Arc::new(|_| {}),
            on_aligned_seek: Arc::new(move |ts| *a.lock() = Some(ts)),
        };
        let demuxer = open_demuxer(
            &dispatcher,
            "synthetic://?duration=5000&fps=25&gop=1000",
            64,
            events,
        );
        let status = Arc::new(Mutex::new(None));
        let s = status.clone();
        demuxer.seek(1500, Box::new(move |st| *s.lock() = Some(st)));
        let s = status.clone();
        assert!(dispatcher.run_main_until(Duration::from_secs(2), move || s.lock().is_some()));
        assert_eq!(*status.lock(), Some(PipelineStatus::Ok));
        assert_eq!(*aligned.lock(), Some(1000));

        let video = demuxer.stream(StreamType::Video).unwrap();
        match read_now(&dispatcher, &video) {
            ReadResult::Ready(frame) => {
                assert_eq!(frame.pts, 1000);
                assert!(frame.is_keyframe);
            }
            other => panic!("意外的读取结果: {:?}", other),
        }
    }

    #[test]
    fn test_stop_aborts_parked_reads() {
        let dispatcher = Arc::new(Dispatcher::default());
        let demuxer = open_demuxer(&dispatcher, "synthetic://?duration=2000", 64, DemuxerEvents::noop());
        let video = demuxer.stream(StreamType::Video).unwrap();
        demuxer.pause();
        let slot = Arc::new(Mutex::new(None));
        let s = slot.clone();
        video.read(Box::new(move |r| *s.lock() = Some(r)));
        demuxer.stop();
        let s = slot.clone();
        assert!(dispatcher.run_main_until(Duration::from_secs(2), move || s.lock().is_some()));
        assert!(matches!(*slot.lock(), Some(ReadResult::Aborted)));
    }
}
