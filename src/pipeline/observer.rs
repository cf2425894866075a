use crate::core::{MediaInfo, PipelineStatus, VideoFrame};
use crate::pipeline::av_pipeline::PipelineState;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// 流水线观察者，所有回调都在 Main 队列上执行
pub trait AVPipelineObserver: Send + Sync {
    fn on_media_info(&self, info: &MediaInfo);

    fn on_progress(&self, timestamp_ms: i64);

    /// 打开失败（初始化阶段的失败）
    fn on_open_failed(&self, name: &str, code: i32, description: &str);

    /// 预览关键帧就绪
    fn on_key_frame(&self, timestamp_ms: i64, frame: Arc<VideoFrame>);

    fn on_state_changed(&self, _state: PipelineState) {}

    /// Seek 的实际落点
    fn on_seek_aligned(&self, _timestamp_ms: i64) {}

    /// 播放中的 IO 失败
    fn on_playback_error(&self, _status: PipelineStatus) {}
}

/// 注册句柄，用于注销
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// 观察者注册表
///
/// 只持有弱引用：宿主界面提前销毁时不会收到悬空回调，失效的条目在下次分发时清理。
#[derive(Default)]
pub struct ObserverList {
    entries: Mutex<Vec<(ObserverId, Weak<dyn AVPipelineObserver>)>>,
    next_id: Mutex<u64>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: &Arc<dyn AVPipelineObserver>) -> ObserverId {
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            ObserverId(*next)
        };
        self.entries.lock().push((id, Arc::downgrade(observer)));
        id
    }

    pub fn remove(&self, id: ObserverId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// 存活的观察者快照（回调在锁外执行）
    pub fn snapshot(&self) -> Vec<Arc<dyn AVPipelineObserver>> {
        let mut entries = self.entries.lock();
        entries.retain(|(_, weak)| weak.strong_count() > 0);
        entries.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct ProgressRecorder {
        last: AtomicI64,
    }

    impl AVPipelineObserver for ProgressRecorder {
        fn on_media_info(&self, _info: &MediaInfo) {}

        fn on_progress(&self, timestamp_ms: i64) {
            self.last.store(timestamp_ms, Ordering::SeqCst);
        }

        fn on_open_failed(&self, _name: &str, _code: i32, _description: &str) {}

        fn on_key_frame(&self, _timestamp_ms: i64, _frame: Arc<VideoFrame>) {}
    }

    fn recorder() -> Arc<ProgressRecorder> {
        Arc::new(ProgressRecorder {
            last: AtomicI64::new(-1),
        })
    }

    #[test]
    fn test_dropped_observer_is_pruned() {
        let list = ObserverList::new();
        let kept = recorder();
        let kept_dyn: Arc<dyn AVPipelineObserver> = kept.clone();
        list.add(&kept_dyn);
        {
            let gone: Arc<dyn AVPipelineObserver> = recorder();
            list.add(&gone);
        }
        assert_eq!(list.len(), 2);

        for observer in list.snapshot() {
            observer.on_progress(40);
        }
        assert_eq!(list.len(), 1);
        assert_eq!(kept.last.load(Ordering::SeqCst), 40);
    }

    #[test]
    fn test_remove_by_id() {
        let list = ObserverList::new();
        let observer: Arc<dyn AVPipelineObserver> = recorder();
        let id = list.add(&observer);
        assert!(list.remove(id));
        assert!(!list.remove(id));
        assert!(list.snapshot().is_empty());
    }
}
