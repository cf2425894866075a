// 任务派发运行时：具名的单一用途任务队列

pub mod message_loop;

pub use message_loop::{current_queue, CompletionHook, MessageLoop, QueueId, Task};

use crate::core::{log_ctx, Result};
use log::info;
use std::time::Duration;

/// 任务派发器，持有 Main / Demux / Decode / Work 四个队列
///
/// 由宿主创建并显式传给各组件，进程内不存在全局单例。
pub struct Dispatcher {
    loops: [MessageLoop; 4],
}

impl Dispatcher {
    pub fn new(slow_task_warn: Duration) -> Self {
        info!("{} 🚀 创建任务派发器", log_ctx());
        Self {
            loops: QueueId::ALL.map(|id| MessageLoop::new(id, slow_task_warn)),
        }
    }

    pub fn message_loop(&self, queue: QueueId) -> &MessageLoop {
        &self.loops[queue.index()]
    }

    /// 投递任务到指定队列并立即返回
    #[track_caller]
    pub fn post_task<F>(&self, queue: QueueId, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.message_loop(queue).post_task(Box::new(task))
    }

    pub fn pending_count(&self, queue: QueueId) -> usize {
        self.message_loop(queue).pending_count()
    }

    pub fn set_completion_hook(&self, queue: QueueId, hook: Option<CompletionHook>) {
        self.message_loop(queue).set_completion_hook(hook);
    }

    /// 当前线程是否正在执行指定队列的任务
    pub fn is_on(&self, queue: QueueId) -> bool {
        current_queue() == Some(queue)
    }

    /// 执行 Main 队列中已有的任务
    pub fn run_main_pending(&self) -> usize {
        self.message_loop(QueueId::Main).run_pending()
    }

    /// 在调用线程上驱动 Main 队列一段时间
    pub fn run_main_for(&self, duration: Duration) -> usize {
        self.message_loop(QueueId::Main).run_for(duration)
    }

    /// 驱动 Main 队列直到条件满足或超时，返回条件是否满足
    pub fn run_main_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        self.message_loop(QueueId::Main).run_until(timeout, &mut done);
        done()
    }

    pub fn stop(&self, queue: QueueId) {
        self.message_loop(queue).stop();
    }

    /// 停止所有队列（工作线程会被 join）
    pub fn stop_all(&self) {
        for message_loop in &self.loops {
            message_loop.stop();
        }
        info!("{} ✅ 任务派发器已停止", log_ctx());
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_worker_queue_runs_in_fifo_order() {
        let dispatcher = Dispatcher::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let order = order.clone();
            dispatcher
                .post_task(QueueId::Decode, move || order.lock().push(i))
                .unwrap();
        }
        let done = {
            let order = order.clone();
            dispatcher.run_main_until(Duration::from_secs(2), move || order.lock().len() == 100)
        };
        assert!(done);
        assert_eq!(*order.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_main_queue_runs_only_when_pumped() {
        let dispatcher = Dispatcher::default();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        dispatcher
            .post_task(QueueId::Main, move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.pending_count(QueueId::Main), 1);
        assert_eq!(dispatcher.run_main_pending(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.pending_count(QueueId::Main), 0);
    }

    #[test]
    fn test_completion_hook_sees_backlog_drain() {
        let dispatcher = Dispatcher::default();
        let remaining = Arc::new(Mutex::new(Vec::new()));
        let r = remaining.clone();
        dispatcher.set_completion_hook(
            QueueId::Main,
            Some(Arc::new(move |queue, left| {
                assert_eq!(queue, QueueId::Main);
                r.lock().push(left);
            })),
        );
        for _ in 0..3 {
            dispatcher.post_task(QueueId::Main, || {}).unwrap();
        }
        dispatcher.run_main_pending();
        assert_eq!(*remaining.lock(), vec![2, 1, 0]);
    }

    #[test]
    fn test_tasks_know_their_queue() {
        let dispatcher = Arc::new(Dispatcher::default());
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let d = dispatcher.clone();
        dispatcher
            .post_task(QueueId::Work, move || {
                *s.lock() = Some(d.is_on(QueueId::Work));
            })
            .unwrap();
        let s = seen.clone();
        assert!(dispatcher.run_main_until(Duration::from_secs(2), move || s.lock().is_some()));
        assert_eq!(*seen.lock(), Some(true));
        assert!(!dispatcher.is_on(QueueId::Work));
    }

    #[test]
    fn test_post_after_stop_is_rejected() {
        let dispatcher = Dispatcher::default();
        dispatcher.stop(QueueId::Demux);
        assert!(dispatcher.post_task(QueueId::Demux, || {}).is_err());
        assert!(dispatcher.post_task(QueueId::Decode, || {}).is_ok());
    }

    #[test]
    fn test_panicking_task_does_not_kill_queue() {
        let dispatcher = Dispatcher::default();
        dispatcher
            .post_task(QueueId::Work, || panic!("任务内部错误"))
            .unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        dispatcher
            .post_task(QueueId::Work, move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let c = counter.clone();
        assert!(dispatcher.run_main_until(Duration::from_secs(2), move || {
            c.load(Ordering::SeqCst) == 1
        }));
    }
}
