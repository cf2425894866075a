use crate::core::{log_ctx, MediaError, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 任务队列标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueId {
    /// 宿主线程驱动，无专属工作线程
    Main,
    Demux,
    Decode,
    Work,
}

impl QueueId {
    pub const ALL: [QueueId; 4] = [QueueId::Main, QueueId::Demux, QueueId::Decode, QueueId::Work];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueId::Main => "main",
            QueueId::Demux => "demux",
            QueueId::Decode => "decode",
            QueueId::Work => "work",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            QueueId::Main => 0,
            QueueId::Demux => 1,
            QueueId::Decode => 2,
            QueueId::Work => 3,
        }
    }
}

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 任务完成钩子：参数为队列和剩余待执行任务数
pub type CompletionHook = Arc<dyn Fn(QueueId, usize) + Send + Sync>;

thread_local! {
    static CURRENT_QUEUE: Cell<Option<QueueId>> = const { Cell::new(None) };
}

/// 当前线程正在执行哪个队列的任务
pub fn current_queue() -> Option<QueueId> {
    CURRENT_QUEUE.with(|c| c.get())
}

struct PendingTask {
    task: Task,
    posted_from: &'static Location<'static>,
    posted_at: Instant,
}

enum Message {
    Task(PendingTask),
    Quit,
}

/// 执行一个任务期间的共享状态
struct LoopShared {
    id: QueueId,
    pending: AtomicUsize,
    stopped: AtomicBool,
    completion_hook: RwLock<Option<CompletionHook>>,
    slow_task_warn: Duration,
}

impl LoopShared {
    /// 包装执行：计数、耗时统计、完成钩子
    fn run_task(&self, pending_task: PendingTask) {
        let PendingTask { task, posted_from, posted_at } = pending_task;
        let started = Instant::now();
        let queued_for = started.duration_since(posted_at);

        let previous = CURRENT_QUEUE.with(|c| c.replace(Some(self.id)));
        let result = panic::catch_unwind(AssertUnwindSafe(task));
        CURRENT_QUEUE.with(|c| c.set(previous));

        if result.is_err() {
            error!(
                "{} 💥 [{}] 任务 panic（投递自 {}），队列继续运行",
                log_ctx(),
                self.id.as_str(),
                posted_from
            );
        }

        let run_for = started.elapsed();
        if run_for > self.slow_task_warn {
            warn!(
                "{} 🐢 [{}] 任务耗时 {:?}（排队 {:?}，投递自 {}）",
                log_ctx(),
                self.id.as_str(),
                run_for,
                queued_for,
                posted_from
            );
        }

        let remaining = self.pending.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        let hook = self.completion_hook.read().clone();
        if let Some(hook) = hook {
            hook(self.id, remaining);
        }
    }
}

/// 单一用途的任务队列
///
/// 除 Main 外每个队列拥有一个工作线程，严格按 FIFO 顺序执行任务。
/// Main 队列由宿主循环调用 `run_pending` / `run_for` 驱动。
pub struct MessageLoop {
    shared: Arc<LoopShared>,
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl MessageLoop {
    pub fn new(id: QueueId, slow_task_warn: Duration) -> Self {
        let (sender, receiver) = unbounded::<Message>();
        let shared = Arc::new(LoopShared {
            id,
            pending: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            completion_hook: RwLock::new(None),
            slow_task_warn,
        });

        let thread = if id == QueueId::Main {
            // 主线程消息循环由宿主驱动，不需要创建线程
            None
        } else {
            let rx = receiver.clone();
            let loop_shared = shared.clone();
            match thread::Builder::new()
                .name(format!("myy-{}", id.as_str()))
                .spawn(move || Self::thread_main(loop_shared, rx))
            {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!("{} ❌ 创建 {} 线程失败: {}", log_ctx(), id.as_str(), e);
                    None
                }
            }
        };

        Self {
            shared,
            sender,
            receiver,
            thread: Mutex::new(thread),
        }
    }

    fn thread_main(shared: Arc<LoopShared>, receiver: Receiver<Message>) {
        info!("{} 🧵 [{}] 队列线程启动", log_ctx(), shared.id.as_str());
        let mut executed: u64 = 0;
        while let Ok(message) = receiver.recv() {
            match message {
                Message::Task(task) => {
                    if shared.stopped.load(Ordering::SeqCst) {
                        shared.pending.fetch_sub(1, Ordering::SeqCst);
                        continue;
                    }
                    shared.run_task(task);
                    executed += 1;
                }
                Message::Quit => break,
            }
        }
        info!(
            "{} 🛑 [{}] 队列线程退出（共执行 {} 个任务）",
            log_ctx(),
            shared.id.as_str(),
            executed
        );
    }

    pub fn id(&self) -> QueueId {
        self.shared.id
    }

    /// 投递任务，立即返回
    #[track_caller]
    pub fn post_task(&self, task: Task) -> Result<()> {
        let posted_from = Location::caller();
        if self.shared.stopped.load(Ordering::SeqCst) {
            warn!(
                "{} ⚠️  [{}] 队列已停止，丢弃任务（投递自 {}）",
                log_ctx(),
                self.shared.id.as_str(),
                posted_from
            );
            return Err(MediaError::DispatchError(format!(
                "队列 {} 已停止",
                self.shared.id.as_str()
            )));
        }
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        self.sender
            .send(Message::Task(PendingTask {
                task,
                posted_from,
                posted_at: Instant::now(),
            }))
            .map_err(|_| {
                self.shared.pending.fetch_sub(1, Ordering::SeqCst);
                MediaError::DispatchError(format!("队列 {} 通道已关闭", self.shared.id.as_str()))
            })
    }

    /// 当前积压的任务数
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn set_completion_hook(&self, hook: Option<CompletionHook>) {
        *self.shared.completion_hook.write() = hook;
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// 执行当前已在队列中的任务（宿主驱动 Main 队列使用），返回执行数
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while !self.is_stopped() {
            match self.receiver.try_recv() {
                Ok(Message::Task(task)) => {
                    self.shared.run_task(task);
                    count += 1;
                }
                Ok(Message::Quit) | Err(_) => break,
            }
        }
        count
    }

    /// 在调用线程上执行任务，直到超时
    pub fn run_for(&self, duration: Duration) -> usize {
        self.run_until(duration, || false)
    }

    /// 在调用线程上执行任务，直到条件满足或超时
    pub fn run_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> usize {
        let deadline = Instant::now() + timeout;
        let mut count = 0;
        loop {
            if done() || self.is_stopped() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            // 短超时轮询，使条件能被及时检查
            let wait = (deadline - now).min(Duration::from_millis(5));
            match self.receiver.recv_timeout(wait) {
                Ok(Message::Task(task)) => {
                    self.shared.run_task(task);
                    count += 1;
                }
                Ok(Message::Quit) => break,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        count
    }

    /// 停止队列的派发循环，之后不能再投递任务
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("{} ⏹️  [{}] 停止队列", log_ctx(), self.shared.id.as_str());
        let _ = self.sender.send(Message::Quit);

        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            // 在自己的线程里停止时不能 join 自己
            if handle.thread().id() == thread::current().id() {
                return;
            }
            let _ = handle.join();
        }

        // 丢弃剩余任务
        let mut dropped = 0;
        while let Ok(message) = self.receiver.try_recv() {
            if let Message::Task(_) = message {
                self.shared.pending.fetch_sub(1, Ordering::SeqCst);
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(
                "{} 🗑️  [{}] 停止时丢弃 {} 个未执行任务",
                log_ctx(),
                self.shared.id.as_str(),
                dropped
            );
        }
    }
}

impl Drop for MessageLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
