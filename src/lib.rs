//! 播放引擎：解封装、解码、音视频同步呈现与拖动预览
//!
//! 宿主创建 [`runtime::Dispatcher`]，用 [`AVPipeline::builder`] 构造流水线，
//! 并在自己的线程上驱动 Main 队列接收观察者事件。

pub mod core;
pub mod pipeline;
pub mod player;
pub mod renderer;
pub mod runtime;

pub use crate::core::{
    log_ctx, EngineConfig, MediaError, MediaInfo, MediaSource, PipelineStatus, PlaybackClock, Result,
    VideoFrame,
};
pub use crate::pipeline::{AVPipeline, AVPipelineBuilder, AVPipelineObserver, ObserverId, PipelineState};
pub use crate::renderer::{NullPaintSink, PaintSink};
pub use crate::runtime::{Dispatcher, QueueId};
