// 播放流水线：状态机、观察者与拖动预览

pub mod av_pipeline;
pub mod observer;
pub mod preview;

pub use av_pipeline::{AVPipeline, AVPipelineBuilder, PipelineState};
pub use observer::{AVPipelineObserver, ObserverId, ObserverList};
pub use preview::{KeyFrameCallback, VideoPreviewPipeline};
