// 播放器核心模块：字节源、解封装、解码与音频输出

pub mod audio_output;
pub mod backend;
pub mod byte_source;
pub mod decoder;
pub mod demuxer;
pub mod demuxer_source;
pub mod frame_stream;
pub mod synthetic;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_backend;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_decoder;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_demuxer;

pub use audio_output::{AudioRenderSource, AudioRendererSink, NullAudioSink};
#[cfg(feature = "audio-output")]
pub use audio_output::AudioOutput;
pub use backend::{backend_for_source, MediaBackend};
pub use byte_source::{ByteSource, FileSource, MemorySource};
pub use decoder::{AudioDecoder, VideoDecoder};
pub use demuxer::{Demuxer, DemuxerEvents, DemuxerStream, ReadResult, StatusCallback};
pub use demuxer_source::MediaDemuxer;
pub use frame_stream::{AudioFrameStream, FrameStream, StreamDecoder, VideoFrameStream};
pub use synthetic::{SyntheticBackend, SyntheticOptions};
