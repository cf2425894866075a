use crate::core::{log_ctx, MediaError, Result};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 音频数据提供方（音频渲染器），由输出设备在自己的线程上拉取
pub trait AudioRenderSource: Send + Sync {
    /// 填充交错 f32 采样，返回有效采样数（其余部分为静音）
    fn render(&self, out: &mut [f32]) -> usize;
}

/// 音频输出设备
pub trait AudioRendererSink: Send {
    /// 打开设备，返回实际使用的 (采样率, 声道数)
    fn initialize(
        &mut self,
        sample_rate: u32,
        channels: u16,
        source: Arc<dyn AudioRenderSource>,
    ) -> Result<(u32, u16)>;

    fn play(&mut self) -> Result<()>;

    fn pause(&mut self);

    fn stop(&mut self);
}

/// 不出声的输出设备：按实时速度拉取并丢弃采样
///
/// 无声卡环境和测试使用，保证音频渲染器的数据按正常节奏被消费。
pub struct NullAudioSink {
    format: Option<(u32, u16)>,
    source: Option<Arc<dyn AudioRenderSource>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    period: Duration,
}

impl NullAudioSink {
    pub fn new() -> Self {
        Self {
            format: None,
            source: None,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            period: Duration::from_millis(10),
        }
    }
}

impl Default for NullAudioSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioRendererSink for NullAudioSink {
    fn initialize(
        &mut self,
        sample_rate: u32,
        channels: u16,
        source: Arc<dyn AudioRenderSource>,
    ) -> Result<(u32, u16)> {
        if sample_rate == 0 || channels == 0 {
            return Err(MediaError::AudioError(format!(
                "无效的音频格式: {} Hz, {} 声道",
                sample_rate, channels
            )));
        }
        info!("{} 🔇 静音输出设备: {} Hz, {} 声道", log_ctx(), sample_rate, channels);
        self.format = Some((sample_rate, channels));
        self.source = Some(source);
        Ok((sample_rate, channels))
    }

    fn play(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let (Some((rate, channels)), Some(source)) = (self.format, self.source.clone()) else {
            self.running.store(false, Ordering::SeqCst);
            return Err(MediaError::AudioError("输出设备尚未初始化".to_string()));
        };
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }

        let running = self.running.clone();
        let period = self.period;
        let chunk = (rate as u64 * period.as_millis() as u64 / 1000) as usize * channels as usize;
        let handle = thread::Builder::new()
            .name("myy-null-audio".to_string())
            .spawn(move || {
                let mut buffer = vec![0f32; chunk];
                let mut next = Instant::now();
                while running.load(Ordering::SeqCst) {
                    source.render(&mut buffer);
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
            })
            .map_err(|e| MediaError::AudioError(format!("创建静音输出线程失败: {}", e)))?;
        self.thread = Some(handle);
        Ok(())
    }

    fn pause(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    fn stop(&mut self) {
        self.pause();
        self.source = None;
        debug!("{} 🔇 静音输出设备已停止", log_ctx());
    }
}

impl Drop for NullAudioSink {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "audio-output")]
pub use device::AudioOutput;

#[cfg(feature = "audio-output")]
mod device {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};

    /// 音频输出 - 使用 cpal 播放音频
    pub struct AudioOutput {
        device: Device,
        config: Option<StreamConfig>,
        stream: Option<Stream>,
    }

    // cpal::Stream 本身不是 Send；AudioOutput 只在音频渲染器的互斥锁内被访问
    unsafe impl Send for AudioOutput {}

    impl AudioOutput {
        pub fn new() -> Result<Self> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| MediaError::AudioError("无法找到音频输出设备".to_string()))?;
            debug!("{} 使用音频设备: {}", log_ctx(), device.name().unwrap_or_default());
            Ok(Self {
                device,
                config: None,
                stream: None,
            })
        }

        /// 协商后的输出配置（初始化之前为 None）
        pub fn config(&self) -> Option<&StreamConfig> {
            self.config.as_ref()
        }

        /// 检查配置是否兼容
        fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
            let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
                && config.sample_rate.0 <= supported.max_sample_rate().0;
            rate_in_range && config.channels == supported.channels()
        }

        fn supports(&self, config: &StreamConfig) -> Result<bool> {
            let mut supported = self
                .device
                .supported_output_configs()
                .map_err(|e| MediaError::AudioError(format!("无法获取支持的音频配置: {}", e)))?;
            Ok(supported.any(|range| Self::is_config_compatible(config, &range)))
        }

        /// 请求的格式不被支持时回退到常见的标准配置
        fn negotiate(&self, sample_rate: u32, channels: u16) -> Result<StreamConfig> {
            let requested = StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            if self.supports(&requested)? {
                return Ok(requested);
            }

            warn!(
                "{} ⚠️  音频设备不支持 {} Hz, {} 声道配置，回退到标准配置",
                log_ctx(),
                sample_rate,
                channels
            );
            let fallback_configs = [(48000, 2), (44100, 2), (48000, 1), (44100, 1)];
            for (fb_rate, fb_channels) in fallback_configs {
                let fallback = StreamConfig {
                    channels: fb_channels,
                    sample_rate: cpal::SampleRate(fb_rate),
                    buffer_size: cpal::BufferSize::Default,
                };
                if self.supports(&fallback)? {
                    info!("{} ✅ 使用回退配置: {} Hz, {} 声道", log_ctx(), fb_rate, fb_channels);
                    return Ok(fallback);
                }
            }
            Err(MediaError::AudioError(format!(
                "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
                sample_rate, channels
            )))
        }
    }

    impl AudioRendererSink for AudioOutput {
        fn initialize(
            &mut self,
            sample_rate: u32,
            channels: u16,
            source: Arc<dyn AudioRenderSource>,
        ) -> Result<(u32, u16)> {
            info!("{} 初始化音频输出: {} Hz, {} 声道", log_ctx(), sample_rate, channels);
            let config = self.negotiate(sample_rate, channels)?;
            let stream = self
                .device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        source.render(data);
                    },
                    move |err| {
                        warn!("{} 音频流错误: {}", log_ctx(), err);
                    },
                    None,
                )
                .map_err(|e| MediaError::AudioError(format!("创建音频流失败: {}", e)))?;
            let actual = (config.sample_rate.0, config.channels);
            self.config = Some(config);
            self.stream = Some(stream);
            Ok(actual)
        }

        fn play(&mut self) -> Result<()> {
            let stream = self
                .stream
                .as_ref()
                .ok_or_else(|| MediaError::AudioError("音频流尚未创建".to_string()))?;
            stream
                .play()
                .map_err(|e| MediaError::AudioError(format!("启动音频流失败: {}", e)))?;
            info!("{} 音频输出已启动", log_ctx());
            Ok(())
        }

        fn pause(&mut self) {
            if let Some(stream) = self.stream.as_ref() {
                if let Err(e) = stream.pause() {
                    warn!("{} 暂停音频流失败: {}", log_ctx(), e);
                }
            }
        }

        fn stop(&mut self) {
            if let Some(stream) = self.stream.take() {
                drop(stream);
                info!("{} 音频输出已停止 ({:?})", log_ctx(), self.config.take());
            }
        }
    }

    impl Drop for AudioOutput {
        fn drop(&mut self) {
            self.stop();
        }
    }
}
