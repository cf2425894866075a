use crate::core::error::{MediaError, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 指定配置文件路径的环境变量
pub const CONFIG_ENV: &str = "MYY_ENGINE_CONFIG";

/// 引擎配置
///
/// 调度常数原先是针对单一硬件经验调出来的，这里全部做成可配置项。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 晚于时钟多少毫秒内的帧仍然绘制，超过则丢弃
    pub max_frame_delta_ms: i64,
    /// 绘制线程每轮的让出间隔（毫秒）
    pub paint_sleep_interval_ms: u64,
    /// 待绘制队列容量
    pub pending_paint_capacity: usize,
    /// 已解码音频帧缓冲容量
    pub audio_buffer_capacity: usize,
    /// 等待解码超过该值（毫秒）记为一次"等待"
    pub wait_warn_ms: u64,
    /// 解封装器每个流缓存的压缩帧上限
    pub demux_stream_queue_limit: usize,
    /// 任务执行超过该值（毫秒）打印告警
    pub slow_task_warn_ms: u64,
    /// 单次预览请求最多解码的帧数
    pub preview_max_decode_frames: usize,
    /// 网络流选项
    pub network: NetworkConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_frame_delta_ms: 20,
            paint_sleep_interval_ms: 1000 / 60,
            pending_paint_capacity: 8,
            audio_buffer_capacity: 16,
            wait_warn_ms: 5,
            demux_stream_queue_limit: 512,
            slow_task_warn_ms: 50,
            preview_max_decode_frames: 300,
            network: NetworkConfig::default(),
        }
    }
}

/// 网络流配置（打开 URL 时传给 FFmpeg）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// 打开超时（微秒）
    pub open_timeout_us: u64,
    /// 读写超时（微秒）
    pub rw_timeout_us: u64,
    /// 探测大小（字节）
    pub probe_size: u64,
    /// 分析时长（微秒）
    pub analyze_duration_us: u64,
    /// 是否启用 FFmpeg 内部重连
    pub reconnect: bool,
    /// 最大重连间隔（秒）
    pub reconnect_delay_max_s: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            open_timeout_us: 15_000_000,
            rw_timeout_us: 8_000_000,
            probe_size: 10_000_000,
            analyze_duration_us: 5_000_000,
            reconnect: true,
            reconnect_delay_max_s: 4,
        }
    }
}

impl EngineConfig {
    /// 从 JSON 文件读取配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        info!("📄 已加载配置: {}", path.display());
        Ok(config)
    }

    /// 读取环境变量指定的配置文件，不存在时使用默认值
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if Path::new(&path).exists() => Self::from_file(path),
            Ok(path) => {
                warn!("⚠️  配置文件不存在: {}，使用默认配置", path);
                Ok(Self::default())
            }
            Err(_) => Ok(Self::default()),
        }
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.pending_paint_capacity == 0 {
            return Err(MediaError::ConfigError("pending_paint_capacity 不能为 0".to_string()));
        }
        if self.audio_buffer_capacity == 0 {
            return Err(MediaError::ConfigError("audio_buffer_capacity 不能为 0".to_string()));
        }
        if self.demux_stream_queue_limit == 0 {
            return Err(MediaError::ConfigError("demux_stream_queue_limit 不能为 0".to_string()));
        }
        if self.max_frame_delta_ms < 0 {
            return Err(MediaError::ConfigError("max_frame_delta_ms 不能为负数".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_frame_delta_ms": 40, "network": {"reconnect": false}}"#)
                .unwrap();
        assert_eq!(config.max_frame_delta_ms, 40);
        assert_eq!(config.pending_paint_capacity, 8);
        assert!(!config.network.reconnect);
        assert_eq!(config.network.rw_timeout_us, 8_000_000);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = EngineConfig {
            pending_paint_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("myy_engine_config_{}.json", std::process::id()));
        std::fs::write(&path, r#"{"paint_sleep_interval_ms": 8}"#).unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.paint_sleep_interval_ms, 8);
        let _ = std::fs::remove_file(&path);
    }
}
