//! 运行时与套接字配置。
//!
//! # 契约 (What)
//! - 所有字段都有默认值，TOML 中缺省的字段使用默认值补齐；
//! - `from_toml_str` 在解析后立即执行 `validate`，错误信息携带字段路径（如 `socket.send_buffer`）。

use crate::error::ConfigError;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_TICK_MS: u64 = 10;
const DEFAULT_MAX_EVENTS_PER_TICK: usize = 1024;
const DEFAULT_BUFFER: usize = 81_920;

/// 调度节拍配置。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// 两次心跳之间的间隔（毫秒）。
    pub tick_ms: u64,
    /// 单个节拍内最多路由的事件数量，超出部分顺延到下一拍。
    pub max_events_per_tick: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_TICK_MS,
            max_events_per_tick: DEFAULT_MAX_EVENTS_PER_TICK,
        }
    }
}

impl RuntimeConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::invalid("runtime.tick_ms", "must be at least 1"));
        }
        if self.max_events_per_tick == 0 {
            return Err(ConfigError::invalid(
                "runtime.max_events_per_tick",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// 新接入连接的套接字参数。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SocketOptions {
    pub receive_buffer: usize,
    pub send_buffer: usize,
    pub nodelay: bool,
    pub keepalive: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            receive_buffer: DEFAULT_BUFFER,
            send_buffer: DEFAULT_BUFFER,
            nodelay: true,
            keepalive: true,
        }
    }
}

impl SocketOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.receive_buffer == 0 {
            return Err(ConfigError::invalid("socket.receive_buffer", "must be positive"));
        }
        if self.send_buffer == 0 {
            return Err(ConfigError::invalid("socket.send_buffer", "must be positive"));
        }
        Ok(())
    }
}
