use serde::Deserialize;
use spark_fiber::ConfigError;

/// 帧与握手的大小上限。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrameLimits {
    /// 单帧负载的最大字节数。
    pub max_frame_len: usize,
    /// 换行分隔协议中单行的最大字节数（不含换行符）。
    pub max_line_len: usize,
    /// 握手请求头的最大字节数。
    pub max_handshake_len: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_frame_len: 1 << 20,
            max_line_len: 8 * 1024,
            max_handshake_len: 8 * 1024,
        }
    }
}

impl FrameLimits {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let limits: Self = toml::from_str(text)?;
        limits.validate()?;
        Ok(limits)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_len == 0 {
            return Err(ConfigError::invalid("frame.max_frame_len", "must be positive"));
        }
        if self.max_frame_len > u32::MAX as usize {
            return Err(ConfigError::invalid(
                "frame.max_frame_len",
                "must fit in a 32-bit length header",
            ));
        }
        if self.max_line_len == 0 {
            return Err(ConfigError::invalid("frame.max_line_len", "must be positive"));
        }
        if self.max_handshake_len < 16 {
            return Err(ConfigError::invalid(
                "frame.max_handshake_len",
                "must leave room for a request line",
            ));
        }
        Ok(())
    }
}
