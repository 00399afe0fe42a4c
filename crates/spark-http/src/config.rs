//! HTTP 服务配置。

use serde::Deserialize;
use spark_fiber::{ConfigError, SocketOptions};
use std::path::PathBuf;

const DEFAULT_SERVER_NAME: &str = "spark";
const DEFAULT_MAX_HEAD_LEN: usize = 16 * 1024;
const DEFAULT_MAX_BODY_LEN: usize = 8 * 1024 * 1024;

/// # 契约说明（What）
/// - `server_name` 写入每个响应的 `Server` 头；
/// - `upload_dir` 存放 multipart 上传的文件，默认是系统临时目录；
/// - `max_head_len` 限制起始行与请求头的总长度，`max_body_len` 限制 `Content-Length`；
/// - `socket` 应用于每个新接入的连接。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub server_name: String,
    pub upload_dir: PathBuf,
    pub max_head_len: usize,
    pub max_body_len: usize,
    pub socket: SocketOptions,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            server_name: DEFAULT_SERVER_NAME.to_owned(),
            upload_dir: std::env::temp_dir(),
            max_head_len: DEFAULT_MAX_HEAD_LEN,
            max_body_len: DEFAULT_MAX_BODY_LEN,
            socket: SocketOptions::default(),
        }
    }
}

impl HttpConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_name.is_empty() || self.server_name.contains(['\r', '\n']) {
            return Err(ConfigError::invalid(
                "http.server_name",
                "must be a non-empty single-line token",
            ));
        }
        if self.max_head_len < 16 {
            return Err(ConfigError::invalid("http.max_head_len", "must be at least 16"));
        }
        if self.upload_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("http.upload_dir", "must not be empty"));
        }
        self.socket.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_socket_table_is_loaded() {
        let config = HttpConfig::from_toml_str(
            r#"
            server_name = "edge"
            upload_dir = "/var/tmp/uploads"

            [socket]
            send_buffer = 4096
            "#,
        )
        .unwrap();
        assert_eq!(config.server_name, "edge");
        assert_eq!(config.upload_dir, PathBuf::from("/var/tmp/uploads"));
        assert_eq!(config.socket.send_buffer, 4096);
        assert_eq!(config.socket.receive_buffer, SocketOptions::default().receive_buffer);
        assert_eq!(config.max_body_len, DEFAULT_MAX_BODY_LEN);
    }

    #[test]
    fn invalid_values_name_their_field() {
        let err = HttpConfig::from_toml_str("max_head_len = 1").unwrap_err();
        assert!(err.to_string().contains("http.max_head_len"));

        let err = HttpConfig::from_toml_str("[socket]\nsend_buffer = 0").unwrap_err();
        assert!(err.to_string().contains("socket.send_buffer"));
    }
}
