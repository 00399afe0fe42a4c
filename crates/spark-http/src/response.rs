//! 响应模型：状态行、响应头，以及内存中的字节或待分块发送的文件。

use crate::error::HttpError;
use bytes::Bytes;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt::Write as _;
use std::fs::File;
use std::path::{Path, PathBuf};

/// 响应体。
#[derive(Debug)]
pub enum Body {
    Bytes(Bytes),
    /// 由下载模式按发送缓冲容量逐块写出。
    File { file: File, path: PathBuf, len: u64 },
}

#[derive(Debug)]
pub struct Response {
    status: u16,
    reason: Cow<'static, str>,
    headers: Vec<(String, String)>,
    body: Body,
}

impl Default for Response {
    fn default() -> Self {
        Self::status(200)
    }
}

impl Response {
    /// 指定状态码、空响应体。
    pub fn status(status: u16) -> Self {
        Self {
            status,
            reason: Cow::Borrowed(reason_phrase(status)),
            headers: Vec::new(),
            body: Body::Bytes(Bytes::new()),
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::status(200)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(body)
    }

    pub fn html(body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::status(200)
            .with_header("Content-Type", "text/html; charset=utf-8")
            .with_body(body)
    }

    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, HttpError> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::status(200)
            .with_header("Content-Type", "application/json")
            .with_body(body))
    }

    /// 以附件形式下载 `path`，客户端看到的文件名为 `filename`。
    pub fn file(path: impl AsRef<Path>, filename: &str) -> Result<Self, HttpError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| HttpError::file(path, source))?;
        let len = file
            .metadata()
            .map_err(|source| HttpError::file(path, source))?
            .len();
        Ok(Self::status(200)
            .with_header("Content-Type", "application/octet-stream")
            .with_header(
                "Content-Disposition",
                format!("attachment; filename=\"{}\"", filename.replace('"', "")),
            )
            .with_body_kind(Body::File {
                file,
                path: path.to_path_buf(),
                len,
            }))
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self.reason = Cow::Borrowed(reason_phrase(status));
        self
    }

    pub fn with_reason(mut self, reason: impl Into<Cow<'static, str>>) -> Self {
        self.reason = reason.into();
        self
    }

    /// 设置响应头，同名头（大小写不敏感）被替换。
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn with_body(self, body: impl Into<Bytes>) -> Self {
        self.with_body_kind(Body::Bytes(body.into()))
    }

    fn with_body_kind(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn is_file(&self) -> bool {
        matches!(self.body, Body::File { .. })
    }

    /// 响应体长度；文件取打开时的大小。
    pub fn content_length(&self) -> u64 {
        match &self.body {
            Body::Bytes(bytes) => bytes.len() as u64,
            Body::File { len, .. } => *len,
        }
    }

    /// 状态行与响应头，补齐 `Content-Length`、`Server` 与 `Connection`。
    pub fn head(&self, server_name: &str, keep_alive: bool) -> String {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for (name, value) in &self.headers {
            if is_managed(name) {
                continue;
            }
            let _ = write!(head, "{name}: {value}\r\n");
        }
        let _ = write!(head, "Content-Length: {}\r\n", self.content_length());
        let _ = write!(head, "Server: {server_name}\r\n");
        head.push_str(if keep_alive {
            "Connection: keep-alive\r\n"
        } else {
            "Connection: close\r\n"
        });
        head.push_str("\r\n");
        head
    }

    /// 拆成响应头文本与响应体。
    pub fn into_wire(self, server_name: &str, keep_alive: bool) -> (String, Body) {
        (self.head(server_name, keep_alive), self.body)
    }
}

fn is_managed(name: &str) -> bool {
    ["content-length", "server", "connection"]
        .iter()
        .any(|managed| name.eq_ignore_ascii_case(managed))
}

/// 常见状态码的原因短语。
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn head_carries_length_server_and_connection() {
        let response = Response::text("hello world").with_header("X-Trace", "1");
        let head = response.head("spark", false);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(head.contains("X-Trace: 1\r\n"));
        assert!(head.contains("Content-Length: 11\r\n"));
        assert!(head.contains("Server: spark\r\n"));
        assert!(head.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn managed_headers_cannot_be_overridden() {
        let response = Response::status(404)
            .with_header("content-length", "999")
            .with_header("Connection", "upgrade");
        let head = response.head("spark", true);
        assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(head.contains("Content-Length: 0\r\n"));
        assert!(!head.contains("999"));
        assert_eq!(head.matches("Connection:").count(), 1);
        assert!(head.contains("Connection: keep-alive\r\n"));
    }

    #[test]
    fn file_response_is_an_octet_stream_attachment() {
        let mut scratch = tempfile::NamedTempFile::new().unwrap();
        scratch.write_all(&[7; 300]).unwrap();
        let response = Response::file(scratch.path(), "report.bin").unwrap();
        assert!(response.is_file());
        assert_eq!(response.content_length(), 300);
        assert_eq!(response.header("content-type"), Some("application/octet-stream"));
        assert_eq!(
            response.header("Content-Disposition"),
            Some("attachment; filename=\"report.bin\"")
        );

        let missing = Response::file("/definitely/not/here", "x").unwrap_err();
        assert!(missing.is_io());
    }

    #[test]
    fn json_helper_serializes() {
        let response = Response::json(&serde_json::json!({"ok": true})).unwrap();
        let Body::Bytes(body) = response.body() else {
            panic!("expected an in-memory body");
        };
        assert_eq!(&body[..], br#"{"ok":true}"#);
    }
}
