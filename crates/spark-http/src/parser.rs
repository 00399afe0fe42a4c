//! HTTP/1.x 请求分帧。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 让 HTTP 成为 [`Protocol`] 的又一个实现：Worker 的读路径与回显服务完全相同，
//!   只是“一个帧”变成了“一个完整请求”；
//! - 大文件上传不能整体留在内存中，multipart 请求体在到达时就逐段写入 `upload_dir`。
//!
//! ## 逻辑 (How)
//! - 普通请求：等到 `\r\n\r\n` 与 `Content-Length` 声明的请求体全部到齐才切出，
//!   不足时不消费任何字节；
//! - multipart 请求：请求头解析完成后即被消费，解析器进入上传状态，之后每次 `cut`
//!   都把新到的请求体字节搬进窗口，只保留不足一个分隔符长度的尾部用于边界识别；
//! - 起始行只有两段（`GET /hel` + `lo`）时版本视为 `HTTP/1.1`；
//! - 出站方向由 [`crate::Response::into_wire`] 编码，`build` 原样成帧，
//!   服务的全部响应头与内存响应体都经 `Connection::send` 写出；
//!   文件响应体是响应头 `Content-Length` 已声明的后续字节，由下载逐块直写。
//!
//! ## 契约 (What)
//! - `POST`/`PUT`/`PATCH` 必须携带 `Content-Length`；请求头或请求体超过上限报告 `TooLarge`；
//! - 上传状态期间 `NeedMore` 也会消费字节，已消费的部分保存在解析器自身的状态中；
//! - 解析失败时已写入的上传文件会被删除。
//!
//! ## 风险 (Trade-offs)
//! - 不支持 `Transfer-Encoding: chunked`，这类请求按畸形请求处理。

use crate::config::HttpConfig;
use crate::request::{Head, Headers, Request, UploadedFile, media_type};
use bytes::{Buf, Bytes, BytesMut};
use spark_fiber::{Cut, FramingError, Protocol};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
const MAX_PART_HEAD_LEN: usize = 8 * 1024;

static UPLOAD_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// 每条连接一个实例的请求解析器。
#[derive(Debug)]
pub struct RequestParser {
    max_head_len: usize,
    max_body_len: usize,
    upload_dir: PathBuf,
    upload: Option<Box<Upload>>,
}

impl Clone for RequestParser {
    /// 只复制配置；进行中的上传不随之复制。
    fn clone(&self) -> Self {
        Self {
            max_head_len: self.max_head_len,
            max_body_len: self.max_body_len,
            upload_dir: self.upload_dir.clone(),
            upload: None,
        }
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new(&HttpConfig::default())
    }
}

impl RequestParser {
    pub fn new(config: &HttpConfig) -> Self {
        Self {
            max_head_len: config.max_head_len,
            max_body_len: config.max_body_len,
            upload_dir: config.upload_dir.clone(),
            upload: None,
        }
    }

    /// 是否正处于 multipart 上传中。
    pub fn is_uploading(&self) -> bool {
        self.upload.is_some()
    }

    fn abandon(&mut self) {
        if let Some(upload) = self.upload.take() {
            upload.abandon();
        }
    }

    fn stream_upload(&mut self, buffer: &mut BytesMut) -> Cut<Request> {
        let Some(upload) = self.upload.as_mut() else {
            return Cut::NeedMore;
        };
        let take = buffer.len().min(upload.remaining);
        upload.window.extend_from_slice(&buffer.split_to(take));
        upload.remaining -= take;

        if let Err(err) = upload.process() {
            self.abandon();
            return Cut::Corrupt(err);
        }
        if upload.remaining > 0 {
            return Cut::NeedMore;
        }
        if !upload.is_done() {
            self.abandon();
            return Cut::Corrupt(FramingError::malformed(
                "multipart body ended before the closing boundary",
            ));
        }
        match self.upload.take() {
            Some(upload) => Cut::Frame(upload.finish()),
            None => Cut::NeedMore,
        }
    }
}

impl Protocol for RequestParser {
    type Frame = Request;

    fn cut(&mut self, buffer: &mut BytesMut) -> Cut<Request> {
        if self.upload.is_some() {
            return self.stream_upload(buffer);
        }
        let Some(end) = find(&buffer[..], HEAD_TERMINATOR).map(|position| position + HEAD_TERMINATOR.len())
        else {
            return if buffer.len() > self.max_head_len {
                Cut::Corrupt(FramingError::TooLarge {
                    len: buffer.len(),
                    limit: self.max_head_len,
                })
            } else {
                Cut::NeedMore
            };
        };
        if end > self.max_head_len {
            return Cut::Corrupt(FramingError::TooLarge {
                len: end,
                limit: self.max_head_len,
            });
        }
        let head = match parse_head(&buffer[..end - HEAD_TERMINATOR.len()]) {
            Ok(head) => head,
            Err(err) => return Cut::Corrupt(err),
        };
        let length = match body_length(&head) {
            Ok(length) => length,
            Err(err) => return Cut::Corrupt(err),
        };
        if length > self.max_body_len {
            return Cut::Corrupt(FramingError::TooLarge {
                len: length,
                limit: self.max_body_len,
            });
        }

        match multipart_boundary(&head) {
            Ok(Some(boundary)) => {
                buffer.advance(end);
                debug!(uri = %head.target, length, "multipart upload started");
                self.upload = Some(Box::new(Upload::new(
                    head,
                    &boundary,
                    length,
                    self.upload_dir.clone(),
                )));
                return self.stream_upload(buffer);
            }
            Ok(None) => {}
            Err(err) => return Cut::Corrupt(err),
        }

        if buffer.len() < end + length {
            return Cut::NeedMore;
        }
        buffer.advance(end);
        let body = buffer.split_to(length).freeze();
        Cut::Frame(Request::assemble(head, body, HashMap::new(), Vec::new()))
    }

    fn corrective(&mut self, buffer: &mut BytesMut) -> usize {
        self.abandon();
        let discarded = buffer.len();
        buffer.clear();
        discarded
    }

    /// 出站帧就是一条完整的响应报文：响应头里的 `Content-Length` 已经划定了边界，
    /// 因此按原样输出，不再追加任何包装。
    fn build(&self, payload: &[u8]) -> Result<Bytes, FramingError> {
        Ok(Bytes::copy_from_slice(payload))
    }
}

impl Drop for RequestParser {
    fn drop(&mut self) {
        self.abandon();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_head(raw: &[u8]) -> Result<Head, FramingError> {
    let text =
        std::str::from_utf8(raw).map_err(|_| FramingError::malformed("request head is not valid UTF-8"))?;
    let mut lines = text.split("\r\n");
    let start = lines.next().unwrap_or_default();
    let parts: Vec<&str> = start.split(' ').filter(|part| !part.is_empty()).collect();
    let (method, target, version) = match parts.as_slice() {
        [method, target] => (*method, *target, "HTTP/1.1"),
        [method, target, version] if version.starts_with("HTTP/") => (*method, *target, *version),
        _ => {
            return Err(FramingError::malformed(format!(
                "invalid request line `{start}`"
            )));
        }
    };
    if !method.bytes().all(|byte| byte.is_ascii_uppercase()) {
        return Err(FramingError::malformed(format!("invalid method `{method}`")));
    }

    let mut headers = Headers::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            return Err(FramingError::malformed(format!("malformed header line `{line}`")));
        };
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(FramingError::malformed(format!("invalid header name `{name}`")));
        }
        headers.append(name, value.trim());
    }
    Ok(Head {
        method: method.to_owned(),
        target: target.to_owned(),
        version: version.to_owned(),
        headers,
    })
}

fn body_length(head: &Head) -> Result<usize, FramingError> {
    if head.headers.contains("transfer-encoding") {
        return Err(FramingError::malformed("transfer-encoding is not supported"));
    }
    match head.headers.get("content-length") {
        Some(value) => value
            .parse()
            .map_err(|_| FramingError::malformed(format!("invalid Content-Length `{value}`"))),
        None if matches!(head.method.as_str(), "POST" | "PUT" | "PATCH") => {
            Err(FramingError::malformed("Content-Length is required"))
        }
        None => Ok(0),
    }
}

fn multipart_boundary(head: &Head) -> Result<Option<String>, FramingError> {
    let Some(content_type) = head.headers.get("content-type") else {
        return Ok(None);
    };
    if media_type(content_type) != "multipart/form-data" {
        return Ok(None);
    }
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(name, _)| name.eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim_matches('"').to_owned())
        .filter(|boundary| !boundary.is_empty())
        .map(Some)
        .ok_or_else(|| FramingError::malformed("multipart request without boundary"))
}

#[derive(Debug)]
enum Phase {
    /// 等待下一个分隔符。
    Boundary,
    /// 等待部分头结束。
    PartHead,
    Field { name: String, value: Vec<u8> },
    File { file: File, meta: UploadedFile },
    Done,
}

/// 进行中的 multipart 请求体。
#[derive(Debug)]
struct Upload {
    head: Head,
    /// `\r\n--boundary`
    delimiter: Vec<u8>,
    /// 尚未从连接缓冲搬入窗口的请求体字节数。
    remaining: usize,
    window: BytesMut,
    phase: Phase,
    fields: HashMap<String, String>,
    files: Vec<UploadedFile>,
    upload_dir: PathBuf,
}

impl Upload {
    fn new(head: Head, boundary: &str, length: usize, upload_dir: PathBuf) -> Self {
        let mut delimiter = b"\r\n--".to_vec();
        delimiter.extend_from_slice(boundary.as_bytes());
        // 请求体以 `--boundary` 开头；补上 CRLF 后首个分隔符与其余分隔符形式一致。
        let mut window = BytesMut::with_capacity(delimiter.len() * 2);
        window.extend_from_slice(b"\r\n");
        Self {
            head,
            delimiter,
            remaining: length,
            window,
            phase: Phase::Boundary,
            fields: HashMap::new(),
            files: Vec::new(),
            upload_dir,
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    /// 尽可能推进状态机，直到窗口中的数据不足以继续。
    fn process(&mut self) -> Result<(), FramingError> {
        loop {
            let progressed = match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Boundary => self.on_boundary()?,
                Phase::PartHead => self.on_part_head()?,
                Phase::Field { name, value } => self.on_field(name, value),
                Phase::File { file, meta } => self.on_file(file, meta)?,
                Phase::Done => {
                    self.window.clear();
                    false
                }
            };
            if !progressed {
                return Ok(());
            }
        }
    }

    fn on_boundary(&mut self) -> Result<bool, FramingError> {
        self.phase = Phase::Boundary;
        let Some(position) = find(&self.window, &self.delimiter) else {
            // 前导内容：只保留可能构成分隔符开头的尾部。
            let keep = self.delimiter.len() - 1;
            let discard = self.window.len().saturating_sub(keep);
            self.window.advance(discard);
            return Ok(false);
        };
        let after = position + self.delimiter.len();
        if self.window.len() < after + 2 {
            return Ok(false);
        }
        let suffix = [self.window[after], self.window[after + 1]];
        self.window.advance(after + 2);
        self.phase = match &suffix {
            b"--" => Phase::Done,
            b"\r\n" => Phase::PartHead,
            _ => return Err(FramingError::malformed("malformed multipart boundary")),
        };
        Ok(true)
    }

    fn on_part_head(&mut self) -> Result<bool, FramingError> {
        self.phase = Phase::PartHead;
        let Some(position) = find(&self.window, HEAD_TERMINATOR) else {
            if self.window.len() > MAX_PART_HEAD_LEN {
                return Err(FramingError::TooLarge {
                    len: self.window.len(),
                    limit: MAX_PART_HEAD_LEN,
                });
            }
            return Ok(false);
        };
        let raw = self.window.split_to(position + HEAD_TERMINATOR.len());
        let text = std::str::from_utf8(&raw[..position])
            .map_err(|_| FramingError::malformed("part header is not valid UTF-8"))?;

        let mut name = None;
        let mut file_name = None;
        let mut content_type = None;
        for line in text.split("\r\n") {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            if key.trim().eq_ignore_ascii_case("content-disposition") {
                for param in value.split(';').skip(1) {
                    match param.trim().split_once('=') {
                        Some(("name", quoted)) => name = Some(quoted.trim_matches('"').to_owned()),
                        Some(("filename", quoted)) => {
                            file_name = Some(quoted.trim_matches('"').to_owned())
                        }
                        _ => {}
                    }
                }
            } else if key.trim().eq_ignore_ascii_case("content-type") {
                content_type = Some(value.trim().to_owned());
            }
        }
        let name = name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| FramingError::malformed("multipart part without a name"))?;

        self.phase = match file_name.filter(|file_name| !file_name.is_empty()) {
            Some(file_name) => {
                let (file, path) = create_upload_file(&self.upload_dir)?;
                debug!(field = %name, file = %file_name, path = %path.display(), "upload part started");
                Phase::File {
                    file,
                    meta: UploadedFile {
                        field: name,
                        file_name,
                        content_type,
                        path,
                        size: 0,
                    },
                }
            }
            None => Phase::Field {
                name,
                value: Vec::new(),
            },
        };
        Ok(true)
    }

    /// 分隔符之前的内容都属于当前部分；找不到分隔符时保留可能的分隔符前缀。
    fn take_part_data(&mut self) -> (Bytes, bool) {
        match find(&self.window, &self.delimiter) {
            Some(position) => (self.window.split_to(position).freeze(), true),
            None => {
                let keep = self.delimiter.len() - 1;
                let safe = self.window.len().saturating_sub(keep);
                (self.window.split_to(safe).freeze(), false)
            }
        }
    }

    fn on_field(&mut self, name: String, mut value: Vec<u8>) -> bool {
        let (data, finished) = self.take_part_data();
        value.extend_from_slice(&data);
        if finished {
            self.fields
                .insert(name, String::from_utf8_lossy(&value).into_owned());
            self.phase = Phase::Boundary;
        } else {
            self.phase = Phase::Field { name, value };
        }
        finished
    }

    fn on_file(&mut self, mut file: File, mut meta: UploadedFile) -> Result<bool, FramingError> {
        let (data, finished) = self.take_part_data();
        let written = file.write_all(&data).and_then(|()| {
            if finished {
                file.flush()
            } else {
                Ok(())
            }
        });
        if let Err(err) = written {
            let _ = std::fs::remove_file(&meta.path);
            return Err(FramingError::rejected(format!("failed to store upload: {err}")));
        }
        meta.size += data.len() as u64;
        if finished {
            debug!(field = %meta.field, size = meta.size, "upload part stored");
            self.files.push(meta);
            self.phase = Phase::Boundary;
        } else {
            self.phase = Phase::File { file, meta };
        }
        Ok(finished)
    }

    fn finish(self) -> Request {
        Request::assemble(self.head, Bytes::new(), self.fields, self.files)
    }

    /// 解析失败：删除已经落盘的文件。
    fn abandon(self) {
        let partial = match &self.phase {
            Phase::File { meta, .. } => Some(meta.path.as_path()),
            _ => None,
        };
        for path in self.files.iter().map(|file| file.path.as_path()).chain(partial) {
            if let Err(err) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %err, "failed to remove abandoned upload");
            }
        }
    }
}

fn create_upload_file(dir: &Path) -> Result<(File, PathBuf), FramingError> {
    let sequence = UPLOAD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let path = dir.join(format!("spark-upload-{}-{sequence}", std::process::id()));
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map(|file| (file, path))
        .map_err(|err| FramingError::rejected(format!("failed to create upload file: {err}")))
}
