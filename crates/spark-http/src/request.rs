//! 请求模型：起始行、大小写不敏感的请求头、查询参数、Cookie、表单与上传文件。

use crate::error::HttpError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::PathBuf;

/// 大小写不敏感、保留原始顺序的请求头集合。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// 第一个同名头的值。
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// multipart 中已落盘的文件部分。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// 表单字段名。
    pub field: String,
    /// 客户端提供的文件名。
    pub file_name: String,
    pub content_type: Option<String>,
    /// 落盘位置，位于 `HttpConfig::upload_dir` 之下。
    pub path: PathBuf,
    pub size: u64,
}

/// 解析完成的请求起始行与请求头；请求体稍后补齐。
#[derive(Debug, Clone)]
pub(crate) struct Head {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Headers,
}

/// 一个完整的 HTTP 请求。
#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    target: String,
    path: String,
    version: String,
    headers: Headers,
    query: HashMap<String, String>,
    cookies: HashMap<String, String>,
    form: HashMap<String, String>,
    files: Vec<UploadedFile>,
    body: Bytes,
    keep_alive: bool,
}

impl Request {
    pub(crate) fn assemble(
        head: Head,
        body: Bytes,
        fields: HashMap<String, String>,
        files: Vec<UploadedFile>,
    ) -> Self {
        let (path, query) = match head.target.split_once('?') {
            Some((path, query)) => (path.to_owned(), parse_pairs(query, '&')),
            None => (head.target.clone(), HashMap::new()),
        };
        let cookies = head
            .headers
            .get_all("cookie")
            .flat_map(|line| line.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
            .collect();
        let mut form = fields;
        let urlencoded = head
            .headers
            .get("content-type")
            .is_some_and(|value| media_type(value) == "application/x-www-form-urlencoded");
        if urlencoded && let Ok(text) = std::str::from_utf8(&body) {
            form.extend(parse_pairs(text, '&'));
        }
        let keep_alive = head
            .headers
            .get("connection")
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("keep-alive"));

        Self {
            method: head.method,
            target: head.target,
            path,
            version: head.version,
            headers: head.headers,
            query,
            cookies,
            form,
            files,
            body,
            keep_alive,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// 起始行中的原始请求目标（含查询串）。
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    /// urlencoded 或 multipart 表单中的文本字段。
    pub fn form(&self, name: &str) -> Option<&str> {
        self.form.get(name).map(String::as_str)
    }

    pub fn form_fields(&self) -> &HashMap<String, String> {
        &self.form
    }

    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// 把请求体按 JSON 反序列化。
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// 客户端是否显式请求了 `Connection: keep-alive`。
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }
}

/// `type/subtype; param=...` 中的 `type/subtype`，统一为小写。
pub(crate) fn media_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn parse_pairs(text: &str, separator: char) -> HashMap<String, String> {
    text.split(separator)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (decode_component(name), decode_component(value)),
            None => (decode_component(pair), String::new()),
        })
        .collect()
}

/// 百分号解码，`+` 视为空格；非法转义原样保留。
pub(crate) fn decode_component(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'+' => decoded.push(b' '),
            b'%' if index + 2 < bytes.len() => {
                match (hex_value(bytes[index + 1]), hex_value(bytes[index + 2])) {
                    (Some(high), Some(low)) => {
                        decoded.push(high << 4 | low);
                        index += 2;
                    }
                    _ => decoded.push(b'%'),
                }
            }
            byte => decoded.push(byte),
        }
        index += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
