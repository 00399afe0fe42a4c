use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};
use spark_fiber::{FramingError, Metadata};

/// RFC 6455 计算 `Sec-WebSocket-Accept` 使用的固定 GUID。
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// 元数据中保存的请求路径。
pub const META_PATH: &str = "ws.path";
/// 元数据中保存的 Host。
pub const META_HOST: &str = "ws.host";
/// 元数据中保存的协商子协议。
pub const META_PROTOCOL: &str = "ws.protocol";

/// `base64(sha1(key + GUID))`。
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// 在缓冲中查找请求头结束位置（含 `\r\n\r\n`）。
pub(crate) fn head_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|position| position + 4)
}

/// 校验升级请求，返回 101 应答并把路径、Host 等写入元数据。
pub(crate) fn accept(head: &[u8], metadata: &mut Metadata) -> Result<Vec<u8>, FramingError> {
    let text = std::str::from_utf8(head)
        .map_err(|_| FramingError::malformed("handshake is not valid UTF-8"))?;
    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return Err(FramingError::malformed("missing request line"));
    };
    if method != "GET" {
        return Err(FramingError::rejected(format!("method must be GET, got `{method}`")));
    }

    let mut headers = Metadata::new();
    for line in lines.take_while(|line| !line.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            return Err(FramingError::malformed(format!("malformed header `{line}`")));
        };
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
    }
    let header = |name: &'static str| {
        headers
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| FramingError::rejected(format!("missing `{name}` header")))
    };

    let host = header("host")?;
    if !header("upgrade")?.eq_ignore_ascii_case("websocket") {
        return Err(FramingError::rejected("Upgrade header must be `websocket`"));
    }
    let connection = header("connection")?;
    if !connection
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(FramingError::rejected("Connection header must contain `Upgrade`"));
    }
    let version = header("sec-websocket-version")?;
    if version != "13" {
        return Err(FramingError::rejected(format!("unsupported version `{version}`")));
    }
    let key = header("sec-websocket-key")?;
    match STANDARD.decode(key) {
        Ok(decoded) if decoded.len() == 16 => {}
        _ => return Err(FramingError::rejected("Sec-WebSocket-Key must encode 16 bytes")),
    }

    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n",
        compute_accept_key(key)
    );
    if let Some(protocol) = headers
        .get("sec-websocket-protocol")
        .and_then(|offered| offered.split(',').map(str::trim).find(|p| !p.is_empty()))
    {
        response.push_str("Sec-WebSocket-Protocol: ");
        response.push_str(protocol);
        response.push_str("\r\n");
        metadata.insert(META_PROTOCOL.to_owned(), protocol.to_owned());
    }
    response.push_str("\r\n");

    metadata.insert(META_PATH.to_owned(), path.to_owned());
    metadata.insert(META_HOST.to_owned(), host.to_owned());
    Ok(response.into_bytes())
}

/// 握手失败时写回的应答。
pub(crate) fn reject_response() -> &'static [u8] {
    b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: keep-alive, Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn accept_key_matches_rfc_sample() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn sample_request_is_accepted_and_recorded() {
        let mut metadata = Metadata::new();
        let response = accept(SAMPLE.as_bytes(), &mut metadata).unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert_eq!(metadata[META_PATH], "/chat");
        assert_eq!(metadata[META_HOST], "server.example.com");
        assert_eq!(head_end(SAMPLE.as_bytes()), Some(SAMPLE.len()));
    }

    #[test]
    fn missing_key_is_rejected() {
        let request = SAMPLE.replace("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n", "");
        let err = accept(request.as_bytes(), &mut Metadata::new()).unwrap_err();
        assert!(err.to_string().contains("sec-websocket-key"));
    }
}
