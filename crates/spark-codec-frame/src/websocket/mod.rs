//! WebSocket：先完成 HTTP 升级握手，再进入 RFC 6455 帧格式。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 这是“握手后进入稳定分帧”的典型协议：握手阶段按 HTTP 头解析并回写 101 应答，
//!   之后同一条连接上的字节按自描述帧头切分。
//!
//! ## 逻辑 (How)
//! - `handshake` 等到 `\r\n\r\n` 出现才解析，只消费到头部结束处，紧随其后的帧字节留在缓冲中；
//! - 校验失败时写回 `400 Bad Request` 并返回 `Reject`；
//! - `cut` 解析 FIN、操作码、7/16/64 位长度与掩码，并在切出时去掩码；
//! - `verify` 要求客户端帧带掩码，完整的文本帧必须是合法 UTF-8。
//!
//! ## 契约 (What)
//! - 只实现服务端角色；`build` 产生不带掩码的数据帧；
//! - 帧损坏后无法可靠重新同步，`corrective` 丢弃全部缓冲。

mod frame;
mod handshake;

pub use frame::{Opcode, WsFrame, encode, encode_with_mask};
pub use handshake::{META_HOST, META_PATH, META_PROTOCOL, compute_accept_key};

use crate::FrameLimits;
use bytes::Bytes;
use bytes::BytesMut;
use spark_fiber::{Cut, FramingError, Handshake, Link, Metadata, Protocol};
use tracing::debug;

/// 服务端 WebSocket 协议实例。
#[derive(Debug, Clone)]
pub struct WebSocket {
    max_frame_len: usize,
    max_handshake_len: usize,
    data_opcode: Opcode,
}

impl Default for WebSocket {
    fn default() -> Self {
        Self::new(&FrameLimits::default())
    }
}

impl WebSocket {
    pub fn new(limits: &FrameLimits) -> Self {
        Self {
            max_frame_len: limits.max_frame_len,
            max_handshake_len: limits.max_handshake_len,
            data_opcode: Opcode::Binary,
        }
    }

    /// `build` 输出文本帧而不是二进制帧。
    pub fn text(mut self) -> Self {
        self.data_opcode = Opcode::Text;
        self
    }

    pub fn pong(&self, payload: &[u8]) -> Bytes {
        encode(Opcode::Pong, true, payload)
    }

    /// 关闭帧：2 字节状态码 + 可选原因。
    pub fn close(&self, code: u16, reason: &str) -> Bytes {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        payload.truncate(125);
        encode(Opcode::Close, true, &payload)
    }
}

impl Protocol for WebSocket {
    type Frame = WsFrame;

    fn handshake(&mut self, link: &mut Link<'_>) -> Handshake {
        let Some(end) = handshake::head_end(&link.buffer[..]) else {
            return if link.buffer.len() > self.max_handshake_len {
                let _ = link.out.write(handshake::reject_response());
                Handshake::Reject(FramingError::TooLarge {
                    len: link.buffer.len(),
                    limit: self.max_handshake_len,
                })
            } else {
                Handshake::NeedMore
            };
        };
        let head = link.buffer.split_to(end);
        match handshake::accept(&head, link.metadata) {
            Ok(response) => {
                if let Err(err) = link.out.write(&response) {
                    return Handshake::Reject(FramingError::rejected(format!(
                        "failed to write upgrade response: {err}"
                    )));
                }
                debug!(path = link.metadata.get(META_PATH).map(String::as_str), "websocket upgraded");
                Handshake::Active
            }
            Err(err) => {
                let _ = link.out.write(handshake::reject_response());
                Handshake::Reject(err)
            }
        }
    }

    fn cut(&mut self, buffer: &mut BytesMut) -> Cut<WsFrame> {
        frame::cut(buffer, self.max_frame_len)
    }

    fn verify(&self, frame: &WsFrame, _metadata: &Metadata) -> Result<(), FramingError> {
        if !frame.masked {
            return Err(FramingError::rejected("client frame must be masked"));
        }
        if frame.fin && frame.opcode == Opcode::Text && std::str::from_utf8(&frame.payload).is_err() {
            return Err(FramingError::rejected("text frame is not valid UTF-8"));
        }
        Ok(())
    }

    fn build(&self, payload: &[u8]) -> Result<Bytes, FramingError> {
        if payload.len() > self.max_frame_len {
            return Err(FramingError::TooLarge {
                len: payload.len(),
                limit: self.max_frame_len,
            });
        }
        Ok(encode(self.data_opcode, true, payload))
    }
}
