//! 分帧契约：把连接上的字节流切分为离散的帧，并把应用数据包装回线格式。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 字节累积（Worker 读路径）与消息边界识别（协议）解耦：一个 Worker 可以承载任意线格式，
//!   每条连接持有自己的协议实例，因此握手状态、解析状态互不干扰；
//! - 出站流量统一经过 `build`，保证所有写出的数据都带有正确的帧头。
//!
//! ## 逻辑 (How)
//! - `handshake` 在稳定阶段之前运行，可以通过 [`Link::out`] 直接回写协商应答；
//! - `cut` 每次至多切出一个帧，并把帧的字节从累积缓冲中移走，尾随字节保持不动；
//! - `parse` = `cut` + `verify`；校验失败按损坏帧处理，此时该帧已被切出，只报告 [`FramingError::Rejected`]；
//! - `corrective` 丢弃字节直到下一个可能的帧边界，返回丢弃数量；返回 0 表示无法重新同步。
//!
//! ## 契约 (What)
//! - `cut` 返回 [`Cut::NeedMore`] 时不得消费任何字节；
//! - 一个完整帧被任意切分后逐次投递，与整体投递得到的帧必须逐字节一致。

mod passthrough;

pub use passthrough::Passthrough;

use crate::config::SocketOptions;
use crate::error::{FramingError, IoCategory, categorize_io_error};
use crate::socket::Socket;
use bytes::{Buf, Bytes, BytesMut};
use std::collections::HashMap;
use std::io;

/// 协议附加在连接上的不透明元数据，例如握手阶段得到的请求头。
pub type Metadata = HashMap<String, String>;

/// 一次切帧的结果。
#[derive(Debug, PartialEq, Eq)]
pub enum Cut<F> {
    Frame(F),
    NeedMore,
    Corrupt(FramingError),
}

/// 握手阶段的结果。
#[derive(Debug, PartialEq, Eq)]
pub enum Handshake {
    /// 数据不足，继续累积。
    NeedMore,
    /// 协商失败，连接应被关闭。
    Reject(FramingError),
    /// 进入稳定阶段。
    Active,
}

/// 非阻塞出站写入器：写不完的部分留在连接的待发缓冲中，下一拍继续。
pub struct Outbound<'a> {
    socket: &'a mut dyn Socket,
    pending: &'a mut BytesMut,
}

impl<'a> Outbound<'a> {
    pub(crate) fn new(socket: &'a mut dyn Socket, pending: &'a mut BytesMut) -> Self {
        Self { socket, pending }
    }

    /// 写出 `bytes`；已有积压时追加到积压之后以保持顺序。
    pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.pending.is_empty() {
            self.pending.extend_from_slice(bytes);
            self.flush()?;
            return Ok(());
        }
        let mut offset = 0;
        while offset < bytes.len() {
            match self.socket.write(&bytes[offset..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(written) => offset += written,
                Err(err) => match categorize_io_error(&err) {
                    IoCategory::WouldBlock => break,
                    IoCategory::Interrupted => continue,
                    _ => return Err(err),
                },
            }
        }
        self.pending.extend_from_slice(&bytes[offset..]);
        Ok(())
    }

    /// 尽量冲刷积压数据，全部写完时返回 `true`。
    pub fn flush(&mut self) -> io::Result<bool> {
        while !self.pending.is_empty() {
            match self.socket.write(&self.pending[..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(written) => self.pending.advance(written),
                Err(err) => match categorize_io_error(&err) {
                    IoCategory::WouldBlock => return Ok(false),
                    IoCategory::Interrupted => continue,
                    _ => return Err(err),
                },
            }
        }
        Ok(true)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn socket(&mut self) -> &mut dyn Socket {
        &mut *self.socket
    }

    pub fn configure(&mut self, options: &SocketOptions) -> io::Result<()> {
        self.socket.configure(options)
    }
}

/// 握手阶段可见的连接视图。
pub struct Link<'a> {
    pub buffer: &'a mut BytesMut,
    pub metadata: &'a mut Metadata,
    pub out: Outbound<'a>,
}

/// 每条连接一个实例的分帧策略。
pub trait Protocol: 'static {
    type Frame: 'static;

    /// 协商阶段；默认无需握手。
    fn handshake(&mut self, link: &mut Link<'_>) -> Handshake {
        let _ = link;
        Handshake::Active
    }

    /// 从缓冲中切出一个完整帧。
    fn cut(&mut self, buffer: &mut BytesMut) -> Cut<Self::Frame>;

    /// 损坏后重新同步：丢弃到下一个可能的帧边界，返回丢弃的字节数。
    fn corrective(&mut self, buffer: &mut BytesMut) -> usize {
        let discarded = buffer.len();
        buffer.clear();
        discarded
    }

    /// 帧被接受前的结构校验。
    fn verify(&self, frame: &Self::Frame, metadata: &Metadata) -> Result<(), FramingError> {
        let _ = (frame, metadata);
        Ok(())
    }

    /// 把应用数据包装成线格式；负载无法成帧（例如超过长度上限）时返回错误。
    fn build(&self, payload: &[u8]) -> Result<Bytes, FramingError>;

    /// `build` 后非阻塞写出；成帧失败映射为 `InvalidInput`，不写出任何字节。
    fn send(&self, out: &mut Outbound<'_>, payload: &[u8]) -> io::Result<()> {
        let frame = self
            .build(payload)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        out.write(&frame)
    }

    /// `cut` 后立即 `verify`。
    fn parse(&mut self, buffer: &mut BytesMut, metadata: &Metadata) -> Cut<Self::Frame> {
        match self.cut(buffer) {
            Cut::Frame(frame) => match self.verify(&frame, metadata) {
                Ok(()) => Cut::Frame(frame),
                Err(err) => Cut::Corrupt(err),
            },
            other => other,
        }
    }
}
