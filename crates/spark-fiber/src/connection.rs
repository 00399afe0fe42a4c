//! 连接：套接字 + 字节累积缓冲 + 协议实例 + 握手标记 + 元数据 + 当前任务绑定。
//!
//! # 契约 (What)
//! - 累积缓冲只由所属 Worker 的读路径追加、由协议的切帧消费；
//! - 出站数据先尝试直接写出，写不完的部分留在待发缓冲，由心跳继续冲刷；
//! - `close_after_flush` 之后，待发缓冲冲刷完毕即可关闭；
//! - 连接被丢弃时底层套接字一并释放。

use crate::config::SocketOptions;
use crate::error::{IoCategory, categorize_io_error};
use crate::ids::{SocketId, TaskId};
use crate::protocol::{Cut, Handshake, Link, Metadata, Outbound, Protocol};
use crate::socket::Socket;
use bytes::BytesMut;
use core::fmt;
use std::io;
use std::net::SocketAddr;

/// 一次读取的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// 本次追加到累积缓冲的字节数。
    pub received: usize,
    /// 对端是否已关闭写方向。
    pub eof: bool,
}

pub struct Connection<P: Protocol> {
    id: SocketId,
    socket: Box<dyn Socket>,
    buffer: BytesMut,
    protocol: P,
    verified: bool,
    metadata: Metadata,
    binding: Option<TaskId>,
    pending: BytesMut,
    close_after_flush: bool,
}

impl<P: Protocol> Connection<P> {
    pub fn new(id: SocketId, socket: Box<dyn Socket>, protocol: P) -> Self {
        Self {
            id,
            socket,
            buffer: BytesMut::new(),
            protocol,
            verified: false,
            metadata: Metadata::new(),
            binding: None,
            pending: BytesMut::new(),
            close_after_flush: false,
        }
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.socket.peer_addr()
    }

    pub fn buffer(&self) -> &BytesMut {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// 当前绑定在连接上的任务。
    pub fn binding(&self) -> Option<TaskId> {
        self.binding
    }

    /// 重新绑定，返回被替换的旧绑定。
    pub fn bind(&mut self, task: TaskId) -> Option<TaskId> {
        self.binding.replace(task)
    }

    /// 仅当当前绑定仍是 `task` 时解除绑定。
    pub fn unbind(&mut self, task: TaskId) -> bool {
        if self.binding == Some(task) {
            self.binding = None;
            true
        } else {
            false
        }
    }

    pub fn configure(&mut self, options: &SocketOptions) -> io::Result<()> {
        self.socket.configure(options)
    }

    /// 读取直到 `WouldBlock` 或对端关闭，全部追加到累积缓冲。
    pub fn read_available(&mut self, scratch: &mut [u8]) -> io::Result<ReadOutcome> {
        let mut outcome = ReadOutcome {
            received: 0,
            eof: false,
        };
        loop {
            match self.socket.read(scratch) {
                Ok(0) => {
                    outcome.eof = true;
                    return Ok(outcome);
                }
                Ok(count) => {
                    self.buffer.extend_from_slice(&scratch[..count]);
                    outcome.received += count;
                }
                Err(err) => match categorize_io_error(&err) {
                    IoCategory::WouldBlock => return Ok(outcome),
                    IoCategory::Interrupted => continue,
                    IoCategory::Closed => {
                        outcome.eof = true;
                        return Ok(outcome);
                    }
                    IoCategory::Fatal => return Err(err),
                },
            }
        }
    }

    /// 运行协议握手；成功后标记为已验证。
    pub fn handshake(&mut self) -> Handshake {
        if self.verified {
            return Handshake::Active;
        }
        let mut link = Link {
            buffer: &mut self.buffer,
            metadata: &mut self.metadata,
            out: Outbound::new(&mut *self.socket, &mut self.pending),
        };
        let outcome = self.protocol.handshake(&mut link);
        if outcome == Handshake::Active {
            self.verified = true;
        }
        outcome
    }

    /// 切出并校验一个帧。
    pub fn cut(&mut self) -> Cut<P::Frame> {
        self.protocol.parse(&mut self.buffer, &self.metadata)
    }

    /// 损坏后重新同步，返回丢弃的字节数。
    pub fn corrective(&mut self) -> usize {
        self.protocol.corrective(&mut self.buffer)
    }

    /// 经协议 `build` 包装后写出。
    pub fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        let mut out = Outbound::new(&mut *self.socket, &mut self.pending);
        self.protocol.send(&mut out, payload)
    }

    /// 写出已经是线格式的字节（例如协议自身生成的应答）。
    pub fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        Outbound::new(&mut *self.socket, &mut self.pending).write(bytes)
    }

    /// 绕过待发缓冲直接写一次；调用方自行处理 `WouldBlock` 与部分写入。
    pub fn write_direct(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.socket.write(bytes)
    }

    /// 冲刷待发缓冲，全部写完时返回 `true`。
    pub fn flush(&mut self) -> io::Result<bool> {
        Outbound::new(&mut *self.socket, &mut self.pending).flush()
    }

    pub fn pending_output(&self) -> usize {
        self.pending.len()
    }

    pub fn send_capacity(&self) -> usize {
        self.socket.send_capacity()
    }

    /// 待发缓冲冲刷完毕后关闭。
    pub fn close_after_flush(&mut self) {
        self.close_after_flush = true;
    }

    /// 是否已请求关闭且没有积压数据。
    pub fn ready_to_close(&self) -> bool {
        self.close_after_flush && self.pending.is_empty()
    }

    pub fn is_closing(&self) -> bool {
        self.close_after_flush
    }

    pub fn shutdown(&mut self) -> io::Result<()> {
        self.socket.shutdown()
    }
}

impl<P: Protocol> fmt::Debug for Connection<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("buffered", &self.buffer.len())
            .field("pending", &self.pending.len())
            .field("verified", &self.verified)
            .field("binding", &self.binding)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Passthrough;
    use crate::test_stubs::MemorySocket;

    #[test]
    fn partial_writes_are_kept_and_flushed_in_order() {
        let (socket, peer) = MemorySocket::pair();
        let mut connection = Connection::new(SocketId::from_raw(1), Box::new(socket), Passthrough);
        peer.set_write_limit(Some(3));
        peer.script_writes([false, true]);
        connection.send(b"hello").unwrap();
        assert_eq!(peer.take_output(), b"hel");
        assert_eq!(connection.pending_output(), 2);

        connection.send(b"!").unwrap();
        assert_eq!(connection.pending_output(), 0);
        assert_eq!(peer.take_output(), b"lo!");
    }

    #[test]
    fn read_collects_until_would_block_and_reports_eof() {
        let (socket, peer) = MemorySocket::pair();
        let mut connection = Connection::new(SocketId::from_raw(1), Box::new(socket), Passthrough);
        let mut scratch = [0u8; 4];
        peer.send(b"0123456789");
        let outcome = connection.read_available(&mut scratch).unwrap();
        assert_eq!(outcome, ReadOutcome { received: 10, eof: false });
        assert_eq!(&connection.buffer()[..], b"0123456789");

        peer.close();
        assert!(connection.read_available(&mut scratch).unwrap().eof);
    }

    #[test]
    fn binding_replacement_reports_the_stale_task() {
        let (socket, _peer) = MemorySocket::pair();
        let mut connection = Connection::new(SocketId::from_raw(1), Box::new(socket), Passthrough);
        assert_eq!(connection.bind(TaskId::from_raw(1)), None);
        assert_eq!(connection.bind(TaskId::from_raw(2)), Some(TaskId::from_raw(1)));
        assert!(!connection.unbind(TaskId::from_raw(1)));
        assert!(connection.unbind(TaskId::from_raw(2)));
    }
}
