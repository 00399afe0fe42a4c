//! 非阻塞套接字契约。
//!
//! Worker 只通过这两个 trait 接触底层 IO：具体实现可以是 TCP、Unix 域套接字，
//! 也可以是测试中的内存管道。所有方法都必须是非阻塞的，暂不可用时返回
//! `io::ErrorKind::WouldBlock`。

use crate::config::SocketOptions;
use std::io;
use std::net::SocketAddr;

/// 一条已建立的连接。
pub trait Socket {
    /// 读取可用字节；对端关闭时返回 `Ok(0)`。
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// 写入尽可能多的字节，返回实际写入数量。
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// 当前发送缓冲的容量，文件分块以此为上限。
    fn send_capacity(&self) -> usize;

    /// 切换为非阻塞并应用缓冲区等参数。
    fn configure(&mut self, options: &SocketOptions) -> io::Result<()>;

    /// 关闭连接的读写两个方向。
    fn shutdown(&mut self) -> io::Result<()>;

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// 监听套接字。fork 后父子进程共享同一个监听器。
pub trait Listener {
    /// 接受一个新连接；没有待接受连接时返回 `WouldBlock`。
    fn accept(&mut self) -> io::Result<Box<dyn Socket>>;

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}
