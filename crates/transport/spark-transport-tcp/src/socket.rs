use crate::error::{self, annotate};
use socket2::SockRef;
use spark_fiber::{Socket, SocketOptions};
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::rc::Rc;
use tokio::net::TcpStream;

/// 交给 Worker 的 TCP 连接。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - Worker 只认识非阻塞的 [`Socket`] 契约；tokio 的 `TcpStream` 本身就是非阻塞的，
///   `try_read`/`try_write` 在未就绪时返回 `WouldBlock`，正好对上这一契约；
/// - 同一个流还要交给就绪监视任务等待可读，因此以 `Rc` 共享，读写都只需要 `&TcpStream`。
///
/// ## 逻辑 (How)
/// - `configure`：缓冲区大小与 keepalive 经 `socket2::SockRef` 设置，`TCP_NODELAY` 经流本身设置；
/// - `send_capacity` 返回配置时记录的发送缓冲大小，下载按它切块；
/// - `shutdown` 关闭两个方向，监视任务随之观察到可读（EOF）并退出。
///
/// ## 契约 (What)
/// - 错误文案带上操作名（`tcp read`、`tcp write`、`tcp configure`），错误种类保持不变。
#[derive(Debug)]
pub struct TcpSocket {
    stream: Rc<TcpStream>,
    peer: Option<SocketAddr>,
    send_capacity: usize,
}

impl TcpSocket {
    pub fn new(stream: Rc<TcpStream>) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            stream,
            peer,
            send_capacity: SocketOptions::default().send_buffer,
        }
    }

    pub fn stream(&self) -> &Rc<TcpStream> {
        &self.stream
    }
}

impl Socket for TcpSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream
            .try_read(buf)
            .map_err(|err| annotate(error::READ, err))
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream
            .try_write(buf)
            .map_err(|err| annotate(error::WRITE, err))
    }

    fn send_capacity(&self) -> usize {
        self.send_capacity
    }

    fn configure(&mut self, options: &SocketOptions) -> io::Result<()> {
        let apply = || -> io::Result<()> {
            let sock = SockRef::from(&*self.stream);
            sock.set_recv_buffer_size(options.receive_buffer)?;
            sock.set_send_buffer_size(options.send_buffer)?;
            sock.set_keepalive(options.keepalive)?;
            self.stream.set_nodelay(options.nodelay)
        };
        apply().map_err(|err| annotate(error::CONFIGURE, err))?;
        self.send_capacity = options.send_buffer.max(1);
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match SockRef::from(&*self.stream).shutdown(Shutdown::Both) {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err),
            _ => Ok(()),
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}
