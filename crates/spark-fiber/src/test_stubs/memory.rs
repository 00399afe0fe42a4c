use crate::config::SocketOptions;
use crate::socket::{Listener, Socket};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

const DEFAULT_CAPACITY: usize = 64 * 1024;

#[derive(Debug)]
struct Pipe {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    peer_closed: bool,
    closed: bool,
    capacity: usize,
    write_limit: Option<usize>,
    blocked: bool,
    script: VecDeque<bool>,
    write_error: Option<io::ErrorKind>,
    write_calls: usize,
    configured: Option<SocketOptions>,
}

impl Default for Pipe {
    fn default() -> Self {
        Self {
            inbound: VecDeque::new(),
            outbound: Vec::new(),
            peer_closed: false,
            closed: false,
            capacity: DEFAULT_CAPACITY,
            write_limit: None,
            blocked: false,
            script: VecDeque::new(),
            write_error: None,
            write_calls: 0,
            configured: None,
        }
    }
}

/// 交给 Worker 的内存套接字。
#[derive(Debug)]
pub struct MemorySocket {
    pipe: Rc<RefCell<Pipe>>,
}

/// 留在测试侧、用于操控与观察 [`MemorySocket`] 的句柄。
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    pipe: Rc<RefCell<Pipe>>,
}

impl MemorySocket {
    pub fn pair() -> (MemorySocket, MemoryPeer) {
        let pipe = Rc::new(RefCell::new(Pipe::default()));
        (
            MemorySocket {
                pipe: Rc::clone(&pipe),
            },
            MemoryPeer { pipe },
        )
    }
}

impl Socket for MemorySocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.pipe.borrow_mut();
        if pipe.closed {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if pipe.inbound.is_empty() {
            return if pipe.peer_closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let count = buf.len().min(pipe.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(pipe.inbound.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = self.pipe.borrow_mut();
        pipe.write_calls += 1;
        if pipe.closed || pipe.peer_closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if let Some(kind) = pipe.write_error {
            return Err(kind.into());
        }
        let blocked = pipe.script.pop_front().unwrap_or(pipe.blocked);
        if blocked {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let count = buf.len().min(pipe.write_limit.unwrap_or(usize::MAX));
        pipe.outbound.extend_from_slice(&buf[..count]);
        Ok(count)
    }

    fn send_capacity(&self) -> usize {
        self.pipe.borrow().capacity
    }

    fn configure(&mut self, options: &SocketOptions) -> io::Result<()> {
        let mut pipe = self.pipe.borrow_mut();
        pipe.capacity = options.send_buffer;
        pipe.configured = Some(options.clone());
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.pipe.borrow_mut().closed = true;
        Ok(())
    }
}

impl Drop for MemorySocket {
    fn drop(&mut self) {
        self.pipe.borrow_mut().closed = true;
    }
}

impl MemoryPeer {
    /// 投递一段入站字节。
    pub fn send(&self, bytes: impl AsRef<[u8]>) {
        self.pipe.borrow_mut().inbound.extend(bytes.as_ref());
    }

    /// 对端半关闭：剩余数据读完后 `read` 返回 `Ok(0)`。
    pub fn close(&self) {
        self.pipe.borrow_mut().peer_closed = true;
    }

    /// 取走目前为止 Worker 写出的全部字节。
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.pipe.borrow_mut().outbound)
    }

    pub fn output_len(&self) -> usize {
        self.pipe.borrow().outbound.len()
    }

    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.pipe.borrow().outbound).into_owned()
    }

    /// Worker 是否已关闭（或丢弃）该套接字。
    pub fn is_closed(&self) -> bool {
        self.pipe.borrow().closed
    }

    pub fn set_capacity(&self, capacity: usize) {
        self.pipe.borrow_mut().capacity = capacity;
    }

    /// 限制单次写入最多接受的字节数。
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.pipe.borrow_mut().write_limit = limit;
    }

    pub fn set_blocked(&self, blocked: bool) {
        self.pipe.borrow_mut().blocked = blocked;
    }

    /// 按顺序规定之后每次写入是否阻塞，脚本用尽后回到 `set_blocked` 的设置。
    pub fn script_writes(&self, blocked: impl IntoIterator<Item = bool>) {
        self.pipe.borrow_mut().script.extend(blocked);
    }

    pub fn fail_writes(&self, kind: Option<io::ErrorKind>) {
        self.pipe.borrow_mut().write_error = kind;
    }

    pub fn write_calls(&self) -> usize {
        self.pipe.borrow().write_calls
    }

    pub fn configured(&self) -> Option<SocketOptions> {
        self.pipe.borrow().configured.clone()
    }
}

/// 内存监听器，连接由配对的 [`MemoryConnector`] 注入。
#[derive(Debug)]
pub struct MemoryListener {
    backlog: Rc<RefCell<VecDeque<MemorySocket>>>,
}

#[derive(Debug, Clone)]
pub struct MemoryConnector {
    backlog: Rc<RefCell<VecDeque<MemorySocket>>>,
}

impl MemoryListener {
    pub fn new() -> (MemoryListener, MemoryConnector) {
        let backlog = Rc::new(RefCell::new(VecDeque::new()));
        (
            MemoryListener {
                backlog: Rc::clone(&backlog),
            },
            MemoryConnector { backlog },
        )
    }
}

impl Listener for MemoryListener {
    fn accept(&mut self) -> io::Result<Box<dyn Socket>> {
        match self.backlog.borrow_mut().pop_front() {
            Some(socket) => Ok(Box::new(socket)),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

impl MemoryConnector {
    /// 发起一个新连接，返回客户端一侧的句柄。
    pub fn connect(&self) -> MemoryPeer {
        let (socket, peer) = MemorySocket::pair();
        self.backlog.borrow_mut().push_back(socket);
        peer
    }

    pub fn pending(&self) -> usize {
        self.backlog.borrow().len()
    }
}
